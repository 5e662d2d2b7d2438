//! Backends that ship with the harness.

mod dense;
mod sleep;

use std::path::Path;

pub use dense::{DenseBackend, DenseShape};
pub use sleep::{SleepBackend, SleepTimings};

use crate::model::Backend;
use crate::registry::BackendRegistry;

/// Registry with every built-in backend. File-backed backends keep their
/// artifacts under `artifact_dir`.
pub fn builtin_registry(artifact_dir: &Path) -> BackendRegistry {
    let mut registry = BackendRegistry::new();

    for (variant, shape) in [
        (
            "dense",
            DenseShape {
                in_features: 512,
                out_features: 512,
            },
        ),
        (
            "dense_large",
            DenseShape {
                in_features: 2048,
                out_features: 1024,
            },
        ),
    ] {
        let dir = artifact_dir.to_path_buf();
        registry.register(format!("synthetic.{}", variant), move || {
            Ok(Box::new(DenseBackend::new(dir.clone(), shape)) as Box<dyn Backend>)
        });
    }

    registry.register("synthetic.sleep", || {
        Ok(Box::new(SleepBackend::new(SleepTimings::default())) as Box<dyn Backend>)
    });

    registry
}
