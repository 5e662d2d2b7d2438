//! Backend lookup by dotted identifier, e.g. `synthetic.dense`.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::{BenchError, Result};
use crate::model::Backend;

type Factory = Box<dyn Fn() -> Result<Box<dyn Backend>>>;

#[derive(Default)]
pub struct BackendRegistry {
    factories: BTreeMap<String, Factory>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a factory under `id`, replacing any previous one.
    pub fn register<F>(&mut self, id: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn() -> Result<Box<dyn Backend>> + 'static,
    {
        self.factories.insert(id.into(), Box::new(factory));
        self
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.factories.contains_key(id)
    }

    /// Builds the backend registered as `id`. On a miss the error lists the
    /// entries one level below the deepest prefix of `id` that exists.
    pub fn resolve(&self, id: &str) -> Result<Box<dyn Backend>> {
        match self.factories.get(id) {
            Some(factory) => factory(),
            None => Err(BenchError::UnknownBackend {
                id: id.to_string(),
                available: self.siblings(id),
            }),
        }
    }

    fn siblings(&self, id: &str) -> Vec<String> {
        let segments: Vec<&str> = id.split('.').collect();

        for depth in (0..=segments.len()).rev() {
            let prefix = segments[..depth].join(".");
            let children: BTreeSet<String> = self
                .factories
                .keys()
                .filter_map(|key| child_segment(key, &prefix))
                .map(|child| {
                    if prefix.is_empty() {
                        child.to_string()
                    } else {
                        format!("{}.{}", prefix, child)
                    }
                })
                .collect();
            if !children.is_empty() {
                return children.into_iter().collect();
            }
        }
        Vec::new()
    }
}

/// Next path segment of `key` below `prefix`, if `key` lives under it.
fn child_segment<'a>(key: &'a str, prefix: &str) -> Option<&'a str> {
    let rest = if prefix.is_empty() {
        key
    } else {
        key.strip_prefix(prefix)?.strip_prefix('.')?
    };
    rest.split('.').next().filter(|segment| !segment.is_empty())
}
