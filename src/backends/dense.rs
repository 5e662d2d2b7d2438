//! CPU dense layer backed by per-batch weight artifacts.
//!
//! `prepare_batch` exports a weight file for the batch size into the artifact
//! directory, `read` loads it back, and `infer` multiplies a random input batch
//! by the loaded weights.

use std::fs;
use std::hint::black_box;
use std::path::{Path, PathBuf};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::{BenchError, Result};
use crate::model::Backend;

const MAGIC: &[u8; 4] = b"DNS1";
const HEADER_LEN: usize = 16;
const WEIGHT_SEED: u64 = 0x5eed;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DenseShape {
    pub in_features: usize,
    pub out_features: usize,
}

pub struct DenseBackend {
    artifact_dir: PathBuf,
    shape: DenseShape,
    description: String,
    weights: Option<Vec<f32>>,
    input: Vec<f32>,
    output: Vec<f32>,
    batch_size: usize,
    rng: StdRng,
}

impl DenseBackend {
    pub fn new(artifact_dir: impl Into<PathBuf>, shape: DenseShape) -> Self {
        let description = format!(
            "Dense {}x{} f32 layer on CPU",
            shape.in_features, shape.out_features
        );
        Self {
            artifact_dir: artifact_dir.into(),
            shape,
            description,
            weights: None,
            input: Vec::new(),
            output: Vec::new(),
            batch_size: 0,
            rng: StdRng::from_entropy(),
        }
    }

    pub fn artifact_path(&self, batch_size: usize) -> PathBuf {
        self.artifact_dir.join(format!(
            "dense_{}x{}_{}b.bin",
            self.shape.in_features, self.shape.out_features, batch_size
        ))
    }

    pub fn is_loaded(&self) -> bool {
        self.weights.is_some()
    }

    fn export(&self, path: &Path, batch_size: usize) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let count = self.shape.in_features * self.shape.out_features;
        let mut rng = StdRng::seed_from_u64(WEIGHT_SEED);
        let scale = 1.0 / (self.shape.in_features as f32).sqrt();

        let mut bytes = Vec::with_capacity(HEADER_LEN + count * 4);
        bytes.extend_from_slice(MAGIC);
        for value in [batch_size, self.shape.in_features, self.shape.out_features] {
            bytes.extend_from_slice(&(value as u32).to_le_bytes());
        }
        for _ in 0..count {
            let weight: f32 = rng.gen_range(-scale..scale);
            bytes.extend_from_slice(&weight.to_le_bytes());
        }

        // prepare_batch treats any existing file as finished.
        let partial = path.with_extension("partial");
        fs::write(&partial, &bytes)?;
        fs::rename(&partial, path)
    }

    fn load(&self, path: &Path, batch_size: usize) -> Result<Vec<f32>> {
        let bytes = fs::read(path).map_err(|err| {
            BenchError::backend(format!("failed to read {}: {}", path.display(), err))
        })?;

        if bytes.len() < HEADER_LEN || &bytes[..4] != MAGIC {
            return Err(BenchError::backend(format!(
                "{} is not a dense weight artifact",
                path.display()
            )));
        }
        let field = |index: usize| {
            let start = 4 + index * 4;
            let mut raw = [0u8; 4];
            raw.copy_from_slice(&bytes[start..start + 4]);
            u32::from_le_bytes(raw) as usize
        };
        let header = (field(0), field(1), field(2));
        let expected = (batch_size, self.shape.in_features, self.shape.out_features);
        if header != expected {
            return Err(BenchError::backend(format!(
                "{} was exported for (batch, in, out) = {:?}, expected {:?}",
                path.display(),
                header,
                expected
            )));
        }

        let body = &bytes[HEADER_LEN..];
        if body.len() != self.shape.in_features * self.shape.out_features * 4 {
            return Err(BenchError::backend(format!(
                "{} is truncated",
                path.display()
            )));
        }
        Ok(body
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect())
    }
}

impl Backend for DenseBackend {
    fn description(&self) -> &str {
        &self.description
    }

    fn prepare_batch(&mut self, batch_size: usize) -> Result<()> {
        let path = self.artifact_path(batch_size);
        if path.exists() {
            return Ok(());
        }
        tracing::debug!(path = %path.display(), batch_size, "exporting dense weights");
        self.export(&path, batch_size)
            .map_err(|err| BenchError::preparation(batch_size, format!("{}: {}", path.display(), err)))
    }

    fn read(&mut self, batch_size: usize) -> Result<()> {
        let path = self.artifact_path(batch_size);
        self.weights = Some(self.load(&path, batch_size)?);
        self.batch_size = batch_size;
        Ok(())
    }

    fn prepare(&mut self, batch_size: usize) -> Result<()> {
        let len = batch_size * self.shape.in_features;
        let rng = &mut self.rng;
        self.input = (0..len).map(|_| rng.gen_range(-1.0f32..1.0)).collect();
        self.output = vec![0.0; batch_size * self.shape.out_features];
        Ok(())
    }

    fn infer(&mut self) -> Result<()> {
        let weights = self
            .weights
            .as_deref()
            .ok_or_else(|| BenchError::backend("no weights loaded"))?;
        let DenseShape {
            in_features,
            out_features,
        } = self.shape;
        let rows = self.input.len() / in_features;
        if rows != self.batch_size {
            return Err(BenchError::backend(format!(
                "input holds {} rows but the loaded model expects {}",
                rows, self.batch_size
            )));
        }

        for (row, out) in self
            .input
            .chunks_exact(in_features)
            .zip(self.output.chunks_exact_mut(out_features))
        {
            out.fill(0.0);
            for (x, weight_row) in row.iter().zip(weights.chunks_exact(out_features)) {
                for (acc, w) in out.iter_mut().zip(weight_row) {
                    *acc += x * w;
                }
            }
        }
        black_box(&self.output);
        Ok(())
    }

    fn shutdown(&mut self) -> Result<()> {
        self.weights = None;
        self.input.clear();
        self.output.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHAPE: DenseShape = DenseShape {
        in_features: 8,
        out_features: 4,
    };

    #[test]
    fn prepare_batch_exports_once() {
        let dir = tempfile::tempdir().unwrap();
        let mut backend = DenseBackend::new(dir.path(), SHAPE);

        backend.prepare_batch(2).unwrap();
        let path = backend.artifact_path(2);
        assert!(path.exists());
        let first = fs::metadata(&path).unwrap().modified().unwrap();

        backend.prepare_batch(2).unwrap();
        let second = fs::metadata(&path).unwrap().modified().unwrap();
        assert_eq!(first, second);
        assert_eq!(fs::metadata(&path).unwrap().len() as usize, HEADER_LEN + 8 * 4 * 4);
    }

    #[test]
    fn read_prepare_infer_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let mut backend = DenseBackend::new(dir.path(), SHAPE);
        backend.prepare_batch(3).unwrap();

        backend.read(3).unwrap();
        assert!(backend.is_loaded());
        backend.prepare(3).unwrap();
        backend.infer().unwrap();
        assert_eq!(backend.output.len(), 3 * 4);

        // Reads are independent and may be repeated.
        backend.read(3).unwrap();
        backend.infer().unwrap();
    }

    #[test]
    fn read_without_artifact_is_backend_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut backend = DenseBackend::new(dir.path(), SHAPE);
        assert!(matches!(backend.read(1), Err(BenchError::Backend(_))));
    }

    #[test]
    fn artifact_for_other_batch_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut backend = DenseBackend::new(dir.path(), SHAPE);
        backend.prepare_batch(1).unwrap();
        fs::copy(backend.artifact_path(1), backend.artifact_path(2)).unwrap();
        assert!(matches!(backend.read(2), Err(BenchError::Backend(_))));
    }

    #[test]
    fn unwritable_artifact_dir_is_preparation_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        fs::write(&blocker, b"not a directory").unwrap();
        let mut backend = DenseBackend::new(blocker.join("artifacts"), SHAPE);
        assert!(matches!(
            backend.prepare_batch(1),
            Err(BenchError::Preparation { batch_size: 1, .. })
        ));
    }

    #[test]
    fn shutdown_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let mut backend = DenseBackend::new(dir.path(), SHAPE);
        backend.shutdown().unwrap();
        backend.prepare_batch(1).unwrap();
        backend.read(1).unwrap();
        backend.shutdown().unwrap();
        backend.shutdown().unwrap();
        assert!(!backend.is_loaded());
        assert!(matches!(backend.infer(), Err(BenchError::Backend(_))));
    }
}
