//! Bi-encoder model for tool and query embeddings.
//!
//! Runs a BGE-style ONNX export and produces one L2-normalized vector per
//! input via mean pooling over the attention mask. Query and tools are
//! encoded independently, so tool vectors can be cached across processes.

use crate::error::{AppError, Result};
use crate::inference::Embedder;
use ndarray::Array2;
use ort::{
    session::{builder::GraphOptimizationLevel, Session},
    value::Tensor,
};
use std::path::Path;
use tokenizers::Tokenizer;

pub struct OnnxEmbedder {
    model_id: String,
    session: Session,
    tokenizer: Tokenizer,
    max_length: usize,
}

impl OnnxEmbedder {
    /// Load the bi-encoder model and tokenizer.
    ///
    /// # Arguments
    /// * `model_path` - Path to the ONNX model file
    /// * `tokenizer_path` - Path to the tokenizer JSON file
    /// * `max_length` - Maximum sequence length (512 for BGE-base)
    /// * `intra_threads` - Threads used inside one inference call
    pub fn load(
        model_id: impl Into<String>,
        model_path: &Path,
        tokenizer_path: &Path,
        max_length: usize,
        intra_threads: usize,
    ) -> Result<Self> {
        let tokenizer = Tokenizer::from_file(tokenizer_path).map_err(|e| {
            AppError::ModelError(format!(
                "Failed to load tokenizer {}: {}",
                tokenizer_path.display(),
                e
            ))
        })?;

        let session = Session::builder()
            .map_err(|e| AppError::ModelError(e.to_string()))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| AppError::ModelError(e.to_string()))?
            .with_intra_threads(intra_threads.max(1))
            .map_err(|e| AppError::ModelError(e.to_string()))?
            .commit_from_file(model_path)
            .map_err(|e| {
                AppError::ModelError(format!(
                    "Failed to load model {}: {}",
                    model_path.display(),
                    e
                ))
            })?;

        tracing::info!(
            model = %model_path.display(),
            tokenizer = %tokenizer_path.display(),
            max_length,
            intra_threads,
            "Bi-encoder model loaded"
        );

        Ok(Self {
            model_id: model_id.into(),
            session,
            tokenizer,
            max_length,
        })
    }

    /// Pad a tokenized batch to its longest member (capped at `max_length`).
    fn pad_batch(&self, texts: &[String]) -> Result<PaddedBatch> {
        let encodings = self
            .tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| AppError::ModelError(format!("Tokenization failed: {}", e)))?;

        let width = encodings
            .iter()
            .map(|e| e.get_ids().len().min(self.max_length))
            .max()
            .unwrap_or(1)
            .max(1);

        let mut batch = PaddedBatch {
            rows: encodings.len(),
            width,
            ids: vec![0; encodings.len() * width],
            mask: vec![0; encodings.len() * width],
        };
        for (row, encoding) in encodings.iter().enumerate() {
            let offset = row * width;
            let ids = encoding.get_ids().iter().take(width);
            let mask = encoding.get_attention_mask().iter();
            for (col, (id, m)) in ids.zip(mask).enumerate() {
                batch.ids[offset + col] = i64::from(*id);
                batch.mask[offset + col] = i64::from(*m);
            }
        }
        Ok(batch)
    }

    fn encode_batch(&mut self, texts: &[String]) -> Result<Array2<f32>> {
        let batch = self.pad_batch(texts)?;
        let shape = [batch.rows, batch.width];
        let tensor = |values: Vec<i64>| {
            Tensor::from_array((shape, values)).map_err(|e| AppError::ModelError(e.to_string()))
        };

        let outputs = self
            .session
            .run(ort::inputs![
                "input_ids" => tensor(batch.ids.clone())?,
                "attention_mask" => tensor(batch.mask.clone())?,
                "token_type_ids" => tensor(vec![0; batch.rows * batch.width])?,
            ])
            .map_err(|e| AppError::ModelError(format!("Embedding inference failed: {}", e)))?;

        let hidden = outputs.get("last_hidden_state").ok_or_else(|| {
            AppError::ModelError("Model has no 'last_hidden_state' output".to_string())
        })?;
        let (dims, data) = hidden
            .try_extract_tensor::<f32>()
            .map_err(|e| AppError::ModelError(e.to_string()))?;

        Ok(mean_pool(data, &batch.mask, batch.rows, batch.width, dims[2] as usize))
    }
}

struct PaddedBatch {
    rows: usize,
    width: usize,
    ids: Vec<i64>,
    mask: Vec<i64>,
}

/// Average the token states under the attention mask, then L2-normalize.
///
/// `hidden` is laid out `(rows, width, dim)`.
fn mean_pool(hidden: &[f32], mask: &[i64], rows: usize, width: usize, dim: usize) -> Array2<f32> {
    let mut pooled = Array2::zeros((rows, dim));
    for (row, mut out) in pooled.outer_iter_mut().enumerate() {
        let mut tokens = 0usize;
        for col in (0..width).filter(|&col| mask[row * width + col] == 1) {
            let start = (row * width + col) * dim;
            for (acc, value) in out.iter_mut().zip(&hidden[start..start + dim]) {
                *acc += value;
            }
            tokens += 1;
        }
        if tokens == 0 {
            continue;
        }
        out.mapv_inplace(|v| v / tokens as f32);
        let norm = out.dot(&out).sqrt();
        if norm > 0.0 {
            out.mapv_inplace(|v| v / norm);
        }
    }
    pooled
}

impl Embedder for OnnxEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn embed(&mut self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let embeddings = self.encode_batch(texts)?;
        Ok(embeddings.outer_iter().map(|row| row.to_vec()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean_pool_ignores_padding() {
        // one row, three positions, dim 2; the last position is padding
        let hidden = [1.0, 0.0, 3.0, 0.0, 100.0, 100.0];
        let mask = [1, 1, 0];

        let pooled = mean_pool(&hidden, &mask, 1, 3, 2);

        assert_eq!(pooled.row(0).to_vec(), vec![1.0, 0.0]);
    }

    #[test]
    fn test_mean_pool_normalizes_each_row() {
        let hidden = [3.0, 4.0, 0.0, 2.0];
        let mask = [1, 1];

        let pooled = mean_pool(&hidden, &mask, 2, 1, 2);

        assert!((pooled[[0, 0]] - 0.6).abs() < 1e-6);
        assert!((pooled[[0, 1]] - 0.8).abs() < 1e-6);
        assert_eq!(pooled.row(1).to_vec(), vec![0.0, 1.0]);
    }

    #[test]
    fn test_mean_pool_empty_mask_stays_zero() {
        let pooled = mean_pool(&[5.0, 5.0], &[0], 1, 1, 2);
        assert_eq!(pooled.row(0).to_vec(), vec![0.0, 0.0]);
    }
}
