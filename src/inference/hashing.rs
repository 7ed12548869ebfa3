//! Model-free embedder based on feature hashing.
//!
//! Each text is lowercased and split into words. Every word contributes one
//! whole-word feature plus its character trigrams (with `#` as boundary
//! marker), so "read" and "reads" share most of their features. Features are
//! hashed into a fixed number of buckets with FNV-1a and the resulting
//! vector is L2-normalized.

use crate::error::Result;
use crate::inference::Embedder;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

pub struct HashingEmbedder {
    model_id: String,
    dims: usize,
}

impl HashingEmbedder {
    pub fn new(model_id: impl Into<String>, dims: usize) -> Self {
        Self {
            model_id: model_id.into(),
            dims: dims.max(1),
        }
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    /// Embed a single text.
    pub fn encode(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dims];
        let lowered = text.to_lowercase();

        for word in lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            vector[self.bucket(&["w:", word])] += 1.0;

            let padded: Vec<char> = std::iter::once('#')
                .chain(word.chars())
                .chain(std::iter::once('#'))
                .collect();
            for window in padded.windows(3) {
                let trigram: String = window.iter().collect();
                vector[self.bucket(&["g:", trigram.as_str()])] += 1.0;
            }
        }

        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for val in vector.iter_mut() {
                *val /= norm;
            }
        }

        vector
    }

    fn bucket(&self, parts: &[&str]) -> usize {
        let mut hash = FNV_OFFSET;
        for part in parts {
            for byte in part.bytes() {
                hash ^= u64::from(byte);
                hash = hash.wrapping_mul(FNV_PRIME);
            }
        }
        (hash % self.dims as u64) as usize
    }
}

impl Embedder for HashingEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn embed(&mut self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|text| self.encode(text)).collect())
    }
}
