//! Text embedding for passages and queries.
//!
//! `FastEmbedder` (the default `fastembed` feature) runs a sentence
//! transformer, all-MiniLM-L6-v2 (384 dimensions) unless configured
//! otherwise. [`HashedEmbedder`] is a deterministic feature-hashing model for
//! tests and offline builds; it is only used when `embedding_model = "hashed"`.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use thiserror::Error;

/// Errors that can occur during embedding operations.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("Failed to initialize embedding model: {0}")]
    ModelInit(String),

    #[error("Failed to generate embeddings: {0}")]
    Generation(String),

    #[error("Blocking task failed: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),
}

/// Maps text to fixed-length vectors. The same instance must embed both the
/// corpus and the queries run against it.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn model_name(&self) -> &str;

    fn dimension(&self) -> usize;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }
}

static STOP_WORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "a", "an", "and", "are", "as", "at", "be", "by", "can", "do", "for", "from", "how", "i",
        "if", "in", "is", "it", "me", "my", "of", "on", "or", "the", "this", "to", "was", "what",
        "when", "where", "which", "will", "with", "you", "your",
    ]
    .into_iter()
    .collect()
});

/// Deterministic bag-of-words embedder using FNV-1a feature hashing.
///
/// Tokens are lowercased alphanumeric runs with stop words removed and a
/// trailing plural `s` stripped. Vectors are L2-normalised, so cosine
/// similarity reduces to weighted token overlap.
pub struct HashedEmbedder {
    dimension: usize,
}

impl HashedEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
        text.split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(str::to_lowercase)
            .filter(|t| !STOP_WORDS.contains(t.as_str()))
            .map(|t| {
                if t.len() > 3 && t.ends_with('s') && !t.ends_with("ss") {
                    t[..t.len() - 1].to_string()
                } else {
                    t
                }
            })
    }

    pub fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimension];
        for token in Self::tokens(text) {
            let slot = (fnv1a(token.as_bytes()) % self.dimension as u64) as usize;
            vector[slot] += 1.0;
        }
        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut vector {
                *x /= norm;
            }
        }
        vector
    }
}

impl Default for HashedEmbedder {
    fn default() -> Self {
        Self::new(384)
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for b in bytes {
        hash ^= u64::from(*b);
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

#[async_trait]
impl Embedder for HashedEmbedder {
    fn model_name(&self) -> &str {
        "hashed"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Ok(self.embed_sync(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts.iter().map(|t| self.embed_sync(t)).collect())
    }
}

#[cfg(feature = "fastembed")]
pub use neural::FastEmbedder;

#[cfg(feature = "fastembed")]
mod neural {
    use std::sync::Arc;

    use async_trait::async_trait;
    use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
    use once_cell::sync::OnceCell;
    use tokio::task;
    use tracing::{debug, info, instrument};

    use super::{Embedder, EmbeddingError};

    /// Sentence-transformer embeddings via fastembed.
    ///
    /// The model is loaded on first use and shared across calls.
    pub struct FastEmbedder {
        name: String,
        model_name: EmbeddingModel,
        dimension: usize,
        model: OnceCell<Arc<TextEmbedding>>,
    }

    impl FastEmbedder {
        pub fn from_model_str(name: &str) -> Result<Self, EmbeddingError> {
            let (model_name, dimension) = match name {
                "all-MiniLM-L6-v2" | "AllMiniLML6V2" => (EmbeddingModel::AllMiniLML6V2, 384),
                "all-MiniLM-L12-v2" | "AllMiniLML12V2" => (EmbeddingModel::AllMiniLML12V2, 384),
                "bge-small-en-v1.5" | "BGESmallENV15" => (EmbeddingModel::BGESmallENV15, 384),
                "bge-base-en-v1.5" | "BGEBaseENV15" => (EmbeddingModel::BGEBaseENV15, 768),
                "nomic-embed-text-v1.5" | "NomicEmbedTextV15" => {
                    (EmbeddingModel::NomicEmbedTextV15, 768)
                }
                _ => {
                    return Err(EmbeddingError::ModelInit(format!(
                        "Unknown embedding model: '{name}'. Supported: all-MiniLM-L6-v2, all-MiniLM-L12-v2, bge-small-en-v1.5, bge-base-en-v1.5, nomic-embed-text-v1.5"
                    )));
                }
            };
            Ok(Self {
                name: name.to_string(),
                model_name,
                dimension,
                model: OnceCell::new(),
            })
        }

        /// Like [`FastEmbedder::from_model_str`], rejecting a configured
        /// dimension the model does not produce.
        pub fn from_config(name: &str, expected_dim: usize) -> Result<Self, EmbeddingError> {
            let embedder = Self::from_model_str(name)?;
            if embedder.dimension != expected_dim {
                return Err(EmbeddingError::ModelInit(format!(
                    "Dimension mismatch: model '{name}' produces {}-dim vectors but config specifies {expected_dim}",
                    embedder.dimension
                )));
            }
            Ok(embedder)
        }

        #[instrument(skip(self))]
        fn get_or_init_model(&self) -> Result<Arc<TextEmbedding>, EmbeddingError> {
            self.model
                .get_or_try_init(|| {
                    info!(model = %self.name, "Initializing embedding model");
                    let options = InitOptions::new(self.model_name.clone());
                    let model = TextEmbedding::try_new(options)
                        .map_err(|e| EmbeddingError::ModelInit(e.to_string()))?;
                    Ok(Arc::new(model))
                })
                .cloned()
        }
    }

    #[async_trait]
    impl Embedder for FastEmbedder {
        fn model_name(&self) -> &str {
            &self.name
        }

        fn dimension(&self) -> usize {
            self.dimension
        }

        #[instrument(skip(self, text), fields(text_len = text.len()))]
        async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
            let mut batch = self.embed_batch(&[text.to_string()]).await?;
            batch
                .pop()
                .ok_or_else(|| EmbeddingError::Generation("Empty embedding result".into()))
        }

        #[instrument(skip(self, texts), fields(batch_size = texts.len()))]
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            if texts.is_empty() {
                return Ok(Vec::new());
            }
            let model = self.get_or_init_model()?;
            let texts = texts.to_vec();

            // fastembed is synchronous
            let embeddings = task::spawn_blocking(move || {
                model
                    .embed(texts, None)
                    .map_err(|e| EmbeddingError::Generation(e.to_string()))
            })
            .await??;

            debug!(batch_size = embeddings.len(), "Generated batch embeddings");
            Ok(embeddings)
        }
    }
}

/// Builds the embedder named by `model`.
pub fn build_embedder(model: &str, dimension: usize) -> Result<Arc<dyn Embedder>, EmbeddingError> {
    if model.eq_ignore_ascii_case("hashed") {
        return Ok(Arc::new(HashedEmbedder::new(dimension)));
    }
    neural_embedder(model, dimension)
}

#[cfg(feature = "fastembed")]
fn neural_embedder(model: &str, dimension: usize) -> Result<Arc<dyn Embedder>, EmbeddingError> {
    Ok(Arc::new(FastEmbedder::from_config(model, dimension)?))
}

#[cfg(not(feature = "fastembed"))]
fn neural_embedder(model: &str, _dimension: usize) -> Result<Arc<dyn Embedder>, EmbeddingError> {
    Err(EmbeddingError::ModelInit(format!(
        "embedding model '{model}' needs the `fastembed` feature; use \"hashed\" or rebuild with --features fastembed"
    )))
}
