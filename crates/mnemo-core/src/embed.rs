//! Embedding backends: Ollama (via ollama-rs) or an offline feature-hashing embedder.

use ollama_rs::generation::embeddings::request::{EmbeddingsInput, GenerateEmbeddingsRequest};
use ollama_rs::Ollama;
use thiserror::Error;

use crate::config::{EmbeddingConfig, EmbeddingProvider};

pub const DEFAULT_EMBED_MODEL: &str = "nomic-embed-text";
pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";

/// Thin wrapper around Ollama for embeddings.
#[derive(Debug, Clone)]
pub struct OllamaClient {
    inner: Ollama,
    embed_model: String,
}

impl OllamaClient {
    /// Create from URL string, e.g. `http://localhost:11434`.
    pub fn from_url(url: &str) -> Result<Self, EmbedError> {
        let inner = Ollama::try_new(url).map_err(EmbedError::ParseUrl)?;
        Ok(Self {
            inner,
            embed_model: DEFAULT_EMBED_MODEL.to_string(),
        })
    }

    /// Set the embedding model (e.g. `nomic-embed-text`, `all-minilm`).
    pub fn with_embed_model(mut self, model: impl Into<String>) -> Self {
        self.embed_model = model.into();
        self
    }

    pub fn embed_model(&self) -> &str {
        &self.embed_model
    }

    /// Embed multiple strings in one call. Returns one embedding per input.
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let req = GenerateEmbeddingsRequest::new(
            self.embed_model.clone(),
            EmbeddingsInput::Multiple(texts.to_vec()),
        );
        let res = self
            .inner
            .generate_embeddings(req)
            .await
            .map_err(EmbedError::Request)?;
        Ok(res.embeddings)
    }
}

/// Deterministic bag-of-words embedder: each lower-cased token is hashed into
/// one of `dimensions` buckets with a ±1 sign, then the vector is L2-normalized.
/// Needs no model or network; texts sharing words land close together.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashedEmbedder {
    dimensions: usize,
}

impl HashedEmbedder {
    pub fn new(dimensions: usize) -> Result<Self, EmbedError> {
        if dimensions == 0 {
            return Err(EmbedError::ZeroDimensions);
        }
        Ok(Self { dimensions })
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn embed(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dimensions];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let h = fnv1a(token.to_lowercase().as_bytes());
            let bucket = (h % self.dimensions as u64) as usize;
            let sign = if h >> 63 == 0 { 1.0 } else { -1.0 };
            v[bucket] += sign;
        }
        crate::store::normalize(&v)
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0xcbf2_9ce4_8422_2325u64, |h, b| {
        (h ^ u64::from(*b)).wrapping_mul(0x0000_0100_0000_01b3)
    })
}

/// The embedder used for both building memory and querying it.
#[derive(Debug, Clone)]
pub enum Embedder {
    Ollama(OllamaClient),
    Hashed(HashedEmbedder),
}

impl Embedder {
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self, EmbedError> {
        match config.provider {
            EmbeddingProvider::Ollama => Ok(Embedder::Ollama(
                OllamaClient::from_url(&config.url)?.with_embed_model(&config.model),
            )),
            EmbeddingProvider::Hashed => Ok(Embedder::Hashed(HashedEmbedder::new(config.dimensions)?)),
        }
    }

    /// Identifies the vector space. Stored with the index so queries use a matching embedder.
    pub fn fingerprint(&self) -> String {
        match self {
            Embedder::Ollama(c) => format!("ollama:{}", c.embed_model()),
            Embedder::Hashed(h) => format!("hashed:{}", h.dimensions()),
        }
    }

    /// Embed a single string.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let mut v = self.embed_batch(&[text.to_string()]).await?;
        v.pop().ok_or(EmbedError::CountMismatch { expected: 1, got: 0 })
    }

    /// Embed multiple strings. Returns exactly one vector per input, in order.
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let out = match self {
            Embedder::Ollama(c) => c.embed_batch(texts).await?,
            Embedder::Hashed(h) => texts.iter().map(|t| h.embed(t)).collect(),
        };
        if out.len() != texts.len() {
            return Err(EmbedError::CountMismatch {
                expected: texts.len(),
                got: out.len(),
            });
        }
        Ok(out)
    }
}

#[derive(Debug, Error)]
pub enum EmbedError {
    #[error("invalid Ollama URL: {0}")]
    ParseUrl(#[from] url::ParseError),
    #[error("Ollama request failed: {0}")]
    Request(#[from] ollama_rs::error::OllamaError),
    #[error("embedder returned {got} vectors for {expected} inputs")]
    CountMismatch { expected: usize, got: usize },
    #[error("embedding dimensions must be greater than zero")]
    ZeroDimensions,
}
