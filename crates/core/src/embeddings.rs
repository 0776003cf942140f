use crate::error::EmbeddingError;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use url::Url;

const DEFAULT: usize = 128;

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = DEFAULT;

/// Inputs sent per embedding request.
pub const EMBEDDING_BATCH_SIZE: usize = 32;

pub const DEFAULT_HUGGINGFACE_URL: &str = "https://router.huggingface.co/hf-inference/models";

#[async_trait]
pub trait Embedder: Send + Sync {
    fn model_name(&self) -> &str;

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let vectors = self.embed_documents(&[text.to_string()]).await?;
        let returned = vectors.len();
        match <[Vec<f32>; 1]>::try_from(vectors) {
            Ok([vector]) => Ok(vector),
            Err(_) => Err(EmbeddingError::CountMismatch {
                expected: 1,
                returned,
            }),
        }
    }
}

/// Deterministic hashed character-trigram embedder. Needs no model server.
#[derive(Debug, Clone)]
pub struct CharacterNgramEmbedder {
    pub dimensions: usize,
    name: String,
}

impl CharacterNgramEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            name: format!("char-trigram-{dimensions}"),
        }
    }

    pub fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        let lowered = text.to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();

        if chars.is_empty() {
            return vector;
        }

        for window in chars.windows(3) {
            let token = window.iter().collect::<String>();
            let mut hash = 1469598103934665603u64;
            for byte in token.bytes() {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(1099511628211);
            }
            let bucket = (hash % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }

        vector
    }
}

impl Default for CharacterNgramEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_EMBEDDING_DIMENSIONS)
    }
}

#[async_trait]
impl Embedder for CharacterNgramEmbedder {
    fn model_name(&self) -> &str {
        &self.name
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts.iter().map(|text| self.embed(text)).collect())
    }
}

/// Hugging Face inference `feature-extraction` pipeline.
pub struct HuggingFaceEmbedder {
    client: Client,
    endpoint: Url,
    model: String,
    token: Option<String>,
}

impl HuggingFaceEmbedder {
    pub fn new(
        base_url: &str,
        model: impl Into<String>,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, EmbeddingError> {
        let model = model.into();
        let endpoint = Url::parse(&format!(
            "{}/{}/pipeline/feature-extraction",
            base_url.trim_end_matches('/'),
            model
        ))?;

        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            endpoint,
            model,
            token,
        })
    }
}

#[async_trait]
impl Embedder for HuggingFaceEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut vectors = Vec::with_capacity(texts.len());

        for batch in texts.chunks(EMBEDDING_BATCH_SIZE) {
            let mut request = self
                .client
                .post(self.endpoint.clone())
                .json(&json!({ "inputs": batch }));
            if let Some(token) = &self.token {
                request = request.bearer_auth(token);
            }

            let response = request.send().await?;
            if !response.status().is_success() {
                let status = response.status();
                let details = response.text().await.unwrap_or_default();
                return Err(EmbeddingError::BackendResponse {
                    backend: "huggingface".to_string(),
                    details: format!("{status}: {details}"),
                });
            }

            let batch_vectors: Vec<Vec<f32>> = response.json().await?;
            check_count(batch.len(), batch_vectors.len())?;
            debug!(model = %self.model, batch = batch.len(), "embedded batch");
            vectors.extend(batch_vectors);
        }

        Ok(vectors)
    }
}

#[derive(Debug, Deserialize)]
struct OllamaEmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

/// Ollama `/api/embed`.
pub struct OllamaEmbedder {
    client: Client,
    endpoint: Url,
    model: String,
}

impl OllamaEmbedder {
    pub fn new(
        base_url: &str,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, EmbeddingError> {
        let endpoint = Url::parse(base_url)?.join("api/embed")?;
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            endpoint,
            model: model.into(),
        })
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut vectors = Vec::with_capacity(texts.len());

        for batch in texts.chunks(EMBEDDING_BATCH_SIZE) {
            let response = self
                .client
                .post(self.endpoint.clone())
                .json(&json!({ "model": self.model, "input": batch }))
                .send()
                .await?;

            if !response.status().is_success() {
                let status = response.status();
                let details = response.text().await.unwrap_or_default();
                return Err(EmbeddingError::BackendResponse {
                    backend: "ollama".to_string(),
                    details: format!("{status}: {details}"),
                });
            }

            let parsed: OllamaEmbedResponse = response.json().await?;
            check_count(batch.len(), parsed.embeddings.len())?;
            vectors.extend(parsed.embeddings);
        }

        Ok(vectors)
    }
}

fn check_count(expected: usize, returned: usize) -> Result<(), EmbeddingError> {
    if expected == returned {
        Ok(())
    } else {
        Err(EmbeddingError::CountMismatch { expected, returned })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EmbeddingProvider {
    HuggingFace,
    Ollama,
    Ngram,
}

impl fmt::Display for EmbeddingProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::HuggingFace => "huggingface",
            Self::Ollama => "ollama",
            Self::Ngram => "ngram",
        };
        f.write_str(name)
    }
}

impl FromStr for EmbeddingProvider {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "huggingface" | "hf" => Ok(Self::HuggingFace),
            "ollama" => Ok(Self::Ollama),
            "ngram" => Ok(Self::Ngram),
            other => Err(format!("unknown embedding provider: {other}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EmbeddingSettings {
    pub provider: EmbeddingProvider,
    pub model: String,
    /// Base URL of the provider. `None` picks the provider default.
    pub endpoint: Option<String>,
    pub hub_token: Option<String>,
    pub timeout: Duration,
}

impl EmbeddingSettings {
    /// `ollama_url` is used when the provider is Ollama and no endpoint is set.
    pub fn build(&self, ollama_url: &str) -> Result<Arc<dyn Embedder>, EmbeddingError> {
        let embedder: Arc<dyn Embedder> = match self.provider {
            EmbeddingProvider::HuggingFace => Arc::new(HuggingFaceEmbedder::new(
                self.endpoint.as_deref().unwrap_or(DEFAULT_HUGGINGFACE_URL),
                self.model.clone(),
                self.hub_token.clone(),
                self.timeout,
            )?),
            EmbeddingProvider::Ollama => Arc::new(OllamaEmbedder::new(
                self.endpoint.as_deref().unwrap_or(ollama_url),
                self.model.clone(),
                self.timeout,
            )?),
            EmbeddingProvider::Ngram => Arc::new(CharacterNgramEmbedder::default()),
        };
        Ok(embedder)
    }
}
