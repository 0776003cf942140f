//! Flat cosine-similarity index over embedded chunks.
//!
//! An index directory holds two files: `index.json` with the entries and
//! `manifest.json` describing them. The manifest pins the embedding model and
//! a sha256 of `index.json`; [`VectorIndex::load`] checks both.

use crate::embeddings::Embedder;
use crate::error::IndexError;
use crate::models::ScoredChunk;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

pub const INDEX_FILE: &str = "index.json";
pub const MANIFEST_FILE: &str = "manifest.json";
const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexEntry {
    chunk_id: String,
    chunk_index: u64,
    text: String,
    vector: Vec<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Manifest {
    format_version: u32,
    embedding_model: String,
    dimensions: usize,
    entry_count: usize,
    checksum: String,
    created_at: DateTime<Utc>,
}

pub struct VectorIndex {
    embedder: Arc<dyn Embedder>,
    dimensions: usize,
    entries: Vec<IndexEntry>,
}

impl fmt::Debug for VectorIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VectorIndex")
            .field("embedding_model", &self.embedder.model_name())
            .field("dimensions", &self.dimensions)
            .field("entries", &self.entries.len())
            .finish()
    }
}

impl VectorIndex {
    /// Embeds every chunk. Nothing is returned unless all of them embed.
    pub async fn build(chunks: &[String], embedder: Arc<dyn Embedder>) -> Result<Self, IndexError> {
        if chunks.is_empty() {
            return Err(IndexError::NoChunks);
        }

        let vectors = embedder.embed_documents(chunks).await?;
        if vectors.len() != chunks.len() {
            return Err(crate::EmbeddingError::CountMismatch {
                expected: chunks.len(),
                returned: vectors.len(),
            }
            .into());
        }

        let dimensions = vectors[0].len();
        let mut entries = Vec::with_capacity(chunks.len());
        for (position, (text, vector)) in chunks.iter().zip(vectors).enumerate() {
            if vector.len() != dimensions {
                return Err(IndexError::DimensionMismatch {
                    expected: dimensions,
                    found: vector.len(),
                });
            }
            let chunk_index = position as u64;
            entries.push(IndexEntry {
                chunk_id: make_chunk_id(chunk_index, text),
                chunk_index,
                text: text.clone(),
                vector,
            });
        }

        info!(
            model = embedder.model_name(),
            chunks = entries.len(),
            dimensions,
            "built vector index"
        );

        Ok(Self {
            embedder,
            dimensions,
            entries,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn embedding_model(&self) -> &str {
        self.embedder.model_name()
    }

    /// Top-`k` chunks for `query`, most similar first.
    pub async fn similarity_search_with_score(
        &self,
        query: &str,
        k: usize,
    ) -> Result<Vec<ScoredChunk>, IndexError> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let query_vector = self.embedder.embed_query(query).await?;
        self.search_vector(&query_vector, k)
    }

    pub fn search_vector(&self, query_vector: &[f32], k: usize) -> Result<Vec<ScoredChunk>, IndexError> {
        if query_vector.len() != self.dimensions {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimensions,
                found: query_vector.len(),
            });
        }

        let mut scored: Vec<(usize, f32)> = self
            .entries
            .iter()
            .enumerate()
            .map(|(position, entry)| (position, cosine_similarity(query_vector, &entry.vector)))
            .collect();
        scored.sort_by(|left, right| right.1.total_cmp(&left.1));

        Ok(scored
            .into_iter()
            .take(k)
            .map(|(position, score)| {
                let entry = &self.entries[position];
                ScoredChunk {
                    chunk_id: entry.chunk_id.clone(),
                    text: entry.text.clone(),
                    score,
                }
            })
            .collect())
    }

    pub fn save(&self, dir: &Path) -> Result<(), IndexError> {
        fs::create_dir_all(dir)?;

        let body = serde_json::to_vec(&self.entries)?;
        let manifest = Manifest {
            format_version: FORMAT_VERSION,
            embedding_model: self.embedder.model_name().to_string(),
            dimensions: self.dimensions,
            entry_count: self.entries.len(),
            checksum: sha256_hex(&body),
            created_at: Utc::now(),
        };

        fs::write(dir.join(INDEX_FILE), &body)?;
        fs::write(dir.join(MANIFEST_FILE), serde_json::to_vec_pretty(&manifest)?)?;
        info!(path = %dir.display(), entries = self.entries.len(), "saved vector index");
        Ok(())
    }

    /// Loads an index saved by [`VectorIndex::save`]. The artifact is only
    /// read when `trust_unsafe_deserialization` is set.
    pub fn load(
        dir: &Path,
        embedder: Arc<dyn Embedder>,
        trust_unsafe_deserialization: bool,
    ) -> Result<Self, IndexError> {
        if !trust_unsafe_deserialization {
            return Err(IndexError::Untrusted(dir.to_path_buf()));
        }

        let manifest: Manifest = serde_json::from_slice(&fs::read(dir.join(MANIFEST_FILE))?)?;
        if manifest.format_version != FORMAT_VERSION {
            return Err(IndexError::UnsupportedFormat(manifest.format_version));
        }
        if manifest.embedding_model != embedder.model_name() {
            return Err(IndexError::ModelMismatch {
                stored: manifest.embedding_model,
                requested: embedder.model_name().to_string(),
            });
        }

        let index_path = dir.join(INDEX_FILE);
        let body = fs::read(&index_path)?;
        if sha256_hex(&body) != manifest.checksum {
            return Err(IndexError::ChecksumMismatch(index_path));
        }

        let entries: Vec<IndexEntry> = serde_json::from_slice(&body)?;
        if let Some(entry) = entries
            .iter()
            .find(|entry| entry.vector.len() != manifest.dimensions)
        {
            return Err(IndexError::DimensionMismatch {
                expected: manifest.dimensions,
                found: entry.vector.len(),
            });
        }

        info!(path = %dir.display(), entries = entries.len(), "loaded vector index");
        Ok(Self {
            embedder,
            dimensions: manifest.dimensions,
            entries,
        })
    }
}

fn make_chunk_id(index: u64, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(index.to_le_bytes());
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

pub fn cosine_similarity(left: &[f32], right: &[f32]) -> f32 {
    let dot = left.iter().zip(right).map(|(a, b)| a * b).sum::<f32>();
    let left_norm = left.iter().map(|value| value * value).sum::<f32>().sqrt();
    let right_norm = right.iter().map(|value| value * value).sum::<f32>().sqrt();
    if left_norm == 0.0 || right_norm == 0.0 {
        0.0
    } else {
        dot / (left_norm * right_norm)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::CharacterNgramEmbedder;
    use crate::EmbeddingError;
    use async_trait::async_trait;
    use tempfile::tempdir;

    struct OfflineEmbedder;

    #[async_trait]
    impl Embedder for OfflineEmbedder {
        fn model_name(&self) -> &str {
            "offline"
        }

        async fn embed_documents(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            Err(EmbeddingError::BackendResponse {
                backend: "test".to_string(),
                details: "model unavailable".to_string(),
            })
        }
    }

    fn corpus() -> Vec<String> {
        [
            "Sunscreen products must display the sun protection factor.",
            "Hair dyes require a patch test warning on the label.",
            "Lipsticks may not contain lead above trace levels.",
            "Children's toothpaste must state the fluoride concentration.",
        ]
        .iter()
        .map(|text| text.to_string())
        .collect()
    }

    fn ngram() -> Arc<dyn Embedder> {
        Arc::new(CharacterNgramEmbedder::default())
    }

    #[tokio::test]
    async fn search_ranks_most_similar_first() -> Result<(), IndexError> {
        let index = VectorIndex::build(&corpus(), ngram()).await?;

        let hits = index
            .similarity_search_with_score("sun protection factor for sunscreen", 3)
            .await?;

        assert_eq!(hits.len(), 3);
        assert!(hits[0].text.starts_with("Sunscreen"));
        assert!(hits.windows(2).all(|pair| pair[0].score >= pair[1].score));
        Ok(())
    }

    #[tokio::test]
    async fn k_larger_than_index_returns_everything() -> Result<(), IndexError> {
        let index = VectorIndex::build(&corpus(), ngram()).await?;
        let hits = index.similarity_search_with_score("label", 10).await?;
        assert_eq!(hits.len(), 4);
        assert!(index.similarity_search_with_score("label", 0).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn build_fails_without_chunks() {
        let result = VectorIndex::build(&[], ngram()).await;
        assert!(matches!(result, Err(IndexError::NoChunks)));
    }

    #[tokio::test]
    async fn embedding_failure_yields_no_index() {
        let result = VectorIndex::build(&corpus(), Arc::new(OfflineEmbedder)).await;
        assert!(matches!(result, Err(IndexError::Embedding(_))));
    }

    #[tokio::test]
    async fn save_and_load_round_trip_gives_identical_results() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("store.idx");
        let index = VectorIndex::build(&corpus(), ngram()).await?;
        index.save(&path)?;

        let reloaded = VectorIndex::load(&path, ngram(), true)?;

        let query = "lead in lipstick";
        let before = index.similarity_search_with_score(query, 3).await?;
        let after = reloaded.similarity_search_with_score(query, 3).await?;
        assert_eq!(before, after);
        assert_eq!(reloaded.len(), 4);
        assert_eq!(reloaded.dimensions(), index.dimensions());
        assert_eq!(reloaded.embedding_model(), index.embedding_model());
        Ok(())
    }

    #[tokio::test]
    async fn load_requires_trust_flag() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        VectorIndex::build(&corpus(), ngram()).await?.save(dir.path())?;

        let result = VectorIndex::load(dir.path(), ngram(), false);

        assert!(matches!(result, Err(IndexError::Untrusted(_))));
        Ok(())
    }

    #[tokio::test]
    async fn tampered_artifact_is_rejected() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        VectorIndex::build(&corpus(), ngram()).await?.save(dir.path())?;
        let index_path = dir.path().join(INDEX_FILE);
        let tampered = fs::read_to_string(&index_path)?.replace("Lipsticks", "Lipgloss!");
        fs::write(&index_path, tampered)?;

        let result = VectorIndex::load(dir.path(), ngram(), true);

        assert!(matches!(result, Err(IndexError::ChecksumMismatch(_))));
        Ok(())
    }

    #[tokio::test]
    async fn load_rejects_a_different_embedding_model() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        VectorIndex::build(&corpus(), ngram()).await?.save(dir.path())?;

        let result = VectorIndex::load(dir.path(), Arc::new(CharacterNgramEmbedder::new(64)), true);

        assert!(matches!(result, Err(IndexError::ModelMismatch { .. })));
        Ok(())
    }

    #[test]
    fn cosine_of_orthogonal_vectors_is_zero() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
        assert!((cosine_similarity(&[2.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }
}
