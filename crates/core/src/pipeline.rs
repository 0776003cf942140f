use crate::chunking::{split_text, ChunkingConfig};
use crate::embeddings::Embedder;
use crate::error::BuildError;
use crate::extractor::{LopdfExtractor, PdfExtractor};
use crate::index::VectorIndex;
use crate::ingest::{extract_documents_with_timeout, resolve_inputs, SkippedPdf, DEFAULT_EXTRACTION_TIMEOUT};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Extracted and chunked text, ready to embed.
#[derive(Debug, Clone, Default)]
pub struct ChunkedCorpus {
    pub raw_text_chars: usize,
    pub chunks: Vec<String>,
    pub documents: usize,
    pub skipped_files: Vec<SkippedPdf>,
}

#[derive(Debug)]
pub struct IndexBuild {
    pub index: VectorIndex,
    pub raw_text_chars: usize,
    pub chunk_count: usize,
    pub documents: usize,
    pub skipped_files: Vec<SkippedPdf>,
}

/// PDFs to searchable index: resolve inputs, extract, chunk, embed.
#[derive(Clone)]
pub struct IndexPipeline<X = LopdfExtractor> {
    extractor: X,
    chunking: ChunkingConfig,
    embedder: Arc<dyn Embedder>,
    extraction_timeout: Duration,
}

impl IndexPipeline<LopdfExtractor> {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            extractor: LopdfExtractor,
            chunking: ChunkingConfig::default(),
            embedder,
            extraction_timeout: DEFAULT_EXTRACTION_TIMEOUT,
        }
    }
}

impl<X> IndexPipeline<X>
where
    X: PdfExtractor + Clone + 'static,
{
    pub fn with_extractor<Y>(self, extractor: Y) -> IndexPipeline<Y> {
        IndexPipeline {
            extractor,
            chunking: self.chunking,
            embedder: self.embedder,
            extraction_timeout: self.extraction_timeout,
        }
    }

    pub fn with_chunking(mut self, chunking: ChunkingConfig) -> Self {
        self.chunking = chunking;
        self
    }

    pub fn with_extraction_timeout(mut self, timeout: Duration) -> Self {
        self.extraction_timeout = timeout;
        self
    }

    pub fn embedder(&self) -> Arc<dyn Embedder> {
        Arc::clone(&self.embedder)
    }

    pub async fn chunk_inputs(&self, inputs: &[PathBuf]) -> Result<ChunkedCorpus, BuildError> {
        self.chunking.validate()?;
        let paths = resolve_inputs(inputs)?;
        let report =
            extract_documents_with_timeout(&paths, self.extractor.clone(), self.extraction_timeout).await;

        let raw_text = report.text();
        let chunks = split_text(&raw_text, &self.chunking)?;
        let corpus = ChunkedCorpus {
            raw_text_chars: raw_text.chars().count(),
            chunks,
            documents: report.documents.len(),
            skipped_files: report.skipped_files,
        };

        info!(
            files = paths.len(),
            skipped = corpus.skipped_files.len(),
            raw_text_chars = corpus.raw_text_chars,
            chunks = corpus.chunks.len(),
            "chunked input documents"
        );
        Ok(corpus)
    }

    pub async fn build(&self, inputs: &[PathBuf]) -> Result<IndexBuild, BuildError> {
        let corpus = self.chunk_inputs(inputs).await?;
        let index = VectorIndex::build(&corpus.chunks, self.embedder()).await?;

        Ok(IndexBuild {
            index,
            raw_text_chars: corpus.raw_text_chars,
            chunk_count: corpus.chunks.len(),
            documents: corpus.documents,
            skipped_files: corpus.skipped_files,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::CharacterNgramEmbedder;
    use crate::extractor::fixtures::write_text_pdf;
    use crate::testing::FakeExtractor;
    use crate::{IndexError, IngestError};
    use std::fs;
    use tempfile::tempdir;

    fn pipeline() -> IndexPipeline {
        IndexPipeline::new(Arc::new(CharacterNgramEmbedder::default())).with_chunking(ChunkingConfig {
            separator: ".".to_string(),
            chunk_size: 60,
            chunk_overlap: 10,
        })
    }

    #[tokio::test]
    async fn builds_an_index_from_a_folder_of_pdfs() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        write_text_pdf(
            &dir.path().join("a.pdf"),
            &["Sunscreen must display the protection factor. Labels are in Portuguese."],
        )?;
        write_text_pdf(
            &dir.path().join("b.pdf"),
            &["Hair dye labels carry a patch test warning. Children must not use it."],
        )?;
        fs::write(dir.path().join("broken.pdf"), b"not a pdf")?;

        let build = pipeline().build(&[dir.path().to_path_buf()]).await?;

        assert_eq!(build.documents, 2);
        assert_eq!(build.skipped_files.len(), 1);
        assert!(build.chunk_count > 1);
        assert_eq!(build.index.len(), build.chunk_count);
        assert!(build.raw_text_chars > 60);

        let hits = build
            .index
            .similarity_search_with_score("patch test warning for hair dye", 1)
            .await?;
        assert!(hits[0].text.contains("patch test"));
        Ok(())
    }

    #[tokio::test]
    async fn missing_inputs_fail_before_extraction() {
        let result = pipeline().build(&[PathBuf::from("/definitely/not/here.pdf")]).await;

        assert!(matches!(
            result,
            Err(BuildError::Ingest(IngestError::InvalidArgument(_)))
        ));
    }

    #[tokio::test]
    async fn unreadable_inputs_leave_nothing_to_index() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("broken.pdf");
        fs::write(&path, b"not a pdf")?;

        let result = pipeline().build(&[path]).await;

        assert!(matches!(result, Err(BuildError::Index(IndexError::NoChunks))));
        Ok(())
    }

    #[tokio::test]
    async fn invalid_chunking_is_rejected() {
        let pipeline = pipeline().with_chunking(ChunkingConfig {
            separator: ".".to_string(),
            chunk_size: 10,
            chunk_overlap: 10,
        });

        let result = pipeline.chunk_inputs(&[]).await;

        assert!(matches!(
            result,
            Err(BuildError::Ingest(IngestError::InvalidChunkConfig(_)))
        ));
    }

    #[tokio::test]
    async fn custom_extractor_feeds_the_chunker() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("scan.pdf");
        fs::write(&path, b"placeholder")?;
        let extractor = FakeExtractor::new("Labels list every ingredient. Fragrance may be declared as parfum.");

        let corpus = pipeline().with_extractor(extractor).chunk_inputs(&[path]).await?;

        assert_eq!(corpus.documents, 1);
        assert!(corpus.skipped_files.is_empty());
        assert_eq!(corpus.chunks[0], "Labels list every ingredient.");
        Ok(())
    }

    #[tokio::test]
    async fn extraction_timeout_skips_slow_files() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("huge.pdf");
        fs::write(&path, b"placeholder")?;
        let extractor = FakeExtractor::new("Too slow to matter.").with_delay(Duration::from_millis(300));

        let result = pipeline()
            .with_extractor(extractor)
            .with_extraction_timeout(Duration::from_millis(20))
            .build(&[path])
            .await;

        assert!(matches!(result, Err(BuildError::Index(IndexError::NoChunks))));
        Ok(())
    }
}
