use crate::extractor::{LopdfExtractor, PdfExtractor};
use crate::index::VectorIndex;
use crate::ingest::SkippedPdf;
use crate::llm::ChatModel;
use crate::models::ScoredChunk;
use crate::pipeline::IndexPipeline;
use crate::qa::ConversationalQa;
use crate::SessionError;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, Default)]
pub struct BuildSummary {
    pub raw_text_chars: usize,
    pub chunk_count: usize,
    pub skipped_files: Vec<SkippedPdf>,
}

#[derive(Debug, Clone)]
pub struct Exchange {
    pub question: String,
    pub scored: Vec<ScoredChunk>,
    pub answer: String,
}

struct Prepared {
    summary: BuildSummary,
    index: Arc<VectorIndex>,
    qa: ConversationalQa,
}

/// A question-at-a-time session over a fixed set of PDFs. The index and QA
/// adapter are built on first use and kept until [`rebuild`](Self::rebuild).
pub struct InteractiveSession<X = LopdfExtractor> {
    pipeline: IndexPipeline<X>,
    inputs: Vec<PathBuf>,
    chat: Arc<dyn ChatModel>,
    top_k: usize,
    prepared: Option<Prepared>,
}

impl<X> InteractiveSession<X>
where
    X: PdfExtractor + Clone + 'static,
{
    pub fn new(pipeline: IndexPipeline<X>, inputs: Vec<PathBuf>, chat: Arc<dyn ChatModel>, top_k: usize) -> Self {
        Self {
            pipeline,
            inputs,
            chat,
            top_k,
            prepared: None,
        }
    }

    pub fn is_built(&self) -> bool {
        self.prepared.is_some()
    }

    pub async fn ensure_built(&mut self) -> Result<&BuildSummary, SessionError> {
        Ok(&self.prepared().await?.summary)
    }

    /// Drops the cached index and conversation, then builds them again.
    pub async fn rebuild(&mut self) -> Result<&BuildSummary, SessionError> {
        self.prepared = None;
        self.ensure_built().await
    }

    pub async fn ask(&mut self, question: &str) -> Result<Exchange, SessionError> {
        let top_k = self.top_k;
        let prepared = self.prepared().await?;

        let scored = prepared
            .index
            .similarity_search_with_score(question, top_k)
            .await?;
        let response = prepared.qa.ask(question).await?;

        Ok(Exchange {
            question: question.to_string(),
            scored,
            answer: response.answer,
        })
    }

    async fn prepared(&mut self) -> Result<&mut Prepared, SessionError> {
        let prepared = match self.prepared.take() {
            Some(prepared) => prepared,
            None => self.prepare().await?,
        };
        Ok(self.prepared.insert(prepared))
    }

    async fn prepare(&self) -> Result<Prepared, SessionError> {
        let build = self.pipeline.build(&self.inputs).await?;
        info!(
            raw_text_chars = build.raw_text_chars,
            chunks = build.chunk_count,
            chat_model = self.chat.model_name(),
            "session ready"
        );

        let index = Arc::new(build.index);
        let qa = ConversationalQa::new(Arc::clone(&index), Arc::clone(&self.chat), self.top_k);
        Ok(Prepared {
            summary: BuildSummary {
                raw_text_chars: build.raw_text_chars,
                chunk_count: build.chunk_count,
                skipped_files: build.skipped_files,
            },
            index,
            qa,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::CharacterNgramEmbedder;
    use crate::extractor::fixtures::write_text_pdf;
    use crate::testing::{FakeChat, FakeExtractor};
    use crate::{BuildError, IndexError};
    use std::fs;
    use tempfile::tempdir;

    fn session(inputs: Vec<PathBuf>, chat: Arc<FakeChat>) -> InteractiveSession {
        let pipeline = IndexPipeline::new(Arc::new(CharacterNgramEmbedder::default()));
        InteractiveSession::new(pipeline, inputs, chat, 2)
    }

    #[tokio::test]
    async fn builds_once_and_answers_with_scored_passages() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("guidance.pdf");
        write_text_pdf(&path, &["Sunscreen must display the protection factor."])?;
        let chat = Arc::new(FakeChat::echoing("deepseek-r1:1.5b", "The SPF."));
        let mut session = session(vec![path], chat.clone());

        assert!(!session.is_built());
        let exchange = session.ask("What must sunscreen display?").await?;

        assert!(session.is_built());
        assert_eq!(exchange.question, "What must sunscreen display?");
        assert_eq!(exchange.answer, "The SPF.");
        assert_eq!(exchange.scored.len(), 1);
        assert!(exchange.scored[0].text.contains("protection factor"));

        session.ask("And the language?").await?;
        // the second question is condensed against the first exchange
        assert_eq!(chat.prompts().len(), 3);
        Ok(())
    }

    #[tokio::test]
    async fn cached_index_survives_source_changes_until_rebuild() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("guidance.pdf");
        write_text_pdf(&path, &["Sunscreen must display the protection factor."])?;
        let mut session = session(vec![path.clone()], Arc::new(FakeChat::echoing("m", "ok")));

        let first = session.ensure_built().await?.raw_text_chars;
        write_text_pdf(
            &path,
            &["Hair dye labels carry a patch test warning in every language sold."],
        )?;
        assert_eq!(session.ensure_built().await?.raw_text_chars, first);

        let rebuilt = session.rebuild().await?.raw_text_chars;
        assert!(rebuilt > first);
        Ok(())
    }

    #[tokio::test]
    async fn build_failure_leaves_the_session_unbuilt() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("broken.pdf");
        fs::write(&path, b"not a pdf")?;
        let mut session = session(vec![path], Arc::new(FakeChat::echoing("m", "ok")));

        let result = session.ask("anything").await;

        assert!(matches!(
            result,
            Err(SessionError::Build(BuildError::Index(IndexError::NoChunks)))
        ));
        assert!(!session.is_built());
        Ok(())
    }

    #[tokio::test]
    async fn rebuild_picks_up_new_extracted_text() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("guidance.pdf");
        fs::write(&path, b"placeholder")?;
        let extractor = FakeExtractor::new("Sunscreen must display the protection factor.");
        let pipeline = IndexPipeline::new(Arc::new(CharacterNgramEmbedder::default()))
            .with_extractor(extractor.clone());
        let chat = Arc::new(FakeChat::echoing("m", "ok"));
        let mut session = InteractiveSession::new(pipeline, vec![path], chat, 1);

        session.ensure_built().await?;
        extractor.set_text("Hair dye labels carry a patch test warning.");
        let cached = session.ask("What warning do hair dyes carry?").await?;
        assert!(cached.scored[0].text.contains("protection factor"));

        session.rebuild().await?;
        let fresh = session.ask("What warning do hair dyes carry?").await?;
        assert!(fresh.scored[0].text.contains("patch test"));
        Ok(())
    }
}
