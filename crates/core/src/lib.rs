pub mod chunking;
pub mod embeddings;
pub mod error;
pub mod evaluation;
pub mod extractor;
pub mod grading;
pub mod index;
pub mod ingest;
pub mod llm;
pub mod models;
pub mod paraphrase;
pub mod pipeline;
pub mod plot;
pub mod qa;
pub mod session;
pub mod workbook;

#[cfg(test)]
mod testing;

pub use chunking::{normalize_whitespace, split_text, ChunkingConfig};
pub use embeddings::{
    CharacterNgramEmbedder, Embedder, EmbeddingProvider, EmbeddingSettings, HuggingFaceEmbedder,
    OllamaEmbedder, DEFAULT_EMBEDDING_DIMENSIONS,
};
pub use error::{
    BuildError, ChatError, EmbeddingError, EvaluationError, IndexError, IngestError, PlotError,
    QaError, SessionError, WorkbookError,
};
pub use evaluation::{write_results, BatchEvaluator, BatchReport, RunMetadata, DEFAULT_RESULTS_PATH};
pub use extractor::{extract_page_texts, LopdfExtractor, PageText, PdfExtractor};
pub use grading::{
    accuracy_by_model, append_results_markdown, load_ground_truth, majority_vote,
    normalize_verdict, read_result_rows, write_graded, GradedRow, Grader, Verdict,
};
pub use index::VectorIndex;
pub use ingest::{
    discover_pdf_files, extract_documents, resolve_inputs, IngestionReport, SkippedPdf,
};
pub use llm::{ChatModel, OllamaChat, OllamaSettings, DEFAULT_OLLAMA_URL};
pub use models::{
    AccuracyRecord, ConversationScope, Document, LabeledQuestion, QaResponse, ResultRow,
    ScoredChunk, Turn,
};
pub use paraphrase::{paraphrase, Paraphraser, PARAPHRASE_FAILURE};
pub use pipeline::{ChunkedCorpus, IndexBuild, IndexPipeline};
pub use plot::{parse_results_table, plot_results, render_grouped_bars};
pub use qa::{ConversationMemory, ConversationalQa};
pub use session::{BuildSummary, Exchange, InteractiveSession};
pub use workbook::read_questions;
