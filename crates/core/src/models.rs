use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Number of retrieved-passage columns carried by every result row.
pub const RETRIEVED_COLUMNS: usize = 10;

#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub path: PathBuf,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredChunk {
    pub chunk_id: String,
    pub text: String,
    pub score: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub question: String,
    pub answer: String,
}

#[derive(Debug, Clone)]
pub struct QaResponse {
    pub answer: String,
    pub source_documents: Vec<ScoredChunk>,
}

/// One row of the labeled question workbook. `question` is `None` when the
/// cell holds anything other than text.
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledQuestion {
    pub id: String,
    pub question: Option<String>,
    pub ground_truth: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRow {
    pub branch_name: String,
    pub embedding_model: String,
    pub chat_model: String,
    pub question_id: String,
    pub question: String,
    pub generated_answer: String,
    pub retrieved: Vec<String>,
}

impl ResultRow {
    /// Pads or truncates `passages` to exactly [`RETRIEVED_COLUMNS`] entries.
    pub fn retrieved_columns(passages: impl IntoIterator<Item = String>) -> Vec<String> {
        let mut columns: Vec<String> = passages.into_iter().take(RETRIEVED_COLUMNS).collect();
        columns.resize(RETRIEVED_COLUMNS, String::new());
        columns
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccuracyRecord {
    pub embedding_model: String,
    pub chat_model: String,
    pub date: String,
    pub percent_correct: f64,
    pub evaluator_model: String,
    pub dataset: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConversationScope {
    /// A fresh QA adapter, and so an empty memory, for every question.
    #[default]
    PerQuestion,
    /// One QA adapter whose memory accumulates across the whole run.
    PerRun,
}
