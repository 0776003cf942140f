use crate::index::VectorIndex;
use crate::llm::ChatModel;
use crate::models::{ConversationScope, LabeledQuestion, ResultRow, RETRIEVED_COLUMNS};
use crate::paraphrase::Paraphraser;
use crate::qa::ConversationalQa;
use crate::workbook::{write_table, Cell};
use crate::{EvaluationError, WorkbookError};
use chrono::{Local, NaiveDate};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub const DEFAULT_RESULTS_PATH: &str = "data/results.xlsx";

/// Names recorded alongside every result row.
#[derive(Debug, Clone)]
pub struct RunMetadata {
    pub branch_name: String,
    pub embedding_model: String,
    pub chat_model: String,
}

#[derive(Debug, Clone)]
pub struct BatchReport {
    pub rows: Vec<ResultRow>,
    pub skipped_questions: Vec<String>,
    pub elapsed: Duration,
    pub date: NaiveDate,
}

pub struct BatchEvaluator {
    index: Arc<VectorIndex>,
    chat: Arc<dyn ChatModel>,
    paraphraser: Paraphraser,
    metadata: RunMetadata,
    top_k: usize,
    scope: ConversationScope,
}

impl BatchEvaluator {
    pub fn new(
        index: Arc<VectorIndex>,
        chat: Arc<dyn ChatModel>,
        paraphraser: Paraphraser,
        metadata: RunMetadata,
        top_k: usize,
    ) -> Self {
        Self {
            index,
            chat,
            paraphraser,
            metadata,
            top_k,
            scope: ConversationScope::default(),
        }
    }

    pub fn with_scope(mut self, scope: ConversationScope) -> Self {
        self.scope = scope;
        self
    }

    fn adapter(&self) -> ConversationalQa {
        ConversationalQa::new(Arc::clone(&self.index), Arc::clone(&self.chat), self.top_k)
    }

    /// Answers every question in one pass. A QA failure aborts the run and
    /// discards the rows collected so far.
    pub async fn run(&self, questions: &[LabeledQuestion]) -> Result<BatchReport, EvaluationError> {
        self.run_since(questions, Instant::now()).await
    }

    /// Like [`BatchEvaluator::run`], measuring elapsed time from `started`.
    pub async fn run_since(
        &self,
        questions: &[LabeledQuestion],
        started: Instant,
    ) -> Result<BatchReport, EvaluationError> {
        let mut rows = Vec::new();
        let mut skipped_questions = Vec::new();
        let mut shared = match self.scope {
            ConversationScope::PerRun => Some(self.adapter()),
            ConversationScope::PerQuestion => None,
        };

        for (position, labeled) in questions.iter().enumerate() {
            info!(position, id = %labeled.id, "processing question");

            let Some(question) = labeled.question.as_deref() else {
                warn!(position, id = %labeled.id, "invalid user question, skipping");
                skipped_questions.push(labeled.id.clone());
                continue;
            };

            let mut fresh;
            let qa = match shared.as_mut() {
                Some(qa) => qa,
                None => {
                    fresh = self.adapter();
                    &mut fresh
                }
            };

            let top_matches = self
                .index
                .similarity_search_with_score(question, self.top_k)
                .await?;
            for (rank, hit) in top_matches.iter().enumerate() {
                debug!(rank = rank + 1, score = hit.score, text = %hit.text, "retrieved passage");
            }

            let response = qa.ask(question).await?;
            debug!(answer = %response.answer, "original response");

            let paraphrased = self.paraphraser.paraphrase(&response.answer).await;

            rows.push(ResultRow {
                branch_name: self.metadata.branch_name.clone(),
                embedding_model: self.metadata.embedding_model.clone(),
                chat_model: self.metadata.chat_model.clone(),
                question_id: labeled.id.clone(),
                question: question.to_string(),
                generated_answer: paraphrased,
                retrieved: ResultRow::retrieved_columns(
                    top_matches.into_iter().map(|hit| hit.text),
                ),
            });
        }

        let elapsed = started.elapsed();
        info!(
            rows = rows.len(),
            skipped = skipped_questions.len(),
            seconds = elapsed.as_secs_f64(),
            "batch evaluation finished"
        );

        Ok(BatchReport {
            rows,
            skipped_questions,
            elapsed,
            date: Local::now().date_naive(),
        })
    }
}

pub fn result_headers() -> Vec<String> {
    let mut headers: Vec<String> = [
        "Branch name",
        "model_used_embeddings",
        "Model name",
        "QID",
        "Question",
        "Generated Answer",
    ]
    .iter()
    .map(|header| header.to_string())
    .collect();
    headers.extend((1..=RETRIEVED_COLUMNS).map(|rank| format!("Top {rank} retrieved")));
    headers.push("Elapsed seconds for experiment".to_string());
    headers.push("date".to_string());
    headers
}

/// Writes the report to `path`, one row per answered question.
pub fn write_results(path: &Path, report: &BatchReport) -> Result<(), WorkbookError> {
    let elapsed = report.elapsed.as_secs_f64();
    let date = report.date.format("%d.%m.%Y").to_string();

    let rows: Vec<Vec<Cell>> = report
        .rows
        .iter()
        .map(|row| {
            let mut cells: Vec<Cell> = vec![
                row.branch_name.clone().into(),
                row.embedding_model.clone().into(),
                row.chat_model.clone().into(),
                row.question_id.clone().into(),
                row.question.clone().into(),
                row.generated_answer.clone().into(),
            ];
            cells.extend(row.retrieved.iter().cloned().map(Cell::from));
            cells.push(Cell::Number(elapsed));
            cells.push(Cell::Text(date.clone()));
            cells
        })
        .collect();

    write_table(path, &result_headers(), &rows)?;
    info!(path = %path.display(), rows = rows.len(), "results saved");
    Ok(())
}
