//! Grades generated answers against the human ground truth with a judge
//! model, and keeps the aggregate accuracy table up to date.

use crate::evaluation::result_headers;
use crate::llm::ChatModel;
use crate::models::{AccuracyRecord, ResultRow, RETRIEVED_COLUMNS};
use crate::workbook::{cell_display, read_questions, read_sheet, write_table, Cell};
use crate::WorkbookError;
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::fs::{self, OpenOptions};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::Path;
use std::sync::{Arc, OnceLock};
use tracing::{debug, info, warn};

pub const DEFAULT_VOTES: usize = 9;
pub const DEFAULT_INSTRUCTION: &str =
    "Is the generated answer correct based on the ground truth? Reply with 'true' or 'false' only.";
pub const MISSING_GROUND_TRUTH: &str = "N/A";

const RESULTS_TABLE_HEADER: &str = "| embedding_model | chat_model | date | percent_correct | evaluator_model | dataset |\n\
     |---|---|---|---|---|---|";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    True,
    False,
    Unknown,
}

impl Verdict {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::True => "true",
            Self::False => "false",
            Self::Unknown => "unknown",
        }
    }
}

fn verdict_words() -> Option<&'static Regex> {
    static WORDS: OnceLock<Option<Regex>> = OnceLock::new();
    WORDS
        .get_or_init(|| Regex::new(r"\b(true|false)\b").ok())
        .as_ref()
}

/// Maps a free-form judge reply onto a verdict. Exact answers win, then the
/// first of `true`/`false` found as a whole word.
pub fn normalize_verdict(response: &str) -> Verdict {
    let lowered = response.trim().to_lowercase();
    match lowered.trim_end_matches('.') {
        "true" | "yes" => return Verdict::True,
        "false" | "no" => return Verdict::False,
        _ => {}
    }

    let Some(words) = verdict_words() else {
        return Verdict::Unknown;
    };
    match words.find(&lowered).map(|found| found.as_str()) {
        Some("true") => Verdict::True,
        Some("false") => Verdict::False,
        _ => Verdict::Unknown,
    }
}

pub fn grading_prompt(question: &str, ground_truth: &str, answer: &str, instruction: &str) -> String {
    format!(
        "Consider the question: {question}\nGround truth: {ground_truth}\nGenerated answer: {answer}\n\n{instruction}"
    )
}

/// Asks `judge` `votes` times and returns the most common trimmed reply.
/// Failed calls vote `"Error"`. Ties go to the reply seen first.
pub async fn majority_vote(judge: &dyn ChatModel, prompt: &str, votes: usize) -> String {
    let mut tally: Vec<(String, usize)> = Vec::new();

    for _ in 0..votes.max(1) {
        let reply = match judge.generate(prompt).await {
            Ok(reply) => reply.trim().to_string(),
            Err(error) => {
                warn!(model = judge.model_name(), %error, "judge call failed");
                "Error".to_string()
            }
        };
        match tally.iter_mut().find(|(seen, _)| *seen == reply) {
            Some((_, count)) => *count += 1,
            None => tally.push((reply, 1)),
        }
    }

    let mut best: Option<(String, usize)> = None;
    for (reply, count) in tally {
        if best.as_ref().map_or(true, |(_, top)| count > *top) {
            best = Some((reply, count));
        }
    }
    best.map(|(reply, _)| reply).unwrap_or_default()
}

#[derive(Debug, Clone)]
pub struct GradedRow {
    pub row: ResultRow,
    pub ground_truth: String,
    pub verdict: Verdict,
}

pub struct Grader {
    judge: Arc<dyn ChatModel>,
    votes: usize,
    instruction: String,
}

impl Grader {
    pub fn new(judge: Arc<dyn ChatModel>) -> Self {
        Self {
            judge,
            votes: DEFAULT_VOTES,
            instruction: DEFAULT_INSTRUCTION.to_string(),
        }
    }

    pub fn with_votes(mut self, votes: usize) -> Self {
        self.votes = votes;
        self
    }

    pub fn with_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.instruction = instruction.into();
        self
    }

    pub fn judge_model(&self) -> &str {
        self.judge.model_name()
    }

    pub async fn grade(&self, rows: Vec<ResultRow>, ground_truth: &HashMap<String, String>) -> Vec<GradedRow> {
        let mut graded = Vec::with_capacity(rows.len());

        for row in rows {
            let truth = ground_truth
                .get(&row.question)
                .cloned()
                .unwrap_or_else(|| MISSING_GROUND_TRUTH.to_string());
            let prompt = grading_prompt(&row.question, &truth, &row.generated_answer, &self.instruction);
            let reply = majority_vote(self.judge.as_ref(), &prompt, self.votes).await;
            let verdict = normalize_verdict(&reply);
            debug!(qid = %row.question_id, reply = %reply, verdict = verdict.as_str(), "graded answer");

            graded.push(GradedRow {
                row,
                ground_truth: truth,
                verdict,
            });
        }

        graded
    }
}

/// Question text -> ground truth, from the labeled question workbook.
pub fn load_ground_truth(path: &Path) -> Result<HashMap<String, String>, WorkbookError> {
    Ok(read_questions(path)?
        .into_iter()
        .filter_map(|labeled| match (labeled.question, labeled.ground_truth) {
            (Some(question), Some(truth)) => Some((question, truth)),
            _ => None,
        })
        .collect())
}

/// Reads a workbook written by [`crate::evaluation::write_results`].
pub fn read_result_rows(path: &Path) -> Result<Vec<ResultRow>, WorkbookError> {
    let sheet = read_sheet(path)?;
    let branch = sheet.column("Branch name")?;
    let embedding = sheet.column("model_used_embeddings")?;
    let chat = sheet.column("Model name")?;
    let qid = sheet.column("QID")?;
    let question = sheet.column("Question")?;
    let answer = sheet.column("Generated Answer")?;
    let retrieved = (1..=RETRIEVED_COLUMNS)
        .map(|rank| sheet.column(&format!("Top {rank} retrieved")))
        .collect::<Result<Vec<_>, _>>()?;

    let text = |row: &[calamine::Data], column: usize| {
        row.get(column).map(cell_display).unwrap_or_default()
    };

    Ok(sheet
        .rows
        .iter()
        .map(|row| ResultRow {
            branch_name: text(row, branch),
            embedding_model: text(row, embedding),
            chat_model: text(row, chat),
            question_id: text(row, qid),
            question: text(row, question),
            generated_answer: text(row, answer),
            retrieved: retrieved.iter().map(|column| text(row, *column)).collect(),
        })
        .collect())
}

pub fn write_graded(path: &Path, graded: &[GradedRow]) -> Result<(), WorkbookError> {
    let mut headers: Vec<String> = result_headers()
        .into_iter()
        .take(6 + RETRIEVED_COLUMNS)
        .collect();
    headers.insert(5, "Ground Truth".to_string());
    headers.push("Correct".to_string());

    let rows: Vec<Vec<Cell>> = graded
        .iter()
        .map(|graded| {
            let row = &graded.row;
            let mut cells: Vec<Cell> = vec![
                row.branch_name.clone().into(),
                row.embedding_model.clone().into(),
                row.chat_model.clone().into(),
                row.question_id.clone().into(),
                row.question.clone().into(),
                graded.ground_truth.clone().into(),
                row.generated_answer.clone().into(),
            ];
            cells.extend(row.retrieved.iter().cloned().map(Cell::from));
            cells.push(graded.verdict.as_str().into());
            cells
        })
        .collect();

    write_table(path, &headers, &rows)?;
    info!(path = %path.display(), rows = rows.len(), "graded results saved");
    Ok(())
}

/// Percent of `true` verdicts per embedding model, chat model and dataset.
pub fn accuracy_by_model(graded: &[GradedRow], evaluator_model: &str, date: &str) -> Vec<AccuracyRecord> {
    let mut counts: BTreeMap<(String, String, String), (usize, usize)> = BTreeMap::new();

    for graded in graded {
        let key = (
            graded.row.embedding_model.clone(),
            graded.row.chat_model.clone(),
            graded.row.branch_name.clone(),
        );
        let entry = counts.entry(key).or_insert((0, 0));
        entry.0 += 1;
        if graded.verdict == Verdict::True {
            entry.1 += 1;
        }
    }

    counts
        .into_iter()
        .map(|((embedding_model, chat_model, dataset), (total, correct))| AccuracyRecord {
            embedding_model,
            chat_model,
            date: date.to_string(),
            percent_correct: if total > 0 {
                correct as f64 / total as f64 * 100.0
            } else {
                0.0
            },
            evaluator_model: evaluator_model.to_string(),
            dataset,
        })
        .collect()
}

pub fn markdown_row(record: &AccuracyRecord) -> String {
    format!(
        "| {} | {} | {} | {:.2} | {} | {} |",
        record.embedding_model,
        record.chat_model,
        record.date,
        record.percent_correct,
        record.evaluator_model,
        record.dataset
    )
}

/// Appends `records` to the markdown results table at `path`, writing the
/// table header first when the file is new or empty.
pub fn append_results_markdown(path: &Path, records: &[AccuracyRecord]) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let existing = match fs::read_to_string(path) {
        Ok(existing) => existing,
        Err(error) if error.kind() == ErrorKind::NotFound => String::new(),
        Err(error) => return Err(error),
    };

    let file = OpenOptions::new().append(true).create(true).open(path)?;
    let mut writer = BufWriter::new(file);

    if existing.trim().is_empty() {
        writeln!(writer, "{RESULTS_TABLE_HEADER}")?;
    } else if !existing.ends_with('\n') {
        writeln!(writer)?;
    }
    for record in records {
        writeln!(writer, "{}", markdown_row(record))?;
    }

    writer.flush()
}
