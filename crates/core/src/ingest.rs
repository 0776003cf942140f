use crate::extractor::{join_pages, PdfExtractor};
use crate::{Document, IngestError};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, warn};
use walkdir::WalkDir;

pub const DEFAULT_EXTRACTION_TIMEOUT: Duration = Duration::from_secs(600);

pub fn discover_pdf_files(folder: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let is_pdf = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));

        if is_pdf {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

/// Checks that every input exists and expands directories into the PDFs they contain.
pub fn resolve_inputs(inputs: &[PathBuf]) -> Result<Vec<PathBuf>, IngestError> {
    let mut files = Vec::new();

    for input in inputs {
        if !input.exists() {
            return Err(IngestError::InvalidArgument(format!(
                "\"{}\" does not exist",
                input.display()
            )));
        }

        if input.is_dir() {
            let found = discover_pdf_files(input);
            if found.is_empty() {
                return Err(IngestError::InvalidArgument(format!(
                    "no pdf files found in {}",
                    input.display()
                )));
            }
            files.extend(found);
        } else {
            files.push(input.clone());
        }
    }

    Ok(files)
}

#[derive(Debug, Clone)]
pub struct SkippedPdf {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct IngestionReport {
    pub documents: Vec<Document>,
    pub skipped_files: Vec<SkippedPdf>,
}

impl IngestionReport {
    /// All extracted text, in the order the files were submitted.
    pub fn text(&self) -> String {
        self.documents
            .iter()
            .map(|document| document.text.as_str())
            .collect()
    }
}

fn worker_count() -> usize {
    std::thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1)
}

/// Extracts every file on the blocking pool, at most `available_parallelism`
/// at a time. Files that fail are reported in `skipped_files` instead of
/// aborting the run.
pub async fn extract_documents<X>(paths: &[PathBuf], extractor: X) -> IngestionReport
where
    X: PdfExtractor + 'static,
{
    extract_documents_with_timeout(paths, extractor, DEFAULT_EXTRACTION_TIMEOUT).await
}

pub async fn extract_documents_with_timeout<X>(
    paths: &[PathBuf],
    extractor: X,
    per_file_timeout: Duration,
) -> IngestionReport
where
    X: PdfExtractor + 'static,
{
    extract_with_limits(paths, extractor, per_file_timeout, worker_count()).await
}

async fn extract_with_limits<X>(
    paths: &[PathBuf],
    extractor: X,
    per_file_timeout: Duration,
    workers: usize,
) -> IngestionReport
where
    X: PdfExtractor + 'static,
{
    let extractor = Arc::new(extractor);
    let permits = Arc::new(Semaphore::new(workers.max(1)));

    let mut tasks = Vec::with_capacity(paths.len());
    for path in paths {
        let job_path = path.clone();
        let extractor = Arc::clone(&extractor);
        let permits = Arc::clone(&permits);

        let task = tokio::spawn(async move {
            let permit = permits
                .acquire_owned()
                .await
                .map_err(|error| IngestError::Task(error.to_string()))?;

            // the permit lives as long as the blocking thread, even after a timeout
            let job = tokio::task::spawn_blocking(move || {
                let _permit = permit;
                extractor.extract_pages(&job_path)
            });

            match tokio::time::timeout(per_file_timeout, job).await {
                Ok(Ok(pages)) => pages.map(|pages| join_pages(&pages)),
                Ok(Err(join_error)) => Err(IngestError::Task(join_error.to_string())),
                Err(_) => Err(IngestError::Timeout(per_file_timeout.as_secs())),
            }
        });

        tasks.push((path.clone(), task));
    }

    let mut report = IngestionReport::default();
    for (path, task) in tasks {
        let outcome = match task.await {
            Ok(outcome) => outcome,
            Err(join_error) => Err(IngestError::Task(join_error.to_string())),
        };

        match outcome {
            Ok(text) => {
                debug!(path = %path.display(), chars = text.chars().count(), "extracted pdf");
                if text.trim().is_empty() {
                    warn!(path = %path.display(), "pdf has no extractable text");
                }
                report.documents.push(Document { path, text });
            }
            Err(error) => {
                warn!(path = %path.display(), reason = %error, "error processing file, skipping");
                report.skipped_files.push(SkippedPdf {
                    path,
                    reason: error.to_string(),
                });
            }
        }
    }

    report
}
