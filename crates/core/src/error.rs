use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pdf parse error: {0}")]
    PdfParse(String),

    #[error("invalid chunking config: {0}")]
    InvalidChunkConfig(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("extraction task failed: {0}")]
    Task(String),

    #[error("extraction timed out after {0} seconds")]
    Timeout(u64),
}

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("embedding service returned {returned} vectors for {expected} inputs")]
    CountMismatch { expected: usize, returned: usize },
}

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("embedding failed: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("no chunks to index")]
    NoChunks,

    #[error("vector dimension {found} does not match index dimension {expected}")]
    DimensionMismatch { expected: usize, found: usize },

    #[error("refusing to load {}: pass trust_unsafe_deserialization to load index artifacts", .0.display())]
    Untrusted(PathBuf),

    #[error("index artifact {} does not match its manifest checksum", .0.display())]
    ChecksumMismatch(PathBuf),

    #[error("index was built with embedding model {stored}, not {requested}")]
    ModelMismatch { stored: String, requested: String },

    #[error("unsupported index format version {0}")]
    UnsupportedFormat(u32),
}

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("cannot initialize chat model: {0}")]
    Init(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },
}

#[derive(Debug, Error)]
pub enum QaError {
    #[error("retrieval failed: {0}")]
    Retrieval(#[from] IndexError),

    #[error("chat model failed: {0}")]
    Chat(#[from] ChatError),
}

#[derive(Debug, Error)]
pub enum WorkbookError {
    #[error("cannot read workbook: {0}")]
    Read(#[from] calamine::XlsxError),

    #[error("cannot write workbook: {0}")]
    Write(#[from] rust_xlsxwriter::XlsxError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("workbook {} has no worksheets", .0.display())]
    NoWorksheet(PathBuf),

    #[error("workbook {} is missing required column {column}", path.display())]
    MissingColumn { path: PathBuf, column: String },
}

#[derive(Debug, Error)]
pub enum EvaluationError {
    #[error(transparent)]
    Qa(#[from] QaError),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    Workbook(#[from] WorkbookError),
}

#[derive(Debug, Error)]
pub enum PlotError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("line {line}: percent_correct {value:?} is not a number")]
    InvalidAccuracy { line: usize, value: String },

    #[error("results table has no data rows")]
    Empty,

    #[error("chart rendering failed: {0}")]
    Render(String),
}

#[derive(Debug, Error)]
pub enum BuildError {
    #[error(transparent)]
    Ingest(#[from] IngestError),

    #[error(transparent)]
    Index(#[from] IndexError),
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("cannot build index: {0}")]
    Build(#[from] BuildError),

    #[error("retrieval failed: {0}")]
    Retrieval(#[from] IndexError),

    #[error(transparent)]
    Qa(#[from] QaError),
}

pub type Result<T, E = IngestError> = std::result::Result<T, E>;
