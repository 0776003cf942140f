use anyhow::Context;
use chrono::Utc;
use clap::{Args, Parser, Subcommand, ValueEnum};
use docqa_core::evaluation::DEFAULT_RESULTS_PATH;
use docqa_core::grading::{DEFAULT_INSTRUCTION, DEFAULT_VOTES};
use docqa_core::llm::DEFAULT_OLLAMA_URL;
use docqa_core::plot::{DEFAULT_CHART_PATH, DEFAULT_RESULTS_TABLE};
use docqa_core::{
    accuracy_by_model, append_results_markdown, load_ground_truth, normalize_whitespace,
    plot_results, read_questions, read_result_rows, write_graded, write_results, BatchEvaluator,
    ChatModel, ConversationScope, Embedder, EmbeddingProvider, EmbeddingSettings, Grader,
    IndexPipeline, InteractiveSession, OllamaChat, OllamaSettings, Paraphraser, RunMetadata,
    SessionError, SkippedPdf, VectorIndex,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const DEFAULT_QUESTIONS: &str = "./mdsap/Q&A_RDC RESOLUTION No. 665, OF MARCH 30, 2022.xlsx";
const DEFAULT_EVALUATION_PDF: &str = "./mdsap/merged/merged2.pdf";
const DEFAULT_CHAT_PDF: &str = "./lip-guidance-test/MERGED_cosmetic_guidances2.0.pdf";
const DEFAULT_EMBEDDING_MODEL: &str = "hkunlp/instructor-xl";

#[derive(Parser)]
#[command(name = "docqa", version, about = "Question answering and evaluation over PDF documents")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    backend: BackendArgs,

    /// Batch evaluation options, used when no subcommand is given.
    #[command(flatten)]
    evaluate: EvaluateArgs,
}

#[derive(Args, Clone)]
struct BackendArgs {
    /// Ollama server base URL
    #[arg(long, env = "OLLAMA_URL", default_value = DEFAULT_OLLAMA_URL, global = true)]
    ollama_url: String,

    /// Embedding backend: huggingface, ollama or ngram
    #[arg(long, env = "EMBEDDING_PROVIDER", default_value = "huggingface", global = true)]
    embedding_provider: EmbeddingProvider,

    /// Embedding service base URL, defaults to the provider's
    #[arg(long, env = "EMBEDDING_URL", global = true)]
    embedding_url: Option<String>,

    /// Hugging Face access token
    #[arg(long, env = "HF_TOKEN", hide_env_values = true, global = true)]
    hub_token: Option<String>,

    /// Timeout for each embedding or chat request
    #[arg(long, env = "REQUEST_TIMEOUT_SECS", default_value = "300", global = true)]
    request_timeout_secs: u64,
}

impl BackendArgs {
    fn timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    fn ollama(&self) -> OllamaSettings {
        OllamaSettings {
            base_url: self.ollama_url.clone(),
            timeout: self.timeout(),
            temperature: None,
        }
    }

    fn embedder(&self, model: &str) -> anyhow::Result<Arc<dyn Embedder>> {
        let settings = EmbeddingSettings {
            provider: self.embedding_provider,
            model: model.to_string(),
            endpoint: self.embedding_url.clone(),
            hub_token: self.hub_token.clone(),
            timeout: self.timeout(),
        };
        settings
            .build(&self.ollama_url)
            .with_context(|| format!("cannot set up {} embeddings for {model}", self.embedding_provider))
    }

    fn chat(&self, model: &str) -> anyhow::Result<Arc<dyn ChatModel>> {
        let chat = OllamaChat::new(&self.ollama(), model)
            .with_context(|| format!("cannot initialize chat model {model}"))?;
        Ok(Arc::new(chat))
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum ScopeArg {
    PerQuestion,
    PerRun,
}

impl From<ScopeArg> for ConversationScope {
    fn from(scope: ScopeArg) -> Self {
        match scope {
            ScopeArg::PerQuestion => ConversationScope::PerQuestion,
            ScopeArg::PerRun => ConversationScope::PerRun,
        }
    }
}

#[derive(Args, Clone)]
struct EvaluateArgs {
    /// Load a saved index directory instead of embedding the PDFs again
    #[arg(short = 'e', long = "embedding-model", value_name = "INDEX")]
    index: Option<PathBuf>,

    /// Accept a saved index from disk; required with --embedding-model
    #[arg(long, default_value_t = false)]
    trust_index: bool,

    /// Labeled question workbook
    #[arg(long, default_value = DEFAULT_QUESTIONS)]
    questions: PathBuf,

    /// Source PDF files or folders
    #[arg(long = "pdf", default_value = DEFAULT_EVALUATION_PDF)]
    pdfs: Vec<PathBuf>,

    /// Dataset name recorded in every result row
    #[arg(long, default_value = "mdsap")]
    branch: String,

    /// Embedding model used to build (or stored in) the index
    #[arg(long, default_value = DEFAULT_EMBEDDING_MODEL)]
    embedding_name: String,

    #[arg(long, default_value = "qwen2.5:7b")]
    chat_model: String,

    #[arg(long, default_value = "llama3.2")]
    paraphrase_model: String,

    #[arg(long, default_value = "5")]
    top_k: usize,

    /// Result workbook to write
    #[arg(long, default_value = DEFAULT_RESULTS_PATH)]
    output: PathBuf,

    #[arg(long, value_enum, default_value = "per-question")]
    conversation_scope: ScopeArg,
}

#[derive(Subcommand)]
enum Command {
    /// Answer a labeled question set and write the answers to a workbook.
    Evaluate(EvaluateArgs),
    /// Build an index from PDFs and save it to disk.
    Embed {
        /// PDF files or folders
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
        #[arg(short, long, default_value = DEFAULT_EMBEDDING_MODEL)]
        model: String,
        /// Index directory to write
        #[arg(short, long, default_value = "store.idx")]
        output: PathBuf,
    },
    /// Ask questions about PDFs one at a time.
    Chat {
        #[arg(long = "pdf", default_value = DEFAULT_CHAT_PDF)]
        pdfs: Vec<PathBuf>,
        #[arg(long, default_value = DEFAULT_EMBEDDING_MODEL)]
        embedding_name: String,
        #[arg(long, default_value = "deepseek-r1:1.5b")]
        chat_model: String,
        #[arg(long, default_value = "5")]
        top_k: usize,
    },
    /// Grade result workbooks with a judge model and record the accuracy.
    Grade {
        /// Result workbooks written by evaluate
        #[arg(long = "results", required = true)]
        results: Vec<PathBuf>,
        #[arg(long, default_value = DEFAULT_QUESTIONS)]
        questions: PathBuf,
        #[arg(long, env = "JUDGE_MODEL", default_value = "llama3.2")]
        judge_model: String,
        #[arg(long, env = "EVAL_PROMPT", default_value = DEFAULT_INSTRUCTION)]
        instruction: String,
        /// Judge calls per answer; the most common reply wins
        #[arg(long, default_value_t = DEFAULT_VOTES)]
        votes: usize,
        /// Merged workbook with the verdicts
        #[arg(long, default_value = "data/results/graded.xlsx")]
        output: PathBuf,
        /// Markdown accuracy table to append to
        #[arg(long, default_value = "RESULTS.md")]
        results_table: PathBuf,
    },
    /// Chart the markdown accuracy table.
    Plot {
        #[arg(short, long, default_value = DEFAULT_RESULTS_TABLE)]
        input: PathBuf,
        #[arg(short, long, default_value = DEFAULT_CHART_PATH)]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    info!(
        version = env!("CARGO_PKG_VERSION"),
        started_at = %Utc::now().to_rfc3339(),
        "docqa boot"
    );

    match cli.command {
        None => evaluate(&cli.backend, cli.evaluate).await,
        Some(Command::Evaluate(args)) => evaluate(&cli.backend, args).await,
        Some(Command::Embed { inputs, model, output }) => embed(&cli.backend, &inputs, &model, output).await,
        Some(Command::Chat {
            pdfs,
            embedding_name,
            chat_model,
            top_k,
        }) => chat(&cli.backend, pdfs, &embedding_name, &chat_model, top_k).await,
        Some(Command::Grade {
            results,
            questions,
            judge_model,
            instruction,
            votes,
            output,
            results_table,
        }) => {
            let grader = Grader::new(cli.backend.chat(&judge_model)?)
                .with_votes(votes)
                .with_instruction(instruction);
            grade(grader, &results, &questions, &output, &results_table).await
        }
        Some(Command::Plot { input, output }) => {
            let records = plot_results(&input, &output)
                .with_context(|| format!("cannot plot {}", input.display()))?;
            println!("plotted {records} results to {}", output.display());
            Ok(())
        }
    }
}

async fn evaluate(backend: &BackendArgs, args: EvaluateArgs) -> anyhow::Result<()> {
    let started = Instant::now();
    let chat = backend.chat(&args.chat_model)?;
    let embedder = backend.embedder(&args.embedding_name)?;

    let index = match &args.index {
        Some(dir) => {
            let index = VectorIndex::load(dir, embedder, args.trust_index)
                .with_context(|| format!("cannot load index {}", dir.display()))?;
            info!(
                path = %dir.display(),
                chunks = index.len(),
                model = index.embedding_model(),
                dimensions = index.dimensions(),
                "reusing saved index"
            );
            index
        }
        None => {
            let build = IndexPipeline::new(embedder).build(&args.pdfs).await?;
            report_skipped(&build.skipped_files);
            println!("raw text: {} chars, {} chunks", build.raw_text_chars, build.chunk_count);
            build.index
        }
    };

    let questions = read_questions(&args.questions)
        .with_context(|| format!("cannot read questions from {}", args.questions.display()))?;
    let paraphraser = Paraphraser::ollama(backend.ollama(), args.paraphrase_model.clone());
    let metadata = RunMetadata {
        branch_name: args.branch,
        embedding_model: args.embedding_name,
        chat_model: args.chat_model,
    };

    let evaluator = BatchEvaluator::new(Arc::new(index), chat, paraphraser, metadata, args.top_k)
        .with_scope(args.conversation_scope.into());
    let report = evaluator.run_since(&questions, started).await?;
    write_results(&args.output, &report)?;

    println!(
        "answered {} questions ({} skipped) in {:.1}s, saved to {}",
        report.rows.len(),
        report.skipped_questions.len(),
        report.elapsed.as_secs_f64(),
        args.output.display()
    );
    Ok(())
}

async fn embed(backend: &BackendArgs, inputs: &[PathBuf], model: &str, output: PathBuf) -> anyhow::Result<()> {
    let build = IndexPipeline::new(backend.embedder(model)?).build(inputs).await?;
    report_skipped(&build.skipped_files);
    build
        .index
        .save(&output)
        .with_context(|| format!("cannot save index to {}", output.display()))?;

    println!(
        "indexed {} chunks from {} documents into {}",
        build.chunk_count,
        build.documents,
        output.display()
    );
    Ok(())
}

async fn chat(
    backend: &BackendArgs,
    pdfs: Vec<PathBuf>,
    embedding_name: &str,
    chat_model: &str,
    top_k: usize,
) -> anyhow::Result<()> {
    let pipeline = IndexPipeline::new(backend.embedder(embedding_name)?);
    let mut session = InteractiveSession::new(pipeline, pdfs, backend.chat(chat_model)?, top_k);

    let summary = session.ensure_built().await?;
    report_skipped(&summary.skipped_files);
    println!("Length document: {}", summary.raw_text_chars);
    println!("Num chunks: {}", summary.chunk_count);
    println!("Type a question, :rebuild to re-read the documents, :quit to exit.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let question = line.trim();
        match question {
            "" => continue,
            ":quit" => break,
            ":rebuild" => {
                let summary = session.rebuild().await?;
                println!("Length document: {}", summary.raw_text_chars);
                println!("Num chunks: {}", summary.chunk_count);
                continue;
            }
            _ => {}
        }

        match session.ask(question).await {
            Ok(exchange) => {
                println!("User has sent the following question: {}", exchange.question);
                for (rank, hit) in exchange.scored.iter().enumerate() {
                    println!("[{}] score={:.4} {}", rank + 1, hit.score, normalize_whitespace(&hit.text));
                }
                println!("Model has sent the following answer: {}", exchange.answer);
            }
            Err(error @ (SessionError::Qa(_) | SessionError::Retrieval(_))) => {
                warn!(%error, "question failed");
                println!("error: {error}");
            }
            Err(error) => return Err(error.into()),
        }
    }

    Ok(())
}

async fn grade(
    grader: Grader,
    results: &[PathBuf],
    questions: &Path,
    output: &Path,
    results_table: &Path,
) -> anyhow::Result<()> {
    let ground_truth = load_ground_truth(questions)
        .with_context(|| format!("cannot read ground truth from {}", questions.display()))?;

    let mut rows = Vec::new();
    for path in results {
        match read_result_rows(path) {
            Ok(found) if found.is_empty() => warn!(path = %path.display(), "no rows found"),
            Ok(found) => {
                info!(path = %path.display(), rows = found.len(), "read result rows");
                rows.extend(found);
            }
            Err(error) => warn!(path = %path.display(), %error, "cannot read results, skipping"),
        }
    }
    if rows.is_empty() {
        anyhow::bail!("no result rows to grade");
    }

    let graded = grader.grade(rows, &ground_truth).await;
    write_graded(output, &graded)?;

    let date = Utc::now().format("%Y-%m-%d").to_string();
    let records = accuracy_by_model(&graded, grader.judge_model(), &date);
    append_results_markdown(results_table, &records)
        .with_context(|| format!("cannot update {}", results_table.display()))?;

    for record in &records {
        println!(
            "{} + {}: {:.2}% correct",
            record.embedding_model, record.chat_model, record.percent_correct
        );
    }
    println!("graded {} answers, saved to {}", graded.len(), output.display());
    Ok(())
}

fn report_skipped(skipped: &[SkippedPdf]) {
    if skipped.is_empty() {
        return;
    }
    warn!(skipped_files = skipped.len(), "some pdfs were skipped");
    for file in skipped {
        warn!(path = %file.path.display(), reason = %file.reason, "skipped pdf");
    }
}
