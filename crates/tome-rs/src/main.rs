//! Answer a question about a long document.
//!
//! Reads the API key from `OPENROUTER_KEY` (or `ANTHROPIC_API_KEY` with
//! `--provider anthropic`).
//!
//! # Examples
//!
//! ```sh
//! # Summary pyramid with the default 5/4 windows
//! tome pyramid --document mobydick.txt --query "How does Ahab die?"
//!
//! # Query from a file, wider windows, more parallel calls
//! tome pyramid --document report.txt --query queries/risks.txt \
//!   --window-size 8 --stride 6 --concurrency 8
//!
//! # Sequential rollup against the Anthropic API
//! tome rollup --provider anthropic --model claude-sonnet-4-20250514 \
//!   --document contract.txt --query "Who may terminate, and when?"
//!
//! # Continue a run that failed part way
//! tome pyramid --document mobydick.txt --query query.txt --resume
//! ```

use std::path::{Path, PathBuf};
use std::process;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use tome_rs::artifacts::{ArtifactKey, Checkpoint, DirectorySink};
use tome_rs::config::{
    AnswerConfig, ChunkingConfig, DEFAULT_ANSWER_TOKEN_LIMIT, DEFAULT_CONCURRENCY,
    DEFAULT_CONTEXT_WINDOW, DEFAULT_STRIDE, DEFAULT_SUMMARY_TOKEN_LIMIT,
    DEFAULT_TOKENS_PER_CHUNK, DEFAULT_TOKENS_PER_SELECTION, DEFAULT_WINDOW_SIZE, GatewayConfig,
    Provider, PyramidConfig, RollupConfig, WindowConfig,
};
use tome_rs::pipeline::{Pipeline, PipelineOutput, Source, Strategy};
use tome_rs::prelude::{LoggingHandler, ModelGateway, RetryConfig};
use tome_rs::{DEFAULT_ANTHROPIC_MODEL, DEFAULT_MODEL, Error};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Answer a question about a document too long for one model call.
#[derive(Parser)]
#[command(name = "tome", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Summarize overlapping windows level by level, then answer.
    Pyramid(PyramidArgs),
    /// Fold each chunk into one running summary, then answer.
    Rollup(RollupArgs),
}

#[derive(Args)]
struct CommonArgs {
    // ── Input ──────────────────────────────────────────────────
    /// Path to the document file
    #[arg(long)]
    document: PathBuf,

    /// Path to a query file, or the query itself
    #[arg(long)]
    query: String,

    // ── Model ──────────────────────────────────────────────────
    /// Backend API
    #[arg(long, default_value_t = Provider::OpenRouter)]
    provider: Provider,

    /// Model name (defaults depend on the provider)
    #[arg(long)]
    model: Option<String>,

    /// Sampling temperature
    #[arg(long, default_value_t = 0.0)]
    temperature: f32,

    /// Retries after the first attempt for transient failures
    #[arg(long, default_value_t = 3)]
    max_retries: u32,

    /// Per-call timeout in seconds
    #[arg(long, default_value_t = 120)]
    timeout: u64,

    // ── Token budgets ──────────────────────────────────────────
    /// Context window size in tokens
    #[arg(long, default_value_t = DEFAULT_CONTEXT_WINDOW)]
    context_window: usize,

    /// Target size for content selections in tokens
    #[arg(long, default_value_t = DEFAULT_TOKENS_PER_SELECTION)]
    tokens_per_selection: usize,

    /// Size to chunk the document into
    #[arg(long, default_value_t = DEFAULT_TOKENS_PER_CHUNK)]
    tokens_per_chunk: usize,

    /// Maximum tokens for each summary
    #[arg(long, default_value_t = DEFAULT_SUMMARY_TOKEN_LIMIT)]
    summary_token_limit: usize,

    /// Maximum tokens for the final answer
    #[arg(long, default_value_t = DEFAULT_ANSWER_TOKEN_LIMIT)]
    answer_token_limit: usize,

    /// Cut chunks at word boundaries only, ignoring blank lines
    #[arg(long)]
    no_paragraphs: bool,

    // ── Output ─────────────────────────────────────────────────
    /// Directory to store outputs
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Clear the output directory first
    #[arg(long, conflicts_with = "resume")]
    clear_output: bool,

    /// Continue from the checkpoint in the output directory
    #[arg(long)]
    resume: bool,

    /// Debug logging (overridden by RUST_LOG)
    #[arg(long, short)]
    verbose: bool,
}

#[derive(Args)]
struct PyramidArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// Window size for all summary levels
    #[arg(long, default_value_t = DEFAULT_WINDOW_SIZE)]
    window_size: usize,

    /// Stride for all summary levels
    #[arg(long, default_value_t = DEFAULT_STRIDE)]
    stride: usize,

    /// Window size for levels above the first (defaults to --window-size)
    #[arg(long)]
    level_window_size: Option<usize>,

    /// Stride for levels above the first (defaults to --stride)
    #[arg(long)]
    level_stride: Option<usize>,

    /// Windows summarized concurrently within a level
    #[arg(long, default_value_t = DEFAULT_CONCURRENCY)]
    concurrency: usize,
}

#[derive(Args)]
struct RollupArgs {
    #[command(flatten)]
    common: CommonArgs,
}

// ── Helpers ────────────────────────────────────────────────────────

fn init_logging(verbose: bool) {
    let default = if verbose { "tome=debug,tome_rs=debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// A query argument naming an existing file is read from that file.
fn resolve_query(arg: &str) -> Result<String, Error> {
    let path = Path::new(arg);
    if path.is_file() {
        Ok(std::fs::read_to_string(path)?.trim().to_string())
    } else {
        Ok(arg.trim().to_string())
    }
}

fn build_gateway(args: &CommonArgs) -> Result<ModelGateway, Error> {
    let api_key = std::env::var(args.provider.api_key_env()).unwrap_or_default();
    let model = args.model.clone().unwrap_or_else(|| match args.provider {
        Provider::OpenRouter => DEFAULT_MODEL.to_string(),
        Provider::Anthropic => DEFAULT_ANTHROPIC_MODEL.to_string(),
    });
    let config = GatewayConfig::new(args.provider, model, api_key)
        .with_max_input_tokens(args.context_window)
        .with_request_timeout(Duration::from_secs(args.timeout))
        .with_temperature(args.temperature)
        .with_retry(RetryConfig::with_retries(args.max_retries));
    ModelGateway::from_config(&config)
}

fn open_sink(args: &CommonArgs, default_dir: &str) -> Result<DirectorySink, Error> {
    let root = args
        .output_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from(default_dir));
    let sink = DirectorySink::new(root)?;
    if args.clear_output {
        info!("Clearing {}", sink.root().display());
        sink.clear()?;
    }
    Ok(sink)
}

async fn run(command: Command) -> Result<PipelineOutput, Error> {
    let (common, strategy, default_dir) = match command {
        Command::Pyramid(args) => {
            let base = WindowConfig::new(args.window_size, args.stride);
            let upper = WindowConfig::new(
                args.level_window_size.unwrap_or(args.window_size),
                args.level_stride.unwrap_or(args.stride),
            );
            let config = PyramidConfig::default()
                .with_base(base)
                .with_upper(upper)
                .with_concurrency(args.concurrency)
                .with_summary_token_limit(args.common.summary_token_limit);
            (args.common, Strategy::Pyramid(config), "pyramid_output")
        }
        Command::Rollup(args) => {
            let config = RollupConfig::default()
                .with_context_window(args.common.context_window)
                .with_summary_token_limit(args.common.summary_token_limit)
                .with_answer_token_limit(args.common.answer_token_limit);
            (args.common, Strategy::Rollup(config), "rollup_output")
        }
    };

    init_logging(common.verbose);

    let chunking = ChunkingConfig::default()
        .with_tokens_per_chunk(common.tokens_per_chunk)
        .with_tokens_per_selection(common.tokens_per_selection)
        .with_paragraph_aware(!common.no_paragraphs);
    let answer = AnswerConfig::new(common.answer_token_limit);

    let gateway = build_gateway(&common)?;
    let query = resolve_query(&common.query)?;
    let text = std::fs::read_to_string(&common.document)?;
    let label = common.document.display().to_string();
    let sink = open_sink(&common, default_dir)?;

    let mut pipeline = Pipeline::new(&gateway, chunking, answer).with_event_handler(&LoggingHandler);
    if common.resume {
        match sink.load_json::<Checkpoint>(&ArtifactKey::Checkpoint)? {
            Some(checkpoint) => pipeline = pipeline.with_checkpoint(checkpoint),
            None => info!("No checkpoint in {}, starting fresh", sink.root().display()),
        }
    }

    info!("Query: {query}");
    let output = pipeline
        .run(Source::new(&label, &text), &query, &strategy, &sink)
        .await?;
    info!("Outputs written to {}", sink.root().display());
    Ok(output)
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match run(cli.command).await {
        Ok(output) => println!("{}", output.answer.text),
        Err(e) => {
            eprintln!("Error: {e}");
            if let Some(step) = e.failed_step() {
                eprintln!("  failed at {step}; completed work was saved, rerun with --resume");
            }
            process::exit(1);
        }
    }
}
