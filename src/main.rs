use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing::{info, warn};

use keyword_scorer::config::{get_config_path, AppConfig};
use keyword_scorer::context::{validate_credential, BusinessContext};
use keyword_scorer::error::ScorerError;
use keyword_scorer::llm::client::ProviderStats;
use keyword_scorer::llm::prompts::system_message;
use keyword_scorer::llm::OpenAiClient;
use keyword_scorer::logging::{init_logging, LogContext};
use keyword_scorer::scoring::{
    BatchOutcome, BatchProgress, BatchScorer, CancellationFlag, RunControl, ScorerOptions,
    ScoringMode, ScoringReport,
};
use keyword_scorer::table::{KeywordTable, CONTENT_TYPE, OUTPUT_FILENAME};

/// Exit status after a second Ctrl-C (128 + SIGINT)
const INTERRUPTED_EXIT_CODE: i32 = 130;

#[derive(Parser)]
#[command(name = "keyword-scorer")]
#[command(about = "Score keyword and content-topic lists by conversion potential")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(short, long, global = true, help = "Enable verbose logging")]
    verbose: bool,

    #[arg(short, long, global = true, help = "Configuration file path")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Score every row of a CSV file and write the result with a score column
    Score(ScoreArgs),

    /// Print the prompt the first batch would send, without calling the API
    Prompt(PromptArgs),

    /// Show the effective configuration
    Config,
}

#[derive(Args)]
struct ScoreArgs {
    #[arg(short, long, help = "CSV file with a 'keywords' column")]
    input: PathBuf,

    #[arg(short, long, help = "Output file path")]
    output: Option<PathBuf>,

    #[command(flatten)]
    context: ContextArgs,

    #[command(flatten)]
    scoring: ScoringArgs,

    #[arg(long, help = "Model name")]
    model: Option<String>,

    #[arg(long, help = "Sampling temperature (0.0 - 1.0)")]
    temperature: Option<f32>,

    #[arg(long, env = "KWS_API_KEY", hide_env_values = true, help = "API key")]
    api_key: Option<String>,
}

#[derive(Args)]
struct PromptArgs {
    #[arg(short, long, help = "CSV file with a 'keywords' column")]
    input: PathBuf,

    #[command(flatten)]
    context: ContextArgs,

    #[command(flatten)]
    scoring: ScoringArgs,
}

#[derive(Args)]
struct ScoringArgs {
    #[arg(short, long, help = "Keywords per request")]
    batch_size: Option<usize>,

    #[arg(long, help = "Batches in flight at once")]
    concurrency: Option<usize>,

    #[arg(short, long, help = "What the list contains", value_enum)]
    mode: Option<ModeArg>,
}

#[derive(Args)]
struct ContextArgs {
    #[arg(long = "context", help = "TOML file with business context fields")]
    context_file: Option<PathBuf>,

    #[arg(long, help = "Industry")]
    industry: Option<String>,

    #[arg(long, help = "Business description")]
    description: Option<String>,

    #[arg(long, help = "Primary conversion goal")]
    goal: Option<String>,

    #[arg(long, help = "Key service or product pages")]
    services: Option<String>,

    #[arg(long, help = "Target audience")]
    audience: Option<String>,
}

#[derive(ValueEnum, Clone, Copy)]
enum ModeArg {
    Keywords,
    Topics,
}

impl From<ModeArg> for ScoringMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Keywords => ScoringMode::Keywords,
            ModeArg::Topics => ScoringMode::ContentTopics,
        }
    }
}

impl ContextArgs {
    /// Context file first, then any non-empty flag on top, then validation
    async fn resolve(&self) -> Result<BusinessContext> {
        let base = match &self.context_file {
            Some(path) => BusinessContext::load_from_file(path)
                .await
                .with_context(|| format!("failed to load business context from {}", path.display()))?,
            None => BusinessContext::default(),
        };

        let flags = BusinessContext::new(
            self.industry.clone().unwrap_or_default(),
            self.description.clone().unwrap_or_default(),
            self.goal.clone().unwrap_or_default(),
            self.services.clone().unwrap_or_default(),
            self.audience.clone().unwrap_or_default(),
        );

        let context = base.merge(flags);
        context.validate()?;
        Ok(context)
    }
}

impl ScoringArgs {
    fn apply(&self, config: &mut AppConfig) {
        if let Some(batch_size) = self.batch_size {
            config.scoring.batch_size = batch_size;
        }
        if let Some(concurrency) = self.concurrency {
            config.scoring.max_concurrent_batches = concurrency;
        }
        if let Some(mode) = self.mode {
            config.scoring.mode = mode.into();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = if let Some(config_path) = &cli.config {
        AppConfig::load_from_file(config_path)
            .await
            .with_context(|| format!("failed to load configuration from {}", config_path.display()))?
    } else {
        AppConfig::load().await.context("failed to load configuration")?
    };

    if cli.verbose {
        config.logging.level = "debug".to_string();
    }
    init_logging(&config.logging).context("failed to initialize logging")?;

    let context = LogContext::new("main", "startup").with_string_field("version", env!("CARGO_PKG_VERSION"));
    keyword_scorer::log_info!(context, "Keyword scorer starting up");

    // Execute command
    match cli.command {
        Commands::Score(args) => execute_score(config, args).await?,
        Commands::Prompt(args) => preview_prompt(config, args).await?,
        Commands::Config => show_config(&config, cli.config)?,
    }

    Ok(())
}

async fn execute_score(mut config: AppConfig, args: ScoreArgs) -> Result<()> {
    args.scoring.apply(&mut config);
    if let Some(model) = &args.model {
        config.llm.model = model.clone();
    }
    if let Some(temperature) = args.temperature {
        config.llm.temperature = temperature;
    }
    config.validate()?;

    // Everything is checked before the first request goes out
    let context = args.context.resolve().await?;

    let api_key = args
        .api_key
        .clone()
        .filter(|key| !key.trim().is_empty())
        .or_else(|| config.resolve_api_key())
        .ok_or_else(|| ScorerError::InvalidCredential {
            reason: "no API key given; use --api-key, KWS_API_KEY or OPENAI_API_KEY".to_string(),
        })?;
    validate_credential(&api_key)?;

    let table = KeywordTable::from_path(&args.input)
        .with_context(|| format!("failed to read {}", args.input.display()))?;

    let mode = config.scoring.mode;
    let scorer = BatchScorer::new(ScorerOptions {
        batch_size: config.scoring.batch_size,
        max_concurrent_batches: config.scoring.max_concurrent_batches,
        mode,
    })?;
    let client = OpenAiClient::new(&config.llm, &api_key, config.generation_params(), system_message(mode))?;

    info!(
        "Scoring {} rows from {} with {} (batch size {})",
        table.len(),
        args.input.display(),
        config.llm.model,
        config.scoring.batch_size
    );

    let cancel = CancellationFlag::new();
    let signal_flag = cancel.clone();
    // First interrupt cancels cooperatively, a second one exits at once
    let signal_task = tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if !signal_flag.cancel() {
                eprintln!("Interrupted again, exiting without writing results");
                std::process::exit(INTERRUPTED_EXIT_CODE);
            }
            warn!("Interrupt received, finishing in-flight batches (press Ctrl-C again to abort)");
        }
    });

    let progress = |p: &BatchProgress<'_>| match p.outcome {
        BatchOutcome::Scored { .. } => {
            println!("Processing batch {} of {}", p.batch_number, p.total_batches);
        }
        BatchOutcome::Failed { reason } => {
            println!(
                "Processing batch {} of {}: failed, {} keywords scored 1 ({})",
                p.batch_number, p.total_batches, p.batch_len, reason
            );
        }
        BatchOutcome::Skipped => {
            println!("Skipping batch {} of {}: cancelled", p.batch_number, p.total_batches);
        }
    };

    let control = RunControl {
        cancel: Some(cancel),
        progress: Some(&progress),
    };
    let report = scorer.score_records(&table.records(), &context, &client, &control).await;
    signal_task.abort();

    let scored = table.with_scores(&report.scores)?;
    let output = args
        .output
        .unwrap_or_else(|| config.export.output_directory.join(OUTPUT_FILENAME));
    let file_size = scored
        .write_to_path(&output)
        .with_context(|| format!("failed to write {}", output.display()))?;

    print_preview(&scored, config.export.preview_rows);
    print_summary(&report, client.stats());
    println!("\nResults written to: {} ({} bytes, {})", output.display(), file_size, CONTENT_TYPE);

    if report.was_cancelled() {
        warn!("Run was cancelled; unscored rows carry the fallback score");
    }

    Ok(())
}

async fn preview_prompt(mut config: AppConfig, args: PromptArgs) -> Result<()> {
    args.scoring.apply(&mut config);
    config.validate()?;

    let context = args.context.resolve().await?;
    let table = KeywordTable::from_path(&args.input)
        .with_context(|| format!("failed to read {}", args.input.display()))?;

    let keywords: Vec<String> = table
        .records()
        .into_iter()
        .filter(|record| !record.is_blank())
        .map(|record| record.text.trim().to_string())
        .collect();
    if keywords.is_empty() {
        bail!("{} has no non-blank keywords", args.input.display());
    }

    let mode = config.scoring.mode;
    let scorer = BatchScorer::new(ScorerOptions {
        batch_size: config.scoring.batch_size,
        max_concurrent_batches: config.scoring.max_concurrent_batches,
        mode,
    })?;

    println!(
        "Batches: {} ({} keywords, batch size {})",
        scorer.batch_count(keywords.len()),
        keywords.len(),
        config.scoring.batch_size
    );
    println!("\nSystem message:\n{}", system_message(mode));
    println!("\nPrompt (batch 1):\n{}", scorer.preview_prompt(&keywords, &context));

    Ok(())
}

fn show_config(config: &AppConfig, path: Option<PathBuf>) -> Result<()> {
    let path = path.unwrap_or_else(get_config_path);

    let mut shown = config.clone();
    if shown.llm.api_key.is_some() {
        shown.llm.api_key = Some("<redacted>".to_string());
    }

    println!("Configuration file: {}", path.display());
    println!(
        "API key: {}",
        if config.resolve_api_key().is_some() { "set" } else { "not set" }
    );
    println!("\n{}", toml::to_string_pretty(&shown).context("failed to render configuration")?);
    Ok(())
}

fn print_preview(table: &KeywordTable, rows: usize) {
    const WIDTH: usize = 24;

    println!("\nPreview (first {} rows):", rows.min(table.len()));
    let header: Vec<String> = table.headers().iter().map(|h| cell(h, WIDTH)).collect();
    println!("{}", header.join(" "));
    println!("{}", "-".repeat((WIDTH + 1) * table.headers().len()));

    for row in table.preview(rows) {
        let line: Vec<String> = row.iter().map(|value| cell(value, WIDTH)).collect();
        println!("{}", line.join(" "));
    }
}

fn cell(value: &str, width: usize) -> String {
    let text: String = value.chars().take(width).collect();
    format!("{:<width$}", text, width = width)
}

fn print_summary(report: &ScoringReport, stats: &ProviderStats) {
    println!("\nRun {}:", report.run_id);
    println!(
        "  Batches: {} scored, {} failed, {} skipped of {}",
        report.scored_batches(),
        report.failed_batches(),
        report.skipped_batches(),
        report.total_batches()
    );
    println!("  Blank rows: {}", report.blank_rows);
    println!("  Fallback lines in responses: {}", report.fallback_lines());
    println!(
        "  Requests: {} ({} retries, {} failed)",
        stats.requests(),
        stats.retries(),
        stats.failures()
    );
    println!("  Elapsed: {:.1}s", report.elapsed.as_secs_f64());

    println!("  Score distribution:");
    for (i, count) in report.distribution().iter().enumerate().rev() {
        println!("    {}: {}", i + 1, count);
    }
}
