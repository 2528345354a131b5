//! CLI binary for rxparse.
//!
//! A thin shim over the library crate: each subcommand maps its flags onto
//! a config, runs one batch driver and prints the summary.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rxparse::pipeline::ocr::ensure_available;
use rxparse::{
    enhance_folder, extract_folder, load_table, ApiKey, BatchProgressCallback, EnhanceConfig,
    ExtractionClient, ExtractionConfig, GeminiTransport, ImprovementReport, NoopProgressCallback,
    ResultRow, SearchField, TesseractBackend, TextRecognizer, TokioSleeper,
};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers ──────────────────────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Live progress bar plus one log line per image.
struct CliProgressCallback {
    bar: ProgressBar,
    verb: &'static str,
}

impl CliProgressCallback {
    fn new(verb: &'static str) -> Arc<Self> {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(TICKS),
        );
        bar.set_prefix("Preparing");
        bar.set_message("Listing images…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self { bar, verb })
    }
}

impl BatchProgressCallback for CliProgressCallback {
    fn on_batch_start(&self, total: usize) {
        self.bar.set_length(total as u64);
        self.bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.cyan} {prefix:.bold}  \
                 [{bar:42.green/238}] {pos:>3}/{len} images  \
                 ⏱ {elapsed_precise}  {msg}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▉▊▋▌▍▎▏  ")
            .tick_strings(TICKS),
        );
        self.bar.set_prefix(self.verb);
        self.bar.reset_eta();
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("{} {total} images…", self.verb))
        ));
    }

    fn on_image_start(&self, _index: usize, _total: usize, file: &str) {
        self.bar.set_message(file.to_string());
    }

    fn on_image_complete(&self, index: usize, total: usize, file: &str) {
        self.bar.println(format!(
            "  {} {:>3}/{:<3}  {}",
            green("✓"),
            index,
            total,
            file
        ));
        self.bar.inc(1);
    }

    fn on_image_error(&self, index: usize, total: usize, _file: &str, error: &str) {
        let msg = match error.char_indices().nth(100) {
            Some((i, _)) => format!("{}\u{2026}", &error[..i]),
            None => error.to_string(),
        };
        self.bar
            .println(format!("  {} {:>3}/{:<3}  {}", red("✗"), index, total, red(&msg)));
        self.bar.inc(1);
    }

    fn on_pause(&self, seconds: f64) {
        self.bar.set_message(dim(&format!("pausing {seconds:.1}s")));
    }

    fn on_batch_complete(&self, succeeded: usize, failed: usize) {
        self.bar.finish_and_clear();
        if failed == 0 {
            eprintln!("{} {} images done", green("✔"), bold(&succeeded.to_string()));
        } else {
            eprintln!(
                "{} {} done, {} failed",
                if succeeded == 0 { red("✘") } else { cyan("⚠") },
                bold(&succeeded.to_string()),
                red(&failed.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Clean up raw scans
  rxparse enhance scans/ -o scans_preprocessed/

  # Same, and report how much OCR output improved
  rxparse enhance scans/ -o scans_preprocessed/ --measure-ocr

  # Extract records from the cleaned scans
  rxparse extract scans_preprocessed/ -o output_json_gemini/

  # Search interactively
  rxparse query output_json_gemini/

  # Search non-interactively, JSON output
  rxparse query output_json_gemini/ --field "Patient Name" --value jane --json

SEARCHABLE FIELDS:
  Patient Name, Doctor Name, Date, Medications, Special Instructions

ENVIRONMENT VARIABLES:
  GEMINI_KEY              Google Gemini API key (required for `extract`)
  RXPARSE_MODEL           Override model ID (default gemini-1.5-pro)
  RXPARSE_ENDPOINT        Override API endpoint root
  RUST_LOG                Override log filter

A `.env` file in the working directory is loaded before flags are parsed.
"#;

/// Enhance, extract and search prescription scans.
#[derive(Parser, Debug)]
#[command(
    name = "rxparse",
    version,
    about = "Turn prescription photos into searchable JSON records",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Disable progress bar.
    #[arg(long, global = true, env = "RXPARSE_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "RXPARSE_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "RXPARSE_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Clean scans: grayscale, denoise, CLAHE, sharpen, resize.
    Enhance(EnhanceArgs),
    /// Send enhanced scans to the vision model and save JSON records.
    Extract(ExtractArgs),
    /// Search saved records by field.
    Query(QueryArgs),
}

#[derive(Args, Debug)]
struct EnhanceArgs {
    /// Folder of source images.
    input: PathBuf,

    /// Folder receiving enhanced images.
    #[arg(short, long, env = "RXPARSE_ENHANCED_DIR", default_value = "preprocessed")]
    output: PathBuf,

    /// Output width in pixels; height keeps the aspect ratio.
    #[arg(long, env = "RXPARSE_WIDTH", default_value_t = 800)]
    width: u32,

    /// NL-means filter strength.
    #[arg(long, env = "RXPARSE_DENOISE", default_value_t = 10.0)]
    denoise: f32,

    /// CLAHE clip limit.
    #[arg(long, env = "RXPARSE_CLIP_LIMIT", default_value_t = 2.0)]
    clip_limit: f32,

    /// OCR each image before and after, and report the improvement.
    #[arg(long)]
    measure_ocr: bool,

    /// Tesseract language code for --measure-ocr.
    #[arg(long, default_value = "eng")]
    ocr_lang: String,

    /// Print the summary as JSON.
    #[arg(long)]
    json: bool,
}

#[derive(Args, Debug)]
struct ExtractArgs {
    /// Folder of (enhanced) images.
    input: PathBuf,

    /// Folder receiving `<stem>.json` records.
    #[arg(short, long, env = "RXPARSE_OUTPUT_DIR", default_value = "output_json_gemini")]
    output: PathBuf,

    /// Model ID.
    #[arg(long, env = "RXPARSE_MODEL", default_value = rxparse::config::DEFAULT_MODEL)]
    model: String,

    /// API endpoint root.
    #[arg(long, env = "RXPARSE_ENDPOINT", default_value = rxparse::config::DEFAULT_ENDPOINT)]
    endpoint: String,

    /// Request attempts per image.
    #[arg(long, env = "RXPARSE_MAX_ATTEMPTS", default_value_t = 5)]
    max_attempts: u32,

    /// First retry wait in seconds; doubles after every failure.
    #[arg(long, env = "RXPARSE_BACKOFF", default_value_t = 5)]
    backoff: u64,

    /// Ceiling for the retry wait in seconds (0 = no ceiling).
    #[arg(long, env = "RXPARSE_MAX_BACKOFF", default_value_t = 300)]
    max_backoff: u64,

    /// Shortest pause between images in seconds.
    #[arg(long, env = "RXPARSE_PACING_MIN", default_value_t = 20)]
    pacing_min: u64,

    /// Longest pause between images in seconds.
    #[arg(long, env = "RXPARSE_PACING_MAX", default_value_t = 40)]
    pacing_max: u64,

    /// Per-request timeout in seconds.
    #[arg(long, env = "RXPARSE_API_TIMEOUT", default_value_t = 120)]
    api_timeout: u64,

    /// MIME type declared for the image payload.
    #[arg(long, default_value = "image/jpeg")]
    mime_type: String,

    /// Path to a text file replacing the built-in instruction prompt.
    #[arg(long, env = "RXPARSE_PROMPT_FILE")]
    prompt_file: Option<PathBuf>,

    /// Print the tally as JSON.
    #[arg(long)]
    json: bool,
}

#[derive(Args, Debug)]
struct QueryArgs {
    /// Folder of JSON records.
    #[arg(default_value = "out")]
    dir: PathBuf,

    /// Field to search; prompted for when omitted.
    #[arg(long)]
    field: Option<String>,

    /// Substring to look for; prompted for when omitted.
    #[arg(long)]
    value: Option<String>,

    /// Print matching rows as JSON.
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // With the progress bar active, library INFO lines would tear it.
    let show_progress = !cli.quiet && !cli.no_progress && !matches!(cli.command, Command::Query(_));
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    match &cli.command {
        Command::Enhance(args) => run_enhance(&cli, args, show_progress).await,
        Command::Extract(args) => run_extract(&cli, args, show_progress).await,
        Command::Query(args) => run_query(args),
    }
}

fn progress_for(show: bool, verb: &'static str) -> Arc<dyn BatchProgressCallback> {
    if show {
        CliProgressCallback::new(verb) as Arc<dyn BatchProgressCallback>
    } else {
        Arc::new(NoopProgressCallback)
    }
}

// ── enhance ──────────────────────────────────────────────────────────────────

async fn run_enhance(cli: &Cli, args: &EnhanceArgs, show_progress: bool) -> Result<()> {
    let config = EnhanceConfig {
        target_width: args.width,
        denoise_strength: args.denoise,
        clahe_clip_limit: args.clip_limit,
        ..EnhanceConfig::default()
    };

    let recognizer: Option<Arc<dyn TextRecognizer>> = if args.measure_ocr {
        let tesseract = TesseractBackend::new().with_language(&args.ocr_lang);
        ensure_available(&tesseract)?;
        Some(Arc::new(tesseract))
    } else {
        None
    };

    let progress = progress_for(show_progress, "Enhancing");
    let summary = enhance_folder(
        &args.input,
        &args.output,
        &config,
        recognizer,
        progress.as_ref(),
    )
    .await
    .context("Enhancement failed")?;

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&summary).context("Failed to serialise summary")?
        );
        return Ok(());
    }

    if !cli.quiet {
        eprintln!(
            "Enhanced {}/{} images into {} in {}ms",
            summary.succeeded(),
            summary.succeeded() + summary.failed(),
            bold(&args.output.display().to_string()),
            summary.duration_ms
        );
    }
    if args.measure_ocr {
        print_report(&summary.report);
    }
    Ok(())
}

fn print_report(report: &ImprovementReport) {
    let (Some(mean), Some(min), Some(max)) = (report.mean(), report.min(), report.max()) else {
        println!("No images had recognisable text; nothing to compare.");
        return;
    };
    println!("OCR improvement over {} images", report.scores.len());
    println!("  mean {mean:>8.2}%");
    println!("  min  {min:>8.2}%");
    println!("  max  {max:>8.2}%");
    println!();

    let buckets = report.histogram(20);
    let peak = buckets.iter().map(|b| b.count).max().unwrap_or(0).max(1);
    for b in &buckets {
        let width = b.count * 40 / peak;
        println!(
            "  {:>8.1}% .. {:>8.1}%  {:<40} {}",
            b.lower,
            b.upper,
            "█".repeat(width),
            b.count
        );
    }
}

// ── extract ──────────────────────────────────────────────────────────────────

async fn run_extract(cli: &Cli, args: &ExtractArgs, show_progress: bool) -> Result<()> {
    // Missing credential is the one fatal startup error.
    let key = ApiKey::from_env()?;

    let mut builder = ExtractionConfig::builder()
        .endpoint(&args.endpoint)
        .model(&args.model)
        .max_attempts(args.max_attempts)
        .initial_backoff(Duration::from_secs(args.backoff))
        .max_backoff((args.max_backoff > 0).then(|| Duration::from_secs(args.max_backoff)))
        .pacing(
            Duration::from_secs(args.pacing_min),
            Duration::from_secs(args.pacing_max),
        )
        .request_timeout(Duration::from_secs(args.api_timeout))
        .mime_type(&args.mime_type)
        .output_dir(&args.output);

    if let Some(ref path) = args.prompt_file {
        let prompt = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read prompt from {:?}", path))?;
        builder = builder.prompt(prompt);
    }
    let config = builder.build()?;

    let transport = GeminiTransport::new(key, &config)?;
    let client = ExtractionClient::new(Arc::new(transport), Arc::new(TokioSleeper), config);
    let mut rng = StdRng::from_entropy();

    let progress = progress_for(show_progress, "Extracting");
    let tally = extract_folder(&args.input, &client, &mut rng, progress.as_ref())
        .await
        .context("Extraction failed")?;

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&tally).context("Failed to serialise tally")?
        );
        return Ok(());
    }

    if !cli.quiet {
        println!("{}", tally.summary_line());
        if tally.failed() > 0 {
            println!(
                "  {}",
                dim(&format!(
                    "retries exhausted: {}  no JSON: {}  malformed JSON: {}  other: {}",
                    tally.retries_exhausted, tally.no_json, tally.malformed_json, tally.other
                ))
            );
        }
    }
    Ok(())
}

// ── query ────────────────────────────────────────────────────────────────────

fn run_query(args: &QueryArgs) -> Result<()> {
    let table = load_table(&args.dir).context("Failed to load records")?;

    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    let mut ask = |prompt: &str| -> Result<String> {
        print!("{prompt}");
        io::stdout().flush().ok();
        let line = lines.next().transpose()?.unwrap_or_default();
        Ok(line.trim().to_string())
    };

    let field_name = match &args.field {
        Some(f) => f.trim().to_string(),
        None => {
            println!("Available fields to search: {}", SearchField::names().join(", "));
            ask("Enter the field you want to search (e.g., 'Patient Name'): ")?
        }
    };
    let field: SearchField = match field_name.parse() {
        Ok(f) => f,
        Err(e) => bail!("{e}"),
    };

    let value = match &args.value {
        Some(v) => v.trim().to_string(),
        None => ask(&format!("Enter the value to search for in '{field}': "))?,
    };

    let matches: Vec<&ResultRow> = table.search(field, &value);

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&matches).context("Failed to serialise matches")?
        );
        return Ok(());
    }

    if matches.is_empty() {
        println!("\nNo matching records found.");
    } else {
        println!("\nFound {} matching records:\n", matches.len());
        for row in matches {
            print!("{}", row.render());
            println!("{}", "-".repeat(50));
        }
    }
    Ok(())
}
