//! CLI binary for edgequake-pdf2qa.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `ExtractionConfig`, handles the resume prompt and prints results.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_pdf2qa::checkpoint::CheckpointStore;
use edgequake_pdf2qa::pipeline::input::is_url;
use edgequake_pdf2qa::{
    extract_document, ExtractionConfig, ExtractionProgressCallback, ProgressCallback, ResumePolicy,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, BufRead, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

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

/// Terminal progress callback: one bar for pages, then one for items.
struct CliProgressCallback {
    bar: ProgressBar,
    /// Wall-clock start of the page currently being read.
    page_started: Mutex<Option<Instant>>,
    errors: AtomicUsize,
    rewritten: AtomicUsize,
}

impl CliProgressCallback {
    fn new_dynamic() -> Arc<Self> {
        let bar = ProgressBar::new(0); // length set in on_extraction_start

        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);

        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Opening PDF…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            page_started: Mutex::new(None),
            errors: AtomicUsize::new(0),
            rewritten: AtomicUsize::new(0),
        })
    }

    fn activate_bar(&self, prefix: &str, unit: &str, total: usize, done: usize) {
        let style = ProgressStyle::with_template(&format!(
            "{{spinner:.cyan}} {{prefix:.bold}}  \
             [{{bar:42.green/238}}] {{pos:>3}}/{{len}} {unit}  \
             ⏱ {{elapsed_precise}}  ETA {{eta_precise}}"
        ))
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total as u64);
        self.bar.set_position(done as u64);
        self.bar.set_style(style);
        self.bar.set_prefix(prefix.to_string());
        self.bar.reset_eta();
    }

    fn page_elapsed_secs(&self) -> f64 {
        self.page_started
            .lock()
            .ok()
            .and_then(|mut t| t.take())
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl ExtractionProgressCallback for CliProgressCallback {
    fn on_extraction_start(&self, total_pages: usize, start_page: usize) {
        let done = start_page.saturating_sub(1);
        self.activate_bar("Extracting", "pages", total_pages, done);
        let headline = if done > 0 {
            format!("Resuming at page {start_page} of {total_pages}…")
        } else {
            format!("Starting extraction of {total_pages} pages…")
        };
        self.bar.println(format!("{} {}", cyan("◆"), bold(&headline)));
    }

    fn on_page_start(&self, page_num: usize, _total: usize) {
        if let Ok(mut t) = self.page_started.lock() {
            *t = Some(Instant::now());
        }
        self.bar.set_message(format!("page {page_num}"));
    }

    fn on_page_complete(&self, page_num: usize, total: usize, questions: usize) {
        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {:<14}  {}",
            green("✓"),
            page_num,
            total,
            dim(&format!("{questions:>3} questions")),
            dim(&format!("{:.1}s", self.page_elapsed_secs())),
        ));
        self.bar.inc(1);
    }

    fn on_page_error(&self, page_num: usize, total: usize, error: &str) {
        self.errors.fetch_add(1, Ordering::SeqCst);

        let msg = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };

        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {}  {}",
            red("✗"),
            page_num,
            total,
            red(&msg),
            dim(&format!("{:.1}s", self.page_elapsed_secs())),
        ));
        self.bar.inc(1);
    }

    fn on_resolution_start(&self, total_items: usize) {
        self.activate_bar("Resolving ", "items", total_items, 0);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Resolving references in {total_items} items…"))
        ));
    }

    fn on_item_resolved(&self, _index: usize, _total: usize, item_id: &str, changed: bool) {
        if changed {
            self.rewritten.fetch_add(1, Ordering::SeqCst);
            self.bar
                .println(format!("  {} {}  {}", green("↻"), item_id, dim("rewritten")));
        }
        self.bar.set_message(item_id.to_string());
        self.bar.inc(1);
    }

    fn on_extraction_complete(&self, total_items: usize, failed_pages: usize) {
        self.bar.finish_and_clear();
        let rewritten = self.rewritten.load(Ordering::SeqCst);

        if failed_pages == 0 {
            eprintln!(
                "{} {} items extracted  ({} rewritten)",
                green("✔"),
                bold(&total_items.to_string()),
                rewritten
            );
        } else {
            eprintln!(
                "{} {} items extracted  ({} pages failed)",
                cyan("⚠"),
                bold(&total_items.to_string()),
                red(&failed_pages.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Extract into ./output (extracted_qas.json + resolution_results.json)
  pdf2qa book.pdf -o output

  # Use a specific model
  pdf2qa --model gpt-4.1 --provider openai book.pdf -o output

  # Extract from a URL
  pdf2qa https://example.org/solutions.pdf -o output

  # Skip the cross-reference pass (one model call per page only)
  pdf2qa --no-resolve book.pdf -o output

  # See how far an interrupted run got, then start over
  pdf2qa --show-checkpoint book.pdf -o output
  pdf2qa --force-restart book.pdf -o output

CHECKPOINTS:
  After every page the run state is saved to <output>/.checkpoint.json.
  Re-running the same command resumes at the first unread page; on a
  terminal you are asked first. --resume skips the question,
  --force-restart discards the checkpoint. The file is removed once both
  output files are written.

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  PDFIUM_LIB_PATH         Path to libpdfium (file or directory)
"#;

/// Extract self-contained question/answer pairs from PDFs using Vision LLMs.
#[derive(Parser, Debug)]
#[command(
    name = "pdf2qa",
    version,
    about = "Extract self-contained question/answer pairs from PDFs using Vision LLMs",
    long_about = "Read a scanned exercise or worked-solution book page by page with a Vision \
Language Model, stitch answers split across page breaks, and rewrite items that point at other \
items so each one stands alone. Supports OpenAI, Anthropic, Google Gemini, Azure OpenAI, and \
any OpenAI-compatible endpoint (Ollama, vLLM, LiteLLM, etc.).",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local PDF file path or HTTP/HTTPS URL.
    input: String,

    /// Directory for extracted_qas.json, resolution_results.json and the checkpoint.
    #[arg(short, long, env = "PDF2QA_OUTPUT", default_value = "output")]
    output: PathBuf,

    /// LLM model ID (e.g. gpt-4.1-mini, gpt-4.1, claude-sonnet-4-20250514).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(
        long,
        env = "EDGEQUAKE_PROVIDER",
        long_help = "LLM provider. Auto-detected from API key env vars if not set.\n\
          Supported: openai, anthropic, gemini, azure, ollama, or any OpenAI-compatible URL."
    )]
    provider: Option<String>,

    /// Rendering DPI (72–400).
    #[arg(long, env = "PDF2QA_DPI", default_value_t = 150,
          value_parser = clap::value_parser!(u32).range(72..=400))]
    dpi: u32,

    /// Skip cross-reference detection and rewriting.
    #[arg(long, env = "PDF2QA_NO_RESOLVE")]
    no_resolve: bool,

    /// Do not write or read a checkpoint.
    #[arg(long, env = "PDF2QA_NO_CHECKPOINT")]
    no_checkpoint: bool,

    /// Discard any existing checkpoint and start from page 1.
    #[arg(long, conflicts_with = "resume")]
    force_restart: bool,

    /// Resume from an existing checkpoint without asking.
    #[arg(long)]
    resume: bool,

    /// Print the checkpoint summary for the output directory and exit.
    #[arg(long)]
    show_checkpoint: bool,

    /// Abort on the first failed page instead of recording it empty.
    #[arg(long, env = "PDF2QA_FAIL_FAST")]
    fail_fast: bool,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "PDF2QA_PASSWORD")]
    password: Option<String>,

    /// Path to a text file replacing the built-in extraction prompt.
    #[arg(long, env = "PDF2QA_EXTRACTION_PROMPT")]
    extraction_prompt: Option<PathBuf>,

    /// Max LLM output tokens per call.
    #[arg(long, env = "PDF2QA_MAX_TOKENS", default_value_t = 8192)]
    max_tokens: usize,

    /// LLM temperature (0.0–2.0).
    #[arg(long, env = "PDF2QA_TEMPERATURE", default_value_t = 0.1)]
    temperature: f32,

    /// Retries per model call on transient failure.
    #[arg(long, env = "PDF2QA_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,

    /// Print run statistics as JSON on stdout.
    #[arg(long, env = "PDF2QA_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "PDF2QA_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "PDF2QA_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "PDF2QA_QUIET")]
    quiet: bool,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "PDF2QA_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Per-call LLM timeout in seconds.
    #[arg(long, env = "PDF2QA_API_TIMEOUT", default_value_t = 120)]
    api_timeout: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // Suppress INFO-level library logs when the progress bar is active.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
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

    let store = CheckpointStore::in_dir(&cli.output);

    // ── Checkpoint inspection ────────────────────────────────────────────
    if cli.show_checkpoint {
        match store.summarize().context("Failed to read checkpoint")? {
            Some(summary) => println!("{summary}"),
            None => println!("No checkpoint in {}", cli.output.display()),
        }
        return Ok(());
    }

    let resume = if cli.no_checkpoint {
        ResumePolicy::Restart
    } else {
        choose_resume_policy(&cli, &store)?
    };

    // ── Build config ─────────────────────────────────────────────────────
    let progress_cb: Option<ProgressCallback> = if show_progress {
        let cb = CliProgressCallback::new_dynamic();
        Some(cb as Arc<dyn ExtractionProgressCallback>)
    } else {
        None
    };

    let config = build_config(&cli, resume, progress_cb).await?;

    // ── Run extraction ───────────────────────────────────────────────────
    let output = extract_document(&cli.input, &cli.output, &config)
        .await
        .context("Extraction failed")?;

    if cli.json {
        let json =
            serde_json::to_string_pretty(&output.stats).context("Failed to serialise stats")?;
        println!("{json}");
    }

    if !cli.quiet {
        let stats = &output.stats;
        eprintln!(
            "{}  {} items from {}/{} pages  {}ms  →  {}",
            if stats.failed_pages.is_empty() {
                green("✔")
            } else {
                cyan("⚠")
            },
            stats.total_items,
            stats.processed_pages + stats.resumed_pages,
            stats.total_pages,
            stats.total_duration_ms,
            bold(&cli.output.display().to_string()),
        );
        eprintln!(
            "   stitched {}  /  resolved {}  /  unresolved {}  /  leftover refs {}",
            stats.stitch.merged,
            stats.references_resolved,
            stats.references_unresolved,
            stats.remaining_references,
        );
        eprintln!(
            "   {} calls  /  {} tokens in  /  {} tokens out",
            dim(&stats.total_calls.to_string()),
            dim(&stats.total_input_tokens.to_string()),
            dim(&stats.total_output_tokens.to_string()),
        );
        for failure in &stats.failed_pages {
            eprintln!("   {} {}", red("✗"), failure);
        }
    }

    Ok(())
}

/// Decide between resuming and restarting from flags, the checkpoint on
/// disk and, on a terminal, the user's answer.
fn choose_resume_policy(cli: &Cli, store: &CheckpointStore) -> Result<ResumePolicy> {
    if cli.force_restart {
        return Ok(ResumePolicy::Restart);
    }
    if cli.resume || !store.exists() || !io::stdin().is_terminal() {
        return Ok(ResumePolicy::Resume);
    }

    let record = match store.load() {
        Ok(Some(record)) => record,
        Ok(None) => return Ok(ResumePolicy::Resume),
        // Let the run report the corrupt checkpoint with its restart hint.
        Err(_) => return Ok(ResumePolicy::Resume),
    };
    if record.source_path != source_id(&cli.input) {
        return Ok(ResumePolicy::Resume);
    }

    if let Some(summary) = store.summarize().ok().flatten() {
        eprintln!("{} Found checkpoint\n{}", cyan("◆"), summary);
    }
    eprint!("Resume? [Y/n] ");
    io::stderr().flush().ok();

    let mut answer = String::new();
    io::stdin()
        .lock()
        .read_line(&mut answer)
        .context("Failed to read answer")?;

    Ok(match answer.trim().to_lowercase().as_str() {
        "n" | "no" => ResumePolicy::Restart,
        _ => ResumePolicy::Resume,
    })
}

/// Identity the library records for `input`: the URL as given or the
/// absolute path.
fn source_id(input: &str) -> String {
    if is_url(input) {
        return input.to_string();
    }
    std::fs::canonicalize(Path::new(input))
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_else(|_| input.to_string())
}

/// Map CLI args to `ExtractionConfig`.
async fn build_config(
    cli: &Cli,
    resume: ResumePolicy,
    progress: Option<ProgressCallback>,
) -> Result<ExtractionConfig> {
    let mut builder = ExtractionConfig::builder()
        .dpi(cli.dpi)
        .max_tokens(cli.max_tokens)
        .temperature(cli.temperature)
        .max_retries(cli.max_retries)
        .resolve_references(!cli.no_resolve)
        .enable_checkpoints(!cli.no_checkpoint)
        .skip_failed_pages(!cli.fail_fast)
        .resume(resume)
        .download_timeout_secs(cli.download_timeout)
        .api_timeout_secs(cli.api_timeout);

    if let Some(ref path) = cli.extraction_prompt {
        let prompt = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read extraction prompt from {:?}", path))?;
        builder = builder.extraction_prompt(prompt);
    }
    if let Some(ref model) = cli.model {
        builder = builder.model(model.clone());
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider.clone());
    }
    if let Some(ref password) = cli.password {
        builder = builder.password(password.clone());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}
