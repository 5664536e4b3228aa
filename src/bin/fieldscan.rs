//! CLI binary for fieldscan.
//!
//! A thin shim over the library crate: field templates are JSON files, every
//! other flag maps onto `BatchConfig`.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use fieldscan::pipeline::input;
use fieldscan::{
    project, Batch, BatchConfig, BatchConfigBuilder, BatchProgressCallback, BatchSummary,
    BoundingBox, FieldRegistry, FileStatus, GeometryEngine, GoogleSheetsSink, PointerPosition,
    ProgressCallback, RestPersister, ScannedFile, SpreadsheetSync, SpreadsheetTarget, SyncStatus,
};
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::json;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
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

/// Live progress bar plus one log line per settled file.
///
/// Files run one at a time, so a file has settled once an update for the
/// next index (or the batch end) arrives; its last snapshot is logged then.
struct CliProgressCallback {
    bar: ProgressBar,
    last: Mutex<Option<(usize, ScannedFile)>>,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(TICKS),
        );
        bar.set_prefix("Preparing");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self {
            bar,
            last: Mutex::new(None),
        })
    }

    fn flush_settled(&self) {
        if let Some((_, file)) = self.last.lock().unwrap().take() {
            self.log_line(&file);
            self.bar.inc(1);
        }
    }

    fn log_line(&self, file: &ScannedFile) {
        let sync = |label: &str, s: &SyncStatus| match s {
            SyncStatus::Synced => format!("  {}", dim(&format!("{label} ✓"))),
            SyncStatus::Failed { reason } => format!("  {}", red(&format!("{label} ✗ {reason}"))),
            _ => String::new(),
        };
        let line = match file.status() {
            FileStatus::Completed { data } => format!(
                "  {} {:<32} {}{}{}",
                green("✓"),
                file.name(),
                dim(&format!("{} fields", data.len())),
                sync("store", file.sync_status()),
                sync("sheet", file.sheet_status()),
            ),
            FileStatus::Error { message } => {
                // Truncate very long error messages to keep output tidy.
                let msg = if message.chars().count() > 80 {
                    format!("{}\u{2026}", message.chars().take(79).collect::<String>())
                } else {
                    message.clone()
                };
                format!("  {} {:<32} {}", red("✗"), file.name(), red(&msg))
            }
            _ => return,
        };
        self.bar.println(line);
    }
}

impl BatchProgressCallback for CliProgressCallback {
    fn on_batch_start(&self, total_files: usize) {
        self.bar.set_length(total_files as u64);
        self.bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.cyan} {prefix:.bold}  \
                 [{bar:42.green/238}] {pos:>3}/{len} files  \
                 ⏱ {elapsed_precise}  {msg}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▉▊▋▌▍▎▏  ")
            .tick_strings(TICKS),
        );
        self.bar.set_prefix("Extracting");
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Processing {total_files} files…"))
        ));
    }

    fn on_file_update(&self, index: usize, _total: usize, file: &ScannedFile) {
        let next_file = matches!(*self.last.lock().unwrap(), Some((i, _)) if i != index);
        if next_file {
            self.flush_settled();
        }
        *self.last.lock().unwrap() = Some((index, file.clone()));
        self.bar
            .set_message(format!("{} {}", file.name(), dim(file.status().label())));
    }

    fn on_file_skipped(&self, _index: usize, _total: usize, file: &ScannedFile) {
        self.flush_settled();
        self.bar.println(format!(
            "  {} {:<32} {}",
            dim("·"),
            file.name(),
            dim("already done")
        ));
        self.bar.inc(1);
    }

    fn on_batch_complete(&self, _summary: &BatchSummary) {
        self.flush_settled();
        self.bar.finish_and_clear();
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Draw two fields on an 800x1000 preview, then name them
  fieldscan draw --fields invoice.json --container 800x1000 --from 560,40 --to 760,80 --name "Invoice Number"
  fieldscan draw --fields invoice.json --container 800x1000 --from 560,800 --to 760,840 --name Total

  # Or let the model propose fields from a sample document
  fieldscan detect sample.png -o invoice.json --hints "Supplier invoices, EUR"

  # Extract every scan, store results, append rows to a Google Sheet
  fieldscan run scans/*.png --fields invoice.json \
      --persist-url https://docs.example.com/api/records \
      --sheet-id 1AbC... --sheet-range 'Invoices!A1' --sheet-token "$GOOGLE_TOKEN"

  # Machine-readable output
  fieldscan run scan-01.png --fields invoice.json --json > results.json

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY           OpenAI API key
  ANTHROPIC_API_KEY        Anthropic API key
  GEMINI_API_KEY           Google Gemini API key
  FIELDSCAN_LLM_PROVIDER   Override provider (openai, anthropic, gemini, ollama)
  FIELDSCAN_MODEL          Override model ID
  FIELDSCAN_PERSIST_URL    Document store endpoint
  FIELDSCAN_SHEET_TOKEN    OAuth bearer token for Google Sheets
"#;

/// Extract named fields from scanned documents using Vision LLMs.
#[derive(Parser, Debug)]
#[command(
    name = "fieldscan",
    version,
    about = "Extract named fields from scanned documents using Vision LLMs",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "FIELDSCAN_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "FIELDSCAN_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Extract the fields of a template from one or more documents.
    Run(RunArgs),
    /// Propose a field template from a sample document.
    Detect {
        /// Sample document (path or URL).
        file: String,

        /// Where to write the proposed template.
        #[arg(short, long)]
        output: PathBuf,

        /// Free-text notes for the model.
        #[arg(long, env = "FIELDSCAN_HINTS")]
        hints: Option<String>,

        #[command(flatten)]
        llm: LlmArgs,
    },
    /// Add a field to a template by dragging over a preview of a given size.
    Draw {
        /// Template to add to (created if missing).
        #[arg(long)]
        fields: PathBuf,

        /// Preview size in pixels, e.g. 800x1000.
        #[arg(long, value_parser = parse_size)]
        container: (f64, f64),

        /// Drag start, in preview pixels, e.g. 560,40.
        #[arg(long, value_parser = parse_point)]
        from: (f64, f64),

        /// Drag end, in preview pixels.
        #[arg(long, value_parser = parse_point)]
        to: (f64, f64),

        /// Name for the new field (default: "Field N").
        #[arg(long)]
        name: Option<String>,
    },
    /// Inspect or edit a field template.
    Fields {
        #[command(subcommand)]
        action: FieldsAction,
    },
}

#[derive(Subcommand, Debug)]
enum FieldsAction {
    /// List the fields of a template.
    List {
        fields: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Rename a field.
    Rename {
        fields: PathBuf,
        name: String,
        new_name: String,
    },
    /// Delete a field.
    Delete { fields: PathBuf, name: String },
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Documents to process (paths or URLs), in order.
    #[arg(required = true)]
    files: Vec<String>,

    /// Field template (JSON) to extract.
    #[arg(long, env = "FIELDSCAN_FIELDS")]
    fields: PathBuf,

    /// Free-text notes passed to the model with every document.
    #[arg(long, env = "FIELDSCAN_HINTS")]
    hints: Option<String>,

    /// Path to a text file containing a custom extraction system prompt.
    #[arg(long, env = "FIELDSCAN_SYSTEM_PROMPT")]
    system_prompt: Option<PathBuf>,

    #[command(flatten)]
    llm: LlmArgs,

    /// Document store endpoint; each completed file is POSTed there.
    #[arg(long, env = "FIELDSCAN_PERSIST_URL")]
    persist_url: Option<String>,

    /// Bearer key for the document store.
    #[arg(long, env = "FIELDSCAN_PERSIST_KEY")]
    persist_key: Option<String>,

    /// Google Sheets spreadsheet id; enables row appends.
    #[arg(long, env = "FIELDSCAN_SHEET_ID")]
    sheet_id: Option<String>,

    /// A1 range rows are appended to.
    #[arg(long, env = "FIELDSCAN_SHEET_RANGE", default_value = "Sheet1!A1")]
    sheet_range: String,

    /// OAuth bearer token for the Sheets API.
    #[arg(long, env = "FIELDSCAN_SHEET_TOKEN")]
    sheet_token: Option<String>,

    /// Print results as JSON instead of a table.
    #[arg(long, env = "FIELDSCAN_JSON")]
    json: bool,

    /// Also write the JSON results to this file.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Disable progress bar.
    #[arg(long, env = "FIELDSCAN_NO_PROGRESS")]
    no_progress: bool,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "FIELDSCAN_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,
}

/// Model and preview settings shared by `run` and `detect`.
#[derive(Args, Debug)]
struct LlmArgs {
    /// LLM model ID (e.g. gpt-4.1-nano, gpt-4.1, claude-sonnet-4-20250514).
    #[arg(long, env = "FIELDSCAN_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "FIELDSCAN_PROVIDER")]
    provider: Option<String>,

    /// Longest preview edge sent to the model, in pixels.
    #[arg(long, env = "FIELDSCAN_MAX_PIXELS", default_value_t = 2000)]
    max_pixels: u32,

    /// Max LLM output tokens per document.
    #[arg(long, env = "FIELDSCAN_MAX_TOKENS", default_value_t = 2048)]
    max_tokens: usize,

    /// LLM temperature (0.0–2.0).
    #[arg(long, env = "FIELDSCAN_TEMPERATURE", default_value_t = 0.0)]
    temperature: f32,

    /// Per-call timeout in seconds (model, store and sheet calls).
    #[arg(long, env = "FIELDSCAN_API_TIMEOUT", default_value_t = 60)]
    api_timeout: u64,
}

impl LlmArgs {
    fn builder(&self) -> BatchConfigBuilder {
        let mut b = BatchConfig::builder()
            .max_preview_pixels(self.max_pixels)
            .max_tokens(self.max_tokens)
            .temperature(self.temperature)
            .api_timeout_secs(self.api_timeout);
        if let Some(ref m) = self.model {
            b = b.model(m);
        }
        if let Some(ref p) = self.provider {
            b = b.provider_name(p);
        }
        b
    }
}

fn parse_size(s: &str) -> Result<(f64, f64), String> {
    let (w, h) = s
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got '{s}'"))?;
    let w = w.trim().parse().map_err(|_| format!("bad width '{w}'"))?;
    let h = h.trim().parse().map_err(|_| format!("bad height '{h}'"))?;
    Ok((w, h))
}

fn parse_point(s: &str) -> Result<(f64, f64), String> {
    let (x, y) = s
        .split_once(',')
        .ok_or_else(|| format!("expected X,Y, got '{s}'"))?;
    let x = x.trim().parse().map_err(|_| format!("bad x '{x}'"))?;
    let y = y.trim().parse().map_err(|_| format!("bad y '{y}'"))?;
    Ok((x, y))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar gives all the feedback that matters during `run`, so
    // INFO logs are suppressed while it is visible.
    let show_progress = match cli.command {
        Command::Run(ref args) => !cli.quiet && !args.no_progress && !args.json,
        _ => false,
    };
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

    match cli.command {
        Command::Run(args) => run(args, show_progress, cli.quiet).await,
        Command::Detect {
            file,
            output,
            hints,
            llm,
        } => detect(&file, &output, hints, &llm, cli.quiet).await,
        Command::Draw {
            fields,
            container,
            from,
            to,
            name,
        } => draw(&fields, container, from, to, name.as_deref()).await,
        Command::Fields { action } => match action {
            FieldsAction::List { fields, json } => list_fields(&fields, json).await,
            FieldsAction::Rename {
                fields,
                name,
                new_name,
            } => rename_field(&fields, &name, &new_name).await,
            FieldsAction::Delete { fields, name } => delete_field(&fields, &name).await,
        },
    }
}

// ── run ─────────────────────────────────────────────────────────────────────

async fn run(args: RunArgs, show_progress: bool, quiet: bool) -> Result<()> {
    let registry = FieldRegistry::load(&args.fields)
        .await
        .context("Failed to load field template")?;
    let mut batch = Batch::with_registry(registry);
    if let Some(ref hints) = args.hints {
        batch.set_ai_hints(hints);
    }

    let files = input::load_files(&args.files, args.llm.max_pixels, args.download_timeout)
        .await
        .context("Failed to load documents")?;
    batch.enqueue(files);

    let progress: Option<ProgressCallback> =
        show_progress.then(|| CliProgressCallback::new() as ProgressCallback);
    let config = build_config(&args, progress).await?;

    let summary = batch.process(&config).await.context("Batch failed")?;
    let table = project(batch.queue(), batch.registry());

    let results = json!({
        "batch_id": batch.id(),
        "summary": summary,
        "files": batch.queue(),
        "table": table,
    });
    if let Some(ref path) = args.output {
        let text = serde_json::to_string_pretty(&results).context("Failed to serialise results")?;
        tokio::fs::write(path, text)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
    }

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&results).context("Failed to serialise results")?
        );
    } else {
        println!("file\t{}", table.columns.join("\t"));
        for row in &table.rows {
            println!("{}\t{}", row.file_name, row.cells.join("\t"));
        }
    }

    if !quiet {
        print_summary(&summary, &config);
    }
    Ok(())
}

/// Map CLI args to `BatchConfig`.
async fn build_config(args: &RunArgs, progress: Option<ProgressCallback>) -> Result<BatchConfig> {
    let mut builder = args.llm.builder();

    if let Some(ref path) = args.system_prompt {
        let prompt = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read system prompt from {:?}", path))?;
        builder = builder.system_prompt(prompt);
    }

    if let Some(ref url) = args.persist_url {
        let persister = RestPersister::new(url, args.persist_key.clone(), args.llm.api_timeout)
            .context("Failed to set up document store client")?;
        builder = builder.persister(Arc::new(persister));
    }

    if let Some(ref id) = args.sheet_id {
        let Some(ref token) = args.sheet_token else {
            bail!("--sheet-id needs --sheet-token (or FIELDSCAN_SHEET_TOKEN)");
        };
        let sink = GoogleSheetsSink::new(args.llm.api_timeout)
            .context("Failed to set up Sheets client")?;
        builder = builder.spreadsheet(SpreadsheetSync::new(
            Arc::new(sink),
            SpreadsheetTarget::new(id, &args.sheet_range),
            token,
        ));
    }

    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

fn print_summary(summary: &BatchSummary, config: &BatchConfig) {
    let processed = summary.completed + summary.failed;
    eprintln!(
        "{}  {}/{} extracted  {} skipped  {}ms",
        if summary.failed == 0 {
            green("✔")
        } else if summary.completed == 0 && processed > 0 {
            red("✘")
        } else {
            cyan("⚠")
        },
        summary.completed,
        processed,
        summary.skipped,
        summary.duration_ms,
    );
    if config.has_store() {
        eprintln!(
            "   store: {} synced  /  {} failed",
            dim(&summary.synced.to_string()),
            dim(&summary.sync_failed.to_string()),
        );
    }
    if config.has_spreadsheet() {
        eprintln!(
            "   sheet: {} appended  /  {} failed",
            dim(&summary.sheet_appended.to_string()),
            dim(&summary.sheet_failed.to_string()),
        );
    }
}

// ── detect ──────────────────────────────────────────────────────────────────

async fn detect(
    file: &str,
    output: &Path,
    hints: Option<String>,
    llm: &LlmArgs,
    quiet: bool,
) -> Result<()> {
    let config = llm.builder().build().context("Invalid configuration")?;

    let sample = input::load_file(file, llm.max_pixels, config.api_timeout_secs)
        .await
        .context("Failed to load sample document")?;
    let mut batch = Batch::new();
    if let Some(h) = hints {
        batch.set_ai_hints(h);
    }
    batch.enqueue([sample]);

    let added = batch
        .seed_regions_with(&config)
        .await
        .context("Field detection failed")?;
    if added == 0 {
        bail!("The model proposed no usable fields for '{file}'");
    }
    batch
        .registry()
        .save(output)
        .await
        .context("Failed to save field template")?;

    if !quiet {
        for region in batch.registry().iter() {
            eprintln!("  {} {}", green("+"), region.name());
        }
        eprintln!(
            "{} {} fields → {}",
            green("✔"),
            added,
            bold(&output.display().to_string())
        );
    }
    Ok(())
}

// ── draw / fields ───────────────────────────────────────────────────────────

async fn load_or_new(path: &Path) -> Result<FieldRegistry> {
    if tokio::fs::try_exists(path).await.unwrap_or(false) {
        FieldRegistry::load(path)
            .await
            .context("Failed to load field template")
    } else {
        Ok(FieldRegistry::new())
    }
}

async fn draw(
    path: &Path,
    container: (f64, f64),
    from: (f64, f64),
    to: (f64, f64),
    name: Option<&str>,
) -> Result<()> {
    let mut registry = load_or_new(path).await?;
    let bounds = BoundingBox::sized(container.0, container.1)?;

    let mut engine = GeometryEngine::new();
    engine.begin_drag(bounds, PointerPosition::new(from.0, from.1));
    let Some(id) = engine.commit_drag(PointerPosition::new(to.0, to.1), &mut registry) else {
        bail!("Drag too small: both sides must exceed 1% of the preview");
    };
    if let Some(name) = name {
        registry.rename(id, name)?;
    }

    registry
        .save(path)
        .await
        .context("Failed to save field template")?;
    if let Some(region) = registry.get(id) {
        let r = region.rect();
        eprintln!(
            "{} {}  x={:.1}% y={:.1}% w={:.1}% h={:.1}%",
            green("+"),
            bold(region.name()),
            r.x,
            r.y,
            r.width,
            r.height
        );
    }
    Ok(())
}

async fn list_fields(path: &Path, json: bool) -> Result<()> {
    let registry = FieldRegistry::load(path)
        .await
        .context("Failed to load field template")?;
    if json {
        println!("{}", serde_json::to_string_pretty(&registry)?);
        return Ok(());
    }
    for (i, region) in registry.iter().enumerate() {
        let r = region.rect();
        println!(
            "{:>3}  {:<28} x={:>5.1}% y={:>5.1}% w={:>5.1}% h={:>5.1}%",
            i + 1,
            region.name(),
            r.x,
            r.y,
            r.width,
            r.height
        );
    }
    Ok(())
}

async fn rename_field(path: &Path, name: &str, new_name: &str) -> Result<()> {
    let mut registry = FieldRegistry::load(path)
        .await
        .context("Failed to load field template")?;
    let id = registry
        .find_by_name(name)
        .map(|r| r.id())
        .with_context(|| format!("No field named '{name}'"))?;
    registry.rename(id, new_name)?;
    registry.save(path).await?;
    eprintln!("{} '{}' → '{}'", green("✔"), name, new_name.trim());
    Ok(())
}

async fn delete_field(path: &Path, name: &str) -> Result<()> {
    let mut registry = FieldRegistry::load(path)
        .await
        .context("Failed to load field template")?;
    let id = registry
        .find_by_name(name)
        .map(|r| r.id())
        .with_context(|| format!("No field named '{name}'"))?;
    registry.delete(id)?;
    registry.save(path).await?;
    eprintln!("{} deleted '{}'", green("✔"), name);
    Ok(())
}
