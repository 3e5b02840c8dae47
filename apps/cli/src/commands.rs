//! CLI command definitions, routing, and tracing setup.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use color_eyre::eyre::Result;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use tagrail_core::apply::{ApplyStats, apply_mapping};
use tagrail_core::files;
use tagrail_core::inventory::build_inventory;
use tagrail_core::pipeline::{CollectionSummary, PipelineContext, RunOptions};
use tagrail_core::prices::fix_prices;
use tagrail_core::report::ProgressReporter;
use tagrail_core::retry::Retry;
use tagrail_llm::LlmClient;
use tagrail_shared::{
    AppConfig, init_config, load_config, resolve_llm_api_key, resolve_store_endpoint,
};
use tagrail_store::StoreClient;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// tagrail — normalize messy product tags into broad categories.
#[derive(Parser)]
#[command(
    name = "tagrail",
    version,
    about = "Scan, normalize, and rewrite prefix_value tags across record store collections.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Directory for inventory/mapping/progress documents (overrides config).
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Scan collections and build their tag inventories (read-only).
    Extract {
        /// Collection(s) to scan; all collections when omitted.
        #[arg(short, long = "collection")]
        collections: Vec<String>,
    },

    /// Group inventory values into broad categories via the LLM.
    Normalize {
        /// Collection(s) to normalize; all collections when omitted.
        #[arg(short, long = "collection")]
        collections: Vec<String>,

        /// Model to use (overrides config).
        #[arg(short, long)]
        model: Option<String>,
    },

    /// Patch derived ui_tags onto every record from a finalized mapping.
    Apply {
        /// Collection(s) to patch; all collections when omitted.
        #[arg(short, long = "collection")]
        collections: Vec<String>,

        /// Compute and report changes without writing to the store.
        #[arg(long)]
        dry_run: bool,
    },

    /// Run extract, normalize, and apply end to end with resumability.
    Run {
        /// Collection(s) to process; all collections when omitted.
        #[arg(short, long = "collection")]
        collections: Vec<String>,

        /// Model to use (overrides config).
        #[arg(short, long)]
        model: Option<String>,

        /// Compute and report everything without writing to the store.
        #[arg(long)]
        dry_run: bool,

        /// Discard the progress ledger and reprocess every collection.
        #[arg(long)]
        reset: bool,
    },

    /// Convert dollar-denominated price payloads to integer cents.
    FixPrices {
        /// Collection to convert.
        collection: String,

        /// Preview the conversion without writing to the store.
        #[arg(long)]
        dry_run: bool,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "tagrail=info",
        1 => "tagrail=debug",
        _ => "tagrail=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt().with_env_filter(env_filter).with_target(false).init();
        }
        LogFormat::Json => {
            fmt().json().with_env_filter(env_filter).init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let data_dir = cli.data_dir.clone();
    match cli.command {
        Command::Extract { collections } => cmd_extract(&collections, data_dir).await,
        Command::Normalize { collections, model } => {
            cmd_normalize(&collections, model.as_deref(), data_dir).await
        }
        Command::Apply {
            collections,
            dry_run,
        } => cmd_apply(&collections, dry_run, data_dir).await,
        Command::Run {
            collections,
            model,
            dry_run,
            reset,
        } => cmd_run(&collections, model.as_deref(), dry_run, reset, data_dir).await,
        Command::FixPrices {
            collection,
            dry_run,
        } => cmd_fix_prices(&collection, dry_run).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show().await,
        },
    }
}

// ---------------------------------------------------------------------------
// Client construction
// ---------------------------------------------------------------------------

fn make_store(config: &AppConfig) -> Result<StoreClient> {
    let endpoint = resolve_store_endpoint(config)?;
    Ok(StoreClient::new(endpoint.url, endpoint.api_key)?)
}

fn make_llm(config: &AppConfig, model: Option<&str>) -> Result<LlmClient> {
    let api_key = resolve_llm_api_key(config)?;
    let model = model.unwrap_or(&config.llm.default_model).to_string();
    Ok(LlmClient::new(api_key, model, config.llm.max_tokens)?)
}

fn make_retry(config: &AppConfig) -> Retry {
    Retry::from_secs(config.normalize.max_attempts, &config.normalize.backoff_secs)
}

fn resolve_data_dir(config: &AppConfig, data_dir: Option<PathBuf>) -> PathBuf {
    data_dir.unwrap_or_else(|| PathBuf::from(&config.defaults.data_dir))
}

fn make_context(
    config: &AppConfig,
    model: Option<&str>,
    data_dir: Option<PathBuf>,
) -> Result<PipelineContext> {
    Ok(PipelineContext {
        store: make_store(config)?,
        llm: make_llm(config, model)?,
        data_dir: resolve_data_dir(config, data_dir),
        page_size: config.store.page_size,
        max_values_per_chunk: config.normalize.max_values_per_chunk,
        retry: make_retry(config),
    })
}

async fn resolve_collections(store: &StoreClient, requested: &[String]) -> Result<Vec<String>> {
    let available = store.list_collections().await?;
    if requested.is_empty() {
        return Ok(available);
    }
    for name in requested {
        if !available.contains(name) {
            return Err(color_eyre::eyre::eyre!(
                "collection '{name}' not found; available: {}",
                available.join(", ")
            ));
        }
    }
    Ok(requested.to_vec())
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_extract(collections: &[String], data_dir: Option<PathBuf>) -> Result<()> {
    let config = load_config()?;
    let store = make_store(&config)?;
    let data_dir = resolve_data_dir(&config, data_dir);
    let targets = resolve_collections(&store, collections).await?;

    for collection in &targets {
        let reporter = CliProgress::new();
        let inventory =
            build_inventory(&store, collection, config.store.page_size, &reporter).await?;
        let path = files::save_inventory(&data_dir, &inventory)?;
        reporter.finish();

        println!();
        println!("  Inventory for '{collection}'");
        println!("  Records scanned:   {}", inventory.records_scanned);
        println!("  Records with tags: {}", inventory.records_with_tags);
        println!("  Prefixes:          {}", inventory.prefixes.len());
        println!("  Unique values:     {}", inventory.total_values());
        for (prefix, values) in &inventory.prefixes {
            let records: u64 = values.iter().map(|v| v.count).sum();
            println!("    {prefix}: {} value(s) across {records} tag(s)", values.len());
        }
        println!("  Saved to:          {}", path.display());
        println!();
    }

    Ok(())
}

async fn cmd_normalize(
    collections: &[String],
    model: Option<&str>,
    data_dir: Option<PathBuf>,
) -> Result<()> {
    let config = load_config()?;
    let ctx = make_context(&config, model, data_dir)?;
    let targets = ctx.resolve_collections(collections).await?;

    for collection in &targets {
        let reporter = CliProgress::new();
        let (outcome, path) = ctx.run_normalize(collection, &reporter).await?;
        reporter.finish();

        println!();
        println!("  Mapping for '{collection}'");
        println!("  Model:           {}", outcome.mapping.meta.model);
        println!("  Values mapped:   {}", outcome.mapping.meta.total_values);
        println!("  Remapped:        {}", outcome.mapping.meta.total_remapped);
        println!("  LLM requests:    {}", outcome.llm_calls);
        if outcome.fallback_chunks > 0 {
            println!("  Kept as-is:      {} batch(es)", outcome.fallback_chunks);
        }
        println!("  Saved to:        {}", path.display());
        println!();
    }

    Ok(())
}

async fn cmd_apply(
    collections: &[String],
    dry_run: bool,
    data_dir: Option<PathBuf>,
) -> Result<()> {
    let config = load_config()?;
    let store = make_store(&config)?;
    let data_dir = resolve_data_dir(&config, data_dir);
    let retry = make_retry(&config);
    let targets = resolve_collections(&store, collections).await?;

    for collection in &targets {
        let mapping = files::load_mapping(&data_dir, collection)?;
        let reporter = CliProgress::new();
        let stats = apply_mapping(
            &store,
            collection,
            &mapping,
            config.store.page_size,
            &retry,
            dry_run,
            &reporter,
        )
        .await?;
        reporter.finish();
        print_apply_stats(collection, &stats, dry_run);
    }

    Ok(())
}

async fn cmd_run(
    collections: &[String],
    model: Option<&str>,
    dry_run: bool,
    reset: bool,
    data_dir: Option<PathBuf>,
) -> Result<()> {
    let config = load_config()?;
    let ctx = make_context(&config, model, data_dir)?;
    let targets = ctx.resolve_collections(collections).await?;

    info!(
        collections = targets.len(),
        dry_run, reset, "starting full run"
    );

    let reporter = CliProgress::new();
    let summaries = ctx
        .run_full(&targets, RunOptions { dry_run, reset }, &reporter)
        .await?;
    reporter.finish();

    println!();
    if dry_run {
        println!("  DRY RUN — nothing was written");
    }
    for summary in &summaries {
        print_summary(summary, dry_run);
    }
    println!();

    Ok(())
}

fn print_summary(summary: &CollectionSummary, dry_run: bool) {
    if summary.skipped {
        println!("  {} — already complete, skipped", summary.collection);
        return;
    }
    let Some(stats) = &summary.apply else {
        println!("  {} — no tags found", summary.collection);
        return;
    };
    println!(
        "  {} — {} values, {} remapped, {} LLM request(s), {} record(s) {}",
        summary.collection,
        summary.inventory_values,
        summary.remapped,
        summary.llm_calls,
        stats.records_patched,
        if dry_run { "to patch" } else { "patched" },
    );
}

fn print_apply_stats(collection: &str, stats: &ApplyStats, dry_run: bool) {
    println!();
    if dry_run {
        println!("  DRY RUN — nothing was written");
    }
    println!("  Apply pass for '{collection}'");
    println!("  Records scanned:   {}", stats.records_scanned);
    println!(
        "  {}:  {}",
        if dry_run { "Records to patch" } else { "Records patched " },
        stats.records_patched
    );
    println!("  Already current:   {}", stats.records_unchanged);
    println!("  Without tags:      {}", stats.records_without_tags);
    println!();
}

async fn cmd_fix_prices(collection: &str, dry_run: bool) -> Result<()> {
    let config = load_config()?;
    let store = make_store(&config)?;
    let retry = make_retry(&config);

    // Fail early with the available list rather than on the first scroll
    let requested = vec![collection.to_string()];
    resolve_collections(&store, &requested).await?;

    let reporter = CliProgress::new();
    let stats = fix_prices(
        &store,
        collection,
        config.store.page_size,
        &retry,
        dry_run,
        &reporter,
    )
    .await?;
    reporter.finish();

    println!();
    if dry_run {
        println!("  DRY RUN — nothing was written");
    }
    println!("  Price conversion for '{collection}'");
    println!("  Records scanned: {}", stats.records_scanned);
    println!(
        "  {}: {}",
        if dry_run { "Records to patch" } else { "Records patched" },
        stats.records_patched
    );
    if let (Some((blo, bhi)), Some((alo, ahi))) = (stats.before_range, stats.after_range) {
        println!("  Price range (before): ${blo:.2} – ${bhi:.2}");
        println!("  Price range (after):  {alo} – {ahi} cents");
    }
    println!();

    Ok(())
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap()
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }

    fn finish(&self) {
        self.spinner.finish_and_clear();
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn item_progress(&self, current: usize, total: usize, detail: &str) {
        if total > 0 {
            self.spinner
                .set_message(format!("[{current}/{total}] {detail}"));
        } else {
            self.spinner.set_message(detail.to_string());
        }
    }

    fn warning(&self, message: &str) {
        self.spinner.println(format!("  warning: {message}"));
    }
}
