//! CLI command definitions, routing, and tracing setup.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use prospector_client::{
    HttpTransport, ImportOptions, LogNotifier, TaskController, TaskSnapshot, TaskState,
    import_file,
};
use prospector_registry::{EntityResolver, Resolver};
use prospector_shared::{
    AppConfig, Cnpj, ControllerConfig, FilterSet, PipelineConfig, ResolvedEntity, SizeBand,
    cache_db_path, init_config, load_config,
};
use prospector_storage::Storage;
use tracing::info;
use url::Url;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// Prospector: find active businesses by segment and region.
#[derive(Parser)]
#[command(
    name = "prospector",
    version,
    about = "Discover and enrich business leads from public company registries.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

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
    /// Run the discovery server.
    Serve {
        /// Address to listen on (overrides `server.listen_addr`).
        #[arg(long)]
        listen: Option<String>,
    },

    /// Run a discovery against a server and print the matches.
    Discover {
        /// Industry segment, e.g. "Restaurantes".
        #[arg(short, long)]
        segment: String,

        /// Two-letter state code, e.g. SP.
        #[arg(short, long)]
        region: String,

        /// Restrict to one municipality.
        #[arg(short, long)]
        city: Option<String>,

        /// Accepted size bands: mei, micro, small, other (repeatable).
        #[arg(long = "size", value_parser = parse_size_band)]
        sizes: Vec<SizeBand>,

        /// Number of matches to find.
        #[arg(short, long)]
        limit: Option<usize>,

        /// Ignore results cached from an identical earlier run.
        #[arg(long)]
        fresh: bool,

        /// Server URL (overrides `client.server_url`).
        #[arg(long, env = "PROSPECTOR_SERVER")]
        server: Option<String>,

        /// Print matches as JSON instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Resolve one CNPJ through the local cache and registry providers.
    Lookup {
        /// CNPJ, formatted or bare digits.
        cnpj: String,
    },

    /// Look up every CNPJ in a delimited text file and keep the active ones.
    Import {
        /// CSV/TSV file (spreadsheets exported as delimited text).
        file: PathBuf,

        /// Server URL (overrides `client.server_url`).
        #[arg(long, env = "PROSPECTOR_SERVER")]
        server: Option<String>,

        /// Print the report as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Resolution cache maintenance.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Cache subcommands.
#[derive(Subcommand)]
pub(crate) enum CacheAction {
    /// Show entry counts and hit totals.
    Stats,
    /// Delete expired entries.
    Purge,
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

fn parse_size_band(raw: &str) -> std::result::Result<SizeBand, String> {
    SizeBand::parse_label(raw)
        .ok_or_else(|| format!("unknown size band '{raw}': expected mei, micro, small or other"))
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "prospector=info",
        1 => "prospector=debug",
        _ => "prospector=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Serve { listen } => cmd_serve(listen).await,
        Command::Discover {
            segment,
            region,
            city,
            sizes,
            limit,
            fresh,
            server,
            json,
        } => {
            let config = load_config()?;
            let limit = limit.unwrap_or_else(|| PipelineConfig::from(&config).default_limit);
            let filters = FilterSet {
                segment,
                region,
                city,
                size_bands: sizes,
                limit,
            };
            cmd_discover(&config, filters, fresh, server, json).await
        }
        Command::Lookup { cnpj } => cmd_lookup(&cnpj).await,
        Command::Import { file, server, json } => cmd_import(file, server, json).await,
        Command::Cache { action } => match action {
            CacheAction::Stats => cmd_cache_stats().await,
            CacheAction::Purge => cmd_cache_purge().await,
        },
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show().await,
        },
    }
}

/// `--server` flag, else `client.server_url`, checked to be an http(s) URL.
fn server_url(config: &AppConfig, flag: Option<String>) -> Result<String> {
    let raw = flag.unwrap_or_else(|| config.client.server_url.clone());
    let parsed = Url::parse(&raw).map_err(|e| eyre!("invalid server URL '{raw}': {e}"))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(eyre!("invalid server URL '{raw}': expected http or https"));
    }
    Ok(raw)
}

// ---------------------------------------------------------------------------
// serve
// ---------------------------------------------------------------------------

async fn cmd_serve(listen: Option<String>) -> Result<()> {
    let config = load_config()?;
    let addr = listen.unwrap_or_else(|| config.server.listen_addr.clone());
    println!("Prospector server on http://{addr} (Ctrl-C to stop)");
    prospector_server::serve(&config, &addr).await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// discover
// ---------------------------------------------------------------------------

async fn cmd_discover(
    config: &AppConfig,
    filters: FilterSet,
    fresh: bool,
    server: Option<String>,
    json: bool,
) -> Result<()> {
    let mut controller_config = ControllerConfig::from(config);
    controller_config.server_url = server_url(config, server)?;

    let controller = TaskController::from_config(&controller_config, Arc::new(LogNotifier))?;
    let mut updates = controller.subscribe();
    controller.attach();

    info!(
        segment = %filters.segment,
        region = %filters.region,
        limit = filters.limit,
        server = %controller_config.server_url,
        "starting discovery"
    );
    controller.start(filters, fresh)?;

    let view = RunView::new();
    let last = loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break None;
                }
                let snapshot = updates.borrow_and_update().clone();
                if let Some(snapshot) = snapshot {
                    view.render(&snapshot);
                    if snapshot.state.is_terminal() {
                        break Some(snapshot);
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => controller.cancel(),
        }
    };
    view.finish();
    controller.detach();

    let Some(snapshot) = last else {
        return Err(eyre!("discovery ended without a result"));
    };
    match snapshot.state {
        TaskState::Completed => {
            if json {
                println!("{}", serde_json::to_string_pretty(&snapshot.matches)?);
            } else {
                print_matches(&snapshot);
            }
            Ok(())
        }
        TaskState::Cancelled => {
            println!("  Cancelled after {} matches.", snapshot.matches.len());
            Ok(())
        }
        _ => Err(eyre!(
            "discovery failed: {}",
            snapshot.error.as_deref().unwrap_or("unknown error")
        )),
    }
}

/// Spinner while searching, then a bar over the candidate pool.
struct RunView {
    bar: ProgressBar,
}

impl RunView {
    fn new() -> Self {
        let bar = ProgressBar::new_spinner();
        bar.set_style(spinner_style());
        bar.enable_steady_tick(Duration::from_millis(80));
        Self { bar }
    }

    fn render(&self, s: &TaskSnapshot) {
        match s.state {
            TaskState::Searching => {
                if s.progress.total_queries > 0 {
                    self.bar.set_message(format!(
                        "Searching [{}/{}] {} candidates",
                        s.progress.queries_completed, s.progress.total_queries, s.total_candidates
                    ));
                } else if let Some(message) = &s.status_message {
                    self.bar.set_message(message.clone());
                }
            }
            TaskState::Processing => {
                if self.bar.length() != Some(s.total_candidates as u64) {
                    self.bar.set_length(s.total_candidates as u64);
                    self.bar.set_style(bar_style());
                }
                self.bar.set_position(s.progress.processed as u64);
                self.bar.set_message(format!(
                    "{}/{} matched, {} cached",
                    s.progress.matched, s.filters.limit, s.progress.cache_hits
                ));
            }
            _ => {}
        }
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

fn spinner_style() -> ProgressStyle {
    ProgressStyle::with_template("{spinner:.cyan} {msg}")
        .expect("valid spinner template")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"])
}

fn bar_style() -> ProgressStyle {
    ProgressStyle::with_template("{spinner:.cyan} [{bar:30.cyan/blue}] {pos}/{len} {msg}")
        .expect("valid bar template")
        .progress_chars("=> ")
}

fn print_matches(s: &TaskSnapshot) {
    println!();
    for entity in &s.matches {
        print_entity(entity);
    }
    let p = &s.progress;
    println!();
    println!(
        "  Matches:   {} of {} requested{}",
        s.matches.len(),
        s.filters.limit,
        if s.from_cache { " (cached)" } else { "" }
    );
    println!("  Processed: {} of {} candidates", p.processed, s.total_candidates);
    println!(
        "  Rejected:  {} inactive, {} out of scope, {} unresolved",
        p.rejected_inactive, p.rejected_out_of_scope, p.unresolved
    );
    if let Some(stats) = &s.stats {
        println!("  Time:      {:.1}s", stats.elapsed_ms as f64 / 1000.0);
    }
    println!();
}

fn print_entity(e: &ResolvedEntity) {
    let name = e.trade_name.as_deref().unwrap_or(&e.legal_name);
    println!(
        "  {}  {:<40}  {}/{}  {}",
        e.cnpj.formatted(),
        name,
        e.municipality,
        e.region,
        e.size_band
    );
    let contacts: Vec<&str> = [e.contacts.phone.as_deref(), e.contacts.email.as_deref()]
        .into_iter()
        .flatten()
        .collect();
    if !contacts.is_empty() {
        println!("                      {}", contacts.join("  "));
    }
}

// ---------------------------------------------------------------------------
// lookup
// ---------------------------------------------------------------------------

async fn cmd_lookup(raw: &str) -> Result<()> {
    let cnpj = Cnpj::parse(raw).ok_or_else(|| eyre!("invalid CNPJ '{raw}'"))?;
    let config = load_config()?;
    let storage = Arc::new(Storage::open(&cache_db_path(&config)?).await?);
    let resolver = Resolver::from_config(&config, storage)?;

    match resolver.resolve(&cnpj).await {
        Some(resolution) => {
            println!("{}", serde_json::to_string_pretty(&resolution)?);
            Ok(())
        }
        None => Err(eyre!("{} not found by any registry provider", cnpj.formatted())),
    }
}

// ---------------------------------------------------------------------------
// import
// ---------------------------------------------------------------------------

async fn cmd_import(file: PathBuf, server: Option<String>, json: bool) -> Result<()> {
    let config = load_config()?;
    let transport = HttpTransport::new(&server_url(&config, server)?)?;
    let options = ImportOptions::from(&config);

    info!(file = %file.display(), max = options.max_candidates, "importing");
    let bar = ProgressBar::new(0);
    bar.set_style(bar_style());
    let report = import_file(&file, &transport, &options, |done, total| {
        bar.set_length(total as u64);
        bar.set_position(done as u64);
    })
    .await?;
    bar.finish_and_clear();

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!();
    for entity in &report.imported {
        print_entity(entity);
    }
    println!();
    println!("  Imported:  {}", report.imported.len());
    println!("  Inactive:  {}", report.inactive);
    println!("  Not found: {}", report.not_found);
    if report.failed > 0 {
        println!("  Failed:    {}", report.failed);
    }
    if report.dropped_over_cap > 0 {
        println!(
            "  Skipped:   {} (only the first {} identifiers are imported)",
            report.dropped_over_cap, options.max_candidates
        );
    }
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// cache
// ---------------------------------------------------------------------------

async fn cmd_cache_stats() -> Result<()> {
    let config = load_config()?;
    let path = cache_db_path(&config)?;
    if !path.exists() {
        println!("No cache at {}", path.display());
        return Ok(());
    }
    let storage = Storage::open_readonly(&path).await?;
    let stats = storage.cache_stats(Utc::now()).await?;

    println!();
    println!("  Cache:    {}", path.display());
    println!("  Entries:  {} ({} fresh, {} expired)", stats.total, stats.fresh, stats.expired);
    println!("  Status:   {} active, {} inactive", stats.active, stats.inactive);
    println!("  Hits:     {}", stats.total_hits);
    println!();
    Ok(())
}

async fn cmd_cache_purge() -> Result<()> {
    let config = load_config()?;
    let storage = Storage::open(&cache_db_path(&config)?).await?;
    let removed = storage.purge_expired_cache(Utc::now()).await?;
    println!("Removed {removed} expired entries");
    Ok(())
}

// ---------------------------------------------------------------------------
// config
// ---------------------------------------------------------------------------

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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_band_flag_accepts_aliases() {
        assert_eq!(parse_size_band("EPP"), Ok(SizeBand::Small));
        assert_eq!(parse_size_band("me"), Ok(SizeBand::Micro));
        assert_eq!(parse_size_band(" mei "), Ok(SizeBand::Mei));
        assert_eq!(parse_size_band("MICRO EMPRESA"), Ok(SizeBand::Micro));
        assert_eq!(parse_size_band("Demais"), Ok(SizeBand::Other));
        assert!(parse_size_band("huge").is_err());
    }

    #[test]
    fn discover_flags_parse() {
        let cli = Cli::try_parse_from([
            "prospector", "discover", "-s", "Restaurantes", "-r", "SP", "--city", "Campinas",
            "--size", "micro", "--size", "epp", "--limit", "10", "--fresh",
        ])
        .unwrap();
        match cli.command {
            Command::Discover {
                segment,
                sizes,
                limit,
                fresh,
                ..
            } => {
                assert_eq!(segment, "Restaurantes");
                assert_eq!(sizes, vec![SizeBand::Micro, SizeBand::Small]);
                assert_eq!(limit, Some(10));
                assert!(fresh);
            }
            _ => panic!("expected discover"),
        }
    }

    #[test]
    fn server_url_must_be_http() {
        let config = AppConfig::default();
        assert!(server_url(&config, None).is_ok());
        assert!(server_url(&config, Some("ftp://example.com".into())).is_err());
        assert!(server_url(&config, Some("not a url".into())).is_err());
    }
}
