//! Carnyx — HTTP fuzzing campaign engine
//!
//! Headless campaign runner: fuzzes `§name§` payload markers in a request
//! template against wordlists, with pausable rate-limited execution and a
//! JSON campaign report.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use carnyx::config::Config;
use carnyx::fuzzer::{
    markers_in, FuzzEngine, FuzzerHandler, FuzzerProgressListener, FuzzersController,
    MarkerReplacer, PayloadSet, ResultCollector, TraversalStrategy,
};
use carnyx::http::{HttpClient, HttpTaskRunner, Request};

/// HTTP fuzzing campaign engine
#[derive(Parser, Debug)]
#[command(name = "carnyx")]
#[command(author, version, about = "HTTP fuzzing campaign engine", long_about = None)]
struct Cli {
    /// Target URL template; mark payload locations as §name§
    #[arg(required_unless_present = "generate_config")]
    url: Option<String>,

    /// HTTP method
    #[arg(short, long, default_value = "GET")]
    method: String,

    /// Request header as "Name: value" (repeatable)
    #[arg(short = 'H', long = "header")]
    headers: Vec<String>,

    /// Request body; may contain §name§ markers
    #[arg(short, long)]
    body: Option<String>,

    /// Wordlist file or built-in set name, one per marker in template order
    #[arg(short, long = "wordlist")]
    wordlists: Vec<String>,

    /// Configuration file path
    #[arg(short, long, env = "CARNYX_CONFIG")]
    config: Option<String>,

    /// Worker threads (overrides configuration)
    #[arg(long)]
    threads: Option<usize>,

    /// Delay between sends in milliseconds (overrides configuration)
    #[arg(long)]
    delay_ms: Option<u64>,

    /// Maximum task failures before the campaign stops; -1 for unlimited
    #[arg(long)]
    max_errors: Option<i64>,

    /// Payload traversal strategy (depth-first or breadth-first)
    #[arg(long)]
    strategy: Option<String>,

    /// Write the campaign report to this JSON file
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "CARNYX_LOG_LEVEL")]
    log_level: String,

    /// Log file path (enables file logging)
    #[arg(long, env = "CARNYX_LOG_FILE")]
    log_file: Option<String>,

    /// Enable JSON structured logging
    #[arg(long, env = "CARNYX_LOG_JSON")]
    log_json: bool,

    /// Generate default configuration and exit
    #[arg(long)]
    generate_config: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.generate_config {
        return generate_default_config();
    }

    init_logging(&cli)?;

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting Carnyx");

    let config = load_config(&cli)?;
    run_campaign(&cli, &config)
}

/// Initialize the logging system
fn init_logging(cli: &Cli) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let subscriber = tracing_subscriber::registry().with(env_filter);

    if let Some(log_path) = &cli.log_file {
        let path = std::path::Path::new(log_path);
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| std::path::Path::new("."));
        let filename = path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("carnyx.log");
        let file_appender = RollingFileAppender::new(Rotation::DAILY, dir, filename);

        if cli.log_json {
            let file_layer = fmt::layer()
                .json()
                .with_writer(file_appender)
                .with_ansi(false);
            subscriber.with(file_layer).init();
        } else {
            let file_layer = fmt::layer().with_writer(file_appender).with_ansi(false);
            subscriber.with(file_layer).init();
        }
    } else if cli.log_json {
        subscriber.with(fmt::layer().json()).init();
    } else {
        subscriber.with(fmt::layer()).init();
    }

    Ok(())
}

/// Load configuration with CLI overrides
fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = Config::load(cli.config.as_deref())?;

    if let Some(threads) = cli.threads {
        config.fuzzer.threads = threads;
    }
    if let Some(delay) = cli.delay_ms {
        config.fuzzer.send_delay_ms = delay;
    }
    if let Some(max_errors) = cli.max_errors {
        config.fuzzer.max_errors_allowed = if max_errors < 0 {
            None
        } else {
            Some(max_errors as u64)
        };
    }
    if let Some(strategy) = &cli.strategy {
        config.fuzzer.strategy = parse_strategy(strategy)?;
    }

    config.validate()?;
    Ok(config)
}

fn parse_strategy(name: &str) -> Result<TraversalStrategy> {
    match name {
        "depth-first" => Ok(TraversalStrategy::DepthFirst),
        "breadth-first" => Ok(TraversalStrategy::BreadthFirst),
        _ => anyhow::bail!(
            "Unknown traversal strategy '{}', expected depth-first or breadth-first",
            name
        ),
    }
}

/// Generate default configuration file
fn generate_default_config() -> Result<()> {
    let config = Config::default();
    let toml = toml::to_string_pretty(&config).context("Failed to serialize configuration")?;

    println!("{}", toml);
    Ok(())
}

/// Build the template request from CLI arguments
fn build_template(cli: &Cli) -> Result<Request> {
    let url = cli.url.as_deref().context("A target URL is required")?;
    let mut request = Request::new(&cli.method, url);
    request.name = "carnyx campaign".to_string();
    request.body = cli.body.clone();

    for header in &cli.headers {
        let (name, value) = header
            .split_once(':')
            .with_context(|| format!("Invalid header '{}', expected 'Name: value'", header))?;
        request
            .headers
            .insert(name.trim().to_string(), value.trim().to_string());
    }

    Ok(request)
}

/// Pair each template marker with its wordlist or built-in payload set
fn payload_sets(cli: &Cli, markers: &[String]) -> Result<Vec<(String, PayloadSet)>> {
    if markers.is_empty() {
        anyhow::bail!("The request template contains no §name§ payload markers");
    }
    if cli.wordlists.len() != markers.len() {
        anyhow::bail!(
            "{} marker(s) in the template but {} wordlist(s) given",
            markers.len(),
            cli.wordlists.len()
        );
    }

    markers
        .iter()
        .zip(&cli.wordlists)
        .map(|(marker, source)| {
            let set = match PayloadSet::builtin(source) {
                Some(set) => set,
                None => PayloadSet::from_file(marker, std::path::Path::new(source))?,
            };
            Ok((marker.clone(), set))
        })
        .collect()
}

struct CampaignHandler;

impl FuzzerHandler<FuzzEngine<Request>> for CampaignHandler {
    fn scanner_removed(&self, fuzzer: &Arc<FuzzEngine<Request>>) {
        tracing::debug!(scan = ?fuzzer.scan_id(), "Campaign removed from the registry");
    }
}

struct LogProgressListener;

impl FuzzerProgressListener for LogProgressListener {
    fn fuzzer_progress(&self, scan_id: usize, _display_name: &str, done: u64, total: u64) {
        if done == total || done % 50 == 0 {
            tracing::info!(scan = scan_id, done, total, "Campaign progress");
        }
    }

    fn fuzzer_completed(&self, scan_id: usize, display_name: &str, successfully: bool) {
        tracing::info!(
            scan = scan_id,
            name = display_name,
            success = successfully,
            "Campaign completed"
        );
    }
}

/// Run one campaign to completion
fn run_campaign(cli: &Cli, config: &Config) -> Result<()> {
    let template = build_template(cli)?;
    let markers = markers_in(&template);
    let sets = payload_sets(cli, &markers)?;

    let options = config.fuzzer_options();
    let replacer = MarkerReplacer::new(template.clone(), sets, options.strategy);

    let collector = Arc::new(ResultCollector::new(template.url.clone()));
    let client = HttpClient::new(&config.http, options.retries_on_io_error)?;
    let runner = HttpTaskRunner::new(client, Arc::clone(&collector));

    if let Err(e) = runner.capture_baseline(&template) {
        tracing::warn!(error = %e, "Could not capture a baseline response");
    }

    let engine = FuzzEngine::new(
        template.url.clone(),
        options,
        Box::new(replacer),
        Arc::new(runner),
    )?;

    let controller: Arc<FuzzersController<FuzzEngine<Request>>> =
        Arc::new(FuzzersController::new());
    let scan_id = controller.register_scan(Arc::new(CampaignHandler), Arc::new(engine.clone()))?;

    engine.add_error_listener(collector.clone());
    engine.add_progress_listener(Arc::new(LogProgressListener));

    {
        let controller = Arc::clone(&controller);
        ctrlc::set_handler(move || {
            tracing::info!("Interrupt received, stopping all campaigns");
            controller.stop_all_scans();
        })
        .context("Failed to install the interrupt handler")?;
    }

    engine.start_scan()?;

    while !engine.is_stopped() {
        std::thread::sleep(Duration::from_millis(100));
    }

    let report = collector.report();
    tracing::info!(
        scan = scan_id,
        results = report.total_results,
        errors = report.error_count,
        interesting = report.interesting_count,
        "Campaign ended"
    );

    for result in collector.snapshot().interesting_results() {
        tracing::info!(
            task = result.task_id,
            status = result.status_code,
            payloads = ?result.payloads,
            reason = result.interesting_reason.as_deref().unwrap_or(""),
            "Interesting result"
        );
    }

    if let Some(path) = &cli.output {
        collector.write_json(path)?;
    }

    controller.remove_finished_scans();
    Ok(())
}
