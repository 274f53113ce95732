use aci_collector::archive::next_free_path;
use aci_collector::collector::{aggregate, collect_fabrics, first_error, FabricOutcome, FabricStatus};
use aci_collector::config::{Config, FabricConfig, FabricTarget};
use aci_collector::VERSION;
use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::Level;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;

const DEFAULT_OUTPUT: &str = "aci-vetr-data.zip";
const LOG_FILE: &str = "collector.log";

/// ACI vetR collector
#[derive(Parser, Debug)]
#[command(name = "aci-collector", version = VERSION, about, long_about = None)]
struct Args {
    /// APIC hostname or IP address
    #[arg(short, long)]
    apic: Option<String>,

    /// APIC username
    #[arg(short, long)]
    username: Option<String>,

    /// APIC password
    #[arg(short, long)]
    password: Option<String>,

    /// Output file (the aggregate archive when several fabrics are collected)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// YAML file listing the fabrics to collect
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Times to retry a failed request
    #[arg(long)]
    request_retry_count: Option<u32>,

    /// Seconds to wait before retry
    #[arg(long)]
    retry_delay: Option<u64>,

    /// Max requests to send in parallel
    #[arg(long)]
    batch_size: Option<usize>,

    /// Objects per page when a result is too big
    #[arg(long)]
    page_size: Option<u64>,

    /// Collect a single class instead of the built-in catalog
    #[arg(long)]
    class: Option<String>,

    /// Query parameter for --class, as key=value (repeatable)
    #[arg(long, value_parser = parse_key_val)]
    query: Vec<(String, String)>,

    /// Do not fall back to pagination for oversized results
    #[arg(long)]
    no_paginate: bool,

    /// Print debug output to the console
    #[arg(short, long)]
    verbose: bool,

    /// Log level for the log file
    #[arg(long, value_enum, default_value = "debug")]
    log_level: LogLevel,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn to_tracing_level(self) -> Level {
        match self {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("invalid key=value: no `=` found in `{}`", s))?;
    if key.is_empty() {
        return Err(format!("invalid key=value: empty key in `{}`", s));
    }
    Ok((key.to_string(), value.to_string()))
}

/// Everything goes to the log file; the console gets INFO and up (DEBUG when verbose).
fn setup_logging(
    log_level: LogLevel,
    verbose: bool,
) -> Result<tracing_appender::non_blocking::WorkerGuard> {
    let file_level = log_level.to_tracing_level();
    let console_level = if verbose { Level::DEBUG } else { Level::INFO };

    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(LOG_FILE)
        .with_context(|| format!("Failed to open log file {}", LOG_FILE))?;

    let (non_blocking, guard) = tracing_appender::non_blocking(file);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = file_level.max(console_level).as_str().to_lowercase();
        EnvFilter::new(format!("aci_collector={}", level))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(
            non_blocking
                .with_max_level(file_level)
                .and(std::io::stderr.with_max_level(console_level)),
        )
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(false)
        .init();

    tracing::info!("aci-collector {} started", VERSION);
    tracing::debug!("Log file: {}", LOG_FILE);

    Ok(guard)
}

/// Read the config file, or build a one-fabric config from the command line.
/// Command line values win over the file.
fn load_config(args: &Args) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => {
            let Some(apic) = args.apic.clone() else {
                bail!("No APIC given. Use --apic or --config");
            };
            Config {
                fabrics: vec![FabricConfig {
                    url: Some(apic),
                    output: Some(aggregate_output(args)),
                    ..FabricConfig::default()
                }],
                ..Config::default()
            }
        }
    };

    let global = &mut config.global;
    if args.username.is_some() {
        global.username = args.username.clone();
    }
    if args.password.is_some() {
        global.password = args.password.clone();
    }
    if let Some(count) = args.request_retry_count {
        global.request_retry_count = count;
    }
    if let Some(delay) = args.retry_delay {
        global.retry_delay = delay;
    }
    if let Some(size) = args.batch_size {
        global.batch_size = size;
    }
    if let Some(size) = args.page_size {
        global.page_size = size;
    }
    if args.no_paginate {
        global.paginate = false;
    }
    if args.verbose {
        global.verbose = true;
    }
    if let Some(class) = &args.class {
        global.class = class.clone();
        global.query = args.query.iter().cloned().collect::<BTreeMap<_, _>>();
    }

    Ok(config)
}

fn aggregate_output(args: &Args) -> PathBuf {
    args.output.clone().unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT))
}

/// Fabrics to collect and, when there is more than one, the aggregate archive
#[derive(Debug)]
struct RunPlan {
    targets: Vec<FabricTarget>,
    aggregate: Option<PathBuf>,
}

/// Resolve the fabrics and pick output paths. Every path is checked against
/// the disk and against the paths already handed out, so no two archives of
/// this run share a file.
fn plan_run(config: &Config, aggregate: &Path) -> Result<RunPlan> {
    let mut targets = config.resolve().context("Invalid configuration")?;

    let mut reserved = HashSet::new();
    for target in &mut targets {
        target.output = next_free_path(&target.output, &reserved);
        reserved.insert(target.output.clone());
    }

    let aggregate = (targets.len() > 1).then(|| next_free_path(aggregate, &reserved));
    Ok(RunPlan { targets, aggregate })
}

/// Merge the fabric archives into `dest`. Errors are logged here and returned;
/// the caller still prints the summary.
fn write_aggregate(outcomes: &[FabricOutcome], dest: &Path) -> Result<PathBuf> {
    match aggregate(outcomes, dest) {
        Ok(_) => Ok(dest.to_path_buf()),
        Err(err) => {
            tracing::error!(output = %dest.display(), "aggregation failed: {}", err);
            Err(err).with_context(|| format!("Failed to write aggregate archive {}", dest.display()))
        }
    }
}

fn summary_lines(outcomes: &[FabricOutcome], aggregate_path: Option<&Path>) -> Vec<String> {
    let rule = "=".repeat(30);
    let mut lines = vec![rule.clone(), "Collection summary".to_string(), rule];

    for outcome in outcomes {
        lines.push(match &outcome.status {
            FabricStatus::Complete => format!(
                "{}: complete, {} resources -> {}",
                outcome.name,
                outcome.collected,
                outcome.output.display()
            ),
            FabricStatus::Partial { failed, .. } => format!(
                "{}: partial, {} resources, {} failed -> {}",
                outcome.name,
                outcome.collected,
                failed,
                outcome.output.display()
            ),
            FabricStatus::Failed(err) => format!("{}: failed: {}", outcome.name, err),
        });
    }

    if let Some(path) = aggregate_path {
        lines.push(format!("Aggregate archive: {}", path.display()));
    }
    lines
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Loaded first: the file may turn on verbose console output
    let config = load_config(&args)?;
    let _log_guard = setup_logging(args.log_level, config.global.verbose)?;

    let plan = plan_run(&config, &aggregate_output(&args))?;
    tracing::info!("Collecting from {} fabric(s)", plan.targets.len());

    let outcomes = collect_fabrics(&plan.targets).await;

    let aggregated = plan
        .aggregate
        .as_deref()
        .map(|dest| write_aggregate(&outcomes, dest));
    let aggregate_path = match &aggregated {
        Some(Ok(path)) => Some(path.as_path()),
        _ => None,
    };

    for line in summary_lines(&outcomes, aggregate_path) {
        println!("{}", line);
    }

    if let Some(err) = first_error(&outcomes) {
        tracing::warn!("Some data could not be fetched. First error: {}", err);
    }

    if let Some(Err(err)) = aggregated {
        return Err(err);
    }

    let failed = outcomes.iter().filter(|o| !o.has_output()).count();
    if failed > 0 {
        bail!("{} of {} fabric(s) failed", failed, outcomes.len());
    }

    Ok(())
}
