mod config;
mod dispatcher;
mod reaper;
mod translator;

use std::future::Future;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use anyhow::Context;
use clap::Parser;
use common::JobStore;
use config::{Config, LoggingConfig};
use dispatcher::{DispatchOutcome, Dispatcher};
use rand::Rng;
use tokio::signal::unix::{signal, SignalKind};
use translator::{CommandTranslator, Translator};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Config file (.yaml, .yml or .toml)
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Node name recorded on claimed jobs
    #[arg(long)]
    node: Option<String>,
    /// Shared store root
    #[arg(long)]
    root: Option<PathBuf>,
    /// Run a single dispatch cycle and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = Config::load(args.config.as_deref())?;
    if let Some(node) = args.node {
        config.node.name = Some(node);
    }
    if let Some(root) = args.root {
        config.store.root = root;
    }

    setup_logging(&config.logging)?;

    let node = config.node_name()?;
    // stamps are UTC on disk; the zone only has to be valid
    config.timezone()?;
    let store = JobStore::open(&config.store.root)
        .with_context(|| format!("Failed to open job store at {:?}", config.store.root))?;

    let translator = CommandTranslator::new(&config.translator);
    match translator.resolve() {
        Some(path) => log::info!("Using translator {}", path.display()),
        None => log::warn!(
            "Translator {:?} not found; jobs will fail until it is installed",
            config.translator.program
        ),
    }

    let dispatcher = Dispatcher::new(store.clone(), node.clone(), translator)
        .with_heartbeat_interval(config.worker.heartbeat_interval())
        .with_translate_timeout(config.worker.translate_timeout());

    log::info!("Starting transq-daemon on node {} (store {:?})", node, store.root());

    if args.once {
        run_cycle(&dispatcher, &store, &config).await;
        return Ok(());
    }

    // Installed before the first cycle so a signal arriving mid-translation is kept.
    let mut sigint = signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;
    let mut sigterm = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    let shutdown = async move {
        tokio::select! {
            _ = sigint.recv() => log::info!("Received SIGINT"),
            _ = sigterm.recv() => log::info!("Received SIGTERM"),
        }
    };

    run_loop(&dispatcher, &store, &config, shutdown).await;
    Ok(())
}

/// Poll until `shutdown` resolves. A cycle already under way is finished first.
async fn run_loop<T: Translator>(
    dispatcher: &Dispatcher<T>,
    store: &JobStore,
    config: &Config,
    shutdown: impl Future<Output = ()>,
) {
    tokio::pin!(shutdown);

    loop {
        run_cycle(dispatcher, store, config).await;

        let jitter = if config.worker.poll_jitter_ms > 0 {
            rand::thread_rng().gen_range(0..=config.worker.poll_jitter_ms)
        } else {
            0
        };
        let wait = Duration::from_millis(config.worker.poll_interval_ms + jitter);

        tokio::select! {
            biased;
            _ = &mut shutdown => {
                log::info!("Shutting down");
                break;
            }
            _ = tokio::time::sleep(wait) => {}
        }
    }
}

/// One reap pass and one dispatch. Errors are logged; the next cycle retries.
async fn run_cycle<T: Translator>(dispatcher: &Dispatcher<T>, store: &JobStore, config: &Config) {
    if config.worker.reap {
        match reaper::reap_expired(store, config.worker.lease_timeout(), SystemTime::now()) {
            Ok(report) if !report.is_empty() => log::info!(
                "Reaper: {} requeued, {} released, {} stale claims removed",
                report.requeued.len(),
                report.released.len(),
                report.orphaned.len()
            ),
            Ok(_) => {}
            Err(e) => log::error!("Reaper failed: {:#}", e),
        }
    }

    match dispatcher.run_once().await {
        Ok(DispatchOutcome::Idle) => log::debug!("No queued jobs"),
        Ok(DispatchOutcome::Discarded(name)) => log::info!("Discarded {}", name),
        Ok(DispatchOutcome::Completed(id)) => {
            log::info!("Job {} completed on {}", id, dispatcher.node())
        }
        Err(e) => log::error!("Dispatch failed: {:#}", e),
    }
}

fn setup_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let level: log::LevelFilter = config
        .level
        .parse()
        .with_context(|| format!("Invalid log level: {}", config.level))?;
    let log_file = std::env::var("TRANSQ_LOG")
        .ok()
        .map(PathBuf::from)
        .or_else(|| config.output.clone());

    let base_config = if config.format == "json" {
        fern::Dispatch::new().format(|out, message, record| {
            out.finish(format_args!(
                "{}",
                serde_json::json!({
                    "ts": chrono::Utc::now().to_rfc3339(),
                    "target": record.target(),
                    "level": record.level().to_string(),
                    "msg": message.to_string(),
                })
            ))
        })
    } else {
        fern::Dispatch::new().format(|out, message, record| {
            out.finish(format_args!(
                "[{}][{}][{}] {}",
                chrono::Local::now().format("%Y-%m-%d][%H:%M:%S"),
                record.target(),
                record.level(),
                message
            ))
        })
    };
    let base_config = base_config.level(level);

    // Main log: everything except translator diagnostics when those have their own file
    let split_jobs = config.jobs_output.is_some();
    let mut main_log = fern::Dispatch::new()
        .filter(move |metadata| !split_jobs || metadata.target() != "job_output")
        .chain(std::io::stdout());
    if let Some(path) = log_file {
        main_log = main_log.chain(fern::log_file(&path)
            .with_context(|| format!("Failed to open log file {:?}", path))?);
    }

    let mut dispatch = base_config.chain(main_log);

    if let Some(path) = &config.jobs_output {
        let jobs_log = fern::Dispatch::new()
            .filter(|metadata| metadata.target() == "job_output")
            .chain(fern::log_file(path)
                .with_context(|| format!("Failed to open jobs log file {:?}", path))?);
        dispatch = dispatch.chain(jobs_log);
    }

    dispatch.apply()?;
    Ok(())
}
