mod probe;
mod render;

use std::io::Read;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context};
use chrono_tz::Tz;
use clap::{Parser, Subcommand, ValueEnum};
use common::{JobId, JobStore};
use probe::NodeProbe;
use render::{Dashboard, NodeHealth};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Shared store root
    #[arg(long, global = true, env = "TRANSQ_ROOT", default_value = common::DEFAULT_SHARE_ROOT)]
    root: PathBuf,
    /// Zone used to display timestamps
    #[arg(long, global = true, env = "TRANSQ_TZ", default_value = common::DEFAULT_TIMEZONE)]
    tz: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Queue a UTF-8 text file for translation
    Submit {
        /// Source language (e.g. en, zh, ja, fr)
        #[arg(short, long)]
        src: String,
        /// Target language
        #[arg(short, long)]
        tgt: String,
        /// File to translate; stdin when omitted or "-"
        file: Option<PathBuf>,
        /// Keep polling until the result is available
        #[arg(long)]
        wait: bool,
        /// Seconds between polls
        #[arg(long, default_value_t = 3)]
        interval: u64,
    },
    /// Show a job's progress or result
    View {
        id: String,
        /// Keep polling until the result is available
        #[arg(long)]
        wait: bool,
        /// Seconds between polls
        #[arg(long, default_value_t = 3)]
        interval: u64,
    },
    /// List all jobs and node usage
    Status {
        #[arg(long, value_enum, default_value_t = Format::Table)]
        format: Format,
        /// Nodes to probe, comma separated
        #[arg(long, value_delimiter = ',', default_value = "computingNode1,computingNode2,computingNode3")]
        nodes: Vec<String>,
        /// Health command; {node} is replaced with the node name. Split on
        /// whitespace with no shell quoting, so `sh -c '...'` does not work;
        /// point it at a script instead
        #[arg(long, default_value = probe::DEFAULT_TEMPLATE)]
        probe: String,
        /// Seconds to wait for each node's health command
        #[arg(long, default_value_t = 5)]
        probe_timeout: u64,
        /// Skip node health probes
        #[arg(long)]
        no_health: bool,
    },
    /// Remove a job that has not been picked up yet
    Delete {
        id: String,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Table,
    Csv,
    Json,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();
    let tz: Tz = common::time::parse_tz(&cli.tz)
        .ok_or_else(|| anyhow::anyhow!("Unknown timezone: {}", cli.tz))?;
    let store = JobStore::open(&cli.root)
        .with_context(|| format!("Failed to open job store at {:?}", cli.root))?;

    match cli.command {
        Commands::Submit { src, tgt, file, wait, interval } => {
            let payload = read_payload(file)?;
            let id = common::submit(&store, &payload, &src, &tgt)?;
            println!("{}", id);
            if wait {
                poll_view(&store, &id, tz, interval).await?;
            }
        }
        Commands::View { id, wait, interval } => {
            let id = JobId::parse(&id)?;
            if wait {
                poll_view(&store, &id, tz, interval).await?;
            } else {
                print!("{}", render::job_view_text(&common::view_job(&store, &id, tz)?, tz));
            }
        }
        Commands::Status { format, nodes, probe, probe_timeout, no_health } => {
            let jobs = common::aggregate(&store, tz)?;
            let nodes = if no_health || matches!(format, Format::Csv) {
                Vec::new()
            } else {
                let probe = NodeProbe::new(&probe).with_timeout(Duration::from_secs(probe_timeout));
                probe_nodes(probe, nodes).await
            };
            let dashboard = Dashboard { jobs, nodes };

            match format {
                Format::Table => print!("{}", render::dashboard_text(&dashboard, tz)),
                Format::Csv => print!("{}", render::jobs_csv(&dashboard.jobs, tz)?),
                Format::Json => println!("{}", serde_json::to_string_pretty(&dashboard)?),
            }
        }
        Commands::Delete { id } => {
            let id = JobId::parse(&id)?;
            if !store.delete_queued(&id)? {
                bail!("Job {} is not queued (already running, finished, or unknown)", id);
            }
            println!("Deleted queued job {}", id);
        }
    }

    Ok(())
}

fn read_payload(file: Option<PathBuf>) -> anyhow::Result<String> {
    let bytes = match file {
        Some(path) if path.as_os_str() != "-" => {
            std::fs::read(&path).with_context(|| format!("Failed to read {:?}", path))?
        }
        _ => {
            let mut buf = Vec::new();
            std::io::stdin().read_to_end(&mut buf)?;
            buf
        }
    };
    String::from_utf8(bytes).context("Input must be UTF-8 text")
}

async fn poll_view(store: &JobStore, id: &JobId, tz: Tz, interval: u64) -> anyhow::Result<()> {
    let mut announced = false;
    loop {
        let view = common::view_job(store, id, tz)?;
        if view.is_complete() {
            print!("{}", render::job_view_text(&view, tz));
            return Ok(());
        }
        if !announced {
            eprintln!("Translation in progress... polling every {}s", interval);
            announced = true;
        }
        tokio::time::sleep(Duration::from_secs(interval.max(1))).await;
    }
}

async fn probe_nodes(probe: NodeProbe, nodes: Vec<String>) -> Vec<NodeHealth> {
    let handles: Vec<_> = nodes
        .into_iter()
        .map(|node| {
            let probe = probe.clone();
            tokio::spawn(async move {
                let usage = probe.probe(&node).await;
                NodeHealth { node, usage }
            })
        })
        .collect();

    let mut health = Vec::new();
    for handle in handles {
        match handle.await {
            Ok(h) => health.push(h),
            Err(e) => log::warn!("Node probe task failed: {}", e),
        }
    }
    health
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_health_timeout_flag() {
        let cli = Cli::try_parse_from(["transq", "status", "--probe-timeout", "2"]).unwrap();
        match cli.command {
            Commands::Status { probe_timeout, .. } => assert_eq!(probe_timeout, 2),
            _ => panic!("expected status"),
        }

        let cli = Cli::try_parse_from(["transq", "status"]).unwrap();
        assert!(matches!(cli.command, Commands::Status { probe_timeout: 5, .. }));
    }
}
