//! CLI for a single-node offset store backed by a local log file

use anyhow::Context;
use bytes::Bytes;
use clap::{Parser, Subcommand};
use offsetkv::common::{decode_key, encode_key, parse_duration};
use offsetkv::log::FileLogFactory;
use offsetkv::{OffsetStore, StoreConfig};
use std::future::Future;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line spelling of the absent key
const ABSENT_KEY: &str = "-";

#[derive(Parser)]
#[command(name = "offsetkv")]
#[command(about = "Log-backed offset store CLI")]
#[command(version)]
struct Cli {
    /// Config file (TOML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log file (overrides the config file)
    #[arg(long)]
    log: Option<PathBuf>,

    /// Give up waiting for the log after this long (e.g. 500ms, 10s)
    #[arg(long, default_value = "30s")]
    timeout: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Read keys (percent-encoded; "-" is the absent key)
    Get {
        #[arg(required = true)]
        keys: Vec<String>,
    },

    /// Write KEY=VALUE pairs (percent-encoded)
    Set {
        #[arg(required = true)]
        entries: Vec<String>,
    },

    /// Write tombstones for keys
    Delete {
        #[arg(required = true)]
        keys: Vec<String>,
    },

    /// Show what the store replayed from the log
    Stats,
}

fn parse_key(raw: &str) -> Option<Bytes> {
    if raw == ABSENT_KEY {
        None
    } else {
        Some(decode_key(raw))
    }
}

fn display_key(key: &Option<Bytes>) -> String {
    match key {
        Some(key) => encode_key(key),
        None => ABSENT_KEY.to_string(),
    }
}

fn parse_entry(raw: &str) -> anyhow::Result<(Option<Bytes>, Option<Bytes>)> {
    let (key, value) = raw
        .split_once('=')
        .with_context(|| format!("expected KEY=VALUE, got {:?}", raw))?;
    Ok((parse_key(key), Some(decode_key(value))))
}

async fn with_timeout<T>(
    timeout: std::time::Duration,
    fut: impl Future<Output = offsetkv::Result<T>>,
) -> anyhow::Result<T> {
    let result = tokio::time::timeout(timeout, fut)
        .await
        .with_context(|| format!("timed out after {:?}", timeout))?;
    Ok(result?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = StoreConfig::load(cli.config.as_deref())?;
    if let Some(log) = cli.log {
        config.log_path = log;
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.as_str().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let timeout = parse_duration(&cli.timeout)?;
    let store = OffsetStore::new(FileLogFactory::new(&config.log_path, config.sync_policy));
    store.configure(&config)?;
    store.start()?;

    let outcome = run(&store, cli.command, timeout).await;
    store.stop()?;
    outcome
}

async fn run(
    store: &OffsetStore,
    command: Commands,
    timeout: std::time::Duration,
) -> anyhow::Result<()> {
    match command {
        Commands::Get { keys } => {
            let keys: Vec<Option<Bytes>> = keys.iter().map(|k| parse_key(k)).collect();
            let offsets = with_timeout(timeout, store.get(keys.clone())).await?;

            let mut out = serde_json::Map::new();
            for key in &keys {
                let value = offsets
                    .get(key)
                    .cloned()
                    .flatten()
                    .map(|v| serde_json::Value::String(encode_key(&v)))
                    .unwrap_or(serde_json::Value::Null);
                out.insert(display_key(key), value);
            }
            println!("{}", serde_json::to_string_pretty(&out)?);
        }

        Commands::Set { entries } => {
            let entries = entries
                .iter()
                .map(|e| parse_entry(e))
                .collect::<anyhow::Result<Vec<_>>>()?;
            let count = entries.len();
            with_timeout(timeout, store.set(entries, |_| {})).await?;
            println!("Wrote {} records", count);
        }

        Commands::Delete { keys } => {
            let entries: Vec<_> = keys.iter().map(|k| (parse_key(k), None)).collect();
            let count = entries.len();
            with_timeout(timeout, store.set(entries, |_| {})).await?;
            println!("Wrote {} tombstones", count);
        }

        Commands::Stats => {
            let stats = store.snapshot_stats();
            let positions: serde_json::Map<String, serde_json::Value> = stats
                .positions
                .iter()
                .map(|(partition, offset)| (partition.to_string(), (*offset).into()))
                .collect();
            let out = serde_json::json!({
                "log": store.settings().map(|s| s.topic.name),
                "keys": stats.keys,
                "records": stats.applied,
                "positions": positions,
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
    }

    Ok(())
}
