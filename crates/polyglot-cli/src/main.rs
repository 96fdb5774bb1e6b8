//! `polyglot` - adaptive protocol translation gateway CLI.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing_subscriber::EnvFilter;

use polyglot_core::StrategyTag;
use polyglot_node::{JsonlStore, MemoryStore, Node, NodeConfig, OutcomeStore};

#[derive(Parser)]
#[command(name = "polyglot", version, about = "Adaptive protocol translation gateway")]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the gateway node
    Daemon {
        /// Directory for outcome and knowledge files
        #[arg(long, default_value = "./polyglot-data")]
        data_dir: PathBuf,
    },
    /// Translate one hex payload and print the result as hex
    Translate {
        /// Force a strategy (mqtt, http, ledger, record, passthrough)
        /// instead of deciding from the payload
        #[arg(long)]
        target: Option<String>,
        /// Payload bytes as hex
        payload: String,
    },
    /// Query a running node's admin socket
    Status {
        /// Admin socket address
        #[arg(long, default_value = "127.0.0.1:7070")]
        addr: String,
        /// Query to send (status, knowledge, decisions)
        #[arg(long, default_value = "status")]
        query: String,
    },
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn load_config(path: Option<&PathBuf>) -> Result<NodeConfig> {
    let Some(path) = path else {
        return Ok(NodeConfig::default());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    toml::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
}

fn parse_target(name: &str) -> Result<StrategyTag> {
    Ok(match name.to_ascii_lowercase().as_str() {
        "mqtt" | "http-to-mqtt" => StrategyTag::HttpToMqtt,
        "http" | "mqtt-to-http" => StrategyTag::MqttToHttp,
        "ledger" | "http-to-ledger" => StrategyTag::HttpToLedger,
        "record" | "tcp-to-record" => StrategyTag::TcpToRecord,
        "passthrough" => StrategyTag::Passthrough,
        other => bail!("unknown target '{other}' (mqtt, http, ledger, record, passthrough)"),
    })
}

async fn run_daemon(config: NodeConfig, data_dir: PathBuf) -> Result<()> {
    let store = Arc::new(JsonlStore::open(&data_dir).context("opening data directory")?);
    let (node, mut outputs) = Node::start(config, store as Arc<dyn OutcomeStore>)
        .await
        .context("starting node")?;

    // Without a downstream consumer wired in, converted messages are
    // logged and dropped
    let drain = tokio::spawn(async move {
        while let Some(out) = outputs.recv().await {
            tracing::debug!(session = %out.session, bytes = out.payload.len(), "converted");
        }
    });

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    tracing::info!("shutting down");
    node.shutdown().await;
    drain.abort();
    Ok(())
}

async fn run_translate(payload_hex: &str, target: Option<&str>) -> Result<()> {
    let payload = hex::decode(payload_hex.trim()).context("payload must be hex")?;
    let target = target.map(parse_target).transpose()?;

    let mut config = NodeConfig::default();
    config.gossip.enabled = false;
    config.node.admin_addr = String::new();

    let (node, _outputs) = Node::start(config, Arc::new(MemoryStore::new()) as Arc<dyn OutcomeStore>)
        .await
        .context("starting one-shot node")?;
    let result = node.translate(&payload, target);
    node.shutdown().await;

    match result {
        Ok(out) => {
            println!("{}", hex::encode(out));
            Ok(())
        }
        Err(e) => bail!("translation failed: {e}"),
    }
}

async fn run_status(addr: &str, query: &str) -> Result<()> {
    let stream = TcpStream::connect(addr)
        .await
        .with_context(|| format!("connecting to admin socket {addr}"))?;
    let (read, mut write) = stream.into_split();
    write.write_all(format!("{query}\n").as_bytes()).await?;

    let mut lines = BufReader::new(read).lines();
    let Some(line) = lines.next_line().await? else {
        bail!("admin socket closed without answering");
    };
    // Re-encode pretty for humans
    let value: serde_json::Value = serde_json::from_str(&line).context("parsing admin reply")?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let config = load_config(cli.config.as_ref())?;

    match cli.command {
        Command::Daemon { data_dir } => run_daemon(config, data_dir).await,
        Command::Translate { target, payload } => {
            run_translate(&payload, target.as_deref()).await
        }
        Command::Status { addr, query } => run_status(&addr, &query).await,
    }
}
