//! Read-only admin query surface.
//!
//! Line-delimited JSON over TCP: the client sends one command per line
//! (`status`, `knowledge`, `decisions`) and gets one JSON line back.
//! Everything served here is eventually consistent - counters and
//! snapshots, never live session internals.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use polyglot_gossip::GossipStats;

use crate::agent::DecisionAgent;
use crate::balance::Balancer;
use crate::error::NodeError;

/// Shared read handles the admin surface serves from
pub struct AdminContext {
    /// Decision agent (store snapshot + decision log)
    pub agent: Arc<DecisionAgent>,
    /// Load balancer (counters + gauges)
    pub balancer: Arc<Balancer>,
    /// Gossip counters, absent when gossip is disabled
    pub gossip: Option<Arc<GossipStats>>,
    /// Node start time
    pub started: Instant,
}

/// Running admin listener
pub struct AdminServer {
    addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl AdminServer {
    /// Bind `addr` and start serving
    pub async fn spawn(addr: &str, ctx: AdminContext) -> Result<Self, NodeError> {
        let listener = TcpListener::bind(addr).await?;
        let addr = listener.local_addr()?;
        let (shutdown, shutdown_rx) = watch::channel(false);
        tracing::info!(%addr, "admin surface listening");
        let task = tokio::spawn(accept_loop(listener, Arc::new(ctx), shutdown_rx));
        Ok(Self {
            addr,
            shutdown,
            task,
        })
    }

    /// Actual bound address (useful with port 0)
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop accepting and tear the listener down
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
    }
}

async fn accept_loop(
    listener: TcpListener,
    ctx: Arc<AdminContext>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let stream = tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => stream,
                Err(e) => {
                    tracing::warn!(error = %e, "admin accept failed");
                    continue;
                }
            },
            _ = shutdown.changed() => break,
        };
        let ctx = Arc::clone(&ctx);
        tokio::spawn(async move {
            if let Err(e) = serve_connection(stream, &ctx).await {
                tracing::debug!(error = %e, "admin connection ended");
            }
        });
    }
    tracing::debug!("admin listener stopped");
}

async fn serve_connection(stream: TcpStream, ctx: &AdminContext) -> std::io::Result<()> {
    let (read, mut write) = stream.into_split();
    let mut lines = BufReader::new(read).lines();
    while let Some(line) = lines.next_line().await? {
        let reply = respond(line.trim(), ctx);
        let mut body = serde_json::to_vec(&reply)?;
        body.push(b'\n');
        write.write_all(&body).await?;
    }
    Ok(())
}

fn respond(command: &str, ctx: &AdminContext) -> serde_json::Value {
    match command {
        "status" => {
            let balance = ctx.balancer.snapshot();
            serde_json::json!({
                "running": true,
                "uptime_secs": ctx.started.elapsed().as_secs(),
                "node_id": ctx.agent.store().node_id().to_string(),
                "known_fingerprints": ctx.agent.store().len(),
                "sessions": balance,
                "gossip": ctx.gossip.as_ref().map(|g| g.snapshot()),
            })
        }
        "knowledge" => {
            let records = ctx.agent.store().snapshot();
            serde_json::json!({ "records": records })
        }
        "decisions" => {
            serde_json::json!({ "decisions": ctx.agent.recent_decisions() })
        }
        other => {
            serde_json::json!({ "error": format!("unknown command: {other}") })
        }
    }
}
