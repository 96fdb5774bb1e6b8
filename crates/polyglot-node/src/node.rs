//! Node orchestration.
//!
//! A [`Node`] wires the shared pieces together once at startup - strategy
//! store, decision agent, load balancer, gossip tasks, admin listener -
//! and hands them to each other explicitly. There are no globals; drop
//! the node (after [`Node::shutdown`]) and everything is gone.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;

use polyglot_core::{
    Fingerprint, FlowId, ProtocolId, RawFrame, Session, SessionId, StrategyStore,
    StrategyTag, TransportKind,
};
use polyglot_gossip::{GossipHandle, GossipTransport};

use crate::admin::{AdminContext, AdminServer};
use crate::agent::DecisionAgent;
use crate::balance::{Balancer, Translated};
use crate::config::NodeConfig;
use crate::error::NodeError;
use crate::storage::OutcomeStore;

/// Buffered converted messages before `ingest` backpressure kicks in
const OUTPUT_BACKLOG: usize = 1024;

/// One running polyglot node
pub struct Node {
    config: NodeConfig,
    store: Arc<StrategyStore>,
    agent: Arc<DecisionAgent>,
    balancer: Arc<Balancer>,
    outcomes: Arc<dyn OutcomeStore>,
    gossip: Option<GossipHandle>,
    admin: Option<AdminServer>,
    sync_seq: std::sync::atomic::AtomicU64,
}

impl Node {
    /// Build and start a node; converted messages arrive on the returned
    /// receiver
    pub async fn start(
        config: NodeConfig,
        outcomes: Arc<dyn OutcomeStore>,
    ) -> Result<(Self, mpsc::Receiver<Translated>), NodeError> {
        let node_id = config.node_id()?;
        let store = Arc::new(StrategyStore::new(node_id, config.store_config()));
        let agent = Arc::new(DecisionAgent::new(
            Arc::clone(&store),
            Arc::clone(&outcomes),
        ));
        agent.seed();

        let (out_tx, out_rx) = mpsc::channel(OUTPUT_BACKLOG);
        let balancer = Balancer::spawn(config.balance_config(), Arc::clone(&agent), out_tx);

        let gossip = if config.gossip.enabled {
            Some(GossipTransport::spawn(
                Arc::clone(&store),
                config.gossip_config(),
            )?)
        } else {
            None
        };

        let admin = if config.node.admin_addr.is_empty() {
            None
        } else {
            let ctx = AdminContext {
                agent: Arc::clone(&agent),
                balancer: Arc::clone(&balancer),
                gossip: gossip.as_ref().map(|g| g.stats()),
                started: Instant::now(),
            };
            Some(AdminServer::spawn(&config.node.admin_addr, ctx).await?)
        };

        tracing::info!(node = %node_id, workers = config.node.workers, "node started");
        Ok((
            Self {
                config,
                store,
                agent,
                balancer,
                outcomes,
                gossip,
                admin,
                sync_seq: std::sync::atomic::AtomicU64::new(1),
            },
            out_rx,
        ))
    }

    /// Shared strategy store
    pub fn store(&self) -> &Arc<StrategyStore> {
        &self.store
    }

    /// Load balancer (counters and gauges)
    pub fn balancer(&self) -> &Arc<Balancer> {
        &self.balancer
    }

    /// Bound admin address, if the listener is running
    pub fn admin_addr(&self) -> Option<std::net::SocketAddr> {
        self.admin.as_ref().map(|a| a.addr())
    }

    /// Hot path: route one captured frame
    pub fn ingest(&self, frame: RawFrame) -> Result<(), NodeError> {
        self.balancer.ingest(frame)
    }

    /// Synchronous one-shot translation.
    ///
    /// Runs the same state machine as the frame path on a private
    /// single-frame session, bypassing admission. The outcome still feeds
    /// learning and storage.
    pub fn translate(
        &self,
        payload: &[u8],
        target: Option<StrategyTag>,
    ) -> Result<Vec<u8>, NodeError> {
        let seq = self
            .sync_seq
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let frame = RawFrame {
            flow: FlowId(u64::MAX - seq),
            transport: TransportKind::Unknown,
            port: 0,
            payload: payload.to_vec(),
            fin: true,
        };
        let fp = Fingerprint::of(&frame);
        let detected = ProtocolId::detect(payload);
        let tag = target.unwrap_or_else(|| self.agent.decide(fp, detected).tag);

        let mut session = Session::new(
            SessionId(u64::MAX - seq),
            fp,
            self.config.limits.max_buffer,
        );
        session.classify()?;
        session.bind(tag)?;

        let result = session
            .push_frame(payload)
            .and_then(|outputs| session.close().map(|()| outputs));
        let finished = match result {
            Ok(outputs) => Ok(outputs.concat()),
            Err(e) => Err(NodeError::Translate(e)),
        };
        if let Some(outcome) = session.take_outcome() {
            self.agent.record_outcome(&outcome);
        }
        finished
    }

    /// Graceful shutdown: drain workers, stop gossip and admin, persist
    /// the knowledge snapshot
    pub async fn shutdown(self) {
        self.balancer.shutdown().await;
        if let Some(gossip) = self.gossip {
            gossip.shutdown().await;
        }
        if let Some(admin) = self.admin {
            admin.shutdown().await;
        }
        if let Err(e) = self.outcomes.persist(&self.store.snapshot()) {
            tracing::warn!(error = %e, "knowledge snapshot persist failed");
        }
        tracing::info!("node stopped");
    }
}
