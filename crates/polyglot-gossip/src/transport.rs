//! UDP multicast gossip transport.
//!
//! One periodic sender task broadcasts the locally changed strategy
//! records; one listener task merges inbound deltas into the shared
//! store. Neither task ever blocks translation workers - the strategy
//! store's per-fingerprint atomic operations are the only coupling.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use rand::Rng;
use serde::Serialize;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use polyglot_core::{NodeId, StrategyStore};

use crate::error::GossipError;
use crate::wire::KnowledgeDelta;
use crate::MAX_DATAGRAM;

/// Records per datagram; keeps encoded deltas well under [`MAX_DATAGRAM`]
const DELTA_CHUNK: usize = 200;

/// Gossip transport configuration
#[derive(Debug, Clone)]
pub struct GossipConfig {
    /// Multicast group address
    pub group: Ipv4Addr,
    /// Multicast port
    pub port: u16,
    /// Multicast TTL (scope)
    pub ttl: u32,
    /// Base interval between send rounds
    pub interval: Duration,
    /// Random extra delay per round, desynchronizes peers
    pub jitter: Duration,
}

impl Default for GossipConfig {
    fn default() -> Self {
        Self {
            group: Ipv4Addr::new(239, 255, 0, 1),
            port: 5000,
            ttl: 2,
            interval: Duration::from_secs(30),
            jitter: Duration::from_secs(3),
        }
    }
}

/// Gossip counters, shared with the admin surface
#[derive(Debug, Default)]
pub struct GossipStats {
    /// Send rounds that actually carried records
    pub rounds_sent: AtomicU64,
    /// Records broadcast
    pub records_sent: AtomicU64,
    /// Deltas accepted from peers
    pub deltas_received: AtomicU64,
    /// Records inserted by merge
    pub records_added: AtomicU64,
    /// Records replaced by merge
    pub records_updated: AtomicU64,
    /// Records where the local copy won
    pub records_rejected: AtomicU64,
    /// Datagrams discarded as undecodable or corrupt
    pub decode_errors: AtomicU64,
    /// Repeated sequence numbers per origin
    pub duplicates: AtomicU64,
    /// Sequence numbers that arrived late per origin
    pub out_of_order: AtomicU64,
}

/// Point-in-time copy of [`GossipStats`]
#[derive(Debug, Clone, Copy, Serialize)]
pub struct GossipStatsSnapshot {
    /// Send rounds that carried records
    pub rounds_sent: u64,
    /// Records broadcast
    pub records_sent: u64,
    /// Deltas accepted from peers
    pub deltas_received: u64,
    /// Records inserted by merge
    pub records_added: u64,
    /// Records replaced by merge
    pub records_updated: u64,
    /// Records where the local copy won
    pub records_rejected: u64,
    /// Datagrams discarded
    pub decode_errors: u64,
    /// Duplicate deltas seen
    pub duplicates: u64,
    /// Late deltas seen
    pub out_of_order: u64,
}

impl GossipStats {
    /// Snapshot all counters
    pub fn snapshot(&self) -> GossipStatsSnapshot {
        GossipStatsSnapshot {
            rounds_sent: self.rounds_sent.load(Ordering::Relaxed),
            records_sent: self.records_sent.load(Ordering::Relaxed),
            deltas_received: self.deltas_received.load(Ordering::Relaxed),
            records_added: self.records_added.load(Ordering::Relaxed),
            records_updated: self.records_updated.load(Ordering::Relaxed),
            records_rejected: self.records_rejected.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            out_of_order: self.out_of_order.load(Ordering::Relaxed),
        }
    }
}

/// Running gossip tasks plus their shared counters
pub struct GossipHandle {
    stats: Arc<GossipStats>,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl GossipHandle {
    /// Shared counters
    pub fn stats(&self) -> Arc<GossipStats> {
        Arc::clone(&self.stats)
    }

    /// Stop both tasks and wait for them to finish
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            let _ = task.await;
        }
    }
}

/// Multicast gossip transport
pub struct GossipTransport;

impl GossipTransport {
    /// Bind the multicast socket and spawn the sender and listener tasks
    pub fn spawn(
        store: Arc<StrategyStore>,
        config: GossipConfig,
    ) -> Result<GossipHandle, GossipError> {
        let socket = Arc::new(UdpSocket::from_std(bind_multicast(&config)?)?);
        let stats = Arc::new(GossipStats::default());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tracing::info!(
            group = %config.group,
            port = config.port,
            node = %store.node_id(),
            "gossip transport started"
        );

        let sender = tokio::spawn(send_loop(
            Arc::clone(&store),
            Arc::clone(&socket),
            config.clone(),
            Arc::clone(&stats),
            shutdown_rx.clone(),
        ));
        let listener = tokio::spawn(recv_loop(
            store,
            socket,
            Arc::clone(&stats),
            shutdown_rx,
        ));

        Ok(GossipHandle {
            stats,
            shutdown: shutdown_tx,
            tasks: vec![sender, listener],
        })
    }
}

fn bind_multicast(config: &GossipConfig) -> Result<std::net::UdpSocket, GossipError> {
    use socket2::{Domain, Protocol, Socket, Type};

    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    let bind_addr: SocketAddr = (Ipv4Addr::UNSPECIFIED, config.port).into();
    socket.bind(&bind_addr.into())?;
    socket.join_multicast_v4(&config.group, &Ipv4Addr::UNSPECIFIED)?;
    socket.set_multicast_ttl_v4(config.ttl)?;
    // Same-host peers (and tests) receive their own group traffic
    socket.set_multicast_loop_v4(true)?;
    socket.set_nonblocking(true)?;
    Ok(socket.into())
}

async fn send_loop(
    store: Arc<StrategyStore>,
    socket: Arc<UdpSocket>,
    config: GossipConfig,
    stats: Arc<GossipStats>,
    mut shutdown: watch::Receiver<bool>,
) {
    let target: SocketAddr = (config.group, config.port).into();
    let mut interval = tokio::time::interval(config.interval);
    let mut seq: u64 = 0;
    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = shutdown.changed() => break,
        }
        if !config.jitter.is_zero() {
            let jitter = rand::thread_rng().gen_range(Duration::ZERO..config.jitter);
            tokio::time::sleep(jitter).await;
        }

        let changed = store.take_changed();
        if changed.is_empty() {
            continue;
        }
        for chunk in changed.chunks(DELTA_CHUNK) {
            seq += 1;
            let delta = KnowledgeDelta::new(store.node_id(), seq, chunk.to_vec());
            let bytes = match delta.encode() {
                Ok(b) if b.len() <= MAX_DATAGRAM => b,
                Ok(b) => {
                    let err = GossipError::DeltaTooLarge {
                        size: b.len(),
                        cap: MAX_DATAGRAM,
                    };
                    tracing::warn!(error = %err, "skipping gossip delta");
                    continue;
                }
                Err(e) => {
                    tracing::error!(error = %e, "failed to encode gossip delta");
                    continue;
                }
            };
            match socket.send_to(&bytes, target).await {
                Ok(_) => {
                    stats.rounds_sent.fetch_add(1, Ordering::Relaxed);
                    stats
                        .records_sent
                        .fetch_add(chunk.len() as u64, Ordering::Relaxed);
                    tracing::debug!(seq, records = chunk.len(), "gossip delta sent");
                }
                Err(e) => tracing::warn!(error = %e, "gossip send failed"),
            }
        }
    }
    tracing::debug!("gossip sender stopped");
}

async fn recv_loop(
    store: Arc<StrategyStore>,
    socket: Arc<UdpSocket>,
    stats: Arc<GossipStats>,
    mut shutdown: watch::Receiver<bool>,
) {
    let last_seen: DashMap<NodeId, u64> = DashMap::new();
    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        let len = tokio::select! {
            res = socket.recv_from(&mut buf) => match res {
                Ok((len, _)) => len,
                Err(e) => {
                    tracing::warn!(error = %e, "gossip recv failed");
                    continue;
                }
            },
            _ = shutdown.changed() => break,
        };

        let delta = match KnowledgeDelta::decode(&buf[..len]) {
            Ok(d) => d,
            Err(e) => {
                // One bad datagram never affects other deltas or the store
                stats.decode_errors.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(error = %e, "discarded gossip datagram");
                continue;
            }
        };
        if delta.origin == store.node_id() {
            continue;
        }

        // Duplicate rounds are skipped as an optimisation; late rounds are
        // still merged because merge is idempotent per fingerprint.
        let mut seen = last_seen.entry(delta.origin).or_insert(0);
        if delta.seq == *seen {
            stats.duplicates.fetch_add(1, Ordering::Relaxed);
            continue;
        }
        if delta.seq < *seen {
            stats.out_of_order.fetch_add(1, Ordering::Relaxed);
        } else {
            *seen = delta.seq;
        }
        drop(seen);

        let report = store.merge_remote(&delta.records);
        stats.deltas_received.fetch_add(1, Ordering::Relaxed);
        stats.records_added.fetch_add(report.added, Ordering::Relaxed);
        stats
            .records_updated
            .fetch_add(report.updated, Ordering::Relaxed);
        stats
            .records_rejected
            .fetch_add(report.rejected, Ordering::Relaxed);
        tracing::debug!(
            origin = %delta.origin,
            seq = delta.seq,
            added = report.added,
            updated = report.updated,
            "gossip delta merged"
        );
    }
    tracing::debug!("gossip listener stopped");
}
