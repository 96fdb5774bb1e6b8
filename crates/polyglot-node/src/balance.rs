//! Priority admission and the bounded worker pool.
//!
//! Frames enter through [`Balancer::ingest`]. The first frame of a flow
//! runs admission: fingerprint, strategy decision, priority scoring, and
//! a slot in the bounded pending queue (lowest-priority entry evicted
//! when a strictly higher-priority session needs the space, otherwise the
//! newcomer is rejected). A dispatcher task moves the highest-priority
//! pending session onto a worker whenever a pool permit frees up; later
//! frames of an admitted flow are routed straight to the owning worker's
//! channel.
//!
//! At most `workers` sessions are translating at any instant; the
//! semaphore enforces it. Slots release immediately on terminal
//! transitions.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, watch, Notify, Semaphore};
use tokio::task::JoinHandle;

use polyglot_core::{
    Fingerprint, FlowId, ProtocolId, RawFrame, Session, SessionId, SessionOutcome,
    StrategyTag,
};

use crate::agent::DecisionAgent;
use crate::error::NodeError;

/// Frames buffered per flow while its session waits for a worker
const FRAME_BACKLOG: usize = 256;

/// Load balancer tuning
#[derive(Debug, Clone)]
pub struct BalanceConfig {
    /// Worker pool size (max concurrent translating sessions)
    pub workers: usize,
    /// Pending-session queue capacity
    pub queue_capacity: usize,
    /// Concurrent sessions allowed for never-seen fingerprints
    pub unknown_budget: usize,
    /// Per-session buffer cap handed to [`Session`]
    pub max_buffer: usize,
    /// Idle time before a session is cancelled
    pub idle_timeout: Duration,
}

impl Default for BalanceConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 256,
            unknown_budget: 32,
            max_buffer: polyglot_core::DEFAULT_MAX_BUFFER,
            idle_timeout: Duration::from_secs(30),
        }
    }
}

/// One converted message leaving the node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Translated {
    /// Session that produced it
    pub session: SessionId,
    /// Converted bytes
    pub payload: Vec<u8>,
}

/// Admission and outcome counters
#[derive(Debug, Default)]
pub struct BalanceStats {
    /// Sessions admitted to the queue
    pub admitted: AtomicU64,
    /// Sessions rejected because the queue was full
    pub rejected_full: AtomicU64,
    /// Sessions rejected by the unknown-fingerprint budget
    pub rejected_unknown: AtomicU64,
    /// Pending sessions evicted for higher-priority arrivals
    pub evicted: AtomicU64,
    /// Frames dropped because a flow's backlog was full
    pub frames_dropped: AtomicU64,
    /// Sessions that reached Complete
    pub completed: AtomicU64,
    /// Sessions that reached Failed
    pub failed: AtomicU64,
    /// Failed: malformed input
    pub malformed: AtomicU64,
    /// Failed: buffer cap breached
    pub buffer_limit: AtomicU64,
    /// Failed: strategy could not consume the payload
    pub unsupported: AtomicU64,
    /// Failed: cancelled (idle timeout, eviction, shutdown)
    pub cancelled: AtomicU64,
}

/// Point-in-time counters plus live gauges, for the admin surface
#[derive(Debug, Clone, Copy, Serialize)]
pub struct BalanceSnapshot {
    /// Sessions admitted
    pub admitted: u64,
    /// Queue-full rejections
    pub rejected_full: u64,
    /// Unknown-budget rejections
    pub rejected_unknown: u64,
    /// Evicted pending sessions
    pub evicted: u64,
    /// Dropped frames
    pub frames_dropped: u64,
    /// Completed sessions
    pub completed: u64,
    /// Failed sessions
    pub failed: u64,
    /// Failures classified malformed
    pub malformed: u64,
    /// Failures classified buffer-limit
    pub buffer_limit: u64,
    /// Failures classified unsupported
    pub unsupported: u64,
    /// Failures classified cancelled
    pub cancelled: u64,
    /// Sessions waiting for a worker right now
    pub queued: usize,
    /// Sessions translating right now
    pub active: usize,
}

impl BalanceStats {
    fn count_outcome(&self, outcome: &SessionOutcome) {
        if outcome.success {
            self.completed.fetch_add(1, Ordering::Relaxed);
            return;
        }
        self.failed.fetch_add(1, Ordering::Relaxed);
        let counter = match outcome.fail {
            Some(polyglot_core::FailKind::Malformed) => &self.malformed,
            Some(polyglot_core::FailKind::BufferLimit) => &self.buffer_limit,
            Some(polyglot_core::FailKind::Unsupported) => &self.unsupported,
            _ => &self.cancelled,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// One pending session waiting for a worker
struct Queued {
    session: Session,
    tag: StrategyTag,
    rx: mpsc::Receiver<RawFrame>,
    flow: FlowId,
    known: bool,
}

#[derive(Default)]
struct PendingQueue {
    /// Key is (priority bits, admission seq); `pop_last` is the highest
    /// priority, `pop_first` the eviction candidate. Priorities are
    /// clamped non-negative so the f64 bit pattern orders correctly.
    map: BTreeMap<(u64, u64), Queued>,
    seq: u64,
}

/// Priority admission + fixed worker pool
pub struct Balancer {
    config: BalanceConfig,
    agent: Arc<DecisionAgent>,
    outputs: mpsc::Sender<Translated>,
    queue: Mutex<PendingQueue>,
    wakeup: Notify,
    semaphore: Arc<Semaphore>,
    routes: dashmap::DashMap<FlowId, mpsc::Sender<RawFrame>>,
    unknown_now: AtomicUsize,
    next_session: AtomicU64,
    stats: BalanceStats,
    shutdown: watch::Sender<bool>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl Balancer {
    /// Build without starting the dispatcher (admission only; used by
    /// tests that need deterministic queue behavior)
    pub fn new(
        config: BalanceConfig,
        agent: Arc<DecisionAgent>,
        outputs: mpsc::Sender<Translated>,
    ) -> Arc<Self> {
        let (shutdown, _) = watch::channel(false);
        Arc::new(Self {
            semaphore: Arc::new(Semaphore::new(config.workers)),
            config,
            agent,
            outputs,
            queue: Mutex::new(PendingQueue::default()),
            wakeup: Notify::new(),
            routes: dashmap::DashMap::new(),
            unknown_now: AtomicUsize::new(0),
            next_session: AtomicU64::new(1),
            stats: BalanceStats::default(),
            shutdown,
            dispatcher: Mutex::new(None),
        })
    }

    /// Build and start the dispatcher task
    pub fn spawn(
        config: BalanceConfig,
        agent: Arc<DecisionAgent>,
        outputs: mpsc::Sender<Translated>,
    ) -> Arc<Self> {
        let bal = Self::new(config, agent, outputs);
        let handle = tokio::spawn(dispatch_loop(Arc::clone(&bal)));
        *bal.dispatcher.lock().expect("dispatcher lock") = Some(handle);
        bal
    }

    /// Counters
    pub fn stats(&self) -> &BalanceStats {
        &self.stats
    }

    /// Counters plus live queue/pool gauges
    pub fn snapshot(&self) -> BalanceSnapshot {
        let s = &self.stats;
        BalanceSnapshot {
            admitted: s.admitted.load(Ordering::Relaxed),
            rejected_full: s.rejected_full.load(Ordering::Relaxed),
            rejected_unknown: s.rejected_unknown.load(Ordering::Relaxed),
            evicted: s.evicted.load(Ordering::Relaxed),
            frames_dropped: s.frames_dropped.load(Ordering::Relaxed),
            completed: s.completed.load(Ordering::Relaxed),
            failed: s.failed.load(Ordering::Relaxed),
            malformed: s.malformed.load(Ordering::Relaxed),
            buffer_limit: s.buffer_limit.load(Ordering::Relaxed),
            unsupported: s.unsupported.load(Ordering::Relaxed),
            cancelled: s.cancelled.load(Ordering::Relaxed),
            queued: self.queued(),
            active: self.active(),
        }
    }

    /// Sessions waiting for a worker
    pub fn queued(&self) -> usize {
        self.queue.lock().expect("queue lock").map.len()
    }

    /// Sessions currently translating
    pub fn active(&self) -> usize {
        self.config.workers - self.semaphore.available_permits()
    }

    /// Route one frame: existing flows go to their worker, new flows run
    /// admission
    pub fn ingest(self: &Arc<Self>, frame: RawFrame) -> Result<(), NodeError> {
        if *self.shutdown.borrow() {
            return Err(NodeError::AdmissionRejected("node is shutting down"));
        }
        if let Some(route) = self.routes.get(&frame.flow) {
            if route.try_send(frame).is_err() {
                // Backlog full, or the worker just exited; either way the
                // frame is dropped, never reordered
                self.stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
            }
            return Ok(());
        }
        self.admit(frame)
    }

    fn admit(self: &Arc<Self>, frame: RawFrame) -> Result<(), NodeError> {
        let fp = Fingerprint::of(&frame);
        let detected = ProtocolId::detect(&frame.payload);
        let known = self.agent.store().lookup(&fp).is_some();
        if !known {
            let admitted = self
                .unknown_now
                .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
                    (n < self.config.unknown_budget).then_some(n + 1)
                })
                .is_ok();
            if !admitted {
                self.stats.rejected_unknown.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(%fp, "unknown-fingerprint budget exhausted");
                return Err(NodeError::AdmissionRejected(
                    "unknown-fingerprint budget exhausted",
                ));
            }
        }

        let decision = self.agent.decide(fp, detected);
        let id = SessionId(self.next_session.fetch_add(1, Ordering::Relaxed));
        let mut session = Session::new(id, fp, self.config.max_buffer);
        session.classify()?;

        let flow = frame.flow;
        let (tx, rx) = mpsc::channel(FRAME_BACKLOG);
        // First frame into an empty channel cannot fail
        let _ = tx.try_send(frame);
        // The route must exist before the session is visible to the
        // dispatcher: a worker that finishes fast removes its route, and
        // a late insert would leave a dead sender behind forever
        self.routes.insert(flow, tx);

        let evicted = {
            let mut q = self.queue.lock().expect("queue lock");
            q.seq += 1;
            let priority =
                admission_priority(decision.confidence, q.map.len(), self.config.queue_capacity);
            let key = (priority.to_bits(), q.seq);
            let evicted = if q.map.len() >= self.config.queue_capacity {
                let lowest = *q.map.first_key_value().map(|(k, _)| k).unwrap_or(&key);
                if key.0 <= lowest.0 {
                    // Ties keep the incumbent
                    drop(q);
                    self.routes.remove(&flow);
                    if !known {
                        self.unknown_now.fetch_sub(1, Ordering::Relaxed);
                    }
                    self.stats.rejected_full.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(%fp, priority, "pending queue full");
                    return Err(NodeError::AdmissionRejected("pending queue full"));
                }
                q.map.pop_first().map(|(_, v)| v)
            } else {
                None
            };
            session.set_priority(priority);
            q.map.insert(
                key,
                Queued {
                    session,
                    tag: decision.tag,
                    rx,
                    flow,
                    known,
                },
            );
            evicted
        };
        if let Some(mut loser) = evicted {
            self.stats.evicted.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(session = %loser.session.id(), "evicted pending session");
            loser.session.cancel();
            self.finish(loser.session, loser.flow, loser.known);
        }

        self.stats.admitted.fetch_add(1, Ordering::Relaxed);
        self.wakeup.notify_one();
        Ok(())
    }

    fn pop_highest(&self) -> Option<Queued> {
        self.queue
            .lock()
            .expect("queue lock")
            .map
            .pop_last()
            .map(|(_, v)| v)
    }

    /// Common terminal cleanup: slot bookkeeping and the outcome feedback
    /// loop. The worker permit drops at the caller, releasing the pool
    /// slot immediately.
    fn finish(&self, mut session: Session, flow: FlowId, known: bool) {
        self.routes.remove(&flow);
        if !known {
            self.unknown_now.fetch_sub(1, Ordering::Relaxed);
        }
        if let Some(outcome) = session.take_outcome() {
            self.stats.count_outcome(&outcome);
            self.agent.record_outcome(&outcome);
        }
    }

    /// Stop admitting, cancel pending sessions, and drain the workers
    pub async fn shutdown(&self) {
        let _ = self.shutdown.send(true);
        self.wakeup.notify_waiters();

        let pending: Vec<Queued> = {
            let mut q = self.queue.lock().expect("queue lock");
            std::mem::take(&mut q.map).into_values().collect()
        };
        for mut queued in pending {
            queued.session.cancel();
            self.finish(queued.session, queued.flow, queued.known);
        }

        // Dropping the routes closes every worker's frame channel
        self.routes.clear();

        let handle = self.dispatcher.lock().expect("dispatcher lock").take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        // All permits back means all workers have exited
        if let Ok(permits) = self
            .semaphore
            .acquire_many(self.config.workers as u32)
            .await
        {
            drop(permits);
        }
        tracing::info!("load balancer drained");
    }
}

/// Priority scoring: store confidence discounted by queue pressure
fn admission_priority(confidence: f64, depth: usize, capacity: usize) -> f64 {
    let load = depth as f64 / capacity.max(1) as f64;
    (confidence * (1.0 - 0.25 * load)).clamp(0.0, 1.0)
}

async fn dispatch_loop(bal: Arc<Balancer>) {
    let mut shutdown = bal.shutdown.subscribe();
    loop {
        if *shutdown.borrow() {
            break;
        }
        let Some(queued) = bal.pop_highest() else {
            tokio::select! {
                _ = bal.wakeup.notified() => {}
                _ = shutdown.changed() => {}
            }
            continue;
        };
        let permit = tokio::select! {
            permit = Arc::clone(&bal.semaphore).acquire_owned() => match permit {
                Ok(p) => p,
                Err(_) => break,
            },
            _ = shutdown.changed() => {
                let mut queued = queued;
                queued.session.cancel();
                bal.finish(queued.session, queued.flow, queued.known);
                break;
            }
        };
        tokio::spawn(run_worker(Arc::clone(&bal), queued, permit));
    }
    tracing::debug!("dispatcher stopped");
}

async fn run_worker(
    bal: Arc<Balancer>,
    queued: Queued,
    permit: tokio::sync::OwnedSemaphorePermit,
) {
    let Queued {
        mut session,
        tag,
        mut rx,
        flow,
        known,
    } = queued;
    if session.bind(tag).is_err() {
        bal.finish(session, flow, known);
        return;
    }
    tracing::trace!(session = %session.id(), %flow, "worker started");

    loop {
        match tokio::time::timeout(bal.config.idle_timeout, rx.recv()).await {
            Ok(Some(frame)) => {
                let fin = frame.fin;
                match session.push_frame(&frame.payload) {
                    Ok(outputs) => {
                        for payload in outputs {
                            let out = Translated {
                                session: session.id(),
                                payload,
                            };
                            // Flushed output is at-least-once; a vanished
                            // consumer is not a session failure
                            let _ = bal.outputs.send(out).await;
                        }
                    }
                    Err(e) => {
                        tracing::debug!(session = %session.id(), error = %e, "session failed");
                        break;
                    }
                }
                if fin {
                    if let Err(e) = session.close() {
                        tracing::debug!(session = %session.id(), error = %e, "close failed");
                    }
                    break;
                }
            }
            // Channel closed without a fin frame: the flow was cut off
            // by shutdown, not completed. Only fin closes complete.
            Ok(None) => {
                session.cancel();
                break;
            }
            Err(_) => {
                tracing::debug!(session = %session.id(), "idle timeout");
                session.cancel();
                break;
            }
        }
    }
    bal.finish(session, flow, known);
    drop(permit);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::DecisionAgent;
    use crate::storage::{MemoryStore, OutcomeStore};
    use polyglot_core::{
        NodeId, StoreConfig, StrategyRecord, StrategyStore, TransportKind,
    };

    fn frame(flow: u64, payload: &[u8], fin: bool) -> RawFrame {
        RawFrame {
            flow: FlowId(flow),
            transport: TransportKind::Tcp,
            port: 8080,
            payload: payload.to_vec(),
            fin,
        }
    }

    fn setup(
        config: BalanceConfig,
        spawn: bool,
    ) -> (Arc<Balancer>, mpsc::Receiver<Translated>, Arc<MemoryStore>) {
        let store = Arc::new(StrategyStore::new(NodeId::random(), StoreConfig::default()));
        let outcomes = Arc::new(MemoryStore::new());
        let agent = Arc::new(DecisionAgent::new(
            store,
            outcomes.clone() as Arc<dyn OutcomeStore>,
        ));
        let (tx, rx) = mpsc::channel(64);
        let bal = if spawn {
            Balancer::spawn(config, agent, tx)
        } else {
            Balancer::new(config, agent, tx)
        };
        (bal, rx, outcomes)
    }

    /// Pre-load one high-confidence record so a flow with this payload is
    /// "known" and high priority
    fn make_known(bal: &Balancer, payload: &[u8], port: u16, confidence: f64) {
        let fp = Fingerprint::of(&RawFrame {
            flow: FlowId(0),
            transport: TransportKind::Tcp,
            port,
            payload: payload.to_vec(),
            fin: false,
        });
        bal.agent.store().merge_remote(&[StrategyRecord {
            fingerprint: fp,
            tag: StrategyTag::Passthrough,
            confidence,
            samples: 50,
            updated_at: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_millis() as u64,
            origin: NodeId::random(),
        }]);
    }

    #[tokio::test]
    async fn test_http_flow_translates_end_to_end() {
        let (bal, mut rx, _) = setup(BalanceConfig::default(), true);
        bal.ingest(frame(1, b"GET /api/data HTTP/1.1\r\nHost: h\r\n\r\n", true))
            .unwrap();
        let out = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("translated output")
            .unwrap();
        // HTTP's default pairing is MQTT PUBLISH
        assert_eq!(out.payload[0], 0x30);

        // Terminal outcome shows up in the counters
        for _ in 0..100 {
            if bal.stats().completed.load(Ordering::Relaxed) == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(bal.stats().completed.load(Ordering::Relaxed), 1);
        bal.shutdown().await;
    }

    #[tokio::test]
    async fn test_unknown_budget_rejects() {
        let config = BalanceConfig {
            unknown_budget: 0,
            ..Default::default()
        };
        let (bal, _rx, _) = setup(config, false);
        let err = bal.ingest(frame(1, &[0xAA, 0xBB], false)).unwrap_err();
        assert!(matches!(err, NodeError::AdmissionRejected(_)));
        assert_eq!(bal.stats().rejected_unknown.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_full_queue_rejects_equal_priority() {
        let config = BalanceConfig {
            queue_capacity: 2,
            ..Default::default()
        };
        // No dispatcher: the queue fills deterministically
        let (bal, _rx, _) = setup(config, false);
        bal.ingest(frame(1, &[0xAA, 1], false)).unwrap();
        bal.ingest(frame(2, &[0xAA, 2], false)).unwrap();
        let err = bal.ingest(frame(3, &[0xAA, 3], false)).unwrap_err();
        assert!(matches!(err, NodeError::AdmissionRejected(_)));
        assert_eq!(bal.stats().rejected_full.load(Ordering::Relaxed), 1);
        assert_eq!(bal.queued(), 2);
    }

    #[tokio::test]
    async fn test_full_queue_evicts_lowest_for_higher_priority() {
        let config = BalanceConfig {
            queue_capacity: 2,
            ..Default::default()
        };
        let (bal, _rx, outcomes) = setup(config, false);
        bal.ingest(frame(1, &[0xAA, 1], false)).unwrap();
        bal.ingest(frame(2, &[0xAA, 2], false)).unwrap();

        make_known(&bal, b"vip-payload", 9000, 0.95);
        let mut vip = frame(3, b"vip-payload", false);
        vip.port = 9000;
        bal.ingest(vip).unwrap();

        assert_eq!(bal.stats().evicted.load(Ordering::Relaxed), 1);
        assert_eq!(bal.queued(), 2);
        // The evicted session reported a cancelled outcome
        let recorded = outcomes.outcomes();
        assert_eq!(recorded.len(), 1);
        assert!(!recorded[0].success);
    }

    #[tokio::test]
    async fn test_pool_limit_holds_under_load() {
        let config = BalanceConfig {
            workers: 1,
            ..Default::default()
        };
        let (bal, _rx, _) = setup(config, true);
        // Two open-ended flows; only one may be translating
        bal.ingest(frame(1, &[0xAA, 1], false)).unwrap();
        bal.ingest(frame(2, &[0xAA, 2], false)).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(bal.active(), 1);
        assert_eq!(bal.queued(), 1);
        bal.shutdown().await;
        // Drain released every slot and produced both outcomes
        assert_eq!(bal.active(), 0);
    }

    #[tokio::test]
    async fn test_idle_session_is_cancelled() {
        let config = BalanceConfig {
            idle_timeout: Duration::from_millis(50),
            ..Default::default()
        };
        let (bal, _rx, outcomes) = setup(config, true);
        bal.ingest(frame(1, &[0xAA, 1], false)).unwrap();
        for _ in 0..100 {
            if bal.stats().cancelled.load(Ordering::Relaxed) == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(bal.stats().cancelled.load(Ordering::Relaxed), 1);
        assert_eq!(outcomes.outcomes().len(), 1);
        bal.shutdown().await;
    }

    #[tokio::test]
    async fn test_flow_id_reusable_after_completion() {
        // A fast worker can finish a fin-tagged flow as soon as it is
        // queued; the route must be gone afterwards so the same flow id
        // admits a fresh session instead of feeding a dead channel
        let (bal, mut rx, _) = setup(BalanceConfig::default(), true);
        for round in 1..=2u64 {
            bal.ingest(frame(42, b"GET /again HTTP/1.1\r\n\r\n", true))
                .unwrap();
            let out = tokio::time::timeout(Duration::from_secs(2), rx.recv())
                .await
                .expect("translated output")
                .unwrap();
            assert_eq!(out.payload[0], 0x30);
            for _ in 0..100 {
                if bal.stats().completed.load(Ordering::Relaxed) == round {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            assert_eq!(bal.stats().completed.load(Ordering::Relaxed), round);
            assert!(!bal.routes.contains_key(&FlowId(42)));
        }
        assert_eq!(bal.stats().admitted.load(Ordering::Relaxed), 2);
        bal.shutdown().await;
    }

    #[tokio::test]
    async fn test_rejected_admission_leaves_no_route() {
        let config = BalanceConfig {
            queue_capacity: 1,
            ..Default::default()
        };
        let (bal, _rx, _) = setup(config, false);
        bal.ingest(frame(1, &[0xAA, 1], false)).unwrap();
        assert!(bal.ingest(frame(2, &[0xAA, 2], false)).is_err());
        assert!(!bal.routes.contains_key(&FlowId(2)));
        // A later attempt for the same flow runs admission again rather
        // than disappearing into a stale route
        assert!(bal.ingest(frame(2, &[0xAA, 2], false)).is_err());
        assert_eq!(bal.stats().rejected_full.load(Ordering::Relaxed), 2);
        assert_eq!(bal.stats().frames_dropped.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_shutdown_cancels_inflight_sessions() {
        let config = BalanceConfig {
            workers: 1,
            ..Default::default()
        };
        let (bal, _rx, _) = setup(config, true);
        // Open-ended flow, no fin: cut off by shutdown
        bal.ingest(frame(1, &[0xAA, 1], false)).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(bal.active(), 1);
        bal.shutdown().await;
        assert_eq!(bal.stats().completed.load(Ordering::Relaxed), 0);
        assert_eq!(
            bal.stats().cancelled.load(Ordering::Relaxed),
            1,
            "a cut-off session must not count as a success"
        );
    }

    #[tokio::test]
    async fn test_multi_frame_flow_routes_to_same_session() {
        let (bal, mut rx, _) = setup(BalanceConfig::default(), true);
        bal.ingest(frame(7, b"POST /t HTTP/1.1\r\ncontent-length: 5\r\n\r\n", false))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        bal.ingest(frame(7, b"hello", true)).unwrap();
        let out = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("translated output")
            .unwrap();
        assert_eq!(out.payload[0], 0x30);
        assert_eq!(bal.stats().admitted.load(Ordering::Relaxed), 1);
        bal.shutdown().await;
    }

    #[test]
    fn test_priority_orders_by_confidence_then_load() {
        let high = admission_priority(0.9, 0, 100);
        let low = admission_priority(0.1, 0, 100);
        assert!(high > low);
        let empty = admission_priority(0.5, 0, 100);
        let busy = admission_priority(0.5, 100, 100);
        assert!(empty > busy);
        assert!(admission_priority(1.0, 0, 100) <= 1.0);
    }
}
