//! Decision agent: picks a translation strategy per fingerprint.
//!
//! The agent consults the strategy store first; a record above the
//! confidence threshold wins, anything else falls back to the static
//! default mapping for the sniffed protocol. Every terminal session
//! outcome flows back through the agent into both the store (learning)
//! and the outcome storage seam (durability).

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use serde::Serialize;

use polyglot_core::{
    Fingerprint, ProtocolId, SessionOutcome, StrategyStore, StrategyTag,
};

use crate::storage::OutcomeStore;

/// Decisions kept for the admin `decisions` query
const DECISION_LOG: usize = 64;

/// One routing decision, kept for observability
#[derive(Debug, Clone, Serialize)]
pub struct Decision {
    /// Fingerprint the decision was made for
    pub fingerprint: Fingerprint,
    /// Protocol the sniffer saw
    pub detected: ProtocolId,
    /// Strategy chosen
    pub tag: StrategyTag,
    /// Store confidence at decision time (0 when the store had nothing)
    pub confidence: f64,
    /// True when the store record won over the default mapping
    pub learned: bool,
}

/// Strategy chooser plus outcome feedback loop
pub struct DecisionAgent {
    store: Arc<StrategyStore>,
    outcomes: Arc<dyn OutcomeStore>,
    recent: Mutex<VecDeque<Decision>>,
}

impl DecisionAgent {
    /// Wire the agent to its store and storage seam
    pub fn new(store: Arc<StrategyStore>, outcomes: Arc<dyn OutcomeStore>) -> Self {
        Self {
            store,
            outcomes,
            recent: Mutex::new(VecDeque::with_capacity(DECISION_LOG)),
        }
    }

    /// Shared strategy store
    pub fn store(&self) -> &Arc<StrategyStore> {
        &self.store
    }

    /// Merge the cold-start seed from storage into the store
    pub fn seed(&self) {
        let records = self.outcomes.seed();
        if records.is_empty() {
            return;
        }
        let report = self.store.merge_remote(&records);
        tracing::info!(
            seeded = records.len(),
            added = report.added,
            "knowledge seed loaded"
        );
    }

    /// Choose a strategy for one new session
    ///
    /// Never fails: an unrecognized fingerprint is a fallback, not an
    /// error.
    pub fn decide(&self, fp: Fingerprint, detected: ProtocolId) -> Decision {
        let threshold = self.store.config().confidence_threshold;
        let (tag, confidence, learned) = match self.store.lookup(&fp) {
            Some(rec) if rec.confidence >= threshold => (rec.tag, rec.confidence, true),
            Some(rec) => (StrategyTag::default_for(detected), rec.confidence, false),
            None => (StrategyTag::default_for(detected), 0.0, false),
        };
        let decision = Decision {
            fingerprint: fp,
            detected,
            tag,
            confidence,
            learned,
        };
        tracing::debug!(%fp, ?detected, %tag, confidence, learned, "strategy decided");

        let mut recent = self.recent.lock().expect("decision log lock");
        if recent.len() == DECISION_LOG {
            recent.pop_front();
        }
        recent.push_back(decision.clone());
        decision
    }

    /// Fold one terminal outcome into the store and the storage seam
    pub fn record_outcome(&self, outcome: &SessionOutcome) {
        self.store
            .record_outcome(outcome.fingerprint, outcome.tag, outcome.success);
        if let Err(e) = self.outcomes.append(outcome) {
            // Learning already happened; losing the audit line is non-fatal
            tracing::warn!(error = %e, session = %outcome.session, "outcome append failed");
        }
    }

    /// Most recent decisions, oldest first
    pub fn recent_decisions(&self) -> Vec<Decision> {
        self.recent
            .lock()
            .expect("decision log lock")
            .iter()
            .cloned()
            .collect()
    }
}
