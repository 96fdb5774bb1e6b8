//! Outcome storage seam.
//!
//! The node appends terminal session outcomes through this trait and
//! reads a knowledge seed from it once at startup. The seam is
//! deliberately narrow: durable storage engines live outside the node,
//! behind whatever implements [`OutcomeStore`].

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use polyglot_core::{SessionOutcome, StrategyRecord};

/// Storage collaborator for session outcomes and knowledge snapshots
pub trait OutcomeStore: Send + Sync {
    /// Append one terminal outcome (hot path, must not block for long)
    fn append(&self, outcome: &SessionOutcome) -> std::io::Result<()>;

    /// Cold-start knowledge seed, called once at startup off the hot path
    fn seed(&self) -> Vec<StrategyRecord>;

    /// Persist a knowledge snapshot at graceful shutdown
    fn persist(&self, _records: &[StrategyRecord]) -> std::io::Result<()> {
        Ok(())
    }
}

/// In-memory store for tests and the one-shot translation surface
#[derive(Default)]
pub struct MemoryStore {
    outcomes: Mutex<Vec<SessionOutcome>>,
    seed: Mutex<Vec<StrategyRecord>>,
}

impl MemoryStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Store that will answer `seed()` with `records`
    pub fn with_seed(records: Vec<StrategyRecord>) -> Self {
        Self {
            outcomes: Mutex::new(Vec::new()),
            seed: Mutex::new(records),
        }
    }

    /// Outcomes appended so far
    pub fn outcomes(&self) -> Vec<SessionOutcome> {
        self.outcomes.lock().expect("outcome lock").clone()
    }
}

impl OutcomeStore for MemoryStore {
    fn append(&self, outcome: &SessionOutcome) -> std::io::Result<()> {
        self.outcomes.lock().expect("outcome lock").push(outcome.clone());
        Ok(())
    }

    fn seed(&self) -> Vec<StrategyRecord> {
        self.seed.lock().expect("seed lock").clone()
    }
}

/// Append-only JSONL files under one directory
///
/// `outcomes.jsonl` collects one JSON outcome per line; `knowledge.jsonl`
/// holds the last persisted snapshot, one record per line, and is what
/// `seed()` reads back after a restart.
pub struct JsonlStore {
    outcomes_path: PathBuf,
    knowledge_path: PathBuf,
    file: Mutex<File>,
}

impl JsonlStore {
    /// Open (creating as needed) the store under `dir`
    pub fn open(dir: &Path) -> std::io::Result<Self> {
        std::fs::create_dir_all(dir)?;
        let outcomes_path = dir.join("outcomes.jsonl");
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&outcomes_path)?;
        Ok(Self {
            outcomes_path,
            knowledge_path: dir.join("knowledge.jsonl"),
            file: Mutex::new(file),
        })
    }

    /// Path outcomes are appended to
    pub fn outcomes_path(&self) -> &Path {
        &self.outcomes_path
    }
}

impl OutcomeStore for JsonlStore {
    fn append(&self, outcome: &SessionOutcome) -> std::io::Result<()> {
        let mut line = serde_json::to_vec(outcome)?;
        line.push(b'\n');
        self.file.lock().expect("outcome file lock").write_all(&line)
    }

    fn seed(&self) -> Vec<StrategyRecord> {
        let Ok(file) = File::open(&self.knowledge_path) else {
            return Vec::new();
        };
        let mut records = Vec::new();
        for line in BufReader::new(file).lines() {
            let Ok(line) = line else { break };
            match serde_json::from_str::<StrategyRecord>(&line) {
                Ok(rec) => records.push(rec),
                Err(e) => {
                    // A torn tail line from a crash is expected; anything
                    // else is worth a warning
                    tracing::warn!(error = %e, "skipping unreadable knowledge line");
                }
            }
        }
        records
    }

    fn persist(&self, records: &[StrategyRecord]) -> std::io::Result<()> {
        let tmp = self.knowledge_path.with_extension("jsonl.tmp");
        let mut out = File::create(&tmp)?;
        for rec in records {
            let mut line = serde_json::to_vec(rec)?;
            line.push(b'\n');
            out.write_all(&line)?;
        }
        out.sync_all()?;
        std::fs::rename(&tmp, &self.knowledge_path)
    }
}
