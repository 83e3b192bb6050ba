//! Attempt orchestration.
//!
//! Repair runs proceed in rounds: a bounded worker pool fans attempts out
//! over instances, each attempt carries its round state explicitly in a
//! [`RunContext`], and finished attempts land in a shared append-merge
//! [`ResultLog`] whose file is rewritten atomically under a lock.

use std::collections::BTreeSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LogError {
    #[error("failed to build worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),

    #[error("I/O error on result log {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("result log {path} is not valid JSON lines: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Per-attempt state that earlier designs kept in globals. Passing it
/// explicitly keeps concurrent attempts from observing each other's round
/// counters.
#[derive(Debug, Clone, Default)]
pub struct RunContext {
    /// Zero-based repair round.
    pub round_idx: usize,
    /// Candidate samples generated so far in this round.
    pub samples_generated: usize,
    /// Files whose localization was redone after a failed round.
    pub relocalized_files: BTreeSet<String>,
}

impl RunContext {
    pub fn next_round(&self) -> Self {
        Self {
            round_idx: self.round_idx + 1,
            samples_generated: 0,
            relocalized_files: self.relocalized_files.clone(),
        }
    }

    pub fn record_sample(&mut self) {
        self.samples_generated += 1;
    }

    pub fn mark_relocalized(&mut self, file: &str) {
        self.relocalized_files.insert(file.to_string());
    }
}

/// Bounded pool for fanning repair attempts over instances. Wraps a
/// dedicated rayon pool so callers control the width independently of the
/// global one.
pub struct WorkerPool {
    pool: rayon::ThreadPool,
}

impl WorkerPool {
    pub fn new(workers: usize) -> Result<Self, LogError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers.max(1))
            .thread_name(|i| format!("repair-{i}"))
            .build()?;
        Ok(Self { pool })
    }

    /// Run `attempt` over every item, at most `workers` at a time, and
    /// collect outputs in input order.
    pub fn run_attempts<T, R, F>(&self, items: Vec<T>, attempt: F) -> Vec<R>
    where
        T: Send,
        R: Send,
        F: Fn(T) -> R + Sync + Send,
    {
        use rayon::prelude::*;
        self.pool
            .install(|| items.into_par_iter().map(attempt).collect())
    }
}

/// One finished attempt, as persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AttemptRecord {
    pub instance_id: String,
    pub attempt: usize,
    pub edited_files: Vec<String>,
    pub diff_text: String,
    pub raw_diff_text: String,
    pub syntax_ok: bool,
    pub errors: Vec<String>,
}

/// Shared JSON-lines log of attempt results.
///
/// `record` merges by `(instance_id, attempt)` so re-running an attempt
/// replaces its earlier entry, and rewrites the whole file through a
/// temporary so readers never observe a torn write.
pub struct ResultLog {
    path: PathBuf,
    lock: Mutex<()>,
}

impl ResultLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record(&self, record: AttemptRecord) -> Result<(), LogError> {
        // A poisoned lock means another writer panicked mid-record; the
        // file itself is still whole because writes go through a rename.
        let _guard = match self.lock.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let mut records = self.read_all_unlocked()?;
        match records
            .iter_mut()
            .find(|r| r.instance_id == record.instance_id && r.attempt == record.attempt)
        {
            Some(existing) => *existing = record,
            None => records.push(record),
        }

        self.rewrite(&records)
    }

    pub fn read_all(&self) -> Result<Vec<AttemptRecord>, LogError> {
        let _guard = match self.lock.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        self.read_all_unlocked()
    }

    fn read_all_unlocked(&self) -> Result<Vec<AttemptRecord>, LogError> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(LogError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        text.lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| {
                serde_json::from_str(line).map_err(|source| LogError::Corrupt {
                    path: self.path.clone(),
                    source,
                })
            })
            .collect()
    }

    fn rewrite(&self, records: &[AttemptRecord]) -> Result<(), LogError> {
        let io_err = |source| LogError::Io {
            path: self.path.clone(),
            source,
        };
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(io_err)?;
        for record in records {
            let line = serde_json::to_string(record).map_err(|source| LogError::Corrupt {
                path: self.path.clone(),
                source,
            })?;
            tmp.write_all(line.as_bytes()).map_err(io_err)?;
            tmp.write_all(b"\n").map_err(io_err)?;
        }
        tmp.flush().map_err(io_err)?;
        tmp.persist(&self.path).map_err(|e| LogError::Io {
            path: self.path.clone(),
            source: e.error,
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn record(instance: &str, attempt: usize, diff: &str) -> AttemptRecord {
        AttemptRecord {
            instance_id: instance.to_string(),
            attempt,
            edited_files: vec!["a.py".to_string()],
            diff_text: diff.to_string(),
            raw_diff_text: diff.to_string(),
            syntax_ok: true,
            errors: Vec::new(),
        }
    }

    #[test]
    fn context_round_transition_resets_samples() {
        let mut ctx = RunContext::default();
        ctx.record_sample();
        ctx.record_sample();
        ctx.mark_relocalized("a.py");

        let next = ctx.next_round();
        assert_eq!(next.round_idx, 1);
        assert_eq!(next.samples_generated, 0);
        assert!(next.relocalized_files.contains("a.py"));
    }

    #[test]
    fn pool_preserves_input_order() {
        let pool = WorkerPool::new(4).unwrap();
        let out = pool.run_attempts((0..32).collect(), |n: i32| n * 2);
        assert_eq!(out, (0..32).map(|n| n * 2).collect::<Vec<_>>());
    }

    #[test]
    fn log_records_and_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let log = ResultLog::new(dir.path().join("results.jsonl"));

        log.record(record("inst-1", 0, "diff one")).unwrap();
        log.record(record("inst-2", 0, "diff two")).unwrap();

        let all = log.read_all().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].instance_id, "inst-1");
    }

    #[test]
    fn rerecording_an_attempt_replaces_it() {
        let dir = tempfile::tempdir().unwrap();
        let log = ResultLog::new(dir.path().join("results.jsonl"));

        log.record(record("inst-1", 0, "first try")).unwrap();
        log.record(record("inst-1", 0, "second try")).unwrap();
        log.record(record("inst-1", 1, "other attempt")).unwrap();

        let all = log.read_all().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].diff_text, "second try");
    }

    #[test]
    fn missing_log_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let log = ResultLog::new(dir.path().join("absent.jsonl"));
        assert!(log.read_all().unwrap().is_empty());
    }

    #[test]
    fn concurrent_writers_lose_no_records() {
        let dir = tempfile::tempdir().unwrap();
        let log = Arc::new(ResultLog::new(dir.path().join("results.jsonl")));
        let pool = WorkerPool::new(8).unwrap();

        let results = pool.run_attempts((0..24).collect::<Vec<usize>>(), {
            let log = Arc::clone(&log);
            move |n| log.record(record(&format!("inst-{n}"), 0, "d")).is_ok()
        });
        assert!(results.into_iter().all(|ok| ok));
        assert_eq!(log.read_all().unwrap().len(), 24);
    }
}
