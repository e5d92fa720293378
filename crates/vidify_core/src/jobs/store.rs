//! Active job tracking and the terminal-job archive.

use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use super::types::{Job, JobId};

/// Archived jobs kept by default; the oldest are pruned first.
pub const DEFAULT_ARCHIVE_LIMIT: usize = 1000;

/// Persistent archive state (saved to the archive file).
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ArchiveState {
    /// Archive format version.
    version: u32,
    jobs: Vec<Job>,
}

/// Live jobs plus archived terminal jobs.
///
/// Active jobs are observed through the `watch` channel their driver
/// publishes snapshots on. Terminal jobs are moved into the archive,
/// which is bounded and optionally persisted as JSON.
#[derive(Debug)]
pub struct JobStore {
    active: HashMap<JobId, watch::Receiver<Job>>,
    archive: HashMap<JobId, Job>,
    /// Archive ids, oldest first.
    order: VecDeque<JobId>,
    limit: usize,
    /// Path to the archive file; empty for an in-memory store.
    archive_file: PathBuf,
    generation: u64,
    /// Last generation written to disk.
    written: Arc<Mutex<u64>>,
}

/// Archive snapshot to be written to disk without holding the store.
#[derive(Debug)]
pub struct ArchiveWrite {
    path: PathBuf,
    jobs: Vec<Job>,
    generation: u64,
    written: Arc<Mutex<u64>>,
}

impl ArchiveWrite {
    /// Write the snapshot atomically via a temp file.
    ///
    /// Writes are serialized per store; a snapshot older than the one
    /// already on disk is skipped.
    pub fn write(self) -> Result<(), std::io::Error> {
        let mut written = self.written.lock();
        if *written >= self.generation {
            return Ok(());
        }

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let count = self.jobs.len();
        let state = ArchiveState {
            version: 1,
            jobs: self.jobs,
        };
        let json = serde_json::to_string_pretty(&state).map_err(std::io::Error::other)?;

        let temp_file = self.path.with_extension("json.tmp");
        fs::write(&temp_file, &json)?;
        fs::rename(&temp_file, &self.path)?;

        *written = self.generation;
        tracing::debug!("Saved {} archived jobs", count);
        Ok(())
    }
}

impl JobStore {
    /// Create a store persisting its archive to `archive_file`.
    ///
    /// An existing archive is loaded; unreadable files are logged and
    /// ignored.
    pub fn new(archive_file: &Path) -> Self {
        let mut store = Self::in_memory();
        store.archive_file = archive_file.to_path_buf();

        if archive_file.exists() {
            match fs::read_to_string(archive_file) {
                Ok(content) => match serde_json::from_str::<ArchiveState>(&content) {
                    Ok(state) => {
                        tracing::info!("Loaded {} archived jobs", state.jobs.len());
                        for job in state.jobs {
                            store.push_archived(job);
                        }
                    }
                    Err(e) => tracing::warn!("Failed to parse job archive: {}", e),
                },
                Err(e) => tracing::warn!("Failed to read job archive: {}", e),
            }
        }
        store
    }

    /// Create a store without persistence.
    pub fn in_memory() -> Self {
        Self {
            active: HashMap::new(),
            archive: HashMap::new(),
            order: VecDeque::new(),
            limit: DEFAULT_ARCHIVE_LIMIT,
            archive_file: PathBuf::new(),
            generation: 0,
            written: Arc::new(Mutex::new(0)),
        }
    }

    /// Keep at most `limit` archived jobs (at least one).
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit.max(1);
        self.prune();
        self
    }

    /// Snapshot of the archive for writing; `None` for an in-memory store.
    pub fn snapshot(&mut self) -> Option<ArchiveWrite> {
        if self.archive_file.as_os_str().is_empty() {
            return None;
        }
        self.generation += 1;
        Some(ArchiveWrite {
            path: self.archive_file.clone(),
            jobs: self
                .order
                .iter()
                .filter_map(|id| self.archive.get(id).cloned())
                .collect(),
            generation: self.generation,
            written: Arc::clone(&self.written),
        })
    }

    /// Persist the archive to disk.
    pub fn save(&mut self) -> Result<(), std::io::Error> {
        match self.snapshot() {
            Some(pending) => pending.write(),
            None => Ok(()),
        }
    }

    fn push_archived(&mut self, job: Job) {
        if self.archive.insert(job.id, job.clone()).is_none() {
            self.order.push_back(job.id);
        }
        self.prune();
    }

    fn prune(&mut self) {
        while self.order.len() > self.limit {
            if let Some(oldest) = self.order.pop_front() {
                self.archive.remove(&oldest);
            }
        }
    }

    /// Track a newly submitted job.
    pub fn insert_active(&mut self, id: JobId, snapshots: watch::Receiver<Job>) {
        self.active.insert(id, snapshots);
    }

    /// Latest snapshot of a job, active or archived.
    pub fn get(&self, id: &JobId) -> Option<Job> {
        if let Some(rx) = self.active.get(id) {
            return Some(rx.borrow().clone());
        }
        self.archive.get(id).cloned()
    }

    /// Snapshot receiver for an active job.
    pub fn subscribe(&self, id: &JobId) -> Option<watch::Receiver<Job>> {
        self.active.get(id).cloned()
    }

    pub fn archived(&self, id: &JobId) -> Option<&Job> {
        self.archive.get(id)
    }

    pub fn contains(&self, id: &JobId) -> bool {
        self.active.contains_key(id) || self.archive.contains_key(id)
    }

    /// Move a terminal job from the active set into the archive.
    ///
    /// Returns the snapshot to persist; the caller writes it after
    /// releasing the store.
    #[must_use = "the returned snapshot must be written to persist the archive"]
    pub fn archive(&mut self, job: Job) -> Option<ArchiveWrite> {
        self.active.remove(&job.id);
        self.push_archived(job);
        self.snapshot()
    }

    /// Ids of jobs that have not been archived yet.
    pub fn active_ids(&self) -> Vec<JobId> {
        self.active.keys().copied().collect()
    }

    pub fn active_len(&self) -> usize {
        self.active.len()
    }

    pub fn archived_len(&self) -> usize {
        self.archive.len()
    }
}
