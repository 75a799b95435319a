use crate::jobs::job::Job;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Default cap on the number of jobs returned by [`JobRegistry::list`].
pub const LIST_LIMIT: usize = 100;

struct RegistryInner {
    jobs: HashMap<String, Job>,
    /// Insertion order of job ids; `list` returns the tail of this.
    order: Vec<String>,
}

/// In-memory job store. Owns all job state; every mutation goes through
/// one of the atomic operations below. Performs no I/O.
pub struct JobRegistry {
    inner: RwLock<RegistryInner>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(RegistryInner {
                jobs: HashMap::new(),
                order: Vec::new(),
            }),
        }
    }

    /// Allocate a fresh id and insert a record in `started` status.
    pub async fn create(&self, output_file_name: String) -> Job {
        let job = Job::new(Uuid::new_v4().to_string(), output_file_name);
        let mut inner = self.inner.write().await;
        inner.order.push(job.id.clone());
        inner.jobs.insert(job.id.clone(), job.clone());
        job
    }

    pub async fn get(&self, id: &str) -> Option<Job> {
        self.inner.read().await.jobs.get(id).cloned()
    }

    /// The most recent `limit` jobs in submission order.
    pub async fn list(&self, limit: usize) -> Vec<Job> {
        let inner = self.inner.read().await;
        let skip = inner.order.len().saturating_sub(limit);
        inner.order[skip..]
            .iter()
            .filter_map(|id| inner.jobs.get(id).cloned())
            .collect()
    }

    /// Apply an in-place state transition. A missing job is a legitimate
    /// race with a concurrent delete, so this is a silent no-op.
    pub async fn update(&self, id: &str, mutate: impl FnOnce(&mut Job)) {
        if let Some(job) = self.inner.write().await.jobs.get_mut(id) {
            mutate(job);
        }
    }

    /// Remove the record. Does not touch the filesystem; releasing the
    /// artifact first is the caller's responsibility.
    pub async fn delete(&self, id: &str) -> bool {
        let mut inner = self.inner.write().await;
        let removed = inner.jobs.remove(id).is_some();
        if removed {
            inner.order.retain(|other| other != id);
        }
        removed
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.jobs.len()
    }
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new()
    }
}
