use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use osmio_common::error::{OsmioError, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_MRF_CAPACITY: usize = 100_000;

/// One object that committed without reaching every disk. The healing
/// subsystem rebuilds the missing shards from these entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartialUpload {
    pub bucket: String,
    pub object: String,
    pub failed_disk_indices: Vec<usize>,
    pub queued_at: DateTime<Utc>,
}

impl PartialUpload {
    pub fn new(
        bucket: impl Into<String>,
        object: impl Into<String>,
        failed_disk_indices: Vec<usize>,
    ) -> Self {
        Self {
            bucket: bucket.into(),
            object: object.into(),
            failed_disk_indices,
            queued_at: Utc::now(),
        }
    }
}

/// Most-recently-failed list, producer side only: operations enqueue,
/// the out-of-band healer owns consumption. Bounded; a full queue drops
/// the entry and counts it.
#[derive(Debug)]
pub struct MrfQueue {
    entries: Mutex<VecDeque<PartialUpload>>,
    capacity: usize,
    dropped: AtomicU64,
}

impl MrfQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = if capacity == 0 {
            DEFAULT_MRF_CAPACITY
        } else {
            capacity
        };
        Self {
            entries: Mutex::new(VecDeque::new()),
            capacity,
            dropped: AtomicU64::new(0),
        }
    }

    pub fn enqueue(&self, entry: PartialUpload) -> Result<()> {
        let mut entries = self.entries.lock().expect("MRF queue poisoned");
        if entries.len() >= self.capacity {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return Err(OsmioError::InternalError(
                "MRF queue is full; entry dropped".to_string(),
            ));
        }
        entries.push_back(entry);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("MRF queue poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Default for MrfQueue {
    fn default() -> Self {
        Self::new(DEFAULT_MRF_CAPACITY)
    }
}
