use std::collections::HashMap;
use std::path::{Component, Path};
use std::sync::{Arc, Mutex};

use osmio_common::error::{OsmioError, Result};

use crate::disk::{Disks, MULTIPART_META_BUCKET, SYS_META_BUCKET, TMP_META_BUCKET};
use crate::erasure::DEFAULT_BLOCK_SIZE;
use crate::mrf::MrfQueue;
use crate::pool::BufferPool;

/// Pooled block buffers kept warm per set.
const BUFFER_POOL_CAPACITY: usize = 16;

#[derive(Debug, Clone)]
pub struct SetConfig {
    /// Parity shards per object; `None` derives N/2 from the disk count.
    pub parity: Option<usize>,
    pub block_size: usize,
    /// Write-once-read-many: Complete refuses to replace a readable object.
    pub worm: bool,
}

impl Default for SetConfig {
    fn default() -> Self {
        Self {
            parity: None,
            block_size: DEFAULT_BLOCK_SIZE,
            worm: false,
        }
    }
}

/// One erasure set: a fixed fleet of disks plus the engine-wide shared
/// state (buffer pool, MRF producer, per-upload commit locks).
#[derive(Debug)]
pub struct ErasureSet {
    disks: Disks,
    block_size: usize,
    default_parity: usize,
    worm: bool,
    pool: Arc<BufferPool>,
    mrf: Arc<MrfQueue>,
    upload_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl ErasureSet {
    pub async fn new(disks: Disks, config: SetConfig) -> Result<Self> {
        if disks.len() < 2 {
            return Err(OsmioError::InvalidArgument(format!(
                "an erasure set needs at least 2 disks, got {}",
                disks.len()
            )));
        }
        let default_parity = match config.parity {
            Some(parity) if parity == 0 || parity >= disks.len() => {
                return Err(OsmioError::InvalidArgument(format!(
                    "invalid parity {parity} for {} disks",
                    disks.len()
                )));
            }
            Some(parity) => parity,
            None => disks.len() / 2,
        };

        for disk in disks.iter().flatten() {
            disk.make_vol(TMP_META_BUCKET).await?;
            disk.make_vol(MULTIPART_META_BUCKET).await?;
        }

        Ok(Self {
            disks,
            block_size: config.block_size,
            default_parity,
            worm: config.worm,
            pool: Arc::new(BufferPool::new(config.block_size, BUFFER_POOL_CAPACITY)),
            mrf: Arc::new(MrfQueue::default()),
            upload_locks: Mutex::new(HashMap::new()),
        })
    }

    /// Snapshot of the fleet, frozen for the duration of one operation so
    /// per-index error vectors stay meaningful.
    pub fn disks(&self) -> Disks {
        self.disks.clone()
    }

    pub fn disk_count(&self) -> usize {
        self.disks.len()
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn default_parity(&self) -> usize {
        self.default_parity
    }

    pub fn worm_enabled(&self) -> bool {
        self.worm
    }

    pub fn pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }

    pub fn mrf(&self) -> &Arc<MrfQueue> {
        &self.mrf
    }

    /// Serialises the manifest read-modify-write-commit window per upload.
    /// Without this, concurrent PutParts on one upload can lose a part
    /// entry even though its shard files landed.
    pub(crate) fn upload_lock(&self, upload_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.upload_locks.lock().expect("upload lock map poisoned");
        locks
            .entry(upload_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    pub(crate) fn drop_upload_lock(&self, upload_id: &str) {
        let mut locks = self.upload_locks.lock().expect("upload lock map poisoned");
        if let Some(lock) = locks.get(upload_id) {
            // Only the map itself still references the mutex.
            if Arc::strong_count(lock) == 1 {
                locks.remove(upload_id);
            }
        }
    }

    pub async fn make_bucket(&self, bucket: &str) -> Result<()> {
        validate_bucket_name(bucket)?;
        let mut created = 0_usize;
        for disk in self.disks.iter().flatten() {
            if disk.make_vol(bucket).await.is_ok() {
                created += 1;
            }
        }
        let quorum = self.disks.len() / 2 + 1;
        if created < quorum {
            return Err(OsmioError::WriteQuorumNotMet {
                have: created,
                want: quorum,
            });
        }
        Ok(())
    }

    pub(crate) async fn ensure_bucket(&self, bucket: &str) -> Result<()> {
        validate_bucket_name(bucket)?;
        for disk in self.disks.iter().flatten() {
            if disk.stat_vol(bucket).await.is_ok() {
                return Ok(());
            }
        }
        Err(OsmioError::BucketNotFound(bucket.to_string()))
    }
}

pub fn validate_bucket_name(bucket: &str) -> Result<()> {
    if bucket.is_empty()
        || bucket == SYS_META_BUCKET
        || bucket.contains('/')
        || bucket.contains('\\')
    {
        return Err(OsmioError::InvalidArgument(format!(
            "invalid bucket name: {bucket}"
        )));
    }
    Ok(())
}

pub fn validate_object_key(key: &str) -> Result<()> {
    if key.is_empty() || key.contains('\\') {
        return Err(OsmioError::InvalidArgument(format!(
            "invalid object name: {key}"
        )));
    }

    let key_path = Path::new(key);
    if key_path.is_absolute() {
        return Err(OsmioError::InvalidArgument(format!(
            "invalid object name: {key}"
        )));
    }
    for component in key_path.components() {
        match component {
            Component::Normal(_) => {}
            Component::CurDir
            | Component::ParentDir
            | Component::RootDir
            | Component::Prefix(_) => {
                return Err(OsmioError::InvalidArgument(format!(
                    "invalid object name: {key}"
                )));
            }
        }
    }
    Ok(())
}
