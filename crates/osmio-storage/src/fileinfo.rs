use std::collections::HashMap;

use chrono::{DateTime, Utc};
use osmio_common::error::{OsmioError, Result};
use osmio_common::types::ObjectInfo;
use serde::{Deserialize, Serialize};

use crate::bitrot::BitrotAlgorithm;

/// Metadata key carrying the final object ETag after Complete.
pub const META_ETAG: &str = "etag";
/// Metadata key carrying the caller content type.
pub const META_CONTENT_TYPE: &str = "content-type";
/// Metadata key carrying the pre-transformation object size after Complete.
pub const META_ACTUAL_SIZE: &str = "x-osmio-internal-actual-size";

pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ObjectPartInfo {
    pub number: i32,
    pub etag: String,
    pub size: i64,
    pub actual_size: i64,
}

/// One per-part shard digest. Each disk stores only the entry for its own
/// shard; this is the single field on which per-disk manifest copies diverge.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChecksumInfo {
    pub part_number: i32,
    pub algorithm: BitrotAlgorithm,
    pub hash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErasureInfo {
    pub data_blocks: usize,
    pub parity_blocks: usize,
    pub block_size: usize,
    /// Permutation of `[1..N]`: `distribution[i]` is the 1-based logical
    /// shard index stored on physical disk `i`. Fixed for the whole upload.
    pub distribution: Vec<usize>,
    pub checksums: Vec<ChecksumInfo>,
}

impl ErasureInfo {
    pub fn total_shards(&self) -> usize {
        self.data_blocks + self.parity_blocks
    }

    /// Per-block shard length, rounded up to even for the GF(2^16) codec.
    pub fn shard_size(&self, block_len: usize) -> usize {
        let mut size = block_len.div_ceil(self.data_blocks);
        if size % 2 != 0 {
            size += 1;
        }
        size
    }

    /// On-disk payload length of one shard for a stream of `total` bytes
    /// (excluding bitrot headers).
    pub fn shard_file_size(&self, total: i64) -> i64 {
        if total < 0 {
            return -1;
        }
        if total == 0 {
            return 0;
        }
        let total = total as usize;
        let full_blocks = total / self.block_size;
        let last_block = total % self.block_size;
        let mut size = full_blocks * self.shard_size(self.block_size);
        if last_block > 0 {
            size += self.shard_size(last_block);
        }
        size as i64
    }

    pub fn checksum_for_part(&self, part_number: i32) -> Option<&ChecksumInfo> {
        self.checksums
            .iter()
            .find(|c| c.part_number == part_number)
    }

    /// Replaces this disk's digest for `part_number`, keeping entries for
    /// other parts untouched and the vector ordered by part number.
    pub fn set_checksum(&mut self, checksum: ChecksumInfo) {
        match self
            .checksums
            .binary_search_by_key(&checksum.part_number, |c| c.part_number)
        {
            Ok(idx) => self.checksums[idx] = checksum,
            Err(idx) => self.checksums.insert(idx, checksum),
        }
    }
}

/// Per-upload metadata manifest; one copy per disk, all copies mutually
/// consistent at quorum except for `erasure.checksums`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileInfo {
    pub volume: String,
    pub name: String,
    pub mod_time: DateTime<Utc>,
    pub size: i64,
    pub metadata: HashMap<String, String>,
    pub parts: Vec<ObjectPartInfo>,
    pub erasure: ErasureInfo,
    /// Fields written by newer engine versions survive read-modify-write.
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl FileInfo {
    pub fn new(
        volume: impl Into<String>,
        name: impl Into<String>,
        erasure: ErasureInfo,
        metadata: HashMap<String, String>,
    ) -> Self {
        Self {
            volume: volume.into(),
            name: name.into(),
            mod_time: Utc::now(),
            size: 0,
            metadata,
            parts: Vec::new(),
            erasure,
            extra: HashMap::new(),
        }
    }

    /// `write-quorum = data + 1`: any smaller set could be outvoted by a
    /// second partition of the same upload.
    pub fn write_quorum(&self) -> usize {
        self.erasure.data_blocks + 1
    }

    pub fn read_quorum(&self) -> usize {
        self.erasure.data_blocks
    }

    /// Inserts or replaces the entry for `number`, keeping `parts` strictly
    /// increasing. Replaced shard files are orphaned until Complete sweeps
    /// them.
    pub fn add_object_part(&mut self, number: i32, etag: String, size: i64, actual_size: i64) {
        let part = ObjectPartInfo {
            number,
            etag,
            size,
            actual_size,
        };
        match self.parts.binary_search_by_key(&number, |p| p.number) {
            Ok(idx) => self.parts[idx] = part,
            Err(idx) => self.parts.insert(idx, part),
        }
    }

    pub fn part(&self, number: i32) -> Option<&ObjectPartInfo> {
        self.parts
            .binary_search_by_key(&number, |p| p.number)
            .ok()
            .map(|idx| &self.parts[idx])
    }

    pub fn to_object_info(&self, bucket: &str, key: &str) -> ObjectInfo {
        let actual_size = self
            .metadata
            .get(META_ACTUAL_SIZE)
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(self.size);
        ObjectInfo {
            bucket: bucket.to_string(),
            key: key.to_string(),
            size: self.size,
            actual_size,
            etag: self.metadata.get(META_ETAG).cloned().unwrap_or_default(),
            content_type: self
                .metadata
                .get(META_CONTENT_TYPE)
                .cloned()
                .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string()),
            last_modified: self.mod_time,
            metadata: self.metadata.clone(),
        }
    }
}

/// Picks the authoritative manifest: the newest `mod_time` held by at least
/// `quorum` copies. Copies at any other `mod_time` are stale.
pub fn find_file_info_in_quorum(metas: &[Option<FileInfo>], quorum: usize) -> Result<FileInfo> {
    let mut counts: HashMap<DateTime<Utc>, usize> = HashMap::new();
    for meta in metas.iter().flatten() {
        *counts.entry(meta.mod_time).or_insert(0) += 1;
    }

    let quorum_time = counts
        .into_iter()
        .filter(|(_, count)| *count >= quorum)
        .map(|(time, _)| time)
        .max();

    let Some(quorum_time) = quorum_time else {
        let have = metas.iter().flatten().count();
        return Err(OsmioError::ReadQuorumNotMet {
            have,
            want: quorum,
        });
    };

    metas
        .iter()
        .flatten()
        .find(|meta| meta.mod_time == quorum_time)
        .cloned()
        .ok_or(OsmioError::ReadQuorumNotMet {
            have: 0,
            want: quorum,
        })
}
