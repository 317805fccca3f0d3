use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use osmio_common::error::Result;
use tokio::io::AsyncRead;

pub mod local;

/// Reserved namespace for engine-internal state. Never visible as a bucket.
pub const SYS_META_BUCKET: &str = ".osmio.sys";
/// Per-operation UUID-named scratch space.
pub const TMP_META_BUCKET: &str = ".osmio.sys/tmp";
/// Multipart staging, laid out as `SHA-dir / uploadID / {er.json, part.N}`.
pub const MULTIPART_META_BUCKET: &str = ".osmio.sys/multipart";
/// Per-upload (and per-object) metadata manifest file name.
pub const META_FILE_NAME: &str = "er.json";

#[derive(Debug, Clone)]
pub struct FileStat {
    pub mod_time: DateTime<Utc>,
    pub size: i64,
}

/// One storage peer. Implementations must keep renames as metadata-only
/// same-volume moves; that is the atomicity primitive the commit protocol
/// is built on.
#[async_trait]
pub trait DiskApi: Send + Sync + std::fmt::Debug {
    async fn make_vol(&self, volume: &str) -> Result<()>;

    async fn stat_vol(&self, volume: &str) -> Result<()>;

    /// Child names under `dir_path`. `limit = -1` means unlimited. Absent
    /// prefix is `FileNotFound`.
    async fn list_dir(&self, volume: &str, dir_path: &str, limit: i32) -> Result<Vec<String>>;

    async fn stat_file(&self, volume: &str, path: &str) -> Result<FileStat>;

    /// Idempotent: an absent path is a success.
    async fn delete(&self, volume: &str, path: &str, recursive: bool) -> Result<()>;

    /// Atomic rename of a single metadata file.
    async fn rename_metadata(
        &self,
        src_volume: &str,
        src_path: &str,
        dst_volume: &str,
        dst_path: &str,
    ) -> Result<()>;

    /// Atomic rename of a file or directory.
    async fn rename_file(
        &self,
        src_volume: &str,
        src_path: &str,
        dst_volume: &str,
        dst_path: &str,
    ) -> Result<()>;

    async fn read_all(&self, volume: &str, path: &str) -> Result<Bytes>;

    async fn write_all(&self, volume: &str, path: &str, data: Bytes) -> Result<()>;

    /// Streams `reader` into a freshly created file. `file_size = -1` means
    /// the length is not known up front.
    async fn create_file(
        &self,
        volume: &str,
        path: &str,
        file_size: i64,
        reader: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<()>;

    async fn read_file(&self, volume: &str, path: &str) -> Result<Bytes>;
}

pub type Disk = Arc<dyn DiskApi>;

/// A fleet of disks aligned by index. `None` marks an offline peer; all
/// fan-out code treats it as `DiskNotFound`.
pub type Disks = Vec<Option<Disk>>;
