use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use osmio_common::error::Result;
use osmio_common::types::ObjectInfo;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncRead;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletePart {
    pub part_number: i32,
    pub etag: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartInfo {
    pub part_number: i32,
    pub etag: String,
    pub size: i64,
    pub actual_size: i64,
    pub last_modified: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultipartUploadInfo {
    pub object: String,
    pub upload_id: String,
    pub initiated: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListPartsResult {
    pub bucket: String,
    pub object: String,
    pub upload_id: String,
    pub part_number_marker: i32,
    pub next_part_number_marker: i32,
    pub max_parts: i32,
    pub is_truncated: bool,
    pub parts: Vec<PartInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListMultipartsResult {
    pub bucket: String,
    pub object: String,
    pub max_uploads: i32,
    pub is_truncated: bool,
    pub uploads: Vec<MultipartUploadInfo>,
}

/// Visible lifecycle state of an object key, resolved by a single probe so
/// callers never juggle racy boolean flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectState {
    Absent,
    Staged,
    Committed,
}

/// The multipart lifecycle surface. Argument shapes follow the S3 calls the
/// outer API layer translates into these operations.
#[async_trait]
pub trait MultipartLayer: Send + Sync {
    async fn new_multipart_upload(
        &self,
        bucket: &str,
        object: &str,
        user_meta: HashMap<String, String>,
    ) -> Result<String>;

    /// `size = -1` means the stream length is unknown (chunked upload).
    async fn put_object_part(
        &self,
        bucket: &str,
        object: &str,
        upload_id: &str,
        part_number: i32,
        reader: &mut (dyn AsyncRead + Send + Unpin),
        size: i64,
    ) -> Result<PartInfo>;

    async fn copy_object_part(
        &self,
        src_bucket: &str,
        src_object: &str,
        dst_bucket: &str,
        dst_object: &str,
        upload_id: &str,
        part_number: i32,
    ) -> Result<PartInfo>;

    async fn list_object_parts(
        &self,
        bucket: &str,
        object: &str,
        upload_id: &str,
        part_number_marker: i32,
        max_parts: i32,
    ) -> Result<ListPartsResult>;

    async fn list_multipart_uploads(
        &self,
        bucket: &str,
        object: &str,
        max_uploads: i32,
    ) -> Result<ListMultipartsResult>;

    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        object: &str,
        upload_id: &str,
        parts: Vec<CompletePart>,
    ) -> Result<ObjectInfo>;

    async fn abort_multipart_upload(
        &self,
        bucket: &str,
        object: &str,
        upload_id: &str,
    ) -> Result<()>;
}
