use std::collections::HashMap;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use md5::{Digest, Md5};
use osmio_common::error::{OsmioError, Result};
use osmio_common::types::ObjectInfo;
use rand::Rng;
use sha2::Sha256;
use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf};
use tokio::sync::watch;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::bitrot::{BitrotAlgorithm, BitrotWriter};
use crate::disk::{Disks, META_FILE_NAME, MULTIPART_META_BUCKET, TMP_META_BUCKET};
use crate::erasure::Erasure;
use crate::erasure::set::{ErasureSet, validate_bucket_name, validate_object_key};
use crate::fileinfo::{
    ChecksumInfo, FileInfo, META_ACTUAL_SIZE, META_CONTENT_TYPE, META_ETAG, ObjectPartInfo,
    find_file_info_in_quorum,
};
use crate::metadata::{
    commit_rename_fileinfo, delete_all, read_all_fileinfo, write_unique_fileinfo,
};
use crate::mrf::PartialUpload;
use crate::quorum::{count_err, list_online_disks, random_distribution, reduce_write_quorum_errs, shuffle_disks};
use crate::traits::{
    CompletePart, ListMultipartsResult, ListPartsResult, MultipartLayer, MultipartUploadInfo,
    ObjectState, PartInfo,
};

pub const MAX_PARTS_LIST: i32 = 10_000;
pub const MAX_UPLOADS_LIST: i32 = 10_000;
pub const MAX_PART_NUMBER: i32 = 10_000;
/// Applies to every part except the last one at Complete time.
pub const MIN_PART_SIZE: i64 = 5 * 1024 * 1024;

const AMZ_STORAGE_CLASS: &str = "x-amz-storage-class";
const STORAGE_CLASS_RRS: &str = "REDUCED_REDUNDANCY";

#[derive(Debug, Clone)]
pub struct CleanupConfig {
    pub interval: Duration,
    /// Uploads whose manifest has not been touched for this long are
    /// removed. Actively written uploads keep refreshing their mod_time.
    pub expiry: Duration,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(24 * 60 * 60),
            expiry: Duration::from_secs(14 * 24 * 60 * 60),
        }
    }
}

/// Content-addressed staging directory for one (bucket, object) pair: a
/// fixed-length name decoupled from the user-visible key.
pub(crate) fn sha_dir(bucket: &str, object: &str) -> String {
    let digest = Sha256::digest(format!("{bucket}/{object}").as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

fn upload_dir(bucket: &str, object: &str, upload_id: &str) -> String {
    format!("{}/{}", sha_dir(bucket, object), upload_id)
}

fn part_file(part_number: i32) -> String {
    format!("part.{part_number}")
}

impl ErasureSet {
    /// Re-reads the upload manifest on all disks and resolves the
    /// authoritative copy. Absence at quorum is `NoSuchUpload`.
    pub(crate) async fn check_upload_id_exists(
        &self,
        disks: &Disks,
        bucket: &str,
        object: &str,
        upload_id: &str,
    ) -> Result<(Vec<Option<FileInfo>>, Vec<Option<OsmioError>>, FileInfo)> {
        let dir = upload_dir(bucket, object, upload_id);
        let (metas, errs) = read_all_fileinfo(disks, MULTIPART_META_BUCKET, &dir).await;

        let no_such_upload = || OsmioError::NoSuchUpload {
            bucket: bucket.to_string(),
            key: object.to_string(),
            upload_id: upload_id.to_string(),
        };

        let Some(sample) = metas.iter().flatten().next() else {
            let fallback_quorum = (disks.len() / 2).max(1);
            if count_err(&errs, "FileNotFound") >= fallback_quorum {
                return Err(no_such_upload());
            }
            return Err(OsmioError::ReadQuorumNotMet {
                have: 0,
                want: fallback_quorum,
            });
        };

        let read_quorum = sample.read_quorum();
        match find_file_info_in_quorum(&metas, read_quorum) {
            Ok(fi) => Ok((metas, errs, fi)),
            Err(err) => {
                if count_err(&errs, "FileNotFound") >= read_quorum {
                    Err(no_such_upload())
                } else {
                    Err(err)
                }
            }
        }
    }

    async fn purge_scratch(&self, disks: &Disks, prefixes: &[String]) {
        for prefix in prefixes {
            for err in delete_all(disks, TMP_META_BUCKET, prefix).await.iter().flatten() {
                if !matches!(err, OsmioError::FileNotFound | OsmioError::DiskNotFound) {
                    debug!(error = %err, %prefix, "scratch cleanup failed");
                }
            }
        }
    }

    async fn new_multipart_inner(
        &self,
        bucket: &str,
        object: &str,
        user_meta: HashMap<String, String>,
        disks: &Disks,
        scratch: &mut Vec<String>,
    ) -> Result<String> {
        let disk_count = disks.len();
        let parity = match user_meta.get(AMZ_STORAGE_CLASS).map(String::as_str) {
            Some(STORAGE_CLASS_RRS) => 1,
            _ => self.default_parity(),
        };
        let data = disk_count - parity;

        let mut metadata = user_meta;
        metadata.remove(AMZ_STORAGE_CLASS);
        if !metadata.contains_key(META_CONTENT_TYPE) {
            if let Some(content_type) = content_type_from_extension(object) {
                metadata.insert(META_CONTENT_TYPE.to_string(), content_type.to_string());
            }
        }

        let fi = FileInfo::new(
            bucket,
            object,
            crate::fileinfo::ErasureInfo {
                data_blocks: data,
                parity_blocks: parity,
                block_size: self.block_size(),
                distribution: random_distribution(disk_count),
                checksums: Vec::new(),
            },
            metadata,
        );
        let write_quorum = fi.write_quorum();

        let upload_id = Uuid::new_v4().to_string();
        scratch.push(upload_id.clone());

        // No per-disk checksum divergence yet: N identical manifests.
        let fis: Vec<Option<FileInfo>> = (0..disk_count).map(|_| Some(fi.clone())).collect();
        write_unique_fileinfo(disks, TMP_META_BUCKET, &upload_id, &fis, write_quorum).await?;
        commit_rename_fileinfo(
            disks,
            TMP_META_BUCKET,
            &upload_id,
            MULTIPART_META_BUCKET,
            &upload_dir(bucket, object, &upload_id),
            write_quorum,
        )
        .await?;

        Ok(upload_id)
    }

    #[allow(clippy::too_many_arguments)]
    async fn put_part_inner(
        &self,
        bucket: &str,
        object: &str,
        upload_id: &str,
        part_number: i32,
        reader: &mut (dyn AsyncRead + Send + Unpin),
        size: i64,
        disks: &Disks,
        scratch: &mut Vec<String>,
    ) -> Result<PartInfo> {
        let (metas, _errs, fi) = self
            .check_upload_id_exists(disks, bucket, object, upload_id)
            .await?;
        let write_quorum = fi.write_quorum();
        let erasure = Erasure::from_info(&fi.erasure);

        let (mut online_disks, _) = list_online_disks(disks, &metas);
        let shuffled = shuffle_disks(&online_disks, &fi.erasure.distribution);

        let tmp_part = Uuid::new_v4().to_string();
        scratch.push(tmp_part.clone());
        let tmp_part_path = format!("{tmp_part}/{}", part_file(part_number));

        // 0 forces immediate EOF detection; sub-block sizes get an exact
        // buffer; everything else borrows a pooled block buffer.
        let (mut buf, pooled) = match size {
            0 => (vec![0_u8; 1], false),
            s if s < 0 || s >= self.block_size() as i64 => (self.pool().get(), true),
            s => (vec![0_u8; s as usize], false),
        };

        let shard_file_size = erasure.bitrot_shard_file_size(size);
        let mut writers: Vec<Option<BitrotWriter>> = shuffled
            .iter()
            .map(|disk| {
                disk.clone().map(|disk| {
                    BitrotWriter::new(disk, TMP_META_BUCKET, &tmp_part_path, shard_file_size)
                })
            })
            .collect();

        // Below data + 1 live writers nothing written here could ever be
        // read back, so the encoder aborts early.
        let encode_quorum = fi.erasure.data_blocks + 1;
        let mut body: Box<dyn AsyncRead + Send + Unpin + '_> = if size >= 0 {
            Box::new(reader.take(size as u64))
        } else {
            Box::new(reader)
        };
        let mut etag_reader = EtagReader::new(&mut body);
        let encode_result = erasure
            .encode_stream(&mut etag_reader, &mut writers, &mut buf, encode_quorum)
            .await;
        let etag = etag_reader.finish();
        if pooled {
            self.pool().put(buf);
        }
        let total = encode_result?;

        let hashes: Vec<Option<String>> = join_all(writers.into_iter().map(|writer| async move {
            match writer {
                Some(writer) => writer.finalize().await.ok(),
                None => None,
            }
        }))
        .await;

        if size >= 0 && total < size {
            return Err(OsmioError::IncompleteBody);
        }

        // A dead shard writer takes its disk offline for this operation.
        for (physical, &logical) in fi.erasure.distribution.iter().enumerate() {
            if hashes[logical - 1].is_none() {
                online_disks[physical] = None;
            }
        }
        let live = online_disks.iter().flatten().count();
        if live < write_quorum {
            return Err(OsmioError::WriteQuorumNotMet {
                have: live,
                want: write_quorum,
            });
        }

        // Steps 6-9 are a manifest read-modify-write linearised per upload;
        // a concurrent Abort is observed here as NoSuchUpload.
        let lock = self.upload_lock(upload_id);
        let _guard = lock.lock().await;

        let (metas, _errs, mut fi) = self
            .check_upload_id_exists(disks, bucket, object, upload_id)
            .await?;

        let dir = upload_dir(bucket, object, upload_id);
        let dst_part_path = format!("{dir}/{}", part_file(part_number));
        let src_path = tmp_part_path.as_str();
        let dst_path = dst_part_path.as_str();
        let rename_errs: Vec<Option<OsmioError>> =
            join_all(online_disks.iter().map(|disk| async move {
                match disk {
                    Some(disk) => {
                        disk.rename_file(TMP_META_BUCKET, src_path, MULTIPART_META_BUCKET, dst_path)
                            .await
                    }
                    None => Err(OsmioError::DiskNotFound),
                }
            }))
            .await
            .into_iter()
            .map(|outcome| outcome.err())
            .collect();
        if let Some(err) = reduce_write_quorum_errs(&rename_errs, write_quorum) {
            return Err(err);
        }
        for (disk, err) in online_disks.iter_mut().zip(&rename_errs) {
            if err.is_some() {
                *disk = None;
            }
        }

        let actual_size = total;
        fi.add_object_part(part_number, etag.clone(), total, actual_size);
        fi.mod_time = Utc::now();

        // Shared manifest plus per-disk checksum injection: each copy gets
        // its own shard digest for this part and keeps its private entries
        // for the others.
        let fis: Vec<Option<FileInfo>> = online_disks
            .iter()
            .enumerate()
            .map(|(physical, disk)| {
                disk.as_ref()?;
                let prior = metas[physical].as_ref()?;
                let logical = fi.erasure.distribution[physical] - 1;
                let hash = hashes[logical].clone()?;
                let mut copy = fi.clone();
                copy.erasure.checksums = prior.erasure.checksums.clone();
                copy.erasure.set_checksum(ChecksumInfo {
                    part_number,
                    algorithm: BitrotAlgorithm::Sha256Chain,
                    hash,
                });
                Some(copy)
            })
            .collect();

        let tmp_fi = Uuid::new_v4().to_string();
        scratch.push(tmp_fi.clone());
        let survivors =
            write_unique_fileinfo(&online_disks, TMP_META_BUCKET, &tmp_fi, &fis, write_quorum)
                .await?;
        commit_rename_fileinfo(
            &survivors,
            TMP_META_BUCKET,
            &tmp_fi,
            MULTIPART_META_BUCKET,
            &dir,
            write_quorum,
        )
        .await?;

        Ok(PartInfo {
            part_number,
            etag,
            size: total,
            actual_size,
            last_modified: fi.mod_time,
        })
    }

    async fn complete_inner(
        &self,
        bucket: &str,
        object: &str,
        upload_id: &str,
        parts: &[CompletePart],
        disks: &Disks,
        scratch: &mut Vec<String>,
    ) -> Result<ObjectInfo> {
        let (metas, _errs, mut fi) = self
            .check_upload_id_exists(disks, bucket, object, upload_id)
            .await?;
        let write_quorum = fi.write_quorum();

        // An ancestor key that is itself a committed object would shadow
        // the new object's directory.
        for ancestor in ancestors(object) {
            if self.object_state(bucket, &ancestor).await? == ObjectState::Committed {
                return Err(OsmioError::FileParentIsFile(ancestor));
            }
        }

        let s3_etag = complete_multipart_etag(parts)?;

        let mut new_parts: Vec<ObjectPartInfo> = Vec::with_capacity(parts.len());
        let mut previous_number = 0;
        for (idx, part) in parts.iter().enumerate() {
            if part.part_number <= previous_number {
                return Err(OsmioError::InvalidPartOrder);
            }
            previous_number = part.part_number;

            let Some(entry) = fi.part(part.part_number) else {
                return Err(OsmioError::InvalidPart {
                    part_number: part.part_number,
                    reason: "part was never uploaded".to_string(),
                });
            };
            if normalize_etag(&part.etag) != entry.etag {
                return Err(OsmioError::InvalidPart {
                    part_number: part.part_number,
                    reason: "etag does not match uploaded part".to_string(),
                });
            }
            let is_last = idx == parts.len() - 1;
            if !is_last && entry.actual_size < MIN_PART_SIZE {
                return Err(OsmioError::PartTooSmall {
                    part_number: part.part_number,
                    size: entry.actual_size,
                    min_size: MIN_PART_SIZE,
                });
            }
            new_parts.push(entry.clone());
        }
        let object_size: i64 = new_parts.iter().map(|p| p.size).sum();
        let object_actual_size: i64 = new_parts.iter().map(|p| p.actual_size).sum();
        let kept_numbers: Vec<i32> = new_parts.iter().map(|p| p.number).collect();
        let previous_parts = std::mem::replace(&mut fi.parts, new_parts);

        fi.size = object_size;
        fi.mod_time = Utc::now();
        fi.metadata.insert(META_ETAG.to_string(), s3_etag);
        fi.metadata
            .insert(META_ACTUAL_SIZE.to_string(), object_actual_size.to_string());

        let (online_disks, _) = list_online_disks(disks, &metas);
        let fis: Vec<Option<FileInfo>> = online_disks
            .iter()
            .enumerate()
            .map(|(physical, disk)| {
                disk.as_ref()?;
                let prior = metas[physical].as_ref()?;
                let mut copy = fi.clone();
                copy.erasure.checksums = prior.erasure.checksums.clone();
                copy.erasure
                    .checksums
                    .retain(|c| kept_numbers.contains(&c.part_number));
                Some(copy)
            })
            .collect();

        let dir = upload_dir(bucket, object, upload_id);
        let tmp_fi = Uuid::new_v4().to_string();
        scratch.push(tmp_fi.clone());
        let survivors =
            write_unique_fileinfo(&online_disks, TMP_META_BUCKET, &tmp_fi, &fis, write_quorum)
                .await?;
        let survivors = commit_rename_fileinfo(
            &survivors,
            TMP_META_BUCKET,
            &tmp_fi,
            MULTIPART_META_BUCKET,
            &dir,
            write_quorum,
        )
        .await?;

        if self.object_state(bucket, object).await? == ObjectState::Committed {
            if self.worm_enabled() {
                return Err(OsmioError::ObjectAlreadyExists {
                    bucket: bucket.to_string(),
                    key: object.to_string(),
                });
            }
            // The old object may live partly on disks that are offline for
            // this upload, so the move runs on the full fleet. Its bytes
            // land under a scratch UUID and die with the deferred purge.
            let old_body = Uuid::new_v4().to_string();
            scratch.push(old_body.clone());
            let old_body_path = old_body.as_str();
            let move_errs: Vec<Option<OsmioError>> =
                join_all(disks.iter().map(|disk| async move {
                    match disk {
                        Some(disk) => {
                            match disk
                                .rename_file(bucket, object, TMP_META_BUCKET, old_body_path)
                                .await
                            {
                                // Absent on this disk is an accepted outcome.
                                Err(OsmioError::FileNotFound) => Ok(()),
                                other => other,
                            }
                        }
                        None => Err(OsmioError::DiskNotFound),
                    }
                }))
                .await
                .into_iter()
                .map(|outcome| outcome.err())
                .collect();
            if let Some(err) = reduce_write_quorum_errs(&move_errs, write_quorum) {
                return Err(err);
            }
        }

        // Shard files for parts that were uploaded but not referenced by
        // this Complete are orphans; sweep them before promoting the dir.
        for part in &previous_parts {
            if kept_numbers.contains(&part.number) {
                continue;
            }
            let orphan = format!("{dir}/{}", part_file(part.number));
            for disk in disks.iter().flatten() {
                if let Err(err) = disk.delete(MULTIPART_META_BUCKET, &orphan, false).await {
                    debug!(error = %err, %orphan, "orphaned part sweep failed");
                }
            }
        }

        let staging_dir = dir.as_str();
        let promote_errs: Vec<Option<OsmioError>> =
            join_all(survivors.iter().map(|disk| async move {
                match disk {
                    Some(disk) => {
                        disk.rename_file(MULTIPART_META_BUCKET, staging_dir, bucket, object)
                            .await
                    }
                    None => Err(OsmioError::DiskNotFound),
                }
            }))
            .await
            .into_iter()
            .map(|outcome| outcome.err())
            .collect();
        if let Some(err) = reduce_write_quorum_errs(&promote_errs, write_quorum) {
            return Err(err);
        }

        let failed_disks: Vec<usize> = (0..disks.len())
            .filter(|&idx| {
                disks[idx].is_none()
                    || survivors[idx].is_none()
                    || promote_errs[idx].is_some()
            })
            .collect();
        if !failed_disks.is_empty() {
            if let Err(err) = self
                .mrf()
                .enqueue(PartialUpload::new(bucket, object, failed_disks))
            {
                warn!(error = %err, bucket, object, "failed to queue partial upload for healing");
            }
        }

        Ok(fi.to_object_info(bucket, object))
    }

    /// One janitor pass: walks the staging namespace on a single live disk
    /// and quorum-deletes every upload idle past `expiry`. Per-item errors
    /// are logged and retried on the next tick.
    pub async fn cleanup_stale_uploads(&self, expiry: Duration) -> Result<()> {
        let disks = self.disks();
        let disk_count = disks.len();
        let offset = rand::thread_rng().gen_range(0..disk_count);
        let Some(disk) = (0..disk_count).find_map(|k| disks[(offset + k) % disk_count].as_ref())
        else {
            return Err(OsmioError::DiskNotFound);
        };

        let sha_dirs = match disk.list_dir(MULTIPART_META_BUCKET, "", -1).await {
            Ok(names) => names,
            Err(OsmioError::FileNotFound) => return Ok(()),
            Err(err) => return Err(err),
        };

        let quorum = disk_count / 2 + 1;
        let expiry = chrono::Duration::from_std(expiry).unwrap_or(chrono::Duration::MAX);
        let now = Utc::now();

        for sha in sha_dirs {
            let uploads = match disk.list_dir(MULTIPART_META_BUCKET, &sha, -1).await {
                Ok(names) => names,
                Err(_) => continue,
            };
            for upload in uploads {
                let meta_path = format!("{sha}/{upload}/{META_FILE_NAME}");
                let stat = match disk.stat_file(MULTIPART_META_BUCKET, &meta_path).await {
                    Ok(stat) => stat,
                    Err(_) => continue,
                };
                if now - stat.mod_time <= expiry {
                    continue;
                }
                let target = format!("{sha}/{upload}");
                let errs = delete_all(&disks, MULTIPART_META_BUCKET, &target).await;
                if let Some(err) = reduce_write_quorum_errs(&errs, quorum) {
                    warn!(error = %err, upload_id = %upload, "stale upload removal missed quorum");
                } else {
                    debug!(upload_id = %upload, "removed stale multipart upload");
                }
            }
        }

        Ok(())
    }

    /// Long-running janitor. Exits as soon as the shutdown signal fires;
    /// an in-flight pass completes first.
    pub async fn run_cleanup_loop(
        &self,
        config: CleanupConfig,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(config.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = self.cleanup_stale_uploads(config.expiry).await {
                        warn!(error = %err, "stale multipart cleanup pass failed");
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
    }
}

#[async_trait]
impl MultipartLayer for ErasureSet {
    async fn new_multipart_upload(
        &self,
        bucket: &str,
        object: &str,
        user_meta: HashMap<String, String>,
    ) -> Result<String> {
        validate_bucket_name(bucket)?;
        validate_object_key(object)?;
        self.ensure_bucket(bucket).await?;

        let disks = self.disks();
        let mut scratch = Vec::new();
        let result = self
            .new_multipart_inner(bucket, object, user_meta, &disks, &mut scratch)
            .await;
        self.purge_scratch(&disks, &scratch).await;
        result
    }

    async fn put_object_part(
        &self,
        bucket: &str,
        object: &str,
        upload_id: &str,
        part_number: i32,
        reader: &mut (dyn AsyncRead + Send + Unpin),
        size: i64,
    ) -> Result<PartInfo> {
        validate_bucket_name(bucket)?;
        validate_object_key(object)?;
        if !(1..=MAX_PART_NUMBER).contains(&part_number) {
            return Err(OsmioError::InvalidArgument(format!(
                "invalid part number: {part_number}"
            )));
        }
        if size < -1 {
            return Err(OsmioError::InvalidArgument(format!(
                "invalid part size: {size}"
            )));
        }

        let disks = self.disks();
        let mut scratch = Vec::new();
        let result = self
            .put_part_inner(
                bucket,
                object,
                upload_id,
                part_number,
                reader,
                size,
                &disks,
                &mut scratch,
            )
            .await;
        self.purge_scratch(&disks, &scratch).await;
        self.drop_upload_lock(upload_id);
        result
    }

    /// A thin reduction over PutObjectPart: the source object's body is the
    /// part stream. No new protocol state.
    async fn copy_object_part(
        &self,
        src_bucket: &str,
        src_object: &str,
        dst_bucket: &str,
        dst_object: &str,
        upload_id: &str,
        part_number: i32,
    ) -> Result<PartInfo> {
        let (_info, body) = self.get_object(src_bucket, src_object).await?;
        let size = body.len() as i64;
        let mut reader = std::io::Cursor::new(body);
        self.put_object_part(
            dst_bucket,
            dst_object,
            upload_id,
            part_number,
            &mut reader,
            size,
        )
        .await
    }

    async fn list_object_parts(
        &self,
        bucket: &str,
        object: &str,
        upload_id: &str,
        part_number_marker: i32,
        max_parts: i32,
    ) -> Result<ListPartsResult> {
        validate_bucket_name(bucket)?;
        validate_object_key(object)?;
        if max_parts < 0 {
            return Err(OsmioError::InvalidArgument(format!(
                "invalid max parts: {max_parts}"
            )));
        }

        let disks = self.disks();
        let (_metas, _errs, fi) = self
            .check_upload_id_exists(&disks, bucket, object, upload_id)
            .await?;

        let limit = max_parts.min(MAX_PARTS_LIST) as usize;
        let selected: Vec<&ObjectPartInfo> = fi
            .parts
            .iter()
            .filter(|part| part.number > part_number_marker)
            .collect();
        let is_truncated = selected.len() > limit;
        let parts: Vec<PartInfo> = selected
            .into_iter()
            .take(limit)
            .map(|part| PartInfo {
                part_number: part.number,
                etag: part.etag.clone(),
                size: part.size,
                actual_size: part.actual_size,
                last_modified: fi.mod_time,
            })
            .collect();

        Ok(ListPartsResult {
            bucket: bucket.to_string(),
            object: object.to_string(),
            upload_id: upload_id.to_string(),
            part_number_marker,
            next_part_number_marker: if is_truncated {
                parts.last().map(|p| p.part_number).unwrap_or(0)
            } else {
                0
            },
            max_parts,
            is_truncated,
            parts,
        })
    }

    /// Exact-object scope only: no key prefix or delimiter fan-out. The
    /// first disk that can list the staging directory wins.
    async fn list_multipart_uploads(
        &self,
        bucket: &str,
        object: &str,
        max_uploads: i32,
    ) -> Result<ListMultipartsResult> {
        validate_bucket_name(bucket)?;
        validate_object_key(object)?;
        self.ensure_bucket(bucket).await?;

        let disks = self.disks();
        let disk_count = disks.len();
        let sha = sha_dir(bucket, object);
        let limit = if max_uploads <= 0 {
            MAX_UPLOADS_LIST as usize
        } else {
            max_uploads.min(MAX_UPLOADS_LIST) as usize
        };

        let mut result = ListMultipartsResult {
            bucket: bucket.to_string(),
            object: object.to_string(),
            max_uploads,
            is_truncated: false,
            uploads: Vec::new(),
        };

        let offset = rand::thread_rng().gen_range(0..disk_count);
        for k in 0..disk_count {
            let Some(disk) = disks[(offset + k) % disk_count].as_ref() else {
                continue;
            };
            let upload_ids = match disk.list_dir(MULTIPART_META_BUCKET, &sha, -1).await {
                Ok(names) => names,
                // No staging directory means no uploads for this object.
                Err(OsmioError::FileNotFound) => return Ok(result),
                Err(err) => {
                    debug!(error = %err, "listing multipart staging dir failed, trying next disk");
                    continue;
                }
            };

            result.is_truncated = upload_ids.len() > limit;
            for upload_id in upload_ids.into_iter().take(limit) {
                let meta_path = format!("{sha}/{upload_id}/{META_FILE_NAME}");
                let Ok(stat) = disk.stat_file(MULTIPART_META_BUCKET, &meta_path).await else {
                    continue;
                };
                result.uploads.push(MultipartUploadInfo {
                    object: object.to_string(),
                    upload_id,
                    initiated: stat.mod_time,
                });
            }
            return Ok(result);
        }

        Err(OsmioError::ReadQuorumNotMet { have: 0, want: 1 })
    }

    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        object: &str,
        upload_id: &str,
        parts: Vec<CompletePart>,
    ) -> Result<ObjectInfo> {
        validate_bucket_name(bucket)?;
        validate_object_key(object)?;
        if parts.is_empty() {
            return Err(OsmioError::InvalidArgument(
                "complete requires at least one part".to_string(),
            ));
        }

        let lock = self.upload_lock(upload_id);
        let guard = lock.lock().await;

        let disks = self.disks();
        let mut scratch = Vec::new();
        let result = self
            .complete_inner(bucket, object, upload_id, &parts, &disks, &mut scratch)
            .await;
        self.purge_scratch(&disks, &scratch).await;

        drop(guard);
        drop(lock);
        self.drop_upload_lock(upload_id);
        result
    }

    /// Terminal and idempotent: a second Abort, or an Abort after Complete,
    /// observes no upload and fails accordingly.
    async fn abort_multipart_upload(
        &self,
        bucket: &str,
        object: &str,
        upload_id: &str,
    ) -> Result<()> {
        validate_bucket_name(bucket)?;
        validate_object_key(object)?;

        let lock = self.upload_lock(upload_id);
        let guard = lock.lock().await;

        let disks = self.disks();
        let result = async {
            let (_metas, _errs, fi) = self
                .check_upload_id_exists(&disks, bucket, object, upload_id)
                .await?;
            let errs = delete_all(
                &disks,
                MULTIPART_META_BUCKET,
                &upload_dir(bucket, object, upload_id),
            )
            .await;
            match reduce_write_quorum_errs(&errs, fi.write_quorum()) {
                Some(err) => Err(err),
                None => Ok(()),
            }
        }
        .await;

        drop(guard);
        drop(lock);
        self.drop_upload_lock(upload_id);
        result
    }
}

/// Proper ancestor prefixes of an object key, shortest first.
fn ancestors(object: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut prefix = String::new();
    for segment in object.split('/') {
        if prefix.is_empty() {
            prefix = segment.to_string();
        } else {
            prefix = format!("{prefix}/{segment}");
        }
        out.push(prefix.clone());
    }
    out.pop();
    out
}

fn normalize_etag(etag: &str) -> String {
    let trimmed = etag.trim();
    if trimmed.starts_with('"') && trimmed.ends_with('"') && trimmed.len() >= 2 {
        trimmed[1..trimmed.len() - 1].to_string()
    } else {
        trimmed.to_string()
    }
}

fn decode_md5_hex(etag: &str) -> Option<[u8; 16]> {
    if etag.len() != 32 {
        return None;
    }
    let mut out = [0_u8; 16];
    for idx in 0..16 {
        out[idx] = u8::from_str_radix(&etag[idx * 2..idx * 2 + 2], 16).ok()?;
    }
    Some(out)
}

/// `md5(m_1 || m_2 || ... || m_n).hex + "-" + n` over the raw MD5 bytes of
/// the client-declared parts.
fn complete_multipart_etag(parts: &[CompletePart]) -> Result<String> {
    let mut material = Vec::with_capacity(parts.len() * 16);
    for part in parts {
        let md5_bytes =
            decode_md5_hex(&normalize_etag(&part.etag)).ok_or(OsmioError::InvalidPart {
                part_number: part.part_number,
                reason: "malformed etag".to_string(),
            })?;
        material.extend_from_slice(&md5_bytes);
    }
    Ok(format!("{:x}-{}", Md5::digest(&material), parts.len()))
}

fn content_type_from_extension(object: &str) -> Option<&'static str> {
    let ext = object.rsplit('.').next()?;
    let content_type = match ext.to_ascii_lowercase().as_str() {
        "txt" | "log" => "text/plain",
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "csv" => "text/csv",
        "js" => "text/javascript",
        "json" => "application/json",
        "xml" => "application/xml",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "gz" => "application/gzip",
        "tar" => "application/x-tar",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "mp3" => "audio/mpeg",
        "mp4" => "video/mp4",
        _ => return None,
    };
    Some(content_type)
}

/// Feeds the body through while folding an MD5 over everything read; the
/// digest becomes the part's ETag without a second pass over the stream.
struct EtagReader<'a, R: ?Sized> {
    inner: &'a mut R,
    hasher: Md5,
}

impl<'a, R: AsyncRead + Unpin + ?Sized> EtagReader<'a, R> {
    fn new(inner: &'a mut R) -> Self {
        Self {
            inner,
            hasher: Md5::new(),
        }
    }

    fn finish(self) -> String {
        format!("{:x}", self.hasher.finalize())
    }
}

impl<R: AsyncRead + Unpin + ?Sized> AsyncRead for EtagReader<'_, R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let me = self.get_mut();
        let before = buf.filled().len();
        match Pin::new(&mut *me.inner).poll_read(cx, buf) {
            Poll::Ready(Ok(())) => {
                me.hasher.update(&buf.filled()[before..]);
                Poll::Ready(Ok(()))
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::Cursor;
    use std::sync::Arc;
    use std::time::Duration;

    use md5::{Digest, Md5};
    use osmio_common::error::OsmioError;
    use tempfile::{TempDir, tempdir};
    use tokio::sync::watch;

    use super::CleanupConfig;
    use crate::disk::local::LocalDisk;
    use crate::disk::{Disk, Disks};
    use crate::erasure::set::{ErasureSet, SetConfig};
    use crate::traits::{CompletePart, MultipartLayer, ObjectState, PartInfo};

    const MIB: usize = 1024 * 1024;

    async fn open_disks(dir: &TempDir, count: usize) -> Disks {
        let mut disks: Disks = Vec::with_capacity(count);
        for idx in 0..count {
            let disk = LocalDisk::new(dir.path().join(format!("disk{idx}")))
                .await
                .unwrap();
            disks.push(Some(Arc::new(disk) as Disk));
        }
        disks
    }

    async fn test_set(dir: &TempDir) -> ErasureSet {
        let set = ErasureSet::new(open_disks(dir, 4).await, SetConfig::default())
            .await
            .unwrap();
        set.make_bucket("bucket").await.unwrap();
        set
    }

    async fn put_part(
        set: &ErasureSet,
        object: &str,
        upload_id: &str,
        number: i32,
        data: &[u8],
    ) -> PartInfo {
        let mut reader = Cursor::new(data.to_vec());
        set.put_object_part(
            "bucket",
            object,
            upload_id,
            number,
            &mut reader,
            data.len() as i64,
        )
        .await
        .unwrap()
    }

    fn complete_parts(parts: &[&PartInfo]) -> Vec<CompletePart> {
        parts
            .iter()
            .map(|p| CompletePart {
                part_number: p.part_number,
                etag: p.etag.clone(),
            })
            .collect()
    }

    fn md5_hex(data: &[u8]) -> String {
        format!("{:x}", Md5::digest(data))
    }

    #[tokio::test]
    async fn two_part_upload_lifecycle() {
        let dir = tempdir().unwrap();
        let set = test_set(&dir).await;
        let upload_id = set
            .new_multipart_upload("bucket", "object", HashMap::new())
            .await
            .unwrap();

        let part_a = vec![b'a'; 6 * MIB];
        let part_b = vec![b'b'; MIB];
        let p1 = put_part(&set, "object", &upload_id, 1, &part_a).await;
        let p2 = put_part(&set, "object", &upload_id, 2, &part_b).await;
        assert_eq!(p1.etag, md5_hex(&part_a));
        assert_eq!(p1.size, 6 * MIB as i64);

        let info = set
            .complete_multipart_upload("bucket", "object", &upload_id, complete_parts(&[&p1, &p2]))
            .await
            .unwrap();
        assert_eq!(info.size, 7 * MIB as i64);

        let mut material = Vec::new();
        material.extend_from_slice(&Md5::digest(&part_a));
        material.extend_from_slice(&Md5::digest(&part_b));
        assert_eq!(info.etag, format!("{:x}-2", Md5::digest(&material)));

        assert_eq!(
            set.object_state("bucket", "object").await.unwrap(),
            ObjectState::Committed
        );
        let (read_info, body) = set.get_object("bucket", "object").await.unwrap();
        assert_eq!(read_info.size, info.size);
        assert_eq!(read_info.etag, info.etag);
        assert_eq!(body.len(), 7 * MIB);
        assert!(body[..6 * MIB].iter().all(|&b| b == b'a'));
        assert!(body[6 * MIB..].iter().all(|&b| b == b'b'));

        // Complete consumed the staging directory.
        assert!(matches!(
            set.abort_multipart_upload("bucket", "object", &upload_id).await,
            Err(OsmioError::NoSuchUpload { .. })
        ));
        let listed = set
            .list_multipart_uploads("bucket", "object", 100)
            .await
            .unwrap();
        assert!(listed.uploads.is_empty());
    }

    #[tokio::test]
    async fn complete_orders_by_client_list_not_upload_order() {
        let dir = tempdir().unwrap();
        let set = test_set(&dir).await;
        let upload_id = set
            .new_multipart_upload("bucket", "object", HashMap::new())
            .await
            .unwrap();

        let part_a = vec![b'a'; 5 * MIB];
        let part_c = vec![b'c'; MIB];
        let part_b = vec![b'b'; 5 * MIB];
        let p1 = put_part(&set, "object", &upload_id, 1, &part_a).await;
        let p3 = put_part(&set, "object", &upload_id, 3, &part_c).await;
        let p2 = put_part(&set, "object", &upload_id, 2, &part_b).await;

        assert!(matches!(
            set.complete_multipart_upload(
                "bucket",
                "object",
                &upload_id,
                complete_parts(&[&p1, &p3, &p2]),
            )
            .await,
            Err(OsmioError::InvalidPartOrder)
        ));

        set.complete_multipart_upload("bucket", "object", &upload_id, complete_parts(&[&p1, &p2, &p3]))
            .await
            .unwrap();

        let (_, body) = set.get_object("bucket", "object").await.unwrap();
        assert_eq!(body.len(), 11 * MIB);
        assert!(body[..5 * MIB].iter().all(|&b| b == b'a'));
        assert!(body[5 * MIB..10 * MIB].iter().all(|&b| b == b'b'));
        assert!(body[10 * MIB..].iter().all(|&b| b == b'c'));
    }

    #[tokio::test]
    async fn small_middle_part_is_rejected() {
        let dir = tempdir().unwrap();
        let set = test_set(&dir).await;
        let upload_id = set
            .new_multipart_upload("bucket", "object", HashMap::new())
            .await
            .unwrap();

        let p1 = put_part(&set, "object", &upload_id, 1, &vec![b'a'; 5 * MIB]).await;
        let p2 = put_part(&set, "object", &upload_id, 2, &vec![b'b'; MIB]).await;
        let p3 = put_part(&set, "object", &upload_id, 3, &vec![b'c'; 5 * MIB]).await;

        let err = set
            .complete_multipart_upload("bucket", "object", &upload_id, complete_parts(&[&p1, &p2, &p3]))
            .await
            .unwrap_err();
        assert!(matches!(err, OsmioError::PartTooSmall { part_number: 2, .. }));
    }

    #[tokio::test]
    async fn reuploaded_part_replaces_previous_entry() {
        let dir = tempdir().unwrap();
        let set = test_set(&dir).await;
        let upload_id = set
            .new_multipart_upload("bucket", "object", HashMap::new())
            .await
            .unwrap();

        put_part(&set, "object", &upload_id, 1, &vec![b'x'; 5 * MIB]).await;
        let replacement = vec![b'y'; 5 * MIB];
        let p1 = put_part(&set, "object", &upload_id, 1, &replacement).await;

        let listed = set
            .list_object_parts("bucket", "object", &upload_id, 0, 100)
            .await
            .unwrap();
        assert_eq!(listed.parts.len(), 1);
        assert_eq!(listed.parts[0].etag, md5_hex(&replacement));

        set.complete_multipart_upload("bucket", "object", &upload_id, complete_parts(&[&p1]))
            .await
            .unwrap();
        let (_, body) = set.get_object("bucket", "object").await.unwrap();
        assert!(body.iter().all(|&b| b == b'y'));
    }

    #[tokio::test]
    async fn abort_is_terminal_and_idempotent() {
        let dir = tempdir().unwrap();
        let set = test_set(&dir).await;
        let upload_id = set
            .new_multipart_upload("bucket", "object", HashMap::new())
            .await
            .unwrap();
        put_part(&set, "object", &upload_id, 1, b"hello").await;

        set.abort_multipart_upload("bucket", "object", &upload_id)
            .await
            .unwrap();
        assert!(matches!(
            set.abort_multipart_upload("bucket", "object", &upload_id).await,
            Err(OsmioError::NoSuchUpload { .. })
        ));

        let mut reader = Cursor::new(b"more".to_vec());
        assert!(matches!(
            set.put_object_part("bucket", "object", &upload_id, 2, &mut reader, 4)
                .await,
            Err(OsmioError::NoSuchUpload { .. })
        ));
        assert!(matches!(
            set.list_object_parts("bucket", "object", &upload_id, 0, 10).await,
            Err(OsmioError::NoSuchUpload { .. })
        ));
    }

    #[tokio::test]
    async fn complete_validates_etags_and_part_numbers() {
        let dir = tempdir().unwrap();
        let set = test_set(&dir).await;
        let upload_id = set
            .new_multipart_upload("bucket", "object", HashMap::new())
            .await
            .unwrap();
        let p1 = put_part(&set, "object", &upload_id, 1, &vec![b'a'; 5 * MIB]).await;

        let err = set
            .complete_multipart_upload(
                "bucket",
                "object",
                &upload_id,
                vec![CompletePart {
                    part_number: 1,
                    etag: md5_hex(b"something else"),
                }],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, OsmioError::InvalidPart { part_number: 1, .. }));

        let err = set
            .complete_multipart_upload(
                "bucket",
                "object",
                &upload_id,
                vec![
                    CompletePart {
                        part_number: 1,
                        etag: p1.etag.clone(),
                    },
                    CompletePart {
                        part_number: 7,
                        etag: p1.etag.clone(),
                    },
                ],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, OsmioError::InvalidPart { part_number: 7, .. }));

        // Quoted ETags are canonicalised before comparison.
        set.complete_multipart_upload(
            "bucket",
            "object",
            &upload_id,
            vec![CompletePart {
                part_number: 1,
                etag: format!("\"{}\"", p1.etag),
            }],
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn short_body_fails_with_incomplete_body() {
        let dir = tempdir().unwrap();
        let set = test_set(&dir).await;
        let upload_id = set
            .new_multipart_upload("bucket", "object", HashMap::new())
            .await
            .unwrap();

        let mut reader = Cursor::new(vec![1_u8; 10]);
        let err = set
            .put_object_part("bucket", "object", &upload_id, 1, &mut reader, 20)
            .await
            .unwrap_err();
        assert!(matches!(err, OsmioError::IncompleteBody));

        // The upload itself is still usable afterwards.
        put_part(&set, "object", &upload_id, 1, b"retry").await;
    }

    #[tokio::test]
    async fn unknown_size_and_zero_size_parts() {
        let dir = tempdir().unwrap();
        let set = test_set(&dir).await;
        let upload_id = set
            .new_multipart_upload("bucket", "object", HashMap::new())
            .await
            .unwrap();

        let body = vec![b'z'; 100_000];
        let mut reader = Cursor::new(body.clone());
        let p1 = set
            .put_object_part("bucket", "object", &upload_id, 1, &mut reader, -1)
            .await
            .unwrap();
        assert_eq!(p1.size, 100_000);
        assert_eq!(p1.etag, md5_hex(&body));

        let mut empty = Cursor::new(Vec::new());
        let p2 = set
            .put_object_part("bucket", "object", &upload_id, 2, &mut empty, 0)
            .await
            .unwrap();
        assert_eq!(p2.size, 0);
        assert_eq!(p2.etag, md5_hex(b""));

        // Completing with only part 1 leaves part 2 an orphan; the sweep
        // removes its shard files before the staging dir is promoted.
        let info = set
            .complete_multipart_upload("bucket", "object", &upload_id, complete_parts(&[&p1]))
            .await
            .unwrap();
        assert_eq!(info.size, 100_000);
        assert!(!dir.path().join("disk0/bucket/object/part.2").exists());

        let (_, body) = set.get_object("bucket", "object").await.unwrap();
        assert_eq!(body.len(), 100_000);
    }

    #[tokio::test]
    async fn list_parts_paginates_by_marker() {
        let dir = tempdir().unwrap();
        let set = test_set(&dir).await;
        let upload_id = set
            .new_multipart_upload("bucket", "object", HashMap::new())
            .await
            .unwrap();
        for number in [1, 2, 3] {
            put_part(&set, "object", &upload_id, number, &vec![b'p'; 1024]).await;
        }

        let page = set
            .list_object_parts("bucket", "object", &upload_id, 0, 2)
            .await
            .unwrap();
        assert_eq!(page.parts.len(), 2);
        assert!(page.is_truncated);
        assert_eq!(page.next_part_number_marker, 2);

        let rest = set
            .list_object_parts("bucket", "object", &upload_id, page.next_part_number_marker, 2)
            .await
            .unwrap();
        assert_eq!(rest.parts.len(), 1);
        assert!(!rest.is_truncated);
        assert_eq!(rest.parts[0].part_number, 3);
    }

    #[tokio::test]
    async fn list_uploads_is_scoped_to_exact_object() {
        let dir = tempdir().unwrap();
        let set = test_set(&dir).await;
        let first = set
            .new_multipart_upload("bucket", "object", HashMap::new())
            .await
            .unwrap();
        let second = set
            .new_multipart_upload("bucket", "object", HashMap::new())
            .await
            .unwrap();
        set.new_multipart_upload("bucket", "unrelated", HashMap::new())
            .await
            .unwrap();

        let listed = set
            .list_multipart_uploads("bucket", "object", 100)
            .await
            .unwrap();
        assert_eq!(listed.uploads.len(), 2);
        let mut expected = vec![first.clone(), second.clone()];
        expected.sort();
        let ids: Vec<String> = listed.uploads.iter().map(|u| u.upload_id.clone()).collect();
        assert_eq!(ids, expected);

        let capped = set
            .list_multipart_uploads("bucket", "object", 1)
            .await
            .unwrap();
        assert_eq!(capped.uploads.len(), 1);
        assert!(capped.is_truncated);

        set.abort_multipart_upload("bucket", "object", &first)
            .await
            .unwrap();
        set.abort_multipart_upload("bucket", "object", &second)
            .await
            .unwrap();
        let listed = set
            .list_multipart_uploads("bucket", "object", 100)
            .await
            .unwrap();
        assert!(listed.uploads.is_empty());
    }

    #[tokio::test]
    async fn tolerates_one_offline_disk_and_queues_healing() {
        let dir = tempdir().unwrap();
        let mut disks = open_disks(&dir, 4).await;
        disks[3] = None;
        let set = ErasureSet::new(disks, SetConfig::default()).await.unwrap();
        set.make_bucket("bucket").await.unwrap();

        let upload_id = set
            .new_multipart_upload("bucket", "object", HashMap::new())
            .await
            .unwrap();
        let body = vec![b'd'; 6 * MIB];
        let p1 = put_part(&set, "object", &upload_id, 1, &body).await;
        set.complete_multipart_upload("bucket", "object", &upload_id, complete_parts(&[&p1]))
            .await
            .unwrap();

        assert!(set.mrf().len() >= 1);
        let (_, read) = set.get_object("bucket", "object").await.unwrap();
        assert_eq!(read.len(), body.len());
        assert!(read.iter().all(|&b| b == b'd'));
    }

    #[tokio::test]
    async fn reads_reconstruct_via_parity_after_commit() {
        let dir = tempdir().unwrap();
        {
            let set = test_set(&dir).await;
            let upload_id = set
                .new_multipart_upload("bucket", "object", HashMap::new())
                .await
                .unwrap();
            let p1 = put_part(&set, "object", &upload_id, 1, &vec![b'r'; 3 * MIB]).await;
            set.complete_multipart_upload("bucket", "object", &upload_id, complete_parts(&[&p1]))
                .await
                .unwrap();
        }

        // Reopen the fleet with one disk gone and another shard corrupted.
        // Two healthy shards remain, enough for d = 2.
        let mut disks = open_disks(&dir, 4).await;
        disks[1] = None;
        let shard_path = dir.path().join("disk2/bucket/object/part.1");
        let mut shard = std::fs::read(&shard_path).unwrap();
        let mid = shard.len() / 2;
        shard[mid] ^= 0x40;
        std::fs::write(&shard_path, shard).unwrap();

        let set = ErasureSet::new(disks, SetConfig::default()).await.unwrap();
        let (_, body) = set.get_object("bucket", "object").await.unwrap();
        assert_eq!(body.len(), 3 * MIB);
        assert!(body.iter().all(|&b| b == b'r'));
    }

    #[tokio::test]
    async fn complete_replaces_previous_object() {
        let dir = tempdir().unwrap();
        let set = test_set(&dir).await;

        for fill in [b'a', b'b'] {
            let upload_id = set
                .new_multipart_upload("bucket", "object", HashMap::new())
                .await
                .unwrap();
            let p1 = put_part(&set, "object", &upload_id, 1, &vec![fill; 5 * MIB]).await;
            set.complete_multipart_upload("bucket", "object", &upload_id, complete_parts(&[&p1]))
                .await
                .unwrap();
        }

        let (_, body) = set.get_object("bucket", "object").await.unwrap();
        assert!(body.iter().all(|&b| b == b'b'));

        // The previous body was parked under a tmp UUID and purged by the
        // deferred cleanup: the scratch namespace ends up empty.
        let tmp_root = dir.path().join("disk0/.osmio.sys/tmp");
        assert_eq!(std::fs::read_dir(tmp_root).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn worm_refuses_object_overwrite() {
        let dir = tempdir().unwrap();
        let config = SetConfig {
            worm: true,
            ..SetConfig::default()
        };
        let set = ErasureSet::new(open_disks(&dir, 4).await, config).await.unwrap();
        set.make_bucket("bucket").await.unwrap();

        let upload_id = set
            .new_multipart_upload("bucket", "object", HashMap::new())
            .await
            .unwrap();
        let p1 = put_part(&set, "object", &upload_id, 1, &vec![b'a'; 5 * MIB]).await;
        set.complete_multipart_upload("bucket", "object", &upload_id, complete_parts(&[&p1]))
            .await
            .unwrap();

        let upload_id = set
            .new_multipart_upload("bucket", "object", HashMap::new())
            .await
            .unwrap();
        let p1 = put_part(&set, "object", &upload_id, 1, &vec![b'b'; 5 * MIB]).await;
        let err = set
            .complete_multipart_upload("bucket", "object", &upload_id, complete_parts(&[&p1]))
            .await
            .unwrap_err();
        assert!(matches!(err, OsmioError::ObjectAlreadyExists { .. }));

        let (_, body) = set.get_object("bucket", "object").await.unwrap();
        assert!(body.iter().all(|&b| b == b'a'));
    }

    #[tokio::test]
    async fn complete_rejects_committed_ancestor() {
        let dir = tempdir().unwrap();
        let set = test_set(&dir).await;

        let upload_id = set
            .new_multipart_upload("bucket", "a/b", HashMap::new())
            .await
            .unwrap();
        let p1 = put_part(&set, "a/b", &upload_id, 1, &vec![b'x'; 5 * MIB]).await;
        set.complete_multipart_upload("bucket", "a/b", &upload_id, complete_parts(&[&p1]))
            .await
            .unwrap();

        let upload_id = set
            .new_multipart_upload("bucket", "a/b/c", HashMap::new())
            .await
            .unwrap();
        let p1 = put_part(&set, "a/b/c", &upload_id, 1, &vec![b'y'; 5 * MIB]).await;
        let err = set
            .complete_multipart_upload("bucket", "a/b/c", &upload_id, complete_parts(&[&p1]))
            .await
            .unwrap_err();
        assert!(matches!(err, OsmioError::FileParentIsFile(path) if path == "a/b"));
    }

    #[tokio::test]
    async fn copy_object_part_reuses_source_body() {
        let dir = tempdir().unwrap();
        let set = test_set(&dir).await;

        let upload_id = set
            .new_multipart_upload("bucket", "source", HashMap::new())
            .await
            .unwrap();
        let source_body = vec![b's'; 5 * MIB];
        let p1 = put_part(&set, "source", &upload_id, 1, &source_body).await;
        set.complete_multipart_upload("bucket", "source", &upload_id, complete_parts(&[&p1]))
            .await
            .unwrap();

        let upload_id = set
            .new_multipart_upload("bucket", "copy", HashMap::new())
            .await
            .unwrap();
        let copied = set
            .copy_object_part("bucket", "source", "bucket", "copy", &upload_id, 1)
            .await
            .unwrap();
        assert_eq!(copied.size, source_body.len() as i64);
        assert_eq!(copied.etag, md5_hex(&source_body));

        set.complete_multipart_upload(
            "bucket",
            "copy",
            &upload_id,
            vec![CompletePart {
                part_number: 1,
                etag: copied.etag.clone(),
            }],
        )
        .await
        .unwrap();
        let (_, body) = set.get_object("bucket", "copy").await.unwrap();
        assert_eq!(body.to_vec(), source_body);
    }

    #[tokio::test]
    async fn janitor_removes_only_idle_uploads() {
        let dir = tempdir().unwrap();
        let set = test_set(&dir).await;

        let stale = set
            .new_multipart_upload("bucket", "object", HashMap::new())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(400)).await;

        let fresh = set
            .new_multipart_upload("bucket", "other.txt", HashMap::new())
            .await
            .unwrap();

        set.cleanup_stale_uploads(Duration::from_millis(200)).await.unwrap();

        let mut reader = Cursor::new(b"data".to_vec());
        assert!(matches!(
            set.put_object_part("bucket", "object", &stale, 1, &mut reader, 4).await,
            Err(OsmioError::NoSuchUpload { .. })
        ));

        set.cleanup_stale_uploads(Duration::from_secs(3600)).await.unwrap();
        let listed = set
            .list_multipart_uploads("bucket", "other.txt", 10)
            .await
            .unwrap();
        assert_eq!(listed.uploads.len(), 1);
        assert_eq!(listed.uploads[0].upload_id, fresh);
    }

    #[tokio::test]
    async fn cleanup_loop_exits_on_shutdown() {
        let dir = tempdir().unwrap();
        let set = Arc::new(test_set(&dir).await);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let config = CleanupConfig {
            interval: Duration::from_millis(10),
            expiry: Duration::from_secs(3600),
        };
        let janitor = {
            let set = Arc::clone(&set);
            tokio::spawn(async move { set.run_cleanup_loop(config, shutdown_rx).await })
        };

        tokio::time::sleep(Duration::from_millis(30)).await;
        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), janitor)
            .await
            .expect("janitor did not stop")
            .unwrap();
    }

    #[tokio::test]
    async fn new_upload_infers_content_type() {
        let dir = tempdir().unwrap();
        let set = test_set(&dir).await;

        let upload_id = set
            .new_multipart_upload("bucket", "report.json", HashMap::new())
            .await
            .unwrap();
        let p1 = put_part(&set, "report.json", &upload_id, 1, b"{}").await;
        set.complete_multipart_upload("bucket", "report.json", &upload_id, complete_parts(&[&p1]))
            .await
            .unwrap();

        let info = set.get_object_info("bucket", "report.json").await.unwrap();
        assert_eq!(info.content_type, "application/json");
    }
}
