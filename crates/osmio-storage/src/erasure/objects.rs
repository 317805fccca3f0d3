use bytes::Bytes;
use osmio_common::error::{OsmioError, Result};
use osmio_common::types::ObjectInfo;
use tracing::{debug, warn};

use crate::bitrot::{BITROT_HEADER_LEN, ChainVerifier};
use crate::erasure::Erasure;
use crate::erasure::multipart::sha_dir;
use crate::erasure::set::{ErasureSet, validate_bucket_name, validate_object_key};
use crate::disk::MULTIPART_META_BUCKET;
use crate::fileinfo::{FileInfo, find_file_info_in_quorum};
use crate::metadata::read_all_fileinfo;
use crate::quorum::{count_err, list_online_disks};
use crate::traits::ObjectState;

impl ErasureSet {
    /// Resolves the visible lifecycle state of a key in one probe:
    /// committed manifest at read-quorum, else staged uploads, else absent.
    pub async fn object_state(&self, bucket: &str, object: &str) -> Result<ObjectState> {
        validate_bucket_name(bucket)?;
        validate_object_key(object)?;

        let disks = self.disks();
        let (metas, _errs) = read_all_fileinfo(&disks, bucket, object).await;
        if let Some(sample) = metas.iter().flatten().next() {
            let present = metas.iter().flatten().count();
            if present >= sample.read_quorum() {
                return Ok(ObjectState::Committed);
            }
        }

        let sha = sha_dir(bucket, object);
        for disk in disks.iter().flatten() {
            match disk.list_dir(MULTIPART_META_BUCKET, &sha, 1).await {
                Ok(uploads) if !uploads.is_empty() => return Ok(ObjectState::Staged),
                Ok(_) | Err(OsmioError::FileNotFound) => return Ok(ObjectState::Absent),
                Err(err) => {
                    debug!(error = %err, "staging probe failed, trying next disk");
                }
            }
        }
        Ok(ObjectState::Absent)
    }

    pub async fn get_object_info(&self, bucket: &str, object: &str) -> Result<ObjectInfo> {
        let (fi, _metas, _disks) = self.read_object_fileinfo(bucket, object).await?;
        Ok(fi.to_object_info(bucket, object))
    }

    /// Reads the whole object body, verifying every shard's bitrot chain
    /// and reconstructing up to `parity` missing or corrupt shards per
    /// block from the survivors.
    pub async fn get_object(&self, bucket: &str, object: &str) -> Result<(ObjectInfo, Bytes)> {
        let (fi, metas, disks) = self.read_object_fileinfo(bucket, object).await?;
        let erasure = Erasure::from_info(&fi.erasure);
        let (online_disks, _) = list_online_disks(&disks, &metas);

        let mut body = Vec::with_capacity(fi.size.max(0) as usize);
        for part in &fi.parts {
            let chunks = erasure.shard_chunks(part.size);
            let mut shards: Vec<Option<Vec<u8>>> = vec![None; erasure.total_shards()];
            let mut available = 0_usize;

            for (physical, disk) in online_disks.iter().enumerate() {
                if available >= erasure.data_blocks {
                    break;
                }
                let Some(disk) = disk else { continue };
                let Some(meta) = metas[physical].as_ref() else {
                    continue;
                };
                let Some(checksum) = meta.erasure.checksum_for_part(part.number) else {
                    continue;
                };
                let logical = fi.erasure.distribution[physical] - 1;
                let path = format!("{object}/part.{}", part.number);
                let data = match disk.read_file(bucket, &path).await {
                    Ok(data) => data,
                    Err(err) => {
                        debug!(error = %err, part = part.number, "shard read failed");
                        continue;
                    }
                };
                match verify_shard(&data, &chunks, &checksum.hash) {
                    Ok(payload) => {
                        shards[logical] = Some(payload);
                        available += 1;
                    }
                    Err(err) => {
                        warn!(
                            error = %err,
                            part = part.number,
                            shard = logical,
                            "corrupt shard skipped, falling back to parity"
                        );
                    }
                }
            }

            if available < erasure.data_blocks {
                return Err(OsmioError::ReadQuorumNotMet {
                    have: available,
                    want: erasure.data_blocks,
                });
            }

            let mut chunk_offset = 0_usize;
            let mut remaining = part.size as usize;
            for chunk_len in &chunks {
                let block_len = remaining.min(erasure.block_size);
                let block_shards: Vec<Option<Vec<u8>>> = shards
                    .iter()
                    .map(|shard| {
                        shard
                            .as_ref()
                            .map(|payload| payload[chunk_offset..chunk_offset + chunk_len].to_vec())
                    })
                    .collect();
                let block = erasure.decode_data(&block_shards, block_len)?;
                body.extend_from_slice(&block);
                chunk_offset += chunk_len;
                remaining -= block_len;
            }
        }

        body.truncate(fi.size.max(0) as usize);
        Ok((fi.to_object_info(bucket, object), Bytes::from(body)))
    }

    async fn read_object_fileinfo(
        &self,
        bucket: &str,
        object: &str,
    ) -> Result<(FileInfo, Vec<Option<FileInfo>>, crate::disk::Disks)> {
        validate_bucket_name(bucket)?;
        validate_object_key(object)?;

        let disks = self.disks();
        let (metas, errs) = read_all_fileinfo(&disks, bucket, object).await;

        let not_found = || OsmioError::ObjectNotFound {
            bucket: bucket.to_string(),
            key: object.to_string(),
        };

        let Some(sample) = metas.iter().flatten().next() else {
            if count_err(&errs, "FileNotFound") >= (disks.len() / 2).max(1) {
                return Err(not_found());
            }
            return Err(OsmioError::ReadQuorumNotMet {
                have: 0,
                want: (disks.len() / 2).max(1),
            });
        };

        let read_quorum = sample.read_quorum();
        match find_file_info_in_quorum(&metas, read_quorum) {
            Ok(fi) => Ok((fi, metas, disks)),
            Err(err) => {
                if count_err(&errs, "FileNotFound") >= read_quorum {
                    Err(not_found())
                } else {
                    Err(err)
                }
            }
        }
    }
}

/// Walks one shard file's `header || chunk` records against the expected
/// schedule, returning the concatenated payload when the chain and the
/// manifest digest both hold.
fn verify_shard(data: &[u8], chunks: &[usize], expected_sum: &str) -> Result<Vec<u8>> {
    let expected_len: usize = chunks.iter().map(|c| c + BITROT_HEADER_LEN).sum();
    if data.len() != expected_len {
        return Err(OsmioError::BitrotChecksumMismatch);
    }

    let mut verifier = ChainVerifier::default();
    let mut payload = Vec::with_capacity(expected_len - chunks.len() * BITROT_HEADER_LEN);
    let mut offset = 0_usize;
    for chunk_len in chunks {
        let header = &data[offset..offset + BITROT_HEADER_LEN];
        offset += BITROT_HEADER_LEN;
        let chunk = &data[offset..offset + chunk_len];
        offset += chunk_len;
        verifier.verify_chunk(header, chunk)?;
        payload.extend_from_slice(chunk);
    }
    verifier.verify_sum(expected_sum)?;
    Ok(payload)
}
