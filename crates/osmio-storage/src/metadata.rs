use bytes::Bytes;
use futures::future::join_all;
use osmio_common::error::{OsmioError, Result};
use tracing::debug;

use crate::disk::{Disk, Disks, META_FILE_NAME};
use crate::fileinfo::FileInfo;
use crate::quorum::reduce_write_quorum_errs;

fn meta_path(prefix: &str) -> String {
    if prefix.is_empty() {
        META_FILE_NAME.to_string()
    } else {
        format!("{prefix}/{META_FILE_NAME}")
    }
}

async fn read_one(disk: &Disk, volume: &str, prefix: &str) -> Result<FileInfo> {
    let data = disk.read_all(volume, &meta_path(prefix)).await?;
    serde_json::from_slice(&data)
        .map_err(|err| OsmioError::InternalError(format!("failed to parse {META_FILE_NAME}: {err}")))
}

/// Parallel manifest read across the fleet. Both vectors come back aligned
/// by disk index; a `None` disk reads as `DiskNotFound`.
pub async fn read_all_fileinfo(
    disks: &Disks,
    volume: &str,
    prefix: &str,
) -> (Vec<Option<FileInfo>>, Vec<Option<OsmioError>>) {
    let reads = disks.iter().map(|disk| async move {
        match disk {
            Some(disk) => read_one(disk, volume, prefix).await,
            None => Err(OsmioError::DiskNotFound),
        }
    });

    let mut metas = Vec::with_capacity(disks.len());
    let mut errs = Vec::with_capacity(disks.len());
    for outcome in join_all(reads).await {
        match outcome {
            Ok(meta) => {
                metas.push(Some(meta));
                errs.push(None);
            }
            Err(err) => {
                metas.push(None);
                errs.push(Some(err));
            }
        }
    }
    (metas, errs)
}

/// Writes one manifest per disk under `prefix/er.json`. Each disk receives
/// its own payload: the copies diverge in their private checksum slice.
/// Returns the surviving disks with failed entries nulled.
pub async fn write_unique_fileinfo(
    disks: &Disks,
    volume: &str,
    prefix: &str,
    fis: &[Option<FileInfo>],
    quorum: usize,
) -> Result<Disks> {
    let writes = disks.iter().zip(fis).map(|(disk, fi)| async move {
        let (Some(disk), Some(fi)) = (disk, fi) else {
            return Err(OsmioError::DiskNotFound);
        };
        let data = serde_json::to_vec(fi).map_err(|err| {
            OsmioError::InternalError(format!("failed to serialize {META_FILE_NAME}: {err}"))
        })?;
        disk.write_all(volume, &meta_path(prefix), Bytes::from(data))
            .await
    });

    let errs: Vec<Option<OsmioError>> = join_all(writes)
        .await
        .into_iter()
        .map(|outcome| outcome.err())
        .collect();

    if let Some(err) = reduce_write_quorum_errs(&errs, quorum) {
        return Err(err);
    }

    Ok(survivors(disks, &errs))
}

/// Commits a staged manifest: per-disk atomic rename of `er.json` into the
/// destination prefix, each followed by a best-effort purge of the source
/// prefix. Per-disk renames succeed or fail independently; quorum reads at
/// read time resolve any lagging minority.
pub async fn commit_rename_fileinfo(
    disks: &Disks,
    src_volume: &str,
    src_prefix: &str,
    dst_volume: &str,
    dst_prefix: &str,
    quorum: usize,
) -> Result<Disks> {
    let renames = disks.iter().map(|disk| async move {
        let Some(disk) = disk else {
            return Err(OsmioError::DiskNotFound);
        };
        disk.rename_metadata(
            src_volume,
            &meta_path(src_prefix),
            dst_volume,
            &meta_path(dst_prefix),
        )
        .await?;
        if let Err(err) = disk.delete(src_volume, src_prefix, true).await {
            debug!(error = %err, src_prefix, "failed to purge staging prefix after commit");
        }
        Ok(())
    });

    let errs: Vec<Option<OsmioError>> = join_all(renames)
        .await
        .into_iter()
        .map(|outcome| outcome.err())
        .collect();

    if let Some(err) = reduce_write_quorum_errs(&errs, quorum) {
        return Err(err);
    }

    Ok(survivors(disks, &errs))
}

/// Recursive delete of `prefix` on every disk. Returns the aligned error
/// vector for the caller to quorum-reduce (or ignore, for scratch cleanup).
pub async fn delete_all(disks: &Disks, volume: &str, prefix: &str) -> Vec<Option<OsmioError>> {
    let deletes = disks.iter().map(|disk| async move {
        match disk {
            Some(disk) => disk.delete(volume, prefix, true).await,
            None => Err(OsmioError::DiskNotFound),
        }
    });

    join_all(deletes)
        .await
        .into_iter()
        .map(|outcome| outcome.err())
        .collect()
}

fn survivors(disks: &Disks, errs: &[Option<OsmioError>]) -> Disks {
    disks
        .iter()
        .zip(errs)
        .map(|(disk, err)| match err {
            None => disk.clone(),
            Some(_) => None,
        })
        .collect()
}
