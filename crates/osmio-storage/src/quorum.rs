use chrono::{DateTime, Utc};
use osmio_common::error::OsmioError;
use rand::seq::SliceRandom;

use crate::disk::Disks;
use crate::fileinfo::FileInfo;

/// Errors that mean "this disk cannot vote", not "the operation failed".
/// They are excluded from the consensus tally.
pub fn is_disk_ignored_err(err: &OsmioError) -> bool {
    matches!(
        err,
        OsmioError::DiskNotFound | OsmioError::FaultyDisk | OsmioError::VolumeNotFound(_)
    )
}

/// The object-operation ignored set additionally tolerates absent files:
/// deletes and commit renames treat a missing source as settled state.
pub fn is_object_ignored_err(err: &OsmioError) -> bool {
    is_disk_ignored_err(err) || matches!(err, OsmioError::FileNotFound)
}

/// Errors that indicate the bytes are gone rather than the peer being slow.
/// Ties between equally frequent errors break toward these.
fn is_data_loss_err(err: &OsmioError) -> bool {
    matches!(err, OsmioError::BitrotChecksumMismatch)
}

fn reduce_quorum_errs(
    errs: &[Option<OsmioError>],
    ignored: fn(&OsmioError) -> bool,
    quorum: usize,
    quorum_err: OsmioError,
) -> Option<OsmioError> {
    let successes = errs.iter().filter(|e| e.is_none()).count();
    if successes >= quorum {
        return None;
    }

    let mut dominant: Option<(&OsmioError, usize)> = None;
    for err in errs.iter().flatten() {
        if ignored(err) {
            continue;
        }
        let count = errs
            .iter()
            .flatten()
            .filter(|other| other.code() == err.code())
            .count();
        let replace = match dominant {
            None => true,
            Some((current, current_count)) => {
                count > current_count
                    || (count == current_count
                        && is_data_loss_err(err)
                        && !is_data_loss_err(current))
            }
        };
        if replace {
            dominant = Some((err, count));
        }
    }

    Some(match dominant {
        Some((err, _)) => err.clone(),
        None => quorum_err,
    })
}

pub fn reduce_write_quorum_errs(
    errs: &[Option<OsmioError>],
    quorum: usize,
) -> Option<OsmioError> {
    let successes = errs.iter().filter(|e| e.is_none()).count();
    reduce_quorum_errs(
        errs,
        is_object_ignored_err,
        quorum,
        OsmioError::WriteQuorumNotMet {
            have: successes,
            want: quorum,
        },
    )
}

pub fn reduce_read_quorum_errs(errs: &[Option<OsmioError>], quorum: usize) -> Option<OsmioError> {
    let successes = errs.iter().filter(|e| e.is_none()).count();
    reduce_quorum_errs(
        errs,
        is_disk_ignored_err,
        quorum,
        OsmioError::ReadQuorumNotMet {
            have: successes,
            want: quorum,
        },
    )
}

pub fn count_err(errs: &[Option<OsmioError>], code: &str) -> usize {
    errs.iter()
        .flatten()
        .filter(|err| err.code() == code)
        .count()
}

/// Keeps only the disks whose manifest sits at the newest mod_time; the
/// rest are offline for this operation and left for background healing.
pub fn list_online_disks(
    disks: &Disks,
    metas: &[Option<FileInfo>],
) -> (Disks, Option<DateTime<Utc>>) {
    let mut max_time: Option<DateTime<Utc>> = None;
    let mut max_count = 0_usize;
    for meta in metas.iter().flatten() {
        let count = metas
            .iter()
            .flatten()
            .filter(|other| other.mod_time == meta.mod_time)
            .count();
        if count > max_count || (count == max_count && Some(meta.mod_time) > max_time) {
            max_count = count;
            max_time = Some(meta.mod_time);
        }
    }

    let online = disks
        .iter()
        .zip(metas)
        .map(|(disk, meta)| match (disk, meta) {
            (Some(disk), Some(meta)) if Some(meta.mod_time) == max_time => {
                Some(disk.clone())
            }
            _ => None,
        })
        .collect();

    (online, max_time)
}

/// Reorders `disks` so index `j` holds the disk storing logical shard `j`,
/// per the upload's fixed distribution permutation.
pub fn shuffle_disks(disks: &Disks, distribution: &[usize]) -> Disks {
    let mut shuffled: Disks = vec![None; disks.len()];
    for (physical, &logical) in distribution.iter().enumerate() {
        if let Some(disk) = disks.get(physical).and_then(|d| d.as_ref()) {
            shuffled[logical - 1] = Some(disk.clone());
        }
    }
    shuffled
}

/// Freshly shuffled `[1..=n]` permutation minted once per upload.
pub fn random_distribution(n: usize) -> Vec<usize> {
    let mut distribution: Vec<usize> = (1..=n).collect();
    distribution.shuffle(&mut rand::thread_rng());
    distribution
}
