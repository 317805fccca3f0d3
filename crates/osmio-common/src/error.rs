use thiserror::Error;

#[derive(Debug, Error)]
pub enum OsmioError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("bucket not found: {0}")]
    BucketNotFound(String),
    #[error("object not found: {bucket}/{key}")]
    ObjectNotFound { bucket: String, key: String },
    #[error("no such upload: {bucket}/{key} ({upload_id})")]
    NoSuchUpload {
        bucket: String,
        key: String,
        upload_id: String,
    },
    #[error("invalid part {part_number}: {reason}")]
    InvalidPart { part_number: i32, reason: String },
    #[error("parts must be supplied in ascending part number order")]
    InvalidPartOrder,
    #[error("part {part_number} is too small: {size} bytes, minimum {min_size}")]
    PartTooSmall {
        part_number: i32,
        size: i64,
        min_size: i64,
    },
    #[error("request body is shorter than the declared size")]
    IncompleteBody,
    #[error("write quorum not met: have {have}, want {want}")]
    WriteQuorumNotMet { have: usize, want: usize },
    #[error("read quorum not met: have {have}, want {want}")]
    ReadQuorumNotMet { have: usize, want: usize },
    #[error("parent path is an existing object: {0}")]
    FileParentIsFile(String),
    #[error("object already exists: {bucket}/{key}")]
    ObjectAlreadyExists { bucket: String, key: String },
    #[error("file not found")]
    FileNotFound,
    #[error("volume not found: {0}")]
    VolumeNotFound(String),
    #[error("disk not found")]
    DiskNotFound,
    #[error("faulty disk")]
    FaultyDisk,
    #[error("bitrot checksum mismatch")]
    BitrotChecksumMismatch,
    #[error("internal error: {0}")]
    InternalError(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl OsmioError {
    /// Stable per-variant key. Quorum reduction tallies per-disk errors by
    /// this key rather than by the full message.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidArgument(_) => "InvalidArgument",
            Self::BucketNotFound(_) => "BucketNotFound",
            Self::ObjectNotFound { .. } => "ObjectNotFound",
            Self::NoSuchUpload { .. } => "NoSuchUpload",
            Self::InvalidPart { .. } => "InvalidPart",
            Self::InvalidPartOrder => "InvalidPartOrder",
            Self::PartTooSmall { .. } => "PartTooSmall",
            Self::IncompleteBody => "IncompleteBody",
            Self::WriteQuorumNotMet { .. } => "WriteQuorumNotMet",
            Self::ReadQuorumNotMet { .. } => "ReadQuorumNotMet",
            Self::FileParentIsFile(_) => "FileParentIsFile",
            Self::ObjectAlreadyExists { .. } => "ObjectAlreadyExists",
            Self::FileNotFound => "FileNotFound",
            Self::VolumeNotFound(_) => "VolumeNotFound",
            Self::DiskNotFound => "DiskNotFound",
            Self::FaultyDisk => "FaultyDisk",
            Self::BitrotChecksumMismatch => "BitrotChecksumMismatch",
            Self::InternalError(_) => "InternalError",
            Self::Io(_) => "Io",
        }
    }

    pub fn s3_error_code(&self) -> &'static str {
        match self {
            Self::InvalidArgument(_) => "InvalidArgument",
            Self::BucketNotFound(_) => "NoSuchBucket",
            Self::ObjectNotFound { .. } => "NoSuchKey",
            Self::NoSuchUpload { .. } => "NoSuchUpload",
            Self::InvalidPart { .. } => "InvalidPart",
            Self::InvalidPartOrder => "InvalidPartOrder",
            Self::PartTooSmall { .. } => "EntityTooSmall",
            Self::IncompleteBody => "IncompleteBody",
            Self::WriteQuorumNotMet { .. } | Self::ReadQuorumNotMet { .. } => "SlowDown",
            Self::FileParentIsFile(_) => "ParentIsObject",
            Self::ObjectAlreadyExists { .. } => "MethodNotAllowed",
            Self::FileNotFound => "NoSuchKey",
            Self::VolumeNotFound(_) => "NoSuchBucket",
            Self::DiskNotFound | Self::FaultyDisk => "SlowDown",
            Self::BitrotChecksumMismatch => "InternalError",
            Self::InternalError(_) => "InternalError",
            Self::Io(_) => "InternalError",
        }
    }
}

// Per-disk error vectors survive quorum reduction by value, so errors must
// be cloneable. `std::io::Error` is not, hence the manual impl.
impl Clone for OsmioError {
    fn clone(&self) -> Self {
        match self {
            Self::InvalidArgument(m) => Self::InvalidArgument(m.clone()),
            Self::BucketNotFound(b) => Self::BucketNotFound(b.clone()),
            Self::ObjectNotFound { bucket, key } => Self::ObjectNotFound {
                bucket: bucket.clone(),
                key: key.clone(),
            },
            Self::NoSuchUpload {
                bucket,
                key,
                upload_id,
            } => Self::NoSuchUpload {
                bucket: bucket.clone(),
                key: key.clone(),
                upload_id: upload_id.clone(),
            },
            Self::InvalidPart {
                part_number,
                reason,
            } => Self::InvalidPart {
                part_number: *part_number,
                reason: reason.clone(),
            },
            Self::InvalidPartOrder => Self::InvalidPartOrder,
            Self::PartTooSmall {
                part_number,
                size,
                min_size,
            } => Self::PartTooSmall {
                part_number: *part_number,
                size: *size,
                min_size: *min_size,
            },
            Self::IncompleteBody => Self::IncompleteBody,
            Self::WriteQuorumNotMet { have, want } => Self::WriteQuorumNotMet {
                have: *have,
                want: *want,
            },
            Self::ReadQuorumNotMet { have, want } => Self::ReadQuorumNotMet {
                have: *have,
                want: *want,
            },
            Self::FileParentIsFile(p) => Self::FileParentIsFile(p.clone()),
            Self::ObjectAlreadyExists { bucket, key } => Self::ObjectAlreadyExists {
                bucket: bucket.clone(),
                key: key.clone(),
            },
            Self::FileNotFound => Self::FileNotFound,
            Self::VolumeNotFound(v) => Self::VolumeNotFound(v.clone()),
            Self::DiskNotFound => Self::DiskNotFound,
            Self::FaultyDisk => Self::FaultyDisk,
            Self::BitrotChecksumMismatch => Self::BitrotChecksumMismatch,
            Self::InternalError(m) => Self::InternalError(m.clone()),
            Self::Io(err) => Self::Io(std::io::Error::new(err.kind(), err.to_string())),
        }
    }
}

pub type Result<T> = std::result::Result<T, OsmioError>;
