pub mod bitrot;
pub mod disk;
pub mod erasure;
pub mod fileinfo;
pub mod metadata;
pub mod mrf;
pub mod pool;
pub mod quorum;
pub mod traits;

pub use erasure::multipart::CleanupConfig;
pub use erasure::set::{ErasureSet, SetConfig};
pub use traits::MultipartLayer;
