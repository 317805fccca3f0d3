pub mod error;
pub mod time;
pub mod types;

pub use error::{OsmioError, Result};
pub use types::ObjectInfo;
