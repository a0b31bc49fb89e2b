pub mod store;
pub mod types;

pub use store::{CacheIndex, IndexError, DEFAULT_CAPACITY};
pub use types::Summary;
