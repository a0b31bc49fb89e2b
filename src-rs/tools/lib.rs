pub mod apktool;
pub mod fetch;
pub mod types;

pub use apktool::ApkTool;
pub use fetch::HttpFetcher;
pub use types::{Fetcher, PackageTool};
