use std::path::Path;

use async_trait::async_trait;

use crate::error::ToolError;

/// Unpack/repack/align/sign collaborators. Each call reads and writes
/// files the orchestrator owns; implementations must not touch anything else.
#[async_trait]
pub trait PackageTool: Send + Sync {
    async fn unpack(&self, artifact: &Path, tree: &Path) -> Result<(), ToolError>;
    async fn rebuild(&self, tree: &Path, out: &Path) -> Result<(), ToolError>;
    async fn align(&self, input: &Path, out: &Path) -> Result<(), ToolError>;
    async fn sign(&self, input: &Path, out: &Path) -> Result<(), ToolError>;
}

#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, ToolError>;
}
