use std::path::PathBuf;

use serde::Deserialize;
use serde_json::Value;

#[derive(Clone, Debug)]
pub struct CLIConfig {
    pub base_url: String,
    pub architecture: String,
    pub download_dir: PathBuf,
    pub poll_secs: u64,
}

/// Parameters shared by `/upload` and `/exist_pkg`.
#[derive(Clone, Debug)]
pub struct ReplaceRequest {
    pub package: String,
    pub architecture: String,
    pub so_files: String,
}

#[derive(Debug, Deserialize)]
pub struct Accepted {
    pub task_id: String,
    pub status: String,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct CheckResponse {
    pub exists: bool,
    pub md5: String,
    pub count: usize,
    pub latest_task: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct TaskInfo {
    pub id: String,
    pub status: String,
    pub package_identifier: String,
    pub input_fingerprint: String,
    pub declared_architecture: String,
    pub result: Option<Value>,
    pub reason: Option<String>,
    pub created_at: String,
}

impl TaskInfo {
    pub fn is_terminal(&self) -> bool {
        self.status == "complete" || self.status == "failed"
    }
}
