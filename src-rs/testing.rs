//! In-process fakes for the external collaborators, shared by unit tests.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::arch::{Architecture, ElfDetector};
use crate::config::ServiceConfig;
use crate::error::{Step, ToolError};
use crate::index::CacheIndex;
use crate::orchestrator::{Orchestrator, Toolchain};
use crate::task::{Task, TaskStore};
use crate::tools::{Fetcher, PackageTool};
use crate::uploads::UploadStore;
use crate::workspace::slot_relative_path;

pub(crate) fn lib_path(arch: Architecture, slot: &str) -> PathBuf {
    slot_relative_path(arch, slot)
}

pub(crate) fn slots(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(slot, url)| (slot.to_string(), url.to_string()))
        .collect()
}

/// "Unpacks" by writing a fixed set of library files; "rebuilds" by
/// concatenating every library in the tree, so the output changes whenever a
/// library does.
#[derive(Clone, Default)]
pub(crate) struct FakePackageTool {
    libs: Vec<(PathBuf, Vec<u8>)>,
    fail_at: Option<Step>,
    hang_at: Option<Step>,
}

impl FakePackageTool {
    pub(crate) fn with_libs(libs: Vec<(PathBuf, Vec<u8>)>) -> Self {
        Self {
            libs,
            ..Self::default()
        }
    }

    pub(crate) fn failing_at(mut self, step: Step) -> Self {
        self.fail_at = Some(step);
        self
    }

    pub(crate) fn hanging_at(mut self, step: Step) -> Self {
        self.hang_at = Some(step);
        self
    }

    async fn gate(&self, step: Step) -> Result<(), ToolError> {
        if self.hang_at == Some(step) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if self.fail_at == Some(step) {
            return Err(ToolError::Other(format!("{} exploded", step)));
        }
        Ok(())
    }
}

fn collect_libs(tree: &Path) -> std::io::Result<Vec<u8>> {
    let mut files = Vec::new();
    let lib = tree.join("lib");
    if lib.is_dir() {
        for arch_dir in std::fs::read_dir(&lib)? {
            for file in std::fs::read_dir(arch_dir?.path())? {
                files.push(file?.path());
            }
        }
    }
    files.sort();
    let mut out = b"REBUILT".to_vec();
    for file in files {
        out.extend_from_slice(&std::fs::read(file)?);
    }
    Ok(out)
}

#[async_trait]
impl PackageTool for FakePackageTool {
    async fn unpack(&self, artifact: &Path, tree: &Path) -> Result<(), ToolError> {
        self.gate(Step::Unpack).await?;
        std::fs::metadata(artifact)?;
        std::fs::create_dir_all(tree)?;
        for (rel, bytes) in &self.libs {
            let path = tree.join(rel);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, bytes)?;
        }
        Ok(())
    }

    async fn rebuild(&self, tree: &Path, out: &Path) -> Result<(), ToolError> {
        self.gate(Step::Rebuild).await?;
        std::fs::write(out, collect_libs(tree)?)?;
        Ok(())
    }

    async fn align(&self, input: &Path, out: &Path) -> Result<(), ToolError> {
        self.gate(Step::Align).await?;
        std::fs::copy(input, out)?;
        Ok(())
    }

    async fn sign(&self, input: &Path, out: &Path) -> Result<(), ToolError> {
        self.gate(Step::Sign).await?;
        let mut bytes = std::fs::read(input)?;
        bytes.extend_from_slice(b"SIGNED");
        std::fs::write(out, bytes)?;
        Ok(())
    }
}

#[derive(Clone, Default)]
pub(crate) struct FakeFetcher {
    blobs: HashMap<String, Vec<u8>>,
    stalled: Option<String>,
}

impl FakeFetcher {
    pub(crate) fn with(mut self, url: &str, bytes: Vec<u8>) -> Self {
        self.blobs.insert(url.to_string(), bytes);
        self
    }

    /// Never answers for `url`.
    pub(crate) fn stalling_on(mut self, url: &str) -> Self {
        self.stalled = Some(url.to_string());
        self
    }
}

#[async_trait]
impl Fetcher for FakeFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, ToolError> {
        if self.stalled.as_deref() == Some(url) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        self.blobs
            .get(url)
            .cloned()
            .ok_or_else(|| ToolError::Other(format!("404 for {}", url)))
    }
}

pub(crate) fn harness(tool: FakePackageTool, fetcher: FakeFetcher) -> (tempfile::TempDir, Orchestrator) {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = ServiceConfig {
        workdir: dir.path().to_path_buf(),
        tool_timeout_secs: 1,
        download_timeout_secs: 1,
        ..ServiceConfig::default()
    };
    let uploads = UploadStore::new(config.uploads_dir()).expect("uploads dir");
    let index = CacheIndex::open(config.index_file(), config.history_capacity).expect("index");
    let tools = Toolchain {
        package: Arc::new(tool),
        fetcher: Arc::new(fetcher),
        detector: Arc::new(ElfDetector),
    };
    let orch = Orchestrator::new(config, TaskStore::new(false, None), index, uploads, tools);
    (dir, orch)
}

/// Polls until the task reaches a terminal state.
pub(crate) async fn wait_terminal(orch: &Orchestrator, id: &str) -> Task {
    for _ in 0..500 {
        if let Some(task) = orch.tasks().get(id) {
            if task.status.is_terminal() {
                return task;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("task {} did not finish", id);
}

/// Unpacked tree of a task, found by its task id suffix.
pub(crate) fn tree_of(orch: &Orchestrator, id: &str) -> PathBuf {
    let temp = orch.config().temp_dir();
    for entry in std::fs::read_dir(&temp).expect("temp dir") {
        let path = entry.expect("entry").path();
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        if name.ends_with(id) {
            return path.join("extracted");
        }
    }
    panic!("no workspace for task {}", id);
}
