//! Task orchestration: turns an artifact plus slot replacement requests into
//! a tracked unit of work and drives it to `complete` or `failed`.
//!
//! Request handlers call [`Orchestrator::submit`], which records the task and
//! spawns [`Orchestrator::execute`] on the runtime. Progress is observed only
//! by polling the [`TaskStore`].

use std::collections::BTreeMap;
use std::future::Future;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;

use crate::arch::{ArchDetector, Architecture, ElfDetector};
use crate::config::ServiceConfig;
use crate::error::{FailureReason, Step, ToolError};
use crate::hash::{fingerprint, fingerprint_file, Fingerprint};
use crate::helpers::is_valid_slot_name;
use crate::index::{CacheIndex, Summary};
use crate::result::{SlotOutcome, TaskResult};
use crate::task::{NewTask, Task, TaskStore};
use crate::tools::{ApkTool, Fetcher, HttpFetcher, PackageTool};
use crate::uploads::UploadStore;
use crate::verifier::{verify_slot, Verdict};
use crate::workspace::Workspace;

/// Where the task's input artifact comes from.
#[derive(Debug)]
pub enum ArtifactSource {
    /// Freshly uploaded bytes.
    Upload(Bytes),
    /// A previous upload with this fingerprint, looked up in the upload store.
    Cached(Fingerprint),
}

#[derive(Debug)]
pub struct Submission {
    pub package_identifier: String,
    pub filename: Option<String>,
    pub declared_architecture: Architecture,
    pub replacement_requests: BTreeMap<String, String>,
    pub source: ArtifactSource,
    pub expected_fingerprint: Option<Fingerprint>,
}

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("no replacement libraries requested (all URLs empty)")]
    NoReplacements,

    #[error("invalid library name {0:?}")]
    InvalidSlot(String),

    #[error("package name required")]
    MissingPackage,

    #[error("uploaded file is empty")]
    EmptyUpload,

    #[error("failed to hash upload: {0}")]
    Hashing(String),
}

/// Collaborators the pipeline calls out to.
#[derive(Clone)]
pub struct Toolchain {
    pub package: Arc<dyn PackageTool>,
    pub fetcher: Arc<dyn Fetcher>,
    pub detector: Arc<dyn ArchDetector>,
}

/// What `execute` needs beyond the task record.
#[derive(Debug)]
pub struct Job {
    source: ArtifactSource,
    expected: Option<Fingerprint>,
}

#[derive(Clone)]
pub struct Orchestrator {
    config: Arc<ServiceConfig>,
    tasks: Arc<TaskStore>,
    index: Arc<CacheIndex>,
    uploads: Arc<UploadStore>,
    tools: Toolchain,
}

impl Orchestrator {
    pub fn new(
        config: ServiceConfig,
        tasks: TaskStore,
        index: CacheIndex,
        uploads: UploadStore,
        tools: Toolchain,
    ) -> Self {
        Self {
            config: Arc::new(config),
            tasks: Arc::new(tasks),
            index: Arc::new(index),
            uploads: Arc::new(uploads),
            tools,
        }
    }

    /// Builds stores under the configured workdir and the default toolchain.
    pub fn from_config(config: ServiceConfig) -> anyhow::Result<Self> {
        std::fs::create_dir_all(config.processed_dir())?;
        std::fs::create_dir_all(config.temp_dir())?;
        let uploads = UploadStore::new(config.uploads_dir())?;
        let index = CacheIndex::open(config.index_file(), config.history_capacity)?;
        let tasks = if config.persist_tasks {
            TaskStore::open(config.tasks_file())
        } else {
            TaskStore::new(false, None)
        };
        let tools = Toolchain {
            package: Arc::new(ApkTool::new(config.tools.clone())),
            fetcher: Arc::new(HttpFetcher::new(config.download_timeout())?),
            detector: Arc::new(ElfDetector),
        };
        Ok(Self::new(config, tasks, index, uploads, tools))
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn tasks(&self) -> &TaskStore {
        &self.tasks
    }

    pub fn index(&self) -> &CacheIndex {
        &self.index
    }

    pub fn uploads(&self) -> &UploadStore {
        &self.uploads
    }

    /// Records a pending task and starts its execution in the background.
    pub async fn submit(&self, submission: Submission) -> Result<Task, SubmitError> {
        let (task, job) = self.prepare(submission).await?;
        let this = self.clone();
        let id = task.id.clone();
        tokio::spawn(async move { this.execute(id, job).await });
        Ok(task)
    }

    /// Validates a submission and creates its pending record without
    /// starting it.
    pub async fn prepare(&self, submission: Submission) -> Result<(Task, Job), SubmitError> {
        let package = submission.package_identifier.trim().to_string();
        if package.is_empty() {
            return Err(SubmitError::MissingPackage);
        }

        let mut requests = BTreeMap::new();
        for (slot, url) in submission.replacement_requests {
            if url.trim().is_empty() {
                tracing::info!("skipping {} (empty URL)", slot);
                continue;
            }
            if !is_valid_slot_name(&slot) {
                return Err(SubmitError::InvalidSlot(slot));
            }
            requests.insert(slot, url.trim().to_string());
        }
        if requests.is_empty() {
            return Err(SubmitError::NoReplacements);
        }

        let (input_fingerprint, expected) = match &submission.source {
            ArtifactSource::Upload(bytes) => {
                if bytes.is_empty() {
                    return Err(SubmitError::EmptyUpload);
                }
                // The claimed digest is only checked later; the record names what arrived.
                let bytes = bytes.clone();
                let fp = tokio::task::spawn_blocking(move || fingerprint(&bytes))
                    .await
                    .map_err(|err| SubmitError::Hashing(err.to_string()))?;
                (fp, submission.expected_fingerprint.clone())
            }
            ArtifactSource::Cached(fp) => (fp.clone(), Some(fp.clone())),
        };

        let task = self.tasks.create(NewTask {
            input_fingerprint,
            package_identifier: package,
            filename: submission.filename,
            replacement_requests: requests,
            declared_architecture: submission.declared_architecture,
        });
        tracing::info!(
            task_id = %task.id,
            fingerprint = %task.input_fingerprint,
            "created task for {} ({} libraries, {})",
            task.package_identifier,
            task.replacement_requests.len(),
            task.declared_architecture
        );
        Ok((
            task,
            Job {
                source: submission.source,
                expected,
            },
        ))
    }

    /// Runs the pipeline for a pending task. Every failure lands on the task
    /// record; nothing escapes.
    pub async fn execute(self, task_id: String, job: Job) {
        let task = match self.tasks.mark_processing(&task_id) {
            Ok(task) => task,
            Err(err) => {
                tracing::error!("cannot start task: {}", err);
                return;
            }
        };

        let outcome = self.run_pipeline(&task, job).await;
        let finished = match outcome {
            Ok(result) => {
                tracing::info!(
                    task_id = %task.id,
                    "completed in {:.2}s -> {}",
                    result.total_seconds,
                    result.final_artifact_path
                );
                self.tasks.complete(&task.id, result)
            }
            Err(reason) => {
                tracing::warn!(task_id = %task.id, "failed: {}", reason);
                self.tasks.fail(&task.id, reason)
            }
        };
        if let Err(err) = finished {
            tracing::error!("cannot finish task: {}", err);
        }
    }

    async fn run_pipeline(&self, task: &Task, job: Job) -> Result<TaskResult, FailureReason> {
        let started_at = task.started_at.unwrap_or_else(Utc::now);
        let id = task.id.as_str();
        let tool_limit = self.config.tool_timeout();

        tracing::info!(task_id = id, "[1/8] resolving artifact");
        let (artifact, actual) = self.resolve_artifact(task, job.source).await?;
        if let Some(expected) = job.expected {
            if actual != expected {
                return Err(FailureReason::FingerprintMismatch { expected, actual });
            }
        }

        tracing::info!(task_id = id, "[2/8] unpacking");
        let workspace = {
            let temp_root = self.config.temp_dir();
            let task_id = id.to_string();
            let package = task.package_identifier.clone();
            let fp = task.input_fingerprint.clone();
            let by_package = self.config.pkgname_based_path;
            blocking(move || {
                Workspace::allocate(&temp_root, &task_id, &package, &fp, by_package)
                    .map_err(FailureReason::workspace)
            })
            .await?
        };
        let tree = workspace.tree();
        bounded(
            Step::Unpack,
            tool_limit,
            self.tools.package.unpack(&artifact, &tree),
            |e| FailureReason::UnpackFailed {
                detail: e.to_string(),
            },
        )
        .await?;

        tracing::info!(task_id = id, "[3/8] downloading {} libraries", task.replacement_requests.len());
        let mut fetched = Vec::with_capacity(task.replacement_requests.len());
        for (slot, url) in &task.replacement_requests {
            let bytes = bounded(
                Step::Fetch,
                self.config.download_timeout(),
                self.tools.fetcher.fetch(url),
                |e| FailureReason::DownloadFailed {
                    slot: slot.clone(),
                    detail: e.to_string(),
                },
            )
            .await?;
            tracing::debug!(task_id = id, "downloaded {} ({} bytes)", slot, bytes.len());
            fetched.push((slot.clone(), url.clone(), bytes));
        }

        tracing::info!(task_id = id, "[4/8] verifying libraries");
        let (fetched, verdicts) = {
            let detector = self.tools.detector.clone();
            let declared = task.declared_architecture;
            let tree = tree.clone();
            blocking(move || {
                let verdicts: Vec<Verdict> = fetched
                    .iter()
                    .map(|(slot, _, bytes)| verify_slot(detector.as_ref(), &tree, slot, bytes, declared))
                    .collect();
                Ok((fetched, verdicts))
            })
            .await?
        };
        if let Some(reason) = first_failure(task.declared_architecture, &fetched, &verdicts) {
            return Err(reason);
        }

        tracing::info!(task_id = id, "[5/8] replacing libraries");
        let slots = blocking(move || swap_all(&fetched, verdicts)).await?;

        tracing::info!(task_id = id, "[6/8] rebuilding");
        let unsigned = workspace.unsigned();
        let aligned = workspace.aligned();
        let signed = self.config.processed_dir().join(format!("{}_signed.apk", id));
        bounded(
            Step::Rebuild,
            tool_limit,
            self.tools.package.rebuild(&tree, &unsigned),
            |e| FailureReason::RebuildFailed {
                detail: e.to_string(),
            },
        )
        .await?;

        tracing::info!(task_id = id, "[7/8] aligning and signing");
        bounded(
            Step::Align,
            tool_limit,
            self.tools.package.align(&unsigned, &aligned),
            |e| FailureReason::AlignFailed {
                detail: e.to_string(),
            },
        )
        .await?;
        tokio::fs::create_dir_all(self.config.processed_dir())
            .await
            .map_err(FailureReason::workspace)?;
        bounded(
            Step::Sign,
            tool_limit,
            self.tools.package.sign(&aligned, &signed),
            |e| FailureReason::SignFailed {
                detail: e.to_string(),
            },
        )
        .await?;
        if let Err(err) = tokio::task::spawn_blocking(move || workspace.discard_intermediates()).await {
            tracing::warn!(task_id = id, "cleanup of intermediates aborted: {}", err);
        }

        tracing::info!(task_id = id, "[8/8] updating index");
        let output_fingerprint = fingerprint_file(&signed)
            .await
            .map_err(FailureReason::workspace)?;
        let finished_at = Utc::now();
        let final_artifact_path = signed.display().to_string();
        let summary = Summary {
            task_id: id.to_string(),
            package_identifier: task.package_identifier.clone(),
            declared_architecture: task.declared_architecture,
            final_artifact_path: final_artifact_path.clone(),
            output_fingerprint: output_fingerprint.clone(),
            timestamp: finished_at,
        };
        let index = self.index.clone();
        let key = task.input_fingerprint.clone();
        let appended = blocking(move || Ok(index.append(&key, summary))).await?;
        if let Err(err) = appended {
            tracing::warn!(task_id = id, "index persisted with error: {}", err);
        }

        let elapsed = finished_at - started_at;
        Ok(TaskResult {
            input_fingerprint: task.input_fingerprint.clone(),
            output_fingerprint,
            detected_architecture: task.declared_architecture,
            slots,
            started_at,
            finished_at,
            total_seconds: elapsed.num_milliseconds() as f64 / 1000.0,
            final_artifact_path,
            download_path: self.download_path(id),
            smb_path: self.smb_path(id),
        })
    }

    /// Returns the artifact's path and the digest of what is actually on disk.
    async fn resolve_artifact(
        &self,
        task: &Task,
        source: ArtifactSource,
    ) -> Result<(PathBuf, Fingerprint), FailureReason> {
        match source {
            ArtifactSource::Upload(bytes) => {
                let uploads = self.uploads.clone();
                let (fp, path) =
                    blocking(move || uploads.store(&bytes).map_err(FailureReason::workspace)).await?;
                Ok((path, fp))
            }
            ArtifactSource::Cached(fp) => {
                let path = self
                    .uploads
                    .locate(&fp)
                    .ok_or_else(|| FailureReason::ArtifactNotFound {
                        fingerprint: task.input_fingerprint.clone(),
                    })?;
                let actual = fingerprint_file(&path)
                    .await
                    .map_err(FailureReason::workspace)?;
                Ok((path, actual))
            }
        }
    }

    fn download_path(&self, id: &str) -> String {
        if self.config.download_base_path.is_empty() {
            format!("/download/{}", id)
        } else {
            format!("{}{}_signed.apk", self.config.download_base_path, id)
        }
    }

    fn smb_path(&self, id: &str) -> Option<String> {
        if self.config.smb_base_path.is_empty() {
            None
        } else {
            Some(format!("{}{}_signed.apk", self.config.smb_base_path, id))
        }
    }
}

/// Runs filesystem or hashing work on the blocking pool.
async fn blocking<T, F>(work: F) -> Result<T, FailureReason>
where
    F: FnOnce() -> Result<T, FailureReason> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(FailureReason::workspace)?
}

/// Runs a collaborator call under a wall-clock ceiling.
async fn bounded<T, F>(
    step: Step,
    limit: Duration,
    fut: F,
    on_error: impl FnOnce(ToolError) -> FailureReason,
) -> Result<T, FailureReason>
where
    F: Future<Output = Result<T, ToolError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(on_error(err)),
        Err(_) => Err(FailureReason::Timeout { step }),
    }
}

/// Architecture problems on any slot take precedence over missing slots.
fn first_failure(
    declared: Architecture,
    fetched: &[(String, String, Vec<u8>)],
    verdicts: &[Verdict],
) -> Option<FailureReason> {
    let slots = fetched.iter().map(|(slot, _, _)| slot);
    let arch = slots.clone().zip(verdicts).find_map(|(slot, verdict)| match verdict {
        Verdict::Undetectable => Some(FailureReason::ArchitectureUndetectable { slot: slot.clone() }),
        Verdict::ArchitectureMismatch { detected } => Some(FailureReason::ArchitectureMismatch {
            slot: slot.clone(),
            expected: declared,
            actual: *detected,
        }),
        _ => None,
    });
    arch.or_else(|| {
        slots.zip(verdicts).find_map(|(slot, verdict)| match verdict {
            Verdict::MissingSlot { path } => Some(FailureReason::LibraryNotFound {
                slot: slot.clone(),
                path: path.display().to_string(),
            }),
            _ => None,
        })
    })
}

/// Writes every changed slot. All replacements are staged next to their
/// targets first; targets are only touched once every stage succeeded. Each
/// original is moved aside before its replacement lands, and a failed rename
/// puts every already-swapped original back.
fn swap_all(
    fetched: &[(String, String, Vec<u8>)],
    verdicts: Vec<Verdict>,
) -> Result<BTreeMap<String, SlotOutcome>, FailureReason> {
    let mut staged = Vec::new();
    let mut outcomes = BTreeMap::new();
    for ((slot, url, bytes), verdict) in fetched.iter().zip(verdicts) {
        let outcome = match verdict {
            Verdict::Changed { target, before, after } => {
                let dir = target.parent().unwrap_or_else(|| Path::new("."));
                let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(FailureReason::workspace)?;
                tmp.write_all(bytes).map_err(FailureReason::workspace)?;
                staged.push((tmp, target));
                SlotOutcome {
                    fingerprint_before: before,
                    fingerprint_after: after,
                    changed: true,
                    url: url.clone(),
                }
            }
            Verdict::Unchanged { fingerprint, .. } => {
                tracing::info!("{} is byte-identical, leaving it in place", slot);
                SlotOutcome {
                    fingerprint_before: fingerprint.clone(),
                    fingerprint_after: fingerprint,
                    changed: false,
                    url: url.clone(),
                }
            }
            other => {
                return Err(FailureReason::workspace(format!(
                    "unverified slot {}: {:?}",
                    slot, other
                )))
            }
        };
        outcomes.insert(slot.clone(), outcome);
    }

    let mut applied: Vec<(PathBuf, PathBuf)> = Vec::with_capacity(staged.len());
    for (tmp, target) in staged {
        let backup = backup_path(&target);
        if let Err(err) = std::fs::rename(&target, &backup) {
            roll_back(&applied);
            return Err(FailureReason::workspace(format!("{}: {}", target.display(), err)));
        }
        if let Err(err) = tmp.persist(&target) {
            if let Err(restore) = std::fs::rename(&backup, &target) {
                tracing::error!("cannot restore {}: {}", target.display(), restore);
            }
            roll_back(&applied);
            return Err(FailureReason::workspace(format!("{}: {}", target.display(), err.error)));
        }
        applied.push((target, backup));
    }
    for (_, backup) in applied {
        if let Err(err) = std::fs::remove_file(&backup) {
            tracing::warn!("failed to remove {}: {}", backup.display(), err);
        }
    }
    Ok(outcomes)
}

fn backup_path(target: &Path) -> PathBuf {
    let mut name = target.as_os_str().to_owned();
    name.push(".orig");
    PathBuf::from(name)
}

/// Puts originals back, newest swap first.
fn roll_back(applied: &[(PathBuf, PathBuf)]) {
    for (target, backup) in applied.iter().rev() {
        if let Err(err) = std::fs::rename(backup, target) {
            tracing::error!("cannot restore {}: {}", target.display(), err);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use goblin::elf::header::{EM_AARCH64, EM_ARM};

    use super::*;
    use crate::arch::elf_stub;
    use crate::task::TaskStatus;
    use crate::testing::{harness, lib_path, slots, tree_of, wait_terminal, FakeFetcher, FakePackageTool};

    fn upload(bytes: &[u8], arch: Architecture, requests: BTreeMap<String, String>) -> Submission {
        Submission {
            package_identifier: "com.example.app".to_string(),
            filename: Some("app.apk".to_string()),
            declared_architecture: arch,
            replacement_requests: requests,
            source: ArtifactSource::Upload(Bytes::copy_from_slice(bytes)),
            expected_fingerprint: None,
        }
    }

    fn arm64_lib(tag: &[u8]) -> Vec<u8> {
        let mut blob = elf_stub(EM_AARCH64);
        blob.extend_from_slice(tag);
        blob
    }

    #[tokio::test]
    async fn architecture_mismatch_fails_without_writes() {
        let v7_old = elf_stub(EM_ARM);
        let tool = FakePackageTool::with_libs(vec![
            (lib_path(Architecture::ArmeabiV7a, "libX.so"), v7_old.clone()),
            (lib_path(Architecture::ArmeabiV7a, "libY.so"), v7_old.clone()),
        ]);
        let mut v7_new = elf_stub(EM_ARM);
        v7_new.extend_from_slice(b"new");
        let fetcher = FakeFetcher::default()
            .with("http://libs/libX.so", arm64_lib(b"x"))
            .with("http://libs/libY.so", v7_new);
        let (_dir, orch) = harness(tool, fetcher);

        let task = orch
            .submit(upload(
                b"apk-f1",
                Architecture::ArmeabiV7a,
                slots(&[("libX.so", "http://libs/libX.so"), ("libY.so", "http://libs/libY.so")]),
            ))
            .await
            .unwrap();
        let done = wait_terminal(&orch, &task.id).await;

        assert_eq!(done.status, TaskStatus::Failed);
        assert_eq!(
            done.failure_reason,
            Some(FailureReason::ArchitectureMismatch {
                slot: "libX.so".to_string(),
                expected: Architecture::ArmeabiV7a,
                actual: Architecture::Arm64V8a,
            })
        );
        let tree = tree_of(&orch, &done.id);
        for slot in ["libX.so", "libY.so"] {
            let on_disk = std::fs::read(tree.join(lib_path(Architecture::ArmeabiV7a, slot))).unwrap();
            assert_eq!(fingerprint(&on_disk), fingerprint(&v7_old), "{} modified", slot);
        }
        assert_eq!(orch.index().exists(&done.input_fingerprint), (false, 0));
    }

    #[tokio::test]
    async fn missing_library_leaves_present_slot_untouched() {
        let old = arm64_lib(b"old");
        let tool = FakePackageTool::with_libs(vec![(lib_path(Architecture::Arm64V8a, "libA.so"), old.clone())]);
        let fetcher = FakeFetcher::default()
            .with("http://libs/libA.so", arm64_lib(b"newA"))
            .with("http://libs/libB.so", arm64_lib(b"newB"));
        let (_dir, orch) = harness(tool, fetcher);

        let task = orch
            .submit(upload(
                b"apk-f1",
                Architecture::Arm64V8a,
                slots(&[("libA.so", "http://libs/libA.so"), ("libB.so", "http://libs/libB.so")]),
            ))
            .await
            .unwrap();
        let done = wait_terminal(&orch, &task.id).await;

        assert_eq!(
            done.failure_reason,
            Some(FailureReason::LibraryNotFound {
                slot: "libB.so".to_string(),
                path: "lib/arm64-v8a/libB.so".to_string(),
            })
        );
        let tree = tree_of(&orch, &done.id);
        let on_disk = std::fs::read(tree.join(lib_path(Architecture::Arm64V8a, "libA.so"))).unwrap();
        assert_eq!(on_disk, old);
    }

    #[tokio::test]
    async fn success_records_result_and_index() {
        let old = arm64_lib(b"old");
        let new = arm64_lib(b"new");
        let tool = FakePackageTool::with_libs(vec![(lib_path(Architecture::Arm64V8a, "libgame.so"), old.clone())]);
        let fetcher = FakeFetcher::default().with("http://libs/libgame.so", new.clone());
        let (_dir, orch) = harness(tool, fetcher);

        let task = orch
            .submit(upload(
                b"apk-f1",
                Architecture::Arm64V8a,
                slots(&[("libgame.so", "http://libs/libgame.so")]),
            ))
            .await
            .unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        let done = wait_terminal(&orch, &task.id).await;
        assert_eq!(done.status, TaskStatus::Complete, "{:?}", done.reason);

        let result = done.result.clone().unwrap();
        assert_eq!(result.input_fingerprint, fingerprint(b"apk-f1"));
        let outcome = &result.slots["libgame.so"];
        assert!(outcome.changed);
        assert_eq!(outcome.fingerprint_before, fingerprint(&old));
        assert_eq!(outcome.fingerprint_after, fingerprint(&new));
        assert_eq!(result.download_path, format!("/download/{}", done.id));

        let final_bytes = std::fs::read(&result.final_artifact_path).unwrap();
        assert_eq!(fingerprint(&final_bytes), result.output_fingerprint);

        let fp = fingerprint(b"apk-f1");
        assert_eq!(orch.index().exists(&fp), (true, 1));
        let latest = orch.index().latest(&fp, None).unwrap();
        assert_eq!(latest.task_id, done.id);
        assert_eq!(latest.output_fingerprint, result.output_fingerprint);

        let tree = tree_of(&orch, &done.id);
        assert_eq!(std::fs::read(tree.join(lib_path(Architecture::Arm64V8a, "libgame.so"))).unwrap(), new);
        let ws = tree.parent().unwrap();
        assert!(!ws.join("unsigned.apk").exists());
        assert!(!ws.join("aligned.apk").exists());
        assert!(orch.uploads().locate(&fp).is_some());
    }

    #[tokio::test]
    async fn identical_replacement_is_a_successful_noop() {
        let blob = arm64_lib(b"same");
        let tool = FakePackageTool::with_libs(vec![(lib_path(Architecture::Arm64V8a, "libgame.so"), blob.clone())]);
        let fetcher = FakeFetcher::default().with("http://libs/libgame.so", blob.clone());
        let (_dir, orch) = harness(tool, fetcher);

        let task = orch
            .submit(upload(b"apk", Architecture::Arm64V8a, slots(&[("libgame.so", "http://libs/libgame.so")])))
            .await
            .unwrap();
        let done = wait_terminal(&orch, &task.id).await;
        assert_eq!(done.status, TaskStatus::Complete);
        let outcome = &done.result.unwrap().slots["libgame.so"];
        assert!(!outcome.changed);
        assert_eq!(outcome.fingerprint_before, outcome.fingerprint_after);
    }

    #[tokio::test]
    async fn cached_source_reuses_upload_and_appends_history() {
        let tool = FakePackageTool::with_libs(vec![(lib_path(Architecture::Arm64V8a, "libgame.so"), arm64_lib(b"old"))]);
        let fetcher = FakeFetcher::default()
            .with("http://libs/v1.so", arm64_lib(b"v1"))
            .with("http://libs/v2.so", arm64_lib(b"v2"));
        let (_dir, orch) = harness(tool, fetcher);

        let first = orch
            .submit(upload(b"apk-f1", Architecture::Arm64V8a, slots(&[("libgame.so", "http://libs/v1.so")])))
            .await
            .unwrap();
        let first = wait_terminal(&orch, &first.id).await;
        assert_eq!(first.status, TaskStatus::Complete);

        let fp = fingerprint(b"apk-f1");
        let second = orch
            .submit(Submission {
                package_identifier: "com.example.app".to_string(),
                filename: None,
                declared_architecture: Architecture::Arm64V8a,
                replacement_requests: slots(&[("libgame.so", "http://libs/v2.so")]),
                source: ArtifactSource::Cached(fp.clone()),
                expected_fingerprint: None,
            })
            .await
            .unwrap();
        let second = wait_terminal(&orch, &second.id).await;
        assert_eq!(second.status, TaskStatus::Complete, "{:?}", second.reason);
        assert_ne!(first.id, second.id);

        assert_eq!(orch.index().exists(&fp), (true, 2));
        let all = orch.index().all();
        let history = &all[&fp];
        assert_eq!(history[0].task_id, second.id);
        assert_eq!(history[1].task_id, first.id);
        assert_ne!(tree_of(&orch, &first.id), tree_of(&orch, &second.id));
    }

    #[tokio::test]
    async fn cached_source_without_upload_is_not_found() {
        let (_dir, orch) = harness(FakePackageTool::with_libs(vec![]), FakeFetcher::default());
        let fp = fingerprint(b"never uploaded");
        let task = orch
            .submit(Submission {
                package_identifier: "com.example.app".to_string(),
                filename: None,
                declared_architecture: Architecture::Arm64V8a,
                replacement_requests: slots(&[("libgame.so", "http://libs/x.so")]),
                source: ArtifactSource::Cached(fp.clone()),
                expected_fingerprint: None,
            })
            .await
            .unwrap();
        let done = wait_terminal(&orch, &task.id).await;
        assert_eq!(done.failure_reason, Some(FailureReason::ArtifactNotFound { fingerprint: fp }));
    }

    #[tokio::test]
    async fn expected_fingerprint_must_match_upload() {
        let (_dir, orch) = harness(FakePackageTool::with_libs(vec![]), FakeFetcher::default());
        let claimed = fingerprint(b"something else");
        let mut submission = upload(b"apk", Architecture::Arm64V8a, slots(&[("libgame.so", "http://libs/x.so")]));
        submission.expected_fingerprint = Some(claimed.clone());
        let task = orch.submit(submission).await.unwrap();
        assert_eq!(task.input_fingerprint, fingerprint(b"apk"));

        let done = wait_terminal(&orch, &task.id).await;
        assert_eq!(
            done.failure_reason,
            Some(FailureReason::FingerprintMismatch {
                expected: claimed,
                actual: fingerprint(b"apk"),
            })
        );
    }

    #[tokio::test]
    async fn download_failure_names_slot() {
        let tool = FakePackageTool::with_libs(vec![(lib_path(Architecture::Arm64V8a, "libgame.so"), arm64_lib(b"old"))]);
        let (_dir, orch) = harness(tool, FakeFetcher::default());
        let task = orch
            .submit(upload(b"apk", Architecture::Arm64V8a, slots(&[("libgame.so", "http://libs/gone.so")])))
            .await
            .unwrap();
        let done = wait_terminal(&orch, &task.id).await;
        assert!(matches!(
            done.failure_reason,
            Some(FailureReason::DownloadFailed { ref slot, .. }) if slot == "libgame.so"
        ));
    }

    #[tokio::test]
    async fn tool_failures_map_to_their_step() {
        let cases = [
            (Step::Unpack, "UnpackFailed"),
            (Step::Rebuild, "RebuildFailed"),
            (Step::Align, "AlignFailed"),
            (Step::Sign, "SignFailed"),
        ];
        for (step, kind) in cases {
            let tool = FakePackageTool::with_libs(vec![(lib_path(Architecture::Arm64V8a, "libgame.so"), arm64_lib(b"old"))])
                .failing_at(step);
            let fetcher = FakeFetcher::default().with("http://libs/new.so", arm64_lib(b"new"));
            let (_dir, orch) = harness(tool, fetcher);
            let task = orch
                .submit(upload(b"apk", Architecture::Arm64V8a, slots(&[("libgame.so", "http://libs/new.so")])))
                .await
                .unwrap();
            let done = wait_terminal(&orch, &task.id).await;
            let reason = serde_json::to_value(done.failure_reason.unwrap()).unwrap();
            assert_eq!(reason["kind"], kind);
            assert_eq!(orch.index().exists(&done.input_fingerprint), (false, 0));
        }
    }

    #[tokio::test]
    async fn hung_tool_times_out() {
        let tool = FakePackageTool::with_libs(vec![(lib_path(Architecture::Arm64V8a, "libgame.so"), arm64_lib(b"old"))])
            .hanging_at(Step::Rebuild);
        let fetcher = FakeFetcher::default().with("http://libs/new.so", arm64_lib(b"new"));
        let (_dir, orch) = harness(tool, fetcher);
        let task = orch
            .submit(upload(b"apk", Architecture::Arm64V8a, slots(&[("libgame.so", "http://libs/new.so")])))
            .await
            .unwrap();
        let done = wait_terminal(&orch, &task.id).await;
        assert_eq!(done.failure_reason, Some(FailureReason::Timeout { step: Step::Rebuild }));
    }

    #[tokio::test]
    async fn hung_download_times_out() {
        let tool = FakePackageTool::with_libs(vec![(lib_path(Architecture::Arm64V8a, "libgame.so"), arm64_lib(b"old"))]);
        let fetcher = FakeFetcher::default().stalling_on("http://libs/slow.so");
        let (_dir, orch) = harness(tool, fetcher);
        let task = orch
            .submit(upload(b"apk", Architecture::Arm64V8a, slots(&[("libgame.so", "http://libs/slow.so")])))
            .await
            .unwrap();
        let done = wait_terminal(&orch, &task.id).await;
        assert_eq!(done.failure_reason, Some(FailureReason::Timeout { step: Step::Fetch }));
    }

    #[tokio::test]
    async fn unclassifiable_library_is_undetectable() {
        let old = arm64_lib(b"old");
        let tool = FakePackageTool::with_libs(vec![(lib_path(Architecture::Arm64V8a, "libgame.so"), old.clone())]);
        let fetcher = FakeFetcher::default().with("http://libs/junk.so", b"not an elf".to_vec());
        let (_dir, orch) = harness(tool, fetcher);
        let task = orch
            .submit(upload(b"apk", Architecture::Arm64V8a, slots(&[("libgame.so", "http://libs/junk.so")])))
            .await
            .unwrap();
        let done = wait_terminal(&orch, &task.id).await;
        assert_eq!(
            done.failure_reason,
            Some(FailureReason::ArchitectureUndetectable {
                slot: "libgame.so".to_string()
            })
        );
        let tree = tree_of(&orch, &done.id);
        assert_eq!(std::fs::read(tree.join(lib_path(Architecture::Arm64V8a, "libgame.so"))).unwrap(), old);
    }

    #[tokio::test]
    async fn architecture_failure_outranks_missing_slot() {
        let old_b = arm64_lib(b"oldB");
        let old_c = arm64_lib(b"oldC");
        let tool = FakePackageTool::with_libs(vec![
            (lib_path(Architecture::Arm64V8a, "libB.so"), old_b.clone()),
            (lib_path(Architecture::Arm64V8a, "libC.so"), old_c.clone()),
        ]);
        let fetcher = FakeFetcher::default()
            .with("http://libs/libA.so", arm64_lib(b"newA"))
            .with("http://libs/libB.so", elf_stub(EM_ARM))
            .with("http://libs/libC.so", arm64_lib(b"newC"));
        let (_dir, orch) = harness(tool, fetcher);

        let task = orch
            .submit(upload(
                b"apk",
                Architecture::Arm64V8a,
                slots(&[
                    ("libA.so", "http://libs/libA.so"),
                    ("libB.so", "http://libs/libB.so"),
                    ("libC.so", "http://libs/libC.so"),
                ]),
            ))
            .await
            .unwrap();
        let done = wait_terminal(&orch, &task.id).await;

        assert_eq!(
            done.failure_reason,
            Some(FailureReason::ArchitectureMismatch {
                slot: "libB.so".to_string(),
                expected: Architecture::Arm64V8a,
                actual: Architecture::ArmeabiV7a,
            })
        );
        let tree = tree_of(&orch, &done.id);
        assert_eq!(std::fs::read(tree.join(lib_path(Architecture::Arm64V8a, "libB.so"))).unwrap(), old_b);
        assert_eq!(std::fs::read(tree.join(lib_path(Architecture::Arm64V8a, "libC.so"))).unwrap(), old_c);
        assert!(!tree.join(lib_path(Architecture::Arm64V8a, "libA.so")).exists());
    }

    #[test]
    fn failed_swap_restores_earlier_slots() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("libA.so");
        let b = dir.path().join("libB.so");
        std::fs::write(&a, b"oldA").unwrap();
        std::fs::write(&b, b"oldB").unwrap();
        // A non-empty directory where libB's backup would go blocks its rename.
        std::fs::create_dir(dir.path().join("libB.so.orig")).unwrap();
        std::fs::write(dir.path().join("libB.so.orig").join("keep"), b"").unwrap();

        let fetched = vec![
            ("libA.so".to_string(), "http://libs/a".to_string(), b"newA".to_vec()),
            ("libB.so".to_string(), "http://libs/b".to_string(), b"newB".to_vec()),
        ];
        let verdicts = vec![
            Verdict::Changed {
                target: a.clone(),
                before: fingerprint(b"oldA"),
                after: fingerprint(b"newA"),
            },
            Verdict::Changed {
                target: b.clone(),
                before: fingerprint(b"oldB"),
                after: fingerprint(b"newB"),
            },
        ];

        let err = swap_all(&fetched, verdicts).unwrap_err();
        assert!(matches!(err, FailureReason::WorkspaceFailed { .. }), "{:?}", err);
        assert_eq!(std::fs::read(&a).unwrap(), b"oldA");
        assert_eq!(std::fs::read(&b).unwrap(), b"oldB");
        assert!(!dir.path().join("libA.so.orig").exists());

        let mut names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        names.sort();
        assert_eq!(names, ["libA.so", "libB.so", "libB.so.orig"]);
    }

    #[tokio::test]
    async fn submit_rejects_bad_requests() {
        let (_dir, orch) = harness(FakePackageTool::with_libs(vec![]), FakeFetcher::default());
        let blank = upload(b"apk", Architecture::Arm64V8a, slots(&[("libgame.so", "  ")]));
        assert!(matches!(orch.submit(blank).await, Err(SubmitError::NoReplacements)));

        let traversal = upload(b"apk", Architecture::Arm64V8a, slots(&[("../libc.so", "http://x")]));
        assert!(matches!(orch.submit(traversal).await, Err(SubmitError::InvalidSlot(_))));

        let empty = upload(b"", Architecture::Arm64V8a, slots(&[("libgame.so", "http://x")]));
        assert!(matches!(orch.submit(empty).await, Err(SubmitError::EmptyUpload)));
        assert!(orch.tasks().list(10).is_empty());
    }

    #[tokio::test]
    async fn blank_urls_are_dropped_from_requests() {
        let (_dir, orch) = harness(FakePackageTool::with_libs(vec![]), FakeFetcher::default());
        let (task, _job) = orch
            .prepare(upload(
                b"apk",
                Architecture::Arm64V8a,
                slots(&[("libgame.so", "http://libs/a.so"), ("libskip.so", "")]),
            ))
            .await
            .unwrap();
        assert_eq!(task.replacement_requests.len(), 1);
        assert!(task.replacement_requests.contains_key("libgame.so"));
    }

    #[tokio::test]
    async fn concurrent_tasks_on_same_artifact_are_isolated() {
        let tool = FakePackageTool::with_libs(vec![(lib_path(Architecture::Arm64V8a, "libgame.so"), arm64_lib(b"old"))]);
        let fetcher = FakeFetcher::default()
            .with("http://libs/a.so", arm64_lib(b"a"))
            .with("http://libs/b.so", arm64_lib(b"b"));
        let (_dir, orch) = harness(tool, fetcher);

        let a = orch
            .submit(upload(b"apk", Architecture::Arm64V8a, slots(&[("libgame.so", "http://libs/a.so")])))
            .await
            .unwrap();
        let b = orch
            .submit(upload(b"apk", Architecture::Arm64V8a, slots(&[("libgame.so", "http://libs/b.so")])))
            .await
            .unwrap();
        let a = wait_terminal(&orch, &a.id).await;
        let b = wait_terminal(&orch, &b.id).await;
        assert_eq!(a.status, TaskStatus::Complete);
        assert_eq!(b.status, TaskStatus::Complete);
        assert_ne!(
            a.result.unwrap().output_fingerprint,
            b.result.unwrap().output_fingerprint
        );
        assert_eq!(orch.index().exists(&fingerprint(b"apk")), (true, 2));
    }
}
