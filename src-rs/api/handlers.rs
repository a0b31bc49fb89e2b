use std::collections::BTreeMap;
use std::path::Path as FsPath;

use axum::body::StreamBody;
use axum::extract::{Multipart, Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{Form, Json};
use bytes::Bytes;
use serde::Deserialize;
use serde_json::json;
use tokio_util::io::ReaderStream;

use crate::arch::Architecture;
use crate::hash::Fingerprint;
use crate::index::Summary;
use crate::orchestrator::{ArtifactSource, Orchestrator, Submission, SubmitError};
use crate::task::{Task, TaskStatus};

const APK_MEDIA_TYPE: &str = "application/vnd.android.package-archive";

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "detail": self.to_string() }))).into_response()
    }
}

impl From<SubmitError> for ApiError {
    fn from(err: SubmitError) -> Self {
        match err {
            SubmitError::Hashing(_) => ApiError::Internal(err.to_string()),
            _ => ApiError::BadRequest(err.to_string()),
        }
    }
}

fn parse_fingerprint(raw: &str) -> Result<Fingerprint, ApiError> {
    Fingerprint::parse(raw).map_err(|err| ApiError::BadRequest(err.to_string()))
}

fn parse_architecture(raw: &str) -> Result<Architecture, ApiError> {
    raw.parse()
        .map_err(|err: crate::arch::UnknownArchitecture| ApiError::BadRequest(err.to_string()))
}

/// `so_files` is a JSON object of library name -> download URL.
fn parse_replacements(raw: &str) -> Result<BTreeMap<String, String>, ApiError> {
    let value: serde_json::Value = serde_json::from_str(raw)
        .map_err(|_| ApiError::BadRequest("so_files must be valid JSON string".to_string()))?;
    let object = value
        .as_object()
        .ok_or_else(|| ApiError::BadRequest("so_files must be a JSON object".to_string()))?;
    if object.is_empty() {
        return Err(ApiError::BadRequest("so_files cannot be empty".to_string()));
    }
    let mut out = BTreeMap::new();
    for (slot, url) in object {
        let url = url
            .as_str()
            .ok_or_else(|| ApiError::BadRequest("so_files must be {string: string}".to_string()))?;
        out.insert(slot.clone(), url.to_string());
    }
    Ok(out)
}

fn accepted(task: &Task, message: &str) -> Json<serde_json::Value> {
    Json(json!({
        "task_id": task.id,
        "status": task.status,
        "message": message,
        "md5": task.input_fingerprint,
    }))
}

pub async fn handle_root() -> Json<serde_json::Value> {
    Json(json!({
        "msg": "Native library replacement server",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running",
    }))
}

pub async fn handle_check(
    State(orch): State<Orchestrator>,
    Path(raw): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let fp = parse_fingerprint(&raw)?;
    let (exists, count) = orch.index().exists(&fp);
    let mut body = json!({ "exists": exists, "md5": fp, "count": count });
    if let Some(latest) = orch.index().latest(&fp, None) {
        body["latest_task"] = json!(latest);
    }
    tracing::debug!("check {}: exists={} count={}", fp, exists, count);
    Ok(Json(body))
}

pub async fn handle_upload(
    State(orch): State<Orchestrator>,
    mut multipart: Multipart,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut file: Option<(Option<String>, Bytes)> = None;
    let mut fields: BTreeMap<String, String> = BTreeMap::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| ApiError::BadRequest(err.to_string()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        if name == "file" {
            let filename = field.file_name().map(str::to_string);
            let bytes = field
                .bytes()
                .await
                .map_err(|err| ApiError::BadRequest(err.to_string()))?;
            file = Some((filename, bytes));
        } else {
            let text = field
                .text()
                .await
                .map_err(|err| ApiError::BadRequest(err.to_string()))?;
            fields.insert(name, text);
        }
    }

    let field = |primary: &str, alias: &str| {
        fields
            .get(primary)
            .or_else(|| fields.get(alias))
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    };
    let (filename, bytes) = file.ok_or_else(|| ApiError::BadRequest("file is required".to_string()))?;
    let arch_raw = field("so_architecture", "declared_architecture")
        .ok_or_else(|| ApiError::BadRequest("so_architecture is required".to_string()))?;
    let slots_raw = field("so_files", "replacement_requests")
        .ok_or_else(|| ApiError::BadRequest("so_files is required".to_string()))?;
    let package = field("pkg_name", "package_identifier")
        .ok_or_else(|| ApiError::BadRequest("pkg_name is required".to_string()))?;
    let expected = field("md5", "expected_fingerprint")
        .map(|raw| parse_fingerprint(&raw))
        .transpose()?;

    let submission = Submission {
        package_identifier: package,
        filename,
        declared_architecture: parse_architecture(&arch_raw)?,
        replacement_requests: parse_replacements(&slots_raw)?,
        source: ArtifactSource::Upload(bytes),
        expected_fingerprint: expected,
    };
    let task = orch.submit(submission).await?;
    Ok(accepted(&task, "processing started"))
}

#[derive(Debug, Deserialize)]
pub struct ExistPkgForm {
    #[serde(alias = "fingerprint")]
    pub md5: String,
    #[serde(alias = "package_identifier")]
    pub pkg_name: String,
    #[serde(alias = "declared_architecture")]
    pub so_architecture: String,
    #[serde(alias = "replacement_requests")]
    pub so_files: String,
}

pub async fn handle_exist_pkg(
    State(orch): State<Orchestrator>,
    Form(form): Form<ExistPkgForm>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let declared_architecture = parse_architecture(&form.so_architecture)?;
    let replacement_requests = parse_replacements(&form.so_files)?;
    let fp = parse_fingerprint(&form.md5)?;
    if !orch.index().exists(&fp).0 {
        return Err(ApiError::NotFound(format!(
            "md5 {} not found in index, use /upload for new packages",
            fp
        )));
    }

    let task = orch.submit(Submission {
        package_identifier: form.pkg_name,
        filename: None,
        declared_architecture,
        replacement_requests,
        source: ArtifactSource::Cached(fp),
        expected_fingerprint: None,
    })
    .await?;
    Ok(accepted(&task, "processing started (using cached upload)"))
}

pub async fn handle_task_status(
    State(orch): State<Orchestrator>,
    Path(task_id): Path<String>,
) -> Result<Json<Task>, ApiError> {
    orch.tasks()
        .get(&task_id)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("task not found".to_string()))
}

pub async fn handle_download(
    State(orch): State<Orchestrator>,
    Path(task_id): Path<String>,
) -> Result<Response, ApiError> {
    let task = orch
        .tasks()
        .get(&task_id)
        .ok_or_else(|| ApiError::NotFound("task not found".to_string()))?;
    let result = match (&task.status, &task.result) {
        (TaskStatus::Complete, Some(result)) => result,
        (status, _) => {
            return Err(ApiError::Conflict(format!(
                "task not complete, current status: {}",
                status.as_str()
            )))
        }
    };
    serve_artifact(FsPath::new(&result.final_artifact_path), &task.package_identifier).await
}

#[derive(Debug, Deserialize, Default)]
pub struct CachedQuery {
    #[serde(alias = "declared_architecture")]
    pub so_architecture: Option<String>,
}

pub async fn handle_download_cached(
    State(orch): State<Orchestrator>,
    Path(raw): Path<String>,
    Query(query): Query<CachedQuery>,
) -> Result<Response, ApiError> {
    let fp = parse_fingerprint(&raw)?;
    let arch = query
        .so_architecture
        .as_deref()
        .filter(|raw| !raw.trim().is_empty())
        .map(parse_architecture)
        .transpose()?;
    let summary: Summary = orch
        .index()
        .latest(&fp, arch)
        .ok_or_else(|| ApiError::NotFound("cached artifact not found".to_string()))?;
    serve_artifact(FsPath::new(&summary.final_artifact_path), &summary.package_identifier).await
}

pub async fn handle_index(State(orch): State<Orchestrator>) -> Json<serde_json::Value> {
    let index = orch.index().all();
    let total: usize = index.values().map(Vec::len).sum();
    tracing::debug!("index: {} fingerprints, {} summaries", index.len(), total);
    Json(json!(index))
}

#[derive(Debug, Deserialize, Default)]
pub struct TasksQuery {
    pub limit: Option<usize>,
}

pub async fn handle_tasks(
    State(orch): State<Orchestrator>,
    Query(query): Query<TasksQuery>,
) -> Json<serde_json::Value> {
    let limit = query.limit.unwrap_or(10);
    Json(json!({ "tasks": orch.tasks().list(limit) }))
}

async fn serve_artifact(path: &FsPath, package: &str) -> Result<Response, ApiError> {
    let file = match tokio::fs::File::open(path).await {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::warn!("artifact missing on disk: {}", path.display());
            return Err(ApiError::NotFound("artifact file not found".to_string()));
        }
        Err(err) => {
            tracing::error!("failed to open {}: {}", path.display(), err);
            return Err(ApiError::Internal("failed to read artifact".to_string()));
        }
    };
    let len = file
        .metadata()
        .await
        .map_err(|err| ApiError::Internal(err.to_string()))?
        .len();
    let filename = format!("{}_signed.apk", crate::helpers::sanitize_component(package));
    tracing::info!("serving {} ({} bytes)", filename, len);

    let headers = [
        (header::CONTENT_TYPE, APK_MEDIA_TYPE.to_string()),
        (header::CONTENT_LENGTH, len.to_string()),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", filename),
        ),
    ];
    Ok((headers, StreamBody::new(ReaderStream::new(file))).into_response())
}
