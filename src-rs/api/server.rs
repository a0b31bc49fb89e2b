use std::net::SocketAddr;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;

use crate::api::handlers::{
    handle_check, handle_download, handle_download_cached, handle_exist_pkg, handle_index,
    handle_root, handle_task_status, handle_tasks, handle_upload,
};
use crate::orchestrator::Orchestrator;

pub struct RelibServer {
    pub port: u16,
    pub orchestrator: Orchestrator,
}

pub fn router(orchestrator: Orchestrator) -> Router {
    let body_limit = orchestrator.config().max_upload_bytes;
    Router::new()
        .route("/", get(handle_root))
        .route("/health", get(handle_root))
        .route("/check_md5/:fingerprint", get(handle_check))
        .route("/upload", post(handle_upload))
        .route("/exist_pkg", post(handle_exist_pkg))
        .route("/task_status/:task_id", get(handle_task_status))
        .route("/download/:task_id", get(handle_download))
        .route("/download_cached/:fingerprint", get(handle_download_cached))
        .route("/index", get(handle_index))
        .route("/tasks", get(handle_tasks))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(orchestrator)
}

impl RelibServer {
    pub fn new(port: u16, orchestrator: Orchestrator) -> Self {
        Self { port, orchestrator }
    }

    pub async fn start(&self) -> Result<(), String> {
        let app = router(self.orchestrator.clone());
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        tracing::info!("listening on {}", addr);
        axum::Server::bind(&addr)
            .serve(app.into_make_service())
            .await
            .map_err(|err| err.to_string())
    }
}
