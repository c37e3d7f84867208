//! HTTP surface: JSON API, health check and static artifact serving.
use anyhow::{Context, Result};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use log::{error, info};
use std::any::Any as PanicPayload;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::{Any, CorsLayer},
    services::ServeDir,
};
use uuid::Uuid;

use crate::error::JobError;
use crate::models::{DownloadRequest, DownloadResponse, HealthResponse, Job, JobList, MessageResponse};
use crate::service::JobService;

/// Build the router. Artifacts are served from the data directory under `/files`.
pub fn create_router(service: JobService) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let files = ServeDir::new(service.data_dir());

    Router::new()
        .route("/health", get(health))
        .route("/api/download", post(start_download))
        .route("/api/status/:job_id", get(get_status))
        .route("/api/jobs", get(list_jobs))
        .route("/api/jobs/:job_id", delete(delete_job))
        .nest_service("/files", files)
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(cors)
        .with_state(service)
}

/// A handler that panics answers with the usual `internal_error` body
/// instead of dropping the connection.
fn panic_response(payload: Box<dyn PanicPayload + Send + 'static>) -> Response {
    let detail = if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "handler panicked".to_string()
    };
    JobError::Internal(detail).into_response()
}

/// Ids that aren't UUIDs can't name a job, so they're reported like any
/// other unknown id.
fn parse_job_id(raw: &str) -> Result<Uuid, JobError> {
    Uuid::parse_str(raw).map_err(|_| JobError::NotFound(raw.to_string()))
}

async fn start_download(
    State(service): State<JobService>,
    Json(request): Json<DownloadRequest>,
) -> Result<Json<DownloadResponse>, JobError> {
    let job = service.start_download(&request.url)?;
    Ok(Json(DownloadResponse {
        job_id: job.id,
        status: job.status,
        message: "Download job created and started".to_string(),
    }))
}

async fn get_status(
    State(service): State<JobService>,
    Path(job_id): Path<String>,
) -> Result<Json<Job>, JobError> {
    let id = parse_job_id(&job_id)?;
    service.get_status(id).map(Json)
}

async fn list_jobs(State(service): State<JobService>) -> Json<JobList> {
    Json(service.list_jobs())
}

async fn delete_job(
    State(service): State<JobService>,
    Path(job_id): Path<String>,
) -> Result<Json<MessageResponse>, JobError> {
    let id = parse_job_id(&job_id)?;
    service.delete_job(id).await?;
    Ok(Json(MessageResponse {
        message: format!("Job {} deleted successfully", id),
    }))
}

async fn health(State(service): State<JobService>) -> impl IntoResponse {
    let writable = match service.check_storage().await {
        Ok(()) => true,
        Err(e) => {
            error!("Health check failed: {}", e);
            false
        }
    };
    let active_jobs = service.active_jobs();

    let body = HealthResponse {
        status: if writable { "healthy" } else { "unhealthy" },
        data_directory: service.data_dir().display().to_string(),
        data_directory_writable: writable,
        active_jobs,
    };
    let status = if writable {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

/// Serve until Ctrl+C or SIGTERM.
pub async fn serve(service: JobService, addr: &str) -> Result<()> {
    let app = create_router(service);
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
