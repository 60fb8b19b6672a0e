//! HTTP routes.
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | POST | `/graphql` | Accept a GraphQL multipart request and report its files |
//! | GET | `/healthz` | Liveness probe |

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use gqlup_multipart::{process_request, RequestLifecycle, Upload, UploadError, UploadOptions};
use serde::Serialize;
use tracing::{debug, info};

/// Shared state for the route handlers.
#[derive(Clone)]
pub struct AppState {
    pub uploads: UploadOptions,
}

pub fn build_router(uploads: UploadOptions) -> Router {
    Router::new()
        .route("/graphql", post(graphql_upload))
        .route("/healthz", get(healthz))
        .with_state(AppState { uploads })
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

fn error_response(msg: &str, status: StatusCode) -> axum::response::Response {
    (
        status,
        Json(ErrorBody {
            error: msg.to_string(),
        }),
    )
        .into_response()
}

fn upload_error_response(err: &UploadError) -> axum::response::Response {
    let status = StatusCode::from_u16(err.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    error_response(&err.to_string(), status)
}

/// Per-file outcome in the upload report.
#[derive(Debug, Serialize)]
#[serde(untagged)]
enum FileReport {
    Received {
        path: String,
        filename: String,
        mimetype: String,
        encoding: String,
        size: u64,
    },
    Failed {
        path: String,
        error: String,
        status: u16,
    },
}

#[derive(Serialize)]
struct UploadReport {
    operations: serde_json::Value,
    files: Vec<FileReport>,
}

/// Aborts the request if the handler is dropped before it completes,
/// which is how a client disconnect surfaces here.
struct DisconnectGuard {
    lifecycle: Option<RequestLifecycle>,
}

impl DisconnectGuard {
    fn complete(mut self) -> Option<RequestLifecycle> {
        self.lifecycle.take()
    }
}

impl Drop for DisconnectGuard {
    fn drop(&mut self) {
        if let Some(lifecycle) = self.lifecycle.take() {
            if lifecycle.request_disconnected() {
                debug!("client disconnected mid-request");
            }
        }
    }
}

/// GET /healthz
async fn healthz() -> &'static str {
    "ok"
}

/// POST /graphql
async fn graphql_upload(State(state): State<AppState>, headers: HeaderMap, body: Body) -> axum::response::Response {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    let boundary = match multer::parse_boundary(content_type) {
        Ok(boundary) => boundary,
        Err(_) => {
            return error_response("expected a multipart/form-data request", StatusCode::BAD_REQUEST);
        }
    };

    let (operations, lifecycle) = process_request(body.into_data_stream(), boundary, state.uploads.clone());
    let guard = DisconnectGuard {
        lifecycle: Some(lifecycle),
    };

    let operations = match operations.await {
        Ok(operations) => operations,
        Err(err) => {
            debug!(error = %err, "rejecting multipart request");
            return upload_error_response(&err);
        }
    };

    let mut files = Vec::new();
    for (path, upload) in operations.uploads() {
        files.push(receive(path, upload).await);
    }

    if let Some(lifecycle) = guard.complete() {
        lifecycle.response_finished();
    }

    info!(files = files.len(), "multipart request processed");
    Json(UploadReport {
        operations: operations.to_json(),
        files,
    })
    .into_response()
}

async fn receive(path: String, upload: &Upload) -> FileReport {
    let received = async {
        let file = upload.file().await?;
        let bytes = file.create_read_stream()?.read_to_end().await?;
        Ok::<_, UploadError>((file, bytes.len() as u64))
    };
    match received.await {
        Ok((file, size)) => FileReport::Received {
            path,
            filename: file.filename,
            mimetype: file.mimetype,
            encoding: file.encoding,
            size,
        },
        Err(err) => FileReport::Failed {
            path,
            status: err.status(),
            error: err.to_string(),
        },
    }
}
