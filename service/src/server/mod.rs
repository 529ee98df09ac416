//! HTTP server implementation.

mod audit;
mod auth;
mod backend;
mod handlers;
mod layers;
mod runner;

use std::sync::Arc;
use std::time::Duration;

use axum::Json;
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::http::StatusCode;
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};

use filegate::serving::ServingRegistry;
use filegate::store::sqlite::SqliteStore;
use filegate_core::policy::GatePolicy;

const MAX_BODY_BYTES: usize = 64 * 1024;

#[derive(Clone)]
struct AppState {
    inner: Arc<AppInner>,
}

struct AppInner {
    backend: backend::Backend,
    policy: GatePolicy,
    registry: Arc<ServingRegistry>,
    auth: auth::AuthMode,
    audit: Option<audit::AuditLogger>,
    io_concurrency: Arc<tokio::sync::Semaphore>,
}

#[derive(Debug, serde::Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
}

type ApiError = (StatusCode, Json<ErrorBody>);

fn err(status: StatusCode, code: &'static str, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorBody {
            code,
            message: message.into(),
        }),
    )
}

fn err_response(status: StatusCode, code: &'static str, message: impl Into<String>) -> Response {
    err(status, code, message).into_response()
}

fn status_for(code: &str) -> StatusCode {
    match code {
        "not_found" => StatusCode::NOT_FOUND,
        "auth_required" => StatusCode::UNAUTHORIZED,
        "forbidden" => StatusCode::FORBIDDEN,
        "invalid_path" | "invalid_input" | "invalid_policy" => StatusCode::BAD_REQUEST,
        "file_too_large" => StatusCode::PAYLOAD_TOO_LARGE,
        "conflict" => StatusCode::CONFLICT,
        "timeout" => StatusCode::REQUEST_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn map_err(err: filegate_core::Error) -> ApiError {
    let code = err.code();
    let status = status_for(code);

    let message = if status.is_server_error() {
        tracing::error!(code, err = %err, "filegate request failed");
        "internal error".to_string()
    } else if status == StatusCode::NOT_FOUND {
        // Never say why: missing, hidden and unservable files look the same.
        "not found".to_string()
    } else {
        err.to_string()
    };

    (status, Json(ErrorBody { code, message }))
}

fn build_state(
    backend: backend::Backend,
    mut policy: GatePolicy,
    unsafe_no_auth: bool,
) -> anyhow::Result<AppState> {
    policy.validate().map_err(anyhow::Error::msg)?;
    let registry = ServingRegistry::with_builtin().map_err(anyhow::Error::msg)?;
    let auth = auth::AuthMode::from_policy(&policy, unsafe_no_auth)?;
    let audit = policy
        .audit
        .jsonl_path
        .as_deref()
        .map(audit::AuditLogger::new)
        .transpose()?;
    let io_concurrency = policy.limits.max_concurrency;

    policy.auth.tokens.clear();

    Ok(AppState {
        inner: Arc::new(AppInner {
            backend,
            policy,
            registry: Arc::new(registry),
            auth,
            audit,
            io_concurrency: Arc::new(tokio::sync::Semaphore::new(io_concurrency)),
        }),
    })
}

pub fn build_app(
    db_path: std::path::PathBuf,
    policy: GatePolicy,
    unsafe_no_auth: bool,
) -> anyhow::Result<Router> {
    policy.validate().map_err(anyhow::Error::msg)?;
    let _ = SqliteStore::open(&db_path)?;

    const SQLITE_BUSY_TIMEOUT_CAP_MS: u64 = 5_000;
    let busy_timeout =
        Duration::from_millis(policy.limits.max_io_ms.min(SQLITE_BUSY_TIMEOUT_CAP_MS));
    let manager = r2d2_sqlite::SqliteConnectionManager::file(&db_path).with_init(move |conn| {
        conn.busy_timeout(busy_timeout)?;
        Ok(())
    });
    let pool = r2d2::Pool::builder()
        .max_size(policy.limits.max_db_connections)
        .connection_timeout(Duration::from_millis(policy.limits.max_io_ms))
        .build(manager)
        .map_err(anyhow::Error::msg)?;

    let state = build_state(backend::Backend { pool }, policy, unsafe_no_auth)?;

    Ok(Router::new()
        .route(
            "/v1/search/courses/{course_id}/access",
            get(handlers::course_access),
        )
        .route(
            "/v1/pluginfile/{context_id}/{component}/{area}/{*args}",
            get(handlers::plugin_file),
        )
        .route(
            "/v1/users/filter/course-role",
            post(handlers::course_role_filter),
        )
        .route("/v1/admin/tasks/{task_id}", post(handlers::update_task))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::auth_middleware,
        ))
        .layer(middleware::from_fn(layers::request_id_middleware))
        .with_state(state))
}
