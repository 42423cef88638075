//! HTTP 관리 API
//!
//! 콘솔과 같은 `HostContext`를 공유합니다. 모든 모듈 변경은 레지스트리 락 안에서
//! `ModuleManager`를 통해 수행됩니다.

use anyhow::Result;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::console;
use crate::context::HostContext;
use crate::host::{HostError, ModuleHost};
use crate::modmgr::{LoadError, NameFilter, ReloadReport};

#[derive(Debug, Clone, Deserialize)]
pub struct CommandRequest {
    pub command: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ModuleListQuery {
    /// `enabled` | `disabled`
    pub filter: Option<String>,
    #[serde(default)]
    pub full: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct ConsoleQuery {
    #[serde(default)]
    pub since: u64,
}

/// IPC Server State
#[derive(Clone)]
pub struct IPCServer {
    pub ctx: Arc<HostContext>,
    pub listen_addr: String,
}

impl IPCServer {
    pub fn new(ctx: Arc<HostContext>, listen_addr: &str) -> Self {
        Self {
            ctx,
            listen_addr: listen_addr.to_string(),
        }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/api/modules", get(list_modules))
            .route("/api/modules/reload-all", post(reload_all))
            .route("/api/modules/:name/enable", post(enable_module))
            .route("/api/modules/:name/disable", post(disable_module))
            .route("/api/modules/:name/unload", post(unload_module))
            .route("/api/modules/:name/load", post(load_module))
            .route("/api/modules/:name/reload", post(reload_module))
            .route("/api/command", post(run_command))
            .route("/api/companion/status", get(companion_status))
            .route("/api/companion/console", get(companion_console))
            .layer(TraceLayer::new_for_http())
            .with_state(self.clone())
    }

    pub async fn start(self) -> Result<()> {
        tracing::info!("IPC HTTP server starting on {}", self.listen_addr);
        let router = self.router();

        let listener = tokio::net::TcpListener::bind(&self.listen_addr).await?;
        tracing::info!("IPC listening on http://{}", self.listen_addr);

        axum::serve(listener, router).await?;
        Ok(())
    }
}

fn load_error_response(err: LoadError) -> Response {
    let (status, code) = match err {
        LoadError::Host(e) => return e.into_response(),
        LoadError::DirectoryNotFound(_) => (StatusCode::NOT_FOUND, "DIRECTORY_NOT_FOUND"),
        LoadError::NoArchives(_) => (StatusCode::NOT_FOUND, "NO_ARCHIVES"),
        LoadError::NotFound(_) => (StatusCode::NOT_FOUND, "MODULE_NOT_FOUND"),
    };
    (
        status,
        Json(json!({ "success": false, "error": err.to_string(), "error_code": code })),
    )
        .into_response()
}

fn not_loaded(name: &str) -> Response {
    HostError::ModuleNotFound(name.to_string()).into_response()
}

fn reload_response(report: ReloadReport) -> Response {
    let status = if report.is_success() {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    let message = report.to_string();
    (
        status,
        Json(json!({ "success": report.is_success(), "message": message, "report": report })),
    )
        .into_response()
}

/// GET /api/modules?filter=enabled&full=true
async fn list_modules(
    State(state): State<IPCServer>,
    Query(query): Query<ModuleListQuery>,
) -> Response {
    let filter = match query.filter.as_deref().map(str::to_lowercase).as_deref() {
        None | Some("all") => NameFilter::All,
        Some("enabled") => NameFilter::Enabled,
        Some("disabled") => NameFilter::Disabled,
        Some(other) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "success": false, "error": format!("Unknown filter '{}'", other) })),
            )
                .into_response()
        }
    };

    let registry = state.ctx.registry.lock().await;
    let names = state.ctx.manager.module_names(&*registry, filter, query.full);
    let modules = registry.modules();
    (
        StatusCode::OK,
        Json(json!({ "success": true, "names": names, "modules": modules })),
    )
        .into_response()
}

/// POST /api/modules/:name/enable
async fn enable_module(State(state): State<IPCServer>, Path(name): Path<String>) -> Response {
    let mut registry = state.ctx.registry.lock().await;
    let Some(module) = registry.module(&name) else {
        return not_loaded(&name);
    };
    match state.ctx.manager.enable(&mut *registry, &module) {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({ "success": true, "module": registry.module_by_id(module.id) })),
        )
            .into_response(),
        Err(e) => e.into_response(),
    }
}

/// POST /api/modules/:name/disable
async fn disable_module(State(state): State<IPCServer>, Path(name): Path<String>) -> Response {
    let mut registry = state.ctx.registry.lock().await;
    let Some(module) = registry.module(&name) else {
        return not_loaded(&name);
    };
    match state.ctx.manager.disable(&mut *registry, &module) {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({ "success": true, "module": registry.module_by_id(module.id) })),
        )
            .into_response(),
        Err(e) => e.into_response(),
    }
}

/// POST /api/modules/:name/unload
async fn unload_module(State(state): State<IPCServer>, Path(name): Path<String>) -> Response {
    let mut registry = state.ctx.registry.lock().await;
    let Some(module) = registry.module(&name) else {
        return not_loaded(&name);
    };
    let report = state.ctx.manager.unload(&mut *registry, &module);
    (
        StatusCode::OK,
        Json(json!({
            "success": report.is_complete(),
            "message": report.to_string(),
            "report": report,
        })),
    )
        .into_response()
}

/// POST /api/modules/:name/load
async fn load_module(State(state): State<IPCServer>, Path(name): Path<String>) -> Response {
    let mut registry = state.ctx.registry.lock().await;
    match state.ctx.manager.load(&mut *registry, &name) {
        Ok(info) => (
            StatusCode::OK,
            Json(json!({ "success": true, "message": format!("Loaded {}", info.full_name()), "module": info })),
        )
            .into_response(),
        Err(e) => load_error_response(e),
    }
}

/// POST /api/modules/:name/reload
async fn reload_module(State(state): State<IPCServer>, Path(name): Path<String>) -> Response {
    let mut registry = state.ctx.registry.lock().await;
    let module = registry.module(&name);
    match state.ctx.manager.reload(&mut *registry, module.as_ref()) {
        Ok(report) => reload_response(report),
        Err(_) => not_loaded(&name),
    }
}

/// POST /api/modules/reload-all
async fn reload_all(State(state): State<IPCServer>) -> Response {
    let mut registry = state.ctx.registry.lock().await;
    let reports = state.ctx.manager.reload_all(&mut *registry);
    let success = reports.iter().all(|r| r.is_success());
    let messages: Vec<String> = reports.iter().map(|r| r.to_string()).collect();
    (
        StatusCode::OK,
        Json(json!({ "success": success, "messages": messages, "reports": reports })),
    )
        .into_response()
}

/// POST /api/command (콘솔 디스패처와 동일)
async fn run_command(
    State(state): State<IPCServer>,
    Json(payload): Json<CommandRequest>,
) -> impl IntoResponse {
    let reply = console::execute(&state.ctx, &payload.command).await;
    (StatusCode::OK, Json(reply))
}

/// GET /api/companion/status
async fn companion_status(State(state): State<IPCServer>) -> impl IntoResponse {
    let status = state.ctx.companion.status().await;
    (StatusCode::OK, Json(json!({ "success": true, "status": status })))
}

/// GET /api/companion/console?since=N
async fn companion_console(
    State(state): State<IPCServer>,
    Query(query): Query<ConsoleQuery>,
) -> impl IntoResponse {
    let lines = state.ctx.companion.console_since(query.since).await;
    (StatusCode::OK, Json(json!({ "success": true, "lines": lines })))
}
