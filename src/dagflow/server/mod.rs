// SPDX-License-Identifier: MIT

use axum::{
    extract::{Path, Query, Request, State},
    http::{StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceExt;
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};

use crate::dagflow::loader::TemplateLoader;
use crate::dagflow::repository::{WorkflowRecord, WorkflowStatus};
use crate::dagflow::{EngineError, OrchestrationEngine};

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<OrchestrationEngine>,
    pub loader: TemplateLoader,
}

impl AppState {
    pub fn new(engine: Arc<OrchestrationEngine>) -> Self {
        Self {
            engine,
            loader: TemplateLoader::new(),
        }
    }
}

impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        let status = match &self {
            EngineError::NotFound(_) => StatusCode::NOT_FOUND,
            EngineError::Validation(_)
            | EngineError::InvalidRule { .. }
            | EngineError::InvalidNode { .. }
            | EngineError::TemplateFetch(_) => StatusCode::BAD_REQUEST,
            EngineError::DuplicateKey(_) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            log::error!("Request failed: {}", self);
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health_check))
        .route("/api/workflows", get(list_workflows).post(create_workflow))
        .route(
            "/api/workflows/{id}",
            get(get_workflow).delete(delete_workflow),
        )
        .route("/api/workflows/{id}/apply", post(apply_rules))
        .route("/api/workflows/{id}/submit", post(submit_nodes))
        .route("/api/workflows/{id}/files", get(list_files))
        .route("/api/workflows/{id}/files/{*path}", get(read_file))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn serve(
    engine: Arc<OrchestrationEngine>,
    host: &str,
    port: u16,
) -> Result<(), EngineError> {
    let app = router(AppState::new(engine));

    let addr: SocketAddr = format!("{}:{}", host, port)
        .parse()
        .map_err(|_| EngineError::config(format!("invalid listen address {}:{}", host, port)))?;
    log::info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn health_check() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

#[derive(Deserialize)]
struct ListQuery {
    status: Option<String>,
}

fn summary(record: &WorkflowRecord) -> Value {
    json!({
        "id": record.id,
        "name": record.name,
        "status": record.status,
        "work_dir": record.work_dir,
        "created_at": record.created_at,
        "updated_at": record.updated_at,
    })
}

async fn list_workflows(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Value>, EngineError> {
    let status = match query.status.as_deref() {
        Some(s) => Some(s.parse::<WorkflowStatus>().map_err(|_| {
            EngineError::Validation(format!("unknown status filter '{}'", s))
        })?),
        None => None,
    };
    let records = state.engine.list_workflows(status).await?;
    Ok(Json(Value::Array(records.iter().map(summary).collect())))
}

#[derive(Deserialize)]
struct Parameter {
    key: String,
    value: Value,
}

#[derive(Deserialize)]
struct CreateRequest {
    /// URL, path or inline template document
    template: Value,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    parameters: Vec<Parameter>,
}

async fn create_workflow(
    State(state): State<AppState>,
    Json(payload): Json<CreateRequest>,
) -> Result<(StatusCode, Json<Value>), EngineError> {
    let template = match payload.template {
        Value::String(location) => state.loader.load(&location).await?,
        Value::Object(inline) => Value::Object(inline),
        _ => {
            return Err(EngineError::template_fetch(
                "template must be a URL, a path or an object",
            ))
        }
    };
    let params: Map<String, Value> = payload
        .parameters
        .into_iter()
        .map(|p| (p.key, p.value))
        .collect();

    let snapshot = state
        .engine
        .create_workflow(&template, payload.name.as_deref().unwrap_or(""), &params)
        .await?;
    Ok((StatusCode::CREATED, Json(json!(snapshot))))
}

async fn get_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, EngineError> {
    let snapshot = state.engine.get_workflow(&id).await?;
    Ok(Json(json!(snapshot)))
}

async fn delete_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, EngineError> {
    if state.engine.delete_workflow(&id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(EngineError::not_found(id))
    }
}

#[derive(Deserialize)]
struct ApplyRequest {
    rules: Vec<String>,
}

async fn apply_rules(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<ApplyRequest>,
) -> Result<Json<Value>, EngineError> {
    let snapshot = state.engine.apply_rules(&id, &payload.rules).await?;
    Ok(Json(json!(snapshot)))
}

#[derive(Deserialize)]
struct SubmitRequest {
    nodes: Vec<String>,
}

async fn submit_nodes(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<SubmitRequest>,
) -> Result<Json<Value>, EngineError> {
    let snapshot = state.engine.submit_nodes(&id, &payload.nodes).await?;
    Ok(Json(json!(snapshot)))
}

async fn list_files(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, EngineError> {
    let files = state.engine.list_files(&id).await?;
    Ok(Json(json!(files)))
}

/// Serve one file of the workflow's work directory. `ServeDir` answers 404
/// for missing files and for paths that climb out of the directory.
async fn read_file(
    State(state): State<AppState>,
    Path((id, _)): Path<(String, String)>,
    request: Request,
) -> Result<Response, EngineError> {
    let dir = state.engine.workflow_dir(&id).await?;

    // Keep the still-encoded remainder after /api/workflows/{id}/files/
    let (mut parts, body) = request.into_parts();
    let relative = parts.uri.path().splitn(6, '/').nth(5).unwrap_or_default().to_string();
    parts.uri = format!("/{}", relative)
        .parse::<Uri>()
        .map_err(|_| EngineError::not_found(relative))?;

    let service = ServeDir::new(dir).append_index_html_on_directories(false);
    match service.oneshot(Request::from_parts(parts, body)).await {
        Ok(response) => Ok(response.into_response()),
        Err(never) => match never {},
    }
}
