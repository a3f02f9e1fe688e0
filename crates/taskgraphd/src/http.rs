/*
 *  Copyright 2025 Colliery Software
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

//! HTTP surface (§6 External Interfaces): `POST /tasks`, `GET /tasks/{id}`,
//! `GET /tasks`, and a `GET /healthz` liveness check. Router shape and the
//! `AppError` → JSON-body `IntoResponse` boundary are modeled on
//! `gator-cli`'s `serve_cmd.rs`.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use taskgraph_core::engine::Engine;
use taskgraph_core::models::{Task, TaskSubmission, TaskSummary};
use taskgraph_core::{AdmissionError, LookupError};

pub struct AppError {
    status: StatusCode,
    message: String,
}

impl AppError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let body = serde_json::json!({ "error": self.message });
        (self.status, Json(body)).into_response()
    }
}

impl From<AdmissionError> for AppError {
    fn from(e: AdmissionError) -> Self {
        match e {
            AdmissionError::EmptyId => AppError::new(StatusCode::BAD_REQUEST, e.to_string()),
            AdmissionError::Conflict(_) => AppError::new(StatusCode::CONFLICT, e.to_string()),
            AdmissionError::MissingDependency(_) => {
                AppError::new(StatusCode::BAD_REQUEST, e.to_string())
            }
            AdmissionError::Cycle { .. } => AppError::new(StatusCode::BAD_REQUEST, e.to_string()),
            AdmissionError::Store(_) => {
                AppError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
        }
    }
}

impl From<LookupError> for AppError {
    fn from(e: LookupError) -> Self {
        match e {
            LookupError::NotFound(_) => AppError::new(StatusCode::NOT_FOUND, e.to_string()),
            LookupError::Store(_) => {
                AppError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SubmitTaskRequest {
    pub id: String,
    #[serde(rename = "type")]
    pub task_type: String,
    pub duration_ms: i64,
    #[serde(default)]
    pub dependencies: Vec<String>,
}

impl From<SubmitTaskRequest> for TaskSubmission {
    fn from(req: SubmitTaskRequest) -> Self {
        Self {
            id: req.id,
            task_type: req.task_type,
            duration_ms: req.duration_ms,
            dependencies: req.dependencies,
        }
    }
}

pub fn build_router(engine: Arc<Engine>) -> Router {
    Router::new()
        .route("/tasks", post(submit_task).get(list_tasks))
        .route("/tasks/{id}", get(get_task))
        .route("/healthz", get(healthz))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(engine)
}

async fn submit_task(
    State(engine): State<Arc<Engine>>,
    Json(req): Json<SubmitTaskRequest>,
) -> Result<Json<TaskSummary>, AppError> {
    let task = engine.submit(req.into()).await?;
    Ok(Json(TaskSummary::from(&task)))
}

async fn get_task(
    State(engine): State<Arc<Engine>>,
    Path(id): Path<String>,
) -> Result<Json<Task>, AppError> {
    let task = engine.get_task(&id).await?;
    Ok(Json(task))
}

async fn list_tasks(
    State(engine): State<Arc<Engine>>,
) -> Result<Json<Vec<TaskSummary>>, AppError> {
    let tasks = engine.list_tasks().await.map_err(LookupError::from)?;
    Ok(Json(tasks.iter().map(TaskSummary::from).collect()))
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}
