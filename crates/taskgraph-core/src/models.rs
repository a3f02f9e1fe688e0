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

//! Domain model for the sole durable entity: the task.
//!
//! `TaskRow`/`NewTaskRow` are the Diesel-facing shapes that mirror the
//! `tasks` table column-for-column, the way the teacher's
//! `models::task_execution::{TaskExecution, NewTaskExecution}` split a
//! queryable row from an insertable one. `Task` and `TaskStatus` are the
//! domain types the rest of the engine and the HTTP layer actually work
//! with; the Store is the only place that converts between the two.

use chrono::NaiveDateTime;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::schema::tasks;

/// Lifecycle state of a task. Transitions only along
/// QUEUED -> RUNNING -> {COMPLETED, FAILED} (invariant I3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Queued => "QUEUED",
            TaskStatus::Running => "RUNNING",
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "QUEUED" => Ok(TaskStatus::Queued),
            "RUNNING" => Ok(TaskStatus::Running),
            "COMPLETED" => Ok(TaskStatus::Completed),
            "FAILED" => Ok(TaskStatus::Failed),
            other => Err(format!("unknown task status '{other}'")),
        }
    }
}

/// A new task as submitted by a client, before admission has assigned it
/// a creation timestamp or validated it against the rest of the graph.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskSubmission {
    pub id: String,
    #[serde(rename = "type")]
    pub task_type: String,
    pub duration_ms: i64,
    #[serde(default)]
    pub dependencies: Vec<String>,
}

/// The domain view of a task, as returned by the Store and serialized over
/// HTTP. Timestamps are `None` until the corresponding transition occurs.
#[derive(Debug, Clone, Serialize)]
pub struct Task {
    pub id: String,
    #[serde(rename = "type")]
    pub task_type: String,
    pub duration_ms: i64,
    pub dependencies: Vec<String>,
    pub status: TaskStatus,
    pub created_at: NaiveDateTime,
    pub started_at: Option<NaiveDateTime>,
    pub finished_at: Option<NaiveDateTime>,
}

/// Minimal projection returned by `GET /tasks`.
#[derive(Debug, Clone, Serialize)]
pub struct TaskSummary {
    pub id: String,
    pub status: TaskStatus,
}

impl From<&Task> for TaskSummary {
    fn from(task: &Task) -> Self {
        Self {
            id: task.id.clone(),
            status: task.status,
        }
    }
}

#[derive(Debug, Queryable, Selectable)]
#[diesel(table_name = tasks)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct TaskRow {
    pub id: String,
    pub task_type: String,
    pub duration_ms: i64,
    pub dependencies: String,
    pub status: String,
    pub created_at: NaiveDateTime,
    pub started_at: Option<NaiveDateTime>,
    pub finished_at: Option<NaiveDateTime>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = tasks)]
pub struct NewTaskRow {
    pub id: String,
    pub task_type: String,
    pub duration_ms: i64,
    pub dependencies: String,
    pub status: String,
    pub created_at: NaiveDateTime,
}

impl TaskRow {
    /// Parses the `dependencies` JSON column and the `status` text column
    /// into their domain representations. Panics only on corrupted data the
    /// Store itself would never have written, which would indicate a bug
    /// rather than a recoverable condition.
    pub fn into_task(self) -> Task {
        let dependencies: Vec<String> =
            serde_json::from_str(&self.dependencies).unwrap_or_default();
        let status = self
            .status
            .parse()
            .unwrap_or_else(|e| panic!("corrupted status column: {e}"));

        Task {
            id: self.id,
            task_type: self.task_type,
            duration_ms: self.duration_ms,
            dependencies,
            status,
            created_at: self.created_at,
            started_at: self.started_at,
            finished_at: self.finished_at,
        }
    }
}
