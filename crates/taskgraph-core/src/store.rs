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

//! The Store: durable persistence over the `tasks` / `task_dependencies`
//! tables and the only component that touches Diesel directly.
//!
//! Every method runs its SQL inside `pool.get().await?.interact(move |conn|
//! ...).await??`, the same shape the teacher's DAL methods use, so blocking
//! Diesel calls never block the Tokio runtime. `admit_task` is the one
//! method that spans multiple logical steps (existence checks, cycle
//! detection, insert) — it runs them all inside a single Diesel
//! `conn.transaction(..)`, giving admission the "single write transaction"
//! discipline the spec calls for and SQLite's own single-writer semantics
//! reinforce.

use chrono::Utc;
use diesel::prelude::*;
use diesel::sql_types::{BigInt, Text};
use std::collections::{HashSet, VecDeque};

use crate::database::Database;
use crate::error::{AdmissionError, LookupError, StoreError};
use crate::models::{NewTaskRow, Task, TaskRow, TaskStatus};
use crate::schema::{task_dependencies, tasks};

#[derive(Clone)]
pub struct Store {
    database: Database,
}

/// Outcome of the atomic `claim` conditional update (§4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    Claimed,
    Lost,
}

/// Terminal outcome a worker reports back through `complete`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    Failed,
}

impl Outcome {
    fn status(&self) -> TaskStatus {
        match self {
            Outcome::Completed => TaskStatus::Completed,
            Outcome::Failed => TaskStatus::Failed,
        }
    }
}

#[derive(QueryableByName)]
struct IdRow {
    #[diesel(sql_type = Text)]
    id: String,
}

#[derive(QueryableByName)]
struct CountRow {
    #[diesel(sql_type = BigInt)]
    n: i64,
}

impl Store {
    pub fn new(database: Database) -> Self {
        Self { database }
    }

    async fn conn(
        &self,
    ) -> Result<deadpool_diesel::sqlite::Connection, StoreError> {
        self.database
            .pool()
            .get()
            .await
            .map_err(|e| StoreError::Pool(e.to_string()))
    }

    /// Validates and persists a new task submission as one write
    /// transaction (§4.2). Cycle detection (step 3) walks the existing
    /// graph with an explicit worklist rather than recursion, so an
    /// attacker-controlled dependency chain cannot exhaust the call stack.
    pub async fn admit_task(
        &self,
        id: String,
        task_type: String,
        duration_ms: i64,
        dependencies: Vec<String>,
    ) -> Result<Task, AdmissionError> {
        if id.trim().is_empty() {
            return Err(AdmissionError::EmptyId);
        }
        if dependencies.iter().any(|d| d == &id) {
            return Err(AdmissionError::Cycle {
                new_id: id.clone(),
                via: id,
            });
        }

        let deps: Vec<String> = {
            let mut seen = HashSet::new();
            dependencies
                .into_iter()
                .filter(|d| seen.insert(d.clone()))
                .collect()
        };

        let conn = self.conn().await?;
        let new_id = id.clone();
        let new_deps = deps.clone();

        conn.interact(move |conn| {
            conn.transaction::<Task, AdmissionTxError, _>(|conn| {
                if task_exists(conn, &new_id)? {
                    return Err(AdmissionTxError::Conflict(new_id.clone()));
                }

                for dep in &new_deps {
                    if !task_exists(conn, dep)? {
                        return Err(AdmissionTxError::MissingDependency(dep.clone()));
                    }
                }

                if let Some(via) = find_cycle(conn, &new_id, &new_deps)? {
                    return Err(AdmissionTxError::Cycle {
                        new_id: new_id.clone(),
                        via,
                    });
                }

                let now = Utc::now().naive_utc();
                let row = NewTaskRow {
                    id: new_id.clone(),
                    task_type,
                    duration_ms,
                    dependencies: serde_json::to_string(&new_deps)
                        .expect("string vec always serializes"),
                    status: TaskStatus::Queued.as_str().to_string(),
                    created_at: now,
                };

                diesel::insert_into(tasks::table)
                    .values(&row)
                    .execute(conn)?;

                for dep in &new_deps {
                    diesel::insert_into(task_dependencies::table)
                        .values((
                            task_dependencies::task_id.eq(&new_id),
                            task_dependencies::depends_on_id.eq(dep),
                        ))
                        .execute(conn)?;
                }

                let row: TaskRow = tasks::table.find(&new_id).first(conn)?;
                Ok(row.into_task())
            })
        })
        .await
        .map_err(|e| AdmissionError::Store(StoreError::Pool(e.to_string())))?
        .map_err(AdmissionError::from)
    }

    pub async fn get_task(&self, id: &str) -> Result<Task, LookupError> {
        let conn = self.conn().await.map_err(LookupError::Store)?;
        let id = id.to_string();
        let id_for_err = id.clone();

        let row: Option<TaskRow> = conn
            .interact(move |conn| tasks::table.find(id).first(conn).optional())
            .await
            .map_err(|e| LookupError::Store(StoreError::Pool(e.to_string())))?
            .map_err(|e| LookupError::Store(StoreError::Query(e)))?;

        row.map(TaskRow::into_task)
            .ok_or(LookupError::NotFound(id_for_err))
    }

    pub async fn list_tasks(&self) -> Result<Vec<Task>, StoreError> {
        let conn = self.conn().await?;

        let rows: Vec<TaskRow> = conn
            .interact(|conn| tasks::table.order(tasks::created_at.asc()).load(conn))
            .await
            .map_err(|e| StoreError::Pool(e.to_string()))??;

        Ok(rows.into_iter().map(TaskRow::into_task).collect())
    }

    /// Returns QUEUED task ids whose dependencies are all COMPLETED,
    /// ordered FIFO by `created_at` (§4.3). Implemented as a single
    /// correlated `NOT EXISTS` over the normalized `task_dependencies`
    /// index rather than deserializing the JSON `dependencies` column.
    pub async fn find_ready_task_ids(&self) -> Result<Vec<String>, StoreError> {
        let conn = self.conn().await?;

        let rows: Vec<IdRow> = conn
            .interact(|conn| {
                diesel::sql_query(
                    "SELECT t.id AS id \
                     FROM tasks t \
                     WHERE t.status = 'QUEUED' \
                     AND NOT EXISTS ( \
                         SELECT 1 FROM task_dependencies td \
                         JOIN tasks dep ON dep.id = td.depends_on_id \
                         WHERE td.task_id = t.id AND dep.status != 'COMPLETED' \
                     ) \
                     ORDER BY t.created_at ASC",
                )
                .load(conn)
            })
            .await
            .map_err(|e| StoreError::Pool(e.to_string()))??;

        Ok(rows.into_iter().map(|r| r.id).collect())
    }

    /// Atomically claims `id`: QUEUED -> RUNNING, conditioned on the row
    /// still being QUEUED. This single conditional update is the sole
    /// primitive enforcing invariant I4 (§4.1, §4.4).
    pub async fn claim(&self, id: &str) -> Result<ClaimOutcome, StoreError> {
        let conn = self.conn().await?;
        let id = id.to_string();
        let now = Utc::now().naive_utc();

        let affected = conn
            .interact(move |conn| {
                diesel::update(
                    tasks::table
                        .filter(tasks::id.eq(&id))
                        .filter(tasks::status.eq(TaskStatus::Queued.as_str())),
                )
                .set((
                    tasks::status.eq(TaskStatus::Running.as_str()),
                    tasks::started_at.eq(now),
                ))
                .execute(conn)
            })
            .await
            .map_err(|e| StoreError::Pool(e.to_string()))??;

        Ok(if affected == 1 {
            ClaimOutcome::Claimed
        } else {
            ClaimOutcome::Lost
        })
    }

    /// Transitions a RUNNING task to its terminal status. Conditioned on
    /// the row still being RUNNING so a stray double-complete is a no-op
    /// rather than a second write over an already-terminal row.
    pub async fn complete(&self, id: &str, outcome: Outcome) -> Result<(), StoreError> {
        let conn = self.conn().await?;
        let id = id.to_string();
        let now = Utc::now().naive_utc();
        let status = outcome.status().as_str().to_string();

        conn.interact(move |conn| {
            diesel::update(
                tasks::table
                    .filter(tasks::id.eq(&id))
                    .filter(tasks::status.eq(TaskStatus::Running.as_str())),
            )
            .set((tasks::status.eq(status), tasks::finished_at.eq(now)))
            .execute(conn)
        })
        .await
        .map_err(|e| StoreError::Pool(e.to_string()))??;

        Ok(())
    }

    /// Resets every RUNNING task back to QUEUED (§4.6). Used only by
    /// Recovery at startup; returns the number of tasks reset so Recovery
    /// can log it.
    pub async fn reset_running_to_queued(&self) -> Result<usize, StoreError> {
        let conn = self.conn().await?;

        let affected = conn
            .interact(|conn| {
                diesel::update(tasks::table.filter(tasks::status.eq(TaskStatus::Running.as_str())))
                    .set((
                        tasks::status.eq(TaskStatus::Queued.as_str()),
                        tasks::started_at.eq(None::<chrono::NaiveDateTime>),
                    ))
                    .execute(conn)
            })
            .await
            .map_err(|e| StoreError::Pool(e.to_string()))??;

        Ok(affected)
    }

    #[cfg(test)]
    pub async fn count_tasks(&self) -> Result<i64, StoreError> {
        let conn = self.conn().await?;
        let rows: Vec<CountRow> = conn
            .interact(|conn| {
                diesel::sql_query("SELECT COUNT(*) AS n FROM tasks").load(conn)
            })
            .await
            .map_err(|e| StoreError::Pool(e.to_string()))??;
        Ok(rows.into_iter().next().map(|r| r.n).unwrap_or(0))
    }
}

/// Errors that can short-circuit the admission transaction. Kept separate
/// from `AdmissionError` because it must implement
/// `From<diesel::result::Error>` to be usable with `?` inside a Diesel
/// transaction closure; the outer `admit_task` translates it afterwards.
#[derive(Debug)]
enum AdmissionTxError {
    Conflict(String),
    MissingDependency(String),
    Cycle { new_id: String, via: String },
    Db(diesel::result::Error),
}

impl From<diesel::result::Error> for AdmissionTxError {
    fn from(e: diesel::result::Error) -> Self {
        AdmissionTxError::Db(e)
    }
}

impl std::fmt::Display for AdmissionTxError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AdmissionTxError::Conflict(id) => write!(f, "conflict: {id}"),
            AdmissionTxError::MissingDependency(id) => write!(f, "missing dependency: {id}"),
            AdmissionTxError::Cycle { new_id, via } => {
                write!(f, "cycle admitting {new_id} via: {via}")
            }
            AdmissionTxError::Db(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for AdmissionTxError {}

impl From<AdmissionTxError> for AdmissionError {
    fn from(e: AdmissionTxError) -> Self {
        match e {
            AdmissionTxError::Conflict(id) => AdmissionError::Conflict(id),
            AdmissionTxError::MissingDependency(id) => AdmissionError::MissingDependency(id),
            AdmissionTxError::Cycle { new_id, via } => AdmissionError::Cycle { new_id, via },
            AdmissionTxError::Db(e) => AdmissionError::Store(StoreError::Query(e)),
        }
    }
}

fn task_exists(conn: &mut SqliteConnection, id: &str) -> QueryResult<bool> {
    let count: i64 = tasks::table
        .filter(tasks::id.eq(id))
        .count()
        .get_result(conn)?;
    Ok(count > 0)
}

fn dependencies_of(conn: &mut SqliteConnection, id: &str) -> QueryResult<Vec<String>> {
    task_dependencies::table
        .filter(task_dependencies::task_id.eq(id))
        .select(task_dependencies::depends_on_id)
        .load(conn)
}

/// Depth-first search for a cycle introduced by admitting `new_id` with
/// `new_deps`, using an explicit worklist instead of recursion (§4.2.1).
/// Because the existing graph is already acyclic (I2, by induction), a
/// cycle can only pass back through `new_id` itself.
fn find_cycle(
    conn: &mut SqliteConnection,
    new_id: &str,
    new_deps: &[String],
) -> QueryResult<Option<String>> {
    let mut worklist: VecDeque<String> = new_deps.iter().cloned().collect();
    let mut seen: HashSet<String> = HashSet::new();

    while let Some(current) = worklist.pop_front() {
        if current == new_id {
            return Ok(Some(current));
        }
        if !seen.insert(current.clone()) {
            continue;
        }
        for dep in dependencies_of(conn, &current)? {
            worklist.push_back(dep);
        }
    }

    Ok(None)
}
