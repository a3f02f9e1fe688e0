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

//! End-to-end tests driving the Engine the way an HTTP handler would,
//! against a real (tempfile-backed) SQLite database.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use taskgraph_core::engine::{Engine, EngineConfig};
use taskgraph_core::models::{Task, TaskStatus, TaskSubmission};
use taskgraph_core::{AdmissionError, ExecutorError, SleepExecutor, TaskExecutor};

fn submission(id: &str, deps: &[&str]) -> TaskSubmission {
    TaskSubmission {
        id: id.to_string(),
        task_type: "noop".to_string(),
        duration_ms: 1,
        dependencies: deps.iter().map(|d| d.to_string()).collect(),
    }
}

async fn start_engine() -> (Engine, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("engine.db");
    let engine = Engine::start(
        path.to_str().unwrap(),
        EngineConfig {
            max_concurrency: 4,
            connection_pool_size: 4,
        },
        Arc::new(SleepExecutor),
    )
    .await
    .unwrap();
    (engine, dir)
}

async fn start_engine_with_concurrency(max_concurrency: usize) -> (Engine, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("engine.db");
    let engine = Engine::start(
        path.to_str().unwrap(),
        EngineConfig {
            max_concurrency,
            connection_pool_size: max_concurrency.max(1),
        },
        Arc::new(SleepExecutor),
    )
    .await
    .unwrap();
    (engine, dir)
}

/// Sleeps for `task.duration_ms` like `SleepExecutor`, then fails every task
/// whose id is in `fail_ids` instead of completing it. Lets a test drive a
/// dependency to FAILED without faking the rest of the executor contract.
struct FailingExecutor {
    fail_ids: HashSet<String>,
}

#[async_trait]
impl TaskExecutor for FailingExecutor {
    async fn execute(&self, task: &Task) -> Result<(), ExecutorError> {
        tokio::time::sleep(Duration::from_millis(task.duration_ms.max(0) as u64)).await;
        if self.fail_ids.contains(&task.id) {
            Err(ExecutorError::Failed(format!("{} always fails", task.id)))
        } else {
            Ok(())
        }
    }
}

async fn wait_for_status(engine: &Engine, id: &str, status: TaskStatus, timeout: Duration) {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let task = engine.get_task(id).await.unwrap();
        if task.status == status {
            return;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("task {id} did not reach {status:?} in time (was {:?})", task.status);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn independent_task_runs_to_completion() {
    let (engine, _dir) = start_engine().await;
    let task = engine.submit(submission("a", &[])).await.unwrap();
    assert_eq!(task.status, TaskStatus::Queued);

    wait_for_status(&engine, "a", TaskStatus::Completed, Duration::from_secs(5)).await;
}

#[tokio::test]
async fn dependent_task_waits_for_its_dependency() {
    let (engine, _dir) = start_engine().await;
    engine.submit(submission("a", &[])).await.unwrap();
    engine.submit(submission("b", &["a"])).await.unwrap();

    wait_for_status(&engine, "a", TaskStatus::Completed, Duration::from_secs(5)).await;
    wait_for_status(&engine, "b", TaskStatus::Completed, Duration::from_secs(5)).await;
}

#[tokio::test]
async fn dependency_can_be_admitted_after_its_dependent_is_rejected() {
    // b depends on a, but a does not exist yet: b's submission is rejected.
    let (engine, _dir) = start_engine().await;
    let err = engine.submit(submission("b", &["a"])).await.unwrap_err();
    assert!(matches!(err, AdmissionError::MissingDependency(ref id) if id == "a"));

    // Once a exists, submitting b again succeeds.
    engine.submit(submission("a", &[])).await.unwrap();
    let task = engine.submit(submission("b", &["a"])).await.unwrap();
    assert_eq!(task.status, TaskStatus::Queued);
}

#[tokio::test]
async fn duplicate_id_is_rejected() {
    let (engine, _dir) = start_engine().await;
    engine.submit(submission("a", &[])).await.unwrap();
    let err = engine.submit(submission("a", &[])).await.unwrap_err();
    assert!(matches!(err, AdmissionError::Conflict(ref id) if id == "a"));
}

#[tokio::test]
async fn self_dependency_is_rejected_as_a_cycle() {
    let (engine, _dir) = start_engine().await;
    let err = engine.submit(submission("a", &["a"])).await.unwrap_err();
    assert!(matches!(err, AdmissionError::Cycle { .. }));
}

#[tokio::test]
async fn list_tasks_reflects_admission_order() {
    let (engine, _dir) = start_engine().await;
    engine.submit(submission("a", &[])).await.unwrap();
    engine.submit(submission("b", &[])).await.unwrap();
    engine.submit(submission("c", &[])).await.unwrap();

    let tasks = engine.list_tasks().await.unwrap();
    let ids: Vec<_> = tasks.iter().map(|t| t.id.clone()).collect();
    assert_eq!(ids, vec!["a", "b", "c"]);
}

#[tokio::test]
async fn diamond_dependency_completes_every_task() {
    //      a
    //     / \
    //    b   c
    //     \ /
    //      d
    let (engine, _dir) = start_engine().await;
    engine.submit(submission("a", &[])).await.unwrap();
    engine.submit(submission("b", &["a"])).await.unwrap();
    engine.submit(submission("c", &["a"])).await.unwrap();
    engine.submit(submission("d", &["b", "c"])).await.unwrap();

    for id in ["a", "b", "c", "d"] {
        wait_for_status(&engine, id, TaskStatus::Completed, Duration::from_secs(5)).await;
    }
}

#[tokio::test]
async fn shutdown_drains_in_flight_work() {
    let (engine, _dir) = start_engine().await;
    engine.submit(submission("a", &[])).await.unwrap();
    // Give the dispatcher a moment to claim it before we ask for shutdown.
    tokio::time::sleep(Duration::from_millis(20)).await;
    engine.shutdown().await;
}

#[tokio::test]
async fn failed_dependency_permanently_blocks_dependent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("engine.db");
    let mut fail_ids = HashSet::new();
    fail_ids.insert("a".to_string());
    let engine = Engine::start(
        path.to_str().unwrap(),
        EngineConfig {
            max_concurrency: 4,
            connection_pool_size: 4,
        },
        Arc::new(FailingExecutor { fail_ids }),
    )
    .await
    .unwrap();

    engine.submit(submission("a", &[])).await.unwrap();
    engine.submit(submission("b", &["a"])).await.unwrap();

    wait_for_status(&engine, "a", TaskStatus::Failed, Duration::from_secs(5)).await;

    // Give the dispatcher ample opportunity to (incorrectly) start b before
    // asserting it never did.
    tokio::time::sleep(Duration::from_millis(200)).await;
    let b = engine.get_task("b").await.unwrap();
    assert_eq!(b.status, TaskStatus::Queued);
}

#[tokio::test]
async fn fan_out_never_exceeds_concurrency_cap() {
    const CAP: usize = 2;
    const CHILDREN: usize = 6;
    let (engine, _dir) = start_engine_with_concurrency(CAP).await;

    engine.submit(submission("root", &[])).await.unwrap();
    wait_for_status(&engine, "root", TaskStatus::Completed, Duration::from_secs(5)).await;

    for i in 0..CHILDREN {
        let sub = TaskSubmission {
            id: format!("child-{i}"),
            task_type: "noop".to_string(),
            duration_ms: 80,
            dependencies: vec!["root".to_string()],
        };
        engine.submit(sub).await.unwrap();
    }

    let mut max_running = 0usize;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let tasks = engine.list_tasks().await.unwrap();
        let running = tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Running)
            .count();
        max_running = max_running.max(running);

        let children_done = tasks
            .iter()
            .filter(|t| t.id.starts_with("child-"))
            .all(|t| t.status == TaskStatus::Completed);
        if children_done {
            break;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("children did not all complete in time");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    assert!(
        max_running <= CAP,
        "observed {max_running} RUNNING tasks at once, cap is {CAP}"
    );
}
