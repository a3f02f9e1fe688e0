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

//! The pluggable unit of work a claimed task actually runs (§4.5).
//!
//! Mirrors the teacher's executor seam: task *execution* is behind a trait
//! so the engine's scheduling machinery never depends on what a task's body
//! actually does. `SleepExecutor` is the only implementation this crate
//! ships, matching the spec's "a task's only observable behavior is
//! sleeping for `duration_ms`" scope.

use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

use crate::error::ExecutorError;
use crate::models::Task;

#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(&self, task: &Task) -> Result<(), ExecutorError>;
}

/// Default executor: sleeps for `task.duration_ms` and always succeeds.
/// Tests that need to exercise FAILED transitions should supply their own
/// `TaskExecutor`.
#[derive(Debug, Default)]
pub struct SleepExecutor;

#[async_trait]
impl TaskExecutor for SleepExecutor {
    async fn execute(&self, task: &Task) -> Result<(), ExecutorError> {
        debug!(task_id = %task.id, duration_ms = task.duration_ms, "executing task");
        tokio::time::sleep(Duration::from_millis(task.duration_ms.max(0) as u64)).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TaskStatus;
    use chrono::Utc;

    fn sample_task(duration_ms: i64) -> Task {
        Task {
            id: "t1".to_string(),
            task_type: "noop".to_string(),
            duration_ms,
            dependencies: vec![],
            status: TaskStatus::Running,
            created_at: Utc::now().naive_utc(),
            started_at: Some(Utc::now().naive_utc()),
            finished_at: None,
        }
    }

    #[tokio::test]
    async fn sleep_executor_completes_after_duration() {
        let executor = SleepExecutor;
        let task = sample_task(5);
        let start = tokio::time::Instant::now();
        executor.execute(&task).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(5));
    }

    struct AlwaysFails;

    #[async_trait]
    impl TaskExecutor for AlwaysFails {
        async fn execute(&self, _task: &Task) -> Result<(), ExecutorError> {
            Err(ExecutorError::Failed("boom".to_string()))
        }
    }

    #[tokio::test]
    async fn custom_executor_can_report_failure() {
        let executor = AlwaysFails;
        let task = sample_task(0);
        let result = executor.execute(&task).await;
        assert!(matches!(result, Err(ExecutorError::Failed(_))));
    }
}
