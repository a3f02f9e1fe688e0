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

//! Recovery: the startup sweep that resets orphaned RUNNING tasks back to
//! QUEUED (§4.6) after an unclean shutdown. In this single-node design
//! "orphaned" just means "RUNNING when the process starts", since a crash
//! is the only way a RUNNING row can outlive its worker.

use tracing::info;

use crate::error::StoreError;
use crate::store::Store;

/// Runs once, synchronously, before the dispatcher starts accepting
/// wake-ups, so no worker can race a recovery sweep over the same row.
pub async fn run(store: &Store) -> Result<usize, StoreError> {
    let reset = store.reset_running_to_queued().await?;
    if reset > 0 {
        info!(reset, "recovered orphaned RUNNING tasks to QUEUED");
    } else {
        info!("no orphaned RUNNING tasks found");
    }
    Ok(reset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;
    use crate::store::{ClaimOutcome, Store};

    async fn test_store() -> Store {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("recovery.db");
        // Leak the tempdir so the file outlives this function; fine for a
        // short-lived test process.
        std::mem::forget(dir);
        let db = Database::connect(path.to_str().unwrap(), 4).await.unwrap();
        Store::new(db)
    }

    #[tokio::test]
    #[serial_test::serial]
    async fn resets_running_tasks_to_queued() {
        let store = test_store().await;
        store
            .admit_task("a".to_string(), "noop".to_string(), 0, vec![])
            .await
            .unwrap();
        assert_eq!(store.claim("a").await.unwrap(), ClaimOutcome::Claimed);

        let reset = run(&store).await.unwrap();
        assert_eq!(reset, 1);

        let task = store.get_task("a").await.unwrap();
        assert_eq!(task.status, crate::models::TaskStatus::Queued);
        assert!(task.started_at.is_none());
    }

    #[tokio::test]
    #[serial_test::serial]
    async fn no_op_when_nothing_running() {
        let store = test_store().await;
        store
            .admit_task("a".to_string(), "noop".to_string(), 0, vec![])
            .await
            .unwrap();

        let reset = run(&store).await.unwrap();
        assert_eq!(reset, 0);
    }
}
