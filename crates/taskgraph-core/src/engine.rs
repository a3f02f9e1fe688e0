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

//! Wires the Store, admission, Dispatcher, and Recovery into a single
//! handle the HTTP layer (or any other caller) can hold and call methods
//! on without knowing about any of the moving parts underneath.

use std::sync::Arc;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::info;

use crate::admission;
use crate::database::Database;
use crate::dispatcher::Dispatcher;
use crate::error::{AdmissionError, LookupError, StoreError};
use crate::models::{Task, TaskSubmission};
use crate::store::Store;
use crate::worker::{SleepExecutor, TaskExecutor};

/// Tunables that control the Dispatcher's concurrency, independent of
/// storage or HTTP concerns (§5 Concurrency & Resource Model).
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    pub max_concurrency: usize,
    pub connection_pool_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 8,
            connection_pool_size: 8,
        }
    }
}

pub struct Engine {
    store: Store,
    notify: Arc<Notify>,
    shutdown_tx: watch::Sender<bool>,
    dispatcher_handle: JoinHandle<()>,
}

impl Engine {
    /// Opens the database, runs Recovery, then starts the Dispatcher loop
    /// in the background. Matches the startup ordering in §6 Lifecycle:
    /// recovery must finish before any wake-up can race it.
    pub async fn start(
        db_path: &str,
        config: EngineConfig,
        executor: Arc<dyn TaskExecutor>,
    ) -> Result<Self, StoreError> {
        let database = Database::connect(db_path, config.connection_pool_size).await?;
        let store = Store::new(database);

        let reset = crate::recovery::run(&store).await?;
        if reset > 0 {
            info!(reset, "startup recovery reset orphaned tasks");
        }

        let notify = Arc::new(Notify::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let dispatcher = Dispatcher::new(
            store.clone(),
            executor,
            notify.clone(),
            config.max_concurrency,
        );
        let dispatcher_handle = tokio::spawn(dispatcher.run(shutdown_rx));

        // Ready tasks may already exist (e.g. resumed from a prior run);
        // give the dispatcher an initial nudge.
        notify.notify_one();

        Ok(Self {
            store,
            notify,
            shutdown_tx,
            dispatcher_handle,
        })
    }

    pub async fn start_with_default_executor(
        db_path: &str,
        config: EngineConfig,
    ) -> Result<Self, StoreError> {
        Self::start(db_path, config, Arc::new(SleepExecutor)).await
    }

    pub async fn submit(&self, submission: TaskSubmission) -> Result<Task, AdmissionError> {
        let deps = admission::dedupe(submission.dependencies);
        let task = self
            .store
            .admit_task(submission.id, submission.task_type, submission.duration_ms, deps)
            .await?;
        self.notify.notify_one();
        Ok(task)
    }

    pub async fn get_task(&self, id: &str) -> Result<Task, LookupError> {
        self.store.get_task(id).await
    }

    pub async fn list_tasks(&self) -> Result<Vec<Task>, StoreError> {
        self.store.list_tasks().await
    }

    /// Signals the Dispatcher to stop accepting new work and wait for
    /// in-flight tasks to finish, then waits for it to exit.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        self.notify.notify_one();
        let _ = self.dispatcher_handle.await;
    }
}
