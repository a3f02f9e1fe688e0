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

//! The Dispatcher: the engine's single serialization point for deciding
//! which ready task runs next (§4.4).
//!
//! `in_flight` is a plain `usize`, not an `AtomicUsize` — it is read and
//! written only from the dispatcher's own task, satisfying the spec's
//! "owned only under its own serialization" requirement rather than
//! papering over shared mutation with atomics. Wake-ups (new admissions,
//! worker completions) are coalesced through a single `tokio::sync::Notify`:
//! any number of signals that land before the dispatcher gets back around
//! to `notified().await` collapse into one wake-up, which is exactly the
//! "don't miss work, don't double-dispatch" behavior the spec asks for.

use std::sync::Arc;
use tokio::sync::{mpsc, watch, Notify};
use tracing::{debug, error, warn};

use crate::models::Task;
use crate::store::{ClaimOutcome, Outcome, Store};
use crate::worker::TaskExecutor;

/// Sent by a spawned worker task back to the dispatcher when a claimed
/// task finishes, so the dispatcher can decrement `in_flight` and look for
/// more ready work.
struct WorkerDone;

pub struct Dispatcher {
    store: Store,
    executor: Arc<dyn TaskExecutor>,
    notify: Arc<Notify>,
    max_concurrency: usize,
    in_flight: usize,
    done_tx: mpsc::Sender<WorkerDone>,
    done_rx: mpsc::Receiver<WorkerDone>,
}

impl Dispatcher {
    pub fn new(
        store: Store,
        executor: Arc<dyn TaskExecutor>,
        notify: Arc<Notify>,
        max_concurrency: usize,
    ) -> Self {
        let (done_tx, done_rx) = mpsc::channel(max_concurrency.max(1) * 2);
        Self {
            store,
            executor,
            notify,
            max_concurrency,
            in_flight: 0,
            done_tx,
            done_rx,
        }
    }

    /// Runs until `shutdown` reports true, then drains in-flight workers
    /// before returning rather than aborting them (§6 Lifecycle).
    ///
    /// The `shutdown` arm is listed first under `biased;` so that once
    /// `Engine::shutdown` flips the flag and nudges `notify` in the same
    /// breath, the shutdown branch always wins the tie instead of a
    /// coin-flip letting `dispatch_ready` claim one more round of work.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                biased;

                result = shutdown.changed() => {
                    if result.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                Some(WorkerDone) = self.done_rx.recv() => {
                    self.in_flight = self.in_flight.saturating_sub(1);
                }
                _ = self.notify.notified() => {}
            }

            if *shutdown.borrow() {
                break;
            }

            self.dispatch_ready().await;
        }

        debug!(in_flight = self.in_flight, "dispatcher draining before shutdown");
        while self.in_flight > 0 {
            if self.done_rx.recv().await.is_some() {
                self.in_flight = self.in_flight.saturating_sub(1);
            } else {
                break;
            }
        }
    }

    /// Claims and spawns as many ready tasks as current capacity allows.
    /// Stops early once a sweep over ready ids claims nothing, since that
    /// means every remaining ready id lost its claim race (impossible with
    /// a single dispatcher, but defensive) or capacity is exhausted.
    async fn dispatch_ready(&mut self) {
        while self.in_flight < self.max_concurrency {
            let ready = match self.store.find_ready_task_ids().await {
                Ok(ids) => ids,
                Err(e) => {
                    error!(error = %e, "failed to query ready tasks");
                    return;
                }
            };

            if ready.is_empty() {
                return;
            }

            let mut claimed_any = false;
            for id in ready {
                if self.in_flight >= self.max_concurrency {
                    break;
                }

                match self.store.claim(&id).await {
                    Ok(ClaimOutcome::Claimed) => {
                        self.spawn_worker(id);
                        self.in_flight += 1;
                        claimed_any = true;
                    }
                    Ok(ClaimOutcome::Lost) => {
                        warn!(task_id = %id, "lost claim race");
                    }
                    Err(e) => {
                        error!(task_id = %id, error = %e, "claim failed");
                    }
                }
            }

            if !claimed_any {
                return;
            }
        }
    }

    fn spawn_worker(&self, task_id: String) {
        let store = self.store.clone();
        let executor = self.executor.clone();
        let done_tx = self.done_tx.clone();
        let notify = self.notify.clone();

        tokio::spawn(async move {
            let task: Task = match store.get_task(&task_id).await {
                Ok(t) => t,
                Err(e) => {
                    error!(task_id = %task_id, error = %e, "claimed task vanished before execution");
                    let _ = done_tx.send(WorkerDone).await;
                    return;
                }
            };

            let outcome = match executor.execute(&task).await {
                Ok(()) => Outcome::Completed,
                Err(e) => {
                    warn!(task_id = %task_id, error = %e, "task execution failed");
                    Outcome::Failed
                }
            };

            if let Err(e) = store.complete(&task_id, outcome).await {
                error!(task_id = %task_id, error = %e, "failed to record task completion");
            } else {
                debug!(task_id = %task_id, ?outcome, "task finished");
            }

            let _ = done_tx.send(WorkerDone).await;
            // A completed/failed task may have unblocked dependents; wake
            // the dispatcher so it re-checks readiness immediately rather
            // than waiting for the next external signal.
            notify.notify_one();
        });
    }
}
