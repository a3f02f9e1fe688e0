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

//! Core engine: a persistent, single-node, dependency-aware task
//! scheduler built on SQLite.
//!
//! The module layout mirrors the component boundaries the design is built
//! around — Store, admission, the readiness index baked into the Store's
//! queries, Dispatcher, worker execution, and Recovery — rather than a
//! single flat module, the same separation the teacher's `dal`/`executor`/
//! `workflow` split uses.

pub mod admission;
pub mod database;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod models;
pub mod recovery;
pub mod schema;
pub mod store;
pub mod worker;

pub use engine::{Engine, EngineConfig};
pub use error::{AdmissionError, ExecutorError, LookupError, StoreError};
pub use models::{Task, TaskStatus, TaskSubmission, TaskSummary};
pub use worker::{SleepExecutor, TaskExecutor};
