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

//! Typed error enums for the engine's component boundaries.
//!
//! Each component gets its own error type rather than a single stringly-typed
//! error, the way the teacher library splits `ValidationError` from
//! `ExecutorError`: callers pattern-match on the variant they care about
//! (e.g. the HTTP layer maps `AdmissionError::Conflict` to 409) instead of
//! parsing messages.

use thiserror::Error;

/// Errors from the Store's connection pool and query execution.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("failed to acquire database connection: {0}")]
    Pool(String),

    #[error("database query failed: {0}")]
    Query(#[from] diesel::result::Error),

    #[error("failed to run pending migrations: {0}")]
    Migration(String),
}

/// Errors raised while admitting a new task submission.
#[derive(Error, Debug)]
pub enum AdmissionError {
    #[error("task id must not be empty")]
    EmptyId,

    #[error("task id '{0}' already exists")]
    Conflict(String),

    #[error("dependency '{0}' does not exist")]
    MissingDependency(String),

    #[error("admitting task '{new_id}' would create a dependency cycle through '{via}'")]
    Cycle { new_id: String, via: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors raised while looking up a task that the caller expected to exist.
#[derive(Error, Debug)]
pub enum LookupError {
    #[error("task '{0}' not found")]
    NotFound(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors raised while a worker executes a claimed task's body.
#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("task execution failed: {0}")]
    Failed(String),
}
