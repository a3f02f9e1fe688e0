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

//! Database connection management for SQLite using Diesel + deadpool.
//!
//! Mirrors the shape of the teacher's `database::connection::Database`: a
//! thin, `Clone`-able wrapper around a connection pool. Unlike the teacher's
//! r2d2-backed `Pool<ConnectionManager<PgConnection>>`, this wraps
//! `deadpool_diesel::sqlite::Pool` so that every query runs through
//! `conn.interact(..)`, keeping blocking Diesel calls off the async runtime.

use deadpool::managed::{Hook, HookError};
use deadpool_diesel::sqlite::{Manager, Pool};
use diesel::connection::SimpleConnection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use tracing::info;

use crate::error::StoreError;

const PRAGMAS: &str = "PRAGMA journal_mode = WAL; \
                        PRAGMA foreign_keys = ON; \
                        PRAGMA busy_timeout = 5000;";

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

/// A pool of SQLite connections backing a single database file.
///
/// `Database` is `Clone` and shares the underlying pool across clones, the
/// same sharing model the teacher's `Database` uses for its r2d2 pool.
#[derive(Clone, Debug)]
pub struct Database {
    pool: Pool,
}

impl Database {
    /// Opens (creating if necessary) the SQLite file at `path`, applies
    /// pending migrations, and returns a ready-to-use connection pool.
    ///
    /// `foreign_keys` and `busy_timeout` are per-connection session state,
    /// not database-file state, so they can't be set once at startup and
    /// trusted to stick: deadpool_diesel opens raw connections lazily as
    /// concurrent callers check out more than the first one, and each of
    /// those would otherwise come up with `foreign_keys=OFF` and no busy
    /// timeout. A `post_create` hook runs this pragma batch on every
    /// connection the pool ever creates, not just the one `connect` happens
    /// to grab first. `journal_mode=WAL` is a database-level setting that
    /// only needs to be set once, but it's cheap to reapply and simpler to
    /// keep in the same batch than to special-case it.
    pub async fn connect(path: &str, max_size: usize) -> Result<Self, StoreError> {
        let manager = Manager::new(path, deadpool_diesel::Runtime::Tokio1);
        let pool = Pool::builder(manager)
            .max_size(max_size)
            .post_create(Hook::async_fn(|conn, _metrics| {
                Box::pin(async move {
                    conn.interact(|conn| conn.batch_execute(PRAGMAS))
                        .await
                        .map_err(|e| HookError::Message(e.to_string().into()))?
                        .map_err(|e| HookError::Message(e.to_string().into()))
                })
            }))
            .build()
            .map_err(|e| StoreError::Pool(e.to_string()))?;

        let db = Self { pool };
        db.run_migrations().await?;

        info!(%path, "database connection pool initialized");
        Ok(db)
    }

    async fn run_migrations(&self) -> Result<(), StoreError> {
        let conn = self
            .pool
            .get()
            .await
            .map_err(|e| StoreError::Pool(e.to_string()))?;

        conn.interact(|conn| conn.run_pending_migrations(MIGRATIONS).map(|_| ()))
            .await
            .map_err(|e| StoreError::Migration(e.to_string()))?
            .map_err(|e| StoreError::Migration(e.to_string()))?;

        Ok(())
    }

    pub fn pool(&self) -> Pool {
        self.pool.clone()
    }
}
