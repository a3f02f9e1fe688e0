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

//! Diesel table definitions for the SQLite-backed store.
//!
//! Kept separate from `models.rs` the way the teacher's
//! `database::schema` module is kept separate from `models::task_execution`:
//! the schema describes column shapes, the models describe domain meaning.

diesel::table! {
    tasks (id) {
        id -> Text,
        task_type -> Text,
        duration_ms -> BigInt,
        dependencies -> Text,
        status -> Text,
        created_at -> Timestamp,
        started_at -> Nullable<Timestamp>,
        finished_at -> Nullable<Timestamp>,
    }
}

diesel::table! {
    task_dependencies (task_id, depends_on_id) {
        task_id -> Text,
        depends_on_id -> Text,
    }
}

diesel::allow_tables_to_appear_in_same_query!(tasks, task_dependencies);
