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

//! Typed configuration, layered `defaults -> env vars -> TOML file -> CLI
//! flags` (each later layer overrides the former), modeled on
//! `cloacina-ctl`'s `ConfigLoader`: search a fixed list of paths (or
//! `TASKGRAPHD_CONFIG`), substitute `${VAR}` / `${VAR:-default}`
//! expressions in the file content, then parse.

use clap::Parser;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("environment variable '{0}' referenced in config has no value and no default")]
    MissingEnvVar(String),

    #[error("invalid value for {field}: {value}")]
    InvalidValue { field: &'static str, value: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub execution: ExecutionConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
}

fn default_pool_size() -> u32 {
    8
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    pub max_concurrent: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_shutdown_timeout")]
    pub graceful_shutdown_timeout_secs: u64,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_shutdown_timeout() -> u64 {
    10
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                path: "./taskgraph.db".to_string(),
                pool_size: default_pool_size(),
            },
            execution: ExecutionConfig { max_concurrent: 3 },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 7878,
                log_level: default_log_level(),
                graceful_shutdown_timeout_secs: default_shutdown_timeout(),
            },
        }
    }
}

impl AppConfig {
    /// Applies the `TASKGRAPHD_*` environment variable overrides (§6).
    /// Called after defaults but before the TOML file, so a present TOML
    /// key always wins over a plain env var per the documented precedence.
    fn apply_env(mut self) -> Result<Self, ConfigError> {
        if let Ok(v) = env::var("TASKGRAPHD_DATABASE_PATH") {
            self.database.path = v;
        }
        if let Ok(v) = env::var("TASKGRAPHD_MAX_CONCURRENT") {
            self.execution.max_concurrent = v.parse().map_err(|_| ConfigError::InvalidValue {
                field: "TASKGRAPHD_MAX_CONCURRENT",
                value: v,
            })?;
        }
        if let Ok(v) = env::var("TASKGRAPHD_BIND_ADDRESS") {
            self.server.bind_address = v;
        }
        if let Ok(v) = env::var("TASKGRAPHD_PORT") {
            self.server.port = v.parse().map_err(|_| ConfigError::InvalidValue {
                field: "TASKGRAPHD_PORT",
                value: v,
            })?;
        }
        Ok(self)
    }

    /// Overlays only the fields present in `file`, leaving the rest of
    /// `self` untouched — a TOML file need not specify every key.
    fn apply_file(mut self, file: PartialAppConfig) -> Self {
        if let Some(db) = file.database {
            if let Some(path) = db.path {
                self.database.path = path;
            }
            if let Some(pool_size) = db.pool_size {
                self.database.pool_size = pool_size;
            }
        }
        if let Some(execution) = file.execution {
            if let Some(max_concurrent) = execution.max_concurrent {
                self.execution.max_concurrent = max_concurrent;
            }
        }
        if let Some(server) = file.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(log_level) = server.log_level {
                self.server.log_level = log_level;
            }
            if let Some(timeout) = server.graceful_shutdown_timeout_secs {
                self.server.graceful_shutdown_timeout_secs = timeout;
            }
        }
        self
    }
}

/// Mirrors `AppConfig` with every field optional, so a TOML file can
/// specify a subset of keys without the other sections being required.
#[derive(Debug, Default, Deserialize)]
struct PartialAppConfig {
    database: Option<PartialDatabaseConfig>,
    execution: Option<PartialExecutionConfig>,
    server: Option<PartialServerConfig>,
}

#[derive(Debug, Default, Deserialize)]
struct PartialDatabaseConfig {
    path: Option<String>,
    pool_size: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct PartialExecutionConfig {
    max_concurrent: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct PartialServerConfig {
    bind_address: Option<String>,
    port: Option<u16>,
    log_level: Option<String>,
    graceful_shutdown_timeout_secs: Option<u64>,
}

/// Command-line flags. Any flag the caller actually passes overrides the
/// corresponding file/env/default value once `Cli::apply_to` runs.
#[derive(Debug, Parser)]
#[command(name = "taskgraphd", about = "Dependency-aware task scheduler daemon")]
pub struct Cli {
    /// Path to a TOML configuration file.
    #[arg(long, env = "TASKGRAPHD_CONFIG")]
    pub config: Option<PathBuf>,

    /// Override the SQLite database path.
    #[arg(long)]
    pub database: Option<String>,

    /// Override the HTTP bind address.
    #[arg(long)]
    pub bind: Option<String>,

    /// Override the HTTP port.
    #[arg(long)]
    pub port: Option<u16>,

    /// Override the Dispatcher's maximum concurrent tasks.
    #[arg(long)]
    pub max_concurrent: Option<u32>,

    /// Override the tracing log level (e.g. "debug", "info,taskgraph_core=debug").
    #[arg(long)]
    pub log_level: Option<String>,
}

impl Cli {
    pub fn apply_to(&self, mut config: AppConfig) -> AppConfig {
        if let Some(database) = &self.database {
            config.database.path = database.clone();
        }
        if let Some(bind) = &self.bind {
            config.server.bind_address = bind.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(max_concurrent) = self.max_concurrent {
            config.execution.max_concurrent = max_concurrent;
        }
        if let Some(log_level) = &self.log_level {
            config.server.log_level = log_level.clone();
        }
        config
    }
}

pub struct ConfigLoader {
    search_paths: Vec<PathBuf>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        let mut search_paths = vec![
            PathBuf::from("./taskgraphd.toml"),
            PathBuf::from("./taskgraph.toml"),
        ];

        if let Some(config_dir) = dirs::config_dir() {
            search_paths.push(config_dir.join("taskgraphd").join("config.toml"));
        }

        search_paths.push(PathBuf::from("/etc/taskgraphd/config.toml"));

        Self { search_paths }
    }

    /// Builds the layered config: defaults, then `TASKGRAPHD_*` env vars,
    /// then the TOML file (explicit path, `TASKGRAPHD_CONFIG`, or the
    /// first existing search path) if one is found. CLI flags are applied
    /// separately by the caller via `Cli::apply_to`, last.
    pub fn load(&self, explicit_path: Option<&Path>) -> Result<AppConfig, ConfigError> {
        let config = AppConfig::default().apply_env()?;

        let path = if let Some(path) = explicit_path {
            Some(path.to_path_buf())
        } else if let Ok(env_path) = env::var("TASKGRAPHD_CONFIG") {
            Some(PathBuf::from(env_path))
        } else {
            self.find_config_file()
        };

        match path {
            Some(path) => {
                let partial = self.load_partial_from_file(&path)?;
                Ok(config.apply_file(partial))
            }
            None => Ok(config),
        }
    }

    fn load_partial_from_file(&self, path: &Path) -> Result<PartialAppConfig, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let substituted = substitute_env_vars(&content)?;

        toml::from_str(&substituted).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    fn find_config_file(&self) -> Option<PathBuf> {
        self.search_paths
            .iter()
            .find(|p| p.exists() && p.is_file())
            .cloned()
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Replaces `${VAR}` and `${VAR:-default}` expressions with the named
/// environment variable's value, or the default if it is unset.
fn substitute_env_vars(content: &str) -> Result<String, ConfigError> {
    let re = Regex::new(r"\$\{([^}]+)\}").unwrap();
    let mut result = content.to_string();

    for cap in re.captures_iter(content) {
        let full_match = &cap[0];
        let expr = &cap[1];

        let replacement = if let Some((var, default)) = expr.split_once(":-") {
            env::var(var).unwrap_or_else(|_| default.to_string())
        } else {
            env::var(expr).map_err(|_| ConfigError::MissingEnvVar(expr.to_string()))?
        };

        result = result.replace(full_match, &replacement);
    }

    Ok(result)
}
