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

//! Binary entry point: parses CLI flags, loads configuration, starts the
//! engine (which itself runs Recovery before accepting work), then serves
//! HTTP until told to shut down (§6 Lifecycle).

mod config;
mod http;
mod logging;

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;

use config::{Cli, ConfigLoader};
use taskgraph_core::engine::{Engine, EngineConfig};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let loader = ConfigLoader::new();
    let config = loader.load(cli.config.as_deref())?;
    let config = cli.apply_to(config);

    logging::init(&config.server.log_level);

    let engine = Arc::new(
        Engine::start_with_default_executor(
            &config.database.path,
            EngineConfig {
                max_concurrency: config.execution.max_concurrent as usize,
                connection_pool_size: config.database.pool_size as usize,
            },
        )
        .await?,
    );

    let app = http::build_router(engine.clone());

    let addr = format!("{}:{}", config.server.bind_address, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "taskgraphd listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    match Arc::try_unwrap(engine) {
        Ok(engine) => engine.shutdown().await,
        Err(_) => tracing::warn!("engine still has outstanding references at shutdown"),
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    tracing::info!("shutdown signal received, draining in-flight tasks");
}
