use std::sync::Arc;
use std::time::Duration;

use deskmate_common::{Error, Result};
use deskmate_config::AppConfig;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::router::build_router;
use crate::scanner::spawn_nudge_scanner;
use crate::state::{AppState, Stores};

pub struct GatewayServer {
    config: AppConfig,
}

impl GatewayServer {
    pub fn new(config: AppConfig) -> Self {
        Self { config }
    }

    /// Open the database, start the nudge scanner and serve until Ctrl-C.
    pub async fn run(self) -> Result<()> {
        let stores = Stores::open(&self.config.database.path)?;
        let state = Arc::new(AppState::new(self.config, stores)?);

        let scanner = state.config.nudges.scan_enabled.then(|| {
            spawn_nudge_scanner(
                Arc::clone(&state.stores.nudges),
                Duration::from_secs(state.config.nudges.scan_interval_secs.max(1)),
                state.config.nudges.stale_claim_days,
            )
        });

        let addr = format!("{}:{}", state.config.gateway.host, state.config.gateway.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| Error::Gateway(format!("failed to bind {addr}: {e}")))?;
        info!("deskmate gateway listening on {}", addr);

        let app = build_router(state);
        let served = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| Error::Gateway(format!("server error: {e}")));

        if let Some(handle) = scanner {
            handle.abort();
        }
        info!("gateway stopped");
        served
    }
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown signal received"),
        Err(e) => {
            warn!("cannot listen for Ctrl-C, serving until killed: {}", e);
            std::future::pending::<()>().await;
        }
    }
}
