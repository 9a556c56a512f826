//! `convoy daemon`: run the control-plane service in the foreground.
//!
//! Startup goes through the [`ServiceSupervisor`] barrier: configuration is
//! validated and the database opened behind the compare-and-swap `starting`
//! flag, so a second start request while startup is in flight is rejected
//! rather than racing on sentinel files.

use anyhow::{anyhow, Result};

use convoy_core::supervisor::ServiceSupervisor;
use convoy_db::pool;

use crate::config::ConvoyConfig;

pub async fn run_daemon(config: &ConvoyConfig) -> Result<()> {
    let supervisor = ServiceSupervisor::new();

    supervisor
        .start(|| async {
            // Config ranges were validated at resolve time; opening the
            // database and applying migrations completes startup.
            let db_pool = pool::create_pool(&config.db_config)
                .await
                .map_err(|e| e.to_string())?;
            pool::run_migrations(&db_pool)
                .await
                .map_err(|e| e.to_string())?;
            db_pool.close().await;
            Ok(())
        })
        .await
        .map_err(|e| anyhow!("{e}"))?;

    tracing::info!(status = %supervisor.status(), "convoyd ready");
    println!("convoyd running; press Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;

    supervisor.stop().map_err(|e| anyhow!("{e}"))?;
    tracing::info!("convoyd stopped");
    Ok(())
}
