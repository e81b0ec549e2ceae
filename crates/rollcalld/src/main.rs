use anyhow::{Context, Result};
use rollcall_core::{Ledger, RosterStore};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;
mod store;

use config::Config;
use dbus_interface::{AttendanceService, BUS_NAME, OBJECT_PATH};
use store::AttendanceStore;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = Config::from_env();
    tracing::info!(
        recognizer = ?config.recognizer,
        policy = %config.manual_policy,
        persistent = config.db_path.is_some(),
        "rollcalld starting"
    );

    let roster: Arc<dyn RosterStore> = Arc::new(config.load_roster().context("loading roster")?);
    let recognizer = config.build_recognizer(Arc::clone(&roster));

    let store = match &config.db_path {
        Some(path) => Some(
            AttendanceStore::open(path)
                .with_context(|| format!("opening attendance store {}", path.display()))?,
        ),
        None => None,
    };

    let ledger = Ledger::new(roster, config.manual_policy);
    let engine = engine::spawn_engine(ledger, store, recognizer, config.recognition_timeout())?;
    let updates = engine.subscribe();

    let builder = if config.system_bus {
        zbus::connection::Builder::system()?
    } else {
        zbus::connection::Builder::session()?
    };
    let conn = builder
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, AttendanceService::new(engine, config.manual_policy))?
        .build()
        .await
        .context("registering on D-Bus")?;

    tokio::spawn(dbus_interface::forward_updates(conn.clone(), updates));

    tracing::info!(bus_name = BUS_NAME, path = OBJECT_PATH, "rollcalld ready");

    // Keep running until signaled
    tokio::signal::ctrl_c().await?;
    tracing::info!("rollcalld shutting down");

    Ok(())
}
