use crate::engine::{EngineError, EngineHandle};
use rollcall_core::{ManualPolicy, ManualTarget, PersonId, SessionSnapshot, SightingId};
use serde::Serialize;
use std::path::PathBuf;
use tokio::sync::watch;
use zbus::interface;
use zbus::object_server::SignalEmitter;

pub const BUS_NAME: &str = "org.rollcall.Attendance1";
pub const OBJECT_PATH: &str = "/org/rollcall/Attendance1";

/// D-Bus interface for the Rollcall attendance daemon.
///
/// Bus name: org.rollcall.Attendance1
/// Object path: /org/rollcall/Attendance1
///
/// Session methods reply with the resulting snapshot as JSON.
pub struct AttendanceService {
    engine: EngineHandle,
    policy: ManualPolicy,
}

impl AttendanceService {
    pub fn new(engine: EngineHandle, policy: ManualPolicy) -> Self {
        Self { engine, policy }
    }
}

#[interface(name = "org.rollcall.Attendance1")]
impl AttendanceService {
    /// Classify the image at `image_path` and reconcile the result.
    async fn recognize(&self, image_path: &str) -> zbus::fdo::Result<String> {
        tracing::info!(image_path, "recognize requested");
        let snapshot = self
            .engine
            .recognize(PathBuf::from(image_path))
            .await
            .map_err(to_fdo)?;
        to_json(&snapshot)
    }

    /// Classify an encoded image (JPEG, PNG, ...) sent inline.
    async fn recognize_data(&self, data: Vec<u8>) -> zbus::fdo::Result<String> {
        tracing::info!(bytes = data.len(), "recognize (inline image) requested");
        let snapshot = self.engine.recognize_bytes(data).await.map_err(to_fdo)?;
        to_json(&snapshot)
    }

    /// Manual check-in by sighting label, roster id or name, or free text.
    async fn check_in(&self, text: &str) -> zbus::fdo::Result<String> {
        tracing::info!(text, "manual check-in requested");
        let snapshot = self
            .engine
            .manual_check_in(ManualTarget::Text(text.to_string()))
            .await
            .map_err(to_fdo)?;
        to_json(&snapshot)
    }

    /// Resolve an unresolved sighting. An empty `name` keeps the sighting's label.
    async fn resolve_sighting(&self, id: u64, name: &str) -> zbus::fdo::Result<String> {
        tracing::info!(id, name, "resolve sighting requested");
        let name = (!name.is_empty()).then(|| name.to_string());
        let snapshot = self
            .engine
            .manual_check_in(ManualTarget::Sighting {
                id: SightingId(id),
                name,
            })
            .await
            .map_err(to_fdo)?;
        to_json(&snapshot)
    }

    /// Manual check-in of a roster member by id.
    async fn check_in_person(&self, id: u32) -> zbus::fdo::Result<String> {
        tracing::info!(id, "check-in by person id requested");
        let snapshot = self
            .engine
            .manual_check_in(ManualTarget::Person(PersonId(id)))
            .await
            .map_err(to_fdo)?;
        to_json(&snapshot)
    }

    /// End the current session and start an empty one.
    async fn reset(&self) -> zbus::fdo::Result<String> {
        tracing::info!("session reset requested");
        let snapshot = self.engine.reset().await.map_err(to_fdo)?;
        to_json(&snapshot)
    }

    async fn snapshot(&self) -> zbus::fdo::Result<String> {
        let snapshot = self.engine.snapshot().await.map_err(to_fdo)?;
        to_json(&snapshot)
    }

    /// List the roster as JSON.
    async fn roster(&self) -> zbus::fdo::Result<String> {
        to_json(&self.engine.roster().list_people())
    }

    /// Return daemon status information.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let snapshot = self.engine.snapshot().await.map_err(to_fdo)?;
        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "recognizer": self.engine.recognizer_name(),
            "manual_policy": self.policy.as_str(),
            "recognition_in_progress": self.engine.recognition_in_progress(),
            "roster_size": self.engine.roster().list_people().len(),
            "checked_in": snapshot.checked_in.len(),
            "unresolved": snapshot.unresolved.len(),
        })
        .to_string())
    }

    /// Emitted after every ledger operation with the new snapshot as JSON.
    #[zbus(signal)]
    async fn session_changed(emitter: &SignalEmitter<'_>, snapshot: &str) -> zbus::Result<()>;
}

fn to_json<T: Serialize>(value: &T) -> zbus::fdo::Result<String> {
    serde_json::to_string(value).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
}

fn to_fdo(err: EngineError) -> zbus::fdo::Error {
    match err {
        EngineError::Ledger(e) => zbus::fdo::Error::InvalidArgs(e.to_string()),
        other => zbus::fdo::Error::Failed(other.to_string()),
    }
}

/// Forward ledger snapshots to D-Bus as `SessionChanged` signals.
pub async fn forward_updates(conn: zbus::Connection, mut updates: watch::Receiver<SessionSnapshot>) {
    while updates.changed().await.is_ok() {
        let json = {
            let snapshot = updates.borrow_and_update();
            serde_json::to_string(&*snapshot)
        };
        let json = match json {
            Ok(json) => json,
            Err(err) => {
                tracing::warn!(error = %err, "failed to encode snapshot");
                continue;
            }
        };

        let iface = match conn
            .object_server()
            .interface::<_, AttendanceService>(OBJECT_PATH)
            .await
        {
            Ok(iface) => iface,
            Err(err) => {
                tracing::warn!(error = %err, "attendance interface not registered");
                continue;
            }
        };
        if let Err(err) = AttendanceService::session_changed(iface.signal_emitter(), &json).await {
            tracing::warn!(error = %err, "failed to emit SessionChanged");
        }
    }
    tracing::debug!("snapshot forwarding stopped");
}
