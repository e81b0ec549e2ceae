use crate::store::AttendanceStore;
use rollcall_capture::CaptureError;
use rollcall_core::{
    CapturedImage, Ledger, LedgerError, ManualTarget, Presenter, RecognitionClient,
    RecognitionOutcome, RosterStore, SessionSnapshot,
};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("recognition already in progress")]
    Busy,
    #[error("failed to spawn ledger thread: {0}")]
    Spawn(std::io::Error),
    #[error("ledger thread exited")]
    ChannelClosed,
}

/// Messages sent from D-Bus handlers to the ledger thread.
enum LedgerRequest {
    Reconcile {
        outcome: RecognitionOutcome,
        reply: oneshot::Sender<SessionSnapshot>,
    },
    ManualCheckIn {
        target: ManualTarget,
        reply: oneshot::Sender<Result<SessionSnapshot, LedgerError>>,
    },
    CaptureUnavailable {
        reason: String,
        reply: oneshot::Sender<SessionSnapshot>,
    },
    Reset {
        reply: oneshot::Sender<SessionSnapshot>,
    },
    Snapshot {
        reply: oneshot::Sender<SessionSnapshot>,
    },
}

/// Admits at most one recognition at a time.
#[derive(Default)]
pub struct RecognitionGate {
    busy: AtomicBool,
}

impl RecognitionGate {
    pub fn try_acquire(self: &Arc<Self>) -> Option<GatePermit> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| GatePermit(Arc::clone(self)))
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

/// Held for the duration of one recognition; releases the gate on drop.
pub struct GatePermit(Arc<RecognitionGate>);

impl Drop for GatePermit {
    fn drop(&mut self) {
        self.0.busy.store(false, Ordering::Release);
    }
}

/// Publishes every ledger snapshot on a watch channel.
struct WatchPresenter(watch::Sender<SessionSnapshot>);

impl Presenter for WatchPresenter {
    fn render(&mut self, snapshot: &SessionSnapshot) {
        self.0.send_replace(snapshot.clone());
    }
}

/// Clone-safe handle to the ledger thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<LedgerRequest>,
    recognizer: Arc<dyn RecognitionClient>,
    roster: Arc<dyn RosterStore>,
    gate: Arc<RecognitionGate>,
    timeout: Duration,
    updates: watch::Receiver<SessionSnapshot>,
}

impl EngineHandle {
    /// Load an image file, classify it and reconcile the outcome.
    pub async fn recognize(&self, image_path: PathBuf) -> Result<SessionSnapshot, EngineError> {
        self.capture_and_recognize(move || rollcall_capture::load_image(&image_path))
            .await
    }

    /// Same as [`recognize`](Self::recognize) for an encoded image held in memory.
    pub async fn recognize_bytes(&self, bytes: Vec<u8>) -> Result<SessionSnapshot, EngineError> {
        self.capture_and_recognize(move || rollcall_capture::capture_from_bytes(&bytes))
            .await
    }

    /// Capture problems are reported through the session status rather than
    /// as an error, so the caller always gets the current state back.
    async fn capture_and_recognize<F>(&self, capture: F) -> Result<SessionSnapshot, EngineError>
    where
        F: FnOnce() -> Result<CapturedImage, CaptureError> + Send + 'static,
    {
        let _permit = self.gate.try_acquire().ok_or(EngineError::Busy)?;

        let image = match tokio::task::spawn_blocking(capture).await {
            Ok(Ok(image)) => image,
            Ok(Err(err)) => return self.capture_unavailable(err.to_string()).await,
            Err(join) => return self.capture_unavailable(join.to_string()).await,
        };

        let outcome = self.classify(image).await;
        self.reconcile(outcome).await
    }

    /// Run the recognition client on the blocking pool under the configured timeout.
    async fn classify(&self, image: CapturedImage) -> RecognitionOutcome {
        let recognizer = Arc::clone(&self.recognizer);
        let task = tokio::task::spawn_blocking(move || recognizer.recognize(&image));
        match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(join)) => RecognitionOutcome::Failed {
                reason: format!("recognizer crashed: {join}"),
            },
            Err(_) => {
                tracing::warn!(timeout_secs = self.timeout.as_secs_f32(), "recognition timed out");
                RecognitionOutcome::Failed {
                    reason: "timeout".to_string(),
                }
            }
        }
    }

    pub async fn reconcile(&self, outcome: RecognitionOutcome) -> Result<SessionSnapshot, EngineError> {
        self.request(|reply| LedgerRequest::Reconcile { outcome, reply })
            .await
    }

    pub async fn manual_check_in(&self, target: ManualTarget) -> Result<SessionSnapshot, EngineError> {
        let result = self
            .request(|reply| LedgerRequest::ManualCheckIn { target, reply })
            .await?;
        Ok(result?)
    }

    pub async fn capture_unavailable(&self, reason: String) -> Result<SessionSnapshot, EngineError> {
        self.request(|reply| LedgerRequest::CaptureUnavailable { reason, reply })
            .await
    }

    pub async fn reset(&self) -> Result<SessionSnapshot, EngineError> {
        self.request(|reply| LedgerRequest::Reset { reply }).await
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot, EngineError> {
        self.request(|reply| LedgerRequest::Snapshot { reply }).await
    }

    /// Receiver that sees every snapshot the ledger publishes.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.updates.clone()
    }

    pub fn roster(&self) -> &Arc<dyn RosterStore> {
        &self.roster
    }

    pub fn recognizer_name(&self) -> &'static str {
        self.recognizer.name()
    }

    pub fn recognition_in_progress(&self) -> bool {
        self.gate.is_busy()
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> LedgerRequest,
    ) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }
}

/// Spawn the ledger on a dedicated OS thread.
///
/// The thread owns the ledger and the optional store and applies requests
/// strictly one at a time, in arrival order.
pub fn spawn_engine(
    mut ledger: Ledger,
    store: Option<AttendanceStore>,
    recognizer: Arc<dyn RecognitionClient>,
    timeout: Duration,
) -> Result<EngineHandle, EngineError> {
    let (updates_tx, updates_rx) = watch::channel(ledger.snapshot());
    ledger.attach(Box::new(WatchPresenter(updates_tx)));
    let roster = Arc::clone(ledger.roster());

    let (tx, mut rx) = mpsc::channel::<LedgerRequest>(16);

    std::thread::Builder::new()
        .name("rollcall-ledger".into())
        .spawn(move || {
            tracing::info!("ledger thread started");
            let mut journal = Journal::new(store);
            while let Some(req) = rx.blocking_recv() {
                let before = ledger.checked_in().len();
                match req {
                    LedgerRequest::Reconcile { outcome, reply } => {
                        ledger.reconcile_recognition(outcome);
                        let _ = reply.send(ledger.snapshot());
                    }
                    LedgerRequest::ManualCheckIn { target, reply } => {
                        let result = ledger.manual_check_in(target).map(|_| ledger.snapshot());
                        let _ = reply.send(result);
                    }
                    LedgerRequest::CaptureUnavailable { reason, reply } => {
                        ledger.report_capture_unavailable(&reason);
                        let _ = reply.send(ledger.snapshot());
                    }
                    LedgerRequest::Reset { reply } => {
                        ledger.reset();
                        journal.new_session();
                        let _ = reply.send(ledger.snapshot());
                        continue;
                    }
                    LedgerRequest::Snapshot { reply } => {
                        let _ = reply.send(ledger.snapshot());
                        continue;
                    }
                }
                journal.persist(&ledger.checked_in()[before..]);
            }
            tracing::info!("ledger thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle {
        tx,
        recognizer,
        roster,
        gate: Arc::new(RecognitionGate::default()),
        timeout,
        updates: updates_rx,
    })
}

/// Writes new records to the store, if one is attached.
/// Store failures are logged and never reach the ledger.
struct Journal {
    store: Option<AttendanceStore>,
    session_id: Option<String>,
}

impl Journal {
    fn new(store: Option<AttendanceStore>) -> Self {
        let mut journal = Self {
            store,
            session_id: None,
        };
        journal.new_session();
        journal
    }

    fn new_session(&mut self) {
        let Some(store) = &self.store else {
            return;
        };
        self.session_id = match store.begin_session() {
            Ok(id) => Some(id),
            Err(err) => {
                tracing::warn!(error = %err, "failed to start store session; attendance not persisted");
                None
            }
        };
    }

    fn persist(&self, records: &[rollcall_core::AttendanceRecord]) {
        let (Some(store), Some(session_id)) = (&self.store, &self.session_id) else {
            return;
        };
        for record in records {
            if let Err(err) = store.record(session_id, record) {
                tracing::warn!(error = %err, attendee = %record.attendee, "failed to persist check-in");
            }
        }
    }
}
