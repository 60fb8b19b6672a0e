//! Request-wide state and the single-shot exit path.
//!
//! Every handler of one request shares a [`RequestState`]. Fatal errors
//! from any of them go through [`RequestState::exit`], which records the
//! first error and ignores the rest, so a tokenizer that reports the same
//! failure twice (or a disconnect racing a parse error) shuts the request
//! down exactly once.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use tokio::sync::{oneshot, watch};
use tracing::{debug, warn};

use crate::{Upload, UploadError, Value};

/// Field name → placeholder, built from the `map` field.
pub(crate) type PlaceholderTable = HashMap<String, Upload>;

/// Terminal error and released flag, shared with every [`FileUpload`].
///
/// [`FileUpload`]: crate::FileUpload
#[derive(Debug, Default)]
pub(crate) struct ExitState {
    error: OnceLock<UploadError>,
    released: AtomicBool,
}

impl ExitState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the terminal error. Only the first call takes effect.
    pub fn record(&self, err: UploadError) -> bool {
        self.error.set(err).is_ok()
    }

    pub fn error(&self) -> Option<UploadError> {
        self.error.get().cloned()
    }

    /// Mark the response finished. Returns `false` if already marked.
    pub fn mark_released(&self) -> bool {
        !self.released.swap(true, Ordering::SeqCst)
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }
}

/// Where an exit was raised from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ExitCause {
    /// The tokenizer or a handler fed by it failed; the tokenizer is
    /// already stopped or about to be dropped by the driver.
    Tokenizer,
    /// Raised from outside the driver (e.g. client disconnect); the
    /// driver must be told to stop.
    External,
}

pub(crate) struct RequestState {
    exit: Arc<ExitState>,
    table: Mutex<Option<PlaceholderTable>>,
    result: Mutex<Option<oneshot::Sender<Result<Value, UploadError>>>>,
    stop: watch::Sender<bool>,
}

impl RequestState {
    pub fn new(result: oneshot::Sender<Result<Value, UploadError>>) -> Self {
        let (stop, _) = watch::channel(false);
        Self {
            exit: Arc::new(ExitState::new()),
            table: Mutex::new(None),
            result: Mutex::new(Some(result)),
            stop,
        }
    }

    pub fn exit_state(&self) -> &Arc<ExitState> {
        &self.exit
    }

    /// Abort the request with `err`.
    ///
    /// The first call rejects every unsettled placeholder and the overall
    /// result, then signals the driver to stop and drain the body. Later
    /// calls are no-ops and return `false`.
    pub fn exit(&self, err: UploadError, cause: ExitCause) -> bool {
        if !self.exit.record(err.clone()) {
            debug!(error = %err, "ignoring error after exit");
            return false;
        }
        match cause {
            ExitCause::Tokenizer => debug!(error = %err, status = err.status(), "aborting multipart request"),
            ExitCause::External => warn!(error = %err, status = err.status(), "multipart request aborted externally"),
        }

        let rejected = {
            let table = self.table.lock().expect("placeholder table lock");
            table
                .iter()
                .flat_map(|t| t.values())
                .filter(|upload| upload.reject(err.clone()))
                .count()
        };
        if rejected > 0 {
            debug!(rejected, "rejected pending uploads");
        }

        self.settle(Err(err));
        self.stop.send_replace(true);
        true
    }

    /// Resolve the overall result. No-op if it already settled.
    pub fn resolve(&self, operations: Value) {
        self.settle(Ok(operations));
    }

    fn settle(&self, outcome: Result<Value, UploadError>) {
        let sender = self.result.lock().expect("result lock").take();
        if let Some(sender) = sender {
            // The caller may have stopped waiting; nothing to do then.
            let _ = sender.send(outcome);
        }
    }

    /// Install the placeholder table built by the binder.
    ///
    /// If the request already exited, the new placeholders are rejected
    /// straight away so none can stay pending.
    pub fn install_table(&self, table: PlaceholderTable) {
        let mut slot = self.table.lock().expect("placeholder table lock");
        // Checked under the lock: `exit` records before it sweeps the table.
        if let Some(err) = self.exit.error() {
            for upload in table.values() {
                upload.reject(err.clone());
            }
        }
        *slot = Some(table);
    }

    /// The placeholder for a file field, if the table exists.
    ///
    /// Outer `None`: `map` was never bound. Inner `None`: unmapped field.
    pub fn placeholder(&self, field: &str) -> Option<Option<Upload>> {
        let table = self.table.lock().expect("placeholder table lock");
        table.as_ref().map(|t| t.get(field).cloned())
    }

    /// Every placeholder that has not settled yet.
    pub fn pending(&self) -> Vec<Upload> {
        let table = self.table.lock().expect("placeholder table lock");
        table
            .iter()
            .flat_map(|t| t.values())
            .filter(|upload| !upload.is_settled())
            .cloned()
            .collect()
    }

    /// Release the spool of every file that started streaming.
    ///
    /// The table stays installed: parts still in flight must find their
    /// placeholders. Returns the number of spools released.
    pub fn release_files(&self) -> usize {
        let table = self.table.lock().expect("placeholder table lock");
        let mut released = 0;
        for upload in table.iter().flat_map(|t| t.values()) {
            if let Some(Ok(file)) = upload.try_file() {
                file.spool().release();
                released += 1;
            }
        }
        released
    }

    pub fn stop_signal(&self) -> watch::Receiver<bool> {
        self.stop.subscribe()
    }
}

/// Resolve once `stop` turns true.
pub(crate) async fn stopped(stop: &mut watch::Receiver<bool>) {
    loop {
        let raised = *stop.borrow_and_update();
        if raised {
            return;
        }
        if stop.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
