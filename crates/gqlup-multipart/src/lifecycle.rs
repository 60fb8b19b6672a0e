//! Response completion and request disconnection hooks.

use std::sync::Arc;

use tracing::debug;

use crate::exit::{ExitCause, RequestState};
use crate::tokenizer::BodyTap;
use crate::UploadError;

/// Ties one request's uploads to the lifetime of its response.
///
/// Hold it until the response has been sent. Dropping it counts as
/// [`response_finished`](RequestLifecycle::response_finished), which
/// releases every spooled file whether or not it was read.
#[must_use = "dropping the lifecycle releases every uploaded file"]
pub struct RequestLifecycle {
    state: Arc<RequestState>,
    body: BodyTap,
}

impl RequestLifecycle {
    pub(crate) fn new(state: Arc<RequestState>, body: BodyTap) -> Self {
        Self { state, body }
    }

    /// The response was sent: release all spooled file bytes.
    ///
    /// Later `create_read_stream` calls fail. Idempotent.
    pub fn response_finished(&self) {
        if !self.state.exit_state().mark_released() {
            return;
        }
        let released = self.state.release_files();
        debug!(released, "released upload resources");
    }

    /// The client went away. Aborts the request unless its body was
    /// already read to the end.
    ///
    /// Returns `true` if this call aborted the request.
    pub fn request_disconnected(&self) -> bool {
        if self.body.ended() {
            return false;
        }
        self.state.exit(UploadError::Disconnected, ExitCause::External)
    }

    /// The terminal error, if the request aborted.
    pub fn exit_error(&self) -> Option<UploadError> {
        self.state.exit_state().error()
    }
}

impl Drop for RequestLifecycle {
    fn drop(&mut self) {
        self.response_finished();
    }
}
