//! Request driver: feeds tokenizer events through the classifier, binder
//! and router until the body ends or the request exits.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use tokio::sync::oneshot;
use tracing::debug;

use crate::binder::bind;
use crate::classifier::{Classified, FieldClassifier};
use crate::exit::{stopped, ExitCause, PlaceholderTable, RequestState};
use crate::lifecycle::RequestLifecycle;
use crate::router::route_file;
use crate::tokenizer::{BodyTap, BoxError, Event, Tokenizer};
use crate::{UploadError, UploadOptions, Value};

/// The operations document, available once `map` is bound.
///
/// Resolves independently of file arrival: each placeholder inside the
/// document settles on its own.
pub struct PendingOperations {
    rx: oneshot::Receiver<Result<Value, UploadError>>,
}

impl Future for PendingOperations {
    type Output = Result<Value, UploadError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|settled| settled.unwrap_or(Err(UploadError::Interrupted)))
    }
}

/// Start processing a multipart request body.
///
/// `boundary` is the multipart boundary from the `Content-Type` header.
/// Must be called from within a tokio runtime: the body is driven by a
/// spawned task that keeps running after the operations resolve, until
/// every file part was streamed or the request exited.
pub fn process_request<S, O, E>(
    body: S,
    boundary: impl Into<String>,
    options: UploadOptions,
) -> (PendingOperations, RequestLifecycle)
where
    S: Stream<Item = Result<O, E>> + Send + 'static,
    O: Into<Bytes> + 'static,
    E: Into<BoxError> + 'static,
{
    let body = BodyTap::new(Box::pin(
        body.map(|chunk| chunk.map(Into::into).map_err(Into::into)),
    ));
    let (tx, rx) = oneshot::channel();
    let state = Arc::new(RequestState::new(tx));
    let tokenizer = Tokenizer::new(body.clone(), boundary, &options);

    tokio::spawn(drive(tokenizer, body.clone(), options, state.clone()));

    (PendingOperations { rx }, RequestLifecycle::new(state, body))
}

async fn drive(mut tokenizer: Tokenizer, mut body: BodyTap, options: UploadOptions, state: Arc<RequestState>) {
    let mut classifier = FieldClassifier::new(options.max_field_size);
    let mut stop = state.stop_signal();

    loop {
        let event = tokio::select! {
            biased;
            _ = stopped(&mut stop) => break,
            event = tokenizer.next_event() => event,
        };

        let outcome = match event {
            Ok(Some(Event::Field { name, value, truncated })) => {
                on_field(&state, &mut classifier, &options, &name, &value, truncated)
            }
            Ok(Some(Event::File { name, meta, part })) => tokio::select! {
                biased;
                _ = stopped(&mut stop) => break,
                routed = route_file(&state, &name, meta, part, options.max_file_size) => routed,
            },
            Ok(Some(Event::FilesLimit)) => Err(UploadError::TooManyFiles {
                limit: options.max_files.unwrap_or_default(),
            }),
            Ok(None) => {
                on_finish(&state, &classifier);
                break;
            }
            Err(err) => Err(err),
        };

        if let Err(err) = outcome {
            state.exit(err, ExitCause::Tokenizer);
            break;
        }
    }

    // Detach the parser from the body, then let other tasks run before
    // pulling the rest of the body through.
    drop(tokenizer);
    if !body.ended() {
        tokio::task::yield_now().await;
        let discarded = body.drain().await;
        debug!(discarded, "drained remaining request body");
    }
}

fn on_field(
    state: &RequestState,
    classifier: &mut FieldClassifier,
    options: &UploadOptions,
    name: &str,
    value: &[u8],
    truncated: bool,
) -> Result<(), UploadError> {
    match classifier.classify(name, value, truncated)? {
        Classified::Ignored | Classified::Operations => Ok(()),
        Classified::Map { mut operations, map } => {
            let mut table = PlaceholderTable::new();
            let bound = bind(&mut operations, map, options.max_files, &mut table);
            let files = table.len();
            state.install_table(table);
            bound?;
            debug!(files, "operations ready");
            state.resolve(operations);
            Ok(())
        }
    }
}

fn on_finish(state: &RequestState, classifier: &FieldClassifier) {
    if let Some(missing) = classifier.awaiting() {
        state.exit(UploadError::MissingField(missing), ExitCause::Tokenizer);
        return;
    }
    let missing = state
        .pending()
        .into_iter()
        .filter(|upload| upload.reject(UploadError::FileMissing))
        .count();
    if missing > 0 {
        debug!(missing, "request ended before some mapped files arrived");
    }
}
