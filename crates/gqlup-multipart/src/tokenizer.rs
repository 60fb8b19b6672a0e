//! Multipart tokenizer: turns the request body into field and file events.
//!
//! The request body is wrapped in a [`BodyTap`] before it is handed to
//! `multer`. The tap lets the driver take the body back after it drops the
//! parser, so the remainder of the request can be drained instead of left
//! half-read on the connection.

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use futures_util::{Stream, StreamExt};
use tracing::debug;

use crate::error::map_multer_error;
use crate::upload::FileMeta;
use crate::{UploadError, UploadOptions};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A type-erased, fallible stream of request body chunks.
pub(crate) type BodyStream = Pin<Box<dyn Stream<Item = Result<Bytes, BoxError>> + Send>>;

const DEFAULT_MIMETYPE: &str = "application/octet-stream";
const DEFAULT_ENCODING: &str = "7bit";

struct TapShared {
    body: Mutex<Option<BodyStream>>,
    ended: AtomicBool,
}

/// Shared handle over the request body.
///
/// Every clone polls the same underlying stream. The stream is dropped
/// once it ends or errors; later polls yield `None`.
#[derive(Clone)]
pub(crate) struct BodyTap {
    shared: Arc<TapShared>,
}

impl BodyTap {
    pub fn new(body: BodyStream) -> Self {
        Self {
            shared: Arc::new(TapShared {
                body: Mutex::new(Some(body)),
                ended: AtomicBool::new(false),
            }),
        }
    }

    /// Whether the body was read to its end without error.
    pub fn ended(&self) -> bool {
        self.shared.ended.load(Ordering::SeqCst)
    }

    /// Read and discard the rest of the body.
    pub async fn drain(&mut self) -> u64 {
        let mut discarded = 0u64;
        while let Some(chunk) = self.next().await {
            match chunk {
                Ok(bytes) => discarded += bytes.len() as u64,
                Err(e) => {
                    debug!(error = %e, "request body failed while draining");
                    break;
                }
            }
        }
        discarded
    }
}

impl Stream for BodyTap {
    type Item = Result<Bytes, BoxError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut slot = self.shared.body.lock().expect("body lock");
        let Some(body) = slot.as_mut() else {
            return Poll::Ready(None);
        };
        match body.as_mut().poll_next(cx) {
            Poll::Ready(None) => {
                *slot = None;
                self.shared.ended.store(true, Ordering::SeqCst);
                Poll::Ready(None)
            }
            Poll::Ready(Some(Err(e))) => {
                *slot = None;
                Poll::Ready(Some(Err(e)))
            }
            other => other,
        }
    }
}

/// One tokenizer event.
pub(crate) enum Event {
    /// A non-file field. `truncated` is set when the value exceeded the
    /// field size limit; `value` then holds only the leading bytes.
    Field {
        name: String,
        value: Bytes,
        truncated: bool,
    },
    /// A file part. Its bytes are read through `part`.
    File {
        name: String,
        meta: FileMeta,
        part: FilePart,
    },
    /// More file parts arrived than `max_files` allows.
    FilesLimit,
}

/// Byte source of one file part.
pub(crate) struct FilePart {
    field: multer::Field<'static>,
}

impl FilePart {
    pub async fn chunk(&mut self) -> Result<Option<Bytes>, UploadError> {
        self.field.chunk().await.map_err(map_multer_error)
    }

    /// Read and discard the rest of the part.
    pub async fn drain(&mut self) -> Result<(), UploadError> {
        while self.chunk().await?.is_some() {}
        Ok(())
    }
}

pub(crate) struct Tokenizer {
    multipart: multer::Multipart<'static>,
    max_field_size: usize,
    max_files: Option<usize>,
    files_seen: usize,
    files_limit_hit: bool,
}

impl Tokenizer {
    pub fn new(body: BodyTap, boundary: impl Into<String>, options: &UploadOptions) -> Self {
        Self {
            multipart: multer::Multipart::new(body, boundary),
            max_field_size: options.max_field_size,
            max_files: options.max_files,
            files_seen: 0,
            files_limit_hit: false,
        }
    }

    /// Next event, or `None` at the end of the multipart body.
    pub async fn next_event(&mut self) -> Result<Option<Event>, UploadError> {
        loop {
            let Some(mut field) = self.multipart.next_field().await.map_err(map_multer_error)? else {
                return Ok(None);
            };
            let name = field.name().unwrap_or_default().to_owned();

            let Some(filename) = field.file_name().map(str::to_owned) else {
                let (value, truncated) = self.read_value(&mut field).await?;
                return Ok(Some(Event::Field {
                    name,
                    value,
                    truncated,
                }));
            };

            self.files_seen += 1;
            if let Some(max) = self.max_files {
                if self.files_seen > max {
                    FilePart { field }.drain().await?;
                    if self.files_limit_hit {
                        continue;
                    }
                    self.files_limit_hit = true;
                    return Ok(Some(Event::FilesLimit));
                }
            }

            let meta = FileMeta {
                filename,
                mimetype: field
                    .content_type()
                    .map(|mime| mime.to_string())
                    .unwrap_or_else(|| DEFAULT_MIMETYPE.to_string()),
                encoding: field
                    .headers()
                    .get("content-transfer-encoding")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or(DEFAULT_ENCODING)
                    .to_string(),
            };
            return Ok(Some(Event::File {
                name,
                meta,
                part: FilePart { field },
            }));
        }
    }

    async fn read_value(&self, field: &mut multer::Field<'static>) -> Result<(Bytes, bool), UploadError> {
        let mut value = BytesMut::new();
        let mut truncated = false;
        while let Some(chunk) = field.chunk().await.map_err(map_multer_error)? {
            if truncated {
                continue;
            }
            let room = self.max_field_size - value.len();
            if chunk.len() > room {
                value.extend_from_slice(&chunk[..room]);
                truncated = true;
            } else {
                value.extend_from_slice(&chunk);
            }
        }
        Ok((value.freeze(), truncated))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(parts: Vec<&'static str>) -> BodyStream {
        Box::pin(futures_util::stream::iter(
            parts.into_iter().map(|p| Ok::<_, BoxError>(Bytes::from(p))),
        ))
    }

    const BODY: &str = "--X\r\n\
        Content-Disposition: form-data; name=\"operations\"\r\n\r\n\
        {\"query\":\"q\"}\r\n\
        --X\r\n\
        Content-Disposition: form-data; name=\"0\"; filename=\"a.txt\"\r\n\
        Content-Type: text/plain\r\n\r\n\
        hello\r\n\
        --X--\r\n";

    #[tokio::test]
    async fn emits_field_then_file() {
        let tap = BodyTap::new(body(vec![BODY]));
        let mut tokenizer = Tokenizer::new(tap.clone(), "X", &UploadOptions::default());

        match tokenizer.next_event().await.unwrap() {
            Some(Event::Field { name, value, truncated }) => {
                assert_eq!(name, "operations");
                assert_eq!(value, "{\"query\":\"q\"}");
                assert!(!truncated);
            }
            _ => panic!("expected field event"),
        }

        match tokenizer.next_event().await.unwrap() {
            Some(Event::File { name, meta, mut part }) => {
                assert_eq!(name, "0");
                assert_eq!(meta.filename, "a.txt");
                assert_eq!(meta.mimetype, "text/plain");
                assert_eq!(meta.encoding, "7bit");
                assert_eq!(part.chunk().await.unwrap().unwrap(), "hello");
            }
            _ => panic!("expected file event"),
        }

        assert!(tokenizer.next_event().await.unwrap().is_none());
        assert!(tap.ended());
    }

    #[tokio::test]
    async fn truncates_oversized_fields() {
        let tap = BodyTap::new(body(vec![BODY]));
        let options = UploadOptions::default().with_max_field_size(4);
        let mut tokenizer = Tokenizer::new(tap, "X", &options);

        match tokenizer.next_event().await.unwrap() {
            Some(Event::Field { value, truncated, .. }) => {
                assert_eq!(value, "{\"qu");
                assert!(truncated);
            }
            _ => panic!("expected field event"),
        }
    }

    #[tokio::test]
    async fn files_limit_is_reported_once() {
        let tap = BodyTap::new(body(vec![BODY]));
        let options = UploadOptions::default().with_max_files(0);
        let mut tokenizer = Tokenizer::new(tap, "X", &options);

        assert!(matches!(tokenizer.next_event().await.unwrap(), Some(Event::Field { .. })));
        assert!(matches!(tokenizer.next_event().await.unwrap(), Some(Event::FilesLimit)));
        assert!(tokenizer.next_event().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn premature_end_is_a_disconnect() {
        let cut = &BODY[..BODY.len() - 10];
        let tap = BodyTap::new(body(vec![cut]));
        let mut tokenizer = Tokenizer::new(tap, "X", &UploadOptions::default());

        assert!(matches!(tokenizer.next_event().await.unwrap(), Some(Event::Field { .. })));
        let err = match tokenizer.next_event().await {
            Ok(Some(Event::File { mut part, .. })) => part.drain().await.unwrap_err(),
            Ok(_) => panic!("expected file event"),
            Err(e) => e,
        };
        assert_eq!(err, UploadError::Disconnected);
    }

    #[tokio::test]
    async fn tap_stops_after_error() {
        let items: Vec<Result<Bytes, BoxError>> = vec![
            Ok(Bytes::from("a")),
            Err("connection reset".into()),
            Ok(Bytes::from("never")),
        ];
        let mut tap = BodyTap::new(Box::pin(futures_util::stream::iter(items)));

        assert_eq!(tap.next().await.unwrap().unwrap(), "a");
        assert!(tap.next().await.unwrap().is_err());
        assert!(tap.next().await.is_none());
        assert!(!tap.ended());
    }

    #[tokio::test]
    async fn drain_counts_remaining_bytes() {
        let mut tap = BodyTap::new(body(vec!["abc", "de"]));
        assert_eq!(tap.drain().await, 5);
        assert!(tap.ended());
    }
}
