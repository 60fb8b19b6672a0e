//! In-memory spool for uploaded file bytes.
//!
//! A file part is copied into a [`Spool`] as it streams in. Any number of
//! [`SpoolReader`]s can be opened afterwards (or concurrently), each one
//! starting at byte 0 and waiting for more data while the writer is live.
//! Chunks are kept as reference-counted `Bytes`, so handing a chunk to a
//! reader never copies it.

use std::sync::{Arc, Mutex};

use bytes::{Bytes, BytesMut};
use futures_util::Stream;
use tokio::sync::watch;

use crate::UploadError;

#[derive(Default)]
struct SpoolInner {
    chunks: Vec<Bytes>,
    len: u64,
    finished: bool,
    error: Option<UploadError>,
    released: bool,
}

struct SpoolShared {
    inner: Mutex<SpoolInner>,
    /// Bumped on every state change so waiting readers re-check.
    changed: watch::Sender<u64>,
}

impl SpoolShared {
    fn notify(&self) {
        self.changed.send_modify(|generation| *generation += 1);
    }
}

/// Read side of a spooled file. Cheap to clone.
#[derive(Clone)]
pub struct Spool {
    shared: Arc<SpoolShared>,
}

/// Write side of a spooled file. Exactly one exists per spool.
///
/// Dropping the writer before [`finish`](SpoolWriter::finish) fails the
/// spool with [`UploadError::Interrupted`], so readers never wait forever.
pub struct SpoolWriter {
    shared: Arc<SpoolShared>,
    done: bool,
}

impl Spool {
    /// Create an empty spool and its writer.
    pub fn open() -> (Spool, SpoolWriter) {
        let (changed, _) = watch::channel(0);
        let shared = Arc::new(SpoolShared {
            inner: Mutex::new(SpoolInner::default()),
            changed,
        });
        (
            Spool {
                shared: shared.clone(),
            },
            SpoolWriter { shared, done: false },
        )
    }

    /// Open a reader positioned at the start of the file.
    pub fn reader(&self) -> SpoolReader {
        SpoolReader {
            shared: self.shared.clone(),
            rx: self.shared.changed.subscribe(),
            next: 0,
            done: false,
        }
    }

    /// Bytes written so far.
    pub fn len(&self) -> u64 {
        self.shared.inner.lock().expect("spool lock").len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the writer completed without error.
    pub fn is_finished(&self) -> bool {
        self.shared.inner.lock().expect("spool lock").finished
    }

    /// The failure recorded by the writer side, if any.
    pub fn error(&self) -> Option<UploadError> {
        self.shared.inner.lock().expect("spool lock").error.clone()
    }

    pub fn is_released(&self) -> bool {
        self.shared.inner.lock().expect("spool lock").released
    }

    /// Free the buffered bytes. Later writes and reads fail.
    pub fn release(&self) {
        {
            let mut inner = self.shared.inner.lock().expect("spool lock");
            if inner.released {
                return;
            }
            inner.released = true;
            inner.chunks = Vec::new();
        }
        self.shared.notify();
    }
}

impl SpoolWriter {
    /// Append a chunk.
    pub fn write(&mut self, chunk: Bytes) -> Result<(), UploadError> {
        {
            let mut inner = self.shared.inner.lock().expect("spool lock");
            if inner.released {
                return Err(UploadError::Released);
            }
            if let Some(err) = &inner.error {
                return Err(err.clone());
            }
            inner.len += chunk.len() as u64;
            inner.chunks.push(chunk);
        }
        self.shared.notify();
        Ok(())
    }

    /// Mark the file complete.
    pub fn finish(mut self) {
        self.done = true;
        self.shared.inner.lock().expect("spool lock").finished = true;
        self.shared.notify();
    }

    /// Fail the spool and drop its bytes. The first recorded error wins.
    pub fn fail(&mut self, err: UploadError) {
        self.done = true;
        {
            let mut inner = self.shared.inner.lock().expect("spool lock");
            if inner.error.is_none() {
                inner.error = Some(err);
            }
            inner.chunks = Vec::new();
        }
        self.shared.notify();
    }
}

impl Drop for SpoolWriter {
    fn drop(&mut self) {
        if !self.done {
            self.fail(UploadError::Interrupted);
        }
    }
}

/// An independent read cursor over a spool.
pub struct SpoolReader {
    shared: Arc<SpoolShared>,
    rx: watch::Receiver<u64>,
    next: usize,
    done: bool,
}

impl std::fmt::Debug for SpoolReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpoolReader")
            .field("next", &self.next)
            .field("done", &self.done)
            .finish_non_exhaustive()
    }
}

impl SpoolReader {
    /// Next chunk, waiting for the writer if needed.
    ///
    /// Returns `None` once every byte of a finished file was yielded.
    /// A failure or release is yielded once, then the reader ends.
    pub async fn next_chunk(&mut self) -> Option<Result<Bytes, UploadError>> {
        loop {
            if self.done {
                return None;
            }
            self.rx.borrow_and_update();
            {
                let inner = self.shared.inner.lock().expect("spool lock");
                if let Some(err) = &inner.error {
                    self.done = true;
                    return Some(Err(err.clone()));
                }
                if inner.released {
                    self.done = true;
                    return Some(Err(UploadError::Released));
                }
                if let Some(chunk) = inner.chunks.get(self.next) {
                    self.next += 1;
                    return Some(Ok(chunk.clone()));
                }
                if inner.finished {
                    self.done = true;
                    return None;
                }
            }
            if self.rx.changed().await.is_err() {
                // The sender lives in `shared`, which this reader keeps alive.
                self.done = true;
                return Some(Err(UploadError::Interrupted));
            }
        }
    }

    /// Read the whole file into one buffer.
    pub async fn read_to_end(&mut self) -> Result<Bytes, UploadError> {
        let mut buf = BytesMut::new();
        while let Some(chunk) = self.next_chunk().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(buf.freeze())
    }

    /// Convert into a `Stream` of chunks.
    pub fn into_stream(self) -> impl Stream<Item = Result<Bytes, UploadError>> + Send {
        futures_util::stream::unfold(self, |mut reader| async move {
            let item = reader.next_chunk().await?;
            Some((item, reader))
        })
    }
}
