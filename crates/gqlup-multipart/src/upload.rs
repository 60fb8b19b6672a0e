//! Upload placeholders and resolved file handles.

use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;

use crate::exit::ExitState;
use crate::spool::{Spool, SpoolReader};
use crate::UploadError;

type Settled = Option<Result<FileUpload, UploadError>>;

/// A file promised by the `map` field that may not have arrived yet.
///
/// Clones share the same one-shot cell: every path that `map` bound to
/// the same field name holds the same placeholder. The cell settles
/// exactly once, either with a [`FileUpload`] or with an error.
#[derive(Clone)]
pub struct Upload {
    slot: Arc<watch::Sender<Settled>>,
}

impl Upload {
    pub(crate) fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { slot: Arc::new(tx) }
    }

    /// Settle with a file. Returns `false` if already settled.
    pub(crate) fn resolve(&self, file: FileUpload) -> bool {
        self.settle(Ok(file))
    }

    /// Settle with an error. Returns `false` if already settled.
    pub(crate) fn reject(&self, err: UploadError) -> bool {
        self.settle(Err(err))
    }

    fn settle(&self, outcome: Result<FileUpload, UploadError>) -> bool {
        self.slot.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(outcome);
            true
        })
    }

    pub fn is_settled(&self) -> bool {
        self.slot.borrow().is_some()
    }

    /// Whether the placeholder resolved with a file.
    pub fn is_resolved(&self) -> bool {
        matches!(*self.slot.borrow(), Some(Ok(_)))
    }

    /// The outcome, if settled, without waiting.
    pub fn try_file(&self) -> Option<Result<FileUpload, UploadError>> {
        self.slot.borrow().clone()
    }

    /// Wait for the file to start streaming, or for the upload to fail.
    pub async fn file(&self) -> Result<FileUpload, UploadError> {
        let mut rx = self.slot.subscribe();
        loop {
            let current = rx.borrow_and_update().clone();
            if let Some(outcome) = current {
                return outcome;
            }
            if rx.changed().await.is_err() {
                // `self` owns the sender, so the channel cannot close here.
                return Err(UploadError::Interrupted);
            }
        }
    }

    /// Whether both handles refer to the same placeholder.
    pub fn same_as(&self, other: &Upload) -> bool {
        Arc::ptr_eq(&self.slot, &other.slot)
    }
}

impl fmt::Debug for Upload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &*self.slot.borrow() {
            None => "pending",
            Some(Ok(_)) => "resolved",
            Some(Err(_)) => "rejected",
        };
        f.debug_struct("Upload").field("state", &state).finish()
    }
}

/// A file part that started streaming.
///
/// `filename`, `mimetype` and `encoding` come from the part headers and
/// are client-supplied; do not trust them.
#[derive(Clone)]
pub struct FileUpload {
    pub filename: String,
    pub mimetype: String,
    pub encoding: String,
    spool: Spool,
    exit: Arc<ExitState>,
}

impl FileUpload {
    pub(crate) fn new(meta: FileMeta, spool: Spool, exit: Arc<ExitState>) -> Self {
        Self {
            filename: meta.filename,
            mimetype: meta.mimetype,
            encoding: meta.encoding,
            spool,
            exit,
        }
    }

    /// Open a fresh reader over the file bytes.
    ///
    /// Fails with the file's own error (e.g. size limit) if one was
    /// recorded, and with the request's terminal error once the response
    /// finished and the bytes were released.
    pub fn create_read_stream(&self) -> Result<SpoolReader, UploadError> {
        if let Some(err) = self.spool.error() {
            return Err(err);
        }
        if self.exit.is_released() {
            return Err(self.exit.error().unwrap_or(UploadError::Released));
        }
        Ok(self.spool.reader())
    }

    /// Bytes received so far.
    pub fn received(&self) -> u64 {
        self.spool.len()
    }

    pub(crate) fn spool(&self) -> &Spool {
        &self.spool
    }
}

impl fmt::Debug for FileUpload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileUpload")
            .field("filename", &self.filename)
            .field("mimetype", &self.mimetype)
            .field("encoding", &self.encoding)
            .finish()
    }
}

/// Part header metadata of a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMeta {
    pub filename: String,
    pub mimetype: String,
    pub encoding: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn meta() -> FileMeta {
        FileMeta {
            filename: "a.txt".into(),
            mimetype: "text/plain".into(),
            encoding: "7bit".into(),
        }
    }

    fn file_with(bytes: &'static str) -> (FileUpload, Arc<ExitState>) {
        let exit = Arc::new(ExitState::new());
        let (spool, mut writer) = Spool::open();
        writer.write(Bytes::from(bytes)).unwrap();
        writer.finish();
        (FileUpload::new(meta(), spool, exit.clone()), exit)
    }

    #[tokio::test]
    async fn resolves_exactly_once() {
        let upload = Upload::new();
        let (file, _exit) = file_with("x");

        assert!(upload.resolve(file.clone()));
        assert!(!upload.resolve(file));
        assert!(!upload.reject(UploadError::FileMissing));

        let got = upload.file().await.unwrap();
        assert_eq!(got.filename, "a.txt");
        assert!(upload.is_resolved());
    }

    #[tokio::test]
    async fn reject_wins_when_first() {
        let upload = Upload::new();
        assert!(upload.reject(UploadError::Disconnected));
        let (file, _exit) = file_with("x");
        assert!(!upload.resolve(file));
        assert_eq!(upload.file().await.unwrap_err(), UploadError::Disconnected);
    }

    #[tokio::test]
    async fn waiter_wakes_on_settle() {
        let upload = Upload::new();
        let waiter = upload.clone();
        let task = tokio::spawn(async move { waiter.file().await.map(|f| f.filename) });

        tokio::task::yield_now().await;
        assert!(!upload.is_settled());
        let (file, _exit) = file_with("x");
        upload.resolve(file);

        assert_eq!(task.await.unwrap().unwrap(), "a.txt");
    }

    #[test]
    fn clones_share_the_cell() {
        let upload = Upload::new();
        let other = upload.clone();
        assert!(upload.same_as(&other));
        assert!(!upload.same_as(&Upload::new()));
        other.reject(UploadError::FileMissing);
        assert!(upload.is_settled());
        assert!(format!("{upload:?}").contains("rejected"));
    }

    #[tokio::test]
    async fn read_stream_reads_spooled_bytes() {
        let (file, _exit) = file_with("hello");
        let body = file.create_read_stream().unwrap().read_to_end().await.unwrap();
        assert_eq!(body, "hello");
        assert_eq!(file.received(), 5);
    }

    #[test]
    fn read_stream_fails_after_release() {
        let (file, exit) = file_with("hello");
        exit.mark_released();
        assert_eq!(file.create_read_stream().unwrap_err(), UploadError::Released);

        exit.record(UploadError::Disconnected);
        assert_eq!(file.create_read_stream().unwrap_err(), UploadError::Disconnected);
    }

    #[test]
    fn file_error_takes_precedence() {
        let exit = Arc::new(ExitState::new());
        let (spool, mut writer) = Spool::open();
        writer.fail(UploadError::FileTooLarge { limit: 1 });
        exit.mark_released();
        let file = FileUpload::new(meta(), spool, exit);
        assert_eq!(
            file.create_read_stream().unwrap_err(),
            UploadError::FileTooLarge { limit: 1 }
        );
    }
}
