//! File router: matches file parts to placeholders and spools their bytes.
//!
//! Failures local to one file (size limit, spool write) are recorded on
//! that file's spool only; they never reach the request-wide exit path.
//! Readers see them lazily through [`FileUpload::create_read_stream`].
//!
//! [`FileUpload::create_read_stream`]: crate::FileUpload::create_read_stream

use tracing::{debug, warn};

use crate::exit::RequestState;
use crate::spool::{Spool, SpoolWriter};
use crate::tokenizer::FilePart;
use crate::upload::{FileMeta, FileUpload};
use crate::UploadError;

/// Route one file part.
///
/// Returns `Err` only for request-fatal conditions: a file before `map`,
/// or a tokenizer failure while reading the part.
pub(crate) async fn route_file(
    state: &RequestState,
    name: &str,
    meta: FileMeta,
    mut part: FilePart,
    max_file_size: Option<u64>,
) -> Result<(), UploadError> {
    let upload = match state.placeholder(name) {
        None => {
            part.drain().await?;
            return Err(UploadError::MisorderedFields("files should follow 'map'"));
        }
        Some(None) => {
            debug!(field = name, "draining unmapped file");
            return part.drain().await;
        }
        Some(Some(upload)) => upload,
    };

    let (spool, writer) = Spool::open();
    let file = FileUpload::new(meta, spool.clone(), state.exit_state().clone());
    if !upload.resolve(file) {
        debug!(field = name, "draining file for an already settled upload");
        return part.drain().await;
    }
    // Checked after resolving, so a concurrent release sweep either sees
    // this file or this check sees the release.
    if state.exit_state().is_released() {
        debug!(field = name, "file arrived after the response finished");
        spool.release();
    } else {
        debug!(field = name, "file upload started");
    }

    copy_into_spool(name, &mut part, writer, max_file_size).await
}

async fn copy_into_spool(
    name: &str,
    part: &mut FilePart,
    mut writer: SpoolWriter,
    max_file_size: Option<u64>,
) -> Result<(), UploadError> {
    let mut received = 0u64;
    loop {
        let chunk = match part.chunk().await {
            Ok(Some(chunk)) => chunk,
            Ok(None) => {
                debug!(field = name, bytes = received, "file upload finished");
                writer.finish();
                return Ok(());
            }
            Err(err) => {
                // The tokenizer is broken too; the caller exits with `err`.
                writer.fail(err.clone());
                return Err(err);
            }
        };

        received += chunk.len() as u64;
        if let Some(limit) = max_file_size {
            if received > limit {
                warn!(field = name, limit, "file exceeds size limit");
                writer.fail(UploadError::FileTooLarge { limit });
                return part.drain().await;
            }
        }

        if let Err(err) = writer.write(chunk) {
            debug!(field = name, error = %err, "spool rejected write, draining file");
            writer.fail(err);
            return part.drain().await;
        }
    }
}
