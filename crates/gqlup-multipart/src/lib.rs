//! gqlup multipart engine.
//!
//! Turns one `multipart/form-data` request body that follows the GraphQL
//! multipart request convention into an operations document plus one
//! lazily resolving [`Upload`] per file.
//!
//! # Request shape
//!
//! ```text
//! operations  {"query": "...", "variables": {"file": null}}
//! map         {"0": ["variables.file"]}
//! 0           <file bytes>
//! ```
//!
//! Field order is enforced: `operations`, then `map`, then files. The
//! operations future resolves as soon as `map` is bound; every file
//! placeholder then settles on its own as its part streams in.
//!
//! # Failure isolation
//!
//! Request-level failures (ordering, malformed JSON, bad paths, field or
//! file-count limits, client disconnect) go through one single-shot exit
//! path that rejects the operations future and every placeholder still
//! pending. A file that breaks its own size limit only fails that file:
//! its placeholder still resolves, and reading it returns the error.
//!
//! # Example
//!
//! ```no_run
//! # async fn handle(body: impl futures_util::Stream<Item = Result<bytes::Bytes, std::io::Error>> + Send + 'static) -> Result<(), gqlup_multipart::UploadError> {
//! use gqlup_multipart::{process_request, UploadOptions};
//!
//! let (operations, lifecycle) = process_request(body, "boundary", UploadOptions::default());
//! let operations = operations.await?;
//! for (path, upload) in operations.uploads() {
//!     let file = upload.file().await?;
//!     let bytes = file.create_read_stream()?.read_to_end().await?;
//!     println!("{path}: {} ({} bytes)", file.filename, bytes.len());
//! }
//! lifecycle.response_finished();
//! # Ok(())
//! # }
//! ```

mod binder;
mod classifier;
mod error;
mod exit;
mod lifecycle;
mod options;
mod process;
mod router;
mod spool;
mod tokenizer;
mod upload;
mod value;

pub use error::{UploadError, UploadResult};
pub use lifecycle::RequestLifecycle;
pub use options::{UploadOptions, DEFAULT_MAX_FIELD_SIZE};
pub use process::{process_request, PendingOperations};
pub use spool::{Spool, SpoolReader, SpoolWriter};
pub use tokenizer::BoxError;
pub use upload::{FileMeta, FileUpload, Upload};
pub use value::{PathError, Value};
