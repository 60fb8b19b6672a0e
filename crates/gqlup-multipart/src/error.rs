//! Error types for multipart request processing.

use thiserror::Error;

/// Result type alias for upload processing.
pub type UploadResult<T> = Result<T, UploadError>;

/// Errors raised while turning a multipart body into operations and files.
///
/// The type is `Clone` because a single terminal error is handed to the
/// overall result and to every placeholder still pending at abort time.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UploadError {
    #[error("The '{field}' multipart field value exceeds the {limit} byte size limit.")]
    FieldTooLarge { field: String, limit: usize },

    #[error("Invalid JSON in the '{field}' multipart field: {reason}")]
    InvalidJson { field: &'static str, reason: String },

    #[error("Invalid type for the '{field}' multipart field, expected {expected}.")]
    InvalidType {
        field: &'static str,
        expected: &'static str,
    },

    #[error("Misordered multipart fields; {0}.")]
    MisorderedFields(&'static str),

    #[error("Missing multipart field '{0}'.")]
    MissingField(&'static str),

    #[error("Invalid type for the 'map' multipart field entry key '{key}' array.")]
    InvalidMapEntry { key: String },

    #[error("Invalid type for the 'map' multipart field entry key '{key}' array index '{index}' value.")]
    InvalidMapEntryValue { key: String, index: usize },

    #[error(
        "Invalid object path for the 'map' multipart field entry key '{key}' array index '{index}' value '{path}': {reason}."
    )]
    InvalidPath {
        key: String,
        index: usize,
        path: String,
        reason: String,
    },

    #[error("{limit} max file uploads exceeded.")]
    TooManyFiles { limit: usize },

    #[error("File truncated as it exceeds the {limit} byte size limit.")]
    FileTooLarge { limit: u64 },

    #[error("File missing in the request.")]
    FileMissing,

    #[error("Malformed multipart body: {0}")]
    Malformed(String),

    #[error("Request disconnected during file upload stream parsing.")]
    Disconnected,

    #[error("File upload stream was interrupted before it completed.")]
    Interrupted,

    #[error("File resources were released after the response finished.")]
    Released,
}

impl UploadError {
    /// HTTP status code for this error.
    ///
    /// 499 is the non-standard "client closed request" code.
    pub fn status(&self) -> u16 {
        match self {
            Self::FieldTooLarge { .. } | Self::TooManyFiles { .. } | Self::FileTooLarge { .. } => {
                413
            }
            Self::Disconnected | Self::Interrupted => 499,
            Self::Released => 500,
            _ => 400,
        }
    }

    /// Whether the client abandoned the request rather than sending bad input.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, Self::Disconnected | Self::Interrupted)
    }
}

pub(crate) fn map_multer_error(err: multer::Error) -> UploadError {
    match err {
        multer::Error::StreamReadFailed(_)
        | multer::Error::IncompleteStream
        | multer::Error::IncompleteFieldData { .. }
        | multer::Error::IncompleteHeaders => UploadError::Disconnected,
        other => UploadError::Malformed(other.to_string()),
    }
}
