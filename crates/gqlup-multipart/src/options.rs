//! Processing limits.

use serde::{Deserialize, Serialize};

/// Default maximum byte size of a non-file field.
pub const DEFAULT_MAX_FIELD_SIZE: usize = 1_000_000;

/// Limits applied while processing one multipart request.
///
/// Loadable from a TOML `[uploads]` table; every key is optional.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadOptions {
    /// Maximum bytes of the `operations`, `map` and other non-file fields.
    pub max_field_size: usize,
    /// Maximum bytes per file. `None` means unbounded.
    pub max_file_size: Option<u64>,
    /// Maximum number of files, also capping the number of `map` entries.
    /// `None` means unbounded.
    pub max_files: Option<usize>,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            max_field_size: DEFAULT_MAX_FIELD_SIZE,
            max_file_size: None,
            max_files: None,
        }
    }
}

impl UploadOptions {
    pub fn with_max_field_size(mut self, bytes: usize) -> Self {
        self.max_field_size = bytes;
        self
    }

    pub fn with_max_file_size(mut self, bytes: u64) -> Self {
        self.max_file_size = Some(bytes);
        self
    }

    pub fn with_max_files(mut self, count: usize) -> Self {
        self.max_files = Some(count);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let options = UploadOptions::default();
        assert_eq!(options.max_field_size, 1_000_000);
        assert_eq!(options.max_file_size, None);
        assert_eq!(options.max_files, None);
    }

    #[test]
    fn parse_partial_toml() {
        let options: UploadOptions = toml::from_str("max_files = 3\n").unwrap();
        assert_eq!(options.max_files, Some(3));
        assert_eq!(options.max_field_size, DEFAULT_MAX_FIELD_SIZE);
    }

    #[test]
    fn builders_set_limits() {
        let options = UploadOptions::default()
            .with_max_field_size(10)
            .with_max_file_size(20)
            .with_max_files(2);
        assert_eq!(options.max_field_size, 10);
        assert_eq!(options.max_file_size, Some(20));
        assert_eq!(options.max_files, Some(2));
    }
}
