//! Map & path binder: creates placeholders and writes them into operations.

use tracing::debug;

use crate::classifier::PathMap;
use crate::exit::PlaceholderTable;
use crate::{Upload, UploadError, Value};

/// Bind every `map` entry into `operations`.
///
/// Placeholders are added to `table` as they are created, so on failure
/// the caller still holds the ones made so far and can reject them.
pub(crate) fn bind(
    operations: &mut Value,
    map: PathMap,
    max_files: Option<usize>,
    table: &mut PlaceholderTable,
) -> Result<(), UploadError> {
    if let Some(limit) = max_files {
        if map.len() > limit {
            return Err(UploadError::TooManyFiles { limit });
        }
    }

    for (key, paths) in map {
        let paths = match paths {
            serde_json::Value::Array(paths) if !paths.is_empty() => paths,
            _ => return Err(UploadError::InvalidMapEntry { key }),
        };

        let upload = table.entry(key.clone()).or_insert_with(Upload::new).clone();
        for (index, path) in paths.iter().enumerate() {
            let Some(path) = path.as_str() else {
                return Err(UploadError::InvalidMapEntryValue { key, index });
            };
            operations
                .set(path, Value::Upload(upload.clone()))
                .map_err(|e| UploadError::InvalidPath {
                    key: key.clone(),
                    index,
                    path: path.to_string(),
                    reason: e.to_string(),
                })?;
        }
        debug!(field = %key, paths = paths.len(), "bound upload placeholder");
    }
    Ok(())
}
