//! Field classifier: the `operations` → `map` ordering state machine.

use tracing::debug;

use crate::{UploadError, Value};

pub(crate) const OPERATIONS: &str = "operations";
pub(crate) const MAP: &str = "map";

/// Parsed `map` field, entries in document order.
pub(crate) type PathMap = Vec<(String, serde_json::Value)>;

#[derive(Debug)]
enum Stage {
    AwaitingOperations,
    AwaitingMap(Value),
    Ready,
}

/// Outcome of classifying one field event.
#[derive(Debug)]
pub(crate) enum Classified {
    /// The field changed nothing.
    Ignored,
    /// `operations` was parsed and stored.
    Operations,
    /// `map` was parsed; the stored operations are handed over with it.
    Map { operations: Value, map: PathMap },
}

#[derive(Debug)]
pub(crate) struct FieldClassifier {
    stage: Stage,
    max_field_size: usize,
}

impl FieldClassifier {
    pub fn new(max_field_size: usize) -> Self {
        Self {
            stage: Stage::AwaitingOperations,
            max_field_size,
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.stage, Stage::Ready)
    }

    /// The recognized field the classifier still waits for, if any.
    pub fn awaiting(&self) -> Option<&'static str> {
        match self.stage {
            Stage::AwaitingOperations => Some(OPERATIONS),
            Stage::AwaitingMap(_) => Some(MAP),
            Stage::Ready => None,
        }
    }

    pub fn classify(&mut self, name: &str, value: &[u8], truncated: bool) -> Result<Classified, UploadError> {
        if name != OPERATIONS && name != MAP {
            debug!(field = name, "ignoring unrecognized multipart field");
            return Ok(Classified::Ignored);
        }
        if self.is_ready() {
            debug!(field = name, "ignoring field after map");
            return Ok(Classified::Ignored);
        }
        if truncated {
            return Err(UploadError::FieldTooLarge {
                field: name.to_string(),
                limit: self.max_field_size,
            });
        }

        match (std::mem::replace(&mut self.stage, Stage::Ready), name) {
            (Stage::AwaitingOperations, OPERATIONS) => {
                let operations = parse_operations(value)?;
                self.stage = Stage::AwaitingMap(operations);
                Ok(Classified::Operations)
            }
            (Stage::AwaitingOperations, _) => Err(UploadError::MisorderedFields(
                "'map' should follow 'operations'",
            )),
            (Stage::AwaitingMap(operations), MAP) => {
                let map = parse_map(value)?;
                Ok(Classified::Map { operations, map })
            }
            (stage, _) => {
                debug!(field = name, "ignoring repeated operations field");
                self.stage = stage;
                Ok(Classified::Ignored)
            }
        }
    }
}

fn parse_json(field: &'static str, value: &[u8]) -> Result<serde_json::Value, UploadError> {
    serde_json::from_slice(value).map_err(|e| UploadError::InvalidJson {
        field,
        reason: e.to_string(),
    })
}

/// `operations` must be an object or an array. `null` and scalars are not.
fn parse_operations(value: &[u8]) -> Result<Value, UploadError> {
    let json = parse_json(OPERATIONS, value)?;
    if !(json.is_object() || json.is_array()) {
        return Err(UploadError::InvalidType {
            field: OPERATIONS,
            expected: "an object or array",
        });
    }
    Ok(Value::from(json))
}

fn parse_map(value: &[u8]) -> Result<PathMap, UploadError> {
    match parse_json(MAP, value)? {
        serde_json::Value::Object(map) => Ok(map.into_iter().collect()),
        _ => Err(UploadError::InvalidType {
            field: MAP,
            expected: "an object",
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OPS: &[u8] = br#"{"query":"q","variables":{"file":null}}"#;

    fn classifier() -> FieldClassifier {
        FieldClassifier::new(1_000)
    }

    #[test]
    fn operations_then_map() {
        let mut c = classifier();
        assert!(matches!(c.classify("operations", OPS, false).unwrap(), Classified::Operations));
        assert_eq!(c.awaiting(), Some("map"));

        match c.classify("map", br#"{"0":["variables.file"]}"#, false).unwrap() {
            Classified::Map { operations, map } => {
                assert!(operations.get("variables.file").is_some());
                assert_eq!(map.len(), 1);
                assert_eq!(map[0].0, "0");
            }
            other => panic!("expected map, got {other:?}"),
        }
        assert!(c.is_ready());
    }

    #[test]
    fn map_before_operations_is_misordered() {
        let err = classifier().classify("map", b"{}", false).unwrap_err();
        assert!(matches!(err, UploadError::MisorderedFields(_)));
        assert_eq!(err.status(), 400);
    }

    #[test]
    fn operations_must_be_json() {
        let err = classifier().classify("operations", b"{not json", false).unwrap_err();
        assert!(matches!(err, UploadError::InvalidJson { field: "operations", .. }));
    }

    #[test]
    fn operations_null_and_scalars_rejected() {
        for value in [&b"null"[..], &b"1"[..], &b"\"text\""[..], &b"true"[..]] {
            let err = classifier().classify("operations", value, false).unwrap_err();
            assert!(matches!(err, UploadError::InvalidType { field: "operations", .. }));
        }
    }

    #[test]
    fn operations_array_accepted() {
        let mut c = classifier();
        assert!(matches!(
            c.classify("operations", br#"[{"query":"a"},{"query":"b"}]"#, false).unwrap(),
            Classified::Operations
        ));
    }

    #[test]
    fn map_must_be_object() {
        let mut c = classifier();
        c.classify("operations", OPS, false).unwrap();
        let err = c.classify("map", br#"[["variables.file"]]"#, false).unwrap_err();
        assert!(matches!(err, UploadError::InvalidType { field: "map", .. }));
    }

    #[test]
    fn truncated_recognized_field_is_413() {
        let err = classifier().classify("operations", OPS, true).unwrap_err();
        assert_eq!(err.status(), 413);
        assert!(err.to_string().contains("1000 byte"));
    }

    #[test]
    fn unrecognized_fields_are_inert() {
        let mut c = classifier();
        assert!(matches!(c.classify("extra", b"x", true).unwrap(), Classified::Ignored));
        assert_eq!(c.awaiting(), Some("operations"));
    }

    #[test]
    fn repeated_operations_is_inert() {
        let mut c = classifier();
        c.classify("operations", OPS, false).unwrap();
        assert!(matches!(c.classify("operations", b"garbage", false).unwrap(), Classified::Ignored));
        assert_eq!(c.awaiting(), Some("map"));
    }

    #[test]
    fn fields_after_ready_are_inert() {
        let mut c = classifier();
        c.classify("operations", OPS, false).unwrap();
        c.classify("map", b"{}", false).unwrap();
        assert!(matches!(c.classify("map", b"garbage", true).unwrap(), Classified::Ignored));
        assert!(matches!(c.classify("operations", b"{}", false).unwrap(), Classified::Ignored));
    }

    #[test]
    fn map_entries_keep_document_order() {
        let mut c = classifier();
        c.classify("operations", OPS, false).unwrap();
        let Classified::Map { map, .. } = c.classify("map", br#"{"2":["a"],"10":["b"],"1":["c"]}"#, false).unwrap() else {
            panic!("expected map");
        };
        let keys: Vec<&str> = map.iter().map(|(key, _)| key.as_str()).collect();
        assert_eq!(keys, ["2", "10", "1"]);
    }
}
