//! The extractor contract and its adapters.
//!
//! An extractor turns `(mode, scope)` into a lazy, finite, one-pass stream
//! of raw records. It may fail mid-stream; records already yielded stay
//! usable.

mod http;
mod jsonl;

use std::path::Path;
use std::sync::Arc;

use futures::stream::BoxStream;
use serde_json::Value;

use renec_core::config::ExtractorConfig;
use renec_core::{EntityKind, EntityRef, JobMode, RawRecord, Scope};

use crate::error::{ExtractionError, WorkerError};

pub use http::HttpExtractor;
pub use jsonl::JsonlExtractor;

/// Items are records or per-record [`ExtractionError::Malformed`] reports;
/// any other error is the last item of the stream.
pub type RecordStream = BoxStream<'static, Result<RawRecord, ExtractionError>>;

pub trait Extractor: Send + Sync {
    fn name(&self) -> &str;

    /// Start one pass over the source. Dropping the stream stops it.
    fn extract(&self, mode: JobMode, scope: &Scope) -> RecordStream;
}

/// Build the extractor named by `config.kind`.
pub fn from_config(config: &ExtractorConfig, buffer: usize) -> Result<Arc<dyn Extractor>, WorkerError> {
    match config.kind.trim().to_ascii_lowercase().as_str() {
        "jsonl" => Ok(Arc::new(JsonlExtractor::new(&config.dir).with_buffer(buffer))),
        "http" => {
            let url = config
                .url
                .as_deref()
                .ok_or_else(|| WorkerError::Config("EXTRACTOR_URL is required for the http extractor".into()))?;
            Ok(Arc::new(HttpExtractor::new(url).with_buffer(buffer)))
        }
        other => Err(WorkerError::Config(format!("unknown extractor kind '{other}'"))),
    }
}

// ── Line decoding ─────────────────────────────────────────────────

/// Decode one non-blank line. Text that is not JSON at all is fatal for the
/// stream; JSON that does not form a record is [`ExtractionError::Malformed`].
pub(crate) fn decode_line(line: &[u8], path: &Path, line_no: usize) -> Result<RawRecord, ExtractionError> {
    let value: Value = serde_json::from_slice(line).map_err(|e| ExtractionError::Parse {
        path: path.to_path_buf(),
        line: line_no,
        message: e.to_string(),
    })?;
    let entity = entity_hint(&value);
    serde_json::from_value(value).map_err(|e| ExtractionError::Malformed {
        path: path.to_path_buf(),
        line: line_no,
        entity,
        message: e.to_string(),
    })
}

/// Best-effort kind and key of a line that failed to decode.
fn entity_hint(value: &Value) -> Option<EntityRef> {
    let field = |names: &[&str]| names.iter().find_map(|n| value.get(*n)).and_then(Value::as_str);
    let kind: EntityKind = field(&["kind", "entityKind", "entity_kind"])?.parse().ok()?;
    let key = field(&["key", "naturalKey", "natural_key"])
        .map(str::trim)
        .filter(|k| !k.is_empty())?;
    Some(EntityRef::new(kind, key))
}

/// Apply the scope to a decoded line. `Ok(None)` drops it, `Ok(Some(_))`
/// forwards it, `Err` ends the stream.
pub(crate) fn screen(
    decoded: Result<RawRecord, ExtractionError>,
    scope: &Scope,
) -> Result<Option<Result<RawRecord, ExtractionError>>, ExtractionError> {
    match decoded {
        Ok(record) if scope.admits(&record) => Ok(Some(Ok(record))),
        Ok(_) => Ok(None),
        Err(ExtractionError::Malformed { entity: Some(entity), .. })
            if !scope.covers(entity.kind) || (!scope.keys.is_empty() && !scope.keys.contains(&entity.key)) =>
        {
            Ok(None)
        }
        Err(e) if e.is_per_record() => Ok(Some(Err(e))),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn json_that_is_not_a_record_is_per_record() {
        let path = Path::new("a.jsonl");
        let err = decode_line(br#"{"kind":"school","key":"S1"}"#, path, 2).unwrap_err();
        assert!(err.is_per_record());
        assert!(matches!(err, ExtractionError::Malformed { line: 2, entity: None, .. }));

        let err = decode_line(br#"{"kind":"standard","key":"EC0217","attributes":[1]}"#, path, 3).unwrap_err();
        match err {
            ExtractionError::Malformed { entity: Some(entity), .. } => {
                assert_eq!(entity, EntityRef::new(EntityKind::Standard, "EC0217"));
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let err = decode_line(b"{not json", path, 4).unwrap_err();
        assert!(!err.is_per_record());
    }

    #[test]
    fn screen_drops_malformed_records_outside_the_scope() {
        let scope = Scope::kinds([EntityKind::Certifier]);
        let malformed = |entity| ExtractionError::Malformed {
            path: PathBuf::from("a.jsonl"),
            line: 1,
            entity,
            message: "bad".into(),
        };
        let standard = Some(EntityRef::new(EntityKind::Standard, "EC0217"));
        assert!(matches!(screen(Err(malformed(standard)), &scope), Ok(None)));
        assert!(matches!(screen(Err(malformed(None)), &scope), Ok(Some(Err(_)))));
        assert!(screen(Err(ExtractionError::Timeout(1)), &scope).is_err());
    }

    #[test]
    fn builds_extractors_by_kind() {
        let mut config = ExtractorConfig {
            kind: "jsonl".into(),
            dir: PathBuf::from("data/extract"),
            url: None,
        };
        assert_eq!(from_config(&config, 16).unwrap().name(), "jsonl");

        config.kind = "HTTP".into();
        assert!(matches!(from_config(&config, 16), Err(WorkerError::Config(_))));
        config.url = Some("http://localhost:8080".into());
        assert_eq!(from_config(&config, 16).unwrap().name(), "http");

        config.kind = "ftp".into();
        assert!(from_config(&config, 16).is_err());
    }
}
