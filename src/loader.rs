use crate::data::Record;
use crate::error::CatalogError;
use serde_json::Value;
use std::fs;
use std::io::Cursor;
use std::path::Path;
use tracing::{info, warn};
use zstd::stream::decode_all;

/// Reads a catalog file: a JSON array of record objects, optionally zstd-compressed
/// (`.zst` extension).
///
/// Array elements that are not objects are skipped with a warning.
pub fn load_catalog(path: impl AsRef<Path>) -> Result<Vec<Record>, CatalogError> {
    let path = path.as_ref();
    let io_error = |source| CatalogError::Io {
        path: path.to_path_buf(),
        source,
    };
    let mut bytes = fs::read(path).map_err(io_error)?;
    if path.extension().is_some_and(|ext| ext == "zst") {
        bytes = decode_all(Cursor::new(bytes)).map_err(io_error)?;
    }
    let document: Value = serde_json::from_slice(&bytes).map_err(|source| CatalogError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    let Value::Array(elements) = document else {
        return Err(CatalogError::NotAnArray {
            path: path.to_path_buf(),
        });
    };

    let mut skipped = 0usize;
    let records: Vec<Record> = elements
        .into_iter()
        .enumerate()
        .filter_map(|(position, element)| match element {
            Value::Object(fields) => Some(Record::from(fields)),
            other => {
                skipped += 1;
                warn!(position, kind = json_kind(&other), "Skipping non-object catalog entry");
                None
            }
        })
        .collect();
    info!(path = %path.display(), records = records.len(), skipped, "Loaded catalog");
    Ok(records)
}

/// Like [`load_catalog`], but a failure is logged and yields an empty catalog.
pub fn load_catalog_or_empty(path: impl AsRef<Path>) -> Vec<Record> {
    match load_catalog(path) {
        Ok(records) => records,
        Err(err) => {
            warn!(error = %err, "Catalog unavailable; starting with an empty catalog");
            Vec::new()
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;
    use tempfile::{Builder, NamedTempFile};

    fn write_json(contents: &str) -> NamedTempFile {
        let mut file = Builder::new().suffix(".json").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn loads_records_and_skips_non_objects() {
        let file = write_json(
            r#"[
                {"Name": "Paracet 500", "MRP": "20", "Pack": "10 tablets"},
                "stray string",
                42,
                {"Name": 7, "Composition": "Zinc (10mg)"}
            ]"#,
        );
        let records = load_catalog(file.path()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].name.as_deref(), Some("Paracet 500"));
        assert_eq!(records[0].extra.get("Pack"), Some(&json!("10 tablets")));
        assert!(records[1].name.is_none());
        assert_eq!(records[1].extra.get("Name"), Some(&json!(7)));
    }

    #[test]
    fn reads_zstd_compressed_catalogs() {
        let payload = br#"[{"Name": "Dolo 650", "Prescription": "No"}]"#;
        let compressed = zstd::stream::encode_all(&payload[..], 3).unwrap();
        let mut file = Builder::new().suffix(".json.zst").tempfile().unwrap();
        file.write_all(&compressed).unwrap();
        let records = load_catalog(file.path()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].prescription.as_deref(), Some("No"));
    }

    #[test]
    fn rejects_non_array_documents() {
        let file = write_json(r#"{"Name": "Solo"}"#);
        assert!(matches!(
            load_catalog(file.path()),
            Err(CatalogError::NotAnArray { .. })
        ));
        let broken = write_json("[{");
        assert!(matches!(
            load_catalog(broken.path()),
            Err(CatalogError::Json { .. })
        ));
    }

    #[test]
    fn missing_file_degrades_to_empty() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("medicines.json");
        assert!(matches!(load_catalog(&missing), Err(CatalogError::Io { .. })));
        assert!(load_catalog_or_empty(&missing).is_empty());
    }
}
