//! Reading and writing playlist files.
//!
//! A playlist file holds either a single record object or an array of them.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use std::fs;
use std::path::Path;

use backbeat_core::{Error, PlaylistRecord, Result};
use serde_json::Value;
use tracing::{debug, info};

/// Write `records` to `path`, as a bare object when there is exactly one.
pub fn write_records(path: &Path, records: &[PlaylistRecord]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let json = match records {
        [single] => serde_json::to_string_pretty(single)?,
        many => serde_json::to_string_pretty(many)?,
    };
    fs::write(path, json)?;
    info!("Wrote {} playlist(s) to {}", records.len(), path.display());
    Ok(())
}

/// Read every record in `path`.
///
/// A file that is not JSON at all fails as a whole; individual records that
/// are malformed come back as `Err` entries so callers can skip them.
pub fn read_records(path: &Path) -> Result<Vec<Result<PlaylistRecord>>> {
    let text = fs::read_to_string(path)?;
    let value: Value = serde_json::from_str(&text)
        .map_err(|e| Error::MalformedData(format!("{}: {e}", path.display())))?;

    let records = match value {
        Value::Array(items) => items.into_iter().map(PlaylistRecord::from_value).collect(),
        single @ Value::Object(_) => vec![PlaylistRecord::from_value(single)],
        other => {
            return Err(Error::MalformedData(format!(
                "{}: expected a playlist object or array, found {}",
                path.display(),
                json_kind(&other)
            )));
        }
    };
    debug!("Read playlist file {}", path.display());
    Ok(records)
}

const fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
