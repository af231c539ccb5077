use std::fs;
use std::path::Path;

use chrono::NaiveDateTime;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::error::RecordError;

/// A Google Takeout JSON sidecar. Only the fields the organizer needs are kept.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataRecord {
    #[serde(default, deserialize_with = "text")]
    pub title: Option<String>,
    #[serde(default)]
    pub photo_taken_time: Option<TimeField>,
    #[serde(default)]
    pub creation_time: Option<TimeField>,
    #[serde(default, deserialize_with = "truthy")]
    pub archived: bool,
    #[serde(default, deserialize_with = "truthy")]
    pub trashed: bool,
}

/// `{"timestamp": "1593864000", "formatted": "..."}`; Takeout writes the
/// timestamp as a string, hand-edited files sometimes as a number.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TimeField {
    #[serde(default)]
    pub timestamp: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Normal,
    Archived,
    Trashed,
}

/// Flags are "present and true": booleans, non-zero numbers and the string "true".
fn truthy<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Bool(b) => b,
        Value::Number(n) => n.as_f64().map_or(false, |n| n != 0.0),
        Value::String(s) => s.eq_ignore_ascii_case("true"),
        _ => false,
    })
}

/// Only a JSON string counts; any other value reads as absent.
fn text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => Some(s),
        _ => None,
    })
}

fn epoch_seconds(value: &Value) -> Option<i64> {
    match value {
        Value::String(s) => s.trim().parse::<i64>().ok(),
        Value::Number(n) => n.as_i64(),
        _ => None,
    }
}

impl MetadataRecord {
    pub fn parse(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }

    /// Capture-time fields in order of preference; the first present one wins.
    fn capture_fields(&self) -> [(&'static str, Option<&TimeField>); 2] {
        [
            ("photoTakenTime", self.photo_taken_time.as_ref()),
            ("creationTime", self.creation_time.as_ref()),
        ]
    }

    /// Resolve the capture instant as a local calendar time.
    pub fn capture_instant(&self, metadata_path: &Path) -> Result<NaiveDateTime, RecordError> {
        let (field, time) = self
            .capture_fields()
            .into_iter()
            .find_map(|(name, field)| field.map(|f| (name, f)))
            .ok_or_else(|| RecordError::MissingTimestamp {
                metadata: metadata_path.to_path_buf(),
            })?;

        let invalid = || RecordError::InvalidTimestamp {
            metadata: metadata_path.to_path_buf(),
            field,
            value: time
                .timestamp
                .as_ref()
                .map_or_else(|| "null".to_string(), |v| v.to_string()),
        };

        let epoch = time.timestamp.as_ref().and_then(epoch_seconds).ok_or_else(invalid)?;
        let utc = chrono::DateTime::from_timestamp(epoch, 0).ok_or_else(invalid)?;
        Ok(utc.with_timezone(&chrono::Local).naive_local())
    }

    pub fn disposition(&self) -> Disposition {
        if self.trashed {
            Disposition::Trashed
        } else if self.archived {
            Disposition::Archived
        } else {
            Disposition::Normal
        }
    }
}

/// Read and parse one metadata file.
pub fn read_record(path: &Path) -> Result<MetadataRecord, RecordError> {
    let bytes = fs::read(path).map_err(|source| RecordError::Unreadable {
        path: path.to_path_buf(),
        source,
    })?;
    MetadataRecord::parse(&bytes).map_err(|source| RecordError::Malformed {
        metadata: path.to_path_buf(),
        source,
    })
}
