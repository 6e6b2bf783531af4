//! Google Cloud Logging Formatter
//!
//! ```rust,ignore
//! rucksack::log::set_formatter(rucksack::log::gcloud::CloudFormatter);
//! ```

use chrono::SecondsFormat;
use serde::Serialize;

use super::{Entry, FormatError, Formatter};
use crate::tags::{Fields, Value};

/// Formats entries as Cloud Logging structured payloads
#[derive(Debug, Clone, Copy, Default)]
pub struct CloudFormatter;

#[derive(Serialize)]
struct LoggingEntry<'a> {
    timestamp: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    severity: String,
    #[serde(rename = "textPayload", skip_serializing_if = "str::is_empty")]
    payload: &'a str,
    #[serde(skip_serializing_if = "Fields::is_empty")]
    labels: Fields,
}

impl Formatter for CloudFormatter {
    fn format(&self, entry: &Entry) -> Result<Vec<u8>, FormatError> {
        let labels = entry
            .fields
            .iter()
            .map(|(key, value)| {
                let value = match value {
                    Value::Error(msg) => Value::Str(msg.clone()),
                    other => other.clone(),
                };
                (key.clone(), value)
            })
            .collect();

        let mut line = serde_json::to_vec(&LoggingEntry {
            timestamp: entry.time.to_rfc3339_opts(SecondsFormat::AutoSi, true),
            severity: entry.level.as_str().to_uppercase(),
            payload: &entry.message,
            labels,
        })?;
        line.push(b'\n');
        Ok(line)
    }
}
