//! Log Entry Formatters
//!
//! A formatter turns an [`Entry`] into one output line. The JSON formatter is
//! used for named or tagged (production) loggers, the text formatter for
//! everything else.

use chrono::SecondsFormat;
use serde_json::{Map, Value as Json};
use std::fmt::Write as _;

use super::Entry;
use crate::tags::Value;

/// Error raised when an entry cannot be serialized
#[derive(Debug, thiserror::Error)]
pub enum FormatError {
    #[error("failed to marshal fields to JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Serializes log entries into output bytes
pub trait Formatter: Send + Sync {
    fn format(&self, entry: &Entry) -> Result<Vec<u8>, FormatError>;
}

const TIME_KEY: &str = "time";
const LEVEL_KEY: &str = "level";
const MESSAGE_KEY: &str = "msg";
const LOGGER_KEY: &str = "logger";

/// One JSON object per line
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonFormatter;

impl Formatter for JsonFormatter {
    fn format(&self, entry: &Entry) -> Result<Vec<u8>, FormatError> {
        let mut object = Map::with_capacity(entry.fields.len() + 4);
        for (key, value) in &entry.fields {
            let key = match key.as_str() {
                TIME_KEY | LEVEL_KEY | MESSAGE_KEY | LOGGER_KEY => format!("fields.{}", key),
                _ => key.clone(),
            };
            object.insert(key, serde_json::to_value(value)?);
        }

        object.insert(
            TIME_KEY.into(),
            Json::String(entry.time.to_rfc3339_opts(SecondsFormat::Millis, true)),
        );
        object.insert(LEVEL_KEY.into(), Json::String(entry.level.as_str().into()));
        object.insert(MESSAGE_KEY.into(), Json::String(entry.message.clone()));
        if let Some(name) = &entry.logger {
            object.insert(LOGGER_KEY.into(), Json::String(name.clone()));
        }

        let mut line = serde_json::to_vec(&object)?;
        line.push(b'\n');
        Ok(line)
    }
}

/// Human readable `time LEVEL name: message k=v` lines
#[derive(Debug, Clone, Copy, Default)]
pub struct TextFormatter;

impl Formatter for TextFormatter {
    fn format(&self, entry: &Entry) -> Result<Vec<u8>, FormatError> {
        let mut line = format!(
            "{} {:<7} ",
            entry.time.to_rfc3339_opts(SecondsFormat::Millis, true),
            entry.level.as_str().to_uppercase()
        );
        if let Some(name) = &entry.logger {
            line.push_str(name);
            line.push_str(": ");
        }
        line.push_str(&entry.message);

        for (key, value) in &entry.fields {
            match value {
                Value::Str(s) | Value::Error(s) if needs_quoting(s) => {
                    let _ = write!(line, " {}={:?}", key, s);
                }
                _ => {
                    let _ = write!(line, " {}={}", key, value);
                }
            }
        }
        line.push('\n');
        Ok(line.into_bytes())
    }
}

fn needs_quoting(s: &str) -> bool {
    s.is_empty() || s.chars().any(|c| c.is_whitespace() || c == '=' || c == '"')
}
