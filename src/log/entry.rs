use chrono::{DateTime, Utc};

use super::Level;
use crate::tags::Fields;

/// A single log event as seen by formatters and hooks
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub time: DateTime<Utc>,
    pub level: Level,
    pub message: String,
    /// Name of the logger that produced the entry
    pub logger: Option<String>,
    pub fields: Fields,
}

impl Entry {
    pub fn new(level: Level, message: impl Into<String>) -> Self {
        Entry {
            time: Utc::now(),
            level,
            message: message.into(),
            logger: None,
            fields: Fields::new(),
        }
    }

    pub fn with_fields(mut self, fields: Fields) -> Self {
        self.fields.extend(fields);
        self
    }
}
