use super::{Entry, FormatError, Level};

/// Error returned by hooks
#[derive(Debug, thiserror::Error)]
pub enum HookError {
    #[error(transparent)]
    Format(#[from] FormatError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("producer error: {0}")]
    Producer(#[from] super::kafka::ProducerError),
}

/// A callback invoked synchronously on every entry at one of its levels.
///
/// Hooks are registered on a logger's shared hook list, so child loggers and
/// loggers derived with a new formatter or output keep firing them.
pub trait Hook: Send + Sync {
    /// Levels this hook fires for
    fn levels(&self) -> &[Level];

    fn fire(&self, entry: &Entry) -> Result<(), HookError>;

    /// Drains anything the hook buffers
    fn flush(&self) -> Result<(), HookError> {
        Ok(())
    }

    /// Releases the hook; called once on logger shutdown
    fn close(&self) -> Result<(), HookError> {
        self.flush()
    }
}
