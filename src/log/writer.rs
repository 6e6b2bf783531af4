use std::io;

use super::{Level, Logger};

/// An `io::Write` that turns every complete line into a log entry.
///
/// Anything left without a trailing newline is logged when the writer is
/// dropped.
pub struct LineWriter {
    logger: Logger,
    level: Level,
    buf: Vec<u8>,
}

impl LineWriter {
    pub(crate) fn new(logger: Logger, level: Level) -> Self {
        let level = match level {
            Level::Warn | Level::Error => level,
            _ => Level::Info,
        };
        LineWriter {
            logger,
            level,
            buf: Vec::new(),
        }
    }

    pub fn level(&self) -> Level {
        self.level
    }

    fn emit(&self, line: &[u8]) {
        let line = String::from_utf8_lossy(line);
        self.logger.log(self.level, line.trim_end_matches('\r'));
    }
}

impl io::Write for LineWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(data);
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            self.emit(&line[..pos]);
        }
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for LineWriter {
    fn drop(&mut self) {
        if !self.buf.is_empty() {
            let rest = std::mem::take(&mut self.buf);
            self.emit(&rest);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::testing::RecordingHook;
    use crate::log::LoggerConfig;
    use crate::tags::{Fields, Value};
    use std::io::Write;
    use std::sync::Arc;

    fn logger() -> (Logger, Arc<RecordingHook>) {
        let logger = Logger::new(LoggerConfig {
            level: Level::Debug,
            ..Default::default()
        })
        .with_output(io::sink());
        let hook = Arc::new(RecordingHook::new(&Level::ALL));
        logger.add_hook(hook.clone());
        (logger, hook)
    }

    #[test]
    fn test_logs_complete_lines() {
        let (logger, hook) = logger();
        let mut fields = Fields::new();
        fields.insert("source".into(), "child".into());

        let mut writer = logger.writer(Level::Warn, fields);
        writer.write_all(b"first line\nsecond ").unwrap();
        assert_eq!(hook.entries().len(), 1);

        writer.write_all(b"line\r\nthird").unwrap();
        drop(writer);

        let entries = hook.entries();
        let messages: Vec<_> = entries.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, ["first line", "second line", "third"]);
        assert!(entries.iter().all(|e| e.level == Level::Warn));
        assert_eq!(entries[0].fields["source"], Value::Str("child".into()));
    }

    #[test]
    fn test_unsupported_levels_log_at_info() {
        let (logger, hook) = logger();
        let mut writer = logger.writer(Level::Debug, Fields::new());
        assert_eq!(writer.level(), Level::Info);

        writeln!(writer, "hello").unwrap();
        assert_eq!(hook.entries()[0].level, Level::Info);
    }
}
