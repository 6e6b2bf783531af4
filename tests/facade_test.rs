//! Logger Facade Tests
//!
//! Exercise the process-wide logger the way applications use it:
//! 1. Replacing the active logger routes functions and macros to it
//! 2. Hooks registered through the facade survive child loggers and swaps
//! 3. Silencing drops output but keeps the configuration
//! 4. Panic recovery reports through the active logger

use parking_lot::Mutex;
use rucksack::log::{self, Entry, Hook, HookError, Level, Logger, LoggerConfig};
use rucksack::Fields;
use std::io;
use std::sync::Arc;

/// The facade is process-wide, tests touching it run one at a time
static FACADE: Mutex<()> = parking_lot::const_mutex(());

#[derive(Clone, Default)]
struct Output(Arc<Mutex<Vec<u8>>>);

impl Output {
    fn lines(&self) -> Vec<serde_json::Value> {
        String::from_utf8_lossy(&self.0.lock())
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }
}

impl io::Write for Output {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

struct Collect {
    levels: Vec<Level>,
    entries: Mutex<Vec<Entry>>,
}

impl Collect {
    fn new(levels: &[Level]) -> Arc<Self> {
        Arc::new(Collect {
            levels: levels.to_vec(),
            entries: Mutex::new(Vec::new()),
        })
    }

    fn messages(&self) -> Vec<String> {
        self.entries.lock().iter().map(|e| e.message.clone()).collect()
    }
}

impl Hook for Collect {
    fn levels(&self) -> &[Level] {
        &self.levels
    }

    fn fire(&self, entry: &Entry) -> Result<(), HookError> {
        self.entries.lock().push(entry.clone());
        Ok(())
    }
}

fn install(level: Level) -> Output {
    let output = Output::default();
    let mut fields = Fields::new();
    fields.insert("service".into(), "checkout".into());
    log::replace(
        Logger::new(LoggerConfig {
            name: Some("facade".into()),
            level,
            fields,
        })
        .with_output(output.clone()),
    );
    output
}

// ============================================================================
// Test 1: Functions and macros
// ============================================================================

#[test]
fn test_functions_and_macros_use_active_logger() {
    let _guard = FACADE.lock();
    let output = install(Level::Debug);

    log::info("plain info");
    log::print("printed");
    rucksack::warn!(attempt = 2, "retrying {}", "upstream");
    rucksack::debug!("details");
    log::with_field("request", "r-9").error("request failed");

    let lines = output.lines();
    assert_eq!(lines.len(), 5);
    assert_eq!(lines[0]["msg"], "plain info");
    assert_eq!(lines[0]["service"], "checkout");
    assert_eq!(lines[1]["level"], "info");
    assert_eq!(lines[2]["msg"], "retrying upstream");
    assert_eq!(lines[2]["level"], "warning");
    assert_eq!(lines[2]["attempt"], 2);
    assert_eq!(lines[3]["level"], "debug");
    assert_eq!(lines[4]["request"], "r-9");
    assert_eq!(lines[4]["logger"], "facade");

    log::sync().unwrap();
    println!("✓ facade functions and macros routed to the active logger");
}

// ============================================================================
// Test 2: Hooks
// ============================================================================

#[test]
fn test_hooks_follow_children_and_swaps() {
    let _guard = FACADE.lock();
    install(Level::Info);

    let hook = Collect::new(&[Level::Error, Level::Warn]);
    log::add_hook(hook.clone());

    log::info("ignored");
    log::warn("first");
    log::with_fields(Fields::new()).error("from child");

    let replacement = Output::default();
    log::set_output(replacement.clone());
    log::set_formatter(log::JsonFormatter);
    log::error("after swap");

    assert_eq!(hook.messages(), vec!["first", "from child", "after swap"]);
    assert_eq!(replacement.lines().len(), 1);

    log::close().unwrap();
    log::error("after close");
    assert_eq!(hook.messages().len(), 3);
}

// ============================================================================
// Test 3: Silence
// ============================================================================

#[test]
fn test_silence_drops_output() {
    let _guard = FACADE.lock();
    let output = install(Level::Info);

    log::info("before");
    log::silence();
    log::error("after");
    rucksack::error!("after, formatted {}", 1);

    assert_eq!(output.lines().len(), 1);
    assert!(log::current().is_silent());
    assert_eq!(log::current().name(), Some("facade"));
}

// ============================================================================
// Test 4: Panic recovery
// ============================================================================

#[test]
fn test_error_on_panic_reports_through_facade() {
    let _guard = FACADE.lock();
    let output = install(Level::Info);

    let value = log::error_on_panic(|| 5);
    assert_eq!(value, Some(5));

    let value: Option<()> = log::error_on_panic(|| panic!("worker crashed"));
    assert_eq!(value, None);

    let lines = output.lines();
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0]["level"], "error");
    assert!(lines[0]["msg"]
        .as_str()
        .unwrap()
        .starts_with("panic: worker crashed\n\n"));
}
