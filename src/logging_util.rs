//! Logger initialization and in-memory log capture for tests.
//!
//! Production code just calls [`steady_logger::initialize`] (or
//! `init_logging` from the crate root) once. Tests that assert on log
//! output hold a [`steady_logger::LogCaptureGuard`]; while it lives, every
//! log record is also copied into a per-test buffer that the
//! [`assert_in_logs!`] macro inspects.

use std::collections::HashMap;
use std::error::Error;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, ThreadId};

use flexi_logger::writers::LogWriter;
use flexi_logger::{DeferredNow, Duplicate, LogSpecBuilder, Logger, LoggerHandle, WriteMode};
use lazy_static::lazy_static;
use log::{LevelFilter, Record};

/// Capture state of one test thread.
#[derive(Clone)]
pub struct TestCaptureState {
    is_capturing: Arc<AtomicBool>,
    pub log_buffer: Arc<Mutex<Vec<String>>>, // pub for the macro
}

lazy_static! {
    /// Active capture buffers, keyed by the test's thread id.
    pub static ref TEST_CONTEXTS: Mutex<HashMap<ThreadId, TestCaptureState>> =
        Mutex::new(HashMap::new()); // pub for the macro
}

/// Writer that mirrors every record into all active capture buffers.
struct CaptureWriter;

fn capture_format(
    w: &mut dyn io::Write,
    _now: &mut DeferredNow,
    record: &Record,
) -> io::Result<()> {
    write!(w, "{} [{}] {}", record.level(), record.target(), record.args())
}

impl LogWriter for CaptureWriter {
    fn write(&self, now: &mut DeferredNow, record: &Record) -> io::Result<()> {
        let mut line = Vec::new();
        capture_format(&mut line, now, record)?;
        let line = String::from_utf8_lossy(&line).into_owned();
        if let Ok(contexts) = TEST_CONTEXTS.lock() {
            for state in contexts.values() {
                if state.is_capturing.load(Ordering::SeqCst) {
                    if let Ok(mut buffer) = state.log_buffer.lock() {
                        buffer.push(line.clone());
                    }
                }
            }
        }
        Ok(())
    }

    fn flush(&self) -> io::Result<()> {
        Ok(())
    }

    fn max_log_level(&self) -> LevelFilter {
        LevelFilter::max()
    }
}

fn start_logger(level: LevelFilter) -> Result<LoggerHandle, Box<dyn Error>> {
    let spec = LogSpecBuilder::new().default(level).build();
    Logger::with(spec)
        .log_to_writer(Box::new(CaptureWriter))
        .duplicate_to_stderr(Duplicate::All)
        .format(capture_format)
        .write_mode(WriteMode::Direct)
        .start()
        .map_err(|e| Box::new(e) as Box<dyn Error>)
}

/// Global logger management: idempotent initialization, runtime level
/// changes and per-test capture guards.
pub mod steady_logger {
    use super::*;

    lazy_static! {
        static ref LOGGER_HANDLE: Mutex<Option<LoggerHandle>> = Mutex::new(None);
    }

    /// Stops capture for its thread when dropped.
    pub struct LogCaptureGuard {
        thread_id: ThreadId,
    }

    impl Drop for LogCaptureGuard {
        fn drop(&mut self) {
            if let Ok(mut contexts) = TEST_CONTEXTS.lock() {
                if let Some(state) = contexts.remove(&self.thread_id) {
                    state.is_capturing.store(false, Ordering::SeqCst);
                }
            }
        }
    }

    /// Registers a capture buffer for the current thread and makes sure the
    /// logger exists. Intended for tests.
    pub fn start_log_capture() -> LogCaptureGuard {
        let thread_id = thread::current().id();
        let _ = initialize();
        let state = TestCaptureState {
            is_capturing: Arc::new(AtomicBool::new(true)),
            log_buffer: Arc::new(Mutex::new(Vec::new())),
        };
        if let Ok(mut contexts) = TEST_CONTEXTS.lock() {
            contexts.insert(thread_id, state);
        }
        LogCaptureGuard { thread_id }
    }

    /// Starts the logger at `Info` if nobody did yet. Safe to call often.
    pub fn initialize() -> Result<(), Box<dyn Error>> {
        initialize_with_level(LevelFilter::Info)
    }

    /// Starts the logger at `level`, or adjusts the level of the already
    /// running one.
    pub fn initialize_with_level(level: LevelFilter) -> Result<(), Box<dyn Error>> {
        let mut handle = LOGGER_HANDLE.lock().map_err(|_| "logger lock poisoned")?;
        match handle.as_ref() {
            Some(running) => {
                running.set_new_spec(LogSpecBuilder::new().default(level).build());
            }
            None => {
                *handle = Some(start_logger(level)?);
            }
        }
        Ok(())
    }
}

/// Asserts that each of the given texts appears, in order, somewhere in the
/// logs captured on the current thread. Prints the captured lines before
/// panicking so a failing test is debuggable.
#[macro_export]
macro_rules! assert_in_logs {
    ($texts:expr) => {{
        // give any in-flight log writes a moment to land
        std::thread::sleep(std::time::Duration::from_millis(10));

        let thread_id = std::thread::current().id();
        let captured: Vec<String> = $crate::logging_util::TEST_CONTEXTS
            .lock()
            .ok()
            .and_then(|contexts| {
                contexts
                    .get(&thread_id)
                    .and_then(|state| state.log_buffer.lock().ok().map(|b| b.clone()))
            })
            .unwrap_or_default();

        let texts = $texts;
        let mut matched = 0;
        for line in captured.iter() {
            if matched < texts.len() && line.contains(texts[matched]) {
                matched += 1;
            }
        }
        if matched < texts.len() {
            for (i, line) in captured.iter().enumerate() {
                eprintln!("[{}]: {}", i, line);
            }
            panic!(
                "Assertion failed at {}:{}: expected texts {:?} in logs {:?}",
                file!(),
                line!(),
                texts,
                captured
            );
        }
    }};
}

#[cfg(test)]
mod tests {
    use super::*;
    #[allow(unused_imports)]
    use log::*;

    #[test]
    fn capture_sees_logs_emitted_on_this_thread() {
        let _guard = steady_logger::start_log_capture();
        info!("capture probe line 12345");
        assert_in_logs!(["capture probe line 12345"]);
    }

    #[test]
    fn initialize_is_idempotent() {
        assert!(steady_logger::initialize().is_ok());
        assert!(steady_logger::initialize().is_ok());
        assert!(steady_logger::initialize_with_level(LevelFilter::Debug).is_ok());
    }
}
