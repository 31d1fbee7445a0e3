// Low-latency logger
//
// Logging overhead on the hot path must be minimal:
// 1. Lock-free hand-off using an SPSC queue
// 2. Lazy formatting - string formatting happens on the background thread
//    for the static-message variants
// 3. Background I/O - actual writes happen off the critical path
//
// The logger is a process-wide singleton: initialize once at startup with
// `init`, tear down implicitly at exit. Components access it through
// `logger()` or the log_* macros.

use crate::lf_queue::LFQueue;
use crate::time::{now_nanos, Nanos};

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::thread::{self, JoinHandle};

/// Log severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug = 0,
    Info = 1,
    Warn = 2,
    Error = 3,
}

impl LogLevel {
    /// Returns the string representation of the log level
    #[inline]
    pub const fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        }
    }

    /// Parses a level name (case-insensitive)
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "debug" => Some(LogLevel::Debug),
            "info" => Some(LogLevel::Info),
            "warn" => Some(LogLevel::Warn),
            "error" => Some(LogLevel::Error),
            _ => None,
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Log message payload.
///
/// Most hot-path messages are static strings with an optional numeric
/// value; deferring their formatting to the background thread keeps the
/// producing thread allocation-free.
pub enum LogMessage {
    /// A static string message (zero allocation)
    Static(&'static str),
    /// A static message with an i64 value (formatting deferred)
    StaticWithI64(&'static str, i64),
    /// A static message with a u64 value (formatting deferred)
    StaticWithU64(&'static str, u64),
    /// A pre-formatted string (rare cases where allocation is unavoidable)
    Formatted(String),
}

impl LogMessage {
    /// Format the message to the provided writer
    #[inline]
    fn write_to<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        match self {
            LogMessage::Static(s) => write!(writer, "{}", s),
            LogMessage::StaticWithI64(s, v) => write!(writer, "{}: {}", s, v),
            LogMessage::StaticWithU64(s, v) => write!(writer, "{}: {}", s, v),
            LogMessage::Formatted(s) => write!(writer, "{}", s),
        }
    }
}

/// A single log entry
pub struct LogEntry {
    /// Timestamp when the log was created
    pub timestamp: Nanos,
    /// Severity level
    pub level: LogLevel,
    /// The message content
    pub message: LogMessage,
}

/// Shared state between Logger and background thread
struct LoggerShared {
    /// The lock-free queue for passing log entries to the background thread
    queue: LFQueue<LogEntry, 4096>,
    /// The queue is SPSC but the process-wide logger is called from every
    /// worker thread; producers serialize on this before pushing. The
    /// consumer side stays lock-free.
    push_lock: Mutex<()>,
    /// Flag to signal the background thread to stop
    running: AtomicBool,
    /// Flag to signal a flush is requested
    flush_requested: AtomicBool,
    /// Flag to signal flush is complete
    flush_complete: AtomicBool,
}

impl LoggerShared {
    #[inline]
    fn push(&self, entry: LogEntry) {
        let _guard = self.push_lock.lock().unwrap_or_else(|e| e.into_inner());
        // If the queue is full the entry is dropped rather than blocking
        // the producing thread
        let _ = self.queue.push(entry);
    }
}

/// Low-latency logger that offloads I/O to a background thread
pub struct Logger {
    /// Shared state with background thread
    shared: Arc<LoggerShared>,
    /// Handle to the background writer thread
    writer_thread: Option<JoinHandle<()>>,
    /// Minimum log level to record
    min_level: LogLevel,
}

impl Logger {
    /// Creates a new Logger with a background writer thread writing
    /// formatted entries to stderr.
    pub fn new() -> Self {
        Self::with_level(LogLevel::Info)
    }

    /// Creates a new Logger with a specified minimum log level
    pub fn with_level(min_level: LogLevel) -> Self {
        let shared = Arc::new(LoggerShared {
            queue: LFQueue::new(),
            push_lock: Mutex::new(()),
            running: AtomicBool::new(true),
            flush_requested: AtomicBool::new(false),
            flush_complete: AtomicBool::new(false),
        });

        let shared_clone = Arc::clone(&shared);
        let writer_thread = thread::Builder::new()
            .name("logger".to_string())
            .spawn(move || {
                Self::writer_loop(shared_clone);
            })
            .expect("failed to spawn logger thread");

        Self {
            shared,
            writer_thread: Some(writer_thread),
            min_level,
        }
    }

    /// Background thread main loop
    fn writer_loop(shared: Arc<LoggerShared>) {
        let mut stderr = std::io::stderr().lock();
        let mut idle_count = 0u32;

        while shared.running.load(Ordering::Relaxed) {
            let mut processed = 0;

            while let Some(entry) = shared.queue.pop() {
                Self::write_entry(&mut stderr, &entry);
                processed += 1;
            }

            if shared.flush_requested.load(Ordering::Acquire) {
                let _ = stderr.flush();
                shared.flush_complete.store(true, Ordering::Release);
            }

            if processed > 0 {
                idle_count = 0;
            } else {
                idle_count = idle_count.saturating_add(1);

                // Progressive backoff to reduce CPU usage when idle:
                // spin first, then yield, then sleep briefly.
                if idle_count < 100 {
                    std::hint::spin_loop();
                } else if idle_count < 1100 {
                    thread::yield_now();
                } else {
                    thread::sleep(std::time::Duration::from_micros(100));
                }
            }
        }

        // Drain remaining entries before exiting
        while let Some(entry) = shared.queue.pop() {
            Self::write_entry(&mut stderr, &entry);
        }
        let _ = stderr.flush();
    }

    /// Write a single log entry to the writer
    #[inline]
    fn write_entry<W: Write>(writer: &mut W, entry: &LogEntry) {
        // Format: [timestamp_ns] LEVEL message
        let _ = write!(
            writer,
            "[{:016}] {:5} ",
            entry.timestamp.as_u64(),
            entry.level.as_str()
        );
        let _ = entry.message.write_to(writer);
        let _ = writeln!(writer);
    }

    /// Log a static message.
    ///
    /// This is the fastest logging path - no allocation, no formatting.
    #[inline]
    pub fn log(&self, level: LogLevel, msg: &'static str) {
        if level < self.min_level {
            return;
        }

        let entry = LogEntry {
            timestamp: now_nanos(),
            level,
            message: LogMessage::Static(msg),
        };

        self.shared.push(entry);
    }

    /// Log a static message with an i64 value (formatting deferred)
    #[inline]
    pub fn log_with_i64(&self, level: LogLevel, msg: &'static str, value: i64) {
        if level < self.min_level {
            return;
        }

        let entry = LogEntry {
            timestamp: now_nanos(),
            level,
            message: LogMessage::StaticWithI64(msg, value),
        };

        self.shared.push(entry);
    }

    /// Log a static message with a u64 value (formatting deferred)
    #[inline]
    pub fn log_with_u64(&self, level: LogLevel, msg: &'static str, value: u64) {
        if level < self.min_level {
            return;
        }

        let entry = LogEntry {
            timestamp: now_nanos(),
            level,
            message: LogMessage::StaticWithU64(msg, value),
        };

        self.shared.push(entry);
    }

    /// Log a pre-formatted message.
    ///
    /// Allocates on the calling thread; reserve for cold paths.
    #[inline]
    pub fn log_formatted(&self, level: LogLevel, msg: String) {
        if level < self.min_level {
            return;
        }

        let entry = LogEntry {
            timestamp: now_nanos(),
            level,
            message: LogMessage::Formatted(msg),
        };

        self.shared.push(entry);
    }

    /// Flush all pending log entries.
    ///
    /// Blocks until all queued entries have been written.
    pub fn flush(&self) {
        self.shared.flush_complete.store(false, Ordering::Release);
        self.shared.flush_requested.store(true, Ordering::Release);

        while !self.shared.flush_complete.load(Ordering::Acquire) {
            if self.shared.queue.is_empty() {
                std::hint::spin_loop();
            } else {
                thread::yield_now();
            }
        }

        self.shared.flush_requested.store(false, Ordering::Release);
    }

    /// Returns the current queue length
    #[inline]
    pub fn queue_len(&self) -> usize {
        self.shared.queue.len()
    }

    /// Get the current minimum log level
    #[inline]
    pub fn level(&self) -> LogLevel {
        self.min_level
    }
}

impl Default for Logger {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Logger {
    fn drop(&mut self) {
        self.shared.running.store(false, Ordering::Release);

        if let Some(handle) = self.writer_thread.take() {
            let _ = handle.join();
        }
    }
}

/// The process-wide logger instance
static LOGGER: OnceLock<Logger> = OnceLock::new();

/// Initializes the global logger with the given minimum level.
///
/// Returns false if the logger was already initialized (the existing
/// instance and its level are kept).
pub fn init(min_level: LogLevel) -> bool {
    LOGGER.set(Logger::with_level(min_level)).is_ok()
}

/// Returns the global logger, initializing it at Info level on first use
pub fn logger() -> &'static Logger {
    LOGGER.get_or_init(Logger::new)
}

// Convenience macros routing through the global logger

/// Log a debug message
#[macro_export]
macro_rules! log_debug {
    ($msg:literal) => {
        $crate::logging::logger().log($crate::logging::LogLevel::Debug, $msg)
    };
    ($($arg:tt)*) => {
        $crate::logging::logger().log_formatted($crate::logging::LogLevel::Debug, format!($($arg)*))
    };
}

/// Log an info message
#[macro_export]
macro_rules! log_info {
    ($msg:literal) => {
        $crate::logging::logger().log($crate::logging::LogLevel::Info, $msg)
    };
    ($($arg:tt)*) => {
        $crate::logging::logger().log_formatted($crate::logging::LogLevel::Info, format!($($arg)*))
    };
}

/// Log a warning message
#[macro_export]
macro_rules! log_warn {
    ($msg:literal) => {
        $crate::logging::logger().log($crate::logging::LogLevel::Warn, $msg)
    };
    ($($arg:tt)*) => {
        $crate::logging::logger().log_formatted($crate::logging::LogLevel::Warn, format!($($arg)*))
    };
}

/// Log an error message
#[macro_export]
macro_rules! log_error {
    ($msg:literal) => {
        $crate::logging::logger().log($crate::logging::LogLevel::Error, $msg)
    };
    ($($arg:tt)*) => {
        $crate::logging::logger().log_formatted($crate::logging::LogLevel::Error, format!($($arg)*))
    };
}

/// Report a fatal invariant violation: log it, flush, and panic.
///
/// The binary installs a panic hook that terminates the process with
/// exit code 2, so the core never continues in an inconsistent state.
#[macro_export]
macro_rules! fatal {
    ($($arg:tt)*) => {{
        let msg = format!($($arg)*);
        $crate::logging::logger().log_formatted($crate::logging::LogLevel::Error, msg.clone());
        $crate::logging::logger().flush();
        panic!("{}", msg);
    }};
}
