//! Kernel-print-style logging for the dispatcher.
//!
//! Environment variables:
//! - `PSG_LOG_LEVEL=<level>` — off, error, warn, info, debug, trace (or 0-5).
//! - `PSG_LOG_FLUSH=1` — flush stderr after every line.
//!
//! Output: `[LEVEL] [req:<id>] message`, where `req:-` means the log call
//! happened outside any request context.

use crate::env::env_get_bool;
use std::cell::Cell;
use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Off = 0,
    Error = 1,
    Warn = 2,
    Info = 3,
    Debug = 4,
    Trace = 5,
}

impl LogLevel {
    fn prefix(self) -> &'static str {
        match self {
            LogLevel::Off => "",
            LogLevel::Error => "[ERROR]",
            LogLevel::Warn => "[WARN] ",
            LogLevel::Info => "[INFO] ",
            LogLevel::Debug => "[DEBUG]",
            LogLevel::Trace => "[TRACE]",
        }
    }
}

static FLUSH_ENABLED: AtomicBool = AtomicBool::new(false);
static LOG_LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Info as u8);
static INITIALIZED: AtomicBool = AtomicBool::new(false);

fn init() {
    if INITIALIZED.swap(true, Ordering::SeqCst) {
        return;
    }
    FLUSH_ENABLED.store(env_get_bool("PSG_LOG_FLUSH", false), Ordering::Relaxed);
    if let Ok(val) = std::env::var("PSG_LOG_LEVEL") {
        let level = match val.to_lowercase().as_str() {
            "off" | "0" => LogLevel::Off,
            "error" | "1" => LogLevel::Error,
            "warn" | "2" => LogLevel::Warn,
            "info" | "3" => LogLevel::Info,
            "debug" | "4" => LogLevel::Debug,
            "trace" | "5" => LogLevel::Trace,
            _ => LogLevel::Info,
        };
        LOG_LEVEL.store(level as u8, Ordering::Relaxed);
    }
}

#[inline]
pub fn set_log_level(level: LogLevel) {
    LOG_LEVEL.store(level as u8, Ordering::Relaxed);
    INITIALIZED.store(true, Ordering::Relaxed);
}

#[inline]
fn level_enabled(level: LogLevel) -> bool {
    if !INITIALIZED.load(Ordering::Relaxed) {
        init();
    }
    (level as u8) <= LOG_LEVEL.load(Ordering::Relaxed)
}

#[inline]
fn flush_enabled() -> bool {
    if !INITIALIZED.load(Ordering::Relaxed) {
        init();
    }
    FLUSH_ENABLED.load(Ordering::Relaxed)
}

thread_local! {
    static CURRENT_REQUEST: Cell<u64> = const { Cell::new(0) };
}

/// Bind the current thread's log context to a request id for the
/// duration of the call stack that processes it.
pub fn set_request_context(request_id: u64) {
    CURRENT_REQUEST.with(|c| c.set(request_id));
}

pub fn clear_request_context() {
    CURRENT_REQUEST.with(|c| c.set(0));
}

fn format_context() -> String {
    let id = CURRENT_REQUEST.with(|c| c.get());
    if id == 0 {
        "[req:-]".to_string()
    } else {
        format!("[req:{}]", id)
    }
}

#[doc(hidden)]
pub fn _dlog_impl(level: LogLevel, args: std::fmt::Arguments<'_>) {
    if !level_enabled(level) {
        return;
    }
    let stderr = std::io::stderr();
    let mut handle = stderr.lock();
    let _ = write!(handle, "{} {} ", level.prefix(), format_context());
    let _ = handle.write_fmt(args);
    let _ = handle.write_all(b"\n");
    if flush_enabled() {
        let _ = handle.flush();
    }
}

#[macro_export]
macro_rules! dlog_error {
    ($($arg:tt)*) => {{
        $crate::log::_dlog_impl($crate::log::LogLevel::Error, format_args!($($arg)*));
    }};
}

#[macro_export]
macro_rules! dlog_warn {
    ($($arg:tt)*) => {{
        $crate::log::_dlog_impl($crate::log::LogLevel::Warn, format_args!($($arg)*));
    }};
}

#[macro_export]
macro_rules! dlog_debug {
    ($($arg:tt)*) => {{
        $crate::log::_dlog_impl($crate::log::LogLevel::Debug, format_args!($($arg)*));
    }};
}

#[macro_export]
macro_rules! dlog_trace {
    ($($arg:tt)*) => {{
        $crate::log::_dlog_impl($crate::log::LogLevel::Trace, format_args!($($arg)*));
    }};
}
