//! Structured, `no_std`-safe diagnostic logging.
//!
//! Mirrors the donor crate's queued `LogMessage` design: every log call
//! formats into a bounded `heapless::String`, is stamped with a monotonic
//! timestamp and module path, and is pushed onto a fixed-capacity queue for
//! later draining by whatever transport the target build wires up (UART,
//! USB, or nothing at all on host tests).

use core::fmt::Write;
use heapless::{String, Vec};

pub const MAX_MODULE_NAME_LENGTH: usize = 24;
pub const MAX_MESSAGE_LENGTH: usize = 64;

#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug = 0,
    Info = 1,
    Warn = 2,
    Error = 3,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        }
    }
}

#[derive(Clone, Debug)]
pub struct LogMessage {
    pub timestamp_ms: u32,
    pub level: LogLevel,
    pub module: String<MAX_MODULE_NAME_LENGTH>,
    pub message: String<MAX_MESSAGE_LENGTH>,
}

impl LogMessage {
    pub fn new(timestamp_ms: u32, level: LogLevel, module: &str, message: &str) -> Self {
        let mut module_buf: String<MAX_MODULE_NAME_LENGTH> = String::new();
        let _ = module_buf.push_str(&module[..module.len().min(MAX_MODULE_NAME_LENGTH)]);
        let mut message_buf: String<MAX_MESSAGE_LENGTH> = String::new();
        let _ = message_buf.push_str(&message[..message.len().min(MAX_MESSAGE_LENGTH)]);
        Self {
            timestamp_ms,
            level,
            module: module_buf,
            message: message_buf,
        }
    }
}

/// Fixed-capacity FIFO of pending log messages.
pub struct LogQueue<const N: usize> {
    messages: Vec<LogMessage, N>,
    dropped: u32,
}

impl<const N: usize> LogQueue<N> {
    pub const fn new() -> Self {
        Self {
            messages: Vec::new(),
            dropped: 0,
        }
    }

    pub fn push(&mut self, message: LogMessage) {
        if self.messages.push(message).is_err() {
            self.dropped = self.dropped.saturating_add(1);
        }
    }

    pub fn drain_one(&mut self) -> Option<LogMessage> {
        if self.messages.is_empty() {
            None
        } else {
            Some(self.messages.remove(0))
        }
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn dropped(&self) -> u32 {
        self.dropped
    }
}

/// Runtime-adjustable log level threshold, checked by the logging macros.
pub struct LogConfig {
    max_level: LogLevel,
}

impl LogConfig {
    pub const fn new() -> Self {
        Self {
            max_level: LogLevel::Info,
        }
    }

    pub fn set_max_level(&mut self, level: LogLevel) {
        self.max_level = level;
    }

    pub fn should_log(&self, level: LogLevel) -> bool {
        level >= self.max_level
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Formats and appends a log message onto `queue`, respecting `config`'s
/// threshold. Kept free of any transport concern; callers drain `queue`.
pub fn log_message<const N: usize>(
    queue: &mut LogQueue<N>,
    config: &LogConfig,
    now_ms: u32,
    level: LogLevel,
    module: &str,
    message: &str,
) {
    if config.should_log(level) {
        queue.push(LogMessage::new(now_ms, level, module, message));
    }
}

/// Builds a bounded-length formatted message, used by the `log_*!` macros so
/// call sites can pass `format_args!`-style interpolation without an
/// allocator.
pub fn format_message(args: core::fmt::Arguments) -> String<MAX_MESSAGE_LENGTH> {
    let mut buf: String<MAX_MESSAGE_LENGTH> = String::new();
    let _ = write!(&mut buf, "{args}");
    buf
}

#[macro_export]
macro_rules! log_debug {
    ($queue:expr, $config:expr, $now:expr, $($arg:tt)*) => {
        $crate::logging::log_message(
            $queue, $config, $now, $crate::logging::LogLevel::Debug,
            module_path!(), $crate::logging::format_message(core::format_args!($($arg)*)).as_str(),
        )
    };
}

#[macro_export]
macro_rules! log_info {
    ($queue:expr, $config:expr, $now:expr, $($arg:tt)*) => {
        $crate::logging::log_message(
            $queue, $config, $now, $crate::logging::LogLevel::Info,
            module_path!(), $crate::logging::format_message(core::format_args!($($arg)*)).as_str(),
        )
    };
}

#[macro_export]
macro_rules! log_warn {
    ($queue:expr, $config:expr, $now:expr, $($arg:tt)*) => {
        $crate::logging::log_message(
            $queue, $config, $now, $crate::logging::LogLevel::Warn,
            module_path!(), $crate::logging::format_message(core::format_args!($($arg)*)).as_str(),
        )
    };
}

#[macro_export]
macro_rules! log_error {
    ($queue:expr, $config:expr, $now:expr, $($arg:tt)*) => {
        $crate::logging::log_message(
            $queue, $config, $now, $crate::logging::LogLevel::Error,
            module_path!(), $crate::logging::format_message(core::format_args!($($arg)*)).as_str(),
        )
    };
}

/// Category-gated variants used for the charge/safety/protocol subsystems.
/// Compiled out entirely when the matching feature is disabled.
#[cfg(feature = "charge-logs")]
#[macro_export]
macro_rules! log_charge_info {
    ($queue:expr, $config:expr, $now:expr, $($arg:tt)*) => {
        $crate::log_info!($queue, $config, $now, $($arg)*)
    };
}

#[cfg(not(feature = "charge-logs"))]
#[macro_export]
macro_rules! log_charge_info {
    ($queue:expr, $config:expr, $now:expr, $($arg:tt)*) => {
        ()
    };
}

#[cfg(feature = "safety-logs")]
#[macro_export]
macro_rules! log_safety_warn {
    ($queue:expr, $config:expr, $now:expr, $($arg:tt)*) => {
        $crate::log_warn!($queue, $config, $now, $($arg)*)
    };
}

#[cfg(not(feature = "safety-logs"))]
#[macro_export]
macro_rules! log_safety_warn {
    ($queue:expr, $config:expr, $now:expr, $($arg:tt)*) => {
        ()
    };
}

#[cfg(feature = "protocol-logs")]
#[macro_export]
macro_rules! log_protocol_debug {
    ($queue:expr, $config:expr, $now:expr, $($arg:tt)*) => {
        $crate::log_debug!($queue, $config, $now, $($arg)*)
    };
}

#[cfg(not(feature = "protocol-logs"))]
#[macro_export]
macro_rules! log_protocol_debug {
    ($queue:expr, $config:expr, $now:expr, $($arg:tt)*) => {
        ()
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_levels_order_by_severity() {
        assert!(LogLevel::Error > LogLevel::Warn);
        assert!(LogLevel::Warn > LogLevel::Info);
        assert!(LogLevel::Info > LogLevel::Debug);
    }

    #[test]
    fn config_filters_below_threshold() {
        let mut config = LogConfig::new();
        config.set_max_level(LogLevel::Warn);
        assert!(!config.should_log(LogLevel::Info));
        assert!(config.should_log(LogLevel::Error));
    }

    #[test]
    fn queue_drops_when_full() {
        let mut queue: LogQueue<2> = LogQueue::new();
        queue.push(LogMessage::new(0, LogLevel::Info, "m", "a"));
        queue.push(LogMessage::new(0, LogLevel::Info, "m", "b"));
        queue.push(LogMessage::new(0, LogLevel::Info, "m", "c"));
        assert_eq!(queue.dropped(), 1);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn queue_drains_fifo() {
        let mut queue: LogQueue<4> = LogQueue::new();
        queue.push(LogMessage::new(1, LogLevel::Info, "m", "first"));
        queue.push(LogMessage::new(2, LogLevel::Info, "m", "second"));
        let first = queue.drain_one().unwrap();
        assert_eq!(first.message.as_str(), "first");
    }
}
