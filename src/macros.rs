// SPDX-License-Identifier: Apache-2.0 OR MIT
// Logging macros
//
// These wrap the leveled Logger methods so call sites can pass plain
// values; each argument goes through `FmtArg::from`.

/// Log a message with debug level
///
/// # Examples
/// ```ignore
/// log_debug!(logger, "parsed %v records in %v ms", count, elapsed);
/// ```
#[macro_export]
macro_rules! log_debug {
    ($logger:expr, $fmt:expr $(, $arg:expr)* $(,)?) => {
        $logger.debug($fmt, &[$($crate::FmtArg::from($arg)),*])
    };
}

/// Log a message with info level
#[macro_export]
macro_rules! log_info {
    ($logger:expr, $fmt:expr $(, $arg:expr)* $(,)?) => {
        $logger.info($fmt, &[$($crate::FmtArg::from($arg)),*])
    };
}

/// Log a message with warn level
#[macro_export]
macro_rules! log_warn {
    ($logger:expr, $fmt:expr $(, $arg:expr)* $(,)?) => {
        $logger.warn($fmt, &[$($crate::FmtArg::from($arg)),*])
    };
}

/// Log a message with error level
#[macro_export]
macro_rules! log_error {
    ($logger:expr, $fmt:expr $(, $arg:expr)* $(,)?) => {
        $logger.error($fmt, &[$($crate::FmtArg::from($arg)),*])
    };
}

/// Log a message with fatal level
#[macro_export]
macro_rules! log_fatal {
    ($logger:expr, $fmt:expr $(, $arg:expr)* $(,)?) => {
        $logger.fatal($fmt, &[$($crate::FmtArg::from($arg)),*])
    };
}

#[cfg(test)]
mod tests {
    use crate::{Level, Logger};

    #[test]
    fn test_log_macros_compile_for_all_levels() {
        // Nothing is open, so nothing is emitted; this exercises macro
        // expansion and argument conversion.
        let logger = Logger::new();
        logger.set_level(Level::Fatal);

        log_debug!(logger, "plain");
        log_info!(logger, "one %v", 1);
        log_warn!(logger, "two %v %v", "a", 2u64);
        log_error!(logger, "mixed %v %v %v", true, 'c', 1.25);
        log_fatal!(logger, "trailing comma %v", "ok",);
    }
}
