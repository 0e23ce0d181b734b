//! Logging macros guarded on global-logger initialization, matching `zest/base/logging.h`'s
//! `LOG_DEBUG!`/`LOG_INFO!`/... call sites: silent no-ops before [`crate::init`].

#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        if let Some(logger) = $crate::global() {
            logger.append($crate::LogLevel::Debug, file!(), line!(), &format!($($arg)*));
        }
    };
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        if let Some(logger) = $crate::global() {
            logger.append($crate::LogLevel::Info, file!(), line!(), &format!($($arg)*));
        }
    };
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        if let Some(logger) = $crate::global() {
            logger.append($crate::LogLevel::Error, file!(), line!(), &format!($($arg)*));
        }
    };
}

#[macro_export]
macro_rules! log_fatal {
    ($($arg:tt)*) => {
        if let Some(logger) = $crate::global() {
            logger.append($crate::LogLevel::Fatal, file!(), line!(), &format!($($arg)*));
        }
    };
}

#[macro_export]
macro_rules! log_sync {
    ($($arg:tt)*) => {
        if let Some(logger) = $crate::global() {
            logger.append($crate::LogLevel::Sync, file!(), line!(), &format!($($arg)*));
        }
    };
}
