/*
 *  logging.rs: Logging functionality for rwipe.
 *
 *  Copyright Darik Horn <dajhorn-dban@vanadac.com>.
 *  Modifications to original dwipe Copyright Andy Beverley <andy@andybev.com>
 *  Rust conversion: 2023
 *
 *  This program is free software; you can redistribute it and/or modify it under
 *  the terms of the GNU General Public License as published by the Free Software
 *  Foundation, version 2.
 */

use std::fmt;
use std::sync::atomic::Ordering;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::context::DeviceContext;
use crate::supervisor::FinalStatus;

// Messages are kept in memory for the end-of-run summary.
lazy_static::lazy_static! {
    static ref LOG_LINES: Mutex<Vec<String>> = Mutex::new(Vec::new());
}

/// Log levels for rwipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    /// Fatal error messages.
    Fatal,
    /// Error messages.
    Error,
    /// Warning messages.
    Warning,
    /// Notice messages.
    Notice,
    /// Informational messages.
    Info,
    /// Debug messages.
    Debug,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Fatal => write!(f, "FATAL"),
            LogLevel::Error => write!(f, "ERROR"),
            LogLevel::Warning => write!(f, "WARNING"),
            LogLevel::Notice => write!(f, "NOTICE"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Debug => write!(f, "DEBUG"),
        }
    }
}

/// Initialize the logging system.
pub fn init_logging(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "info" };

    // RUST_LOG, when set, still wins over the verbose flag.
    let _ = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(default_filter),
    )
    .format_timestamp_secs()
    .try_init();

    LOG_LINES.lock().unwrap().clear();
    wipe_log(LogLevel::Notice, "rwipe started");
}

/// Log a message, storing it for the summary and forwarding it to the
/// log facade.
pub fn wipe_log(level: LogLevel, message: &str) {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();

    let line = format!("{} {} {}", now, level, message);
    LOG_LINES.lock().unwrap().push(line);

    match level {
        LogLevel::Fatal | LogLevel::Error => log::error!("{}", message),
        LogLevel::Warning => log::warn!("{}", message),
        LogLevel::Notice | LogLevel::Info => log::info!("{}", message),
        LogLevel::Debug => log::debug!("{}", message),
    }
}

/// The number of messages logged so far.
pub fn log_line_count() -> usize {
    LOG_LINES.lock().unwrap().len()
}

/// Log system information.
pub fn log_sysinfo() {
    let os_info = os_info::get();
    wipe_log(
        LogLevel::Info,
        &format!("Operating System: {} {}", os_info.os_type(), os_info.version()),
    );

    if let Ok(cpus) = sys_info::cpu_num() {
        wipe_log(LogLevel::Info, &format!("CPU Count: {}", cpus));
    }

    if let Ok(mem) = sys_info::mem_info() {
        wipe_log(LogLevel::Info, &format!("Memory: {} MB", mem.total / 1024));
    }

    if let Ok(kernel) = sys_info::os_release() {
        wipe_log(LogLevel::Info, &format!("Kernel: {}", kernel));
    }
}

/// Log a summary of the wipe results.
pub fn log_summary(contexts: &[std::sync::Arc<DeviceContext>]) {
    wipe_log(LogLevel::Info, "***********************************************************");
    wipe_log(LogLevel::Info, "                        Wipe Summary                        ");
    wipe_log(LogLevel::Info, "***********************************************************");

    for context in contexts {
        let status = FinalStatus::of(context);
        let result_msg = match &status {
            FinalStatus::Success => "completed successfully".to_string(),
            FinalStatus::Aborted { signal } => {
                format!("aborted by signal {}", signal)
            }
            FinalStatus::Failure {
                result,
                pass_errors,
                verify_errors,
                fsyncdata_errors,
            } => format!(
                "failed (code {}, pass errors {}, verify errors {}, fdatasync errors {})",
                result, pass_errors, verify_errors, fsyncdata_errors
            ),
        };

        wipe_log(
            LogLevel::Info,
            &format!("Device: {} - wipe {}", context.device_name, result_msg),
        );

        if !context.identity.serial_no.is_empty() {
            wipe_log(
                LogLevel::Info,
                &format!("  Serial Number: {}", context.identity.serial_no),
            );
        }
        if !context.identity.model_no.is_empty() {
            wipe_log(
                LogLevel::Info,
                &format!("  Model: {}", context.identity.model_no),
            );
        }

        let start = context.progress.start_time.load(Ordering::Relaxed);
        let end = context.progress.end_time.load(Ordering::Relaxed);
        if start > 0 && end > 0 {
            let duration = end - start;
            let mut hours = 0;
            let mut minutes = 0;
            let mut seconds = 0;
            convert_seconds_to_hours_minutes_seconds(duration, &mut hours, &mut minutes, &mut seconds);
            wipe_log(
                LogLevel::Info,
                &format!("  Duration: {:02}:{:02}:{:02}", hours, minutes, seconds),
            );
        }

        let erased = context.progress.bytes_erased.load(Ordering::Relaxed);
        if erased > 0 {
            wipe_log(
                LogLevel::Info,
                &format!("  Bytes erased: {} MB", erased / (1024 * 1024)),
            );
        }
    }

    wipe_log(LogLevel::Info, "***********************************************************");
}

/// Convert seconds to hours, minutes, and seconds.
pub fn convert_seconds_to_hours_minutes_seconds(
    seconds: i64,
    hours: &mut i32,
    minutes: &mut i32,
    secs: &mut i32,
) {
    *hours = (seconds / 3600) as i32;
    *minutes = ((seconds % 3600) / 60) as i32;
    *secs = (seconds % 60) as i32;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seconds_split_into_fields() {
        let mut h = 0;
        let mut m = 0;
        let mut s = 0;
        convert_seconds_to_hours_minutes_seconds(3_723, &mut h, &mut m, &mut s);
        assert_eq!((h, m, s), (1, 2, 3));
    }

    #[test]
    fn messages_are_retained() {
        let before = log_line_count();
        wipe_log(LogLevel::Debug, "retained for the summary");
        assert_eq!(log_line_count(), before + 1);
    }
}
