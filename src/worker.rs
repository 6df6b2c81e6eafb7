/*
 *  worker.rs: Per-device wipe thread for rwipe.
 *
 *  Copyright Darik Horn <dajhorn-dban@vanadac.com>.
 *  Modifications to original dwipe Copyright Andy Beverley <andy@andybev.com>
 *  Rust conversion: 2023
 *
 *  This program is free software; you can redistribute it and/or modify it under
 *  the terms of the GNU General Public License as published by the Free Software
 *  Foundation, version 2.
 */

use std::os::unix::io::AsRawFd;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::context::{DeviceContext, WipeStatus};
use crate::device;
use crate::logging::{wipe_log, LogLevel};
use crate::method::{self, RESULT_CANCELLED, RESULT_CLEAN, RESULT_FATAL};

pub fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

/// The body of one wipe thread. Opens the device, runs the configured
/// method, and records timestamps and the result code. The descriptor is
/// owned here for the whole method invocation and closed exactly once when
/// the handle drops.
pub fn wipe_worker(ctx: Arc<DeviceContext>) {
    let progress = &ctx.progress;
    progress.start_time.store(now_secs(), Ordering::Relaxed);
    progress.set_wipe_status(WipeStatus::Running);

    wipe_log(
        LogLevel::Notice,
        &format!("Starting wipe of device {}", ctx.device_name),
    );

    let result = match device::open_for_wipe(&ctx.device_name, ctx.options.io_mode) {
        Ok(file) => method::run_method(&ctx, file.as_raw_fd()),
        Err(e) => {
            wipe_log(
                LogLevel::Error,
                &format!("Unable to open device '{}': {}", ctx.device_name, e),
            );
            RESULT_FATAL
        }
    };

    progress.result.store(result, Ordering::Relaxed);
    progress.end_time.store(now_secs(), Ordering::Relaxed);
    progress.set_wipe_status(WipeStatus::Finished);

    match result {
        RESULT_CLEAN => wipe_log(
            LogLevel::Notice,
            &format!("Wipe of device {} completed successfully", ctx.device_name),
        ),
        RESULT_CANCELLED => wipe_log(
            LogLevel::Notice,
            &format!("Wipe of device {} aborted", ctx.device_name),
        ),
        _ => wipe_log(
            LogLevel::Error,
            &format!(
                "Wipe of device {} finished with error code {}",
                ctx.device_name, result
            ),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::method::WipeMethod;
    use crate::options::{VerifyPolicy, WipeOptions};

    #[test]
    fn missing_device_finishes_with_fatal_result() {
        let ctx = Arc::new(DeviceContext::new(
            "/dev/does-not-exist-rwipe",
            1024,
            512,
            512,
            WipeOptions::default(),
        ));
        wipe_worker(ctx.clone());
        assert_eq!(ctx.progress.wipe_status(), WipeStatus::Finished);
        assert_eq!(ctx.progress.result.load(Ordering::Relaxed), RESULT_FATAL);
        assert!(ctx.progress.end_time.load(Ordering::Relaxed) > 0);
    }

    #[test]
    fn worker_wipes_a_mock_device() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.as_file().set_len(128 * 1024).unwrap();

        let options = WipeOptions {
            method: WipeMethod::Zero,
            verify: VerifyPolicy::Last,
            blank_after: false,
            ..WipeOptions::default()
        };
        let ctx = Arc::new(DeviceContext::new(
            tmp.path().to_str().unwrap(),
            128 * 1024,
            512,
            512,
            options,
        ));
        wipe_worker(ctx.clone());
        assert_eq!(ctx.progress.wipe_status(), WipeStatus::Finished);
        assert_eq!(ctx.progress.result.load(Ordering::Relaxed), RESULT_CLEAN);
        assert_eq!(
            ctx.progress.bytes_erased.load(Ordering::Relaxed),
            128 * 1024
        );
    }
}
