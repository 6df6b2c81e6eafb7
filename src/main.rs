/*
 *  main.rs: rwipe - secure block device eraser.
 *
 *  Copyright Darik Horn <dajhorn-dban@vanadac.com>.
 *
 *  Modifications to original dwipe Copyright Andy Beverley <andy@andybev.com>
 *  Rust conversion: 2023
 *
 *  This program is free software; you can redistribute it and/or modify it under
 *  the terms of the GNU General Public License as published by the Free Software
 *  Foundation, version 2.
 *
 *  This program is distributed in the hope that it will be useful, but WITHOUT
 *  ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
 *  FOR A PARTICULAR PURPOSE.  See the GNU General Public License for more
 *  details.
 *
 *  You should have received a copy of the GNU General Public License along with
 *  this program; if not, write to the Free Software Foundation, Inc.,
 *  51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.
 *
 */

use std::process;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;
use std::thread;

use signal_hook::consts::{SIGHUP, SIGINT, SIGQUIT, SIGTERM};
use signal_hook::iterator::Signals;

use rwipe::context::DeviceContext;
use rwipe::device;
use rwipe::logging::{self, wipe_log, LogLevel};
use rwipe::options;
use rwipe::supervisor::{FinalStatus, Supervisor};
use rwipe::version;

fn main() {
    let (wipe_options, device_names, verbose) = match options::parse_options() {
        Ok(parsed) => parsed,
        Err(e) => {
            eprintln!("{}", e);
            process::exit(2);
        }
    };

    logging::init_logging(verbose);
    wipe_log(LogLevel::Notice, &version::version_string());
    logging::log_sysinfo();

    wipe_log(
        LogLevel::Notice,
        &format!(
            "Options: method={}, prng={}, verify={:?}, rounds={}, blank_after={}, io={:?}",
            wipe_options.method.label(),
            wipe_options.prng.label(),
            wipe_options.verify,
            wipe_options.rounds,
            wipe_options.blank_after,
            wipe_options.io_mode,
        ),
    );

    // Probe every named target; refuse anything that is mounted.
    let mut contexts: Vec<Arc<DeviceContext>> = Vec::new();
    for name in &device_names {
        if device::device_is_mounted(name) {
            wipe_log(
                LogLevel::Error,
                &format!("Device '{}' is mounted, refusing to wipe it", name),
            );
            continue;
        }
        match device::probe_device(name) {
            Ok(probe) => {
                let mut ctx = DeviceContext::new(
                    name,
                    probe.device_size,
                    probe.device_sector_size,
                    probe.device_block_size,
                    wipe_options.clone(),
                );
                ctx.identity = probe.identity;
                if !ctx.identity.serial_no.is_empty() {
                    wipe_log(
                        LogLevel::Notice,
                        &format!("{} has serial number {}", name, ctx.identity.serial_no),
                    );
                }
                wipe_log(
                    LogLevel::Notice,
                    &format!(
                        "{}: {} bytes, {} byte sectors, {} byte blocks",
                        name, ctx.device_size, ctx.device_sector_size, ctx.device_block_size
                    ),
                );
                contexts.push(Arc::new(ctx));
            }
            Err(e) => {
                wipe_log(
                    LogLevel::Error,
                    &format!("Unable to probe device '{}': {}", name, e),
                );
            }
        }
    }

    if contexts.is_empty() {
        wipe_log(LogLevel::Error, "No usable devices, nothing to do");
        process::exit(2);
    }

    // One shutdown signal cancels every worker cooperatively.
    let terminate = Arc::new(AtomicBool::new(false));
    let signal_seen = Arc::new(AtomicI32::new(0));
    {
        let terminate = Arc::clone(&terminate);
        let signal_seen = Arc::clone(&signal_seen);
        let mut signals = Signals::new([SIGHUP, SIGINT, SIGQUIT, SIGTERM])
            .expect("signal handler installation failed");
        thread::spawn(move || {
            if let Some(sig) = signals.forever().next() {
                signal_seen.store(sig, Ordering::Relaxed);
                terminate.store(true, Ordering::Relaxed);
            }
        });
    }

    let supervisor = Supervisor::new(contexts, terminate, signal_seen);
    let stats = supervisor.run();

    wipe_log(
        LogLevel::Info,
        &format!(
            "All workers finished; {} total errors across devices",
            stats.total_errors
        ),
    );

    logging::log_summary(supervisor.contexts());

    // Exit status: 0 all clean, 1 non-fatal errors or aborted, 2 fatal.
    let mut exit_code = 0;
    for ctx in supervisor.contexts() {
        match FinalStatus::of(ctx) {
            FinalStatus::Success => {}
            FinalStatus::Aborted { .. } => exit_code = exit_code.max(1),
            FinalStatus::Failure { result, .. } => {
                exit_code = exit_code.max(if result < 0 { 2 } else { 1 });
            }
        }
    }

    if exit_code == 0 {
        wipe_log(LogLevel::Info, "rwipe successfully exited");
    }
    process::exit(exit_code);
}
