/*
 *  supervisor.rs: Worker supervision and statistics aggregation for rwipe.
 *
 *  Copyright Darik Horn <dajhorn-dban@vanadac.com>.
 *  Modifications to original dwipe Copyright Andy Beverley <andy@andybev.com>
 *  Rust conversion: 2023
 *
 *  This program is free software; you can redistribute it and/or modify it under
 *  the terms of the GNU General Public License as published by the Free Software
 *  Foundation, version 2.
 */

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::context::{DeviceContext, PassType, WipeStatus};
use crate::logging::{wipe_log, LogLevel};
use crate::method::{RESULT_CANCELLED, RESULT_CLEAN};
use crate::worker::{now_secs, wipe_worker};

/// Aggregation cadence. Four ticks per second keeps the snapshots fresh
/// without contending with the workers.
const TICK: Duration = Duration::from_millis(250);

/// Ticks between progress lines when running headless.
const LOG_EVERY_TICKS: u64 = 120;

/// No ETA is derived below this throughput; the estimate would be noise.
const ETA_MIN_THROUGHPUT: u64 = 100_000;

/// A read-only view of one device's progress, safe to take at any time.
#[derive(Debug, Clone)]
pub struct ProgressSnapshot {
    pub device_name: String,
    pub pass_type: PassType,
    pub round_working: i32,
    pub round_count: i32,
    pub pass_working: i32,
    pub pass_count: i32,
    pub round_percent: f64,
    pub pass_errors: u64,
    pub verify_errors: u64,
    pub fsyncdata_errors: u64,
    pub throughput: u64,
    pub eta: i64,
    pub wipe_status: WipeStatus,
    pub result: i32,
}

impl ProgressSnapshot {
    pub fn of(ctx: &DeviceContext) -> Self {
        let p = &ctx.progress;
        Self {
            device_name: ctx.device_name.clone(),
            pass_type: p.pass_type(),
            round_working: p.round_working.load(Ordering::Relaxed),
            round_count: p.round_count.load(Ordering::Relaxed),
            pass_working: p.pass_working.load(Ordering::Relaxed),
            pass_count: p.pass_count.load(Ordering::Relaxed),
            round_percent: p.round_percent(),
            pass_errors: p.pass_errors.load(Ordering::Relaxed),
            verify_errors: p.verify_errors.load(Ordering::Relaxed),
            fsyncdata_errors: p.fsyncdata_errors.load(Ordering::Relaxed),
            throughput: p.throughput.load(Ordering::Relaxed),
            eta: p.eta.load(Ordering::Relaxed),
            wipe_status: p.wipe_status(),
            result: p.result.load(Ordering::Relaxed),
        }
    }
}

/// The aggregate the supervisor publishes each tick.
#[derive(Debug, Clone, Default)]
pub struct AggregateStats {
    /// Sum of per-device throughput, bytes per second.
    pub throughput: u64,
    /// The largest per-device ETA, seconds.
    pub maxeta: i64,
    /// Sum of every error counter across devices.
    pub total_errors: u64,
    /// Number of workers still running.
    pub running: usize,
    /// True once every worker has finished.
    pub all_done: bool,
}

/// The final disposition of one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinalStatus {
    /// Result code 0 and every error counter zero.
    Success,
    /// The wipe finished but cannot be trusted.
    Failure {
        result: i32,
        pass_errors: u64,
        verify_errors: u64,
        fsyncdata_errors: u64,
    },
    /// The wipe was cancelled before completing.
    Aborted { signal: i32 },
}

impl FinalStatus {
    pub fn of(ctx: &DeviceContext) -> Self {
        let p = &ctx.progress;
        let result = p.result.load(Ordering::Relaxed);
        let signal = p.signal.load(Ordering::Relaxed);
        if result == RESULT_CANCELLED || signal != 0 {
            return FinalStatus::Aborted { signal };
        }
        if result == RESULT_CLEAN && p.error_total() == 0 {
            return FinalStatus::Success;
        }
        FinalStatus::Failure {
            result,
            pass_errors: p.pass_errors.load(Ordering::Relaxed),
            verify_errors: p.verify_errors.load(Ordering::Relaxed),
            fsyncdata_errors: p.fsyncdata_errors.load(Ordering::Relaxed),
        }
    }
}

/// Spawns one worker per context, aggregates their counters at a bounded
/// cadence, and fans a shutdown request out to every worker.
pub struct Supervisor {
    contexts: Vec<Arc<DeviceContext>>,
    terminate: Arc<AtomicBool>,
    signal: Arc<AtomicI32>,
}

impl Supervisor {
    pub fn new(
        contexts: Vec<Arc<DeviceContext>>,
        terminate: Arc<AtomicBool>,
        signal: Arc<AtomicI32>,
    ) -> Self {
        Self {
            contexts,
            terminate,
            signal,
        }
    }

    pub fn contexts(&self) -> &[Arc<DeviceContext>] {
        &self.contexts
    }

    /// Take a snapshot of every context.
    pub fn snapshots(&self) -> Vec<ProgressSnapshot> {
        self.contexts
            .iter()
            .map(|ctx| ProgressSnapshot::of(ctx))
            .collect()
    }

    /// One aggregation pass: refresh each running device's speedring,
    /// throughput and ETA, then combine the totals.
    pub fn tick(&self, now: i64) -> AggregateStats {
        let mut stats = AggregateStats::default();

        for ctx in &self.contexts {
            let p = &ctx.progress;

            if p.wipe_status() == WipeStatus::Running {
                stats.running += 1;

                let round_done = p.round_done.load(Ordering::Relaxed);
                let throughput = {
                    let mut ring = ctx.speedring.lock().unwrap();
                    ring.sample(round_done, now);
                    ring.throughput()
                };
                p.throughput.store(throughput, Ordering::Relaxed);

                if throughput > ETA_MIN_THROUGHPUT {
                    let round_size = p.round_size.load(Ordering::Relaxed);
                    let eta = round_size.saturating_sub(round_done) / throughput;
                    p.eta.store(eta as i64, Ordering::Relaxed);
                }
            }

            stats.throughput += p.throughput.load(Ordering::Relaxed);
            stats.maxeta = stats.maxeta.max(p.eta.load(Ordering::Relaxed));
            stats.total_errors += p.error_total();
        }

        stats.all_done = self
            .contexts
            .iter()
            .all(|ctx| ctx.progress.wipe_status() == WipeStatus::Finished);
        stats
    }

    /// Ask every worker to stop at its next iteration boundary and record
    /// the terminating signal for the final status.
    pub fn shutdown(&self, signal: i32) {
        for ctx in &self.contexts {
            if ctx.progress.wipe_status() != WipeStatus::Finished {
                ctx.progress.signal.store(signal, Ordering::Relaxed);
            }
            ctx.request_cancel();
        }
    }

    /// Run every worker to completion. Blocks until all workers have
    /// finished, honoring one shutdown signal along the way.
    pub fn run(&self) -> AggregateStats {
        let mut handles = Vec::with_capacity(self.contexts.len());
        for ctx in &self.contexts {
            let ctx = Arc::clone(ctx);
            handles.push(thread::spawn(move || wipe_worker(ctx)));
        }

        let mut shutdown_sent = false;
        let mut ticks: u64 = 0;
        loop {
            thread::sleep(TICK);
            ticks += 1;

            if self.terminate.load(Ordering::Relaxed) && !shutdown_sent {
                let signal = self.signal.load(Ordering::Relaxed);
                wipe_log(
                    LogLevel::Notice,
                    &format!("Shutdown requested (signal {}), cancelling workers", signal),
                );
                self.shutdown(signal);
                shutdown_sent = true;
            }

            let stats = self.tick(now_secs());

            if ticks % LOG_EVERY_TICKS == 0 {
                self.log_progress();
            }

            if stats.all_done {
                break;
            }
        }

        for handle in handles {
            if handle.join().is_err() {
                wipe_log(LogLevel::Warning, "A wipe thread panicked");
            }
        }

        // One more aggregation now that every counter is final.
        self.tick(now_secs())
    }

    fn log_progress(&self) {
        for snapshot in self.snapshots() {
            if snapshot.wipe_status != WipeStatus::Running {
                continue;
            }
            wipe_log(
                LogLevel::Info,
                &format!(
                    "{}: {:.2}% round {}/{} pass {}/{} at {} MB/s, ETA {}s",
                    snapshot.device_name,
                    snapshot.round_percent,
                    snapshot.round_working,
                    snapshot.round_count,
                    snapshot.pass_working,
                    snapshot.pass_count,
                    snapshot.throughput / (1024 * 1024),
                    snapshot.eta,
                ),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::WipeOptions;

    fn running_context(name: &str, size: u64) -> Arc<DeviceContext> {
        let ctx = Arc::new(DeviceContext::new(name, size, 512, 512, WipeOptions::default()));
        ctx.progress.set_wipe_status(WipeStatus::Running);
        ctx.progress.round_size.store(size, Ordering::Relaxed);
        ctx
    }

    fn supervisor_of(contexts: Vec<Arc<DeviceContext>>) -> Supervisor {
        Supervisor::new(
            contexts,
            Arc::new(AtomicBool::new(false)),
            Arc::new(AtomicI32::new(0)),
        )
    }

    #[test]
    fn tick_derives_throughput_and_eta() {
        let size = 10_000_000_000;
        let ctx = running_context("/dev/mock0", size);
        let sup = supervisor_of(vec![ctx.clone()]);

        // Two accepted samples 10 seconds apart at 200 MB/s.
        sup.tick(0);
        ctx.progress
            .round_done
            .store(2_000_000_000, Ordering::Relaxed);
        let stats = sup.tick(10);

        assert_eq!(stats.running, 1);
        assert!(!stats.all_done);
        assert_eq!(stats.throughput, 200_000_000);
        let expected_eta = (size - 2_000_000_000) / 200_000_000;
        assert_eq!(stats.maxeta, expected_eta as i64);
    }

    #[test]
    fn slow_devices_get_no_eta() {
        let ctx = running_context("/dev/mock0", 1_000_000);
        let sup = supervisor_of(vec![ctx.clone()]);
        sup.tick(0);
        ctx.progress.round_done.store(500, Ordering::Relaxed);
        let stats = sup.tick(10);
        assert_eq!(stats.maxeta, 0);
        assert_eq!(ctx.progress.eta.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn errors_are_summed_across_devices() {
        let a = running_context("/dev/mock0", 1024);
        let b = running_context("/dev/mock1", 1024);
        a.progress.pass_errors.store(10, Ordering::Relaxed);
        b.progress.verify_errors.store(5, Ordering::Relaxed);
        b.progress.fsyncdata_errors.store(1, Ordering::Relaxed);
        let sup = supervisor_of(vec![a, b]);
        let stats = sup.tick(0);
        assert_eq!(stats.total_errors, 16);
    }

    #[test]
    fn all_done_when_no_worker_runs() {
        let ctx = running_context("/dev/mock0", 1024);
        ctx.progress.set_wipe_status(WipeStatus::Finished);
        let sup = supervisor_of(vec![ctx]);
        assert!(sup.tick(0).all_done);
    }

    #[test]
    fn shutdown_cancels_and_records_signal() {
        let ctx = running_context("/dev/mock0", 1024);
        let sup = supervisor_of(vec![ctx.clone()]);
        sup.shutdown(15);
        assert!(ctx.cancelled());
        assert_eq!(ctx.progress.signal.load(Ordering::Relaxed), 15);
        assert_eq!(FinalStatus::of(&ctx), FinalStatus::Aborted { signal: 15 });
    }

    #[test]
    fn final_status_reflects_counters() {
        let ctx = running_context("/dev/mock0", 1024);
        assert_eq!(FinalStatus::of(&ctx), FinalStatus::Success);

        ctx.progress.verify_errors.store(3, Ordering::Relaxed);
        ctx.progress.result.store(1, Ordering::Relaxed);
        assert_eq!(
            FinalStatus::of(&ctx),
            FinalStatus::Failure {
                result: 1,
                pass_errors: 0,
                verify_errors: 3,
                fsyncdata_errors: 0,
            }
        );
    }
}
