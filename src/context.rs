/*
 *  context.rs: Per-device context structure for rwipe.
 *
 *  Copyright Darik Horn <dajhorn-dban@vanadac.com>.
 *  Modifications to original dwipe Copyright Andy Beverley <andy@andybev.com>
 *  Rust conversion: 2023
 *
 *  This program is free software; you can redistribute it and/or modify it under
 *  the terms of the GNU General Public License as published by the Free Software
 *  Foundation, version 2.
 */

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicI64, AtomicU64, AtomicU8, Ordering};
use std::sync::Mutex;

use crate::options::WipeOptions;
use crate::speedring::Speedring;

/// The status of a device selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectStatus {
    /// Device is not selected.
    False,
    /// Device is selected.
    True,
    /// Device is selected by inference.
    TrueParent,
    /// Device is disabled.
    Disabled,
}

/// The type of the current pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PassType {
    /// Not running any pass.
    None = 0,
    /// Writing a pattern.
    Write = 1,
    /// Verifying a pattern.
    Verify = 2,
    /// The final blanking pass.
    FinalBlank = 3,
    /// The final OPS-II random pass.
    FinalOps2 = 4,
}

impl PassType {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => PassType::Write,
            2 => PassType::Verify,
            3 => PassType::FinalBlank,
            4 => PassType::FinalOps2,
            _ => PassType::None,
        }
    }
}

/// The lifecycle state of a wipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WipeStatus {
    NotStarted = 0,
    Running = 1,
    Finished = 2,
}

impl WipeStatus {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => WipeStatus::Running,
            2 => WipeStatus::Finished,
            _ => WipeStatus::NotStarted,
        }
    }
}

/// Device identity information, read from sysfs where available.
#[derive(Debug, Clone, Default)]
pub struct DeviceIdentity {
    /// The device model.
    pub model_no: String,
    /// The device serial number.
    pub serial_no: String,
    /// The firmware revision.
    pub firmware_rev: String,
}

/// A PRNG seed: a byte sequence plus its length, drawn fresh from the
/// entropy source for every random pass and retained so that the verify
/// pass can regenerate the identical stream.
#[derive(Debug, Clone, Default)]
pub struct PrngSeed {
    /// The length of the seed.
    pub length: usize,
    /// The seed data.
    pub s: Vec<u8>,
}

impl PrngSeed {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            length: bytes.len(),
            s: bytes,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }
}

/// Progress counters written by the owning worker and read concurrently by
/// the supervisor. Word-sized atomic reads are sufficient; the aggregator
/// tolerates momentarily inconsistent snapshots.
#[derive(Debug, Default)]
pub struct WipeProgress {
    /// The number of rounds the method will run.
    pub round_count: AtomicI32,
    /// The round currently being written, 1-based.
    pub round_working: AtomicI32,
    /// The number of passes per round.
    pub pass_count: AtomicI32,
    /// The pass currently being written, 1-based.
    pub pass_working: AtomicI32,
    /// The type of the current pass.
    pass_type: AtomicU8,
    /// Bytes done in the current pass.
    pub pass_done: AtomicU64,
    /// Bytes done across the whole job, reads and writes combined.
    pub round_done: AtomicU64,
    /// High-water mark of bytes known to be overwritten on the device.
    pub bytes_erased: AtomicU64,
    /// The number of bytes one pass moves, times the pass count.
    pub pass_size: AtomicU64,
    /// The number of bytes the whole job will read and write.
    pub round_size: AtomicU64,
    /// Percentage complete of the whole job, stored as f64 bits.
    round_percent_bits: AtomicU64,
    /// Byte count lost to short writes.
    pub pass_errors: AtomicU64,
    /// Blocks that mismatched or were short-read during verification.
    pub verify_errors: AtomicU64,
    /// Failed data flushes.
    pub fsyncdata_errors: AtomicU64,
    /// The result code of the method: 0 clean, 1 non-fatal errors, negative fatal.
    pub result: AtomicI32,
    /// The signal that terminated the wipe, if any.
    pub signal: AtomicI32,
    /// The estimated time remaining in seconds.
    pub eta: AtomicI64,
    /// The throughput in bytes per second.
    pub throughput: AtomicU64,
    /// The start time of the wipe, seconds since the epoch.
    pub start_time: AtomicI64,
    /// The end time of the wipe, seconds since the epoch.
    pub end_time: AtomicI64,
    /// The wipe lifecycle state.
    wipe_status: AtomicU8,
    /// Set while a flush is in flight.
    pub sync_status: AtomicBool,
}

impl WipeProgress {
    pub fn pass_type(&self) -> PassType {
        PassType::from_u8(self.pass_type.load(Ordering::Relaxed))
    }

    pub fn set_pass_type(&self, t: PassType) {
        self.pass_type.store(t as u8, Ordering::Relaxed);
    }

    pub fn wipe_status(&self) -> WipeStatus {
        WipeStatus::from_u8(self.wipe_status.load(Ordering::Acquire))
    }

    pub fn set_wipe_status(&self, s: WipeStatus) {
        self.wipe_status.store(s as u8, Ordering::Release);
    }

    pub fn round_percent(&self) -> f64 {
        f64::from_bits(self.round_percent_bits.load(Ordering::Relaxed))
    }

    pub fn set_round_percent(&self, pct: f64) {
        self.round_percent_bits
            .store(pct.to_bits(), Ordering::Relaxed);
    }

    /// Advance `bytes_erased` to `offset` if that is a new high-water mark.
    /// Never exceeds the device size handed in by the caller.
    pub fn raise_bytes_erased(&self, offset: u64, device_size: u64) {
        let capped = offset.min(device_size);
        self.bytes_erased.fetch_max(capped, Ordering::Relaxed);
    }

    /// Sum of all non-fatal error counters.
    pub fn error_total(&self) -> u64 {
        self.pass_errors.load(Ordering::Relaxed)
            + self.verify_errors.load(Ordering::Relaxed)
            + self.fsyncdata_errors.load(Ordering::Relaxed)
    }
}

/// The per-device context. Identity and wipe parameters are fixed before the
/// worker starts; progress counters are atomics written by the worker alone.
/// The supervisor owns the cancellation flag and the speedring.
#[derive(Debug)]
pub struct DeviceContext {
    /// The device path.
    pub device_name: String,
    /// The device size in bytes.
    pub device_size: u64,
    /// The device hard sector size in bytes.
    pub device_sector_size: u64,
    /// The device soft block size in bytes.
    pub device_block_size: u64,
    /// The device identity information.
    pub identity: DeviceIdentity,
    /// The selection status of this device.
    pub select: SelectStatus,
    /// The wipe parameters for this device.
    pub options: WipeOptions,
    /// Progress counters, shared with the supervisor.
    pub progress: WipeProgress,
    /// Cooperative cancellation flag, set by the supervisor.
    pub cancel: AtomicBool,
    /// The seed of the random pass currently in flight, kept for verification.
    pub prng_seed: Mutex<PrngSeed>,
    /// Rolling throughput samples, updated by the supervisor.
    pub speedring: Mutex<Speedring>,
}

impl DeviceContext {
    /// Create a context for a probed device.
    pub fn new(
        device_name: &str,
        device_size: u64,
        device_sector_size: u64,
        device_block_size: u64,
        options: WipeOptions,
    ) -> Self {
        Self {
            device_name: device_name.to_string(),
            device_size,
            device_sector_size,
            device_block_size,
            identity: DeviceIdentity::default(),
            select: SelectStatus::True,
            options,
            progress: WipeProgress::default(),
            cancel: AtomicBool::new(false),
            prng_seed: Mutex::new(PrngSeed::default()),
            speedring: Mutex::new(Speedring::new()),
        }
    }

    pub fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    pub fn request_cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_erased_is_monotonic_and_capped() {
        let p = WipeProgress::default();
        p.raise_bytes_erased(100, 1000);
        assert_eq!(p.bytes_erased.load(Ordering::Relaxed), 100);
        p.raise_bytes_erased(50, 1000);
        assert_eq!(p.bytes_erased.load(Ordering::Relaxed), 100);
        p.raise_bytes_erased(5000, 1000);
        assert_eq!(p.bytes_erased.load(Ordering::Relaxed), 1000);
    }

    #[test]
    fn pass_type_round_trips_through_storage() {
        let p = WipeProgress::default();
        for t in [
            PassType::None,
            PassType::Write,
            PassType::Verify,
            PassType::FinalBlank,
            PassType::FinalOps2,
        ] {
            p.set_pass_type(t);
            assert_eq!(p.pass_type(), t);
        }
    }

    #[test]
    fn round_percent_stores_fractions() {
        let p = WipeProgress::default();
        p.set_round_percent(42.5);
        assert!((p.round_percent() - 42.5).abs() < f64::EPSILON);
    }
}
