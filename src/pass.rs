/*
 *  pass.rs: Device pass primitives for rwipe.
 *
 *  Copyright Darik Horn <dajhorn-dban@vanadac.com>.
 *  Modifications to original dwipe Copyright Andy Beverley <andy@andybev.com>
 *  Rust conversion: 2023
 *
 *  This program is free software; you can redistribute it and/or modify it under
 *  the terms of the GNU General Public License as published by the Free Software
 *  Foundation, version 2.
 */

use std::alloc::{self, Layout};
use std::io;
use std::os::unix::io::RawFd;
use std::ptr::NonNull;
use std::sync::atomic::Ordering;

use nix::unistd::{fdatasync, lseek, Whence};

use crate::context::DeviceContext;
use crate::logging::{wipe_log, LogLevel};
use crate::options::IoMode;
use crate::prng::Prng;

/// The default I/O request size, trimmed down to the device block size.
pub const DEFAULT_IO_BLOCK: usize = 4 * 1024 * 1024;

/// Scratch buffers never shrink below this, so pattern tiling stays cheap.
const MIN_BUFFER_SIZE: usize = 16 * 1024 * 1024;

/// How a pass ended when no fatal error occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassStatus {
    /// The pass ran to the end of the device.
    Completed,
    /// The cancellation flag was observed; buffers were released early.
    Cancelled,
}

/// A buffer from the aligned allocator. The same allocation serves cached
/// and O_DIRECT file descriptors.
pub struct AlignedBuffer {
    ptr: NonNull<u8>,
    layout: Layout,
}

impl AlignedBuffer {
    pub fn zeroed(size: usize, align: usize) -> io::Result<Self> {
        let layout = Layout::from_size_align(size, align)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))?;
        let ptr = unsafe { alloc::alloc_zeroed(layout) };
        match NonNull::new(ptr) {
            Some(ptr) => Ok(Self { ptr, layout }),
            None => Err(io::Error::new(
                io::ErrorKind::OutOfMemory,
                format!("aligned allocation of {} bytes failed", size),
            )),
        }
    }

    pub fn len(&self) -> usize {
        self.layout.size()
    }

    pub fn is_empty(&self) -> bool {
        self.layout.size() == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.layout.size()) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.layout.size()) }
    }
}

impl Drop for AlignedBuffer {
    fn drop(&mut self) {
        unsafe { alloc::dealloc(self.ptr.as_ptr(), self.layout) };
    }
}

unsafe impl Send for AlignedBuffer {}

/// The I/O parameters shared by all four primitives for one device.
pub struct PassIo<'a> {
    pub ctx: &'a DeviceContext,
    pub fd: RawFd,
    pub io_blocksize: usize,
    /// Data flush every this many writes; 0 disables periodic flushing.
    pub sync_every: u64,
    pub direct: bool,
}

impl<'a> PassIo<'a> {
    pub fn new(ctx: &'a DeviceContext, fd: RawFd) -> Self {
        let io_blocksize = io_blocksize(ctx.device_size, ctx.device_block_size);
        let sync_every = match ctx.options.io_mode {
            IoMode::Direct => 0,
            IoMode::Cached => sync_interval(
                ctx.options.sync_rate,
                ctx.device_block_size,
                io_blocksize,
            ),
        };
        Self {
            ctx,
            fd,
            io_blocksize,
            sync_every,
            direct: ctx.options.io_mode == IoMode::Direct,
        }
    }

    fn alignment(&self) -> usize {
        (self.ctx.device_block_size as usize).max(512)
    }

    fn buffer_size(&self, pattern_len: usize) -> usize {
        MIN_BUFFER_SIZE.max(self.io_blocksize + 2 * pattern_len)
    }
}

/// The I/O request size for a device: the default block rounded down to a
/// multiple of the device block size, never below one device block, never
/// above the device itself.
pub fn io_blocksize(device_size: u64, device_block_size: u64) -> usize {
    let block = device_block_size.max(1);
    let mut io = (DEFAULT_IO_BLOCK as u64 / block) * block;
    if io < block {
        io = block;
    }
    if io > device_size && device_size > 0 {
        io = device_size;
    }
    io as usize
}

/// Convert the legacy "flush every N device blocks" rate into a number of
/// I/O writes between flushes.
pub fn sync_interval(sync_rate: u64, device_block_size: u64, io_blocksize: usize) -> u64 {
    if sync_rate == 0 {
        return 0;
    }
    let bytes = sync_rate.saturating_mul(device_block_size.max(1));
    (bytes / io_blocksize as u64).max(1)
}

/// Seek to the start of the device and reset the per-pass counter. A seek
/// error or a non-zero resulting offset is fatal.
fn rewind(io: &PassIo) -> io::Result<()> {
    let offset = lseek(io.fd, 0, Whence::SeekSet).map_err(to_io_error)?;
    if offset != 0 {
        return Err(io::Error::new(
            io::ErrorKind::Other,
            format!("seek to start of {} landed at {}", io.ctx.device_name, offset),
        ));
    }
    io.ctx.progress.pass_done.store(0, Ordering::Relaxed);
    Ok(())
}

/// Issue a data-only flush. A failed flush means the data is not known to
/// be durable, so the pass is aborted after counting the failure.
fn flush(io: &PassIo) -> io::Result<()> {
    io.ctx.progress.sync_status.store(true, Ordering::Relaxed);
    let result = fdatasync(io.fd);
    io.ctx.progress.sync_status.store(false, Ordering::Relaxed);
    if let Err(e) = result {
        io.ctx
            .progress
            .fsyncdata_errors
            .fetch_add(1, Ordering::Relaxed);
        wipe_log(
            LogLevel::Warning,
            &format!("fdatasync on {} failed: {}", io.ctx.device_name, e),
        );
        return Err(to_io_error(e));
    }
    Ok(())
}

/// Account a short write and skip the missing span with a relative seek so
/// the pass stays positionally aligned. A failed skip escalates to fatal.
fn settle_short_write(io: &PassIo, requested: usize, returned: usize) -> io::Result<()> {
    if returned >= requested {
        return Ok(());
    }
    let missing = requested - returned;
    io.ctx
        .progress
        .pass_errors
        .fetch_add(missing as u64, Ordering::Relaxed);
    wipe_log(
        LogLevel::Warning,
        &format!(
            "short write on {}: {} of {} bytes",
            io.ctx.device_name, returned, requested
        ),
    );
    lseek(io.fd, missing as i64, Whence::SeekCur).map_err(to_io_error)?;
    Ok(())
}

/// Account a short verify read and skip the missing span.
fn settle_short_read(io: &PassIo, requested: usize, returned: usize) -> io::Result<()> {
    if returned >= requested {
        return Ok(());
    }
    io.ctx
        .progress
        .verify_errors
        .fetch_add(1, Ordering::Relaxed);
    wipe_log(
        LogLevel::Warning,
        &format!(
            "short read on {}: {} of {} bytes",
            io.ctx.device_name, returned, requested
        ),
    );
    lseek(io.fd, (requested - returned) as i64, Whence::SeekCur).map_err(to_io_error)?;
    Ok(())
}

/// Advance the shared progress counters by `actual` bytes moved.
fn account(io: &PassIo, actual: usize, erased_offset: Option<u64>) {
    let progress = &io.ctx.progress;
    progress.pass_done.fetch_add(actual as u64, Ordering::Relaxed);
    let round_done = progress.round_done.fetch_add(actual as u64, Ordering::Relaxed) + actual as u64;
    if let Some(offset) = erased_offset {
        progress.raise_bytes_erased(offset, io.ctx.device_size);
    }
    let round_size = progress.round_size.load(Ordering::Relaxed);
    if round_size > 0 {
        let pct = (round_done as f64 / round_size as f64 * 100.0).min(100.0);
        progress.set_round_percent(pct);
    }
}

fn to_io_error(e: nix::Error) -> io::Error {
    io::Error::from_raw_os_error(e as i32)
}

/// Tile `pattern` across the whole of `buf`.
fn tile_pattern(buf: &mut [u8], pattern: &[u8]) {
    for (i, byte) in buf.iter_mut().enumerate() {
        *byte = pattern[i % pattern.len()];
    }
}

/// Write a static pattern across the whole device.
///
/// The pattern is tiled through the scratch buffer and a window offset
/// `w` in `[0, pattern.len())` keeps the tiling continuous across write
/// boundaries whose size is not a multiple of the pattern length.
pub fn static_pass(io: &PassIo, pattern: &[u8]) -> io::Result<PassStatus> {
    if pattern.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "static pattern must not be empty",
        ));
    }

    let mut buffer = AlignedBuffer::zeroed(io.buffer_size(pattern.len()), io.alignment())?;
    tile_pattern(buffer.as_mut_slice(), pattern);
    rewind(io)?;

    let mut remaining = io.ctx.device_size;
    let mut offset: u64 = 0;
    let mut w: usize = 0;
    let mut writes_since_sync: u64 = 0;

    while remaining > 0 {
        if io.ctx.cancelled() {
            return Ok(PassStatus::Cancelled);
        }

        let n = remaining.min(io.io_blocksize as u64) as usize;
        let chunk = &buffer.as_slice()[w..w + n];
        let written = nix::unistd::write(io.fd, chunk).map_err(to_io_error)?;
        settle_short_write(io, n, written)?;

        offset += n as u64;
        remaining -= n as u64;
        w = (w + written % pattern.len()) % pattern.len();
        // A short write leaves a span that was skipped, not erased.
        account(io, written, Some(offset - (n - written) as u64));

        if io.sync_every > 0 {
            writes_since_sync += 1;
            if writes_since_sync >= io.sync_every {
                flush(io)?;
                writes_since_sync = 0;
            }
        }
    }

    flush(io)?;
    Ok(PassStatus::Completed)
}

/// Read the device back and compare it against a static pattern. Counts
/// one verification error per mismatching I/O block.
pub fn static_verify(io: &PassIo, pattern: &[u8]) -> io::Result<PassStatus> {
    if pattern.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "static pattern must not be empty",
        ));
    }

    // Writes of the preceding pass must be on the device before reads begin.
    flush(io)?;

    let mut expected = AlignedBuffer::zeroed(io.buffer_size(pattern.len()), io.alignment())?;
    tile_pattern(expected.as_mut_slice(), pattern);
    let mut readbuf = AlignedBuffer::zeroed(io.io_blocksize, io.alignment())?;
    rewind(io)?;

    let mut remaining = io.ctx.device_size;
    let mut w: usize = 0;

    while remaining > 0 {
        if io.ctx.cancelled() {
            return Ok(PassStatus::Cancelled);
        }

        let n = remaining.min(io.io_blocksize as u64) as usize;
        let got = nix::unistd::read(io.fd, &mut readbuf.as_mut_slice()[..n]).map_err(to_io_error)?;
        settle_short_read(io, n, got)?;

        if got > 0 && readbuf.as_slice()[..got] != expected.as_slice()[w..w + got] {
            io.ctx
                .progress
                .verify_errors
                .fetch_add(1, Ordering::Relaxed);
        }

        remaining -= n as u64;
        w = (w + got % pattern.len()) % pattern.len();
        account(io, got, None);
    }

    Ok(PassStatus::Completed)
}

/// Write one seeded PRNG stream across the whole device. The caller hands
/// in a freshly seeded generator; verification later reconstructs the same
/// stream from the retained seed.
pub fn random_pass(io: &PassIo, prng: &mut Prng) -> io::Result<PassStatus> {
    // Zeroed up front so a defective generator cannot leak stale memory.
    let mut buffer = AlignedBuffer::zeroed(io.buffer_size(0), io.alignment())?;
    rewind(io)?;

    let mut remaining = io.ctx.device_size;
    let mut offset: u64 = 0;
    let mut writes_since_sync: u64 = 0;
    let mut first_block = true;

    while remaining > 0 {
        if io.ctx.cancelled() {
            return Ok(PassStatus::Cancelled);
        }

        let n = remaining.min(io.io_blocksize as u64) as usize;
        prng.read(&mut buffer.as_mut_slice()[..n]);

        if first_block {
            // A generator emitting nothing but zeros would silently turn
            // every random pass into a blanking pass.
            if buffer.as_slice()[..n].iter().all(|&b| b == 0) {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "PRNG produced an all-zero first block",
                ));
            }
            first_block = false;
        }

        let written = nix::unistd::write(io.fd, &buffer.as_slice()[..n]).map_err(to_io_error)?;
        settle_short_write(io, n, written)?;

        offset += n as u64;
        remaining -= n as u64;
        account(io, written, Some(offset - (n - written) as u64));

        if io.sync_every > 0 {
            writes_since_sync += 1;
            if writes_since_sync >= io.sync_every {
                flush(io)?;
                writes_since_sync = 0;
            }
        }
    }

    flush(io)?;
    Ok(PassStatus::Completed)
}

/// Read the device back against a PRNG re-seeded with the seed of the
/// matching write pass. Counts one error per mismatching I/O block.
pub fn random_verify(io: &PassIo, prng: &mut Prng) -> io::Result<PassStatus> {
    flush(io)?;

    let mut expected = AlignedBuffer::zeroed(io.buffer_size(0), io.alignment())?;
    let mut readbuf = AlignedBuffer::zeroed(io.io_blocksize, io.alignment())?;
    rewind(io)?;

    let mut remaining = io.ctx.device_size;

    while remaining > 0 {
        if io.ctx.cancelled() {
            return Ok(PassStatus::Cancelled);
        }

        let n = remaining.min(io.io_blocksize as u64) as usize;
        prng.read(&mut expected.as_mut_slice()[..n]);
        let got = nix::unistd::read(io.fd, &mut readbuf.as_mut_slice()[..n]).map_err(to_io_error)?;
        settle_short_read(io, n, got)?;

        if got > 0 && readbuf.as_slice()[..got] != expected.as_slice()[..got] {
            io.ctx
                .progress
                .verify_errors
                .fetch_add(1, Ordering::Relaxed);
        }

        remaining -= n as u64;
        account(io, got, None);
    }

    Ok(PassStatus::Completed)
}
