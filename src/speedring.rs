/*
 *  speedring.rs: Rolling throughput estimation for rwipe.
 *
 *  Copyright Darik Horn <dajhorn-dban@vanadac.com>.
 *  Modifications to original dwipe Copyright Andy Beverley <andy@andybev.com>
 *  Rust conversion: 2023
 *
 *  This program is free software; you can redistribute it and/or modify it under
 *  the terms of the GNU General Public License as published by the Free Software
 *  Foundation, version 2.
 */

/// The number of samples in the ring.
const SPEEDRING_SIZE: usize = 30;

/// The minimum seconds between accepted samples.
const SPEEDRING_GRANULARITY: i64 = 10;

/// A fixed-size ring of byte/time deltas averaging recent throughput.
/// Samples arriving faster than the granularity are ignored, so the
/// estimate reflects tens of seconds of history rather than scheduler
/// jitter.
#[derive(Debug)]
pub struct Speedring {
    bytes: [u64; SPEEDRING_SIZE],
    times: [i64; SPEEDRING_SIZE],
    position: usize,
    bytes_total: u64,
    time_total: i64,
    last_bytes: u64,
    last_time: i64,
    primed: bool,
}

impl Default for Speedring {
    fn default() -> Self {
        Self::new()
    }
}

impl Speedring {
    pub fn new() -> Self {
        Self {
            bytes: [0; SPEEDRING_SIZE],
            times: [0; SPEEDRING_SIZE],
            position: 0,
            bytes_total: 0,
            time_total: 0,
            last_bytes: 0,
            last_time: 0,
            primed: false,
        }
    }

    /// Offer a progress sample: total bytes done so far, and the wall
    /// clock in seconds. The first call primes the ring with a zero delta.
    pub fn sample(&mut self, bytes_done: u64, now: i64) {
        if !self.primed {
            self.last_bytes = bytes_done;
            self.last_time = now;
            self.primed = true;
            return;
        }

        if now - self.last_time < SPEEDRING_GRANULARITY {
            return;
        }

        let delta_bytes = bytes_done.saturating_sub(self.last_bytes);
        let delta_time = now - self.last_time;

        // Retire the slot being overwritten from the running sums.
        self.bytes_total -= self.bytes[self.position];
        self.time_total -= self.times[self.position];

        self.bytes[self.position] = delta_bytes;
        self.times[self.position] = delta_time;
        self.bytes_total += delta_bytes;
        self.time_total += delta_time;

        self.position = (self.position + 1) % SPEEDRING_SIZE;
        self.last_bytes = bytes_done;
        self.last_time = now;
    }

    /// Average throughput in bytes per second over the retained samples.
    pub fn throughput(&self) -> u64 {
        if self.time_total > 0 {
            self.bytes_total / self.time_total as u64
        } else {
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_sample_is_zero_delta() {
        let mut ring = Speedring::new();
        ring.sample(1_000_000, 100);
        assert_eq!(ring.throughput(), 0);
    }

    #[test]
    fn throughput_averages_accepted_samples() {
        let mut ring = Speedring::new();
        ring.sample(0, 0);
        ring.sample(100 * 1024 * 1024, 10);
        ring.sample(200 * 1024 * 1024, 20);
        assert_eq!(ring.throughput(), 10 * 1024 * 1024);
    }

    #[test]
    fn samples_within_granularity_are_ignored() {
        let mut ring = Speedring::new();
        ring.sample(0, 0);
        ring.sample(500, 3);
        ring.sample(900, 7);
        assert_eq!(ring.throughput(), 0);
        ring.sample(10_000, 10);
        assert_eq!(ring.throughput(), 1_000);
    }

    #[test]
    fn ring_retires_old_samples() {
        let mut ring = Speedring::new();
        ring.sample(0, 0);
        let mut t = 0;
        let mut bytes = 0u64;
        // Fill the ring once at 100 B/s, then again at 200 B/s.
        for _ in 0..SPEEDRING_SIZE {
            t += 10;
            bytes += 1_000;
            ring.sample(bytes, t);
        }
        assert_eq!(ring.throughput(), 100);
        for _ in 0..SPEEDRING_SIZE {
            t += 10;
            bytes += 2_000;
            ring.sample(bytes, t);
        }
        assert_eq!(ring.throughput(), 200);
    }
}
