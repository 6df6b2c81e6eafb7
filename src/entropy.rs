/*
 *  entropy.rs: Seed material from the operating system RNG.
 *
 *  Copyright Darik Horn <dajhorn-dban@vanadac.com>.
 *  Modifications to original dwipe Copyright Andy Beverley <andy@andybev.com>
 *  Rust conversion: 2023
 *
 *  This program is free software; you can redistribute it and/or modify it under
 *  the terms of the GNU General Public License as published by the Free Software
 *  Foundation, version 2.
 */

use std::io;

use crate::context::PrngSeed;

/// The number of seed bytes drawn for each random pass. 64 bytes is enough
/// raw input for every registered generator after hashing.
pub const SEED_LEN: usize = 64;

/// Fill `buf` from the OS cryptographic RNG. A short or failed read is
/// fatal to the caller; there are no retries.
pub fn read_entropy(buf: &mut [u8]) -> io::Result<()> {
    getrandom::getrandom(buf)
        .map_err(|e| io::Error::new(io::ErrorKind::Other, format!("entropy source failed: {}", e)))
}

/// Draw a fresh per-pass PRNG seed.
pub fn draw_seed() -> io::Result<PrngSeed> {
    let mut bytes = vec![0u8; SEED_LEN];
    read_entropy(&mut bytes)?;
    Ok(PrngSeed::new(bytes))
}

/// Draw a uniform index in `[0, bound)` by rejection sampling, for the
/// Fisher-Yates shuffle of pattern tables.
pub fn draw_index(bound: usize) -> io::Result<usize> {
    debug_assert!(bound > 0);
    let bound = bound as u32;
    let zone = u32::MAX - (u32::MAX % bound);
    loop {
        let mut raw = [0u8; 4];
        read_entropy(&mut raw)?;
        let value = u32::from_le_bytes(raw);
        if value < zone {
            return Ok((value % bound) as usize);
        }
    }
}
