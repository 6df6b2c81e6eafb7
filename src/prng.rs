/*
 *  prng.rs: Pseudo-random number generation for rwipe.
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

use aes::Aes256;
use ctr::cipher::{KeyIvInit, StreamCipher};
use ctr::Ctr128BE;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;
use rand_isaac::{Isaac64Rng, IsaacRng};
use rand_mt::Mt64;
use rand_xoshiro::Xoshiro256PlusPlus;
use sha2::{Digest, Sha512};

use crate::context::PrngSeed;

type Aes256Ctr = Ctr128BE<Aes256>;

/// Seeding failed; the underlying primitive rejected the seed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedError(pub &'static str);

impl fmt::Display for SeedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PRNG seeding failed: {}", self.0)
    }
}

impl std::error::Error for SeedError {}

/// The registered generators, keyed by stable short name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrngKind {
    Twister,
    Isaac,
    Isaac64,
    AddLaggFib,
    Xoroshiro256,
    Rc4,
    ChaCha20,
    ShaDrbg,
    AesCtr,
}

impl PrngKind {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "twister" | "mt19937" => Some(PrngKind::Twister),
            "isaac" => Some(PrngKind::Isaac),
            "isaac64" => Some(PrngKind::Isaac64),
            "add_lagg_fib" => Some(PrngKind::AddLaggFib),
            "xoroshiro256" => Some(PrngKind::Xoroshiro256),
            "rc4" => Some(PrngKind::Rc4),
            "chacha20" => Some(PrngKind::ChaCha20),
            "sha_dbrg" => Some(PrngKind::ShaDrbg),
            "aes_ctr" => Some(PrngKind::AesCtr),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            PrngKind::Twister => "twister",
            PrngKind::Isaac => "isaac",
            PrngKind::Isaac64 => "isaac64",
            PrngKind::AddLaggFib => "add_lagg_fib",
            PrngKind::Xoroshiro256 => "xoroshiro256",
            PrngKind::Rc4 => "rc4",
            PrngKind::ChaCha20 => "chacha20",
            PrngKind::ShaDrbg => "sha_dbrg",
            PrngKind::AesCtr => "aes_ctr",
        }
    }

    /// The human label shown in option listings and logs.
    pub fn label(self) -> &'static str {
        match self {
            PrngKind::Twister => "Mersenne Twister (MT19937-64)",
            PrngKind::Isaac => "ISAAC",
            PrngKind::Isaac64 => "ISAAC-64",
            PrngKind::AddLaggFib => "Additive Lagged Fibonacci",
            PrngKind::Xoroshiro256 => "Xoroshiro-256",
            PrngKind::Rc4 => "RC4 with counter rekeying",
            PrngKind::ChaCha20 => "ChaCha20 keystream",
            PrngKind::ShaDrbg => "SHA-512 DRBG",
            PrngKind::AesCtr => "AES-256-CTR",
        }
    }

    pub fn all() -> &'static [PrngKind] {
        &[
            PrngKind::Twister,
            PrngKind::Isaac,
            PrngKind::Isaac64,
            PrngKind::AddLaggFib,
            PrngKind::Xoroshiro256,
            PrngKind::Rc4,
            PrngKind::ChaCha20,
            PrngKind::ShaDrbg,
            PrngKind::AesCtr,
        ]
    }
}

/// A seeded generator producing output in fixed "natural block" units.
/// Implementations must be byte-for-byte deterministic given the same seed.
pub trait BlockGenerator: Send {
    /// The generator's natural output unit in bytes.
    fn natural_block(&self) -> usize;

    /// Fill `out`, whose length is exactly `natural_block()`.
    fn next_block(&mut self, out: &mut [u8]);
}

/// A live PRNG: a boxed generator plus the scratch block used to adapt
/// partial tails. `read` satisfies any byte count by producing whole
/// natural blocks and copying the prefix of one extra block for the tail.
pub struct Prng {
    generator: Box<dyn BlockGenerator>,
    scratch: Vec<u8>,
}

impl Prng {
    /// Seed a generator of the given kind. Every kind hashes the seed into
    /// its internal state, so re-seeding fully resets counters and sub-state.
    pub fn init(kind: PrngKind, seed: &PrngSeed) -> Result<Self, SeedError> {
        if seed.is_empty() {
            return Err(SeedError("empty seed"));
        }
        let digest = digest_seed(seed);
        let generator: Box<dyn BlockGenerator> = match kind {
            PrngKind::Twister => Box::new(TwisterGen::new(&digest)),
            PrngKind::Isaac => Box::new(IsaacGen::new(&digest)),
            PrngKind::Isaac64 => Box::new(Isaac64Gen::new(&digest)),
            PrngKind::AddLaggFib => Box::new(AddLaggFibGen::new(&digest)),
            PrngKind::Xoroshiro256 => Box::new(Xoroshiro256Gen::new(&digest)),
            PrngKind::Rc4 => Box::new(Rc4Gen::new(&seed.s)),
            PrngKind::ChaCha20 => Box::new(ChaCha20Gen::new(&digest)),
            PrngKind::ShaDrbg => Box::new(ShaDrbgGen::new(&digest)),
            PrngKind::AesCtr => Box::new(AesCtrGen::new(&digest)),
        };
        Ok(Self::from_generator(generator))
    }

    /// Wrap an already-seeded generator. Public so callers can supply
    /// custom generators.
    pub fn from_generator(generator: Box<dyn BlockGenerator>) -> Self {
        let block = generator.natural_block();
        Self {
            generator,
            scratch: vec![0u8; block],
        }
    }

    /// Write exactly `out.len()` generated bytes. Infallible once seeded.
    pub fn read(&mut self, out: &mut [u8]) {
        let block = self.generator.natural_block();
        let mut chunks = out.chunks_exact_mut(block);
        for chunk in &mut chunks {
            self.generator.next_block(chunk);
        }
        let tail = chunks.into_remainder();
        if !tail.is_empty() {
            self.generator.next_block(&mut self.scratch);
            let len = tail.len();
            tail.copy_from_slice(&self.scratch[..len]);
        }
    }
}

/// Condense an arbitrary-length seed into 64 bytes of key material.
fn digest_seed(seed: &PrngSeed) -> [u8; 64] {
    let mut out = [0u8; 64];
    out.copy_from_slice(&Sha512::digest(&seed.s));
    out
}

// ---------------------------------------------------------------------------
// Mersenne Twister
// ---------------------------------------------------------------------------

struct TwisterGen {
    rng: Mt64,
}

impl TwisterGen {
    fn new(digest: &[u8; 64]) -> Self {
        let mut word = [0u8; 8];
        word.copy_from_slice(&digest[..8]);
        Self {
            rng: Mt64::new(u64::from_le_bytes(word)),
        }
    }
}

impl BlockGenerator for TwisterGen {
    fn natural_block(&self) -> usize {
        8
    }

    fn next_block(&mut self, out: &mut [u8]) {
        out.copy_from_slice(&self.rng.next_u64().to_le_bytes());
    }
}

// ---------------------------------------------------------------------------
// ISAAC and ISAAC-64
// ---------------------------------------------------------------------------

struct IsaacGen {
    rng: IsaacRng,
}

impl IsaacGen {
    fn new(digest: &[u8; 64]) -> Self {
        let mut seed = [0u8; 32];
        seed.copy_from_slice(&digest[..32]);
        Self {
            rng: IsaacRng::from_seed(seed),
        }
    }
}

impl BlockGenerator for IsaacGen {
    fn natural_block(&self) -> usize {
        4
    }

    fn next_block(&mut self, out: &mut [u8]) {
        out.copy_from_slice(&self.rng.next_u32().to_le_bytes());
    }
}

struct Isaac64Gen {
    rng: Isaac64Rng,
}

impl Isaac64Gen {
    fn new(digest: &[u8; 64]) -> Self {
        let mut seed = [0u8; 32];
        seed.copy_from_slice(&digest[..32]);
        Self {
            rng: Isaac64Rng::from_seed(seed),
        }
    }
}

impl BlockGenerator for Isaac64Gen {
    fn natural_block(&self) -> usize {
        8
    }

    fn next_block(&mut self, out: &mut [u8]) {
        out.copy_from_slice(&self.rng.next_u64().to_le_bytes());
    }
}

// ---------------------------------------------------------------------------
// Additive lagged Fibonacci, lags (55, 24) over u64
// ---------------------------------------------------------------------------

const LAG_LONG: usize = 55;
const LAG_SHORT: usize = 24;

struct AddLaggFibGen {
    state: [u64; LAG_LONG],
    index: usize,
}

impl AddLaggFibGen {
    fn new(digest: &[u8; 64]) -> Self {
        // Expand the 64-byte digest into 55 state words by re-hashing with
        // a block counter.
        let mut state = [0u64; LAG_LONG];
        let mut filled = 0;
        let mut block: u64 = 0;
        while filled < LAG_LONG {
            let mut h = Sha512::new();
            h.update(digest);
            h.update(block.to_be_bytes());
            let expansion = h.finalize();
            for word in expansion.chunks_exact(8) {
                if filled == LAG_LONG {
                    break;
                }
                state[filled] = u64::from_le_bytes(word.try_into().unwrap());
                filled += 1;
            }
            block += 1;
        }
        // The additive recurrence degenerates if every word is even.
        state[0] |= 1;
        Self { state, index: 0 }
    }

    fn next_u64(&mut self) -> u64 {
        let lagged = self.state[(self.index + LAG_LONG - LAG_SHORT) % LAG_LONG];
        let next = self.state[self.index].wrapping_add(lagged);
        self.state[self.index] = next;
        self.index = (self.index + 1) % LAG_LONG;
        next
    }
}

impl BlockGenerator for AddLaggFibGen {
    fn natural_block(&self) -> usize {
        32
    }

    fn next_block(&mut self, out: &mut [u8]) {
        for word in out.chunks_exact_mut(8) {
            word.copy_from_slice(&self.next_u64().to_le_bytes());
        }
    }
}

// ---------------------------------------------------------------------------
// Xoroshiro-256
// ---------------------------------------------------------------------------

struct Xoroshiro256Gen {
    rng: Xoshiro256PlusPlus,
}

impl Xoroshiro256Gen {
    fn new(digest: &[u8; 64]) -> Self {
        let mut seed = [0u8; 32];
        seed.copy_from_slice(&digest[..32]);
        Self {
            rng: Xoshiro256PlusPlus::from_seed(seed),
        }
    }
}

impl BlockGenerator for Xoroshiro256Gen {
    fn natural_block(&self) -> usize {
        32
    }

    fn next_block(&mut self, out: &mut [u8]) {
        for word in out.chunks_exact_mut(8) {
            word.copy_from_slice(&self.rng.next_u64().to_le_bytes());
        }
    }
}

// ---------------------------------------------------------------------------
// RC4 with counter rekeying
// ---------------------------------------------------------------------------

const RC4_BLOCK: usize = 4096;
// Initial keystream bytes discarded after key scheduling.
const RC4_DROP: usize = 3072;
// Swap rounds folding the block counter into the permutation. Verification
// regenerates the stream, so this count must never change.
const RC4_CTR_ROUNDS: usize = 8;

struct Rc4Gen {
    s: [u8; 256],
    i: u8,
    j: u8,
    counter: u64,
}

impl Rc4Gen {
    fn new(key: &[u8]) -> Self {
        let mut s = [0u8; 256];
        for (idx, slot) in s.iter_mut().enumerate() {
            *slot = idx as u8;
        }
        let mut j: u8 = 0;
        for idx in 0..256 {
            j = j
                .wrapping_add(s[idx])
                .wrapping_add(key[idx % key.len()]);
            s.swap(idx, j as usize);
        }
        let mut gen = Self {
            s,
            i: 0,
            j: 0,
            counter: 0,
        };
        let mut drop = [0u8; RC4_DROP];
        gen.keystream(&mut drop);
        gen
    }

    /// Fold the 64-bit block counter into the S-box permutation.
    fn rekey(&mut self) {
        let ctr = self.counter.to_le_bytes();
        let mut i = self.i;
        let mut j = self.j;
        for _ in 0..RC4_CTR_ROUNDS {
            for &byte in ctr.iter() {
                j = j.wrapping_add(self.s[i as usize]).wrapping_add(byte);
                self.s.swap(i as usize, j as usize);
                i = i.wrapping_add(1);
            }
        }
        self.i = i;
        self.j = j;
    }

    fn keystream(&mut self, out: &mut [u8]) {
        let mut i = self.i;
        let mut j = self.j;
        for byte in out.iter_mut() {
            i = i.wrapping_add(1);
            j = j.wrapping_add(self.s[i as usize]);
            self.s.swap(i as usize, j as usize);
            let t = self.s[i as usize].wrapping_add(self.s[j as usize]);
            *byte = self.s[t as usize];
        }
        self.i = i;
        self.j = j;
    }
}

impl BlockGenerator for Rc4Gen {
    fn natural_block(&self) -> usize {
        RC4_BLOCK
    }

    fn next_block(&mut self, out: &mut [u8]) {
        self.rekey();
        self.keystream(out);
        self.counter += 1;
    }
}

// ---------------------------------------------------------------------------
// ChaCha20 keystream
// ---------------------------------------------------------------------------

struct ChaCha20Gen {
    rng: ChaCha20Rng,
}

impl ChaCha20Gen {
    fn new(digest: &[u8; 64]) -> Self {
        let mut seed = [0u8; 32];
        seed.copy_from_slice(&digest[..32]);
        Self {
            rng: ChaCha20Rng::from_seed(seed),
        }
    }
}

impl BlockGenerator for ChaCha20Gen {
    fn natural_block(&self) -> usize {
        64
    }

    fn next_block(&mut self, out: &mut [u8]) {
        self.rng.fill_bytes(out);
    }
}

// ---------------------------------------------------------------------------
// SHA-512 DRBG
// ---------------------------------------------------------------------------

struct ShaDrbgGen {
    v: [u8; 64],
    counter: u64,
}

impl ShaDrbgGen {
    fn new(digest: &[u8; 64]) -> Self {
        Self {
            v: *digest,
            counter: 0,
        }
    }
}

impl BlockGenerator for ShaDrbgGen {
    fn natural_block(&self) -> usize {
        64
    }

    fn next_block(&mut self, out: &mut [u8]) {
        let mut h = Sha512::new();
        h.update(self.v);
        h.update(self.counter.to_be_bytes());
        out.copy_from_slice(&h.finalize());
        self.counter += 1;
    }
}

// ---------------------------------------------------------------------------
// AES-256-CTR
// ---------------------------------------------------------------------------

struct AesCtrGen {
    // AES-NI dispatch happens inside the cipher; output is identical on
    // every code path.
    cipher: Aes256Ctr,
}

impl AesCtrGen {
    fn new(digest: &[u8; 64]) -> Self {
        let mut key = [0u8; 32];
        key.copy_from_slice(&digest[..32]);
        let mut iv = [0u8; 16];
        iv.copy_from_slice(&digest[32..48]);
        Self {
            cipher: Aes256Ctr::new(&key.into(), &iv.into()),
        }
    }
}

impl BlockGenerator for AesCtrGen {
    fn natural_block(&self) -> usize {
        16
    }

    fn next_block(&mut self, out: &mut [u8]) {
        out.fill(0);
        self.cipher.apply_keystream(out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seed_of(byte: u8) -> PrngSeed {
        PrngSeed::new(vec![byte; 64])
    }

    #[test]
    fn names_round_trip() {
        for &kind in PrngKind::all() {
            assert_eq!(PrngKind::from_name(kind.name()), Some(kind));
        }
        assert_eq!(PrngKind::from_name("bogus"), None);
    }

    #[test]
    fn same_seed_same_stream() {
        for &kind in PrngKind::all() {
            let seed = seed_of(0xA5);
            let mut a = Prng::init(kind, &seed).unwrap();
            let mut b = Prng::init(kind, &seed).unwrap();
            let mut out_a = vec![0u8; 512];
            let mut out_b = vec![0u8; 512];
            a.read(&mut out_a);
            b.read(&mut out_b);
            assert_eq!(out_a, out_b, "{} diverged", kind.name());
        }
    }

    #[test]
    fn different_seed_different_stream() {
        for &kind in PrngKind::all() {
            let mut a = Prng::init(kind, &seed_of(0x01)).unwrap();
            let mut b = Prng::init(kind, &seed_of(0x02)).unwrap();
            let mut out_a = vec![0u8; 256];
            let mut out_b = vec![0u8; 256];
            a.read(&mut out_a);
            b.read(&mut out_b);
            assert_ne!(out_a, out_b, "{} ignored its seed", kind.name());
        }
    }

    #[test]
    fn tail_is_prefix_of_aligned_read() {
        for &kind in PrngKind::all() {
            let seed = seed_of(0x5A);
            let mut short = Prng::init(kind, &seed).unwrap();
            let mut long = Prng::init(kind, &seed).unwrap();
            // An unaligned request is served by one extra natural block
            // whose prefix is copied, so it must match the aligned stream.
            let mut out_short = vec![0u8; 4099];
            let mut out_long = vec![0u8; 8192];
            short.read(&mut out_short);
            long.read(&mut out_long);
            assert_eq!(
                out_short[..],
                out_long[..4099],
                "{} tail adaptation broke the stream",
                kind.name()
            );
        }
    }

    #[test]
    fn counter_mode_blocks_never_repeat() {
        for kind in [PrngKind::Rc4, PrngKind::ChaCha20, PrngKind::AesCtr] {
            let mut prng = Prng::init(kind, &seed_of(0x77)).unwrap();
            let mut first = vec![0u8; 4096];
            let mut second = vec![0u8; 4096];
            prng.read(&mut first);
            prng.read(&mut second);
            assert_ne!(first, second, "{} repeated a keystream block", kind.name());
        }
    }

    #[test]
    fn empty_seed_is_rejected() {
        for &kind in PrngKind::all() {
            assert!(Prng::init(kind, &PrngSeed::default()).is_err());
        }
    }

    #[test]
    fn read_fills_odd_lengths() {
        let mut prng = Prng::init(PrngKind::ShaDrbg, &seed_of(0x31)).unwrap();
        let mut out = vec![0u8; 4097];
        prng.read(&mut out);
        assert!(out.iter().any(|&b| b != 0));
    }
}
