/*
 *  method.rs: Wiping methods for rwipe.
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
use std::os::unix::io::RawFd;
use std::sync::atomic::Ordering;

use crate::context::{DeviceContext, PassType};
use crate::entropy;
use crate::logging::{wipe_log, LogLevel};
use crate::options::VerifyPolicy;
use crate::pass::{random_pass, random_verify, static_pass, static_verify, PassIo, PassStatus};
use crate::prng::Prng;

/// The method ran to completion without any error.
pub const RESULT_CLEAN: i32 = 0;
/// The method completed but accumulated non-fatal errors.
pub const RESULT_ERRORS: i32 = 1;
/// The method aborted on a fatal I/O or seeding error.
pub const RESULT_FATAL: i32 = -1;
/// The method stopped on a cancellation request.
pub const RESULT_CANCELLED: i32 = -2;

/// One entry of a method's pass recipe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pattern {
    /// A byte sequence tiled across the device.
    Static(Vec<u8>),
    /// A stream drawn from the PRNG seeded for this pass.
    Random,
}

/// The registered wipe methods, keyed by stable short name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WipeMethod {
    Zero,
    One,
    Ops2,
    DodShort,
    Dod522022m,
    Gutmann,
    Prng,
    Is5Enhanced,
    VerifyZero,
    VerifyOne,
}

impl WipeMethod {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "zero" => Some(WipeMethod::Zero),
            "one" => Some(WipeMethod::One),
            "ops2" => Some(WipeMethod::Ops2),
            "dodshort" => Some(WipeMethod::DodShort),
            "dod522022m" => Some(WipeMethod::Dod522022m),
            "gutmann" => Some(WipeMethod::Gutmann),
            "prng" => Some(WipeMethod::Prng),
            "is5enh" => Some(WipeMethod::Is5Enhanced),
            "verify_zero" => Some(WipeMethod::VerifyZero),
            "verify_one" => Some(WipeMethod::VerifyOne),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            WipeMethod::Zero => "zero",
            WipeMethod::One => "one",
            WipeMethod::Ops2 => "ops2",
            WipeMethod::DodShort => "dodshort",
            WipeMethod::Dod522022m => "dod522022m",
            WipeMethod::Gutmann => "gutmann",
            WipeMethod::Prng => "prng",
            WipeMethod::Is5Enhanced => "is5enh",
            WipeMethod::VerifyZero => "verify_zero",
            WipeMethod::VerifyOne => "verify_one",
        }
    }

    /// The human label shown in option listings and logs.
    pub fn label(self) -> &'static str {
        match self {
            WipeMethod::Zero => "Fill With Zeros",
            WipeMethod::One => "Fill With Ones",
            WipeMethod::Ops2 => "RCMP TSSIT OPS-II",
            WipeMethod::DodShort => "DoD Short",
            WipeMethod::Dod522022m => "DoD 5220.22-M",
            WipeMethod::Gutmann => "Gutmann Wipe",
            WipeMethod::Prng => "PRNG Stream",
            WipeMethod::Is5Enhanced => "HMG IS5 Enhanced",
            WipeMethod::VerifyZero => "Verify Zeros",
            WipeMethod::VerifyOne => "Verify Ones",
        }
    }

    pub fn all() -> &'static [WipeMethod] {
        &[
            WipeMethod::Zero,
            WipeMethod::One,
            WipeMethod::Ops2,
            WipeMethod::DodShort,
            WipeMethod::Dod522022m,
            WipeMethod::Gutmann,
            WipeMethod::Prng,
            WipeMethod::Is5Enhanced,
            WipeMethod::VerifyZero,
            WipeMethod::VerifyOne,
        ]
    }

    /// OPS-II mandates a final random pass and the verify-only methods
    /// write nothing, so none of them accept a trailing blank.
    pub fn allows_blanking(self) -> bool {
        !matches!(
            self,
            WipeMethod::Ops2 | WipeMethod::VerifyZero | WipeMethod::VerifyOne
        )
    }

    pub fn is_verify_only(self) -> bool {
        matches!(self, WipeMethod::VerifyZero | WipeMethod::VerifyOne)
    }
}

/// Gutmann passes 5-31. The leading and trailing four random passes stay
/// fixed; these 27 are shuffled per invocation.
const GUTMANN_PATTERNS: [[u8; 3]; 27] = [
    [0x55, 0x55, 0x55],
    [0xAA, 0xAA, 0xAA],
    [0x92, 0x49, 0x24],
    [0x49, 0x24, 0x92],
    [0x24, 0x92, 0x49],
    [0x00, 0x00, 0x00],
    [0x11, 0x11, 0x11],
    [0x22, 0x22, 0x22],
    [0x33, 0x33, 0x33],
    [0x44, 0x44, 0x44],
    [0x55, 0x55, 0x55],
    [0x66, 0x66, 0x66],
    [0x77, 0x77, 0x77],
    [0x88, 0x88, 0x88],
    [0x99, 0x99, 0x99],
    [0xAA, 0xAA, 0xAA],
    [0xBB, 0xBB, 0xBB],
    [0xCC, 0xCC, 0xCC],
    [0xDD, 0xDD, 0xDD],
    [0xEE, 0xEE, 0xEE],
    [0xFF, 0xFF, 0xFF],
    [0x92, 0x49, 0x24],
    [0x49, 0x24, 0x92],
    [0x24, 0x92, 0x49],
    [0x6D, 0xB6, 0xDB],
    [0xB6, 0xDB, 0x6D],
    [0xDB, 0x6D, 0xB6],
];

fn draw_byte() -> io::Result<u8> {
    let mut b = [0u8; 1];
    entropy::read_entropy(&mut b)?;
    Ok(b[0])
}

/// Build the per-invocation pass recipe for a method. Methods with random
/// byte literals draw them here; Gutmann's middle patterns are permuted
/// with a uniform Fisher-Yates shuffle from the entropy source.
pub fn build_patterns(method: WipeMethod) -> io::Result<Vec<Pattern>> {
    let patterns = match method {
        WipeMethod::Zero => vec![Pattern::Static(vec![0x00])],
        WipeMethod::One => vec![Pattern::Static(vec![0xFF])],
        WipeMethod::Prng => vec![Pattern::Random],
        WipeMethod::DodShort => {
            let first = draw_byte()?;
            vec![
                Pattern::Static(vec![first]),
                Pattern::Static(vec![!first]),
                Pattern::Random,
            ]
        }
        WipeMethod::Dod522022m => {
            let first = draw_byte()?;
            let fourth = draw_byte()?;
            let fifth = draw_byte()?;
            vec![
                Pattern::Static(vec![first]),
                Pattern::Static(vec![!first]),
                Pattern::Random,
                Pattern::Static(vec![fourth]),
                Pattern::Static(vec![fifth]),
                Pattern::Static(vec![!fifth]),
                Pattern::Random,
            ]
        }
        WipeMethod::Ops2 => {
            let last = draw_byte()?;
            vec![
                Pattern::Static(vec![0x00]),
                Pattern::Static(vec![0xFF]),
                Pattern::Static(vec![0x00]),
                Pattern::Static(vec![0xFF]),
                Pattern::Static(vec![0x00]),
                Pattern::Static(vec![0xFF]),
                Pattern::Static(vec![last]),
            ]
        }
        WipeMethod::Gutmann => {
            let mut middle = GUTMANN_PATTERNS;
            for i in (1..middle.len()).rev() {
                let j = entropy::draw_index(i + 1)?;
                middle.swap(i, j);
            }
            let mut patterns = Vec::with_capacity(35);
            for _ in 0..4 {
                patterns.push(Pattern::Random);
            }
            for p in &middle {
                patterns.push(Pattern::Static(p.to_vec()));
            }
            for _ in 0..4 {
                patterns.push(Pattern::Random);
            }
            patterns
        }
        WipeMethod::Is5Enhanced => vec![
            Pattern::Static(vec![0x00]),
            Pattern::Static(vec![0xFF]),
            Pattern::Random,
        ],
        WipeMethod::VerifyZero | WipeMethod::VerifyOne => Vec::new(),
    };
    Ok(patterns)
}

/// The number of bytes the whole job will read and write, used for the
/// percentage display. Must agree with what the orchestrator actually
/// does, so every verify and final-stage rule is mirrored here.
pub fn plan_round_size(
    method: WipeMethod,
    device_size: u64,
    pass_count: u64,
    rounds: u64,
    verify: VerifyPolicy,
    blank_after: bool,
) -> u64 {
    if method.is_verify_only() {
        return device_size;
    }

    let mut size = pass_count * device_size * rounds;
    if verify == VerifyPolicy::All {
        size *= 2;
    } else if method == WipeMethod::Is5Enhanced {
        // The IS5 recipe reads back its random pass in every round even
        // when the user asked for no verification.
        size += device_size * rounds;
    }

    match method {
        WipeMethod::Ops2 => {
            size += device_size;
            if verify != VerifyPolicy::None {
                size += device_size;
            }
        }
        _ => {
            if blank_after {
                size += device_size;
                if verify != VerifyPolicy::None {
                    size += device_size;
                }
            } else if verify == VerifyPolicy::Last && method != WipeMethod::Is5Enhanced {
                size += device_size;
            }
        }
    }
    size
}

/// Run the configured method against an open device. Returns
/// `RESULT_CLEAN`, `RESULT_ERRORS` when any non-fatal counter is nonzero,
/// `RESULT_CANCELLED` on a cancellation request, or a negative fatal code.
pub fn run_method(ctx: &DeviceContext, fd: RawFd) -> i32 {
    let io = PassIo::new(ctx, fd);

    match run_passes(ctx, &io) {
        Ok(true) => {
            if ctx.progress.error_total() > 0 {
                RESULT_ERRORS
            } else {
                RESULT_CLEAN
            }
        }
        Ok(false) => {
            wipe_log(
                LogLevel::Notice,
                &format!("Wipe of {} cancelled", ctx.device_name),
            );
            RESULT_CANCELLED
        }
        Err(e) => {
            wipe_log(
                LogLevel::Error,
                &format!("Fatal error wiping {}: {}", ctx.device_name, e),
            );
            RESULT_FATAL
        }
    }
}

/// Seed a fresh PRNG for a random pass, retaining the seed in the context
/// so the verify pass can regenerate the identical stream.
fn seed_prng(ctx: &DeviceContext) -> io::Result<Prng> {
    let seed = entropy::draw_seed()?;
    let prng = Prng::init(ctx.options.prng, &seed)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))?;
    *ctx.prng_seed.lock().unwrap() = seed;
    Ok(prng)
}

/// Re-seed from the retained per-pass seed for verification.
fn reseed_prng(ctx: &DeviceContext) -> io::Result<Prng> {
    let seed = ctx.prng_seed.lock().unwrap().clone();
    Prng::init(ctx.options.prng, &seed)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))
}

/// Returns Ok(true) when the method ran to completion, Ok(false) on
/// cancellation, Err on a fatal error.
fn run_passes(ctx: &DeviceContext, io: &PassIo) -> io::Result<bool> {
    let options = &ctx.options;
    let method = options.method;
    let verify = options.verify;
    let progress = &ctx.progress;

    let patterns = build_patterns(method)?;
    let pass_count = patterns.len().max(1);
    let rounds = options.rounds.max(1);

    let mut pass_size = pass_count as u64 * ctx.device_size;
    if verify == VerifyPolicy::All {
        pass_size *= 2;
    }

    progress.pass_count.store(pass_count as i32, Ordering::Relaxed);
    progress.pass_size.store(pass_size, Ordering::Relaxed);
    progress.round_count.store(rounds, Ordering::Relaxed);
    progress.round_done.store(0, Ordering::Relaxed);
    progress.set_round_percent(0.0);
    progress.round_size.store(
        plan_round_size(
            method,
            ctx.device_size,
            pass_count as u64,
            rounds as u64,
            verify,
            options.blank_after,
        ),
        Ordering::Relaxed,
    );

    wipe_log(
        LogLevel::Notice,
        &format!(
            "Running {} on {} ({} pass(es), {} round(s))",
            method.label(),
            ctx.device_name,
            pass_count,
            rounds
        ),
    );

    for round in 1..=rounds {
        progress.round_working.store(round, Ordering::Relaxed);

        for (index, pattern) in patterns.iter().enumerate() {
            progress.pass_working.store(index as i32 + 1, Ordering::Relaxed);

            let lastpass = verify == VerifyPolicy::Last
                && method != WipeMethod::Ops2
                && !options.blank_after
                && round == rounds
                && index + 1 == patterns.len();

            match pattern {
                Pattern::Static(bytes) => {
                    progress.set_pass_type(PassType::Write);
                    if static_pass(io, bytes)? == PassStatus::Cancelled {
                        return Ok(false);
                    }
                    if verify == VerifyPolicy::All || lastpass {
                        progress.set_pass_type(PassType::Verify);
                        if static_verify(io, bytes)? == PassStatus::Cancelled {
                            return Ok(false);
                        }
                    }
                }
                Pattern::Random => {
                    let mut prng = seed_prng(ctx)?;
                    progress.set_pass_type(PassType::Write);
                    if random_pass(io, &mut prng)? == PassStatus::Cancelled {
                        return Ok(false);
                    }
                    // IS5 Enhanced is defined as "write random, then read
                    // it back", independent of the verification policy.
                    if verify == VerifyPolicy::All
                        || lastpass
                        || method == WipeMethod::Is5Enhanced
                    {
                        let mut prng = reseed_prng(ctx)?;
                        progress.set_pass_type(PassType::Verify);
                        if random_verify(io, &mut prng)? == PassStatus::Cancelled {
                            return Ok(false);
                        }
                    }
                }
            }
        }
    }

    // Final stage, exclusive per method.
    match method {
        WipeMethod::Ops2 => {
            let mut prng = seed_prng(ctx)?;
            progress.set_pass_type(PassType::FinalOps2);
            if random_pass(io, &mut prng)? == PassStatus::Cancelled {
                return Ok(false);
            }
            if verify != VerifyPolicy::None {
                let mut prng = reseed_prng(ctx)?;
                progress.set_pass_type(PassType::Verify);
                if random_verify(io, &mut prng)? == PassStatus::Cancelled {
                    return Ok(false);
                }
            }
        }
        WipeMethod::VerifyZero | WipeMethod::VerifyOne => {
            let byte = if method == WipeMethod::VerifyZero {
                0x00
            } else {
                0xFF
            };
            progress.round_working.store(1, Ordering::Relaxed);
            progress.pass_working.store(1, Ordering::Relaxed);
            progress.set_pass_type(PassType::Verify);
            if static_verify(io, &[byte])? == PassStatus::Cancelled {
                return Ok(false);
            }
        }
        _ => {
            if options.blank_after {
                progress.set_pass_type(PassType::FinalBlank);
                if static_pass(io, &[0x00])? == PassStatus::Cancelled {
                    return Ok(false);
                }
                if verify != VerifyPolicy::None {
                    progress.set_pass_type(PassType::Verify);
                    if static_verify(io, &[0x00])? == PassStatus::Cancelled {
                        return Ok(false);
                    }
                }
            }
        }
    }

    progress.set_pass_type(PassType::None);
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_names_round_trip() {
        for &method in WipeMethod::all() {
            assert_eq!(WipeMethod::from_name(method.name()), Some(method));
        }
        assert_eq!(WipeMethod::from_name("dban"), None);
    }

    #[test]
    fn dod_short_is_value_complement_random() {
        let patterns = build_patterns(WipeMethod::DodShort).unwrap();
        assert_eq!(patterns.len(), 3);
        match (&patterns[0], &patterns[1]) {
            (Pattern::Static(a), Pattern::Static(b)) => {
                assert_eq!(a.len(), 1);
                assert_eq!(b[0], !a[0]);
            }
            _ => panic!("expected static leading passes"),
        }
        assert_eq!(patterns[2], Pattern::Random);
    }

    #[test]
    fn dod_full_complements_sit_where_mandated() {
        let patterns = build_patterns(WipeMethod::Dod522022m).unwrap();
        assert_eq!(patterns.len(), 7);
        let byte = |p: &Pattern| match p {
            Pattern::Static(v) => v[0],
            Pattern::Random => panic!("expected a static pass"),
        };
        assert_eq!(byte(&patterns[1]), !byte(&patterns[0]));
        assert_eq!(byte(&patterns[5]), !byte(&patterns[4]));
        assert_eq!(patterns[2], Pattern::Random);
        assert_eq!(patterns[6], Pattern::Random);
    }

    #[test]
    fn gutmann_is_a_permutation_of_the_fixed_set() {
        let patterns = build_patterns(WipeMethod::Gutmann).unwrap();
        assert_eq!(patterns.len(), 35);
        for p in &patterns[..4] {
            assert_eq!(*p, Pattern::Random);
        }
        for p in &patterns[31..] {
            assert_eq!(*p, Pattern::Random);
        }

        let mut middle: Vec<[u8; 3]> = patterns[4..31]
            .iter()
            .map(|p| match p {
                Pattern::Static(v) => [v[0], v[1], v[2]],
                Pattern::Random => panic!("random pass inside the fixed set"),
            })
            .collect();
        let mut reference = GUTMANN_PATTERNS.to_vec();
        middle.sort_unstable();
        reference.sort_unstable();
        assert_eq!(middle, reference);
    }

    #[test]
    fn ops2_alternates_and_ends_on_a_drawn_byte() {
        let patterns = build_patterns(WipeMethod::Ops2).unwrap();
        assert_eq!(patterns.len(), 7);
        let expected = [0x00u8, 0xFF, 0x00, 0xFF, 0x00, 0xFF];
        for (p, &e) in patterns[..6].iter().zip(expected.iter()) {
            assert_eq!(*p, Pattern::Static(vec![e]));
        }
        assert!(matches!(&patterns[6], Pattern::Static(v) if v.len() == 1));
    }

    #[test]
    fn is5_enhanced_shape() {
        let patterns = build_patterns(WipeMethod::Is5Enhanced).unwrap();
        assert_eq!(
            patterns,
            vec![
                Pattern::Static(vec![0x00]),
                Pattern::Static(vec![0xFF]),
                Pattern::Random,
            ]
        );
    }

    #[test]
    fn verify_only_methods_have_no_write_passes() {
        assert!(build_patterns(WipeMethod::VerifyZero).unwrap().is_empty());
        assert!(build_patterns(WipeMethod::VerifyOne).unwrap().is_empty());
    }

    #[test]
    fn round_size_for_plain_methods() {
        const MB: u64 = 1024 * 1024;
        // One pass, one round, no verify, no blank.
        assert_eq!(
            plan_round_size(WipeMethod::Zero, MB, 1, 1, VerifyPolicy::None, false),
            MB
        );
        // Blanking adds a write; verify=Last also reads the blank back.
        assert_eq!(
            plan_round_size(WipeMethod::Zero, MB, 1, 1, VerifyPolicy::Last, true),
            3 * MB
        );
        // verify=Last without a blank reads back the last pattern pass.
        assert_eq!(
            plan_round_size(WipeMethod::Zero, MB, 1, 1, VerifyPolicy::Last, false),
            2 * MB
        );
        // verify=All doubles the pattern passes.
        assert_eq!(
            plan_round_size(WipeMethod::DodShort, MB, 3, 2, VerifyPolicy::All, false),
            12 * MB
        );
    }

    #[test]
    fn round_size_for_ops2() {
        const MB: u64 = 1024 * 1024;
        // 7 patterns + unverified final random.
        assert_eq!(
            plan_round_size(WipeMethod::Ops2, MB, 7, 1, VerifyPolicy::None, false),
            8 * MB
        );
        // Final random is read back under Last and All.
        assert_eq!(
            plan_round_size(WipeMethod::Ops2, MB, 7, 1, VerifyPolicy::Last, false),
            9 * MB
        );
        assert_eq!(
            plan_round_size(WipeMethod::Ops2, MB, 7, 1, VerifyPolicy::All, false),
            16 * MB
        );
    }

    #[test]
    fn round_size_for_is5_enhanced() {
        const MB: u64 = 1024 * 1024;
        // 3 patterns plus the mandatory random readback, each round.
        assert_eq!(
            plan_round_size(WipeMethod::Is5Enhanced, MB, 3, 2, VerifyPolicy::None, false),
            8 * MB
        );
        // verify=All already covers the random readback.
        assert_eq!(
            plan_round_size(WipeMethod::Is5Enhanced, MB, 3, 1, VerifyPolicy::All, false),
            6 * MB
        );
    }

    #[test]
    fn round_size_for_verify_only() {
        const MB: u64 = 1024 * 1024;
        assert_eq!(
            plan_round_size(WipeMethod::VerifyZero, MB, 1, 3, VerifyPolicy::All, false),
            MB
        );
    }
}
