/*
 *  options.rs: Command line options processing for rwipe.
 *
 *  Copyright Darik Horn <dajhorn-dban@vanadac.com>.
 *  Modifications to original dwipe Copyright Andy Beverley <andy@andybev.com>
 *  Rust conversion: 2023
 *
 *  This program is free software; you can redistribute it and/or modify it under
 *  the terms of the GNU General Public License as published by the Free Software
 *  Foundation, version 2.
 */

use clap::Parser;

use crate::logging::{wipe_log, LogLevel};
use crate::method::WipeMethod;
use crate::prng::PrngKind;

/// Whether written passes are read back and compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyPolicy {
    /// Do not verify.
    None,
    /// Verify only the last pass.
    Last,
    /// Verify every pass.
    All,
}

impl VerifyPolicy {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "off" | "none" => Some(VerifyPolicy::None),
            "last" => Some(VerifyPolicy::Last),
            "all" => Some(VerifyPolicy::All),
            _ => None,
        }
    }
}

/// How the device is opened for writing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoMode {
    /// Writes go through the page cache, with periodic data flushes.
    Cached,
    /// O_DIRECT; the kernel does not cache, periodic flushes are pointless.
    Direct,
}

/// The immutable wipe configuration handed to the supervisor and every
/// worker. Built once from the command line; never mutated afterwards.
#[derive(Debug, Clone)]
pub struct WipeOptions {
    /// The wipe method.
    pub method: WipeMethod,
    /// The PRNG driving random passes. Ignored by pure static methods.
    pub prng: PrngKind,
    /// The verification policy.
    pub verify: VerifyPolicy,
    /// The number of times to run the method.
    pub rounds: i32,
    /// Whether to append a final zero-fill pass.
    pub blank_after: bool,
    /// Issue a data flush every `sync_rate` device blocks; 0 disables.
    pub sync_rate: u64,
    /// Cached or direct device I/O.
    pub io_mode: IoMode,
}

impl Default for WipeOptions {
    fn default() -> Self {
        Self {
            method: WipeMethod::DodShort,
            prng: PrngKind::Isaac64,
            verify: VerifyPolicy::Last,
            rounds: 1,
            blank_after: true,
            sync_rate: 100_000,
            io_mode: IoMode::Cached,
        }
    }
}

impl WipeOptions {
    /// Apply the cross-option rules: methods that end on a mandated state
    /// never blank, and direct I/O has no periodic flushing to rate-limit.
    pub fn normalize(&mut self) {
        if self.blank_after && !self.method.allows_blanking() {
            wipe_log(
                LogLevel::Notice,
                &format!(
                    "Method {} controls its own final pass; ignoring --blank-after",
                    self.method.label()
                ),
            );
            self.blank_after = false;
        }
        if self.io_mode == IoMode::Direct && self.sync_rate != 0 {
            wipe_log(
                LogLevel::Notice,
                "Direct I/O bypasses the page cache; disabling periodic sync",
            );
            self.sync_rate = 0;
        }
        if self.rounds < 1 {
            self.rounds = 1;
        }
    }
}

/// Command line arguments for rwipe.
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
pub struct Args {
    /// The wipe method to use
    #[clap(short = 'm', long, default_value = "dodshort")]
    pub method: String,

    /// The PRNG algorithm to use
    #[clap(short = 'P', long, default_value = "isaac64")]
    pub prng: String,

    /// Verification policy: off, last, or all
    #[clap(short = 'V', long, default_value = "last")]
    pub verify: String,

    /// The number of times to run the method
    #[clap(short = 'r', long, default_value_t = 1)]
    pub rounds: i32,

    /// Do not blank the device after the method completes
    #[clap(long)]
    pub noblank: bool,

    /// Flush the device every N blocks; 0 disables periodic sync
    #[clap(long, default_value_t = 100_000)]
    pub sync: u64,

    /// Open devices with O_DIRECT
    #[clap(long)]
    pub direct: bool,

    /// Don't wait for a key before exiting
    #[clap(long)]
    pub nowait: bool,

    /// Verbose output
    #[clap(short = 'v', long)]
    pub verbose: bool,

    /// Device paths to wipe
    #[clap(value_name = "DEVICE", required = true)]
    pub device_names: Vec<String>,
}

/// Parse the command line into the immutable options record, rejecting
/// unknown method, PRNG, or verify names.
pub fn parse_options() -> Result<(WipeOptions, Vec<String>, bool), String> {
    let args = Args::parse();
    options_from_args(&args)
}

pub fn options_from_args(args: &Args) -> Result<(WipeOptions, Vec<String>, bool), String> {
    let method = WipeMethod::from_name(&args.method)
        .ok_or_else(|| format!("Unknown wipe method: {}", args.method))?;
    let prng = PrngKind::from_name(&args.prng)
        .ok_or_else(|| format!("Unknown PRNG: {}", args.prng))?;
    let verify = VerifyPolicy::from_name(&args.verify)
        .ok_or_else(|| format!("Unknown verification policy: {}", args.verify))?;

    let mut options = WipeOptions {
        method,
        prng,
        verify,
        rounds: args.rounds,
        blank_after: !args.noblank,
        sync_rate: args.sync,
        io_mode: if args.direct {
            IoMode::Direct
        } else {
            IoMode::Cached
        },
    };
    options.normalize();

    Ok((options, args.device_names.clone(), args.verbose))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_names_parse() {
        assert_eq!(VerifyPolicy::from_name("off"), Some(VerifyPolicy::None));
        assert_eq!(VerifyPolicy::from_name("last"), Some(VerifyPolicy::Last));
        assert_eq!(VerifyPolicy::from_name("all"), Some(VerifyPolicy::All));
        assert_eq!(VerifyPolicy::from_name("sometimes"), None);
    }

    #[test]
    fn ops2_never_blanks() {
        let mut options = WipeOptions {
            method: WipeMethod::Ops2,
            blank_after: true,
            ..WipeOptions::default()
        };
        options.normalize();
        assert!(!options.blank_after);
    }

    #[test]
    fn verify_only_methods_never_blank() {
        for method in [WipeMethod::VerifyZero, WipeMethod::VerifyOne] {
            let mut options = WipeOptions {
                method,
                blank_after: true,
                ..WipeOptions::default()
            };
            options.normalize();
            assert!(!options.blank_after);
        }
    }

    #[test]
    fn direct_io_forces_sync_off() {
        let mut options = WipeOptions {
            io_mode: IoMode::Direct,
            sync_rate: 500,
            ..WipeOptions::default()
        };
        options.normalize();
        assert_eq!(options.sync_rate, 0);
    }

    #[test]
    fn rounds_are_clamped_to_positive() {
        let mut options = WipeOptions {
            rounds: 0,
            ..WipeOptions::default()
        };
        options.normalize();
        assert_eq!(options.rounds, 1);
    }
}
