/*
 *  lib.rs: rwipe - secure block device erasure engine.
 *
 *  Copyright Darik Horn <dajhorn-dban@vanadac.com>.
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
 */

pub mod context;
pub mod device;
pub mod entropy;
pub mod logging;
pub mod method;
pub mod options;
pub mod pass;
pub mod prng;
pub mod speedring;
pub mod supervisor;
pub mod version;
pub mod worker;

pub use context::{DeviceContext, PassType, WipeStatus};
pub use method::WipeMethod;
pub use options::{IoMode, VerifyPolicy, WipeOptions};
pub use prng::PrngKind;
pub use supervisor::{AggregateStats, FinalStatus, ProgressSnapshot, Supervisor};
