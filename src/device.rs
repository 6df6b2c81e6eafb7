/*
 *  device.rs: Device probing and open modes for rwipe.
 *
 *  Copyright Darik Horn <dajhorn-dban@vanadac.com>.
 *  Modifications to original dwipe Copyright Andy Beverley <andy@andybev.com>
 *  Rust conversion: 2023
 *
 *  This program is free software; you can redistribute it and/or modify it under
 *  the terms of the GNU General Public License as published by the Free Software
 *  Foundation, version 2.
 */

use std::fs::{self, File};
use std::io;
use std::os::unix::fs::{FileTypeExt, OpenOptionsExt};
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};

use nix::libc;
use nix::unistd::{lseek, Whence};

use crate::context::DeviceIdentity;
use crate::logging::{wipe_log, LogLevel};
use crate::options::IoMode;

// Fallbacks when the size ioctls are unavailable (regular files, exotic
// devices).
const DEFAULT_SECTOR_SIZE: u64 = 512;
const DEFAULT_BLOCK_SIZE: u64 = 4096;

nix::ioctl_read!(ioctl_blkgetsize64, 0x12, 114, u64);
nix::ioctl_read!(ioctl_blkbszget, 0x12, 112, libc::size_t);
nix::ioctl_read_bad!(
    ioctl_blksszget,
    nix::request_code_none!(0x12, 104),
    libc::c_int
);

/// What probing an erase target yields.
#[derive(Debug, Clone)]
pub struct DeviceProbe {
    /// Total byte size of the target.
    pub device_size: u64,
    /// Hard sector size reported by the kernel.
    pub device_sector_size: u64,
    /// Soft block size reported by the kernel.
    pub device_block_size: u64,
    /// Model, serial, and firmware strings from sysfs.
    pub identity: DeviceIdentity,
}

/// Probe an explicitly named target: size, sector and block sizes, and
/// identity. Works on both block devices and regular files, the latter so
/// image files can be erased and the engine can be exercised in tests.
pub fn probe_device(device_name: &str) -> io::Result<DeviceProbe> {
    let file = File::options().read(true).open(device_name)?;
    let fd = file.as_raw_fd();
    let is_block = file.metadata()?.file_type().is_block_device();

    let device_size = query_size(fd, is_block, &file)?;
    if device_size == 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} reports zero size", device_name),
        ));
    }

    let (device_sector_size, device_block_size) = if is_block {
        query_sector_block_size(fd, device_name)
    } else {
        (DEFAULT_SECTOR_SIZE, DEFAULT_BLOCK_SIZE)
    };

    let identity = identity_from_sysfs(device_name).unwrap_or_default();

    Ok(DeviceProbe {
        device_size,
        device_sector_size,
        device_block_size,
        identity,
    })
}

/// Open a target for wiping. Direct mode adds O_DIRECT, which obliges the
/// caller to issue block-aligned transfers from aligned buffers.
pub fn open_for_wipe(device_name: &str, io_mode: IoMode) -> io::Result<File> {
    let mut opts = File::options();
    opts.read(true).write(true);
    if io_mode == IoMode::Direct {
        opts.custom_flags(libc::O_DIRECT);
    }
    opts.open(device_name)
}

fn query_size(fd: RawFd, is_block: bool, file: &File) -> io::Result<u64> {
    if is_block {
        let mut size: u64 = 0;
        let ok = unsafe { ioctl_blkgetsize64(fd, &mut size) }.is_ok();
        if ok && size > 0 {
            return Ok(size);
        }
        // Fall back to seeking to the end, like very old kernels require.
        let end = lseek(fd, 0, Whence::SeekEnd)
            .map_err(|e| io::Error::from_raw_os_error(e as i32))?;
        lseek(fd, 0, Whence::SeekSet).map_err(|e| io::Error::from_raw_os_error(e as i32))?;
        Ok(end as u64)
    } else {
        Ok(file.metadata()?.len())
    }
}

fn query_sector_block_size(fd: RawFd, device_name: &str) -> (u64, u64) {
    let mut sector: libc::c_int = 0;
    let sector_size = match unsafe { ioctl_blksszget(fd, &mut sector) } {
        Ok(_) if sector > 0 => sector as u64,
        _ => {
            wipe_log(
                LogLevel::Warning,
                &format!("BLKSSZGET failed on {}, assuming {} byte sectors", device_name, DEFAULT_SECTOR_SIZE),
            );
            DEFAULT_SECTOR_SIZE
        }
    };

    let mut block: libc::size_t = 0;
    let block_size = match unsafe { ioctl_blkbszget(fd, &mut block) } {
        Ok(_) if block > 0 => block as u64,
        _ => {
            wipe_log(
                LogLevel::Warning,
                &format!("BLKBSZGET failed on {}, assuming {} byte blocks", device_name, DEFAULT_BLOCK_SIZE),
            );
            DEFAULT_BLOCK_SIZE
        }
    };

    (sector_size, block_size)
}

/// Extract model, serial, and firmware revision from sysfs.
fn identity_from_sysfs(device_name: &str) -> Option<DeviceIdentity> {
    let dev_name = Path::new(device_name).file_name()?.to_str()?;
    let sysfs_path = PathBuf::from(format!("/sys/block/{}", dev_name));
    if !sysfs_path.exists() {
        return None;
    }

    let mut identity = DeviceIdentity::default();
    if let Ok(model) = fs::read_to_string(sysfs_path.join("device/model")) {
        identity.model_no = model.trim().to_string();
    }
    if let Ok(serial) = fs::read_to_string(sysfs_path.join("device/serial")) {
        identity.serial_no = serial.trim().to_string();
    }
    if let Ok(firmware) = fs::read_to_string(sysfs_path.join("device/firmware_rev")) {
        identity.firmware_rev = firmware.trim().to_string();
    }
    Some(identity)
}

/// Check whether a device appears in /proc/mounts. Wiping a mounted
/// filesystem is refused by the front end.
pub fn device_is_mounted(device_name: &str) -> bool {
    if let Ok(mounts) = fs::read_to_string("/proc/mounts") {
        for line in mounts.lines() {
            let mut parts = line.split_whitespace();
            if parts.next() == Some(device_name) {
                return true;
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn probing_a_regular_file_uses_its_length() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(&[0u8; 8192]).unwrap();
        let probe = probe_device(tmp.path().to_str().unwrap()).unwrap();
        assert_eq!(probe.device_size, 8192);
        assert_eq!(probe.device_sector_size, DEFAULT_SECTOR_SIZE);
        assert_eq!(probe.device_block_size, DEFAULT_BLOCK_SIZE);
    }

    #[test]
    fn probing_an_empty_file_is_rejected() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        assert!(probe_device(tmp.path().to_str().unwrap()).is_err());
    }

    #[test]
    fn missing_devices_do_not_probe() {
        assert!(probe_device("/dev/does-not-exist-rwipe").is_err());
    }

    #[test]
    fn unknown_paths_are_not_mounted() {
        assert!(!device_is_mounted("/dev/does-not-exist-rwipe"));
    }
}
