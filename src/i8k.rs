/*
 * This file is part of i8kfand.
 *
 * Copyright (C) 2025 i8kfand contributors
 *
 * i8kfand is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * i8kfand is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with i8kfand. If not, see <https://www.gnu.org/licenses/>.
 */

//! Real `FanControl` implementation backed by the `/proc/i8k` character
//! device of the i8k/dell-smm-hwmon kernel module. Every primitive is
//! fatal-on-error for the caller: a failing ioctl means the interface is
//! missing or incompatible and retrying cannot help.

use std::io;
use std::os::raw::{c_int, c_ulong};

use crate::config::Config;
use crate::fan::{FanControl, FanLevel, FanSide, HardwareError};
use crate::smm;

const I8K_PROC: &str = "/proc/i8k";

// Request codes as laid out by the kernel header:
//   I8K_GET_TEMP = _IOR ('i', 0x84, size_t)
//   I8K_GET_FAN  = _IOWR('i', 0x86, size_t)
//   I8K_SET_FAN  = _IOWR('i', 0x87, size_t)
const I8K_GET_TEMP: c_ulong = 0x8008_6984;
const I8K_GET_FAN: c_ulong = 0xc008_6986;
const I8K_SET_FAN: c_ulong = 0xc008_6987;

pub struct I8kPort {
    fd: c_int,
    monitor_only: bool,
    bios_disable_version: u8,
}

impl I8kPort {
    /// Acquire the handle to the kernel thermal interface. There is no
    /// safe state to fall back to before this succeeds.
    pub fn open() -> Result<Self, HardwareError> {
        let fd = unsafe { libc::open(b"/proc/i8k\0".as_ptr().cast(), libc::O_RDONLY) };
        if fd < 0 {
            return Err(HardwareError::Open {
                path: I8K_PROC,
                source: io::Error::last_os_error(),
            });
        }
        Ok(Self {
            fd,
            monitor_only: false,
            bios_disable_version: 0,
        })
    }

    /// Adopt the assembled configuration snapshot. The port is opened before
    /// the config exists so that config errors can already use the fail-safe
    /// path; this closes the gap afterwards.
    pub fn apply_config(&mut self, cfg: &Config) {
        self.monitor_only = cfg.monitor_only;
        self.bios_disable_version = cfg.bios_disable_version;
    }

    fn ioctl(&self, op: &'static str, req: c_ulong, args: &mut [c_int; 2]) -> Result<(), HardwareError> {
        let rc = unsafe { libc::ioctl(self.fd, req, args.as_mut_ptr()) };
        if rc != 0 {
            return Err(HardwareError::Ioctl {
                op,
                source: io::Error::last_os_error(),
            });
        }
        Ok(())
    }
}

impl FanControl for I8kPort {
    fn read_temperature(&mut self) -> Result<i32, HardwareError> {
        let mut args: [c_int; 2] = [0, 0];
        self.ioctl("get_cpu_temp", I8K_GET_TEMP, &mut args)?;
        Ok(args[0])
    }

    fn read_fan_level(&mut self, side: FanSide) -> Result<FanLevel, HardwareError> {
        let mut args: [c_int; 2] = [side.as_raw(), 0];
        self.ioctl("get_fan_state", I8K_GET_FAN, &mut args)?;
        FanLevel::from_raw(args[0])
    }

    fn set_fan_level(&mut self, side: FanSide, level: FanLevel) -> Result<(), HardwareError> {
        // monitor_only suppresses the write but the call still succeeds,
        // including when invoked from the fail-safe path.
        if self.monitor_only {
            return Ok(());
        }
        let mut args: [c_int; 2] = [side.as_raw(), level.as_raw()];
        self.ioctl("set_fan_state", I8K_SET_FAN, &mut args)
    }

    fn set_bios_auto_control(&mut self, enabled: bool) -> Result<(), HardwareError> {
        smm::bios_fan_control(self.bios_disable_version, enabled)?;
        Ok(())
    }
}

impl Drop for I8kPort {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.fd);
        }
    }
}
