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

use std::fmt;
use std::io;

use thiserror::Error;

use crate::smm::SmmError;

/// Discrete fan speed as exposed by the i8k interface: 0 = off, 1 = low, 2 = high.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FanLevel {
    Off = 0,
    Low = 1,
    High = 2,
}

impl FanLevel {
    pub fn from_raw(raw: i32) -> Result<Self, HardwareError> {
        match raw {
            0 => Ok(FanLevel::Off),
            1 => Ok(FanLevel::Low),
            2 => Ok(FanLevel::High),
            other => Err(HardwareError::BadFanLevel(other)),
        }
    }

    pub fn as_raw(self) -> i32 {
        self as i32
    }
}

impl fmt::Display for FanLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_raw())
    }
}

/// Fan index used by the i8k ioctls: 0 = right, 1 = left.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FanSide {
    Right = 0,
    Left = 1,
}

impl FanSide {
    pub fn as_raw(self) -> i32 {
        self as i32
    }
}

#[derive(Error, Debug)]
pub enum HardwareError {
    #[error("can't open {path}: {source}")]
    Open {
        path: &'static str,
        source: io::Error,
    },

    #[error("{op} ioctl error: {source}")]
    Ioctl {
        op: &'static str,
        source: io::Error,
    },

    #[error("i8k interface reported unexpected fan level {0}")]
    BadFanLevel(i32),

    #[error(transparent)]
    Smm(#[from] SmmError),
}

/// Narrow seam in front of the hardware. The control loop and the fail-safe
/// path only ever talk to this trait; `I8kPort` is the real implementation
/// and the only place privileged operations happen.
#[cfg_attr(test, mockall::automock)]
pub trait FanControl {
    /// Current CPU temperature in whole degrees Celsius.
    fn read_temperature(&mut self) -> Result<i32, HardwareError>;

    /// Observed speed level of one fan.
    fn read_fan_level(&mut self, side: FanSide) -> Result<FanLevel, HardwareError>;

    /// Command one fan to a speed level. Suppressed (but still successful)
    /// in monitor-only mode.
    fn set_fan_level(&mut self, side: FanSide, level: FanLevel) -> Result<(), HardwareError>;

    /// Hand fan-speed authority to (true) or away from (false) the BIOS,
    /// using the configured SMM method. Requires root.
    fn set_bios_auto_control(&mut self, enabled: bool) -> Result<(), HardwareError>;
}
