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

//! The universal panic button. Every fatal condition in the process —
//! hardware error, signal, validation failure, malformed input — ends up
//! here, and the process never exits with a failure status any other way.

use std::fmt::Display;
use std::process;

use serde_json::json;

use crate::fan::{FanControl, FanLevel, FanSide};
use crate::logger;

/// Force both fans to maximum and, when BIOS control had been suspended,
/// hand authority back to the firmware. Best-effort all the way down: a
/// failing step is reported but never stops the remaining steps, since this
/// runs on the way out of an already-failing process.
pub fn enter_safe_state(port: &mut dyn FanControl, restore_bios: bool) {
    for side in [FanSide::Left, FanSide::Right] {
        if let Err(e) = port.set_fan_level(side, FanLevel::High) {
            eprintln!("failsafe: forcing {:?} fan high failed: {}", side, e);
        }
    }
    if restore_bios {
        if let Err(e) = port.set_bios_auto_control(true) {
            eprintln!("failsafe: re-enabling BIOS fan control failed: {}", e);
        }
    }
    logger::log_event("failsafe", json!({ "restore_bios": restore_bios }));
}

/// Report the fatal condition, leave the hardware in its safe state and
/// terminate with a failure status. Never returns.
pub fn exit_failure(port: &mut dyn FanControl, restore_bios: bool, error: &dyn Display) -> ! {
    eprintln!("i8kfand: {}", error);
    logger::log_event("fatal_error", json!({ "error": error.to_string() }));
    enter_safe_state(port, restore_bios);
    process::exit(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fan::{HardwareError, MockFanControl};
    use mockall::predicate::eq;

    #[test]
    fn test_safe_state_forces_both_fans_high() {
        let mut port = MockFanControl::new();
        port.expect_set_fan_level()
            .with(eq(FanSide::Left), eq(FanLevel::High))
            .times(1)
            .returning(|_, _| Ok(()));
        port.expect_set_fan_level()
            .with(eq(FanSide::Right), eq(FanLevel::High))
            .times(1)
            .returning(|_, _| Ok(()));
        port.expect_set_bios_auto_control().times(0);

        enter_safe_state(&mut port, false);
    }

    #[test]
    fn test_safe_state_restores_bios_control_when_suspended() {
        let mut port = MockFanControl::new();
        port.expect_set_fan_level()
            .times(2)
            .returning(|_, _| Ok(()));
        port.expect_set_bios_auto_control()
            .with(eq(true))
            .times(1)
            .returning(|_| Ok(()));

        enter_safe_state(&mut port, true);
    }

    #[test]
    fn test_safe_state_continues_past_failing_fan_write() {
        // A broken actuator must not prevent the other fan write or the
        // BIOS restore.
        let mut port = MockFanControl::new();
        port.expect_set_fan_level().times(2).returning(|_, _| {
            Err(HardwareError::Ioctl {
                op: "set_fan_state",
                source: std::io::Error::from_raw_os_error(libc::EIO),
            })
        });
        port.expect_set_bios_auto_control()
            .times(1)
            .returning(|_| Ok(()));

        enter_safe_state(&mut port, true);
    }

    #[test]
    fn test_safe_state_survives_bios_restore_failure() {
        let mut port = MockFanControl::new();
        port.expect_set_fan_level()
            .times(2)
            .returning(|_, _| Ok(()));
        port.expect_set_bios_auto_control()
            .times(1)
            .returning(|_| Err(HardwareError::Smm(crate::smm::SmmError::NotRoot)));

        enter_safe_state(&mut port, true);
    }
}
