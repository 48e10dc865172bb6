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

//! The poll-decide-act control loop. Single thread of control; the only
//! suspension points are the steady-state sleep and the spike-confirmation
//! wait. The loop never returns normally: every way out is an error the
//! caller funnels into the fail-safe exit.

use std::convert::Infallible;
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::bail;
use serde_json::json;

use crate::config::Config;
use crate::fan::{FanControl, FanLevel, FanSide, HardwareError};
use crate::logger;

/// Mutable loop state, owned exclusively by the control loop.
#[derive(Debug, Clone, Copy)]
pub struct ControlState {
    /// Last accepted sample; not advanced on a spike cycle.
    pub previous_temperature: i32,
    /// Last commanded level.
    pub current_target: FanLevel,
    /// True exactly between detecting an anomalous jump and consuming the
    /// next sample, so the gate can never fire twice in a row.
    pub spike_pending: bool,
}

/// Outcome of one loop iteration; tells the caller which sleep applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Normal,
    SpikeWait,
}

/// Map a temperature sample to a target level.
///
/// Descent is deliberately asymmetric: once High, the mid band holds High
/// until the temperature falls to `t_low` (hysteresis). The open band
/// `t_low < t < t_mid` leaves the previous target untouched.
pub fn decide(cfg: &Config, temp: i32, current: FanLevel) -> FanLevel {
    if temp <= cfg.t_low {
        FanLevel::Off
    } else if temp > cfg.t_high {
        FanLevel::High
    } else if temp >= cfg.t_mid {
        if current == FanLevel::High {
            FanLevel::High
        } else {
            FanLevel::Low
        }
    } else {
        current
    }
}

/// One iteration: sample, gate spikes, decide, apply on transition.
pub fn step<P: FanControl + ?Sized>(
    port: &mut P,
    cfg: &Config,
    state: &mut ControlState,
) -> Result<Step, HardwareError> {
    let temp = port.read_temperature()?;
    let fan_left = port.read_fan_level(FanSide::Left)?;
    let fan_right = port.read_fan_level(FanSide::Right)?;

    if temp - state.previous_temperature > cfg.jump_temp_delta && !state.spike_pending {
        // Provisionally distrust the sample: no baseline update, no
        // decision, wait one extra interval and re-evaluate.
        state.spike_pending = true;
        if cfg.verbose {
            print!("  {}   ", temp);
            let _ = io::stdout().flush();
        }
        logger::log_event(
            "spike_detected",
            json!({ "temp": temp, "previous": state.previous_temperature }),
        );
        return Ok(Step::SpikeWait);
    }
    state.spike_pending = false;

    if cfg.verbose {
        print!("{}/{}/{} ", temp, fan_left, fan_right);
    }

    state.current_target = decide(cfg, temp, state.current_target);

    if state.current_target != fan_left || state.current_target != fan_right {
        port.set_fan_level(FanSide::Left, state.current_target)?;
        port.set_fan_level(FanSide::Right, state.current_target)?;
        if cfg.verbose {
            print!(" --{}-- ", state.current_target);
        }
        logger::log_event(
            "fan_write",
            json!({ "temp": temp, "level": state.current_target.as_raw() }),
        );
    }

    state.previous_temperature = temp;
    if cfg.verbose {
        let _ = io::stdout().flush();
    }
    Ok(Step::Normal)
}

fn print_startup_banner(cfg: &Config) {
    println!("Config:");
    println!("  period_ms             {} ms", cfg.period_ms);
    println!("  jump_timeout_ms       {} ms", cfg.jump_timeout_ms);
    println!("  jump_temp_delta       {}°", cfg.jump_temp_delta);
    println!("  t_low                 {}°", cfg.t_low);
    println!("  t_mid                 {}°", cfg.t_mid);
    println!("  t_high                {}°", cfg.t_high);
    println!("  bios_disable_version  {}", cfg.bios_disable_version);
    println!("Legend:");
    println!("  [TT/L/R] Monitor (no action). TT - CPU temp, L - left fan state, R - right fan state");
    println!("  [ --F--] Set fan state to F. 0 = OFF, 1 = LOW, 2 = HIGH");
    println!("  [  TT  ] Abnormal temp jump detected; waiting for the next value");
    println!("Monitor:");
}

/// Build the initial loop state. The temperature baseline is the first
/// sample; the target starts at Off except in monitor-only mode, where it
/// mirrors the observed left fan so the first decision is consistent with
/// real hardware.
pub fn seed_state<P: FanControl + ?Sized>(
    port: &mut P,
    cfg: &Config,
) -> Result<ControlState, HardwareError> {
    let mut state = ControlState {
        previous_temperature: port.read_temperature()?,
        current_target: FanLevel::Off,
        spike_pending: false,
    };
    if cfg.monitor_only {
        println!("WARNING: working in monitor_only mode. No action will be taken.");
        state.current_target = port.read_fan_level(FanSide::Left)?;
    }
    Ok(state)
}

/// Run the loop until an error or termination signal ends the process.
/// The `shutdown` flag is set asynchronously by the signal handler and
/// polled here between iterations, so the fail-safe hardware writes always
/// happen on the main thread, never inside the handler.
pub fn run<P: FanControl>(
    port: &mut P,
    cfg: &Config,
    shutdown: Arc<AtomicBool>,
) -> anyhow::Result<Infallible> {
    if cfg.verbose {
        print_startup_banner(cfg);
    }

    let mut state = seed_state(port, cfg)?;

    loop {
        if shutdown.load(Ordering::SeqCst) {
            logger::log_event("signal", json!({}));
            bail!("received termination signal");
        }
        let wait_ms = match step(port, cfg, &mut state)? {
            Step::SpikeWait => cfg.jump_timeout_ms,
            Step::Normal => cfg.period_ms,
        };
        thread::sleep(Duration::from_millis(wait_ms));
    }
}
