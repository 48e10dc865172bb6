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

use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context};
use serde_json::json;

use i8kfand::config::{self, foolproof_checks, Config};
use i8kfand::fan::FanControl;
use i8kfand::i8k::I8kPort;
use i8kfand::{daemon, failsafe, logger, monitor};

fn usage() {
    let d = Config::default();
    println!("i8kfand v{}", env!("CARGO_PKG_VERSION"));
    println!("Fan monitor and control for Dell laptops using the i8k kernel interface.\n");
    println!("Usage: i8kfand [OPTIONS]");
    println!("  -h, --help          Show this help");
    println!("  -v, --verbose       Trace every poll cycle");
    println!("  -d, --daemon        Detach from the console");
    println!("  -m, --monitor_only  No control - monitor only (implies --verbose)");
    println!("      --logging       Append JSON events to /etc/i8kfand/logs.json");
    println!("Args (also accepted in {}):", config::config_path().display());
    println!("  --period_ms MILLISECONDS            (default: {} ms)", d.period_ms);
    println!("  --jump_timeout_ms MILLISECONDS      (default: {} ms)", d.jump_timeout_ms);
    println!("  --jump_temp_delta CELSIUS           (default: {}°)", d.jump_temp_delta);
    println!("  --t_low CELSIUS                     (default: {}°)", d.t_low);
    println!("  --t_mid CELSIUS                     (default: {}°)", d.t_mid);
    println!("  --t_high CELSIUS                    (default: {}°)", d.t_high);
    println!("  --foolproof_checks 0|1              (default: {})", d.foolproof_checks as u8);
    println!("  --bios_disable_version VERSION      (default: {})", d.bios_disable_version);
    println!();
}

fn apply_override(cfg: &mut Config, key: &str, value: &str) -> anyhow::Result<()> {
    let num: i64 = value
        .parse()
        .with_context(|| format!("argument --{} needs a numeric value, got \"{}\"", key, value))?;
    // No wrapping casts here: an out-of-range value must fail loudly, never
    // alias a valid setting (e.g. 257 must not become bios version 1).
    let range_err = || anyhow!("argument --{} value {} is out of range", key, num);
    match key {
        "period_ms" => cfg.period_ms = u64::try_from(num).map_err(|_| range_err())?,
        "jump_timeout_ms" => cfg.jump_timeout_ms = u64::try_from(num).map_err(|_| range_err())?,
        "jump_temp_delta" => cfg.jump_temp_delta = i32::try_from(num).map_err(|_| range_err())?,
        "t_low" => cfg.t_low = i32::try_from(num).map_err(|_| range_err())?,
        "t_mid" => cfg.t_mid = i32::try_from(num).map_err(|_| range_err())?,
        "t_high" => cfg.t_high = i32::try_from(num).map_err(|_| range_err())?,
        "foolproof_checks" => cfg.foolproof_checks = num != 0,
        "bios_disable_version" => {
            cfg.bios_disable_version = u8::try_from(num).map_err(|_| range_err())?
        }
        "daemon" => cfg.daemon = num != 0,
        _ => bail!("unknown parameter --{}", key),
    }
    Ok(())
}

/// Fold CLI overrides into the snapshot. Returns whether event logging was
/// requested. Overrides win over the config file, which wins over defaults.
fn parse_args(cfg: &mut Config, args: &[String]) -> anyhow::Result<bool> {
    let mut logging = false;
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "-v" | "--verbose" => cfg.verbose = true,
            "-d" | "--daemon" => cfg.daemon = true,
            "-m" | "--monitor_only" => {
                cfg.monitor_only = true;
                cfg.verbose = true;
            }
            "--logging" => logging = true,
            arg if arg.starts_with("--") => {
                let key = &arg[2..];
                i += 1;
                let value = args
                    .get(i)
                    .ok_or_else(|| anyhow!("argument --{} needs a value", key))?;
                apply_override(cfg, key, value)?;
            }
            arg => bail!("unknown argument {}", arg),
        }
        i += 1;
    }
    Ok(logging)
}

fn main() {
    let args: Vec<String> = std::env::args().collect();

    // The only successful exit of the whole program.
    if args.iter().any(|a| a == "-h" || a == "--help") {
        usage();
        return;
    }

    // The hardware handle comes first: with no handle there is no safe
    // state to force, so this failure alone exits without the fail-safe.
    let mut port = match I8kPort::open() {
        Ok(p) => p,
        Err(e) => {
            eprintln!("i8kfand: {}", e);
            process::exit(1);
        }
    };

    let mut cfg = match config::load_config() {
        Ok(c) => c,
        Err(e) => failsafe::exit_failure(&mut port, false, &e),
    };
    let logging = match parse_args(&mut cfg, &args) {
        Ok(l) => l,
        Err(e) => failsafe::exit_failure(&mut port, false, &e),
    };
    port.apply_config(&cfg);

    if logging {
        logger::init_logging();
        logger::log_event("startup", json!({ "args": &args, "config": &cfg }));
    }

    if cfg.verbose {
        println!("i8kfand v{}", env!("CARGO_PKG_VERSION"));
        println!("Fan monitor and control for Dell laptops using the i8k kernel interface.\n");
    }

    if cfg.foolproof_checks {
        if let Err(violations) = foolproof_checks(&cfg) {
            for v in &violations {
                eprintln!("foolproof_checks: {}", v);
            }
            eprintln!(
                "foolproof_checks failed. If you are sure about what you are doing, \
                 disable them with --foolproof_checks 0 or \"foolproof_checks\": false in {}",
                config::config_path().display()
            );
            logger::log_event("foolproof_failed", json!({ "violations": violations }));
            failsafe::exit_failure(&mut port, false, &"invalid configuration");
        }
    }

    // Take fan authority away from the BIOS. If that fails the fail-safe
    // must not try the reverse call, hence restore_bios = false here.
    let mut bios_suspended = false;
    if cfg.bios_disable_version != 0 && !cfg.monitor_only {
        match port.set_bios_auto_control(false) {
            Ok(()) => bios_suspended = true,
            Err(e) => failsafe::exit_failure(&mut port, false, &e),
        }
    }

    if cfg.daemon && !cfg.monitor_only {
        if let Err(e) = daemon::daemonize() {
            failsafe::exit_failure(&mut port, bios_suspended, &e);
        }
        // the detached child has no console worth tracing to
        cfg.verbose = false;
    }

    // Signal delivery only flips this flag; the loop polls it and routes
    // into the same fail-safe path as any internal error. Installed after
    // daemonize: the watcher thread ctrlc spawns would not survive the
    // fork, leaving the detached child deaf to SIGTERM.
    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = shutdown.clone();
        if let Err(e) = ctrlc::set_handler(move || {
            shutdown.store(true, Ordering::SeqCst);
        }) {
            failsafe::exit_failure(&mut port, bios_suspended, &e);
        }
    }

    match monitor::run(&mut port, &cfg, shutdown) {
        Ok(never) => match never {},
        Err(e) => failsafe::exit_failure(&mut port, bios_suspended, &e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        std::iter::once("i8kfand")
            .chain(list.iter().copied())
            .map(String::from)
            .collect()
    }

    #[test]
    fn test_parse_args_flags() {
        let mut cfg = Config::default();
        let logging = parse_args(&mut cfg, &args(&["-v", "-d", "--logging"])).unwrap();
        assert!(cfg.verbose);
        assert!(cfg.daemon);
        assert!(logging);
    }

    #[test]
    fn test_parse_args_monitor_only_implies_verbose() {
        let mut cfg = Config::default();
        parse_args(&mut cfg, &args(&["-m"])).unwrap();
        assert!(cfg.monitor_only);
        assert!(cfg.verbose);
    }

    #[test]
    fn test_parse_args_numeric_overrides() {
        let mut cfg = Config::default();
        parse_args(
            &mut cfg,
            &args(&["--t_low", "50", "--period_ms", "500", "--bios_disable_version", "2"]),
        )
        .unwrap();
        assert_eq!(cfg.t_low, 50);
        assert_eq!(cfg.period_ms, 500);
        assert_eq!(cfg.bios_disable_version, 2);
    }

    #[test]
    fn test_parse_args_foolproof_toggle() {
        let mut cfg = Config::default();
        parse_args(&mut cfg, &args(&["--foolproof_checks", "0"])).unwrap();
        assert!(!cfg.foolproof_checks);
    }

    #[test]
    fn test_parse_args_rejects_unknown_argument() {
        let mut cfg = Config::default();
        assert!(parse_args(&mut cfg, &args(&["bogus"])).is_err());
        assert!(parse_args(&mut cfg, &args(&["--no_such_key", "1"])).is_err());
    }

    #[test]
    fn test_parse_args_rejects_missing_value() {
        let mut cfg = Config::default();
        assert!(parse_args(&mut cfg, &args(&["--t_low"])).is_err());
    }

    #[test]
    fn test_parse_args_rejects_non_numeric_value() {
        let mut cfg = Config::default();
        assert!(parse_args(&mut cfg, &args(&["--t_low", "warm"])).is_err());
    }

    #[test]
    fn test_parse_args_rejects_out_of_range_bios_version() {
        // 257 must not wrap into a valid version 1
        for v in ["256", "257", "-1"] {
            let mut cfg = Config::default();
            let err = parse_args(&mut cfg, &args(&["--bios_disable_version", v])).unwrap_err();
            assert!(err.to_string().contains("out of range"), "value {}", v);
            assert_eq!(cfg.bios_disable_version, Config::default().bios_disable_version);
        }
    }

    #[test]
    fn test_parse_args_rejects_negative_durations() {
        let mut cfg = Config::default();
        assert!(parse_args(&mut cfg, &args(&["--period_ms", "-500"])).is_err());
        assert!(parse_args(&mut cfg, &args(&["--jump_timeout_ms", "-1"])).is_err());
    }

    #[test]
    fn test_parse_args_rejects_threshold_beyond_i32() {
        let mut cfg = Config::default();
        assert!(parse_args(&mut cfg, &args(&["--t_high", "4294967296"])).is_err());
    }
}
