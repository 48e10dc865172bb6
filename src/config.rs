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

use std::env;
use std::fs;
use std::path::PathBuf;

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Immutable configuration snapshot for the whole process lifetime.
/// Assembled once at startup from defaults, the optional config file and
/// CLI overrides; after that it is only ever passed by reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Emit a human-readable trace of each poll cycle.
    pub verbose: bool,
    /// Poll interval in the steady state, milliseconds.
    pub period_ms: u64,
    /// Extra wait after a detected temperature spike, milliseconds.
    pub jump_timeout_ms: u64,
    /// Inter-sample temperature rise considered an anomalous spike, degrees.
    pub jump_temp_delta: i32,
    pub t_low: i32,
    pub t_mid: i32,
    pub t_high: i32,
    /// Run the threshold validator before the control loop starts.
    pub foolproof_checks: bool,
    /// Which SMM command pair suspends BIOS fan control: 0 = none, 1 or 2.
    pub bios_disable_version: u8,
    /// Observe only; fan-state writes are suppressed.
    pub monitor_only: bool,
    /// Detach from the console after startup.
    pub daemon: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            verbose: false,
            period_ms: 1000,
            jump_timeout_ms: 2000,
            jump_temp_delta: 5,
            t_low: 45,
            t_mid: 60,
            t_high: 80,
            foolproof_checks: true,
            bios_disable_version: 0,
            monitor_only: false,
            daemon: false,
        }
    }
}

pub fn config_path() -> PathBuf {
    if let Ok(p) = env::var("I8KFAND_CONFIG") {
        return PathBuf::from(p);
    }
    PathBuf::from("/etc/i8kfand/config.json")
}

/// Load the config file if present; a missing file just means defaults.
/// A present-but-malformed file is an error the caller treats as fatal.
pub fn load_config() -> anyhow::Result<Config> {
    let path = config_path();
    if !path.exists() {
        return Ok(Config::default());
    }
    let data = fs::read_to_string(&path)
        .with_context(|| format!("can't read {}", path.display()))?;
    let cfg: Config = serde_json::from_str(&data)
        .with_context(|| format!("can't parse {}", path.display()))?;
    Ok(cfg)
}

/// Threshold validator ("foolproof checks"): rejects physically unsafe or
/// nonsensical parameter combinations. All violated rules are accumulated so
/// the user sees every problem at once; the caller decides to terminate.
pub fn foolproof_checks(cfg: &Config) -> Result<(), Vec<String>> {
    let mut violations = Vec::new();
    let mut expect = |ok: bool, rule: &str| {
        if !ok {
            violations.push(format!("awaiting {}", rule));
        }
    };

    expect(cfg.t_low >= 30, "t_low >= 30");
    expect(cfg.t_high <= 90, "t_high <= 90");
    expect(
        cfg.t_low < cfg.t_mid && cfg.t_mid < cfg.t_high,
        "thresholds t_low < t_mid < t_high",
    );
    expect(
        (100..=5000).contains(&cfg.period_ms),
        "period_ms in [100,5000]",
    );
    expect(
        (100..=5000).contains(&cfg.jump_timeout_ms),
        "jump_timeout_ms in [100,5000]",
    );
    expect(cfg.jump_temp_delta >= 2, "jump_temp_delta >= 2");
    expect(cfg.bios_disable_version <= 2, "bios_disable_version in [0,2]");

    if violations.is_empty() {
        Ok(())
    } else {
        Err(violations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults_match_shipped_values() {
        let cfg = Config::default();
        assert!(!cfg.verbose);
        assert_eq!(cfg.period_ms, 1000);
        assert_eq!(cfg.jump_timeout_ms, 2000);
        assert_eq!(cfg.jump_temp_delta, 5);
        assert_eq!((cfg.t_low, cfg.t_mid, cfg.t_high), (45, 60, 80));
        assert!(cfg.foolproof_checks);
        assert_eq!(cfg.bios_disable_version, 0);
        assert!(!cfg.monitor_only);
        assert!(!cfg.daemon);
    }

    #[test]
    fn test_defaults_pass_foolproof() {
        assert!(foolproof_checks(&Config::default()).is_ok());
    }

    #[test]
    #[serial]
    fn test_load_config_missing_file_uses_defaults() {
        env::set_var("I8KFAND_CONFIG", "/nonexistent/i8kfand-test.json");
        let cfg = load_config().unwrap();
        assert_eq!(cfg.period_ms, Config::default().period_ms);
        env::remove_var("I8KFAND_CONFIG");
    }

    #[test]
    #[serial]
    fn test_load_config_partial_file() {
        let mut f = NamedTempFile::new().unwrap();
        writeln!(f, r#"{{ "t_low": 50, "verbose": true }}"#).unwrap();
        f.flush().unwrap();
        env::set_var("I8KFAND_CONFIG", f.path());
        let cfg = load_config().unwrap();
        assert_eq!(cfg.t_low, 50);
        assert!(cfg.verbose);
        // untouched fields keep their defaults
        assert_eq!(cfg.t_mid, 60);
        assert_eq!(cfg.period_ms, 1000);
        env::remove_var("I8KFAND_CONFIG");
    }

    #[test]
    #[serial]
    fn test_load_config_rejects_unknown_keys() {
        let mut f = NamedTempFile::new().unwrap();
        writeln!(f, r#"{{ "t_lo": 50 }}"#).unwrap();
        f.flush().unwrap();
        env::set_var("I8KFAND_CONFIG", f.path());
        assert!(load_config().is_err());
        env::remove_var("I8KFAND_CONFIG");
    }

    #[test]
    #[serial]
    fn test_load_config_rejects_malformed_json() {
        let mut f = NamedTempFile::new().unwrap();
        writeln!(f, "period 1000").unwrap();
        f.flush().unwrap();
        env::set_var("I8KFAND_CONFIG", f.path());
        assert!(load_config().is_err());
        env::remove_var("I8KFAND_CONFIG");
    }

    fn violations_of(cfg: &Config) -> Vec<String> {
        foolproof_checks(cfg).unwrap_err()
    }

    #[test]
    fn test_foolproof_t_low_too_cold() {
        let cfg = Config {
            t_low: 29,
            ..Config::default()
        };
        let v = violations_of(&cfg);
        assert_eq!(v.len(), 1);
        assert!(v[0].contains("t_low >= 30"));
    }

    #[test]
    fn test_foolproof_t_high_too_hot() {
        let cfg = Config {
            t_high: 91,
            ..Config::default()
        };
        assert!(violations_of(&cfg)[0].contains("t_high <= 90"));
    }

    #[test]
    fn test_foolproof_thresholds_not_increasing() {
        let cfg = Config {
            t_low: 60,
            t_mid: 60,
            ..Config::default()
        };
        assert!(violations_of(&cfg)
            .iter()
            .any(|v| v.contains("t_low < t_mid < t_high")));

        let cfg = Config {
            t_mid: 80,
            ..Config::default()
        };
        assert!(violations_of(&cfg)
            .iter()
            .any(|v| v.contains("t_low < t_mid < t_high")));
    }

    #[test]
    fn test_foolproof_period_range() {
        for bad in [99, 5001] {
            let cfg = Config {
                period_ms: bad,
                ..Config::default()
            };
            assert!(violations_of(&cfg)[0].contains("period_ms"));
        }
        for ok in [100, 5000] {
            let cfg = Config {
                period_ms: ok,
                ..Config::default()
            };
            assert!(foolproof_checks(&cfg).is_ok());
        }
    }

    #[test]
    fn test_foolproof_jump_timeout_range() {
        for bad in [99, 5001] {
            let cfg = Config {
                jump_timeout_ms: bad,
                ..Config::default()
            };
            assert!(violations_of(&cfg)[0].contains("jump_timeout_ms"));
        }
    }

    #[test]
    fn test_foolproof_jump_temp_delta_minimum() {
        let cfg = Config {
            jump_temp_delta: 1,
            ..Config::default()
        };
        assert!(violations_of(&cfg)[0].contains("jump_temp_delta"));
        let cfg = Config {
            jump_temp_delta: 2,
            ..Config::default()
        };
        assert!(foolproof_checks(&cfg).is_ok());
    }

    #[test]
    fn test_foolproof_bios_disable_version_range() {
        let cfg = Config {
            bios_disable_version: 3,
            ..Config::default()
        };
        assert!(violations_of(&cfg)[0].contains("bios_disable_version"));
        for ok in [0, 1, 2] {
            let cfg = Config {
                bios_disable_version: ok,
                ..Config::default()
            };
            assert!(foolproof_checks(&cfg).is_ok());
        }
    }

    #[test]
    fn test_foolproof_accumulates_all_violations() {
        // Nothing short-circuits: every broken rule is reported together.
        let cfg = Config {
            t_low: 20,
            t_mid: 15,
            t_high: 95,
            period_ms: 50,
            jump_timeout_ms: 9000,
            jump_temp_delta: 0,
            bios_disable_version: 7,
            ..Config::default()
        };
        let v = violations_of(&cfg);
        assert_eq!(v.len(), 7);
    }
}
