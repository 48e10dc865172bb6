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

//! Optional JSON-lines event log (`--logging`). One object per line with a
//! millisecond timestamp; silent no-op unless initialized.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use lazy_static::lazy_static;
use serde_json::{json, Value};

const DEFAULT_LOG_PATH: &str = "/etc/i8kfand/logs.json";
const FALLBACK_LOG_PATH: &str = "/tmp/i8kfand_logs.json";

lazy_static! {
    static ref LOG_FILE: Mutex<Option<File>> = Mutex::new(None);
}

fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}

fn open_append(path: &str) -> Option<File> {
    if let Some(parent) = Path::new(path).parent() {
        let _ = fs::create_dir_all(parent);
    }
    OpenOptions::new().create(true).append(true).open(path).ok()
}

pub fn init_logging() {
    let file = open_append(DEFAULT_LOG_PATH).or_else(|| open_append(FALLBACK_LOG_PATH));
    if let Ok(mut guard) = LOG_FILE.lock() {
        *guard = file;
    }
}

pub fn log_event(event: &str, data: Value) {
    let Ok(mut guard) = LOG_FILE.lock() else {
        return;
    };
    let Some(f) = guard.as_mut() else {
        return;
    };
    let line = json!({
        "ts_ms": now_millis(),
        "event": event,
        "data": data,
    })
    .to_string();
    let _ = writeln!(f, "{}", line);
}
