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

use std::io;
use std::process;

/// Detach from the console: the parent prints the child's pid and exits
/// successfully, the child becomes a session leader and carries on as the
/// daemon. Only the child ever returns from this function.
pub fn daemonize() -> io::Result<()> {
    match unsafe { libc::fork() } {
        -1 => Err(io::Error::last_os_error()),
        0 => {
            unsafe {
                libc::setsid();
            }
            Ok(())
        }
        pid => {
            println!("{}", pid);
            process::exit(0);
        }
    }
}
