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

//! i8kfand - fan monitor and control for Dell laptops using the i8k
//! kernel interface.
//!
//! The crate is built around one guarantee: whenever the controller dies,
//! for any reason, both fans are forced to maximum and BIOS automatic fan
//! control is restored. See `failsafe` for the exit path and `monitor` for
//! the hysteresis state machine driving the fans.

pub mod config;
pub mod daemon;
pub mod failsafe;
pub mod fan;
pub mod i8k;
pub mod logger;
pub mod monitor;
pub mod smm;
