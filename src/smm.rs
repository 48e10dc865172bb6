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

//! Dell SMM access used to suspend/restore BIOS automatic fan control.
//!
//! This is the privileged, unsafe boundary of the crate: two legacy I/O port
//! ranges are claimed via `ioperm`, then a six-register command is driven
//! through ports 0xb2/0x84. Nothing above this module depends on the register
//! layout.

use std::io;

use thiserror::Error;

pub const DISABLE_BIOS_METHOD1: u32 = 0x30a3;
pub const ENABLE_BIOS_METHOD1: u32 = 0x31a3;
pub const DISABLE_BIOS_METHOD2: u32 = 0x34a3;
pub const ENABLE_BIOS_METHOD2: u32 = 0x35a3;

const SMM_PORT_CMD: u64 = 0xb2;
const SMM_PORT_DATA: u64 = 0x84;

#[derive(Error, Debug)]
pub enum SmmError {
    #[error("bios_disable_version requires root privileges")]
    NotRoot,

    #[error("ioperm({port:#x}) failed: {source}")]
    Ioperm { port: u64, source: io::Error },

    #[error("SMM command {cmd:#06x} was not acknowledged by the BIOS")]
    NotAcknowledged { cmd: u32 },

    #[error("bios_disable_version {0} is not supported (expected 1 or 2)")]
    UnsupportedVersion(u8),

    #[error("SMM calls are only available on x86_64")]
    UnsupportedArch,
}

/// Register file passed to and returned from the SMM handler.
#[derive(Debug, Default, Clone, Copy)]
#[repr(C)]
pub struct SmmRegs {
    pub eax: u32,
    pub ebx: u32,
    pub ecx: u32,
    pub edx: u32,
    pub esi: u32,
    pub edi: u32,
}

/// The SMM handler signals failure three ways: carry flag set, result
/// register reading back as all-ones in its low 16 bits, or the result
/// register coming back unchanged (no responder).
fn smm_failed(flags_lsb: u64, eax_sent: u32, eax_returned: u32) -> bool {
    flags_lsb != 0 || (eax_returned & 0xffff) == 0xffff || eax_returned == eax_sent
}

#[cfg(target_arch = "x86_64")]
unsafe fn smm_raw(regs: *mut SmmRegs) -> u64 {
    let flags_lsb: u64;
    // Mirrors the i8k SMM calling convention: load six registers from the
    // struct, trigger ports 0xb2 then 0x84, store the registers back, and
    // report the carry flag. rbx is reserved by LLVM so it is saved by hand.
    core::arch::asm!(
        "push rbx",
        "push rax",
        "mov edx, dword ptr [rax]",
        "push rdx",
        "mov ebx, dword ptr [rax + 4]",
        "mov ecx, dword ptr [rax + 8]",
        "mov edx, dword ptr [rax + 12]",
        "mov esi, dword ptr [rax + 16]",
        "mov edi, dword ptr [rax + 20]",
        "pop rax",
        "out 0xb2, al",
        "out 0x84, al",
        "xchg rax, qword ptr [rsp]",
        "mov dword ptr [rax + 4], ebx",
        "mov dword ptr [rax + 8], ecx",
        "mov dword ptr [rax + 12], edx",
        "mov dword ptr [rax + 16], esi",
        "mov dword ptr [rax + 20], edi",
        "pop rdx",
        "mov dword ptr [rax], edx",
        "pushfq",
        "pop rax",
        "and eax, 1",
        "pop rbx",
        inout("rax") regs as u64 => flags_lsb,
        out("rcx") _,
        out("rdx") _,
        out("rsi") _,
        out("rdi") _,
    );
    flags_lsb
}

#[cfg(target_arch = "x86_64")]
pub fn smm_call(regs: &mut SmmRegs) -> Result<(), SmmError> {
    let eax_sent = regs.eax;
    let flags_lsb = unsafe { smm_raw(regs as *mut SmmRegs) };
    if smm_failed(flags_lsb, eax_sent, regs.eax) {
        return Err(SmmError::NotAcknowledged { cmd: eax_sent });
    }
    Ok(())
}

#[cfg(not(target_arch = "x86_64"))]
pub fn smm_call(_regs: &mut SmmRegs) -> Result<(), SmmError> {
    Err(SmmError::UnsupportedArch)
}

fn init_ioperm() -> Result<(), SmmError> {
    for port in [SMM_PORT_CMD, SMM_PORT_DATA] {
        if unsafe { libc::ioperm(port, 4, 1) } != 0 {
            return Err(SmmError::Ioperm {
                port,
                source: io::Error::last_os_error(),
            });
        }
    }
    Ok(())
}

fn send_smm(cmd: u32, arg: u32) -> Result<(), SmmError> {
    let mut regs = SmmRegs {
        eax: cmd,
        ebx: arg,
        ..SmmRegs::default()
    };
    smm_call(&mut regs)
}

/// Toggle BIOS automatic fan control using the command pair selected by
/// `version`. Root is required for the port grants; any failure here is
/// fatal to the caller.
pub fn bios_fan_control(version: u8, enable: bool) -> Result<(), SmmError> {
    if unsafe { libc::geteuid() } != 0 {
        return Err(SmmError::NotRoot);
    }
    let cmd = match (version, enable) {
        (1, true) => ENABLE_BIOS_METHOD1,
        (1, false) => DISABLE_BIOS_METHOD1,
        (2, true) => ENABLE_BIOS_METHOD2,
        (2, false) => DISABLE_BIOS_METHOD2,
        (v, _) => return Err(SmmError::UnsupportedVersion(v)),
    };
    init_ioperm()?;
    send_smm(cmd, 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_smm_failed_on_carry_flag() {
        assert!(smm_failed(1, 0x30a3, 0x0001));
    }

    #[test]
    fn test_smm_failed_on_all_ones_result() {
        assert!(smm_failed(0, 0x30a3, 0x000f_ffff));
        assert!(smm_failed(0, 0x30a3, 0xffff));
    }

    #[test]
    fn test_smm_failed_on_unchanged_result() {
        assert!(smm_failed(0, 0x30a3, 0x30a3));
    }

    #[test]
    fn test_smm_success_signature() {
        assert!(!smm_failed(0, 0x30a3, 0x0000));
        assert!(!smm_failed(0, 0x31a3, 0x0001));
    }

    #[test]
    fn test_bios_fan_control_rejects_bad_version() {
        // As non-root the privilege check fires first; as root the version
        // match rejects 0 and 3 before any port grant. Fatal either way.
        assert!(bios_fan_control(3, true).is_err());
        assert!(bios_fan_control(0, false).is_err());
    }

    #[test]
    fn test_command_pairs() {
        assert_eq!(ENABLE_BIOS_METHOD1, DISABLE_BIOS_METHOD1 + 0x100);
        assert_eq!(ENABLE_BIOS_METHOD2, DISABLE_BIOS_METHOD2 + 0x100);
    }
}
