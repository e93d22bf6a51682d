//! Typed access to the AArch64 register sets of a stopped tracee.
//!
//! Three orthogonal views exist, each backed by one kernel register set:
//! general-purpose registers (`NT_PRSTATUS`), FP/SIMD registers
//! (`NT_FPREGSET`) and the hardware-debug registers (`NT_ARM_HW_BREAK`).
//! The image structs mirror the uapi layout of
//! `arch/arm64/include/uapi/asm/ptrace.h` bit for bit.
//!
//! There is no caching anywhere in this module. The tracee may be
//! resumed and re-stopped between any two calls, so every accessor
//! performs a fresh register-set round-trip; single-register writes are
//! read-modify-write cycles on the full set.

use std::fmt::Display;
use std::str::FromStr;

use nix::unistd::Pid;
use serde::Serialize;
use tracing::trace;

use crate::consts::{NT_ARM_HW_BREAK, NT_FPREGSET, NT_PRSTATUS};
use crate::errors::{DebuggerError, Result};
use crate::tracer;

/// Image of `struct user_pt_regs`: X0-X30, SP, PC, PSTATE.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct UserPtRegs {
    pub regs: [u64; 31],
    pub sp: u64,
    pub pc: u64,
    pub pstate: u64,
}

/// Image of `struct user_fpsimd_state`: V0-V31, FPSR, FPCR.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UserFpsimdState {
    pub vregs: [u128; 32],
    pub fpsr: u32,
    pub fpcr: u32,
}

/// One (address, control) pair of the HW-debug register set.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HwDebugReg {
    pub addr: u64,
    pub ctrl: u32,
    pad: u32,
}

impl HwDebugReg {
    pub fn new(addr: u64, ctrl: u32) -> Self {
        Self { addr, ctrl, pad: 0 }
    }
}

/// Image of `struct user_hwdebug_state`: an info word plus up to 16
/// (address, control) pairs.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UserHwDebugState {
    pub dbg_info: u32,
    pad: u32,
    pub dbg_regs: [HwDebugReg; crate::consts::HW_DEBUG_SLOTS],
}

/// Selector for one general-purpose register.
///
/// `X(n)` is only meaningful for `n <= 30`; the [`FromStr`] parser and
/// [`GprName::x`] are the validating constructors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GprName {
    X(u8),
    Sp,
    Pc,
    Pstate,
}

impl GprName {
    pub fn x(n: u8) -> Result<Self> {
        if n <= 30 {
            Ok(GprName::X(n))
        } else {
            Err(DebuggerError::UnknownRegister(format!("x{n}")))
        }
    }
}

impl FromStr for GprName {
    type Err = DebuggerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "sp" => Ok(GprName::Sp),
            "pc" => Ok(GprName::Pc),
            "pstate" => Ok(GprName::Pstate),
            _ => {
                let n = s
                    .strip_prefix('x')
                    .and_then(|rest| rest.parse::<u8>().ok())
                    .ok_or_else(|| DebuggerError::UnknownRegister(s.to_string()))?;
                GprName::x(n)
            }
        }
    }
}

impl Display for GprName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GprName::X(n) => write!(f, "x{n}"),
            GprName::Sp => write!(f, "sp"),
            GprName::Pc => write!(f, "pc"),
            GprName::Pstate => write!(f, "pstate"),
        }
    }
}

/// Selector for one FP/SIMD register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FprName {
    V(u8),
    Fpsr,
    Fpcr,
}

impl FprName {
    pub fn v(n: u8) -> Result<Self> {
        if n <= 31 {
            Ok(FprName::V(n))
        } else {
            Err(DebuggerError::UnknownRegister(format!("v{n}")))
        }
    }
}

impl FromStr for FprName {
    type Err = DebuggerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "fpsr" => Ok(FprName::Fpsr),
            "fpcr" => Ok(FprName::Fpcr),
            _ => {
                let n = s
                    .strip_prefix('v')
                    .and_then(|rest| rest.parse::<u8>().ok())
                    .ok_or_else(|| DebuggerError::UnknownRegister(s.to_string()))?;
                FprName::v(n)
            }
        }
    }
}

impl Display for FprName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FprName::V(n) => write!(f, "v{n}"),
            FprName::Fpsr => write!(f, "fpsr"),
            FprName::Fpcr => write!(f, "fpcr"),
        }
    }
}

/// Value of one FP/SIMD register: a 128-bit vector for V0-V31 or a
/// 32-bit word for FPSR/FPCR.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FprValue {
    Vector(u128),
    Status(u32),
}

impl Display for FprValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FprValue::Vector(v) => write!(f, "{v:#034x}"),
            FprValue::Status(v) => write!(f, "{v:#010x}"),
        }
    }
}

/// Selector for one slot of the HW-debug register set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbgSel {
    Slot(u8),
    Info,
}

impl DbgSel {
    pub fn slot(n: u8) -> Result<Self> {
        if (n as usize) < crate::consts::HW_DEBUG_SLOTS {
            Ok(DbgSel::Slot(n))
        } else {
            Err(DebuggerError::UnknownRegister(format!("dbg{n}")))
        }
    }
}

impl FromStr for DbgSel {
    type Err = DebuggerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "dbg_info" => Ok(DbgSel::Info),
            _ => {
                let n = s
                    .strip_prefix("dbg")
                    .and_then(|rest| rest.parse::<u8>().ok())
                    .ok_or_else(|| DebuggerError::UnknownRegister(s.to_string()))?;
                DbgSel::slot(n)
            }
        }
    }
}

impl Display for DbgSel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DbgSel::Slot(n) => write!(f, "dbg{n}"),
            DbgSel::Info => write!(f, "dbg_info"),
        }
    }
}

impl UserPtRegs {
    pub fn get(&self, name: GprName) -> u64 {
        match name {
            GprName::X(n) => self.regs[usize::from(n)],
            GprName::Sp => self.sp,
            GprName::Pc => self.pc,
            GprName::Pstate => self.pstate,
        }
    }

    pub fn set(&mut self, name: GprName, value: u64) {
        match name {
            GprName::X(n) => self.regs[usize::from(n)] = value,
            GprName::Sp => self.sp = value,
            GprName::Pc => self.pc = value,
            GprName::Pstate => self.pstate = value,
        }
    }
}

/// Register-set I/O plane over one traced thread set.
///
/// Stateless by design; see the module notes on caching.
#[derive(Debug, Clone, Copy, Default)]
pub struct RegisterController;

impl RegisterController {
    pub fn new() -> Self {
        RegisterController
    }

    pub fn get_all_gpr(&self, tid: Pid) -> Result<UserPtRegs> {
        let mut regs = UserPtRegs::default();
        tracer::get_regset(tid, NT_PRSTATUS, &mut regs)?;
        Ok(regs)
    }

    pub fn set_all_gpr(&self, tid: Pid, regs: &UserPtRegs) -> Result<()> {
        tracer::set_regset(tid, NT_PRSTATUS, regs)
    }

    pub fn get_all_fpr(&self, tid: Pid) -> Result<UserFpsimdState> {
        let mut fpr = UserFpsimdState::default();
        tracer::get_regset(tid, NT_FPREGSET, &mut fpr)?;
        Ok(fpr)
    }

    pub fn set_all_fpr(&self, tid: Pid, fpr: &UserFpsimdState) -> Result<()> {
        tracer::set_regset(tid, NT_FPREGSET, fpr)
    }

    pub fn get_all_dbg(&self, tid: Pid) -> Result<UserHwDebugState> {
        let mut dbg = UserHwDebugState::default();
        tracer::get_regset(tid, NT_ARM_HW_BREAK, &mut dbg)?;
        Ok(dbg)
    }

    pub fn set_all_dbg(&self, tid: Pid, dbg: &UserHwDebugState) -> Result<()> {
        tracer::set_regset(tid, NT_ARM_HW_BREAK, dbg)
    }

    pub fn get_gpr(&self, tid: Pid, name: GprName) -> Result<u64> {
        Ok(self.get_all_gpr(tid)?.get(name))
    }

    pub fn set_gpr(&self, tid: Pid, name: GprName, value: u64) -> Result<()> {
        let mut regs = self.get_all_gpr(tid)?;
        regs.set(name, value);
        trace!("thread {tid}: {name} <- {value:#x}");
        self.set_all_gpr(tid, &regs)
    }

    pub fn get_fpr(&self, tid: Pid, name: FprName) -> Result<FprValue> {
        let fpr = self.get_all_fpr(tid)?;
        Ok(match name {
            FprName::V(n) => FprValue::Vector(fpr.vregs[usize::from(n)]),
            FprName::Fpsr => FprValue::Status(fpr.fpsr),
            FprName::Fpcr => FprValue::Status(fpr.fpcr),
        })
    }

    pub fn set_fpr(&self, tid: Pid, name: FprName, value: FprValue) -> Result<()> {
        let mut fpr = self.get_all_fpr(tid)?;
        match (name, value) {
            (FprName::V(n), FprValue::Vector(v)) => fpr.vregs[usize::from(n)] = v,
            (FprName::Fpsr, FprValue::Status(v)) => fpr.fpsr = v,
            (FprName::Fpcr, FprValue::Status(v)) => fpr.fpcr = v,
            (name, value) => {
                return Err(DebuggerError::InvalidArgument(format!(
                    "value {value} does not fit register {name}"
                )))
            }
        }
        self.set_all_fpr(tid, &fpr)
    }

    /// Reads one debug-register slot as an (address, control) pair.
    /// [`DbgSel::Info`] yields only the control word, with address 0.
    pub fn get_dbg(&self, tid: Pid, sel: DbgSel) -> Result<(u64, u32)> {
        let dbg = self.get_all_dbg(tid)?;
        Ok(match sel {
            DbgSel::Slot(n) => {
                let reg = dbg.dbg_regs[usize::from(n)];
                (reg.addr, reg.ctrl)
            }
            DbgSel::Info => (0, dbg.dbg_info),
        })
    }

    /// Writes one debug-register slot. For [`DbgSel::Info`] only the
    /// control word is written.
    pub fn set_dbg(&self, tid: Pid, sel: DbgSel, addr: u64, ctrl: u32) -> Result<()> {
        let mut dbg = self.get_all_dbg(tid)?;
        match sel {
            DbgSel::Slot(n) => dbg.dbg_regs[usize::from(n)] = HwDebugReg::new(addr, ctrl),
            DbgSel::Info => dbg.dbg_info = ctrl,
        }
        self.set_all_dbg(tid, &dbg)
    }

    pub fn get_pc(&self, tid: Pid) -> Result<u64> {
        self.get_gpr(tid, GprName::Pc)
    }

    pub fn set_pc(&self, tid: Pid, value: u64) -> Result<()> {
        self.set_gpr(tid, GprName::Pc, value)
    }

    pub fn get_sp(&self, tid: Pid) -> Result<u64> {
        self.get_gpr(tid, GprName::Sp)
    }

    pub fn set_sp(&self, tid: Pid, value: u64) -> Result<()> {
        self.set_gpr(tid, GprName::Sp, value)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::mem::size_of;

    #[test]
    fn test_regset_image_sizes_match_uapi() {
        assert_eq!(size_of::<UserPtRegs>(), 34 * 8);
        assert_eq!(size_of::<UserFpsimdState>(), 32 * 16 + 16);
        assert_eq!(size_of::<HwDebugReg>(), 16);
        assert_eq!(size_of::<UserHwDebugState>(), 8 + 16 * 16);
    }

    #[test]
    fn test_gpr_name_parsing() {
        assert_eq!("x0".parse::<GprName>().unwrap(), GprName::X(0));
        assert_eq!("x30".parse::<GprName>().unwrap(), GprName::X(30));
        assert_eq!("sp".parse::<GprName>().unwrap(), GprName::Sp);
        assert_eq!("pc".parse::<GprName>().unwrap(), GprName::Pc);
        assert_eq!("pstate".parse::<GprName>().unwrap(), GprName::Pstate);
        assert!("x31".parse::<GprName>().is_err());
        assert!("w0".parse::<GprName>().is_err());
        assert!("".parse::<GprName>().is_err());
    }

    #[test]
    fn test_fpr_and_dbg_name_parsing() {
        assert_eq!("v31".parse::<FprName>().unwrap(), FprName::V(31));
        assert!("v32".parse::<FprName>().is_err());
        assert_eq!("fpsr".parse::<FprName>().unwrap(), FprName::Fpsr);
        assert_eq!("dbg15".parse::<DbgSel>().unwrap(), DbgSel::Slot(15));
        assert!("dbg16".parse::<DbgSel>().is_err());
        assert_eq!("dbg_info".parse::<DbgSel>().unwrap(), DbgSel::Info);
    }

    #[test]
    fn test_name_display_roundtrip() {
        for name in ["x0", "x17", "x30", "sp", "pc", "pstate"] {
            assert_eq!(name.parse::<GprName>().unwrap().to_string(), name);
        }
    }

    #[test]
    fn test_gpr_slot_access() {
        let mut regs = UserPtRegs::default();
        regs.set(GprName::X(8), 0xDE);
        regs.set(GprName::Sp, 0x7fff_0000);
        regs.set(GprName::Pc, 0x40_0000);
        assert_eq!(regs.get(GprName::X(8)), 0xDE);
        assert_eq!(regs.regs[8], 0xDE);
        assert_eq!(regs.get(GprName::Sp), 0x7fff_0000);
        assert_eq!(regs.get(GprName::Pc), 0x40_0000);
    }
}
