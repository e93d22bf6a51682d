//! Software and hardware breakpoints over the traced thread set.
//!
//! Software breakpoints patch the 32-bit `BRK #0` opcode over the target
//! instruction and keep the original word for restore. Hardware
//! breakpoints own one slot of the HW-debug register set for as long as
//! the record exists. Every record may carry a condition predicate that
//! is consulted when the breakpoint is hit.
//!
//! The manager keeps three structures coherent under one lock held
//! across metadata changes and the register/memory I/O they imply: the
//! id map, the per-thread id sets, and the free-slot set. Install order
//! and failure cleanup are arranged so that a record only ever exists
//! when its side effect (patched word or programmed slot) is in place.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard};

use nix::unistd::Pid;
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use tracing::{debug, error, warn};

use crate::consts::{
    BRK_OPCODE, DBGBCR_ENABLE, DBGBCR_EL0, DBGBCR_MATCH_FULL, DBGBCR_TYPE_EXECUTION,
    DBGBCR_TYPE_READWRITE, DBGBCR_TYPE_WRITE, HW_PROBE_ADDRESS,
};
use crate::errors::{DebuggerError, Result};
use crate::memory::MemoryController;
use crate::regs::{DbgSel, HwDebugReg, RegisterController, UserPtRegs};
use crate::Addr;

/// Process-wide monotonic breakpoint identity, starting at 1.
pub type BreakpointId = u32;

/// Predicate deciding whether a stop at a breakpoint should surface.
///
/// Runs against a fresh GPR snapshot of the owning thread. A panicking
/// predicate counts as "condition not met".
pub type BreakpointCondition = Arc<dyn Fn(Pid, Addr, &UserPtRegs) -> bool + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum BreakpointKind {
    Software,
    HwExecution,
    HwWrite,
    HwReadWrite,
}

/// Hardware breakpoint flavour as requested by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HwBreakpointKind {
    Execution,
    Write,
    ReadWrite,
}

impl HwBreakpointKind {
    fn record_kind(self) -> BreakpointKind {
        match self {
            HwBreakpointKind::Execution => BreakpointKind::HwExecution,
            HwBreakpointKind::Write => BreakpointKind::HwWrite,
            HwBreakpointKind::ReadWrite => BreakpointKind::HwReadWrite,
        }
    }

    fn type_bits(self) -> u32 {
        match self {
            HwBreakpointKind::Execution => DBGBCR_TYPE_EXECUTION,
            HwBreakpointKind::Write => DBGBCR_TYPE_WRITE,
            HwBreakpointKind::ReadWrite => DBGBCR_TYPE_READWRITE,
        }
    }
}

/// One installed breakpoint. Callers always receive copies; the records
/// themselves live inside the manager.
#[derive(Clone)]
pub struct Breakpoint {
    pub id: BreakpointId,
    pub tid: Pid,
    pub address: Addr,
    pub kind: BreakpointKind,
    pub enabled: bool,
    /// The 32-bit word replaced by `BRK #0` (software breakpoints only).
    pub original_instruction: u32,
    /// The owned HW-debug slot (hardware breakpoints only).
    pub hardware_slot: Option<usize>,
    pub(crate) condition: Option<BreakpointCondition>,
}

impl fmt::Debug for Breakpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Breakpoint")
            .field("id", &self.id)
            .field("tid", &self.tid)
            .field("address", &self.address)
            .field("kind", &self.kind)
            .field("enabled", &self.enabled)
            .field("original_instruction", &self.original_instruction)
            .field("hardware_slot", &self.hardware_slot)
            .field("conditional", &self.condition.is_some())
            .finish()
    }
}

impl Serialize for Breakpoint {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut st = serializer.serialize_struct("Breakpoint", 7)?;
        st.serialize_field("id", &self.id)?;
        st.serialize_field("tid", &self.tid.as_raw())?;
        st.serialize_field("address", &self.address)?;
        st.serialize_field("kind", &self.kind)?;
        st.serialize_field("enabled", &self.enabled)?;
        st.serialize_field("hardware_slot", &self.hardware_slot)?;
        st.serialize_field("conditional", &self.condition.is_some())?;
        st.end()
    }
}

struct ManagerState {
    breakpoints: HashMap<BreakpointId, Breakpoint>,
    by_tid: HashMap<Pid, HashSet<BreakpointId>>,
    free_slots: BTreeSet<usize>,
    probed_slots: Option<usize>,
    next_id: BreakpointId,
}

impl ManagerState {
    fn new() -> Self {
        ManagerState {
            breakpoints: HashMap::new(),
            by_tid: HashMap::new(),
            free_slots: BTreeSet::new(),
            probed_slots: None,
            next_id: 1,
        }
    }
}

/// Breakpoint bookkeeping and installation over one target.
pub struct BreakpointManager {
    memory: MemoryController,
    registers: RegisterController,
    state: Mutex<ManagerState>,
}

impl BreakpointManager {
    pub fn new(memory: MemoryController, registers: RegisterController) -> Self {
        BreakpointManager {
            memory,
            registers,
            state: Mutex::new(ManagerState::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ManagerState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Counts the usable HW-debug register slots of `pid` and seeds the
    /// free-slot set with `[0, count)`.
    ///
    /// A canary (address, control) pair is written to all 16 slots and
    /// read back; the hardware silently drops writes to slots it does not
    /// have, so the number of leading slots that round-trip the canary is
    /// the slot count. The original register set is restored on every
    /// path out of here.
    pub fn probe_hw_slots(&self, pid: Pid) -> Result<usize> {
        let mut state = self.lock();
        self.probe_locked(&mut state, pid)
    }

    fn probe_locked(&self, state: &mut ManagerState, pid: Pid) -> Result<usize> {
        let canary_ctrl = DBGBCR_ENABLE | DBGBCR_TYPE_EXECUTION | DBGBCR_EL0 | DBGBCR_MATCH_FULL;

        let original = self.registers.get_all_dbg(pid)?;
        let mut probe = original;
        for slot in probe.dbg_regs.iter_mut() {
            *slot = HwDebugReg::new(HW_PROBE_ADDRESS, canary_ctrl);
        }

        if let Err(e) = self.registers.set_all_dbg(pid, &probe) {
            error!("writing the debug-register canary failed: {e}");
            let _ = self.registers.set_all_dbg(pid, &original);
            return Err(e);
        }

        let verify = match self.registers.get_all_dbg(pid) {
            Ok(dbg) => dbg,
            Err(e) => {
                error!("reading back the debug-register canary failed: {e}");
                let _ = self.registers.set_all_dbg(pid, &original);
                return Err(e);
            }
        };

        let mut count = 0;
        for reg in verify.dbg_regs.iter() {
            if reg.addr == HW_PROBE_ADDRESS && reg.ctrl == canary_ctrl {
                count += 1;
            } else {
                break;
            }
        }

        self.registers.set_all_dbg(pid, &original)?;

        if count == 0 {
            warn!("process {pid} supports no hardware breakpoints");
        } else {
            debug!("process {pid} has {count} hardware debug slot(s)");
        }

        state.free_slots = (0..count).collect();
        state.probed_slots = Some(count);
        Ok(count)
    }

    /// Installs a software breakpoint at `addr` for thread `tid`.
    pub fn set_software(
        &self,
        tid: Pid,
        addr: Addr,
        condition: Option<BreakpointCondition>,
    ) -> Result<BreakpointId> {
        if !addr.is_instruction_aligned() {
            return Err(DebuggerError::UnalignedAddress(addr));
        }

        let mut state = self.lock();
        Self::check_duplicate(&state, tid, addr, BreakpointKind::Software)?;

        let mut word = [0u8; 4];
        self.memory.read(tid, addr, &mut word).map_err(|e| {
            error!("reading the original instruction at {addr} failed: {e}");
            DebuggerError::MemoryRead { addr, len: 4 }
        })?;
        let original_instruction = u32::from_le_bytes(word);

        self.memory
            .write_ptrace(tid, addr, &BRK_OPCODE.to_le_bytes())
            .map_err(|e| {
                error!("patching BRK at {addr} failed: {e}");
                DebuggerError::MemoryWrite { addr, len: 4 }
            })?;

        let id = Self::insert(
            &mut state,
            tid,
            addr,
            BreakpointKind::Software,
            original_instruction,
            None,
            condition,
        );
        Ok(id)
    }

    /// Installs a hardware breakpoint or watchpoint at `addr` for thread
    /// `tid`, taking one free debug-register slot.
    pub fn set_hardware(
        &self,
        tid: Pid,
        addr: Addr,
        kind: HwBreakpointKind,
        condition: Option<BreakpointCondition>,
    ) -> Result<BreakpointId> {
        if !addr.is_instruction_aligned() {
            return Err(DebuggerError::UnalignedAddress(addr));
        }

        let mut state = self.lock();
        Self::check_duplicate(&state, tid, addr, kind.record_kind())?;

        if state.probed_slots.is_none() {
            self.probe_locked(&mut state, tid)?;
        }

        let slot = state
            .free_slots
            .pop_first()
            .ok_or(DebuggerError::NoHardwareSlot)?;

        let control = DBGBCR_ENABLE | DBGBCR_EL0 | DBGBCR_MATCH_FULL | kind.type_bits();
        if let Err(e) = self
            .registers
            .set_dbg(tid, DbgSel::Slot(slot as u8), addr.u64(), control)
        {
            error!("configuring hardware slot {slot} failed: {e}");
            state.free_slots.insert(slot);
            return Err(DebuggerError::HwConfig(slot));
        }

        let id = Self::insert(
            &mut state,
            tid,
            addr,
            kind.record_kind(),
            0,
            Some(slot),
            condition,
        );
        Ok(id)
    }

    /// Removes a breakpoint and undoes its side effect.
    ///
    /// Restoring the original instruction of a software breakpoint is
    /// fail-closed: if the write fails the record is retained and the
    /// call errors. Hardware cleanup proceeds even when clearing the
    /// enable bit fails; the slot always returns to the free set.
    pub fn remove(&self, id: BreakpointId) -> Result<()> {
        let mut state = self.lock();
        let bp = state
            .breakpoints
            .get(&id)
            .cloned()
            .ok_or(DebuggerError::BreakpointNotFound(id))?;

        match bp.kind {
            BreakpointKind::Software => {
                self.memory
                    .write_ptrace(bp.tid, bp.address, &bp.original_instruction.to_le_bytes())
                    .map_err(|e| {
                        error!("restoring the instruction of breakpoint {id} failed: {e}");
                        DebuggerError::MemoryWrite {
                            addr: bp.address,
                            len: 4,
                        }
                    })?;
            }
            _ => {
                if let Some(slot) = bp.hardware_slot {
                    match self.registers.get_dbg(bp.tid, DbgSel::Slot(slot as u8)) {
                        Ok((addr, ctrl)) => {
                            if let Err(e) = self.registers.set_dbg(
                                bp.tid,
                                DbgSel::Slot(slot as u8),
                                addr,
                                ctrl & !DBGBCR_ENABLE,
                            ) {
                                warn!("clearing hardware slot {slot} failed: {e}");
                            }
                        }
                        Err(e) => warn!("reading hardware slot {slot} failed: {e}"),
                    }
                    state.free_slots.insert(slot);
                }
            }
        }

        Self::erase(&mut state, &bp);
        debug!(
            "removed breakpoint {id} (tid {}, address {})",
            bp.tid, bp.address
        );
        Ok(())
    }

    pub fn enable(&self, id: BreakpointId) -> Result<()> {
        self.flip(id, true)
    }

    pub fn disable(&self, id: BreakpointId) -> Result<()> {
        self.flip(id, false)
    }

    /// Enabling an enabled breakpoint (or disabling a disabled one) is a
    /// no-op; otherwise the patch word or the slot enable bit flips and
    /// the record follows.
    fn flip(&self, id: BreakpointId, target: bool) -> Result<()> {
        let mut state = self.lock();
        let bp = state
            .breakpoints
            .get(&id)
            .cloned()
            .ok_or(DebuggerError::BreakpointNotFound(id))?;

        if bp.enabled == target {
            debug!(
                "breakpoint {id} is already {}",
                if target { "enabled" } else { "disabled" }
            );
            return Ok(());
        }

        match bp.kind {
            BreakpointKind::Software => {
                let word = if target {
                    BRK_OPCODE
                } else {
                    bp.original_instruction
                };
                self.memory
                    .write_ptrace(bp.tid, bp.address, &word.to_le_bytes())
                    .map_err(|e| {
                        error!("rewriting breakpoint {id} at {} failed: {e}", bp.address);
                        DebuggerError::MemoryWrite {
                            addr: bp.address,
                            len: 4,
                        }
                    })?;
            }
            _ => {
                if let Some(slot) = bp.hardware_slot {
                    let sel = DbgSel::Slot(slot as u8);
                    let (addr, ctrl) = self.registers.get_dbg(bp.tid, sel)?;
                    let ctrl = if target {
                        ctrl | DBGBCR_ENABLE
                    } else {
                        ctrl & !DBGBCR_ENABLE
                    };
                    self.registers.set_dbg(bp.tid, sel, addr, ctrl)?;
                }
            }
        }

        if let Some(record) = state.breakpoints.get_mut(&id) {
            record.enabled = target;
        }
        Ok(())
    }

    /// Evaluates the condition of breakpoint `id` against a fresh GPR
    /// snapshot of its thread.
    ///
    /// Unknown or disabled breakpoints and failing snapshots yield
    /// `false`; a breakpoint without a condition yields `true`.
    pub fn check_condition(&self, id: BreakpointId) -> bool {
        let state = self.lock();
        let Some(bp) = state.breakpoints.get(&id) else {
            debug!("condition check for unknown breakpoint {id}");
            return false;
        };
        if !bp.enabled {
            debug!("condition check for disabled breakpoint {id}");
            return false;
        }
        let Some(condition) = bp.condition.clone() else {
            return true;
        };

        let regs = match self.registers.get_all_gpr(bp.tid) {
            Ok(regs) => regs,
            Err(e) => {
                debug!("condition check for breakpoint {id}: no registers: {e}");
                return false;
            }
        };

        let (tid, addr) = (bp.tid, bp.address);
        match catch_unwind(AssertUnwindSafe(|| condition(tid, addr, &regs))) {
            Ok(met) => {
                debug!(
                    "breakpoint {id} condition {}",
                    if met { "met" } else { "not met" }
                );
                met
            }
            Err(_) => {
                warn!("condition callback of breakpoint {id} panicked");
                false
            }
        }
    }

    /// Copies of all records.
    pub fn all(&self) -> Vec<Breakpoint> {
        let state = self.lock();
        state.breakpoints.values().cloned().collect()
    }

    /// Copies of the records belonging to `tid` (empty if none).
    pub fn by_tid(&self, tid: Pid) -> Vec<Breakpoint> {
        let state = self.lock();
        let Some(ids) = state.by_tid.get(&tid) else {
            return Vec::new();
        };
        ids.iter()
            .filter_map(|id| state.breakpoints.get(id).cloned())
            .collect()
    }

    /// Copy of the record with identity `id`.
    pub fn get(&self, id: BreakpointId) -> Option<Breakpoint> {
        self.lock().breakpoints.get(&id).cloned()
    }

    pub fn free_slot_count(&self) -> usize {
        self.lock().free_slots.len()
    }

    pub fn installed_count(&self) -> usize {
        self.lock().breakpoints.len()
    }

    fn check_duplicate(
        state: &ManagerState,
        tid: Pid,
        addr: Addr,
        kind: BreakpointKind,
    ) -> Result<()> {
        let duplicate = state
            .breakpoints
            .values()
            .any(|bp| bp.tid == tid && bp.address == addr && bp.kind == kind);
        if duplicate {
            error!("thread {tid} already has a {kind:?} breakpoint at {addr}");
            Err(DebuggerError::DuplicateBreakpoint {
                tid: tid.as_raw(),
                addr,
            })
        } else {
            Ok(())
        }
    }

    fn insert(
        state: &mut ManagerState,
        tid: Pid,
        addr: Addr,
        kind: BreakpointKind,
        original_instruction: u32,
        hardware_slot: Option<usize>,
        condition: Option<BreakpointCondition>,
    ) -> BreakpointId {
        let id = state.next_id;
        state.next_id += 1;

        let bp = Breakpoint {
            id,
            tid,
            address: addr,
            kind,
            enabled: true,
            original_instruction,
            hardware_slot,
            condition,
        };
        state.breakpoints.insert(id, bp);
        state.by_tid.entry(tid).or_default().insert(id);

        debug!("installed breakpoint {id} (tid {tid}, address {addr}, {kind:?})");
        id
    }

    fn erase(state: &mut ManagerState, bp: &Breakpoint) {
        if let Some(ids) = state.by_tid.get_mut(&bp.tid) {
            ids.remove(&bp.id);
            if ids.is_empty() {
                state.by_tid.remove(&bp.tid);
            }
        }
        state.breakpoints.remove(&bp.id);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn manager() -> BreakpointManager {
        BreakpointManager::new(MemoryController::new(), RegisterController::new())
    }

    #[test]
    fn test_hw_kind_mapping() {
        assert_eq!(
            HwBreakpointKind::Execution.record_kind(),
            BreakpointKind::HwExecution
        );
        assert_eq!(HwBreakpointKind::Write.record_kind(), BreakpointKind::HwWrite);
        assert_eq!(
            HwBreakpointKind::ReadWrite.record_kind(),
            BreakpointKind::HwReadWrite
        );
        assert_eq!(HwBreakpointKind::Execution.type_bits(), 0b00 << 1);
        assert_eq!(HwBreakpointKind::Write.type_bits(), 0b01 << 1);
        assert_eq!(HwBreakpointKind::ReadWrite.type_bits(), 0b10 << 1);
    }

    #[test]
    fn test_unaligned_address_is_rejected() {
        let manager = manager();
        let tid = Pid::from_raw(1);
        let err = manager
            .set_software(tid, Addr::from(0x1002u64), None)
            .unwrap_err();
        assert!(matches!(err, DebuggerError::UnalignedAddress(_)));
        let err = manager
            .set_hardware(tid, Addr::from(0x1001u64), HwBreakpointKind::Write, None)
            .unwrap_err();
        assert!(matches!(err, DebuggerError::UnalignedAddress(_)));
    }

    #[test]
    fn test_unknown_id_lookups() {
        let manager = manager();
        assert!(manager.get(42).is_none());
        assert!(!manager.check_condition(42));
        assert!(manager.by_tid(Pid::from_raw(42)).is_empty());
        assert!(matches!(
            manager.remove(42),
            Err(DebuggerError::BreakpointNotFound(42))
        ));
        assert!(matches!(
            manager.enable(42),
            Err(DebuggerError::BreakpointNotFound(42))
        ));
    }

    #[test]
    fn test_breakpoint_serialization() {
        let bp = Breakpoint {
            id: 3,
            tid: Pid::from_raw(100),
            address: Addr::from(0x4000u64),
            kind: BreakpointKind::HwWrite,
            enabled: true,
            original_instruction: 0,
            hardware_slot: Some(1),
            condition: Some(Arc::new(|_, _, _| true)),
        };
        let json = serde_json::to_value(&bp).unwrap();
        assert_eq!(json["id"], 3);
        assert_eq!(json["tid"], 100);
        assert_eq!(json["kind"], "HwWrite");
        assert_eq!(json["hardware_slot"], 1);
        assert_eq!(json["conditional"], true);
    }
}
