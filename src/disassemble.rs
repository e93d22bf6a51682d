//! Single-instruction classification backed by the capstone engine.
//!
//! The bridge fetches up to 16 bytes from target memory, decodes exactly
//! one AArch64 instruction and classifies it through fixed opcode-id
//! tables. Anything not in the tables is `Normal`; a decode failure is
//! `Unknown`.

use capstone::arch::arm64::{ArchMode, Arm64Insn};
use capstone::arch::BuildsCapstone;
use capstone::Capstone;
use nix::unistd::Pid;
use serde::Serialize;
use tracing::debug;

use crate::errors::{DebuggerError, Result};
use crate::memory::MemoryController;
use crate::Addr;

/// Control-flow class of one decoded instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum InstructionType {
    Unknown,
    Normal,
    UnconditionalBranch,
    ConditionalBranch,
    AuthenticatedBranch,
    Return,
    Syscall,
    Interrupt,
    Exception,
}

/// One decoded instruction of the target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DisassembledInstruction {
    pub address: Addr,
    pub mnemonic: String,
    pub operands: String,
    pub size: usize,
    pub kind: InstructionType,
}

const UNCONDITIONAL_BRANCH_INSNS: &[Arm64Insn] = &[
    Arm64Insn::ARM64_INS_B,
    Arm64Insn::ARM64_INS_BR,
    Arm64Insn::ARM64_INS_BRB,
    Arm64Insn::ARM64_INS_BL,
    Arm64Insn::ARM64_INS_BLR,
];

const CONDITIONAL_BRANCH_INSNS: &[Arm64Insn] = &[
    Arm64Insn::ARM64_INS_CBZ,
    Arm64Insn::ARM64_INS_CBNZ,
    Arm64Insn::ARM64_INS_TBZ,
    Arm64Insn::ARM64_INS_TBNZ,
    Arm64Insn::ARM64_INS_BC,
    Arm64Insn::ARM64_INS_BCAX,
];

const AUTHENTICATED_BRANCH_INSNS: &[Arm64Insn] = &[
    Arm64Insn::ARM64_INS_BRAA,
    Arm64Insn::ARM64_INS_BRAAZ,
    Arm64Insn::ARM64_INS_BRAB,
    Arm64Insn::ARM64_INS_BRABZ,
    Arm64Insn::ARM64_INS_BLRAA,
    Arm64Insn::ARM64_INS_BLRAAZ,
    Arm64Insn::ARM64_INS_BLRAB,
    Arm64Insn::ARM64_INS_BLRABZ,
];

const RETURN_INSNS: &[Arm64Insn] = &[
    Arm64Insn::ARM64_INS_RET,
    Arm64Insn::ARM64_INS_RETAA,
    Arm64Insn::ARM64_INS_RETAB,
    Arm64Insn::ARM64_INS_ERET,
    Arm64Insn::ARM64_INS_ERETAA,
    Arm64Insn::ARM64_INS_ERETAB,
    Arm64Insn::ARM64_INS_DRPS,
];

const SYSCALL_INSNS: &[Arm64Insn] = &[
    Arm64Insn::ARM64_INS_SVC,
    Arm64Insn::ARM64_INS_HVC,
    Arm64Insn::ARM64_INS_SMC,
    Arm64Insn::ARM64_INS_SYS,
    Arm64Insn::ARM64_INS_SYSL,
];

const INTERRUPT_INSNS: &[Arm64Insn] = &[
    Arm64Insn::ARM64_INS_BRK,
    Arm64Insn::ARM64_INS_BRKA,
    Arm64Insn::ARM64_INS_BRKAS,
    Arm64Insn::ARM64_INS_BRKB,
    Arm64Insn::ARM64_INS_BRKBS,
    Arm64Insn::ARM64_INS_HLT,
];

const EXCEPTION_INSNS: &[Arm64Insn] = &[
    Arm64Insn::ARM64_INS_ERET,
    Arm64Insn::ARM64_INS_ERETAA,
    Arm64Insn::ARM64_INS_ERETAB,
];

fn in_table(table: &[Arm64Insn], id: u32) -> bool {
    table.iter().any(|insn| *insn as u32 == id)
}

/// Maps a capstone instruction id onto an [`InstructionType`].
fn classify(id: u32) -> InstructionType {
    if id == Arm64Insn::ARM64_INS_INVALID as u32 {
        InstructionType::Unknown
    } else if in_table(UNCONDITIONAL_BRANCH_INSNS, id) {
        InstructionType::UnconditionalBranch
    } else if in_table(CONDITIONAL_BRANCH_INSNS, id) {
        InstructionType::ConditionalBranch
    } else if in_table(RETURN_INSNS, id) {
        InstructionType::Return
    } else if in_table(AUTHENTICATED_BRANCH_INSNS, id) {
        InstructionType::AuthenticatedBranch
    } else if in_table(SYSCALL_INSNS, id) {
        InstructionType::Syscall
    } else if in_table(INTERRUPT_INSNS, id) {
        InstructionType::Interrupt
    } else if in_table(EXCEPTION_INSNS, id) {
        InstructionType::Exception
    } else {
        InstructionType::Normal
    }
}

/// Disassembler bridge over the target.
///
/// The capstone handle is opened per decode so the bridge itself stays
/// plain data and can move between threads with the rest of the engine.
#[derive(Debug, Clone, Copy, Default)]
pub struct Disassembler;

impl Disassembler {
    pub fn new() -> Self {
        Disassembler
    }

    fn engine() -> Result<Capstone> {
        Capstone::new()
            .arm64()
            .mode(ArchMode::Arm)
            .build()
            .map_err(DebuggerError::Capstone)
    }

    /// Reads up to 16 bytes of target memory at `addr` (clamped to the
    /// covering region) and decodes one instruction.
    pub fn instruction_at(
        &self,
        memory: &MemoryController,
        pid: Pid,
        addr: Addr,
    ) -> Result<DisassembledInstruction> {
        let regions = memory.regions(pid)?;
        let region = regions
            .iter()
            .find(|region| region.contains(addr.u64()))
            .ok_or(DebuggerError::NotMapped(addr))?;

        let available = 16.min((region.end - addr) as usize);
        let mut code = [0u8; 16];
        memory.read(pid, addr, &mut code[..available])?;

        self.decode_one(&code[..available], addr)
    }

    /// Decodes one instruction out of `code`, assumed to sit at `addr`.
    pub fn decode_one(&self, code: &[u8], addr: Addr) -> Result<DisassembledInstruction> {
        let cs = Self::engine()?;
        let insns = cs.disasm_count(code, addr.u64(), 1)?;

        match insns.iter().next() {
            Some(insn) => Ok(DisassembledInstruction {
                address: addr,
                mnemonic: insn.mnemonic().unwrap_or_default().to_string(),
                operands: insn.op_str().unwrap_or_default().to_string(),
                size: insn.bytes().len(),
                kind: classify(insn.id().0),
            }),
            None => {
                debug!("no instruction decodes at {addr}");
                Ok(DisassembledInstruction {
                    address: addr,
                    mnemonic: String::new(),
                    operands: String::new(),
                    size: 0,
                    kind: InstructionType::Unknown,
                })
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn decode(word: u32) -> DisassembledInstruction {
        Disassembler::new()
            .decode_one(&word.to_le_bytes(), Addr::from(0x1_0000u64))
            .unwrap()
    }

    #[test]
    fn test_classify_common_instructions() {
        // nop
        assert_eq!(decode(0xD503_201F).kind, InstructionType::Normal);
        // svc #0
        assert_eq!(decode(0xD400_0001).kind, InstructionType::Syscall);
        // brk #0
        assert_eq!(decode(0xD420_0000).kind, InstructionType::Interrupt);
        // ret
        assert_eq!(decode(0xD65F_03C0).kind, InstructionType::Return);
        // b .
        assert_eq!(decode(0x1400_0000).kind, InstructionType::UnconditionalBranch);
        // blr x1
        assert_eq!(decode(0xD63F_0020).kind, InstructionType::UnconditionalBranch);
        // cbz x0, .
        assert_eq!(decode(0xB400_0000).kind, InstructionType::ConditionalBranch);
    }

    #[test]
    fn test_decoded_instruction_carries_text() {
        let insn = decode(0xD420_0000);
        assert_eq!(insn.mnemonic, "brk");
        assert_eq!(insn.size, 4);
        assert_eq!(insn.address.u64(), 0x1_0000);
    }

    #[test]
    fn test_undecodable_bytes_are_unknown() {
        let insn = Disassembler::new()
            .decode_one(&[0xFF, 0xFF, 0xFF, 0xFF], Addr::from(0x1_0000u64))
            .unwrap();
        assert_eq!(insn.kind, InstructionType::Unknown);
        assert_eq!(insn.size, 0);
        assert!(insn.mnemonic.is_empty());
    }

    #[test]
    fn test_truncated_code_is_unknown() {
        let insn = Disassembler::new()
            .decode_one(&[0x1F, 0x20], Addr::from(0x1_0000u64))
            .unwrap();
        assert_eq!(insn.kind, InstructionType::Unknown);
    }
}
