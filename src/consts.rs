//! Architecture and kernel constants that are deeply nested in the uapi
//! headers and not exposed through nix or the Rust libc bindings.
//!
//! Sources:
//! <https://elixir.bootlin.com/linux/v6.13.1/source/include/uapi/asm-generic/siginfo.h#L227>
//! <https://elixir.bootlin.com/linux/v6.13.1/source/arch/arm64/include/uapi/asm/ptrace.h>

#![allow(unused)]

/// Sent by the kernel from somewhere
pub const SI_KERNEL: i32 = 0x80;

// ---------------- SIGTRAP si_codes ----------------

/// Process breakpoint
pub const TRAP_BRKPT: i32 = 0x1;
/// Process trace trap
pub const TRAP_TRACE: i32 = 0x2;
/// Hardware breakpoint/watchpoint
pub const TRAP_HWBKPT: i32 = 0x4;

// ---------------- register set note types ----------------

/// General purpose registers (`struct user_pt_regs`)
pub const NT_PRSTATUS: u32 = 1;
/// FP/SIMD registers (`struct user_fpsimd_state`)
pub const NT_FPREGSET: u32 = 2;
/// Hardware breakpoint debug registers (`struct user_hwdebug_state`)
pub const NT_ARM_HW_BREAK: u32 = 0x402;

// ---------------- DBGBCR control register bits (ARMv8) ----------------

/// Breakpoint enable
pub const DBGBCR_ENABLE: u32 = 1 << 0;
/// Execution breakpoint (0b00 in bits [2:1])
pub const DBGBCR_TYPE_EXECUTION: u32 = 0b00 << 1;
/// Write watchpoint (0b01 in bits [2:1])
pub const DBGBCR_TYPE_WRITE: u32 = 0b01 << 1;
/// Read/write watchpoint (0b10 in bits [2:1])
pub const DBGBCR_TYPE_READWRITE: u32 = 0b10 << 1;
/// Match in EL0 (user space) only
pub const DBGBCR_EL0: u32 = 1 << 6;
/// Full address match (0b00 in bits [13:12])
pub const DBGBCR_MATCH_FULL: u32 = 0b00 << 12;

/// Number of (address, control) slots carried by the HW-debug register set.
pub const HW_DEBUG_SLOTS: usize = 16;

/// Canary address written when probing how many debug registers exist.
pub const HW_PROBE_ADDRESS: u64 = 0x1000_0000;

// ---------------- instruction encodings ----------------

/// AArch64 `BRK #0`. Raises SIGTRAP when executed.
pub const BRK_OPCODE: u32 = 0xD420_0000;

// ---------------- AArch64 syscall numbers ----------------

/// `__NR_mmap` on AArch64
pub const SYS_MMAP: u64 = 222;
/// `__NR_munmap` on AArch64
pub const SYS_MUNMAP: u64 = 215;

// ---------------- address space ----------------

/// Highest user-space address considered when searching for vacant
/// regions (48-bit VA layout).
pub const USER_SPACE_END: u64 = 0x0000_7FFF_FFFF_FFFF;

// ---------------- transport ----------------

/// Default TCP port of the RPC server.
pub const DEFAULT_RPC_PORT: u16 = 5073;

/// Chunk size for bulk memory scans and dumps.
pub const MEM_CHUNK_SIZE: usize = 4 * 1024 * 1024;
