//! # Spyglass
//!
//! Remote-controlled dynamic-analysis engine for AArch64 Linux/Android
//! user-space processes.
//!
//! A controller connects over a length-prefixed TCP protocol ([`rpc`]) and
//! drives the in-process debugger core: target lifecycle ([`debugger`]),
//! typed register access ([`regs`]), target memory I/O with
//! syscall-injected allocation ([`memory`]), software and hardware
//! breakpoints with optional condition predicates ([`breakpoint`]),
//! single-instruction classification ([`disassemble`]), and injection of
//! additional ELF images into the live address space ([`elf`],
//! [`loader`]).
//!
//! The core is synchronous and sequential per target: every operation
//! completes (success or failure) before the next command is read from
//! the wire.

use std::sync::OnceLock;

pub mod addr;
pub mod breakpoint;
pub mod commands;
pub mod consts;
pub mod debugger;
pub mod disassemble;
pub mod elf;
pub mod errors;
pub mod loader;
pub mod memory;
pub mod procfs;
pub mod regs;
pub mod rpc;
pub mod tracer;

pub use addr::Addr;
pub use errors::Result;

/// Machine word as the ptrace data plane sees it.
pub type Word = i64;

/// Page size of the target, queried once from the kernel.
///
/// The engine only ever traces processes on the machine it runs on, so
/// the host page size is the target page size.
pub fn page_size() -> u64 {
    static PAGE_SIZE: OnceLock<u64> = OnceLock::new();
    *PAGE_SIZE.get_or_init(|| {
        match nix::unistd::sysconf(nix::unistd::SysconfVar::PAGE_SIZE) {
            Ok(Some(size)) if size > 0 => size as u64,
            _ => {
                tracing::warn!("could not query the page size, assuming 4096");
                4096
            }
        }
    })
}

/// Rounds `value` up to the next multiple of `alignment` (a power of two).
pub fn align_up(value: u64, alignment: u64) -> u64 {
    (value + alignment - 1) & !(alignment - 1)
}

/// Rounds `value` down to the previous multiple of `alignment` (a power of two).
pub fn align_down(value: u64, alignment: u64) -> u64 {
    value & !(alignment - 1)
}

/// Rounds `value` up to a page boundary.
pub fn align_page_up(value: u64) -> u64 {
    align_up(value, page_size())
}

/// Rounds `value` down to a page boundary.
pub fn align_page_down(value: u64) -> u64 {
    align_down(value, page_size())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_alignment() {
        assert_eq!(align_up(0, 4096), 0);
        assert_eq!(align_up(1, 4096), 4096);
        assert_eq!(align_up(4096, 4096), 4096);
        assert_eq!(align_up(4097, 4096), 8192);
        assert_eq!(align_down(4097, 4096), 4096);
        assert_eq!(align_down(4095, 4096), 0);
    }

    #[test]
    fn test_page_alignment_is_idempotent() {
        for v in [0u64, 1, 4095, 4096, 0xdead_beef] {
            assert_eq!(align_page_up(align_page_up(v)), align_page_up(v));
            assert_eq!(align_page_down(align_page_down(v)), align_page_down(v));
        }
    }
}
