//! # Error Types
//!
//! Defines error types and a result alias used throughout the [crate].
//!
//! Every fallible core operation returns [`Result`]. The engine never
//! aborts the process on an error: failures propagate to the caller and,
//! at the outermost layer, to the RPC client as an `error` reply. The
//! [`Serialize`] implementation produces an error-kind tag plus the
//! display message for exactly that purpose.

use serde::{Serialize, Serializer};
use thiserror::Error;

use crate::Addr;

/// Type alias for Results returned by spyglass functions
pub type Result<T> = std::result::Result<T, DebuggerError>;

/// Comprehensive error type for the debugger engine
///
/// [`DebuggerError`] encapsulates all failure modes of the core: bad
/// arguments, missing targets, kernel interface failures, syscall
/// injection failures and image format problems.
#[derive(Error, Debug)]
pub enum DebuggerError {
    #[error("Os error: {0}")]
    Os(#[from] nix::Error),
    #[error("Io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Address {0} is not 4-byte aligned")]
    UnalignedAddress(Addr),
    #[error("Unknown register name: {0}")]
    UnknownRegister(String),
    #[error("No breakpoint with id {0}")]
    BreakpointNotFound(u32),
    #[error("A breakpoint of the same type already exists for thread {tid} at {addr}")]
    DuplicateBreakpoint { tid: i32, addr: Addr },
    #[error("No process matching {0}")]
    ProcessNotFound(String),
    #[error("Symbol not found: {0}")]
    SymbolNotFound(String),
    #[error("Memory {start}-{end} lacks {needed} permission")]
    PermissionDenied { start: Addr, end: Addr, needed: char },
    #[error("Address {0} is not mapped in the target")]
    NotMapped(Addr),
    #[error("Invalid memory range: zero length or address overflow")]
    InvalidRange,
    #[error("Could not read {len} bytes at {addr} in the target")]
    MemoryRead { addr: Addr, len: usize },
    #[error("Could not write {len} bytes at {addr} in the target")]
    MemoryWrite { addr: Addr, len: usize },
    #[error("Syscall injection failed: {0}")]
    Injection(String),
    #[error("Injected syscall returned errno {0}")]
    InjectedSyscall(i32),
    #[error("All hardware debug register slots are in use")]
    NoHardwareSlot,
    #[error("Configuring hardware debug register slot {0} failed")]
    HwConfig(usize),
    #[error("Not a loadable AArch64 ELF64 image: {0}")]
    InvalidElf(String),
    #[error("No vacant target region of {0:#x} bytes")]
    NoSpace(u64),
    #[error("Operation is not supported: {0}")]
    Unsupported(&'static str),
    #[error("No target process is being traced")]
    NoTarget,
    #[error("Tried to launch while a target is already being traced")]
    AlreadyTracing,
    #[error("Executable does not exist: {0}")]
    ExecutableDoesNotExist(String),
    #[error("Executable is not a file: {0}")]
    ExecutableIsNotAFile(String),
    #[error("Launching the target failed: {0}")]
    LaunchFailed(String),
    #[error("Could not attach to any thread of process {0}")]
    AttachFailed(i32),
    #[error("Detached only {done}/{total} threads")]
    DetachIncomplete { done: usize, total: usize },
    #[error("No thread of the target could be resumed")]
    ResumeFailed,
    #[error("Thread did not stop: {0}")]
    NotStopped(String),
    #[error("Could not convert to CString: {0}")]
    CStringConv(#[from] std::ffi::NulError),
    #[error("Could not parse integer: {0}")]
    ParseInt(#[from] std::num::ParseIntError),
    #[error("Malformed command: {0}")]
    MalformedCommand(String),
    #[error("Working with JSON failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Disassembler error: {0}")]
    Capstone(#[from] capstone::Error),
}

// Serializable representation shipped in RPC error replies
#[derive(Serialize)]
struct SerializableError {
    error_type: String,
    message: String,
}

impl Serialize for DebuggerError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let error_type = match self {
            DebuggerError::Os(_) => "OS",
            DebuggerError::Io(_) => "IO",
            DebuggerError::InvalidArgument(_) => "InvalidArgument",
            DebuggerError::UnalignedAddress(_) => "UnalignedAddress",
            DebuggerError::UnknownRegister(_) => "UnknownRegister",
            DebuggerError::BreakpointNotFound(_) => "BreakpointNotFound",
            DebuggerError::DuplicateBreakpoint { .. } => "DuplicateBreakpoint",
            DebuggerError::ProcessNotFound(_) => "ProcessNotFound",
            DebuggerError::SymbolNotFound(_) => "SymbolNotFound",
            DebuggerError::PermissionDenied { .. } => "PermissionDenied",
            DebuggerError::NotMapped(_) => "NotMapped",
            DebuggerError::InvalidRange => "InvalidRange",
            DebuggerError::MemoryRead { .. } => "MemoryRead",
            DebuggerError::MemoryWrite { .. } => "MemoryWrite",
            DebuggerError::Injection(_) => "Injection",
            DebuggerError::InjectedSyscall(_) => "InjectedSyscall",
            DebuggerError::NoHardwareSlot => "NoHardwareSlot",
            DebuggerError::HwConfig(_) => "HwConfig",
            DebuggerError::InvalidElf(_) => "InvalidElf",
            DebuggerError::NoSpace(_) => "NoSpace",
            DebuggerError::Unsupported(_) => "Unsupported",
            DebuggerError::NoTarget => "NoTarget",
            DebuggerError::AlreadyTracing => "AlreadyTracing",
            DebuggerError::ExecutableDoesNotExist(_) => "ExecutableDoesNotExist",
            DebuggerError::ExecutableIsNotAFile(_) => "ExecutableIsNotAFile",
            DebuggerError::LaunchFailed(_) => "LaunchFailed",
            DebuggerError::AttachFailed(_) => "AttachFailed",
            DebuggerError::DetachIncomplete { .. } => "DetachIncomplete",
            DebuggerError::ResumeFailed => "ResumeFailed",
            DebuggerError::NotStopped(_) => "NotStopped",
            DebuggerError::CStringConv(_) => "CStringConversion",
            DebuggerError::ParseInt(_) => "ParseInt",
            DebuggerError::MalformedCommand(_) => "MalformedCommand",
            DebuggerError::Json(_) => "Json",
            DebuggerError::Capstone(_) => "Capstone",
        };

        let message = self.to_string();

        SerializableError {
            error_type: error_type.to_string(),
            message,
        }
        .serialize(serializer)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_error_serialization() {
        let err = DebuggerError::NoHardwareSlot;
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["error_type"], "NoHardwareSlot");
        assert!(json["message"].as_str().unwrap().contains("hardware"));
    }

    #[test]
    fn test_error_display_carries_address() {
        let err = DebuggerError::UnalignedAddress(Addr::from(0x1001u64));
        assert!(err.to_string().contains("0x0000000000001001"));
    }
}
