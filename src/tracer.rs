//! Thin, uniformly-logged wrappers around the kernel tracing primitives.
//!
//! Everything the engine does to a tracee funnels through this module:
//! the typed `ptrace` requests exposed by [nix], the raw
//! `PTRACE_GETREGSET`/`PTRACE_SETREGSET` calls that nix does not type for
//! AArch64, `waitpid`, and the syscall-injection protocol used by the
//! memory controller to run `mmap`/`munmap` inside the target.

use std::mem;

use nix::errno::Errno;
use nix::libc;
use nix::sys::ptrace::{self, Options};
use nix::sys::signal::Signal;
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use tracing::{debug, error, trace};

use crate::errors::{DebuggerError, Result};
use crate::{Addr, Word};

/// Makes the calling process request tracing by its parent.
pub fn traceme() -> Result<()> {
    Ok(ptrace::traceme()?)
}

pub fn attach(tid: Pid) -> Result<()> {
    trace!("attaching to {tid}");
    Ok(ptrace::attach(tid)?)
}

pub fn detach(tid: Pid) -> Result<()> {
    trace!("detaching from {tid}");
    Ok(ptrace::detach(tid, None)?)
}

pub fn cont(tid: Pid) -> Result<()> {
    trace!("continuing {tid}");
    Ok(ptrace::cont(tid, None)?)
}

pub fn single_step(tid: Pid) -> Result<()> {
    trace!("single stepping {tid}");
    Ok(ptrace::step(tid, None)?)
}

pub fn kill(tid: Pid) -> Result<()> {
    Ok(ptrace::kill(tid)?)
}

/// Reads one word of tracee memory. Bypasses page protections.
pub fn peek(tid: Pid, addr: Addr) -> Result<Word> {
    Ok(ptrace::read(tid, addr.raw_pointer())?)
}

/// Writes one word of tracee memory. Bypasses page protections.
pub fn poke(tid: Pid, addr: Addr, word: Word) -> Result<()> {
    Ok(ptrace::write(tid, addr.raw_pointer(), word)?)
}

/// Installs the default trace options on a freshly attached thread.
///
/// The engine wants a stop for every exit, clone, exec, fork, vfork and
/// vfork-done event so no thread of the target escapes tracing.
pub fn set_default_options(tid: Pid) -> Result<()> {
    let options = Options::PTRACE_O_TRACEEXIT
        | Options::PTRACE_O_TRACECLONE
        | Options::PTRACE_O_TRACEEXEC
        | Options::PTRACE_O_TRACEFORK
        | Options::PTRACE_O_TRACEVFORK
        | Options::PTRACE_O_TRACEVFORKDONE;
    Ok(ptrace::setoptions(tid, options)?)
}

/// Waits for the next state change of `tid`.
pub fn wait(tid: Pid, flags: Option<WaitPidFlag>) -> Result<WaitStatus> {
    let status = waitpid(tid, flags)?;
    trace!("waitpid({tid}) -> {status:?}");
    Ok(status)
}

/// Waits until `tid` reports a stop; any other state change is an error.
pub fn wait_for_stop(tid: Pid, flags: Option<WaitPidFlag>) -> Result<WaitStatus> {
    let status = wait(tid, flags)?;
    match status {
        WaitStatus::Stopped(..) | WaitStatus::PtraceEvent(..) | WaitStatus::PtraceSyscall(_) => {
            Ok(status)
        }
        other => Err(DebuggerError::NotStopped(format!("thread {tid}: {other:?}"))),
    }
}

/// True for the stops the syscall-injection protocol expects: a SIGTRAP
/// delivery or a syscall stop.
fn is_trap_stop(status: &WaitStatus) -> bool {
    matches!(
        status,
        WaitStatus::Stopped(_, Signal::SIGTRAP) | WaitStatus::PtraceSyscall(_)
    )
}

/// Runs the syscall staged in the tracee's registers.
///
/// Resumes with the syscall-stop variant of continue, waits for the
/// syscall-entry stop, resumes again and waits for the syscall-exit stop.
/// Both stops must be SIGTRAPs. On failure the tracee is left in a
/// stopped state and an [`DebuggerError::Injection`] is returned.
pub fn run_syscall(tid: Pid) -> Result<()> {
    ptrace::syscall(tid, None).map_err(|e| {
        error!("thread {tid}: resuming into the syscall entry failed: {e}");
        DebuggerError::Injection(format!("syscall entry resume: {e}"))
    })?;
    let status = wait(tid, None)?;
    if !is_trap_stop(&status) {
        error!("thread {tid}: no trap at syscall entry: {status:?}");
        return Err(DebuggerError::Injection(format!(
            "expected a trap at syscall entry, got {status:?}"
        )));
    }

    ptrace::syscall(tid, None).map_err(|e| {
        error!("thread {tid}: resuming into the syscall exit failed: {e}");
        DebuggerError::Injection(format!("syscall exit resume: {e}"))
    })?;
    let status = wait(tid, None)?;
    if !is_trap_stop(&status) {
        error!("thread {tid}: no trap at syscall exit: {status:?}");
        return Err(DebuggerError::Injection(format!(
            "expected a trap at syscall exit, got {status:?}"
        )));
    }

    debug!("thread {tid}: injected syscall ran to completion");
    Ok(())
}

/// Reads a whole kernel register set into `value`.
///
/// `note` selects the set (`NT_PRSTATUS`, `NT_FPREGSET`,
/// `NT_ARM_HW_BREAK`); the kernel is always handed an I/O vector
/// describing the destination buffer.
pub(crate) fn get_regset<T>(tid: Pid, note: u32, value: &mut T) -> Result<()> {
    let mut iov = libc::iovec {
        iov_base: (value as *mut T).cast::<libc::c_void>(),
        iov_len: mem::size_of::<T>(),
    };
    Errno::clear();
    let ret = unsafe {
        libc::ptrace(
            libc::PTRACE_GETREGSET,
            tid.as_raw(),
            note as usize,
            std::ptr::addr_of_mut!(iov),
        )
    };
    trace!("PTRACE_GETREGSET(tid: {tid}, note: {note:#x}) -> {ret}");
    Errno::result(ret).map(drop).map_err(DebuggerError::Os)
}

/// Writes a whole kernel register set from `value`.
pub(crate) fn set_regset<T>(tid: Pid, note: u32, value: &T) -> Result<()> {
    let mut iov = libc::iovec {
        iov_base: (value as *const T).cast_mut().cast::<libc::c_void>(),
        iov_len: mem::size_of::<T>(),
    };
    Errno::clear();
    let ret = unsafe {
        libc::ptrace(
            libc::PTRACE_SETREGSET,
            tid.as_raw(),
            note as usize,
            std::ptr::addr_of_mut!(iov),
        )
    };
    trace!("PTRACE_SETREGSET(tid: {tid}, note: {note:#x}) -> {ret}");
    Errno::result(ret).map(drop).map_err(DebuggerError::Os)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_trap_stop_classification() {
        let tid = Pid::from_raw(1234);
        assert!(is_trap_stop(&WaitStatus::Stopped(tid, Signal::SIGTRAP)));
        assert!(is_trap_stop(&WaitStatus::PtraceSyscall(tid)));
        assert!(!is_trap_stop(&WaitStatus::Stopped(tid, Signal::SIGSTOP)));
        assert!(!is_trap_stop(&WaitStatus::Exited(tid, 0)));
    }
}
