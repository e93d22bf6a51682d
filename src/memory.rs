//! Memory plane of the traced process.
//!
//! Region enumeration parses `/proc/<pid>/maps` tolerantly and keeps the
//! permission strings verbatim. Bulk reads and writes go through the
//! vectorised cross-process syscalls with a word-sized ptrace fallback.
//! Allocation and release inside the target are realised by staging an
//! `mmap`/`munmap` in the tracee's registers and running the
//! syscall-injection protocol.
//!
//! Two write paths exist: [`MemoryController::write`] enforces the
//! region `w` permission, while the crate-internal ptrace path carries
//! code patches (breakpoints, injected images). Ptrace pokes write
//! through page protections, which text mappings require.

use std::fmt::{self, Display};
use std::fs;
use std::io::{IoSlice, IoSliceMut, Write};
use std::path::Path;

use nix::sys::mman::{MapFlags, ProtFlags};
use nix::sys::uio::{process_vm_readv, process_vm_writev, RemoteIoVec};
use nix::unistd::Pid;
use serde::Serialize;
use tracing::{debug, error, trace, warn};

use crate::consts::{MEM_CHUNK_SIZE, SYS_MMAP, SYS_MUNMAP, USER_SPACE_END};
use crate::errors::{DebuggerError, Result};
use crate::regs::RegisterController;
use crate::{align_page_down, align_page_up, tracer, Addr};

/// One mapping of the target address space, as listed in
/// `/proc/<pid>/maps`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MemoryRegion {
    pub start: Addr,
    pub end: Addr,
    pub size: u64,
    /// Permission flags exactly as the kernel printed them, e.g. `r-xp`.
    pub permissions: String,
    pub pathname: String,
}

impl MemoryRegion {
    pub fn is_readable(&self) -> bool {
        self.permissions.contains('r')
    }

    pub fn is_writable(&self) -> bool {
        self.permissions.contains('w')
    }

    pub fn is_executable(&self) -> bool {
        self.permissions.contains('x')
    }

    pub fn is_private(&self) -> bool {
        self.permissions.contains('p')
    }

    pub fn is_shared(&self) -> bool {
        self.permissions.contains('s')
    }

    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.start.u64() && addr < self.end.u64()
    }
}

impl Display for MemoryRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:016x}-{:016x} {} {}",
            self.start.u64(),
            self.end.u64(),
            self.permissions,
            self.pathname
        )
    }
}

/// Parses one line of `/proc/<pid>/maps`.
///
/// Malformed lines and zero-size regions yield `None` with a warning;
/// callers skip them.
pub fn parse_maps_line(line: &str) -> Option<MemoryRegion> {
    fn take_field(s: &str) -> (&str, &str) {
        let s = s.trim_start();
        match s.find(char::is_whitespace) {
            Some(i) => (&s[..i], &s[i..]),
            None => (s, ""),
        }
    }

    let (range, rest) = take_field(line);
    let (permissions, rest) = take_field(rest);
    // offset, device and inode are not part of the data model
    let (_offset, rest) = take_field(rest);
    let (_device, rest) = take_field(rest);
    let (_inode, rest) = take_field(rest);

    let Some((start_raw, end_raw)) = range.split_once('-') else {
        warn!("maps line without an address range: {line:?}");
        return None;
    };
    let (Ok(start), Ok(end)) = (
        u64::from_str_radix(start_raw, 16),
        u64::from_str_radix(end_raw, 16),
    ) else {
        warn!("maps line with non-hexadecimal addresses: {line:?}");
        return None;
    };
    if end <= start {
        warn!("skipping empty or inverted region: {line:?}");
        return None;
    }
    if permissions.is_empty() {
        warn!("maps line without permission flags: {line:?}");
        return None;
    }

    let pathname = rest.trim();
    let pathname = if pathname.is_empty() {
        "[anonymous]".to_string()
    } else {
        pathname.to_string()
    };

    Some(MemoryRegion {
        start: Addr::from(start),
        end: Addr::from(end),
        size: end - start,
        permissions: permissions.to_string(),
        pathname,
    })
}

/// Finds every offset at which `pattern` matches inside `chunk`,
/// overlapping matches included.
fn find_in_chunk(chunk: &[u8], pattern: &[u8]) -> Vec<usize> {
    let mut hits = Vec::new();
    if pattern.is_empty() || chunk.len() < pattern.len() {
        return hits;
    }
    for offset in 0..=chunk.len() - pattern.len() {
        if &chunk[offset..offset + pattern.len()] == pattern {
            hits.push(offset);
        }
    }
    hits
}

/// First gap of at least `size` bytes between the sorted `regions`, or
/// between the last region and the user-space ceiling.
fn first_gap(regions: &[MemoryRegion], size: u64) -> Option<u64> {
    let mut prev_end = regions.first()?.end.u64();
    for region in &regions[1..] {
        let start = region.start.u64();
        if start > prev_end && start - prev_end >= size {
            return Some(prev_end);
        }
        prev_end = prev_end.max(region.end.u64());
    }
    if USER_SPACE_END > prev_end && USER_SPACE_END - prev_end >= size {
        return Some(prev_end);
    }
    None
}

fn overlaps_any(regions: &[MemoryRegion], start: u64, end: u64) -> bool {
    regions
        .iter()
        .any(|region| start < region.end.u64() && region.start.u64() < end)
}

/// Memory I/O plane over the traced process.
#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryController {
    registers: RegisterController,
}

impl MemoryController {
    pub fn new() -> Self {
        MemoryController {
            registers: RegisterController::new(),
        }
    }

    /// Enumerates the mappings of `pid`, ascending by start address.
    pub fn regions(&self, pid: Pid) -> Result<Vec<MemoryRegion>> {
        let maps = fs::read_to_string(crate::procfs::proc_path(pid, "maps"))?;
        let mut regions: Vec<MemoryRegion> = maps
            .lines()
            .filter(|line| !line.is_empty())
            .filter_map(parse_maps_line)
            .collect();
        regions.sort_by_key(|region| region.start);
        Ok(regions)
    }

    /// Verifies that `[addr, addr + len)` is fully covered by mappings
    /// that are readable (and writable when `need_write`).
    fn check_range(&self, pid: Pid, addr: Addr, len: usize, need_write: bool) -> Result<()> {
        if len == 0 {
            return Err(DebuggerError::InvalidRange);
        }
        let end = addr
            .u64()
            .checked_add(len as u64)
            .ok_or(DebuggerError::InvalidRange)?;

        let regions = self.regions(pid)?;
        let mut current = addr.u64();
        for region in &regions {
            if region.end.u64() <= current {
                continue;
            }
            if region.start.u64() > current {
                break;
            }
            if !region.is_readable() {
                return Err(DebuggerError::PermissionDenied {
                    start: region.start,
                    end: region.end,
                    needed: 'r',
                });
            }
            if need_write && !region.is_writable() {
                return Err(DebuggerError::PermissionDenied {
                    start: region.start,
                    end: region.end,
                    needed: 'w',
                });
            }
            current = region.end.u64();
            if current >= end {
                return Ok(());
            }
        }
        Err(DebuggerError::NotMapped(Addr::from(current)))
    }

    fn read_vm(&self, pid: Pid, addr: Addr, buf: &mut [u8]) -> Result<usize> {
        let len = buf.len();
        let mut local = [IoSliceMut::new(buf)];
        let remote = [RemoteIoVec {
            base: addr.usize(),
            len,
        }];
        Ok(process_vm_readv(pid, &mut local, &remote)?)
    }

    fn write_vm(&self, pid: Pid, addr: Addr, buf: &[u8]) -> Result<usize> {
        let local = [IoSlice::new(buf)];
        let remote = [RemoteIoVec {
            base: addr.usize(),
            len: buf.len(),
        }];
        Ok(process_vm_writev(pid, &local, &remote)?)
    }

    /// Word-sized fallback read. Bypasses page protections.
    pub(crate) fn read_ptrace(&self, pid: Pid, addr: Addr, buf: &mut [u8]) -> Result<()> {
        let len = buf.len();
        let mut done = 0usize;
        while done < len {
            let word = tracer::peek(pid, addr + done).map_err(|e| {
                error!("peek at {} failed: {e}", addr + done);
                DebuggerError::MemoryRead { addr, len }
            })?;
            let bytes = word.to_ne_bytes();
            let take = bytes.len().min(len - done);
            buf[done..done + take].copy_from_slice(&bytes[..take]);
            done += take;
        }
        Ok(())
    }

    /// Word-sized fallback write. Bypasses page protections; sub-word
    /// tails are peek-merged before the poke.
    pub(crate) fn write_ptrace(&self, pid: Pid, addr: Addr, buf: &[u8]) -> Result<()> {
        let len = buf.len();
        let word_size = std::mem::size_of::<crate::Word>();
        let mut done = 0usize;
        while done < len {
            let current = addr + done;
            let remaining = len - done;
            let word = if remaining >= word_size {
                let mut bytes = [0u8; 8];
                bytes.copy_from_slice(&buf[done..done + word_size]);
                crate::Word::from_ne_bytes(bytes)
            } else {
                let original = tracer::peek(pid, current).map_err(|e| {
                    error!("peek-merge at {current} failed: {e}");
                    DebuggerError::MemoryWrite { addr, len }
                })?;
                let mut bytes = original.to_ne_bytes();
                bytes[..remaining].copy_from_slice(&buf[done..]);
                crate::Word::from_ne_bytes(bytes)
            };
            tracer::poke(pid, current, word).map_err(|e| {
                error!("poke at {current} failed: {e}");
                DebuggerError::MemoryWrite { addr, len }
            })?;
            done += remaining.min(word_size);
        }
        Ok(())
    }

    /// Reads `buf.len()` bytes of target memory at `addr`.
    ///
    /// The full range must be mapped readable. One vectorised syscall is
    /// attempted first; on partial success or failure the transfer falls
    /// back to word-sized ptrace reads.
    pub fn read(&self, pid: Pid, addr: Addr, buf: &mut [u8]) -> Result<()> {
        self.check_range(pid, addr, buf.len(), false)?;

        match self.read_vm(pid, addr, buf) {
            Ok(n) if n == buf.len() => Ok(()),
            Ok(n) => {
                warn!("short cross-process read ({n}/{}), using ptrace", buf.len());
                self.read_ptrace(pid, addr, buf)
            }
            Err(e) => {
                warn!("process_vm_readv failed ({e}), using ptrace");
                self.read_ptrace(pid, addr, buf)
            }
        }
    }

    /// Writes `buf` into target memory at `addr`.
    ///
    /// The full range must be mapped writable. Falls back to ptrace pokes
    /// like [`MemoryController::read`].
    pub fn write(&self, pid: Pid, addr: Addr, buf: &[u8]) -> Result<()> {
        self.check_range(pid, addr, buf.len(), true)?;

        match self.write_vm(pid, addr, buf) {
            Ok(n) if n == buf.len() => Ok(()),
            Ok(n) => {
                warn!("short cross-process write ({n}/{}), using ptrace", buf.len());
                self.write_ptrace(pid, addr, buf)
            }
            Err(e) => {
                warn!("process_vm_writev failed ({e}), using ptrace");
                self.write_ptrace(pid, addr, buf)
            }
        }
    }

    /// Scans every readable region of the target for `pattern`.
    ///
    /// Regions are read in 4 MiB windows that overlap by
    /// `pattern.len() - 1` bytes, so matches straddling a window boundary
    /// are found exactly once. Unreadable windows are skipped with a
    /// warning. Overlapping matches are all reported.
    pub fn search(&self, pid: Pid, pattern: &[u8]) -> Result<Vec<Addr>> {
        if pattern.is_empty() {
            return Err(DebuggerError::InvalidArgument(
                "search pattern must not be empty".to_string(),
            ));
        }

        let mut results = Vec::new();
        let mut buf = vec![0u8; MEM_CHUNK_SIZE];
        let overlap = pattern.len() as u64 - 1;

        for region in self.regions(pid)? {
            if !region.is_readable() || region.size < pattern.len() as u64 {
                continue;
            }

            let region_end = region.end.u64();
            let mut pos = region.start.u64();
            while pos < region_end {
                let window = (MEM_CHUNK_SIZE as u64).min(region_end - pos);
                if window < pattern.len() as u64 {
                    break;
                }
                buf.resize(window as usize, 0);
                if let Err(e) = self.read(pid, Addr::from(pos), &mut buf[..window as usize]) {
                    warn!(
                        "search: skipping {:#x}-{:#x} of {}: {e}",
                        pos,
                        pos + window,
                        region.pathname
                    );
                    pos += window;
                    continue;
                }
                for offset in find_in_chunk(&buf[..window as usize], pattern) {
                    results.push(Addr::from(pos + offset as u64));
                }
                if pos + window >= region_end {
                    break;
                }
                pos += window - overlap;
            }
        }

        debug!("search found {} match(es)", results.len());
        Ok(results)
    }

    /// Dumps `[lo, hi)` of target memory into the file at `path`,
    /// truncating prior content.
    ///
    /// The full range must be readable. On failure the transfer aborts
    /// and a partial file is left behind for the caller to clean up.
    pub fn dump(&self, pid: Pid, lo: Addr, hi: Addr, path: impl AsRef<Path>) -> Result<u64> {
        if hi <= lo {
            return Err(DebuggerError::InvalidRange);
        }
        let total = hi - lo;
        self.check_range(pid, lo, total as usize, false)?;

        let mut file = fs::File::create(path.as_ref())?;
        let mut buf = vec![0u8; MEM_CHUNK_SIZE];
        let mut written = 0u64;
        while written < total {
            let chunk = (MEM_CHUNK_SIZE as u64).min(total - written) as usize;
            self.read(pid, lo + written, &mut buf[..chunk])?;
            file.write_all(&buf[..chunk])?;
            written += chunk as u64;
            debug!("dump progress: {written}/{total} bytes");
        }
        file.flush()?;
        debug!(
            "dumped {total:#x} bytes from {lo} to {}",
            path.as_ref().display()
        );
        Ok(total)
    }

    /// Allocates memory inside the target by injecting an `mmap`.
    ///
    /// The tracee's registers are snapshotted, overwritten with the
    /// syscall arguments, driven through syscall entry and exit, and
    /// restored regardless of the outcome. A kernel return value in
    /// `[-4095, -1]` is reported as the corresponding errno.
    pub fn allocate(&self, pid: Pid, size: u64, hint: Addr, prot: ProtFlags) -> Result<Addr> {
        if size == 0 {
            return Err(DebuggerError::InvalidArgument(
                "allocation size must not be 0".to_string(),
            ));
        }
        let size = align_page_up(size);

        let saved = self.registers.get_all_gpr(pid)?;
        let mut staged = saved;
        staged.regs[8] = SYS_MMAP;
        staged.regs[0] = hint.u64();
        staged.regs[1] = size;
        staged.regs[2] = prot.bits() as u64;
        staged.regs[3] = (MapFlags::MAP_PRIVATE | MapFlags::MAP_ANONYMOUS).bits() as u64;
        staged.regs[4] = u64::MAX; // fd -1, anonymous mapping
        staged.regs[5] = 0;

        let result = self.inject_staged_syscall(pid, &staged, &saved)?;

        let signed = result as i64;
        if (-4095..0).contains(&signed) {
            let errno = (-signed) as i32;
            error!("process {pid}: injected mmap of {size:#x} bytes failed with errno {errno}");
            return Err(DebuggerError::InjectedSyscall(errno));
        }

        debug!("process {pid}: allocated {size:#x} bytes at {result:#x}");
        Ok(Addr::from(result))
    }

    /// Releases target memory via an injected `munmap`.
    pub fn free(&self, pid: Pid, addr: Addr, size: u64) -> Result<()> {
        if addr.is_null() {
            return Err(DebuggerError::InvalidArgument(
                "cannot free the null address".to_string(),
            ));
        }
        if size == 0 {
            return Err(DebuggerError::InvalidArgument(
                "free size must not be 0".to_string(),
            ));
        }
        let size = align_page_up(size);
        let addr = Addr::from(align_page_down(addr.u64()));

        let saved = self.registers.get_all_gpr(pid)?;
        let mut staged = saved;
        staged.regs[8] = SYS_MUNMAP;
        staged.regs[0] = addr.u64();
        staged.regs[1] = size;

        let result = self.inject_staged_syscall(pid, &staged, &saved)?;

        let signed = result as i64;
        if signed != 0 {
            let errno = (-signed) as i32;
            error!("process {pid}: injected munmap at {addr} failed with errno {errno}");
            return Err(DebuggerError::InjectedSyscall(errno));
        }

        debug!("process {pid}: freed {size:#x} bytes at {addr}");
        Ok(())
    }

    /// Runs `staged` through the syscall-injection protocol and returns
    /// the value left in X0. `saved` is written back no matter how far
    /// the protocol got.
    fn inject_staged_syscall(
        &self,
        pid: Pid,
        staged: &crate::regs::UserPtRegs,
        saved: &crate::regs::UserPtRegs,
    ) -> Result<u64> {
        if let Err(e) = self.registers.set_all_gpr(pid, staged) {
            let _ = self.registers.set_all_gpr(pid, saved);
            return Err(e);
        }
        if let Err(e) = tracer::run_syscall(pid) {
            let _ = self.registers.set_all_gpr(pid, saved);
            return Err(e);
        }
        let after = match self.registers.get_all_gpr(pid) {
            Ok(regs) => regs,
            Err(e) => {
                let _ = self.registers.set_all_gpr(pid, saved);
                return Err(e);
            }
        };
        self.registers.set_all_gpr(pid, saved)?;
        Ok(after.regs[0])
    }

    /// First vacant stretch of at least `size` bytes in the target
    /// address space, never below the lowest existing mapping.
    pub fn find_vacant(&self, pid: Pid, size: u64) -> Result<Addr> {
        if size == 0 {
            return Err(DebuggerError::InvalidArgument(
                "vacant-region size must not be 0".to_string(),
            ));
        }
        let size = align_page_up(size);
        let regions = self.regions(pid)?;
        match first_gap(&regions, size) {
            Some(start) => {
                trace!("vacant region of {size:#x} bytes at {start:#x}");
                Ok(Addr::from(start))
            }
            None => Err(DebuggerError::NoSpace(size)),
        }
    }

    /// True iff `[addr, addr + ceil_page(size))` overlaps no existing
    /// mapping.
    pub fn can_place(&self, pid: Pid, addr: Addr, size: u64) -> Result<bool> {
        if addr.is_null() || size == 0 {
            return Err(DebuggerError::InvalidArgument(format!(
                "cannot place {size} bytes at {addr}"
            )));
        }
        let size = align_page_up(size);
        let Some(end) = addr.u64().checked_add(size) else {
            return Ok(false);
        };
        let regions = self.regions(pid)?;
        Ok(!overlaps_any(&regions, addr.u64(), end))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use nix::unistd::getpid;

    fn region(start: u64, end: u64, perms: &str) -> MemoryRegion {
        MemoryRegion {
            start: Addr::from(start),
            end: Addr::from(end),
            size: end - start,
            permissions: perms.to_string(),
            pathname: "[anonymous]".to_string(),
        }
    }

    #[test]
    fn test_parse_maps_line() {
        let line = "7f5c1a2b3000-7f5c1a2d4000 r-xp 00000000 fd:01 393228   /usr/lib/libc.so.6";
        let region = parse_maps_line(line).unwrap();
        assert_eq!(region.start.u64(), 0x7f5c_1a2b_3000);
        assert_eq!(region.end.u64(), 0x7f5c_1a2d_4000);
        assert_eq!(region.size, 0x21000);
        assert_eq!(region.permissions, "r-xp");
        assert_eq!(region.pathname, "/usr/lib/libc.so.6");
        assert!(region.is_readable());
        assert!(!region.is_writable());
        assert!(region.is_executable());
        assert!(region.is_private());
    }

    #[test]
    fn test_parse_maps_line_anonymous_and_stack() {
        let anon = parse_maps_line("1000-2000 rw-p 00000000 00:00 0").unwrap();
        assert_eq!(anon.pathname, "[anonymous]");
        let stack = parse_maps_line("aaa000-aab000 rw-p 00000000 00:00 0    [stack]").unwrap();
        assert_eq!(stack.pathname, "[stack]");
    }

    #[test]
    fn test_parse_maps_line_rejects_garbage() {
        assert!(parse_maps_line("not a maps line").is_none());
        assert!(parse_maps_line("1000x2000 rw-p 0 0 0").is_none());
        assert!(parse_maps_line("zzzz-aaaa rw-p 0 0 0").is_none());
        // zero-size region is dropped
        assert!(parse_maps_line("1000-1000 rw-p 0 0 0").is_none());
        // inverted range is dropped
        assert!(parse_maps_line("2000-1000 rw-p 0 0 0").is_none());
    }

    #[test]
    fn test_own_regions_are_sorted_and_disjoint() {
        let memory = MemoryController::new();
        let regions = memory.regions(getpid()).unwrap();
        assert!(!regions.is_empty());
        for pair in regions.windows(2) {
            assert!(pair[0].start < pair[1].start);
            assert!(pair[0].end <= pair[1].start);
        }
    }

    #[test]
    fn test_read_own_memory() {
        let memory = MemoryController::new();
        let secret = *b"spyglass-read-probe";
        let mut buf = [0u8; 19];
        memory
            .read(getpid(), Addr::from(secret.as_ptr() as usize), &mut buf)
            .unwrap();
        assert_eq!(buf, secret);
    }

    #[test]
    fn test_zero_length_read_is_invalid_range() {
        let memory = MemoryController::new();
        let mut empty = [0u8; 0];
        let err = memory
            .read(getpid(), Addr::from(0x1000u64), &mut empty)
            .unwrap_err();
        assert!(matches!(err, DebuggerError::InvalidRange));
    }

    #[test]
    fn test_find_in_chunk_reports_overlaps() {
        let hits = find_in_chunk(b"aaaa", b"aa");
        assert_eq!(hits, vec![0, 1, 2]);
        let hits = find_in_chunk(b"xyxyxy", b"xyx");
        assert_eq!(hits, vec![0, 2]);
        assert!(find_in_chunk(b"a", b"aa").is_empty());
    }

    #[test]
    fn test_first_gap_between_regions() {
        let regions = vec![
            region(0x1000, 0x2000, "rw-p"),
            region(0x2000, 0x3000, "rw-p"),
            region(0x10000, 0x11000, "rw-p"),
        ];
        // the only interior gap is [0x3000, 0x10000)
        assert_eq!(first_gap(&regions, 0x1000), Some(0x3000));
        assert_eq!(first_gap(&regions, 0xd000), Some(0x3000));
        // too large for the interior gap: falls through to the tail
        assert_eq!(first_gap(&regions, 0xe000), Some(0x11000));
    }

    #[test]
    fn test_first_gap_never_places_below_lowest_mapping() {
        let regions = vec![region(0x100000, 0x101000, "rw-p")];
        let gap = first_gap(&regions, 0x1000).unwrap();
        assert!(gap >= 0x101000);
    }

    #[test]
    fn test_overlap_detection() {
        let regions = vec![region(0x2000, 0x3000, "rw-p")];
        assert!(overlaps_any(&regions, 0x2800, 0x2900));
        assert!(overlaps_any(&regions, 0x1000, 0x2001));
        assert!(overlaps_any(&regions, 0x2fff, 0x4000));
        assert!(!overlaps_any(&regions, 0x1000, 0x2000));
        assert!(!overlaps_any(&regions, 0x3000, 0x4000));
    }
}
