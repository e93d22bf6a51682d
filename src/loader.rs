//! Places a parsed ELF image into the target address space.
//!
//! The loader allocates one anonymous mapping per loadable segment via
//! the injected-`mmap` path, copies the file bytes in, zeroes the BSS
//! tail, applies the AArch64 dynamic relocations and returns the placed
//! image with its absolute symbol map. Any failure rolls back every
//! allocation made so far.
//!
//! Segment bytes and relocation patches are written through the ptrace
//! word path: text segments are mapped without write permission and
//! ptrace pokes are the only writes that go through.

use std::collections::HashMap;

use nix::sys::mman::ProtFlags;
use nix::unistd::Pid;
use serde::Serialize;
use tracing::{debug, error, warn};

use crate::elf::{
    ElfResolver, Segment, R_AARCH64_ABS64, R_AARCH64_GLOB_DAT, R_AARCH64_JUMP_SLOT,
    R_AARCH64_RELATIVE,
};
use crate::errors::{DebuggerError, Result};
use crate::memory::MemoryController;
use crate::{align_page_down, align_page_up, Addr};

/// Symbol-name to absolute-address map.
pub type SymbolTable = HashMap<String, Addr>;

/// One mapping created for a loadable segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PlacedRegion {
    pub start: Addr,
    pub size: u64,
}

/// Result of a successful injection.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LoadedImage {
    pub load_base: Addr,
    pub entry_point: Addr,
    pub regions: Vec<PlacedRegion>,
    pub symbols: SymbolTable,
}

/// Page-aligned virtual extent `[min_vaddr, max_vaddr_end)` of the
/// loadable segments.
fn image_extent(segments: &[&Segment]) -> Option<(u64, u64)> {
    let min_vaddr = segments.iter().map(|s| s.vaddr).min()?;
    let max_end = segments.iter().map(|s| s.vaddr + s.memory_size).max()?;
    Some((align_page_down(min_vaddr), align_page_up(max_end)))
}

fn segment_protection(segment: &Segment) -> ProtFlags {
    let mut prot = ProtFlags::PROT_READ;
    if segment.is_writable() {
        prot |= ProtFlags::PROT_WRITE;
    }
    if segment.is_executable() {
        prot |= ProtFlags::PROT_EXEC;
    }
    prot
}

/// ELF loader/injector over the target.
#[derive(Debug, Clone, Copy, Default)]
pub struct ElfLoader {
    memory: MemoryController,
}

impl ElfLoader {
    pub fn new(memory: MemoryController) -> Self {
        ElfLoader { memory }
    }

    /// Loads `resolver`'s image into the target at `preferred_base` (or
    /// the first vacant region when occupied or zero), applies its
    /// relocations against `external` symbols and returns the placed
    /// image.
    pub fn load(
        &self,
        pid: Pid,
        resolver: &ElfResolver,
        preferred_base: Addr,
        external: &SymbolTable,
    ) -> Result<LoadedImage> {
        let loadable = resolver.loadable_segments();
        let Some((min_vaddr, max_end)) = image_extent(&loadable) else {
            return Err(DebuggerError::InvalidElf(
                "image has no loadable segments".to_string(),
            ));
        };
        let total = max_end - min_vaddr;

        let base = self.choose_base(pid, preferred_base, min_vaddr, total)?;

        let mut image = LoadedImage {
            load_base: base,
            entry_point: base + resolver.entry_point(),
            regions: Vec::new(),
            symbols: SymbolTable::new(),
        };

        for segment in &loadable {
            if let Err(e) = self.place_segment(pid, resolver, segment, base, &mut image) {
                error!("placing segment at vaddr {:#x} failed: {e}", segment.vaddr);
                self.rollback(pid, &image);
                return Err(e);
            }
        }

        // the image's own defined symbols, resolved against the base;
        // relocation resolution consults this map after the externals
        for symbol in resolver.symbols() {
            if !symbol.is_undefined() && symbol.value != 0 {
                image.symbols.insert(symbol.name.clone(), base + symbol.value);
            }
        }

        if let Err(e) = self.apply_relocations(pid, resolver, base, &image.symbols, external) {
            error!("applying relocations failed: {e}");
            self.rollback(pid, &image);
            return Err(e);
        }

        debug!(
            "image loaded at {base}: {} region(s), {} symbol(s), entry {}",
            image.regions.len(),
            image.symbols.len(),
            image.entry_point
        );
        Ok(image)
    }

    /// Frees every region placed for `image`.
    pub fn unload(&self, pid: Pid, image: &LoadedImage) -> Result<()> {
        let mut last_error = None;
        for region in &image.regions {
            if let Err(e) = self.memory.free(pid, region.start, region.size) {
                warn!("freeing the region at {} failed: {e}", region.start);
                last_error = Some(e);
            }
        }
        match last_error {
            None => Ok(()),
            Some(e) => Err(e),
        }
    }

    fn rollback(&self, pid: Pid, image: &LoadedImage) {
        if let Err(e) = self.unload(pid, image) {
            warn!("rollback left mappings behind: {e}");
        }
    }

    fn choose_base(&self, pid: Pid, preferred: Addr, min_vaddr: u64, total: u64) -> Result<Addr> {
        if !preferred.is_null() {
            if self.memory.can_place(pid, preferred + min_vaddr, total)? {
                return Ok(preferred);
            }
            warn!("preferred base {preferred} is occupied, searching for a vacant region");
        }
        let gap = self.memory.find_vacant(pid, total)?;
        Ok(gap - min_vaddr)
    }

    fn place_segment(
        &self,
        pid: Pid,
        resolver: &ElfResolver,
        segment: &Segment,
        base: Addr,
        image: &mut LoadedImage,
    ) -> Result<()> {
        let target = base + segment.vaddr;
        let aligned_target = target.page_start();
        let page_offset = target - aligned_target;
        let alloc_size = align_page_up(page_offset + segment.memory_size);

        let placed = self
            .memory
            .allocate(pid, alloc_size, aligned_target, segment_protection(segment))?;
        image.regions.push(PlacedRegion {
            start: placed,
            size: alloc_size,
        });
        if placed != aligned_target {
            error!("kernel placed the mapping at {placed} instead of {aligned_target}");
            return Err(DebuggerError::NoSpace(alloc_size));
        }

        let data = resolver.segment_data(segment);
        if !data.is_empty() {
            self.memory.write_ptrace(pid, target, data)?;
        }

        // the BSS tail must read as zeroes no matter where the mapping
        // came from
        if segment.memory_size > segment.file_size {
            let zeros = [0u8; 4096];
            let mut at = target + segment.file_size;
            let mut remaining = segment.memory_size - segment.file_size;
            while remaining > 0 {
                let chunk = remaining.min(zeros.len() as u64) as usize;
                self.memory.write_ptrace(pid, at, &zeros[..chunk])?;
                at += chunk as u64;
                remaining -= chunk as u64;
            }
        }

        debug!(
            "segment vaddr {:#x} placed at {target} ({alloc_size:#x} bytes)",
            segment.vaddr
        );
        Ok(())
    }

    fn apply_relocations(
        &self,
        pid: Pid,
        resolver: &ElfResolver,
        base: Addr,
        internal: &SymbolTable,
        external: &SymbolTable,
    ) -> Result<()> {
        for relocation in resolver.relocations() {
            let place = base + relocation.offset;
            let value = match relocation.kind {
                R_AARCH64_ABS64 | R_AARCH64_GLOB_DAT | R_AARCH64_JUMP_SLOT => {
                    let resolved = resolved_symbol_address(
                        &relocation.symbol_name,
                        resolver,
                        base,
                        internal,
                        external,
                    );
                    resolved.wrapping_add(relocation.addend as u64)
                }
                R_AARCH64_RELATIVE => base.u64().wrapping_add(relocation.addend as u64),
                other => {
                    warn!("skipping unsupported relocation type {other} at {place}");
                    continue;
                }
            };
            self.memory.write_ptrace(pid, place, &value.to_le_bytes())?;
        }
        Ok(())
    }
}

/// Resolves a relocation symbol to an absolute target address.
///
/// Resolution order: the caller-provided external map, then the symbols
/// this image defines, then the resolver's dynamic table rebased onto
/// `base`. Unresolved symbols are tolerated and patch as address 0.
fn resolved_symbol_address(
    name: &str,
    resolver: &ElfResolver,
    base: Addr,
    internal: &SymbolTable,
    external: &SymbolTable,
) -> u64 {
    if name.is_empty() {
        warn!("relocation without a symbol name resolves to 0");
        return 0;
    }
    if let Some(addr) = external.get(name) {
        return addr.u64();
    }
    if let Some(addr) = internal.get(name) {
        return addr.u64();
    }
    if let Some(symbol) = resolver.find_symbol(name) {
        if symbol.value != 0 {
            return base.u64() + symbol.value;
        }
    }
    warn!("symbol {name} is unresolved, patching address 0");
    0
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::elf::{PF_R, PF_W, PT_LOAD};

    fn segment(vaddr: u64, file_size: u64, memory_size: u64) -> Segment {
        Segment {
            kind: PT_LOAD,
            flags: PF_R | PF_W,
            offset: 0,
            vaddr,
            file_size,
            memory_size,
            align: 0x1000,
        }
    }

    #[test]
    fn test_image_extent_is_page_aligned() {
        let a = segment(0x100, 0x80, 0x80);
        let b = segment(0x2100, 0x100, 0x1200);
        let segments = vec![&a, &b];
        let (min, max) = image_extent(&segments).unwrap();
        assert_eq!(min, 0);
        assert_eq!(max, align_page_up(0x2100 + 0x1200));
        assert!(image_extent(&[]).is_none());
    }

    #[test]
    fn test_segment_protection_always_readable() {
        let mut seg = segment(0, 0x100, 0x100);
        seg.flags = 0;
        assert_eq!(segment_protection(&seg), ProtFlags::PROT_READ);
        seg.flags = PF_R | PF_W;
        assert!(segment_protection(&seg).contains(ProtFlags::PROT_WRITE));
        seg.flags = crate::elf::PF_X;
        let prot = segment_protection(&seg);
        assert!(prot.contains(ProtFlags::PROT_READ));
        assert!(prot.contains(ProtFlags::PROT_EXEC));
    }

    #[test]
    fn test_loaded_image_serializes() {
        let image = LoadedImage {
            load_base: Addr::from(0x7000_0000u64),
            entry_point: Addr::from(0x7000_0100u64),
            regions: vec![PlacedRegion {
                start: Addr::from(0x7000_0000u64),
                size: 0x2000,
            }],
            symbols: SymbolTable::from([("f".to_string(), Addr::from(0x7000_0100u64))]),
        };
        let json = serde_json::to_value(&image).unwrap();
        assert_eq!(json["load_base"], 0x7000_0000u64);
        assert_eq!(json["regions"][0]["size"], 0x2000);
        assert_eq!(json["symbols"]["f"], 0x7000_0100u64);
    }
}
