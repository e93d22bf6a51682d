//! AArch64 ELF64 image parser used by the injector.
//!
//! Parses headers, program and section tables, the dynamic symbol table
//! and both relocation tables out of an owned byte buffer. Every access
//! is a bounds-checked read; virtual addresses found in the dynamic
//! segment are translated to file offsets through the loadable segments
//! rather than trusted as offsets.
//!
//! Statically linked images without a dynamic segment are accepted and
//! simply expose no symbols or relocations.

use std::fmt;
use std::path::Path;

use tracing::{debug, warn};

use crate::errors::{DebuggerError, Result};

// e_ident layout
const ELF_MAGIC: [u8; 4] = [0x7F, b'E', b'L', b'F'];
const EI_CLASS: usize = 4;
const EI_DATA: usize = 5;
const ELFCLASS64: u8 = 2;
const ELFDATA2LSB: u8 = 1;

const EM_AARCH64: u16 = 183;
const ET_EXEC: u16 = 2;
const ET_DYN: u16 = 3;

const EHDR_SIZE: usize = 64;
const PHDR_SIZE: usize = 56;
const SHDR_SIZE: usize = 64;
const SYM_SIZE: u64 = 24;
const RELA_SIZE: u64 = 24;

// program header types
pub const PT_LOAD: u32 = 1;
pub const PT_DYNAMIC: u32 = 2;

// segment flag bits
pub const PF_X: u32 = 0x1;
pub const PF_W: u32 = 0x2;
pub const PF_R: u32 = 0x4;

// dynamic tags
const DT_NULL: i64 = 0;
const DT_PLTRELSZ: i64 = 2;
const DT_STRTAB: i64 = 5;
const DT_SYMTAB: i64 = 6;
const DT_RELA: i64 = 7;
const DT_RELASZ: i64 = 8;
const DT_SYMENT: i64 = 11;
const DT_JMPREL: i64 = 23;

const SHN_UNDEF: u16 = 0;

const STT_OBJECT: u8 = 1;
const STT_FUNC: u8 = 2;

// AArch64 relocation types
pub const R_AARCH64_ABS64: u32 = 257;
pub const R_AARCH64_GLOB_DAT: u32 = 1025;
pub const R_AARCH64_JUMP_SLOT: u32 = 1026;
pub const R_AARCH64_RELATIVE: u32 = 1027;

/// Fixed-size header of the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElfHeader {
    pub kind: u16,
    pub machine: u16,
    pub entry: u64,
    pub phoff: u64,
    pub shoff: u64,
    pub phentsize: u16,
    pub phnum: u16,
    pub shentsize: u16,
    pub shnum: u16,
    pub shstrndx: u16,
}

/// One program header entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub kind: u32,
    pub flags: u32,
    pub offset: u64,
    pub vaddr: u64,
    pub file_size: u64,
    pub memory_size: u64,
    pub align: u64,
}

impl Segment {
    pub fn is_loadable(&self) -> bool {
        self.kind == PT_LOAD
    }

    pub fn is_readable(&self) -> bool {
        self.flags & PF_R != 0
    }

    pub fn is_writable(&self) -> bool {
        self.flags & PF_W != 0
    }

    pub fn is_executable(&self) -> bool {
        self.flags & PF_X != 0
    }
}

/// One section header entry, name already resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub name: String,
    pub kind: u32,
    pub addr: u64,
    pub offset: u64,
    pub size: u64,
    pub entsize: u64,
}

/// One dynamic symbol, name already resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElfSymbol {
    pub name: String,
    pub value: u64,
    pub size: u64,
    pub info: u8,
    pub shndx: u16,
}

impl ElfSymbol {
    pub fn is_function(&self) -> bool {
        self.info & 0xF == STT_FUNC
    }

    pub fn is_object(&self) -> bool {
        self.info & 0xF == STT_OBJECT
    }

    pub fn is_undefined(&self) -> bool {
        self.shndx == SHN_UNDEF
    }
}

/// One relocation entry out of `.rela.dyn` or `.rela.plt`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relocation {
    pub offset: u64,
    pub kind: u32,
    pub symbol_index: u32,
    pub symbol_name: String,
    pub addend: i64,
}

/// Parsed AArch64 ELF64 image.
pub struct ElfResolver {
    data: Vec<u8>,
    header: ElfHeader,
    segments: Vec<Segment>,
    sections: Vec<Section>,
    symbols: Vec<ElfSymbol>,
    relocations: Vec<Relocation>,
}

impl fmt::Debug for ElfResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ElfResolver")
            .field("size", &self.data.len())
            .field("entry", &self.header.entry)
            .field("segments", &self.segments.len())
            .field("sections", &self.sections.len())
            .field("symbols", &self.symbols.len())
            .field("relocations", &self.relocations.len())
            .finish()
    }
}

impl ElfResolver {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read(path.as_ref())?;
        Self::from_bytes(data)
    }

    pub fn from_bytes(data: Vec<u8>) -> Result<Self> {
        let header = parse_header(&data)?;
        let segments = parse_segments(&data, &header)?;
        let sections = parse_sections(&data, &header);

        let mut resolver = ElfResolver {
            data,
            header,
            segments,
            sections,
            symbols: Vec::new(),
            relocations: Vec::new(),
        };
        resolver.parse_dynamic()?;

        debug!(
            "parsed ELF: {} segment(s), {} section(s), {} symbol(s), {} relocation(s)",
            resolver.segments.len(),
            resolver.sections.len(),
            resolver.symbols.len(),
            resolver.relocations.len()
        );
        Ok(resolver)
    }

    pub fn header(&self) -> &ElfHeader {
        &self.header
    }

    pub fn entry_point(&self) -> u64 {
        self.header.entry
    }

    pub fn is_executable(&self) -> bool {
        self.header.kind == ET_EXEC
    }

    pub fn is_shared_library(&self) -> bool {
        self.header.kind == ET_DYN
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn loadable_segments(&self) -> Vec<&Segment> {
        self.segments.iter().filter(|s| s.is_loadable()).collect()
    }

    pub fn find_segment(&self, kind: u32) -> Option<&Segment> {
        self.segments.iter().find(|s| s.kind == kind)
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    pub fn find_section(&self, name: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.name == name)
    }

    pub fn symbols(&self) -> &[ElfSymbol] {
        &self.symbols
    }

    pub fn find_symbol(&self, name: &str) -> Option<&ElfSymbol> {
        self.symbols.iter().find(|s| s.name == name)
    }

    pub fn relocations(&self) -> &[Relocation] {
        &self.relocations
    }

    /// File bytes of a segment, clamped to the buffer.
    pub fn segment_data(&self, segment: &Segment) -> &[u8] {
        let start = (segment.offset as usize).min(self.data.len());
        let end = (segment.offset + segment.file_size).min(self.data.len() as u64) as usize;
        &self.data[start..end]
    }

    /// Translates a virtual address to a file offset by scanning the
    /// loadable segments.
    pub fn vaddr_to_offset(&self, vaddr: u64) -> Option<u64> {
        self.segments
            .iter()
            .filter(|s| s.is_loadable())
            .find(|s| vaddr >= s.vaddr && vaddr < s.vaddr + s.file_size)
            .map(|s| s.offset + (vaddr - s.vaddr))
    }

    fn parse_dynamic(&mut self) -> Result<()> {
        let Some(dynamic) = self.find_segment(PT_DYNAMIC).copied() else {
            debug!("no dynamic segment, accepting as a static image");
            return Ok(());
        };

        let mut strtab_vaddr = None;
        let mut symtab_vaddr = None;
        let mut syment = SYM_SIZE;
        let mut rela = None;
        let mut rela_size = 0u64;
        let mut jmprel = None;
        let mut plt_size = 0u64;

        let mut offset = dynamic.offset;
        let end = dynamic.offset + dynamic.file_size;
        while offset + 16 <= end && (offset as usize) + 16 <= self.data.len() {
            let tag = self.u64_at(offset)? as i64;
            let value = self.u64_at(offset + 8)?;
            offset += 16;

            match tag {
                DT_NULL => break,
                DT_STRTAB => strtab_vaddr = Some(value),
                DT_SYMTAB => symtab_vaddr = Some(value),
                DT_SYMENT if value >= SYM_SIZE => syment = value,
                DT_RELA => rela = Some(value),
                DT_RELASZ => rela_size = value,
                DT_JMPREL => jmprel = Some(value),
                DT_PLTRELSZ => plt_size = value,
                _ => {}
            }
        }

        let strtab = strtab_vaddr.and_then(|v| self.vaddr_to_offset(v));
        let symtab = symtab_vaddr.and_then(|v| self.vaddr_to_offset(v));
        if strtab.is_none() && strtab_vaddr.is_some() {
            warn!("dynamic string table lies outside the loadable segments");
        }

        if let (Some(symtab), Some(strtab)) = (symtab, strtab) {
            self.symbols = self.parse_symbols(symtab, strtab, syment);
        }

        let mut relocations = Vec::new();
        for (table_vaddr, table_size) in [(rela, rela_size), (jmprel, plt_size)] {
            let Some(table_vaddr) = table_vaddr else {
                continue;
            };
            let Some(table_off) = self.vaddr_to_offset(table_vaddr) else {
                warn!("relocation table at {table_vaddr:#x} lies outside the loadable segments");
                continue;
            };
            relocations.extend(self.parse_rela(table_off, table_size / RELA_SIZE, symtab, strtab));
        }
        self.relocations = relocations;

        Ok(())
    }

    /// Walks the dynamic symbol table with stride `syment`, starting
    /// after the reserved null entry, until a null entry or the end of
    /// the buffer. The string table is used as an upper bound when it
    /// follows the symbol table, which is the common layout.
    fn parse_symbols(&self, symtab: u64, strtab: u64, syment: u64) -> Vec<ElfSymbol> {
        let mut symbols = Vec::new();
        let limit = if strtab > symtab {
            strtab.min(self.data.len() as u64)
        } else {
            self.data.len() as u64
        };

        let mut offset = symtab + syment;
        while offset + SYM_SIZE <= limit {
            let Ok(name_off) = self.u32_at(offset) else {
                break;
            };
            if name_off == 0 {
                break;
            }
            let (Ok(info), Ok(shndx), Ok(value), Ok(size)) = (
                self.u8_at(offset + 4),
                self.u16_at(offset + 6),
                self.u64_at(offset + 8),
                self.u64_at(offset + 16),
            ) else {
                break;
            };
            symbols.push(ElfSymbol {
                name: self.cstr_at(strtab + name_off as u64),
                value,
                size,
                info,
                shndx,
            });
            offset += syment;
        }
        symbols
    }

    fn parse_rela(
        &self,
        table_off: u64,
        count: u64,
        symtab: Option<u64>,
        strtab: Option<u64>,
    ) -> Vec<Relocation> {
        let mut relocations = Vec::new();
        for index in 0..count {
            let offset = table_off + index * RELA_SIZE;
            let (Ok(place), Ok(info), Ok(addend)) = (
                self.u64_at(offset),
                self.u64_at(offset + 8),
                self.u64_at(offset + 16),
            ) else {
                warn!("relocation table truncated after {index} entries");
                break;
            };

            let kind = (info & 0xFFFF_FFFF) as u32;
            let symbol_index = (info >> 32) as u32;
            let symbol_name = match (symbol_index, symtab, strtab) {
                (0, _, _) | (_, None, _) | (_, _, None) => String::new(),
                (sym, Some(symtab), Some(strtab)) => {
                    let name_off = self
                        .u32_at(symtab + sym as u64 * SYM_SIZE)
                        .unwrap_or_default();
                    if name_off == 0 {
                        String::new()
                    } else {
                        self.cstr_at(strtab + name_off as u64)
                    }
                }
            };

            relocations.push(Relocation {
                offset: place,
                kind,
                symbol_index,
                symbol_name,
                addend: addend as i64,
            });
        }
        relocations
    }

    fn u8_at(&self, offset: u64) -> Result<u8> {
        self.data
            .get(offset as usize)
            .copied()
            .ok_or_else(|| DebuggerError::InvalidElf(format!("read past the end at {offset:#x}")))
    }

    fn u16_at(&self, offset: u64) -> Result<u16> {
        read_u16(&self.data, offset as usize)
    }

    fn u32_at(&self, offset: u64) -> Result<u32> {
        read_u32(&self.data, offset as usize)
    }

    fn u64_at(&self, offset: u64) -> Result<u64> {
        read_u64(&self.data, offset as usize)
    }

    /// NUL-terminated string at `offset`, clamped to the buffer.
    fn cstr_at(&self, offset: u64) -> String {
        let start = (offset as usize).min(self.data.len());
        let tail = &self.data[start..];
        let end = tail.iter().position(|b| *b == 0).unwrap_or(tail.len());
        String::from_utf8_lossy(&tail[..end]).into_owned()
    }
}

fn read_u16(data: &[u8], offset: usize) -> Result<u16> {
    data.get(offset..offset + 2)
        .map(|b| u16::from_le_bytes([b[0], b[1]]))
        .ok_or_else(|| DebuggerError::InvalidElf(format!("read past the end at {offset:#x}")))
}

fn read_u32(data: &[u8], offset: usize) -> Result<u32> {
    data.get(offset..offset + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or_else(|| DebuggerError::InvalidElf(format!("read past the end at {offset:#x}")))
}

fn read_u64(data: &[u8], offset: usize) -> Result<u64> {
    data.get(offset..offset + 8)
        .map(|b| u64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
        .ok_or_else(|| DebuggerError::InvalidElf(format!("read past the end at {offset:#x}")))
}

fn parse_header(data: &[u8]) -> Result<ElfHeader> {
    if data.len() < EHDR_SIZE {
        return Err(DebuggerError::InvalidElf(
            "buffer smaller than an ELF header".to_string(),
        ));
    }
    if data[..4] != ELF_MAGIC {
        return Err(DebuggerError::InvalidElf("bad magic".to_string()));
    }
    if data[EI_CLASS] != ELFCLASS64 {
        return Err(DebuggerError::InvalidElf(
            "only 64-bit images are supported".to_string(),
        ));
    }
    if data[EI_DATA] != ELFDATA2LSB {
        return Err(DebuggerError::InvalidElf(
            "only little-endian images are supported".to_string(),
        ));
    }

    let machine = read_u16(data, 18)?;
    if machine != EM_AARCH64 {
        return Err(DebuggerError::InvalidElf(format!(
            "only AArch64 images are supported (machine {machine})"
        )));
    }

    Ok(ElfHeader {
        kind: read_u16(data, 16)?,
        machine,
        entry: read_u64(data, 24)?,
        phoff: read_u64(data, 32)?,
        shoff: read_u64(data, 40)?,
        phentsize: read_u16(data, 54)?,
        phnum: read_u16(data, 56)?,
        shentsize: read_u16(data, 58)?,
        shnum: read_u16(data, 60)?,
        shstrndx: read_u16(data, 62)?,
    })
}

fn parse_segments(data: &[u8], header: &ElfHeader) -> Result<Vec<Segment>> {
    if header.phoff == 0 || header.phnum == 0 {
        return Err(DebuggerError::InvalidElf(
            "program header table is missing".to_string(),
        ));
    }
    let stride = if header.phentsize as usize >= PHDR_SIZE {
        header.phentsize as usize
    } else {
        PHDR_SIZE
    };

    let mut segments = Vec::with_capacity(header.phnum as usize);
    for index in 0..header.phnum as usize {
        let base = header.phoff as usize + index * stride;
        segments.push(Segment {
            kind: read_u32(data, base)?,
            flags: read_u32(data, base + 4)?,
            offset: read_u64(data, base + 8)?,
            vaddr: read_u64(data, base + 16)?,
            file_size: read_u64(data, base + 32)?,
            memory_size: read_u64(data, base + 40)?,
            align: read_u64(data, base + 48)?,
        });
    }
    Ok(segments)
}

fn parse_sections(data: &[u8], header: &ElfHeader) -> Vec<Section> {
    if header.shoff == 0 || header.shnum == 0 {
        warn!("section header table is missing");
        return Vec::new();
    }
    let stride = if header.shentsize as usize >= SHDR_SIZE {
        header.shentsize as usize
    } else {
        SHDR_SIZE
    };

    // locate the section-name string table first
    let shstrtab_off = if header.shstrndx != SHN_UNDEF && header.shstrndx < header.shnum {
        let base = header.shoff as usize + header.shstrndx as usize * stride;
        read_u64(data, base + 24).ok()
    } else {
        warn!("section-name string table is missing");
        None
    };

    let name_at = |name_off: u32| -> String {
        let Some(strtab) = shstrtab_off else {
            return String::new();
        };
        let start = (strtab as usize + name_off as usize).min(data.len());
        let tail = &data[start..];
        let end = tail.iter().position(|b| *b == 0).unwrap_or(tail.len());
        String::from_utf8_lossy(&tail[..end]).into_owned()
    };

    let mut sections = Vec::with_capacity(header.shnum as usize);
    for index in 0..header.shnum as usize {
        let base = header.shoff as usize + index * stride;
        let (Ok(name_off), Ok(kind), Ok(addr), Ok(offset), Ok(size), Ok(entsize)) = (
            read_u32(data, base),
            read_u32(data, base + 4),
            read_u64(data, base + 16),
            read_u64(data, base + 24),
            read_u64(data, base + 32),
            read_u64(data, base + 56),
        ) else {
            warn!("section header table truncated after {index} entries");
            break;
        };
        sections.push(Section {
            name: name_at(name_off),
            kind,
            addr,
            offset,
            size,
            entsize,
        });
    }
    sections
}

#[cfg(test)]
mod test {
    use super::*;

    fn put(buf: &mut [u8], offset: usize, bytes: &[u8]) {
        buf[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    /// Assembles a minimal shared object: one R+X PT_LOAD covering the
    /// whole file at vaddr 0 with a BSS tail, a PT_DYNAMIC with string,
    /// symbol and relocation tables, and one exported function `f`.
    fn sample_library() -> Vec<u8> {
        let mut image = vec![0u8; 0x200];

        // ELF header
        put(&mut image, 0, &ELF_MAGIC);
        image[EI_CLASS] = ELFCLASS64;
        image[EI_DATA] = ELFDATA2LSB;
        image[6] = 1; // EI_VERSION
        put(&mut image, 16, &ET_DYN.to_le_bytes());
        put(&mut image, 18, &EM_AARCH64.to_le_bytes());
        put(&mut image, 20, &1u32.to_le_bytes());
        put(&mut image, 24, &0x100u64.to_le_bytes()); // e_entry
        put(&mut image, 32, &0x40u64.to_le_bytes()); // e_phoff
        put(&mut image, 54, &(PHDR_SIZE as u16).to_le_bytes());
        put(&mut image, 56, &2u16.to_le_bytes()); // e_phnum

        // phdr[0]: PT_LOAD, R+X, file [0, 0x200) at vaddr 0, memsz 0x300
        let p = 0x40;
        put(&mut image, p, &PT_LOAD.to_le_bytes());
        put(&mut image, p + 4, &(PF_R | PF_X).to_le_bytes());
        put(&mut image, p + 8, &0u64.to_le_bytes());
        put(&mut image, p + 16, &0u64.to_le_bytes());
        put(&mut image, p + 32, &0x200u64.to_le_bytes());
        put(&mut image, p + 40, &0x300u64.to_le_bytes());
        put(&mut image, p + 48, &0x1000u64.to_le_bytes());

        // phdr[1]: PT_DYNAMIC at file/vaddr 0xF0
        let p = 0x40 + PHDR_SIZE;
        put(&mut image, p, &PT_DYNAMIC.to_le_bytes());
        put(&mut image, p + 4, &PF_R.to_le_bytes());
        put(&mut image, p + 8, &0xF0u64.to_le_bytes());
        put(&mut image, p + 16, &0xF0u64.to_le_bytes());
        put(&mut image, p + 32, &0x60u64.to_le_bytes());
        put(&mut image, p + 40, &0x60u64.to_le_bytes());

        // dynstr at 0xB0: "\0f\0"
        put(&mut image, 0xB1, b"f");

        // rela at 0xC0: RELATIVE(addend 0x100) and JUMP_SLOT(symbol 1)
        put(&mut image, 0xC0, &0x180u64.to_le_bytes());
        put(&mut image, 0xC8, &(R_AARCH64_RELATIVE as u64).to_le_bytes());
        put(&mut image, 0xD0, &0x100u64.to_le_bytes());
        put(&mut image, 0xD8, &0x188u64.to_le_bytes());
        put(
            &mut image,
            0xE0,
            &((1u64 << 32) | R_AARCH64_JUMP_SLOT as u64).to_le_bytes(),
        );

        // dynamic at 0xF0
        let mut d = 0xF0;
        for (tag, value) in [
            (DT_STRTAB, 0xB0u64),
            (DT_SYMTAB, 0x150),
            (DT_SYMENT, SYM_SIZE),
            (DT_RELA, 0xC0),
            (DT_RELASZ, 2 * RELA_SIZE),
            (DT_NULL, 0),
        ] {
            put(&mut image, d, &(tag as u64).to_le_bytes());
            put(&mut image, d + 8, &value.to_le_bytes());
            d += 16;
        }

        // dynsym at 0x150: null entry, then `f` at 0x100
        let s = 0x150 + SYM_SIZE as usize;
        put(&mut image, s, &1u32.to_le_bytes()); // st_name -> "f"
        image[s + 4] = 0x12; // GLOBAL FUNC
        put(&mut image, s + 6, &1u16.to_le_bytes()); // defined
        put(&mut image, s + 8, &0x100u64.to_le_bytes());
        put(&mut image, s + 16, &8u64.to_le_bytes());

        image
    }

    #[test]
    fn test_rejects_invalid_images() {
        assert!(ElfResolver::from_bytes(vec![0; 16]).is_err());

        let mut bad_magic = sample_library();
        bad_magic[0] = 0x7E;
        assert!(matches!(
            ElfResolver::from_bytes(bad_magic),
            Err(DebuggerError::InvalidElf(_))
        ));

        let mut wrong_class = sample_library();
        wrong_class[EI_CLASS] = 1;
        assert!(ElfResolver::from_bytes(wrong_class).is_err());

        let mut wrong_machine = sample_library();
        put(&mut wrong_machine, 18, &62u16.to_le_bytes()); // x86-64
        assert!(ElfResolver::from_bytes(wrong_machine).is_err());
    }

    #[test]
    fn test_parses_header_and_segments() {
        let elf = ElfResolver::from_bytes(sample_library()).unwrap();
        assert!(elf.is_shared_library());
        assert!(!elf.is_executable());
        assert_eq!(elf.entry_point(), 0x100);
        assert_eq!(elf.segments().len(), 2);

        let loadable = elf.loadable_segments();
        assert_eq!(loadable.len(), 1);
        assert_eq!(loadable[0].file_size, 0x200);
        assert_eq!(loadable[0].memory_size, 0x300);
        assert!(loadable[0].is_executable());
        assert!(!loadable[0].is_writable());
        assert!(elf.find_segment(PT_DYNAMIC).is_some());
    }

    #[test]
    fn test_parses_dynamic_symbols() {
        let elf = ElfResolver::from_bytes(sample_library()).unwrap();
        assert_eq!(elf.symbols().len(), 1);
        let f = elf.find_symbol("f").unwrap();
        assert_eq!(f.value, 0x100);
        assert_eq!(f.size, 8);
        assert!(f.is_function());
        assert!(!f.is_undefined());
        assert!(elf.find_symbol("g").is_none());
    }

    #[test]
    fn test_parses_relocations() {
        let elf = ElfResolver::from_bytes(sample_library()).unwrap();
        assert_eq!(elf.relocations().len(), 2);

        let relative = &elf.relocations()[0];
        assert_eq!(relative.kind, R_AARCH64_RELATIVE);
        assert_eq!(relative.offset, 0x180);
        assert_eq!(relative.addend, 0x100);
        assert!(relative.symbol_name.is_empty());

        let jump_slot = &elf.relocations()[1];
        assert_eq!(jump_slot.kind, R_AARCH64_JUMP_SLOT);
        assert_eq!(jump_slot.symbol_index, 1);
        assert_eq!(jump_slot.symbol_name, "f");
    }

    #[test]
    fn test_vaddr_to_offset_tracks_file_extent() {
        let elf = ElfResolver::from_bytes(sample_library()).unwrap();
        // identity mapping inside the file-backed part of the segment
        assert_eq!(elf.vaddr_to_offset(0x100), Some(0x100));
        assert_eq!(elf.vaddr_to_offset(0x1FF), Some(0x1FF));
        // the BSS tail has no file bytes
        assert_eq!(elf.vaddr_to_offset(0x250), None);
        assert_eq!(elf.vaddr_to_offset(0x1_0000), None);
    }

    #[test]
    fn test_static_image_without_dynamic_segment() {
        let mut image = sample_library();
        // turn the dynamic phdr into a non-dynamic one
        put(&mut image, 0x40 + PHDR_SIZE, &6u32.to_le_bytes()); // PT_PHDR
        let elf = ElfResolver::from_bytes(image).unwrap();
        assert!(elf.symbols().is_empty());
        assert!(elf.relocations().is_empty());
    }
}
