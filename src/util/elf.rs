use crate::{err::Error, memory::mmu::VirtAddr};

type Elf32Half = u16;
type Elf32Word = u32;
type Elf32Addr = u32;
type Elf32Off = u32;

pub const EI_NIDENT: usize = 16;
pub const ELFMAG: [u8; 4] = [0x7f, b'E', b'L', b'F'];
pub const EHDR_SIZE: usize = 52;
pub const PHDR_SIZE: usize = 32;

/* Legal values for p_type (segment type).  */

pub const PT_NULL: u32 = 0; /* Program header table entry unused */
pub const PT_LOAD: u32 = 1; /* Loadable program segment */

/* Legal values for p_flags (segment flags).  */

pub const PF_X: u32 = 1 << 0; /* Segment is executable */
pub const PF_W: u32 = 1 << 1; /* Segment is writable */
pub const PF_R: u32 = 1 << 2; /* Segment is readable */

#[derive(Clone, Copy, Debug)]
pub struct Elf32Ehdr {
    pub e_ident: [u8; EI_NIDENT],
    pub e_type: Elf32Half,
    pub e_machine: Elf32Half,
    pub e_version: Elf32Word,
    pub e_entry: Elf32Addr,
    pub e_phoff: Elf32Off,
    pub e_shoff: Elf32Off,
    pub e_flags: Elf32Word,
    pub e_ehsize: Elf32Half,
    pub e_phentsize: Elf32Half,
    pub e_phnum: Elf32Half,
    pub e_shentsize: Elf32Half,
    pub e_shnum: Elf32Half,
    pub e_shstrndx: Elf32Half,
}

#[derive(Clone, Copy, Debug)]
pub struct Elf32Phdr {
    pub p_type: Elf32Word,
    pub p_offset: Elf32Off,
    pub p_vaddr: Elf32Addr,
    pub p_paddr: Elf32Addr,
    pub p_filesz: Elf32Word,
    pub p_memsz: Elf32Word,
    pub p_flags: Elf32Word,
    pub p_align: Elf32Word,
}

pub struct PhdrIterator<'a> {
    ehdr: &'a Elf32Ehdr,
    binary: &'a [u8],
    ind: usize,
}

#[inline]
fn half(b: &[u8], off: usize) -> u16 {
    u16::from_le_bytes([b[off], b[off + 1]])
}

#[inline]
fn word(b: &[u8], off: usize) -> u32 {
    u32::from_le_bytes([b[off], b[off + 1], b[off + 2], b[off + 3]])
}

/// parse the ELF header, `None` if `binary` is not an ELF image.
pub fn elf_from(binary: &[u8]) -> Option<Elf32Ehdr> {
    if binary.len() < EHDR_SIZE || binary[..4] != ELFMAG {
        return None;
    }
    let mut e_ident = [0u8; EI_NIDENT];
    e_ident.copy_from_slice(&binary[..EI_NIDENT]);
    Some(Elf32Ehdr {
        e_ident,
        e_type: half(binary, 16),
        e_machine: half(binary, 18),
        e_version: word(binary, 20),
        e_entry: word(binary, 24),
        e_phoff: word(binary, 28),
        e_shoff: word(binary, 32),
        e_flags: word(binary, 36),
        e_ehsize: half(binary, 40),
        e_phentsize: half(binary, 42),
        e_phnum: half(binary, 44),
        e_shentsize: half(binary, 46),
        e_shnum: half(binary, 48),
        e_shstrndx: half(binary, 50),
    })
}

impl Elf32Ehdr {
    pub fn phdr_iter<'a>(&'a self, binary: &'a [u8]) -> PhdrIterator<'a> {
        PhdrIterator {
            ehdr: self,
            binary,
            ind: 0,
        }
    }
}

impl<'a> Iterator for PhdrIterator<'a> {
    type Item = Result<Elf32Phdr, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.ind >= self.ehdr.e_phnum as usize {
            return None;
        }
        let off = self.ehdr.e_phoff as usize + self.ind * self.ehdr.e_phentsize as usize;
        self.ind += 1;
        if off + PHDR_SIZE > self.binary.len() {
            return Some(Err(Error::Inval));
        }
        let b = self.binary;
        Some(Ok(Elf32Phdr {
            p_type: word(b, off),
            p_offset: word(b, off + 4),
            p_vaddr: word(b, off + 8),
            p_paddr: word(b, off + 12),
            p_filesz: word(b, off + 16),
            p_memsz: word(b, off + 20),
            p_flags: word(b, off + 24),
            p_align: word(b, off + 28),
        }))
    }
}

/// Walk every `PT_LOAD` segment of `binary`, handing `map_seg` the
/// segment's virtual address, its in-memory size and its file bytes.
/// Returns the entry point.
pub fn load_elf<F>(binary: &[u8], mut map_seg: F) -> Result<VirtAddr, Error>
where
    F: FnMut(VirtAddr, usize, &[u8]) -> Result<(), Error>,
{
    let ehdr = elf_from(binary).ok_or(Error::Inval)?;
    for phdr in ehdr.phdr_iter(binary) {
        let phdr = phdr?;
        if phdr.p_type != PT_LOAD {
            continue;
        }
        let start = phdr.p_offset as usize;
        let end = start + phdr.p_filesz as usize;
        if end > binary.len() || phdr.p_filesz > phdr.p_memsz {
            return Err(Error::Inval);
        }
        map_seg(
            VirtAddr::new(phdr.p_vaddr as usize),
            phdr.p_memsz as usize,
            &binary[start..end],
        )?;
    }
    Ok(VirtAddr::new(ehdr.e_entry as usize))
}

/// Assemble a minimal little-endian ELF32 executable with one `PT_LOAD`
/// header per `(vaddr, bytes, memsz)` segment.
#[cfg(test)]
pub fn build_image(entry: u32, segs: &[(u32, &[u8], u32)]) -> alloc::vec::Vec<u8> {
    use alloc::vec::Vec;

    let mut out = Vec::new();
    let phoff = EHDR_SIZE;
    let mut data_off = phoff + segs.len() * PHDR_SIZE;

    out.extend_from_slice(&ELFMAG);
    out.extend_from_slice(&[1, 1, 1]);
    out.resize(EI_NIDENT, 0);
    out.extend_from_slice(&2u16.to_le_bytes()); // ET_EXEC
    out.extend_from_slice(&8u16.to_le_bytes()); // EM_MIPS
    out.extend_from_slice(&1u32.to_le_bytes());
    out.extend_from_slice(&entry.to_le_bytes());
    out.extend_from_slice(&(phoff as u32).to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&(EHDR_SIZE as u16).to_le_bytes());
    out.extend_from_slice(&(PHDR_SIZE as u16).to_le_bytes());
    out.extend_from_slice(&(segs.len() as u16).to_le_bytes());
    out.extend_from_slice(&[0; 6]);

    for (vaddr, bytes, memsz) in segs {
        for v in [PT_LOAD, data_off as u32, *vaddr, *vaddr, bytes.len() as u32, *memsz, PF_R | PF_W, 4096] {
            out.extend_from_slice(&v.to_le_bytes());
        }
        data_off += bytes.len();
    }
    for (_, bytes, _) in segs {
        out.extend_from_slice(bytes);
    }
    out
}
