//! Static 32-bit little-endian i386 executables.

use elf::ElfBytes;
use elf::abi::{EM_386, ET_EXEC, PF_W, PF_X, PT_LOAD};
use elf::endian::LittleEndian;
use elf::segment::ProgramHeader;
use mm::{KERNEL_SPLIT, PAGE_SIZE, Protection, Region, Sharing, VirtualAddress};

use super::binfmt::{BinaryFormat, BinaryRequest, LoadOutcome, LoadTarget};
use crate::error::{KernelError, KernelResult};

const MAGIC: &[u8; 4] = b"\x7fELF";
const IDENT_CLASS: usize = 4;
const IDENT_DATA: usize = 5;
const IDENT_VERSION: usize = 6;
const CLASS_32: u8 = 1;
const DATA_LITTLE_ENDIAN: u8 = 1;
const VERSION_CURRENT: u8 = 1;

pub struct ElfFormat;

impl BinaryFormat for ElfFormat {
    fn name(&self) -> &'static str {
        "elf"
    }

    fn load(
        &self,
        request: &BinaryRequest<'_>,
        target: &mut LoadTarget<'_>,
    ) -> KernelResult<LoadOutcome> {
        let image = request.image;
        if !image.starts_with(MAGIC) {
            return Ok(LoadOutcome::NotThisFormat);
        }
        let ident = |index: usize| image.get(index).copied();
        if ident(IDENT_CLASS) != Some(CLASS_32) || ident(IDENT_DATA) != Some(DATA_LITTLE_ENDIAN) {
            return Err(KernelError::NotSupported);
        }
        if ident(IDENT_VERSION) != Some(VERSION_CURRENT) {
            return Err(KernelError::NotSupported);
        }

        let file = ElfBytes::<LittleEndian>::minimal_parse(image).map_err(|error| {
            log::debug!("{}: malformed ELF: {error}", request.path);
            KernelError::InvalidFormat
        })?;
        let header = &file.ehdr;
        if header.e_machine != EM_386 {
            return Err(KernelError::NotSupported);
        }
        if header.e_type != ET_EXEC {
            return Err(KernelError::InvalidArgument);
        }
        if header.version != u32::from(VERSION_CURRENT) {
            return Err(KernelError::NotSupported);
        }

        let segments = file.segments().ok_or(KernelError::InvalidFormat)?;
        for segment in segments.iter().filter(|segment| segment.p_type == PT_LOAD) {
            load_segment(target, image, &segment)?;
        }

        let entry = u32::try_from(header.e_entry)
            .map(VirtualAddress::new)
            .map_err(|_| KernelError::InvalidFormat)?;
        if target.space.vma_lookup(entry).is_none() {
            return Err(KernelError::InvalidFormat);
        }
        Ok(LoadOutcome::Loaded { entry })
    }
}

/// Copies one loadable segment into fresh memory, zero-fills the rest, and
/// maps it as a private region.
fn load_segment(
    target: &mut LoadTarget<'_>,
    image: &[u8],
    segment: &ProgramHeader,
) -> KernelResult<()> {
    let to_usize = |value: u64| usize::try_from(value).map_err(|_| KernelError::InvalidFormat);
    let (offset, file_size, memory_size) = (
        to_usize(segment.p_offset)?,
        to_usize(segment.p_filesz)?,
        to_usize(segment.p_memsz)?,
    );
    if file_size > memory_size {
        return Err(KernelError::InvalidFormat);
    }
    if memory_size == 0 {
        return Ok(());
    }
    let file_end = offset
        .checked_add(file_size)
        .filter(|&end| end <= image.len())
        .ok_or(KernelError::InvalidFormat)?;

    let start = u32::try_from(segment.p_vaddr)
        .map(VirtualAddress::new)
        .map_err(|_| KernelError::OutOfBounds)?;
    let end = start
        .checked_add(memory_size)
        .filter(|end| end.as_u32() <= KERNEL_SPLIT)
        .ok_or(KernelError::OutOfBounds)?;
    let first_page = start.align_down(PAGE_SIZE);
    let span = end.align_up(PAGE_SIZE).ok_or(KernelError::OutOfBounds)? - first_page;

    let mut protection = Protection::READ;
    if segment.p_flags & PF_W != 0 {
        protection |= Protection::WRITE;
    }
    if segment.p_flags & PF_X != 0 {
        protection |= Protection::EXEC;
    }

    let backing = target.heap.alloc_zeroed(span, PAGE_SIZE)?;
    target
        .heap
        .write(backing + (start - first_page), &image[offset..file_end]);

    let mapped = Region::new(
        start,
        Some(backing),
        memory_size,
        protection,
        Sharing::Private,
        true,
    )
    .and_then(|region| target.space.vma_map(&mut *target.heap, region));
    if let Err(error) = mapped {
        target.heap.free(backing);
        return Err(error.into());
    }

    log::debug!("loaded segment {start}..{end} ({file_size:#x} from file, {protection:?})");
    Ok(())
}
