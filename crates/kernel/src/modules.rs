//! Boot modules handed over by a multiboot loader.
//!
//! Each module's command line names the path it is installed under in the
//! in-memory filesystem, e.g. `/bin/init`.

use core::ffi::CStr;

use mm::{AddressTranslator, PhysicalAddress};

use crate::vfs::MemFs;

/// `flags` bit saying the module fields are valid.
const INFO_MODULES: u32 = 1 << 3;
const INFO_MODS_COUNT: u32 = 20;
const INFO_MODS_ADDR: u32 = 24;
const MODULE_ENTRY_SIZE: u32 = 16;

struct BootModule {
    start: u32,
    end: u32,
    path: &'static str,
}

/// Copies every boot module into a fresh filesystem.
pub fn load(info: PhysicalAddress, translator: AddressTranslator) -> MemFs {
    let mut fs = MemFs::new();
    for index in 0..module_count(info, translator) {
        let Some(module) = module(info, translator, index) else {
            continue;
        };
        let start = translator.phys_to_virt(PhysicalAddress::new(module.start));
        let len = module.end.saturating_sub(module.start) as usize;
        // SAFETY: the loader placed the module in low memory, inside the direct map.
        let contents = unsafe { core::slice::from_raw_parts(start.as_ptr::<u8>(), len) };
        fs.insert(module.path, contents);
        log::info!("boot module {} ({len} bytes)", module.path);
    }
    fs
}

fn read_info(info: PhysicalAddress, translator: AddressTranslator, offset: u32) -> u32 {
    let field = translator.phys_to_virt(info + offset as usize);
    // SAFETY: the multiboot information structure is in low memory, inside the direct map.
    unsafe { field.as_ptr::<u32>().read_unaligned() }
}

fn module_count(info: PhysicalAddress, translator: AddressTranslator) -> u32 {
    if read_info(info, translator, 0) & INFO_MODULES == 0 {
        return 0;
    }
    read_info(info, translator, INFO_MODS_COUNT)
}

fn module(info: PhysicalAddress, translator: AddressTranslator, index: u32) -> Option<BootModule> {
    let entry = PhysicalAddress::new(read_info(info, translator, INFO_MODS_ADDR))
        + (index * MODULE_ENTRY_SIZE) as usize;
    let field = |offset: u32| read_info(entry, translator, offset);

    let command_line = translator.phys_to_virt(PhysicalAddress::new(field(8)));
    // SAFETY: the loader stores a NUL-terminated command line for every module.
    let command_line = unsafe { CStr::from_ptr(command_line.as_ptr()) };
    let Some(path) = command_line
        .to_str()
        .ok()
        .and_then(|line| line.split_whitespace().next())
        .filter(|path| path.starts_with('/'))
    else {
        log::warn!("boot module {index} has no absolute path, skipping");
        return None;
    };

    Some(BootModule {
        start: field(0),
        end: field(4),
        path,
    })
}
