//! Import table walking and trap-stub installation.
//!
//! The import directory is a zero-terminated array of descriptors, one per foreign module.
//! Each descriptor points at the module's name and at its thunk array, whose machine-word
//! entries double as the slots the image's code indirect-calls through. The walker records
//! every entry (by name or by ordinal) and immediately overwrites the slot with the address
//! of [`unbound_import`], so a dispatch through a slot nobody bound aborts loudly instead
//! of jumping into garbage.
//!
//! Slot words are the only part of the image the loader mutates after open; binding a real
//! symbol goes through [`crate::PeImage::bind_import`].

use crate::{
    format::{DataDirectory, ImportDescriptor},
    image::map::SectionMap,
    Result,
};

/// The top bit of a thunk entry flags an import by ordinal.
const ORDINAL_FLAG: u64 = 1 << 63;

/// One imported symbol and the slot it dispatches through.
#[derive(Debug)]
pub(crate) struct ImportFunction {
    /// Region offset of the symbol's NUL-terminated name; absent for ordinal imports.
    pub(crate) name: Option<usize>,
    /// Import ordinal; absent for named imports.
    pub(crate) ordinal: Option<u16>,
    /// Region offset of the machine-word slot inside the thunk array.
    pub(crate) slot: usize,
}

/// One foreign module the image references, with its imported symbols in table order.
#[derive(Debug)]
pub(crate) struct ImportModule {
    /// Region offset of the module's NUL-terminated name.
    pub(crate) name: usize,
    /// The module's imports, ordered as in the thunk array.
    pub(crate) functions: Vec<ImportFunction>,
}

/// The handler every import slot starts out pointing at.
///
/// Must use the calling convention of the image's code, since the image dispatches into it
/// directly.
extern "win64" fn unbound_import() -> ! {
    eprintln!("peload: an unbound import was called");
    std::process::abort();
}

/// Address of the trap stub, as written into import slots.
pub(crate) fn trap_stub_address() -> u64 {
    let stub: extern "win64" fn() -> ! = unbound_import;
    stub as usize as u64
}

/// Walks the import directory, builds the per-module function records, and installs the
/// trap stub into every slot.
///
/// # Arguments
///
/// * `map` - The resolved section map; slots are written through it.
/// * `dir` - The IMPORT data directory.
///
/// # Errors
///
/// Returns [`crate::Error::Malformed`] for descriptor or hint/name RVAs that resolve
/// outside every section, and [`crate::Error::OutOfBounds`] when a table runs past the
/// region without a terminator. An absent directory yields an empty table.
pub(crate) fn walk(map: &mut SectionMap, dir: &DataDirectory) -> Result<Vec<ImportModule>> {
    let Some(descriptors) = map.resolve(dir.virtual_address) else {
        return Ok(Vec::new());
    };

    let mut modules = Vec::new();

    // The descriptor count is not recorded anywhere; scan forward to the all-zero entry.
    for index in 0.. {
        let bytes = map.bytes_at(
            descriptors + index * ImportDescriptor::SIZE,
            ImportDescriptor::SIZE,
        )?;
        let descriptor = ImportDescriptor::from_bytes(bytes)?;
        if descriptor.name_rva == 0 {
            break;
        }

        let name = map.resolve(descriptor.name_rva).ok_or_else(|| {
            malformed_error!(
                "import module name RVA outside any section - {:#x}",
                descriptor.name_rva
            )
        })?;
        map.cstr_at(name)?;

        let functions = match map.resolve(descriptor.import_table) {
            Some(table) => walk_thunks(map, table)?,
            None => Vec::new(),
        };

        modules.push(ImportModule { name, functions });
    }

    Ok(modules)
}

/// Walks one zero-terminated thunk array, recording each entry and arming its slot.
fn walk_thunks(map: &mut SectionMap, table: usize) -> Result<Vec<ImportFunction>> {
    let stub = trap_stub_address();
    let mut functions = Vec::new();

    let mut slot = table;
    loop {
        let entry = map.read_u64(slot)?;
        if entry == 0 {
            break;
        }

        let function = if entry & ORDINAL_FLAG != 0 {
            // Ordinal imports carry the ordinal in the low 16 bits and have no name.
            ImportFunction {
                name: None,
                ordinal: Some(entry as u16),
                slot,
            }
        } else {
            let rva = u32::try_from(entry)
                .map_err(|_| malformed_error!("import thunk entry out of range - {:#x}", entry))?;
            let record = map.resolve(rva).ok_or_else(|| {
                malformed_error!("import hint/name RVA outside any section - {:#x}", rva)
            })?;

            // The name follows the 16 bit hint.
            let name = record + 2;
            map.cstr_at(name)?;

            ImportFunction {
                name: Some(name),
                ordinal: None,
                slot,
            }
        };

        map.write_u64(slot, stub)?;
        functions.push(function);
        slot += 8;
    }

    Ok(functions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        file::ByteSource,
        format::{SectionFlags, SectionHeader},
    };

    fn idata_section(raw: Vec<u8>) -> SectionMap {
        let vsize = raw.len() as u32;
        // Raw data cannot start at file offset zero, so prepend a pad byte.
        let mut file = vec![0u8];
        file.extend_from_slice(&raw);

        let header = SectionHeader {
            name: *b".idata\0\0",
            virtual_size: vsize,
            virtual_address: 0x1000,
            size_of_raw_data: vsize,
            pointer_to_raw_data: 1,
            pointer_to_relocations: 0,
            pointer_to_line_numbers: 0,
            number_of_relocations: 0,
            number_of_line_numbers: 0,
            characteristics: SectionFlags::MEM_READ | SectionFlags::MEM_WRITE,
        };

        let mut source = ByteSource::from_vec(file).unwrap();
        SectionMap::build(&mut source, vec![header]).unwrap()
    }

    fn put_u32(data: &mut [u8], offset: usize, value: u32) {
        data[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    fn put_u64(data: &mut [u8], offset: usize, value: u64) {
        data[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
    }

    /// Section data with two modules: one importing `func` by name, one by ordinal 0x42.
    fn two_module_idata() -> Vec<u8> {
        let mut data = vec![0u8; 0x200];

        // Descriptor 0: alpha.dll via the thunk array at 0x1140.
        put_u32(&mut data, 0x0C, 0x1100);
        put_u32(&mut data, 0x10, 0x1140);
        // Descriptor 1: beta.dll via the thunk array at 0x1160.
        put_u32(&mut data, 0x14 + 0x0C, 0x1110);
        put_u32(&mut data, 0x14 + 0x10, 0x1160);
        // Descriptor 2 stays all zero: terminator.

        data[0x100..0x10A].copy_from_slice(b"alpha.dll\0");
        data[0x110..0x119].copy_from_slice(b"beta.dll\0");
        // Hint/name record for `func`.
        data[0x120..0x122].copy_from_slice(&7_u16.to_le_bytes());
        data[0x122..0x127].copy_from_slice(b"func\0");

        put_u64(&mut data, 0x140, 0x1120); // alpha: by name
        put_u64(&mut data, 0x160, ORDINAL_FLAG | 0x42); // beta: by ordinal

        data
    }

    #[test]
    fn walks_modules_and_arms_slots() {
        let mut map = idata_section(two_module_idata());
        let dir = DataDirectory {
            virtual_address: 0x1000,
            size: 0x28,
        };

        let modules = walk(&mut map, &dir).unwrap();
        assert_eq!(modules.len(), 2);

        let alpha = &modules[0];
        assert_eq!(map.cstr_at(alpha.name).unwrap().to_bytes(), b"alpha.dll");
        assert_eq!(alpha.functions.len(), 1);
        let func = &alpha.functions[0];
        assert_eq!(
            map.cstr_at(func.name.unwrap()).unwrap().to_bytes(),
            b"func"
        );
        assert_eq!(func.ordinal, None);
        assert_eq!(func.slot, 0x140);

        let beta = &modules[1];
        assert_eq!(map.cstr_at(beta.name).unwrap().to_bytes(), b"beta.dll");
        let ord = &beta.functions[0];
        assert_eq!(ord.name, None);
        assert_eq!(ord.ordinal, Some(0x42));
        assert_eq!(ord.slot, 0x160);

        // Every slot now points at the trap stub.
        let stub = trap_stub_address();
        assert_eq!(map.read_u64(0x140).unwrap(), stub);
        assert_eq!(map.read_u64(0x160).unwrap(), stub);
    }

    #[test]
    fn absent_directory_means_no_imports() {
        let mut map = idata_section(vec![0u8; 0x40]);
        let dir = DataDirectory::default();

        let modules = walk(&mut map, &dir).unwrap();
        assert!(modules.is_empty());
    }

    #[test]
    fn descriptor_without_thunks_keeps_an_empty_module() {
        let mut data = vec![0u8; 0x120];
        put_u32(&mut data, 0x0C, 0x1100); // name only, import_table stays zero
        data[0x100..0x10A].copy_from_slice(b"alpha.dll\0");

        let mut map = idata_section(data);
        let dir = DataDirectory {
            virtual_address: 0x1000,
            size: 0x28,
        };

        let modules = walk(&mut map, &dir).unwrap();
        assert_eq!(modules.len(), 1);
        assert!(modules[0].functions.is_empty());
    }

    #[test]
    fn unresolvable_module_name_is_malformed() {
        let mut data = vec![0u8; 0x120];
        put_u32(&mut data, 0x0C, 0x9000); // name RVA outside the only section

        let mut map = idata_section(data);
        let dir = DataDirectory {
            virtual_address: 0x1000,
            size: 0x28,
        };

        assert!(matches!(
            walk(&mut map, &dir),
            Err(crate::Error::Malformed { .. })
        ));
    }

    #[test]
    fn trap_stub_address_is_stable() {
        assert_ne!(trap_stub_address(), 0);
        assert_eq!(trap_stub_address(), trap_stub_address());
    }
}
