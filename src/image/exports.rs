//! Export table walking.
//!
//! The export directory carries three parallel tables: the address table (one 32-bit RVA
//! per export), the name pointer table, and the ordinal table. The walker produces one
//! record per address-table entry. Ordinals are assigned as `ordinal_base + index` and the
//! i-th name pointer is attributed to the i-th address; both follow the behaviour this
//! loader has always had rather than the letter of the PE specification, which routes
//! names through the ordinal table (see DESIGN.md).

use crate::{
    format::{DataDirectory, ExportDescriptor},
    image::map::SectionMap,
    Result,
};

/// One exported symbol.
#[derive(Debug)]
pub(crate) struct ExportSymbol {
    /// Region offset of the NUL-terminated name; absent for unnamed exports.
    pub(crate) name: Option<usize>,
    /// The export ordinal, `ordinal_base + index`.
    pub(crate) ordinal: u32,
    /// Region offset of the exported address; absent when its RVA resolves nowhere.
    pub(crate) address: Option<usize>,
}

/// Walks the export directory into a flat symbol table.
///
/// # Arguments
///
/// * `map` - The resolved section map.
/// * `dir` - The EXPORT data directory.
///
/// # Errors
///
/// Returns [`crate::Error::Malformed`] when the address table count does not fit a signed
/// 32-bit integer or a table RVA resolves outside every section. An absent directory
/// yields an empty table.
pub(crate) fn walk(map: &SectionMap, dir: &DataDirectory) -> Result<Vec<ExportSymbol>> {
    let Some(descriptor_offset) = map.resolve(dir.virtual_address) else {
        return Ok(Vec::new());
    };

    let descriptor =
        ExportDescriptor::from_bytes(map.bytes_at(descriptor_offset, ExportDescriptor::SIZE)?)?;

    let count = i32::try_from(descriptor.address_table_entries).map_err(|_| {
        malformed_error!(
            "export address table count out of range - {}",
            descriptor.address_table_entries
        )
    })? as usize;

    if count == 0 {
        return Ok(Vec::new());
    }

    let addresses = map
        .resolve(descriptor.export_address_table_rva)
        .ok_or_else(|| {
            malformed_error!(
                "export address table RVA outside any section - {:#x}",
                descriptor.export_address_table_rva
            )
        })?;
    let names = map.resolve(descriptor.name_pointer_rva);

    let mut exports = Vec::with_capacity(count);

    for index in 0..count {
        let address_rva = map.read_u32(addresses + index * 4)?;
        let address = map.resolve(address_rva);

        let name = if (index as u32) < descriptor.number_of_name_pointers {
            let names = names.ok_or_else(|| {
                malformed_error!(
                    "export name pointer RVA outside any section - {:#x}",
                    descriptor.name_pointer_rva
                )
            })?;
            let name_rva = map.read_u32(names + index * 4)?;
            match map.resolve(name_rva) {
                Some(name) => {
                    map.cstr_at(name)?;
                    Some(name)
                }
                None => None,
            }
        } else {
            None
        };

        exports.push(ExportSymbol {
            name,
            ordinal: descriptor.ordinal_base.wrapping_add(index as u32),
            address,
        });
    }

    Ok(exports)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        file::ByteSource,
        format::{SectionFlags, SectionHeader},
    };

    fn edata_section(raw: Vec<u8>) -> SectionMap {
        let vsize = raw.len() as u32;
        let mut file = vec![0u8];
        file.extend_from_slice(&raw);

        let header = SectionHeader {
            name: *b".edata\0\0",
            virtual_size: vsize,
            virtual_address: 0x1000,
            size_of_raw_data: vsize,
            pointer_to_raw_data: 1,
            pointer_to_relocations: 0,
            pointer_to_line_numbers: 0,
            number_of_relocations: 0,
            number_of_line_numbers: 0,
            characteristics: SectionFlags::MEM_READ,
        };

        let mut source = ByteSource::from_vec(file).unwrap();
        SectionMap::build(&mut source, vec![header]).unwrap()
    }

    fn put_u32(data: &mut [u8], offset: usize, value: u32) {
        data[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    /// Descriptor with 3 address entries, 2 of them named, ordinal base 5.
    fn three_export_edata() -> Vec<u8> {
        let mut data = vec![0u8; 0x200];

        put_u32(&mut data, 0x10, 5); // ordinal base
        put_u32(&mut data, 0x14, 3); // address table entries
        put_u32(&mut data, 0x18, 2); // name pointers
        put_u32(&mut data, 0x1C, 0x1100); // address table
        put_u32(&mut data, 0x20, 0x1120); // name pointer table
        put_u32(&mut data, 0x24, 0x1130); // ordinal table

        // Address table: two resolvable RVAs and one dangling.
        put_u32(&mut data, 0x100, 0x1180);
        put_u32(&mut data, 0x104, 0x1190);
        put_u32(&mut data, 0x108, 0x9000);

        // Name pointers.
        put_u32(&mut data, 0x120, 0x1140);
        put_u32(&mut data, 0x124, 0x1150);

        data[0x140..0x146].copy_from_slice(b"first\0");
        data[0x150..0x157].copy_from_slice(b"second\0");

        data
    }

    #[test]
    fn walks_the_three_tables() {
        let map = edata_section(three_export_edata());
        let dir = DataDirectory {
            virtual_address: 0x1000,
            size: 0x40,
        };

        let exports = walk(&map, &dir).unwrap();
        assert_eq!(exports.len(), 3);

        assert_eq!(
            map.cstr_at(exports[0].name.unwrap()).unwrap().to_bytes(),
            b"first"
        );
        assert_eq!(exports[0].ordinal, 5);
        assert_eq!(exports[0].address, Some(0x180));

        assert_eq!(
            map.cstr_at(exports[1].name.unwrap()).unwrap().to_bytes(),
            b"second"
        );
        assert_eq!(exports[1].ordinal, 6);
        assert_eq!(exports[1].address, Some(0x190));

        // Third entry: past the name pointer count, and its address RVA dangles.
        assert_eq!(exports[2].name, None);
        assert_eq!(exports[2].ordinal, 7);
        assert_eq!(exports[2].address, None);
    }

    #[test]
    fn absent_directory_means_no_exports() {
        let map = edata_section(vec![0u8; 0x40]);
        let dir = DataDirectory::default();

        let exports = walk(&map, &dir).unwrap();
        assert!(exports.is_empty());
    }

    #[test]
    fn zero_entries_means_no_exports() {
        // A descriptor that exists but declares an empty address table.
        let map = edata_section(vec![0u8; 0x40]);
        let dir = DataDirectory {
            virtual_address: 0x1000,
            size: 0x28,
        };

        let exports = walk(&map, &dir).unwrap();
        assert!(exports.is_empty());
    }

    #[test]
    fn oversized_count_is_malformed() {
        let mut data = vec![0u8; 0x40];
        put_u32(&mut data, 0x14, 0x8000_0000); // does not fit i32

        let map = edata_section(data);
        let dir = DataDirectory {
            virtual_address: 0x1000,
            size: 0x28,
        };

        assert!(matches!(
            walk(&map, &dir),
            Err(crate::Error::Malformed { .. })
        ));
    }

    #[test]
    fn unresolvable_address_table_is_malformed() {
        let mut data = vec![0u8; 0x40];
        put_u32(&mut data, 0x14, 1);
        put_u32(&mut data, 0x1C, 0x9000);

        let map = edata_section(data);
        let dir = DataDirectory {
            virtual_address: 0x1000,
            size: 0x28,
        };

        assert!(matches!(
            walk(&map, &dir),
            Err(crate::Error::Malformed { .. })
        ));
    }
}
