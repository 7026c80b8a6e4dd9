//! Section permission finalization.
//!
//! The whole region is mapped read+write so the pipeline can populate it. Once relocation
//! is done, each resident section is downgraded to exactly the permissions its
//! characteristics declare. Relocations must already be applied when this runs; a
//! write-protected section cannot take fixups.

use std::os::raw::c_void;

use crate::{format::SectionFlags, image::map::SectionMap, Error, Result};

/// Applies each resident section's declared permissions to its pages.
///
/// # Arguments
///
/// * `map` - The resolved section map.
///
/// # Errors
///
/// Returns [`crate::Error::Os`] when `mprotect` rejects a section, e.g. for a resident
/// base that is not page aligned.
pub(crate) fn apply(map: &SectionMap) -> Result<()> {
    for section in map.sections() {
        if !section.is_resident() {
            continue;
        }

        let flags = section.characteristics();
        let mut prot = libc::PROT_NONE;
        if flags.contains(SectionFlags::MEM_EXECUTE) {
            prot |= libc::PROT_EXEC;
        }
        if flags.contains(SectionFlags::MEM_READ) {
            prot |= libc::PROT_READ;
        }
        if flags.contains(SectionFlags::MEM_WRITE) {
            prot |= libc::PROT_WRITE;
        }

        // The region is owned by `map` and the section range was bounds-checked when the
        // hull was computed.
        let result = unsafe {
            let address = map.region_ptr().add(section.offset).cast_mut();
            libc::mprotect(address.cast::<c_void>(), section.size, prot)
        };
        if result != 0 {
            return Err(Error::Os {
                syscall: "mprotect",
                source: std::io::Error::last_os_error(),
            });
        }
    }

    Ok(())
}
