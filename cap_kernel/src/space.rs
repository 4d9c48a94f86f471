//! Address spaces: page-aligned VMO mappings.
//!
//! The simulation tracks mappings as ranges, not page tables. The checks
//! match what a real MMU path would enforce: everything page-aligned,
//! no overlap, unmap names an existing mapping exactly.

use core_types::ObjectId;
use kernel_api::SysError;

/// Page size used for all alignment checks.
pub const PAGE_SIZE: u64 = 4096;

/// Lowest address the kernel hands out when the caller lets it choose.
const ALLOC_BASE: u64 = 0x0001_0000;

/// One mapping of a VMO range into an address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mapping {
    pub virt: u64,
    pub len: u64,
    pub vmo: ObjectId,
    pub offset: u64,
}

impl Mapping {
    fn end(&self) -> u64 {
        self.virt.saturating_add(self.len)
    }

    fn overlaps(&self, virt: u64, len: u64) -> bool {
        virt < self.end() && self.virt < virt.saturating_add(len)
    }
}

/// An address space: a sorted set of non-overlapping mappings.
#[derive(Debug, Default)]
pub struct AddressSpace {
    /// Kept sorted by `virt`.
    mappings: Vec<Mapping>,
}

impl AddressSpace {
    pub fn new() -> Self {
        Self {
            mappings: Vec::new(),
        }
    }

    pub fn mappings(&self) -> &[Mapping] {
        &self.mappings
    }

    /// Maps `len` bytes of `vmo` starting at `offset` to `virt`.
    ///
    /// `virt == 0` lets the kernel choose the lowest free page-aligned
    /// address at or above the allocation base. Returns the address the
    /// mapping landed at.
    pub fn map(
        &mut self,
        vmo: ObjectId,
        vmo_size: u64,
        virt: u64,
        offset: u64,
        len: u64,
    ) -> Result<u64, SysError> {
        if len == 0 || len % PAGE_SIZE != 0 {
            return Err(SysError::BadArguments(format!(
                "mapping length {} not a nonzero page multiple",
                len
            )));
        }
        if virt % PAGE_SIZE != 0 || offset % PAGE_SIZE != 0 {
            return Err(SysError::BadArguments(
                "mapping address and offset must be page aligned".into(),
            ));
        }
        let end = offset
            .checked_add(len)
            .ok_or_else(|| SysError::BadArguments("mapping range overflows".into()))?;
        if end > vmo_size {
            return Err(SysError::BadArguments(format!(
                "mapping {}..{} exceeds vmo of {} bytes",
                offset, end, vmo_size
            )));
        }

        let virt = if virt == 0 { self.find_free(len)? } else { virt };
        if virt.checked_add(len).is_none() {
            return Err(SysError::BadArguments(format!(
                "mapping {:#x}+{:#x} wraps the address space",
                virt, len
            )));
        }
        if self
            .mappings
            .iter()
            .any(|mapping| mapping.overlaps(virt, len))
        {
            return Err(SysError::MappingConflict);
        }

        let mapping = Mapping {
            virt,
            len,
            vmo,
            offset,
        };
        let position = self
            .mappings
            .iter()
            .position(|m| m.virt > virt)
            .unwrap_or(self.mappings.len());
        self.mappings.insert(position, mapping);
        Ok(virt)
    }

    /// Removes the mapping covering exactly `[virt, virt + len)`.
    ///
    /// Returns the VMO it referenced so the caller can drop the reference.
    /// A range that is not an existing mapping is a MappingConflict.
    pub fn unmap(&mut self, virt: u64, len: u64) -> Result<ObjectId, SysError> {
        let position = self
            .mappings
            .iter()
            .position(|mapping| mapping.virt == virt && mapping.len == len)
            .ok_or(SysError::MappingConflict)?;
        Ok(self.mappings.remove(position).vmo)
    }

    /// The mapping containing `virt`, if any.
    pub fn mapping_at(&self, virt: u64) -> Option<&Mapping> {
        self.mappings
            .iter()
            .find(|mapping| mapping.virt <= virt && virt < mapping.end())
    }

    fn find_free(&self, len: u64) -> Result<u64, SysError> {
        let mut candidate = ALLOC_BASE;
        for mapping in &self.mappings {
            if mapping.virt >= candidate
                && mapping.virt.saturating_sub(candidate) >= len
            {
                break;
            }
            if mapping.end() > candidate {
                candidate = mapping.end();
            }
        }
        candidate
            .checked_add(len)
            .ok_or_else(|| SysError::ResourceExhausted("address space exhausted".into()))?;
        Ok(candidate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: u64 = PAGE_SIZE;

    #[test]
    fn test_map_at_fixed_address() {
        let mut space = AddressSpace::new();
        let vmo = ObjectId::new();
        let virt = space.map(vmo, PAGE * 4, PAGE * 10, 0, PAGE * 2).unwrap();
        assert_eq!(virt, PAGE * 10);
        assert_eq!(space.mapping_at(PAGE * 11).unwrap().vmo, vmo);
        assert!(space.mapping_at(PAGE * 12).is_none());
    }

    #[test]
    fn test_overlap_is_conflict() {
        let mut space = AddressSpace::new();
        let vmo = ObjectId::new();
        space.map(vmo, PAGE * 4, PAGE * 10, 0, PAGE * 2).unwrap();
        assert_eq!(
            space.map(vmo, PAGE * 4, PAGE * 11, 0, PAGE * 2).err(),
            Some(SysError::MappingConflict)
        );
    }

    #[test]
    fn test_unmap_then_remap() {
        let mut space = AddressSpace::new();
        let vmo = ObjectId::new();
        space.map(vmo, PAGE * 4, PAGE * 10, 0, PAGE * 2).unwrap();
        assert_eq!(space.unmap(PAGE * 10, PAGE * 2).unwrap(), vmo);
        assert!(space.map(vmo, PAGE * 4, PAGE * 10, 0, PAGE * 2).is_ok());
    }

    #[test]
    fn test_unmap_unknown_range_is_conflict() {
        let mut space = AddressSpace::new();
        assert_eq!(
            space.unmap(PAGE * 10, PAGE).err(),
            Some(SysError::MappingConflict)
        );
    }

    #[test]
    fn test_kernel_chosen_address_skips_existing() {
        let mut space = AddressSpace::new();
        let vmo = ObjectId::new();
        let first = space.map(vmo, PAGE * 8, 0, 0, PAGE * 2).unwrap();
        let second = space.map(vmo, PAGE * 8, 0, 0, PAGE * 2).unwrap();
        assert_ne!(first, second);
        assert_eq!(second, first + PAGE * 2);
    }

    #[test]
    fn test_misaligned_rejected() {
        let mut space = AddressSpace::new();
        let vmo = ObjectId::new();
        assert!(matches!(
            space.map(vmo, PAGE * 4, PAGE + 1, 0, PAGE),
            Err(SysError::BadArguments(_))
        ));
        assert!(matches!(
            space.map(vmo, PAGE * 4, PAGE, 0, 100),
            Err(SysError::BadArguments(_))
        ));
    }

    #[test]
    fn test_mapping_wrapping_address_space_rejected() {
        let mut space = AddressSpace::new();
        let vmo = ObjectId::new();
        let top = u64::MAX - (PAGE - 1);
        assert!(matches!(
            space.map(vmo, PAGE * 2, top, 0, PAGE),
            Err(SysError::BadArguments(_))
        ));
        // Later maps over the same space must not trip arithmetic on the
        // rejected range.
        space.map(vmo, PAGE * 2, PAGE * 16, 0, PAGE).unwrap();
        assert!(matches!(
            space.map(vmo, PAGE * 2, top, 0, PAGE),
            Err(SysError::BadArguments(_))
        ));
        assert!(space.mapping_at(u64::MAX).is_none());
    }

    #[test]
    fn test_mapping_beyond_vmo_rejected() {
        let mut space = AddressSpace::new();
        let vmo = ObjectId::new();
        assert!(matches!(
            space.map(vmo, PAGE * 2, PAGE * 10, PAGE, PAGE * 2),
            Err(SysError::BadArguments(_))
        ));
    }
}
