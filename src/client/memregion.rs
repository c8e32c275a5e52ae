//! Memory-region half of the client surface.

use crate::error::Result;
use crate::platform::MappedWindow;
use crate::registry::{ClaimOptions, ClaimedMemRegion, ExportedFlags, Registry, Token};
use crate::resource_id::ResourceId;

/// A claimed memory region mapped into this process. The OS mapping is
/// released automatically when this value drops; the registry claim is
/// not — callers still release it explicitly via [`release`] or
/// [`unmap_and_release`], matching how the original separates `munmap()`
/// from the `memregion.release` control command.
pub struct MappedRegion {
    window: MappedWindow,
    start_offset: u64,
    len: u64,
    flags: ExportedFlags,
    token: Token,
}

impl MappedRegion {
    /// Final process-space address, `base + start_offset`.
    pub fn addr(&self) -> usize {
        self.window.base + self.start_offset as usize
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn flags(&self) -> ExportedFlags {
        self.flags
    }

    pub fn token(&self) -> Token {
        self.token
    }
}

/// Sends `memregion.claim`; any wildcarded field in `id` (empty string,
/// zero instance) matches any value in that field.
pub fn claim(registry: &Registry, id: &ResourceId, pid: u32, options: ClaimOptions) -> Result<ClaimedMemRegion> {
    registry.claim_memregion(id, pid, options)
}

/// Maps the page-aligned window described by a claim response.
pub fn map(registry: &Registry, claimed: &ClaimedMemRegion) -> Result<MappedRegion> {
    let window = registry
        .backend()
        .map_region(&claimed.device_path, claimed.mapping_offset, claimed.pa_len)?;
    Ok(MappedRegion {
        window,
        start_offset: claimed.start_offset,
        len: claimed.len,
        flags: claimed.flags,
        token: claimed.token,
    })
}

/// Unmaps a region. Equivalent to dropping it; kept as an explicit
/// function so callers can write `memregion::unmap(region)?` the way the
/// original's `cuddl_memregion_unmap()` call reads.
pub fn unmap(region: MappedRegion) -> Result<()> {
    drop(region);
    Ok(())
}

pub fn release(registry: &Registry, token: Token, pid: u32) -> Result<()> {
    registry.release_memregion(token, pid)
}

/// Claim then map; if the map step fails, the claim is rolled back so the
/// caller observes all-or-nothing.
pub fn claim_and_map(registry: &Registry, id: &ResourceId, pid: u32, options: ClaimOptions) -> Result<MappedRegion> {
    let claimed = claim(registry, id, pid, options)?;
    match map(registry, &claimed) {
        Ok(region) => Ok(region),
        Err(e) => {
            let _ = release(registry, claimed.token, pid);
            Err(e)
        }
    }
}

/// Unmap then release; the unmap always proceeds (there's no meaningful
/// rollback for a torn-down mapping), but the release is attempted even if
/// this function is called after the region's `Drop` already ran via
/// [`unmap`].
pub fn unmap_and_release(registry: &Registry, region: MappedRegion, pid: u32) -> Result<()> {
    let token = region.token();
    unmap(region)?;
    release(registry, token, pid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::MockBackend;
    use crate::registry::Device;
    use crate::registry::resource::{MemRegion, MemRegionType, RecordFlags};
    use std::sync::Arc;

    fn registry_with_region() -> Registry {
        let reg = Registry::new(Arc::new(MockBackend::new()));
        let mut dev = Device::new("grp", "dev", 1, "drv", "hw").unwrap();
        dev.mem[0] = MemRegion::new("bar0", 0x1000, 4096, 0x10, 32, MemRegionType::Physical, RecordFlags::empty(), 4096);
        reg.manage(dev).unwrap();
        reg
    }

    #[test]
    fn claim_and_map_then_unmap_and_release_roundtrips() {
        let reg = registry_with_region();
        let id = ResourceId::new("grp", "dev", "bar0", 1).unwrap();
        let region = claim_and_map(&reg, &id, 1, ClaimOptions::empty()).unwrap();
        assert_eq!(region.len(), 32);
        assert_eq!(reg.get_memregion_ref_count(&id).unwrap(), 1);
        unmap_and_release(&reg, region, 1).unwrap();
        assert_eq!(reg.get_memregion_ref_count(&id).unwrap(), 0);
    }

    #[test]
    fn exclusive_conflict_leaves_ref_count_unchanged() {
        let reg = registry_with_region();
        let id = ResourceId::new("grp", "dev", "bar0", 1).unwrap();
        let first = claim_and_map(&reg, &id, 1, ClaimOptions::empty()).unwrap();
        let second = claim_and_map(&reg, &id, 2, ClaimOptions::empty());
        assert!(second.is_err());
        assert_eq!(reg.get_memregion_ref_count(&id).unwrap(), 1);
        unmap_and_release(&reg, first, 1).unwrap();
    }

    #[test]
    fn failed_map_rolls_back_the_claim() {
        let reg = registry_with_region();
        let mut dev = Device::new("grp2", "dev2", 1, "drv", "hw").unwrap();
        // A `pa_len` no allocator can satisfy forces `map()` to fail after
        // `claim()` already succeeded, exercising the rollback path.
        dev.mem[0] = MemRegion::new("bar0", 0, u64::MAX, 0, 0, MemRegionType::Physical, RecordFlags::empty(), 4096);
        reg.manage(dev).unwrap();
        let id = ResourceId::new("grp2", "dev2", "bar0", 1).unwrap();
        let result = claim_and_map(&reg, &id, 1, ClaimOptions::empty());
        assert!(result.is_err());
        assert_eq!(reg.get_memregion_ref_count(&id).unwrap(), 0);
    }
}
