//! Process-lifecycle tracking: a second control channel, opened once per
//! client process, whose close (clean exit, crash, or signal) triggers
//! cleanup of every resource that process still held.
//!
//! The kernel-module original does this with a `file_operations::release`
//! hook invoked by the VFS when the last reference to an open file drops.
//! `Channel`'s `Drop` impl is the direct analogue: whatever happens to the
//! owning process, the channel handle is reclaimed, and reclaiming it
//! sweeps the registry.

use crate::error::Result;
use crate::registry::Registry;
use std::sync::Arc;

/// A janitor channel bound to one process id. Dropping it — whether from
/// an explicit `close()`, a panic unwind, or simply falling out of scope
/// when the owning client exits — decrements every ref that process still
/// held.
pub struct Channel {
    registry: Arc<Registry>,
    pid: Option<u32>,
}

impl Channel {
    /// Opens a new, unregistered channel. Call `register_pid` before any
    /// resource claim so cleanup can find it later.
    pub fn open(registry: Arc<Registry>) -> Self {
        Self { registry, pid: None }
    }

    /// Binds this channel to `pid`. A client calls this immediately after
    /// opening the channel, before claiming anything, so cleanup can find
    /// it later.
    pub fn register_pid(&mut self, pid: u32) -> Result<()> {
        self.pid = Some(pid);
        Ok(())
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Explicit close; equivalent to dropping the channel, but lets a
    /// caller observe how many refs were reclaimed.
    pub fn close(mut self) -> usize {
        self.take_and_cleanup().1
    }

    /// Takes the bound pid (if any) and sweeps its refs, returning both the
    /// pid that was cleaned (for logging) and how many refs were reclaimed.
    fn take_and_cleanup(&mut self) -> (Option<u32>, usize) {
        match self.pid.take() {
            Some(pid) => (Some(pid), self.registry.cleanup_pid(pid)),
            None => (None, 0),
        }
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        let (pid, cleaned) = self.take_and_cleanup();
        if cleaned > 0 {
            log::info!("janitor: reclaimed {} ref(s) for pid {:?}", cleaned, pid);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::MockBackend;
    use crate::registry::{ClaimOptions, Device};
    use crate::registry::resource::{MemRegion, MemRegionType, RecordFlags};
    use crate::resource_id::ResourceId;

    fn registry_with_region() -> Arc<Registry> {
        let reg = Registry::new(Arc::new(MockBackend::new()));
        let mut dev = Device::new("grp", "dev", 1, "drv", "hw").unwrap();
        dev.mem[0] = MemRegion::new("bar0", 0x1000, 4096, 0, 32, MemRegionType::Physical, RecordFlags::empty(), 4096);
        reg.manage(dev).unwrap();
        Arc::new(reg)
    }

    #[test]
    fn dropping_channel_cleans_up_owned_refs() {
        let reg = registry_with_region();
        let id = ResourceId::new("grp", "dev", "bar0", 1).unwrap();
        {
            let mut channel = Channel::open(reg.clone());
            channel.register_pid(123).unwrap();
            reg.claim_memregion(&id, 123, ClaimOptions::empty()).unwrap();
            assert_eq!(reg.get_memregion_ref_count(&id).unwrap(), 1);
        }
        assert_eq!(reg.get_memregion_ref_count(&id).unwrap(), 0);
    }

    #[test]
    fn explicit_close_reports_reclaimed_count() {
        let reg = registry_with_region();
        let id = ResourceId::new("grp", "dev", "bar0", 1).unwrap();
        let mut channel = Channel::open(reg.clone());
        channel.register_pid(7).unwrap();
        reg.claim_memregion(&id, 7, ClaimOptions::empty()).unwrap();
        assert_eq!(channel.close(), 1);
    }

    #[test]
    fn unregistered_channel_close_is_a_no_op() {
        let reg = registry_with_region();
        let channel = Channel::open(reg.clone());
        assert_eq!(channel.close(), 0);
    }
}
