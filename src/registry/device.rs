//! Device descriptor: aggregates a fixed-size set of memory regions and
//! event sources under one `(group, name, instance)` identity.

use super::resource::{EventSrc, MemRegion};
use crate::error::{DevmuxError, Result};
use crate::platform::DeviceHandle;
use crate::resource_id::ResourceKind;

/// Maximum number of memory regions a single device may advertise.
pub const MAX_DEV_MEM_REGIONS: usize = 5;
/// Maximum number of event sources a single device may advertise. Only one
/// is supported, matching both Linux UIO and Xenomai UDD.
pub const MAX_DEV_EVENTS: usize = 1;

/// A hardware device registered by a driver shim.
pub struct Device {
    pub group: String,
    pub name: String,
    /// Positive and unique per `(group, name)` once registered; `0` on
    /// input means "auto-allocate".
    pub instance: u32,
    pub driver_info: String,
    pub hw_info: String,
    pub mem: [MemRegion; MAX_DEV_MEM_REGIONS],
    pub events: [EventSrc; MAX_DEV_EVENTS],
    /// OS-level handle returned by `PlatformBackend::register_device`, set
    /// once `manage()` succeeds.
    pub(crate) os_handle: Option<DeviceHandle>,
}

impl Device {
    pub fn new(
        group: impl Into<String>,
        name: impl Into<String>,
        instance: u32,
        driver_info: impl Into<String>,
        hw_info: impl Into<String>,
    ) -> Result<Self> {
        let group = group.into();
        let name = name.into();
        if group.is_empty() || name.is_empty() {
            return Err(DevmuxError::Invalid("device group and name must be non-empty"));
        }
        Ok(Self {
            group,
            name,
            instance,
            driver_info: driver_info.into(),
            hw_info: hw_info.into(),
            mem: Default::default(),
            events: Default::default(),
            os_handle: None,
        })
    }

    /// Base name used to build RTDM device paths:
    /// `<group>.<name>.<instance>`.
    pub fn unique_name(&self) -> String {
        format!("{}.{}.{}", self.group, self.name, self.instance)
    }

    pub fn find_memregion_slot(&self, name: &str) -> Result<usize> {
        find_resource_slot(
            self.mem.iter().map(|m| (m.name.as_str(), m.is_empty_slot())),
            name,
        )
    }

    pub fn find_eventsrc_slot(&self, name: &str) -> Result<usize> {
        find_resource_slot(
            self.events.iter().map(|e| (e.name.as_str(), e.is_empty_slot())),
            name,
        )
    }

    pub fn find_resource_slot(&self, name: &str, kind: ResourceKind) -> Result<usize> {
        match kind {
            ResourceKind::MemRegion => self.find_memregion_slot(name),
            ResourceKind::EventSrc => self.find_eventsrc_slot(name),
        }
    }

    /// A `resource` predicate is satisfied if this device has a non-empty
    /// child of `kind` with that name (empty name is a wildcard matching
    /// the first non-empty slot).
    pub fn has_resource(&self, resource: &str, kind: ResourceKind) -> bool {
        self.find_resource_slot(resource, kind).is_ok()
    }
}

/// Linear scan of a bounded child array: empty slots are skipped, and an empty/null name
/// matches the first non-empty slot.
fn find_resource_slot<'a>(
    slots: impl Iterator<Item = (&'a str, bool)>,
    name: &str,
) -> Result<usize> {
    for (index, (slot_name, is_empty)) in slots.enumerate() {
        if is_empty {
            continue;
        }
        if name.is_empty() || name == slot_name {
            return Ok(index);
        }
    }
    Err(DevmuxError::NotFound)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::resource::{MemRegionType, RecordFlags};

    fn sample_device() -> Device {
        let mut dev = Device::new("grp", "dev", 1, "drv-1.0", "hw-rev-a").unwrap();
        dev.mem[0] = MemRegion::new("bar0", 0x1000, 0, 0, 32, MemRegionType::Physical, RecordFlags::empty(), 4096);
        dev
    }

    #[test]
    fn finds_named_region_and_skips_empty_slots() {
        let dev = sample_device();
        assert_eq!(dev.find_memregion_slot("bar0").unwrap(), 0);
        assert!(dev.find_memregion_slot("nope").is_err());
    }

    #[test]
    fn empty_name_matches_first_non_empty_slot() {
        let dev = sample_device();
        assert_eq!(dev.find_memregion_slot("").unwrap(), 0);
    }

    #[test]
    fn empty_group_or_name_rejected() {
        assert!(Device::new("", "dev", 1, "", "").is_err());
        assert!(Device::new("grp", "", 1, "", "").is_err());
    }

    #[test]
    fn unique_name_format() {
        let dev = sample_device();
        assert_eq!(dev.unique_name(), "grp.dev.1");
    }
}
