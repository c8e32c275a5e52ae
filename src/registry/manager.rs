//! Device registry / manager: the bounded table of managed devices, the
//! global lock, and the operations that arbitrate shared/exclusive access.

use super::device::Device;
use super::resource::{EventSrc, ExportedFlags, MemRegion};
use crate::error::{DevmuxError, Result};
use crate::platform::PlatformBackend;
use crate::resource_id::{matches, ResourceId, ResourceKind};
use bitflags::bitflags;
use parking_lot::{RwLock, RwLockWriteGuard};
use std::sync::Arc;

/// Maximum number of devices the registry can manage at once.
pub const MAX_MANAGED_DEVICES: usize = 256;

bitflags! {
    /// Options a claim request may carry.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ClaimOptions: u32 {
        /// Operational override for a stuck resource. Using
        /// this deliberately violates the at-most-one-exclusive invariant
        /// and is reserved for recovery tools.
        const HOSTILE = 1 << 0;
    }
}

/// Opaque token returned by a successful claim; carried back on release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token {
    pub device_index: i32,
    pub resource_index: i32,
}

/// Compile-time resource limits, exposed over the control protocol as the
/// `limits.*` commands.
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    pub max_devices: usize,
    pub max_mem_regions: usize,
    pub max_events: usize,
}

pub const LIMITS: Limits = Limits {
    max_devices: MAX_MANAGED_DEVICES,
    max_mem_regions: super::device::MAX_DEV_MEM_REGIONS,
    max_events: super::device::MAX_DEV_EVENTS,
};

/// `(token, owner_pid)` — created on every successful claim, destroyed on
/// matched release, janitor cleanup, or manager shutdown.
#[derive(Debug, Clone, Copy)]
struct ResourceRef {
    device_index: usize,
    resource_index: usize,
    owner_pid: u32,
}

/// Outcome of a memory-region claim: mapping metadata the client needs to
/// call `mmap` itself.
#[derive(Debug, Clone)]
pub struct ClaimedMemRegion {
    pub token: Token,
    pub pa_len: u64,
    pub start_offset: u64,
    pub len: u64,
    pub flags: ExportedFlags,
    pub mapping_offset: u64,
    pub device_path: String,
}

/// Outcome of an event-source claim.
#[derive(Debug, Clone)]
pub struct ClaimedEventSrc {
    pub token: Token,
    pub flags: ExportedFlags,
    pub device_path: String,
}

/// Read-only snapshot of one managed device, for introspection tools such
/// as `devmuxctl` rather than for any control-protocol command.
#[derive(Debug, Clone)]
pub struct DeviceSummary {
    pub slot: usize,
    pub group: String,
    pub name: String,
    pub instance: u32,
    pub driver_info: String,
    pub hw_info: String,
    pub mem_names: Vec<String>,
    pub event_names: Vec<String>,
}

struct RegistryState {
    devices: Box<[Option<Device>; MAX_MANAGED_DEVICES]>,
    memregion_refs: Vec<ResourceRef>,
    eventsrc_refs: Vec<ResourceRef>,
}

impl RegistryState {
    fn new() -> Self {
        // `Option<Device>` is not `Copy`, so build the fixed array via
        // `from_fn` rather than a `[None; N]` literal.
        let devices = Box::new(std::array::from_fn(|_| None));
        Self {
            devices,
            memregion_refs: Vec::new(),
            eventsrc_refs: Vec::new(),
        }
    }
}

/// The bounded, lock-protected table of managed devices.
/// Every operation acquires this registry's global lock for its entire
/// duration; per-record locks (inside `MemRegion`/`EventSrc`) are only ever
/// taken while already holding it.
pub struct Registry {
    state: RwLock<RegistryState>,
    backend: Arc<dyn PlatformBackend>,
}

/// Scoped, exclusive acquisition of the registry — the Rust equivalent of
/// `cuddlk_manager_lock()`/`cuddlk_manager_unlock()`: acquired explicitly
/// by callers that need several operations to appear atomic, released
/// unconditionally on drop. Its methods mirror [`Registry`]'s
/// control-protocol and lookup operations but run directly against the
/// already-held [`RegistryState`] instead of re-acquiring `self.state`,
/// which would deadlock against a non-reentrant `RwLock`.
///
/// `manage`/`release`/`add_device`/`remove_device` are deliberately not
/// exposed here: per §5, the host-OS `register_device`/`unregister_device`
/// call is the only step that drops the global lock implicitly because it
/// may block in the host kernel, and a guard that already holds the lock
/// has no way to drop it for that call.
pub struct RegistryGuard<'a> {
    state: RwLockWriteGuard<'a, RegistryState>,
    backend: Arc<dyn PlatformBackend>,
}

impl<'a> RegistryGuard<'a> {
    pub fn find_device_slot(&self, group: &str, name: &str, instance: u32) -> Result<usize> {
        find_device_slot_in(&self.state.devices, group, name, instance)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn find_device_slot_matching(
        &self,
        group: &str,
        device: &str,
        resource: &str,
        instance: u32,
        kind: ResourceKind,
        start: usize,
    ) -> Result<usize> {
        find_device_slot_matching_in(&self.state.devices, group, device, resource, instance, kind, start)
    }

    pub fn next_available_instance_id(&self, group: &str, name: &str) -> Result<u32> {
        next_available_instance_id_in(&self.state.devices, group, name)
    }

    pub fn claim_memregion(&mut self, id: &ResourceId, pid: u32, options: ClaimOptions) -> Result<ClaimedMemRegion> {
        claim_memregion_in(&mut self.state, &self.backend, id, pid, options)
    }

    pub fn release_memregion(&mut self, token: Token, pid: u32) -> Result<()> {
        release_memregion_in(&mut self.state, token, pid)
    }

    pub fn get_memregion_ref_count(&self, id: &ResourceId) -> Result<u32> {
        get_memregion_ref_count_in(&self.state, id)
    }

    pub fn get_memregion_info(&self, id: &ResourceId) -> Result<(ExportedFlags, u64, u64, u64)> {
        get_memregion_info_in(&self.state, id)
    }

    pub fn decrement_memregion_ref(&self, id: &ResourceId) -> Result<u32> {
        decrement_memregion_ref_in(&self.state, id)
    }

    pub fn claim_eventsrc(&mut self, id: &ResourceId, pid: u32, options: ClaimOptions) -> Result<ClaimedEventSrc> {
        claim_eventsrc_in(&mut self.state, &self.backend, id, pid, options)
    }

    pub fn release_eventsrc(&mut self, token: Token, pid: u32) -> Result<()> {
        release_eventsrc_in(&mut self.state, token, pid)
    }

    pub fn get_eventsrc_ref_count(&self, id: &ResourceId) -> Result<u32> {
        get_eventsrc_ref_count_in(&self.state, id)
    }

    pub fn get_eventsrc_info(&self, id: &ResourceId) -> Result<ExportedFlags> {
        get_eventsrc_info_in(&self.state, id)
    }

    pub fn decrement_eventsrc_ref(&self, id: &ResourceId) -> Result<u32> {
        decrement_eventsrc_ref_in(&self.state, id)
    }

    pub fn eventsrc_is_enabled(&self, token: Token) -> Result<bool> {
        eventsrc_is_enabled_in(&self.state, token)
    }

    pub fn get_id_for_slot(&self, dev_slot: usize, resource_index: usize, kind: ResourceKind) -> Result<ResourceId> {
        get_id_for_slot_in(&self.state, dev_slot, resource_index, kind)
    }

    pub fn driver_info_for_slot(&self, dev_slot: usize) -> Result<String> {
        driver_info_for_slot_in(&self.state, dev_slot)
    }

    pub fn hw_info_for_slot(&self, dev_slot: usize) -> Result<String> {
        hw_info_for_slot_in(&self.state, dev_slot)
    }

    pub fn list_devices(&self) -> Vec<DeviceSummary> {
        list_devices_in(&self.state)
    }

    pub fn cleanup_pid(&mut self, pid: u32) -> usize {
        cleanup_pid_in(&mut self.state, pid)
    }
}

impl Registry {
    pub fn new(backend: Arc<dyn PlatformBackend>) -> Self {
        Self {
            state: RwLock::new(RegistryState::new()),
            backend,
        }
    }

    pub fn backend(&self) -> &Arc<dyn PlatformBackend> {
        &self.backend
    }

    /// Explicit scoped acquisition of the whole registry.
    pub fn lock(&self) -> RegistryGuard<'_> {
        RegistryGuard {
            state: self.state.write(),
            backend: self.backend.clone(),
        }
    }

    pub fn find_empty_slot(&self) -> Result<usize> {
        let state = self.state.read();
        find_empty_slot_in(&state.devices)
    }

    pub fn find_device_slot(&self, group: &str, name: &str, instance: u32) -> Result<usize> {
        let state = self.state.read();
        find_device_slot_in(&state.devices, group, name, instance)
    }

    pub fn find_device_slot_matching(
        &self,
        group: &str,
        device: &str,
        resource: &str,
        instance: u32,
        kind: ResourceKind,
        start: usize,
    ) -> Result<usize> {
        let state = self.state.read();
        find_device_slot_matching_in(&state.devices, group, device, resource, instance, kind, start)
    }

    /// Starting from instance `1`, the smallest positive integer not
    /// already used by a device with the same `(group, name)`.
    pub fn next_available_instance_id(&self, group: &str, name: &str) -> Result<u32> {
        let state = self.state.read();
        next_available_instance_id_in(&state.devices, group, name)
    }

    /// Adds an already-validated device to the first empty slot.
    /// Preconditions (`group`/`name` non-empty, `instance > 0`) are
    /// enforced by `Device::new` and by `manage()`.
    pub fn add_device(&self, dev: Device) -> Result<usize> {
        if dev.instance == 0 {
            return Err(DevmuxError::Invalid("device instance must be assigned before add_device"));
        }
        let mut state = self.state.write();
        let slot = find_empty_slot_in(&state.devices)?;
        state.devices[slot] = Some(dev);
        Ok(slot)
    }

    pub fn remove_device(&self, group: &str, name: &str, instance: u32) -> Result<Device> {
        let mut state = self.state.write();
        let slot = find_device_slot_in(&state.devices, group, name, instance)?;
        Ok(state.devices[slot].take().expect("slot located by find_device_slot_in is occupied"))
    }

    /// Registers and starts managing a device, auto-allocating its
    /// instance id if `dev.instance == 0`. Rolls back the OS
    /// registration if adding to the table fails.
    pub fn manage(&self, mut dev: Device) -> Result<usize> {
        if dev.group.is_empty() || dev.name.is_empty() {
            return Err(DevmuxError::Invalid("device group and name must be non-empty"));
        }
        if dev.instance == 0 {
            dev.instance = self.next_available_instance_id(&dev.group, &dev.name)?;
        }
        let handle = self.backend.register_device(&dev.unique_name())?;
        dev.os_handle = Some(handle.clone());
        match self.add_device(dev) {
            Ok(slot) => Ok(slot),
            Err(e) => {
                let _ = self.backend.unregister_device(&handle);
                Err(e)
            }
        }
    }

    /// Stops managing a device and unregisters it from the host OS,
    /// returning the first non-`Ok` status encountered.
    pub fn release(&self, group: &str, name: &str, instance: u32) -> Result<()> {
        let dev = self.remove_device(group, name, instance)?;
        if let Some(handle) = &dev.os_handle {
            self.backend.unregister_device(handle)?;
        }
        Ok(())
    }

    // ---- Control-protocol operations ----

    pub fn claim_memregion(
        &self,
        id: &ResourceId,
        pid: u32,
        options: ClaimOptions,
    ) -> Result<ClaimedMemRegion> {
        let mut state = self.state.write();
        claim_memregion_in(&mut state, &self.backend, id, pid, options)
    }

    pub fn release_memregion(&self, token: Token, pid: u32) -> Result<()> {
        let mut state = self.state.write();
        release_memregion_in(&mut state, token, pid)
    }

    pub fn get_memregion_ref_count(&self, id: &ResourceId) -> Result<u32> {
        let state = self.state.read();
        get_memregion_ref_count_in(&state, id)
    }

    /// Read-only lookup used by `memregion.get_info`: no claim, no ref
    /// change.
    pub fn get_memregion_info(&self, id: &ResourceId) -> Result<(ExportedFlags, u64, u64, u64)> {
        let state = self.state.read();
        get_memregion_info_in(&state, id)
    }

    /// Emergency decrement bypassing `ResourceRef` bookkeeping, matching
    /// the `hostile` claim override's rationale: for recovery tools
    /// operating on a resource whose owner died in a way the janitor
    /// missed.
    pub fn decrement_memregion_ref(&self, id: &ResourceId) -> Result<u32> {
        let state = self.state.read();
        decrement_memregion_ref_in(&state, id)
    }

    pub fn claim_eventsrc(
        &self,
        id: &ResourceId,
        pid: u32,
        options: ClaimOptions,
    ) -> Result<ClaimedEventSrc> {
        let mut state = self.state.write();
        claim_eventsrc_in(&mut state, &self.backend, id, pid, options)
    }

    pub fn release_eventsrc(&self, token: Token, pid: u32) -> Result<()> {
        let mut state = self.state.write();
        release_eventsrc_in(&mut state, token, pid)
    }

    pub fn get_eventsrc_ref_count(&self, id: &ResourceId) -> Result<u32> {
        let state = self.state.read();
        get_eventsrc_ref_count_in(&state, id)
    }

    /// Read-only lookup used by `eventsrc.get_info`: no claim, no ref
    /// change.
    pub fn get_eventsrc_info(&self, id: &ResourceId) -> Result<ExportedFlags> {
        let state = self.state.read();
        get_eventsrc_info_in(&state, id)
    }

    pub fn decrement_eventsrc_ref(&self, id: &ResourceId) -> Result<u32> {
        let state = self.state.read();
        decrement_eventsrc_ref_in(&state, id)
    }

    pub fn eventsrc_is_enabled(&self, token: Token) -> Result<bool> {
        let state = self.state.read();
        eventsrc_is_enabled_in(&state, token)
    }

    pub fn get_id_for_slot(&self, dev_slot: usize, resource_index: usize, kind: ResourceKind) -> Result<ResourceId> {
        let state = self.state.read();
        get_id_for_slot_in(&state, dev_slot, resource_index, kind)
    }

    pub fn driver_info_for_slot(&self, dev_slot: usize) -> Result<String> {
        let state = self.state.read();
        driver_info_for_slot_in(&state, dev_slot)
    }

    pub fn hw_info_for_slot(&self, dev_slot: usize) -> Result<String> {
        let state = self.state.read();
        hw_info_for_slot_in(&state, dev_slot)
    }

    /// Snapshot of every occupied slot's identity, for introspection tools
    /// like `devmuxctl` that have no other way to enumerate the table.
    pub fn list_devices(&self) -> Vec<DeviceSummary> {
        let state = self.state.read();
        list_devices_in(&state)
    }

    // ---- Janitor support ----

    /// Walks both outstanding-ref lists and decrements every ref owned by
    /// `pid`, returning how many were cleaned up. Called when a process's
    /// janitor channel closes, whether by clean exit, crash, or signal.
    pub fn cleanup_pid(&self, pid: u32) -> usize {
        let mut state = self.state.write();
        cleanup_pid_in(&mut state, pid)
    }
}

fn next_available_instance_id_in(
    devices: &[Option<Device>; MAX_MANAGED_DEVICES],
    group: &str,
    name: &str,
) -> Result<u32> {
    for candidate in 1..=MAX_MANAGED_DEVICES as u32 {
        let taken = devices.iter().flatten().any(|d| {
            d.group == group && d.name == name && d.instance == candidate
        });
        if !taken {
            return Ok(candidate);
        }
    }
    Err(DevmuxError::NoSpace("no unused instance id"))
}

fn claim_memregion_in(
    state: &mut RegistryState,
    backend: &Arc<dyn PlatformBackend>,
    id: &ResourceId,
    pid: u32,
    options: ClaimOptions,
) -> Result<ClaimedMemRegion> {
    let dev_slot = find_device_slot_matching_in(
        &state.devices, &id.group, &id.device, &id.resource, id.instance,
        ResourceKind::MemRegion, 0,
    )?;
    let resource_index = state.devices[dev_slot]
        .as_ref()
        .unwrap()
        .find_memregion_slot(&id.resource)?;
    let hostile = options.contains(ClaimOptions::HOSTILE);
    state.devices[dev_slot].as_ref().unwrap().mem[resource_index].claim(hostile)?;
    state.memregion_refs.push(ResourceRef {
        device_index: dev_slot,
        resource_index,
        owner_pid: pid,
    });
    let dev = state.devices[dev_slot].as_ref().unwrap();
    let region = &dev.mem[resource_index];
    let handle = dev
        .os_handle
        .as_ref()
        .ok_or(DevmuxError::Invalid("device has no OS handle"))?;
    Ok(ClaimedMemRegion {
        token: Token {
            device_index: dev_slot as i32,
            resource_index: resource_index as i32,
        },
        pa_len: region.pa_len,
        start_offset: region.start_offset,
        len: region.len,
        flags: region.exported_flags(),
        mapping_offset: backend.mmap_offset(resource_index),
        device_path: backend.path_for_region(handle, resource_index),
    })
}

fn release_memregion_in(state: &mut RegistryState, token: Token, pid: u32) -> Result<()> {
    let (dev_slot, resource_index) = resolve_token(token)?;
    let removed = remove_matching_ref(&mut state.memregion_refs, dev_slot, resource_index, pid);
    if !removed {
        log::warn!(
            "memregion release for device {} resource {} had no matching ResourceRef for pid {}",
            dev_slot, resource_index, pid
        );
    }
    let region = memregion_at(&state.devices, dev_slot, resource_index)?;
    region.decrement()?;
    Ok(())
}

fn get_memregion_ref_count_in(state: &RegistryState, id: &ResourceId) -> Result<u32> {
    let dev_slot = find_device_slot_matching_in(
        &state.devices, &id.group, &id.device, &id.resource, id.instance,
        ResourceKind::MemRegion, 0,
    )?;
    let resource_index = state.devices[dev_slot].as_ref().unwrap().find_memregion_slot(&id.resource)?;
    Ok(state.devices[dev_slot].as_ref().unwrap().mem[resource_index].ref_count())
}

fn get_memregion_info_in(state: &RegistryState, id: &ResourceId) -> Result<(ExportedFlags, u64, u64, u64)> {
    let dev_slot = find_device_slot_matching_in(
        &state.devices, &id.group, &id.device, &id.resource, id.instance,
        ResourceKind::MemRegion, 0,
    )?;
    let resource_index = state.devices[dev_slot].as_ref().unwrap().find_memregion_slot(&id.resource)?;
    let region = &state.devices[dev_slot].as_ref().unwrap().mem[resource_index];
    Ok((region.exported_flags(), region.len, region.pa_len, region.start_offset))
}

fn decrement_memregion_ref_in(state: &RegistryState, id: &ResourceId) -> Result<u32> {
    let dev_slot = find_device_slot_matching_in(
        &state.devices, &id.group, &id.device, &id.resource, id.instance,
        ResourceKind::MemRegion, 0,
    )?;
    let resource_index = state.devices[dev_slot].as_ref().unwrap().find_memregion_slot(&id.resource)?;
    state.devices[dev_slot].as_ref().unwrap().mem[resource_index].force_decrement()
}

fn claim_eventsrc_in(
    state: &mut RegistryState,
    backend: &Arc<dyn PlatformBackend>,
    id: &ResourceId,
    pid: u32,
    options: ClaimOptions,
) -> Result<ClaimedEventSrc> {
    let dev_slot = find_device_slot_matching_in(
        &state.devices, &id.group, &id.device, &id.resource, id.instance,
        ResourceKind::EventSrc, 0,
    )?;
    let resource_index = state.devices[dev_slot].as_ref().unwrap().find_eventsrc_slot(&id.resource)?;
    let hostile = options.contains(ClaimOptions::HOSTILE);
    state.devices[dev_slot].as_ref().unwrap().events[resource_index].claim(hostile)?;
    state.eventsrc_refs.push(ResourceRef {
        device_index: dev_slot,
        resource_index,
        owner_pid: pid,
    });
    let dev = state.devices[dev_slot].as_ref().unwrap();
    let src = &dev.events[resource_index];
    let handle = dev
        .os_handle
        .as_ref()
        .ok_or(DevmuxError::Invalid("device has no OS handle"))?;
    Ok(ClaimedEventSrc {
        token: Token {
            device_index: dev_slot as i32,
            resource_index: resource_index as i32,
        },
        flags: src.exported_flags(),
        device_path: backend.path_for_event(handle),
    })
}

fn release_eventsrc_in(state: &mut RegistryState, token: Token, pid: u32) -> Result<()> {
    let (dev_slot, resource_index) = resolve_token(token)?;
    let removed = remove_matching_ref(&mut state.eventsrc_refs, dev_slot, resource_index, pid);
    if !removed {
        log::warn!(
            "eventsrc release for device {} resource {} had no matching ResourceRef for pid {}",
            dev_slot, resource_index, pid
        );
    }
    let src = eventsrc_at(&state.devices, dev_slot, resource_index)?;
    src.decrement()?;
    Ok(())
}

fn get_eventsrc_ref_count_in(state: &RegistryState, id: &ResourceId) -> Result<u32> {
    let dev_slot = find_device_slot_matching_in(
        &state.devices, &id.group, &id.device, &id.resource, id.instance,
        ResourceKind::EventSrc, 0,
    )?;
    let resource_index = state.devices[dev_slot].as_ref().unwrap().find_eventsrc_slot(&id.resource)?;
    Ok(state.devices[dev_slot].as_ref().unwrap().events[resource_index].ref_count())
}

fn get_eventsrc_info_in(state: &RegistryState, id: &ResourceId) -> Result<ExportedFlags> {
    let dev_slot = find_device_slot_matching_in(
        &state.devices, &id.group, &id.device, &id.resource, id.instance,
        ResourceKind::EventSrc, 0,
    )?;
    let resource_index = state.devices[dev_slot].as_ref().unwrap().find_eventsrc_slot(&id.resource)?;
    Ok(state.devices[dev_slot].as_ref().unwrap().events[resource_index].exported_flags())
}

fn decrement_eventsrc_ref_in(state: &RegistryState, id: &ResourceId) -> Result<u32> {
    let dev_slot = find_device_slot_matching_in(
        &state.devices, &id.group, &id.device, &id.resource, id.instance,
        ResourceKind::EventSrc, 0,
    )?;
    let resource_index = state.devices[dev_slot].as_ref().unwrap().find_eventsrc_slot(&id.resource)?;
    state.devices[dev_slot].as_ref().unwrap().events[resource_index].force_decrement()
}

fn eventsrc_is_enabled_in(state: &RegistryState, token: Token) -> Result<bool> {
    let (dev_slot, resource_index) = resolve_token(token)?;
    let src = eventsrc_at(&state.devices, dev_slot, resource_index)?;
    Ok(src.intr.is_enabled.as_ref().map(|f| f()).unwrap_or(false))
}

fn get_id_for_slot_in(
    state: &RegistryState,
    dev_slot: usize,
    resource_index: usize,
    kind: ResourceKind,
) -> Result<ResourceId> {
    let dev = state.devices.get(dev_slot).and_then(|d| d.as_ref()).ok_or(DevmuxError::NotFound)?;
    let resource = match kind {
        ResourceKind::MemRegion => dev.mem.get(resource_index).ok_or(DevmuxError::NotFound)?.name.clone(),
        ResourceKind::EventSrc => dev.events.get(resource_index).ok_or(DevmuxError::NotFound)?.name.clone(),
    };
    ResourceId::new(dev.group.clone(), dev.name.clone(), resource, dev.instance)
}

fn driver_info_for_slot_in(state: &RegistryState, dev_slot: usize) -> Result<String> {
    Ok(state.devices.get(dev_slot).and_then(|d| d.as_ref()).ok_or(DevmuxError::NotFound)?.driver_info.clone())
}

fn hw_info_for_slot_in(state: &RegistryState, dev_slot: usize) -> Result<String> {
    Ok(state.devices.get(dev_slot).and_then(|d| d.as_ref()).ok_or(DevmuxError::NotFound)?.hw_info.clone())
}

fn list_devices_in(state: &RegistryState) -> Vec<DeviceSummary> {
    state
        .devices
        .iter()
        .enumerate()
        .filter_map(|(slot, d)| {
            d.as_ref().map(|dev| DeviceSummary {
                slot,
                group: dev.group.clone(),
                name: dev.name.clone(),
                instance: dev.instance,
                driver_info: dev.driver_info.clone(),
                hw_info: dev.hw_info.clone(),
                mem_names: dev.mem.iter().filter(|m| !m.is_empty_slot()).map(|m| m.name.clone()).collect(),
                event_names: dev.events.iter().filter(|e| !e.is_empty_slot()).map(|e| e.name.clone()).collect(),
            })
        })
        .collect()
}

fn cleanup_pid_in(state: &mut RegistryState, pid: u32) -> usize {
    let mut cleaned = 0;
    cleaned += cleanup_refs(&mut state.memregion_refs, &state.devices, pid, ResourceKind::MemRegion);
    cleaned += cleanup_refs(&mut state.eventsrc_refs, &state.devices, pid, ResourceKind::EventSrc);
    cleaned
}

fn cleanup_refs(
    refs: &mut Vec<ResourceRef>,
    devices: &[Option<Device>; MAX_MANAGED_DEVICES],
    pid: u32,
    kind: ResourceKind,
) -> usize {
    let mut cleaned = 0;
    refs.retain(|r| {
        if r.owner_pid != pid {
            return true;
        }
        let decremented = match kind {
            ResourceKind::MemRegion => memregion_at(devices, r.device_index, r.resource_index).map(|m| m.decrement()),
            ResourceKind::EventSrc => eventsrc_at(devices, r.device_index, r.resource_index).map(|e| e.decrement()),
        };
        match decremented {
            Ok(Ok(_)) => {}
            Ok(Err(e)) | Err(e) => {
                log::warn!("janitor cleanup decrement failed for pid {}: {:?}", pid, e);
            }
        }
        cleaned += 1;
        false
    });
    cleaned
}

fn remove_matching_ref(
    refs: &mut Vec<ResourceRef>,
    device_index: usize,
    resource_index: usize,
    pid: u32,
) -> bool {
    if let Some(pos) = refs.iter().position(|r| {
        r.device_index == device_index && r.resource_index == resource_index && r.owner_pid == pid
    }) {
        refs.remove(pos);
        true
    } else {
        false
    }
}

fn resolve_token(token: Token) -> Result<(usize, usize)> {
    if token.device_index < 0 || token.resource_index < 0 {
        return Err(DevmuxError::Invalid("token fields must be non-negative"));
    }
    Ok((token.device_index as usize, token.resource_index as usize))
}

fn memregion_at(
    devices: &[Option<Device>; MAX_MANAGED_DEVICES],
    dev_slot: usize,
    resource_index: usize,
) -> Result<&MemRegion> {
    devices
        .get(dev_slot)
        .and_then(|d| d.as_ref())
        .and_then(|d| d.mem.get(resource_index))
        .ok_or(DevmuxError::NotFound)
}

fn eventsrc_at(
    devices: &[Option<Device>; MAX_MANAGED_DEVICES],
    dev_slot: usize,
    resource_index: usize,
) -> Result<&EventSrc> {
    devices
        .get(dev_slot)
        .and_then(|d| d.as_ref())
        .and_then(|d| d.events.get(resource_index))
        .ok_or(DevmuxError::NotFound)
}

fn find_empty_slot_in(devices: &[Option<Device>; MAX_MANAGED_DEVICES]) -> Result<usize> {
    devices.iter().position(|d| d.is_none()).ok_or(DevmuxError::NoSpace("no empty device slots"))
}

fn find_device_slot_in(
    devices: &[Option<Device>; MAX_MANAGED_DEVICES],
    group: &str,
    name: &str,
    instance: u32,
) -> Result<usize> {
    devices
        .iter()
        .position(|d| matches!(d, Some(dev) if dev.group == group && dev.name == name && dev.instance == instance))
        .ok_or(DevmuxError::NotFound)
}

#[allow(clippy::too_many_arguments)]
fn find_device_slot_matching_in(
    devices: &[Option<Device>; MAX_MANAGED_DEVICES],
    group: &str,
    device: &str,
    resource: &str,
    instance: u32,
    kind: ResourceKind,
    start: usize,
) -> Result<usize> {
    for (index, slot) in devices.iter().enumerate().skip(start) {
        let Some(dev) = slot else { continue };
        if !matches(&dev.group, &dev.name, dev.instance, group, device, instance) {
            continue;
        }
        if !resource.is_empty() && !dev.has_resource(resource, kind) {
            continue;
        }
        return Ok(index);
    }
    Err(DevmuxError::NotFound)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::MockBackend;
    use crate::registry::device::Device;
    use crate::registry::resource::{MemRegionType, RecordFlags};

    fn registry() -> Registry {
        Registry::new(Arc::new(MockBackend::new()))
    }

    fn device_with_region(group: &str, name: &str, instance: u32, shared: bool) -> Device {
        let mut dev = Device::new(group, name, instance, "drv", "hw").unwrap();
        let flags = if shared { RecordFlags::SHARED } else { RecordFlags::empty() };
        dev.mem[0] = MemRegion::new("bar0", 0x1000, 4096, 0x10, 32, MemRegionType::Physical, flags, 4096);
        dev
    }

    #[test]
    fn auto_instance_ids_are_smallest_unused() {
        let reg = registry();
        for _ in 0..3 {
            let dev = Device::new("g", "d", 0, "", "").unwrap();
            reg.manage(dev).unwrap();
        }
        let state = reg.state.read();
        let mut instances: Vec<u32> = state.devices.iter().flatten().map(|d| d.instance).collect();
        instances.sort();
        assert_eq!(instances, vec![1, 2, 3]);
    }

    #[test]
    fn single_process_claim_map_release_scenario() {
        let reg = registry();
        reg.manage(device_with_region("grp", "dev", 1, false)).unwrap();
        let id = ResourceId::new("grp", "dev", "bar0", 1).unwrap();
        let claimed = reg.claim_memregion(&id, 100, ClaimOptions::empty()).unwrap();
        assert_eq!(claimed.token, Token { device_index: 0, resource_index: 0 });
        assert_eq!(claimed.len, 32);
        assert_eq!(reg.get_memregion_ref_count(&id).unwrap(), 1);
        reg.release_memregion(claimed.token, 100).unwrap();
        assert_eq!(reg.get_memregion_ref_count(&id).unwrap(), 0);
    }

    #[test]
    fn shared_claim_allows_two_owners() {
        let reg = registry();
        reg.manage(device_with_region("grp", "dev", 1, true)).unwrap();
        let id = ResourceId::new("grp", "dev", "bar0", 1).unwrap();
        let a = reg.claim_memregion(&id, 1, ClaimOptions::empty()).unwrap();
        let b = reg.claim_memregion(&id, 2, ClaimOptions::empty()).unwrap();
        assert_eq!(reg.get_memregion_ref_count(&id).unwrap(), 2);
        reg.release_memregion(a.token, 1).unwrap();
        assert_eq!(reg.get_memregion_ref_count(&id).unwrap(), 1);
        reg.release_memregion(b.token, 2).unwrap();
    }

    #[test]
    fn exclusive_conflict_then_retry_after_release() {
        let reg = registry();
        reg.manage(device_with_region("grp", "dev", 1, false)).unwrap();
        let id = ResourceId::new("grp", "dev", "bar0", 1).unwrap();
        let a = reg.claim_memregion(&id, 1, ClaimOptions::empty()).unwrap();
        assert_eq!(reg.claim_memregion(&id, 2, ClaimOptions::empty()).unwrap_err(), DevmuxError::Busy);
        reg.release_memregion(a.token, 1).unwrap();
        let b = reg.claim_memregion(&id, 2, ClaimOptions::empty()).unwrap();
        assert_eq!(reg.get_memregion_ref_count(&id).unwrap(), 1);
        reg.release_memregion(b.token, 2).unwrap();
    }

    #[test]
    fn janitor_cleanup_drops_refs_for_dead_pid() {
        let reg = registry();
        reg.manage(device_with_region("grp", "dev", 1, false)).unwrap();
        let id = ResourceId::new("grp", "dev", "bar0", 1).unwrap();
        reg.claim_memregion(&id, 42, ClaimOptions::empty()).unwrap();
        assert_eq!(reg.get_memregion_ref_count(&id).unwrap(), 1);
        reg.cleanup_pid(42);
        assert_eq!(reg.get_memregion_ref_count(&id).unwrap(), 0);
    }

    #[test]
    fn locked_guard_claims_without_deadlocking_on_the_global_lock() {
        let reg = registry();
        reg.manage(device_with_region("grp", "dev", 1, false)).unwrap();
        let id = ResourceId::new("grp", "dev", "bar0", 1).unwrap();
        let mut guard = reg.lock();
        let claimed = guard.claim_memregion(&id, 9, ClaimOptions::empty()).unwrap();
        assert_eq!(guard.get_memregion_ref_count(&id).unwrap(), 1);
        guard.release_memregion(claimed.token, 9).unwrap();
        assert_eq!(guard.get_memregion_ref_count(&id).unwrap(), 0);
        drop(guard);
        assert_eq!(reg.get_memregion_ref_count(&id).unwrap(), 0);
    }

    #[test]
    fn no_space_past_max_managed_devices() {
        let reg = registry();
        for i in 0..MAX_MANAGED_DEVICES {
            reg.manage(Device::new("g", format!("d{i}"), 1, "", "").unwrap()).unwrap();
        }
        let err = reg.manage(Device::new("g", "overflow", 1, "", "").unwrap()).unwrap_err();
        assert_eq!(err, DevmuxError::NoSpace("no empty device slots"));
    }
}
