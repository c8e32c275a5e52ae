//! End-to-end scenarios exercising the registry, control dispatch, client
//! combinators, and janitor cleanup together against the in-memory backend.

use devmux::client::{eventsrc, memregion};
use devmux::control::{Command, ControlRequest, Response};
use devmux::error::DevmuxError;
use devmux::janitor::Channel;
use devmux::platform::MockBackend;
use devmux::registry::resource::{EventSrc, InterruptConfig, MemRegion, MemRegionType, RecordFlags};
use devmux::registry::{ClaimOptions, Device, Registry};
use devmux::resource_id::ResourceId;
use devmux::version::{VersionCode, CRATE_VERSION};
use std::sync::Arc;

fn registry_with_device(shared: bool) -> Registry {
    let registry = Registry::new(Arc::new(MockBackend::new()));
    let mut dev = Device::new("grp", "dev", 1, "drv", "hw").unwrap();
    let flags = if shared { RecordFlags::SHARED } else { RecordFlags::empty() };
    dev.mem[0] = MemRegion::new("bar0", 0x1000, 4096, 0x10, 32, MemRegionType::Physical, flags, 4096);
    dev.events[0] = EventSrc::new("irq0", RecordFlags::empty(), InterruptConfig { irq: 5, ..Default::default() });
    registry.manage(dev).unwrap();
    registry
}

#[test]
fn single_process_claim_map_release() {
    let registry = registry_with_device(false);
    let id = ResourceId::new("grp", "dev", "bar0", 1).unwrap();

    let region = memregion::claim_and_map(&registry, &id, 1, ClaimOptions::empty()).unwrap();
    assert_eq!(region.token(), devmux::registry::Token { device_index: 0, resource_index: 0 });
    assert_eq!(region.len(), 32);
    assert_ne!(region.addr(), 0);

    memregion::unmap_and_release(&registry, region, 1).unwrap();
    assert_eq!(registry.get_memregion_ref_count(&id).unwrap(), 0);
}

#[test]
fn shared_claim_lets_either_process_release_first() {
    let registry = registry_with_device(true);
    let id = ResourceId::new("grp", "dev", "bar0", 1).unwrap();

    let a = memregion::claim_and_map(&registry, &id, 1, ClaimOptions::empty()).unwrap();
    let b = memregion::claim_and_map(&registry, &id, 2, ClaimOptions::empty()).unwrap();
    assert_eq!(registry.get_memregion_ref_count(&id).unwrap(), 2);

    memregion::unmap_and_release(&registry, a, 1).unwrap();
    assert_eq!(registry.get_memregion_ref_count(&id).unwrap(), 1);
    memregion::unmap_and_release(&registry, b, 2).unwrap();
    assert_eq!(registry.get_memregion_ref_count(&id).unwrap(), 0);
}

#[test]
fn exclusive_conflict_then_retry_after_release() {
    let registry = registry_with_device(false);
    let id = ResourceId::new("grp", "dev", "bar0", 1).unwrap();

    let a = memregion::claim(&registry, &id, 1, ClaimOptions::empty()).unwrap();
    let conflict = memregion::claim(&registry, &id, 2, ClaimOptions::empty());
    assert_eq!(conflict.unwrap_err(), DevmuxError::Busy);

    memregion::release(&registry, a.token, 1).unwrap();
    let b = memregion::claim(&registry, &id, 2, ClaimOptions::empty()).unwrap();
    assert_eq!(registry.get_memregion_ref_count(&id).unwrap(), 1);
    memregion::release(&registry, b.token, 2).unwrap();
}

#[test]
fn janitor_cleanup_reclaims_memregion_and_eventsrc_refs() {
    let registry = Arc::new(registry_with_device(false));
    let mem_id = ResourceId::new("grp", "dev", "bar0", 1).unwrap();
    let event_id = ResourceId::new("grp", "dev", "irq0", 1).unwrap();

    let mut channel = Channel::open(registry.clone());
    channel.register_pid(42).unwrap();
    registry.claim_memregion(&mem_id, 42, ClaimOptions::empty()).unwrap();
    let claimed_event = eventsrc::claim(&registry, &event_id, 42, ClaimOptions::empty()).unwrap();
    let opened = eventsrc::open(&registry, &claimed_event).unwrap();

    assert_eq!(registry.get_memregion_ref_count(&mem_id).unwrap(), 1);
    assert_eq!(registry.get_eventsrc_ref_count(&event_id).unwrap(), 1);

    drop(opened);
    let reclaimed = channel.close();

    assert_eq!(reclaimed, 2);
    assert_eq!(registry.get_memregion_ref_count(&mem_id).unwrap(), 0);
    assert_eq!(registry.get_eventsrc_ref_count(&event_id).unwrap(), 0);
}

#[test]
fn auto_instance_ids_assign_smallest_unused_in_registration_order() {
    let registry = Registry::new(Arc::new(MockBackend::new()));
    for _ in 0..3 {
        registry.manage(Device::new("g", "d", 0, "", "").unwrap()).unwrap();
    }
    for instance in 1..=3 {
        assert!(registry.find_device_slot("g", "d", instance).is_ok());
    }
    assert!(registry.find_device_slot("g", "d", 4).is_err());
}

#[test]
fn version_rejection_leaves_state_unchanged() {
    let registry = registry_with_device(false);
    let id = ResourceId::new("grp", "dev", "bar0", 1).unwrap();
    let incompatible = VersionCode::new(CRATE_VERSION.major() + 2, 0, 0);

    let req = ControlRequest::new(
        incompatible,
        Command::MemRegionClaim { id: id.clone(), options: ClaimOptions::empty(), pid: 9 },
    );
    let err = registry.dispatch(req).unwrap_err();
    assert!(matches!(err, DevmuxError::VersionMismatch { .. }));
    assert_eq!(registry.get_memregion_ref_count(&id).unwrap(), 0);
}

#[test]
fn control_dispatch_round_trips_a_memregion_claim() {
    let registry = registry_with_device(false);
    let id = ResourceId::new("grp", "dev", "bar0", 1).unwrap();

    let claim = registry
        .dispatch(ControlRequest::new(
            CRATE_VERSION,
            Command::MemRegionClaim { id: id.clone(), options: ClaimOptions::empty(), pid: 3 },
        ))
        .unwrap();
    let token = match claim {
        Response::MemRegionClaim(c) => c.token,
        other => panic!("unexpected response: {other:?}"),
    };
    registry
        .dispatch(ControlRequest::new(CRATE_VERSION, Command::MemRegionRelease { token, pid: 3 }))
        .unwrap();
    assert_eq!(registry.get_memregion_ref_count(&id).unwrap(), 0);
}
