//! The typed control protocol carried by the (conceptual) kernel control
//! channel: one request/response pair per command, version negotiation,
//! and the opaque `Token` returned by a successful claim.
//!
//! The original ships separate UIO and UDD ioctl numbers for the same
//! logical claim because the two platform variants are different kernel
//! modules; here a single `Registry` is already bound to one
//! `PlatformBackend` at construction, so `memregion.claim{uio,udd}`
//! collapses into one `Command::MemRegionClaim` variant.

use crate::error::{DevmuxError, Result};
use crate::registry::{ClaimOptions, ClaimedEventSrc, ClaimedMemRegion, ExportedFlags, Registry, Token};
use crate::resource_id::ResourceId;
use crate::version::{BuildInfo, VersionCode, CRATE_VERSION};

/// One control-protocol command.
#[derive(Debug, Clone)]
pub enum Command {
    MemRegionClaim { id: ResourceId, options: ClaimOptions, pid: u32 },
    MemRegionGetInfo { id: ResourceId },
    MemRegionRelease { token: Token, pid: u32 },
    MemRegionGetRefCount { id: ResourceId },
    MemRegionDecrementRef { id: ResourceId },
    MemRegionGetIdForSlot { device_index: usize, resource_index: usize },

    EventSrcClaim { id: ResourceId, options: ClaimOptions, pid: u32 },
    EventSrcGetInfo { id: ResourceId },
    EventSrcRelease { token: Token, pid: u32 },
    EventSrcGetRefCount { id: ResourceId },
    EventSrcDecrementRef { id: ResourceId },
    EventSrcGetIdForSlot { device_index: usize, resource_index: usize },
    EventSrcIsEnabled { token: Token },

    LimitsMaxDevices,
    LimitsMaxMemRegions,
    LimitsMaxEvents,

    DriverInfoForSlot { device_index: usize },
    HwInfoForSlot { device_index: usize },

    VersionInfo,

    /// Binds a pid to the janitor channel's session state. `Registry`
    /// itself holds no per-channel session; the caller (`janitor::Channel`)
    /// is responsible for remembering the pid and calling
    /// `Registry::cleanup_pid` when its channel closes.
    JanitorRegisterPid { pid: u32 },
}

/// A command plus the caller's library version, exactly as it would cross
/// the wire: every request carries the caller's library version code.
#[derive(Debug, Clone)]
pub struct ControlRequest {
    pub version: VersionCode,
    pub command: Command,
}

impl ControlRequest {
    pub fn new(version: VersionCode, command: Command) -> Self {
        Self { version, command }
    }
}

/// Response payloads, one variant per distinct shape the command table
/// requires.
#[derive(Debug, Clone)]
pub enum Response {
    MemRegionClaim(ClaimedMemRegion),
    MemRegionInfo {
        flags: ExportedFlags,
        len: u64,
        pa_len: u64,
        start_offset: u64,
    },
    EventSrcClaim(ClaimedEventSrc),
    EventSrcInfo {
        flags: ExportedFlags,
    },
    RefCount(u32),
    Id(ResourceId),
    Enabled(bool),
    Limit(usize),
    Text(String),
    VersionInfo {
        code: VersionCode,
        variant: &'static str,
        commit: String,
    },
    Ack,
}

impl Registry {
    /// Dispatches one control-protocol command, validating version
    /// compatibility first: every request checks that the major versions
    /// are compatible before anything else runs.
    pub fn dispatch(&self, req: ControlRequest) -> Result<Response> {
        if !req.version.is_compatible(CRATE_VERSION) {
            return Err(DevmuxError::VersionMismatch {
                local: CRATE_VERSION.pack(),
                peer: req.version.pack(),
            });
        }
        match req.command {
            Command::MemRegionClaim { id, options, pid } => {
                self.claim_memregion(&id, pid, options).map(Response::MemRegionClaim)
            }
            Command::MemRegionGetInfo { id } => {
                let (flags, len, pa_len, start_offset) = self.get_memregion_info(&id)?;
                Ok(Response::MemRegionInfo { flags, len, pa_len, start_offset })
            }
            Command::MemRegionRelease { token, pid } => {
                self.release_memregion(token, pid).map(|_| Response::Ack)
            }
            Command::MemRegionGetRefCount { id } => {
                self.get_memregion_ref_count(&id).map(Response::RefCount)
            }
            Command::MemRegionDecrementRef { id } => {
                self.decrement_memregion_ref(&id).map(Response::RefCount)
            }
            Command::MemRegionGetIdForSlot { device_index, resource_index } => self
                .get_id_for_slot(device_index, resource_index, crate::resource_id::ResourceKind::MemRegion)
                .map(Response::Id),

            Command::EventSrcClaim { id, options, pid } => {
                self.claim_eventsrc(&id, pid, options).map(Response::EventSrcClaim)
            }
            Command::EventSrcGetInfo { id } => {
                self.get_eventsrc_info(&id).map(|flags| Response::EventSrcInfo { flags })
            }
            Command::EventSrcRelease { token, pid } => {
                self.release_eventsrc(token, pid).map(|_| Response::Ack)
            }
            Command::EventSrcGetRefCount { id } => {
                self.get_eventsrc_ref_count(&id).map(Response::RefCount)
            }
            Command::EventSrcDecrementRef { id } => {
                self.decrement_eventsrc_ref(&id).map(Response::RefCount)
            }
            Command::EventSrcGetIdForSlot { device_index, resource_index } => self
                .get_id_for_slot(device_index, resource_index, crate::resource_id::ResourceKind::EventSrc)
                .map(Response::Id),
            Command::EventSrcIsEnabled { token } => {
                self.eventsrc_is_enabled(token).map(Response::Enabled)
            }

            Command::LimitsMaxDevices => Ok(Response::Limit(crate::registry::LIMITS.max_devices)),
            Command::LimitsMaxMemRegions => Ok(Response::Limit(crate::registry::LIMITS.max_mem_regions)),
            Command::LimitsMaxEvents => Ok(Response::Limit(crate::registry::LIMITS.max_events)),

            Command::DriverInfoForSlot { device_index } => {
                self.driver_info_for_slot(device_index).map(Response::Text)
            }
            Command::HwInfoForSlot { device_index } => {
                self.hw_info_for_slot(device_index).map(Response::Text)
            }

            Command::VersionInfo => {
                let info = BuildInfo::current(self.backend().variant());
                Ok(Response::VersionInfo {
                    code: CRATE_VERSION,
                    variant: info.variant,
                    commit: info.commit_id_string(),
                })
            }

            Command::JanitorRegisterPid { .. } => Ok(Response::Ack),
        }
    }
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
        dev.mem[0] = MemRegion::new("bar0", 0x1000, 4096, 0, 32, MemRegionType::Physical, RecordFlags::empty(), 4096);
        reg.manage(dev).unwrap();
        reg
    }

    #[test]
    fn version_mismatch_is_rejected() {
        let reg = registry_with_region();
        let req = ControlRequest::new(VersionCode::new(99, 0, 0), Command::LimitsMaxDevices);
        assert_eq!(
            reg.dispatch(req).unwrap_err(),
            DevmuxError::VersionMismatch { local: CRATE_VERSION.pack(), peer: VersionCode::new(99, 0, 0).pack() }
        );
    }

    #[test]
    fn claim_then_release_round_trips_through_dispatch() {
        let reg = registry_with_region();
        let id = ResourceId::new("grp", "dev", "bar0", 1).unwrap();
        let claim = reg
            .dispatch(ControlRequest::new(
                CRATE_VERSION,
                Command::MemRegionClaim { id: id.clone(), options: ClaimOptions::empty(), pid: 7 },
            ))
            .unwrap();
        let token = match claim {
            Response::MemRegionClaim(c) => c.token,
            _ => panic!("unexpected response"),
        };
        let count = reg
            .dispatch(ControlRequest::new(CRATE_VERSION, Command::MemRegionGetRefCount { id: id.clone() }))
            .unwrap();
        assert!(matches!(count, Response::RefCount(1)));
        reg.dispatch(ControlRequest::new(
            CRATE_VERSION,
            Command::MemRegionRelease { token, pid: 7 },
        ))
        .unwrap();
        let count = reg
            .dispatch(ControlRequest::new(CRATE_VERSION, Command::MemRegionGetRefCount { id }))
            .unwrap();
        assert!(matches!(count, Response::RefCount(0)));
    }

    #[test]
    fn limits_report_compile_time_constants() {
        let reg = registry_with_region();
        let resp = reg.dispatch(ControlRequest::new(CRATE_VERSION, Command::LimitsMaxDevices)).unwrap();
        assert!(matches!(resp, Response::Limit(crate::registry::MAX_MANAGED_DEVICES)));
    }
}
