//! Everything the manager needs to track devices and the resources they
//! expose: records, device descriptors, and the table that binds them.

pub mod device;
pub mod manager;
pub mod resource;

pub use device::{Device, MAX_DEV_EVENTS, MAX_DEV_MEM_REGIONS};
pub use manager::{
    ClaimOptions, ClaimedEventSrc, ClaimedMemRegion, DeviceSummary, Limits, Registry, RegistryGuard, Token,
    LIMITS, MAX_MANAGED_DEVICES,
};
pub use resource::{EventSrc, ExportedFlags, InterruptConfig, MemRegion, MemRegionType, RecordFlags, IRQ_CUSTOM, IRQ_NONE};
