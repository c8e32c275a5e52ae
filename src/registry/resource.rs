//! Reference-counted resource records: `MemRegion` and `EventSrc`.

use crate::error::{DevmuxError, Result};
use bitflags::bitflags;
use parking_lot::Mutex;
use std::sync::Arc;

bitflags! {
    /// Kernel-side flags carried by both memory regions and event sources.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RecordFlags: u32 {
        const SHARED = 1 << 0;
    }
}

bitflags! {
    /// Flags exported to the control-channel client on a successful claim.
    /// `WAITABLE`/`HAS_*` are derived from what the driver shim actually
    /// supplied, not carried in the kernel-side record itself.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ExportedFlags: u32 {
        const SHARED = 1 << 0;
        const WAITABLE = 1 << 1;
        const HAS_ENABLE = 1 << 2;
        const HAS_DISABLE = 1 << 3;
        const HAS_IS_ENABLED = 1 << 4;
    }
}

/// Guards a resource's reference count; acquired while the caller already
/// holds the registry's global lock.
#[derive(Debug, Default)]
pub(crate) struct RefGuard {
    count: Mutex<u32>,
}

impl RefGuard {
    fn claim(&self, shared: bool, hostile: bool) -> Result<u32> {
        let mut count = self.count.lock();
        if *count > 0 && !shared && !hostile {
            return Err(DevmuxError::Busy);
        }
        *count += 1;
        Ok(*count)
    }

    fn decrement(&self) -> Result<u32> {
        let mut count = self.count.lock();
        if *count == 0 {
            return Err(DevmuxError::Underflow);
        }
        *count -= 1;
        Ok(*count)
    }

    fn get(&self) -> u32 {
        *self.count.lock()
    }

    /// Emergency override used by recovery tools: forces the count back down even past what a matched
    /// release would have removed.
    fn force_decrement(&self) -> Result<u32> {
        self.decrement()
    }
}

/// Type of memory exposed by a `MemRegion`. `None` marks an
/// unused device slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MemRegionType {
    #[default]
    None,
    Physical,
    Logical,
    Virtual,
}

/// A memory-mapped I/O window advertised by a device.
#[derive(Debug)]
pub struct MemRegion {
    pub name: String,
    pub pa_addr: u64,
    pub pa_len: u64,
    pub start_offset: u64,
    pub len: u64,
    pub mem_type: MemRegionType,
    pub flags: RecordFlags,
    refs: RefGuard,
}

impl Default for MemRegion {
    fn default() -> Self {
        Self::empty()
    }
}

impl MemRegion {
    /// An unused array slot (`type == None` marks it empty).
    pub fn empty() -> Self {
        Self {
            name: String::new(),
            pa_addr: 0,
            pa_len: 0,
            start_offset: 0,
            len: 0,
            mem_type: MemRegionType::None,
            flags: RecordFlags::empty(),
            refs: RefGuard::default(),
        }
    }

    /// Registers a memory region, deriving `pa_len`/`len` from
    /// `start_offset`/`len`/`pa_len`: a zero `pa_len` is computed from
    /// `start_offset + len` rounded up to the page size; a zero `len` is
    /// set to `pa_len`.
    pub fn new(
        name: impl Into<String>,
        pa_addr: u64,
        pa_len: u64,
        start_offset: u64,
        len: u64,
        mem_type: MemRegionType,
        flags: RecordFlags,
        page_size: u64,
    ) -> Self {
        let mut pa_len = pa_len;
        let mut len = len;
        if pa_len == 0 {
            let needed = start_offset + len;
            pa_len = ((needed + page_size - 1) / page_size) * page_size;
        }
        if len == 0 {
            len = pa_len;
        }
        Self {
            name: name.into(),
            pa_addr,
            pa_len,
            start_offset,
            len,
            mem_type,
            flags,
            refs: RefGuard::default(),
        }
    }

    pub fn is_empty_slot(&self) -> bool {
        self.mem_type == MemRegionType::None
    }

    pub fn ref_count(&self) -> u32 {
        self.refs.get()
    }

    pub fn claim(&self, hostile: bool) -> Result<u32> {
        self.refs.claim(self.flags.contains(RecordFlags::SHARED), hostile)
    }

    pub fn decrement(&self) -> Result<u32> {
        self.refs.decrement()
    }

    pub fn force_decrement(&self) -> Result<u32> {
        self.refs.force_decrement()
    }

    pub fn exported_flags(&self) -> ExportedFlags {
        let mut flags = ExportedFlags::empty();
        if self.flags.contains(RecordFlags::SHARED) {
            flags |= ExportedFlags::SHARED;
        }
        flags
    }
}

/// Reserved IRQ value marking an event source slot as unused.
pub const IRQ_NONE: i32 = -1;
/// IRQ value indicating `EventSrc::notify` is driven programmatically
/// rather than by a hardware line.
pub const IRQ_CUSTOM: i32 = -2;

/// Interrupt plumbing for an event source: handler/enable/disable/
/// is-enabled hooks supplied by the driver shim. The core never
/// calls these directly except via the platform back-end; they are
/// modeled as optional callbacks so a shim can omit any subset.
#[derive(Clone)]
pub struct InterruptConfig {
    pub irq: i32,
    pub flags: RecordFlags,
    pub enable: Option<Arc<dyn Fn() + Send + Sync>>,
    pub disable: Option<Arc<dyn Fn() + Send + Sync>>,
    pub is_enabled: Option<Arc<dyn Fn() -> bool + Send + Sync>>,
}

impl std::fmt::Debug for InterruptConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterruptConfig")
            .field("irq", &self.irq)
            .field("flags", &self.flags)
            .field("has_enable", &self.enable.is_some())
            .field("has_disable", &self.disable.is_some())
            .field("has_is_enabled", &self.is_enabled.is_some())
            .finish()
    }
}

impl Default for InterruptConfig {
    fn default() -> Self {
        Self {
            irq: IRQ_NONE,
            flags: RecordFlags::empty(),
            enable: None,
            disable: None,
            is_enabled: None,
        }
    }
}

/// A named wakeup channel, usually backed by a hardware interrupt.
/// `intr.irq == IRQ_NONE` marks an unused device slot.
#[derive(Debug)]
pub struct EventSrc {
    pub name: String,
    pub flags: RecordFlags,
    pub intr: InterruptConfig,
    refs: RefGuard,
}

impl Default for EventSrc {
    fn default() -> Self {
        Self::empty()
    }
}

impl EventSrc {
    pub fn empty() -> Self {
        Self {
            name: String::new(),
            flags: RecordFlags::empty(),
            intr: InterruptConfig::default(),
            refs: RefGuard::default(),
        }
    }

    pub fn new(name: impl Into<String>, flags: RecordFlags, intr: InterruptConfig) -> Self {
        Self {
            name: name.into(),
            flags,
            intr,
            refs: RefGuard::default(),
        }
    }

    pub fn is_empty_slot(&self) -> bool {
        self.intr.irq == IRQ_NONE
    }

    pub fn ref_count(&self) -> u32 {
        self.refs.get()
    }

    pub fn claim(&self, hostile: bool) -> Result<u32> {
        self.refs.claim(self.flags.contains(RecordFlags::SHARED), hostile)
    }

    pub fn decrement(&self) -> Result<u32> {
        self.refs.decrement()
    }

    pub fn force_decrement(&self) -> Result<u32> {
        self.refs.force_decrement()
    }

    /// An eventsrc claim always sets `WAITABLE` in addition to
    /// whatever enable/disable/is-enabled callbacks the shim supplied.
    pub fn exported_flags(&self) -> ExportedFlags {
        let mut flags = ExportedFlags::WAITABLE;
        if self.flags.contains(RecordFlags::SHARED) {
            flags |= ExportedFlags::SHARED;
        }
        if self.intr.enable.is_some() {
            flags |= ExportedFlags::HAS_ENABLE;
        }
        if self.intr.disable.is_some() {
            flags |= ExportedFlags::HAS_DISABLE;
        }
        if self.intr.is_enabled.is_some() {
            flags |= ExportedFlags::HAS_IS_ENABLED;
        }
        flags
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exclusive_claim_then_second_claim_is_busy() {
        let region = MemRegion::new("bar0", 0x1000, 0, 0x10, 32, MemRegionType::Physical, RecordFlags::empty(), 4096);
        assert_eq!(region.claim(false).unwrap(), 1);
        assert_eq!(region.claim(false).unwrap_err(), DevmuxError::Busy);
        assert_eq!(region.decrement().unwrap(), 0);
        assert_eq!(region.claim(false).unwrap(), 1);
    }

    #[test]
    fn shared_region_allows_concurrent_claims() {
        let region = MemRegion::new("bar0", 0x1000, 0, 0, 32, MemRegionType::Physical, RecordFlags::SHARED, 4096);
        assert_eq!(region.claim(false).unwrap(), 1);
        assert_eq!(region.claim(false).unwrap(), 2);
    }

    #[test]
    fn hostile_claim_overrides_exclusive_busy() {
        let region = MemRegion::new("bar0", 0x1000, 0, 0, 32, MemRegionType::Physical, RecordFlags::empty(), 4096);
        region.claim(false).unwrap();
        assert_eq!(region.claim(true).unwrap(), 2);
    }

    #[test]
    fn decrement_on_zero_is_underflow() {
        let region = MemRegion::empty();
        assert_eq!(region.decrement().unwrap_err(), DevmuxError::Underflow);
    }

    #[test]
    fn zero_pa_len_rounds_up_from_offset_and_len() {
        let region = MemRegion::new("r", 0, 0, 0x10, 32, MemRegionType::Physical, RecordFlags::empty(), 4096);
        assert_eq!(region.pa_len, 4096);
        assert_eq!(region.len, 32);
    }

    #[test]
    fn zero_len_defaults_to_pa_len() {
        let region = MemRegion::new("r", 0, 8192, 0, 0, MemRegionType::Physical, RecordFlags::empty(), 4096);
        assert_eq!(region.len, 8192);
    }

    #[test]
    fn eventsrc_claim_always_reports_waitable() {
        let src = EventSrc::new("irq0", RecordFlags::empty(), InterruptConfig { irq: 7, ..Default::default() });
        assert!(src.exported_flags().contains(ExportedFlags::WAITABLE));
    }

    #[test]
    fn empty_eventsrc_slot_has_irq_none() {
        let src = EventSrc::empty();
        assert!(src.is_empty_slot());
        assert_eq!(src.intr.irq, IRQ_NONE);
    }
}
