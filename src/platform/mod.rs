//! External collaborators: the host-OS interrupt-delivery mechanism and
//! memory-mapping primitive, modeled as a single platform back-end
//! capability set rather than a pair of macro-selected code paths.
//!
//! The real-time and non-real-time variants diverge only in device path
//! format, `mmap` offset convention, and wait-primitive backing; everything
//! above this trait is identical across both.

mod mock;
mod nonrealtime;
mod posix;
mod realtime;

pub use mock::MockBackend;
pub use nonrealtime::NonRealTimeBackend;
pub use realtime::RealTimeBackend;

use crate::error::{DevmuxError, Result};
use std::time::Duration;

/// Opaque OS-level handle returned when a device is registered with the
/// host kernel. Stands in for "register the device with the host OS" as a
/// required but otherwise unspecified primitive — the original
/// `cuddlk_register_device()` is a stub that always returns `-1`.
#[derive(Debug, Clone)]
pub struct DeviceHandle {
    /// UIO minor number (non-real-time variant) assigned in registration
    /// order, or `None` for backends that don't use one.
    pub minor: Option<u32>,
    /// `<group>.<device>.<instance>` — used to build RTDM device paths.
    pub unique_name: String,
}

/// A page-aligned window mapped into this process's address space.
pub struct MappedWindow {
    pub base: usize,
    pub pa_len: u64,
    fd: i32,
}

impl Drop for MappedWindow {
    fn drop(&mut self) {
        if self.base != 0 {
            unsafe {
                libc::munmap(self.base as *mut libc::c_void, self.pa_len as usize);
            }
        }
        if self.fd >= 0 {
            unsafe {
                libc::close(self.fd);
            }
        }
    }
}

/// A wakeup endpoint opened for the calling process. The non-real-time
/// backend reads/writes 4 bytes on a real file descriptor; the mock
/// backend counts edges in memory so tests don't need a real device node.
pub enum EventChannel {
    Fd(i32),
    Mock(mock::MockEventHandle),
}

/// The five capabilities that make up the entire platform seam, plus
/// device (un)registration.
pub trait PlatformBackend: Send + Sync {
    fn variant(&self) -> &'static str;

    fn register_device(&self, unique_name: &str) -> Result<DeviceHandle>;
    fn unregister_device(&self, handle: &DeviceHandle) -> Result<()>;

    /// Device node path for memory region `region_index` of `handle`.
    fn path_for_region(&self, handle: &DeviceHandle, region_index: usize) -> String;
    /// Device node path for the (single) event source of `handle`.
    fn path_for_event(&self, handle: &DeviceHandle) -> String;
    /// `mmap` offset convention for memory region `region_index`.
    fn mmap_offset(&self, region_index: usize) -> u64;

    fn map_region(&self, path: &str, offset: u64, pa_len: u64) -> Result<MappedWindow>;

    fn open_event_channel(&self, path: &str) -> Result<EventChannel>;
    /// Blocks until the next interrupt edge (or `timeout` elapses).
    /// Returns the cumulative edge count since the channel was opened.
    fn wait_event(&self, channel: &EventChannel, timeout: Option<Duration>) -> Result<u64>;
    fn enable_event(&self, channel: &EventChannel) -> Result<()>;
    fn disable_event(&self, channel: &EventChannel) -> Result<()>;
    fn close_event_channel(&self, channel: EventChannel) -> Result<()>;
}

pub(crate) fn timeout_to_errno(e: std::io::Error) -> DevmuxError {
    if e.kind() == std::io::ErrorKind::WouldBlock || e.raw_os_error() == Some(libc::ETIMEDOUT) {
        DevmuxError::Timeout
    } else {
        e.into()
    }
}
