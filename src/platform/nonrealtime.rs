//! Non-real-time back-end: Linux UIO device path and `mmap` offset
//! conventions.

use super::{posix, DeviceHandle, EventChannel, MappedWindow, PlatformBackend};
use crate::error::Result;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

/// Page size used to compute `mmap` offsets for successive memory regions.
/// Cached on first use; UIO/UDD always page-align regions on the host.
fn page_size() -> u64 {
    static CACHED: AtomicU32 = AtomicU32::new(0);
    let cached = CACHED.load(Ordering::Relaxed);
    if cached != 0 {
        return cached as u64;
    }
    let sz = unsafe { libc::sysconf(libc::_SC_PAGESIZE) } as u32;
    CACHED.store(sz, Ordering::Relaxed);
    sz as u64
}

/// Allocates UIO minor numbers in registration order, the way the kernel's
/// UIO core does (`/dev/uio0`, `/dev/uio1`, ...).
#[derive(Default)]
pub struct NonRealTimeBackend {
    next_minor: AtomicU32,
}

impl NonRealTimeBackend {
    pub fn new() -> Self {
        Self {
            next_minor: AtomicU32::new(0),
        }
    }
}

impl PlatformBackend for NonRealTimeBackend {
    fn variant(&self) -> &'static str {
        "uio"
    }

    fn register_device(&self, unique_name: &str) -> Result<DeviceHandle> {
        let minor = self.next_minor.fetch_add(1, Ordering::SeqCst);
        Ok(DeviceHandle {
            minor: Some(minor),
            unique_name: unique_name.to_string(),
        })
    }

    fn unregister_device(&self, _handle: &DeviceHandle) -> Result<()> {
        Ok(())
    }

    fn path_for_region(&self, handle: &DeviceHandle, _region_index: usize) -> String {
        format!("/dev/uio{}", handle.minor.unwrap_or_default())
    }

    fn path_for_event(&self, handle: &DeviceHandle) -> String {
        format!("/dev/uio{}", handle.minor.unwrap_or_default())
    }

    fn mmap_offset(&self, region_index: usize) -> u64 {
        region_index as u64 * page_size()
    }

    fn map_region(&self, path: &str, offset: u64, pa_len: u64) -> Result<MappedWindow> {
        posix::map_region(path, offset, pa_len)
    }

    fn open_event_channel(&self, path: &str) -> Result<EventChannel> {
        posix::open_event_channel(path)
    }

    fn wait_event(&self, channel: &EventChannel, timeout: Option<Duration>) -> Result<u64> {
        match channel {
            EventChannel::Fd(fd) => posix::wait_event(*fd, timeout),
            EventChannel::Mock(_) => Err(crate::error::DevmuxError::Invalid(
                "mock event channel used with the non-real-time backend",
            )),
        }
    }

    fn enable_event(&self, channel: &EventChannel) -> Result<()> {
        match channel {
            EventChannel::Fd(fd) => posix::write_toggle(*fd, true),
            EventChannel::Mock(_) => Err(crate::error::DevmuxError::Invalid(
                "mock event channel used with the non-real-time backend",
            )),
        }
    }

    fn disable_event(&self, channel: &EventChannel) -> Result<()> {
        match channel {
            EventChannel::Fd(fd) => posix::write_toggle(*fd, false),
            EventChannel::Mock(_) => Err(crate::error::DevmuxError::Invalid(
                "mock event channel used with the non-real-time backend",
            )),
        }
    }

    fn close_event_channel(&self, channel: EventChannel) -> Result<()> {
        match channel {
            EventChannel::Fd(fd) => posix::close_fd(fd),
            EventChannel::Mock(_) => Err(crate::error::DevmuxError::Invalid(
                "mock event channel used with the non-real-time backend",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minors_assigned_in_registration_order() {
        let backend = NonRealTimeBackend::new();
        let a = backend.register_device("g.d.1").unwrap();
        let b = backend.register_device("g.d.2").unwrap();
        assert_eq!(a.minor, Some(0));
        assert_eq!(b.minor, Some(1));
    }

    #[test]
    fn mmap_offset_is_region_times_page_size() {
        let backend = NonRealTimeBackend::new();
        assert_eq!(backend.mmap_offset(0), 0);
        assert_eq!(backend.mmap_offset(2), 2 * page_size());
    }

    #[test]
    fn region_and_event_paths_share_the_uio_node() {
        let backend = NonRealTimeBackend::new();
        let handle = backend.register_device("g.d.1").unwrap();
        assert_eq!(backend.path_for_region(&handle, 3), "/dev/uio0");
        assert_eq!(backend.path_for_event(&handle), "/dev/uio0");
    }
}
