//! Real-time back-end: Xenomai RTDM device path conventions.
//! `pa_mmap_offset` is always `0` because each region gets its own
//! `mapper<N>` device node instead of sharing one node at different
//! offsets.

use super::{posix, DeviceHandle, EventChannel, MappedWindow, PlatformBackend};
use crate::error::{DevmuxError, Result};
use std::time::Duration;

#[derive(Default)]
pub struct RealTimeBackend;

impl RealTimeBackend {
    pub fn new() -> Self {
        Self
    }
}

impl PlatformBackend for RealTimeBackend {
    fn variant(&self) -> &'static str {
        "rtdm"
    }

    fn register_device(&self, unique_name: &str) -> Result<DeviceHandle> {
        Ok(DeviceHandle {
            minor: None,
            unique_name: unique_name.to_string(),
        })
    }

    fn unregister_device(&self, _handle: &DeviceHandle) -> Result<()> {
        Ok(())
    }

    fn path_for_region(&self, handle: &DeviceHandle, region_index: usize) -> String {
        format!("/dev/rtdm/{},mapper{}", handle.unique_name, region_index)
    }

    fn path_for_event(&self, handle: &DeviceHandle) -> String {
        format!("/dev/rtdm/{}", handle.unique_name)
    }

    fn mmap_offset(&self, _region_index: usize) -> u64 {
        0
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
            EventChannel::Mock(_) => Err(DevmuxError::Invalid(
                "mock event channel used with the real-time backend",
            )),
        }
    }

    fn enable_event(&self, channel: &EventChannel) -> Result<()> {
        match channel {
            EventChannel::Fd(fd) => posix::write_toggle(*fd, true),
            EventChannel::Mock(_) => Err(DevmuxError::Invalid(
                "mock event channel used with the real-time backend",
            )),
        }
    }

    fn disable_event(&self, channel: &EventChannel) -> Result<()> {
        match channel {
            EventChannel::Fd(fd) => posix::write_toggle(*fd, false),
            EventChannel::Mock(_) => Err(DevmuxError::Invalid(
                "mock event channel used with the real-time backend",
            )),
        }
    }

    fn close_event_channel(&self, channel: EventChannel) -> Result<()> {
        match channel {
            EventChannel::Fd(fd) => posix::close_fd(fd),
            EventChannel::Mock(_) => Err(DevmuxError::Invalid(
                "mock event channel used with the real-time backend",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn region_paths_use_mapper_suffix() {
        let backend = RealTimeBackend::new();
        let handle = backend.register_device("grp.dev.1").unwrap();
        assert_eq!(backend.path_for_region(&handle, 0), "/dev/rtdm/grp.dev.1,mapper0");
        assert_eq!(backend.path_for_event(&handle), "/dev/rtdm/grp.dev.1");
    }

    #[test]
    fn mmap_offset_is_always_zero() {
        let backend = RealTimeBackend::new();
        assert_eq!(backend.mmap_offset(0), 0);
        assert_eq!(backend.mmap_offset(4), 0);
    }
}
