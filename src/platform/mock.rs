//! In-process stand-in for a platform back-end, used by unit and
//! integration tests so registry/control/client logic can be exercised
//! without a real device node, `mmap`, or interrupt line.

use super::{DeviceHandle, EventChannel, MappedWindow, PlatformBackend};
use crate::error::Result;
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Backing state for a mock event channel: a monotonic edge counter plus a
/// condvar so `wait`/`notify` behave like a real interrupt line.
pub struct MockEventHandle(Arc<MockEventInner>);

struct MockEventInner {
    /// (cumulative edge count, count as of the last successful wait).
    count: Mutex<(u64, u64)>,
    condvar: Condvar,
    enabled: Mutex<bool>,
}

impl Clone for MockEventHandle {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl MockEventHandle {
    fn new() -> Self {
        Self(Arc::new(MockEventInner {
            count: Mutex::new((0, 0)),
            condvar: Condvar::new(),
            enabled: Mutex::new(true),
        }))
    }

    /// Simulates a hardware interrupt edge. Multiple edges that occur while
    /// nobody is waiting coalesce into a single wakeup, but the returned
    /// count still reflects every edge.
    pub fn fire(&self) {
        let mut state = self.0.count.lock();
        state.0 += 1;
        self.0.condvar.notify_all();
    }

    /// Blocks until the cumulative count has advanced since the last
    /// successful wait, mirroring a 4-byte UIO interrupt-count read.
    pub(super) fn wait(&self, timeout: Option<Duration>) -> Result<u64> {
        let mut state = self.0.count.lock();
        if state.0 == state.1 {
            let timed_out = match timeout {
                Some(d) => {
                    let result = self.0.condvar.wait_for(&mut state, d);
                    result.timed_out() && state.0 == state.1
                }
                None => {
                    self.0.condvar.wait(&mut state);
                    false
                }
            };
            if timed_out {
                return Err(crate::error::DevmuxError::Timeout);
            }
        }
        state.1 = state.0;
        Ok(state.0)
    }

    pub(super) fn set_enabled(&self, enabled: bool) -> Result<()> {
        *self.0.enabled.lock() = enabled;
        Ok(())
    }

    pub fn is_enabled(&self) -> bool {
        *self.0.enabled.lock()
    }
}

#[derive(Default)]
pub struct MockBackend {
    next_minor: AtomicU32,
    events: Mutex<HashMap<String, MockEventHandle>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lets a test fire an interrupt edge on the event channel last opened
    /// for `path` (as returned by `path_for_event`).
    pub fn fire_event(&self, path: &str) {
        if let Some(handle) = self.events.lock().get(path) {
            handle.fire();
        }
    }
}

impl PlatformBackend for MockBackend {
    fn variant(&self) -> &'static str {
        "mock"
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

    fn path_for_region(&self, handle: &DeviceHandle, region_index: usize) -> String {
        format!("/mock/{},mapper{}", handle.unique_name, region_index)
    }

    fn path_for_event(&self, handle: &DeviceHandle) -> String {
        format!("/mock/{}", handle.unique_name)
    }

    fn mmap_offset(&self, region_index: usize) -> u64 {
        region_index as u64 * 4096
    }

    fn map_region(&self, _path: &str, _offset: u64, pa_len: u64) -> Result<MappedWindow> {
        // Heap-allocate a buffer and pretend its address is the mapped
        // window; there's no real device to back it.
        let layout = std::alloc::Layout::from_size_align(pa_len.max(1) as usize, 4096)
            .map_err(|_| crate::error::DevmuxError::Invalid("invalid region length"))?;
        let ptr = unsafe { std::alloc::alloc_zeroed(layout) };
        Ok(MappedWindow {
            base: ptr as usize,
            pa_len,
            fd: -1,
        })
    }

    fn open_event_channel(&self, path: &str) -> Result<EventChannel> {
        let mut events = self.events.lock();
        let handle = events
            .entry(path.to_string())
            .or_insert_with(MockEventHandle::new)
            .clone();
        Ok(EventChannel::Mock(handle))
    }

    fn wait_event(&self, channel: &EventChannel, timeout: Option<Duration>) -> Result<u64> {
        match channel {
            EventChannel::Mock(m) => m.wait(timeout),
            EventChannel::Fd(_) => Err(crate::error::DevmuxError::Invalid(
                "real event channel used with the mock backend",
            )),
        }
    }

    fn enable_event(&self, channel: &EventChannel) -> Result<()> {
        match channel {
            EventChannel::Mock(m) => m.set_enabled(true),
            EventChannel::Fd(_) => Err(crate::error::DevmuxError::Invalid(
                "real event channel used with the mock backend",
            )),
        }
    }

    fn disable_event(&self, channel: &EventChannel) -> Result<()> {
        match channel {
            EventChannel::Mock(m) => m.set_enabled(false),
            EventChannel::Fd(_) => Err(crate::error::DevmuxError::Invalid(
                "real event channel used with the mock backend",
            )),
        }
    }

    fn close_event_channel(&self, _channel: EventChannel) -> Result<()> {
        Ok(())
    }
}
