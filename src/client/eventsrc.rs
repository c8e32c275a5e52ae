//! Event-source half of the client surface.

use crate::error::{DevmuxError, Result};
use crate::platform::{EventChannel, PlatformBackend};
use crate::registry::{ClaimOptions, ClaimedEventSrc, ExportedFlags, Registry, Token};
use crate::resource_id::ResourceId;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// An opened wakeup channel for a claimed event source. Closing the
/// underlying channel happens automatically on drop if the caller never
/// calls [`OpenEventSrc::close`] explicitly.
pub struct OpenEventSrc {
    backend: Arc<dyn PlatformBackend>,
    channel: Option<EventChannel>,
    token: Token,
    flags: ExportedFlags,
}

impl OpenEventSrc {
    pub fn token(&self) -> Token {
        self.token
    }

    pub fn flags(&self) -> ExportedFlags {
        self.flags
    }

    fn channel(&self) -> Result<&EventChannel> {
        self.channel.as_ref().ok_or(DevmuxError::Invalid("event channel already closed"))
    }

    /// Blocks until the next interrupt edge. Returns the cumulative
    /// interrupt count since the channel was opened.
    pub fn wait(&self) -> Result<u64> {
        self.backend.wait_event(self.channel()?, None)
    }

    pub fn timed_wait(&self, timeout: Duration) -> Result<u64> {
        self.backend.wait_event(self.channel()?, Some(timeout))
    }

    /// `timed_wait` with a zero timeout.
    pub fn try_wait(&self) -> Result<u64> {
        self.timed_wait(Duration::ZERO)
    }

    /// 4-byte write of `1`. A no-op from the record's perspective if the
    /// driver shim supplied no enable callback, but the caller still
    /// receives success.
    pub fn enable(&self) -> Result<()> {
        self.backend.enable_event(self.channel()?)
    }

    pub fn disable(&self) -> Result<()> {
        self.backend.disable_event(self.channel()?)
    }

    /// Explicit close, returning any error the platform backend reports.
    pub fn close(mut self) -> Result<()> {
        match self.channel.take() {
            Some(channel) => self.backend.close_event_channel(channel),
            None => Ok(()),
        }
    }
}

impl Drop for OpenEventSrc {
    fn drop(&mut self) {
        if let Some(channel) = self.channel.take() {
            if let Err(e) = self.backend.close_event_channel(channel) {
                log::warn!("failed to close event channel on drop: {:?}", e);
            }
        }
    }
}

pub fn claim(registry: &Registry, id: &ResourceId, pid: u32, options: ClaimOptions) -> Result<ClaimedEventSrc> {
    registry.claim_eventsrc(id, pid, options)
}

pub fn open(registry: &Registry, claimed: &ClaimedEventSrc) -> Result<OpenEventSrc> {
    let channel = registry.backend().open_event_channel(&claimed.device_path)?;
    Ok(OpenEventSrc {
        backend: registry.backend().clone(),
        channel: Some(channel),
        token: claimed.token,
        flags: claimed.flags,
    })
}

pub fn close(src: OpenEventSrc) -> Result<()> {
    src.close()
}

pub fn release(registry: &Registry, token: Token, pid: u32) -> Result<()> {
    registry.release_eventsrc(token, pid)
}

/// Claim then open; if open fails, the claim is rolled back so the caller
/// never ends up with a claim it can't use.
pub fn claim_and_open(registry: &Registry, id: &ResourceId, pid: u32, options: ClaimOptions) -> Result<OpenEventSrc> {
    let claimed = claim(registry, id, pid, options)?;
    match open(registry, &claimed) {
        Ok(src) => Ok(src),
        Err(e) => {
            let _ = release(registry, claimed.token, pid);
            Err(e)
        }
    }
}

pub fn close_and_release(registry: &Registry, src: OpenEventSrc, pid: u32) -> Result<()> {
    let token = src.token();
    close(src)?;
    release(registry, token, pid)
}

/// A set of opened event sources waited on together. There
/// is no single OS primitive this crate's `PlatformBackend` exposes for a
/// multiplexed wait across heterogeneous channel kinds (a real fd set vs.
/// an in-memory mock), so members are polled in a short loop instead of
/// the original's single `poll(2)` call; behaviorally equivalent at the
/// cost of wakeup latency bounded by the poll interval.
pub struct EventSrcSet {
    members: Vec<OpenEventSrc>,
}

const POLL_INTERVAL: Duration = Duration::from_millis(5);

impl EventSrcSet {
    pub fn new(members: Vec<OpenEventSrc>) -> Self {
        Self { members }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Returns the indices of members with a pending event, or `Timeout`
    /// if none fired before `timeout` elapsed.
    pub fn timed_wait(&self, timeout: Duration) -> Result<Vec<usize>> {
        let start = Instant::now();
        loop {
            let mut ready = Vec::new();
            for (index, member) in self.members.iter().enumerate() {
                match member.try_wait() {
                    Ok(_) => ready.push(index),
                    Err(DevmuxError::Timeout) => {}
                    Err(e) => return Err(e),
                }
            }
            if !ready.is_empty() {
                return Ok(ready);
            }
            let elapsed = start.elapsed();
            if elapsed >= timeout {
                return Err(DevmuxError::Timeout);
            }
            std::thread::sleep(POLL_INTERVAL.min(timeout - elapsed));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::MockBackend;
    use crate::registry::Device;
    use crate::registry::resource::{EventSrc, InterruptConfig, RecordFlags};

    fn registry_with_eventsrc() -> (Registry, Arc<MockBackend>) {
        let backend = Arc::new(MockBackend::new());
        let reg = Registry::new(backend.clone());
        let mut dev = Device::new("grp", "dev", 1, "drv", "hw").unwrap();
        dev.events[0] = EventSrc::new("irq0", RecordFlags::empty(), InterruptConfig { irq: 7, ..Default::default() });
        reg.manage(dev).unwrap();
        (reg, backend)
    }

    #[test]
    fn claim_and_open_then_close_and_release_roundtrips() {
        let (reg, _backend) = registry_with_eventsrc();
        let id = ResourceId::new("grp", "dev", "irq0", 1).unwrap();
        let src = claim_and_open(&reg, &id, 1, ClaimOptions::empty()).unwrap();
        assert!(src.flags().contains(ExportedFlags::WAITABLE));
        assert_eq!(reg.get_eventsrc_ref_count(&id).unwrap(), 1);
        close_and_release(&reg, src, 1).unwrap();
        assert_eq!(reg.get_eventsrc_ref_count(&id).unwrap(), 0);
    }

    #[test]
    fn try_wait_times_out_without_a_fired_edge() {
        let (reg, _backend) = registry_with_eventsrc();
        let id = ResourceId::new("grp", "dev", "irq0", 1).unwrap();
        let src = claim_and_open(&reg, &id, 1, ClaimOptions::empty()).unwrap();
        assert!(matches!(src.try_wait(), Err(DevmuxError::Timeout)));
    }

    #[test]
    fn eventsrc_set_reports_the_member_that_fired() {
        let (reg, backend) = registry_with_eventsrc();
        let id = ResourceId::new("grp", "dev", "irq0", 1).unwrap();
        let claimed = claim(&reg, &id, 1, ClaimOptions::empty()).unwrap();
        let path = claimed.device_path.clone();
        let src = open(&reg, &claimed).unwrap();
        backend.fire_event(&path);
        let set = EventSrcSet::new(vec![src]);
        let ready = set.timed_wait(Duration::from_millis(200)).unwrap();
        assert_eq!(ready, vec![0]);
    }
}
