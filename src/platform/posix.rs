//! Shared POSIX primitives used by both real-time and non-real-time
//! back-ends: `open`/`mmap`/`read`/`write`/`poll` on a device node. The two
//! variants differ only in the paths and offsets they hand to these
//! functions.

use super::{timeout_to_errno, EventChannel, MappedWindow};
use crate::error::{DevmuxError, Result};
use std::ffi::CString;
use std::os::unix::io::RawFd;
use std::time::Duration;

pub(super) fn open_rw(path: &str) -> Result<RawFd> {
    let c_path = CString::new(path)
        .map_err(|_| DevmuxError::Invalid("device path contains an interior NUL"))?;
    let fd = unsafe { libc::open(c_path.as_ptr(), libc::O_RDWR | libc::O_CLOEXEC) };
    if fd < 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    Ok(fd)
}

pub(super) fn map_region(path: &str, offset: u64, pa_len: u64) -> Result<MappedWindow> {
    let fd = open_rw(path)?;
    let base = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            pa_len as usize,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_SHARED,
            fd,
            offset as libc::off_t,
        )
    };
    if base == libc::MAP_FAILED {
        let err = std::io::Error::last_os_error();
        unsafe {
            libc::close(fd);
        }
        return Err(err.into());
    }
    Ok(MappedWindow {
        base: base as usize,
        pa_len,
        fd,
    })
}

pub(super) fn open_event_channel(path: &str) -> Result<EventChannel> {
    Ok(EventChannel::Fd(open_rw(path)?))
}

pub(super) fn wait_event(fd: RawFd, timeout: Option<Duration>) -> Result<u64> {
    if let Some(timeout) = timeout {
        let millis = timeout.as_millis().min(i32::MAX as u128) as i32;
        let mut poll_fd = libc::pollfd {
            fd,
            events: libc::POLLIN,
            revents: 0,
        };
        let rc = unsafe { libc::poll(&mut poll_fd, 1, millis) };
        if rc == 0 {
            return Err(DevmuxError::Timeout);
        }
        if rc < 0 {
            return Err(timeout_to_errno(std::io::Error::last_os_error()));
        }
    }
    let mut count: u32 = 0;
    let n = unsafe {
        libc::read(
            fd,
            &mut count as *mut u32 as *mut libc::c_void,
            std::mem::size_of::<u32>(),
        )
    };
    if n < 0 {
        return Err(timeout_to_errno(std::io::Error::last_os_error()));
    }
    Ok(count as u64)
}

pub(super) fn write_toggle(fd: RawFd, enable: bool) -> Result<()> {
    let value: u32 = if enable { 1 } else { 0 };
    let n = unsafe {
        libc::write(
            fd,
            &value as *const u32 as *const libc::c_void,
            std::mem::size_of::<u32>(),
        )
    };
    if n < 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    Ok(())
}

pub(super) fn close_fd(fd: RawFd) -> Result<()> {
    if unsafe { libc::close(fd) } < 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    Ok(())
}
