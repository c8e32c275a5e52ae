//! devmux — a cross-platform, in-process device resource mediator.
//!
//! Driver shims register devices with a [`Registry`]; user-space processes
//! discover, claim, map or open, wait on, and release the memory regions
//! and event sources those devices expose; a janitor channel reclaims
//! anything a process still held when it exits.
//!
//! # Architecture
//!
//! ```text
//! driver shim ── manage()        ──▶ Registry
//! client      ── control command ──▶ Registry ── ref++/ref-- ──▶ MemRegion / EventSrc
//! client      ◀── response/token ──
//! client      ── map/open        ──▶ PlatformBackend (mmap, open, poll)
//! client      ── wait/read/write ──▶ PlatformBackend
//! process exit ── janitor close  ──▶ Registry (decrement every ref the pid held)
//! ```
//!
//! Two first-class [`platform::PlatformBackend`] implementations cover the
//! two device-path conventions this crate targets — [`platform::RealTimeBackend`]
//! for Xenomai-style RTDM paths and [`platform::NonRealTimeBackend`] for Linux
//! UIO paths — plus an in-memory [`platform::MockBackend`] used throughout the
//! test suite.
//!
//! # Quick start
//!
//! ```rust,ignore
//! use devmux::client::memregion;
//! use devmux::registry::{ClaimOptions, Registry};
//! use devmux::resource_id::ResourceId;
//! use std::sync::Arc;
//!
//! let registry = Registry::new(Arc::new(devmux::platform::NonRealTimeBackend::new()));
//! let id = ResourceId::new("acme", "adc0", "bar0", 1)?;
//! let region = memregion::claim_and_map(&registry, &id, std::process::id(), ClaimOptions::empty())?;
//! println!("mapped {} bytes at {:#x}", region.len(), region.addr());
//! memregion::unmap_and_release(&registry, region, std::process::id())?;
//! # Ok::<(), devmux::error::DevmuxError>(())
//! ```

pub mod client;
pub mod config;
pub mod control;
pub mod error;
pub mod janitor;
pub mod platform;
pub mod registry;
pub mod resource_id;
pub mod version;

pub use error::{DevmuxError, Result};
pub use registry::{ClaimOptions, Registry, Token};
pub use resource_id::ResourceId;
pub use version::{BuildInfo, VersionCode};
