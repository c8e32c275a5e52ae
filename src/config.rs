//! Runtime configuration: which `PlatformBackend` variant to construct and
//! how chatty it should be, read once at startup rather than consulted
//! throughout the codebase. Mirrors the compile-time option flags the
//! original exposes as preprocessor defines (`common_compilation_opts.h`)
//! with environment variables, since this crate has no separate build
//! step.

use std::env;

/// Which platform backend a process should use and how verbosely it
/// should log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlatformConfig {
    /// Forces the non-real-time (UIO-style) backend even on a system where
    /// the real-time backend would otherwise be selected. Useful for
    /// running integration tests on a desktop kernel without Xenomai.
    pub force_non_realtime: bool,
    /// Enables verbose per-operation debug logging in addition to the
    /// normal `info`/`warn` lines.
    pub enable_debug_print: bool,
    /// Enables the noisier, lock-acquisition-level debug logging reserved
    /// for diagnosing concurrency bugs; off by default even when
    /// `enable_debug_print` is set, matching the original's two-tier
    /// debug/"intrusive debug" split.
    pub enable_intrusive_debug_print: bool,
}

impl PlatformConfig {
    /// Reads the three environment overrides once. Any value other than
    /// an empty or unset variable (including `"0"`) enables the flag —
    /// matching shell convention for presence-as-truth toggles rather than
    /// parsing `"true"`/`"false"`.
    pub fn from_env() -> Self {
        Self {
            force_non_realtime: env_flag("DEVMUX_FORCE_NON_REALTIME"),
            enable_debug_print: env_flag("DEVMUX_ENABLE_DEBUG_PRINT"),
            enable_intrusive_debug_print: env_flag("DEVMUX_ENABLE_INTRUSIVE_DEBUG_PRINT"),
        }
    }
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            force_non_realtime: false,
            enable_debug_print: false,
            enable_intrusive_debug_print: false,
        }
    }
}

fn env_flag(name: &str) -> bool {
    match env::var(name) {
        Ok(v) => !v.is_empty(),
        Err(_) => false,
    }
}
