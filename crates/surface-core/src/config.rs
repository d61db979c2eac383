//! Runtime configuration.
//!
//! Everything has a sensible default; hosts either build a [`BridgeConfig`]
//! directly or call [`BridgeConfig::from_env`] to honour the environment
//! overrides below.
//!
//! | Variable | Effect |
//! |---|---|
//! | `SURFACE_BRIDGE_VERBOSE_LOG` | driver diagnostics at `debug` level |
//! | `SURFACE_BRIDGE_PROFILE` | profiling mode, implies verbose |
//! | `SURFACE_BRIDGE_MAX_FPS` | frame-ready rate limit, `0` disables it |
//!
//! Boolean variables are enabled when set to anything except `0`, `false`
//! or `FALSE`.

use std::time::Duration;

use tracing::warn;

use crate::types::AdapterLuid;

pub const ENV_VERBOSE_LOG: &str = "SURFACE_BRIDGE_VERBOSE_LOG";
pub const ENV_PROFILE: &str = "SURFACE_BRIDGE_PROFILE";
pub const ENV_MAX_FPS: &str = "SURFACE_BRIDGE_MAX_FPS";

/// Default cap on frame-ready notifications per second.
pub const DEFAULT_MAX_FRAME_RATE: u32 = 60;

/// D3D11 and Metal both guarantee at least this texture extent.
pub const DEFAULT_MAX_TEXTURE_DIMENSION: u32 = 16_384;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    pub verbose: bool,
    pub profile: bool,
    /// Upper bound on frame-ready notifications per second. `0` disables
    /// the limit.
    pub max_frame_rate: u32,
    /// Allocation requests larger than this on either axis are refused.
    pub max_texture_dimension: u32,
    /// Adapter the host composites on. Render targets must be created there.
    pub preferred_adapter: Option<AdapterLuid>,
    /// Explicit `tracing` filter directive. `RUST_LOG` still wins when set.
    pub log_filter: Option<String>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            profile: false,
            max_frame_rate: DEFAULT_MAX_FRAME_RATE,
            max_texture_dimension: DEFAULT_MAX_TEXTURE_DIMENSION,
            preferred_adapter: None,
            log_filter: None,
        }
    }
}

impl BridgeConfig {
    /// Defaults overridden by the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let max_frame_rate = match lookup(ENV_MAX_FPS) {
            None => DEFAULT_MAX_FRAME_RATE,
            Some(raw) => raw.trim().parse::<u32>().unwrap_or_else(|_| {
                warn!("Ignoring {ENV_MAX_FPS}={raw:?}: not a frame rate");
                DEFAULT_MAX_FRAME_RATE
            }),
        };
        Self {
            verbose: is_env_enabled(lookup(ENV_VERBOSE_LOG).as_deref()),
            profile: is_env_enabled(lookup(ENV_PROFILE).as_deref()),
            max_frame_rate,
            ..Self::default()
        }
    }

    /// Verbose driver diagnostics are on in profile mode too.
    pub fn verbose_logging(&self) -> bool {
        self.verbose || self.profile
    }

    /// Minimum spacing between frame-ready notifications.
    pub fn frame_interval(&self) -> Duration {
        if self.max_frame_rate == 0 {
            Duration::ZERO
        } else {
            Duration::from_secs(1) / self.max_frame_rate
        }
    }
}

/// Interpret a boolean environment value.
pub fn is_env_enabled(value: Option<&str>) -> bool {
    match value {
        None => false,
        Some(v) => !matches!(v, "0" | "false" | "FALSE"),
    }
}
