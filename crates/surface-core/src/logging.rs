//! `tracing` subscriber setup.
//!
//! Hosts that already install a global subscriber can skip this entirely;
//! both entry points are idempotent and never fail the caller.

use std::sync::Once;

use tracing::error;
use tracing_subscriber::EnvFilter;

use crate::config::BridgeConfig;

static LOGGING_INIT_ONCE: Once = Once::new();
static PANIC_HOOK_ONCE: Once = Once::new();

/// Install a fmt subscriber filtered by `RUST_LOG`, falling back to the
/// configured filter, then to `info` (`debug` when verbose).
///
/// Returns `true` if this call installed the subscriber.
pub fn init_logging(config: &BridgeConfig) -> bool {
    let mut installed = false;
    LOGGING_INIT_ONCE.call_once(|| {
        let fallback = config
            .log_filter
            .clone()
            .unwrap_or_else(|| default_directive(config).to_string());
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
        installed = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_names(true)
            .try_init()
            .is_ok();
    });
    installed
}

/// Record panics through `tracing` before the previous hook runs.
pub fn install_panic_logger() {
    PANIC_HOOK_ONCE.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            let thread = std::thread::current();
            error!(
                thread = thread.name().unwrap_or("<unnamed>"),
                "panic: {info}"
            );
            previous(info);
        }));
    });
}

fn default_directive(config: &BridgeConfig) -> &'static str {
    if config.verbose_logging() {
        "debug"
    } else {
        "info"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_is_a_no_op() {
        let config = BridgeConfig::default();
        init_logging(&config);
        assert!(!init_logging(&config));
    }

    #[test]
    fn verbose_raises_default_level() {
        let config = BridgeConfig {
            verbose: true,
            ..BridgeConfig::default()
        };
        assert_eq!(default_directive(&config), "debug");
        assert_eq!(default_directive(&BridgeConfig::default()), "info");
    }
}
