use std::sync::atomic::{AtomicBool, Ordering};

/// Log target used by every message of this crate.
pub const TARGET: &str = "gdbmux";

static ENABLED: AtomicBool = AtomicBool::new(true);

#[inline(always)]
pub fn is_enabled() -> bool {
    ENABLED.load(Ordering::SeqCst)
}

pub fn disable() {
    ENABLED.store(false, Ordering::SeqCst)
}

pub fn enable() {
    ENABLED.store(true, Ordering::SeqCst)
}

/// Install `env_logger` as the global logger, `RUST_LOG` overrides the default filter.
pub fn init(default_filter: &str) {
    let env = env_logger::Env::default().default_filter_or(default_filter);
    _ = env_logger::Builder::from_env(env)
        .format_timestamp_millis()
        .try_init();
}

#[macro_export]
macro_rules! mux_info {
    ($($arg:tt)+) => {
        if $crate::log::is_enabled() {
            ::log::info!(target: $crate::log::TARGET, $($arg)+)
        }
    };
}

#[macro_export]
macro_rules! mux_warn {
    ($($arg:tt)+) => {
        if $crate::log::is_enabled() {
            ::log::warn!(target: $crate::log::TARGET, $($arg)+)
        }
    };
}

#[macro_export]
macro_rules! mux_error {
    ($($arg:tt)+) => {
        if $crate::log::is_enabled() {
            ::log::error!(target: $crate::log::TARGET, $($arg)+)
        }
    };
}

#[macro_export]
macro_rules! mux_debug {
    ($($arg:tt)+) => {
        if $crate::log::is_enabled() {
            ::log::debug!(target: $crate::log::TARGET, $($arg)+)
        }
    };
}
