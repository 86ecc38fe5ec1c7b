//! Standardized logging utility.
//!
//! This module provides the `wlog!` macro which ensures one-shot lifecycle
//! diagnostics follow the `YYYY-MM-DD HH:MM:SS [MODULE] Message` format.
//! Everything else goes through `tracing`.

#[macro_export]
macro_rules! wlog {
    ($module:expr, $($arg:tt)*) => {{
        let now = chrono::Local::now();
        eprintln!("{} [{}] {}",
            now.format("%Y-%m-%d %H:%M:%S"),
            $module,
            format!($($arg)*)
        );
    }};
}

/// Standardized module identifiers
pub const MAIN: &str = "MAIN";
pub const COMPOSITOR: &str = "COMPOSITOR";
pub const SYNC: &str = "SYNC";
pub const X11: &str = "X11";
pub const GL: &str = "GL";

/// Initialize the `tracing` subscriber used by the binaries.
///
/// Defaults to `info,xsync_compositor=debug` when `RUST_LOG` is unset.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,xsync_compositor=debug"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::new("%Y-%m-%d %H:%M:%S".to_string()))
        .with_ansi(false)
        .try_init();
}
