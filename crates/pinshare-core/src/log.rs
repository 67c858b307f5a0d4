pub use tracing::{debug, error, info, trace, warn};

use crate::errors::LogError;

/// Sets up the logging system for the application.
///
/// Installs [`color_eyre`] error reporting and a [`tracing_subscriber`]
/// env-filtered formatter. `RUST_LIB_BACKTRACE` and `RUST_LOG` are given
/// sensible defaults when unset.
pub fn setup() -> Result<(), LogError> {
    use tracing_subscriber::EnvFilter;

    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        unsafe { std::env::set_var("RUST_LIB_BACKTRACE", "1") }
    }

    color_eyre::install().map_err(LogError::ColorEyre)?;

    if std::env::var("RUST_LOG").is_err() {
        unsafe { std::env::set_var("RUST_LOG", "info,pinshare_core=debug,pinshare_server=debug") }
    }

    tracing_subscriber::fmt::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init()
        .map_err(LogError::TracingSubscriber)?;

    Ok(())
}
