//! Logging setup and configuration

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Highest verbosity accepted on the command line
pub const MAX_VERBOSITY: u8 = 5;

/// Map a 0-5 verbosity to an `EnvFilter` directive
///
/// 0 silences everything; 5 enables packet-level tracing.
pub fn verbosity_filter(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "off",
        1 => "error",
        2 => "warn",
        3 => "info",
        4 => "debug",
        _ => "trace",
    }
}

/// Setup tracing subscriber for the application
///
/// `RUST_LOG` takes precedence over `default_level` when set.
pub fn setup_logging(default_level: &str) -> crate::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .map_err(|e| crate::Error::Config(format!("Invalid log filter: {}", e)))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .try_init()
        .map_err(|e| crate::Error::Config(format!("Logging already initialized: {}", e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbosity_mapping() {
        assert_eq!(verbosity_filter(0), "off");
        assert_eq!(verbosity_filter(3), "info");
        assert_eq!(verbosity_filter(MAX_VERBOSITY), "trace");
        assert_eq!(verbosity_filter(42), "trace");
    }

    #[test]
    fn test_every_verbosity_is_a_valid_filter() {
        for v in 0..=MAX_VERBOSITY {
            assert!(EnvFilter::try_new(verbosity_filter(v)).is_ok());
        }
    }
}
