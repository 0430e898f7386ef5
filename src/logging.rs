//! Diagnostic logging setup.
//!
//! Logs go to stderr so stdout stays reserved for data output. `RUST_LOG` wins over the
//! verbosity flag when set.

use anyhow::{anyhow, Result};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Default filter directive for a given `-v` count.
pub fn default_directive(verbose: u8) -> &'static str {
    match verbose {
        0 => "warn",
        1 => "analyst_cli=info,warn",
        _ => "analyst_cli=debug,info",
    }
}

pub fn init_logging(verbose: u8) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directive(verbose)))
        .map_err(|e| anyhow!("invalid log filter: {e}"))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(verbose > 1)
                .compact(),
        )
        .try_init()
        .map_err(|e| anyhow!("failed to install log subscriber: {e}"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_raises_crate_level() {
        assert_eq!(default_directive(0), "warn");
        assert!(default_directive(1).contains("analyst_cli=info"));
        assert!(default_directive(5).contains("analyst_cli=debug"));
        for v in 0..3 {
            assert!(EnvFilter::try_new(default_directive(v)).is_ok());
        }
    }
}
