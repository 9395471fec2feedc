//! Tracing setup for internal diagnostics.
//!
//! Transfer status lines go through [`crate::logger::Logger`]; this only
//! covers debug/trace events (state transitions, dispatch).

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the tracing subscriber on stderr.
///
/// * `verbosity` - 0=warn, 1=info, 2=debug, 3+=trace
///
/// `RUST_LOG` overrides the level when set.
pub fn init_logging(verbosity: u8) -> anyhow::Result<()> {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("peerdrop={}", level)));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_file(verbosity >= 2)
                .with_line_number(verbosity >= 2),
        )
        .try_init()
        .map_err(|e| anyhow::anyhow!("init logging: {}", e))?;

    Ok(())
}
