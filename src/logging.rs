use anyhow::Result;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// `RUST_LOG` wins over the `-v` count when set.
pub fn init(verbosity: u8) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(x) => x,
        Err(_) => EnvFilter::try_new(level(verbosity))?,
    };

    let layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_level(true)
        .compact();

    Registry::default().with(filter).with(layer).try_init()?;
    Ok(())
}

fn level(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_levels() {
        assert_eq!(level(0), "info");
        assert_eq!(level(1), "debug");
        assert_eq!(level(2), "trace");
        assert_eq!(level(9), "trace");
    }
}
