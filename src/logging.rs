use std::fs::OpenOptions;
use std::sync::Mutex;

use tracing_subscriber::EnvFilter;

use crate::config::LogConfig;
use crate::{Error, Result};

/// Install the global `tracing` subscriber.
///
/// `RUST_LOG` overrides `config.filter`. Output goes to `config.file` when
/// set, stderr otherwise.
pub fn init(config: &LogConfig) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => build_filter(&config.filter)?,
    };
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    let installed = match &config.file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            builder.with_ansi(false).with_writer(Mutex::new(file)).try_init()
        }
        None => builder.with_writer(std::io::stderr).try_init(),
    };
    installed.map_err(|err| Error::Logging(err.to_string()))?;

    tracing::debug!("Logging initialized with filter {:?}", config.filter);
    Ok(())
}

fn build_filter(directives: &str) -> Result<EnvFilter> {
    EnvFilter::try_new(directives).map_err(|err| Error::Logging(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_directives() {
        assert!(build_filter("info").is_ok());
        assert!(build_filter("treelens=trace,warn").is_ok());
        assert!(matches!(build_filter("treelens=loudly"), Err(Error::Logging(_))));
    }
}
