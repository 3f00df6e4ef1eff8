//! Logger setup for the command-line tool and native hosts.
//!
//! The library itself only emits through the `log` facade; whoever embeds it
//! decides whether and where those records go.

use anyhow::{Context, Result};
use simplelog::{
    ColorChoice, CombinedLogger, ConfigBuilder, LevelFilter, SharedLogger, TermLogger,
    TerminalMode, WriteLogger,
};
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

static INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Install a terminal logger and, when `log_file` is given, a file logger.
///
/// Only the first call has an effect.
pub fn init(level: LevelFilter, log_file: Option<&Path>) -> Result<()> {
    if INITIALIZED.swap(true, Ordering::SeqCst) {
        return Ok(());
    }

    let config = ConfigBuilder::new()
        .add_filter_allow_str("kindle_exporter")
        .add_filter_allow_str("kindle_export")
        .build();

    let mut loggers: Vec<Box<dyn SharedLogger>> = vec![TermLogger::new(
        level,
        config.clone(),
        TerminalMode::Stderr,
        ColorChoice::Auto,
    )];
    if let Some(path) = log_file {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .context(format!("Failed to open log file: {:?}", path))?;
        loggers.push(WriteLogger::new(level, config, file));
    }

    if let Err(e) = CombinedLogger::init(loggers) {
        // Another logger was installed by the host; keep using it.
        log::debug!("Logging: Logger already set: {e}");
    }
    Ok(())
}

/// Map a `--verbose` count to a level.
pub fn level_for_verbosity(verbose: u8) -> LevelFilter {
    match verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_levels() {
        assert_eq!(level_for_verbosity(0), LevelFilter::Info);
        assert_eq!(level_for_verbosity(1), LevelFilter::Debug);
        assert_eq!(level_for_verbosity(5), LevelFilter::Trace);
    }
}
