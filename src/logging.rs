use std::env;
use std::fs::OpenOptions;
use std::str::FromStr;

use anyhow::{anyhow, Context, Result};
use log::LevelFilter;
use simplelog::{ColorChoice, Config as LogConfig, TermLogger, TerminalMode, WriteLogger};

use crate::config::Config;

/// Level named by `$SEEHELL_LOG`, falling back to the configured one.
pub fn level(config: &Config) -> Result<LevelFilter> {
    let name = env::var("SEEHELL_LOG").unwrap_or_else(|_| config.log_level.clone());
    LevelFilter::from_str(&name).map_err(|_| anyhow!("unknown log level {name:?}"))
}

/// Installs the global logger: the terminal's error stream by default, or
/// `log_file` (appended) when configured.
pub fn init(config: &Config) -> Result<()> {
    let level = level(config)?;
    match &config.log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("opening log file {}", path.display()))?;
            WriteLogger::init(level, LogConfig::default(), file)?;
        }
        None => TermLogger::init(level, LogConfig::default(), TerminalMode::Stderr, ColorChoice::Auto)?,
    }
    Ok(())
}
