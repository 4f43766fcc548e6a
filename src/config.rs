use std::env;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::exec::WaitPolicy;

pub const DEFAULT_SOCKET: &str = "/tmp/socket_seehell";

/// Settings read from `config.json`. Every field is optional.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub history_size: usize,
    pub log_level: String,
    pub log_file: Option<PathBuf>,
    pub socket_path: PathBuf,
    pub pipeline_wait: WaitPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            history_size: 64,
            log_level: "warn".to_string(),
            log_file: None,
            socket_path: PathBuf::from(DEFAULT_SOCKET),
            pipeline_wait: WaitPolicy::Each,
        }
    }
}

impl Config {
    /// Loads `explicit` if given, else `$SEEHELL_CONFIG`, else the per-user
    /// default file. Only the per-user default may be absent.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }
        if let Some(path) = env::var_os("SEEHELL_CONFIG") {
            return Self::from_file(Path::new(&path));
        }
        let Some(home) = env::var_os("HOME") else {
            return Ok(Config::default());
        };
        let path = Path::new(&home).join(".config/seehell/config.json");
        match fs::read_to_string(&path) {
            Ok(text) => Self::parse(&text).with_context(|| format!("parsing {}", path.display())),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Config::default()),
            Err(e) => Err(e).with_context(|| format!("reading {}", path.display())),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn parse(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}
