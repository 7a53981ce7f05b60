use crate::error::Result;
use config::{Config, File as ConfigFile};
use glob::Pattern;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::error;

/// 75% of a DVD+R, leaving room for parity data added by the image hook.
pub const DEFAULT_DISC_SIZE: u64 = 3_525_279_744;

pub const DEFAULT_EMAIL: &str = "your.email@address.here";

/// Repository settings, read once per invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    pub watch_dir: PathBuf,
    #[serde(default = "default_disc_size")]
    pub disc_size: u64,
    #[serde(default = "default_email")]
    pub email: String,
    #[serde(default)]
    pub ignore_patterns: Vec<String>,
}

fn default_disc_size() -> u64 {
    DEFAULT_DISC_SIZE
}

fn default_email() -> String {
    DEFAULT_EMAIL.to_string()
}

impl Settings {
    pub fn new(watch_dir: impl Into<PathBuf>) -> Self {
        Self {
            watch_dir: watch_dir.into(),
            disc_size: DEFAULT_DISC_SIZE,
            email: default_email(),
            ignore_patterns: Vec::new(),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let builder = Config::builder()
            .add_source(ConfigFile::from(path).required(true))
            .build()?;
        Ok(builder.try_deserialize::<Settings>()?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let text = toml::to_string_pretty(self)?;
        fs::write(path, text)?;
        Ok(())
    }

    /// Compile the ignore globs. Invalid patterns are logged and skipped.
    pub fn ignore_globs(&self) -> Vec<Pattern> {
        self.ignore_patterns
            .iter()
            .filter_map(|glob| match Pattern::new(glob) {
                Ok(p) => Some(p),
                Err(e) => {
                    error!("Invalid glob pattern '{}': {}", glob, e);
                    None
                }
            })
            .collect()
    }
}
