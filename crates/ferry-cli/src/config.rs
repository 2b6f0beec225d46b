//! Configuration file parsing for ferry.toml.

use ferry_loader::{BootSettings, Conversion};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Main configuration structure.
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    /// Paths, boot batches and queue knobs
    #[serde(default)]
    pub boot: BootSettings,

    /// Host the resources are loaded from
    #[serde(default)]
    pub host: HostConfig,
}

/// Loading mechanism the filesystem host offers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum HostKind {
    /// Blocking loads
    Worker,
    /// Native module imports
    #[default]
    Module,
    /// Script injection through the queue engine
    Queue,
}

/// Host configuration.
#[derive(Debug, Default, Deserialize)]
pub struct HostConfig {
    #[serde(default)]
    pub kind: HostKind,

    /// Directory URLs are mapped under; relative to the config file
    pub base_dir: Option<PathBuf>,

    /// Runtime script the queue host executes before its first import
    pub queue_runtime: Option<String>,

    /// Conversions for boot parameters (`int`, `float`, `bool`, `json`)
    #[serde(default)]
    pub param_types: HashMap<String, String>,
}

impl HostConfig {
    /// Parsed parameter conversions.
    pub fn conversions(&self) -> anyhow::Result<HashMap<String, Conversion>> {
        self.param_types
            .iter()
            .map(|(name, kind)| {
                kind.parse::<Conversion>()
                    .map(|conversion| (name.clone(), conversion))
                    .map_err(anyhow::Error::from)
            })
            .collect()
    }
}

/// Load configuration from a file or search for default config files.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    let config_path = path.map(PathBuf::from).or_else(find_config_file);

    match config_path {
        Some(path) if path.exists() => {
            let content = std::fs::read_to_string(&path)?;
            let mut config: Config = toml::from_str(&content)
                .map_err(|e| anyhow::anyhow!("Failed to parse {}: {}", path.display(), e))?;

            // Absolute base dirs replace the parent on join.
            if let Some(base_dir) = config.host.base_dir.take() {
                let parent = path.parent().unwrap_or_else(|| Path::new(""));
                config.host.base_dir = Some(parent.join(base_dir));
            }
            Ok(config)
        }
        Some(path) => Err(anyhow::anyhow!("Config file not found: {}", path.display())),
        None => Ok(Config::default()),
    }
}

/// Search for configuration file in the current directory and parent directories.
fn find_config_file() -> Option<PathBuf> {
    let cwd = std::env::current_dir().ok()?;

    const CONFIG_NAMES: &[&str] = &["ferry.toml", ".ferryrc.toml"];

    let mut dir = Some(cwd.as_path());
    while let Some(current) = dir {
        for name in CONFIG_NAMES {
            let path = current.join(name);
            if path.exists() {
                return Some(path);
            }
        }
        dir = current.parent();
    }

    None
}
