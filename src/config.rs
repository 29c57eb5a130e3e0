use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing_subscriber::EnvFilter;

fn default_log_level() -> String {
    "info".to_string()
}
fn default_data_dir() -> String {
    "data".to_string()
}
fn default_event_buffer() -> usize {
    128
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub general: GeneralConfig,
    pub dedup: DedupConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    pub log_level: String,
    pub data_dir: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            data_dir: default_data_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    /// Capacity of the inbound lifecycle-event channel.
    pub event_buffer: usize,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            event_buffer: default_event_buffer(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ConfigIoError>;

#[derive(Debug)]
pub enum ConfigIoError {
    CreateDefault {
        path: String,
        source: Box<ConfigIoError>,
    },
    Read {
        path: String,
        source: std::io::Error,
    },
    ParseToml {
        path: String,
        source: toml::de::Error,
    },
    SerializeToml {
        source: toml::ser::Error,
    },
    Write {
        path: String,
        source: std::io::Error,
    },
}

impl std::fmt::Display for ConfigIoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CreateDefault { path, .. } => {
                write!(f, "failed to create default config at {path}")
            }
            Self::Read { path, .. } => write!(f, "failed reading config file {path}"),
            Self::ParseToml { path, .. } => write!(f, "invalid TOML in {path}"),
            Self::SerializeToml { .. } => write!(f, "failed serializing config to TOML"),
            Self::Write { path, .. } => write!(f, "failed writing config file {path}"),
        }
    }
}

impl std::error::Error for ConfigIoError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::CreateDefault { source, .. } => Some(source.as_ref()),
            Self::Read { source, .. } => Some(source),
            Self::ParseToml { source, .. } => Some(source),
            Self::SerializeToml { source } => Some(source),
            Self::Write { source, .. } => Some(source),
        }
    }
}

pub async fn load_or_create_config(path: impl AsRef<Path>) -> Result<Config> {
    let path = path.as_ref();

    if !path.exists() {
        let default_cfg = Config::default();
        save_config(path, &default_cfg)
            .await
            .map_err(|source| ConfigIoError::CreateDefault {
                path: path.display().to_string(),
                source: Box::new(source),
            })?;
        return Ok(default_cfg);
    }

    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| ConfigIoError::Read {
            path: path.display().to_string(),
            source,
        })?;

    toml::from_str(&content).map_err(|source| ConfigIoError::ParseToml {
        path: path.display().to_string(),
        source,
    })
}

pub async fn save_config(path: impl AsRef<Path>, cfg: &Config) -> Result<()> {
    let path = path.as_ref();
    let toml_string =
        toml::to_string_pretty(cfg).map_err(|source| ConfigIoError::SerializeToml { source })?;

    tokio::fs::write(path, toml_string)
        .await
        .map_err(|source| ConfigIoError::Write {
            path: path.display().to_string(),
            source,
        })
}

pub fn init_tracing(config: &Config) {
    // RUST_LOG wins over the config file's log_level; default is info.
    let env_filter = std::env::var("RUST_LOG")
        .ok()
        .unwrap_or_else(|| config.general.log_level.clone());

    let filter = EnvFilter::try_new(env_filter).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .compact()
        .init();
}
