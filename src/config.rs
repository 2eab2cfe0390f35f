use std::{env, path::PathBuf, time::Duration};

use color_eyre::{Result, eyre::ensure};
use config::{Environment, File};
use directories::ProjectDirs;
use lazy_static::lazy_static;
use serde::{Deserialize, Deserializer};

use crate::autosave::RetryPolicy;

const DEFAULT_CONFIG: &str = include_str!("../.config/config.json5");

#[derive(Clone, Debug, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub data_dir: PathBuf,
    #[serde(default)]
    pub config_dir: PathBuf,
}

/// Timing of the autosave engine. Durations are written like `"3s"` or `"1m 30s"`.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct AutosaveConfig {
    #[serde(deserialize_with = "human_duration")]
    pub debounce: Duration,
    #[serde(deserialize_with = "human_duration")]
    pub ceiling: Duration,
    #[serde(deserialize_with = "human_duration")]
    pub retry_base_delay: Duration,
    pub max_retries: u32,
}

impl Default for AutosaveConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_secs(3),
            ceiling: Duration::from_secs(30),
            retry_base_delay: Duration::from_secs(3),
            max_retries: 3,
        }
    }
}

impl AutosaveConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            base_delay: self.retry_base_delay,
            max_retries: self.max_retries,
        }
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(!self.debounce.is_zero(), "autosave.debounce must not be zero");
        ensure!(
            self.ceiling >= self.debounce,
            "autosave.ceiling ({:?}) must not be shorter than autosave.debounce ({:?})",
            self.ceiling,
            self.debounce
        );
        ensure!(
            !self.retry_base_delay.is_zero(),
            "autosave.retry_base_delay must not be zero"
        );
        Ok(())
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct StoreConfig {
    /// File name inside the data dir
    pub database: String,
    pub max_document_bytes: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database: "draftsync.sqlite".into(),
            max_document_bytes: 1024 * 1024,
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default, flatten)]
    pub config: AppConfig,
    #[serde(default)]
    pub autosave: AutosaveConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

lazy_static! {
    pub static ref PROJECT_NAME: String = env!("CARGO_CRATE_NAME").to_uppercase().to_string();
    pub static ref DATA_FOLDER: Option<PathBuf> =
        env::var(format!("{}_DATA", PROJECT_NAME.clone()))
            .ok()
            .map(PathBuf::from);
    pub static ref CONFIG_FOLDER: Option<PathBuf> =
        env::var(format!("{}_CONFIG", PROJECT_NAME.clone()))
            .ok()
            .map(PathBuf::from);
}

impl Config {
    pub fn new() -> Result<Self> {
        let data_dir = get_data_dir();
        let config_dir = get_config_dir();

        let mut builder = config::Config::builder()
            .set_default("data_dir", data_dir.to_string_lossy().to_string())?
            .set_default("config_dir", config_dir.to_string_lossy().to_string())?
            .add_source(File::from_str(DEFAULT_CONFIG, config::FileFormat::Json5));

        let config_files = [
            ("config.json5", config::FileFormat::Json5),
            ("config.json", config::FileFormat::Json),
            ("config.yaml", config::FileFormat::Yaml),
            ("config.toml", config::FileFormat::Toml),
        ];
        for (file, format) in &config_files {
            let source = config::File::from(config_dir.join(file))
                .format(*format)
                .required(false);
            builder = builder.add_source(source);
        }

        let cfg: Self = builder
            .add_source(Environment::with_prefix("DRAFTSYNC").separator("__"))
            .build()?
            .try_deserialize()?;
        cfg.autosave.validate()?;
        Ok(cfg)
    }

    pub fn database_path(&self) -> PathBuf {
        self.config.data_dir.join(&self.store.database)
    }
}

fn human_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
}

pub fn get_data_dir() -> PathBuf {
    if let Some(s) = DATA_FOLDER.clone() {
        s
    } else if let Some(proj_dirs) = project_directory() {
        proj_dirs.data_local_dir().to_path_buf()
    } else {
        PathBuf::from(".").join(".data")
    }
}

pub fn get_config_dir() -> PathBuf {
    if let Some(s) = CONFIG_FOLDER.clone() {
        s
    } else if let Some(proj_dirs) = project_directory() {
        proj_dirs.config_local_dir().to_path_buf()
    } else {
        PathBuf::from(".").join(".config")
    }
}

fn project_directory() -> Option<ProjectDirs> {
    ProjectDirs::from("plus.lit", "", env!("CARGO_PKG_NAME"))
}
