use crate::server::noise::DEFAULT_PERIOD;
use crate::server::ServerOptions;
use crate::utils::file::register_file_path;
use anyhow::{Context, Result};
use config::{Config, File};
use log::{debug, info, LevelFilter};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

fn default_simulate_noise() -> bool {
    true
}

fn default_period_ms() -> u64 {
    DEFAULT_PERIOD.as_millis() as u64
}

fn default_status_interval() -> u64 {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct SensorConfig {
    /// Initial humidity; when unset the value recovered from the register
    /// file (or the default) is kept.
    #[serde(default)]
    pub humidity: Option<f64>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default = "default_simulate_noise")]
    pub simulate_noise: bool,
    #[serde(default = "default_period_ms")]
    pub period_ms: u64,
    #[serde(default)]
    pub seed: Option<u64>,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            humidity: None,
            temperature: None,
            simulate_noise: default_simulate_noise(),
            period_ms: default_period_ms(),
            seed: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct StorageConfig {
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StatusConfig {
    #[serde(default = "default_status_interval")]
    pub interval_secs: u64,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_status_interval(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(rename = "SENSOR", alias = "sensor", default)]
    pub sensor: SensorConfig,
    #[serde(rename = "STORAGE", alias = "storage", default)]
    pub storage: StorageConfig,
    #[serde(rename = "STATUS", alias = "status", default)]
    pub status: StatusConfig,
    #[serde(rename = "LOGGING", alias = "logging", default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    pub fn new() -> Result<Self> {
        Self::from_file("config.ini")
    }

    pub fn get_log_level(&self) -> LevelFilter {
        match self.logging.level.to_lowercase().as_str() {
            "trace" => LevelFilter::Trace,
            "debug" => LevelFilter::Debug,
            "info" => LevelFilter::Info,
            "warn" => LevelFilter::Warn,
            "error" => LevelFilter::Error,
            "off" => LevelFilter::Off,
            _ => LevelFilter::Info, // Default to Info if invalid
        }
    }

    /// Register file to serve, falling back to the platform default.
    pub fn storage_path(&self) -> PathBuf {
        match &self.storage.path {
            Some(path) if !path.is_empty() => PathBuf::from(path),
            _ => register_file_path(),
        }
    }

    pub fn server_options(&self) -> ServerOptions {
        ServerOptions {
            simulate_noise: self.sensor.simulate_noise,
            period: Duration::from_millis(self.sensor.period_ms),
            seed: self.sensor.seed,
        }
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config_path = path.as_ref();
        debug!("Loading configuration from {}", config_path.display());

        let config = Config::builder()
            .add_source(File::from(config_path).format(config::FileFormat::Ini))
            .build()
            .context(format!("Failed to load config from {}", config_path.display()))?;

        let app_config: AppConfig = config.try_deserialize()
            .context("Failed to deserialize config")?;

        Ok(app_config)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let config_path = path.as_ref();

        let mut config_str = String::new();

        // SENSOR section
        config_str.push_str("[SENSOR]\n");
        if let Some(humidity) = self.sensor.humidity {
            config_str.push_str(&format!("humidity = {}\n", humidity));
        }
        if let Some(temperature) = self.sensor.temperature {
            config_str.push_str(&format!("temperature = {}\n", temperature));
        }
        config_str.push_str(&format!(
            "simulate_noise = {}\nperiod_ms = {}\n",
            self.sensor.simulate_noise, self.sensor.period_ms
        ));
        if let Some(seed) = self.sensor.seed {
            config_str.push_str(&format!("seed = {}\n", seed));
        }
        config_str.push('\n');

        // STORAGE section
        config_str.push_str("[STORAGE]\n");
        if let Some(path) = &self.storage.path {
            config_str.push_str(&format!("path = {}\n", path));
        }
        config_str.push('\n');

        // STATUS section
        config_str.push_str(&format!(
            "[STATUS]\ninterval_secs = {}\n\n",
            self.status.interval_secs
        ));

        // LOGGING section
        config_str.push_str(&format!("[LOGGING]\nlevel = {}\n", self.logging.level));

        fs::write(config_path, config_str)
            .context(format!("Failed to save config to {}", config_path.display()))?;

        info!("Configuration saved to {}", config_path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{Builder, NamedTempFile};

    fn ini_file(content: &str) -> NamedTempFile {
        let mut temp_file = Builder::new().suffix(".ini").tempfile().unwrap();
        temp_file.write_all(content.as_bytes()).unwrap();
        temp_file
    }

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.sensor.humidity, None);
        assert_eq!(config.sensor.temperature, None);
        assert_eq!(config.sensor.simulate_noise, true);
        assert_eq!(config.sensor.period_ms, 130);
        assert_eq!(config.sensor.seed, None);
        assert_eq!(config.storage.path, None);
        assert_eq!(config.status.interval_secs, 10);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.storage_path(), register_file_path());
    }

    #[test]
    fn test_from_file() {
        let temp_file = ini_file(
            "[SENSOR]\nhumidity = 62.5\ntemperature = -3\nsimulate_noise = false\nperiod_ms = 50\nseed = 7\n\n[STORAGE]\npath = /tmp/regs\n\n[STATUS]\ninterval_secs = 0\n\n[LOGGING]\nlevel = debug\n",
        );

        let config = AppConfig::from_file(temp_file.path()).unwrap();

        assert_eq!(config.sensor.humidity, Some(62.5));
        assert_eq!(config.sensor.temperature, Some(-3.0));
        assert_eq!(config.sensor.simulate_noise, false);
        assert_eq!(config.sensor.period_ms, 50);
        assert_eq!(config.sensor.seed, Some(7));
        assert_eq!(config.storage_path(), PathBuf::from("/tmp/regs"));
        assert_eq!(config.status.interval_secs, 0);
        assert_eq!(config.get_log_level(), LevelFilter::Debug);
    }

    #[test]
    fn test_missing_sections_use_defaults() {
        let temp_file = ini_file("[LOGGING]\nlevel = warn\n");

        let config = AppConfig::from_file(temp_file.path()).unwrap();

        assert_eq!(config.sensor.simulate_noise, true);
        assert_eq!(config.sensor.period_ms, 130);
        assert_eq!(config.status.interval_secs, 10);
        assert_eq!(config.get_log_level(), LevelFilter::Warn);
    }

    #[test]
    fn test_save_config() {
        let mut config = AppConfig::default();
        config.sensor.humidity = Some(33.0);
        config.sensor.simulate_noise = false;
        config.sensor.period_ms = 250;
        config.sensor.seed = Some(99);
        config.storage.path = Some("/dev/shm/other".to_string());
        config.status.interval_secs = 3;
        config.logging.level = "trace".to_string();

        let temp_file = Builder::new().suffix(".ini").tempfile().unwrap();
        let config_path = temp_file.path();

        config.save(config_path).unwrap();

        let loaded_config = AppConfig::from_file(config_path).unwrap();

        assert_eq!(loaded_config.sensor.humidity, Some(33.0));
        assert_eq!(loaded_config.sensor.temperature, None);
        assert_eq!(loaded_config.sensor.simulate_noise, false);
        assert_eq!(loaded_config.sensor.period_ms, 250);
        assert_eq!(loaded_config.sensor.seed, Some(99));
        assert_eq!(loaded_config.storage.path.as_deref(), Some("/dev/shm/other"));
        assert_eq!(loaded_config.status.interval_secs, 3);
        assert_eq!(loaded_config.get_log_level(), LevelFilter::Trace);
    }

    #[test]
    fn test_server_options() {
        let mut config = AppConfig::default();
        config.sensor.period_ms = 20;
        config.sensor.seed = Some(1);
        config.sensor.simulate_noise = false;

        let options = config.server_options();
        assert_eq!(options.period, Duration::from_millis(20));
        assert_eq!(options.seed, Some(1));
        assert!(!options.simulate_noise);
    }

    #[test]
    fn test_invalid_log_level_falls_back_to_info() {
        let mut config = AppConfig::default();
        config.logging.level = "loud".to_string();
        assert_eq!(config.get_log_level(), LevelFilter::Info);
    }
}
