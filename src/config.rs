// src/config.rs
use crate::error::ConfigError;
use crate::types::ConnectionMode;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_ENV: &str = "SISLAB_CONFIG";
const DEFAULT_CONFIG_FILE: &str = "sislab.json";

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub mode: ConnectionMode,
    pub block: BlockConfig,
    pub nrx: NrxConfig,
    pub vna: VnaConfig,
    pub sweep: SweepConfig,
    pub stream: StreamConfig,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlockConfig {
    pub address: String,
    pub port: u16,
    pub bias_dev: String,
    pub ctrl_dev: String,
    /// Spin box limits for the sweep bounds, mV.
    pub volt_min_mv: f64,
    pub volt_max_mv: f64,
}

impl Default for BlockConfig {
    fn default() -> Self {
        Self {
            address: "169.254.190.83".to_owned(),
            port: 9876,
            bias_dev: "DEV3".to_owned(),
            ctrl_dev: "DEV4".to_owned(),
            volt_min_mv: -30.0,
            volt_max_mv: 30.0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NrxConfig {
    pub address: String,
    pub port: u16,
    /// Averaging filter time, s.
    pub filter_time: f64,
    /// Aperture time, s.
    pub aperture_time: f64,
}

impl Default for NrxConfig {
    fn default() -> Self {
        Self {
            address: "169.254.2.20".to_owned(),
            port: 5025,
            filter_time: 0.01,
            aperture_time: 0.05e-3,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VnaConfig {
    pub address: String,
    pub port: u16,
}

impl Default for VnaConfig {
    fn default() -> Self {
        Self {
            address: "169.254.106.188".to_owned(),
            port: 5025,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    pub volt_from_mv: f64,
    pub volt_to_mv: f64,
    pub points: usize,
    pub points_max: usize,
    pub step_delay_s: f64,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            volt_from_mv: 0.0,
            volt_to_mv: 5.0,
            points: 300,
            points_max: 1000,
            step_delay_s: 0.01,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub plot: bool,
    pub window_points: usize,
    /// Back-off after an empty power reading, s.
    pub retry_delay_s: f64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            plot: false,
            window_points: 50,
            retry_delay_s: 2.0,
        }
    }
}

impl AppConfig {
    /// `$SISLAB_CONFIG`, or `sislab.json` in the working directory.
    pub fn default_path() -> PathBuf {
        std::env::var_os(CONFIG_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Missing file means defaults; a broken file is reported and ignored.
    pub fn load_or_default(path: &Path) -> Self {
        if !path.exists() {
            info!("No config at {}, using defaults", path.display());
            return Self::default();
        }
        match Self::load(path) {
            Ok(cfg) => {
                info!("Loaded config from {}", path.display());
                cfg
            }
            Err(e) => {
                warn!("Ignoring config {}: {e}", path.display());
                Self::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cfg.json");
        fs::write(
            &path,
            r#"{ "mode": "Hardware", "sweep": { "points": 11 }, "block": { "port": 1234 } }"#,
        )
        .unwrap();

        let cfg = AppConfig::load(&path).unwrap();
        assert_eq!(cfg.mode, ConnectionMode::Hardware);
        assert_eq!(cfg.sweep.points, 11);
        assert_eq!(cfg.sweep.step_delay_s, SweepConfig::default().step_delay_s);
        assert_eq!(cfg.block.port, 1234);
        assert_eq!(cfg.block.bias_dev, "DEV3");
        assert_eq!(cfg.nrx, NrxConfig::default());
    }

    #[test]
    fn malformed_file_falls_back_to_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cfg.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(AppConfig::load(&path), Err(ConfigError::Parse(_))));
        assert_eq!(AppConfig::load_or_default(&path), AppConfig::default());
    }

    #[test]
    fn missing_file_is_defaults() {
        let dir = tempdir().unwrap();
        let cfg = AppConfig::load_or_default(&dir.path().join("absent.json"));
        assert_eq!(cfg, AppConfig::default());
    }

    #[test]
    fn save_then_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("cfg.json");
        let mut cfg = AppConfig::default();
        cfg.stream.plot = true;
        cfg.nrx.address = "10.0.0.7".to_owned();
        cfg.save(&path).unwrap();
        assert_eq!(AppConfig::load(&path).unwrap(), cfg);
    }
}
