// src/config/mod.rs
use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Planner host configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub vehicle: VehicleConfig,

    #[serde(default)]
    pub planner: PlannerConfig,

    /// Opaque key-value store mirrored from the persistent params service.
    #[serde(default)]
    pub params: ParamStore,
}

/// Static vehicle parameters.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VehicleConfig {
    #[serde(default = "default_steer_ratio")]
    pub steer_ratio: f64,

    /// m.
    #[serde(default = "default_wheelbase")]
    pub wheelbase: f64,

    /// Accel commanded when pulling away from standstill, m/s^2.
    #[serde(default = "default_start_accel")]
    pub start_accel: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PlannerConfig {
    #[serde(default = "default_fcw_enabled")]
    pub fcw_enabled: bool,

    /// Tick period of the planning loop, ms.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
}

fn default_steer_ratio() -> f64 {
    15.3
}

fn default_wheelbase() -> f64 {
    2.70
}

fn default_start_accel() -> f64 {
    0.8
}

fn default_fcw_enabled() -> bool {
    true
}

fn default_tick_interval_ms() -> u64 {
    50
}

impl Default for VehicleConfig {
    fn default() -> Self {
        Self {
            steer_ratio: default_steer_ratio(),
            wheelbase: default_wheelbase(),
            start_accel: default_start_accel(),
        }
    }
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            fcw_enabled: default_fcw_enabled(),
            tick_interval_ms: default_tick_interval_ms(),
        }
    }
}

/// String key-value lookup. Missing or malformed values silently disable the
/// feature they gate.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(transparent)]
pub struct ParamStore(HashMap<String, String>);

impl ParamStore {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    /// Map-derived speed limits apply only when the feature is switched on
    /// and a usable offset exists.
    pub fn limit_set_speed_active(&self) -> bool {
        self.get("LimitSetSpeed") == Some("1") && self.speed_limit_offset().is_some()
    }

    /// Offset added to the map speed limit, m/s.
    pub fn speed_limit_offset(&self) -> Option<f64> {
        self.get("SpeedLimitOffset")?.parse().ok()
    }
}

pub fn load_config(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    Ok(toml::from_str(&contents)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_fill_missing_sections() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.vehicle.steer_ratio, 15.3);
        assert_eq!(config.vehicle.wheelbase, 2.70);
        assert!(config.planner.fcw_enabled);
        assert_eq!(config.planner.tick_interval_ms, 50);
    }

    #[test]
    fn loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("planner.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "[vehicle]\nwheelbase = 2.9\n\n[params]\nLimitSetSpeed = \"1\"\nSpeedLimitOffset = \"1.5\"\n"
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.vehicle.wheelbase, 2.9);
        assert!(config.params.limit_set_speed_active());
        assert_eq!(config.params.speed_limit_offset(), Some(1.5));
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(matches!(load_config("/does/not/exist.toml"), Err(ConfigError::Io(_))));
    }

    #[test]
    fn malformed_params_disable_silently() {
        let mut params = ParamStore::default();
        assert!(!params.limit_set_speed_active());

        params.insert("LimitSetSpeed", "1");
        // Switched on but no offset: still inactive.
        assert!(!params.limit_set_speed_active());

        params.insert("SpeedLimitOffset", "not-a-number");
        assert!(!params.limit_set_speed_active());
        assert_eq!(params.speed_limit_offset(), None);

        params.insert("SpeedLimitOffset", "0.5");
        assert!(params.limit_set_speed_active());
    }
}
