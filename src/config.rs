//! Server configuration.
//!
//! Settings come from an optional TOML file; command line flags override them.
//!
//! ```toml
//! address = "0.0.0.0:15099"
//! queue_capacity = 64
//!
//! [camera]
//! sensor_width = 1280
//! sensor_height = 1024
//! ```
use std::{
    fs, io,
    net::SocketAddr,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;
use thiserror::Error;

use crate::camera::SimulatedCameraConfig;

pub const DEFAULT_PORT: u16 = 15099;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub address: SocketAddr,
    /// Outgoing messages buffered per session before producers block.
    pub queue_capacity: usize,
    pub acquisition_timeout_ms: u64,
    /// How long a broadcast waits on one session's full queue.
    pub broadcast_timeout_ms: u64,
    pub camera: CameraConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            queue_capacity: 64,
            acquisition_timeout_ms: 5000,
            broadcast_timeout_ms: 500,
            camera: CameraConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_capacity == 0 {
            return Err(ConfigError::Invalid("queue_capacity must be positive".into()));
        }
        if self.camera.sensor_width == 0 || self.camera.sensor_height == 0 {
            return Err(ConfigError::Invalid("sensor size must be positive".into()));
        }
        if !(1..=4).contains(&self.camera.byte_depth) {
            return Err(ConfigError::Invalid(format!(
                "byte_depth must be within [1, 4], got {}",
                self.camera.byte_depth
            )));
        }
        Ok(())
    }

    pub fn acquisition_timeout(&self) -> Duration {
        Duration::from_millis(self.acquisition_timeout_ms)
    }

    pub fn broadcast_timeout(&self) -> Duration {
        Duration::from_millis(self.broadcast_timeout_ms)
    }
}

/// Parameters of the built-in simulated camera.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CameraConfig {
    pub sensor_width: u32,
    pub sensor_height: u32,
    pub byte_depth: u8,
    pub frame_period_ms: u64,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            sensor_width: 640,
            sensor_height: 480,
            byte_depth: 2,
            frame_period_ms: 5,
        }
    }
}

impl CameraConfig {
    pub fn simulated(&self) -> SimulatedCameraConfig {
        SimulatedCameraConfig {
            sensor_width: self.sensor_width,
            sensor_height: self.sensor_height,
            byte_depth: self.byte_depth,
            frame_period: Duration::from_millis(self.frame_period_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs::File;
    use std::io::Write;

    use tempdir::TempDir;

    use super::*;

    #[test]
    fn defaults() {
        let config = ServerConfig::from_toml("").unwrap();
        assert_eq!(config, ServerConfig::default());
        assert_eq!(config.address.port(), DEFAULT_PORT);
        assert_eq!(config.acquisition_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn load_from_file() {
        let dir = TempDir::new("config").unwrap();
        let path = dir.path().join("camwire.toml");
        let mut file = File::create(&path).unwrap();
        writeln!(
            file,
            "address = \"127.0.0.1:9000\"\nqueue_capacity = 8\n[camera]\nsensor_width = 32"
        )
        .unwrap();

        let config = ServerConfig::load(&path).unwrap();
        assert_eq!(config.address, "127.0.0.1:9000".parse::<SocketAddr>().unwrap());
        assert_eq!(config.queue_capacity, 8);
        assert_eq!(config.camera.sensor_width, 32);
        assert_eq!(config.camera.sensor_height, 480);
    }

    #[test]
    fn missing_file() {
        let dir = TempDir::new("config").unwrap();
        let err = ServerConfig::load(dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    #[should_panic(expected = "Parse")]
    fn unknown_keys_rejected() {
        ServerConfig::from_toml("port = 1").unwrap();
    }

    #[test]
    fn invalid_values() {
        let err = ServerConfig::from_toml("queue_capacity = 0").unwrap_err();
        assert_eq!(err.to_string(), "invalid config: queue_capacity must be positive");

        let err = ServerConfig::from_toml("[camera]\nbyte_depth = 9").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }
}
