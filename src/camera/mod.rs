//! Camera hardware abstraction.
//!
//! The server never talks to a device directly. It goes through a
//! [`CameraHandle`], which wraps any [`Camera`] implementation and is the single
//! synchronized entry point for feature mutation. The handle enforces a
//! [`FeaturePermissions`] table: some features (the region of interest) may not
//! change while any frame acquisition is running.
//!
//! Feature state is always read from the camera; nothing is cached here.

pub mod permissions;
pub mod simulated;

use std::{
    fmt,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicUsize, Ordering},
    },
    time::{Duration, SystemTime},
};

use log::debug;
use thiserror::Error;

pub use permissions::{Access, FeaturePermissions};
pub use simulated::{SimulatedCamera, SimulatedCameraConfig};

pub const FEATURE_FRAME_RATE: &str = "AcquisitionFrameRate";
pub const FEATURE_EXPOSURE_TIME: &str = "ExposureTime";
pub const FEATURE_OFFSET_X: &str = "OffsetX";
pub const FEATURE_OFFSET_Y: &str = "OffsetY";
pub const FEATURE_WIDTH: &str = "Width";
pub const FEATURE_HEIGHT: &str = "Height";
pub const FEATURE_SENSOR_WIDTH: &str = "SensorWidth";
pub const FEATURE_SENSOR_HEIGHT: &str = "SensorHeight";

#[derive(Debug, Error, Clone, PartialEq)]
pub enum CameraError {
    #[error("unknown feature '{0}'")]
    UnknownFeature(String),

    #[error("feature '{0}' is read-only")]
    ReadOnly(String),

    #[error("feature '{0}' cannot change while acquisition is running")]
    Locked(String),

    #[error("feature '{name}' rejected value: {reason}")]
    Rejected { name: String, reason: String },

    #[error("frame acquisition timed out after {0:?}")]
    Timeout(Duration),

    #[error("frame acquisition failed: {0}")]
    Acquisition(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum FeatureValue {
    Int(i64),
    Float(f64),
    Text(String),
}

impl FeatureValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FeatureValue::Int(i) => Some(*i as f64),
            FeatureValue::Float(f) => Some(*f),
            FeatureValue::Text(_) => None,
        }
    }

    /// Integer view; floats are truncated.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FeatureValue::Int(i) => Some(*i),
            FeatureValue::Float(f) => Some(*f as i64),
            FeatureValue::Text(_) => None,
        }
    }
}

impl fmt::Display for FeatureValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeatureValue::Int(i) => write!(f, "{i}"),
            FeatureValue::Float(v) => write!(f, "{v}"),
            FeatureValue::Text(s) => f.write_str(s),
        }
    }
}

/// Full-sensor frame as delivered by the device.
///
/// Multi-byte samples are little-endian.
#[derive(Debug, Clone, PartialEq)]
pub struct RawFrame {
    pub width: u32,
    pub height: u32,
    pub byte_depth: u8,
    pub pixels: Vec<u8>,
    pub timestamp: SystemTime,
}

/// Device driver interface.
///
/// Implementations serialize their own hardware access: several collectors may
/// call [`Camera::acquire_frame`] concurrently.
pub trait Camera: Send + Sync {
    fn get_feature(&self, name: &str) -> Result<FeatureValue, CameraError>;

    /// Applies `value` and returns the value the device actually settled on.
    fn set_feature(&self, name: &str, value: FeatureValue) -> Result<FeatureValue, CameraError>;

    fn acquire_frame(&self, timeout: Duration) -> Result<RawFrame, CameraError>;

    /// Sensor `(width, height)` in pixels.
    fn sensor_size(&self) -> (u32, u32);
}

/// Shared, cloneable entry point to the camera.
#[derive(Clone)]
pub struct CameraHandle {
    camera: Arc<dyn Camera>,
    permissions: Arc<FeaturePermissions>,
    acquisitions: Arc<AtomicUsize>,
    feature_lock: Arc<Mutex<()>>,
}

impl CameraHandle {
    pub fn new(camera: Arc<dyn Camera>) -> Self {
        Self::with_permissions(camera, FeaturePermissions::default())
    }

    pub fn with_permissions(camera: Arc<dyn Camera>, permissions: FeaturePermissions) -> Self {
        Self {
            camera,
            permissions: Arc::new(permissions),
            acquisitions: Arc::new(AtomicUsize::new(0)),
            feature_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn get_feature(&self, name: &str) -> Result<FeatureValue, CameraError> {
        self.read_features(|features| features.get(name))
    }

    /// Runs `read` with no feature write in between its reads, so values that
    /// belong together (the region of interest) come from one consistent state.
    pub fn read_features<T, E>(
        &self,
        read: impl FnOnce(&FeatureReader<'_>) -> Result<T, E>,
    ) -> Result<T, E> {
        let _guard = self
            .feature_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        read(&FeatureReader {
            camera: self.camera.as_ref(),
        })
    }

    pub fn set_feature(&self, name: &str, value: FeatureValue) -> Result<FeatureValue, CameraError> {
        self.set_feature_checked(name, value, |_| Ok::<_, CameraError>(()))
    }

    /// Sets `name` once `check` accepts the current feature state. The check
    /// and the write happen under one hold of the feature lock, so another
    /// writer cannot invalidate what `check` saw.
    pub fn set_feature_checked<E>(
        &self,
        name: &str,
        value: FeatureValue,
        check: impl FnOnce(&FeatureReader<'_>) -> Result<(), E>,
    ) -> Result<FeatureValue, E>
    where
        E: From<CameraError>,
    {
        let _guard = self
            .feature_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        self.permissions
            .check_write(name, self.acquisitions.load(Ordering::SeqCst) > 0)?;
        check(&FeatureReader {
            camera: self.camera.as_ref(),
        })?;

        debug!("setting camera feature {name} to {value}");
        Ok(self.camera.set_feature(name, value)?)
    }

    pub fn acquire_frame(&self, timeout: Duration) -> Result<RawFrame, CameraError> {
        self.camera.acquire_frame(timeout)
    }

    pub fn sensor_size(&self) -> (u32, u32) {
        self.camera.sensor_size()
    }

    /// Marks an acquisition as running until the guard is dropped.
    pub fn begin_acquisition(&self) -> AcquisitionGuard {
        let _guard = self
            .feature_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        self.acquisitions.fetch_add(1, Ordering::SeqCst);
        AcquisitionGuard {
            acquisitions: Arc::clone(&self.acquisitions),
        }
    }

    pub fn is_acquiring(&self) -> bool {
        self.acquisitions.load(Ordering::SeqCst) > 0
    }
}

/// Read access to camera features while the handle's feature lock is held.
pub struct FeatureReader<'a> {
    camera: &'a dyn Camera,
}

impl FeatureReader<'_> {
    pub fn get(&self, name: &str) -> Result<FeatureValue, CameraError> {
        self.camera.get_feature(name)
    }

    /// Reads an integer feature. Floats truncate; text is rejected.
    pub fn get_int(&self, name: &str) -> Result<i64, CameraError> {
        let value = self.get(name)?;
        value.as_i64().ok_or_else(|| CameraError::Rejected {
            name: name.to_string(),
            reason: format!("non-numeric value {value}"),
        })
    }
}

pub struct AcquisitionGuard {
    acquisitions: Arc<AtomicUsize>,
}

impl Drop for AcquisitionGuard {
    fn drop(&mut self) {
        self.acquisitions.fetch_sub(1, Ordering::SeqCst);
    }
}
