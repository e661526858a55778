use std::{
    collections::{HashMap, VecDeque},
    sync::{Mutex, PoisonError},
    thread,
    time::{Duration, SystemTime},
};

use log::trace;

use super::{
    Camera, CameraError, FEATURE_EXPOSURE_TIME, FEATURE_FRAME_RATE, FEATURE_HEIGHT,
    FEATURE_OFFSET_X, FEATURE_OFFSET_Y, FEATURE_SENSOR_HEIGHT, FEATURE_SENSOR_WIDTH, FEATURE_WIDTH,
    FeatureValue, RawFrame,
};

#[derive(Debug, Clone, PartialEq)]
pub struct SimulatedCameraConfig {
    pub sensor_width: u32,
    pub sensor_height: u32,
    pub byte_depth: u8,
    /// Time one acquisition occupies the device.
    pub frame_period: Duration,
}

impl Default for SimulatedCameraConfig {
    fn default() -> Self {
        Self {
            sensor_width: 640,
            sensor_height: 480,
            byte_depth: 2,
            frame_period: Duration::from_millis(5),
        }
    }
}

/// In-memory camera producing a moving gradient.
///
/// Pixel `(x, y)` of frame `n` has value `x + y + n`, truncated to the sample
/// width. Acquisitions are serialized, as on real hardware.
pub struct SimulatedCamera {
    config: SimulatedCameraConfig,
    features: Mutex<HashMap<String, FeatureValue>>,
    device: Mutex<u64>,
    faults: Mutex<VecDeque<CameraError>>,
}

impl SimulatedCamera {
    pub fn new(config: SimulatedCameraConfig) -> Self {
        let mut features = HashMap::new();
        features.insert(FEATURE_FRAME_RATE.to_string(), FeatureValue::Float(30.0));
        features.insert(FEATURE_EXPOSURE_TIME.to_string(), FeatureValue::Float(5000.0));
        features.insert(FEATURE_OFFSET_X.to_string(), FeatureValue::Int(0));
        features.insert(FEATURE_OFFSET_Y.to_string(), FeatureValue::Int(0));
        features.insert(
            FEATURE_WIDTH.to_string(),
            FeatureValue::Int(config.sensor_width as i64),
        );
        features.insert(
            FEATURE_HEIGHT.to_string(),
            FeatureValue::Int(config.sensor_height as i64),
        );
        features.insert(
            FEATURE_SENSOR_WIDTH.to_string(),
            FeatureValue::Int(config.sensor_width as i64),
        );
        features.insert(
            FEATURE_SENSOR_HEIGHT.to_string(),
            FeatureValue::Int(config.sensor_height as i64),
        );

        Self {
            config,
            features: Mutex::new(features),
            device: Mutex::new(0),
            faults: Mutex::new(VecDeque::new()),
        }
    }

    /// Makes the next acquisition fail with `error`. Faults queue up.
    pub fn inject_fault(&self, error: CameraError) {
        self.faults
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(error);
    }

    /// Number of frames produced so far.
    pub fn frames_acquired(&self) -> u64 {
        *self.device.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn validate(&self, name: &str, value: &FeatureValue) -> Result<FeatureValue, CameraError> {
        let rejected = |reason: &str| CameraError::Rejected {
            name: name.to_string(),
            reason: reason.to_string(),
        };

        match name {
            FEATURE_FRAME_RATE | FEATURE_EXPOSURE_TIME => {
                let v = value.as_f64().ok_or_else(|| rejected("expected a number"))?;
                if !(v.is_finite() && v > 0.0) {
                    return Err(rejected("must be positive"));
                }
                Ok(FeatureValue::Float(v))
            }
            FEATURE_OFFSET_X | FEATURE_OFFSET_Y | FEATURE_WIDTH | FEATURE_HEIGHT => {
                let v = value.as_i64().ok_or_else(|| rejected("expected an integer"))?;
                let limit = i64::from(match name {
                    FEATURE_OFFSET_X | FEATURE_WIDTH => self.config.sensor_width,
                    _ => self.config.sensor_height,
                });
                let min = if matches!(name, FEATURE_WIDTH | FEATURE_HEIGHT) {
                    1
                } else {
                    0
                };
                if v < min || v > limit {
                    return Err(rejected(&format!("must be within [{min}, {limit}]")));
                }
                Ok(FeatureValue::Int(v))
            }
            _ => Err(CameraError::UnknownFeature(name.to_string())),
        }
    }

    fn render(&self, index: u64) -> Vec<u8> {
        let SimulatedCameraConfig {
            sensor_width,
            sensor_height,
            byte_depth,
            ..
        } = self.config;
        let mut pixels =
            Vec::with_capacity(sensor_width as usize * sensor_height as usize * byte_depth as usize);

        for y in 0..sensor_height as u64 {
            for x in 0..sensor_width as u64 {
                let value = x + y + index;
                match byte_depth {
                    1 => pixels.push(value as u8),
                    2 => pixels.extend_from_slice(&(value as u16).to_le_bytes()),
                    depth => {
                        let bytes = value.to_le_bytes();
                        pixels.extend(bytes.iter().cycle().take(depth as usize));
                    }
                }
            }
        }
        pixels
    }
}

impl Camera for SimulatedCamera {
    fn get_feature(&self, name: &str) -> Result<FeatureValue, CameraError> {
        self.features
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| CameraError::UnknownFeature(name.to_string()))
    }

    fn set_feature(&self, name: &str, value: FeatureValue) -> Result<FeatureValue, CameraError> {
        let value = self.validate(name, &value)?;
        self.features
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), value.clone());
        Ok(value)
    }

    fn acquire_frame(&self, timeout: Duration) -> Result<RawFrame, CameraError> {
        let mut counter = self.device.lock().unwrap_or_else(PoisonError::into_inner);

        let fault = self
            .faults
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        if let Some(error) = fault {
            return Err(error);
        }

        if self.config.frame_period > timeout {
            thread::sleep(timeout);
            return Err(CameraError::Timeout(timeout));
        }
        thread::sleep(self.config.frame_period);

        let index = *counter;
        *counter += 1;
        trace!("simulated camera produced frame {index}");

        Ok(RawFrame {
            width: self.config.sensor_width,
            height: self.config.sensor_height,
            byte_depth: self.config.byte_depth,
            pixels: self.render(index),
            timestamp: SystemTime::now(),
        })
    }

    fn sensor_size(&self) -> (u32, u32) {
        (self.config.sensor_width, self.config.sensor_height)
    }
}
