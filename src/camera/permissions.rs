use std::collections::HashMap;

use super::{
    CameraError, FEATURE_EXPOSURE_TIME, FEATURE_FRAME_RATE, FEATURE_HEIGHT, FEATURE_OFFSET_X,
    FEATURE_OFFSET_Y, FEATURE_SENSOR_HEIGHT, FEATURE_SENSOR_WIDTH, FEATURE_WIDTH,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    ReadOnly,
    ReadWrite,
    /// Writable only while no acquisition is running.
    LockedDuringAcquisition,
}

/// Which features clients may change, and when.
///
/// Features missing from the table are left to the camera to accept or reject.
#[derive(Debug, Clone)]
pub struct FeaturePermissions {
    table: HashMap<String, Access>,
}

impl Default for FeaturePermissions {
    fn default() -> Self {
        let mut permissions = Self::empty();
        permissions.set(FEATURE_EXPOSURE_TIME, Access::ReadWrite);
        permissions.set(FEATURE_FRAME_RATE, Access::ReadWrite);
        permissions.set(FEATURE_OFFSET_X, Access::LockedDuringAcquisition);
        permissions.set(FEATURE_OFFSET_Y, Access::LockedDuringAcquisition);
        permissions.set(FEATURE_WIDTH, Access::LockedDuringAcquisition);
        permissions.set(FEATURE_HEIGHT, Access::LockedDuringAcquisition);
        permissions.set(FEATURE_SENSOR_WIDTH, Access::ReadOnly);
        permissions.set(FEATURE_SENSOR_HEIGHT, Access::ReadOnly);
        permissions
    }
}

impl FeaturePermissions {
    pub fn empty() -> Self {
        Self {
            table: HashMap::new(),
        }
    }

    pub fn set(&mut self, name: &str, access: Access) {
        self.table.insert(name.to_string(), access);
    }

    pub fn access(&self, name: &str) -> Option<Access> {
        self.table.get(name).copied()
    }

    pub fn check_write(&self, name: &str, acquiring: bool) -> Result<(), CameraError> {
        match self.access(name) {
            Some(Access::ReadOnly) => Err(CameraError::ReadOnly(name.to_string())),
            Some(Access::LockedDuringAcquisition) if acquiring => {
                Err(CameraError::Locked(name.to_string()))
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_table() {
        let permissions = FeaturePermissions::default();

        assert!(permissions.check_write(FEATURE_OFFSET_X, false).is_ok());
        assert!(permissions.check_write(FEATURE_OFFSET_X, true).is_err());
        assert!(permissions.check_write(FEATURE_EXPOSURE_TIME, true).is_ok());
        assert!(permissions.check_write(FEATURE_SENSOR_HEIGHT, false).is_err());
        assert!(permissions.check_write("Gain", true).is_ok());
    }

    #[test]
    fn overrides() {
        let mut permissions = FeaturePermissions::empty();
        permissions.set(FEATURE_EXPOSURE_TIME, Access::LockedDuringAcquisition);

        assert_eq!(
            permissions.check_write(FEATURE_EXPOSURE_TIME, true),
            Err(CameraError::Locked(FEATURE_EXPOSURE_TIME.to_string()))
        );
        assert_eq!(permissions.access(FEATURE_WIDTH), None);
    }
}
