/// Running firmware identity and the update-worthiness rule
use serde::{Deserialize, Serialize};

/// Self-description of the running firmware, fixed for the process lifetime
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirmwareIdentity {
    pub firmware_type: String,
    pub firmware_version: u32,
}

impl FirmwareIdentity {
    pub fn new(firmware_type: impl Into<String>, firmware_version: u32) -> Self {
        Self {
            firmware_type: firmware_type.into(),
            firmware_version,
        }
    }

    /// An offered build is worth installing only when it is strictly newer and
    /// built for the same device class.
    pub fn should_accept(&self, offered_type: &str, offered_version: u32) -> bool {
        offered_version > self.firmware_version && offered_type == self.firmware_type
    }
}

/// Platform-assigned device identifier, used for per-device manifest targeting
pub trait DeviceIdentity {
    fn device_id(&self) -> String;
}

impl DeviceIdentity for String {
    fn device_id(&self) -> String {
        self.clone()
    }
}

impl DeviceIdentity for &str {
    fn device_id(&self) -> String {
        (*self).to_string()
    }
}
