// Centralized version information

use fota_core::FirmwareIdentity;

// Device class the manifest server must advertise for us to accept an image
pub const FIRMWARE_TYPE: &str = env!("FIRMWARE_TYPE");

// Build number compared against the manifest's "version"
pub const FIRMWARE_VERSION: &str = env!("FIRMWARE_VERSION");

// Cargo package version from Cargo.toml
pub const CARGO_VERSION: &str = env!("CARGO_PKG_VERSION");

// build.rs rejects non-numeric versions, so this only falls back on a broken build env
pub fn firmware_version() -> u32 {
    FIRMWARE_VERSION.parse().unwrap_or(0)
}

pub fn identity() -> FirmwareIdentity {
    FirmwareIdentity::new(FIRMWARE_TYPE, firmware_version())
}

// Version info string for logging
pub fn version_info() -> String {
    format!("{} build {} (crate {})", FIRMWARE_TYPE, FIRMWARE_VERSION, CARGO_VERSION)
}
