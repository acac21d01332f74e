/// Update engine configuration that can be tested independently
use serde::{Deserialize, Serialize};

/// How often the firmware asks the manifest server for a new build
pub const DEFAULT_CHECK_PERIOD_MS: u64 = 60_000;

/// How long to wait for the first response byte after sending the request
pub const DEFAULT_FIRST_BYTE_TIMEOUT_MS: u64 = 5_000;

/// Server certificate handling for both the manifest check and the firmware fetch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum TrustMode {
    /// Encrypted but unauthenticated; trust comes from the check URL alone
    #[default]
    Insecure,
    /// Full chain validation against the platform CA bundle
    CertificateBundle,
    /// Only a server chaining to this PEM-encoded CA is accepted
    Pinned { ca_pem: String },
}

impl TrustMode {
    pub fn verifies_server(&self) -> bool {
        !matches!(self, TrustMode::Insecure)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FotaConfig {
    pub check_url: String,
    /// Append `?id=<device id>` to the check URL
    pub use_device_id: bool,
    pub auto_update: bool,
    pub check_period_ms: u64,
    pub first_byte_timeout_ms: u64,
    pub trust: TrustMode,
}

impl Default for FotaConfig {
    fn default() -> Self {
        Self {
            check_url: String::new(),
            use_device_id: false,
            auto_update: true,
            check_period_ms: DEFAULT_CHECK_PERIOD_MS,
            first_byte_timeout_ms: DEFAULT_FIRST_BYTE_TIMEOUT_MS,
            trust: TrustMode::Insecure,
        }
    }
}

impl FotaConfig {
    /// Periodic checks need a manifest location to ask
    pub fn is_configured(&self) -> bool {
        !self.check_url.trim().is_empty()
    }
}
