/// Failure taxonomy for manifest checks and update attempts
use std::fmt;

/// Why an update attempt ended in `Phase::Failed`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    ConnectionError,
    Timeout,
    InvalidResponse,
    InsufficientSpace,
    FlashCommitError,
    IncompleteImage,
    ManifestParseError,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::ConnectionError => "CONNECTION_ERROR",
            FailureReason::Timeout => "TIMEOUT",
            FailureReason::InvalidResponse => "INVALID_RESPONSE",
            FailureReason::InsufficientSpace => "INSUFFICIENT_SPACE",
            FailureReason::FlashCommitError => "FLASH_COMMIT_ERROR",
            FailureReason::IncompleteImage => "INCOMPLETE_IMAGE",
            FailureReason::ManifestParseError => "MANIFEST_PARSE_ERROR",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned by the update engine. None of these are fatal to the device:
/// the running firmware stays active and bootable.
#[derive(Debug, Clone, PartialEq)]
pub enum FotaError {
    /// Connecting or talking to a server failed; `target` is `host:port` or a URL
    Connection { target: String, detail: String },
    /// No data within the allowed window
    Timeout { waited_ms: u64 },
    /// Response was not `200` with a positive length and an octet-stream body
    InvalidResponse {
        status: Option<u16>,
        content_length: u64,
        content_type_valid: bool,
    },
    /// Flash writer refused to begin for this image size
    InsufficientSpace { required: u64 },
    /// Flash commit failed; `code` is the platform error code
    FlashCommit { code: i32 },
    /// Commit reported success but the image is not marked finished
    IncompleteImage { written: u64, expected: u64 },
    /// Manifest body was not valid JSON or lacked a required field
    ManifestParse(String),
}

impl FotaError {
    pub fn reason(&self) -> FailureReason {
        match self {
            FotaError::Connection { .. } => FailureReason::ConnectionError,
            FotaError::Timeout { .. } => FailureReason::Timeout,
            FotaError::InvalidResponse { .. } => FailureReason::InvalidResponse,
            FotaError::InsufficientSpace { .. } => FailureReason::InsufficientSpace,
            FotaError::FlashCommit { .. } => FailureReason::FlashCommitError,
            FotaError::IncompleteImage { .. } => FailureReason::IncompleteImage,
            FotaError::ManifestParse(_) => FailureReason::ManifestParseError,
        }
    }
}

impl fmt::Display for FotaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FotaError::Connection { target, detail } => {
                write!(f, "connection to {} failed: {}", target, detail)
            }
            FotaError::Timeout { waited_ms } => {
                write!(f, "no response from server after {} ms", waited_ms)
            }
            FotaError::InvalidResponse {
                status,
                content_length,
                content_type_valid,
            } => match status {
                Some(code) => write!(
                    f,
                    "invalid response: status {}, content length {}, octet-stream {}",
                    code, content_length, content_type_valid
                ),
                None => write!(
                    f,
                    "invalid response: no status line, content length {}, octet-stream {}",
                    content_length, content_type_valid
                ),
            },
            FotaError::InsufficientSpace { required } => {
                write!(f, "not enough space to begin OTA ({} bytes)", required)
            }
            FotaError::FlashCommit { code } => write!(f, "flash commit failed, error #{}", code),
            FotaError::IncompleteImage { written, expected } => write!(
                f,
                "update not finished after commit ({}/{} bytes written)",
                written, expected
            ),
            FotaError::ManifestParse(msg) => write!(f, "manifest parsing failed: {}", msg),
        }
    }
}

impl std::error::Error for FotaError {}
