//! FOTA Core - hardware-independent firmware update engine for the word clock
//!
//! This crate holds the manifest check and the download-and-flash state machine.
//! Every platform capability (TLS socket, HTTP GET, flash partition, clock,
//! reset) is a trait so the whole update flow can be tested on the host.

pub mod config;
pub mod error;
pub mod executor;
pub mod fota;
pub mod http;
pub mod identity;
pub mod manifest;
pub mod traits;

#[cfg(any(test, feature = "testing"))]
pub mod fakes;

pub use config::{FotaConfig, TrustMode};
pub use error::{FailureReason, FotaError};
pub use executor::{DownloadState, Phase, UpdateExecutor, UpdateOutcome, UpdateRequest};
pub use fota::{CheckSchedule, Fota};
pub use identity::{DeviceIdentity, FirmwareIdentity};
pub use manifest::{ManifestChecker, UpdateDecision, UpdateManifest};
pub use traits::{Clock, FlashWriter, HttpGet, HttpResponse, Reboot, Transport};
