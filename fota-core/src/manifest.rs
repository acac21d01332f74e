/// Remote manifest fetch and the "is there anything to install" decision
use serde::{Deserialize, Serialize};

use crate::error::FotaError;
use crate::identity::{DeviceIdentity, FirmwareIdentity};
use crate::traits::HttpGet;

/// Latest available firmware as advertised by the manifest server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateManifest {
    #[serde(rename = "type")]
    pub firmware_type: String,
    pub version: u32,
    pub host: String,
    pub port: u16,
    #[serde(rename = "firmware")]
    pub path: String,
}

impl UpdateManifest {
    pub fn parse(body: &[u8]) -> Result<Self, FotaError> {
        serde_json::from_slice(body).map_err(|e| FotaError::ManifestParse(e.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UpdateDecision {
    pub should_update: bool,
    pub manifest: Option<UpdateManifest>,
}

impl UpdateDecision {
    pub fn no_update() -> Self {
        Self::default()
    }

    /// Manifest to install, only when the decision is positive
    pub fn target(&self) -> Option<&UpdateManifest> {
        self.manifest.as_ref().filter(|_| self.should_update)
    }
}

/// `check_url`, optionally targeted at this device with `?id=`
pub fn request_url(check_url: &str, device_id: Option<&str>) -> String {
    match device_id {
        Some(id) => format!("{}?id={}", check_url, id),
        None => check_url.to_string(),
    }
}

pub struct ManifestChecker<H: HttpGet, D: DeviceIdentity> {
    http: H,
    device: D,
}

impl<H: HttpGet, D: DeviceIdentity> ManifestChecker<H, D> {
    pub fn new(http: H, device: D) -> Self {
        Self { http, device }
    }

    pub fn http(&self) -> &H {
        &self.http
    }

    pub fn device_id(&self) -> String {
        self.device.device_id()
    }

    /// Ask the manifest server whether a newer build exists. Never fails: any
    /// problem is logged and reported as "no update this cycle".
    pub fn check_for_update(
        &mut self,
        check_url: &str,
        identity: &FirmwareIdentity,
        use_device_id: bool,
    ) -> UpdateDecision {
        match self.try_check(check_url, identity, use_device_id) {
            Ok(decision) => decision,
            Err(e) => {
                log::warn!("Update check failed ({}): {}", e.reason(), e);
                UpdateDecision::no_update()
            }
        }
    }

    /// Same as [`check_for_update`](Self::check_for_update) but keeps the
    /// failure cause. Offline and non-200 answers are not errors.
    pub fn try_check(
        &mut self,
        check_url: &str,
        identity: &FirmwareIdentity,
        use_device_id: bool,
    ) -> Result<UpdateDecision, FotaError> {
        let device_id = use_device_id.then(|| self.device.device_id());
        let url = request_url(check_url, device_id.as_deref());

        if !self.http.is_connected() {
            log::debug!("Skipping update check, network not connected");
            return Ok(UpdateDecision::no_update());
        }

        log::info!("Checking for firmware update: {}", url);
        let response = self.http.get(&url).map_err(|e| FotaError::Connection {
            target: url.clone(),
            detail: format!("{:?}", e),
        })?;

        if response.status != 200 {
            log::warn!("Error on HTTP request: status {}", response.status);
            return Ok(UpdateDecision::no_update());
        }

        let manifest = UpdateManifest::parse(&response.body)?;
        let should_update = identity.should_accept(&manifest.firmware_type, manifest.version);

        log::info!(
            "Manifest offers {} v{} (running {} v{}): {}",
            manifest.firmware_type,
            manifest.version,
            identity.firmware_type,
            identity.firmware_version,
            if should_update { "update available" } else { "up to date" }
        );

        Ok(UpdateDecision {
            should_update,
            manifest: Some(manifest),
        })
    }
}
