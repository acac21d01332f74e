/// Manifest check and update executor wired together for the application loop
use crate::config::FotaConfig;
use crate::error::FotaError;
use crate::executor::{UpdateExecutor, UpdateOutcome, UpdateRequest};
use crate::identity::{DeviceIdentity, FirmwareIdentity};
use crate::manifest::{ManifestChecker, UpdateDecision};
use crate::traits::{Clock, FlashWriter, HttpGet, Reboot, Transport};

/// Decides when the next periodic manifest check is due
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckSchedule {
    period_ms: u64,
    last_check_ms: Option<u64>,
}

impl CheckSchedule {
    pub fn new(period_ms: u64) -> Self {
        Self {
            period_ms,
            last_check_ms: None,
        }
    }

    /// First call is always due; afterwards once per period
    pub fn is_due(&self, now_ms: u64) -> bool {
        match self.last_check_ms {
            None => true,
            Some(last) => now_ms.saturating_sub(last) >= self.period_ms,
        }
    }

    pub fn mark_checked(&mut self, now_ms: u64) {
        self.last_check_ms = Some(now_ms);
    }
}

pub struct Fota<H, D, T, F, C, R>
where
    H: HttpGet,
    D: DeviceIdentity,
    T: Transport,
    F: FlashWriter,
    C: Clock,
    R: Reboot,
{
    config: FotaConfig,
    identity: FirmwareIdentity,
    checker: ManifestChecker<H, D>,
    executor: UpdateExecutor<T, F, C, R>,
}

impl<H, D, T, F, C, R> Fota<H, D, T, F, C, R>
where
    H: HttpGet,
    D: DeviceIdentity,
    T: Transport,
    F: FlashWriter,
    C: Clock,
    R: Reboot,
{
    pub fn new(
        config: FotaConfig,
        identity: FirmwareIdentity,
        checker: ManifestChecker<H, D>,
        executor: UpdateExecutor<T, F, C, R>,
    ) -> Self {
        let executor = executor.with_first_byte_timeout(config.first_byte_timeout_ms);
        Self {
            config,
            identity,
            checker,
            executor,
        }
    }

    pub fn config(&self) -> &FotaConfig {
        &self.config
    }

    pub fn identity(&self) -> &FirmwareIdentity {
        &self.identity
    }

    pub fn checker(&self) -> &ManifestChecker<H, D> {
        &self.checker
    }

    pub fn executor(&self) -> &UpdateExecutor<T, F, C, R> {
        &self.executor
    }

    /// For registering progress and completion callbacks
    pub fn executor_mut(&mut self) -> &mut UpdateExecutor<T, F, C, R> {
        &mut self.executor
    }

    pub fn check(&mut self) -> UpdateDecision {
        self.checker.check_for_update(
            &self.config.check_url,
            &self.identity,
            self.config.use_device_id,
        )
    }

    /// One periodic cycle: ask the manifest server and install when warranted.
    /// `Ok(None)` means there was nothing to do.
    pub fn check_and_update(&mut self) -> Result<Option<UpdateOutcome>, FotaError> {
        if !self.config.is_configured() {
            log::debug!("No check URL configured, skipping update check");
            return Ok(None);
        }

        let decision = self.check();
        let Some(manifest) = decision.target() else {
            return Ok(None);
        };

        log::info!(
            "Updating {} v{} -> v{}",
            self.identity.firmware_type,
            self.identity.firmware_version,
            manifest.version
        );
        let request = UpdateRequest::from(manifest);
        self.executor.execute(&request).map(Some)
    }

    /// Install from an explicit location without consulting the manifest
    pub fn force_update(
        &mut self,
        host: &str,
        port: u16,
        path: &str,
    ) -> Result<UpdateOutcome, FotaError> {
        log::info!("Forced firmware update from {}:{}{}", host, port, path);
        self.executor.execute(&UpdateRequest::new(host, port, path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureReason;
    use crate::fakes::{FakeClock, FakeFlash, FakeHttp, FakeReboot, FixedDeviceId, ScriptedTransport};

    type TestFota =
        Fota<FakeHttp, FixedDeviceId, ScriptedTransport, FakeFlash, FakeClock, FakeReboot>;

    const MANIFEST: &str = r#"{"type":"wordclock","version":5,"host":"fw.example.org","port":443,"firmware":"/v5.bin"}"#;

    fn fota(http: FakeHttp, transport: ScriptedTransport, check_url: &str) -> TestFota {
        let config = FotaConfig {
            check_url: check_url.to_string(),
            ..FotaConfig::default()
        };
        Fota::new(
            config,
            FirmwareIdentity::new("wordclock", 4),
            ManifestChecker::new(http, FixedDeviceId(7)),
            UpdateExecutor::new(transport, FakeFlash::new(1 << 16), FakeClock::new(10), FakeReboot::default()),
        )
    }

    fn firmware(len: usize) -> ScriptedTransport {
        ScriptedTransport::firmware_response("200 OK", "application/octet-stream", len as u64, &vec![0xA5; len])
    }

    #[test]
    fn test_schedule() {
        let mut schedule = CheckSchedule::new(60_000);
        assert!(schedule.is_due(0));
        schedule.mark_checked(1_000);
        assert!(!schedule.is_due(30_000));
        assert!(schedule.is_due(61_000));
    }

    #[test]
    fn test_check_and_update_installs_newer() {
        let mut fota = fota(FakeHttp::ok_json(MANIFEST), firmware(256), "https://fw/check");
        let outcome = fota.check_and_update().unwrap();

        assert_eq!(outcome.map(|o| o.bytes_written), Some(256));
        assert_eq!(
            fota.executor().transport().connected_to,
            Some(("fw.example.org".to_string(), 443))
        );
        assert_eq!(fota.executor().reboot_handle().count, 1);
    }

    #[test]
    fn test_up_to_date_does_not_connect() {
        let older = MANIFEST.replace("\"version\":5", "\"version\":4");
        let mut fota = fota(FakeHttp::ok_json(&older), firmware(256), "https://fw/check");

        assert_eq!(fota.check_and_update().unwrap(), None);
        assert!(fota.executor().transport().connected_to.is_none());
    }

    #[test]
    fn test_unconfigured_skips_check() {
        let mut fota = fota(FakeHttp::ok_json(MANIFEST), firmware(256), "");
        assert_eq!(fota.check_and_update().unwrap(), None);
        assert!(fota.checker().http().requests.is_empty());
    }

    #[test]
    fn test_force_update_bypasses_manifest() {
        let mut fota = fota(FakeHttp::offline(), firmware(128), "https://fw/check");
        let outcome = fota.force_update("10.0.0.2", 8443, "/manual.bin").unwrap();

        assert_eq!(outcome.bytes_written, 128);
        assert!(fota.checker().http().requests.is_empty());
        assert_eq!(
            fota.executor().transport().connected_to,
            Some(("10.0.0.2".to_string(), 8443))
        );
    }

    #[test]
    fn test_configured_timeout_reaches_executor() {
        let config = FotaConfig {
            check_url: "https://fw/check".to_string(),
            first_byte_timeout_ms: 1_000,
            ..FotaConfig::default()
        };
        let mut fota: TestFota = Fota::new(
            config,
            FirmwareIdentity::new("wordclock", 4),
            ManifestChecker::new(FakeHttp::ok_json(MANIFEST), FixedDeviceId(7)),
            UpdateExecutor::new(
                ScriptedTransport::silent(),
                FakeFlash::new(1 << 16),
                FakeClock::new(10),
                FakeReboot::default(),
            ),
        );
        assert_eq!(fota.config().first_byte_timeout_ms, 1_000);
        assert_eq!(fota.identity().firmware_version, 4);

        let err = fota.check_and_update().unwrap_err();
        assert!(matches!(err, FotaError::Timeout { waited_ms } if (1_000..2_000).contains(&waited_ms)));
        assert!(fota.executor().clock().elapsed_ms() < 2_000);
    }

    #[test]
    fn test_failed_update_is_reported() {
        let transport = ScriptedTransport::silent();
        let mut fota = fota(FakeHttp::ok_json(MANIFEST), transport, "https://fw/check");

        let err = fota.check_and_update().unwrap_err();
        assert_eq!(err.reason(), FailureReason::Timeout);
        assert_eq!(fota.executor().reboot_handle().count, 0);
    }
}
