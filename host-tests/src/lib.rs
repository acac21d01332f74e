//! Host-based tests for the word clock FOTA engine
//! These tests run on the development machine, not on the ESP32

use std::sync::{Mutex, OnceLock};

use log::{LevelFilter, Metadata, Record};

/// Log sink that keeps every formatted line so tests can assert on them
struct CaptureLogger {
    lines: Mutex<Vec<String>>,
}

impl log::Log for CaptureLogger {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.push(format!("[{}] {}", record.level(), record.args()));
        }
    }

    fn flush(&self) {}
}

static LOGGER: OnceLock<&'static CaptureLogger> = OnceLock::new();

/// Install the capturing logger once per test binary
pub fn capture_logs() {
    LOGGER.get_or_init(|| {
        let logger: &'static CaptureLogger = Box::leak(Box::new(CaptureLogger {
            lines: Mutex::new(Vec::new()),
        }));
        let _ = log::set_logger(logger);
        log::set_max_level(LevelFilter::Trace);
        logger
    });
}

/// True if any captured line contains `needle`
pub fn logged(needle: &str) -> bool {
    LOGGER
        .get()
        .and_then(|logger| logger.lines.lock().ok().map(|lines| lines.iter().any(|l| l.contains(needle))))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    use fota_core::fakes::{FakeClock, FakeFlash, FakeHttp, FakeReboot, FixedDeviceId, ScriptedTransport};
    use fota_core::{
        FailureReason, FirmwareIdentity, FlashWriter, Fota, FotaConfig, ManifestChecker, Phase,
        UpdateExecutor, UpdateRequest,
    };

    type HostFota = Fota<FakeHttp, FixedDeviceId, ScriptedTransport, FakeFlash, FakeClock, FakeReboot>;

    const OCTET: &str = "application/octet-stream";

    fn manifest(version: u32, firmware_type: &str) -> String {
        format!(
            r#"{{"type":"{}","version":{},"host":"updates.wordclock.local","port":443,"firmware":"/bin/wordclock-{}.bin"}}"#,
            firmware_type, version, version
        )
    }

    fn build(http: FakeHttp, transport: ScriptedTransport, flash: FakeFlash) -> HostFota {
        capture_logs();
        let config = FotaConfig {
            check_url: "https://updates.wordclock.local/check".to_string(),
            use_device_id: true,
            ..FotaConfig::default()
        };
        Fota::new(
            config,
            FirmwareIdentity::new("wordclock", 12),
            ManifestChecker::new(http, FixedDeviceId(0x00C0_FFEE)),
            UpdateExecutor::new(transport, flash, FakeClock::new(5), FakeReboot::default()),
        )
    }

    fn image(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 % 256) as u8).collect()
    }

    /// Two-slot flash that only switches the boot slot for a complete image
    #[derive(Default)]
    struct AbSlots {
        expected: u64,
        written: u64,
        open: bool,
        boot_switched: bool,
        aborted: bool,
    }

    impl FlashWriter for AbSlots {
        type Error = String;

        fn begin(&mut self, size: u64) -> bool {
            *self = Self {
                expected: size,
                open: true,
                ..Self::default()
            };
            true
        }

        fn write(&mut self, chunk: &[u8]) -> Result<(), Self::Error> {
            if !self.open {
                return Err("write before begin".to_string());
            }
            self.written += chunk.len() as u64;
            Ok(())
        }

        fn end(&mut self) -> bool {
            if !std::mem::take(&mut self.open) {
                return false;
            }
            if self.written != self.expected {
                self.aborted = true;
                return true;
            }
            self.boot_switched = true;
            true
        }

        fn is_finished(&self) -> bool {
            self.boot_switched && self.written == self.expected
        }

        fn error_code(&self) -> i32 {
            0
        }
    }

    #[test]
    fn full_cycle_flashes_and_reboots() {
        let body = image(1024);
        let mut fota = build(
            FakeHttp::ok_json(&manifest(13, "wordclock")),
            ScriptedTransport::firmware_response("200 OK", OCTET, 1024, &body),
            FakeFlash::new(1 << 20),
        );

        let progress = Rc::new(RefCell::new(Vec::new()));
        let completions = Rc::new(RefCell::new(0u32));
        {
            let progress = progress.clone();
            let completions = completions.clone();
            let executor = fota.executor_mut();
            executor.on_progress(move |w, t| progress.borrow_mut().push((w, t)));
            executor.on_complete(move || *completions.borrow_mut() += 1);
        }

        let outcome = fota.check_and_update().expect("update succeeds");
        assert!(outcome.is_some());

        assert_eq!(
            fota.checker().http().requests,
            vec!["https://updates.wordclock.local/check?id=12648430".to_string()]
        );
        assert!(fota
            .executor()
            .transport()
            .sent_text()
            .starts_with("GET /bin/wordclock-13.bin HTTP/1.1\r\nHost: updates.wordclock.local\r\n"));
        assert_eq!(fota.executor().flash().image, body);
        assert_eq!(*completions.borrow(), 1);
        assert_eq!(progress.borrow().last(), Some(&(1024, 1024)));
        assert_eq!(fota.executor().state().phase, Phase::Rebooting);
        assert_eq!(fota.executor().reboot_handle().count, 1);
        assert!(logged("Update successfully completed. Rebooting."));
    }

    #[test]
    fn other_device_class_is_ignored() {
        let mut fota = build(
            FakeHttp::ok_json(&manifest(99, "nightlight")),
            ScriptedTransport::firmware_response("200 OK", OCTET, 16, &image(16)),
            FakeFlash::new(1 << 20),
        );

        assert_eq!(fota.check_and_update().unwrap(), None);
        assert!(fota.executor().transport().connected_to.is_none());
        assert_eq!(fota.executor().flash().begin_calls, 0);
    }

    #[test]
    fn server_error_on_check_is_quiet() {
        let mut fota = build(
            FakeHttp::status(503, "maintenance"),
            ScriptedTransport::firmware_response("200 OK", OCTET, 16, &image(16)),
            FakeFlash::new(1 << 20),
        );

        assert_eq!(fota.check_and_update().unwrap(), None);
        assert!(logged("Error on HTTP request: status 503"));
    }

    #[test]
    fn garbage_manifest_is_quiet() {
        let mut fota = build(
            FakeHttp::ok_json("<html>captive portal</html>"),
            ScriptedTransport::firmware_response("200 OK", OCTET, 16, &image(16)),
            FakeFlash::new(1 << 20),
        );

        assert_eq!(fota.check_and_update().unwrap(), None);
        assert!(logged("MANIFEST_PARSE_ERROR"));
    }

    #[test]
    fn text_plain_firmware_never_touches_flash() {
        let mut fota = build(
            FakeHttp::ok_json(&manifest(13, "wordclock")),
            ScriptedTransport::firmware_response("200 OK", "text/plain", 1024, &image(1024)),
            FakeFlash::new(1 << 20),
        );

        let err = fota.check_and_update().unwrap_err();
        assert_eq!(err.reason(), FailureReason::InvalidResponse);
        assert_eq!(fota.executor().flash().begin_calls, 0);
        assert!(logged("There was no content in the response"));
    }

    #[test]
    fn silent_server_times_out_and_closes() {
        let mut fota = build(
            FakeHttp::ok_json(&manifest(13, "wordclock")),
            ScriptedTransport::silent(),
            FakeFlash::new(1 << 20),
        );

        let err = fota.check_and_update().unwrap_err();
        assert_eq!(err.reason(), FailureReason::Timeout);
        assert!(fota.executor().transport().closed);
        assert!(logged("Client Timeout !"));
    }

    #[test]
    fn no_space_never_streams() {
        let mut fota = build(
            FakeHttp::ok_json(&manifest(13, "wordclock")),
            ScriptedTransport::firmware_response("200 OK", OCTET, 1024, &image(1024)),
            FakeFlash::new(1000),
        );

        let err = fota.check_and_update().unwrap_err();
        assert_eq!(err.reason(), FailureReason::InsufficientSpace);
        assert_eq!(fota.executor().flash().stream_calls, 0);
        assert!(logged("Not enough space to begin OTA"));
    }

    #[test]
    fn truncated_download_is_not_booted() {
        let mut fota = build(
            FakeHttp::ok_json(&manifest(13, "wordclock")),
            ScriptedTransport::firmware_response("200 OK", OCTET, 1024, &image(900)),
            FakeFlash::new(1 << 20),
        );

        let err = fota.check_and_update().unwrap_err();
        assert_eq!(err.reason(), FailureReason::IncompleteImage);
        assert_eq!(fota.executor().flash().end_calls, 1);
        assert_eq!(fota.executor().reboot_handle().count, 0);
        assert!(logged("Written only : 900/1024"));
    }

    #[test]
    fn short_image_is_dropped_without_switching_slots() {
        capture_logs();
        let transport = ScriptedTransport::firmware_response("200 OK", OCTET, 4096, &image(3000));
        let mut executor = UpdateExecutor::new(transport, AbSlots::default(), FakeClock::new(5), FakeReboot::default());

        let err = executor
            .execute(&UpdateRequest::new("updates.wordclock.local", 443, "/bin/wordclock-13.bin"))
            .unwrap_err();

        assert_eq!(err.reason(), FailureReason::IncompleteImage);
        assert!(executor.flash().aborted);
        assert!(!executor.flash().boot_switched);
        assert_eq!(executor.reboot_handle().count, 0);
        assert!(logged("Update not finished? Something went wrong!"));
    }

    #[test]
    fn complete_image_switches_slots() {
        let transport = ScriptedTransport::firmware_response("200 OK", OCTET, 4096, &image(4096));
        let mut executor = UpdateExecutor::new(transport, AbSlots::default(), FakeClock::new(5), FakeReboot::default());

        executor
            .execute(&UpdateRequest::new("updates.wordclock.local", 443, "/bin/wordclock-13.bin"))
            .unwrap();
        assert!(executor.flash().boot_switched);
        assert!(!executor.flash().aborted);
        assert_eq!(executor.reboot_handle().count, 1);
    }

    #[test]
    fn forced_update_from_operator() {
        let mut fota = build(
            FakeHttp::offline(),
            ScriptedTransport::firmware_response("200 OK", OCTET, 2048, &image(2048)),
            FakeFlash::new(1 << 20),
        );

        fota.force_update("192.168.1.20", 8443, "/wordclock-dev.bin").unwrap();
        assert_eq!(
            fota.executor().transport().connected_to,
            Some(("192.168.1.20".to_string(), 8443))
        );
        assert_eq!(fota.executor().reboot_handle().count, 1);
    }

    #[test]
    fn repeated_checks_give_same_answer() {
        let mut fota = build(
            FakeHttp::ok_json(&manifest(13, "wordclock")),
            ScriptedTransport::silent(),
            FakeFlash::new(1 << 20),
        );

        let first = fota.check();
        for _ in 0..3 {
            assert_eq!(fota.check(), first);
        }
        assert!(first.should_update);
    }
}
