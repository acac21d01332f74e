use anyhow::Result;
use esp_idf_hal::delay::FreeRtos;
use esp_idf_hal::prelude::*;
use esp_idf_svc::{eventloop::EspSystemEventLoop, nvs::EspDefaultNvsPartition};
use esp_idf_sys as _; // Binstart
use fota_core::{CheckSchedule, Clock, Fota, ManifestChecker, TrustMode, UpdateExecutor};

use log::info;

// Generate ESP-IDF app descriptor
#[allow(unexpected_cfgs)]
mod app_desc {
    esp_idf_sys::esp_app_desc!();
}

mod config;
mod logging;
mod network;
mod ota;
mod version;

use crate::config::{Config, ConfigStore};
use crate::network::{http_client::EspHttpGetter, udp_logger::UdpLogger, wifi::WifiManager};
use crate::ota::{EfuseDeviceId, EspClock, EspFlashWriter, EspRestart, EspTlsTransport};

/// Long enough for a TLS handshake plus the manifest GET
const WATCHDOG_TIMEOUT_MS: u32 = 30_000;
const LOOP_DELAY_MS: u32 = 1000;
const WIFI_RETRY_MS: u64 = 30_000;

fn main() -> Result<()> {
    esp_idf_svc::sys::link_patches();

    if let Err(e) = logging::init_logger() {
        println!("Logger init failed: {:?}", e);
    }
    info!("Word clock {}", version::version_info());

    configure_watchdog();

    let peripherals = Peripherals::take()?;
    let sys_loop = EspSystemEventLoop::take()?;
    let nvs = EspDefaultNvsPartition::take()?;

    let mut store = ConfigStore::new(nvs.clone())?;
    let mut config = store.load_or_default();
    if !logging::set_max_level_from_str(&config.log_level) {
        log::warn!("Unknown log level '{}', keeping info", config.log_level);
    }

    let mut wifi = WifiManager::new(
        peripherals.modem,
        sys_loop,
        nvs,
        config.wifi_ssid.clone(),
        config.wifi_password.clone(),
    )?;
    if let Err(e) = wifi.connect() {
        log::warn!("WiFi connection failed: {:?}, will retry", e);
    }
    start_udp_logger(&wifi, &config);

    let trust = config.fota.trust.clone();
    if let TrustMode::Pinned { ca_pem } = &trust {
        ota::install_global_ca(ca_pem)?;
    }
    if !trust.verifies_server() {
        log::warn!("Update server certificates are not verified");
    }

    let checker = ManifestChecker::new(EspHttpGetter::new(trust.clone()), EfuseDeviceId::read()?);
    let executor = UpdateExecutor::new(
        EspTlsTransport::new(trust),
        EspFlashWriter::new(),
        EspClock,
        EspRestart,
    );
    let mut fota = Fota::new(config.fota.clone(), version::identity(), checker, executor);
    let identity = fota.identity();
    info!(
        "Running {} v{} on device {}",
        identity.firmware_type,
        identity.firmware_version,
        fota.checker().device_id()
    );
    let fota_config = fota.config();
    info!(
        "Update check: {} every {} ms (auto update {})",
        if fota_config.is_configured() { fota_config.check_url.as_str() } else { "<not configured>" },
        fota_config.check_period_ms,
        fota_config.auto_update
    );
    let auto_update = fota_config.auto_update;
    let mut schedule = CheckSchedule::new(fota_config.check_period_ms);

    let mut last_decile = 0;
    fota.executor_mut().on_progress(move |written, total| {
        let decile = if total == 0 { 0 } else { written * 10 / total };
        if written == 0 || decile < last_decile {
            last_decile = 0;
        }
        if decile > last_decile {
            last_decile = decile;
            info!("Update progress: {}% ({}/{})", decile * 10, written, total);
        }
    });
    fota.executor_mut().on_complete(|| {
        info!("Firmware written, switching boot slot");
        log::logger().flush();
    });

    match store.take_forced_update(&mut config) {
        Ok(Some(forced)) if wifi.is_connected() => {
            if let Err(e) = fota.force_update(&forced.host, forced.port, &forced.path) {
                log::error!("Forced update failed: {} ({})", e, e.reason());
            }
        }
        Ok(Some(forced)) => {
            log::warn!("Dropping forced update from {}: network is down", forced.host);
        }
        Ok(None) => {}
        Err(e) => log::warn!("Could not clear forced update, skipping it: {:?}", e),
    }

    let clock = EspClock;
    let mut last_wifi_attempt = clock.now_ms();

    loop {
        unsafe {
            esp_idf_sys::esp_task_wdt_reset();
        }
        let now = clock.now_ms();

        if !wifi.is_connected() {
            if now.saturating_sub(last_wifi_attempt) >= WIFI_RETRY_MS {
                last_wifi_attempt = now;
                match wifi.connect() {
                    Ok(()) => start_udp_logger(&wifi, &config),
                    Err(e) => log::warn!("WiFi reconnect failed: {:?}", e),
                }
            }
        } else if auto_update && schedule.is_due(now) {
            schedule.mark_checked(now);
            // Success never returns: the device resets into the new image
            if let Err(e) = fota.check_and_update() {
                log::error!("Firmware update failed: {} ({})", e, e.reason());
            }
        }

        FreeRtos::delay_ms(LOOP_DELAY_MS);
    }
}

fn configure_watchdog() {
    unsafe {
        // First deinit if already initialized
        let _ = esp_idf_sys::esp_task_wdt_deinit();

        let wdt_config = esp_idf_sys::esp_task_wdt_config_t {
            timeout_ms: WATCHDOG_TIMEOUT_MS,
            idle_core_mask: 0,
            trigger_panic: true,
        };
        let result = esp_idf_sys::esp_task_wdt_init(&wdt_config as *const _);
        if result == esp_idf_sys::ESP_OK {
            info!("Watchdog timeout set to {} ms", WATCHDOG_TIMEOUT_MS);

            let add_result = esp_idf_sys::esp_task_wdt_add(std::ptr::null_mut());
            if add_result != esp_idf_sys::ESP_OK {
                log::warn!("Failed to add task to watchdog: {:?}", add_result);
            }
        } else {
            log::warn!("Watchdog reconfiguration failed: {:?}", result);
        }
    }
}

fn start_udp_logger(wifi: &WifiManager, config: &Config) {
    let Some(ip) = wifi.ip() else {
        return;
    };
    match UdpLogger::new(ip, config.log_multicast_addr, config.log_multicast_port) {
        Ok(udp) => logging::set_udp_logger(udp),
        Err(e) => log::warn!("UDP logger unavailable: {:?}", e),
    }
}
