use esp_idf_hal::delay::FreeRtos;
use esp_idf_sys::{esp_efuse_mac_get_default, esp_restart, esp_timer_get_time, ESP_OK};
use fota_core::{Clock, DeviceIdentity, Reboot};

/// Boot-relative milliseconds; idling yields to other FreeRTOS tasks
pub struct EspClock;

impl Clock for EspClock {
    fn now_ms(&self) -> u64 {
        (unsafe { esp_timer_get_time() } / 1000) as u64
    }

    fn idle(&self) {
        FreeRtos::delay_ms(1);
    }
}

pub struct EspRestart;

impl Reboot for EspRestart {
    fn reboot(&mut self) {
        log::logger().flush();
        // Let the last multicast packets leave before the radio goes down
        FreeRtos::delay_ms(500);
        unsafe {
            esp_restart();
        }
    }
}

/// Factory MAC from efuse, as a decimal number
pub struct EfuseDeviceId {
    chip_id: u64,
}

impl EfuseDeviceId {
    pub fn read() -> anyhow::Result<Self> {
        let mut mac = [0u8; 8];
        let result = unsafe { esp_efuse_mac_get_default(mac.as_mut_ptr()) };
        if result != ESP_OK {
            anyhow::bail!("esp_efuse_mac_get_default failed: {}", result);
        }
        // Six MAC bytes, least significant first, upper two stay zero
        Ok(Self {
            chip_id: u64::from_le_bytes(mac),
        })
    }
}

impl DeviceIdentity for EfuseDeviceId {
    fn device_id(&self) -> String {
        self.chip_id.to_string()
    }
}
