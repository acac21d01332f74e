// Update slot writer on top of the ESP-IDF OTA partition API

use core::ffi::c_void;
use esp_idf_sys::{
    esp_err_t, esp_ota_abort, esp_ota_begin, esp_ota_end, esp_ota_get_next_update_partition,
    esp_ota_handle_t, esp_ota_set_boot_partition, esp_ota_write, esp_partition_t,
    esp_task_wdt_reset, ESP_OK,
};
use fota_core::FlashWriter;

pub struct EspFlashWriter {
    update_partition: *const esp_partition_t,
    ota_handle: Option<esp_ota_handle_t>,
    expected_size: u64,
    bytes_written: u64,
    committed: bool,
    last_error: esp_err_t,
}

impl EspFlashWriter {
    pub fn new() -> Self {
        Self {
            update_partition: core::ptr::null(),
            ota_handle: None,
            expected_size: 0,
            bytes_written: 0,
            committed: false,
            last_error: ESP_OK,
        }
    }

    fn abort(&mut self) {
        if let Some(handle) = self.ota_handle.take() {
            unsafe {
                esp_ota_abort(handle);
            }
        }
    }
}

impl FlashWriter for EspFlashWriter {
    type Error = anyhow::Error;

    fn begin(&mut self, size: u64) -> bool {
        self.abort();
        self.committed = false;
        self.bytes_written = 0;
        self.last_error = ESP_OK;

        let partition = unsafe { esp_ota_get_next_update_partition(core::ptr::null()) };
        if partition.is_null() {
            log::error!("No OTA update partition available");
            return false;
        }

        let capacity = unsafe { (*partition).size } as u64;
        if size == 0 || size > capacity {
            log::warn!("Image of {} bytes does not fit update slot of {} bytes", size, capacity);
            return false;
        }

        let mut handle: esp_ota_handle_t = 0;
        let result = unsafe { esp_ota_begin(partition, size as _, &mut handle as *mut _) };
        if result != ESP_OK {
            self.last_error = result;
            log::error!("esp_ota_begin failed: {}", result);
            return false;
        }

        self.update_partition = partition;
        self.ota_handle = Some(handle);
        self.expected_size = size;
        true
    }

    fn write(&mut self, chunk: &[u8]) -> Result<(), Self::Error> {
        let Some(handle) = self.ota_handle else {
            anyhow::bail!("write before begin");
        };

        let result = unsafe { esp_ota_write(handle, chunk.as_ptr() as *const c_void, chunk.len() as _) };
        if result != ESP_OK {
            self.last_error = result;
            anyhow::bail!("esp_ota_write failed: {}", result);
        }
        self.bytes_written += chunk.len() as u64;

        // A transfer that stalls stops feeding the watchdog and the device
        // resets into the image it is running now
        unsafe {
            esp_task_wdt_reset();
        }
        Ok(())
    }

    fn end(&mut self) -> bool {
        let Some(handle) = self.ota_handle.take() else {
            return false;
        };

        // A short image is dropped, not committed. The session still closes
        // cleanly and is_finished() reports the missing bytes.
        if self.bytes_written != self.expected_size {
            unsafe {
                esp_ota_abort(handle);
            }
            log::warn!(
                "Discarding short image: {}/{} bytes",
                self.bytes_written,
                self.expected_size
            );
            return true;
        }

        // esp_ota_end validates the image and frees the handle either way
        let result = unsafe { esp_ota_end(handle) };
        if result != ESP_OK {
            self.last_error = result;
            return false;
        }

        let result = unsafe { esp_ota_set_boot_partition(self.update_partition) };
        if result != ESP_OK {
            self.last_error = result;
            return false;
        }

        self.committed = true;
        true
    }

    fn is_finished(&self) -> bool {
        self.committed && self.bytes_written == self.expected_size
    }

    fn error_code(&self) -> i32 {
        self.last_error
    }
}

impl Drop for EspFlashWriter {
    fn drop(&mut self) {
        self.abort();
    }
}
