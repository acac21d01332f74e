// TLS socket for the firmware download, driven through the raw esp-tls API

use anyhow::{bail, Result};
use core::ffi::{c_char, c_void};
use esp_idf_sys::{
    esp_crt_bundle_attach, esp_tls_cfg_t, esp_tls_conn_destroy, esp_tls_conn_new_sync,
    esp_tls_conn_read, esp_tls_conn_write, esp_tls_get_bytes_avail, esp_tls_init,
    esp_tls_set_global_ca_store, esp_tls_t, ssize_t, ESP_OK,
};
use fota_core::{Transport, TrustMode};
use std::time::{Duration, Instant};

// mbedtls status codes passed through by esp_tls_conn_read/write
const SSL_WANT_READ: ssize_t = -0x6900;
const SSL_WANT_WRITE: ssize_t = -0x6880;

/// Socket receive timeout; bounds each `available()` poll
const POLL_TIMEOUT_MS: i32 = 20;

/// Longest silence tolerated in the middle of the body
const READ_STALL: Duration = Duration::from_secs(10);

const PEEK_LEN: usize = 1024;

/// Load a PEM CA into the esp-tls global store, used for `TrustMode::Pinned`
pub fn install_global_ca(ca_pem: &str) -> Result<()> {
    // esp-tls wants the terminating NUL counted for PEM input
    let mut pem = Vec::with_capacity(ca_pem.len() + 1);
    pem.extend_from_slice(ca_pem.as_bytes());
    pem.push(0);

    let result = unsafe { esp_tls_set_global_ca_store(pem.as_ptr(), pem.len() as _) };
    if result != ESP_OK {
        bail!("esp_tls_set_global_ca_store failed: {}", result);
    }
    log::info!("Pinned CA installed ({} bytes)", ca_pem.len());
    Ok(())
}

pub struct EspTlsTransport {
    tls: *mut esp_tls_t,
    trust: TrustMode,
    peek: Vec<u8>,
    eof: bool,
}

impl EspTlsTransport {
    pub fn new(trust: TrustMode) -> Self {
        Self {
            tls: core::ptr::null_mut(),
            trust,
            peek: Vec::new(),
            eof: false,
        }
    }

    fn config(&self) -> esp_tls_cfg_t {
        let mut cfg: esp_tls_cfg_t = unsafe { std::mem::zeroed() };
        cfg.timeout_ms = POLL_TIMEOUT_MS;
        match self.trust {
            TrustMode::Insecure => {
                cfg.skip_common_name = true;
            }
            TrustMode::CertificateBundle => {
                cfg.crt_bundle_attach = Some(esp_crt_bundle_attach);
            }
            TrustMode::Pinned { .. } => {
                cfg.use_global_ca_store = true;
            }
        }
        cfg
    }

    /// One bounded read attempt. `Ok(None)` means nothing arrived within the poll timeout.
    fn read_once(&mut self, buf: &mut [u8]) -> Result<Option<usize>> {
        if self.tls.is_null() {
            bail!("not connected");
        }
        let n = unsafe { esp_tls_conn_read(self.tls, buf.as_mut_ptr() as *mut c_void, buf.len()) };
        match n {
            0 => {
                self.eof = true;
                Ok(Some(0))
            }
            n if n > 0 => Ok(Some(n as usize)),
            SSL_WANT_READ | SSL_WANT_WRITE => Ok(None),
            err => {
                self.eof = true;
                bail!("esp_tls_conn_read failed: {}", err)
            }
        }
    }
}

impl Transport for EspTlsTransport {
    type Error = anyhow::Error;

    fn connect(&mut self, host: &str, port: u16) -> Result<()> {
        self.close();

        let tls = unsafe { esp_tls_init() };
        if tls.is_null() {
            bail!("esp_tls_init: out of memory");
        }

        let cfg = self.config();
        let result = unsafe {
            esp_tls_conn_new_sync(
                host.as_ptr() as *const c_char,
                host.len() as _,
                port as _,
                &cfg,
                tls,
            )
        };
        if result != 1 {
            unsafe {
                esp_tls_conn_destroy(tls);
            }
            bail!("TLS connection to {}:{} failed", host, port);
        }

        self.tls = tls;
        self.eof = false;
        Ok(())
    }

    fn write_all(&mut self, mut data: &[u8]) -> Result<()> {
        if self.tls.is_null() {
            bail!("not connected");
        }
        while !data.is_empty() {
            let n = unsafe { esp_tls_conn_write(self.tls, data.as_ptr() as *const c_void, data.len()) };
            match n {
                n if n > 0 => data = &data[n as usize..],
                SSL_WANT_READ | SSL_WANT_WRITE => continue,
                err => bail!("esp_tls_conn_write failed: {}", err),
            }
        }
        Ok(())
    }

    fn available(&mut self) -> usize {
        if !self.peek.is_empty() {
            return self.peek.len();
        }
        if self.tls.is_null() || self.eof {
            return 0;
        }

        let buffered = unsafe { esp_tls_get_bytes_avail(self.tls) };
        if buffered > 0 {
            return buffered as usize;
        }

        let mut buf = [0u8; PEEK_LEN];
        match self.read_once(&mut buf) {
            Ok(Some(n)) => {
                self.peek.extend_from_slice(&buf[..n]);
                n
            }
            _ => 0,
        }
    }

    fn connected(&mut self) -> bool {
        !self.tls.is_null() && (!self.eof || !self.peek.is_empty())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if !self.peek.is_empty() {
            let n = buf.len().min(self.peek.len());
            buf[..n].copy_from_slice(&self.peek[..n]);
            self.peek.drain(..n);
            return Ok(n);
        }
        if self.eof {
            return Ok(0);
        }

        let started = Instant::now();
        loop {
            if let Some(n) = self.read_once(buf)? {
                return Ok(n);
            }
            if started.elapsed() > READ_STALL {
                bail!("no data for {:?}", READ_STALL);
            }
        }
    }

    fn close(&mut self) {
        if !self.tls.is_null() {
            unsafe {
                esp_tls_conn_destroy(self.tls);
            }
            self.tls = core::ptr::null_mut();
        }
        self.peek.clear();
        self.eof = false;
    }
}

impl Drop for EspTlsTransport {
    fn drop(&mut self) {
        self.close();
    }
}
