// Manifest GET over the ESP-IDF HTTP client

use anyhow::{bail, Result};
use embedded_svc::http::client::{Client, Method};
use embedded_svc::io::Read;
use esp_idf_svc::http::client::{Configuration as HttpConfig, EspHttpConnection};
use fota_core::{HttpGet, HttpResponse, TrustMode};
use std::time::Duration;

/// Manifests are a few hundred bytes; anything this large is not one
const MAX_BODY_LEN: usize = 8 * 1024;

pub struct EspHttpGetter {
    trust: TrustMode,
    timeout: Duration,
}

impl EspHttpGetter {
    pub fn new(trust: TrustMode) -> Self {
        Self {
            trust,
            timeout: Duration::from_secs(15),
        }
    }

    fn config(&self) -> HttpConfig {
        let mut config = HttpConfig {
            buffer_size: Some(4096),
            timeout: Some(self.timeout),
            ..Default::default()
        };
        match self.trust {
            TrustMode::Insecure => {}
            TrustMode::CertificateBundle => {
                config.crt_bundle_attach = Some(esp_idf_sys::esp_crt_bundle_attach);
            }
            TrustMode::Pinned { .. } => {
                config.use_global_ca_store = true;
            }
        }
        config
    }
}

impl HttpGet for EspHttpGetter {
    type Error = anyhow::Error;

    fn is_connected(&self) -> bool {
        super::sta_has_ip()
    }

    fn get(&mut self, url: &str) -> Result<HttpResponse> {
        let mut client = Client::wrap(EspHttpConnection::new(&self.config())?);
        let request = client.request(Method::Get, url, &[("Cache-Control", "no-cache")])?;
        let mut response = request.submit()?;
        let status = response.status();

        let mut body = Vec::new();
        let mut buf = [0u8; 512];
        loop {
            let bytes_read = response.read(&mut buf)?;
            if bytes_read == 0 {
                break;
            }
            if body.len() + bytes_read > MAX_BODY_LEN {
                bail!("Response body exceeds {} bytes", MAX_BODY_LEN);
            }
            body.extend_from_slice(&buf[..bytes_read]);
        }

        Ok(HttpResponse { status, body })
    }
}
