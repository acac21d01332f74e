use anyhow::Result;
use esp_idf_svc::nvs::{EspDefaultNvsPartition, EspNvs, NvsDefault};
use fota_core::FotaConfig;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;

const CONFIG_NAMESPACE: &str = "wordclock";
const CONFIG_KEY: &str = "config";
const MAX_CONFIG_SIZE: usize = 2048;

/// One-shot install request left by the operator; cleared before it runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForcedUpdate {
    pub host: String,
    pub port: u16,
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    // WiFi settings
    pub wifi_ssid: String,
    pub wifi_password: String,

    // UDP multicast logger
    pub log_multicast_addr: Ipv4Addr,
    pub log_multicast_port: u16,
    pub log_level: String,

    pub fota: FotaConfig,
    pub force_update: Option<ForcedUpdate>,
}

impl Default for Config {
    fn default() -> Self {
        // Get WiFi credentials from environment variables set by build.rs
        // These come from wifi_config.h which should NOT be committed to git
        let wifi_ssid = env!("WIFI_SSID");
        let wifi_password = env!("WIFI_PASSWORD");

        Self {
            wifi_ssid: wifi_ssid.to_string(),
            wifi_password: wifi_password.to_string(),
            log_multicast_addr: Ipv4Addr::new(230, 120, 10, 2),
            log_multicast_port: 8123,
            log_level: "info".to_string(),
            fota: FotaConfig::default(),
            force_update: None,
        }
    }
}

/// JSON config blob in NVS
pub struct ConfigStore {
    nvs: EspNvs<NvsDefault>,
}

impl ConfigStore {
    pub fn new(partition: EspDefaultNvsPartition) -> Result<Self> {
        let nvs = EspNvs::new(partition, CONFIG_NAMESPACE, true)?;
        Ok(Self { nvs })
    }

    pub fn load_or_default(&mut self) -> Config {
        match self.load() {
            Ok(mut config) => {
                log::info!("Loaded configuration from NVS");

                // If NVS has empty WiFi credentials, use the compiled-in ones
                if config.wifi_ssid.is_empty() {
                    let defaults = Config::default();
                    log::warn!("NVS WiFi credentials empty, using compiled defaults: SSID='{}'", defaults.wifi_ssid);
                    config.wifi_ssid = defaults.wifi_ssid;
                    config.wifi_password = defaults.wifi_password;
                }
                config
            }
            Err(e) => {
                log::warn!("Failed to load config from NVS: {:?}, using defaults", e);
                let config = Config::default();

                // Try to save default config to NVS for next time
                if let Err(save_err) = self.save(&config) {
                    log::warn!("Failed to save default config to NVS: {:?}", save_err);
                }
                config
            }
        }
    }

    pub fn save(&mut self, config: &Config) -> Result<()> {
        let json = serde_json::to_vec(config)?;
        self.nvs.set_blob(CONFIG_KEY, &json)?;
        log::info!("Configuration saved to NVS");
        Ok(())
    }

    /// Removes the pending forced update from NVS and hands it back. Cleared
    /// first so a bad image that crashes on boot is not retried forever.
    pub fn take_forced_update(&mut self, config: &mut Config) -> Result<Option<ForcedUpdate>> {
        let Some(forced) = config.force_update.take() else {
            return Ok(None);
        };
        self.save(config)?;
        Ok(Some(forced))
    }

    fn load(&self) -> Result<Config> {
        let mut buf = vec![0u8; MAX_CONFIG_SIZE];
        let data = self
            .nvs
            .get_blob(CONFIG_KEY, &mut buf)?
            .ok_or_else(|| anyhow::anyhow!("Config not found in NVS"))?;

        let config: Config = serde_json::from_slice(data)?;
        Ok(config)
    }
}
