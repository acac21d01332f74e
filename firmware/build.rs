use std::env;
use std::fs;
use std::path::Path;

fn main() -> anyhow::Result<()> {
    // Necessary for ESP-IDF
    embuild::espidf::sysenv::output();

    // Add crash log helper for better panic diagnostics
    println!("cargo:rustc-link-arg=-Wl,--undefined=esp_backtrace_print_app_description");

    // Read WiFi configuration if it exists
    let wifi_config_path = "wifi_config.h";
    println!("cargo:rerun-if-changed={}", wifi_config_path);
    if Path::new(wifi_config_path).exists() {
        let contents = fs::read_to_string(wifi_config_path)?;

        for (define, var) in [("#define WIFI_SSID", "WIFI_SSID"), ("#define WIFI_PASSWORD", "WIFI_PASSWORD")] {
            let value = contents
                .lines()
                .find(|l| l.contains(define))
                .and_then(|l| l.split('"').nth(1))
                .unwrap_or("");
            println!("cargo:rustc-env={}={}", var, value);
        }
    } else {
        // Use empty defaults if no config file
        println!("cargo:rustc-env=WIFI_SSID=");
        println!("cargo:rustc-env=WIFI_PASSWORD=");
        println!("cargo:warning=wifi_config.h not found! Copy wifi_config.h.example to wifi_config.h and add your credentials.");
    }

    // Firmware identity advertised to the manifest server. The release
    // pipeline sets FIRMWARE_VERSION to the build number it publishes.
    println!("cargo:rerun-if-env-changed=FIRMWARE_VERSION");
    println!("cargo:rerun-if-env-changed=FIRMWARE_TYPE");
    let version = env::var("FIRMWARE_VERSION").unwrap_or_else(|_| "1".to_string());
    if version.parse::<u32>().is_err() {
        anyhow::bail!("FIRMWARE_VERSION must be an unsigned integer, got '{}'", version);
    }
    let firmware_type = env::var("FIRMWARE_TYPE").unwrap_or_else(|_| "wordclock".to_string());
    println!("cargo:rustc-env=FIRMWARE_VERSION={}", version);
    println!("cargo:rustc-env=FIRMWARE_TYPE={}", firmware_type);

    Ok(())
}
