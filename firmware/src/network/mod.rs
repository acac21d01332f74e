pub mod http_client;
pub mod udp_logger;
pub mod wifi;

/// True once the station interface holds a DHCP lease
pub fn sta_has_ip() -> bool {
    unsafe {
        let mut ip_info: esp_idf_sys::esp_netif_ip_info_t = std::mem::zeroed();
        let netif = esp_idf_sys::esp_netif_get_handle_from_ifkey(b"WIFI_STA_DEF\0".as_ptr() as *const ::core::ffi::c_char);
        if !netif.is_null() {
            esp_idf_sys::esp_netif_get_ip_info(netif, &mut ip_info) == esp_idf_sys::ESP_OK && ip_info.ip.addr != 0
        } else {
            false
        }
    }
}
