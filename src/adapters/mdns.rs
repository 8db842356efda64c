//! mDNS service advertisement adapter.
//!
//! Advertises `emondc.local` with an `_http._tcp` service on port 80.
//! Uses the ESP-IDF mDNS component on target and is a no-op on
//! simulation targets.
//!
//! Lifecycle is tied to the station link: start on connect, stop when the
//! link is lost.

use log::info;

const MDNS_SERVICE_TYPE: &str = "_http";
const MDNS_SERVICE_PORT: u16 = 80;

/// mDNS advertisement adapter.
pub struct MdnsAdapter {
    hostname: &'static str,
    active: bool,
}

impl MdnsAdapter {
    pub fn new(hostname: &'static str) -> Self {
        Self {
            hostname,
            active: false,
        }
    }

    /// Whether mDNS is currently advertising.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Start hostname + service advertisement.
    /// Call after the station has an IP.
    pub fn start(&mut self) {
        if self.active {
            return;
        }
        self.platform_start();
        self.active = true;
        info!(
            "mDNS: advertising {}.local {}._tcp:{}",
            self.hostname, MDNS_SERVICE_TYPE, MDNS_SERVICE_PORT
        );
    }

    pub fn stop(&mut self) {
        if !self.active {
            return;
        }
        self.platform_stop();
        self.active = false;
        info!("mDNS: stopped");
    }

    // ── Platform-specific ─────────────────────────────────────

    #[cfg(target_os = "espidf")]
    fn platform_start(&self) {
        use esp_idf_svc::sys::*;
        unsafe {
            let ret = mdns_init();
            if ret != ESP_OK as i32 {
                log::error!("mDNS: mdns_init failed ({})", ret);
                return;
            }

            let mut hostname_buf = [0u8; 32];
            let hb = self.hostname.as_bytes();
            let hl = hb.len().min(31);
            hostname_buf[..hl].copy_from_slice(&hb[..hl]);
            mdns_hostname_set(hostname_buf.as_ptr() as *const _);
            mdns_instance_name_set(b"emonDC\0".as_ptr() as *const _);

            mdns_service_add(
                core::ptr::null(),
                b"_http\0".as_ptr() as *const _,
                b"_tcp\0".as_ptr() as *const _,
                MDNS_SERVICE_PORT,
                core::ptr::null_mut(),
                0,
            );
        }
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_start(&self) {
        info!("mDNS(sim): registered {}.local", self.hostname);
    }

    #[cfg(target_os = "espidf")]
    fn platform_stop(&self) {
        unsafe {
            esp_idf_svc::sys::mdns_free();
        }
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_stop(&self) {
        info!("mDNS(sim): unregistered");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_stop_lifecycle() {
        let mut m = MdnsAdapter::new("emondc");
        assert!(!m.is_active());
        m.start();
        assert!(m.is_active());
        m.stop();
        assert!(!m.is_active());
    }

    #[test]
    fn double_start_is_idempotent() {
        let mut m = MdnsAdapter::new("emondc");
        m.start();
        m.start();
        assert!(m.is_active());
    }

    #[test]
    fn stop_when_inactive_is_noop() {
        let mut m = MdnsAdapter::new("emondc");
        m.stop();
        assert!(!m.is_active());
    }
}
