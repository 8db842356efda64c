//! Device identity derived from the factory MAC address.
//!
//! The chip id is the last three MAC bytes read as a number.  It makes the
//! access-point SSID unique (`emonDC_<chipid>`) and is deterministic
//! across reboots.

use core::fmt::Write;

/// Full 6-byte MAC address.
pub type MacAddress = [u8; 6];

/// mDNS / DHCP hostname.  Try `http://emondc.local`.
pub const HOSTNAME: &str = "emondc";

/// Prefix of the access-point SSID.
pub const AP_SSID_PREFIX: &str = "emonDC";

/// Read the factory MAC address from eFuse.
#[cfg(target_os = "espidf")]
pub fn read_mac() -> MacAddress {
    let mut mac: MacAddress = [0u8; 6];
    unsafe {
        esp_idf_svc::sys::esp_efuse_mac_get_default(mac.as_mut_ptr());
    }
    mac
}

/// Simulation: returns a deterministic fake MAC.
#[cfg(not(target_os = "espidf"))]
pub fn read_mac() -> MacAddress {
    [0xDE, 0xAD, 0xBE, 0xEF, 0xCA, 0xFE]
}

pub fn chip_id(mac: &MacAddress) -> u32 {
    u32::from(mac[3]) << 16 | u32::from(mac[4]) << 8 | u32::from(mac[5])
}

/// `emonDC_<chipid>`, chip id in decimal.
pub fn ap_ssid(mac: &MacAddress) -> heapless::String<32> {
    let mut s = heapless::String::new();
    let _ = write!(s, "{AP_SSID_PREFIX}_{}", chip_id(mac));
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chip_id_uses_low_three_bytes() {
        let mac = [0x00, 0x11, 0x22, 0x00, 0x01, 0x02];
        assert_eq!(chip_id(&mac), 258);
    }

    #[test]
    fn ap_ssid_format() {
        let mac = [0x00, 0x11, 0x22, 0xAA, 0xBB, 0xCC];
        assert_eq!(ap_ssid(&mac).as_str(), "emonDC_11189196");
    }

    #[test]
    fn sim_mac_deterministic() {
        assert_eq!(read_mac(), read_mac());
        assert_eq!(ap_ssid(&read_mac()).as_str(), "emonDC_15715070");
    }
}
