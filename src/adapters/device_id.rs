//! Device identity derived from the factory MAC address.
//!
//! The broker client identifier defaults to the full 6-byte MAC in
//! uppercase hex (`DEADBEEFCAFE`).  It is deterministic across reboots
//! because the MAC is burned into eFuse.

use super::utils::push_hex_upper;

/// Client identifier string: 12 hex digits, sized to fit
/// [`LinkConfig::client_id`](crate::config::LinkConfig::client_id).
pub type ClientId = heapless::String<32>;

/// Full 6-byte MAC address.
pub type MacAddress = [u8; 6];

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

/// Derive the client identifier from all six MAC bytes.
pub fn client_id(mac: &MacAddress) -> ClientId {
    let mut id = ClientId::new();
    // 12 digits always fit in 32.
    let _ = push_hex_upper(&mut id, mac);
    id
}
