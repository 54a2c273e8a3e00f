//! Fuzz target: `Credentials::load_region`
//!
//! Feeds arbitrary bytes, as read back from flash, into each region.
//! A rejected region must leave the previous contents untouched; an
//! accepted one must hold exactly the input.
//!
//! cargo fuzz run fuzz_credential_regions

#![no_main]

use cloudlink::credentials::{Credentials, Region};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Some((&selector, bytes)) = data.split_first() else {
        return;
    };
    let region = Region::ALL[usize::from(selector) % Region::ALL.len()];

    let mut creds = Credentials::from_parts(b"CERT", b"KEY", "broker.example.com")
        .expect("fixture credentials are valid");
    let before = creds.region(region).to_vec();

    match creds.load_region(region, bytes) {
        Ok(()) => assert_eq!(creds.region(region), bytes),
        Err(_) => assert_eq!(creds.region(region), before.as_slice()),
    }
});
