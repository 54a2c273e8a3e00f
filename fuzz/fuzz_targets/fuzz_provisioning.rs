//! Fuzz target: `parse_commissioning`
//!
//! Drives arbitrary bytes into the commissioning document parser and
//! asserts that it never panics and that anything it accepts is a
//! complete, in-capacity credential record that is not yet commissioned.
//!
//! cargo fuzz run fuzz_provisioning

#![no_main]

use cloudlink::credentials::{Credentials, Region};
use cloudlink::provisioning::parse_commissioning;
use libfuzzer_sys::fuzz_target;

fn check(creds: &Credentials) {
    assert!(creds.is_complete(), "accepted record must validate");
    assert!(!creds.is_commissioned(), "parser must not commission");
    for region in Region::ALL {
        assert!(creds.region(region).len() <= region.capacity());
    }
}

fuzz_target!(|data: &[u8]| {
    if let Ok(creds) = parse_commissioning(data) {
        check(&creds);
    }
});
