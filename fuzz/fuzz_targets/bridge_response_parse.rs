#![no_main]

//! Fuzz target for strict bridge-response validation.

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(response) = unitytool_types::wire::parse_bridge_response(data) {
        let envelope = response.into_envelope();
        let _ = serde_json::to_string(&envelope);
    }
});
