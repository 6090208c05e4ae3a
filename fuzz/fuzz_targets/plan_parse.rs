#![no_main]

//! Fuzz target for patch-plan parsing.
//!
//! Feeds arbitrary JSON bytes into `PatchPlan` deserialization and schema
//! validation to ensure malformed plans never panic.

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(s) = std::str::from_utf8(data) else {
        return;
    };

    let result = serde_json::from_str::<unitytool_types::plan::PatchPlan>(s);

    // A parsed plan must survive validation and re-serialization.
    if let Ok(plan) = result {
        let _ = plan.validate();
        let _ = plan.target_extension();
        let _ = serde_json::to_string(&plan);
    }

    // Also try the component types on their own.
    let _ = serde_json::from_str::<unitytool_types::plan::PatchOp>(s);
    let _ = serde_json::from_str::<Vec<unitytool_types::plan::PatchOp>>(s);
    let _ = serde_json::from_str::<unitytool_types::plan::PatchValue>(s);
    let _ = serde_json::from_str::<unitytool_types::attest::Attestation>(s);
});
