#![no_main]

//! Fuzz target for the JSON apply backend.
//!
//! Applies a parsed op to a parsed document; type and bounds violations must
//! surface as `ApplyError`, never as a panic.

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(s) = std::str::from_utf8(data) else {
        return;
    };

    // Split the input: first line is the op, the rest is the document.
    let Some((op_line, doc_text)) = s.split_once('\n') else {
        return;
    };
    let Ok(op) = serde_json::from_str::<unitytool_types::plan::PatchOp>(op_line) else {
        return;
    };
    let Ok(mut document) = serde_json::from_str::<serde_json::Value>(doc_text) else {
        return;
    };

    let _ = unitytool_patch::apply_op(&mut document, &op);
    let _ = unitytool_patch::preview_diff(std::slice::from_ref(&op));
});
