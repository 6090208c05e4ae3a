use crate::error::PlanLoadError;
use camino::Utf8Path;
use fs_err as fs;
use serde_json::json;
use unitytool_types::codes;
use unitytool_types::envelope::{Diagnostic, Envelope};
use unitytool_types::plan::PatchPlan;

/// Read and parse a plan file. Schema validation is a separate step so the
/// caller can report violations as diagnostics instead of a parse failure.
pub fn load_plan(path: &Utf8Path) -> Result<PatchPlan, PlanLoadError> {
    let text = fs::read_to_string(path).map_err(|err| PlanLoadError::Io {
        message: err.to_string(),
    })?;
    serde_json::from_str(&text).map_err(|err| PlanLoadError::Json {
        message: err.to_string(),
    })
}

/// The SER001 envelope for a plan that failed schema validation.
pub fn schema_error_envelope(target: &str, op_count: usize, diagnostics: Vec<Diagnostic>) -> Envelope {
    Envelope::error(
        codes::SER001,
        "Patch plan schema validation failed.",
        json!({ "target": target, "op_count": op_count, "read_only": true }),
    )
    .with_diagnostics(diagnostics)
}
