use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Attestation document for a patch plan.
///
/// The digest and signature are computed over the plan file's verbatim bytes,
/// so the attestation stays valid under byte-exact re-serialization only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attestation {
    pub sha256: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,

    pub generated_at_utc: DateTime<Utc>,

    pub plan_path: String,
}

impl Attestation {
    pub fn new(sha256: String, signature: Option<String>, plan_path: String) -> Self {
        Self {
            sha256,
            signature,
            generated_at_utc: Utc::now(),
            plan_path,
        }
    }
}
