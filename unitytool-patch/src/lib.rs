//! Patch-plan lifecycle: loading, schema validation, content digests and
//! HMAC signatures, and the built-in JSON apply backend.
//!
//! Responsibilities:
//! - Load a plan file and surface schema violations as diagnostics.
//! - Hash/sign/attest plan bytes verbatim (digests are byte-exact).
//! - Apply ops to `.json` targets with a dry-run diff and atomic writes.

mod crypto;
mod error;
mod json_backend;
mod plan_io;

pub use crypto::{
    build_attestation, compute_plan_sha256, compute_plan_signature, hmac_sha256_hex,
    load_attestation, normalize_expected_digest, resolve_signing_key, sha256_hex,
};
pub use error::{ApplyError, PlanLoadError};
pub use json_backend::{DiffEntry, apply_json_target, apply_op, apply_ops, preview_diff};
pub use plan_io::{load_plan, schema_error_envelope};
