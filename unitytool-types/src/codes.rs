//! Closed registry of envelope codes.
//!
//! The orchestrator never invents codes at runtime; every envelope carries one
//! of the constants below. Severity is assigned where the code is produced and
//! never upgraded or downgraded later.

// ── error registry ───────────────────────────────────────────────────────

/// Patch plan schema validation failed.
pub const SER001: &str = "SER001";
/// Value or target type constraint violated inside an apply backend.
pub const SER002: &str = "SER002";
/// Stale override patterns detected in a variant.
pub const PVR001: &str = "PVR001";
/// Referenced asset GUID is missing from the project index.
pub const REF001: &str = "REF001";
/// GUID resolved but the local file identifier was not found.
pub const REF002: &str = "REF002";
/// Runtime log classification matched error or critical categories.
pub const RUN001: &str = "RUN001";
/// Runtime scene path missing or not a `.unity` file.
pub const RUN002: &str = "RUN002";

pub const SER_APPLY_OK: &str = "SER_APPLY_OK";
pub const SER_UNSUPPORTED_TARGET: &str = "SER_UNSUPPORTED_TARGET";

pub const PLAN_DIGEST_MISMATCH: &str = "PLAN_DIGEST_MISMATCH";
pub const PLAN_SIGNATURE_MISMATCH: &str = "PLAN_SIGNATURE_MISMATCH";
pub const PLAN_ATTESTATION_MISMATCH: &str = "PLAN_ATTESTATION_MISMATCH";
pub const APPLY_CONFIRM_REQUIRED: &str = "APPLY_CONFIRM_REQUIRED";

pub const BRIDGE_TIMEOUT: &str = "BRIDGE_TIMEOUT";
pub const BRIDGE_UNITY_RESPONSE_SCHEMA: &str = "BRIDGE_UNITY_RESPONSE_SCHEMA";

pub const VALIDATE_RUNTIME_RESULT: &str = "VALIDATE_RUNTIME_RESULT";
pub const RUN_COMPILE_SKIPPED: &str = "RUN_COMPILE_SKIPPED";
pub const RUN_CLIENTSIM_SKIPPED: &str = "RUN_CLIENTSIM_SKIPPED";

pub const OP_CANCELLED: &str = "OP_CANCELLED";

/// Scope is not inside any project root (no `Assets/` ancestor).
pub const REF_NO_PROJECT_ROOT: &str = "REF_NO_PROJECT_ROOT";

// ── result / informational codes ─────────────────────────────────────────

pub const REF_SCAN_OK: &str = "REF_SCAN_OK";
pub const REF_SCAN_PARTIAL: &str = "REF_SCAN_PARTIAL";
pub const REF404: &str = "REF404";
pub const REF_WHERE_USED: &str = "REF_WHERE_USED";

pub const PVR404: &str = "PVR404";
pub const PVR400: &str = "PVR400";
pub const PVR_CHAIN_OK: &str = "PVR_CHAIN_OK";
pub const PVR_CHAIN_WARN: &str = "PVR_CHAIN_WARN";
pub const PVR_OVERRIDES_OK: &str = "PVR_OVERRIDES_OK";
pub const PVR_EFFECTIVE_OK: &str = "PVR_EFFECTIVE_OK";
pub const PVR_STALE_NONE: &str = "PVR_STALE_NONE";

pub const SER_DRY_RUN_OK: &str = "SER_DRY_RUN_OK";
pub const SER_PLAN_LOADED: &str = "SER_PLAN_LOADED";
pub const SER_TARGET_MISSING: &str = "SER_TARGET_MISSING";
pub const SER_IO_ERROR: &str = "SER_IO_ERROR";

pub const INSPECT_VARIANT_RESULT: &str = "INSPECT_VARIANT_RESULT";
pub const INSPECT_WHERE_USED_RESULT: &str = "INSPECT_WHERE_USED_RESULT";
pub const VALIDATE_REFS_RESULT: &str = "VALIDATE_REFS_RESULT";
pub const SUGGEST_IGNORE_GUIDS_RESULT: &str = "SUGGEST_IGNORE_GUIDS_RESULT";
pub const PATCH_APPLY_RESULT: &str = "PATCH_APPLY_RESULT";

pub const PATCH_PLAN_SHA256: &str = "PATCH_PLAN_SHA256";
pub const PATCH_PLAN_SIGNATURE: &str = "PATCH_PLAN_SIGNATURE";
pub const PATCH_PLAN_ATTESTATION: &str = "PATCH_PLAN_ATTESTATION";
pub const PATCH_PLAN_VERIFY_OK: &str = "PATCH_PLAN_VERIFY_OK";

pub const RUN_LOG_MISSING: &str = "RUN_LOG_MISSING";
pub const RUN_LOG_COLLECTED: &str = "RUN_LOG_COLLECTED";
pub const RUN_CLASSIFY_OK: &str = "RUN_CLASSIFY_OK";
pub const RUN_CLASSIFY_WARN: &str = "RUN_CLASSIFY_WARN";
pub const RUN_ASSERT_OK: &str = "RUN_ASSERT_OK";
pub const RUN_WARNINGS: &str = "RUN_WARNINGS";

pub const BRIDGE_SMOKE_RESULT: &str = "BRIDGE_SMOKE_RESULT";
pub const BRIDGE_EXEC: &str = "BRIDGE_EXEC";
pub const BRIDGE_FAILED: &str = "BRIDGE_FAILED";
pub const BRIDGE_DENIED: &str = "BRIDGE_DENIED";
pub const BRIDGE_CONFIG: &str = "BRIDGE_CONFIG";
pub const BRIDGE_RESPONSE_MISSING: &str = "BRIDGE_RESPONSE_MISSING";
