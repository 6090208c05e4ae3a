//! Shared DTOs (schemas-as-code) for the unitytool workspace.
//!
//! # Design constraints
//! - These types are intended to be serialized to disk and across the bridge.
//! - Be conservative with breaking changes.
//! - Prefer adding optional fields over changing semantics.

pub mod attest;
pub mod cancel;
pub mod codes;
pub mod envelope;
pub mod plan;
pub mod wire;

/// Schema identifiers.
pub mod schema {
    pub const UNITYTOOL_PLAN_V1: &str = "unitytool.plan.v1";
    pub const UNITYTOOL_BRIDGE_V1: &str = "unitytool.bridge.v1";
}

/// Environment variable names shared across crates.
///
/// Tests shadow these per invocation; there is no other ambient state.
pub mod env {
    /// Allowlisted bridge command line.
    pub const PATCH_BRIDGE: &str = "UNITYTOOL_PATCH_BRIDGE";
    pub const UNITY_COMMAND: &str = "UNITYTOOL_UNITY_COMMAND";
    pub const UNITY_PROJECT_PATH: &str = "UNITYTOOL_UNITY_PROJECT_PATH";
    pub const UNITY_EXECUTE_METHOD: &str = "UNITYTOOL_UNITY_EXECUTE_METHOD";
    pub const UNITY_TIMEOUT_SEC: &str = "UNITYTOOL_UNITY_TIMEOUT_SEC";
    pub const UNITY_LOG_FILE: &str = "UNITYTOOL_UNITY_LOG_FILE";
    /// Default env var holding the HMAC signing key.
    pub const PLAN_SIGNING_KEY: &str = "UNITYTOOL_PLAN_SIGNING_KEY";
}
