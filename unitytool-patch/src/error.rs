use thiserror::Error;

/// Why a plan file could not be loaded at all (schema violations inside a
/// parsed plan are reported as diagnostics instead).
#[derive(Debug, Error)]
pub enum PlanLoadError {
    #[error("io error: {message}")]
    Io { message: String },

    #[error("json parse error: {message}")]
    Json { message: String },
}

/// A type or bounds violation while applying ops to a JSON document.
///
/// Any of these aborts the whole apply before anything is persisted.
#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("path segment '{segment}' expects an object")]
    ExpectsObject { segment: String },

    #[error("path '{path}' was not found in the target document")]
    MissingPath { path: String },

    #[error("'{path}' does not resolve to an array")]
    NotAnArray { path: String },

    #[error("index {index} is out of bounds for array of size {size}")]
    IndexOutOfBounds { index: i64, size: usize },

    #[error("array size must be a non-negative integer")]
    InvalidArraySize,

    #[error("value kind '{kind}' is not accepted by the JSON backend: {detail}")]
    UnsupportedValue { kind: String, detail: String },
}
