use serde::{Deserialize, Serialize};

/// Severity level attached to every envelope and diagnostic category.
///
/// Ordered: info < warning < error < critical.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

impl Severity {
    /// True for `error` and `critical` — the levels that stop a pipeline.
    pub fn is_fail(self) -> bool {
        matches!(self, Severity::Error | Severity::Critical)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Critical => "critical",
        }
    }
}

/// Highest severity in `levels`, defaulting to `info` when empty.
pub fn max_severity<I: IntoIterator<Item = Severity>>(levels: I) -> Severity {
    levels.into_iter().max().unwrap_or(Severity::Info)
}

/// A single structured finding.
///
/// `location` is either a file-relative property path (e.g. `ops[2].path`)
/// or a `line:column` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub path: String,
    pub location: String,
    pub detail: String,
    pub evidence: String,
}

impl Diagnostic {
    pub fn new(
        path: impl Into<String>,
        location: impl Into<String>,
        detail: impl Into<String>,
        evidence: impl Into<String>,
    ) -> Self {
        Self {
            path: path.into(),
            location: location.into(),
            detail: detail.into(),
            evidence: evidence.into(),
        }
    }
}

/// Uniform response object returned by every operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub success: bool,
    pub severity: Severity,
    pub code: String,
    pub message: String,

    #[serde(default)]
    pub data: serde_json::Value,

    #[serde(default)]
    pub diagnostics: Vec<Diagnostic>,
}

impl Envelope {
    pub fn ok(code: &str, message: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            success: true,
            severity: Severity::Info,
            code: code.to_string(),
            message: message.into(),
            data,
            diagnostics: vec![],
        }
    }

    pub fn warning(code: &str, message: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            success: true,
            severity: Severity::Warning,
            code: code.to_string(),
            message: message.into(),
            data,
            diagnostics: vec![],
        }
    }

    pub fn error(code: &str, message: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            success: false,
            severity: Severity::Error,
            code: code.to_string(),
            message: message.into(),
            data,
            diagnostics: vec![],
        }
    }

    pub fn critical(code: &str, message: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            success: false,
            severity: Severity::Critical,
            code: code.to_string(),
            message: message.into(),
            data,
            diagnostics: vec![],
        }
    }

    pub fn with_diagnostics(mut self, diagnostics: Vec<Diagnostic>) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    /// Insert a key into `data`, promoting it to an object if needed.
    pub fn data_insert(&mut self, key: &str, value: serde_json::Value) {
        if !self.data.is_object() {
            self.data = serde_json::Value::Object(serde_json::Map::new());
        }
        if let Some(map) = self.data.as_object_mut() {
            map.insert(key.to_string(), value);
        }
    }
}
