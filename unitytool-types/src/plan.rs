use crate::envelope::Diagnostic;
use serde::{Deserialize, Serialize};

/// Typed payload carried by `set` and `insert_array_element` ops.
///
/// Serializes as `{"value_kind": "...", "value": ...}`; `null` carries no
/// `value` field. The `json` kind holds a structured engine payload (Color,
/// Vector*, ObjectReference, ...) that only the bridge can interpret.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "value_kind", content = "value", rename_all = "snake_case")]
pub enum PatchValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    String(String),
    Null,
    Json(serde_json::Value),
}

impl PatchValue {
    pub fn kind(&self) -> &'static str {
        match self {
            PatchValue::Int(_) => "int",
            PatchValue::Float(_) => "float",
            PatchValue::Bool(_) => "bool",
            PatchValue::String(_) => "string",
            PatchValue::Null => "null",
            PatchValue::Json(_) => "json",
        }
    }

    /// The plain JSON form, as the built-in backend stores it.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            PatchValue::Int(v) => serde_json::json!(v),
            PatchValue::Float(v) => serde_json::json!(v),
            PatchValue::Bool(v) => serde_json::json!(v),
            PatchValue::String(v) => serde_json::json!(v),
            PatchValue::Null => serde_json::Value::Null,
            PatchValue::Json(v) => v.clone(),
        }
    }
}

impl PatchValue {
    /// Rebuild a typed value from the wire pair. The concrete shape of
    /// `value` is dictated by `value_kind`; anything else is a schema error.
    pub fn from_parts(kind: &str, value: Option<serde_json::Value>) -> Result<Self, String> {
        match kind {
            "int" => value
                .as_ref()
                .and_then(serde_json::Value::as_i64)
                .map(PatchValue::Int)
                .ok_or_else(|| "value_kind 'int' requires an integer value".to_string()),
            "float" => value
                .as_ref()
                .and_then(serde_json::Value::as_f64)
                .map(PatchValue::Float)
                .ok_or_else(|| "value_kind 'float' requires a number value".to_string()),
            "bool" => value
                .as_ref()
                .and_then(serde_json::Value::as_bool)
                .map(PatchValue::Bool)
                .ok_or_else(|| "value_kind 'bool' requires a boolean value".to_string()),
            "string" => match value {
                Some(serde_json::Value::String(s)) => Ok(PatchValue::String(s)),
                _ => Err("value_kind 'string' requires a string value".to_string()),
            },
            "null" => match value {
                None | Some(serde_json::Value::Null) => Ok(PatchValue::Null),
                Some(_) => Err("value_kind 'null' must not carry a value".to_string()),
            },
            "json" => match value {
                Some(payload) => Ok(PatchValue::Json(payload)),
                None => Err("value_kind 'json' requires a value payload".to_string()),
            },
            other => Err(format!("unsupported value_kind '{other}'")),
        }
    }

    fn to_parts(&self) -> (&'static str, Option<serde_json::Value>) {
        let value = match self {
            PatchValue::Null => None,
            other => Some(other.to_json()),
        };
        (self.kind(), value)
    }
}

/// One declarative mutation against a single target asset.
///
/// Serde goes through [`RawPatchOp`] so the wire form stays flat
/// (`op` / `component` / `path` / `index` / `value_kind` / `value`) while the
/// in-memory form is an exhaustive tagged variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawPatchOp", into = "RawPatchOp")]
pub enum PatchOp {
    Set {
        component: String,
        path: String,
        value: PatchValue,
    },

    InsertArrayElement {
        component: String,
        path: String,
        index: i64,
        value: Option<PatchValue>,
    },

    RemoveArrayElement {
        component: String,
        path: String,
        index: i64,
    },
}

/// Flat wire form of [`PatchOp`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawPatchOp {
    op: String,
    component: String,
    path: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    index: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    value_kind: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    value: Option<serde_json::Value>,
}

impl TryFrom<RawPatchOp> for PatchOp {
    type Error = String;

    fn try_from(raw: RawPatchOp) -> Result<Self, Self::Error> {
        match raw.op.as_str() {
            "set" => {
                let kind = raw
                    .value_kind
                    .ok_or_else(|| "value_kind is required for set".to_string())?;
                Ok(PatchOp::Set {
                    component: raw.component,
                    path: raw.path,
                    value: PatchValue::from_parts(&kind, raw.value)?,
                })
            }
            "insert_array_element" => {
                let index = raw
                    .index
                    .ok_or_else(|| "index is required for insert_array_element".to_string())?;
                let value = match raw.value_kind {
                    Some(kind) => Some(PatchValue::from_parts(&kind, raw.value)?),
                    None => None,
                };
                Ok(PatchOp::InsertArrayElement {
                    component: raw.component,
                    path: raw.path,
                    index,
                    value,
                })
            }
            "remove_array_element" => {
                let index = raw
                    .index
                    .ok_or_else(|| "index is required for remove_array_element".to_string())?;
                Ok(PatchOp::RemoveArrayElement {
                    component: raw.component,
                    path: raw.path,
                    index,
                })
            }
            other => Err(format!("unsupported op '{other}'")),
        }
    }
}

impl From<PatchOp> for RawPatchOp {
    fn from(op: PatchOp) -> Self {
        match op {
            PatchOp::Set {
                component,
                path,
                value,
            } => {
                let (kind, value) = value.to_parts();
                RawPatchOp {
                    op: "set".to_string(),
                    component,
                    path,
                    index: None,
                    value_kind: Some(kind.to_string()),
                    value,
                }
            }
            PatchOp::InsertArrayElement {
                component,
                path,
                index,
                value,
            } => {
                let (value_kind, value) = match value {
                    Some(value) => {
                        let (kind, value) = value.to_parts();
                        (Some(kind.to_string()), value)
                    }
                    None => (None, None),
                };
                RawPatchOp {
                    op: "insert_array_element".to_string(),
                    component,
                    path,
                    index: Some(index),
                    value_kind,
                    value,
                }
            }
            PatchOp::RemoveArrayElement {
                component,
                path,
                index,
            } => RawPatchOp {
                op: "remove_array_element".to_string(),
                component,
                path,
                index: Some(index),
                value_kind: None,
                value: None,
            },
        }
    }
}

impl PatchOp {
    pub fn name(&self) -> &'static str {
        match self {
            PatchOp::Set { .. } => "set",
            PatchOp::InsertArrayElement { .. } => "insert_array_element",
            PatchOp::RemoveArrayElement { .. } => "remove_array_element",
        }
    }

    pub fn component(&self) -> &str {
        match self {
            PatchOp::Set { component, .. }
            | PatchOp::InsertArrayElement { component, .. }
            | PatchOp::RemoveArrayElement { component, .. } => component,
        }
    }

    pub fn path(&self) -> &str {
        match self {
            PatchOp::Set { path, .. }
            | PatchOp::InsertArrayElement { path, .. }
            | PatchOp::RemoveArrayElement { path, .. } => path,
        }
    }
}

/// Declarative, hashable, optionally signed mutation document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatchPlan {
    pub target: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change_reason: Option<String>,

    #[serde(default)]
    pub ops: Vec<PatchOp>,
}

impl PatchPlan {
    /// Schema-validate the plan. An empty result means the plan is well formed.
    ///
    /// Array ops carry their index out-of-band, so their `path` must address
    /// the array itself (`....Array.data`) and must not smuggle an index or a
    /// size segment.
    pub fn validate(&self) -> Vec<Diagnostic> {
        let mut diagnostics = Vec::new();

        if self.target.trim().is_empty() {
            diagnostics.push(Diagnostic::new(
                "",
                "target",
                "schema_error",
                "target is required",
            ));
        }
        if self.ops.is_empty() {
            diagnostics.push(Diagnostic::new(
                self.target.clone(),
                "ops",
                "schema_error",
                "ops must contain at least one operation",
            ));
        }

        for (i, op) in self.ops.iter().enumerate() {
            if op.component().trim().is_empty() {
                diagnostics.push(Diagnostic::new(
                    self.target.clone(),
                    format!("ops[{i}].component"),
                    "schema_error",
                    "component is required",
                ));
            }
            if op.path().trim().is_empty() {
                diagnostics.push(Diagnostic::new(
                    self.target.clone(),
                    format!("ops[{i}].path"),
                    "schema_error",
                    "path is required",
                ));
                continue;
            }

            let index = match op {
                PatchOp::Set { .. } => None,
                PatchOp::InsertArrayElement { index, .. }
                | PatchOp::RemoveArrayElement { index, .. } => Some(*index),
            };
            let Some(index) = index else {
                continue;
            };

            if index < 0 {
                diagnostics.push(Diagnostic::new(
                    self.target.clone(),
                    format!("ops[{i}].index"),
                    "schema_error",
                    "index must be >= 0",
                ));
            }
            let path = op.path();
            if !path.ends_with(".Array.data") {
                diagnostics.push(Diagnostic::new(
                    self.target.clone(),
                    format!("ops[{i}].path"),
                    "schema_error",
                    "array operations require a '.Array.data' path",
                ));
            }
            if path.contains('[') {
                diagnostics.push(Diagnostic::new(
                    self.target.clone(),
                    format!("ops[{i}].path"),
                    "schema_error",
                    "array operation path must not contain an inline [index]",
                ));
            }
            if path.contains(".Array.size") {
                diagnostics.push(Diagnostic::new(
                    self.target.clone(),
                    format!("ops[{i}].path"),
                    "schema_error",
                    "array operation path must not address '.Array.size'",
                ));
            }
        }

        diagnostics
    }

    /// Extension of the target path, lowercased, without the dot.
    pub fn target_extension(&self) -> Option<String> {
        let name = self.target.rsplit(['/', '\\']).next()?;
        let (_, ext) = name.rsplit_once('.')?;
        Some(ext.to_ascii_lowercase())
    }
}
