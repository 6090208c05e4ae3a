use crate::envelope::{Diagnostic, Envelope, Severity};
use crate::plan::{PatchOp, PatchPlan, PatchValue};
use crate::wire::WireError;
use serde::{Deserialize, Serialize};

pub const BRIDGE_PROTOCOL_VERSION: u32 = 1;

/// Version 1 bridge request: `{protocol_version, target, ops[]}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeRequestV1 {
    pub protocol_version: u32,
    pub target: String,
    pub ops: Vec<BridgeOpV1>,
}

impl BridgeRequestV1 {
    pub fn from_plan(plan: &PatchPlan) -> Self {
        Self {
            protocol_version: BRIDGE_PROTOCOL_VERSION,
            target: plan.target.trim().to_string(),
            ops: plan.ops.iter().map(BridgeOpV1::from).collect(),
        }
    }
}

/// Flat op form for the engine-side receiver.
///
/// The receiver cannot parse open unions, so the typed value is split into
/// parallel fields selected by `value_kind`. `value_json` carries its payload
/// pre-serialized as a JSON string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeOpV1 {
    pub op: String,
    pub component: String,
    pub path: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_kind: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_int: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_float: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_bool: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_string: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_json: Option<String>,
}

impl BridgeOpV1 {
    fn bare(op: &PatchOp) -> Self {
        Self {
            op: op.name().to_string(),
            component: op.component().to_string(),
            path: op.path().to_string(),
            index: None,
            value_kind: None,
            value_int: None,
            value_float: None,
            value_bool: None,
            value_string: None,
            value_json: None,
        }
    }

    fn set_value(&mut self, value: &PatchValue) {
        self.value_kind = Some(value.kind().to_string());
        match value {
            PatchValue::Int(v) => self.value_int = Some(*v),
            PatchValue::Float(v) => self.value_float = Some(*v),
            PatchValue::Bool(v) => self.value_bool = Some(*v),
            PatchValue::String(v) => self.value_string = Some(v.clone()),
            PatchValue::Null => {}
            PatchValue::Json(v) => self.value_json = Some(v.to_string()),
        }
    }
}

impl From<&PatchOp> for BridgeOpV1 {
    fn from(op: &PatchOp) -> Self {
        let mut wire = BridgeOpV1::bare(op);
        match op {
            PatchOp::Set { value, .. } => wire.set_value(value),
            PatchOp::InsertArrayElement { index, value, .. } => {
                wire.index = Some(*index);
                if let Some(value) = value {
                    wire.set_value(value);
                }
            }
            PatchOp::RemoveArrayElement { index, .. } => {
                wire.index = Some(*index);
            }
        }
        wire
    }
}

/// Strict v1 bridge response envelope.
///
/// Exactly the six envelope fields; anything else is a schema violation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BridgeResponseV1 {
    pub success: bool,
    pub severity: Severity,
    pub code: String,
    pub message: String,
    pub data: serde_json::Map<String, serde_json::Value>,
    pub diagnostics: Vec<Diagnostic>,
}

impl BridgeResponseV1 {
    pub fn into_envelope(self) -> Envelope {
        Envelope {
            success: self.success,
            severity: self.severity,
            code: self.code,
            message: self.message,
            data: serde_json::Value::Object(self.data),
            diagnostics: self.diagnostics,
        }
    }
}

/// Parse and validate a bridge response file's bytes.
///
/// `data.protocol_version` must be present and equal to the supported version.
pub fn parse_bridge_response(bytes: &[u8]) -> Result<BridgeResponseV1, WireError> {
    let response: BridgeResponseV1 = serde_json::from_slice(bytes)?;

    if response.code.trim().is_empty() {
        return Err(WireError::Schema {
            detail: "field 'code' must be a non-empty string".to_string(),
        });
    }

    match response.data.get("protocol_version") {
        None => Err(WireError::Schema {
            detail: "data.protocol_version is required".to_string(),
        }),
        Some(v) => {
            let received = v.as_u64();
            if received == Some(u64::from(BRIDGE_PROTOCOL_VERSION)) {
                Ok(response)
            } else {
                Err(WireError::ProtocolVersion {
                    expected: BRIDGE_PROTOCOL_VERSION,
                    received: v.to_string(),
                })
            }
        }
    }
}
