//! Bridge client behavior against a fake allowlisted bridge executable.
#![cfg(unix)]

use camino::Utf8PathBuf;
use fs_err as fs;
use std::os::unix::fs::PermissionsExt;
use std::time::Duration;
use tempfile::TempDir;
use unitytool_bridge::BridgeClient;
use unitytool_types::cancel::CancelToken;
use unitytool_types::plan::{PatchOp, PatchValue};
use unitytool_types::wire::BridgeRequestV1;

/// Write an executable shell script named like the allowlisted bridge binary.
fn fake_bridge(temp: &TempDir, body: &str) -> Utf8PathBuf {
    let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    let script = root.join("unitytool-unity-bridge");
    fs::write(&script, format!("#!/bin/sh\n{body}\n")).unwrap();
    let mut perms = fs::metadata(&script).unwrap().permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&script, perms).unwrap();
    script
}

fn request() -> BridgeRequestV1 {
    let plan = unitytool_types::plan::PatchPlan {
        target: "Assets/Foo.prefab".into(),
        change_reason: None,
        ops: vec![PatchOp::Set {
            component: "MeshRenderer".into(),
            path: "m_Enabled".into(),
            value: PatchValue::Bool(true),
        }],
    };
    BridgeRequestV1::from_plan(&plan)
}

const GOOD_RESPONSE: &str = r#"{
  "success": true,
  "severity": "info",
  "code": "SER_APPLY_OK",
  "message": "applied",
  "data": {"protocol_version": 1, "applied": 1},
  "diagnostics": []
}"#;

#[test]
fn round_trips_a_valid_response() {
    let temp = TempDir::new().unwrap();
    let script = fake_bridge(&temp, &format!("cat > \"$2\" <<'EOF'\n{GOOD_RESPONSE}\nEOF"));
    let client = BridgeClient::new(vec![script.to_string()], Duration::from_secs(10));

    let envelope = client.execute(&request(), &CancelToken::new());
    assert!(envelope.success, "unexpected envelope: {envelope:?}");
    assert_eq!(envelope.code, "SER_APPLY_OK");
    assert_eq!(envelope.data["applied"], 1);
    assert_eq!(envelope.data["executed"], true);
    assert_eq!(envelope.data["op_count"], 1);
}

#[test]
fn request_file_carries_normalized_flat_ops() {
    let temp = TempDir::new().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    let capture = root.join("captured-request.json");
    let script = fake_bridge(
        &temp,
        &format!("cp \"$1\" \"{capture}\"\ncat > \"$2\" <<'EOF'\n{GOOD_RESPONSE}\nEOF"),
    );
    let client = BridgeClient::new(vec![script.to_string()], Duration::from_secs(10));

    let envelope = client.execute(&request(), &CancelToken::new());
    assert!(envelope.success);

    let captured: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&capture).unwrap()).unwrap();
    assert_eq!(captured["protocol_version"], 1);
    assert_eq!(captured["target"], "Assets/Foo.prefab");
    assert_eq!(captured["ops"][0]["op"], "set");
    assert_eq!(captured["ops"][0]["value_kind"], "bool");
    assert_eq!(captured["ops"][0]["value_bool"], true);
    assert!(captured["ops"][0].get("value").is_none());
}

#[test]
fn timeout_kills_the_child() {
    let temp = TempDir::new().unwrap();
    let script = fake_bridge(&temp, "sleep 30");
    let client = BridgeClient::new(vec![script.to_string()], Duration::from_millis(300));

    let start = std::time::Instant::now();
    let envelope = client.execute(&request(), &CancelToken::new());
    assert!(!envelope.success);
    assert_eq!(envelope.code, "BRIDGE_TIMEOUT");
    assert!(start.elapsed() < Duration::from_secs(10));
}

#[test]
fn cancellation_kills_the_child() {
    let temp = TempDir::new().unwrap();
    let script = fake_bridge(&temp, "sleep 30");
    let client = BridgeClient::new(vec![script.to_string()], Duration::from_secs(60));

    let token = CancelToken::new();
    token.cancel();
    let envelope = client.execute(&request(), &token);
    assert!(!envelope.success);
    assert_eq!(envelope.code, "OP_CANCELLED");
}

#[test]
fn nonzero_exit_is_bridge_failed() {
    let temp = TempDir::new().unwrap();
    let script = fake_bridge(&temp, "echo boom >&2\nexit 3");
    let client = BridgeClient::new(vec![script.to_string()], Duration::from_secs(10));

    let envelope = client.execute(&request(), &CancelToken::new());
    assert_eq!(envelope.code, "BRIDGE_FAILED");
    assert_eq!(envelope.data["exit_code"], 3);
    assert!(envelope.data["stderr"].as_str().unwrap().contains("boom"));
}

#[test]
fn missing_response_file_is_reported() {
    let temp = TempDir::new().unwrap();
    let script = fake_bridge(&temp, "true");
    let client = BridgeClient::new(vec![script.to_string()], Duration::from_secs(10));

    let envelope = client.execute(&request(), &CancelToken::new());
    assert_eq!(envelope.code, "BRIDGE_RESPONSE_MISSING");
}

#[test]
fn wrong_protocol_version_fails_schema_validation() {
    let bad = GOOD_RESPONSE.replace("\"protocol_version\": 1", "\"protocol_version\": 2");
    let temp = TempDir::new().unwrap();
    let script = fake_bridge(&temp, &format!("cat > \"$2\" <<'EOF'\n{bad}\nEOF"));
    let client = BridgeClient::new(vec![script.to_string()], Duration::from_secs(10));

    let envelope = client.execute(&request(), &CancelToken::new());
    assert_eq!(envelope.code, "BRIDGE_UNITY_RESPONSE_SCHEMA");
}

#[test]
fn extra_envelope_field_fails_schema_validation() {
    let bad = GOOD_RESPONSE.replacen('{', "{\n  \"sneaky\": 1,", 1);
    let temp = TempDir::new().unwrap();
    let script = fake_bridge(&temp, &format!("cat > \"$2\" <<'EOF'\n{bad}\nEOF"));
    let client = BridgeClient::new(vec![script.to_string()], Duration::from_secs(10));

    let envelope = client.execute(&request(), &CancelToken::new());
    assert_eq!(envelope.code, "BRIDGE_UNITY_RESPONSE_SCHEMA");
}

#[test]
fn non_json_response_fails_schema_validation() {
    let temp = TempDir::new().unwrap();
    let script = fake_bridge(&temp, "echo 'not json' > \"$2\"");
    let client = BridgeClient::new(vec![script.to_string()], Duration::from_secs(10));

    let envelope = client.execute(&request(), &CancelToken::new());
    assert_eq!(envelope.code, "BRIDGE_UNITY_RESPONSE_SCHEMA");
}
