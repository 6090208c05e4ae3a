//! Gated apply-pipeline behavior end to end (without the CLI layer).

use camino::{Utf8Path, Utf8PathBuf};
use fs_err as fs;
use pretty_assertions::assert_eq;
use serde_json::json;
use tempfile::TempDir;
use unitytool_core::{ApplyRequest, Orchestrator};
use unitytool_patch::{build_attestation, compute_plan_sha256};
use unitytool_types::cancel::CancelToken;

fn utf8_root(temp: &TempDir) -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).expect("utf8")
}

/// A project dir with a JSON config target and a plan setting `a.b = 7`.
fn json_fixture(temp: &TempDir) -> (Utf8PathBuf, ApplyRequest) {
    let root = utf8_root(temp);
    fs::create_dir_all(root.join("Assets")).unwrap();
    fs::write(
        root.join("Assets/cfg.json"),
        serde_json::to_string_pretty(&json!({"a": {"b": 1}})).unwrap(),
    )
    .unwrap();

    let plan_path = root.join("plan.json");
    fs::write(
        &plan_path,
        serde_json::to_string_pretty(&json!({
            "target": "Assets/cfg.json",
            "change_reason": "tune a.b",
            "ops": [
                {"op": "set", "component": "Config", "path": "a.b",
                 "value_kind": "int", "value": 7}
            ]
        }))
        .unwrap(),
    )
    .unwrap();

    (root, ApplyRequest::new(plan_path))
}

fn orchestrator(root: &Utf8Path) -> Orchestrator {
    Orchestrator::new(root.to_path_buf(), CancelToken::new())
}

#[test]
fn dry_run_diffs_and_leaves_the_file_untouched() {
    let temp = TempDir::new().unwrap();
    let (root, mut request) = json_fixture(&temp);
    request.dry_run = true;

    let before = fs::read(root.join("Assets/cfg.json")).unwrap();
    let envelope = orchestrator(&root).patch_apply(&request);

    assert!(envelope.success, "{envelope:?}");
    assert_eq!(envelope.code, "SER_DRY_RUN_OK");
    assert_eq!(
        envelope.data["diff"],
        json!([{ "path": "a.b", "before": 1, "after": 7 }])
    );
    assert_eq!(fs::read(root.join("Assets/cfg.json")).unwrap(), before);
}

#[test]
fn apply_without_confirm_is_gated() {
    let temp = TempDir::new().unwrap();
    let (root, request) = json_fixture(&temp);

    let before = fs::read(root.join("Assets/cfg.json")).unwrap();
    let envelope = orchestrator(&root).patch_apply(&request);

    assert!(!envelope.success);
    assert_eq!(envelope.code, "APPLY_CONFIRM_REQUIRED");
    assert_eq!(fs::read(root.join("Assets/cfg.json")).unwrap(), before);
}

#[test]
fn confirmed_apply_persists_json_target() {
    let temp = TempDir::new().unwrap();
    let (root, mut request) = json_fixture(&temp);
    request.confirm = true;

    let envelope = orchestrator(&root).patch_apply(&request);
    assert!(envelope.success, "{envelope:?}");
    assert_eq!(envelope.code, "PATCH_APPLY_RESULT");

    // The backend's own code stays visible in the steps history.
    let apply_step = envelope.data["steps"]
        .as_array()
        .unwrap()
        .iter()
        .find(|s| s["step"] == "apply")
        .unwrap();
    assert_eq!(apply_step["result"]["code"], "SER_APPLY_OK");

    let reloaded: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(root.join("Assets/cfg.json")).unwrap()).unwrap();
    assert_eq!(reloaded["a"]["b"], 7);
}

#[test]
fn confirm_without_change_reason_is_gated() {
    let temp = TempDir::new().unwrap();
    let (root, mut request) = json_fixture(&temp);
    request.confirm = true;

    // Strip the plan-level change reason.
    let plan_path = request.plan_path.clone();
    fs::write(
        &plan_path,
        serde_json::to_string_pretty(&json!({
            "target": "Assets/cfg.json",
            "ops": [
                {"op": "set", "component": "Config", "path": "a.b",
                 "value_kind": "int", "value": 7}
            ]
        }))
        .unwrap(),
    )
    .unwrap();

    let envelope = orchestrator(&root).patch_apply(&request);
    assert_eq!(envelope.code, "APPLY_CONFIRM_REQUIRED");

    // A CLI-supplied reason unblocks it.
    let mut request = request;
    request.change_reason = Some("ops sign-off".into());
    let envelope = orchestrator(&root).patch_apply(&request);
    assert_eq!(envelope.code, "PATCH_APPLY_RESULT");
    assert!(envelope.success);
}

#[test]
fn engine_target_without_bridge_env_is_unsupported() {
    let temp = TempDir::new().unwrap();
    let root = utf8_root(&temp);
    fs::create_dir_all(root.join("Assets")).unwrap();
    fs::write(root.join("Assets/Foo.prefab"), "--- !u!1 &100\nGameObject:\n").unwrap();

    let plan_path = root.join("plan.json");
    fs::write(
        &plan_path,
        serde_json::to_string_pretty(&json!({
            "target": "Assets/Foo.prefab",
            "change_reason": "toggle renderer",
            "ops": [
                {"op": "set", "component": "MeshRenderer", "path": "m_Enabled",
                 "value_kind": "bool", "value": false}
            ]
        }))
        .unwrap(),
    )
    .unwrap();

    // The bridge env var must be unset for this test's premise.
    assert!(std::env::var("UNITYTOOL_PATCH_BRIDGE").is_err());

    let mut request = ApplyRequest::new(plan_path);
    request.confirm = true;
    let envelope = orchestrator(&root).patch_apply(&request);

    assert!(!envelope.success);
    assert_eq!(envelope.code, "SER_UNSUPPORTED_TARGET");
}

#[test]
fn schema_invalid_plan_is_ser001() {
    let temp = TempDir::new().unwrap();
    let root = utf8_root(&temp);
    let plan_path = root.join("plan.json");
    fs::write(
        &plan_path,
        serde_json::to_string_pretty(&json!({
            "target": "Assets/cfg.json",
            "ops": [
                {"op": "remove_array_element", "component": "C",
                 "path": "xs.Array.size", "index": 0}
            ]
        }))
        .unwrap(),
    )
    .unwrap();

    let envelope = orchestrator(&root).patch_apply(&ApplyRequest::new(plan_path));
    assert_eq!(envelope.code, "SER001");
    assert!(
        envelope
            .diagnostics
            .iter()
            .any(|d| d.detail == "schema_error")
    );
}

#[test]
fn cli_digest_mismatch_stops_before_any_preflight() {
    let temp = TempDir::new().unwrap();
    let (root, mut request) = json_fixture(&temp);
    request.dry_run = true;
    request.expected_sha256 = Some("0".repeat(64));

    let envelope = orchestrator(&root).patch_apply(&request);
    assert!(!envelope.success);
    assert_eq!(envelope.code, "PLAN_DIGEST_MISMATCH");
}

#[test]
fn matching_digest_passes() {
    let temp = TempDir::new().unwrap();
    let (root, mut request) = json_fixture(&temp);
    request.dry_run = true;
    request.expected_sha256 = Some(compute_plan_sha256(&request.plan_path).unwrap());

    let envelope = orchestrator(&root).patch_apply(&request);
    assert!(envelope.success, "{envelope:?}");
    assert_eq!(envelope.code, "SER_DRY_RUN_OK");
}

#[test]
fn attestation_sourced_mismatch_uses_attestation_code() {
    let temp = TempDir::new().unwrap();
    let (root, mut request) = json_fixture(&temp);

    // Attest, then tamper with the plan.
    let attestation = build_attestation(&request.plan_path, None).unwrap();
    let attestation_path = root.join("attest.json");
    fs::write(
        &attestation_path,
        serde_json::to_string_pretty(&attestation).unwrap(),
    )
    .unwrap();
    let mut raw = fs::read_to_string(&request.plan_path).unwrap();
    raw.push('\n');
    fs::write(&request.plan_path, raw).unwrap();

    request.dry_run = true;
    request.attestation_file = Some(attestation_path);
    let envelope = orchestrator(&root).patch_apply(&request);

    assert!(!envelope.success);
    assert_eq!(envelope.code, "PLAN_ATTESTATION_MISMATCH");
}

#[test]
fn cli_expectation_overrides_attestation() {
    let temp = TempDir::new().unwrap();
    let (root, mut request) = json_fixture(&temp);

    // Stale attestation, but the CLI passes the current digest: CLI wins.
    let attestation = build_attestation(&request.plan_path, None).unwrap();
    let attestation_path = root.join("attest.json");
    let mut raw = fs::read_to_string(&request.plan_path).unwrap();
    raw.push('\n');
    fs::write(&request.plan_path, raw).unwrap();
    fs::write(
        &attestation_path,
        serde_json::to_string_pretty(&attestation).unwrap(),
    )
    .unwrap();

    request.dry_run = true;
    request.attestation_file = Some(attestation_path);
    request.expected_sha256 = Some(compute_plan_sha256(&request.plan_path).unwrap());
    let envelope = orchestrator(&root).patch_apply(&request);

    assert!(envelope.success, "{envelope:?}");
}

#[test]
fn preflight_scope_with_broken_refs_stops_the_pipeline() {
    let temp = TempDir::new().unwrap();
    let (root, mut request) = json_fixture(&temp);

    fs::write(
        root.join("Assets/Broken.unity"),
        "--- !u!1 &1\nGameObject:\n  x: {fileID: 2, guid: aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa, type: 2}\n",
    )
    .unwrap();
    fs::write(
        root.join("Assets/Broken.unity.meta"),
        "fileFormatVersion: 2\nguid: 99999999999999999999999999999999\n",
    )
    .unwrap();

    request.confirm = true;
    request.scope = Some("Assets".into());
    let before = fs::read(root.join("Assets/cfg.json")).unwrap();
    let envelope = orchestrator(&root).patch_apply(&request);

    assert!(!envelope.success);
    assert_eq!(envelope.code, "REF001");
    assert_eq!(fs::read(root.join("Assets/cfg.json")).unwrap(), before);
}

#[test]
fn scope_outside_project_root_fails() {
    let temp = TempDir::new().unwrap();
    let (root, mut request) = json_fixture(&temp);

    let outside = TempDir::new().unwrap();
    let outside_root = utf8_root(&outside);
    fs::create_dir_all(outside_root.join("plain")).unwrap();

    request.dry_run = true;
    request.scope = Some(outside_root.join("plain").to_string());
    let envelope = orchestrator(&root).patch_apply(&request);

    assert!(!envelope.success);
    assert_eq!(envelope.code, "REF_NO_PROJECT_ROOT");
}

#[test]
fn cancelled_pipeline_reports_op_cancelled() {
    let temp = TempDir::new().unwrap();
    let (root, mut request) = json_fixture(&temp);
    request.dry_run = true;

    let token = CancelToken::new();
    token.cancel();
    let orchestrator = Orchestrator::new(root, token);
    let envelope = orchestrator.patch_apply(&request);
    assert_eq!(envelope.code, "OP_CANCELLED");
}

#[test]
fn pipeline_records_executed_steps() {
    let temp = TempDir::new().unwrap();
    let (root, mut request) = json_fixture(&temp);
    request.dry_run = true;

    let envelope = orchestrator(&root).patch_apply(&request);
    let steps: Vec<&str> = envelope.data["steps"]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["step"].as_str().unwrap())
        .collect();
    assert_eq!(steps, vec!["load_plan", "dry_run"]);
    assert!(envelope.data["plan_sha256"].is_string());
}
