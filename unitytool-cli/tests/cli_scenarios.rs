//! End-to-end CLI scenarios through the real binary.

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::json;
use std::fs;
use tempfile::TempDir;

fn unitytool() -> Command {
    Command::cargo_bin("unitytool").expect("unitytool binary")
}

/// Minimal project: Assets/, a JSON config target, and a plan against it.
fn create_project(temp: &TempDir) {
    let root = temp.path();
    fs::create_dir_all(root.join("Assets")).unwrap();
    fs::write(
        root.join("Assets/cfg.json"),
        serde_json::to_string_pretty(&json!({"a": {"b": 1}})).unwrap(),
    )
    .unwrap();
    fs::write(
        root.join("plan.json"),
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
}

fn write_asset(root: &std::path::Path, rel: &str, guid: &str, body: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, body).unwrap();
    fs::write(
        format!("{}.meta", path.display()),
        format!("fileFormatVersion: 2\nguid: {guid}\n"),
    )
    .unwrap();
}

#[test]
fn validate_refs_clean_scope_exits_zero() {
    let temp = TempDir::new().unwrap();
    create_project(&temp);
    write_asset(
        temp.path(),
        "Assets/Ok.mat",
        "1234567890abcdef1234567890abcdef",
        "--- !u!21 &2100000\nMaterial:\n",
    );

    unitytool()
        .current_dir(temp.path())
        .args(["validate", "refs", "--scope", "Assets"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"broken_occurrences\": 0"));
}

#[test]
fn validate_refs_broken_scope_exits_nonzero_with_ref001() {
    let temp = TempDir::new().unwrap();
    create_project(&temp);
    write_asset(
        temp.path(),
        "Assets/Broken.unity",
        "11112222333344445555666677778888",
        "--- !u!1 &1\nGameObject:\n  x: {fileID: 2, guid: aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa, type: 2}\n",
    );

    unitytool()
        .current_dir(temp.path())
        .args(["validate", "refs", "--scope", "Assets", "--details"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("REF001"));
}

#[test]
fn validate_refs_honors_ignore_guid_flag() {
    let temp = TempDir::new().unwrap();
    create_project(&temp);
    write_asset(
        temp.path(),
        "Assets/Broken.unity",
        "11112222333344445555666677778888",
        "--- !u!1 &1\nGameObject:\n  x: {fileID: 2, guid: aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa, type: 2}\n",
    );

    unitytool()
        .current_dir(temp.path())
        .args([
            "validate",
            "refs",
            "--scope",
            "Assets",
            "--ignore-guid",
            "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"ignored_missing_asset_occurrences\": 1"));
}

#[test]
fn validate_refs_outside_project_root_fails() {
    let temp = TempDir::new().unwrap();
    fs::create_dir_all(temp.path().join("plain")).unwrap();

    unitytool()
        .current_dir(temp.path())
        .args(["validate", "refs", "--scope", "plain"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("REF_NO_PROJECT_ROOT"));
}

#[test]
fn patch_hash_text_prints_digest() {
    let temp = TempDir::new().unwrap();
    create_project(&temp);

    unitytool()
        .current_dir(temp.path())
        .args(["patch", "hash", "--plan", "plan.json"])
        .assert()
        .success()
        .stdout(predicate::str::is_match("^[0-9a-f]{64}\n$").unwrap());
}

#[test]
fn patch_hash_is_stable_across_runs() {
    let temp = TempDir::new().unwrap();
    create_project(&temp);

    let first = unitytool()
        .current_dir(temp.path())
        .args(["patch", "hash", "--plan", "plan.json"])
        .output()
        .unwrap();
    let second = unitytool()
        .current_dir(temp.path())
        .args(["patch", "hash", "--plan", "plan.json"])
        .output()
        .unwrap();
    assert_eq!(first.stdout, second.stdout);
}

#[test]
fn patch_sign_uses_env_key() {
    let temp = TempDir::new().unwrap();
    create_project(&temp);

    unitytool()
        .current_dir(temp.path())
        .env("UNITYTOOL_PLAN_SIGNING_KEY", "hunter2")
        .args(["patch", "sign", "--plan", "plan.json"])
        .assert()
        .success()
        .stdout(predicate::str::is_match("^[0-9a-f]{64}\n$").unwrap());
}

#[test]
fn patch_sign_without_key_fails() {
    let temp = TempDir::new().unwrap();
    create_project(&temp);

    unitytool()
        .current_dir(temp.path())
        .env_remove("UNITYTOOL_PLAN_SIGNING_KEY")
        .args(["patch", "sign", "--plan", "plan.json"])
        .assert()
        .failure();
}

#[test]
fn attest_then_verify_round_trips() {
    let temp = TempDir::new().unwrap();
    create_project(&temp);

    unitytool()
        .current_dir(temp.path())
        .env("UNITYTOOL_PLAN_SIGNING_KEY", "hunter2")
        .args([
            "patch", "attest", "--plan", "plan.json", "--out", "attest.json",
        ])
        .assert()
        .success();

    unitytool()
        .current_dir(temp.path())
        .env("UNITYTOOL_PLAN_SIGNING_KEY", "hunter2")
        .args([
            "patch",
            "verify",
            "--plan",
            "plan.json",
            "--attestation-file",
            "attest.json",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("PATCH_PLAN_VERIFY_OK"));
}

#[test]
fn verify_detects_tampering_after_attest() {
    let temp = TempDir::new().unwrap();
    create_project(&temp);

    unitytool()
        .current_dir(temp.path())
        .args([
            "patch", "attest", "--plan", "plan.json", "--unsigned", "--out", "attest.json",
        ])
        .assert()
        .success();

    let mut plan = fs::read_to_string(temp.path().join("plan.json")).unwrap();
    plan.push('\n');
    fs::write(temp.path().join("plan.json"), plan).unwrap();

    unitytool()
        .current_dir(temp.path())
        .args([
            "patch",
            "verify",
            "--plan",
            "plan.json",
            "--attestation-file",
            "attest.json",
        ])
        .assert()
        .failure()
        .stdout(predicate::str::contains("PLAN_ATTESTATION_MISMATCH"));
}

#[test]
fn verify_cli_sha_mismatch_uses_digest_code() {
    let temp = TempDir::new().unwrap();
    create_project(&temp);

    unitytool()
        .current_dir(temp.path())
        .args([
            "patch",
            "verify",
            "--plan",
            "plan.json",
            "--sha256",
            &"0".repeat(64),
        ])
        .assert()
        .failure()
        .stdout(predicate::str::contains("PLAN_DIGEST_MISMATCH"));
}

#[test]
fn apply_dry_run_reports_diff_and_keeps_file() {
    let temp = TempDir::new().unwrap();
    create_project(&temp);
    let before = fs::read(temp.path().join("Assets/cfg.json")).unwrap();

    unitytool()
        .current_dir(temp.path())
        .args(["patch", "apply", "--plan", "plan.json", "--dry-run"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"path\": \"a.b\""))
        .stdout(predicate::str::contains("\"before\": 1"))
        .stdout(predicate::str::contains("\"after\": 7"));

    assert_eq!(fs::read(temp.path().join("Assets/cfg.json")).unwrap(), before);
}

#[test]
fn apply_without_confirm_is_gated_and_file_unchanged() {
    let temp = TempDir::new().unwrap();
    create_project(&temp);
    let before = fs::read(temp.path().join("Assets/cfg.json")).unwrap();

    unitytool()
        .current_dir(temp.path())
        .args(["patch", "apply", "--plan", "plan.json"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("APPLY_CONFIRM_REQUIRED"));

    assert_eq!(fs::read(temp.path().join("Assets/cfg.json")).unwrap(), before);
}

#[test]
fn apply_confirmed_persists_and_writes_report() {
    let temp = TempDir::new().unwrap();
    create_project(&temp);

    unitytool()
        .current_dir(temp.path())
        .args([
            "patch",
            "apply",
            "--plan",
            "plan.json",
            "--confirm",
            "--out-report",
            "report.json",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("PATCH_APPLY_RESULT"))
        .stdout(predicate::str::contains("SER_APPLY_OK"));

    let patched: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(temp.path().join("Assets/cfg.json")).unwrap())
            .unwrap();
    assert_eq!(patched["a"]["b"], 7);

    let report: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(temp.path().join("report.json")).unwrap())
            .unwrap();
    assert_eq!(report["code"], "PATCH_APPLY_RESULT");
}

#[test]
fn engine_target_without_bridge_is_unsupported() {
    let temp = TempDir::new().unwrap();
    create_project(&temp);
    fs::write(
        temp.path().join("Assets/Foo.prefab"),
        "--- !u!1 &100\nGameObject:\n",
    )
    .unwrap();
    fs::write(
        temp.path().join("plan.json"),
        serde_json::to_string_pretty(&json!({
            "target": "Assets/Foo.prefab",
            "change_reason": "toggle",
            "ops": [
                {"op": "set", "component": "MeshRenderer", "path": "m_Enabled",
                 "value_kind": "bool", "value": false}
            ]
        }))
        .unwrap(),
    )
    .unwrap();

    unitytool()
        .current_dir(temp.path())
        .env_remove("UNITYTOOL_PATCH_BRIDGE")
        .args(["patch", "apply", "--plan", "plan.json", "--confirm"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("SER_UNSUPPORTED_TARGET"));
}

#[test]
fn verify_plan_sha_gates_apply() {
    let temp = TempDir::new().unwrap();
    create_project(&temp);

    unitytool()
        .current_dir(temp.path())
        .args([
            "patch",
            "apply",
            "--plan",
            "plan.json",
            "--dry-run",
            "--plan-sha256",
            &"0".repeat(64),
        ])
        .assert()
        .failure()
        .stdout(predicate::str::contains("PLAN_DIGEST_MISMATCH"));
}

#[test]
fn suggest_ignore_guids_writes_candidate_file() {
    let temp = TempDir::new().unwrap();
    create_project(&temp);
    let body: String = (0..3)
        .map(|i| format!("  f{i}: {{fileID: {i}, guid: aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa, type: 2}}\n"))
        .collect();
    write_asset(
        temp.path(),
        "Assets/Noise.unity",
        "11112222333344445555666677778888",
        &format!("--- !u!1 &1\nGameObject:\n{body}"),
    );

    unitytool()
        .current_dir(temp.path())
        .args([
            "suggest",
            "ignore-guids",
            "--scope",
            "Assets",
            "--min-occurrences",
            "2",
            "--out-ignore-guid-file",
            "ignore.txt",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"decision_required\": true"));

    let ignore = fs::read_to_string(temp.path().join("ignore.txt")).unwrap();
    assert_eq!(ignore, "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa\n");
}

#[test]
fn inspect_variant_runs_all_steps() {
    let temp = TempDir::new().unwrap();
    create_project(&temp);
    write_asset(
        temp.path(),
        "Assets/Base.prefab",
        "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb",
        "--- !u!1 &100100000\nGameObject:\n  m_Name: Base\n",
    );
    write_asset(
        temp.path(),
        "Assets/Variant.prefab",
        "cccccccccccccccccccccccccccccccc",
        concat!(
            "PrefabInstance:\n",
            "  m_Modification:\n",
            "    m_Modifications:\n",
            "    - target: {fileID: 100100000, guid: bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb, type: 3}\n",
            "      propertyPath: m_Name\n",
            "      value: Variant\n",
            "      objectReference: {fileID: 0}\n",
            "  m_SourcePrefab: {fileID: 100100000, guid: bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb, type: 3}\n",
        ),
    );

    unitytool()
        .current_dir(temp.path())
        .args(["inspect", "variant", "--path", "Assets/Variant.prefab"])
        .assert()
        .success()
        .stdout(predicate::str::contains("INSPECT_VARIANT_RESULT"))
        .stdout(predicate::str::contains("resolve_prefab_chain"))
        .stdout(predicate::str::contains("detect_stale_overrides"));
}

#[test]
fn inspect_where_used_finds_citation() {
    let temp = TempDir::new().unwrap();
    create_project(&temp);
    write_asset(
        temp.path(),
        "Assets/Wood.mat",
        "1234567890abcdef1234567890abcdef",
        "--- !u!21 &2100000\nMaterial:\n",
    );
    write_asset(
        temp.path(),
        "Assets/Scene.unity",
        "fedcba0987654321fedcba0987654321",
        "--- !u!1 &1\nGameObject:\n  m: {fileID: 2100000, guid: 1234567890abcdef1234567890abcdef, type: 2}\n",
    );

    unitytool()
        .current_dir(temp.path())
        .args([
            "inspect",
            "where-used",
            "--asset-or-guid",
            "1234567890abcdef1234567890abcdef",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("Assets/Scene.unity"));
}

#[test]
fn validate_runtime_classifies_log() {
    let temp = TempDir::new().unwrap();
    create_project(&temp);
    fs::write(temp.path().join("Assets/Main.unity"), "--- !u!1 &1\n").unwrap();
    fs::write(temp.path().join("player.log"), "Broken PPtr in scene\n").unwrap();

    unitytool()
        .current_dir(temp.path())
        .args([
            "validate",
            "runtime",
            "--scene",
            "Assets/Main.unity",
            "--log-file",
            "player.log",
        ])
        .assert()
        .failure()
        .stdout(predicate::str::contains("VALIDATE_RUNTIME_RESULT"))
        .stdout(predicate::str::contains("BROKEN_PPTR"));
}

#[test]
fn validate_runtime_clean_log_passes() {
    let temp = TempDir::new().unwrap();
    create_project(&temp);
    fs::write(temp.path().join("Assets/Main.unity"), "--- !u!1 &1\n").unwrap();
    fs::write(temp.path().join("player.log"), "all fine\n").unwrap();

    unitytool()
        .current_dir(temp.path())
        .args([
            "validate",
            "runtime",
            "--scene",
            "Assets/Main.unity",
            "--log-file",
            "player.log",
        ])
        .assert()
        .success();
}

#[test]
fn report_export_renders_markdown() {
    let temp = TempDir::new().unwrap();
    create_project(&temp);

    unitytool()
        .current_dir(temp.path())
        .args(["patch", "apply", "--plan", "plan.json", "--dry-run", "--out-report", "report.json"])
        .assert()
        .success();

    unitytool()
        .current_dir(temp.path())
        .args([
            "report", "export", "--input", "report.json", "--format", "md", "--out", "report.md",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("Exported report"));

    let markdown = fs::read_to_string(temp.path().join("report.md")).unwrap();
    assert!(markdown.starts_with("# unitytool Validation Report"));
}

#[cfg(unix)]
mod bridge {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    const GOOD_RESPONSE: &str = r#"{
  "success": true,
  "severity": "info",
  "code": "SER_APPLY_OK",
  "message": "applied",
  "data": {"protocol_version": 1, "applied": 1},
  "diagnostics": []
}"#;

    fn fake_bridge(temp: &TempDir, body: &str) -> String {
        let script = temp.path().join("unitytool-unity-bridge");
        fs::write(&script, format!("#!/bin/sh\n{body}\n")).unwrap();
        let mut perms = fs::metadata(&script).unwrap().permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&script, perms).unwrap();
        script.display().to_string()
    }

    #[test]
    fn bridge_smoke_matches_expectations() {
        let temp = TempDir::new().unwrap();
        create_project(&temp);
        let script = fake_bridge(&temp, &format!("cat > \"$2\" <<'EOF'\n{GOOD_RESPONSE}\nEOF"));

        unitytool()
            .current_dir(temp.path())
            .env("UNITYTOOL_PATCH_BRIDGE", &script)
            .args([
                "validate",
                "bridge-smoke",
                "--plan",
                "plan.json",
                "--expected-code",
                "SER_APPLY_OK",
                "--expect-applied-from-plan",
                "--out",
                "smoke.json",
            ])
            .assert()
            .success()
            .stdout(predicate::str::contains("BRIDGE_SMOKE_RESULT"));

        let saved: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(temp.path().join("smoke.json")).unwrap())
                .unwrap();
        assert_eq!(saved["code"], "SER_APPLY_OK");
    }

    #[test]
    fn bridge_smoke_expect_failure_inverts_exit() {
        let temp = TempDir::new().unwrap();
        create_project(&temp);
        let bad = GOOD_RESPONSE
            .replace("\"success\": true", "\"success\": false")
            .replace("\"severity\": \"info\"", "\"severity\": \"error\"");
        let script = fake_bridge(&temp, &format!("cat > \"$2\" <<'EOF'\n{bad}\nEOF"));

        unitytool()
            .current_dir(temp.path())
            .env("UNITYTOOL_PATCH_BRIDGE", &script)
            .args([
                "validate",
                "bridge-smoke",
                "--plan",
                "plan.json",
                "--expect-failure",
            ])
            .assert()
            .success();
    }

    #[test]
    fn engine_apply_goes_through_bridge() {
        let temp = TempDir::new().unwrap();
        create_project(&temp);
        fs::write(
            temp.path().join("Assets/Foo.prefab"),
            "--- !u!1 &100\nGameObject:\n",
        )
        .unwrap();
        fs::write(
            temp.path().join("plan.json"),
            serde_json::to_string_pretty(&json!({
                "target": "Assets/Foo.prefab",
                "change_reason": "toggle",
                "ops": [
                    {"op": "set", "component": "MeshRenderer", "path": "m_Enabled",
                     "value_kind": "bool", "value": false}
                ]
            }))
            .unwrap(),
        )
        .unwrap();
        let script = fake_bridge(&temp, &format!("cat > \"$2\" <<'EOF'\n{GOOD_RESPONSE}\nEOF"));

        unitytool()
            .current_dir(temp.path())
            .env("UNITYTOOL_PATCH_BRIDGE", &script)
            .args(["patch", "apply", "--plan", "plan.json", "--confirm"])
            .assert()
            .success()
            .stdout(predicate::str::contains("PATCH_APPLY_RESULT"))
            .stdout(predicate::str::contains("SER_APPLY_OK"));
    }
}
