//! JSON backend boundary behavior over real target files.

use camino::Utf8PathBuf;
use fs_err as fs;
use pretty_assertions::assert_eq;
use serde_json::json;
use tempfile::TempDir;
use unitytool_patch::apply_json_target;
use unitytool_types::plan::{PatchOp, PatchValue};

fn target_file(temp: &TempDir, contents: &serde_json::Value) -> Utf8PathBuf {
    let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    let path = root.join("cfg.json");
    fs::write(&path, serde_json::to_string_pretty(contents).unwrap()).unwrap();
    path
}

fn set_op(path: &str, value: PatchValue) -> PatchOp {
    PatchOp::Set {
        component: "Config".into(),
        path: path.into(),
        value,
    }
}

#[test]
fn dry_run_diffs_without_touching_the_file() {
    let temp = TempDir::new().unwrap();
    let target = target_file(&temp, &json!({"a": {"b": 1}}));
    let before_bytes = fs::read(&target).unwrap();

    let envelope = apply_json_target(&target, &[set_op("a.b", PatchValue::Int(7))], true);

    assert!(envelope.success);
    assert_eq!(envelope.code, "SER_DRY_RUN_OK");
    assert_eq!(
        envelope.data["diff"],
        json!([{ "path": "a.b", "before": 1, "after": 7 }])
    );
    assert_eq!(fs::read(&target).unwrap(), before_bytes);
}

#[test]
fn dry_run_is_pure() {
    let temp = TempDir::new().unwrap();
    let target = target_file(&temp, &json!({"a": {"b": 1}, "xs": [1, 2]}));
    let ops = vec![
        set_op("a.b", PatchValue::Int(7)),
        PatchOp::InsertArrayElement {
            component: "Config".into(),
            path: "xs.Array.data".into(),
            index: 2,
            value: Some(PatchValue::Int(3)),
        },
    ];

    let first = apply_json_target(&target, &ops, true);
    let second = apply_json_target(&target, &ops, true);
    assert_eq!(
        serde_json::to_vec(&first.data["diff"]).unwrap(),
        serde_json::to_vec(&second.data["diff"]).unwrap()
    );
}

#[test]
fn apply_persists_atomically() {
    let temp = TempDir::new().unwrap();
    let target = target_file(&temp, &json!({"a": {"b": 1}}));

    let envelope = apply_json_target(&target, &[set_op("a.b", PatchValue::Int(7))], false);
    assert!(envelope.success);
    assert_eq!(envelope.code, "SER_APPLY_OK");
    assert_eq!(envelope.data["applied"], 1);

    let reloaded: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&target).unwrap()).unwrap();
    assert_eq!(reloaded["a"]["b"], 7);

    // No temp droppings left behind.
    let leftovers: Vec<_> = std::fs::read_dir(temp.path())
        .unwrap()
        .filter_map(Result::ok)
        .filter(|e| e.file_name().to_string_lossy().starts_with(".unitytool-tmp-"))
        .collect();
    assert!(leftovers.is_empty());
}

#[test]
fn insert_at_size_appends() {
    let temp = TempDir::new().unwrap();
    let target = target_file(&temp, &json!({"xs": [1, 2]}));
    let op = PatchOp::InsertArrayElement {
        component: "Config".into(),
        path: "xs.Array.data".into(),
        index: 2,
        value: Some(PatchValue::Int(9)),
    };
    let envelope = apply_json_target(&target, &[op], false);
    assert!(envelope.success);
    let reloaded: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&target).unwrap()).unwrap();
    assert_eq!(reloaded["xs"], json!([1, 2, 9]));
}

#[test]
fn insert_past_size_fails_and_leaves_file_alone() {
    let temp = TempDir::new().unwrap();
    let target = target_file(&temp, &json!({"xs": [1, 2]}));
    let before_bytes = fs::read(&target).unwrap();
    let op = PatchOp::InsertArrayElement {
        component: "Config".into(),
        path: "xs.Array.data".into(),
        index: 3,
        value: Some(PatchValue::Int(9)),
    };
    let envelope = apply_json_target(&target, &[op], false);
    assert!(!envelope.success);
    assert_eq!(envelope.code, "SER002");
    assert_eq!(fs::read(&target).unwrap(), before_bytes);
}

#[test]
fn remove_out_of_range_fails() {
    let temp = TempDir::new().unwrap();
    let target = target_file(&temp, &json!({"xs": [1]}));
    let op = PatchOp::RemoveArrayElement {
        component: "Config".into(),
        path: "xs.Array.data".into(),
        index: 1,
    };
    let envelope = apply_json_target(&target, &[op], false);
    assert!(!envelope.success);
    assert_eq!(envelope.code, "SER002");
    assert!(
        envelope
            .diagnostics
            .iter()
            .any(|d| d.detail == "apply_error")
    );
}

#[test]
fn remove_shrinks_by_exactly_one() {
    let temp = TempDir::new().unwrap();
    let target = target_file(&temp, &json!({"xs": [1, 2, 3]}));
    let op = PatchOp::RemoveArrayElement {
        component: "Config".into(),
        path: "xs.Array.data".into(),
        index: 1,
    };
    let envelope = apply_json_target(&target, &[op], false);
    assert!(envelope.success);
    assert_eq!(
        envelope.data["diff"][0]["before"],
        json!({"size": 3, "removed": 2})
    );
    let reloaded: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&target).unwrap()).unwrap();
    assert_eq!(reloaded["xs"], json!([1, 3]));
}

#[test]
fn array_size_set_resizes() {
    let temp = TempDir::new().unwrap();
    let target = target_file(&temp, &json!({"xs": [1, 2, 3]}));
    let envelope = apply_json_target(
        &target,
        &[set_op("xs.Array.size", PatchValue::Int(1))],
        false,
    );
    assert!(envelope.success);
    let reloaded: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&target).unwrap()).unwrap();
    assert_eq!(reloaded["xs"], json!([1]));

    let envelope = apply_json_target(
        &target,
        &[set_op("xs.Array.size", PatchValue::Int(3))],
        false,
    );
    assert!(envelope.success);
    let reloaded: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&target).unwrap()).unwrap();
    assert_eq!(reloaded["xs"], json!([1, null, null]));
}

#[test]
fn numeric_segments_index_arrays() {
    let temp = TempDir::new().unwrap();
    let target = target_file(&temp, &json!({"items": [{"name": "a"}, {"name": "b"}]}));
    let envelope = apply_json_target(
        &target,
        &[set_op("items.1.name", PatchValue::String("z".into()))],
        false,
    );
    assert!(envelope.success);
    let reloaded: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&target).unwrap()).unwrap();
    assert_eq!(reloaded["items"][1]["name"], "z");
}

#[test]
fn missing_leaf_fails_instead_of_creating() {
    let temp = TempDir::new().unwrap();
    let target = target_file(&temp, &json!({"a": {}}));
    let envelope = apply_json_target(&target, &[set_op("a.b", PatchValue::Int(1))], false);
    assert!(!envelope.success);
    assert_eq!(envelope.code, "SER002");
}

#[test]
fn object_reference_payload_is_rejected_for_json_targets() {
    let temp = TempDir::new().unwrap();
    let target = target_file(&temp, &json!({"a": {"b": 1}}));
    let op = set_op(
        "a.b",
        PatchValue::Json(json!({"fileID": 1234, "guid": "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"})),
    );
    let envelope = apply_json_target(&target, &[op], false);
    assert!(!envelope.success);
    assert_eq!(envelope.code, "SER002");
    assert!(
        envelope.diagnostics[0]
            .evidence
            .contains("engine bridge")
    );
}

#[test]
fn plain_json_payload_is_accepted() {
    let temp = TempDir::new().unwrap();
    let target = target_file(&temp, &json!({"a": {"b": 1}}));
    let op = set_op("a.b", PatchValue::Json(json!({"x": 1.0, "y": 2.0})));
    let envelope = apply_json_target(&target, &[op], false);
    assert!(envelope.success);
    let reloaded: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&target).unwrap()).unwrap();
    assert_eq!(reloaded["a"]["b"], json!({"x": 1.0, "y": 2.0}));
}

#[test]
fn missing_target_is_reported() {
    let temp = TempDir::new().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    let envelope = apply_json_target(
        &root.join("absent.json"),
        &[set_op("a", PatchValue::Int(1))],
        false,
    );
    assert_eq!(envelope.code, "SER_TARGET_MISSING");
}

#[test]
fn non_json_target_content_is_ser002() {
    let temp = TempDir::new().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    let path = root.join("cfg.json");
    fs::write(&path, "not json at all").unwrap();
    let envelope = apply_json_target(&path, &[set_op("a", PatchValue::Int(1))], false);
    assert_eq!(envelope.code, "SER002");
}
