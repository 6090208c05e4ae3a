use crate::error::ApplyError;
use camino::Utf8Path;
use fs_err as fs;
use serde::Serialize;
use serde_json::{Value, json};
use tracing::debug;
use unitytool_types::codes;
use unitytool_types::envelope::{Diagnostic, Envelope};
use unitytool_types::plan::{PatchOp, PatchValue};
use uuid::Uuid;

/// One dry-run/apply diff row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiffEntry {
    pub path: String,
    pub before: Value,
    pub after: Value,
}

fn split_path(path: &str) -> Vec<&str> {
    path.split('.').filter(|s| !s.is_empty()).collect()
}

/// Walk to a nested value; a segment that parses as an unsigned integer
/// indexes into an array.
fn walk_mut<'a>(root: &'a mut Value, segments: &[&str]) -> Result<&'a mut Value, ApplyError> {
    let mut current = root;
    for (i, segment) in segments.iter().enumerate() {
        current = match current {
            Value::Object(map) => map.get_mut(*segment).ok_or_else(|| ApplyError::MissingPath {
                path: segments[..=i].join("."),
            })?,
            Value::Array(items) => {
                let size = items.len();
                let index: usize =
                    segment.parse().map_err(|_| ApplyError::ExpectsObject {
                        segment: segment.to_string(),
                    })?;
                items.get_mut(index).ok_or(ApplyError::IndexOutOfBounds {
                    index: index as i64,
                    size,
                })?
            }
            _ => {
                return Err(ApplyError::ExpectsObject {
                    segment: segment.to_string(),
                });
            }
        };
    }
    Ok(current)
}

/// Resolve the array addressed by a `<base>.Array.data` path.
fn array_at_path<'a>(root: &'a mut Value, path: &str) -> Result<&'a mut Vec<Value>, ApplyError> {
    let base = path
        .strip_suffix(".Array.data")
        .ok_or_else(|| ApplyError::NotAnArray {
            path: path.to_string(),
        })?;
    let value = walk_mut(root, &split_path(base))?;
    value.as_array_mut().ok_or_else(|| ApplyError::NotAnArray {
        path: path.to_string(),
    })
}

/// The JSON backend cannot express engine object references; those payloads
/// only mean something to the bridge receiver.
fn ensure_json_value(value: &PatchValue) -> Result<(), ApplyError> {
    if let PatchValue::Json(payload) = value
        && payload.as_object().is_some_and(|obj| {
            obj.contains_key("fileID")
                || matches!(
                    obj.get("__type").and_then(Value::as_str),
                    Some("ObjectReference" | "ExposedReference")
                )
        })
    {
        return Err(ApplyError::UnsupportedValue {
            kind: "json".to_string(),
            detail: "object-reference payloads are only meaningful through the engine bridge"
                .to_string(),
        });
    }
    Ok(())
}

fn apply_set(
    document: &mut Value,
    path: &str,
    value: &PatchValue,
) -> Result<DiffEntry, ApplyError> {
    ensure_json_value(value)?;

    if let Some(base) = path.strip_suffix(".Array.size") {
        let array = walk_mut(document, &split_path(base))?
            .as_array_mut()
            .ok_or_else(|| ApplyError::NotAnArray {
                path: path.to_string(),
            })?;
        let PatchValue::Int(new_size) = value else {
            return Err(ApplyError::InvalidArraySize);
        };
        if *new_size < 0 {
            return Err(ApplyError::InvalidArraySize);
        }
        let before = array.len();
        array.resize(*new_size as usize, Value::Null);
        return Ok(DiffEntry {
            path: path.to_string(),
            before: json!(before),
            after: json!(array.len()),
        });
    }

    let segments = split_path(path);
    let Some((leaf, parents)) = segments.split_last() else {
        return Err(ApplyError::MissingPath {
            path: path.to_string(),
        });
    };
    let parent = walk_mut(document, parents)?;
    let slot = match parent {
        Value::Object(map) => map.get_mut(*leaf).ok_or_else(|| ApplyError::MissingPath {
            path: path.to_string(),
        })?,
        Value::Array(items) => {
            let index: usize = leaf.parse().map_err(|_| ApplyError::ExpectsObject {
                segment: leaf.to_string(),
            })?;
            let size = items.len();
            items
                .get_mut(index)
                .ok_or(ApplyError::IndexOutOfBounds {
                    index: index as i64,
                    size,
                })?
        }
        _ => {
            return Err(ApplyError::ExpectsObject {
                segment: leaf.to_string(),
            });
        }
    };

    let before = slot.clone();
    *slot = value.to_json();
    Ok(DiffEntry {
        path: path.to_string(),
        before,
        after: slot.clone(),
    })
}

fn apply_insert(
    document: &mut Value,
    path: &str,
    index: i64,
    value: Option<&PatchValue>,
) -> Result<DiffEntry, ApplyError> {
    if let Some(value) = value {
        ensure_json_value(value)?;
    }
    let array = array_at_path(document, path)?;
    let size = array.len();
    if index < 0 || index as usize > size {
        return Err(ApplyError::IndexOutOfBounds { index, size });
    }
    array.insert(
        index as usize,
        value.map(PatchValue::to_json).unwrap_or(Value::Null),
    );
    Ok(DiffEntry {
        path: path.to_string(),
        before: json!({ "size": size }),
        after: json!({ "size": size + 1, "index": index }),
    })
}

fn apply_remove(document: &mut Value, path: &str, index: i64) -> Result<DiffEntry, ApplyError> {
    let array = array_at_path(document, path)?;
    let size = array.len();
    if index < 0 || index as usize >= size {
        return Err(ApplyError::IndexOutOfBounds { index, size });
    }
    let removed = array.remove(index as usize);
    Ok(DiffEntry {
        path: path.to_string(),
        before: json!({ "size": size, "removed": removed }),
        after: json!({ "size": size - 1, "index": index }),
    })
}

/// Apply one op to an in-memory JSON document.
pub fn apply_op(document: &mut Value, op: &PatchOp) -> Result<DiffEntry, ApplyError> {
    match op {
        PatchOp::Set { path, value, .. } => apply_set(document, path, value),
        PatchOp::InsertArrayElement {
            path, index, value, ..
        } => apply_insert(document, path, *index, value.as_ref()),
        PatchOp::RemoveArrayElement { path, index, .. } => apply_remove(document, path, *index),
    }
}

/// Apply every op in order; the first failure aborts and the document state
/// must be discarded by the caller.
pub fn apply_ops(document: &mut Value, ops: &[PatchOp]) -> Result<Vec<DiffEntry>, ApplyError> {
    ops.iter().map(|op| apply_op(document, op)).collect()
}

/// Op-level preview for targets the core cannot parse (engine assets).
/// `before` is unknown by construction.
pub fn preview_diff(ops: &[PatchOp]) -> Vec<DiffEntry> {
    ops.iter()
        .map(|op| {
            let after = match op {
                PatchOp::Set { value, .. } => value.to_json(),
                PatchOp::InsertArrayElement { index, value, .. } => json!({
                    "insert_index": index,
                    "value": value.as_ref().map(PatchValue::to_json).unwrap_or(Value::Null),
                }),
                PatchOp::RemoveArrayElement { index, .. } => json!({ "remove_index": index }),
            };
            DiffEntry {
                path: op.path().to_string(),
                before: Value::Null,
                after,
            }
        })
        .collect()
}

fn write_atomic(path: &Utf8Path, contents: &str) -> anyhow::Result<()> {
    let parent = path.parent().unwrap_or_else(|| Utf8Path::new("."));
    let tmp_name = format!(
        ".unitytool-tmp-{}",
        Uuid::new_v4().to_string().replace('-', "")
    );
    let tmp_path = parent.join(tmp_name);
    fs::write(&tmp_path, contents)?;
    if path.exists() {
        let _ = fs::remove_file(path);
    }
    fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Apply ops to a `.json` target file.
///
/// Dry-run parses and diffs without writing; a real apply persists via a
/// sibling temp file and rename. Nothing is written unless every op succeeds.
pub fn apply_json_target(target: &Utf8Path, ops: &[PatchOp], dry_run: bool) -> Envelope {
    if !target.exists() {
        return Envelope::error(
            codes::SER_TARGET_MISSING,
            "Patch target file was not found.",
            json!({ "target": target.as_str(), "op_count": ops.len(), "applied": 0 }),
        );
    }

    let text = match fs::read_to_string(target) {
        Ok(text) => text,
        Err(err) => {
            return Envelope::error(
                codes::SER_IO_ERROR,
                "Failed to read patch target file.",
                json!({
                    "target": target.as_str(),
                    "op_count": ops.len(),
                    "applied": 0,
                    "error": err.to_string(),
                }),
            );
        }
    };
    let mut document: Value = match serde_json::from_str(&text) {
        Ok(value) => value,
        Err(err) => {
            return Envelope::error(
                codes::SER002,
                "Patch target file must be valid JSON for the built-in backend.",
                json!({
                    "target": target.as_str(),
                    "op_count": ops.len(),
                    "applied": 0,
                    "error": err.to_string(),
                }),
            );
        }
    };

    let mut diff: Vec<DiffEntry> = Vec::with_capacity(ops.len());
    for (i, op) in ops.iter().enumerate() {
        match apply_op(&mut document, op) {
            Ok(entry) => diff.push(entry),
            Err(err) => {
                return Envelope::error(
                    codes::SER002,
                    "Patch apply failed. Target was not modified.",
                    json!({
                        "target": target.as_str(),
                        "op_count": ops.len(),
                        "applied": diff.len(),
                        "read_only": dry_run,
                    }),
                )
                .with_diagnostics(vec![Diagnostic::new(
                    target.as_str(),
                    format!("ops[{i}]"),
                    "apply_error",
                    err.to_string(),
                )]);
            }
        }
    }

    if dry_run {
        return Envelope::ok(
            codes::SER_DRY_RUN_OK,
            "Dry-run generated a patch preview.",
            json!({
                "target": target.as_str(),
                "op_count": ops.len(),
                "applied": 0,
                "diff": diff,
                "read_only": true,
            }),
        );
    }

    let mut serialized = match serde_json::to_string_pretty(&document) {
        Ok(serialized) => serialized,
        Err(err) => {
            return Envelope::error(
                codes::SER_IO_ERROR,
                "Failed to serialize patched document.",
                json!({ "target": target.as_str(), "error": err.to_string() }),
            );
        }
    };
    serialized.push('\n');
    if let Err(err) = write_atomic(target, &serialized) {
        return Envelope::error(
            codes::SER_IO_ERROR,
            "Failed to write patch target file.",
            json!({
                "target": target.as_str(),
                "op_count": ops.len(),
                "applied": 0,
                "error": err.to_string(),
            }),
        );
    }

    debug!(target = %target, ops = ops.len(), "json apply persisted");
    Envelope::ok(
        codes::SER_APPLY_OK,
        "Patch apply completed for JSON target.",
        json!({
            "target": target.as_str(),
            "op_count": ops.len(),
            "applied": ops.len(),
            "diff": diff,
            "read_only": false,
            "executed": true,
        }),
    )
}
