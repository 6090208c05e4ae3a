//! Rendering helpers (markdown) for human-readable reports.
//!
//! Works over envelope JSON payloads rather than typed structs so stored
//! reports from any verb can be re-rendered without re-running the pipeline.

use anyhow::Context;
use camino::{Utf8Path, Utf8PathBuf};
use fs_err as fs;
use serde_json::Value;

/// Rendering knobs for noisy payloads.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarkdownOptions {
    /// Keep at most N rows per `usages` list (`Some(0)` omits them).
    pub max_usages: Option<usize>,
    /// Keep at most N items per `steps` array (`Some(0)` omits them).
    pub max_steps: Option<usize>,
}

fn limit_lists(value: &Value, opts: &MarkdownOptions) -> Value {
    match value {
        Value::Object(map) => {
            let mut limited = serde_json::Map::new();
            for (key, item) in map {
                if key == "usages"
                    && let (Some(max), Some(items)) = (opts.max_usages, item.as_array())
                {
                    let keep: Vec<Value> =
                        items.iter().take(max).map(|v| limit_lists(v, opts)).collect();
                    let kept = keep.len();
                    limited.insert(key.clone(), Value::Array(keep));
                    if items.len() > kept {
                        limited.insert("usages_total".to_string(), items.len().into());
                        limited.insert(
                            "usages_truncated_for_markdown".to_string(),
                            (items.len() - kept).into(),
                        );
                    }
                    continue;
                }
                if key == "steps"
                    && let (Some(max), Some(items)) = (opts.max_steps, item.as_array())
                {
                    if max == 0 {
                        limited.insert("steps_omitted_for_markdown".to_string(), true.into());
                        continue;
                    }
                    let keep: Vec<Value> =
                        items.iter().take(max).map(|v| limit_lists(v, opts)).collect();
                    let kept = keep.len();
                    limited.insert(key.clone(), Value::Array(keep));
                    if items.len() > kept {
                        limited.insert(
                            "steps_truncated_for_markdown".to_string(),
                            (items.len() - kept).into(),
                        );
                    }
                    continue;
                }
                limited.insert(key.clone(), limit_lists(item, opts));
            }
            Value::Object(limited)
        }
        Value::Array(items) => Value::Array(items.iter().map(|v| limit_lists(v, opts)).collect()),
        other => other.clone(),
    }
}

/// Dig the reference-scan data out of a payload, whether it is a raw scan
/// envelope or a verb wrapper with a `steps` list.
fn extract_ref_scan(data: &Value) -> Option<&Value> {
    if data.get("categories_occurrences").is_some()
        || data.get("top_missing_asset_guids").is_some()
    {
        return Some(data);
    }
    data.get("steps")?.as_array()?.iter().find_map(|step| {
        (step.get("step")?.as_str()? == "scan_broken_references")
            .then(|| step.get("result")?.get("data"))
            .flatten()
    })
}

fn extract_runtime_step<'a>(data: &'a Value, name: &str) -> Option<&'a Value> {
    data.get("steps")?.as_array()?.iter().find_map(|step| {
        (step.get("step")?.as_str()? == name).then(|| step.get("result")).flatten()
    })
}

/// Render an envelope payload as a markdown validation report.
pub fn render_markdown_report(payload: &Value, opts: &MarkdownOptions) -> String {
    let data = payload.get("data").cloned().unwrap_or(Value::Null);
    let data = limit_lists(&data, opts);

    let mut out = String::new();
    out.push_str("# unitytool Validation Report\n");
    out.push_str(&format!(
        "- Success: {}\n",
        payload.get("success").and_then(Value::as_bool).unwrap_or(false)
    ));
    for (label, key) in [("Severity", "severity"), ("Code", "code"), ("Message", "message")] {
        out.push_str(&format!(
            "- {label}: {}\n",
            payload.get(key).and_then(Value::as_str).unwrap_or("")
        ));
    }
    out.push('\n');

    if let Some(ref_scan) = extract_ref_scan(&data) {
        let occ = |category: &str| -> u64 {
            ref_scan["categories_occurrences"][category]
                .as_u64()
                .unwrap_or(0)
        };
        out.push_str("## Noise Reduction\n");
        out.push_str(&format!("- Missing Asset Occurrences: {}\n", occ("missing_asset")));
        out.push_str(&format!(
            "- Missing Local ID Occurrences: {}\n",
            occ("missing_local_id")
        ));
        out.push_str(&format!(
            "- Ignored Missing Asset Occurrences: {}\n",
            ref_scan["ignored_missing_asset_occurrences"]
                .as_u64()
                .unwrap_or(0)
        ));
        out.push_str(&format!(
            "- Skipped External Prefab FileID Checks: {}\n",
            ref_scan["skipped_external_prefab_fileid_checks"]
                .as_u64()
                .unwrap_or(0)
        ));
        if let Some(top) = ref_scan["top_missing_asset_guids"].as_array()
            && let Some(first) = top.first()
        {
            out.push_str(&format!(
                "- Top Missing Asset GUID: {} ({})\n",
                first["guid"].as_str().unwrap_or(""),
                first["occurrences"].as_u64().unwrap_or(0)
            ));
        }
        out.push('\n');
    }

    let classification = extract_runtime_step(&data, "classify_errors");
    let assertion = extract_runtime_step(&data, "assert_no_critical_errors");
    if classification.is_some() || assertion.is_some() {
        out.push_str("## Runtime Validation\n");
        let step_code = |name: &str| -> String {
            extract_runtime_step(&data, name)
                .and_then(|r| r.get("code"))
                .and_then(Value::as_str)
                .unwrap_or("n/a")
                .to_string()
        };
        out.push_str(&format!("- Compile Step: {}\n", step_code("compile")));
        out.push_str(&format!("- ClientSim Step: {}\n", step_code("clientsim")));
        if let Some(classification) = classification {
            let class_data = &classification["data"];
            out.push_str(&format!(
                "- Matched Issues: {}\n- Log Line Count: {}\n",
                class_data["matched_issue_count"].as_u64().unwrap_or(0),
                class_data["line_count"].as_u64().unwrap_or(0)
            ));
            let by = &class_data["categories_by_severity"];
            out.push_str(&format!(
                "- Severity Counts: critical={}, error={}, warning={}\n",
                by["critical"].as_u64().unwrap_or(0),
                by["error"].as_u64().unwrap_or(0),
                by["warning"].as_u64().unwrap_or(0)
            ));
            if let Some(categories) = class_data["categories"].as_object()
                && !categories.is_empty()
            {
                out.push_str("\n| Runtime Category | Count |\n| --- | ---: |\n");
                let mut rows: Vec<(&String, u64)> = categories
                    .iter()
                    .map(|(k, v)| (k, v.as_u64().unwrap_or(0)))
                    .collect();
                rows.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
                for (category, count) in rows {
                    out.push_str(&format!("| {category} | {count} |\n"));
                }
            }
        }
        if let Some(assertion) = assertion {
            out.push_str(&format!(
                "- Assertion: {} (allow_warnings={})\n",
                assertion["code"].as_str().unwrap_or("n/a"),
                assertion["data"]["allow_warnings"].as_bool().unwrap_or(false)
            ));
        }
        out.push('\n');
    }

    out.push_str("## Data\n```json\n");
    out.push_str(&serde_json::to_string_pretty(&data).unwrap_or_else(|_| "{}".to_string()));
    out.push_str("\n```\n\n## Diagnostics\n");

    match payload.get("diagnostics").and_then(Value::as_array) {
        Some(diagnostics) if !diagnostics.is_empty() => {
            for (index, diagnostic) in diagnostics.iter().enumerate() {
                out.push_str(&format!(
                    "{}. {}\n   - Path: {}\n   - Location: {}\n   - Evidence: {}\n",
                    index + 1,
                    diagnostic["detail"].as_str().unwrap_or("detail-missing"),
                    diagnostic["path"].as_str().unwrap_or(""),
                    diagnostic["location"].as_str().unwrap_or(""),
                    diagnostic["evidence"].as_str().unwrap_or("")
                ));
            }
        }
        _ => out.push_str("No diagnostics.\n"),
    }
    out.push('\n');
    out
}

/// Export a stored envelope payload as JSON or markdown.
pub fn export_report(
    payload: &Value,
    output_path: &Utf8Path,
    format: &str,
    opts: &MarkdownOptions,
) -> anyhow::Result<Utf8PathBuf> {
    if let Some(parent) = output_path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create {parent}"))?;
    }
    match format {
        "json" => {
            let mut serialized = serde_json::to_string_pretty(payload)?;
            serialized.push('\n');
            fs::write(output_path, serialized)?;
        }
        "md" => {
            fs::write(output_path, render_markdown_report(payload, opts))?;
        }
        other => anyhow::bail!("unsupported report format: {other}"),
    }
    Ok(output_path.to_path_buf())
}
