use crate::index::GuidIndex;
use crate::parse::source_prefab_reference;
use crate::project::{normalize_guid, read_text_file, relative_to};
use camino::Utf8Path;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::json;
use std::collections::HashMap;
use unitytool_types::codes;
use unitytool_types::envelope::{Diagnostic, Envelope, Severity};

static OVERRIDE_TARGET: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"target:\s*\{fileID:\s*(-?\d+)(?:,\s*guid:\s*([0-9a-fA-F]{32}))?(?:,\s*type:\s*(-?\d+))?\}",
    )
    .expect("override target regex")
});

static ARRAY_SIZE_PATH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?P<prefix>.+)\.Array\.size$").expect("array size path regex"));

static ARRAY_DATA_PATH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<prefix>.+)\.Array\.data\[(?P<index>\d+)\]$").expect("array data path regex")
});

const CHAIN_DEPTH_LIMIT: usize = 12;

/// One `m_Modifications` entry of a prefab variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverrideEntry {
    pub target_file_id: i64,
    /// Lowercased; empty when the target is local.
    pub target_guid: String,
    pub target_type: Option<i64>,
    pub target_raw: String,
    pub property_path: String,
    pub value: String,
    pub object_reference: String,
    pub line: usize,
}

impl OverrideEntry {
    pub fn target_key(&self) -> String {
        format!("{}:{}", self.target_guid, self.target_file_id)
    }
}

fn load_variant(
    variant_path: &Utf8Path,
    project_root: &Utf8Path,
) -> Result<String, Box<Envelope>> {
    if !variant_path.exists() {
        return Err(Box::new(Envelope::error(
            codes::PVR404,
            "Variant path does not exist.",
            json!({ "variant_path": variant_path.as_str(), "read_only": true }),
        )));
    }
    match read_text_file(variant_path) {
        Ok(Some(text)) => Ok(text),
        Ok(None) => Err(Box::new(Envelope::error(
            codes::PVR400,
            "Variant file could not be decoded as UTF-8.",
            json!({
                "variant_path": relative_to(variant_path, project_root),
                "read_only": true
            }),
        ))),
        Err(err) => Err(Box::new(Envelope::error(
            codes::PVR404,
            format!("Variant file could not be read: {err}"),
            json!({ "variant_path": variant_path.as_str(), "read_only": true }),
        ))),
    }
}

/// Parse the `m_Modifications:` block into override entries.
///
/// The block is line-oriented: a `- target:` line opens an entry and the
/// following `propertyPath:` / `value:` / `objectReference:` lines fill it.
pub fn parse_overrides(text: &str) -> Vec<OverrideEntry> {
    let mut entries: Vec<OverrideEntry> = Vec::new();
    let mut in_modifications = false;
    let mut mod_indent = 0usize;
    let mut current: Option<OverrideEntry> = None;

    for (idx, line) in text.lines().enumerate() {
        let line_no = idx + 1;
        let stripped = line.trim();
        let indent = line.len() - line.trim_start_matches(' ').len();

        if stripped.ends_with("m_Modifications:") {
            in_modifications = true;
            mod_indent = indent;
            if let Some(entry) = current.take() {
                entries.push(entry);
            }
            continue;
        }

        if in_modifications
            && !stripped.is_empty()
            && indent <= mod_indent
            && !stripped.starts_with('-')
        {
            in_modifications = false;
            if let Some(entry) = current.take() {
                entries.push(entry);
            }
        }

        if !in_modifications {
            continue;
        }

        if stripped.starts_with("- target:") || stripped.starts_with("target:") {
            if let Some(entry) = current.take() {
                entries.push(entry);
            }
            let mut target_file_id = 0i64;
            let mut target_guid = String::new();
            let mut target_type = None;
            if let Some(caps) = OVERRIDE_TARGET.captures(stripped) {
                target_file_id = caps[1].parse().unwrap_or(0);
                target_guid = caps
                    .get(2)
                    .map(|m| normalize_guid(m.as_str()))
                    .unwrap_or_default();
                target_type = caps.get(3).and_then(|m| m.as_str().parse().ok());
            }
            let target_raw = stripped
                .split_once("target:")
                .map(|(_, rest)| rest.trim().to_string())
                .unwrap_or_default();
            current = Some(OverrideEntry {
                target_file_id,
                target_guid,
                target_type,
                target_raw,
                property_path: String::new(),
                value: String::new(),
                object_reference: String::new(),
                line: line_no,
            });
            continue;
        }

        let Some(entry) = current.as_mut() else {
            continue;
        };
        if let Some(rest) = stripped.strip_prefix("propertyPath:") {
            entry.property_path = rest.trim().to_string();
        } else if let Some(rest) = stripped.strip_prefix("value:") {
            entry.value = rest.trim().to_string();
        } else if let Some(rest) = stripped.strip_prefix("objectReference:") {
            entry.object_reference = rest.trim().to_string();
        }
    }

    if let Some(entry) = current.take() {
        entries.push(entry);
    }
    entries
}

/// Resolve the Base chain of a variant, root-to-variant order starting from
/// the variant itself.
pub fn resolve_prefab_chain(
    variant_path: &Utf8Path,
    project_root: &Utf8Path,
    index: &GuidIndex,
) -> Envelope {
    let text = match load_variant(variant_path, project_root) {
        Ok(text) => text,
        Err(envelope) => return *envelope,
    };

    let mut chain = vec![json!({
        "path": relative_to(variant_path, project_root),
        "guid": serde_json::Value::Null,
    })];
    let mut diagnostics: Vec<Diagnostic> = Vec::new();
    let mut visited = vec![variant_path.to_path_buf()];
    let mut current_text = text;
    let mut exhausted = true;

    for _ in 0..CHAIN_DEPTH_LIMIT {
        let Some((_, source_guid)) = source_prefab_reference(&current_text) else {
            exhausted = false;
            break;
        };
        let Some(target) = index.get(&source_guid) else {
            diagnostics.push(Diagnostic::new(
                relative_to(variant_path, project_root),
                "m_SourcePrefab",
                "missing_asset",
                format!("guid {source_guid} from source prefab is not found"),
            ));
            chain.push(json!({ "path": "", "guid": source_guid }));
            exhausted = false;
            break;
        };
        chain.push(json!({
            "path": relative_to(target, project_root),
            "guid": source_guid,
        }));
        if visited.iter().any(|p| p == target) {
            diagnostics.push(Diagnostic::new(
                relative_to(target, project_root),
                "prefab_chain",
                "loop_detected",
                "prefab source chain references an already visited asset",
            ));
            exhausted = false;
            break;
        }
        visited.push(target.to_path_buf());
        match read_text_file(target) {
            Ok(Some(next_text)) => current_text = next_text,
            _ => {
                diagnostics.push(Diagnostic::new(
                    relative_to(target, project_root),
                    "file",
                    "unreadable_file",
                    "unable to decode source prefab",
                ));
                exhausted = false;
                break;
            }
        }
    }
    if exhausted {
        diagnostics.push(Diagnostic::new(
            relative_to(variant_path, project_root),
            "prefab_chain",
            "depth_limit",
            format!("chain depth exceeded {CHAIN_DEPTH_LIMIT}"),
        ));
    }

    let (severity, code, message) = if diagnostics.is_empty() {
        (Severity::Info, codes::PVR_CHAIN_OK, "Prefab chain resolved.")
    } else {
        (
            Severity::Warning,
            codes::PVR_CHAIN_WARN,
            "Prefab chain resolved with warnings.",
        )
    };

    Envelope {
        success: true,
        severity,
        code: code.to_string(),
        message: message.to_string(),
        data: json!({
            "variant_path": relative_to(variant_path, project_root),
            "chain": chain,
            "read_only": true,
        }),
        diagnostics,
    }
}

fn filter_entries(entries: Vec<OverrideEntry>, component_filter: Option<&str>) -> Vec<OverrideEntry> {
    let Some(filter) = component_filter else {
        return entries;
    };
    let needle = filter.to_ascii_lowercase();
    entries
        .into_iter()
        .filter(|entry| {
            entry.target_raw.to_ascii_lowercase().contains(&needle)
                || entry.property_path.to_ascii_lowercase().contains(&needle)
        })
        .collect()
}

/// Enumerate override entries, optionally filtered by a component needle.
pub fn list_overrides(
    variant_path: &Utf8Path,
    project_root: &Utf8Path,
    component_filter: Option<&str>,
) -> Envelope {
    let text = match load_variant(variant_path, project_root) {
        Ok(text) => text,
        Err(envelope) => return *envelope,
    };

    let entries = filter_entries(parse_overrides(&text), component_filter);
    let payload: Vec<serde_json::Value> = entries
        .iter()
        .map(|entry| {
            json!({
                "line": entry.line,
                "target_file_id": entry.target_file_id,
                "target_guid": entry.target_guid,
                "property_path": entry.property_path,
                "value": entry.value,
                "object_reference": entry.object_reference,
            })
        })
        .collect();

    Envelope::ok(
        codes::PVR_OVERRIDES_OK,
        "Override list extracted.",
        json!({
            "variant_path": relative_to(variant_path, project_root),
            "component_filter": component_filter,
            "override_count": payload.len(),
            "overrides": payload,
            "read_only": true,
        }),
    )
}

/// Effective override values under the last-write-wins rule.
pub fn compute_effective_values(
    variant_path: &Utf8Path,
    project_root: &Utf8Path,
    component_filter: Option<&str>,
) -> Envelope {
    let text = match load_variant(variant_path, project_root) {
        Ok(text) => text,
        Err(envelope) => return *envelope,
    };

    let entries = filter_entries(parse_overrides(&text), component_filter);
    let mut order: Vec<String> = Vec::new();
    let mut effective: HashMap<String, serde_json::Value> = HashMap::new();
    for entry in &entries {
        if entry.property_path.is_empty() {
            continue;
        }
        let key = format!("{}:{}", entry.target_key(), entry.property_path);
        if !effective.contains_key(&key) {
            order.push(key.clone());
        }
        effective.insert(
            key,
            json!({
                "target_key": entry.target_key(),
                "target_guid": entry.target_guid,
                "target_file_id": entry.target_file_id,
                "property_path": entry.property_path,
                "value": entry.value,
                "object_reference": entry.object_reference,
                "line": entry.line,
            }),
        );
    }
    let values: Vec<&serde_json::Value> = order.iter().filter_map(|k| effective.get(k)).collect();

    Envelope::ok(
        codes::PVR_EFFECTIVE_OK,
        "Effective override values computed by last-write-wins rule.",
        json!({
            "variant_path": relative_to(variant_path, project_root),
            "component_filter": component_filter,
            "value_count": values.len(),
            "effective_values": values,
            "read_only": true,
        }),
    )
}

/// Heuristic stale-override detection.
///
/// Flags duplicate `property_path` entries per target (later entries shadow
/// earlier ones) and `Array.size` values inconsistent with the maximum
/// observed `Array.data[i]` index. Nothing engine-aware: ambiguity stays a
/// decision for the operator.
pub fn detect_stale_overrides(variant_path: &Utf8Path, project_root: &Utf8Path) -> Envelope {
    let text = match load_variant(variant_path, project_root) {
        Ok(text) => text,
        Err(envelope) => return *envelope,
    };
    let variant_rel = relative_to(variant_path, project_root);

    let entries = parse_overrides(&text);
    let mut diagnostics: Vec<Diagnostic> = Vec::new();
    let mut key_lines: Vec<((String, String), Vec<usize>)> = Vec::new();
    let mut array_sizes: HashMap<(String, String), i64> = HashMap::new();
    let mut array_max_indexes: Vec<((String, String), i64)> = Vec::new();

    for entry in &entries {
        if entry.property_path.is_empty() {
            diagnostics.push(Diagnostic::new(
                variant_rel.clone(),
                format!("{}:1", entry.line),
                "empty_property_path",
                "override entry does not specify propertyPath",
            ));
        } else {
            let key = (entry.target_key(), entry.property_path.clone());
            match key_lines.iter_mut().find(|(k, _)| *k == key) {
                Some((_, lines)) => lines.push(entry.line),
                None => key_lines.push((key, vec![entry.line])),
            }
        }

        if let Some(caps) = ARRAY_SIZE_PATH.captures(&entry.property_path)
            && let Ok(size) = entry.value.parse::<i64>()
        {
            array_sizes.insert((entry.target_key(), caps["prefix"].to_string()), size);
        }

        if let Some(caps) = ARRAY_DATA_PATH.captures(&entry.property_path)
            && let Ok(index) = caps["index"].parse::<i64>()
        {
            let key = (entry.target_key(), caps["prefix"].to_string());
            match array_max_indexes.iter_mut().find(|(k, _)| *k == key) {
                Some((_, max)) => *max = (*max).max(index),
                None => array_max_indexes.push((key, index)),
            }
        }
    }

    for ((target_key, property_path), lines) in &key_lines {
        if lines.len() > 1
            && let Some(last_line) = lines.last()
        {
            diagnostics.push(Diagnostic::new(
                variant_rel.clone(),
                format!("{last_line}:1"),
                "duplicate_override",
                format!(
                    "{target_key} / {property_path} appears {} times; later entries shadow earlier entries",
                    lines.len()
                ),
            ));
        }
    }

    for ((target_key, prefix), max_index) in &array_max_indexes {
        let Some(size) = array_sizes.get(&(target_key.clone(), prefix.clone())) else {
            continue;
        };
        if max_index >= size {
            diagnostics.push(Diagnostic::new(
                variant_rel.clone(),
                "array_override",
                "array_size_mismatch",
                format!("{target_key} / {prefix}: size={size} but data index {max_index} exists"),
            ));
        }
    }

    if diagnostics.is_empty() {
        Envelope::ok(
            codes::PVR_STALE_NONE,
            "No stale override patterns detected.",
            json!({
                "variant_path": variant_rel,
                "stale_count": 0,
                "read_only": true,
            }),
        )
    } else {
        Envelope {
            success: false,
            severity: Severity::Warning,
            code: codes::PVR001.to_string(),
            message: "Potential stale overrides detected.".to_string(),
            data: json!({
                "variant_path": variant_rel,
                "stale_count": diagnostics.len(),
                "decision_required": true,
                "read_only": true,
            }),
            diagnostics,
        }
    }
}
