use crate::index::GuidIndex;
use crate::parse::{ReferenceMatch, extract_local_file_ids, iter_references};
use crate::project::{
    compile_exclude_globs, is_builtin_guid, is_excluded_dir_name, is_text_asset, looks_like_guid,
    normalize_guid, read_text_file, relative_to,
};
use camino::{Utf8Path, Utf8PathBuf};
use globset::GlobSet;
use rayon::prelude::*;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use tracing::debug;
use unitytool_types::cancel::CancelToken;
use unitytool_types::codes;
use unitytool_types::envelope::{Diagnostic, Envelope, Severity};
use walkdir::WalkDir;

#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Include the diagnostics list in the envelope.
    pub details: bool,
    pub max_diagnostics: usize,
    /// Glob patterns excluded from the walk, relative to the scope.
    pub exclude: Vec<String>,
    /// Missing-asset GUIDs counted separately instead of reported.
    pub ignore_guids: HashSet<String>,
    pub top_guid_limit: usize,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            details: false,
            max_diagnostics: 200,
            exclude: vec![],
            ignore_guids: HashSet::new(),
            top_guid_limit: 10,
        }
    }
}

/// Text-asset files under `scope` in sorted walk order, honoring the default
/// directory exclusions and user-supplied globs.
fn collect_scope_files(scope: &Utf8Path, excludes: &GlobSet) -> Vec<Utf8PathBuf> {
    if scope.is_file() {
        let name = scope.file_name().unwrap_or_default();
        if is_text_asset(scope) && !excludes.is_match(name) {
            return vec![scope.to_path_buf()];
        }
        return vec![];
    }

    let mut files: Vec<Utf8PathBuf> = WalkDir::new(scope)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| {
            !(entry.file_type().is_dir()
                && entry.depth() > 0
                && entry
                    .file_name()
                    .to_str()
                    .is_some_and(is_excluded_dir_name))
        })
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| Utf8PathBuf::from_path_buf(entry.into_path()).ok())
        .filter(|path| is_text_asset(path))
        .filter(|path| !excludes.is_match(relative_to(path, scope)))
        .collect();
    files.sort();
    files
}

/// Per-file extraction result, produced in parallel and merged in walk order.
struct FileScan {
    path: Utf8PathBuf,
    unreadable: bool,
    refs: Vec<ReferenceMatch>,
    /// Anchors of this file, extracted only when a local-only reference needs them.
    own_local_ids: Option<HashSet<i64>>,
}

fn scan_file(path: Utf8PathBuf, details: bool) -> FileScan {
    let text = match read_text_file(&path) {
        Ok(Some(text)) => text,
        _ => {
            return FileScan {
                path,
                unreadable: true,
                refs: vec![],
                own_local_ids: None,
            };
        }
    };

    let refs = iter_references(&text, details);
    let needs_own_ids = refs.iter().any(|r| r.guid.is_none() && r.file_id != 0);
    let own_local_ids = needs_own_ids.then(|| extract_local_file_ids(&text));

    FileScan {
        path,
        unreadable: false,
        refs,
        own_local_ids,
    }
}

fn cancelled(operation: &str) -> Envelope {
    Envelope::error(
        codes::OP_CANCELLED,
        format!("{operation} was cancelled."),
        json!({ "operation": operation }),
    )
}

#[derive(PartialEq, Eq, Hash)]
enum IssueKey {
    MissingAsset(String),
    MissingLocalIdExternal(String, i64),
    MissingLocalIdLocal(String, i64),
}

/// Scan `scope` for broken references against the GUID index.
///
/// See the envelope's `data` for aggregate counts; diagnostics are included
/// only when `details` is set and are capped at `max_diagnostics`.
pub fn scan_broken_references(
    scope: &Utf8Path,
    project_root: &Utf8Path,
    index: &GuidIndex,
    opts: &ScanOptions,
    cancel: &CancelToken,
) -> Envelope {
    if !scope.exists() {
        return Envelope::error(
            codes::REF404,
            "Scope path does not exist.",
            json!({ "scope": scope.as_str(), "read_only": true }),
        );
    }
    for raw in &opts.ignore_guids {
        if !looks_like_guid(&normalize_guid(raw)) {
            return Envelope::error(
                codes::REF001,
                "ignore GUIDs must be 32-character hexadecimal strings.",
                json!({ "scope": scope.as_str(), "invalid_ignore_guid": raw, "read_only": true }),
            );
        }
    }
    let ignore_guids: HashSet<String> = opts
        .ignore_guids
        .iter()
        .map(|g| normalize_guid(g))
        .filter(|g| !is_builtin_guid(g))
        .collect();

    let excludes = match compile_exclude_globs(&opts.exclude) {
        Ok(set) => set,
        Err(err) => {
            return Envelope::error(
                codes::REF404,
                format!("Invalid exclude pattern: {err}"),
                json!({ "scope": scope.as_str(), "read_only": true }),
            );
        }
    };

    if cancel.is_cancelled() {
        return cancelled("scan_broken_references");
    }

    let files = collect_scope_files(scope, &excludes);
    debug!(files = files.len(), scope = %scope, "reference scan starting");

    let scans: Vec<FileScan> = files
        .into_par_iter()
        .map(|path| {
            if cancel.is_cancelled() {
                FileScan {
                    path,
                    unreadable: false,
                    refs: vec![],
                    own_local_ids: None,
                }
            } else {
                scan_file(path, opts.details)
            }
        })
        .collect();

    // Deterministic aggregation in walk order.
    let mut diagnostics: Vec<Diagnostic> = Vec::new();
    let mut raw_missing_asset = 0u64;
    let mut raw_missing_local_id = 0u64;
    let mut unique_missing_asset = 0u64;
    let mut unique_missing_local_id = 0u64;
    let mut seen_issues: HashSet<IssueKey> = HashSet::new();
    let mut missing_guid_occurrences: HashMap<String, u64> = HashMap::new();
    let mut ignored_guid_occurrences: HashMap<String, u64> = HashMap::new();
    let mut target_local_ids: HashMap<Utf8PathBuf, Option<HashSet<i64>>> = HashMap::new();

    let mut scanned_files = 0u64;
    let mut scanned_refs = 0u64;
    let mut unreadable_files = 0u64;
    let mut total_broken = 0u64;
    let mut skipped_external_prefab_fileid_checks = 0u64;

    for scan in &scans {
        if cancel.is_cancelled() {
            return cancelled("scan_broken_references");
        }
        scanned_files += 1;
        if scan.unreadable {
            unreadable_files += 1;
            continue;
        }
        scanned_refs += scan.refs.len() as u64;
        let src_rel = relative_to(&scan.path, project_root);

        for reference in &scan.refs {
            if reference.file_id == 0 && reference.guid.is_none() {
                continue;
            }
            let location = if reference.line > 0 {
                format!("{}:{}", reference.line, reference.column)
            } else {
                String::new()
            };

            let mut record_issue = |key: IssueKey,
                                    category: &str,
                                    evidence: String,
                                    raw_count: &mut u64,
                                    unique_count: &mut u64| {
                *raw_count += 1;
                if !seen_issues.insert(key) {
                    return;
                }
                *unique_count += 1;
                total_broken += 1;
                if opts.details && diagnostics.len() < opts.max_diagnostics {
                    diagnostics.push(Diagnostic::new(
                        src_rel.clone(),
                        location.clone(),
                        category,
                        evidence,
                    ));
                }
            };

            match &reference.guid {
                Some(guid) => {
                    if is_builtin_guid(guid) {
                        continue;
                    }
                    let Some(target) = index.get(guid) else {
                        if ignore_guids.contains(guid) {
                            *ignored_guid_occurrences.entry(guid.clone()).or_default() += 1;
                            continue;
                        }
                        *missing_guid_occurrences.entry(guid.clone()).or_default() += 1;
                        record_issue(
                            IssueKey::MissingAsset(guid.clone()),
                            "missing_asset",
                            format!("{} -> guid {} not found", reference.raw, guid),
                            &mut raw_missing_asset,
                            &mut unique_missing_asset,
                        );
                        continue;
                    };

                    if reference.file_id != 0 && is_text_asset(target) {
                        // Imported prefab local IDs don't appear as raw YAML
                        // anchors, so external fileIDs into another prefab
                        // cannot be cross-checked authoritatively.
                        let external_prefab = target
                            .extension()
                            .is_some_and(|e| e.eq_ignore_ascii_case("prefab"))
                            && target != scan.path;
                        if external_prefab {
                            skipped_external_prefab_fileid_checks += 1;
                            continue;
                        }

                        let target_key = target.to_path_buf();
                        let ids = target_local_ids.entry(target_key).or_insert_with(|| {
                            read_text_file(target)
                                .ok()
                                .flatten()
                                .map(|text| extract_local_file_ids(&text))
                        });
                        let Some(ids) = ids else {
                            continue;
                        };
                        if !ids.is_empty() && !ids.contains(&reference.file_id) {
                            let target_rel = relative_to(target, project_root);
                            record_issue(
                                IssueKey::MissingLocalIdExternal(
                                    target_rel.clone(),
                                    reference.file_id,
                                ),
                                "missing_local_id",
                                format!(
                                    "{} -> fileID {} not found in {}",
                                    reference.raw, reference.file_id, target_rel
                                ),
                                &mut raw_missing_local_id,
                                &mut unique_missing_local_id,
                            );
                        }
                    }
                }
                None => {
                    // Local reference: the anchor must exist in this document.
                    let Some(own) = &scan.own_local_ids else {
                        continue;
                    };
                    if !own.contains(&reference.file_id) {
                        record_issue(
                            IssueKey::MissingLocalIdLocal(src_rel.clone(), reference.file_id),
                            "missing_local_id",
                            format!(
                                "{} -> fileID {} not found in local objects",
                                reference.raw, reference.file_id
                            ),
                            &mut raw_missing_local_id,
                            &mut unique_missing_local_id,
                        );
                    }
                }
            }
        }
    }

    let broken_occurrences = raw_missing_asset + raw_missing_local_id;
    let returned_diagnostics = diagnostics.len() as u64;
    let truncated_diagnostics = if opts.details {
        total_broken.saturating_sub(returned_diagnostics)
    } else {
        total_broken
    };

    let (success, severity, code, message) = if total_broken > 0 {
        let code = if unique_missing_asset > 0 {
            codes::REF001
        } else {
            codes::REF002
        };
        (
            false,
            Severity::Error,
            code,
            "Broken references were detected in scope.",
        )
    } else if unreadable_files > 0 {
        (
            true,
            Severity::Warning,
            codes::REF_SCAN_PARTIAL,
            "No broken references found, but some files could not be decoded.",
        )
    } else {
        (
            true,
            Severity::Info,
            codes::REF_SCAN_OK,
            "No broken references were detected in scope.",
        )
    };

    let mut sorted_ignore: Vec<&String> = ignore_guids.iter().collect();
    sorted_ignore.sort();

    Envelope {
        success,
        severity,
        code: code.to_string(),
        message: message.to_string(),
        data: json!({
            "scope": relative_to(scope, project_root),
            "scan_project_root": project_root.as_str(),
            "read_only": true,
            "ignore_asset_guids": sorted_ignore,
            "details_included": opts.details,
            "max_diagnostics": opts.max_diagnostics,
            "scanned_files": scanned_files,
            "scanned_references": scanned_refs,
            "broken_count": total_broken,
            "broken_occurrences": broken_occurrences,
            "ignored_missing_asset_unique_count": ignored_guid_occurrences.len(),
            "ignored_missing_asset_occurrences":
                ignored_guid_occurrences.values().sum::<u64>(),
            "returned_diagnostics": returned_diagnostics,
            "truncated_diagnostics": truncated_diagnostics,
            "unreadable_files": unreadable_files,
            "skipped_external_prefab_fileid_checks": skipped_external_prefab_fileid_checks,
            "exclude_patterns": opts.exclude,
            "categories": {
                "missing_asset": unique_missing_asset,
                "missing_local_id": unique_missing_local_id,
            },
            "categories_occurrences": {
                "missing_asset": raw_missing_asset,
                "missing_local_id": raw_missing_local_id,
            },
            "top_missing_asset_guids": top_guids(&missing_guid_occurrences, opts.top_guid_limit),
            "top_ignored_missing_asset_guids":
                top_guids(&ignored_guid_occurrences, opts.top_guid_limit),
        }),
        diagnostics,
    }
}

/// Top-N GUIDs by occurrence; ties break lexicographically.
fn top_guids(occurrences: &HashMap<String, u64>, limit: usize) -> serde_json::Value {
    let mut entries: Vec<(&String, &u64)> = occurrences.iter().collect();
    entries.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
    entries.truncate(limit.max(1));
    json!(
        entries
            .iter()
            .map(|(guid, count)| json!({ "guid": guid, "occurrences": count }))
            .collect::<Vec<_>>()
    )
}

/// Find every citation of an asset (by path or GUID) inside a scope.
pub fn where_used(
    asset_or_guid: &str,
    scope: Option<&Utf8Path>,
    project_root: &Utf8Path,
    index: &GuidIndex,
    exclude: &[String],
    max_usages: usize,
    cancel: &CancelToken,
) -> Envelope {
    let max_usages = max_usages.max(1);

    let (guid, asset_path) = if looks_like_guid(asset_or_guid) {
        let guid = normalize_guid(asset_or_guid);
        match index.get(&guid) {
            Some(path) => (guid, path.to_path_buf()),
            None => {
                return Envelope::error(
                    codes::REF001,
                    "GUID was not found in project meta files.",
                    json!({ "asset_or_guid": asset_or_guid, "read_only": true }),
                );
            }
        }
    } else {
        let candidate = crate::project::resolve_scope_path(asset_or_guid, project_root);
        if !candidate.exists() {
            return Envelope::error(
                codes::REF404,
                "Target asset path does not exist.",
                json!({ "asset_or_guid": asset_or_guid, "read_only": true }),
            );
        }
        let meta_path = Utf8PathBuf::from(format!("{candidate}.meta"));
        let guid = read_text_file(&meta_path)
            .ok()
            .flatten()
            .and_then(|text| crate::parse::extract_meta_guid(&text));
        match guid {
            Some(guid) => (guid, candidate),
            None => {
                return Envelope::error(
                    codes::REF001,
                    "Target asset has no .meta GUID.",
                    json!({ "asset_or_guid": asset_or_guid, "read_only": true }),
                );
            }
        }
    };

    let scan_scope = scope.unwrap_or(project_root);
    if !scan_scope.exists() {
        return Envelope::error(
            codes::REF404,
            "Scope path does not exist.",
            json!({ "scope": scan_scope.as_str(), "read_only": true }),
        );
    }
    let excludes = match compile_exclude_globs(exclude) {
        Ok(set) => set,
        Err(err) => {
            return Envelope::error(
                codes::REF404,
                format!("Invalid exclude pattern: {err}"),
                json!({ "scope": scan_scope.as_str(), "read_only": true }),
            );
        }
    };

    let files = collect_scope_files(scan_scope, &excludes);
    let scans: Vec<FileScan> = files
        .into_par_iter()
        .map(|path| {
            if cancel.is_cancelled() {
                FileScan {
                    path,
                    unreadable: false,
                    refs: vec![],
                    own_local_ids: None,
                }
            } else {
                scan_file(path, true)
            }
        })
        .collect();
    if cancel.is_cancelled() {
        return cancelled("where_used");
    }

    let mut usages = Vec::new();
    let mut truncated_usages = 0u64;
    let mut scanned_files = 0u64;
    for scan in &scans {
        scanned_files += 1;
        let src_rel = relative_to(&scan.path, project_root);
        for reference in &scan.refs {
            if reference.guid.as_deref() != Some(guid.as_str()) {
                continue;
            }
            if usages.len() < max_usages {
                usages.push(json!({
                    "path": src_rel,
                    "line": reference.line,
                    "column": reference.column,
                    "reference": reference.raw,
                }));
            } else {
                truncated_usages += 1;
            }
        }
    }

    let severity = if usages.is_empty() {
        Severity::Warning
    } else {
        Severity::Info
    };

    Envelope {
        success: true,
        severity,
        code: codes::REF_WHERE_USED.to_string(),
        message: "Reference usage scan completed.".to_string(),
        data: json!({
            "guid": guid,
            "asset_path": relative_to(&asset_path, project_root),
            "scope": relative_to(scan_scope, project_root),
            "scan_project_root": project_root.as_str(),
            "usage_count": usages.len() as u64 + truncated_usages,
            "returned_usages": usages.len(),
            "truncated_usages": truncated_usages,
            "max_usages": max_usages,
            "scanned_files": scanned_files,
            "exclude_patterns": exclude,
            "usages": usages,
            "read_only": true,
        }),
        diagnostics: vec![],
    }
}
