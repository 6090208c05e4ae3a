use camino::{Utf8Path, Utf8PathBuf};
use serde_json::json;
use tracing::debug;
use unitytool_assets::{
    GuidIndex, ScanOptions, compute_effective_values, detect_stale_overrides, list_overrides,
    resolve_prefab_chain, resolve_project_root, resolve_scope_path, scan_broken_references,
    where_used,
};
use unitytool_runtime::RuntimePolicy;
use unitytool_types::cancel::CancelToken;
use unitytool_types::codes;
use unitytool_types::envelope::{Diagnostic, Envelope, Severity, max_severity};

/// Sequences component pipelines over a working directory.
///
/// The orchestrator holds no index or other cross-request state; the GUID
/// index is rebuilt per invocation from whichever project root the scope
/// resolves to.
pub struct Orchestrator {
    base_dir: Utf8PathBuf,
    pub(crate) cancel: CancelToken,
}

/// One executed pipeline stage.
pub(crate) struct Step {
    pub name: &'static str,
    pub envelope: Envelope,
}

pub(crate) fn steps_json(steps: &[Step]) -> serde_json::Value {
    json!(
        steps
            .iter()
            .map(|step| {
                json!({
                    "step": step.name,
                    "result": serde_json::to_value(&step.envelope).unwrap_or_default(),
                })
            })
            .collect::<Vec<_>>()
    )
}

pub(crate) fn no_project_root_envelope(scope: &Utf8Path) -> Envelope {
    Envelope::error(
        codes::REF_NO_PROJECT_ROOT,
        "Scope is not inside a project root (no ancestor contains an Assets directory).",
        json!({ "scope": scope.as_str(), "read_only": true }),
    )
}

/// Build the per-invocation GUID index, honoring the same user-supplied
/// exclude globs as the scan walk.
pub(crate) fn build_index(
    project_root: &Utf8Path,
    exclude: &[String],
) -> Result<GuidIndex, Box<Envelope>> {
    GuidIndex::build(project_root, exclude).map_err(|err| {
        Box::new(Envelope::error(
            codes::REF404,
            format!("Invalid exclude pattern: {err}"),
            json!({ "exclude_patterns": exclude, "read_only": true }),
        ))
    })
}

impl Orchestrator {
    pub fn new(base_dir: Utf8PathBuf, cancel: CancelToken) -> Self {
        Self { base_dir, cancel }
    }

    pub fn base_dir(&self) -> &Utf8Path {
        &self.base_dir
    }

    pub(crate) fn resolve(&self, raw: &str) -> Utf8PathBuf {
        resolve_scope_path(raw, &self.base_dir)
    }

    /// `inspect variant`: chain → overrides → effective values → stale scan,
    /// fail-fast, read-only.
    pub fn inspect_variant(&self, variant_path: &str, component_filter: Option<&str>) -> Envelope {
        let variant = self.resolve(variant_path);
        let Some(project_root) = resolve_project_root(&variant) else {
            return no_project_root_envelope(&variant);
        };
        let index = match build_index(&project_root, &[]) {
            Ok(index) => index,
            Err(envelope) => return *envelope,
        };

        let mut steps: Vec<Step> = Vec::new();
        let mut fail_fast = false;
        let stages: Vec<(&'static str, Box<dyn Fn() -> Envelope + '_>)> = vec![
            (
                "resolve_prefab_chain",
                Box::new(|| resolve_prefab_chain(&variant, &project_root, &index)),
            ),
            (
                "list_overrides",
                Box::new(|| list_overrides(&variant, &project_root, component_filter)),
            ),
            (
                "compute_effective_values",
                Box::new(|| compute_effective_values(&variant, &project_root, component_filter)),
            ),
            (
                "detect_stale_overrides",
                Box::new(|| detect_stale_overrides(&variant, &project_root)),
            ),
        ];

        for (name, run) in stages {
            if self.cancel.is_cancelled() {
                return Envelope::error(
                    codes::OP_CANCELLED,
                    "inspect.variant was cancelled.",
                    json!({ "variant_path": variant_path }),
                );
            }
            let envelope = run();
            let severity = envelope.severity;
            steps.push(Step { name, envelope });
            if severity.is_fail() {
                fail_fast = true;
                break;
            }
        }

        let severity = max_severity(steps.iter().map(|s| s.envelope.severity));
        let diagnostics: Vec<Diagnostic> = steps
            .iter()
            .flat_map(|s| s.envelope.diagnostics.iter().cloned())
            .collect();

        Envelope {
            success: !severity.is_fail(),
            severity,
            code: codes::INSPECT_VARIANT_RESULT.to_string(),
            message: if fail_fast {
                "inspect.variant stopped by fail-fast policy due to error severity.".to_string()
            } else {
                "inspect.variant pipeline completed (read-only).".to_string()
            },
            data: json!({
                "variant_path": variant_path,
                "component_filter": component_filter,
                "read_only": true,
                "fail_fast_triggered": fail_fast,
                "steps": steps_json(&steps),
            }),
            diagnostics,
        }
    }

    /// `inspect where-used`: single read-only scan step.
    pub fn inspect_where_used(
        &self,
        asset_or_guid: &str,
        scope: Option<&str>,
        exclude: &[String],
        max_usages: usize,
    ) -> Envelope {
        let scope_path = scope.map(|s| self.resolve(s));
        let anchor = scope_path.clone().unwrap_or_else(|| self.base_dir.clone());
        let Some(project_root) = resolve_project_root(&anchor) else {
            return no_project_root_envelope(&anchor);
        };
        let index = match build_index(&project_root, exclude) {
            Ok(index) => index,
            Err(envelope) => return *envelope,
        };

        let step = where_used(
            asset_or_guid,
            scope_path.as_deref(),
            &project_root,
            &index,
            exclude,
            max_usages,
            &self.cancel,
        );

        let steps = vec![Step {
            name: "where_used",
            envelope: step,
        }];
        let inner = &steps[0].envelope;
        Envelope {
            success: inner.success,
            severity: inner.severity,
            code: codes::INSPECT_WHERE_USED_RESULT.to_string(),
            message: "inspect.where-used pipeline completed (read-only).".to_string(),
            data: json!({
                "asset_or_guid": asset_or_guid,
                "scope": scope,
                "read_only": true,
                "steps": steps_json(&steps),
            }),
            diagnostics: inner.diagnostics.clone(),
        }
    }

    /// `validate refs`: broken-reference scan over a scope.
    pub fn validate_refs(&self, scope: &str, opts: &ScanOptions) -> Envelope {
        let scope_path = self.resolve(scope);
        let Some(project_root) = resolve_project_root(&scope_path) else {
            return no_project_root_envelope(&scope_path);
        };
        let index = match build_index(&project_root, &opts.exclude) {
            Ok(index) => index,
            Err(envelope) => return *envelope,
        };
        debug!(scope = %scope_path, root = %project_root, "validate refs");

        let step = scan_broken_references(&scope_path, &project_root, &index, opts, &self.cancel);

        let steps = vec![Step {
            name: "scan_broken_references",
            envelope: step,
        }];
        let inner = &steps[0].envelope;

        // Surface the scan's aggregate counts at the top level; callers read
        // `categories` / `broken_occurrences` without digging through steps.
        let mut data = match &inner.data {
            serde_json::Value::Object(map) => map.clone(),
            _ => serde_json::Map::new(),
        };
        data.insert("scope".to_string(), json!(scope));
        data.insert("read_only".to_string(), json!(true));
        data.insert("steps".to_string(), steps_json(&steps));

        Envelope {
            success: inner.success,
            severity: inner.severity,
            code: codes::VALIDATE_REFS_RESULT.to_string(),
            message: "validate.refs pipeline completed (read-only).".to_string(),
            data: serde_json::Value::Object(data),
            diagnostics: inner.diagnostics.clone(),
        }
    }

    /// `validate runtime`: compile → clientsim → collect → classify → assert,
    /// fail-fast.
    pub fn validate_runtime(
        &self,
        scene: &str,
        profile: &str,
        log_file: Option<&str>,
        allow_warnings: bool,
        max_diagnostics: usize,
        policy: &RuntimePolicy,
    ) -> Envelope {
        let scene_path = self.resolve(scene);
        let project_root =
            resolve_project_root(&scene_path).unwrap_or_else(|| self.base_dir.clone());
        let log_path = log_file.map(|f| self.resolve(f));

        let mut steps: Vec<Step> = Vec::new();
        let mut fail_fast = false;

        let push = |steps: &mut Vec<Step>, name: &'static str, envelope: Envelope| -> bool {
            let stop = envelope.severity.is_fail();
            steps.push(Step { name, envelope });
            stop
        };

        'pipeline: {
            if push(
                &mut steps,
                "compile",
                unitytool_runtime::compile_check(&project_root),
            ) {
                fail_fast = true;
                break 'pipeline;
            }
            if push(
                &mut steps,
                "clientsim",
                unitytool_runtime::clientsim_check(&scene_path, profile),
            ) {
                fail_fast = true;
                break 'pipeline;
            }

            let collected =
                unitytool_runtime::collect_log_lines(log_path.as_deref(), &project_root, 4000);
            let log_lines: Vec<String> = collected.data["log_lines"]
                .as_array()
                .map(|lines| {
                    lines
                        .iter()
                        .filter_map(|v| v.as_str().map(str::to_string))
                        .collect()
                })
                .unwrap_or_default();
            if push(&mut steps, "collect_log", collected) {
                fail_fast = true;
                break 'pipeline;
            }

            let classification =
                unitytool_runtime::classify_errors(&log_lines, max_diagnostics, policy);
            let assertion =
                unitytool_runtime::assert_no_critical_errors(&classification, allow_warnings);
            if push(&mut steps, "classify_errors", classification) {
                fail_fast = true;
                // classification error implies the assertion fails too; record it.
            }
            push(&mut steps, "assert_no_critical_errors", assertion);
        }

        let severity = max_severity(steps.iter().map(|s| s.envelope.severity));
        let success = steps.iter().all(|s| s.envelope.success) && !severity.is_fail();
        let diagnostics: Vec<Diagnostic> = steps
            .iter()
            .flat_map(|s| s.envelope.diagnostics.iter().cloned())
            .collect();

        Envelope {
            success,
            severity,
            code: codes::VALIDATE_RUNTIME_RESULT.to_string(),
            message: if fail_fast {
                "validate.runtime stopped by fail-fast policy due to error severity.".to_string()
            } else {
                "validate.runtime pipeline completed (read-only).".to_string()
            },
            data: json!({
                "scene_path": scene,
                "profile": profile,
                "read_only": true,
                "fail_fast_triggered": fail_fast,
                "steps": steps_json(&steps),
            }),
            diagnostics,
        }
    }

    /// `suggest ignore-guids`: scan, then threshold missing-asset GUIDs into
    /// ignore candidates. Always a decision for the operator, never a write.
    pub fn suggest_ignore_guids(
        &self,
        scope: &str,
        min_occurrences: u64,
        max_items: usize,
        exclude: &[String],
        ignore_guids: std::collections::HashSet<String>,
    ) -> Envelope {
        let max_items = max_items.max(1);
        let min_occurrences = min_occurrences.max(1);

        let scope_path = self.resolve(scope);
        let Some(project_root) = resolve_project_root(&scope_path) else {
            return no_project_root_envelope(&scope_path);
        };
        let index = match build_index(&project_root, exclude) {
            Ok(index) => index,
            Err(envelope) => return *envelope,
        };

        let opts = ScanOptions {
            details: false,
            max_diagnostics: 0,
            exclude: exclude.to_vec(),
            ignore_guids,
            top_guid_limit: 100.max(max_items * 5),
        };
        let step = scan_broken_references(&scope_path, &project_root, &index, &opts, &self.cancel);

        let scan_usable = matches!(
            step.code.as_str(),
            codes::REF001 | codes::REF002 | codes::REF_SCAN_PARTIAL | codes::REF_SCAN_OK
        );
        if !scan_usable {
            let severity = step.severity;
            let diagnostics = step.diagnostics.clone();
            let steps = vec![Step {
                name: "scan_broken_references",
                envelope: step,
            }];
            return Envelope {
                success: false,
                severity,
                code: codes::SUGGEST_IGNORE_GUIDS_RESULT.to_string(),
                message: "suggest.ignore-guids failed before candidate analysis.".to_string(),
                data: json!({
                    "scope": scope,
                    "read_only": true,
                    "decision_required": true,
                    "steps": steps_json(&steps),
                }),
                diagnostics,
            };
        }

        let missing_occurrences = step.data["categories_occurrences"]["missing_asset"]
            .as_u64()
            .unwrap_or(0);
        let missing_unique = step.data["categories"]["missing_asset"].as_u64().unwrap_or(0);

        let mut candidates: Vec<serde_json::Value> = Vec::new();
        if let Some(top) = step.data["top_missing_asset_guids"].as_array() {
            for item in top {
                let occurrences = item["occurrences"].as_u64().unwrap_or(0);
                if occurrences < min_occurrences {
                    continue;
                }
                let share = if missing_occurrences > 0 {
                    occurrences as f64 / missing_occurrences as f64
                } else {
                    0.0
                };
                candidates.push(json!({
                    "guid": item["guid"],
                    "occurrences": occurrences,
                    "share_of_missing_asset_occurrences": (share * 1e6).round() / 1e6,
                }));
                if candidates.len() >= max_items {
                    break;
                }
            }
        }

        let (severity, message) = if candidates.is_empty() {
            (
                Severity::Warning,
                "No ignore candidate GUIDs matched the threshold.",
            )
        } else {
            (Severity::Info, "Ignore candidate GUID list was generated.")
        };

        let steps = vec![Step {
            name: "scan_broken_references",
            envelope: step,
        }];
        Envelope {
            success: true,
            severity,
            code: codes::SUGGEST_IGNORE_GUIDS_RESULT.to_string(),
            message: message.to_string(),
            data: json!({
                "scope": scope,
                "read_only": true,
                "decision_required": true,
                "criteria": {
                    "min_occurrences": min_occurrences,
                    "max_items": max_items,
                    "exclude_patterns": exclude,
                },
                "missing_asset_unique_count": missing_unique,
                "missing_asset_occurrences": missing_occurrences,
                "candidate_count": candidates.len(),
                "candidates": candidates,
                "steps": steps_json(&steps),
                "note": "Candidates are heuristic. Review each GUID before adding to an ignore policy.",
            }),
            diagnostics: vec![],
        }
    }
}
