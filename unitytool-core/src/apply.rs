use crate::orchestrator::{Orchestrator, Step, build_index, no_project_root_envelope, steps_json};
use camino::{Utf8Path, Utf8PathBuf};
use serde_json::json;
use tracing::{debug, info};
use unitytool_assets::{ScanOptions, detect_stale_overrides, resolve_project_root,
    scan_broken_references};
use unitytool_bridge::{BridgeClient, BridgeConfig};
use unitytool_patch::{
    apply_json_target, compute_plan_sha256, compute_plan_signature, load_attestation, load_plan,
    normalize_expected_digest, preview_diff, resolve_signing_key, schema_error_envelope,
};
use unitytool_runtime::RuntimePolicy;
use unitytool_types::codes;
use unitytool_types::envelope::{Diagnostic, Envelope};
use unitytool_types::plan::PatchPlan;
use unitytool_types::wire::BridgeRequestV1;

/// Extensions dispatched to the engine bridge.
const BRIDGE_SUFFIXES: &[&str] = &["prefab", "unity", "asset", "mat", "anim", "controller"];

/// Everything `patch apply` needs; all inputs are explicit.
#[derive(Debug, Clone)]
pub struct ApplyRequest {
    pub plan_path: Utf8PathBuf,
    pub dry_run: bool,
    pub confirm: bool,
    pub change_reason: Option<String>,
    /// Expected digest supplied on the command line.
    pub expected_sha256: Option<String>,
    /// Expected signature supplied on the command line.
    pub expected_signature: Option<String>,
    pub attestation_file: Option<Utf8PathBuf>,
    pub signing_key_env: String,
    pub signing_key_file: Option<Utf8PathBuf>,
    /// Preflight reference-scan scope.
    pub scope: Option<String>,
    pub exclude: Vec<String>,
    pub runtime_scene: Option<String>,
    pub runtime_profile: String,
    pub runtime_log_file: Option<String>,
    pub runtime_allow_warnings: bool,
    pub runtime_max_diagnostics: usize,
}

impl ApplyRequest {
    pub fn new(plan_path: Utf8PathBuf) -> Self {
        Self {
            plan_path,
            dry_run: false,
            confirm: false,
            change_reason: None,
            expected_sha256: None,
            expected_signature: None,
            attestation_file: None,
            signing_key_env: unitytool_types::env::PLAN_SIGNING_KEY.to_string(),
            signing_key_file: None,
            scope: None,
            exclude: vec![],
            runtime_scene: None,
            runtime_profile: "default".to_string(),
            runtime_log_file: None,
            runtime_allow_warnings: false,
            runtime_max_diagnostics: 200,
        }
    }
}

/// Where a crypto expectation came from decides its mismatch code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExpectationSource {
    Cli,
    Attestation,
}

fn mismatch_code(source: ExpectationSource, cli_code: &'static str) -> &'static str {
    match source {
        ExpectationSource::Cli => cli_code,
        ExpectationSource::Attestation => codes::PLAN_ATTESTATION_MISMATCH,
    }
}

/// Attach the executed-steps history and plan metadata to the envelope the
/// pipeline settles on.
fn finalize(mut envelope: Envelope, steps: &[Step], plan_sha256: &str) -> Envelope {
    envelope.data_insert("steps", steps_json(steps));
    envelope.data_insert("plan_sha256", json!(plan_sha256));
    envelope
}

impl Orchestrator {
    /// The gated apply pipeline:
    /// load → verify crypto → preflight refs → preflight overrides → dry-run
    /// → confirm gate → backend dispatch → post-apply runtime classification.
    ///
    /// Nothing is persisted before the dispatch stage; every earlier failure
    /// leaves the asset tree untouched.
    pub fn patch_apply(&self, request: &ApplyRequest) -> Envelope {
        let mut steps: Vec<Step> = Vec::new();

        // Stage 1: load and schema-validate.
        let plan = match load_plan(&request.plan_path) {
            Ok(plan) => plan,
            Err(err) => {
                return schema_error_envelope(request.plan_path.as_str(), 0, vec![Diagnostic::new(
                    request.plan_path.as_str(),
                    "plan",
                    "schema_error",
                    err.to_string(),
                )]);
            }
        };
        let violations = plan.validate();
        if !violations.is_empty() {
            return schema_error_envelope(&plan.target, plan.ops.len(), violations);
        }
        steps.push(Step {
            name: "load_plan",
            envelope: Envelope::ok(
                codes::SER_PLAN_LOADED,
                "Plan loaded and schema-validated.",
                json!({
                    "plan": request.plan_path.as_str(),
                    "target": plan.target,
                    "op_count": plan.ops.len(),
                    "read_only": true,
                }),
            ),
        });

        // Stage 2: crypto expectations.
        let plan_sha256 = match compute_plan_sha256(&request.plan_path) {
            Ok(digest) => digest,
            Err(err) => {
                return Envelope::error(
                    codes::SER_IO_ERROR,
                    "Plan file could not be hashed.",
                    json!({ "plan": request.plan_path.as_str(), "error": err.to_string() }),
                );
            }
        };
        if let Some(envelope) = self.verify_crypto(request, &plan_sha256, &mut steps) {
            return finalize(envelope, &steps, &plan_sha256);
        }

        // Stage 3: preflight references.
        if let Some(scope) = &request.scope {
            let envelope = self.preflight_refs(scope, &request.exclude);
            let stop = envelope.severity.is_fail();
            steps.push(Step {
                name: "preflight_refs",
                envelope: envelope.clone(),
            });
            if stop {
                return finalize(envelope, &steps, &plan_sha256);
            }
        }
        if self.cancel.is_cancelled() {
            return finalize(
                Envelope::error(codes::OP_CANCELLED, "patch apply was cancelled.", json!({})),
                &steps,
                &plan_sha256,
            );
        }

        // Stage 4: preflight overrides for prefab targets.
        let target = self.resolve(&plan.target);
        if plan.target_extension().as_deref() == Some("prefab") && target.exists() {
            let inspector_root =
                resolve_project_root(&target).unwrap_or_else(|| self.base_dir().to_path_buf());
            let envelope = detect_stale_overrides(&target, &inspector_root);
            let stop = envelope.severity.is_fail();
            steps.push(Step {
                name: "preflight_overrides",
                envelope: envelope.clone(),
            });
            if stop {
                return finalize(envelope, &steps, &plan_sha256);
            }
        }

        // Stage 5: dry-run diff. Always runs.
        let dry_run_envelope = self.dry_run(&plan, &target);
        steps.push(Step {
            name: "dry_run",
            envelope: dry_run_envelope.clone(),
        });
        if dry_run_envelope.severity.is_fail() || request.dry_run {
            return finalize(dry_run_envelope, &steps, &plan_sha256);
        }

        // Stage 6: confirm gate.
        if !request.confirm {
            let envelope = Envelope::error(
                codes::APPLY_CONFIRM_REQUIRED,
                "Non-dry-run apply requires --confirm.",
                json!({ "target": plan.target, "op_count": plan.ops.len() }),
            );
            return finalize(envelope, &steps, &plan_sha256);
        }
        let change_reason = request
            .change_reason
            .clone()
            .or_else(|| plan.change_reason.clone());
        let Some(change_reason) = change_reason.filter(|r| !r.trim().is_empty()) else {
            let envelope = Envelope::error(
                codes::APPLY_CONFIRM_REQUIRED,
                "Confirmed apply requires a change reason (plan field or --change-reason).",
                json!({ "target": plan.target, "op_count": plan.ops.len() }),
            );
            return finalize(envelope, &steps, &plan_sha256);
        };

        // Stage 7: backend dispatch.
        let mut applied = self.dispatch(&plan, &target);
        applied.data_insert("change_reason", json!(change_reason));
        steps.push(Step {
            name: "apply",
            envelope: applied.clone(),
        });
        if applied.severity.is_fail() {
            return finalize(applied, &steps, &plan_sha256);
        }
        info!(target = %plan.target, "patch apply persisted");

        // Stage 8: post-apply runtime classification.
        if let Some(scene) = &request.runtime_scene {
            let runtime = self.validate_runtime(
                scene,
                &request.runtime_profile,
                request.runtime_log_file.as_deref(),
                request.runtime_allow_warnings,
                request.runtime_max_diagnostics,
                &RuntimePolicy::default(),
            );
            let stop = runtime.severity.is_fail();
            steps.push(Step {
                name: "post_apply_runtime",
                envelope: runtime.clone(),
            });
            if stop {
                return finalize(runtime, &steps, &plan_sha256);
            }
        }

        // Stage 9: wrap the settled apply envelope in the verb result code;
        // the backend's own code stays visible in the steps history.
        let mut result = applied;
        result.code = codes::PATCH_APPLY_RESULT.to_string();
        result.message = "patch.apply pipeline completed.".to_string();
        finalize(result, &steps, &plan_sha256)
    }

    /// Stage 2 helper: verify digest/signature expectations. `None` means all
    /// supplied expectations held.
    fn verify_crypto(
        &self,
        request: &ApplyRequest,
        plan_sha256: &str,
        steps: &mut Vec<Step>,
    ) -> Option<Envelope> {
        let mut attested_sha256 = None;
        let mut attested_signature = None;
        if let Some(attestation_path) = &request.attestation_file {
            match load_attestation(attestation_path) {
                Ok((sha, signature)) => {
                    attested_sha256 = sha;
                    attested_signature = signature;
                }
                Err(err) => {
                    return Some(Envelope::error(
                        codes::PLAN_ATTESTATION_MISMATCH,
                        "Attestation file could not be loaded.",
                        json!({
                            "attestation_file": attestation_path.as_str(),
                            "error": err.to_string(),
                        }),
                    ));
                }
            }
        }

        // CLI-supplied expectations override attestation-file ones.
        let sha_expectation = request
            .expected_sha256
            .as_deref()
            .map(|v| (v, ExpectationSource::Cli))
            .or(attested_sha256
                .as_deref()
                .map(|v| (v, ExpectationSource::Attestation)));
        let signature_expectation = request
            .expected_signature
            .as_deref()
            .map(|v| (v, ExpectationSource::Cli))
            .or(attested_signature
                .as_deref()
                .map(|v| (v, ExpectationSource::Attestation)));

        if sha_expectation.is_none() && signature_expectation.is_none() {
            return None;
        }

        if let Some((raw, source)) = sha_expectation {
            let code = mismatch_code(source, codes::PLAN_DIGEST_MISMATCH);
            let Some(expected) = normalize_expected_digest(raw) else {
                return Some(Envelope::error(
                    code,
                    "Expected plan digest must be a 64-character hexadecimal string.",
                    json!({ "expected": raw }),
                ));
            };
            if expected != plan_sha256 {
                return Some(Envelope::error(
                    code,
                    "Plan digest mismatch.",
                    json!({ "expected": expected, "actual": plan_sha256 }),
                ));
            }
        }

        if let Some((raw, source)) = signature_expectation {
            let code = mismatch_code(source, codes::PLAN_SIGNATURE_MISMATCH);
            let Some(expected) = normalize_expected_digest(raw) else {
                return Some(Envelope::error(
                    code,
                    "Expected plan signature must be a 64-character hexadecimal string.",
                    json!({ "expected": raw }),
                ));
            };
            let key = match resolve_signing_key(
                &request.signing_key_env,
                request.signing_key_file.as_deref(),
            ) {
                Ok(key) => key,
                Err(err) => {
                    return Some(Envelope::error(
                        code,
                        "Plan signature could not be verified: signing key unavailable.",
                        json!({ "error": err.to_string() }),
                    ));
                }
            };
            let actual = match compute_plan_signature(&request.plan_path, &key) {
                Ok(signature) => signature,
                Err(err) => {
                    return Some(Envelope::error(
                        code,
                        "Plan signature could not be computed.",
                        json!({ "error": err.to_string() }),
                    ));
                }
            };
            if expected != actual {
                return Some(Envelope::error(
                    code,
                    "Plan signature mismatch.",
                    json!({ "expected": expected, "actual": actual }),
                ));
            }
        }

        steps.push(Step {
            name: "verify_crypto",
            envelope: Envelope::ok(
                codes::PATCH_PLAN_VERIFY_OK,
                "Plan crypto expectations verified.",
                json!({
                    "plan": request.plan_path.as_str(),
                    "sha256_checked": sha_expectation.is_some(),
                    "signature_checked": signature_expectation.is_some(),
                }),
            ),
        });
        None
    }

    fn preflight_refs(&self, scope: &str, exclude: &[String]) -> Envelope {
        let scope_path = self.resolve(scope);
        let Some(project_root) = resolve_project_root(&scope_path) else {
            return no_project_root_envelope(&scope_path);
        };
        let index = match build_index(&project_root, exclude) {
            Ok(index) => index,
            Err(envelope) => return *envelope,
        };
        let opts = ScanOptions {
            exclude: exclude.to_vec(),
            ..ScanOptions::default()
        };
        scan_broken_references(&scope_path, &project_root, &index, &opts, &self.cancel)
    }

    fn dry_run(&self, plan: &PatchPlan, target: &Utf8Path) -> Envelope {
        if plan.target_extension().as_deref() == Some("json") {
            return apply_json_target(target, &plan.ops, true);
        }
        // Engine targets cannot be parsed here (no arbitrary YAML rewriting);
        // the preview carries op intent with unknown before-values.
        let diff = preview_diff(&plan.ops);
        Envelope::ok(
            codes::SER_DRY_RUN_OK,
            "Dry-run generated a patch preview.",
            json!({
                "target": target.as_str(),
                "op_count": plan.ops.len(),
                "applied": 0,
                "diff": diff,
                "read_only": true,
            }),
        )
    }

    fn dispatch(&self, plan: &PatchPlan, target: &Utf8Path) -> Envelope {
        let extension = plan.target_extension().unwrap_or_default();
        debug!(target = %target, extension = %extension, "dispatching apply backend");

        if extension == "json" {
            return apply_json_target(target, &plan.ops, false);
        }

        if BRIDGE_SUFFIXES.contains(&extension.as_str()) {
            return match BridgeClient::from_env() {
                BridgeConfig::Unconfigured => Envelope::error(
                    codes::SER_UNSUPPORTED_TARGET,
                    format!(
                        "Engine target requires {} for bridge execution.",
                        unitytool_types::env::PATCH_BRIDGE
                    ),
                    json!({
                        "target": target.as_str(),
                        "op_count": plan.ops.len(),
                        "applied": 0,
                        "executed": false,
                    }),
                ),
                BridgeConfig::Invalid { message } => Envelope::error(
                    codes::BRIDGE_CONFIG,
                    "Bridge command configuration is invalid.",
                    json!({ "target": target.as_str(), "error": message }),
                ),
                BridgeConfig::Configured(client) => {
                    let request = BridgeRequestV1::from_plan(plan);
                    client.execute(&request, &self.cancel)
                }
            };
        }

        Envelope::error(
            codes::SER_UNSUPPORTED_TARGET,
            "Apply backend supports .json or engine bridge targets only.",
            json!({
                "target": target.as_str(),
                "op_count": plan.ops.len(),
                "applied": 0,
                "executed": false,
            }),
        )
    }
}
