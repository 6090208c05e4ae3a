mod smoke;

use anyhow::Context;
use camino::{Utf8Path, Utf8PathBuf};
use clap::{Parser, Subcommand, ValueEnum};
use fs_err as fs;
use serde_json::json;
use std::collections::HashSet;
use std::process::ExitCode;
use tracing::error;
use tracing_subscriber::EnvFilter;
use unitytool_assets::{
    IgnoreWriteMode, ScanOptions, read_ignore_guid_file, resolve_scope_path,
    write_ignore_guid_file,
};
use unitytool_core::{ApplyRequest, Orchestrator};
use unitytool_patch::{
    build_attestation, compute_plan_sha256, compute_plan_signature, load_attestation, load_plan,
    normalize_expected_digest, resolve_signing_key, schema_error_envelope,
};
use unitytool_render::{MarkdownOptions, export_report, render_markdown_report};
use unitytool_types::cancel::CancelToken;
use unitytool_types::codes;
use unitytool_types::envelope::{Diagnostic, Envelope};

#[derive(Debug, Parser)]
#[command(
    name = "unitytool",
    version,
    about = "Auditable editing pipeline for engine asset trees."
)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Read-only inspection commands.
    Inspect(InspectArgs),
    /// Validation commands.
    Validate(ValidateArgs),
    /// Suggestion commands (always decision-required).
    Suggest(SuggestArgs),
    /// Patch-plan lifecycle commands.
    Patch(PatchArgs),
    /// Report conversion commands.
    Report(ReportArgs),
}

#[derive(Debug, Parser)]
struct InspectArgs {
    #[command(subcommand)]
    cmd: InspectCommand,
}

#[derive(Debug, Subcommand)]
enum InspectCommand {
    /// Inspect a prefab variant: Base chain, overrides, stale candidates.
    Variant(InspectVariantArgs),
    /// Find usages of an asset path or GUID.
    WhereUsed(WhereUsedArgs),
}

#[derive(Debug, Parser)]
struct InspectVariantArgs {
    /// Path to the target variant prefab.
    #[arg(long)]
    path: String,

    /// Optional component needle for override filtering.
    #[arg(long)]
    component_filter: Option<String>,

    #[arg(long, value_enum, default_value = "json")]
    format: ReportFormat,
}

#[derive(Debug, Parser)]
struct WhereUsedArgs {
    /// Target asset path or 32-char GUID.
    #[arg(long)]
    asset_or_guid: String,

    /// Optional scan scope path.
    #[arg(long)]
    scope: Option<String>,

    /// Glob pattern excluded from the scan (repeatable).
    #[arg(long)]
    exclude: Vec<String>,

    /// Maximum usage rows to include in output.
    #[arg(long, default_value_t = 500)]
    max_usages: usize,

    #[arg(long, value_enum, default_value = "json")]
    format: ReportFormat,
}

#[derive(Debug, Parser)]
struct ValidateArgs {
    #[command(subcommand)]
    cmd: ValidateCommand,
}

#[derive(Debug, Subcommand)]
enum ValidateCommand {
    /// Scan a scope for broken references.
    Refs(ValidateRefsArgs),
    /// Classify engine runtime logs for a scene.
    Runtime(ValidateRuntimeArgs),
    /// Run an end-to-end smoke call through the configured patch bridge.
    BridgeSmoke(smoke::BridgeSmokeArgs),
}

#[derive(Debug, Parser)]
struct ValidateRefsArgs {
    /// Asset scope path.
    #[arg(long)]
    scope: String,

    /// Include the diagnostics list in output (off by default for size).
    #[arg(long, default_value_t = false)]
    details: bool,

    /// Maximum diagnostics to include when --details is enabled.
    #[arg(long, default_value_t = 200)]
    max_diagnostics: usize,

    /// Glob pattern excluded from the scan (repeatable).
    #[arg(long)]
    exclude: Vec<String>,

    /// Missing-asset GUID to ignore (repeatable).
    #[arg(long)]
    ignore_guid: Vec<String>,

    /// UTF-8 text file with one GUID per line (# starts a comment).
    /// Defaults to <scope>/config/ignore_guids.txt when present.
    #[arg(long)]
    ignore_guid_file: Option<String>,

    #[arg(long, value_enum, default_value = "json")]
    format: ReportFormat,
}

#[derive(Debug, Parser)]
struct ValidateRuntimeArgs {
    /// Target scene path (.unity).
    #[arg(long)]
    scene: String,

    /// Runtime profile label.
    #[arg(long, default_value = "default")]
    profile: String,

    /// Engine log file path. Default: <project>/Logs/Editor.log.
    #[arg(long)]
    log_file: Option<String>,

    /// Treat warning-only runtime findings as pass.
    #[arg(long, default_value_t = false)]
    allow_warnings: bool,

    #[arg(long, default_value_t = 200)]
    max_diagnostics: usize,

    #[arg(long, value_enum, default_value = "json")]
    format: ReportFormat,
}

#[derive(Debug, Parser)]
struct SuggestArgs {
    #[command(subcommand)]
    cmd: SuggestCommand,
}

#[derive(Debug, Subcommand)]
enum SuggestCommand {
    /// Suggest missing-asset GUIDs as ignore candidates.
    IgnoreGuids(SuggestIgnoreArgs),
}

#[derive(Debug, Parser)]
struct SuggestIgnoreArgs {
    /// Asset scope path.
    #[arg(long)]
    scope: String,

    /// Minimum missing-asset occurrences for a candidate.
    #[arg(long, default_value_t = 50)]
    min_occurrences: u64,

    /// Maximum number of candidate GUIDs to return.
    #[arg(long, default_value_t = 20)]
    max_items: usize,

    /// Glob pattern excluded from the scan (repeatable).
    #[arg(long)]
    exclude: Vec<String>,

    /// GUID excluded from candidate suggestion (repeatable).
    #[arg(long)]
    ignore_guid: Vec<String>,

    /// GUID file excluded from candidate suggestion.
    /// Defaults to <scope>/config/ignore_guids.txt when present.
    #[arg(long)]
    ignore_guid_file: Option<String>,

    /// Output file for suggested GUIDs (one per line).
    #[arg(long)]
    out_ignore_guid_file: Option<String>,

    /// Write mode for --out-ignore-guid-file.
    #[arg(long, value_enum, default_value = "replace")]
    out_ignore_guid_mode: IgnoreMode,

    #[arg(long, value_enum, default_value = "json")]
    format: ReportFormat,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum IgnoreMode {
    Replace,
    Append,
}

impl From<IgnoreMode> for IgnoreWriteMode {
    fn from(mode: IgnoreMode) -> Self {
        match mode {
            IgnoreMode::Replace => IgnoreWriteMode::Replace,
            IgnoreMode::Append => IgnoreWriteMode::Append,
        }
    }
}

#[derive(Debug, Parser)]
struct PatchArgs {
    #[command(subcommand)]
    cmd: PatchCommand,
}

#[derive(Debug, Subcommand)]
enum PatchCommand {
    /// Validate and apply a patch plan (dry-run by default behavior gates).
    Apply(PatchApplyArgs),
    /// Compute the SHA-256 digest of a plan file.
    Hash(PatchHashArgs),
    /// Compute the HMAC-SHA256 signature of a plan file.
    Sign(PatchSignArgs),
    /// Emit a plan attestation (sha256 + optional signature).
    Attest(PatchAttestArgs),
    /// Verify digest/signature expectations against a plan file.
    Verify(PatchVerifyArgs),
}

#[derive(Debug, Parser)]
struct PatchApplyArgs {
    /// Input patch plan JSON path.
    #[arg(long)]
    plan: String,

    /// Validate the plan and emit the dry-run diff preview only.
    #[arg(long, default_value_t = false)]
    dry_run: bool,

    /// Allow the non-dry-run execution path.
    #[arg(long, default_value_t = false)]
    confirm: bool,

    /// Expected SHA-256 digest for --plan.
    #[arg(long)]
    plan_sha256: Option<String>,

    /// Expected HMAC-SHA256 signature for --plan.
    #[arg(long)]
    plan_signature: Option<String>,

    /// Attestation JSON with expected digest/signature.
    #[arg(long)]
    attestation_file: Option<String>,

    /// Env var name holding the HMAC signing key.
    #[arg(long, default_value = unitytool_types::env::PLAN_SIGNING_KEY)]
    plan_signing_key_env: String,

    /// UTF-8 key file (overrides the env var when set).
    #[arg(long)]
    plan_signing_key_file: Option<String>,

    /// Preflight reference-scan scope.
    #[arg(long)]
    scope: Option<String>,

    /// Glob pattern excluded from the preflight scan (repeatable).
    #[arg(long)]
    exclude: Vec<String>,

    /// Scene path for post-apply runtime classification.
    #[arg(long)]
    runtime_scene: Option<String>,

    #[arg(long, default_value = "default")]
    runtime_profile: String,

    /// Engine log file used by runtime classification.
    #[arg(long)]
    runtime_log_file: Option<String>,

    #[arg(long, default_value_t = false)]
    runtime_allow_warnings: bool,

    #[arg(long, default_value_t = 200)]
    runtime_max_diagnostics: usize,

    /// Output path for the result envelope JSON.
    #[arg(long)]
    out_report: Option<String>,

    /// Why the change is needed; required for confirmed applies unless the
    /// plan carries one.
    #[arg(long)]
    change_reason: Option<String>,

    #[arg(long, value_enum, default_value = "json")]
    format: ReportFormat,
}

#[derive(Debug, Parser)]
struct PatchHashArgs {
    /// Input patch plan JSON path.
    #[arg(long)]
    plan: String,

    #[arg(long, value_enum, default_value = "text")]
    format: TextFormat,
}

#[derive(Debug, Parser)]
struct PatchSignArgs {
    /// Input patch plan JSON path.
    #[arg(long)]
    plan: String,

    /// Env var name holding the HMAC signing key.
    #[arg(long, default_value = unitytool_types::env::PLAN_SIGNING_KEY)]
    key_env: String,

    /// UTF-8 key file (overrides --key-env when set).
    #[arg(long)]
    key_file: Option<String>,

    #[arg(long, value_enum, default_value = "text")]
    format: TextFormat,
}

#[derive(Debug, Parser)]
struct PatchAttestArgs {
    /// Input patch plan JSON path.
    #[arg(long)]
    plan: String,

    /// Emit the attestation without an HMAC signature.
    #[arg(long, default_value_t = false)]
    unsigned: bool,

    /// Env var name holding the HMAC signing key.
    #[arg(long, default_value = unitytool_types::env::PLAN_SIGNING_KEY)]
    key_env: String,

    /// UTF-8 key file (overrides --key-env when set).
    #[arg(long)]
    key_file: Option<String>,

    /// Output path for the attestation JSON file.
    #[arg(long)]
    out: Option<String>,

    #[arg(long, value_enum, default_value = "json")]
    format: TextFormat,
}

#[derive(Debug, Parser)]
struct PatchVerifyArgs {
    /// Input patch plan JSON path.
    #[arg(long)]
    plan: String,

    /// Attestation JSON with expected digest/signature.
    #[arg(long)]
    attestation_file: Option<String>,

    /// Expected SHA-256 digest.
    #[arg(long)]
    sha256: Option<String>,

    /// Expected HMAC-SHA256 signature.
    #[arg(long)]
    signature: Option<String>,

    /// Env var name holding the HMAC signing key.
    #[arg(long, default_value = unitytool_types::env::PLAN_SIGNING_KEY)]
    signing_key_env: String,

    /// UTF-8 key file (overrides --signing-key-env when set).
    #[arg(long)]
    signing_key_file: Option<String>,

    #[arg(long, value_enum, default_value = "json")]
    format: TextFormat,
}

#[derive(Debug, Parser)]
struct ReportArgs {
    #[command(subcommand)]
    cmd: ReportCommand,
}

#[derive(Debug, Subcommand)]
enum ReportCommand {
    /// Export a stored JSON report as json or markdown.
    Export(ReportExportArgs),
}

#[derive(Debug, Parser)]
struct ReportExportArgs {
    /// Input report JSON path.
    #[arg(long)]
    input: String,

    #[arg(long, value_enum)]
    format: ReportFormat,

    /// Output report path.
    #[arg(long)]
    out: String,

    /// Keep at most N usage rows per usages list (markdown only).
    #[arg(long)]
    md_max_usages: Option<usize>,

    /// Omit all usage rows (markdown only).
    #[arg(long, default_value_t = false)]
    md_omit_usages: bool,

    /// Keep at most N items per steps list (markdown only).
    #[arg(long)]
    md_max_steps: Option<usize>,

    /// Omit all steps arrays (markdown only).
    #[arg(long, default_value_t = false)]
    md_omit_steps: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ReportFormat {
    Json,
    Md,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum TextFormat {
    Json,
    Text,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    match real_main() {
        Ok(code) => code,
        Err(err) => {
            error!("{err:?}");
            ExitCode::from(1)
        }
    }
}

fn real_main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    let base_dir = current_dir_utf8()?;
    let orchestrator = Orchestrator::new(base_dir.clone(), CancelToken::new());

    match cli.cmd {
        Command::Inspect(args) => match args.cmd {
            InspectCommand::Variant(args) => {
                let envelope =
                    orchestrator.inspect_variant(&args.path, args.component_filter.as_deref());
                Ok(emit_envelope(&envelope, args.format))
            }
            InspectCommand::WhereUsed(args) => {
                let envelope = orchestrator.inspect_where_used(
                    &args.asset_or_guid,
                    args.scope.as_deref(),
                    &args.exclude,
                    args.max_usages,
                );
                Ok(emit_envelope(&envelope, args.format))
            }
        },
        Command::Validate(args) => match args.cmd {
            ValidateCommand::Refs(args) => cmd_validate_refs(&orchestrator, &base_dir, args),
            ValidateCommand::Runtime(args) => {
                let envelope = orchestrator.validate_runtime(
                    &args.scene,
                    &args.profile,
                    args.log_file.as_deref(),
                    args.allow_warnings,
                    args.max_diagnostics,
                    &default_runtime_policy(),
                );
                Ok(emit_envelope(&envelope, args.format))
            }
            ValidateCommand::BridgeSmoke(args) => smoke::run(&base_dir, args),
        },
        Command::Suggest(args) => match args.cmd {
            SuggestCommand::IgnoreGuids(args) => {
                cmd_suggest_ignore_guids(&orchestrator, &base_dir, args)
            }
        },
        Command::Patch(args) => match args.cmd {
            PatchCommand::Apply(args) => cmd_patch_apply(&orchestrator, args),
            PatchCommand::Hash(args) => cmd_patch_hash(args),
            PatchCommand::Sign(args) => cmd_patch_sign(args),
            PatchCommand::Attest(args) => cmd_patch_attest(args),
            PatchCommand::Verify(args) => cmd_patch_verify(args),
        },
        Command::Report(args) => match args.cmd {
            ReportCommand::Export(args) => cmd_report_export(args),
        },
    }
}

fn current_dir_utf8() -> anyhow::Result<Utf8PathBuf> {
    let cwd = std::env::current_dir().context("resolve current directory")?;
    Utf8PathBuf::from_path_buf(cwd)
        .map_err(|path| anyhow::anyhow!("current directory is not UTF-8: {}", path.display()))
}

fn emit_envelope(envelope: &Envelope, format: ReportFormat) -> ExitCode {
    match format {
        ReportFormat::Json => match serde_json::to_string_pretty(envelope) {
            Ok(serialized) => println!("{serialized}"),
            Err(err) => {
                error!("serialize envelope: {err}");
                return ExitCode::from(1);
            }
        },
        ReportFormat::Md => {
            let payload = serde_json::to_value(envelope).unwrap_or_default();
            println!(
                "{}",
                render_markdown_report(&payload, &MarkdownOptions::default())
            );
        }
    }
    if envelope.severity.is_fail() {
        ExitCode::from(1)
    } else {
        ExitCode::SUCCESS
    }
}

fn emit_text_or_json(envelope: &Envelope, format: TextFormat, text_line: &str) -> ExitCode {
    match format {
        TextFormat::Json => match serde_json::to_string_pretty(envelope) {
            Ok(serialized) => println!("{serialized}"),
            Err(err) => {
                error!("serialize envelope: {err}");
                return ExitCode::from(1);
            }
        },
        TextFormat::Text => println!("{text_line}"),
    }
    if envelope.severity.is_fail() {
        ExitCode::from(1)
    } else {
        ExitCode::SUCCESS
    }
}

/// Explicit file, or `<scope>/config/ignore_guids.txt` when it exists.
fn resolve_ignore_guid_file(
    explicit: Option<&str>,
    scope: &str,
    base_dir: &Utf8Path,
) -> Option<Utf8PathBuf> {
    if let Some(path) = explicit {
        return Some(resolve_scope_path(path, base_dir));
    }
    let scope_path = resolve_scope_path(scope, base_dir);
    let candidate = scope_path.join("config").join("ignore_guids.txt");
    candidate.exists().then_some(candidate)
}

fn collect_ignore_guids(
    flags: &[String],
    file: Option<&Utf8Path>,
) -> anyhow::Result<HashSet<String>> {
    let mut collected: Vec<String> = flags.iter().filter(|g| !g.is_empty()).cloned().collect();
    if let Some(path) = file {
        collected.extend(read_ignore_guid_file(path)?);
    }
    Ok(collected.into_iter().collect())
}

fn default_runtime_policy() -> unitytool_runtime::RuntimePolicy {
    unitytool_runtime::RuntimePolicy::default()
}

fn cmd_validate_refs(
    orchestrator: &Orchestrator,
    base_dir: &Utf8Path,
    args: ValidateRefsArgs,
) -> anyhow::Result<ExitCode> {
    let ignore_file =
        resolve_ignore_guid_file(args.ignore_guid_file.as_deref(), &args.scope, base_dir);
    let ignore_guids = collect_ignore_guids(&args.ignore_guid, ignore_file.as_deref())
        .context("read --ignore-guid-file")?;

    let opts = ScanOptions {
        details: args.details,
        max_diagnostics: args.max_diagnostics,
        exclude: args.exclude,
        ignore_guids,
        top_guid_limit: 10,
    };
    let envelope = orchestrator.validate_refs(&args.scope, &opts);
    Ok(emit_envelope(&envelope, args.format))
}

fn cmd_suggest_ignore_guids(
    orchestrator: &Orchestrator,
    base_dir: &Utf8Path,
    args: SuggestIgnoreArgs,
) -> anyhow::Result<ExitCode> {
    let ignore_file =
        resolve_ignore_guid_file(args.ignore_guid_file.as_deref(), &args.scope, base_dir);
    let ignore_guids = collect_ignore_guids(&args.ignore_guid, ignore_file.as_deref())
        .context("read --ignore-guid-file")?;

    let mut envelope = orchestrator.suggest_ignore_guids(
        &args.scope,
        args.min_occurrences,
        args.max_items,
        &args.exclude,
        ignore_guids,
    );

    if let Some(out_file) = &args.out_ignore_guid_file {
        let out_path = resolve_scope_path(out_file, base_dir);
        let candidates: Vec<String> = envelope.data["candidates"]
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(|c| c["guid"].as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        if candidates.is_empty() {
            envelope.data_insert(
                "ignore_file_update",
                json!({
                    "path": out_path.as_str(),
                    "mode": match args.out_ignore_guid_mode {
                        IgnoreMode::Replace => "replace",
                        IgnoreMode::Append => "append",
                    },
                    "added": 0,
                    "total": 0,
                    "written": false,
                    "reason": "no_candidates",
                }),
            );
        } else {
            let update =
                write_ignore_guid_file(&out_path, &candidates, args.out_ignore_guid_mode.into())
                    .context("write --out-ignore-guid-file")?;
            envelope.data_insert("ignore_file_update", serde_json::to_value(&update)?);
        }
    }

    Ok(emit_envelope(&envelope, args.format))
}

fn cmd_patch_apply(orchestrator: &Orchestrator, args: PatchApplyArgs) -> anyhow::Result<ExitCode> {
    let base_dir = orchestrator.base_dir().to_path_buf();
    let resolve = |raw: &str| resolve_scope_path(raw, &base_dir);

    let mut request = ApplyRequest::new(resolve(&args.plan));
    request.dry_run = args.dry_run;
    request.confirm = args.confirm;
    request.change_reason = args.change_reason;
    request.expected_sha256 = args.plan_sha256;
    request.expected_signature = args.plan_signature;
    request.attestation_file = args.attestation_file.as_deref().map(resolve);
    request.signing_key_env = args.plan_signing_key_env;
    request.signing_key_file = args.plan_signing_key_file.as_deref().map(resolve);
    request.scope = args.scope;
    request.exclude = args.exclude;
    request.runtime_scene = args.runtime_scene;
    request.runtime_profile = args.runtime_profile;
    request.runtime_log_file = args.runtime_log_file;
    request.runtime_allow_warnings = args.runtime_allow_warnings;
    request.runtime_max_diagnostics = args.runtime_max_diagnostics;

    let envelope = orchestrator.patch_apply(&request);

    if let Some(out_report) = &args.out_report {
        let report_path = resolve(out_report);
        if let Some(parent) = report_path.parent() {
            fs::create_dir_all(parent).with_context(|| format!("create {parent}"))?;
        }
        let mut serialized = serde_json::to_string_pretty(&envelope)?;
        serialized.push('\n');
        fs::write(&report_path, serialized).context("write --out-report")?;
    }

    Ok(emit_envelope(&envelope, args.format))
}

fn load_plan_or_envelope(plan_path: &Utf8Path) -> Result<(), Box<Envelope>> {
    match load_plan(plan_path) {
        Ok(_) => Ok(()),
        Err(err) => Err(Box::new(schema_error_envelope(
            plan_path.as_str(),
            0,
            vec![Diagnostic::new(
                plan_path.as_str(),
                "plan",
                "schema_error",
                err.to_string(),
            )],
        ))),
    }
}

fn cmd_patch_hash(args: PatchHashArgs) -> anyhow::Result<ExitCode> {
    let plan_path = resolve_scope_path(&args.plan, &current_dir_utf8()?);
    if let Err(envelope) = load_plan_or_envelope(&plan_path) {
        return Ok(emit_text_or_json(&envelope, args.format, "INVALID_PLAN"));
    }
    let digest = compute_plan_sha256(&plan_path)?;

    let envelope = Envelope::ok(
        codes::PATCH_PLAN_SHA256,
        "Patch plan digest calculated.",
        json!({ "plan": plan_path.as_str(), "sha256": digest }),
    );
    Ok(emit_text_or_json(&envelope, args.format, &digest))
}

fn cmd_patch_sign(args: PatchSignArgs) -> anyhow::Result<ExitCode> {
    let base_dir = current_dir_utf8()?;
    let plan_path = resolve_scope_path(&args.plan, &base_dir);
    if let Err(envelope) = load_plan_or_envelope(&plan_path) {
        return Ok(emit_text_or_json(&envelope, args.format, "INVALID_PLAN"));
    }
    let key_file = args
        .key_file
        .as_deref()
        .map(|p| resolve_scope_path(p, &base_dir));
    let key = resolve_signing_key(&args.key_env, key_file.as_deref())?;
    let signature = compute_plan_signature(&plan_path, &key)?;

    let envelope = Envelope::ok(
        codes::PATCH_PLAN_SIGNATURE,
        "Patch plan signature calculated.",
        json!({ "plan": plan_path.as_str(), "signature": signature }),
    );
    Ok(emit_text_or_json(&envelope, args.format, &signature))
}

fn cmd_patch_attest(args: PatchAttestArgs) -> anyhow::Result<ExitCode> {
    let base_dir = current_dir_utf8()?;
    let plan_path = resolve_scope_path(&args.plan, &base_dir);
    if let Err(envelope) = load_plan_or_envelope(&plan_path) {
        return Ok(emit_text_or_json(&envelope, args.format, "INVALID_PLAN"));
    }

    let key = if args.unsigned {
        None
    } else {
        let key_file = args
            .key_file
            .as_deref()
            .map(|p| resolve_scope_path(p, &base_dir));
        Some(resolve_signing_key(&args.key_env, key_file.as_deref())?)
    };
    let attestation = build_attestation(&plan_path, key.as_deref())?;

    let mut data = serde_json::to_value(&attestation)?;
    if let Some(out) = &args.out {
        let out_path = resolve_scope_path(out, &base_dir);
        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent).with_context(|| format!("create {parent}"))?;
        }
        let mut serialized = serde_json::to_string_pretty(&attestation)?;
        serialized.push('\n');
        fs::write(&out_path, serialized).context("write --out")?;
        if let Some(map) = data.as_object_mut() {
            map.insert("attestation_path".to_string(), json!(out_path.as_str()));
        }
    }

    let text_line = match &attestation.signature {
        Some(signature) => format!("sha256={}\nsignature={}", attestation.sha256, signature),
        None => format!("sha256={}", attestation.sha256),
    };
    let envelope = Envelope::ok(
        codes::PATCH_PLAN_ATTESTATION,
        "Patch plan attestation generated.",
        data,
    );
    Ok(emit_text_or_json(&envelope, args.format, &text_line))
}

fn cmd_patch_verify(args: PatchVerifyArgs) -> anyhow::Result<ExitCode> {
    let base_dir = current_dir_utf8()?;
    let plan_path = resolve_scope_path(&args.plan, &base_dir);
    if let Err(envelope) = load_plan_or_envelope(&plan_path) {
        return Ok(emit_text_or_json(&envelope, args.format, "INVALID_PLAN"));
    }

    let (attested_sha256, attested_signature) = match &args.attestation_file {
        Some(path) => load_attestation(&resolve_scope_path(path, &base_dir))
            .context("load --attestation-file")?,
        None => (None, None),
    };

    let sha_from_cli = args.sha256.is_some();
    let signature_from_cli = args.signature.is_some();
    let sha_input = args.sha256.or(attested_sha256);
    let signature_input = args.signature.or(attested_signature);
    anyhow::ensure!(
        sha_input.is_some() || signature_input.is_some(),
        "patch verify requires at least one expected value: --sha256 / --signature / --attestation-file"
    );

    let actual_sha256 = compute_plan_sha256(&plan_path)?;
    let mut mismatch_code: Option<&'static str> = None;

    let sha_expected = match &sha_input {
        Some(raw) => Some(normalize_expected_digest(raw).context("--sha256 must be 64 hex chars")?),
        None => None,
    };
    let sha_matched = sha_expected.as_deref().map(|expected| {
        let matched = expected == actual_sha256;
        if !matched {
            mismatch_code.get_or_insert(if sha_from_cli {
                codes::PLAN_DIGEST_MISMATCH
            } else {
                codes::PLAN_ATTESTATION_MISMATCH
            });
        }
        matched
    });

    let mut signature_actual = None;
    let signature_expected = match &signature_input {
        Some(raw) => {
            Some(normalize_expected_digest(raw).context("--signature must be 64 hex chars")?)
        }
        None => None,
    };
    let signature_matched = match signature_expected.as_deref() {
        Some(expected) => {
            let key_file = args
                .signing_key_file
                .as_deref()
                .map(|p| resolve_scope_path(p, &base_dir));
            let key = resolve_signing_key(&args.signing_key_env, key_file.as_deref())?;
            let actual = compute_plan_signature(&plan_path, &key)?;
            let matched = expected == actual;
            if !matched {
                mismatch_code.get_or_insert(if signature_from_cli {
                    codes::PLAN_SIGNATURE_MISMATCH
                } else {
                    codes::PLAN_ATTESTATION_MISMATCH
                });
            }
            signature_actual = Some(actual);
            Some(matched)
        }
        None => None,
    };

    let success = mismatch_code.is_none();
    let data = json!({
        "plan": plan_path.as_str(),
        "attestation_file": args.attestation_file,
        "sha256": {
            "checked": sha_expected.is_some(),
            "expected": sha_expected,
            "actual": actual_sha256,
            "matched": sha_matched,
        },
        "signature": {
            "checked": signature_expected.is_some(),
            "expected": signature_expected,
            "actual": signature_actual,
            "matched": signature_matched,
        },
    });

    let envelope = if success {
        Envelope::ok(
            codes::PATCH_PLAN_VERIFY_OK,
            "Patch plan verification succeeded.",
            data,
        )
    } else {
        Envelope::error(
            mismatch_code.unwrap_or(codes::PLAN_DIGEST_MISMATCH),
            "Patch plan verification failed.",
            data,
        )
    };
    Ok(emit_text_or_json(
        &envelope,
        args.format,
        if success { "OK" } else { "MISMATCH" },
    ))
}

fn cmd_report_export(args: ReportExportArgs) -> anyhow::Result<ExitCode> {
    let base_dir = current_dir_utf8()?;
    let input_path = resolve_scope_path(&args.input, &base_dir);
    let payload: serde_json::Value = serde_json::from_str(
        &fs::read_to_string(&input_path).with_context(|| format!("read {input_path}"))?,
    )
    .context("parse --input")?;

    let opts = MarkdownOptions {
        max_usages: if args.md_omit_usages {
            Some(0)
        } else {
            args.md_max_usages
        },
        max_steps: if args.md_omit_steps {
            Some(0)
        } else {
            args.md_max_steps
        },
    };
    let format = match args.format {
        ReportFormat::Json => "json",
        ReportFormat::Md => "md",
    };
    let out_path = resolve_scope_path(&args.out, &base_dir);
    let written = export_report(&payload, &out_path, format, &opts)?;
    println!("Exported report: {written}");
    Ok(ExitCode::SUCCESS)
}
