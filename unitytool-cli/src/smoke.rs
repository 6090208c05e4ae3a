//! `validate bridge-smoke`: one end-to-end call through the configured patch
//! bridge, with expectation checks suitable for CI gates.

use anyhow::Context;
use camino::Utf8Path;
use clap::Parser;
use fs_err as fs;
use serde_json::json;
use std::process::ExitCode;
use unitytool_bridge::{BridgeClient, BridgeConfig};
use unitytool_patch::load_plan;
use unitytool_types::cancel::CancelToken;
use unitytool_types::codes;
use unitytool_types::envelope::{Envelope, Severity};
use unitytool_types::wire::BridgeRequestV1;

#[derive(Debug, Parser)]
pub struct BridgeSmokeArgs {
    /// Patch plan JSON path.
    #[arg(long)]
    plan: String,

    /// Expect the bridge result to be success=false (exit 0 when observed).
    #[arg(long, default_value_t = false)]
    expect_failure: bool,

    /// Expected response code value.
    #[arg(long)]
    expected_code: Option<String>,

    /// Expected data.applied value.
    #[arg(long)]
    expected_applied: Option<u64>,

    /// Infer the expected applied count from the plan's op count when
    /// --expected-applied is absent and failure is not expected.
    #[arg(long, default_value_t = false)]
    expect_applied_from_plan: bool,

    /// Output JSON path for the raw bridge response.
    #[arg(long)]
    out: Option<String>,
}

fn expected_applied(args: &BridgeSmokeArgs, op_count: usize) -> (Option<u64>, &'static str) {
    if let Some(n) = args.expected_applied {
        return (Some(n), "cli");
    }
    if args.expect_applied_from_plan && !args.expect_failure {
        return (Some(op_count as u64), "plan");
    }
    (None, "none")
}

pub fn run(base_dir: &Utf8Path, args: BridgeSmokeArgs) -> anyhow::Result<ExitCode> {
    let plan_path = unitytool_assets::resolve_scope_path(&args.plan, base_dir);
    let plan = load_plan(&plan_path)
        .map_err(|err| anyhow::anyhow!("load --plan {plan_path}: {err}"))?;
    let (expected_applied, expected_applied_source) = expected_applied(&args, plan.ops.len());

    let response = match BridgeClient::from_env() {
        BridgeConfig::Unconfigured => Envelope::error(
            codes::SER_UNSUPPORTED_TARGET,
            format!(
                "Bridge smoke requires {} to be configured.",
                unitytool_types::env::PATCH_BRIDGE
            ),
            json!({ "plan": plan_path.as_str() }),
        ),
        BridgeConfig::Invalid { message } => Envelope::error(
            codes::BRIDGE_CONFIG,
            "Bridge command configuration is invalid.",
            json!({ "plan": plan_path.as_str(), "error": message }),
        ),
        BridgeConfig::Configured(client) => {
            let request = BridgeRequestV1::from_plan(&plan);
            client.execute(&request, &CancelToken::new())
        }
    };

    if let Some(out) = &args.out {
        let out_path = unitytool_assets::resolve_scope_path(out, base_dir);
        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent).with_context(|| format!("create {parent}"))?;
        }
        let mut serialized = serde_json::to_string_pretty(&response)?;
        serialized.push('\n');
        fs::write(&out_path, serialized).context("write --out")?;
    }

    let mut mismatches: Vec<String> = Vec::new();
    let success_matches = if args.expect_failure {
        !response.success
    } else {
        response.success
    };
    if !success_matches {
        mismatches.push(format!(
            "success: expected {}, observed {}",
            !args.expect_failure,
            response.success
        ));
    }
    if let Some(expected_code) = &args.expected_code
        && expected_code != &response.code
    {
        mismatches.push(format!(
            "code: expected {expected_code}, observed {}",
            response.code
        ));
    }
    if let Some(expected) = expected_applied {
        let observed = response.data["applied"].as_u64();
        if observed != Some(expected) {
            mismatches.push(format!(
                "applied: expected {expected}, observed {observed:?}"
            ));
        }
    }

    let matched = mismatches.is_empty();
    let envelope = Envelope {
        success: matched,
        severity: if matched {
            Severity::Info
        } else {
            Severity::Error
        },
        code: codes::BRIDGE_SMOKE_RESULT.to_string(),
        message: if matched {
            "Bridge smoke expectations matched.".to_string()
        } else {
            "Bridge smoke expectations did not match.".to_string()
        },
        data: json!({
            "plan": plan_path.as_str(),
            "expectations": {
                "expect_failure": args.expect_failure,
                "expected_code": args.expected_code,
                "expected_applied": expected_applied,
                "expected_applied_source": expected_applied_source,
            },
            "mismatches": mismatches,
            "response": serde_json::to_value(&response)?,
        }),
        diagnostics: response.diagnostics.clone(),
    };

    println!("{}", serde_json::to_string_pretty(&envelope)?);
    Ok(if matched {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    })
}
