//! Runtime-log classification against a closed error taxonomy.
//!
//! Each log line is matched against an ordered pattern list; the first hit
//! wins. Category severities are fixed by policy, with a hook to downgrade
//! selected categories to warnings for scenes where a finding is expected.

use camino::{Utf8Path, Utf8PathBuf};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::json;
use std::collections::{BTreeMap, HashSet};
use unitytool_types::codes;
use unitytool_types::envelope::{Diagnostic, Envelope, Severity, max_severity};

/// Closed taxonomy of runtime log findings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogCategory {
    BrokenPptr,
    UdonNullref,
    VariantOverrideMismatch,
    DuplicateEventsystem,
    MissingComponent,
}

impl LogCategory {
    pub fn name(self) -> &'static str {
        match self {
            LogCategory::BrokenPptr => "BROKEN_PPTR",
            LogCategory::UdonNullref => "UDON_NULLREF",
            LogCategory::VariantOverrideMismatch => "VARIANT_OVERRIDE_MISMATCH",
            LogCategory::DuplicateEventsystem => "DUPLICATE_EVENTSYSTEM",
            LogCategory::MissingComponent => "MISSING_COMPONENT",
        }
    }

    /// Default severity: dangling object pointers and Udon null derefs break
    /// worlds outright; override/component problems are recoverable errors;
    /// a duplicated EventSystem is only noise.
    pub fn default_severity(self) -> Severity {
        match self {
            LogCategory::BrokenPptr | LogCategory::UdonNullref => Severity::Critical,
            LogCategory::VariantOverrideMismatch | LogCategory::MissingComponent => Severity::Error,
            LogCategory::DuplicateEventsystem => Severity::Warning,
        }
    }
}

/// Ordered pattern table; earlier entries take precedence per line.
static LOG_PATTERNS: Lazy<Vec<(LogCategory, Regex)>> = Lazy::new(|| {
    vec![
        (
            LogCategory::BrokenPptr,
            Regex::new(r"(?i)broken\s+pptr").expect("pattern"),
        ),
        (
            LogCategory::UdonNullref,
            Regex::new(r"(?i)(nullreferenceexception.*udon)|(udon.*nullreferenceexception)")
                .expect("pattern"),
        ),
        (
            LogCategory::VariantOverrideMismatch,
            Regex::new(r"(?i)override.*mismatch|mismatch.*override").expect("pattern"),
        ),
        (
            LogCategory::DuplicateEventsystem,
            Regex::new(r"(?i)there can be only one active eventsystem").expect("pattern"),
        ),
        (
            LogCategory::MissingComponent,
            Regex::new(r"(?i)missingcomponentexception|referenced script on this behaviour is missing")
                .expect("pattern"),
        ),
    ]
});

/// Severity policy hook: listed category names are downgraded to warning.
#[derive(Debug, Clone, Default)]
pub struct RuntimePolicy {
    pub downgraded_categories: HashSet<String>,
}

impl RuntimePolicy {
    pub fn severity_for(&self, category: LogCategory) -> Severity {
        if self.downgraded_categories.contains(category.name()) {
            Severity::Warning
        } else {
            category.default_severity()
        }
    }
}

/// Read log lines, keeping at most the trailing `max_lines`.
///
/// A missing log file is a warning, not a failure: classification then runs
/// over an empty line set.
pub fn collect_log_lines(
    log_file: Option<&Utf8Path>,
    project_root: &Utf8Path,
    max_lines: usize,
) -> Envelope {
    let log_path: Utf8PathBuf = match log_file {
        Some(path) => path.to_path_buf(),
        None => project_root.join("Logs").join("Editor.log"),
    };

    if !log_path.exists() {
        return Envelope::warning(
            codes::RUN_LOG_MISSING,
            "Log file was not found; classification uses empty log lines.",
            json!({
                "log_path": log_path.as_str(),
                "line_count": 0,
                "log_lines": [],
                "read_only": true,
            }),
        );
    }

    let text = match fs_err::read(&log_path) {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(err) => {
            return Envelope::error(
                codes::RUN002,
                "Log file could not be read.",
                json!({ "log_path": log_path.as_str(), "error": err.to_string() }),
            );
        }
    };
    let mut lines: Vec<&str> = text.lines().collect();
    if max_lines > 0 && lines.len() > max_lines {
        lines = lines.split_off(lines.len() - max_lines);
    }

    Envelope::ok(
        codes::RUN_LOG_COLLECTED,
        "Log lines collected.",
        json!({
            "log_path": log_path.as_str(),
            "line_count": lines.len(),
            "log_lines": lines,
            "read_only": true,
        }),
    )
}

/// Map log lines into the closed taxonomy.
pub fn classify_errors(
    log_lines: &[String],
    max_diagnostics: usize,
    policy: &RuntimePolicy,
) -> Envelope {
    let mut diagnostics: Vec<Diagnostic> = Vec::new();
    let mut counts: BTreeMap<&'static str, u64> = BTreeMap::new();
    let mut severities: Vec<Severity> = Vec::new();
    let mut total_hits = 0u64;

    for (index, line) in log_lines.iter().enumerate() {
        for (category, pattern) in LOG_PATTERNS.iter() {
            if !pattern.is_match(line) {
                continue;
            }
            *counts.entry(category.name()).or_default() += 1;
            severities.push(policy.severity_for(*category));
            total_hits += 1;
            if diagnostics.len() < max_diagnostics {
                diagnostics.push(Diagnostic::new(
                    "",
                    format!("line {}", index + 1),
                    category.name().to_ascii_lowercase(),
                    line.trim(),
                ));
            }
            break;
        }
    }

    let severity = max_severity(severities.iter().copied());
    let (success, code, message) = if total_hits == 0 {
        (
            true,
            codes::RUN_CLASSIFY_OK,
            "No runtime issues matched known error categories.",
        )
    } else if severity.is_fail() {
        (
            false,
            codes::RUN001,
            "Runtime issues matched error or critical categories.",
        )
    } else {
        (
            true,
            codes::RUN_CLASSIFY_WARN,
            "Runtime issues matched warning categories.",
        )
    };

    let by_severity = |level: Severity| -> u64 {
        LOG_PATTERNS
            .iter()
            .filter(|(category, _)| policy.severity_for(*category) == level)
            .map(|(category, _)| counts.get(category.name()).copied().unwrap_or(0))
            .sum()
    };

    Envelope {
        success,
        severity,
        code: code.to_string(),
        message: message.to_string(),
        data: json!({
            "line_count": log_lines.len(),
            "matched_issue_count": total_hits,
            "returned_diagnostics": diagnostics.len(),
            "truncated_diagnostics": total_hits.saturating_sub(diagnostics.len() as u64),
            "categories": counts,
            "categories_by_severity": {
                "critical": by_severity(Severity::Critical),
                "error": by_severity(Severity::Error),
                "warning": by_severity(Severity::Warning),
            },
            "read_only": true,
        }),
        diagnostics,
    }
}

/// Fail if the classification counted any critical or error category.
pub fn assert_no_critical_errors(classification: &Envelope, allow_warnings: bool) -> Envelope {
    let by_severity = &classification.data["categories_by_severity"];
    let critical_count = by_severity["critical"].as_u64().unwrap_or(0);
    let error_count = by_severity["error"].as_u64().unwrap_or(0);
    let warning_count = by_severity["warning"].as_u64().unwrap_or(0);

    let data = json!({
        "critical_count": critical_count,
        "error_count": error_count,
        "warning_count": warning_count,
        "allow_warnings": allow_warnings,
        "read_only": true,
    });

    if critical_count > 0 || error_count > 0 {
        let mut envelope = Envelope::error(
            codes::RUN001,
            "Runtime assertion failed due to critical/error issues.",
            data,
        );
        if critical_count > 0 {
            envelope.severity = Severity::Critical;
        }
        return envelope;
    }

    if warning_count > 0 && !allow_warnings {
        return Envelope {
            success: false,
            severity: Severity::Warning,
            code: codes::RUN_WARNINGS.to_string(),
            message: "Runtime assertion failed because warnings are not allowed.".to_string(),
            data,
            diagnostics: vec![],
        };
    }

    Envelope::ok(codes::RUN_ASSERT_OK, "Runtime assertion passed.", data)
}

/// Scaffold step: engine batchmode compilation is not wired into the core.
pub fn compile_check(project_root: &Utf8Path) -> Envelope {
    if !project_root.join("Assets").exists() {
        return Envelope::warning(
            codes::RUN_COMPILE_SKIPPED,
            "Compile step skipped because project root does not contain Assets.",
            json!({ "project_root": project_root.as_str(), "read_only": true, "executed": false }),
        );
    }
    Envelope::ok(
        codes::RUN_COMPILE_SKIPPED,
        "Compile step is scaffolded only; engine batchmode compile is not wired.",
        json!({ "project_root": project_root.as_str(), "read_only": true, "executed": false }),
    )
}

/// Scaffold step: simulated-client execution is not wired into the core.
pub fn clientsim_check(scene: &Utf8Path, profile: &str) -> Envelope {
    if !scene.exists() {
        return Envelope::error(
            codes::RUN002,
            "Scene path was not found for runtime validation.",
            json!({ "scene_path": scene.as_str(), "profile": profile, "read_only": true, "executed": false }),
        );
    }
    if !scene
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("unity"))
    {
        return Envelope::error(
            codes::RUN002,
            "Runtime validation requires a .unity scene path.",
            json!({ "scene_path": scene.as_str(), "profile": profile, "read_only": true, "executed": false }),
        );
    }
    Envelope::ok(
        codes::RUN_CLIENTSIM_SKIPPED,
        "ClientSim step is scaffolded only; simulated execution is not wired.",
        json!({ "scene_path": scene.as_str(), "profile": profile, "read_only": true, "executed": false }),
    )
}
