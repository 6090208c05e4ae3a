//! Client for the external engine bridge.
//!
//! The bridge is an allowlisted command configured via `UNITYTOOL_PATCH_BRIDGE`.
//! The client writes a v1 request JSON file, launches the command with two
//! path arguments (request, response), enforces a per-call deadline, and
//! strictly validates the response envelope. Engine-side edits go through the
//! engine's own atomic prefab save; the client never parses engine YAML.

use camino::{Utf8Path, Utf8PathBuf};
use fs_err as fs;
use serde_json::json;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use unitytool_types::cancel::CancelToken;
use unitytool_types::codes;
use unitytool_types::envelope::Envelope;
use unitytool_types::wire::{BridgeRequestV1, WireError, parse_bridge_response};

/// Command basenames the bridge is allowed to launch.
const ALLOWED_COMMANDS: &[&str] = &[
    "python",
    "python3",
    "py",
    "python.exe",
    "py.exe",
    "uv",
    "uvx",
    "uv.exe",
    "uvx.exe",
    "unitytool-unity-bridge",
    "unitytool-unity-bridge.exe",
    "unitytool-unity-serialized-object-bridge",
    "unitytool-unity-serialized-object-bridge.exe",
];

const DEFAULT_TIMEOUT_SEC: u64 = 120;
const POLL_INTERVAL: Duration = Duration::from_millis(25);

#[derive(Debug, Clone)]
pub struct BridgeClient {
    command: Vec<String>,
    timeout: Duration,
}

/// How `UNITYTOOL_PATCH_BRIDGE` resolved.
pub enum BridgeConfig {
    /// Variable unset: engine targets are unsupported in this environment.
    Unconfigured,
    /// Variable set and parsed into a command line.
    Configured(BridgeClient),
    /// Variable set but unusable.
    Invalid { message: String },
}

impl BridgeClient {
    pub fn new(command: Vec<String>, timeout: Duration) -> Self {
        Self { command, timeout }
    }

    /// Resolve the bridge from the process environment.
    ///
    /// The timeout comes from `UNITYTOOL_UNITY_TIMEOUT_SEC` (default 120 s,
    /// clamped to at least one second).
    pub fn from_env() -> BridgeConfig {
        let raw = std::env::var(unitytool_types::env::PATCH_BRIDGE).unwrap_or_default();
        let raw = raw.trim();
        if raw.is_empty() {
            return BridgeConfig::Unconfigured;
        }

        let Some(parts) = shlex::split(raw) else {
            return BridgeConfig::Invalid {
                message: format!(
                    "failed to parse {}: unbalanced quoting",
                    unitytool_types::env::PATCH_BRIDGE
                ),
            };
        };
        if parts.is_empty() {
            return BridgeConfig::Invalid {
                message: format!(
                    "{} did not produce a command",
                    unitytool_types::env::PATCH_BRIDGE
                ),
            };
        }

        let timeout_sec = std::env::var(unitytool_types::env::UNITY_TIMEOUT_SEC)
            .ok()
            .and_then(|v| v.trim().parse::<u64>().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SEC)
            .max(1);

        BridgeConfig::Configured(BridgeClient::new(
            parts,
            Duration::from_secs(timeout_sec),
        ))
    }

    pub fn command(&self) -> &[String] {
        &self.command
    }

    fn is_allowed(&self) -> bool {
        let head = self
            .command
            .first()
            .map(|c| {
                Utf8Path::new(c)
                    .file_name()
                    .unwrap_or(c.as_str())
                    .to_ascii_lowercase()
            })
            .unwrap_or_default();
        ALLOWED_COMMANDS.iter().any(|allowed| *allowed == head)
    }

    /// Execute one bridge call. Always returns a well-formed envelope.
    pub fn execute(&self, request: &BridgeRequestV1, cancel: &CancelToken) -> Envelope {
        let base = json!({
            "target": request.target,
            "op_count": request.ops.len(),
            "command": self.command,
            "read_only": false,
            "executed": false,
        });

        if !self.is_allowed() {
            return Envelope::error(
                codes::BRIDGE_DENIED,
                "Bridge command is not in the allowlist.",
                merge(base, json!({ "allowed_commands": ALLOWED_COMMANDS })),
            );
        }

        let temp_dir = match tempfile::Builder::new()
            .prefix("unitytool-bridge-")
            .tempdir()
        {
            Ok(dir) => dir,
            Err(err) => {
                return Envelope::error(
                    codes::BRIDGE_EXEC,
                    "Failed to create bridge scratch directory.",
                    merge(base, json!({ "error": err.to_string() })),
                );
            }
        };
        let Ok(temp_root) = Utf8PathBuf::from_path_buf(temp_dir.path().to_path_buf()) else {
            return Envelope::error(
                codes::BRIDGE_EXEC,
                "Bridge scratch directory is not valid UTF-8.",
                base,
            );
        };
        let request_path = temp_root.join("request.json");
        let response_path = temp_root.join("response.json");
        let stdout_path = temp_root.join("stdout.log");
        let stderr_path = temp_root.join("stderr.log");

        let request_json = match serde_json::to_string(request) {
            Ok(serialized) => serialized,
            Err(err) => {
                return Envelope::error(
                    codes::BRIDGE_EXEC,
                    "Failed to serialize bridge request.",
                    merge(base, json!({ "error": err.to_string() })),
                );
            }
        };
        if let Err(err) = fs::write(&request_path, request_json) {
            return Envelope::error(
                codes::BRIDGE_EXEC,
                "Failed to write bridge request file.",
                merge(base, json!({ "error": err.to_string() })),
            );
        }

        let stdout_file = match std::fs::File::create(&stdout_path) {
            Ok(file) => Stdio::from(file),
            Err(_) => Stdio::null(),
        };
        let stderr_file = match std::fs::File::create(&stderr_path) {
            Ok(file) => Stdio::from(file),
            Err(_) => Stdio::null(),
        };

        debug!(command = ?self.command, target = %request.target, "launching bridge");
        let mut child = match Command::new(&self.command[0])
            .args(&self.command[1..])
            .arg(request_path.as_str())
            .arg(response_path.as_str())
            .stdin(Stdio::null())
            .stdout(stdout_file)
            .stderr(stderr_file)
            .spawn()
        {
            Ok(child) => child,
            Err(err) => {
                return Envelope::error(
                    codes::BRIDGE_EXEC,
                    "Failed to start bridge process.",
                    merge(base, json!({ "error": err.to_string() })),
                );
            }
        };

        let deadline = Instant::now() + self.timeout;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {}
                Err(err) => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Envelope::error(
                        codes::BRIDGE_EXEC,
                        "Failed while waiting on bridge process.",
                        merge(base, json!({ "error": err.to_string() })),
                    );
                }
            }
            if cancel.is_cancelled() {
                warn!("bridge call cancelled; killing child");
                let _ = child.kill();
                let _ = child.wait();
                return Envelope::error(
                    codes::OP_CANCELLED,
                    "Bridge call was cancelled.",
                    base,
                );
            }
            if Instant::now() >= deadline {
                warn!(timeout_sec = self.timeout.as_secs(), "bridge call timed out");
                let _ = child.kill();
                let _ = child.wait();
                return Envelope::error(
                    codes::BRIDGE_TIMEOUT,
                    "Bridge process timed out.",
                    merge(base, json!({ "timeout_sec": self.timeout.as_secs() })),
                );
            }
            std::thread::sleep(POLL_INTERVAL);
        };

        if !status.success() {
            let stderr_tail = fs::read_to_string(&stderr_path).unwrap_or_default();
            return Envelope::error(
                codes::BRIDGE_FAILED,
                "Bridge process returned a non-zero exit code.",
                merge(
                    base,
                    json!({
                        "exit_code": status.code(),
                        "stderr": tail(&stderr_tail, 4096),
                    }),
                ),
            );
        }

        if !response_path.exists() {
            return Envelope::error(
                codes::BRIDGE_RESPONSE_MISSING,
                "Bridge response file is missing.",
                merge(base, json!({ "response_path": response_path.as_str() })),
            );
        }
        let response_bytes = match fs::read(&response_path) {
            Ok(bytes) => bytes,
            Err(err) => {
                return Envelope::error(
                    codes::BRIDGE_RESPONSE_MISSING,
                    "Bridge response file could not be read.",
                    merge(base, json!({ "error": err.to_string() })),
                );
            }
        };

        match parse_bridge_response(&response_bytes) {
            Ok(response) => {
                let mut envelope = response.into_envelope();
                envelope.data_insert("target", json!(request.target));
                envelope.data_insert("op_count", json!(request.ops.len()));
                envelope.data_insert("executed", json!(true));
                envelope
            }
            Err(err) => {
                let detail = match &err {
                    WireError::Json(inner) => inner.to_string(),
                    WireError::Schema { detail } => detail.clone(),
                    WireError::ProtocolVersion { expected, received } => {
                        format!("expected protocol_version {expected}, received {received}")
                    }
                };
                Envelope::error(
                    codes::BRIDGE_UNITY_RESPONSE_SCHEMA,
                    "Bridge response failed strict envelope validation.",
                    merge(base, json!({ "error": detail })),
                )
            }
        }
    }
}

fn merge(mut base: serde_json::Value, extra: serde_json::Value) -> serde_json::Value {
    if let (Some(base_map), Some(extra_map)) = (base.as_object_mut(), extra.as_object()) {
        for (k, v) in extra_map {
            base_map.insert(k.clone(), v.clone());
        }
    }
    base
}

fn tail(text: &str, max: usize) -> &str {
    if text.len() <= max {
        text
    } else {
        let mut start = text.len() - max;
        while !text.is_char_boundary(start) {
            start += 1;
        }
        &text[start..]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(command: &[&str]) -> BridgeClient {
        BridgeClient::new(
            command.iter().map(|s| s.to_string()).collect(),
            Duration::from_secs(5),
        )
    }

    #[test]
    fn allowlist_accepts_known_basenames() {
        assert!(client(&["python3"]).is_allowed());
        assert!(client(&["/usr/local/bin/unitytool-unity-bridge", "--flag"]).is_allowed());
        assert!(client(&["Python.EXE"]).is_allowed());
    }

    #[test]
    fn allowlist_rejects_arbitrary_commands() {
        assert!(!client(&["/bin/sh", "-c", "true"]).is_allowed());
        assert!(!client(&["rm"]).is_allowed());
    }

    #[test]
    fn denied_command_reports_bridge_denied() {
        let request = BridgeRequestV1 {
            protocol_version: 1,
            target: "Assets/Foo.prefab".into(),
            ops: vec![],
        };
        let envelope = client(&["/bin/sh"]).execute(&request, &CancelToken::new());
        assert!(!envelope.success);
        assert_eq!(envelope.code, codes::BRIDGE_DENIED);
    }

    #[test]
    fn tail_respects_char_boundaries() {
        let text = "αβγδε";
        let tailed = tail(text, 3);
        assert!(text.ends_with(tailed));
    }
}
