use anyhow::Context;
use camino::Utf8Path;
use fs_err as fs;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use unitytool_types::attest::Attestation;

type HmacSha256 = Hmac<Sha256>;

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

pub fn hmac_sha256_hex(key: &[u8], bytes: &[u8]) -> anyhow::Result<String> {
    let mut mac =
        HmacSha256::new_from_slice(key).map_err(|err| anyhow::anyhow!("invalid hmac key: {err}"))?;
    mac.update(bytes);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// The plan digest: SHA-256 over the file's verbatim UTF-8 bytes.
pub fn compute_plan_sha256(plan_path: &Utf8Path) -> anyhow::Result<String> {
    let bytes = fs::read(plan_path).with_context(|| format!("read {plan_path}"))?;
    Ok(sha256_hex(&bytes))
}

/// HMAC-SHA256 signature over the plan's verbatim bytes.
pub fn compute_plan_signature(plan_path: &Utf8Path, key: &str) -> anyhow::Result<String> {
    let bytes = fs::read(plan_path).with_context(|| format!("read {plan_path}"))?;
    hmac_sha256_hex(key.as_bytes(), &bytes)
}

/// Resolve the signing key: an explicit key file wins over the named env var.
///
/// Trailing newlines are stripped so keys provisioned via `echo` verify the
/// same as keys set inline.
pub fn resolve_signing_key(key_env: &str, key_file: Option<&Utf8Path>) -> anyhow::Result<String> {
    if let Some(path) = key_file {
        let key = fs::read_to_string(path)
            .with_context(|| format!("read signing key file {path}"))?;
        let key = key.trim_end_matches(['\r', '\n']).to_string();
        anyhow::ensure!(!key.is_empty(), "signing key file is empty: {path}");
        return Ok(key);
    }

    let key = std::env::var(key_env)
        .map_err(|_| anyhow::anyhow!("signing key env var is not set: {key_env}"))?;
    let key = key.trim_end_matches(['\r', '\n']).to_string();
    anyhow::ensure!(!key.is_empty(), "signing key env var is empty: {key_env}");
    Ok(key)
}

/// Normalize an expected digest/signature; `None` when it is not 64 hex chars.
pub fn normalize_expected_digest(digest: &str) -> Option<String> {
    let normalized = digest.trim().to_ascii_lowercase();
    (normalized.len() == 64 && normalized.bytes().all(|b| b.is_ascii_hexdigit()))
        .then_some(normalized)
}

/// Build the attestation document for a plan file.
pub fn build_attestation(
    plan_path: &Utf8Path,
    signing_key: Option<&str>,
) -> anyhow::Result<Attestation> {
    let sha256 = compute_plan_sha256(plan_path)?;
    let signature = match signing_key {
        Some(key) => Some(compute_plan_signature(plan_path, key)?),
        None => None,
    };
    Ok(Attestation::new(
        sha256,
        signature,
        plan_path.to_string(),
    ))
}

/// Read expected digest/signature from an attestation file.
///
/// Accepts both a bare attestation document and a full envelope whose `data`
/// carries the attestation fields.
pub fn load_attestation(path: &Utf8Path) -> anyhow::Result<(Option<String>, Option<String>)> {
    let text = fs::read_to_string(path).with_context(|| format!("read {path}"))?;
    let payload: serde_json::Value =
        serde_json::from_str(&text).with_context(|| format!("parse {path}"))?;
    let source = match payload.get("data") {
        Some(data) if data.is_object() => data,
        _ => &payload,
    };

    let field = |name: &str| -> anyhow::Result<Option<String>> {
        match source.get(name) {
            None | Some(serde_json::Value::Null) => Ok(None),
            Some(serde_json::Value::String(s)) => Ok(Some(s.clone())),
            Some(_) => anyhow::bail!("attestation field '{name}' must be a string when present"),
        }
    };
    Ok((field("sha256")?, field("signature")?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;
    use tempfile::TempDir;

    fn plan_file(temp: &TempDir, contents: &str) -> Utf8PathBuf {
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        let path = root.join("plan.json");
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn digest_is_stable_across_reads() {
        let temp = TempDir::new().unwrap();
        let path = plan_file(&temp, r#"{"target":"a.json","ops":[]}"#);
        assert_eq!(
            compute_plan_sha256(&path).unwrap(),
            compute_plan_sha256(&path).unwrap()
        );
    }

    #[test]
    fn digest_changes_with_any_byte() {
        let temp = TempDir::new().unwrap();
        let path = plan_file(&temp, r#"{"target":"a.json","ops":[]}"#);
        let before = compute_plan_sha256(&path).unwrap();
        fs::write(&path, "{\"target\":\"a.json\",\"ops\":[]} ").unwrap();
        assert_ne!(before, compute_plan_sha256(&path).unwrap());
    }

    #[test]
    fn signature_verifies_with_same_key_only() {
        let temp = TempDir::new().unwrap();
        let path = plan_file(&temp, r#"{"target":"a.json","ops":[]}"#);
        let signed = compute_plan_signature(&path, "key-1").unwrap();
        assert_eq!(signed, compute_plan_signature(&path, "key-1").unwrap());
        assert_ne!(signed, compute_plan_signature(&path, "key-2").unwrap());
    }

    #[test]
    fn expected_digest_normalization() {
        let upper = "AB".repeat(32);
        assert_eq!(
            normalize_expected_digest(&upper).unwrap(),
            "ab".repeat(32)
        );
        assert_eq!(normalize_expected_digest("zz"), None);
        assert_eq!(normalize_expected_digest(&"ab".repeat(30)), None);
    }

    #[test]
    fn key_file_overrides_env_and_strips_newline() {
        let temp = TempDir::new().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        let key_path = root.join("key.txt");
        fs::write(&key_path, "secret\n").unwrap();
        let key = resolve_signing_key("UNSET_VAR_FOR_TEST", Some(&key_path)).unwrap();
        assert_eq!(key, "secret");
    }

    #[test]
    fn attestation_round_trips_through_loader() {
        let temp = TempDir::new().unwrap();
        let path = plan_file(&temp, r#"{"target":"a.json","ops":[]}"#);
        let attestation = build_attestation(&path, Some("key")).unwrap();

        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        let att_path = root.join("attest.json");
        fs::write(&att_path, serde_json::to_string_pretty(&attestation).unwrap()).unwrap();

        let (sha256, signature) = load_attestation(&att_path).unwrap();
        assert_eq!(sha256.as_deref(), Some(attestation.sha256.as_str()));
        assert_eq!(signature, attestation.signature);
    }
}
