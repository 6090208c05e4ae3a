use anyhow::Context;
use camino::Utf8Path;
use fs_err as fs;
use serde::Serialize;

/// Write mode for an ignore-guid file update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreWriteMode {
    Replace,
    Append,
}

impl IgnoreWriteMode {
    pub fn as_str(self) -> &'static str {
        match self {
            IgnoreWriteMode::Replace => "replace",
            IgnoreWriteMode::Append => "append",
        }
    }
}

/// Summary of an ignore-guid file write.
#[derive(Debug, Clone, Serialize)]
pub struct IgnoreFileUpdate {
    pub path: String,
    pub mode: String,
    pub added: usize,
    pub total: usize,
}

/// Parse ignore-file content: one GUID per line, `#` starts a comment,
/// blank lines skipped. Order is preserved, duplicates dropped.
pub fn parse_ignore_guid_lines(content: &str) -> Vec<String> {
    ordered_unique(content.lines().filter_map(|raw| {
        let line = raw.split('#').next().unwrap_or("").trim();
        (!line.is_empty()).then(|| line.to_string())
    }))
}

pub fn read_ignore_guid_file(path: &Utf8Path) -> anyhow::Result<Vec<String>> {
    let content = fs::read_to_string(path).with_context(|| format!("read {path}"))?;
    Ok(parse_ignore_guid_lines(&content))
}

/// Write (or extend) an ignore-guid file from candidate GUIDs.
pub fn write_ignore_guid_file(
    path: &Utf8Path,
    guids: &[String],
    mode: IgnoreWriteMode,
) -> anyhow::Result<IgnoreFileUpdate> {
    let incoming = ordered_unique(guids.iter().filter(|g| !g.is_empty()).cloned());

    let existing = match mode {
        IgnoreWriteMode::Append if path.exists() => read_ignore_guid_file(path)?,
        _ => vec![],
    };

    let merged = match mode {
        IgnoreWriteMode::Replace => incoming,
        IgnoreWriteMode::Append => {
            ordered_unique(existing.iter().cloned().chain(incoming.into_iter()))
        }
    };
    let added = match mode {
        IgnoreWriteMode::Replace => merged.len(),
        IgnoreWriteMode::Append => merged.len().saturating_sub(existing.len()),
    };

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create {parent}"))?;
    }
    let mut content = merged.join("\n");
    if !content.is_empty() {
        content.push('\n');
    }
    fs::write(path, content).with_context(|| format!("write {path}"))?;

    Ok(IgnoreFileUpdate {
        path: path.to_string(),
        mode: mode.as_str().to_string(),
        added,
        total: merged.len(),
    })
}

fn ordered_unique<I: IntoIterator<Item = String>>(values: I) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    values
        .into_iter()
        .filter(|v| seen.insert(v.clone()))
        .collect()
}
