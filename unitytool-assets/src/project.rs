use camino::{Utf8Path, Utf8PathBuf};
use fs_err as fs;
use globset::{Glob, GlobSet, GlobSetBuilder};

/// Serialized text-asset suffixes eligible for reference scanning.
pub const TEXT_ASSET_SUFFIXES: &[&str] = &[
    "prefab",
    "unity",
    "asset",
    "mat",
    "anim",
    "controller",
    "overridecontroller",
    "playable",
    "mask",
    "flare",
    "physicmaterial",
];

/// Directory names skipped by every walk (compared case-insensitively).
pub const DEFAULT_EXCLUDED_DIR_NAMES: &[&str] =
    &[".git", ".hg", ".svn", "library", "logs", "temp", "obj"];

pub fn looks_like_guid(value: &str) -> bool {
    value.len() == 32 && value.bytes().all(|b| b.is_ascii_hexdigit())
}

pub fn normalize_guid(value: &str) -> String {
    value.trim().to_ascii_lowercase()
}

/// Engine built-in GUIDs are never "missing": the leading half is all zeros
/// (e.g. `0000000000000000f000000000000000`), or the GUID is `f` padded with
/// zeros.
pub fn is_builtin_guid(guid: &str) -> bool {
    let g = normalize_guid(guid);
    g.starts_with("0000000000000000")
        || (g.starts_with('f') && g[1..].bytes().all(|b| b == b'0'))
}

pub fn is_text_asset(path: &Utf8Path) -> bool {
    path.extension()
        .map(|ext| {
            let ext = ext.to_ascii_lowercase();
            TEXT_ASSET_SUFFIXES.iter().any(|s| *s == ext)
        })
        .unwrap_or(false)
}

pub fn is_excluded_dir_name(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    DEFAULT_EXCLUDED_DIR_NAMES.iter().any(|d| *d == lower)
}

/// Compile user-supplied exclude patterns into a matcher.
///
/// Patterns are normalized to forward slashes and matched against paths
/// relative to the walk root (scope for scans, project root for the index).
pub fn compile_exclude_globs(patterns: &[String]) -> anyhow::Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(&pattern.replace('\\', "/"))?);
    }
    Ok(builder.build()?)
}

/// Walk upward from `scope` to the nearest ancestor containing an `Assets`
/// child. `None` means the scope is outside any project root.
pub fn resolve_project_root(scope: &Utf8Path) -> Option<Utf8PathBuf> {
    let mut current = if scope.is_file() {
        scope.parent()?.to_path_buf()
    } else {
        scope.to_path_buf()
    };

    loop {
        if current.join("Assets").is_dir() {
            return Some(current);
        }
        match current.parent() {
            Some(parent) => current = parent.to_path_buf(),
            None => return None,
        }
    }
}

/// Resolve a user-supplied scope against a base directory.
pub fn resolve_scope_path(scope: &str, base: &Utf8Path) -> Utf8PathBuf {
    let path = Utf8PathBuf::from(scope);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
    }
}

/// Path relative to `root` when possible, otherwise the path itself, with
/// forward slashes.
pub fn relative_to(path: &Utf8Path, root: &Utf8Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.as_str().replace('\\', "/")
}

/// Read a file as UTF-8 text. `None` means the file exists but cannot be
/// decoded; callers count it as unreadable instead of failing the scan.
pub fn read_text_file(path: &Utf8Path) -> anyhow::Result<Option<String>> {
    let bytes = fs::read(path)?;
    Ok(String::from_utf8(bytes).ok())
}
