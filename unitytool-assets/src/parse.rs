use crate::project::normalize_guid;
use once_cell::sync::Lazy;
use regex::Regex;

/// `guid: <32-hex>` as written in `.meta` sidecars.
static META_GUID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\bguid:\s*([0-9a-fA-F]{32})\b").expect("meta guid regex"));

/// YAML document anchors: `--- !u!<class> &<local id>`.
static LOCAL_FILE_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^--- !u!\d+ &(-?\d+)").expect("local file id regex"));

/// Inline reference tuples: `{fileID: N, guid: X, type: T}` with guid/type optional.
static REFERENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{fileID:\s*(-?\d+)(?:,\s*guid:\s*([0-9a-fA-F]{32}))?(?:,\s*type:\s*(-?\d+))?\}")
        .expect("reference regex")
});

/// Variant base pointer: `m_SourcePrefab` (or legacy `m_ParentPrefab`).
static SOURCE_PREFAB: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"m_(?:SourcePrefab|ParentPrefab):\s*\{fileID:\s*(-?\d+),\s*guid:\s*([0-9a-fA-F]{32}),\s*type:\s*(-?\d+)\}",
    )
    .expect("source prefab regex")
});

/// One `(guid, fileID)` citation extracted from serialized text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceMatch {
    pub file_id: i64,
    /// Lowercased GUID; `None` for purely local references.
    pub guid: Option<String>,
    pub ref_type: Option<i64>,
    /// 1-based; 0 when locations were not requested.
    pub line: usize,
    pub column: usize,
    pub raw: String,
}

/// Extract the GUID recorded in a `.meta` sidecar's text.
pub fn extract_meta_guid(text: &str) -> Option<String> {
    META_GUID
        .captures(text)
        .map(|c| normalize_guid(&c[1]))
}

/// All local object identifiers anchored in a serialized asset.
pub fn extract_local_file_ids(text: &str) -> std::collections::HashSet<i64> {
    LOCAL_FILE_ID
        .captures_iter(text)
        .filter_map(|c| c[1].parse().ok())
        .collect()
}

/// All reference tuples in `text`, in document order.
///
/// Line/column bookkeeping is skipped unless requested; diagnostics are the
/// only consumer and most scans run without details.
pub fn iter_references(text: &str, include_location: bool) -> Vec<ReferenceMatch> {
    let line_starts: Option<Vec<usize>> = include_location.then(|| {
        let mut starts = vec![0usize];
        starts.extend(text.char_indices().filter(|(_, c)| *c == '\n').map(|(i, _)| i + 1));
        starts
    });

    REFERENCE
        .captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0).expect("match");
            let file_id: i64 = caps[1].parse().ok()?;
            let guid = caps.get(2).map(|m| normalize_guid(m.as_str()));
            let ref_type = caps.get(3).and_then(|m| m.as_str().parse().ok());

            let (line, column) = match &line_starts {
                Some(starts) => {
                    let start = whole.start();
                    let idx = starts.partition_point(|&s| s <= start) - 1;
                    (idx + 1, start - starts[idx] + 1)
                }
                None => (0, 0),
            };

            Some(ReferenceMatch {
                file_id,
                guid,
                ref_type,
                line,
                column,
                raw: whole.as_str().to_string(),
            })
        })
        .collect()
}

/// The Base pointer of a variant document, if any.
pub fn source_prefab_reference(text: &str) -> Option<(i64, String)> {
    SOURCE_PREFAB.captures(text).and_then(|caps| {
        let file_id = caps[1].parse().ok()?;
        Some((file_id, normalize_guid(&caps[2])))
    })
}
