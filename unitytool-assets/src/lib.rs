//! Asset-tree domain logic: project roots, GUID indexing, reference scanning,
//! and prefab-variant override inspection.
//!
//! This crate owns *what* is broken and why. It never mutates the asset tree;
//! writes belong to `unitytool-patch` and the bridge.

mod ignore;
mod index;
mod overrides;
mod parse;
mod project;
mod scan;

pub use ignore::{IgnoreFileUpdate, IgnoreWriteMode, parse_ignore_guid_lines, read_ignore_guid_file, write_ignore_guid_file};
pub use index::GuidIndex;
pub use overrides::{
    OverrideEntry, compute_effective_values, detect_stale_overrides, list_overrides,
    resolve_prefab_chain,
};
pub use parse::{ReferenceMatch, extract_local_file_ids, extract_meta_guid, iter_references};
pub use project::{
    DEFAULT_EXCLUDED_DIR_NAMES, compile_exclude_globs, is_builtin_guid, is_text_asset,
    looks_like_guid, normalize_guid, read_text_file, relative_to, resolve_project_root,
    resolve_scope_path,
};
pub use scan::{ScanOptions, scan_broken_references, where_used};
