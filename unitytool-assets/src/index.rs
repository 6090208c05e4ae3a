use crate::parse::extract_meta_guid;
use crate::project::{compile_exclude_globs, is_excluded_dir_name, relative_to};
use camino::{Utf8Path, Utf8PathBuf};
use rayon::prelude::*;
use std::collections::HashMap;
use tracing::debug;
use unitytool_types::envelope::Diagnostic;
use walkdir::WalkDir;

/// `guid -> asset path` map built from `.meta` sidecars under a project root.
///
/// Built once per invocation and read-only afterwards.
#[derive(Debug, Default)]
pub struct GuidIndex {
    map: HashMap<String, Utf8PathBuf>,
    /// Warnings recorded during the build (duplicate GUIDs).
    pub warnings: Vec<Diagnostic>,
}

impl GuidIndex {
    /// Walk `project_root`, skipping the default-excluded directory names and
    /// any user-supplied exclude globs, and map every `.meta` GUID to its
    /// sibling asset path. Globs are matched against paths relative to the
    /// project root.
    ///
    /// Meta parsing fans out over the rayon pool; insertion happens in sorted
    /// walk order so first-seen-wins is deterministic.
    pub fn build(project_root: &Utf8Path, exclude: &[String]) -> anyhow::Result<Self> {
        let excludes = compile_exclude_globs(exclude)?;

        let mut meta_paths: Vec<Utf8PathBuf> = WalkDir::new(project_root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|entry| {
                !(entry.file_type().is_dir()
                    && entry.depth() > 0
                    && entry
                        .file_name()
                        .to_str()
                        .is_some_and(is_excluded_dir_name))
            })
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_file())
            .filter_map(|entry| Utf8PathBuf::from_path_buf(entry.into_path()).ok())
            .filter(|path| {
                path.extension()
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("meta"))
            })
            .filter(|path| !excludes.is_match(relative_to(path, project_root)))
            .collect();
        meta_paths.sort();

        let parsed: Vec<(Utf8PathBuf, Option<String>)> = meta_paths
            .into_par_iter()
            .map(|meta| {
                let guid = fs_err::read(&meta)
                    .ok()
                    .and_then(|bytes| String::from_utf8(bytes).ok())
                    .and_then(|text| extract_meta_guid(&text));
                (meta, guid)
            })
            .collect();

        let mut index = GuidIndex::default();
        for (meta, guid) in parsed {
            let Some(guid) = guid else {
                continue;
            };
            // `.meta` sidecar sits next to the asset it describes.
            let asset_path = meta.with_extension("");
            match index.map.entry(guid.clone()) {
                std::collections::hash_map::Entry::Vacant(slot) => {
                    slot.insert(asset_path);
                }
                std::collections::hash_map::Entry::Occupied(existing) => {
                    index.warnings.push(Diagnostic::new(
                        relative_to(&asset_path, project_root),
                        "guid",
                        "duplicate_guid",
                        format!(
                            "guid {} already maps to {}",
                            guid,
                            relative_to(existing.get(), project_root)
                        ),
                    ));
                }
            }
        }

        debug!(
            guids = index.map.len(),
            duplicates = index.warnings.len(),
            "guid index built"
        );
        Ok(index)
    }

    pub fn get(&self, guid: &str) -> Option<&Utf8Path> {
        self.map.get(guid).map(Utf8PathBuf::as_path)
    }

    pub fn contains(&self, guid: &str) -> bool {
        self.map.contains_key(guid)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}
