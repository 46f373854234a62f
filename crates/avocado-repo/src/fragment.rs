use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::fsutil;
use crate::repo_map::{self, RepositoryMap};

pub const FRAGMENT_SUFFIX: &str = "-fragment.json";

/// One target's view of the repository: the sub-repositories it consumes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub target: String,
    pub repos: Vec<String>,
}

impl Fragment {
    pub fn file_name(target: &str) -> String {
        format!("{target}{FRAGMENT_SUFFIX}")
    }

    /// Compact single-line form, `{"<target>":["a","b"]}`.
    pub fn to_json_string(&self) -> Result<String> {
        let mut obj = serde_json::Map::new();
        obj.insert(
            self.target.clone(),
            serde_json::Value::Array(
                self.repos
                    .iter()
                    .cloned()
                    .map(serde_json::Value::String)
                    .collect(),
            ),
        );
        Ok(serde_json::to_string(&serde_json::Value::Object(obj))?)
    }
}

#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub source_dir: PathBuf,
    pub target: String,
    pub output_dir: PathBuf,
    /// Falls back to the map file's own `releasever=` line when empty.
    pub releasever: String,
    /// Defaults to `<source_dir>/repo-map.conf`.
    pub map_file: Option<PathBuf>,
    pub package_extensions: Vec<String>,
}

pub fn extension_repo(target: &str) -> String {
    format!("target/{target}-ext")
}

pub fn validate_target_name(target: &str) -> Result<()> {
    let t = target.trim();
    if t.is_empty() {
        return Err(Error::msg("target name is empty"));
    }
    if t != target || t.contains('/') || t.contains('\\') || t == "." || t == ".." {
        return Err(Error::msg(format!("invalid target name '{target}'")));
    }
    Ok(())
}

/// Computes the fragment for one target without writing anything.
pub fn build(req: &GenerateRequest) -> Result<Fragment> {
    validate_target_name(&req.target)?;

    let map_path = req
        .map_file
        .clone()
        .unwrap_or_else(|| req.source_dir.join(repo_map::DEFAULT_MAP_FILE));
    let map = RepositoryMap::load(&map_path)?;

    let releasever = if req.releasever.trim().is_empty() {
        map.releasever.clone().unwrap_or_default()
    } else {
        req.releasever.trim().to_string()
    };

    let mut repos = Vec::<String>::new();
    for entry in &map.entries {
        fsutil::validate_rel_like_path(&entry.key)
            .map_err(|e| e.context(format!("repository map key '{}'", entry.key)))?;
        let src = req.source_dir.join(&entry.key);
        if !fsutil::dir_has_packages(&src, &req.package_extensions)? {
            debug!("skipping {} (absent or no packages)", src.display());
            continue;
        }
        let rel = repo_map::manifest_relative(&entry.template, &releasever);
        if rel.is_empty() {
            debug!("skipping '{}' (maps onto the release root)", entry.key);
            continue;
        }
        if !repos.contains(&rel) {
            repos.push(rel);
        }
    }

    // The extension repo is populated after fragments are generated, so it is
    // listed whether or not it holds packages yet.
    let ext = extension_repo(&req.target);
    if !repos.contains(&ext) {
        repos.push(ext);
    }

    Ok(Fragment {
        target: req.target.clone(),
        repos,
    })
}

pub fn generate(req: &GenerateRequest) -> Result<PathBuf> {
    let fragment = build(req)?;
    let body = fragment.to_json_string()?;
    let out = req.output_dir.join(Fragment::file_name(&fragment.target));
    fsutil::atomic_write_text(&out, &body)?;
    info!(
        "fragment for '{}' -> {} ({} repos)",
        fragment.target,
        out.display(),
        fragment.repos.len()
    );
    Ok(out)
}

/// Reads `{"<target>":[...]}` back. Extra keys are accepted; each becomes its
/// own fragment.
pub fn parse_fragments(raw: &str, origin: &Path) -> Result<Vec<Fragment>> {
    let value: serde_json::Value = serde_json::from_str(raw)
        .map_err(|e| Error::msg(format!("invalid fragment {}: {e}", origin.display())))?;
    let serde_json::Value::Object(obj) = value else {
        return Err(Error::msg(format!(
            "invalid fragment {} (expected a JSON object)",
            origin.display()
        )));
    };
    let mut out = Vec::with_capacity(obj.len());
    for (target, repos) in obj {
        let repos = string_array(&repos).ok_or_else(|| {
            Error::msg(format!(
                "invalid fragment {} (target '{}' must map to an array of strings)",
                origin.display(),
                target
            ))
        })?;
        out.push(Fragment { target, repos });
    }
    Ok(out)
}

pub(crate) fn string_array(v: &serde_json::Value) -> Option<Vec<String>> {
    v.as_array()?
        .iter()
        .map(|s| s.as_str().map(ToOwned::to_owned))
        .collect()
}
