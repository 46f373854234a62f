//! `targets.json`: every known target mapped to the repositories it consumes.
//!
//! Aggregation is split into a pure [`merge`] over in-memory values and the
//! [`aggregate`] shell that reads the previous manifest and the fragments,
//! and writes the result back.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::fragment::{self, FRAGMENT_SUFFIX, Fragment};
use crate::fsutil;

pub const MANIFEST_FILE: &str = "targets.json";
const LOCK_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    entries: Vec<(String, Vec<String>)>,
}

impl Manifest {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn get(&self, target: &str) -> Option<&[String]> {
        self.entries
            .iter()
            .find(|(t, _)| t == target)
            .map(|(_, repos)| repos.as_slice())
    }

    pub fn targets(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(t, _)| t.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries
            .iter()
            .map(|(t, repos)| (t.as_str(), repos.as_slice()))
    }

    /// Replaces the entry in place when the target exists, appends otherwise.
    pub fn upsert(&mut self, target: impl Into<String>, repos: Vec<String>) {
        let target = target.into();
        match self.entries.iter_mut().find(|(t, _)| *t == target) {
            Some(slot) => slot.1 = repos,
            None => self.entries.push((target, repos)),
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(raw)?;
        let serde_json::Value::Object(obj) = value else {
            return Err(Error::msg("manifest is not a JSON object"));
        };
        let mut out = Self::default();
        for (target, repos) in obj {
            let repos = fragment::string_array(&repos).ok_or_else(|| {
                Error::msg(format!(
                    "manifest target '{target}' is not an array of strings"
                ))
            })?;
            out.entries.push((target, repos));
        }
        Ok(out)
    }

    /// Compact JSON; `{}` when empty.
    pub fn to_json_string(&self) -> Result<String> {
        let mut obj = serde_json::Map::new();
        for (target, repos) in &self.entries {
            obj.insert(
                target.clone(),
                serde_json::Value::Array(
                    repos.iter().cloned().map(serde_json::Value::String).collect(),
                ),
            );
        }
        Ok(serde_json::to_string(&serde_json::Value::Object(obj))?)
    }
}

/// New fragments replace existing entries wholesale. Untouched existing
/// targets keep their relative order and come first, followed by new or
/// updated targets in fragment order.
pub fn merge(existing: &Manifest, fragments: &[Fragment]) -> Manifest {
    let mut updated = Manifest::default();
    for f in fragments {
        updated.upsert(f.target.clone(), f.repos.clone());
    }

    let mut out = Manifest::default();
    for (target, repos) in existing.iter() {
        if updated.get(target).is_none() {
            out.entries.push((target.to_string(), repos.to_vec()));
        }
    }
    out.entries.extend(updated.entries);
    out
}

/// Best-effort read of a previous manifest. Missing, empty or malformed
/// files all yield an empty manifest.
pub fn load_existing(path: &Path) -> Manifest {
    if !path.is_file() {
        debug!("no existing manifest at {}", path.display());
        return Manifest::default();
    }
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) => {
            warn!("cannot read existing manifest {}: {e}; starting empty", path.display());
            return Manifest::default();
        }
    };
    if raw.trim().is_empty() {
        return Manifest::default();
    }
    match Manifest::parse(&raw) {
        Ok(m) => m,
        Err(e) => {
            warn!(
                "existing manifest {} is malformed ({e}); treating it as empty",
                path.display()
            );
            Manifest::default()
        }
    }
}

/// Reads every `*-fragment.json` in `dir`, ordered by file name.
pub fn load_fragments(dir: &Path) -> Result<Vec<Fragment>> {
    if !dir.is_dir() {
        return Err(Error::msg(format!(
            "fragments directory not found: {}",
            dir.display()
        )));
    }
    let mut files = Vec::<PathBuf>::new();
    let entries = fs::read_dir(dir)
        .map_err(|e| Error::msg(format!("failed to read dir {}: {e}", dir.display())))?;
    for entry in entries {
        let entry =
            entry.map_err(|e| Error::msg(format!("failed to read dir {}: {e}", dir.display())))?;
        let path = entry.path();
        let is_fragment = path
            .file_name()
            .and_then(|s| s.to_str())
            .map(|n| n.ends_with(FRAGMENT_SUFFIX) && !n.starts_with('.'))
            .unwrap_or(false);
        if is_fragment && path.is_file() {
            files.push(path);
        }
    }
    files.sort();

    let mut out = Vec::<Fragment>::new();
    for path in files {
        let raw = fsutil::read_text(&path)?;
        if raw.trim().is_empty() {
            warn!("skipping empty fragment {}", path.display());
            continue;
        }
        for f in fragment::parse_fragments(&raw, &path)? {
            if let Some(prev) = out.iter_mut().find(|p| p.target == f.target) {
                warn!(
                    "target '{}' appears in more than one fragment; {} wins",
                    f.target,
                    path.display()
                );
                prev.repos = f.repos;
            } else {
                out.push(f);
            }
        }
    }
    Ok(out)
}

#[derive(Debug, Clone)]
pub struct AggregateRequest {
    pub fragments_dir: PathBuf,
    pub output: PathBuf,
    /// Defaults to `output` when that file exists and is non-empty.
    pub existing: Option<PathBuf>,
    /// Also refresh this copy after a successful write.
    pub persist: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct AggregateReport {
    pub manifest: Manifest,
    pub fragments: usize,
    pub carried: usize,
}

pub fn aggregate(req: &AggregateRequest) -> Result<AggregateReport> {
    let fragments = load_fragments(&req.fragments_dir)?;

    let _lock = fsutil::acquire_lock(&req.output, LOCK_TIMEOUT)?;

    let existing_path = req.existing.clone().unwrap_or_else(|| req.output.clone());
    let existing = load_existing(&existing_path);
    let merged = merge(&existing, &fragments);
    let carried = existing
        .targets()
        .filter(|t| !fragments.iter().any(|f| f.target == *t))
        .count();

    write_validated(&req.output, &merged)?;
    info!(
        "manifest {} written: {} targets ({} from fragments, {} carried forward)",
        req.output.display(),
        merged.len(),
        fragments.len(),
        carried
    );

    if let Some(persist) = req.persist.as_ref().filter(|p| **p != req.output) {
        let _persist_lock = fsutil::acquire_lock(persist, LOCK_TIMEOUT)?;
        write_validated(persist, &merged)?;
        info!("persistent manifest refreshed: {}", persist.display());
    }

    Ok(AggregateReport {
        manifest: merged,
        fragments: fragments.len(),
        carried,
    })
}

// The body is checked before it becomes visible, then read back after the
// rename so a bad write can't be reported as success.
fn write_validated(path: &Path, manifest: &Manifest) -> Result<()> {
    let body = manifest.to_json_string()?;
    check_body(&body, manifest.len())
        .map_err(|e| e.context(format!("refusing to write {}", path.display())))?;
    fsutil::atomic_write_text(path, &body)?;
    let written = fsutil::read_text(path)?;
    check_body(&written, manifest.len())
        .map_err(|e| e.context(format!("manifest {} failed validation", path.display())))
}

fn check_body(body: &str, expected_targets: usize) -> Result<()> {
    let parsed = Manifest::parse(body)?;
    if parsed.len() != expected_targets {
        return Err(Error::msg(format!(
            "expected {expected_targets} targets, found {}",
            parsed.len()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frag(target: &str, repos: &[&str]) -> Fragment {
        Fragment {
            target: target.into(),
            repos: repos.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn new_fragment_replaces_instead_of_union() {
        let existing = Manifest::parse(r#"{"T":["x","y"]}"#).expect("parse");
        let merged = merge(&existing, &[frag("T", &["a", "b"])]);
        assert_eq!(merged.to_json_string().expect("json"), r#"{"T":["a","b"]}"#);
    }

    #[test]
    fn untouched_targets_come_first() {
        let existing = Manifest::parse(r#"{"A":["1"],"B":["2"],"C":["3"]}"#).expect("parse");
        let merged = merge(&existing, &[frag("D", &["4"]), frag("A", &["9"])]);
        let order: Vec<_> = merged.targets().collect();
        assert_eq!(order, ["B", "C", "D", "A"]);
        assert_eq!(merged.get("A"), Some(&["9".to_string()][..]));
    }

    #[test]
    fn empty_merge_serializes_as_empty_object() {
        let merged = merge(&Manifest::default(), &[]);
        assert_eq!(merged.to_json_string().expect("json"), "{}");
    }

    #[test]
    fn malformed_existing_is_treated_as_empty() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let p = tmp.path().join(MANIFEST_FILE);
        fs::write(&p, r#"{"a":["1"],"#).expect("write");
        assert!(load_existing(&p).is_empty());
        fs::write(&p, r#"["not","an","object"]"#).expect("write");
        assert!(load_existing(&p).is_empty());
        fs::write(&p, "").expect("write");
        assert!(load_existing(&p).is_empty());
    }

    #[test]
    fn duplicate_fragment_targets_last_file_wins() {
        let tmp = tempfile::tempdir().expect("tempdir");
        fs::write(tmp.path().join("a-fragment.json"), r#"{"t":["old"]}"#).expect("write");
        fs::write(tmp.path().join("b-fragment.json"), r#"{"t":["new"]}"#).expect("write");
        let frags = load_fragments(tmp.path()).expect("load");
        assert_eq!(frags, vec![frag("t", &["new"])]);
    }
}
