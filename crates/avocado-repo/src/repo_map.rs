//! Line-oriented `key=value` repository map produced by the package build.
//!
//! ```text
//! # sub-path under the deploy dir = destination under the release tree
//! target/x86_64=$releasever/target/x86_64
//! sdk/x86_64=${releasever}/sdk/x86_64
//! releasever=latest/apollo/edge
//! ```
//!
//! A `releasever=` line defines the default value of the variable; it is not
//! a repository entry.

use std::path::Path;

use tracing::warn;

use crate::error::{Error, Result};
use crate::fsutil;

pub const DEFAULT_MAP_FILE: &str = "repo-map.conf";
const RELEASEVER: &str = "releasever";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoMapEntry {
    pub key: String,
    pub template: String,
}

#[derive(Debug, Clone, Default)]
pub struct RepositoryMap {
    pub entries: Vec<RepoMapEntry>,
    pub releasever: Option<String>,
}

impl RepositoryMap {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(Error::msg(format!(
                "repository map not found: {} (did the package index step run?)",
                path.display()
            )));
        }
        let raw = fsutil::read_text(path)?;
        Ok(Self::parse(&raw, &path.display().to_string()))
    }

    pub fn parse(raw: &str, origin: &str) -> Self {
        let mut out = Self::default();
        for (lineno, line) in raw.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                warn!("{origin}:{}: ignoring line without '='", lineno + 1);
                continue;
            };
            let key = key.trim();
            let value = unquote(value.trim());
            if key.is_empty() {
                warn!("{origin}:{}: ignoring line with empty key", lineno + 1);
                continue;
            }
            if key == RELEASEVER {
                out.releasever = Some(value.to_string()).filter(|s| !s.is_empty());
                continue;
            }
            out.entries.push(RepoMapEntry {
                key: key.to_string(),
                template: value.to_string(),
            });
        }
        out
    }
}

fn unquote(s: &str) -> &str {
    for q in ['"', '\''] {
        if let Some(inner) = s.strip_prefix(q).and_then(|r| r.strip_suffix(q)) {
            return inner;
        }
    }
    s
}

/// Expands `$releasever` and `${releasever}`.
pub fn expand_template(template: &str, releasever: &str) -> String {
    template
        .replace("${releasever}", releasever)
        .replace("$releasever", releasever)
}

/// Destination path relative to the manifest location: the expanded template
/// with the `releasever/` prefix removed.
pub fn manifest_relative(template: &str, releasever: &str) -> String {
    let expanded = expand_template(template, releasever);
    let expanded = expanded.trim_start_matches('/');
    let rv = releasever.trim_matches('/');
    let rel = if rv.is_empty() {
        expanded
    } else if expanded == rv {
        ""
    } else {
        expanded
            .strip_prefix(rv)
            .and_then(|r| r.strip_prefix('/'))
            .unwrap_or(expanded)
    };
    rel.trim_matches('/').to_string()
}
