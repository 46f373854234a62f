//! Repository index maintenance over the leaf directories of a package tree.

use std::fmt;
use std::path::{Component, Path, PathBuf};

use clap::ValueEnum;
use tracing::{error, info, warn};

use crate::error::{Error, Result};
use crate::fsutil::{self, INDEX_DIR_NAME};

pub mod indexer;
pub mod leaf;
pub mod output;

pub use indexer::{CommandIndexer, IndexJob, IndexMode, Indexer};

/// Which leaves a metadata pass selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Variant {
    /// Everything except per-target extension repositories.
    Distro,
    /// Only `target/<name>-ext` repositories.
    #[value(name = "ext", alias = "extension")]
    Extension,
    /// Only leaves below an `sdk/` segment.
    Sdk,
}

impl Variant {
    /// Matches against the full leaf path, so a deploy dir that already
    /// points inside an `sdk/` or `target/<name>-ext` tree still selects.
    pub fn selects(self, leaf: &Path) -> bool {
        match self {
            Variant::Distro => !in_extension_repo(leaf),
            Variant::Extension => in_extension_repo(leaf),
            Variant::Sdk => leaf
                .components()
                .any(|c| matches!(c, Component::Normal(s) if s == "sdk")),
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Variant::Distro => "distro",
            Variant::Extension => "ext",
            Variant::Sdk => "sdk",
        })
    }
}

/// True when `path` is, or lies below, a `target/<name>-ext` directory.
pub fn in_extension_repo(path: &Path) -> bool {
    let names: Vec<&std::ffi::OsStr> = path
        .components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s),
            _ => None,
        })
        .collect();
    names.windows(2).any(|w| {
        w[0] == "target"
            && w[1]
                .to_str()
                .map(|n| n.len() > "-ext".len() && n.ends_with("-ext"))
                .unwrap_or(false)
    })
}

#[derive(Debug, Clone)]
pub struct UpdateRequest {
    pub variant: Variant,
    pub deploy_dir: PathBuf,
    /// Accepted and logged; generated metadata does not use it yet.
    pub base_url: Option<String>,
    /// Write indexes under this directory instead of next to the packages.
    pub output_dir: Option<PathBuf>,
    pub package_extensions: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateReport {
    pub indexed: Vec<(PathBuf, IndexMode)>,
    pub failed: Vec<(PathBuf, String)>,
}

impl UpdateReport {
    pub fn ok(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn into_result(self, variant: Variant) -> Result<UpdateReport> {
        if self.ok() {
            return Ok(self);
        }
        let dirs = self
            .failed
            .iter()
            .map(|(p, _)| p.display().to_string())
            .collect::<Vec<_>>()
            .join(", ");
        Err(Error::msg(format!(
            "{variant} metadata failed for {} of {} directories: {dirs}",
            self.failed.len(),
            self.failed.len() + self.indexed.len()
        )))
    }
}

/// Plans the indexer jobs for a request; does not run anything.
pub fn plan_jobs(req: &UpdateRequest) -> Result<Vec<IndexJob>> {
    let deploy_dir = absolute(&req.deploy_dir)?;
    let output_root = req.output_dir.as_deref().map(absolute).transpose()?;

    let leaves = leaf::find_leaves(&deploy_dir, &req.package_extensions)?;
    let mut jobs = Vec::new();
    for rel in leaves {
        let source_dir = deploy_dir.join(&rel);
        if !req.variant.selects(&source_dir) {
            continue;
        }
        let index_dir = match &output_root {
            Some(root) => root.join(&rel),
            None => source_dir.clone(),
        };
        let mode = if index_dir.join(INDEX_DIR_NAME).is_dir() {
            IndexMode::Update
        } else {
            IndexMode::Create
        };
        let (output_dir, location_prefix) = if index_dir == source_dir {
            (None, None)
        } else {
            let prefix = fsutil::slash_path(&fsutil::relative_path(&index_dir, &source_dir));
            (Some(index_dir), Some(prefix).filter(|p| !p.is_empty()))
        };
        jobs.push(IndexJob {
            source_dir,
            output_dir,
            location_prefix,
            mode,
        });
    }
    Ok(jobs)
}

/// Runs the indexer over every selected leaf. Failures are collected and the
/// remaining leaves still get indexed.
pub fn update(req: &UpdateRequest, indexer: &dyn Indexer) -> Result<UpdateReport> {
    if !req.deploy_dir.is_dir() {
        return Err(Error::msg(format!(
            "deploy directory not found: {}",
            req.deploy_dir.display()
        )));
    }
    if let Some(url) = &req.base_url {
        info!("base url '{url}' accepted (not applied to generated metadata)");
    }

    let jobs = plan_jobs(req)?;
    if jobs.is_empty() {
        info!(
            "{} metadata: no qualifying directories under {}; nothing to do",
            req.variant,
            req.deploy_dir.display()
        );
        return Ok(UpdateReport::default());
    }
    info!(
        "{} metadata: {} directories under {}",
        req.variant,
        jobs.len(),
        req.deploy_dir.display()
    );

    let mut report = UpdateReport::default();
    for job in &jobs {
        let shown = job.output_dir.as_ref().unwrap_or(&job.source_dir);
        let res = match &job.output_dir {
            Some(out) => fsutil::ensure_dir(out),
            None => Ok(()),
        };
        match res.and_then(|()| indexer.index(job)) {
            Ok(()) => {
                info!("{} {}", job.mode, shown.display());
                report.indexed.push((job.source_dir.clone(), job.mode));
            }
            Err(e) => {
                error!("{} {} failed: {e}", job.mode, shown.display());
                report.failed.push((job.source_dir.clone(), e.to_string()));
            }
        }
    }
    if !report.ok() {
        warn!(
            "{} metadata: {} of {} directories failed",
            req.variant,
            report.failed.len(),
            jobs.len()
        );
    }
    Ok(report)
}

fn absolute(p: &Path) -> Result<PathBuf> {
    if p.is_absolute() {
        return Ok(p.to_path_buf());
    }
    let cwd = std::env::current_dir().map_err(|e| Error::msg(format!("cwd error: {e}")))?;
    Ok(cwd.join(p))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_repo_detection() {
        assert!(in_extension_repo(Path::new("target/qemux86-64-ext")));
        assert!(in_extension_repo(Path::new("a/target/foo-ext/nested")));
        assert!(!in_extension_repo(Path::new("target/-ext")));
        assert!(!in_extension_repo(Path::new("target/x86_64")));
        assert!(!in_extension_repo(Path::new("foo-ext")));
        assert!(!in_extension_repo(Path::new("other/foo-ext")));
    }

    #[test]
    fn variants_partition_leaves() {
        let ext = Path::new("target/qemu-ext");
        let distro = Path::new("target/x86_64");
        let sdk = Path::new("sdk/x86_64");
        assert!(Variant::Distro.selects(distro) && Variant::Distro.selects(sdk));
        assert!(!Variant::Distro.selects(ext));
        assert!(Variant::Extension.selects(ext) && !Variant::Extension.selects(distro));
        assert!(Variant::Sdk.selects(sdk) && !Variant::Sdk.selects(distro));
        assert!(!Variant::Sdk.selects(Path::new("target/sdkfoo")));
    }

    #[test]
    fn variants_look_above_the_deploy_dir() {
        let ext_leaf = Path::new("/srv/packages/edge/target/qemu-ext");
        let sdk_leaf = Path::new("/srv/packages/edge/sdk/x86_64");
        assert!(Variant::Extension.selects(ext_leaf));
        assert!(!Variant::Distro.selects(ext_leaf));
        assert!(Variant::Sdk.selects(sdk_leaf));
    }
}
