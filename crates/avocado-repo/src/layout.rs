use std::path::{Component, Path, PathBuf};

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::fsutil;

fn default_root_dir() -> String {
    ".".into()
}

fn default_fragments_dir() -> String {
    "staging/fragments".into()
}

fn default_release() -> String {
    "new".into()
}

fn default_true() -> bool {
    true
}

/// `[repo]`
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RepoConfig {
    /// Base for every relative path below; relative to the config file.
    #[serde(default = "default_root_dir")]
    pub root_dir: String,
    /// Empty means `$AVOCADO_DEPLOY_DIR`.
    pub deploy_dir: String,
    /// Empty means `$AVOCADO_CODENAME`.
    pub codename: String,
    /// `new`, `latest`, or an explicit release id. Empty means `$AVOCADO_RELEASE`.
    #[serde(default = "default_release")]
    pub release: String,
    #[serde(default = "default_fragments_dir")]
    pub fragments_dir: String,
    pub package_extensions: Vec<String>,
    /// Keep `releases/<codename>/targets.json` in sync with each release.
    #[serde(default = "default_true")]
    pub persistent_manifest: bool,
}

impl Default for RepoConfig {
    fn default() -> Self {
        Self {
            root_dir: default_root_dir(),
            deploy_dir: String::new(),
            codename: String::new(),
            release: default_release(),
            fragments_dir: default_fragments_dir(),
            package_extensions: fsutil::default_package_extensions(),
            persistent_manifest: true,
        }
    }
}

/// Resolved on-disk locations of one codename's repository.
///
/// ```text
/// <deploy>/packages/<codename>/...        package trees
/// <deploy>/releases/<codename>/<release>/  per-release metadata
/// <deploy>/releases/<codename>/targets.json
/// <deploy>/<fragments_dir>/*-fragment.json
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoLayout {
    pub root: PathBuf,
    pub deploy_dir: PathBuf,
    pub packages_dir: PathBuf,
    pub releases_base: PathBuf,
    pub fragments_dir: PathBuf,
}

impl RepoLayout {
    pub fn resolve(
        base: &Path,
        root_dir: &str,
        deploy_dir: &str,
        codename: &str,
        fragments_dir: &str,
    ) -> Result<Self> {
        let root = resolve_user_path(base, root_dir).map_err(|e| e.context("repo.root_dir"))?;
        let deploy_dir =
            resolve_user_path(&root, deploy_dir).map_err(|e| e.context("repo.deploy_dir"))?;
        let codename = codename.trim().trim_matches('/');
        reject_parent(codename).map_err(|e| e.context("repo.codename"))?;
        if codename.is_empty() {
            return Err(Error::msg("repo.codename is empty (also checked AVOCADO_CODENAME)"));
        }
        reject_parent(fragments_dir).map_err(|e| e.context("repo.fragments_dir"))?;
        let fragments_dir = resolve_user_path(&deploy_dir, fragments_dir)
            .map_err(|e| e.context("repo.fragments_dir"))?;

        Ok(Self {
            packages_dir: deploy_dir.join("packages").join(codename),
            releases_base: deploy_dir.join("releases").join(codename),
            root,
            deploy_dir,
            fragments_dir,
        })
    }

    pub fn release_dir(&self, id: &str) -> PathBuf {
        self.releases_base.join(id)
    }

    pub fn persistent_manifest(&self) -> PathBuf {
        self.releases_base.join(crate::manifest::MANIFEST_FILE)
    }
}

fn resolve_user_path(base: &Path, p: &str) -> Result<PathBuf> {
    let p = p.trim();
    if p.is_empty() {
        return Err(Error::msg("empty path"));
    }
    let pb = PathBuf::from(p);
    Ok(if pb.is_absolute() { pb } else { base.join(pb) })
}

fn reject_parent(p: &str) -> Result<()> {
    if Path::new(p.trim())
        .components()
        .any(|c| matches!(c, Component::ParentDir))
    {
        return Err(Error::msg(format!("invalid path '{}' (contains '..')", p.trim())));
    }
    Ok(())
}
