//! Config-driven publish: fragments for every target, then the manifest,
//! then repository metadata.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use serde::Deserialize;
use tracing::{error, info};

use crate::config::ConfigDoc;
use crate::error::{Error, Result};
use crate::fragment::{self, GenerateRequest};
use crate::fsutil;
use crate::layout::{RepoConfig, RepoLayout};
use crate::manifest::{self, AggregateRequest, MANIFEST_FILE};
use crate::metadata::{self, CommandIndexer, Indexer, UpdateRequest, Variant};
use crate::release::{self, DEFAULT_RELEASE_PATTERN};

pub const ENV_DEPLOY_DIR: &str = "AVOCADO_DEPLOY_DIR";
pub const ENV_CODENAME: &str = "AVOCADO_CODENAME";
pub const ENV_RELEASE: &str = "AVOCADO_RELEASE";

fn default_true() -> bool {
    true
}

/// `[targets.<name>]`
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct TargetConfig {
    /// Deploy directory of the target's package build, relative to `repo.root_dir`.
    pub source_dir: String,
    /// Defaults to `repo.codename`.
    pub releasever: Option<String>,
    pub map_file: Option<String>,
}

/// `[indexer]`
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IndexerConfig {
    pub program: String,
    pub args: Vec<String>,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            program: metadata::indexer::DEFAULT_INDEXER.into(),
            args: Vec::new(),
        }
    }
}

/// `[release]`
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReleaseConfig {
    pub pattern: String,
}

impl Default for ReleaseConfig {
    fn default() -> Self {
        Self {
            pattern: DEFAULT_RELEASE_PATTERN.into(),
        }
    }
}

/// `[metadata]`
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetadataConfig {
    #[serde(default = "default_true")]
    pub distro: bool,
    #[serde(default = "default_true")]
    pub ext: bool,
    /// Off by default: distro already indexes every `sdk/` leaf.
    pub sdk: bool,
    pub base_url: Option<String>,
    /// Index next to the packages instead of under the release directory.
    pub in_place: bool,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            distro: true,
            ext: true,
            sdk: false,
            base_url: None,
            in_place: false,
        }
    }
}

impl MetadataConfig {
    pub fn variants(&self) -> Vec<Variant> {
        let mut out = Vec::new();
        if self.distro {
            out.push(Variant::Distro);
        }
        if self.ext {
            out.push(Variant::Extension);
        }
        if self.sdk {
            out.push(Variant::Sdk);
        }
        out
    }
}

#[derive(Debug, Clone)]
pub struct PublishConfig {
    pub repo: RepoConfig,
    pub targets: BTreeMap<String, TargetConfig>,
    pub indexer: IndexerConfig,
    pub release: ReleaseConfig,
    pub metadata: MetadataConfig,
    pub layout: RepoLayout,
}

fn non_empty(s: &str) -> Option<String> {
    Some(s.trim().to_string()).filter(|s| !s.is_empty())
}

impl PublishConfig {
    pub fn from_doc(doc: &ConfigDoc) -> Result<Self> {
        Self::from_doc_with_env(doc, |k| std::env::var(k).ok())
    }

    /// Empty `repo.deploy_dir`, `repo.codename` and `repo.release` fall back
    /// to `env`.
    pub fn from_doc_with_env<F>(doc: &ConfigDoc, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut repo: RepoConfig = doc.deserialize_path("repo")?.unwrap_or_default();
        let env_or = |literal: &str, key: &str| {
            non_empty(literal).or_else(|| env(key).as_deref().and_then(non_empty))
        };
        repo.deploy_dir = env_or(&repo.deploy_dir, ENV_DEPLOY_DIR).ok_or_else(|| {
            Error::msg(format!("repo.deploy_dir is empty (also checked {ENV_DEPLOY_DIR})"))
        })?;
        repo.codename = env_or(&repo.codename, ENV_CODENAME).unwrap_or_default();
        repo.release = env_or(&repo.release, ENV_RELEASE).unwrap_or_else(|| "new".into());
        if repo.package_extensions.is_empty() {
            return Err(Error::msg("repo.package_extensions is empty"));
        }

        let targets: BTreeMap<String, TargetConfig> =
            doc.deserialize_path("targets")?.unwrap_or_default();
        if targets.is_empty() {
            return Err(Error::msg("no [targets.<name>] configured"));
        }
        for (name, t) in &targets {
            fragment::validate_target_name(name)?;
            if t.source_dir.trim().is_empty() {
                return Err(Error::msg(format!("targets.{name}.source_dir is empty")));
            }
        }

        let indexer: IndexerConfig = doc.deserialize_path("indexer")?.unwrap_or_default();
        if indexer.program.trim().is_empty() {
            return Err(Error::msg("indexer.program is empty"));
        }
        let release: ReleaseConfig = doc.deserialize_path("release")?.unwrap_or_default();
        regex::Regex::new(&release.pattern).map_err(|e| {
            Error::msg(format!("release.pattern '{}' is invalid: {e}", release.pattern))
        })?;
        let metadata: MetadataConfig = doc.deserialize_path("metadata")?.unwrap_or_default();

        let layout = RepoLayout::resolve(
            &doc.base_dir(),
            &repo.root_dir,
            &repo.deploy_dir,
            &repo.codename,
            &repo.fragments_dir,
        )?;

        Ok(Self {
            repo,
            targets,
            indexer,
            release,
            metadata,
            layout,
        })
    }

    pub fn command_indexer(&self) -> CommandIndexer {
        CommandIndexer::new(self.indexer.program.clone(), self.indexer.args.clone())
    }
}

#[derive(Debug, Clone, Default)]
pub struct PublishReport {
    pub release_id: String,
    pub release_dir: PathBuf,
    pub fragments: Vec<PathBuf>,
    pub manifest: Option<PathBuf>,
    pub indexed: usize,
    pub failed_variants: Vec<Variant>,
}

/// Release id, its directory, and whether this run must create it.
fn resolve_release(cfg: &PublishConfig) -> Result<(String, PathBuf, bool)> {
    let base = &cfg.layout.releases_base;
    match cfg.repo.release.as_str() {
        "new" => {
            let id = release::new_release_id(&chrono::Utc::now());
            let dir = cfg.layout.release_dir(&id);
            Ok((id, dir, true))
        }
        "latest" => {
            let id = release::latest_release(base, &cfg.release.pattern)?;
            let dir = cfg.layout.release_dir(&id);
            Ok((id, dir, false))
        }
        explicit => {
            fsutil::validate_rel_like_path(explicit)
                .map_err(|e| e.context("repo.release"))?;
            Ok((explicit.to_string(), cfg.layout.release_dir(explicit), false))
        }
    }
}

pub fn run(cfg: &PublishConfig, indexer: &dyn Indexer, dry_run: bool) -> Result<PublishReport> {
    let (release_id, release_dir, fresh) = resolve_release(cfg)?;
    info!("publishing release {release_id} -> {}", release_dir.display());

    let mut report = PublishReport {
        release_id,
        release_dir: release_dir.clone(),
        ..Default::default()
    };

    // All fragments must exist before the manifest is aggregated.
    for (name, t) in &cfg.targets {
        let req = GenerateRequest {
            source_dir: cfg.layout.root.join(t.source_dir.trim()),
            target: name.clone(),
            output_dir: cfg.layout.fragments_dir.clone(),
            releasever: t
                .releasever
                .clone()
                .unwrap_or_else(|| cfg.repo.codename.clone()),
            map_file: t.map_file.as_deref().map(|m| cfg.layout.root.join(m)),
            package_extensions: cfg.repo.package_extensions.clone(),
        };
        if dry_run {
            let f = fragment::build(&req)?;
            info!("DRY-RUN: fragment {} {:?}", f.target, f.repos);
            continue;
        }
        report.fragments.push(fragment::generate(&req)?);
    }

    let output = release_dir.join(MANIFEST_FILE);
    let persistent = cfg
        .repo
        .persistent_manifest
        .then(|| cfg.layout.persistent_manifest());
    if dry_run {
        info!("DRY-RUN: aggregate {} -> {}", cfg.layout.fragments_dir.display(), output.display());
    } else {
        // A new release directory never outlives a failed manifest write.
        let created = fresh && !release_dir.exists();
        if created {
            fsutil::ensure_dir(&release_dir)?;
        }
        let res = manifest::aggregate(&AggregateRequest {
            fragments_dir: cfg.layout.fragments_dir.clone(),
            output: output.clone(),
            existing: persistent.clone().filter(|p| p.is_file()),
            persist: persistent,
        });
        if let Err(e) = res {
            if created && let Err(rm) = fs::remove_dir_all(&release_dir) {
                error!("failed to remove {}: {rm}", release_dir.display());
            }
            return Err(e);
        }
        report.manifest = Some(output);
    }

    if !cfg.layout.packages_dir.is_dir() {
        info!(
            "no package tree at {}; skipping metadata",
            cfg.layout.packages_dir.display()
        );
        return Ok(report);
    }

    for variant in cfg.metadata.variants() {
        let req = UpdateRequest {
            variant,
            deploy_dir: cfg.layout.packages_dir.clone(),
            base_url: cfg.metadata.base_url.clone(),
            output_dir: (!cfg.metadata.in_place).then(|| release_dir.clone()),
            package_extensions: cfg.repo.package_extensions.clone(),
        };
        if dry_run {
            for job in metadata::plan_jobs(&req)? {
                info!("DRY-RUN: {variant} {} {}", job.mode, job.source_dir.display());
            }
            continue;
        }
        match metadata::update(&req, indexer).and_then(|r| r.into_result(variant)) {
            Ok(r) => report.indexed += r.indexed.len(),
            Err(e) => {
                error!("{e}");
                report.failed_variants.push(variant);
            }
        }
    }

    if !report.failed_variants.is_empty() {
        let names = report
            .failed_variants
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        return Err(Error::msg(format!(
            "publish of {} incomplete; metadata failed for: {names}",
            report.release_id
        )));
    }
    info!(
        "release {} published: {} fragments, {} indexed directories",
        report.release_id,
        report.fragments.len(),
        report.indexed
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(src: &str) -> ConfigDoc {
        ConfigDoc::parse_str("/etc/avocado/repo.toml", src).expect("valid toml")
    }

    #[test]
    fn env_fills_empty_fields() {
        let d = doc(
            r#"
[repo]
release = ""

[targets.qemux86-64]
source_dir = "deploy/qemux86-64"
"#,
        );
        let cfg = PublishConfig::from_doc_with_env(&d, |k| match k {
            ENV_DEPLOY_DIR => Some("/srv/repo".into()),
            ENV_CODENAME => Some("latest/apollo/edge".into()),
            ENV_RELEASE => Some("latest".into()),
            _ => None,
        })
        .expect("config");
        assert_eq!(cfg.repo.deploy_dir, "/srv/repo");
        assert_eq!(cfg.repo.release, "latest");
        assert_eq!(
            cfg.layout.packages_dir,
            PathBuf::from("/srv/repo/packages/latest/apollo/edge")
        );
        assert_eq!(
            cfg.metadata.variants(),
            [Variant::Distro, Variant::Extension]
        );
        assert_eq!(cfg.indexer.program, "createrepo_c");
    }

    #[test]
    fn literal_wins_over_env() {
        let d = doc(
            r#"
[repo]
deploy_dir = "/data/deploy"
codename = "edge"

[targets.rpi4]
source_dir = "rpi4"
"#,
        );
        let cfg = PublishConfig::from_doc_with_env(&d, |_| Some("/ignored".into()))
            .expect("config");
        assert_eq!(cfg.layout.deploy_dir, PathBuf::from("/data/deploy"));
        assert_eq!(cfg.repo.release, "new");
    }

    #[test]
    fn rejects_missing_targets_and_deploy_dir() {
        let err = PublishConfig::from_doc_with_env(&doc("[repo]\ncodename = \"edge\"\n"), |_| None)
            .err()
            .expect("must fail");
        assert!(err.to_string().contains("deploy_dir"), "unexpected err: {err}");

        let err = PublishConfig::from_doc_with_env(
            &doc("[repo]\ndeploy_dir = \"/d\"\ncodename = \"edge\"\n"),
            |_| None,
        )
        .err()
        .expect("must fail");
        assert!(err.to_string().contains("targets"), "unexpected err: {err}");
    }

    #[test]
    fn rejects_invalid_release_pattern() {
        let err = PublishConfig::from_doc_with_env(
            &doc(
                "[repo]\ndeploy_dir = \"/d\"\ncodename = \"edge\"\n[targets.a]\nsource_dir = \"a\"\n[release]\npattern = \"(\"\n",
            ),
            |_| None,
        )
        .err()
        .expect("must fail");
        assert!(err.to_string().contains("release.pattern"), "unexpected err: {err}");
    }
}
