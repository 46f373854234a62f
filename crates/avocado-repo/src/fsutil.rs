use std::fs;
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, Instant};

use crate::error::{Error, Result};

pub const DEFAULT_PACKAGE_EXTENSIONS: &[&str] = &["rpm"];
pub const INDEX_DIR_NAME: &str = "repodata";

pub fn default_package_extensions() -> Vec<String> {
    DEFAULT_PACKAGE_EXTENSIONS
        .iter()
        .map(|s| s.to_string())
        .collect()
}

pub fn is_package_file(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|s| s.to_str())
        .map(|ext| extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
        .unwrap_or(false)
}

/// True when `dir` directly (non-recursively) holds at least one package file.
/// Symlinks to package files count.
pub fn dir_has_packages(dir: &Path, extensions: &[String]) -> Result<bool> {
    if !dir.is_dir() {
        return Ok(false);
    }
    let entries = fs::read_dir(dir)
        .map_err(|e| Error::msg(format!("failed to read dir {}: {e}", dir.display())))?;
    for entry in entries {
        let entry =
            entry.map_err(|e| Error::msg(format!("failed to read dir {}: {e}", dir.display())))?;
        let path = entry.path();
        if path.is_file() && is_package_file(&path, extensions) {
            return Ok(true);
        }
    }
    Ok(false)
}

pub fn ensure_dir(p: &Path) -> Result<()> {
    fs::create_dir_all(p)
        .map_err(|e| Error::msg(format!("failed to create dir {}: {e}", p.display())))
}

pub fn read_text(p: &Path) -> Result<String> {
    fs::read_to_string(p).map_err(|e| Error::msg(format!("failed to read {}: {e}", p.display())))
}

// Readers never observe a partially written file: the body lands in a
// sibling temp file first and is renamed over the destination.
pub fn atomic_write_text(path: &Path, body: &str) -> Result<()> {
    let tmp = tmp_sibling(path)?;
    fs::write(&tmp, body)
        .map_err(|e| Error::msg(format!("failed to write temp file {}: {e}", tmp.display())))?;
    commit_tmp(&tmp, path)
}

pub fn tmp_sibling(path: &Path) -> Result<PathBuf> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }
    let file_name = path.file_name().and_then(|s| s.to_str()).ok_or_else(|| {
        Error::msg(format!(
            "invalid file path for atomic write: {}",
            path.display()
        ))
    })?;
    Ok(path.with_file_name(format!(
        ".{}.tmp.{}.{}",
        file_name,
        std::process::id(),
        chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
    )))
}

pub fn commit_tmp(tmp: &Path, path: &Path) -> Result<()> {
    fs::rename(tmp, path).map_err(|e| {
        let _ = fs::remove_file(tmp);
        Error::msg(format!(
            "failed to rename {} -> {}: {e}",
            tmp.display(),
            path.display()
        ))
    })
}

pub struct FileLock {
    path: PathBuf,
}

impl FileLock {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

/// Lock file guarding `target` (`.<name>.lock` next to it).
pub fn lock_path_for(target: &Path) -> Result<PathBuf> {
    let file_name = target.file_name().and_then(|s| s.to_str()).ok_or_else(|| {
        Error::msg(format!("invalid file path for lock: {}", target.display()))
    })?;
    Ok(target.with_file_name(format!(".{file_name}.lock")))
}

pub fn acquire_lock(target: &Path, timeout: Duration) -> Result<FileLock> {
    let path = lock_path_for(target)?;
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }
    let deadline = Instant::now() + timeout;
    loop {
        match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(_) => return Ok(FileLock { path }),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                if Instant::now() >= deadline {
                    return Err(Error::msg(format!(
                        "timed out waiting for lock {} (another aggregation running?)",
                        path.display()
                    )));
                }
                std::thread::sleep(Duration::from_millis(50));
            }
            Err(e) => {
                return Err(Error::msg(format!(
                    "failed to acquire lock {}: {e}",
                    path.display()
                )));
            }
        }
    }
}

/// Lexical relative path from `base` to `target`. Both must be absolute or
/// both relative; no filesystem access.
pub fn relative_path(base: &Path, target: &Path) -> PathBuf {
    let base: Vec<Component<'_>> = base
        .components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect();
    let target: Vec<Component<'_>> = target
        .components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect();
    let common = base
        .iter()
        .zip(target.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut out = PathBuf::new();
    for _ in common..base.len() {
        out.push("..");
    }
    for c in &target[common..] {
        out.push(c.as_os_str());
    }
    out
}

/// Joins path components with `/` regardless of platform; used for paths
/// that end up in JSON or on indexer command lines.
pub fn slash_path(p: &Path) -> String {
    p.components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
            Component::ParentDir => Some("..".into()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

pub fn validate_rel_like_path(p: &str) -> Result<()> {
    let path = p.trim();
    if path.is_empty() {
        return Err(Error::msg("path is empty"));
    }
    let pb = Path::new(path);
    if pb.components().any(|c| matches!(c, Component::ParentDir)) {
        return Err(Error::msg(format!("path '{}' contains '..'", path)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_path_walks_up_and_down() {
        assert_eq!(
            relative_path(Path::new("/r/out/target/x"), Path::new("/r/pkgs/target/x")),
            PathBuf::from("../../../pkgs/target/x")
        );
        assert_eq!(
            relative_path(Path::new("/r/a"), Path::new("/r/a")),
            PathBuf::new()
        );
        assert_eq!(
            relative_path(Path::new("/r"), Path::new("/r/a/b")),
            PathBuf::from("a/b")
        );
    }

    #[test]
    fn package_extension_match_is_case_insensitive() {
        let exts = default_package_extensions();
        assert!(is_package_file(Path::new("foo-1.0.x86_64.rpm"), &exts));
        assert!(is_package_file(Path::new("FOO.RPM"), &exts));
        assert!(!is_package_file(Path::new("foo.rpm.sig"), &exts));
        assert!(!is_package_file(Path::new("rpm"), &exts));
    }

    #[test]
    fn atomic_write_leaves_no_temp_files() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let p = tmp.path().join("nested/out.json");
        atomic_write_text(&p, "{}").expect("write");
        atomic_write_text(&p, "{\"a\":[]}").expect("overwrite");
        assert_eq!(fs::read_to_string(&p).expect("read"), "{\"a\":[]}");
        let names: Vec<_> = fs::read_dir(p.parent().expect("parent"))
            .expect("read_dir")
            .map(|e| e.expect("entry").file_name())
            .collect();
        assert_eq!(names.len(), 1, "unexpected leftovers: {names:?}");
    }

    #[test]
    fn lock_is_exclusive_until_dropped() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let target = tmp.path().join("targets.json");
        let lock = acquire_lock(&target, Duration::from_millis(100)).expect("first lock");
        assert!(lock.path().is_file());
        let err = acquire_lock(&target, Duration::from_millis(100))
            .err()
            .expect("second lock must time out");
        assert!(err.to_string().contains("timed out"), "unexpected err: {err}");
        drop(lock);
        acquire_lock(&target, Duration::from_millis(100)).expect("lock after release");
    }
}
