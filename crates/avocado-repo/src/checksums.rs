//! SHA-256 digests for every package file in a tree.
//!
//! Hashing fans out over worker threads; each worker writes its own result
//! file and the merge into `SHA256SUMS` happens on the calling thread only.

use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc;

use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::fsutil::{self, INDEX_DIR_NAME};

pub const DEFAULT_SUMS_FILE: &str = "SHA256SUMS";

#[derive(Debug, Clone)]
pub struct ChecksumRequest {
    pub root: PathBuf,
    /// Defaults to `<root>/SHA256SUMS`.
    pub output: Option<PathBuf>,
    /// 0 = CPU count.
    pub jobs: usize,
    pub package_extensions: Vec<String>,
}

pub fn sha256_file_hex(path: &Path) -> Result<String> {
    use sha2::{Digest, Sha256};

    let mut file = fs::File::open(path)
        .map_err(|e| Error::msg(format!("failed to open {}: {e}", path.display())))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 1024 * 256];
    loop {
        let n = file
            .read(&mut buf)
            .map_err(|e| Error::msg(format!("failed to read {}: {e}", path.display())))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

fn collect_packages(root: &Path, extensions: &[String]) -> Result<Vec<PathBuf>> {
    if !root.is_dir() {
        return Err(Error::msg(format!(
            "package tree not found: {}",
            root.display()
        )));
    }
    let mut out = Vec::new();
    let walker = walkdir::WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| {
            !(e.depth() > 0 && e.file_type().is_dir() && e.file_name() == INDEX_DIR_NAME)
        });
    for entry in walker {
        let entry = entry?;
        if entry.path().is_file() && fsutil::is_package_file(entry.path(), extensions) {
            let rel = entry.path().strip_prefix(root).map_err(|e| {
                Error::msg(format!("walked outside {}: {e}", root.display()))
            })?;
            out.push(rel.to_path_buf());
        }
    }
    Ok(out)
}

fn worker(root: &Path, files: &[PathBuf], result_file: &Path) -> Result<()> {
    let mut f = fs::File::create(result_file).map_err(|e| {
        Error::msg(format!("failed to create {}: {e}", result_file.display()))
    })?;
    for rel in files {
        let digest = sha256_file_hex(&root.join(rel))?;
        writeln!(f, "{digest}  {}", fsutil::slash_path(rel)).map_err(|e| {
            Error::msg(format!("failed to write {}: {e}", result_file.display()))
        })?;
    }
    Ok(())
}

/// Returns the output path and the number of files hashed.
pub fn write_checksums(req: &ChecksumRequest) -> Result<(PathBuf, usize)> {
    let files = collect_packages(&req.root, &req.package_extensions)?;
    let output = req
        .output
        .clone()
        .unwrap_or_else(|| req.root.join(DEFAULT_SUMS_FILE));

    let jobs = if req.jobs == 0 {
        num_cpus::get().max(1)
    } else {
        req.jobs
    };
    let jobs = jobs.min(files.len()).max(1);
    let chunk = files.len().div_ceil(jobs).max(1);

    let scratch = tempfile::tempdir()
        .map_err(|e| Error::msg(format!("failed to create temp dir: {e}")))?;
    let root = req.root.clone();

    let (tx, rx) = mpsc::channel::<(usize, Result<()>)>();
    let mut handles = Vec::new();
    let mut result_files = Vec::new();
    for (i, part) in files.chunks(chunk).enumerate() {
        let part = part.to_vec();
        let result_file = scratch.path().join(format!("worker-{i}.sums"));
        result_files.push(result_file.clone());
        let root = root.clone();
        let tx = tx.clone();
        handles.push(std::thread::spawn(move || {
            let r = worker(&root, &part, &result_file);
            let _ = tx.send((i, r));
        }));
    }
    drop(tx);
    debug!("hashing {} files with {} workers", files.len(), handles.len());

    let mut first_err = None::<Error>;
    for (i, r) in rx {
        if let Err(e) = r
            && first_err.is_none()
        {
            first_err = Some(e.context(format!("checksum worker {i}")));
        }
    }
    for h in handles {
        if h.join().is_err() && first_err.is_none() {
            first_err = Some(Error::msg("checksum worker panicked"));
        }
    }
    if let Some(e) = first_err {
        return Err(e);
    }

    let mut lines = Vec::<(String, String)>::new();
    for rf in &result_files {
        for line in fsutil::read_text(rf)?.lines() {
            let Some((digest, path)) = line.split_once("  ") else {
                return Err(Error::msg(format!("corrupt worker output in {}", rf.display())));
            };
            lines.push((path.to_string(), digest.to_string()));
        }
    }
    lines.sort();

    let mut body = String::new();
    for (path, digest) in &lines {
        body.push_str(&format!("{digest}  {path}\n"));
    }
    fsutil::atomic_write_text(&output, &body)?;
    info!("{} checksums -> {}", lines.len(), output.display());
    Ok((output, lines.len()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_of_known_content() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let p = tmp.path().join("a.rpm");
        fs::write(&p, b"abc").expect("write");
        assert_eq!(
            sha256_file_hex(&p).expect("hash"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
