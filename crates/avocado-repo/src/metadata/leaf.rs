use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::fsutil::{self, INDEX_DIR_NAME};

/// Deepest package-bearing directories under `root`, as paths relative to
/// `root`, sorted.
///
/// A directory is a leaf when it directly holds a package file and no
/// directory below it does. Index directories are never descended into.
/// Symlinked package files count; symlinked directories are not followed.
pub fn find_leaves(root: &Path, extensions: &[String]) -> Result<Vec<PathBuf>> {
    if !root.is_dir() {
        return Err(Error::msg(format!(
            "package tree not found: {}",
            root.display()
        )));
    }

    let mut bearing = BTreeSet::<PathBuf>::new();
    let walker = walkdir::WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| {
            !(e.depth() > 0 && e.file_type().is_dir() && e.file_name() == INDEX_DIR_NAME)
        });
    for entry in walker {
        let entry = entry?;
        if !entry.path().is_file() || !fsutil::is_package_file(entry.path(), extensions) {
            continue;
        }
        let Some(parent) = entry.path().parent() else {
            continue;
        };
        let rel = parent.strip_prefix(root).map_err(|e| {
            Error::msg(format!(
                "walked outside {} ({}): {e}",
                root.display(),
                parent.display()
            ))
        })?;
        bearing.insert(rel.to_path_buf());
    }

    // Ordered by components, so a directory's descendants sort directly after it.
    let mut leaves = Vec::new();
    let mut it = bearing.iter().peekable();
    while let Some(dir) = it.next() {
        let has_deeper = it.peek().map(|next| next.starts_with(dir)).unwrap_or(false);
        if !has_deeper {
            leaves.push(dir.clone());
        }
    }
    Ok(leaves)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch(p: &Path) {
        fs::create_dir_all(p.parent().expect("parent")).expect("mkdir");
        fs::write(p, b"x").expect("write");
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_packages_are_found() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let root = tmp.path();
        touch(&root.join("pool/kernel.rpm"));
        fs::create_dir_all(root.join("target/x86_64")).expect("mkdir");
        std::os::unix::fs::symlink(
            root.join("pool/kernel.rpm"),
            root.join("target/x86_64/kernel.rpm"),
        )
        .expect("symlink");
        fs::create_dir_all(root.join("target/dangling")).expect("mkdir");
        std::os::unix::fs::symlink(
            root.join("missing.rpm"),
            root.join("target/dangling/gone.rpm"),
        )
        .expect("symlink");

        let exts = fsutil::default_package_extensions();
        let leaves = find_leaves(root, &exts).expect("leaves");
        assert_eq!(
            leaves,
            vec![PathBuf::from("pool"), PathBuf::from("target/x86_64")]
        );
        assert!(fsutil::dir_has_packages(&root.join("target/x86_64"), &exts).expect("check"));
        assert!(!fsutil::dir_has_packages(&root.join("target/dangling"), &exts).expect("check"));
    }

    #[test]
    fn shallower_package_dir_is_not_a_leaf() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let root = tmp.path();
        touch(&root.join("pkgs/x/a.rpm"));
        touch(&root.join("pkgs/x/sub/b.rpm"));
        touch(&root.join("pkgs/y/c.rpm"));
        touch(&root.join("pkgs/x-other/d.rpm"));
        touch(&root.join("pkgs/z/readme.txt"));

        let leaves = find_leaves(root, &fsutil::default_package_extensions()).expect("leaves");
        assert_eq!(
            leaves,
            vec![
                PathBuf::from("pkgs/x/sub"),
                PathBuf::from("pkgs/x-other"),
                PathBuf::from("pkgs/y"),
            ]
        );
    }

    #[test]
    fn index_dirs_are_ignored() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let root = tmp.path();
        touch(&root.join("target/qemu/a.rpm"));
        touch(&root.join("target/qemu/repodata/stale.rpm"));

        let leaves = find_leaves(root, &fsutil::default_package_extensions()).expect("leaves");
        assert_eq!(leaves, vec![PathBuf::from("target/qemu")]);
    }

    #[test]
    fn packages_at_root_make_root_a_leaf() {
        let tmp = tempfile::tempdir().expect("tempdir");
        touch(&tmp.path().join("a.rpm"));
        let leaves =
            find_leaves(tmp.path(), &fsutil::default_package_extensions()).expect("leaves");
        assert_eq!(leaves, vec![PathBuf::new()]);
    }
}
