use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeZone};
use regex::Regex;

use crate::error::{Error, Result};
use crate::fsutil;

pub const DEFAULT_RELEASE_PATTERN: &str = r"^dev-\d{8}-\d{6}$";
const RELEASE_ID_FORMAT: &str = "dev-%Y%m%d-%H%M%S";

/// Release ids sort lexicographically in creation order.
pub fn new_release_id<Tz: TimeZone>(now: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    now.format(RELEASE_ID_FORMAT).to_string()
}

/// Lexicographically greatest immediate subdirectory of `base` whose name
/// matches `pattern`.
pub fn latest_release(base: &Path, pattern: &str) -> Result<String> {
    let re = Regex::new(pattern)?;
    if !base.is_dir() {
        return Err(Error::msg(format!(
            "releases directory not found: {}",
            base.display()
        )));
    }
    let entries = fs::read_dir(base)
        .map_err(|e| Error::msg(format!("failed to read dir {}: {e}", base.display())))?;

    let mut latest = None::<String>;
    for entry in entries {
        let entry =
            entry.map_err(|e| Error::msg(format!("failed to read dir {}: {e}", base.display())))?;
        if !entry.path().is_dir() {
            continue;
        }
        let Some(name) = entry.file_name().to_str().map(ToOwned::to_owned) else {
            continue;
        };
        if !re.is_match(&name) {
            continue;
        }
        if latest.as_deref().map(|l| name.as_str() > l).unwrap_or(true) {
            latest = Some(name);
        }
    }

    latest.ok_or_else(|| {
        Error::msg(format!(
            "no release matching '{pattern}' under {}",
            base.display()
        ))
    })
}

/// Creates `<base>/<id>` for a fresh release and returns its path.
pub fn create_release<Tz: TimeZone>(base: &Path, now: &DateTime<Tz>) -> Result<(String, PathBuf)>
where
    Tz::Offset: std::fmt::Display,
{
    let id = new_release_id(now);
    let dir = base.join(&id);
    fsutil::ensure_dir(&dir)?;
    Ok((id, dir))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn picks_greatest_matching_release() {
        let tmp = tempfile::tempdir().expect("tempdir");
        for d in [
            "dev-20240101-120000",
            "dev-20240315-080000",
            "dev-20231231-235959",
            "zzz-not-a-release",
        ] {
            fs::create_dir_all(tmp.path().join(d)).expect("mkdir");
        }
        fs::write(tmp.path().join("dev-20991231-000000"), b"file, not dir").expect("write");

        let got = latest_release(tmp.path(), DEFAULT_RELEASE_PATTERN).expect("latest");
        assert_eq!(got, "dev-20240315-080000");
    }

    #[test]
    fn fails_without_matching_release() {
        let tmp = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(tmp.path().join("scratch")).expect("mkdir");
        let err = latest_release(tmp.path(), DEFAULT_RELEASE_PATTERN)
            .err()
            .expect("no release must fail");
        assert!(err.to_string().contains("no release matching"), "unexpected err: {err}");

        let err = latest_release(&tmp.path().join("missing"), DEFAULT_RELEASE_PATTERN)
            .err()
            .expect("missing base must fail");
        assert!(err.to_string().contains("not found"), "unexpected err: {err}");
    }

    #[test]
    fn new_ids_match_default_pattern() {
        let now = Utc.with_ymd_and_hms(2025, 3, 7, 9, 5, 1).single().expect("valid time");
        let id = new_release_id(&now);
        assert_eq!(id, "dev-20250307-090501");
        assert!(Regex::new(DEFAULT_RELEASE_PATTERN).expect("re").is_match(&id));
    }
}
