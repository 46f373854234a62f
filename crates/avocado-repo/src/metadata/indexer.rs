use std::fmt;
use std::io::{BufRead, BufReader, Read};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::mpsc;

use tracing::debug;

use crate::error::{Error, Result};
use crate::metadata::output::clean_line;

pub const DEFAULT_INDEXER: &str = "createrepo_c";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexMode {
    Create,
    Update,
}

impl fmt::Display for IndexMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            IndexMode::Create => "create",
            IndexMode::Update => "update",
        })
    }
}

/// One indexer invocation over one leaf directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexJob {
    /// Directory holding the packages.
    pub source_dir: PathBuf,
    /// Directory that receives `repodata/`; `None` means in place.
    pub output_dir: Option<PathBuf>,
    /// Package location prefix relative to `output_dir`.
    pub location_prefix: Option<String>,
    pub mode: IndexMode,
}

pub trait Indexer {
    fn index(&self, job: &IndexJob) -> Result<()>;
}

/// Runs an external `createrepo_c`-compatible program.
#[derive(Debug, Clone)]
pub struct CommandIndexer {
    pub program: String,
    pub extra_args: Vec<String>,
}

impl Default for CommandIndexer {
    fn default() -> Self {
        Self {
            program: DEFAULT_INDEXER.into(),
            extra_args: Vec::new(),
        }
    }
}

impl CommandIndexer {
    pub fn new(program: impl Into<String>, extra_args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            extra_args,
        }
    }

    pub fn command(&self, job: &IndexJob) -> Command {
        let mut cmd = Command::new(&self.program);
        if job.mode == IndexMode::Update {
            cmd.arg("--update");
        }
        if let Some(out) = &job.output_dir {
            cmd.arg("--outputdir").arg(out);
        }
        if let Some(prefix) = job.location_prefix.as_deref().filter(|p| !p.is_empty()) {
            cmd.arg("--location-prefix").arg(prefix);
        }
        cmd.args(&self.extra_args);
        cmd.arg(&job.source_dir);
        cmd
    }
}

impl Indexer for CommandIndexer {
    fn index(&self, job: &IndexJob) -> Result<()> {
        let mut cmd = self.command(job);
        debug!("exec: {:?}", cmd);

        let mut child = cmd
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::msg(format!("failed to spawn {}: {e}", self.program)))?;

        let (tx, rx) = mpsc::channel::<String>();
        let mut readers = Vec::new();
        if let Some(out) = child.stdout.take() {
            let tx = tx.clone();
            readers.push(std::thread::spawn(move || forward_lines(out, tx)));
        }
        if let Some(err) = child.stderr.take() {
            let tx = tx.clone();
            readers.push(std::thread::spawn(move || forward_lines(err, tx)));
        }
        drop(tx);

        let mut last_line = None::<String>;
        for line in rx {
            let line = clean_line(&line);
            if line.is_empty() {
                continue;
            }
            debug!(target: "avocado_repo::indexer", "{line}");
            last_line = Some(line);
        }
        for r in readers {
            let _ = r.join();
        }

        let status = child
            .wait()
            .map_err(|e| Error::msg(format!("wait for {} failed: {e}", self.program)))?;
        if !status.success() {
            return Err(Error::msg(match last_line {
                Some(l) => format!("{} {} failed: {status}: {l}", self.program, job.mode),
                None => format!("{} {} failed: {status}", self.program, job.mode),
            }));
        }
        Ok(())
    }
}

fn forward_lines<R: Read>(reader: R, tx: mpsc::Sender<String>) {
    let mut r = BufReader::new(reader);
    let mut buf = Vec::with_capacity(1024);
    loop {
        buf.clear();
        match r.read_until(b'\n', &mut buf) {
            Ok(0) | Err(_) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf).into_owned();
                if tx.send(line).is_err() {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(mode: IndexMode, out: Option<&str>, prefix: Option<&str>) -> IndexJob {
        IndexJob {
            source_dir: PathBuf::from("/deploy/packages/target/qemu"),
            output_dir: out.map(PathBuf::from),
            location_prefix: prefix.map(ToOwned::to_owned),
            mode,
        }
    }

    fn argv(cmd: &Command) -> Vec<String> {
        cmd.get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn create_in_place_has_no_extra_flags() {
        let idx = CommandIndexer::default();
        let cmd = idx.command(&job(IndexMode::Create, None, None));
        assert_eq!(cmd.get_program(), DEFAULT_INDEXER);
        assert_eq!(argv(&cmd), ["/deploy/packages/target/qemu"]);
    }

    #[test]
    fn update_with_output_and_prefix() {
        let idx = CommandIndexer::new("createrepo_c", vec!["--quiet".into()]);
        let cmd = idx.command(&job(
            IndexMode::Update,
            Some("/rel/target/qemu"),
            Some("../../../packages/target/qemu"),
        ));
        assert_eq!(
            argv(&cmd),
            [
                "--update",
                "--outputdir",
                "/rel/target/qemu",
                "--location-prefix",
                "../../../packages/target/qemu",
                "--quiet",
                "/deploy/packages/target/qemu",
            ]
        );
    }

    #[cfg(unix)]
    #[test]
    fn nonzero_exit_is_an_error() {
        let idx = CommandIndexer::new("false", Vec::new());
        let err = idx
            .index(&job(IndexMode::Create, None, None))
            .err()
            .expect("false must fail");
        assert!(err.to_string().contains("false create failed"), "unexpected err: {err}");
    }

    #[cfg(unix)]
    #[test]
    fn zero_exit_is_success() {
        let idx = CommandIndexer::new("true", Vec::new());
        idx.index(&job(IndexMode::Update, None, None)).expect("true succeeds");
    }

    #[test]
    fn missing_program_fails_to_spawn() {
        let idx = CommandIndexer::new("avocado-repo-no-such-indexer", Vec::new());
        let err = idx
            .index(&job(IndexMode::Create, None, None))
            .err()
            .expect("spawn must fail");
        assert!(err.to_string().contains("failed to spawn"), "unexpected err: {err}");
    }
}
