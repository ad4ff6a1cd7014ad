//! Git-native epistemic persistence.
//!
//! Findings, goals, phase records, cascade logs, and inter-agent messages
//! live in namespaced git note refs (`refs/notes/empirica/...`). The ref
//! name is the stable public id; the blob content is the single source of
//! truth — the read path never trusts a database cache when a note exists.

pub mod message_store;
pub mod notes;

use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;

use crate::domain::errors::{KernelError, KernelResult};

pub use message_store::MessageStore;
pub use notes::{GitNotesStore, Namespace};

/// Short timeout for cheap plumbing (rev-parse, update-ref).
pub(crate) const SHORT_TIMEOUT: Duration = Duration::from_secs(10);
/// Longer timeout for enumeration and content reads.
pub(crate) const READ_TIMEOUT: Duration = Duration::from_secs(60);

/// Run a git command in `workdir` under a hard deadline.
///
/// Every suspension point in the git store goes through here; no git call
/// may block indefinitely.
pub(crate) async fn run_git(
    workdir: &Path,
    args: &[&str],
    timeout: Duration,
) -> KernelResult<String> {
    let output = tokio::time::timeout(
        timeout,
        Command::new("git").args(args).current_dir(workdir).output(),
    )
    .await
    .map_err(|_| KernelError::Timeout(timeout))?
    .map_err(|e| KernelError::Git(format!("failed to spawn git: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(KernelError::Git(format!(
            "git {} failed: {}",
            args.first().unwrap_or(&""),
            stderr.trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

/// Handle to a git repository used for note storage.
#[derive(Debug, Clone)]
pub struct GitWorkspace {
    workdir: PathBuf,
}

impl GitWorkspace {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Whether the directory is inside a git repository.
    pub async fn is_git_repo(&self) -> bool {
        run_git(&self.workdir, &["rev-parse", "--git-dir"], SHORT_TIMEOUT)
            .await
            .is_ok()
    }

    /// Current HEAD commit, if the repo has any commits.
    pub async fn head_commit(&self) -> KernelResult<String> {
        let out = run_git(&self.workdir, &["rev-parse", "HEAD"], SHORT_TIMEOUT).await?;
        Ok(out.trim().to_string())
    }

    /// Attach (force-overwrite) a note at the given ref on HEAD.
    pub async fn write_note(&self, note_ref: &str, payload: &str) -> KernelResult<()> {
        let head = self.head_commit().await?;
        run_git(
            &self.workdir,
            &[
                "notes",
                &format!("--ref={note_ref}"),
                "add",
                "-f",
                "-m",
                payload,
                &head,
            ],
            SHORT_TIMEOUT,
        )
        .await?;
        Ok(())
    }

    /// List full ref names under a prefix via `for-each-ref`.
    pub async fn list_refs(&self, prefix: &str) -> KernelResult<Vec<String>> {
        let out = run_git(
            &self.workdir,
            &["for-each-ref", prefix, "--format=%(refname)"],
            READ_TIMEOUT,
        )
        .await?;
        Ok(out
            .lines()
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect())
    }

    /// Read the blob content behind a note ref using plumbing only:
    /// `cat-file -p <ref>` → commit, walk to its tree, take the first blob.
    pub async fn read_note_blob(&self, full_ref: &str) -> KernelResult<String> {
        let commit = run_git(&self.workdir, &["cat-file", "-p", full_ref], READ_TIMEOUT).await?;
        let tree_hash = commit
            .lines()
            .find_map(|line| line.strip_prefix("tree "))
            .ok_or_else(|| KernelError::Git(format!("no tree in notes commit for {full_ref}")))?
            .trim()
            .to_string();

        let tree = run_git(&self.workdir, &["cat-file", "-p", &tree_hash], READ_TIMEOUT).await?;
        // Tree entries: "<mode> blob <hash>\t<name>".
        let blob_hash = tree
            .lines()
            .find_map(|line| {
                let mut parts = line.split_whitespace();
                let _mode = parts.next()?;
                let kind = parts.next()?;
                let hash = parts.next()?;
                (kind == "blob").then(|| hash.to_string())
            })
            .ok_or_else(|| KernelError::Git(format!("no blob in notes tree for {full_ref}")))?;

        run_git(&self.workdir, &["cat-file", "-p", &blob_hash], READ_TIMEOUT).await
    }

    /// Delete a note ref.
    pub async fn delete_ref(&self, full_ref: &str) -> KernelResult<()> {
        run_git(&self.workdir, &["update-ref", "-d", full_ref], SHORT_TIMEOUT).await?;
        Ok(())
    }
}
