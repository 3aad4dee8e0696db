//! Host version-control collaborator.
//!
//! The bridge never reimplements revision walking or pack handling; it
//! shells out to the host `git` binary for those. [`GitOps`] is the seam
//! the push and fetch engines consume, so tests can substitute a fake.

use crate::object::{self, ObjectId};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// Version-control operations consumed by the bridge
#[async_trait]
pub trait GitOps: Send + Sync {
    /// Hashes of every object reachable from `reference` excluding anything
    /// reachable from the `exclude` revisions.
    async fn list_objects(&self, reference: &str, exclude: &[String]) -> Result<Vec<String>>;

    /// Resolve a single ref to its hash.
    async fn ref_hash(&self, reference: &str) -> Result<String>;

    /// Whether `ancestor` is an ancestor of `tip`.
    async fn is_ancestor(&self, ancestor: &str, tip: &str) -> Result<bool>;

    /// Re-encode a local object into the zlib-compressed loose wire format.
    async fn flatten_object(&self, sha1: &str) -> Result<Vec<u8>>;

    /// Rewrite the url of a configured remote.
    async fn set_remote_url(&self, remote: &str, url: &str) -> Result<()>;

    /// Search the pack indexes under `pack_dir` for `sha1` and unpack the
    /// matching pack into the local repository. Returns whether a pack
    /// containing the object was found.
    async fn unpack_from(&self, pack_dir: &Path, sha1: &str) -> Result<bool>;
}

/// [`GitOps`] implementation shelling out to the host `git` binary
pub struct GitRepo {
    git_dir: PathBuf,
    work_dir: PathBuf,
}

impl GitRepo {
    pub fn new(git_dir: PathBuf) -> Self {
        // git refuses some plumbing when run from inside .git itself
        let work_dir = match (
            git_dir.file_name().map(|n| n == ".git"),
            git_dir.parent(),
        ) {
            (Some(true), Some(parent)) => parent.to_path_buf(),
            _ => git_dir.clone(),
        };
        Self { git_dir, work_dir }
    }

    pub fn git_dir(&self) -> &Path {
        &self.git_dir
    }

    async fn output(&self, args: &[&str]) -> Result<Vec<u8>> {
        let out = Command::new("git")
            .args(args)
            .current_dir(&self.work_dir)
            .env("GIT_DIR", &self.git_dir)
            .output()
            .await
            .with_context(|| format!("running git {}", args.join(" ")))?;
        if !out.status.success() {
            bail!(
                "git {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&out.stderr).trim()
            );
        }
        Ok(out.stdout)
    }

    async fn output_text(&self, args: &[&str]) -> Result<String> {
        let out = self.output(args).await?;
        Ok(String::from_utf8_lossy(&out).trim().to_string())
    }
}

#[async_trait]
impl GitOps for GitRepo {
    async fn list_objects(&self, reference: &str, exclude: &[String]) -> Result<Vec<String>> {
        let mut args = vec!["rev-list".to_string(), "--objects".to_string(), reference.to_string()];
        for e in exclude {
            args.push(format!("^{}", e));
        }
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let out = self.output(&arg_refs).await?;

        let mut objs = Vec::new();
        for line in String::from_utf8_lossy(&out).lines() {
            let hash = line.split_whitespace().next().unwrap_or_default();
            ObjectId::from_hex(hash)
                .with_context(|| format!("rev-list produced a bad object line: {:?}", line))?;
            objs.push(hash.to_string());
        }
        Ok(objs)
    }

    async fn ref_hash(&self, reference: &str) -> Result<String> {
        self.output_text(&["rev-parse", reference]).await
    }

    async fn is_ancestor(&self, ancestor: &str, tip: &str) -> Result<bool> {
        let out = Command::new("git")
            .args(["merge-base", "--is-ancestor", ancestor, tip])
            .current_dir(&self.work_dir)
            .env("GIT_DIR", &self.git_dir)
            .output()
            .await
            .context("running git merge-base --is-ancestor")?;
        if !out.status.success() {
            debug!(
                ancestor,
                tip,
                stderr = %String::from_utf8_lossy(&out.stderr).trim(),
                "ancestor check negative"
            );
        }
        Ok(out.status.success())
    }

    async fn flatten_object(&self, sha1: &str) -> Result<Vec<u8>> {
        let kind = self
            .output_text(&["cat-file", "-t", sha1])
            .await
            .with_context(|| format!("flatten: kind({}) failed", sha1))?;
        let payload = self
            .output(&["cat-file", &kind, sha1])
            .await
            .with_context(|| format!("flatten: data({}) failed", sha1))?;
        object::encode_loose(&kind, &payload)
            .with_context(|| format!("flatten: compressing {} failed", sha1))
    }

    async fn set_remote_url(&self, remote: &str, url: &str) -> Result<()> {
        self.output(&["remote", "set-url", remote, url])
            .await
            .with_context(|| format!("updating url of remote {:?}", remote))?;
        Ok(())
    }

    async fn unpack_from(&self, pack_dir: &Path, sha1: &str) -> Result<bool> {
        let mut indexes = Vec::new();
        let entries = std::fs::read_dir(pack_dir)
            .with_context(|| format!("reading pack dir {}", pack_dir.display()))?;
        for entry in entries {
            let path = entry?.path();
            if path.extension().is_some_and(|e| e == "idx") {
                indexes.push(path);
            }
        }
        if indexes.is_empty() {
            bail!("no pack index files under {}", pack_dir.display());
        }
        indexes.sort();

        for idx in &indexes {
            let idx_file = std::fs::File::open(idx)
                .with_context(|| format!("opening index {}", idx.display()))?;
            let out = Command::new("git")
                .arg("show-index")
                .stdin(Stdio::from(idx_file))
                .output()
                .await
                .context("running git show-index")?;
            if !out.status.success() {
                bail!(
                    "git show-index < {} failed: {}",
                    idx.display(),
                    String::from_utf8_lossy(&out.stderr).trim()
                );
            }
            if !String::from_utf8_lossy(&out.stdout).contains(sha1) {
                continue;
            }

            // found an index carrying the hash; unpack its sibling pack
            let pack = idx.with_extension("pack");
            let pack_file = std::fs::File::open(&pack)
                .with_context(|| format!("opening pack {}", pack.display()))?;
            let out = Command::new("git")
                .arg("unpack-objects")
                .current_dir(&self.work_dir)
                .env("GIT_DIR", &self.git_dir)
                .stdin(Stdio::from(pack_file))
                .output()
                .await
                .context("running git unpack-objects")?;
            if !out.status.success() {
                bail!(
                    "git unpack-objects < {} failed: {}",
                    pack.display(),
                    String::from_utf8_lossy(&out.stderr).trim()
                );
            }
            debug!(sha1, pack = %pack.display(), "unpacked");
            return Ok(true);
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_work_dir_strips_dot_git() {
        let repo = GitRepo::new(PathBuf::from("/tmp/project/.git"));
        assert_eq!(repo.work_dir, PathBuf::from("/tmp/project"));
        assert_eq!(repo.git_dir(), Path::new("/tmp/project/.git"));
    }

    #[test]
    fn test_work_dir_keeps_bare_repo_path() {
        let repo = GitRepo::new(PathBuf::from("/srv/repos/project.git"));
        assert_eq!(repo.work_dir, PathBuf::from("/srv/repos/project.git"));
    }
}
