//! Push engine: reachability diff, concurrent upload, DAG republish.
//!
//! One push runs through a fixed pipeline: compute the object diff via the
//! version-control collaborator, upload every object concurrently, thread
//! the uploads into the DAG one link at a time, verify the fast-forward
//! invariant, publish the ref update, and finally point the configured
//! remote at the new root.

use crate::api::IpfsApi;
use crate::git::GitOps;
use crate::path::IpfsPath;
use crate::refs::RefTable;
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Upper bound on concurrently running object uploads.
const UPLOAD_WORKERS: usize = 16;

/// A ref update that is not a fast-forward and was not forced.
#[derive(Debug, thiserror::Error)]
#[error("non-fast-forward")]
pub struct NonFastForward;

/// Push driver for a single `push <src>:<dst>` command
pub struct Pusher {
    api: Arc<dyn IpfsApi>,
    git: Arc<dyn GitOps>,
    remote_name: String,
    remote_path: IpfsPath,
}

impl Pusher {
    pub fn new(
        api: Arc<dyn IpfsApi>,
        git: Arc<dyn GitOps>,
        remote_name: String,
        remote_path: IpfsPath,
    ) -> Self {
        Self {
            api,
            git,
            remote_name,
            remote_path,
        }
    }

    /// Push `src` to `dst`, returning the new DAG root on success.
    ///
    /// `refs` is the table the preceding `list for-push` produced; its
    /// values bound the reachability diff and its `dst` entry (if any) is
    /// the old tip for the fast-forward check.
    pub async fn push(&self, src: &str, dst: &str, refs: &RefTable) -> Result<String> {
        let (force, src) = match src.strip_prefix('+') {
            Some(rest) => (true, rest),
            None => (false, src),
        };

        let exclude: Vec<String> = refs.values().cloned().collect();
        let need = self
            .git
            .list_objects(src, &exclude)
            .await
            .with_context(|| format!("listing objects reachable from {:?}", src))?;
        info!(count = need.len(), src, dst, force, "pushing");

        let uploaded = self.upload_all(&need).await?;

        // each patch builds on the root the previous one produced, so this
        // part is strictly sequential; iteration order is fixed by sorting,
        // not by upload completion order
        let mut root = self
            .api
            .resolve_path(self.remote_path.as_str())
            .await
            .with_context(|| format!("resolving {}", self.remote_path))?;
        let mut pairs: Vec<(String, String)> = uploaded.into_iter().collect();
        pairs.sort();
        for (sha1, added) in &pairs {
            let link = format!("objects/{}/{}", &sha1[..2], &sha1[2..]);
            root = self
                .api
                .patch_link(&root, &link, added, true)
                .await
                .with_context(|| format!("linking object {}", sha1))?;
            debug!(sha1, added, root, "object linked");
        }

        let src_hash = self
            .git
            .ref_hash(src)
            .await
            .with_context(|| format!("resolving local ref {:?}", src))?;
        if let Some(old) = refs.get(dst) {
            let fast_forward = self
                .git
                .is_ancestor(old, &src_hash)
                .await
                .with_context(|| format!("ancestor check {}..{}", old, src_hash))?;
            if !fast_forward && !force {
                return Err(NonFastForward.into());
            }
        }

        let tip = self
            .api
            .add(format!("{}\n", src_hash).into_bytes())
            .await
            .context("adding ref tip blob")?;
        root = self
            .api
            .patch_link(&root, dst, &tip, true)
            .await
            .context("fetch first")?;

        // drop the cached ref index so the next list walks refs/ instead of
        // serving stale data; the remote may not carry one at all
        match self.api.rm_link(&root, "info/refs").await {
            Ok(new_root) => {
                debug!(root = new_root, "dropped cached info/refs");
                root = new_root;
            }
            Err(e) => warn!(error = %e, "could not drop cached info/refs"),
        }

        let url = format!("ipfs:///ipfs/{}", root);
        self.git
            .set_remote_url(&self.remote_name, &url)
            .await
            .context("rewriting remote url")?;
        info!(dst, sha1 = src_hash, root, "pushed");
        Ok(root)
    }

    /// Upload every object in `need`, bounded-concurrently. All uploads
    /// report before this returns; the first failure aborts the rest, so a
    /// partial result set is never published.
    async fn upload_all(&self, need: &[String]) -> Result<HashMap<String, String>> {
        let limit = Arc::new(Semaphore::new(UPLOAD_WORKERS));
        let mut tasks: JoinSet<Result<(String, String)>> = JoinSet::new();
        for sha1 in need {
            let sha1 = sha1.clone();
            let api = Arc::clone(&self.api);
            let git = Arc::clone(&self.git);
            let limit = Arc::clone(&limit);
            tasks.spawn(async move {
                let _permit = limit.acquire_owned().await.context("upload slot")?;
                let data = git
                    .flatten_object(&sha1)
                    .await
                    .with_context(|| format!("flattening {}", sha1))?;
                let added = api
                    .add(data)
                    .await
                    .with_context(|| format!("uploading {}", sha1))?;
                Ok((sha1, added))
            });
        }

        let mut uploaded = HashMap::with_capacity(need.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok((sha1, added))) => {
                    debug!(sha1, added, "uploaded");
                    uploaded.insert(sha1, added);
                }
                Ok(Err(e)) => {
                    tasks.abort_all();
                    return Err(e);
                }
                Err(e) => {
                    tasks.abort_all();
                    return Err(anyhow::Error::new(e).context("upload task failed"));
                }
            }
        }
        Ok(uploaded)
    }
}
