//! Remote ref discovery.
//!
//! Builds the ref-name → tip-hash table a `list` answer is made of, either
//! from the remote's cached `info/refs` index or, when that is missing, by
//! walking the `refs/` namespace directly.

use crate::api::{ApiError, IpfsApi, LINK_DIR, LINK_FILE};
use crate::object::ObjectId;
use crate::path::IpfsPath;
use anyhow::{anyhow, Context, Result};
use std::collections::HashMap;
use tracing::debug;

/// Ref name (including "HEAD") to hex tip hash. Built fresh for every
/// `list` command, never persisted.
pub type RefTable = HashMap<String, String>;

/// Build the table from the remote's `info/refs` index
/// (tab-separated `"<hash>\t<ref>"` lines).
pub async fn from_index(api: &dyn IpfsApi, remote: &IpfsPath) -> Result<RefTable> {
    let path = remote.join("info/refs");
    let data = api
        .cat(path.as_str())
        .await
        .with_context(|| format!("cat {}", path))?;

    let mut table = RefTable::new();
    for line in String::from_utf8_lossy(&data).lines() {
        let (hash, name) = line
            .split_once('\t')
            .ok_or_else(|| anyhow!("malformed info/refs line: {:?}", line))?;
        ObjectId::from_hex(hash).with_context(|| format!("info/refs entry for {:?}", name))?;
        debug!(ref_name = name, sha1 = hash, "got ref");
        table.insert(name.to_string(), hash.to_string());
    }
    Ok(table)
}

/// Build the table by walking the `refs/` namespace; every file node is a
/// ref whose content is its tip hash.
pub async fn by_walk(api: &dyn IpfsApi, remote: &IpfsPath) -> Result<RefTable> {
    let mut table = RefTable::new();
    let mut work = vec!["refs".to_string()];
    while let Some(rel) = work.pop() {
        let dir = remote.join(&rel);
        let links = api
            .ls(dir.as_str())
            .await
            .with_context(|| format!("ls {}", dir))?;
        for link in links {
            let child = format!("{}/{}", rel, link.name);
            match link.kind {
                LINK_DIR => work.push(child),
                LINK_FILE => {
                    let path = remote.join(&child);
                    let data = api
                        .cat(path.as_str())
                        .await
                        .with_context(|| format!("cat {}", path))?;
                    let hash = String::from_utf8_lossy(&data).trim().to_string();
                    ObjectId::from_hex(&hash)
                        .with_context(|| format!("ref file {:?}", child))?;
                    debug!(ref_name = %child, sha1 = %hash, "walked to ref");
                    table.insert(child, hash);
                }
                other => debug!(kind = other, path = %child, "skipping unknown link kind"),
            }
        }
    }
    Ok(table)
}

/// Resolve the hash HEAD should advertise: the symbolic pointer when the
/// remote carries one, otherwise any ref matching the default branch name.
pub async fn head_ref(
    api: &dyn IpfsApi,
    remote: &IpfsPath,
    table: &RefTable,
    default_branch: &str,
) -> Result<Option<String>> {
    let path = remote.join("HEAD");
    match api.cat(path.as_str()).await {
        Ok(data) => {
            let text = String::from_utf8_lossy(&data).into_owned();
            let target = text
                .strip_prefix("ref: ")
                .ok_or_else(|| anyhow!("illegal HEAD file at {}: {:?}", path, text))?
                .trim();
            if let Some(hash) = table.get(target) {
                debug!(ref_name = target, sha1 = %hash, "got HEAD ref");
                return Ok(Some(hash.clone()));
            }
            debug!(ref_name = target, "HEAD names an unknown ref, guessing");
        }
        Err(ApiError::NotFound(_)) => debug!("remote has no HEAD file"),
        Err(e) => return Err(anyhow!(e)).with_context(|| format!("cat {}", path)),
    }

    let suffix = format!("heads/{}", default_branch);
    Ok(table
        .iter()
        .find(|(name, _)| name.ends_with(&suffix))
        .map(|(_, hash)| hash.clone()))
}
