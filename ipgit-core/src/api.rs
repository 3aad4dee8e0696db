//! HTTP client for the ipfs daemon API.
//!
//! Exposes the handful of daemon operations the bridge needs (cat, add, ls,
//! resolve, object patching, recursive get) behind the [`IpfsApi`] trait so
//! the engines can be driven against a fake in tests.

use async_trait::async_trait;
use bytes::Bytes;
use serde::Deserialize;
use std::path::Path;

/// Result type for store operations
pub type Result<T> = std::result::Result<T, ApiError>;

/// Errors that can occur while talking to the daemon
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The addressed object does not exist under the current root. This is
    /// recoverable: callers fall back to their secondary lookup path.
    #[error("not found: {0}")]
    NotFound(String),

    #[error("{op}: daemon returned status {status}: {message}")]
    Daemon {
        op: String,
        status: u16,
        message: String,
    },

    #[error("{op}: {source}")]
    Transport {
        op: String,
        source: reqwest::Error,
    },

    #[error("{op}: unexpected response: {detail}")]
    Response { op: String, detail: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Directory listing entry as reported by the daemon
#[derive(Debug, Clone, Deserialize)]
pub struct LsLink {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Hash")]
    pub hash: String,
    #[serde(rename = "Size", default)]
    pub size: u64,
    #[serde(rename = "Type")]
    pub kind: u32,
}

/// Link kind for a sub-directory node.
pub const LINK_DIR: u32 = 1;
/// Link kind for a file (leaf) node.
pub const LINK_FILE: u32 = 2;

/// Store operations consumed by the bridge
#[async_trait]
pub trait IpfsApi: Send + Sync {
    /// Read the file at `path` in full.
    async fn cat(&self, path: &str) -> Result<Bytes>;

    /// Add a block of data, returning its storage hash.
    async fn add(&self, data: Vec<u8>) -> Result<String>;

    /// List the links directly under `path`.
    async fn ls(&self, path: &str) -> Result<Vec<LsLink>>;

    /// Resolve a path to the hash of the object it points at.
    async fn resolve_path(&self, path: &str) -> Result<String>;

    /// Link `target` at `path` under `root`, returning the new root hash.
    async fn patch_link(&self, root: &str, path: &str, target: &str, create: bool)
        -> Result<String>;

    /// Remove the link at `path` under `root`, returning the new root hash.
    async fn rm_link(&self, root: &str, path: &str) -> Result<String>;

    /// Materialize the tree at `path` into `dest` on the local filesystem.
    async fn get(&self, path: &str, dest: &Path) -> Result<()>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ErrorBody {
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AddResponse {
    hash: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ResolveResponse {
    path: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PatchResponse {
    hash: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct LsObject {
    #[serde(default)]
    links: Vec<LsLink>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct LsResponse {
    #[serde(default)]
    objects: Vec<LsObject>,
}

/// HTTP client against a daemon's `/api/v0` endpoints.
pub struct IpfsClient {
    base_url: String,
    http: reqwest::Client,
}

impl IpfsClient {
    /// Create a new client targeting `api_addr` (e.g. `http://localhost:5001`).
    pub fn new(api_addr: &str) -> Self {
        let url = api_addr.trim_end_matches('/').to_string();
        Self {
            base_url: url,
            http: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(300))
                .build()
                .expect("Failed to create HTTP client"),
        }
    }

    async fn api_post(
        &self,
        op: String,
        endpoint: &str,
        args: &[(&str, &str)],
    ) -> Result<reqwest::Response> {
        let url = format!("{}/api/v0/{}", self.base_url, endpoint);
        let resp = self
            .http
            .post(&url)
            .query(args)
            .send()
            .await
            .map_err(|source| ApiError::Transport {
                op: op.clone(),
                source,
            })?;
        check_status(op, resp).await
    }
}

async fn check_status(op: String, resp: reqwest::Response) -> Result<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&body)
        .map(|b| b.message)
        .unwrap_or(body);
    if is_not_found_message(&message) {
        return Err(ApiError::NotFound(op));
    }
    Err(ApiError::Daemon {
        op,
        status: status.as_u16(),
        message,
    })
}

/// Daemon error messages that mean "this path has no object", as opposed to
/// a transport or daemon failure.
fn is_not_found_message(message: &str) -> bool {
    let m = message.to_ascii_lowercase();
    m.contains("no link named") || m.contains("not found") || m.contains("could not resolve")
}

#[async_trait]
impl IpfsApi for IpfsClient {
    async fn cat(&self, path: &str) -> Result<Bytes> {
        let op = format!("cat({})", path);
        let resp = self.api_post(op.clone(), "cat", &[("arg", path)]).await?;
        resp.bytes()
            .await
            .map_err(|source| ApiError::Transport { op, source })
    }

    async fn add(&self, data: Vec<u8>) -> Result<String> {
        let op = format!("add({} bytes)", data.len());
        let url = format!("{}/api/v0/add", self.base_url);
        let form = reqwest::multipart::Form::new()
            .part("file", reqwest::multipart::Part::bytes(data).file_name("object"));
        let resp = self
            .http
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(|source| ApiError::Transport {
                op: op.clone(),
                source,
            })?;
        let resp = check_status(op.clone(), resp).await?;
        let parsed: AddResponse = resp
            .json()
            .await
            .map_err(|e| ApiError::Response {
                op,
                detail: e.to_string(),
            })?;
        Ok(parsed.hash)
    }

    async fn ls(&self, path: &str) -> Result<Vec<LsLink>> {
        let op = format!("ls({})", path);
        let resp = self.api_post(op.clone(), "ls", &[("arg", path)]).await?;
        let parsed: LsResponse = resp
            .json()
            .await
            .map_err(|e| ApiError::Response {
                op,
                detail: e.to_string(),
            })?;
        Ok(parsed.objects.into_iter().flat_map(|o| o.links).collect())
    }

    async fn resolve_path(&self, path: &str) -> Result<String> {
        let op = format!("resolve({})", path);
        let resp = self
            .api_post(op.clone(), "resolve", &[("arg", path)])
            .await?;
        let parsed: ResolveResponse = resp
            .json()
            .await
            .map_err(|e| ApiError::Response {
                op: op.clone(),
                detail: e.to_string(),
            })?;
        match parsed.path.rsplit('/').next() {
            Some(hash) if !hash.is_empty() => Ok(hash.to_string()),
            _ => Err(ApiError::Response {
                op,
                detail: format!("unresolvable path {:?}", parsed.path),
            }),
        }
    }

    async fn patch_link(
        &self,
        root: &str,
        path: &str,
        target: &str,
        create: bool,
    ) -> Result<String> {
        let op = format!("patch-link({}, {})", root, path);
        let create_arg = if create { "true" } else { "false" };
        let resp = self
            .api_post(
                op.clone(),
                "object/patch/add-link",
                &[
                    ("arg", root),
                    ("arg", path),
                    ("arg", target),
                    ("create", create_arg),
                ],
            )
            .await?;
        let parsed: PatchResponse = resp
            .json()
            .await
            .map_err(|e| ApiError::Response {
                op,
                detail: e.to_string(),
            })?;
        Ok(parsed.hash)
    }

    async fn rm_link(&self, root: &str, path: &str) -> Result<String> {
        let op = format!("rm-link({}, {})", root, path);
        let resp = self
            .api_post(
                op.clone(),
                "object/patch/rm-link",
                &[("arg", root), ("arg", path)],
            )
            .await?;
        let parsed: PatchResponse = resp
            .json()
            .await
            .map_err(|e| ApiError::Response {
                op,
                detail: e.to_string(),
            })?;
        Ok(parsed.hash)
    }

    async fn get(&self, path: &str, dest: &Path) -> Result<()> {
        // walk the tree with ls/cat instead of unpacking the daemon's tar
        // stream; the result is the same on-disk layout
        let mut work = vec![(path.to_string(), dest.to_path_buf())];
        while let Some((src, into)) = work.pop() {
            std::fs::create_dir_all(&into)?;
            for link in self.ls(&src).await? {
                let child_src = format!("{}/{}", src, link.name);
                match link.kind {
                    LINK_DIR => work.push((child_src, into.join(&link.name))),
                    _ => {
                        let data = self.cat(&child_src).await?;
                        std::fs::write(into.join(&link.name), &data)?;
                    }
                }
            }
        }
        Ok(())
    }
}
