//! In-memory fakes for the store and version-control collaborators.
#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bytes::Bytes;
use ipgit_core::api::{ApiError, IpfsApi, LsLink, LINK_DIR, LINK_FILE};
use ipgit_core::git::GitOps;
use ipgit_core::object::{Commit, Object, ObjectId, Stamp, TreeEntry};
use ipgit_core::path::IpfsPath;
use chrono::{DateTime, FixedOffset};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Mutex;

pub const ROOT_CID: &str = "QmNRzJ6weMUs8SpeGApfY6XZEPcVbg1PTAARFZJ2C2McJq";

pub fn remote_path() -> IpfsPath {
    IpfsPath::parse(&format!("/ipfs/{}/repo", ROOT_CID)).unwrap()
}

/// In-memory stand-in for the ipfs daemon. Files live in a flat path map;
/// patches record what they were asked to link without mutating the
/// published root, mirroring how real patches mint fresh roots.
pub struct FakeIpfs {
    pub files: Mutex<HashMap<String, Vec<u8>>>,
    pub root: String,
    pub added: Mutex<Vec<Vec<u8>>>,
    pub links: Mutex<Vec<(String, String, String)>>,
    pub rm_links: Mutex<Vec<(String, String)>>,
    pub fail_add_matching: Option<Vec<u8>>,
    pub patch_count: Mutex<usize>,
}

impl FakeIpfs {
    pub fn new() -> Self {
        Self {
            files: Mutex::new(HashMap::new()),
            root: "QmStartRoot".to_string(),
            added: Mutex::new(Vec::new()),
            links: Mutex::new(Vec::new()),
            rm_links: Mutex::new(Vec::new()),
            fail_add_matching: None,
            patch_count: Mutex::new(0),
        }
    }

    pub fn put_file(&self, path: impl Into<String>, data: impl Into<Vec<u8>>) {
        self.files.lock().unwrap().insert(path.into(), data.into());
    }

    /// Store a loose object under the remote's `objects/` fan-out.
    pub fn put_object(&self, remote: &IpfsPath, obj: &Object) -> ObjectId {
        let id = obj.id();
        let hex = id.to_hex();
        let path = format!("{}/objects/{}/{}", remote.as_str(), &hex[..2], &hex[2..]);
        self.put_file(path, obj.encode().unwrap());
        id
    }
}

#[async_trait]
impl IpfsApi for FakeIpfs {
    async fn cat(&self, path: &str) -> Result<Bytes, ApiError> {
        self.files
            .lock()
            .unwrap()
            .get(path)
            .map(|v| Bytes::from(v.clone()))
            .ok_or_else(|| ApiError::NotFound(path.to_string()))
    }

    async fn add(&self, data: Vec<u8>) -> Result<String, ApiError> {
        if self.fail_add_matching.as_deref() == Some(data.as_slice()) {
            return Err(ApiError::Daemon {
                op: "add".to_string(),
                status: 500,
                message: "simulated upload failure".to_string(),
            });
        }
        let hash = format!("Qm{}", ObjectId::from_data(&data).to_hex());
        self.added.lock().unwrap().push(data);
        Ok(hash)
    }

    async fn ls(&self, path: &str) -> Result<Vec<LsLink>, ApiError> {
        let files = self.files.lock().unwrap();
        let prefix = format!("{}/", path.trim_end_matches('/'));
        let mut dirs = HashSet::new();
        let mut out = Vec::new();
        for (key, data) in files.iter() {
            if let Some(rest) = key.strip_prefix(&prefix) {
                match rest.split_once('/') {
                    None => out.push(LsLink {
                        name: rest.to_string(),
                        hash: "QmLeaf".to_string(),
                        size: data.len() as u64,
                        kind: LINK_FILE,
                    }),
                    Some((dir, _)) => {
                        dirs.insert(dir.to_string());
                    }
                }
            }
        }
        for dir in dirs {
            out.push(LsLink {
                name: dir,
                hash: "QmDir".to_string(),
                size: 0,
                kind: LINK_DIR,
            });
        }
        if out.is_empty() {
            return Err(ApiError::NotFound(path.to_string()));
        }
        Ok(out)
    }

    async fn resolve_path(&self, _path: &str) -> Result<String, ApiError> {
        Ok(self.root.clone())
    }

    async fn patch_link(
        &self,
        root: &str,
        path: &str,
        target: &str,
        _create: bool,
    ) -> Result<String, ApiError> {
        let mut count = self.patch_count.lock().unwrap();
        *count += 1;
        self.links
            .lock()
            .unwrap()
            .push((root.to_string(), path.to_string(), target.to_string()));
        Ok(format!("root-{}", count))
    }

    async fn rm_link(&self, root: &str, path: &str) -> Result<String, ApiError> {
        self.rm_links
            .lock()
            .unwrap()
            .push((root.to_string(), path.to_string()));
        Ok(format!("{}+rm", root))
    }

    async fn get(&self, path: &str, _dest: &Path) -> Result<(), ApiError> {
        Err(ApiError::Daemon {
            op: format!("get({})", path),
            status: 500,
            message: "not supported by the fake".to_string(),
        })
    }
}

/// In-memory stand-in for the host git binary.
pub struct FakeGit {
    pub reachable: HashMap<String, Vec<String>>,
    pub refs: HashMap<String, String>,
    pub ancestors: HashSet<(String, String)>,
    pub flattened: HashMap<String, Vec<u8>>,
    pub remote_urls: Mutex<Vec<(String, String)>>,
    pub last_exclude: Mutex<Vec<String>>,
}

impl FakeGit {
    pub fn new() -> Self {
        Self {
            reachable: HashMap::new(),
            refs: HashMap::new(),
            ancestors: HashSet::new(),
            flattened: HashMap::new(),
            remote_urls: Mutex::new(Vec::new()),
            last_exclude: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl GitOps for FakeGit {
    async fn list_objects(&self, reference: &str, exclude: &[String]) -> Result<Vec<String>> {
        *self.last_exclude.lock().unwrap() = exclude.to_vec();
        Ok(self.reachable.get(reference).cloned().unwrap_or_default())
    }

    async fn ref_hash(&self, reference: &str) -> Result<String> {
        self.refs
            .get(reference)
            .cloned()
            .ok_or_else(|| anyhow!("unknown ref {:?}", reference))
    }

    async fn is_ancestor(&self, ancestor: &str, tip: &str) -> Result<bool> {
        Ok(self
            .ancestors
            .contains(&(ancestor.to_string(), tip.to_string())))
    }

    async fn flatten_object(&self, sha1: &str) -> Result<Vec<u8>> {
        self.flattened
            .get(sha1)
            .cloned()
            .ok_or_else(|| anyhow!("no such object {:?}", sha1))
    }

    async fn set_remote_url(&self, remote: &str, url: &str) -> Result<()> {
        self.remote_urls
            .lock()
            .unwrap()
            .push((remote.to_string(), url.to_string()));
        Ok(())
    }

    async fn unpack_from(&self, _pack_dir: &Path, _sha1: &str) -> Result<bool> {
        Ok(false)
    }
}

pub fn stamp(name: &str, email: &str, epoch: i64) -> Stamp {
    let offset = FixedOffset::east_opt(3600).unwrap();
    Stamp {
        name: name.to_string(),
        email: email.to_string(),
        when: DateTime::from_timestamp(epoch, 0)
            .unwrap()
            .with_timezone(&offset),
    }
}

pub fn commit(tree: ObjectId, parent: Option<ObjectId>, message: &str) -> Object {
    Object::Commit(Commit {
        tree,
        parent,
        author: stamp("Ann Author", "ann@example.com", 1700000000),
        committer: stamp("Ann Author", "ann@example.com", 1700000000),
        message: message.to_string(),
    })
}

pub fn tree_of(entries: &[(&str, ObjectId)]) -> Object {
    Object::Tree(
        entries
            .iter()
            .map(|(name, target)| TreeEntry {
                mode: "100644".to_string(),
                name: name.to_string(),
                target: *target,
            })
            .collect(),
    )
}
