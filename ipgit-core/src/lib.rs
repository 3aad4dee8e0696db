//! IpGit Core Library
//!
//! Everything the `git-remote-ipfs` helper is made of:
//! - Loose object codec (Blob, Tree, Commit) for the git on-disk format
//! - Remote path parsing and validation
//! - ipfs daemon API client
//! - Host git collaborator (revision walk, ancestor check, pack fallback)
//! - Ref discovery, fetch traversal and push engines
//! - The remote-helper protocol state machine tying them together

pub mod api;
pub mod fetch;
pub mod git;
pub mod object;
pub mod path;
pub mod protocol;
pub mod push;
pub mod refs;

pub use api::{ApiError, IpfsApi, IpfsClient, LsLink, LINK_DIR, LINK_FILE};
pub use fetch::Fetcher;
pub use git::{GitOps, GitRepo};
pub use object::{Commit, Object, ObjectError, ObjectId, ObjectKind, Stamp, TreeEntry};
pub use path::{IpfsPath, PathError};
pub use protocol::Session;
pub use push::{NonFastForward, Pusher};
pub use refs::RefTable;
