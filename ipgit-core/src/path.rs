//! Remote location syntax for the content-addressed store.
//!
//! A remote lives at `/ipfs/<root-cid>/<subpath...>` (or `/ipns/...` for
//! named roots); bare root tokens are normalized into the `/ipfs/` form.
//! The root is validated as a well-formed content identifier before a path
//! is accepted.

use cid::Cid;

/// Result type for path parsing
pub type Result<T> = std::result::Result<T, PathError>;

/// Errors produced while validating a remote path
#[derive(Debug, thiserror::Error)]
pub enum PathError {
    #[error("invalid ipfs ref path")]
    BadPath,

    #[error("invalid content identifier: {0}")]
    Cid(#[from] cid::Error),
}

/// A validated store path such as `/ipfs/Qm.../repo.git`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpfsPath(String);

impl IpfsPath {
    /// Parse and validate a remote location.
    ///
    /// Accepted forms: a bare content identifier, `<cid>/<subpath>`, or an
    /// absolute `/ipfs/<cid>/...` or `/ipns/<name>/...` path.
    pub fn parse(txt: &str) -> Result<Self> {
        let parts: Vec<&str> = txt.split('/').collect();

        if parts.len() == 1 {
            // bare content identifier
            let c = Cid::try_from(txt).map_err(|_| PathError::BadPath)?;
            return Ok(Self(format!("/ipfs/{}", c)));
        }

        if !parts[0].is_empty() {
            // starts with a hash but carries no protocol prefix
            Cid::try_from(parts[0]).map_err(|_| PathError::BadPath)?;
            return Ok(Self(format!("/ipfs/{}", txt)));
        }

        if parts.len() < 3 {
            return Err(PathError::BadPath);
        }
        match parts[1] {
            "ipfs" => {
                Cid::try_from(parts[2])?;
            }
            "ipns" => {}
            _ => return Err(PathError::BadPath),
        }
        Ok(Self(txt.to_string()))
    }

    /// Path segments with empty components stripped.
    pub fn segments(&self) -> Vec<&str> {
        self.0.split('/').filter(|s| !s.is_empty()).collect()
    }

    /// Append further segments below this path.
    pub fn join(&self, tail: &str) -> IpfsPath {
        IpfsPath(format!(
            "{}/{}",
            self.0.trim_end_matches('/'),
            tail.trim_start_matches('/')
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for IpfsPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
