//! Loose object codec for the git on-disk format.
//!
//! Implements content-addressable Blob, Tree and Commit objects exactly as
//! git stores them: a zlib stream wrapping `"<kind> <size>\0"` followed by
//! the payload, addressed by the SHA-1 of the uncompressed record.

use chrono::{DateTime, FixedOffset};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use sha1::{Digest, Sha1};
use std::io::{self, BufRead, BufReader, Read, Write};

/// Name substituted when a stamp carries no author name at all.
pub const EMPTY_NAME: &str = "empty name";

/// Result type for codec operations
pub type Result<T> = std::result::Result<T, ObjectError>;

/// Errors produced while decoding or encoding a loose object
#[derive(Debug, thiserror::Error)]
pub enum ObjectError {
    #[error("bad framing: {0}")]
    BadFraming(#[source] io::Error),

    #[error("unrecognized object kind: {0:?}")]
    UnrecognizedKind(String),

    #[error("bad length: {0:?}")]
    BadLength(String),

    #[error("short object payload: got {got} of {want} bytes")]
    ShortRead { got: u64, want: u64 },

    #[error("truncated tree entry")]
    TruncatedTree,

    #[error("unhandled commit line: {0:?}")]
    UnhandledCommitLine(String),

    #[error("incomplete commit: missing {0} line")]
    IncompleteCommit(&'static str),

    #[error("malformed stamp: {0}")]
    MalformedStamp(&'static str),

    #[error("illegal timestamp: {0:?}")]
    IllegalTimestamp(String),

    #[error("illegal object id: {0:?}")]
    IllegalId(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Unique identifier for any stored object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectId([u8; 20]);

impl ObjectId {
    /// Raw digest width in bytes.
    pub const LEN: usize = 20;

    /// Create a new ObjectId from raw bytes
    pub fn new(bytes: [u8; Self::LEN]) -> Self {
        Self(bytes)
    }

    /// Compute ObjectId from data
    pub fn from_data(data: &[u8]) -> Self {
        let hash = Sha1::digest(data);
        Self(hash.into())
    }

    /// Parse from hexadecimal string; anything but 40 hex characters is a
    /// format error, never a shorter or longer id.
    pub fn from_hex(hex_str: &str) -> Result<Self> {
        let bytes =
            hex::decode(hex_str).map_err(|_| ObjectError::IllegalId(hex_str.to_string()))?;
        let arr: [u8; Self::LEN] = bytes
            .try_into()
            .map_err(|_| ObjectError::IllegalId(hex_str.to_string()))?;
        Ok(Self(arr))
    }

    /// Convert to lowercase hexadecimal string
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Get raw bytes
    pub fn as_bytes(&self) -> &[u8; Self::LEN] {
        &self.0
    }
}

impl std::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Object type discriminator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Blob,
    Tree,
    Commit,
}

impl ObjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectKind::Blob => "blob",
            ObjectKind::Tree => "tree",
            ObjectKind::Commit => "commit",
        }
    }
}

impl std::fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Directory tree entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    /// Octal mode string as stored on the wire (e.g. "100644")
    pub mode: String,
    /// Name of the entry
    pub name: String,
    /// Object ID of the child
    pub target: ObjectId,
}

/// Author or committer line: who, and when in their own timezone.
#[derive(Debug, Clone, PartialEq)]
pub struct Stamp {
    pub name: String,
    pub email: String,
    pub when: DateTime<FixedOffset>,
}

impl Stamp {
    /// Decode `"Name <email> epoch ±HHMM"`. The name may be absent (a stamp
    /// starting with `<`), in which case a sentinel is substituted; epoch and
    /// timezone are mandatory.
    pub fn decode(s: &str) -> Result<Self> {
        let open = s.find('<').ok_or(ObjectError::MalformedStamp("no '<'"))?;
        let close = s.find('>').ok_or(ObjectError::MalformedStamp("no '>'"))?;
        if open > close {
            return Err(ObjectError::MalformedStamp("'>' left of '<'"));
        }
        let name = if open == 0 {
            EMPTY_NAME.to_string()
        } else {
            s[..open].trim_end().to_string()
        };
        let email = s[open + 1..close].to_string();

        // the remainder is "> <epoch> <±HHMM>"; both fields are mandatory
        let start = close + 2;
        if s.len() < start + 6 {
            return Err(ObjectError::IllegalTimestamp(s.to_string()));
        }
        let epoch: i64 = s
            .get(start..s.len() - 6)
            .and_then(|t| t.parse().ok())
            .ok_or_else(|| ObjectError::IllegalTimestamp(s.to_string()))?;
        let offset = s
            .get(s.len() - 5..)
            .and_then(parse_offset)
            .ok_or_else(|| ObjectError::IllegalTimestamp(s.to_string()))?;
        let when = DateTime::from_timestamp(epoch, 0)
            .ok_or_else(|| ObjectError::IllegalTimestamp(s.to_string()))?
            .with_timezone(&offset);

        Ok(Self { name, email, when })
    }

    /// Render back to the wire form.
    pub fn render(&self) -> String {
        format!(
            "{} <{}> {} {}",
            self.name,
            self.email,
            self.when.timestamp(),
            self.when.format("%z")
        )
    }
}

impl std::fmt::Display for Stamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.render())
    }
}

fn parse_offset(s: &str) -> Option<FixedOffset> {
    let (sign, digits) = s.split_at_checked(1)?;
    if digits.len() != 4 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let hours: i32 = digits[..2].parse().ok()?;
    let minutes: i32 = digits[2..].parse().ok()?;
    let secs = (hours * 60 + minutes) * 60;
    match sign {
        "+" => FixedOffset::east_opt(secs),
        "-" => FixedOffset::west_opt(secs),
        _ => None,
    }
}

/// Commit object, single-parent only
#[derive(Debug, Clone, PartialEq)]
pub struct Commit {
    /// Root tree of this commit
    pub tree: ObjectId,
    /// Parent commit (absent for the initial commit)
    pub parent: Option<ObjectId>,
    pub author: Stamp,
    pub committer: Stamp,
    pub message: String,
}

/// Generic object that can be any type
#[derive(Debug, Clone, PartialEq)]
pub enum Object {
    Blob(Vec<u8>),
    Tree(Vec<TreeEntry>),
    Commit(Commit),
}

impl Object {
    /// Get the object kind
    pub fn kind(&self) -> ObjectKind {
        match self {
            Object::Blob(_) => ObjectKind::Blob,
            Object::Tree(_) => ObjectKind::Tree,
            Object::Commit(_) => ObjectKind::Commit,
        }
    }

    /// Serialize the payload (the bytes after the header)
    pub fn payload(&self) -> Vec<u8> {
        match self {
            Object::Blob(data) => data.clone(),
            Object::Tree(entries) => {
                let mut out = Vec::new();
                for entry in entries {
                    out.extend_from_slice(entry.mode.as_bytes());
                    out.push(b' ');
                    out.extend_from_slice(entry.name.as_bytes());
                    out.push(0);
                    out.extend_from_slice(entry.target.as_bytes());
                }
                out
            }
            Object::Commit(c) => {
                let mut out = String::new();
                out.push_str(&format!("tree {}\n", c.tree));
                if let Some(parent) = &c.parent {
                    out.push_str(&format!("parent {}\n", parent));
                }
                out.push_str(&format!("author {}\n", c.author));
                out.push_str(&format!("committer {}\n", c.committer));
                out.push('\n');
                out.push_str(&c.message);
                out.into_bytes()
            }
        }
    }

    /// Re-encode to the zlib-compressed loose format
    pub fn encode(&self) -> io::Result<Vec<u8>> {
        let payload = self.payload();
        encode_loose(self.kind().as_str(), &payload)
    }

    /// Compute the object ID (SHA-1 over header plus payload)
    pub fn id(&self) -> ObjectId {
        let payload = self.payload();
        let mut hasher = Sha1::new();
        hasher.update(format!("{} {}\0", self.kind(), payload.len()).as_bytes());
        hasher.update(&payload);
        ObjectId::new(hasher.finalize().into())
    }
}

/// Wrap an already-serialized payload in the loose header and compress it.
/// The kind is passed through verbatim so callers re-encoding objects they
/// never parsed (annotated tags, say) keep working.
pub fn encode_loose(kind: &str, payload: &[u8]) -> io::Result<Vec<u8>> {
    let mut enc = ZlibEncoder::new(
        Vec::with_capacity(payload.len() / 2 + 16),
        Compression::default(),
    );
    enc.write_all(format!("{} {}\0", kind, payload.len()).as_bytes())?;
    enc.write_all(payload)?;
    enc.finish()
}

/// Decode a single loose object from a zlib-compressed stream.
pub fn decode<R: Read>(r: R) -> Result<Object> {
    let mut br = BufReader::new(ZlibDecoder::new(r));

    let mut header = Vec::new();
    br.read_until(0, &mut header).map_err(ObjectError::BadFraming)?;
    if header.pop() != Some(0) {
        return Err(ObjectError::UnrecognizedKind(
            String::from_utf8_lossy(&header).into_owned(),
        ));
    }
    let header = String::from_utf8_lossy(&header).into_owned();
    let (kind_str, len_str) = header
        .split_once(' ')
        .ok_or_else(|| ObjectError::UnrecognizedKind(header.clone()))?;
    let kind = match kind_str {
        "blob" => ObjectKind::Blob,
        "tree" => ObjectKind::Tree,
        "commit" => ObjectKind::Commit,
        other => return Err(ObjectError::UnrecognizedKind(other.to_string())),
    };
    let size: u64 = len_str
        .parse()
        .map_err(|_| ObjectError::BadLength(len_str.to_string()))?;

    match kind {
        ObjectKind::Blob => Ok(Object::Blob(read_bounded(&mut br, size)?)),
        ObjectKind::Tree => {
            // declared sizes can lie for dag-composed trees, so the entry
            // loop is bounded but a clean early end is not an error
            let mut bounded = br.take(size);
            Ok(Object::Tree(decode_tree(&mut bounded)?))
        }
        ObjectKind::Commit => {
            let payload = read_bounded(&mut br, size)?;
            Ok(Object::Commit(decode_commit(&payload)?))
        }
    }
}

/// Read exactly `want` payload bytes; anything less is corruption, not EOF.
fn read_bounded<R: Read>(r: &mut R, want: u64) -> Result<Vec<u8>> {
    let mut payload = Vec::new();
    let got = r.take(want).read_to_end(&mut payload)? as u64;
    if got < want {
        return Err(ObjectError::ShortRead { got, want });
    }
    Ok(payload)
}

fn decode_tree<R: Read>(r: &mut R) -> Result<Vec<TreeEntry>> {
    let mut br = BufReader::new(r);
    let mut entries = Vec::new();
    loop {
        let mut head = Vec::new();
        let n = br.read_until(0, &mut head)?;
        if n == 0 {
            // clean exhaustion after zero or more complete entries
            return Ok(entries);
        }
        if head.pop() != Some(0) {
            return Err(ObjectError::TruncatedTree);
        }
        let split = head
            .iter()
            .position(|&b| b == b' ')
            .ok_or(ObjectError::TruncatedTree)?;
        let mode = String::from_utf8_lossy(&head[..split]).into_owned();
        let name = String::from_utf8_lossy(&head[split + 1..]).into_owned();
        let mut raw = [0u8; ObjectId::LEN];
        br.read_exact(&mut raw)
            .map_err(|_| ObjectError::TruncatedTree)?;
        entries.push(TreeEntry {
            mode,
            name,
            target: ObjectId::new(raw),
        });
    }
}

fn decode_commit(payload: &[u8]) -> Result<Commit> {
    let text = String::from_utf8_lossy(payload);
    let mut tree = None;
    let mut parent = None;
    let mut author = None;
    let mut committer = None;
    let mut body: Vec<&str> = Vec::new();
    let mut in_body = false;

    for line in text.lines() {
        if in_body {
            body.push(line);
        } else if line.is_empty() {
            in_body = true;
        } else if let Some(rest) = line.strip_prefix("tree ") {
            tree = Some(ObjectId::from_hex(rest)?);
        } else if let Some(rest) = line.strip_prefix("parent ") {
            parent = Some(ObjectId::from_hex(rest)?);
        } else if let Some(rest) = line.strip_prefix("author ") {
            author = Some(Stamp::decode(rest)?);
        } else if let Some(rest) = line.strip_prefix("committer ") {
            committer = Some(Stamp::decode(rest)?);
        } else {
            return Err(ObjectError::UnhandledCommitLine(line.to_string()));
        }
    }

    Ok(Commit {
        tree: tree.ok_or(ObjectError::IncompleteCommit("tree"))?,
        parent,
        author: author.ok_or(ObjectError::IncompleteCommit("author"))?,
        committer: committer.ok_or(ObjectError::IncompleteCommit("committer"))?,
        message: body.join("\n"),
    })
}
