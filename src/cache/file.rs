//! On-disk snapshot artifact.
//!
//! One JSON document per tree, followed by a trailer line carrying the
//! SHA-256 of the document bytes:
//!
//! ```text
//! {"format":"pubcache-snapshot","version":1,"kind":"content","schema":[...],"nodes":[...]}
//! #sha256:<64 hex digits>
//! ```
//!
//! The schema header declares one element type per content-type alias, keyed
//! by the `id` attribute. Nodes are listed in document order, so every parent
//! precedes its children. A file that fails any check is reported as a
//! [`SnapshotFileError`] and never partially trusted.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::domain::error::DomainError;
use crate::domain::node::Node;
use crate::domain::snapshot::Snapshot;
use crate::domain::types::TreeKind;

pub const FORMAT_TAG: &str = "pubcache-snapshot";
pub const FORMAT_VERSION: u32 = 1;
const CHECKSUM_PREFIX: &str = "#sha256:";
const KEY_ATTRIBUTE: &str = "id";

#[derive(Debug, Error)]
pub enum SnapshotFileError {
    #[error("snapshot file i/o failed: {0}")]
    Io(#[from] io::Error),
    #[error("snapshot file is malformed: {0}")]
    Format(String),
    #[error("snapshot file checksum does not match its content")]
    Checksum,
    #[error("snapshot file is inconsistent: {0}")]
    Corrupt(String),
}

impl SnapshotFileError {
    fn corrupt(message: impl Into<String>) -> Self {
        Self::Corrupt(message.into())
    }
}

impl From<serde_json::Error> for SnapshotFileError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_io() {
            Self::Io(err.into())
        } else {
            Self::Format(err.to_string())
        }
    }
}

#[derive(Serialize)]
struct SchemaEntry<'a> {
    alias: &'a str,
    key: &'a str,
}

#[derive(Serialize)]
struct DocumentOut<'a> {
    format: &'static str,
    version: u32,
    kind: TreeKind,
    schema: Vec<SchemaEntry<'a>>,
    nodes: Vec<&'a Node>,
}

#[derive(Deserialize)]
struct DocumentIn {
    format: String,
    version: u32,
    kind: TreeKind,
    schema: Vec<OwnedSchemaEntry>,
    nodes: Vec<Node>,
}

#[derive(Deserialize)]
struct OwnedSchemaEntry {
    alias: String,
    key: String,
}

/// `Write` adapter hashing every byte that reaches the inner writer.
struct HashingWriter<W> {
    inner: W,
    hasher: Sha256,
}

impl<W: Write> HashingWriter<W> {
    fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
        }
    }

    fn finish(self) -> (W, String) {
        let digest = self.hasher.finalize();
        (self.inner, hex::encode(digest.as_slice()))
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = self.inner.write(buf)?;
        self.hasher.update(&buf[..written]);
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Serialize `snapshot` to `path` in one pass, replacing any existing file.
///
/// On failure the partial file is removed before the error is returned.
pub fn write_snapshot(path: &Path, snapshot: &Snapshot) -> Result<u64, SnapshotFileError> {
    write_snapshot_with(path, snapshot, |file| Box::new(file))
}

/// [`write_snapshot`] with the file handle wrapped by `wrap` before encoding.
fn write_snapshot_with(
    path: &Path,
    snapshot: &Snapshot,
    wrap: impl FnOnce(&mut File) -> Box<dyn Write + '_>,
) -> Result<u64, SnapshotFileError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    remove_if_exists(path)?;

    match write_document(path, snapshot, wrap) {
        Ok(bytes) => Ok(bytes),
        Err(err) => {
            let _ = remove_if_exists(path);
            Err(err)
        }
    }
}

fn write_document(
    path: &Path,
    snapshot: &Snapshot,
    wrap: impl FnOnce(&mut File) -> Box<dyn Write + '_>,
) -> Result<u64, SnapshotFileError> {
    let document = DocumentOut {
        format: FORMAT_TAG,
        version: FORMAT_VERSION,
        kind: snapshot.kind(),
        schema: snapshot
            .schema()
            .map(|alias| SchemaEntry {
                alias,
                key: KEY_ATTRIBUTE,
            })
            .collect(),
        nodes: snapshot
            .iter_document_order()
            .into_iter()
            .map(|node| node.as_ref())
            .collect(),
    };

    let mut file = File::create(path)?;
    {
        let mut writer = HashingWriter::new(BufWriter::new(wrap(&mut file)));
        serde_json::to_writer(&mut writer, &document)?;
        let (mut inner, digest) = writer.finish();
        write!(inner, "\n{CHECKSUM_PREFIX}{digest}\n")?;
        inner.flush()?;
    }
    file.sync_all()?;
    Ok(file.metadata()?.len())
}

/// Read and validate a snapshot file.
pub fn read_snapshot(path: &Path) -> Result<Snapshot, SnapshotFileError> {
    let raw = fs::read(path)?;
    parse_snapshot(&raw)
}

/// Validate and decode the bytes of a snapshot file.
pub fn parse_snapshot(raw: &[u8]) -> Result<Snapshot, SnapshotFileError> {
    let (document, expected) = split_trailer(raw)?;

    let actual = hex::encode(Sha256::digest(document).as_slice());
    if !actual.eq_ignore_ascii_case(expected) {
        return Err(SnapshotFileError::Checksum);
    }

    let document: DocumentIn = serde_json::from_slice(document)?;
    if document.format != FORMAT_TAG {
        return Err(SnapshotFileError::Format(format!(
            "unexpected format tag `{}`",
            document.format
        )));
    }
    if document.version != FORMAT_VERSION {
        return Err(SnapshotFileError::Format(format!(
            "unsupported version {}",
            document.version
        )));
    }

    let mut snapshot = Snapshot::new(document.kind);
    for entry in &document.schema {
        if entry.key != KEY_ATTRIBUTE {
            return Err(SnapshotFileError::corrupt(format!(
                "element type `{}` is keyed by `{}`",
                entry.alias, entry.key
            )));
        }
        snapshot.ensure_schema(&entry.alias);
    }

    for node in document.nodes {
        if !snapshot.has_schema(&node.type_alias) {
            return Err(SnapshotFileError::corrupt(format!(
                "node {} uses undeclared element type `{}`",
                node.id, node.type_alias
            )));
        }
        let id = node.id;
        let stored_path = node.path.clone();
        let stored_level = node.level;
        snapshot.append_child(node).map_err(corrupt_from_domain)?;
        let placed = snapshot
            .get(id)
            .ok_or_else(|| SnapshotFileError::corrupt(format!("node {id} vanished")))?;
        if placed.path != stored_path || placed.level != stored_level {
            return Err(SnapshotFileError::corrupt(format!(
                "node {id} path `{stored_path}` does not match its position"
            )));
        }
    }

    snapshot
        .check_invariants()
        .map_err(corrupt_from_domain)?;
    Ok(snapshot)
}

/// Modification time of the artifact, if it exists.
pub fn modified(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|meta| meta.modified()).ok()
}

pub fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    }
}

fn split_trailer(raw: &[u8]) -> Result<(&[u8], &str), SnapshotFileError> {
    let text = std::str::from_utf8(raw)
        .map_err(|err| SnapshotFileError::Format(format!("not valid utf-8: {err}")))?;
    let trimmed = text.trim_end_matches('\n');
    let marker = format!("\n{CHECKSUM_PREFIX}");
    let index = trimmed
        .rfind(&marker)
        .ok_or_else(|| SnapshotFileError::corrupt("missing checksum trailer"))?;
    let digest = &trimmed[index + marker.len()..];
    if digest.len() != 64 {
        return Err(SnapshotFileError::corrupt("truncated checksum trailer"));
    }
    Ok((&raw[..index], digest))
}

fn corrupt_from_domain(err: DomainError) -> SnapshotFileError {
    SnapshotFileError::Corrupt(err.to_string())
}
