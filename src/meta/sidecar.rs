//! XML sidecar serialization
//!
//! Each tracked directory owns one sidecar document:
//!
//! ```xml
//! <?xml version="1.0" encoding="UTF-8"?>
//! <directory path="/data/photos" updated="2026-08-24T10:00:00Z">
//!   <file name="a.jpg" checksum="9f86d081884c7d65" size="123"
//!         mtime="1724500000" tags="keep,red" volumes="vault1"/>
//! </directory>
//! ```
//!
//! A missing sidecar is an empty cache. A malformed one is tolerated:
//! the loader logs a warning and starts empty, and the next persist
//! replaces the damaged file. Writes go through a temporary file in the
//! same directory followed by an atomic rename, so readers never observe
//! a half-written document.

use crate::error::{SidecarError, SidecarResult};
use crate::meta::FileMeta;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

const XML_DECLARATION: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n";

/// Serialized form of one directory's records
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename = "directory")]
struct SidecarDoc {
    /// Directory path, informational only (the file's location is
    /// authoritative)
    #[serde(rename = "@path")]
    path: String,

    /// Timestamp of the last persist, ignored on load
    #[serde(rename = "@updated", skip_serializing_if = "Option::is_none")]
    updated: Option<String>,

    #[serde(rename = "file", default)]
    files: Vec<SidecarRecord>,
}

/// Serialized form of a single file record
#[derive(Debug, Serialize, Deserialize)]
struct SidecarRecord {
    #[serde(rename = "@name")]
    name: String,

    #[serde(rename = "@checksum")]
    checksum: String,

    #[serde(rename = "@size")]
    size: u64,

    #[serde(rename = "@mtime")]
    mtime: i64,

    /// Comma-joined tag list, omitted when empty
    #[serde(rename = "@tags", skip_serializing_if = "Option::is_none")]
    tags: Option<String>,

    /// Comma-joined volume list, omitted when empty
    #[serde(rename = "@volumes", skip_serializing_if = "Option::is_none")]
    volumes: Option<String>,
}

impl SidecarRecord {
    fn from_meta(meta: &FileMeta) -> Self {
        Self {
            name: meta.name.clone(),
            checksum: meta.checksum.clone(),
            size: meta.size,
            mtime: meta.mtime,
            tags: join_set(&meta.tags),
            volumes: join_set(&meta.volumes),
        }
    }

    fn into_meta(self, dir: &Path) -> FileMeta {
        FileMeta {
            name: self.name,
            dir: dir.to_path_buf(),
            checksum: self.checksum,
            size: self.size,
            mtime: self.mtime,
            tags: split_set(self.tags.as_deref()),
            volumes: split_set(self.volumes.as_deref()),
        }
    }
}

fn join_set(set: &BTreeSet<String>) -> Option<String> {
    if set.is_empty() {
        None
    } else {
        Some(set.iter().cloned().collect::<Vec<_>>().join(","))
    }
}

fn split_set(joined: Option<&str>) -> BTreeSet<String> {
    joined
        .map(|s| {
            s.split(',')
                .filter(|part| !part.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Path of the sidecar file inside `dir`
pub fn sidecar_path(dir: &Path, file_name: &str) -> PathBuf {
    dir.join(file_name)
}

/// Load the records persisted for `dir`
///
/// A missing sidecar yields an empty map. A sidecar that fails to parse
/// is logged and treated as empty; only hard I/O errors propagate.
pub fn load(dir: &Path, file_name: &str) -> SidecarResult<BTreeMap<String, FileMeta>> {
    let path = sidecar_path(dir, file_name);

    let text = match fs::read_to_string(&path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "No sidecar present, starting empty");
            return Ok(BTreeMap::new());
        }
        Err(e) => return Err(SidecarError::Read { path, source: e }),
    };

    let doc: SidecarDoc = match quick_xml::de::from_str(&text) {
        Ok(doc) => doc,
        Err(e) => {
            warn!(
                path = %path.display(),
                error = %e,
                "Malformed sidecar, starting empty"
            );
            return Ok(BTreeMap::new());
        }
    };

    let mut records = BTreeMap::new();
    for file in doc.files {
        let meta = file.into_meta(dir);
        records.insert(meta.name.clone(), meta);
    }

    debug!(path = %path.display(), records = records.len(), "Sidecar loaded");
    Ok(records)
}

/// Atomically replace the sidecar for `dir` with the given records
pub fn save(
    dir: &Path,
    file_name: &str,
    records: &BTreeMap<String, FileMeta>,
) -> SidecarResult<()> {
    let path = sidecar_path(dir, file_name);

    let doc = SidecarDoc {
        path: dir.display().to_string(),
        updated: Some(Utc::now().to_rfc3339()),
        files: records.values().map(SidecarRecord::from_meta).collect(),
    };

    let mut body = String::new();
    let mut ser = quick_xml::se::Serializer::new(&mut body);
    ser.indent(' ', 2);
    doc.serialize(ser).map_err(|e| SidecarError::Encode {
        path: path.clone(),
        reason: e.to_string(),
    })?;

    let mut text = String::with_capacity(XML_DECLARATION.len() + body.len() + 1);
    text.push_str(XML_DECLARATION);
    text.push_str(&body);
    text.push('\n');

    // Write next to the target, then rename over it. Readers either see
    // the old document or the new one, never a partial write.
    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| SidecarError::Write {
        path: path.clone(),
        source: e,
    })?;
    tmp.write_all(text.as_bytes())
        .map_err(|e| SidecarError::Write {
            path: path.clone(),
            source: e,
        })?;
    tmp.persist(&path).map_err(|e| SidecarError::Replace {
        path: path.clone(),
        reason: e.to_string(),
    })?;

    debug!(path = %path.display(), records = records.len(), "Sidecar written");
    Ok(())
}

/// Remove the sidecar for `dir` if one exists
pub fn remove(dir: &Path, file_name: &str) -> SidecarResult<()> {
    let path = sidecar_path(dir, file_name);
    match fs::remove_file(&path) {
        Ok(()) => {
            debug!(path = %path.display(), "Sidecar removed");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(SidecarError::Remove { path, source: e }),
    }
}
