//! Data model shared by the transfer client and the session

use serde::{Deserialize, Serialize};

/// A file offered by the peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// File name, used as-is in download requests
    pub name: String,

    /// Size in bytes, when the peer reports it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,

    /// Modification time (unix seconds), when the peer reports it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mtime: Option<i64>,
}

impl FileEntry {
    /// Entry with only a name
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            size: None,
            mtime: None,
        }
    }
}

/// Ordered file listing, in the order the peer returned it
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileListing {
    entries: Vec<FileEntry>,
}

impl FileListing {
    /// Wrap entries without reordering them
    #[must_use]
    pub fn new(entries: Vec<FileEntry>) -> Self {
        Self { entries }
    }

    /// Entries in peer order
    #[must_use]
    pub fn entries(&self) -> &[FileEntry] {
        &self.entries
    }

    /// File names in peer order
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.name.as_str()).collect()
    }

    /// Find an entry by exact name
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&FileEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    /// Number of entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the listing is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate entries in peer order
    pub fn iter(&self) -> std::slice::Iter<'_, FileEntry> {
        self.entries.iter()
    }
}

impl From<Vec<FileEntry>> for FileListing {
    fn from(entries: Vec<FileEntry>) -> Self {
        Self::new(entries)
    }
}

impl IntoIterator for FileListing {
    type Item = FileEntry;
    type IntoIter = std::vec::IntoIter<FileEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl<'a> IntoIterator for &'a FileListing {
    type Item = &'a FileEntry;
    type IntoIter = std::slice::Iter<'a, FileEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// Acknowledgement of a successful upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadAck {
    /// Name the file was uploaded under
    pub name: String,
    /// Name the peer stored it as, if it reported one (peers rename on collision)
    pub saved_as: Option<String>,
}

impl UploadAck {
    /// Name the file can be downloaded under
    #[must_use]
    pub fn stored_name(&self) -> &str {
        self.saved_as.as_deref().unwrap_or(&self.name)
    }
}

/// Peer liveness report from `/api/ping`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PeerStatus {
    /// Peer reports itself healthy
    #[serde(default)]
    pub ok: bool,
    /// Application name advertised by the peer
    #[serde(default)]
    pub name: String,
    /// Peer clock (unix seconds)
    #[serde(default)]
    pub time: i64,
}
