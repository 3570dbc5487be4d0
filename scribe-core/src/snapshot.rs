//! Archived documents and the stack that holds them.
//!
//! A [`DocumentSnapshot`] is what remains of a document once it is displaced
//! from the editor: its inline tree, its CRDT encoding, or just the path it
//! came from. Snapshots are immutable once created and are shared through
//! `Arc`, so "the same snapshot" always means the same [`SnapshotId`].

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::tree::EditorText;

/// Milliseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(pub u64);

impl Timestamp {
    pub fn now() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        Self(millis)
    }

    pub fn from_system_time(time: SystemTime) -> Self {
        let millis = time
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        Self(millis)
    }

    pub fn as_millis(&self) -> u64 {
        self.0
    }
}

/// Process-local identity of a snapshot. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SnapshotId(Uuid);

impl SnapshotId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SnapshotId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A previously open document ("file").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentSnapshot {
    #[serde(skip)]
    pub id: SnapshotId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<EditorText>,
    /// Full CRDT encoding; present iff the document was collaborative.
    #[serde(default, skip_serializing_if = "Option::is_none", with = "base64_bytes")]
    pub crdt_bytes: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub markdown_mode: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collab_room: Option<String>,
}

impl DocumentSnapshot {
    fn blank() -> Self {
        Self {
            id: SnapshotId::new(),
            content: None,
            crdt_bytes: None,
            last_modified: None,
            path: None,
            markdown_mode: false,
            collab_room: None,
        }
    }

    /// Inline document, not bound to any file.
    pub fn with_content(content: EditorText) -> Self {
        Self {
            content: Some(content),
            ..Self::blank()
        }
    }

    /// Reference to a file on disk; content is loaded when re-opened.
    pub fn with_path(path: impl Into<String>) -> Self {
        Self {
            path: Some(path.into()),
            ..Self::blank()
        }
    }

    /// Collaborative document captured as CRDT bytes.
    pub fn with_crdt(bytes: Vec<u8>, room: Option<String>) -> Self {
        Self {
            crdt_bytes: Some(bytes),
            collab_room: room,
            ..Self::blank()
        }
    }

    pub fn modified_at(mut self, at: Option<Timestamp>) -> Self {
        self.last_modified = at;
        self
    }

    pub fn in_markdown_mode(mut self, markdown_mode: bool) -> Self {
        self.markdown_mode = markdown_mode;
        self
    }

    /// A snapshot must point at something that can be restored.
    pub fn is_valid(&self) -> bool {
        self.path.is_some() || self.crdt_bytes.is_some() || self.content.is_some()
    }
}

/// Serde adapter storing optional byte strings as base64 text.
pub mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Option<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(bytes) => s.serialize_str(&STANDARD.encode(bytes)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<u8>>, D::Error> {
        let text: Option<String> = Option::deserialize(d)?;
        text.map(|t| STANDARD.decode(t).map_err(serde::de::Error::custom))
            .transpose()
    }
}

// ─── Store ──────────────────────────────────────────────────────────

/// Ordered stack of archived documents, most recent last.
///
/// Every operation returns a new store; the old one is left untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SnapshotStore {
    entries: Vec<Arc<DocumentSnapshot>>,
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from loaded snapshots, dropping any that cannot be restored.
    pub fn from_snapshots(snapshots: impl IntoIterator<Item = DocumentSnapshot>) -> Self {
        snapshots
            .into_iter()
            .fold(Self::new(), |store, snapshot| store.append(snapshot))
    }

    /// New store with `snapshot` at the top.
    pub fn append(&self, snapshot: DocumentSnapshot) -> Self {
        self.append_shared(Arc::new(snapshot))
    }

    pub fn append_shared(&self, snapshot: Arc<DocumentSnapshot>) -> Self {
        if !snapshot.is_valid() {
            log::warn!("Refusing to archive snapshot {} with nothing to restore", snapshot.id);
            return self.clone();
        }
        let mut entries = self.entries.clone();
        entries.push(snapshot);
        Self { entries }
    }

    /// Index of the first entry with the same identity, falling back to
    /// the first entry with the same path.
    pub fn find_by_identity_or_path(&self, candidate: &DocumentSnapshot) -> Option<usize> {
        self.entries
            .iter()
            .position(|s| s.id == candidate.id)
            .or_else(|| {
                let path = candidate.path.as_deref()?;
                self.entries
                    .iter()
                    .position(|s| s.path.as_deref() == Some(path))
            })
    }

    /// New store without the entry carrying `id`.
    pub fn remove(&self, id: SnapshotId) -> Self {
        Self {
            entries: self
                .entries
                .iter()
                .filter(|s| s.id != id)
                .cloned()
                .collect(),
        }
    }

    pub fn get(&self, index: usize) -> Option<&Arc<DocumentSnapshot>> {
        self.entries.get(index)
    }

    pub fn last(&self) -> Option<&Arc<DocumentSnapshot>> {
        self.entries.last()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<DocumentSnapshot>> {
        self.entries.iter()
    }
}

impl Serialize for SnapshotStore {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.collect_seq(self.entries.iter().map(|e| e.as_ref()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::Node;

    fn text(line: &str) -> EditorText {
        EditorText::new(Node::from_lines([line]))
    }

    #[test]
    fn test_append_is_pure() {
        let empty = SnapshotStore::new();
        let one = empty.append(DocumentSnapshot::with_path("/tmp/a.md"));
        assert!(empty.is_empty());
        assert_eq!(one.len(), 1);
    }

    #[test]
    fn test_invalid_snapshot_never_stored() {
        let store = SnapshotStore::new().append(DocumentSnapshot::blank());
        assert!(store.is_empty());
        assert!(store.iter().all(|s| s.is_valid()));
    }

    #[test]
    fn test_find_prefers_identity_then_path() {
        let a = DocumentSnapshot::with_path("/tmp/a.md");
        let b = DocumentSnapshot::with_content(text("b"));
        let store = SnapshotStore::new().append(a.clone()).append(b.clone());

        assert_eq!(store.find_by_identity_or_path(&b), Some(1));

        // fresh identity, same path
        let again = DocumentSnapshot::with_path("/tmp/a.md");
        assert_eq!(store.find_by_identity_or_path(&again), Some(0));

        let other = DocumentSnapshot::with_content(text("c"));
        assert_eq!(store.find_by_identity_or_path(&other), None);
    }

    #[test]
    fn test_remove_by_identity() {
        let a = DocumentSnapshot::with_content(text("a"));
        let b = DocumentSnapshot::with_content(text("b"));
        let store = SnapshotStore::new().append(a.clone()).append(b.clone());

        let without_a = store.remove(a.id);
        assert_eq!(without_a.len(), 1);
        assert_eq!(without_a.last().unwrap().id, b.id);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_snapshot_json_shape() {
        let snapshot = DocumentSnapshot::with_crdt(vec![1, 2, 3], Some("room-1".into()))
            .modified_at(Some(Timestamp(42)));
        let value = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(value["crdtBytes"], "AQID");
        assert_eq!(value["lastModified"], 42);
        assert_eq!(value["collabRoom"], "room-1");
        assert!(value.get("id").is_none());
        assert!(value.get("markdownMode").is_none());

        let back: DocumentSnapshot = serde_json::from_value(value).unwrap();
        assert_eq!(back.crdt_bytes, Some(vec![1, 2, 3]));
        assert_ne!(back.id, snapshot.id);
    }

    #[test]
    fn test_bad_base64_rejected() {
        let result: Result<DocumentSnapshot, _> =
            serde_json::from_str(r#"{"crdtBytes":"***"}"#);
        assert!(result.is_err());
    }
}
