//! CRDT replica of one collaborative document.
//!
//! ```text
//! Doc
//!  ├── Y.Text "document"   markdown serialization of the tree
//!  └── Y.Map  "config"     font / fontSize / contentWidth
//! ```
//!
//! Local writes are tagged with [`LOCAL_ORIGIN`], updates received from a
//! provider with [`REMOTE_ORIGIN`]. Observers use the tag to tell the two
//! apart so remote changes are never echoed back to the network and local
//! changes never re-enter the controller.

use yrs::types::map::MapEvent;
use yrs::types::text::TextEvent;
use yrs::updates::decoder::Decode;
use yrs::updates::encoder::Encode;
use yrs::{
    Any, Doc, GetString, Map, MapRef, Observable, Origin, Out, ReadTxn, StateVector, Subscription,
    Text, TextRef, Transact, TransactionMut, Update,
};

use scribe_core::ConfigPatch;

use crate::error::CollabError;

pub const DOCUMENT: &str = "document";
pub const CONFIG: &str = "config";

pub const LOCAL_ORIGIN: &str = "scribe-local";
pub const REMOTE_ORIGIN: &str = "scribe-remote";

const FONT: &str = "font";
const FONT_SIZE: &str = "fontSize";
const CONTENT_WIDTH: &str = "contentWidth";

fn has_origin(txn: &TransactionMut, tag: &str) -> bool {
    txn.origin() == Some(&Origin::from(tag))
}

/// Cheap-to-clone handle to a Yrs document and its two shared containers.
#[derive(Clone)]
pub struct Replica {
    doc: Doc,
    text: TextRef,
    config: MapRef,
}

impl Replica {
    pub fn new() -> Self {
        let doc = Doc::new();
        let text = doc.get_or_insert_text(DOCUMENT);
        let config = doc.get_or_insert_map(CONFIG);
        Self { doc, text, config }
    }

    /// Rebuild a replica from a full state encoding.
    pub fn from_update(bytes: &[u8]) -> Result<Self, CollabError> {
        let replica = Self::new();
        replica.apply(bytes, LOCAL_ORIGIN)?;
        Ok(replica)
    }

    /// Seed an empty replica with the markdown text of the active document.
    pub fn seed_markdown(&self, markdown: &str) {
        let mut txn = self.doc.transact_mut_with(LOCAL_ORIGIN);
        if self.text.len(&txn) == 0 && !markdown.is_empty() {
            self.text.insert(&mut txn, 0, markdown);
        }
    }

    /// Current markdown text of the shared document.
    pub fn markdown(&self) -> String {
        let txn = self.doc.transact();
        self.text.get_string(&txn)
    }

    /// Replace the shared text with `markdown`, touching only the changed
    /// middle section. Returns `false` when nothing changed.
    pub fn set_markdown(&self, markdown: &str) -> bool {
        let mut txn = self.doc.transact_mut_with(LOCAL_ORIGIN);
        let current = self.text.get_string(&txn);
        match Splice::between(&current, markdown) {
            Some(splice) => {
                self.apply_splice(&mut txn, &splice);
                true
            }
            None => false,
        }
    }

    /// Apply the local edit that turned `base` into `markdown`, where
    /// `base` is the shared text as the editor last saw it.
    ///
    /// Remote edits merged since then stay in place unless they overlap
    /// the edited range, in which case the local text wins.
    pub fn rebase_markdown(&self, base: &str, markdown: &str) -> bool {
        let Some(local) = Splice::between(base, markdown) else {
            return false;
        };
        let mut txn = self.doc.transact_mut_with(LOCAL_ORIGIN);
        let current = self.text.get_string(&txn);
        let at = match Splice::between(base, &current) {
            None => Some(local.at),
            Some(remote) if local.at >= remote.at + remote.removed => {
                Some(local.at - remote.removed + remote.inserted.len())
            }
            Some(remote) if local.at + local.removed <= remote.at => Some(local.at),
            Some(_) => None,
        };
        match at {
            Some(at) => self.apply_splice(&mut txn, &Splice { at, ..local }),
            None => {
                if let Some(splice) = Splice::between(&current, markdown) {
                    self.apply_splice(&mut txn, &splice);
                }
            }
        }
        true
    }

    fn apply_splice(&self, txn: &mut TransactionMut, splice: &Splice) {
        if splice.removed > 0 {
            self.text
                .remove_range(txn, splice.at as u32, splice.removed as u32);
        }
        if !splice.inserted.is_empty() {
            self.text.insert(txn, splice.at as u32, &splice.inserted);
        }
    }

    /// Apply an update received from the network.
    pub fn apply_remote(&self, update: &[u8]) -> Result<(), CollabError> {
        self.apply(update, REMOTE_ORIGIN)
    }

    fn apply(&self, update: &[u8], origin: &str) -> Result<(), CollabError> {
        let update = Update::decode_v1(update)?;
        let mut txn = self.doc.transact_mut_with(origin);
        txn.apply_update(update)
            .map_err(|e| CollabError::Decode(e.to_string()))
    }

    /// Full state as a single update.
    pub fn encode_state(&self) -> Vec<u8> {
        let txn = self.doc.transact();
        txn.encode_state_as_update_v1(&StateVector::default())
    }

    pub fn state_vector(&self) -> Vec<u8> {
        let txn = self.doc.transact();
        txn.state_vector().encode_v1()
    }

    /// Diff between our state and a remote state vector.
    pub fn diff_since(&self, remote_state_vector: &[u8]) -> Result<Vec<u8>, CollabError> {
        let sv = StateVector::decode_v1(remote_state_vector)?;
        let txn = self.doc.transact();
        Ok(txn.encode_state_as_update_v1(&sv))
    }

    // ─── Shared config ────────────────────────────────────────────────

    /// Write the shared subset of `patch` into the config map.
    pub fn set_shared_config(&self, patch: &ConfigPatch) {
        let mut txn = self.doc.transact_mut_with(LOCAL_ORIGIN);
        if let Some(font) = &patch.font {
            self.config.insert(&mut txn, FONT, font.clone());
        }
        if let Some(size) = patch.font_size {
            self.config.insert(&mut txn, FONT_SIZE, size);
        }
        if let Some(width) = patch.content_width {
            self.config.insert(&mut txn, CONTENT_WIDTH, width);
        }
    }

    pub fn shared_config(&self) -> ConfigPatch {
        let txn = self.doc.transact();
        read_config(&self.config, &txn)
    }

    /// Observe config map changes made by other peers.
    pub fn observe_remote_config<F>(&self, callback: F) -> Subscription
    where
        F: Fn(ConfigPatch) + Send + Sync + 'static,
    {
        self.config.observe(move |txn, event: &MapEvent| {
            if has_origin(txn, LOCAL_ORIGIN) {
                return;
            }
            callback(read_config(event.target(), txn));
        })
    }

    /// Observe document text changes made by other peers.
    pub fn observe_remote_document<F>(&self, callback: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.text.observe(move |txn, _event: &TextEvent| {
            if !has_origin(txn, LOCAL_ORIGIN) {
                callback();
            }
        })
    }

    /// Observe every update that did not arrive from the network; these are
    /// the ones a provider has to ship.
    pub fn observe_outgoing<F>(&self, callback: F) -> Result<Subscription, CollabError>
    where
        F: Fn(Vec<u8>) + Send + Sync + 'static,
    {
        self.doc
            .observe_update_v1(move |txn, event| {
                if !has_origin(txn, REMOTE_ORIGIN) {
                    callback(event.update.clone());
                }
            })
            .map_err(|e| CollabError::Decode(e.to_string()))
    }
}

impl Default for Replica {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Replica {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Replica")
            .field("client_id", &self.doc.client_id())
            .finish()
    }
}

fn read_config<T: ReadTxn>(map: &MapRef, txn: &T) -> ConfigPatch {
    let number = |key: &str| match map.get(txn, key) {
        Some(Out::Any(Any::Number(n))) => Some(n),
        Some(Out::Any(Any::BigInt(n))) => Some(n as f64),
        _ => None,
    };
    let font = match map.get(txn, FONT) {
        Some(Out::Any(Any::String(s))) => Some(s.to_string()),
        _ => None,
    };
    ConfigPatch {
        font,
        font_size: number(FONT_SIZE),
        content_width: number(CONTENT_WIDTH),
        ..Default::default()
    }
}

/// Byte length of the longest common prefix, on a char boundary.
/// One contiguous replacement, in bytes of the text it applies to.
#[derive(Debug, PartialEq)]
struct Splice {
    at: usize,
    removed: usize,
    inserted: String,
}

impl Splice {
    /// The changed middle section between `from` and `to`; `None` when
    /// they are equal.
    fn between(from: &str, to: &str) -> Option<Self> {
        if from == to {
            return None;
        }
        let prefix = common_prefix(from, to);
        let suffix = common_suffix(&from[prefix..], &to[prefix..]);
        Some(Self {
            at: prefix,
            removed: from.len() - prefix - suffix,
            inserted: to[prefix..to.len() - suffix].to_string(),
        })
    }
}

fn common_prefix(a: &str, b: &str) -> usize {
    a.char_indices()
        .zip(b.chars())
        .take_while(|((_, x), y)| x == y)
        .last()
        .map_or(0, |((i, x), _)| i + x.len_utf8())
}

/// Byte length of the longest common suffix, on a char boundary.
fn common_suffix(a: &str, b: &str) -> usize {
    a.chars()
        .rev()
        .zip(b.chars().rev())
        .take_while(|(x, y)| x == y)
        .map(|(x, _)| x.len_utf8())
        .sum()
}
