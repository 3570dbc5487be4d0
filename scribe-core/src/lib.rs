//! # scribe-core - Document model for the Scribe editor
//!
//! Everything here is plain data plus pure functions; no I/O, no async.
//!
//! ```text
//! markdown text ──parse──► Node (doc) ──serialize──► markdown text
//!                             │
//!                        EditorText {doc, selection}
//!                             │
//!                    DocumentSnapshot ──► SnapshotStore (stack)
//! ```
//!
//! ## Modules
//!
//! - [`tree`] - ProseMirror-shaped document tree and editor selection
//! - [`markdown`] - markdown ⇄ tree bridge (comrak parser, hand serializer)
//! - [`config`] - user settings, partial patches and the theme palette
//! - [`snapshot`] - archived documents and the snapshot stack
//! - [`error`] - user-facing service errors

pub mod config;
pub mod error;
pub mod markdown;
pub mod snapshot;
pub mod tree;

pub use config::{Config, ConfigPatch, PrettierConfig, Theme, THEMES};
pub use error::{ErrorObject, ServiceError};
pub use markdown::{parse, plain_lines, serialize, Schema};
pub use snapshot::{DocumentSnapshot, SnapshotId, SnapshotStore, Timestamp};
pub use tree::{EditorText, Mark, Node, Selection, SelectionKind};
