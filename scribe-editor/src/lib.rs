//! # scribe-editor - Document controller for the Scribe editor
//!
//! Owns the one active document and moves it through its lifecycle:
//! load, edit, archive, discard, share in a room, persist.
//!
//! ```text
//! UI ──Command──► Dispatcher ──► Controller ──► ControllerState ──► UI
//!                                   │  │
//!                 FileSource ◄──────┘  ├──► CollabSession (scribe-collab)
//!                                      └──► PersistenceGateway ──► DurableStore
//! ```
//!
//! ## Modules
//!
//! - [`controller`] - the transitions
//! - [`dispatcher`] - shared, queued command handle
//! - [`state`] - `ControllerState` and friends
//! - [`persisted`] - stored record schema and its validation
//! - [`persistence`] - debounced background writer
//! - [`files`] - markdown file collaborator
//! - [`host`] - window route and host theme preference
//! - [`options`] - runtime options and collaborator wiring

pub mod controller;
pub mod dispatcher;
pub mod files;
pub mod host;
pub mod options;
pub mod persisted;
pub mod persistence;
pub mod state;

pub use controller::{Controller, KeyCommand};
pub use dispatcher::{Command, Dispatcher};
pub use files::{FileSource, LocalFiles, MemoryFiles};
pub use host::{FixedTheme, HostTheme, MemoryRoute, Route};
pub use options::{Collaborators, EditorOptions};
pub use persisted::{PersistedCollab, PersistedState, STATE_KEY};
pub use persistence::{PersistenceGateway, SaveRecord};
pub use state::{CollabState, ControllerState, LoadingPhase, StartupArgs};
