//! Controller state: the single source of truth the presentation layer reads.
//!
//! `ControllerState` is owned by the [`Controller`](crate::Controller) and
//! only ever mutated by its transitions. Readers get `&ControllerState`.

use scribe_collab::{CollabSession, ConnectionState};
use scribe_core::{Config, EditorText, ErrorObject, SnapshotStore, Timestamp};
use serde::{Deserialize, Serialize};

/// Whether `init` has finished. Document commands require `Ready`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LoadingPhase {
    #[default]
    #[serde(rename = "loading")]
    Loading,
    #[serde(rename = "initialized")]
    Ready,
}

impl LoadingPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Loading => "loading",
            Self::Ready => "initialized",
        }
    }
}

/// Arguments the process was started with.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartupArgs {
    pub cwd: Option<String>,
    pub file: Option<String>,
    pub room: Option<String>,
    /// Serialized `EditorText` to open as an ad-hoc document.
    pub text: Option<String>,
}

impl StartupArgs {
    /// Everything but the working directory dropped.
    pub fn cwd_only(&self) -> Self {
        Self {
            cwd: self.cwd.clone(),
            ..Self::default()
        }
    }
}

/// The collaboration the active document belongs to.
///
/// A room without a session means the document was archived from a room
/// but the session is not running (yet).
pub struct CollabState {
    pub room: String,
    pub(crate) session: Option<CollabSession>,
    /// Shared text as of the last push or projection; local edits are
    /// diffed against it.
    pub(crate) synced: String,
}

impl CollabState {
    pub(crate) fn detached(room: impl Into<String>) -> Self {
        Self {
            room: room.into(),
            session: None,
            synced: String::new(),
        }
    }

    pub fn is_started(&self) -> bool {
        self.session.as_ref().is_some_and(|s| s.is_live())
    }

    pub fn status(&self) -> ConnectionState {
        self.session
            .as_ref()
            .map_or(ConnectionState::Disconnected, |s| s.status())
    }

    pub fn session(&self) -> Option<&CollabSession> {
        self.session.as_ref()
    }
}

impl std::fmt::Debug for CollabState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollabState")
            .field("room", &self.room)
            .field("started", &self.is_started())
            .finish()
    }
}

#[derive(Debug)]
pub struct ControllerState {
    pub active: EditorText,
    pub markdown_mode: bool,
    pub last_modified: Option<Timestamp>,
    pub snapshots: SnapshotStore,
    pub config: Config,
    pub error: Option<ErrorObject>,
    pub loading: LoadingPhase,
    pub fullscreen: bool,
    pub collab: Option<CollabState>,
    pub path: Option<String>,
    pub startup: StartupArgs,
}

impl ControllerState {
    pub fn new(startup: StartupArgs) -> Self {
        Self {
            active: EditorText::empty(),
            markdown_mode: false,
            last_modified: None,
            snapshots: SnapshotStore::new(),
            config: Config::default(),
            error: None,
            loading: LoadingPhase::Loading,
            fullscreen: false,
            collab: None,
            path: None,
            startup,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.loading == LoadingPhase::Ready
    }

    pub fn collab_room(&self) -> Option<&str> {
        self.collab.as_ref().map(|c| c.room.as_str())
    }

    /// The running session, if any.
    pub fn session(&self) -> Option<&CollabSession> {
        self.collab.as_ref().and_then(|c| c.session.as_ref())
    }

    pub(crate) fn session_mut(&mut self) -> Option<&mut CollabSession> {
        self.collab.as_mut().and_then(|c| c.session.as_mut())
    }

    pub fn is_collaborative(&self) -> bool {
        self.session().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_state_is_loading_and_empty() {
        let state = ControllerState::new(StartupArgs::default());
        assert_eq!(state.loading, LoadingPhase::Loading);
        assert!(state.active.is_empty());
        assert!(state.snapshots.is_empty());
        assert!(!state.is_collaborative());
    }

    #[test]
    fn test_loading_phase_names() {
        assert_eq!(LoadingPhase::Ready.as_str(), "initialized");
        assert_eq!(
            serde_json::to_value(LoadingPhase::Loading).unwrap(),
            serde_json::json!("loading")
        );
    }

    #[test]
    fn test_cwd_only_drops_the_rest() {
        let args = StartupArgs {
            cwd: Some("/home".into()),
            file: Some("a.md".into()),
            room: Some("r".into()),
            text: None,
        };
        let kept = args.cwd_only();
        assert_eq!(kept.cwd.as_deref(), Some("/home"));
        assert!(kept.file.is_none() && kept.room.is_none());
    }

    #[test]
    fn test_detached_collab_is_not_started() {
        let collab = CollabState::detached("room");
        assert!(!collab.is_started());
        assert_eq!(collab.status(), ConnectionState::Disconnected);
    }
}
