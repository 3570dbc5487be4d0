//! Document controller: owns the editor state and every transition on it.
//!
//! ```text
//!   init / commands ──► Controller ──► ControllerState (read by the UI)
//!                        │    │   │
//!        FileSource ◄────┘    │   └────► PersistenceGateway ──► DurableStore
//!                             ▼
//!                      CollabSession ◄──► SyncProvider (hub / relay)
//! ```
//!
//! Transitions take `&mut self`, so two of them never interleave. The
//! few that read a file suspend before touching any state and either
//! commit completely or route the failure to `state.error`.

use std::future::Future;
use std::sync::Arc;

use scribe_collab::{CollabSession, DurableStore, Replica, SessionEvent, SyncProvider};
use scribe_core::markdown::{self, Schema};
use scribe_core::{
    Config, ConfigPatch, DocumentSnapshot, EditorText, Node, ServiceError, SnapshotId,
    SnapshotStore, Timestamp,
};
use uuid::Uuid;

use crate::files::FileSource;
use crate::host::{HostTheme, Route};
use crate::options::{Collaborators, EditorOptions};
use crate::persisted::{PersistedCollab, PersistedState, STATE_KEY};
use crate::persistence::{PersistenceGateway, SaveRecord};
use crate::state::{CollabState, ControllerState, LoadingPhase, StartupArgs};

/// Editor shortcuts routed to the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyCommand {
    New,
    Discard,
    Fullscreen,
}

pub struct Controller {
    state: ControllerState,
    store: Arc<dyn DurableStore>,
    files: Arc<dyn FileSource>,
    provider: Arc<dyn SyncProvider>,
    route: Box<dyn Route>,
    theme: Box<dyn HostTheme>,
    gateway: PersistenceGateway,
}

impl Controller {
    /// Build a controller in the `Loading` phase. Must be called inside a
    /// tokio runtime; the persistence writer runs on it.
    pub fn new(
        collaborators: Collaborators,
        startup: StartupArgs,
        options: &EditorOptions,
    ) -> Result<Self, ServiceError> {
        let gateway = PersistenceGateway::spawn(
            collaborators.store.clone(),
            collaborators.files.clone(),
            options.save_debounce,
        )?;
        Ok(Self {
            state: ControllerState::new(startup),
            store: collaborators.store,
            files: collaborators.files,
            provider: collaborators.provider,
            route: collaborators.route,
            theme: collaborators.theme,
            gateway,
        })
    }

    pub fn state(&self) -> &ControllerState {
        &self.state
    }

    /// Write any pending save now.
    pub fn flush(&self) -> impl Future<Output = ()> + Send + 'static {
        self.gateway.flush()
    }

    // ─── Startup ────────────────────────────────────────────────────

    /// Load the persisted state and decide what the first document is.
    ///
    /// Always ends `Ready`; failures land in `state.error`.
    pub async fn init(&mut self) {
        log::info!("Initializing editor");
        let result = match fetch_persisted(self.store.clone()).await {
            Ok(persisted) => self.restore(persisted).await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            self.set_error(e);
        }

        let theme = self
            .state
            .config
            .theme_for(self.theme.prefers_dark(), false);
        self.state.config = self.state.config.merge(&theme);
        self.state.loading = LoadingPhase::Ready;
        if self.state.config.always_on_top {
            log::debug!("Window pinned on top");
        }
    }

    async fn restore(&mut self, persisted: Option<PersistedState>) -> Result<(), ServiceError> {
        let mut saved = None;
        if let Some(persisted) = persisted {
            self.state.last_modified = persisted.last_modified;
            self.state.snapshots = SnapshotStore::from_snapshots(persisted.files);
            self.state.config = persisted.config;
            self.state.path = persisted.path;
            self.state.markdown_mode = persisted.markdown_mode;
            self.state.collab = persisted.collab.room.map(CollabState::detached);
            self.state.active = persisted.text.unwrap_or_else(EditorText::empty);
            saved = persisted.ydoc_bytes_base64;
        }

        let startup = self.state.startup.clone();
        if self.state.collab.is_some() || startup.room.is_some() {
            self.start_session(None, saved);
        } else if let Some(text) = startup.text {
            let text: EditorText = serde_json::from_str(&text).map_err(ServiceError::exception)?;
            self.do_open_file(DocumentSnapshot::with_content(text)).await?;
        } else if let Some(file) = startup.file {
            let loading = self.load_file(&file);
            self.do_open_file(loading.await?).await?;
        } else if let Some(path) = self.state.path.clone() {
            let loading = self.load_file(&path);
            self.do_open_file(loading.await?).await?;
        }
        Ok(())
    }

    /// Read and parse a markdown file into a path-bound snapshot.
    pub fn load_file(
        &self,
        path: &str,
    ) -> impl Future<Output = Result<DocumentSnapshot, ServiceError>> + Send + 'static {
        let files = self.files.clone();
        let path = path.to_string();
        async move {
            let (content, modified) = files.read(&path).await?;
            let doc = markdown::parse(&content, Schema::Rich)
                .map_err(|e| ServiceError::permission_denied(&path, e))?;
            Ok(DocumentSnapshot {
                content: Some(EditorText::new(doc)),
                ..DocumentSnapshot::with_path(path)
            }
            .modified_at(Some(modified)))
        }
    }

    // ─── Document transitions ───────────────────────────────────────

    /// Start over with an empty document, archiving the current one when
    /// it has unsaved content of its own.
    pub fn new_file(&mut self) {
        if !self.ensure_ready("new_file") {
            return;
        }
        if self.state.error.is_none() && self.has_unsaved_text() {
            let snapshot = self.archive_current(None);
            self.state.snapshots = archive(&self.state.snapshots, snapshot);
        }

        self.stop_session();
        self.state.startup = self.state.startup.cwd_only();
        self.state.last_modified = None;
        self.state.path = None;
        self.state.error = None;
        self.state.active = EditorText::empty();
        log::debug!("New file ({} archived)", self.state.snapshots.len());
        self.schedule_save();
    }

    pub async fn open_file(&mut self, file: DocumentSnapshot) {
        if !self.ensure_ready("open_file") {
            return;
        }
        if let Err(e) = self.do_open_file(file).await {
            self.set_error(e);
        }
        self.schedule_save();
    }

    async fn do_open_file(&mut self, file: DocumentSnapshot) -> Result<(), ServiceError> {
        let mut file = self
            .state
            .snapshots
            .find_by_identity_or_path(&file)
            .and_then(|index| self.state.snapshots.get(index))
            .map(|stored| stored.as_ref().clone())
            .unwrap_or(file);
        if file.content.is_none() {
            if let Some(path) = file.path.clone() {
                let loading = self.load_file(&path);
                let loaded = loading.await?;
                file = DocumentSnapshot {
                    id: file.id,
                    collab_room: file.collab_room.take(),
                    ..loaded
                };
            }
        }

        let mut snapshots = self.state.snapshots.remove(file.id);
        if self.has_unsaved_text() {
            snapshots = archive(&snapshots, self.archive_current(None));
        }

        self.stop_session();
        log::debug!("Opening {}", file.path.as_deref().unwrap_or("inline document"));
        self.state.startup = self.state.startup.cwd_only();
        self.state.snapshots = snapshots;
        self.state.error = None;
        self.adopt(file);
        Ok(())
    }

    /// Make `file` the active document, rejoining its room if it has one.
    fn adopt(&mut self, file: DocumentSnapshot) {
        self.state.last_modified = file.last_modified;
        self.state.path = file.path;
        self.state.markdown_mode = file.markdown_mode;
        self.state.collab = file.collab_room.map(CollabState::detached);
        self.state.active = file.content.unwrap_or_else(EditorText::empty);
        self.start_session(None, file.crdt_bytes);
    }

    /// Close the current document.
    ///
    /// A document bound to a file or room is archived and the top of the
    /// stack restored; an empty document pops the stack or starts a new
    /// file; anything else is cleared in place.
    pub async fn discard(&mut self) {
        if !self.ensure_ready("discard") {
            return;
        }
        let bound = self.state.path.is_some() || self.state.collab.is_some();
        let empty = self.state.active.is_empty();
        if bound || (!self.state.snapshots.is_empty() && empty) {
            if let Err(e) = self.discard_text(bound).await {
                self.set_error(e);
            }
        } else if empty {
            self.new_file();
            return;
        } else {
            self.state.active = EditorText::empty();
            self.state.last_modified = Some(Timestamp::now());
            self.push_to_replica();
        }
        self.schedule_save();
    }

    async fn discard_text(&mut self, archive_current: bool) -> Result<(), ServiceError> {
        let top = self.state.snapshots.last().cloned();
        let mut snapshots = match &top {
            Some(top) => self.state.snapshots.remove(top.id),
            None => self.state.snapshots.clone(),
        };
        let mut file = top
            .map(|top| top.as_ref().clone())
            .unwrap_or_else(|| DocumentSnapshot::with_content(EditorText::empty()));
        if let Some(path) = file.path.clone() {
            let loading = self.load_file(&path);
            let loaded = loading.await?;
            file = DocumentSnapshot {
                collab_room: file.collab_room.take(),
                ..loaded
            };
        }

        if archive_current && self.state.error.is_none() {
            snapshots = archive(&snapshots, self.archive_current(None));
        }

        self.stop_session();
        log::debug!("Discarded document, {} archived", snapshots.len());
        self.state.startup = self.state.startup.cwd_only();
        self.state.snapshots = snapshots;
        self.state.error = None;
        self.adopt(file);
        Ok(())
    }

    /// Switch between the rich view and the one-paragraph-per-line
    /// markdown source view.
    pub fn toggle_markdown(&mut self) {
        if !self.ensure_ready("toggle_markdown") {
            return;
        }
        let entering = !self.state.markdown_mode;
        let doc = if entering {
            let source = markdown::serialize(&self.state.active.doc);
            let source = source.strip_suffix('\n').unwrap_or(&source);
            Node::from_lines(source.split('\n'))
        } else {
            let source: String = markdown::plain_lines(&self.state.active.doc)
                .into_iter()
                .map(|line| line + "\n")
                .collect();
            match markdown::parse(&source, Schema::Rich) {
                Ok(doc) => doc,
                Err(e) => {
                    self.set_error(e);
                    return;
                }
            }
        };

        self.state.markdown_mode = entering;
        self.state.active = EditorText::new(doc);
        self.push_to_replica();
        self.schedule_save();
    }

    /// The editing widget hands over its new state.
    pub fn dispatch(&mut self, text: EditorText) {
        if !self.ensure_ready("dispatch") {
            return;
        }
        let changed = text.doc != self.state.active.doc;
        self.state.active = text;
        if changed {
            self.state.last_modified = Some(Timestamp::now());
            self.push_to_replica();
            self.schedule_save();
        }
    }

    /// Forget everything but the window state and working directory.
    pub fn clean(&mut self) {
        self.stop_session();
        let fullscreen = self.state.fullscreen;
        let mut state = ControllerState::new(self.state.startup.cwd_only());
        state.loading = LoadingPhase::Ready;
        state.fullscreen = fullscreen;
        state.last_modified = Some(Timestamp::now());
        self.state = state;
        log::debug!("Cleaned editor state");
        self.schedule_save();
    }

    // ─── Settings ───────────────────────────────────────────────────

    pub fn update_config(&mut self, patch: &ConfigPatch) {
        let shared = ConfigPatch {
            font: patch.font.clone().filter(|font| !font.is_empty()),
            font_size: patch.font_size.filter(|size| *size != 0.0),
            content_width: patch.content_width.filter(|width| *width != 0.0),
            ..ConfigPatch::default()
        };
        if !shared.is_empty() {
            if let Some(session) = self.state.session() {
                session.replica().set_shared_config(&shared);
            }
        }
        self.state.config = self.state.config.merge(patch);
        self.schedule_save();
    }

    pub fn set_always_on_top(&mut self, always_on_top: bool) {
        self.update_config(&ConfigPatch {
            always_on_top: Some(always_on_top),
            ..ConfigPatch::default()
        });
    }

    pub fn set_fullscreen(&mut self, fullscreen: bool) {
        self.state.fullscreen = fullscreen;
    }

    /// Bind the active document to `path`.
    pub fn update_path(&mut self, path: impl Into<String>) {
        self.state.path = Some(path.into());
        self.state.last_modified = Some(Timestamp::now());
        self.schedule_save();
    }

    /// Re-detect the theme from the host, overriding an explicit choice.
    pub fn update_theme(&mut self) {
        let theme = self.state.config.theme_for(self.theme.prefers_dark(), true);
        self.state.config = self.state.config.merge(&theme);
        self.schedule_save();
    }

    pub async fn keymap(&mut self, command: KeyCommand) -> bool {
        match command {
            KeyCommand::New => self.new_file(),
            KeyCommand::Discard => self.discard().await,
            KeyCommand::Fullscreen => self.set_fullscreen(!self.state.fullscreen),
        }
        true
    }

    // ─── Collaboration ──────────────────────────────────────────────

    /// Share the active document in a freshly generated room.
    pub fn start_collab(&mut self) {
        if !self.ensure_ready("start_collab") {
            return;
        }
        self.start_session(Some(Uuid::new_v4().to_string()), None);
        self.schedule_save();
    }

    /// Apply what the session received since the last call.
    ///
    /// Returns whether the state changed.
    pub fn pump_remote(&mut self) -> bool {
        let Some(session) = self.state.session_mut() else {
            return false;
        };
        let events = session.drain_events();
        let mut changed = false;
        let mut save = false;
        for event in events {
            match event {
                SessionEvent::ConfigChanged(patch) => {
                    let patch = patch.shared_subset();
                    if self.state.config.differs(&patch) {
                        self.state.config = self.state.config.merge(&patch);
                        changed = true;
                        save = true;
                    }
                }
                SessionEvent::DocumentChanged => {
                    let Some(text) = self.state.session().map(|s| s.replica().markdown()) else {
                        continue;
                    };
                    if text != self.document_markdown() {
                        self.project(&text);
                        self.state.last_modified = Some(Timestamp::now());
                        changed = true;
                        save = true;
                    }
                    self.mark_synced(text);
                }
                SessionEvent::Status(status) => {
                    log::info!("Collaboration {:?}", status);
                    changed = true;
                }
            }
        }
        if save {
            self.schedule_save();
        }
        changed
    }

    /// Join `requested`, the startup room or the document's room, in
    /// that order of preference. No room, no session.
    fn start_session(&mut self, requested: Option<String>, saved: Option<Vec<u8>>) {
        let current_room = self.state.collab_room().map(str::to_string);
        let Some(room) = requested
            .or_else(|| self.state.startup.room.clone())
            .or_else(|| current_room.clone())
        else {
            return;
        };

        let replica = Replica::new();
        match &saved {
            Some(bytes) if current_room.as_deref() == Some(room.as_str()) => {
                if let Err(e) = replica.apply_remote(bytes) {
                    log::warn!("Saved document for room {} is unreadable: {}", room, e);
                    self.set_error(ServiceError::exception(e));
                }
            }
            _ if !self.state.is_collaborative() && !self.state.active.is_empty() => {
                replica.seed_markdown(&self.document_markdown());
            }
            _ => {}
        }

        let startup_room = self.state.startup.room.clone();
        let archive_previous = self.state.path.is_some()
            || (startup_room.is_some()
                && startup_room != current_room
                && (!self.state.active.is_empty() || saved.is_some()));
        if archive_previous {
            if self.state.error.is_none() {
                let snapshot = self.archive_current(saved);
                self.state.snapshots = archive(&self.state.snapshots, snapshot);
            }
            self.state.last_modified = None;
            self.state.path = None;
            self.state.error = None;
        }

        self.stop_session();
        replica.set_shared_config(&shared_config(&self.state.config));
        match CollabSession::start(&room, replica.clone(), self.provider.as_ref()) {
            Ok(session) => {
                log::debug!("Document shared in room {}", room);
                self.route.replace(&format!("/{room}"));
                self.state.collab = Some(CollabState {
                    session: Some(session),
                    ..CollabState::detached(room)
                });
            }
            Err(e) => {
                self.state.collab = Some(CollabState::detached(room));
                self.set_error(ServiceError::exception(e));
            }
        }

        let text = replica.markdown();
        if text != self.document_markdown() {
            self.project(&text);
        }
        self.mark_synced(text);
    }

    fn stop_session(&mut self) {
        let Some(mut collab) = self.state.collab.take() else {
            return;
        };
        if let Some(mut session) = collab.session.take() {
            session.stop();
            log::info!("Left room {}", collab.room);
        }
        self.route.replace("/");
    }

    /// Send the local edit since the last sync to the room.
    fn push_to_replica(&mut self) {
        let markdown = self.document_markdown();
        let Some(collab) = self.state.collab.as_mut() else {
            return;
        };
        if let Some(session) = &collab.session {
            session.replica().rebase_markdown(&collab.synced, &markdown);
            collab.synced = markdown;
        }
    }

    fn mark_synced(&mut self, text: String) {
        if let Some(collab) = self.state.collab.as_mut() {
            collab.synced = text;
        }
    }

    /// Replace the tree with the parse of the shared text.
    fn project(&mut self, text: &str) {
        match markdown::parse(text, Schema::for_markdown_mode(self.state.markdown_mode)) {
            Ok(doc) => {
                self.state.active = EditorText {
                    doc,
                    selection: self.state.active.selection,
                };
            }
            Err(e) => log::warn!("Shared document does not parse: {}", e),
        }
    }

    /// Markdown form of the active document, as shared with the room and
    /// written to its file.
    fn document_markdown(&self) -> String {
        if self.state.markdown_mode {
            let mut source = markdown::plain_lines(&self.state.active.doc).join("\n");
            source.push('\n');
            source
        } else {
            markdown::serialize(&self.state.active.doc)
        }
    }

    // ─── Archiving and persistence ──────────────────────────────────

    /// Whether the active document holds text that lives nowhere else.
    fn has_unsaved_text(&self) -> bool {
        !self.state.active.is_empty() && self.state.path.is_none()
    }

    /// Snapshot of the active document. Collaborative documents keep their
    /// CRDT encoding, path-bound ones only their path.
    fn archive_current(&self, saved: Option<Vec<u8>>) -> DocumentSnapshot {
        let room = self.state.collab_room().map(str::to_string);
        let crdt_bytes = match saved {
            Some(bytes) => Some(bytes),
            None if room.is_some() => self.state.session().map(|s| s.replica().encode_state()),
            None => None,
        };
        let content = match (&crdt_bytes, &self.state.path) {
            (None, None) => Some(self.state.active.clone()),
            _ => None,
        };
        DocumentSnapshot {
            id: SnapshotId::new(),
            content,
            crdt_bytes,
            last_modified: self.state.last_modified,
            path: self.state.path.clone(),
            markdown_mode: self.state.markdown_mode,
            collab_room: room,
        }
    }

    fn schedule_save(&self) {
        if !self.state.is_ready() {
            return;
        }
        match self.save_record() {
            Ok(record) => self.gateway.schedule(record),
            Err(e) => log::warn!("Could not build save record: {}", e),
        }
    }

    fn save_record(&self) -> Result<SaveRecord, ServiceError> {
        let mut persisted = PersistedState {
            last_modified: self.state.last_modified,
            files: self
                .state
                .snapshots
                .iter()
                .map(|snapshot| snapshot.as_ref().clone())
                .collect(),
            config: self.state.config.clone(),
            path: self.state.path.clone(),
            markdown_mode: self.state.markdown_mode,
            collab: PersistedCollab {
                room: self.state.collab_room().map(str::to_string),
            },
            text: None,
            ydoc_bytes_base64: None,
        };

        let mut file = None;
        if let Some(path) = &self.state.path {
            file = Some((path.clone(), self.document_markdown()));
        } else if self.state.collab.is_some() {
            persisted.ydoc_bytes_base64 = self.state.session().map(|s| s.replica().encode_state());
        } else {
            persisted.text = Some(self.state.active.clone());
        }

        Ok(SaveRecord {
            state: persisted.to_json()?,
            file,
        })
    }

    fn ensure_ready(&self, operation: &str) -> bool {
        if !self.state.is_ready() {
            log::debug!("Ignoring {} before init", operation);
        }
        self.state.is_ready()
    }

    fn set_error(&mut self, error: ServiceError) {
        log::error!("{}: {}", error.id(), error);
        self.state.error = Some(error.to_object());
        self.state.loading = LoadingPhase::Ready;
    }
}

async fn fetch_persisted(
    store: Arc<dyn DurableStore>,
) -> Result<Option<PersistedState>, ServiceError> {
    let bytes = tokio::task::spawn_blocking(move || store.get(STATE_KEY))
        .await
        .map_err(ServiceError::exception)?
        .map_err(ServiceError::exception)?;
    bytes
        .map(|bytes| PersistedState::from_json(&bytes, &Config::default()))
        .transpose()
}

/// `snapshots` with `snapshot` on top. A path-bound snapshot replaces any
/// older entry for the same path.
fn archive(snapshots: &SnapshotStore, snapshot: DocumentSnapshot) -> SnapshotStore {
    let mut snapshots = snapshots.clone();
    if snapshot.path.is_some() {
        while let Some(stale) = snapshots
            .find_by_identity_or_path(&snapshot)
            .and_then(|index| snapshots.get(index))
            .map(|stale| stale.id)
        {
            snapshots = snapshots.remove(stale);
        }
    }
    snapshots.append(snapshot)
}

fn shared_config(config: &Config) -> ConfigPatch {
    ConfigPatch {
        font: config.font.clone(),
        font_size: Some(config.font_size),
        content_width: Some(config.content_width),
        ..ConfigPatch::default()
    }
}
