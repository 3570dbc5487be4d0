//! Controller integration tests.
//!
//! Verifies:
//! - `init` restores, validates and picks the first document
//! - new / open / discard keep the snapshot stack consistent
//! - markdown mode and config updates
//! - collaboration start, stop and convergence through the in-process hub
//! - debounced saves land in the durable store and bound files

use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use scribe_collab::{
    CollabError, DurableStore, LocalHub, MemoryStore, ProviderHandle, Replica, SyncProvider,
};
use scribe_core::{markdown, ConfigPatch, DocumentSnapshot, EditorText, Node, Timestamp};
use scribe_editor::{
    Collaborators, Controller, EditorOptions, FixedTheme, LoadingPhase, MemoryFiles, MemoryRoute,
    StartupArgs, STATE_KEY,
};
use serde_json::{json, Value};
use tokio::time::{sleep, timeout};

// ─── Helpers ─────────────────────────────────────────────────────────────────

struct Harness {
    controller: Controller,
    store: Arc<MemoryStore>,
    files: MemoryFiles,
    route: MemoryRoute,
}

struct Setup {
    store: Arc<MemoryStore>,
    files: MemoryFiles,
    hub: LocalHub,
    provider: Option<Arc<dyn SyncProvider>>,
    startup: StartupArgs,
    dark: bool,
}

impl Default for Setup {
    fn default() -> Self {
        Self {
            store: Arc::new(MemoryStore::new()),
            files: MemoryFiles::new(),
            hub: LocalHub::new(),
            provider: None,
            startup: StartupArgs::default(),
            dark: false,
        }
    }
}

impl Setup {
    fn persisted(mut self, state: Value) -> Self {
        self.store = Arc::new(MemoryStore::with_entry(
            STATE_KEY,
            serde_json::to_vec(&state).unwrap(),
        ));
        self
    }

    fn build(self) -> Harness {
        let route = MemoryRoute::new();
        let provider = self
            .provider
            .unwrap_or_else(|| Arc::new(self.hub.clone()));
        let collaborators = Collaborators::in_memory()
            .with_store(self.store.clone())
            .with_files(Arc::new(self.files.clone()))
            .with_provider(provider)
            .with_route(route.clone())
            .with_theme(FixedTheme { dark: self.dark });
        let options = EditorOptions {
            save_debounce: Duration::from_millis(10),
            ..EditorOptions::default()
        };
        Harness {
            controller: Controller::new(collaborators, self.startup, &options).unwrap(),
            store: self.store,
            files: self.files,
            route,
        }
    }

    async fn ready(self) -> Harness {
        let mut harness = self.build();
        harness.controller.init().await;
        harness
    }
}

impl Harness {
    async fn saved(&self) -> Value {
        self.controller.flush().await;
        let bytes = self.store.get(STATE_KEY).unwrap().expect("state saved");
        serde_json::from_slice(&bytes).unwrap()
    }
}

fn text(lines: &[&str]) -> EditorText {
    EditorText::new(Node::from_lines(lines.iter().copied()))
}

fn lines(controller: &Controller) -> Vec<String> {
    markdown::plain_lines(&controller.state().active.doc)
}

fn snapshot_paths(controller: &Controller) -> Vec<Option<String>> {
    controller
        .state()
        .snapshots
        .iter()
        .map(|s| s.path.clone())
        .collect()
}

/// Provider whose rooms can never be reached.
struct Unreachable;

impl SyncProvider for Unreachable {
    fn connect(&self, room: &str, _: &Replica) -> Result<Box<dyn ProviderHandle>, CollabError> {
        Err(CollabError::Connection(format!("room {room} unreachable")))
    }
}

async fn settle(mut done: impl FnMut() -> bool) {
    timeout(Duration::from_secs(5), async {
        while !done() {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition never held");
}

// ─── Init ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_init_without_persisted_state() {
    let harness = Setup::default().ready().await;
    let state = harness.controller.state();
    assert_eq!(state.loading, LoadingPhase::Ready);
    assert!(state.error.is_none());
    assert!(state.active.is_empty());
    assert!(state.snapshots.is_empty());
    assert_eq!(state.config.font_size, 24.0);
}

#[tokio::test]
async fn test_init_files_not_an_array() {
    let harness = Setup::default()
        .persisted(json!({"files": "not-an-array", "config": {}}))
        .ready()
        .await;
    let state = harness.controller.state();
    assert_eq!(state.error.as_ref().unwrap().id, "invalid_state");
    assert_eq!(state.loading.as_str(), "initialized");
}

#[tokio::test]
async fn test_init_malformed_json() {
    let harness = Setup {
        store: Arc::new(MemoryStore::with_entry(STATE_KEY, b"{oops".to_vec())),
        ..Setup::default()
    }
    .ready()
    .await;
    assert_eq!(harness.controller.state().error.as_ref().unwrap().id, "invalid_state");
    assert_eq!(harness.controller.state().loading, LoadingPhase::Ready);
}

#[tokio::test]
async fn test_init_invalid_file_entry() {
    let harness = Setup::default()
        .persisted(json!({"files": [{"markdownMode": true}], "config": {}}))
        .ready()
        .await;
    assert_eq!(harness.controller.state().error.as_ref().unwrap().id, "invalid_file");
}

#[tokio::test]
async fn test_init_restores_persisted_text_and_config() {
    let saved = text(&["hello", "world"]);
    let harness = Setup::default()
        .persisted(json!({
            "lastModified": 5,
            "files": [{"path": "/old.md"}],
            "config": {"font": "Mono", "fontSize": 18},
            "markdownMode": false,
            "collab": {},
            "text": serde_json::to_value(&saved).unwrap(),
        }))
        .ready()
        .await;

    let state = harness.controller.state();
    assert!(state.error.is_none());
    assert_eq!(state.active, saved);
    assert_eq!(state.config.font.as_deref(), Some("Mono"));
    assert_eq!(state.config.font_size, 18.0);
    assert_eq!(state.config.content_width, 800.0);
    assert_eq!(state.last_modified, Some(Timestamp(5)));
    assert_eq!(snapshot_paths(&harness.controller), vec![Some("/old.md".to_string())]);
}

#[tokio::test]
async fn test_init_opens_startup_file() {
    let harness = Setup {
        files: MemoryFiles::new().with_file("/notes/a.md", "# Title\n\nBody text\n"),
        startup: StartupArgs {
            file: Some("/notes/a.md".into()),
            ..StartupArgs::default()
        },
        ..Setup::default()
    }
    .ready()
    .await;

    let state = harness.controller.state();
    assert!(state.error.is_none());
    assert_eq!(state.path.as_deref(), Some("/notes/a.md"));
    assert!(state.last_modified.is_some());
    assert_eq!(lines(&harness.controller), vec!["Title", "Body text"]);
}

#[tokio::test]
async fn test_init_missing_startup_file() {
    let harness = Setup {
        startup: StartupArgs {
            file: Some("/nowhere.md".into()),
            ..StartupArgs::default()
        },
        ..Setup::default()
    }
    .ready()
    .await;

    let state = harness.controller.state();
    assert_eq!(state.error.as_ref().unwrap().id, "file_permission_denied");
    assert_eq!(state.loading, LoadingPhase::Ready);
}

#[tokio::test]
async fn test_init_reloads_persisted_path() {
    let harness = Setup {
        files: MemoryFiles::new().with_file("/notes/b.md", "From disk\n"),
        ..Setup::default()
    }
    .persisted(json!({"files": [], "config": {}, "path": "/notes/b.md", "lastModified": 1}))
    .ready()
    .await;

    assert_eq!(harness.controller.state().path.as_deref(), Some("/notes/b.md"));
    assert_eq!(lines(&harness.controller), vec!["From disk"]);
}

#[tokio::test]
async fn test_init_opens_startup_text() {
    let startup_text = text(&["passed on the command line"]);
    let harness = Setup {
        startup: StartupArgs {
            text: Some(serde_json::to_string(&startup_text).unwrap()),
            ..StartupArgs::default()
        },
        ..Setup::default()
    }
    .ready()
    .await;

    assert_eq!(harness.controller.state().active, startup_text);
    assert!(harness.controller.state().path.is_none());
}

#[tokio::test]
async fn test_init_detects_theme_unless_explicit() {
    let detected = Setup {
        dark: true,
        ..Setup::default()
    }
    .ready()
    .await;
    assert_eq!(detected.controller.state().config.theme.as_deref(), Some("dark"));
    assert_eq!(
        detected.controller.state().config.code_theme.as_deref(),
        Some("material-dark")
    );

    let mut explicit = Setup {
        dark: true,
        ..Setup::default()
    }
    .persisted(json!({"files": [], "config": {"theme": "light"}}))
    .ready()
    .await;
    assert_eq!(explicit.controller.state().config.theme.as_deref(), Some("light"));

    explicit.controller.update_theme();
    assert_eq!(explicit.controller.state().config.theme.as_deref(), Some("dark"));
}

#[tokio::test]
async fn test_commands_ignored_before_init() {
    let mut harness = Setup::default().build();
    harness.controller.dispatch(text(&["too early"]));
    harness.controller.new_file();

    let state = harness.controller.state();
    assert_eq!(state.loading, LoadingPhase::Loading);
    assert!(state.active.is_empty());
    assert!(state.snapshots.is_empty());
}

// ─── Document transitions ────────────────────────────────────────────────────

#[tokio::test]
async fn test_new_file_archives_unbound_document() {
    let mut harness = Setup::default().ready().await;
    harness.controller.dispatch(text(&["draft"]));
    assert!(harness.controller.state().last_modified.is_some());

    harness.controller.new_file();
    let state = harness.controller.state();
    assert!(state.active.is_empty());
    assert!(state.last_modified.is_none());
    assert_eq!(state.snapshots.len(), 1);
    let archived = state.snapshots.last().unwrap();
    assert_eq!(archived.content, Some(text(&["draft"])));
}

#[tokio::test]
async fn test_new_file_skips_empty_and_path_bound_documents() {
    let mut harness = Setup::default().ready().await;
    harness.controller.new_file();
    assert!(harness.controller.state().snapshots.is_empty());

    harness.controller.dispatch(text(&["saved elsewhere"]));
    harness.controller.update_path("/notes/c.md");
    harness.controller.new_file();
    assert!(harness.controller.state().snapshots.is_empty());
    assert!(harness.controller.state().path.is_none());
}

#[tokio::test]
async fn test_open_file_prefers_stored_snapshot_and_archives_current() {
    let mut harness = Setup::default().ready().await;
    harness.controller.dispatch(text(&["old"]));
    harness.controller.new_file();
    let stored = harness.controller.state().snapshots.last().unwrap().as_ref().clone();

    harness.controller.dispatch(text(&["current"]));
    harness.controller.open_file(stored).await;

    let state = harness.controller.state();
    assert_eq!(lines(&harness.controller), vec!["old"]);
    assert_eq!(state.snapshots.len(), 1);
    assert_eq!(state.snapshots.last().unwrap().content, Some(text(&["current"])));
}

#[tokio::test]
async fn test_open_file_by_path_loads_content() {
    let mut harness = Setup {
        files: MemoryFiles::new().with_file("/notes/d.md", "*loaded*\n"),
        ..Setup::default()
    }
    .ready()
    .await;

    harness
        .controller
        .open_file(DocumentSnapshot::with_path("/notes/d.md"))
        .await;
    assert_eq!(harness.controller.state().path.as_deref(), Some("/notes/d.md"));
    assert_eq!(lines(&harness.controller), vec!["loaded"]);
}

#[tokio::test]
async fn test_open_missing_file_keeps_document() {
    let mut harness = Setup::default().ready().await;
    harness.controller.dispatch(text(&["keep me"]));
    harness
        .controller
        .open_file(DocumentSnapshot::with_path("/gone.md"))
        .await;

    let state = harness.controller.state();
    assert_eq!(state.error.as_ref().unwrap().id, "file_permission_denied");
    assert_eq!(lines(&harness.controller), vec!["keep me"]);
}

#[tokio::test]
async fn test_open_file_archives_startup_text() {
    let startup_text = text(&["passed on the command line"]);
    let mut harness = Setup {
        files: MemoryFiles::new().with_file("/notes/b.md", "other\n"),
        startup: StartupArgs {
            text: Some(serde_json::to_string(&startup_text).unwrap()),
            ..StartupArgs::default()
        },
        ..Setup::default()
    }
    .ready()
    .await;
    assert!(harness.controller.state().last_modified.is_none());

    harness
        .controller
        .open_file(DocumentSnapshot::with_path("/notes/b.md"))
        .await;

    let state = harness.controller.state();
    assert_eq!(lines(&harness.controller), vec!["other"]);
    assert_eq!(state.snapshots.len(), 1);
    assert_eq!(state.snapshots.last().unwrap().content, Some(startup_text));
}

#[tokio::test]
async fn test_open_file_does_not_archive_path_bound_document() {
    let mut harness = Setup {
        files: MemoryFiles::new()
            .with_file("/notes/a.md", "first\n")
            .with_file("/notes/b.md", "second\n"),
        ..Setup::default()
    }
    .ready()
    .await;
    harness
        .controller
        .open_file(DocumentSnapshot::with_path("/notes/a.md"))
        .await;
    harness
        .controller
        .open_file(DocumentSnapshot::with_path("/notes/b.md"))
        .await;

    assert_eq!(lines(&harness.controller), vec!["second"]);
    assert!(harness.controller.state().snapshots.is_empty());
}

#[tokio::test]
async fn test_discard_path_bound_archives_once_and_restores_top() {
    let mut harness = Setup {
        files: MemoryFiles::new().with_file("/tmp/a.md", "bound\n"),
        ..Setup::default()
    }
    .ready()
    .await;
    harness.controller.dispatch(text(&["previous"]));
    harness.controller.new_file();
    harness
        .controller
        .open_file(DocumentSnapshot::with_path("/tmp/a.md"))
        .await;
    assert_eq!(harness.controller.state().snapshots.len(), 1);

    harness.controller.discard().await;

    let paths = snapshot_paths(&harness.controller);
    assert_eq!(paths, vec![Some("/tmp/a.md".to_string())]);
    assert_eq!(lines(&harness.controller), vec!["previous"]);
    assert!(harness.controller.state().path.is_none());
}

#[tokio::test]
async fn test_discard_path_bound_with_empty_stack() {
    let mut harness = Setup {
        files: MemoryFiles::new().with_file("/tmp/a.md", "bound\n"),
        ..Setup::default()
    }
    .ready()
    .await;
    harness
        .controller
        .open_file(DocumentSnapshot::with_path("/tmp/a.md"))
        .await;

    harness.controller.discard().await;
    assert_eq!(snapshot_paths(&harness.controller), vec![Some("/tmp/a.md".to_string())]);
    assert!(harness.controller.state().active.is_empty());
}

#[tokio::test]
async fn test_discard_empty_document_pops_stack() {
    let mut harness = Setup::default().ready().await;
    harness.controller.dispatch(text(&["underneath"]));
    harness.controller.new_file();

    harness.controller.discard().await;
    assert!(harness.controller.state().snapshots.is_empty());
    assert_eq!(lines(&harness.controller), vec!["underneath"]);
}

#[tokio::test]
async fn test_discard_unbound_document_clears_in_place() {
    let mut harness = Setup::default().ready().await;
    harness.controller.dispatch(text(&["scratch"]));

    harness.controller.discard().await;
    let state = harness.controller.state();
    assert!(state.active.is_empty());
    assert!(state.snapshots.is_empty());
    assert!(state.last_modified.is_some());
}

#[tokio::test]
async fn test_discard_empty_document_with_empty_stack() {
    let mut harness = Setup::default().ready().await;
    harness.controller.discard().await;
    let state = harness.controller.state();
    assert!(state.active.is_empty());
    assert!(state.snapshots.is_empty());
    assert!(state.error.is_none());
}

#[tokio::test]
async fn test_toggle_markdown_twice_keeps_paragraphs() {
    let mut harness = Setup::default().ready().await;
    harness.controller.dispatch(text(&["first", "second"]));

    harness.controller.toggle_markdown();
    assert!(harness.controller.state().markdown_mode);
    assert_eq!(lines(&harness.controller), vec!["first", "", "second"]);

    harness.controller.toggle_markdown();
    assert!(!harness.controller.state().markdown_mode);
    assert_eq!(lines(&harness.controller), vec!["first", "second"]);
    assert_eq!(
        harness.controller.state().active.selection,
        scribe_core::Selection::start()
    );
}

#[tokio::test]
async fn test_toggle_markdown_source_becomes_rich() {
    let mut harness = Setup::default().ready().await;
    harness.controller.toggle_markdown();
    harness.controller.dispatch(text(&["# Heading", "", "* item"]));
    harness.controller.toggle_markdown();

    let doc = &harness.controller.state().active.doc;
    assert_eq!(doc.content[0].kind, "heading");
    assert_eq!(doc.content[1].kind, "bullet_list");
}

#[tokio::test]
async fn test_update_config_keeps_earlier_fields() {
    let mut harness = Setup::default().ready().await;
    harness.controller.update_config(&ConfigPatch {
        font_size: Some(18.0),
        ..ConfigPatch::default()
    });
    harness.controller.update_config(&ConfigPatch {
        font: Some("Mono".into()),
        ..ConfigPatch::default()
    });

    let config = &harness.controller.state().config;
    assert_eq!(config.font_size, 18.0);
    assert_eq!(config.font.as_deref(), Some("Mono"));

    harness.controller.set_always_on_top(true);
    assert!(harness.controller.state().config.always_on_top);
}

#[tokio::test]
async fn test_clean_keeps_fullscreen_and_cwd() {
    let mut harness = Setup {
        startup: StartupArgs {
            cwd: Some("/home/me".into()),
            file: Some("/x.md".into()),
            ..StartupArgs::default()
        },
        files: MemoryFiles::new().with_file("/x.md", "x\n"),
        ..Setup::default()
    }
    .ready()
    .await;
    harness.controller.set_fullscreen(true);
    harness.controller.dispatch(text(&["x", "y"]));

    harness.controller.clean();
    let state = harness.controller.state();
    assert!(state.fullscreen);
    assert_eq!(state.startup.cwd.as_deref(), Some("/home/me"));
    assert!(state.startup.file.is_none());
    assert!(state.path.is_none());
    assert!(state.snapshots.is_empty());
    assert!(state.active.is_empty());
    assert!(state.last_modified.is_some());
    assert_eq!(state.loading, LoadingPhase::Ready);
}

// ─── Collaboration ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_collab_on_empty_document_then_stop_leaves_stack() {
    let mut harness = Setup::default().ready().await;
    harness.controller.start_collab();

    let room = harness.controller.state().collab_room().unwrap().to_string();
    assert!(harness.controller.state().collab.as_ref().unwrap().is_started());
    assert_eq!(harness.route.current(), format!("/{room}"));
    let shared = harness.controller.state().session().unwrap().replica().shared_config();
    assert_eq!(shared.font_size, Some(24.0));
    assert_eq!(shared.content_width, Some(800.0));

    harness.controller.new_file();
    assert!(harness.controller.state().snapshots.is_empty());
    assert!(harness.controller.state().collab.is_none());
    assert_eq!(harness.route.current(), "/");
}

#[tokio::test]
async fn test_collab_on_path_bound_document_archives_path() {
    let mut harness = Setup {
        files: MemoryFiles::new().with_file("/notes/a.md", "Shared notes\n"),
        ..Setup::default()
    }
    .ready()
    .await;
    harness
        .controller
        .open_file(DocumentSnapshot::with_path("/notes/a.md"))
        .await;

    harness.controller.start_collab();
    let state = harness.controller.state();
    assert_eq!(snapshot_paths(&harness.controller), vec![Some("/notes/a.md".to_string())]);
    assert!(state.path.is_none());
    assert!(state.last_modified.is_none());
    assert_eq!(state.session().unwrap().replica().markdown(), "Shared notes\n");
    assert_eq!(lines(&harness.controller), vec!["Shared notes"]);
}

#[tokio::test]
async fn test_startup_room_joins_and_archives_previous_text() {
    let harness = Setup {
        startup: StartupArgs {
            room: Some("standup".into()),
            ..StartupArgs::default()
        },
        ..Setup::default()
    }
    .persisted(json!({
        "files": [],
        "config": {},
        "lastModified": 3,
        "text": serde_json::to_value(text(&["draft"])).unwrap(),
    }))
    .ready()
    .await;

    let state = harness.controller.state();
    assert_eq!(state.collab_room(), Some("standup"));
    assert_eq!(harness.route.current(), "/standup");
    assert_eq!(state.snapshots.len(), 1);
    assert_eq!(state.snapshots.last().unwrap().content, Some(text(&["draft"])));
    assert!(state.last_modified.is_none());
}

#[tokio::test]
async fn test_init_restores_room_from_saved_crdt() {
    let replica = Replica::new();
    replica.seed_markdown("restored text\n");
    let encoded = STANDARD.encode(replica.encode_state());

    let harness = Setup::default()
        .persisted(json!({
            "files": [],
            "config": {},
            "collab": {"room": "r1"},
            "ydocBytesBase64": encoded,
        }))
        .ready()
        .await;

    let state = harness.controller.state();
    assert!(state.error.is_none());
    assert_eq!(state.collab_room(), Some("r1"));
    assert!(state.snapshots.is_empty());
    assert_eq!(lines(&harness.controller), vec!["restored text"]);
}

#[tokio::test]
async fn test_init_with_unreadable_crdt_still_joins_room() {
    let harness = Setup::default()
        .persisted(json!({
            "files": [],
            "config": {},
            "collab": {"room": "r"},
            "ydocBytesBase64": "/w==",
        }))
        .ready()
        .await;

    let state = harness.controller.state();
    assert_eq!(state.error.as_ref().unwrap().id, "exception");
    assert_eq!(state.loading, LoadingPhase::Ready);
    assert_eq!(state.collab_room(), Some("r"));
    assert!(state.collab.as_ref().unwrap().is_started());
    assert!(state.active.is_empty());
    assert_eq!(harness.route.current(), "/r");
}

#[tokio::test]
async fn test_unreachable_room_leaves_route_at_root() {
    let mut harness = Setup {
        provider: Some(Arc::new(Unreachable)),
        ..Setup::default()
    }
    .ready()
    .await;
    harness.controller.dispatch(text(&["draft"]));
    harness.controller.start_collab();

    let state = harness.controller.state();
    assert_eq!(state.error.as_ref().unwrap().id, "exception");
    assert!(!state.collab.as_ref().unwrap().is_started());
    assert_eq!(harness.route.current(), "/");
    assert_eq!(lines(&harness.controller), vec!["draft"]);
}

#[tokio::test]
async fn test_discard_collaborative_document_keeps_crdt() {
    let mut harness = Setup::default().ready().await;
    harness.controller.start_collab();
    let room = harness.controller.state().collab_room().unwrap().to_string();
    harness.controller.dispatch(text(&["shared"]));

    harness.controller.discard().await;
    let state = harness.controller.state();
    assert!(state.collab.is_none());
    assert_eq!(harness.route.current(), "/");
    let archived = state.snapshots.last().unwrap();
    assert_eq!(archived.collab_room.as_deref(), Some(room.as_str()));
    let restored = Replica::from_update(archived.crdt_bytes.as_ref().unwrap()).unwrap();
    assert_eq!(restored.markdown(), "shared\n");

    // Re-opening rejoins the room with the archived content.
    let archived = archived.as_ref().clone();
    harness.controller.open_file(archived).await;
    assert_eq!(harness.controller.state().collab_room(), Some(room.as_str()));
    assert_eq!(lines(&harness.controller), vec!["shared"]);
}

#[tokio::test]
async fn test_shared_config_reaches_peer() {
    let hub = LocalHub::new();
    let mut first = Setup {
        hub: hub.clone(),
        ..Setup::default()
    }
    .ready()
    .await;
    let mut second = Setup {
        hub: hub.clone(),
        ..Setup::default()
    }
    .ready()
    .await;

    first.controller.start_collab();
    first.controller.update_config(&ConfigPatch {
        font: Some("Mono".into()),
        ..ConfigPatch::default()
    });
    let room = first.controller.state().collab_room().unwrap().to_string();
    second
        .controller
        .open_file(DocumentSnapshot {
            collab_room: Some(room),
            ..DocumentSnapshot::with_content(EditorText::empty())
        })
        .await;

    settle(|| {
        second.controller.pump_remote();
        second.controller.state().config.font.as_deref() == Some("Mono")
    })
    .await;

    first.controller.update_config(&ConfigPatch {
        content_width: Some(640.0),
        theme: Some("sand".into()),
        ..ConfigPatch::default()
    });
    settle(|| {
        second.controller.pump_remote();
        second.controller.state().config.content_width == 640.0
    })
    .await;
    assert!(second.controller.state().config.theme.is_none());
}

#[tokio::test]
async fn test_two_editors_converge_on_disjoint_edits() {
    let hub = LocalHub::new();
    let mut first = Setup {
        hub: hub.clone(),
        ..Setup::default()
    }
    .ready()
    .await;
    let mut second = Setup {
        hub: hub.clone(),
        ..Setup::default()
    }
    .ready()
    .await;

    first.controller.dispatch(text(&["shared"]));
    first.controller.start_collab();
    let room = first.controller.state().collab_room().unwrap().to_string();
    second
        .controller
        .open_file(DocumentSnapshot {
            collab_room: Some(room),
            ..DocumentSnapshot::with_content(EditorText::empty())
        })
        .await;
    assert_eq!(lines(&second.controller), vec!["shared"]);

    first.controller.dispatch(text(&["left shared"]));
    second.controller.dispatch(text(&["shared right"]));

    settle(|| {
        first.controller.pump_remote();
        second.controller.pump_remote();
        lines(&first.controller) == vec!["left shared right"]
            && lines(&second.controller) == vec!["left shared right"]
    })
    .await;
}

#[tokio::test]
async fn test_remote_edit_survives_local_dispatch() {
    let hub = LocalHub::new();
    let mut first = Setup {
        hub: hub.clone(),
        ..Setup::default()
    }
    .ready()
    .await;
    let mut second = Setup {
        hub: hub.clone(),
        ..Setup::default()
    }
    .ready()
    .await;

    first.controller.dispatch(text(&["shared"]));
    first.controller.start_collab();
    let room = first.controller.state().collab_room().unwrap().to_string();
    second
        .controller
        .open_file(DocumentSnapshot {
            collab_room: Some(room),
            ..DocumentSnapshot::with_content(EditorText::empty())
        })
        .await;

    // The peer's edit reaches the second replica before its tree.
    first.controller.dispatch(text(&["left shared"]));
    settle(|| {
        second
            .controller
            .state()
            .session()
            .is_some_and(|s| s.replica().markdown() == "left shared\n")
    })
    .await;
    assert_eq!(lines(&second.controller), vec!["shared"]);

    second.controller.dispatch(text(&["shared right"]));

    settle(|| {
        first.controller.pump_remote();
        second.controller.pump_remote();
        lines(&first.controller) == vec!["left shared right"]
            && lines(&second.controller) == vec!["left shared right"]
    })
    .await;
}

// ─── Persistence ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_save_writes_text_for_unbound_document() {
    let mut harness = Setup::default().ready().await;
    harness.controller.dispatch(text(&["remember me"]));
    harness.controller.update_config(&ConfigPatch {
        font: Some("Mono".into()),
        ..ConfigPatch::default()
    });

    let saved = harness.saved().await;
    assert_eq!(saved["text"], serde_json::to_value(text(&["remember me"])).unwrap());
    assert_eq!(saved["config"]["font"], "Mono");
    assert_eq!(saved["collab"], json!({}));
    assert!(saved.get("ydocBytesBase64").is_none());
    assert!(saved["lastModified"].is_u64());
}

#[tokio::test]
async fn test_save_writes_bound_file() {
    let mut harness = Setup::default().ready().await;
    harness.controller.dispatch(text(&["to disk"]));
    harness.controller.update_path("/out.md");

    let saved = harness.saved().await;
    assert_eq!(saved["path"], "/out.md");
    assert!(saved.get("text").is_none());
    assert_eq!(harness.files.contents("/out.md").as_deref(), Some("to disk\n"));
}

#[tokio::test]
async fn test_save_writes_crdt_for_collaborative_document() {
    let mut harness = Setup::default().ready().await;
    harness.controller.start_collab();
    harness.controller.dispatch(text(&["in a room"]));
    let room = harness.controller.state().collab_room().unwrap().to_string();

    let saved = harness.saved().await;
    assert_eq!(saved["collab"]["room"], room.as_str());
    assert!(saved.get("text").is_none());
    let bytes = STANDARD
        .decode(saved["ydocBytesBase64"].as_str().unwrap())
        .unwrap();
    assert_eq!(Replica::from_update(&bytes).unwrap().markdown(), "in a room\n");
}

#[tokio::test]
async fn test_saved_state_restores_in_next_session() {
    let store = Arc::new(MemoryStore::new());
    {
        let mut harness = Setup {
            store: store.clone(),
            ..Setup::default()
        }
        .ready()
        .await;
        harness.controller.dispatch(text(&["archived"]));
        harness.controller.new_file();
        harness.controller.dispatch(text(&["active"]));
        harness.controller.toggle_markdown();
        harness.controller.flush().await;
    }

    let harness = Setup {
        store,
        ..Setup::default()
    }
    .ready()
    .await;
    let state = harness.controller.state();
    assert!(state.error.is_none());
    assert!(state.markdown_mode);
    assert_eq!(lines(&harness.controller), vec!["active"]);
    assert_eq!(state.snapshots.len(), 1);
    assert_eq!(state.snapshots.last().unwrap().content, Some(text(&["archived"])));
}

#[tokio::test]
async fn test_snapshots_always_restorable() {
    let mut harness = Setup {
        files: MemoryFiles::new().with_file("/a.md", "a\n"),
        ..Setup::default()
    }
    .ready()
    .await;
    harness.controller.dispatch(text(&["one"]));
    harness.controller.new_file();
    harness.controller.open_file(DocumentSnapshot::with_path("/a.md")).await;
    harness.controller.start_collab();
    harness.controller.dispatch(text(&["two"]));
    harness.controller.new_file();
    harness.controller.discard().await;
    harness.controller.discard().await;

    assert!(harness
        .controller
        .state()
        .snapshots
        .iter()
        .all(|s| s.content.is_some() || s.crdt_bytes.is_some() || s.path.is_some()));
}
