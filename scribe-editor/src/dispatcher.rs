//! Shared handle for issuing controller commands from several tasks.
//!
//! Commands queue on an async mutex, so a second `init`, `open_file` or
//! `discard` waits until the one in flight has committed.

use std::sync::Arc;
use std::time::Duration;

use scribe_core::{ConfigPatch, DocumentSnapshot, EditorText};
use tokio::sync::{Mutex, MutexGuard};
use tokio::task::JoinHandle;

use crate::controller::{Controller, KeyCommand};

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Init,
    NewFile,
    OpenFile(DocumentSnapshot),
    Discard,
    ToggleMarkdown,
    UpdateConfig(ConfigPatch),
    StartCollab,
    Clean,
    SetFullscreen(bool),
    SetAlwaysOnTop(bool),
    UpdatePath(String),
    UpdateTheme,
    Dispatch(EditorText),
    PumpRemote,
    Key(KeyCommand),
}

#[derive(Clone)]
pub struct Dispatcher {
    controller: Arc<Mutex<Controller>>,
}

impl Dispatcher {
    pub fn new(controller: Controller) -> Self {
        Self {
            controller: Arc::new(Mutex::new(controller)),
        }
    }

    /// Exclusive access, e.g. to read the state.
    pub async fn lock(&self) -> MutexGuard<'_, Controller> {
        self.controller.lock().await
    }

    /// Run one command to completion. Returns whether it was handled.
    pub async fn execute(&self, command: Command) -> bool {
        let mut controller = self.controller.lock().await;
        match command {
            Command::Init => controller.init().await,
            Command::NewFile => controller.new_file(),
            Command::OpenFile(file) => controller.open_file(file).await,
            Command::Discard => controller.discard().await,
            Command::ToggleMarkdown => controller.toggle_markdown(),
            Command::UpdateConfig(patch) => controller.update_config(&patch),
            Command::StartCollab => controller.start_collab(),
            Command::Clean => controller.clean(),
            Command::SetFullscreen(on) => controller.set_fullscreen(on),
            Command::SetAlwaysOnTop(on) => controller.set_always_on_top(on),
            Command::UpdatePath(path) => controller.update_path(path),
            Command::UpdateTheme => controller.update_theme(),
            Command::Dispatch(text) => controller.dispatch(text),
            Command::PumpRemote => return controller.pump_remote(),
            Command::Key(key) => return controller.keymap(key).await,
        }
        true
    }

    /// Apply remote session events every `every` until aborted.
    pub fn spawn_remote_pump(&self, every: Duration) -> JoinHandle<()> {
        let dispatcher = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                dispatcher.execute(Command::PumpRemote).await;
            }
        })
    }
}
