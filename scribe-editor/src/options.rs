//! Runtime options and the collaborators they produce.

use std::sync::Arc;
use std::time::Duration;

use scribe_collab::{DurableStore, LocalHub, MemoryStore, RocksStore, StoreConfig, SyncProvider, WebsocketProvider};
use scribe_core::ServiceError;

use crate::files::{FileSource, LocalFiles, MemoryFiles};
use crate::host::{FixedTheme, HostTheme, MemoryRoute, Route};

/// Editor runtime options.
#[derive(Debug, Clone)]
pub struct EditorOptions {
    /// Relay base URL (`ws://host:port`). Without one, rooms are shared
    /// only between editors in this process.
    pub collab_url: Option<String>,
    /// Quiet period before the persisted state is written.
    pub save_debounce: Duration,
    pub store: StoreConfig,
}

impl Default for EditorOptions {
    fn default() -> Self {
        Self {
            collab_url: None,
            save_debounce: Duration::from_millis(200),
            store: StoreConfig::default(),
        }
    }
}

impl EditorOptions {
    pub fn for_testing(store_path: impl Into<std::path::PathBuf>) -> Self {
        Self {
            collab_url: None,
            save_debounce: Duration::from_millis(20),
            store: StoreConfig::for_testing(store_path),
        }
    }
}

/// Everything the controller talks to outside itself.
pub struct Collaborators {
    pub store: Arc<dyn DurableStore>,
    pub files: Arc<dyn FileSource>,
    pub provider: Arc<dyn SyncProvider>,
    pub route: Box<dyn Route>,
    pub theme: Box<dyn HostTheme>,
}

impl Collaborators {
    /// RocksDB store, local files and the provider `options` select.
    pub fn from_options(options: &EditorOptions) -> Result<Self, ServiceError> {
        let store = RocksStore::open(options.store.clone()).map_err(ServiceError::exception)?;
        let provider: Arc<dyn SyncProvider> = match &options.collab_url {
            Some(url) => Arc::new(WebsocketProvider::new(url)),
            None => Arc::new(LocalHub::new()),
        };
        Ok(Self {
            store: Arc::new(store),
            files: Arc::new(LocalFiles),
            provider,
            route: Box::new(MemoryRoute::new()),
            theme: Box::new(FixedTheme::light()),
        })
    }

    /// Nothing touches the disk or the network.
    pub fn in_memory() -> Self {
        Self {
            store: Arc::new(MemoryStore::new()),
            files: Arc::new(MemoryFiles::new()),
            provider: Arc::new(LocalHub::new()),
            route: Box::new(MemoryRoute::new()),
            theme: Box::new(FixedTheme::light()),
        }
    }

    pub fn with_store(mut self, store: Arc<dyn DurableStore>) -> Self {
        self.store = store;
        self
    }

    pub fn with_files(mut self, files: Arc<dyn FileSource>) -> Self {
        self.files = files;
        self
    }

    pub fn with_provider(mut self, provider: Arc<dyn SyncProvider>) -> Self {
        self.provider = provider;
        self
    }

    pub fn with_route(mut self, route: impl Route + 'static) -> Self {
        self.route = Box::new(route);
        self
    }

    pub fn with_theme(mut self, theme: impl HostTheme + 'static) -> Self {
        self.theme = Box::new(theme);
        self
    }
}
