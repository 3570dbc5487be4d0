//! Platform hooks the controller calls out to: the window route and the
//! host's light/dark preference.

use std::sync::{Arc, Mutex};

/// The window location. `/{room}` while collaborating, `/` otherwise.
pub trait Route: Send {
    fn replace(&mut self, path: &str);
}

/// Records the current location. Clones observe the same location.
#[derive(Debug, Clone)]
pub struct MemoryRoute {
    location: Arc<Mutex<String>>,
}

impl MemoryRoute {
    pub fn new() -> Self {
        Self {
            location: Arc::new(Mutex::new("/".to_string())),
        }
    }

    pub fn current(&self) -> String {
        self.location
            .lock()
            .map(|l| l.clone())
            .unwrap_or_else(|_| "/".to_string())
    }
}

impl Default for MemoryRoute {
    fn default() -> Self {
        Self::new()
    }
}

impl Route for MemoryRoute {
    fn replace(&mut self, path: &str) {
        if let Ok(mut location) = self.location.lock() {
            log::debug!("Route {} -> {}", location, path);
            *location = path.to_string();
        }
    }
}

/// Whether the host prefers a dark color scheme.
pub trait HostTheme: Send + Sync {
    fn prefers_dark(&self) -> bool;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FixedTheme {
    pub dark: bool,
}

impl FixedTheme {
    pub fn dark() -> Self {
        Self { dark: true }
    }

    pub fn light() -> Self {
        Self { dark: false }
    }
}

impl HostTheme for FixedTheme {
    fn prefers_dark(&self) -> bool {
        self.dark
    }
}
