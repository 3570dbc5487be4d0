//! File collaborator: reading and writing markdown files.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use futures_util::future::BoxFuture;
use scribe_core::{ServiceError, Timestamp};

/// Source of markdown files. Any failure is reported as
/// `FilePermissionDenied` carrying the path.
pub trait FileSource: Send + Sync {
    /// File content and its modification time.
    fn read<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Result<(String, Timestamp), ServiceError>>;

    fn write<'a>(&'a self, path: &'a str, content: &'a str) -> BoxFuture<'a, Result<(), ServiceError>>;
}

/// The local filesystem, through `tokio::fs`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFiles;

impl FileSource for LocalFiles {
    fn read<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Result<(String, Timestamp), ServiceError>> {
        Box::pin(async move {
            let content = tokio::fs::read_to_string(path)
                .await
                .map_err(|e| ServiceError::permission_denied(path, e))?;
            let modified = tokio::fs::metadata(path)
                .await
                .and_then(|meta| meta.modified())
                .map(Timestamp::from_system_time)
                .map_err(|e| ServiceError::permission_denied(path, e))?;
            Ok((content, modified))
        })
    }

    fn write<'a>(&'a self, path: &'a str, content: &'a str) -> BoxFuture<'a, Result<(), ServiceError>> {
        Box::pin(async move {
            tokio::fs::write(path, content)
                .await
                .map_err(|e| ServiceError::permission_denied(path, e))
        })
    }
}

/// In-memory files. Clones share the same contents.
#[derive(Debug, Clone, Default)]
pub struct MemoryFiles {
    files: Arc<Mutex<HashMap<String, (String, Timestamp)>>>,
}

impl MemoryFiles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(self, path: &str, content: &str) -> Self {
        if let Ok(mut files) = self.files.lock() {
            files.insert(path.to_string(), (content.to_string(), Timestamp::now()));
        }
        self
    }

    pub fn contents(&self, path: &str) -> Option<String> {
        let files = self.files.lock().ok()?;
        files.get(path).map(|(content, _)| content.clone())
    }
}

impl FileSource for MemoryFiles {
    fn read<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Result<(String, Timestamp), ServiceError>> {
        Box::pin(async move {
            let files = self
                .files
                .lock()
                .map_err(|_| ServiceError::permission_denied(path, "file table poisoned"))?;
            files
                .get(path)
                .cloned()
                .ok_or_else(|| ServiceError::permission_denied(path, "no such file"))
        })
    }

    fn write<'a>(&'a self, path: &'a str, content: &'a str) -> BoxFuture<'a, Result<(), ServiceError>> {
        Box::pin(async move {
            let mut files = self
                .files
                .lock()
                .map_err(|_| ServiceError::permission_denied(path, "file table poisoned"))?;
            files.insert(path.to_string(), (content.to_string(), Timestamp::now()));
            Ok(())
        })
    }
}
