use std::path::PathBuf;

pub use corvusdb_storage::SyncMode;

/// Configuration for [`crate::Db::open_with_options`].
///
/// Named after the teacher workspace's own `Options` constructor pattern:
/// everything has a sensible default, so `Options::default()` with no path
/// set gives an in-memory handle with no durable backend at all.
#[derive(Debug, Clone)]
pub struct Options {
    /// Path to the backing SQLite file. `None` runs purely in-memory: no
    /// backend is opened, and `close()`/`clone()` behave accordingly.
    pub path: Option<PathBuf>,
    /// `PRAGMA synchronous` level for the durable backend.
    pub sync_mode: SyncMode,
    /// `busy_timeout` passed to the SQLite connection, in milliseconds.
    pub busy_timeout_ms: u32,
}

impl Default for Options {
    fn default() -> Self {
        Options { path: None, sync_mode: SyncMode::Normal, busy_timeout_ms: 5_000 }
    }
}

impl Options {
    pub fn new() -> Self {
        Options::default()
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_sync_mode(mut self, sync_mode: SyncMode) -> Self {
        self.sync_mode = sync_mode;
        self
    }

    pub fn with_busy_timeout_ms(mut self, busy_timeout_ms: u32) -> Self {
        self.busy_timeout_ms = busy_timeout_ms;
        self
    }
}
