//! Server configuration.

/// Configuration for the sync server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Largest snapshot accepted in a request, in bytes.
    pub max_snapshot_bytes: usize,
    /// Number of past commit references remembered for ancestry checks.
    pub history_limit: usize,
}

impl ServerConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self {
            max_snapshot_bytes: 16 * 1024 * 1024,
            history_limit: 64,
        }
    }

    /// Sets the maximum snapshot size.
    pub fn with_max_snapshot_bytes(mut self, max: usize) -> Self {
        self.max_snapshot_bytes = max;
        self
    }

    /// Sets the history length. At least the head is always remembered.
    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit.max(1);
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new()
    }
}
