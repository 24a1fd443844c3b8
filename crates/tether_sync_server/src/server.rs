//! Main sync server.

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::handler::RequestHandler;
use crate::history::ServerHistory;
use std::sync::Arc;
use tether_protocol::{
    CommitRef, OverwriteRequest, OverwriteResponse, ReconcileRequest, ReconcileResponse,
    Snapshot, OVERWRITE_PATH, RECONCILE_PATH,
};
use tracing::warn;

/// The sync server.
///
/// This server is the remote authority clients reconcile against. It keeps
/// the head snapshot and a bounded history of commit references, and
/// answers reconcile and overwrite requests.
///
/// # Example
///
/// ```
/// use tether_sync_server::{ServerConfig, SyncServer};
///
/// let server = SyncServer::new(ServerConfig::default());
///
/// // In a real application, you would expose HTTP endpoints
/// // that call server.handle_post() with the request path and body
/// assert!(server.snapshot().is_empty());
/// ```
pub struct SyncServer {
    handler: RequestHandler,
}

impl SyncServer {
    /// Creates a new sync server.
    pub fn new(config: ServerConfig) -> Self {
        let history = Arc::new(ServerHistory::new(config.history_limit));
        Self::with_history(config, history)
    }

    /// Creates a sync server over an existing history.
    pub fn with_history(config: ServerConfig, history: Arc<ServerHistory>) -> Self {
        Self {
            handler: RequestHandler::new(config, history),
        }
    }

    /// Handles a reconcile request.
    pub fn handle_reconcile(&self, request: ReconcileRequest) -> Result<ReconcileResponse, String> {
        self.handler
            .handle_reconcile(request)
            .map_err(|e| e.to_string())
    }

    /// Handles an overwrite request.
    pub fn handle_overwrite(&self, request: OverwriteRequest) -> Result<OverwriteResponse, String> {
        self.handler
            .handle_overwrite(request)
            .map_err(|e| e.to_string())
    }

    /// Handles a raw POST body for `path` and returns the raw response body.
    ///
    /// Client errors are answered with a `Rejected` response so the client
    /// can tell a refusal from a transport failure. Unknown paths and
    /// internal failures return `Err`.
    pub fn handle_post(&self, path: &str, body: &[u8]) -> Result<Vec<u8>, String> {
        self.dispatch(path, body).map_err(|e| {
            warn!(%path, error = %e, "request failed");
            e.to_string()
        })
    }

    fn dispatch(&self, path: &str, body: &[u8]) -> ServerResult<Vec<u8>> {
        match path {
            RECONCILE_PATH => {
                let response = ReconcileRequest::decode(body)
                    .map_err(ServerError::from)
                    .and_then(|request| self.handler.handle_reconcile(request));
                let response = match response {
                    Ok(response) => response,
                    Err(e) if e.is_client_error() => {
                        warn!(%path, error = %e, "reconcile rejected");
                        ReconcileResponse::Rejected {
                            message: e.to_string(),
                        }
                    }
                    Err(e) => return Err(e),
                };
                Ok(response.encode()?)
            }
            OVERWRITE_PATH => {
                let response = OverwriteRequest::decode(body)
                    .map_err(ServerError::from)
                    .and_then(|request| self.handler.handle_overwrite(request));
                let response = match response {
                    Ok(response) => response,
                    Err(e) if e.is_client_error() => {
                        warn!(%path, error = %e, "overwrite rejected");
                        OverwriteResponse::Rejected {
                            message: e.to_string(),
                        }
                    }
                    Err(e) => return Err(e),
                };
                Ok(response.encode()?)
            }
            other => Err(ServerError::NotFound(other.to_string())),
        }
    }

    /// Commits a snapshot directly, as if another client had pushed it.
    pub fn publish(&self, snapshot: Snapshot) -> CommitRef {
        self.handler.history().commit(snapshot)
    }

    /// Returns the head reference.
    pub fn head(&self) -> CommitRef {
        self.handler.history().head()
    }

    /// Returns the head snapshot.
    pub fn snapshot(&self) -> Snapshot {
        self.handler.history().snapshot()
    }

    /// Returns the history.
    pub fn history(&self) -> &Arc<ServerHistory> {
        self.handler.history()
    }
}
