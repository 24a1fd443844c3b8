//! Request handlers for sync endpoints.

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::history::ServerHistory;
use std::sync::Arc;
use tether_protocol::{
    OverwriteRequest, OverwriteResponse, ReconcileRequest, ReconcileResponse, Snapshot,
    PROTOCOL_VERSION,
};
use tracing::{debug, info};

/// Handler for sync requests.
pub struct RequestHandler {
    config: ServerConfig,
    history: Arc<ServerHistory>,
}

impl RequestHandler {
    /// Creates a new request handler.
    pub fn new(config: ServerConfig, history: Arc<ServerHistory>) -> Self {
        Self { config, history }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Returns the history.
    pub fn history(&self) -> &Arc<ServerHistory> {
        &self.history
    }

    /// Handles a reconcile request.
    pub fn handle_reconcile(&self, request: ReconcileRequest) -> ServerResult<ReconcileResponse> {
        self.check_version(request.protocol_version)?;
        if let Some(pending) = &request.pending {
            self.check_size(&pending.snapshot)?;
        }

        let (head, snapshot) = self.history.current();
        let response = match request.pending {
            None if request.base_ref == head => ReconcileResponse::UpToDate { head },
            Some(mutation) if request.base_ref == head => {
                match self.history.commit_if_head(&head, mutation.snapshot.clone()) {
                    Ok(new_head) => {
                        info!(head = %new_head, mutation = %mutation.id, "mutation committed");
                        ReconcileResponse::Accepted {
                            head: new_head,
                            snapshot: mutation.snapshot,
                        }
                    }
                    // Another request committed between the read and the write.
                    Err(actual) => ReconcileResponse::Diverged {
                        head: actual,
                        snapshot: self.history.snapshot(),
                    },
                }
            }
            None => {
                // A client with nothing pending has nothing to lose, whether
                // its base is a remembered ancestor or unknown.
                debug!(
                    base = %request.base_ref,
                    known = self.history.contains(&request.base_ref),
                    %head,
                    "fast-forwarding client"
                );
                ReconcileResponse::FastForward { head, snapshot }
            }
            Some(mutation) => {
                debug!(base = %request.base_ref, %head, mutation = %mutation.id, "client diverged");
                ReconcileResponse::Diverged { head, snapshot }
            }
        };
        Ok(response)
    }

    /// Handles an overwrite request.
    pub fn handle_overwrite(&self, request: OverwriteRequest) -> ServerResult<OverwriteResponse> {
        self.check_version(request.protocol_version)?;
        self.check_size(&request.snapshot)?;

        match self
            .history
            .commit_if_head(&request.expected_head, request.snapshot)
        {
            Ok(head) => {
                info!(%head, replaced = %request.expected_head, "head overwritten");
                Ok(OverwriteResponse::Committed { head })
            }
            Err(actual) => Err(ServerError::HeadMoved {
                expected: request.expected_head,
                actual,
            }),
        }
    }

    fn check_version(&self, version: u16) -> ServerResult<()> {
        if version != PROTOCOL_VERSION {
            return Err(ServerError::ProtocolMismatch(format!(
                "unsupported protocol version: {version}"
            )));
        }
        Ok(())
    }

    fn check_size(&self, snapshot: &Snapshot) -> ServerResult<()> {
        if snapshot.len() > self.config.max_snapshot_bytes {
            return Err(ServerError::SnapshotTooLarge {
                size: snapshot.len(),
                limit: self.config.max_snapshot_bytes,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_protocol::{CommitRef, Mutation};

    fn handler() -> RequestHandler {
        RequestHandler::new(ServerConfig::default(), Arc::new(ServerHistory::new(8)))
    }

    #[test]
    fn up_to_date_client() {
        let handler = handler();
        let head = handler.history().head();

        let response = handler
            .handle_reconcile(ReconcileRequest::new(head.clone(), None))
            .unwrap();
        assert_eq!(response, ReconcileResponse::UpToDate { head });
    }

    #[test]
    fn pending_mutation_on_head_is_accepted() {
        let handler = handler();
        let base = handler.history().head();
        let mutation = Mutation::new(Snapshot::from(b"edit".as_slice()));

        let response = handler
            .handle_reconcile(ReconcileRequest::new(base.clone(), Some(mutation)))
            .unwrap();
        match response {
            ReconcileResponse::Accepted { head, snapshot } => {
                assert_ne!(head, base);
                assert_eq!(head, handler.history().head());
                assert_eq!(snapshot.as_bytes(), b"edit");
            }
            other => panic!("unexpected response {other:?}"),
        }
    }

    #[test]
    fn stale_client_fast_forwards() {
        let handler = handler();
        let base = handler.history().head();
        let head = handler.history().commit(Snapshot::from(b"newer".as_slice()));

        let response = handler
            .handle_reconcile(ReconcileRequest::new(base, None))
            .unwrap();
        assert_eq!(
            response,
            ReconcileResponse::FastForward {
                head,
                snapshot: Snapshot::from(b"newer".as_slice()),
            }
        );

        // An unknown base (a cold client) fast-forwards as well.
        let response = handler
            .handle_reconcile(ReconcileRequest::new(CommitRef::generate(), None))
            .unwrap();
        assert!(matches!(response, ReconcileResponse::FastForward { .. }));
    }

    #[test]
    fn stale_client_with_mutation_diverges() {
        let handler = handler();
        let base = handler.history().head();
        let head = handler.history().commit(Snapshot::from(b"B".as_slice()));
        let mutation = Mutation::new(Snapshot::from(b"A".as_slice()));

        let response = handler
            .handle_reconcile(ReconcileRequest::new(base, Some(mutation)))
            .unwrap();
        assert_eq!(
            response,
            ReconcileResponse::Diverged {
                head: head.clone(),
                snapshot: Snapshot::from(b"B".as_slice()),
            }
        );
        assert_eq!(handler.history().head(), head);
    }

    #[test]
    fn overwrite_requires_expected_head() {
        let handler = handler();
        let stale = handler.history().head();
        let head = handler.history().commit(Snapshot::from(b"B".as_slice()));

        let err = handler
            .handle_overwrite(OverwriteRequest::new(stale, Snapshot::from(b"A".as_slice())))
            .unwrap_err();
        assert!(matches!(err, ServerError::HeadMoved { ref actual, .. } if *actual == head));

        let response = handler
            .handle_overwrite(OverwriteRequest::new(head, Snapshot::from(b"A".as_slice())))
            .unwrap();
        let OverwriteResponse::Committed { head } = response else {
            panic!("expected commit");
        };
        assert_eq!(handler.history().head(), head);
        assert_eq!(handler.history().snapshot().as_bytes(), b"A");
    }

    #[test]
    fn oversized_snapshots_are_refused() {
        let handler = RequestHandler::new(
            ServerConfig::default().with_max_snapshot_bytes(4),
            Arc::new(ServerHistory::new(8)),
        );
        let base = handler.history().head();
        let mutation = Mutation::new(Snapshot::from(vec![0u8; 5]));

        let err = handler
            .handle_reconcile(ReconcileRequest::new(base, Some(mutation)))
            .unwrap_err();
        assert!(matches!(err, ServerError::SnapshotTooLarge { size: 5, limit: 4 }));
    }

    #[test]
    fn wrong_protocol_version_is_refused() {
        let handler = handler();
        let mut request = ReconcileRequest::new(handler.history().head(), None);
        request.protocol_version = PROTOCOL_VERSION + 1;

        let err = handler.handle_reconcile(request).unwrap_err();
        assert!(matches!(err, ServerError::ProtocolMismatch(_)));
    }
}
