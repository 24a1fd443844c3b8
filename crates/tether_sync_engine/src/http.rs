//! HTTP remote implementation.
//!
//! This module provides a CBOR-over-HTTP [`RemoteSynchronizer`]. The actual
//! HTTP client is abstracted via a trait so any HTTP library (or an
//! in-process loopback) can carry the requests.

use crate::error::{SyncError, SyncResult};
use crate::remote::{RemoteSynchronizer, SyncOutcome};
use crate::settings::ProxyConfig;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use tether_protocol::{
    CommitRef, Mutation, OverwriteRequest, OverwriteResponse, ReconcileRequest,
    ReconcileResponse, Snapshot, OVERWRITE_PATH, RECONCILE_PATH,
};
use tracing::{debug, warn};

/// HTTP client abstraction.
///
/// Implement this trait to provide the actual HTTP transport.
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Sends a POST request and returns the response body.
    async fn post(&self, url: &str, body: Vec<u8>) -> Result<Vec<u8>, String>;

    /// Routes subsequent requests through `proxy`, or directly if `None`.
    fn set_proxy(&self, _proxy: Option<&ProxyConfig>) {}
}

/// HTTP-based remote synchronizer.
///
/// Uses CBOR encoding for request/response bodies.
pub struct HttpRemote<C: HttpClient> {
    /// Base URL of the sync server (e.g., "https://sync.example.com").
    base_url: String,
    /// HTTP client implementation.
    client: C,
    /// Last error message.
    last_error: RwLock<Option<String>>,
}

impl<C: HttpClient> HttpRemote<C> {
    /// Creates a new HTTP remote.
    pub fn new(base_url: impl Into<String>, client: C) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            last_error: RwLock::new(None),
        }
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the underlying client.
    pub fn client(&self) -> &C {
        &self.client
    }

    /// Returns the last error message.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    fn set_error(&self, err: &str) {
        *self.last_error.write() = Some(err.to_string());
    }

    fn clear_error(&self) {
        *self.last_error.write() = None;
    }

    async fn post(&self, endpoint: &str, body: Vec<u8>) -> SyncResult<Vec<u8>> {
        let url = format!("{}{}", self.base_url, endpoint);
        debug!(%url, bytes = body.len(), "POST");
        match self.client.post(&url, body).await {
            Ok(response) => {
                self.clear_error();
                Ok(response)
            }
            Err(e) => {
                self.set_error(&e);
                Err(SyncError::transport_retryable(e))
            }
        }
    }
}

#[async_trait]
impl<C: HttpClient> RemoteSynchronizer for HttpRemote<C> {
    async fn reconcile(&self, local_ref: &CommitRef, pending: Option<&Mutation>) -> SyncOutcome {
        let request = ReconcileRequest::new(local_ref.clone(), pending.cloned());
        let body = match request.encode() {
            Ok(body) => body,
            Err(e) => return SyncOutcome::Unreachable(e.into()),
        };

        let response = match self.post(RECONCILE_PATH, body).await {
            Ok(response) => response,
            Err(e) => return SyncOutcome::Unreachable(e),
        };

        match ReconcileResponse::decode(&response) {
            Ok(response) => SyncOutcome::from_response(local_ref, pending, response),
            Err(e) => {
                warn!(kind = "protocol", commit_ref = %local_ref, error = %e, "undecodable reconcile response");
                self.set_error(&e.to_string());
                SyncOutcome::Unreachable(e.into())
            }
        }
    }

    async fn overwrite(
        &self,
        snapshot: &Snapshot,
        expected_remote: &CommitRef,
    ) -> SyncResult<CommitRef> {
        let body = OverwriteRequest::new(expected_remote.clone(), snapshot.clone()).encode()?;
        let response = self.post(OVERWRITE_PATH, body).await?;
        match OverwriteResponse::decode(&response)? {
            OverwriteResponse::Committed { head } => Ok(head),
            OverwriteResponse::Rejected { message } => Err(SyncError::ServerError(message)),
        }
    }

    fn configure_proxy(&self, proxy: Option<&ProxyConfig>) {
        self.client.set_proxy(proxy);
    }
}

/// Trait for servers that can handle loopback requests.
pub trait LoopbackServer: Send + Sync {
    /// Handles a POST request and returns the response.
    fn handle_post(&self, path: &str, body: &[u8]) -> Result<Vec<u8>, String>;
}

/// A loopback HTTP client that routes requests directly to a sync server.
///
/// Useful for testing without actual network overhead. The client can be
/// taken offline to simulate a network outage.
pub struct LoopbackClient<S: LoopbackServer> {
    server: S,
    online: AtomicBool,
    proxy: RwLock<Option<ProxyConfig>>,
}

impl<S: LoopbackServer> LoopbackClient<S> {
    /// Creates a new loopback client connected to the given server.
    pub fn new(server: S) -> Self {
        Self {
            server,
            online: AtomicBool::new(true),
            proxy: RwLock::new(None),
        }
    }

    /// Returns the server.
    pub fn server(&self) -> &S {
        &self.server
    }

    /// Simulates the network going down or coming back.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// Returns the proxy most recently configured.
    pub fn proxy(&self) -> Option<ProxyConfig> {
        self.proxy.read().clone()
    }
}

#[async_trait]
impl<S: LoopbackServer> HttpClient for LoopbackClient<S> {
    async fn post(&self, url: &str, body: Vec<u8>) -> Result<Vec<u8>, String> {
        if !self.online.load(Ordering::SeqCst) {
            return Err("connection refused".to_string());
        }

        // Extract path from URL
        let path = url.find("/sync/").map(|i| &url[i..]).unwrap_or(url);

        self.server.handle_post(path, &body)
    }

    fn set_proxy(&self, proxy: Option<&ProxyConfig>) {
        *self.proxy.write() = proxy.cloned();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct TestClient {
        response: RwLock<Option<Vec<u8>>>,
        urls: Mutex<Vec<String>>,
    }

    impl TestClient {
        fn new() -> Self {
            Self {
                response: RwLock::new(None),
                urls: Mutex::new(Vec::new()),
            }
        }

        fn set_response(&self, resp: Vec<u8>) {
            *self.response.write() = Some(resp);
        }
    }

    #[async_trait]
    impl HttpClient for TestClient {
        async fn post(&self, url: &str, _body: Vec<u8>) -> Result<Vec<u8>, String> {
            self.urls.lock().push(url.to_string());
            self.response
                .read()
                .clone()
                .ok_or_else(|| "No response set".into())
        }
    }

    fn commit(token: &str) -> CommitRef {
        CommitRef::parse(token).unwrap()
    }

    #[test]
    fn remote_creation() {
        let remote = HttpRemote::new("https://sync.example.com/", TestClient::new());
        assert_eq!(remote.base_url(), "https://sync.example.com");
        assert!(remote.last_error().is_none());
    }

    #[tokio::test]
    async fn reconcile_posts_to_endpoint() {
        let client = TestClient::new();
        client.set_response(
            ReconcileResponse::UpToDate { head: commit("a") }
                .encode()
                .unwrap(),
        );
        let remote = HttpRemote::new("https://sync.example.com", client);

        let outcome = remote.reconcile(&commit("a"), None).await;
        assert!(matches!(outcome, SyncOutcome::NoChange));
        assert_eq!(
            remote.client().urls.lock().as_slice(),
            ["https://sync.example.com/sync/reconcile"]
        );
    }

    #[tokio::test]
    async fn client_failure_is_retryable_unreachable() {
        let remote = HttpRemote::new("https://sync.example.com", TestClient::new());

        let outcome = remote.reconcile(&commit("a"), None).await;
        match outcome {
            SyncOutcome::Unreachable(e) => assert!(e.is_retryable()),
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(remote.last_error().as_deref(), Some("No response set"));
    }

    #[tokio::test]
    async fn garbage_response_is_protocol_error() {
        let client = TestClient::new();
        client.set_response(vec![0xff, 0x00, 0x13]);
        let remote = HttpRemote::new("https://sync.example.com", client);

        let outcome = remote.reconcile(&commit("a"), None).await;
        assert!(matches!(outcome, SyncOutcome::Unreachable(SyncError::Protocol(_))));
    }

    #[tokio::test]
    async fn overwrite_returns_assigned_head() {
        let client = TestClient::new();
        client.set_response(
            OverwriteResponse::Committed { head: commit("c") }
                .encode()
                .unwrap(),
        );
        let remote = HttpRemote::new("https://sync.example.com", client);

        let head = remote
            .overwrite(&Snapshot::from(b"A".as_slice()), &commit("b"))
            .await
            .unwrap();
        assert_eq!(head, commit("c"));
        assert_eq!(
            remote.client().urls.lock().as_slice(),
            ["https://sync.example.com/sync/overwrite"]
        );
    }

    #[tokio::test]
    async fn overwrite_rejection_is_server_error() {
        let client = TestClient::new();
        client.set_response(
            OverwriteResponse::Rejected {
                message: "head moved".into(),
            }
            .encode()
            .unwrap(),
        );
        let remote = HttpRemote::new("https://sync.example.com", client);

        let err = remote
            .overwrite(&Snapshot::empty(), &commit("b"))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::ServerError(ref m) if m == "head moved"));
    }

    struct EchoServer;

    impl LoopbackServer for EchoServer {
        fn handle_post(&self, path: &str, _body: &[u8]) -> Result<Vec<u8>, String> {
            Ok(path.as_bytes().to_vec())
        }
    }

    #[tokio::test]
    async fn loopback_strips_host_and_goes_offline() {
        let client = LoopbackClient::new(EchoServer);
        let body = client
            .post("https://sync.example.com/sync/reconcile", Vec::new())
            .await
            .unwrap();
        assert_eq!(body, b"/sync/reconcile");

        client.set_online(false);
        assert!(client.post("https://x/sync/reconcile", Vec::new()).await.is_err());
    }

    #[test]
    fn loopback_records_proxy() {
        let remote = HttpRemote::new("https://x", LoopbackClient::new(EchoServer));
        let proxy = ProxyConfig::new("http://proxy:3128");
        remote.configure_proxy(Some(&proxy));
        assert_eq!(remote.client().proxy(), Some(proxy));
        remote.configure_proxy(None);
        assert_eq!(remote.client().proxy(), None);
    }
}
