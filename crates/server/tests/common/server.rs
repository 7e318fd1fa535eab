//! Server test harness.

use axum::Router;
use axum::body::{Body, Bytes};
use axum::http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::{HeaderMap, Method, Request, StatusCode};
use satoshisend_core::config::AppConfig;
use satoshisend_metadata::{MetaStore, SqliteStore};
use satoshisend_payments::{AlbyWallet, MockWallet, PaymentCoordinator, WalletAdapter};
use satoshisend_server::{AppState, create_router};
use satoshisend_storage::{BlobStore, FilesystemBackend};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// A test server wrapper with all dependencies.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct TestServer {
    pub router: Router,
    pub state: AppState,
    pub mock_wallet: Option<Arc<MockWallet>>,
    cancel: CancellationToken,
    _temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestServer {
    /// Create a test server with a mock wallet and default test config.
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Create a test server with config modifications and a mock wallet.
    pub async fn with_config<F>(modifier: F) -> Self
    where
        F: FnOnce(&mut AppConfig),
    {
        let wallet = Arc::new(MockWallet::new(Duration::from_secs(3600)));
        Self::build(modifier, wallet.clone() as Arc<dyn WalletAdapter>, Some(wallet), None).await
    }

    /// Create a test server whose webhook route is backed by a real wallet
    /// adapter with the given endpoint secret. Invoice minting is not wired
    /// to a live API; tests inject pending invoices directly.
    pub async fn with_alby(webhook_secret: &str) -> Self {
        let alby = Arc::new(
            AlbyWallet::with_base_url("http://127.0.0.1:1", "test-token", webhook_secret).unwrap(),
        );
        Self::build(
            |_| {},
            alby.clone() as Arc<dyn WalletAdapter>,
            None,
            Some(alby),
        )
        .await
    }

    async fn build<F>(
        modifier: F,
        wallet: Arc<dyn WalletAdapter>,
        mock_wallet: Option<Arc<MockWallet>>,
        webhook_wallet: Option<Arc<AlbyWallet>>,
    ) -> Self
    where
        F: FnOnce(&mut AppConfig),
    {
        let temp_dir = tempfile::tempdir().expect("failed to create temp directory");

        let storage: Arc<dyn BlobStore> = Arc::new(
            FilesystemBackend::new(temp_dir.path().join("blobs"))
                .await
                .expect("failed to create storage backend"),
        );
        let metadata: Arc<dyn MetaStore> = Arc::new(
            SqliteStore::new(temp_dir.path().join("metadata.db"))
                .await
                .expect("failed to create metadata store"),
        );

        let mut config = AppConfig::for_testing();
        modifier(&mut config);

        let settlements = wallet.settlement_stream().expect("stream already taken");
        let payments = Arc::new(PaymentCoordinator::new(wallet, metadata.clone()));
        payments
            .load_on_startup()
            .await
            .expect("failed to load pending invoices");

        let state = AppState::new(config, storage, metadata, payments.clone(), webhook_wallet);

        let cancel = CancellationToken::new();
        tokio::spawn(payments.run(settlements, cancel.clone()));

        let router = create_router(state.clone());

        Self {
            router,
            state,
            mock_wallet,
            cancel,
            _temp_dir: temp_dir,
        }
    }

    /// Settle an invoice through the mock wallet.
    pub fn settle(&self, payment_hash: &str) {
        self.mock_wallet
            .as_ref()
            .expect("settle requires a mock wallet")
            .settle(payment_hash);
    }

    /// Poll until the file is marked paid (or panic after 2 seconds).
    pub async fn wait_until_paid(&self, file_id: &str) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        loop {
            let meta = self.state.metadata.get_file_meta(file_id).await.unwrap();
            if meta.map(|m| m.paid).unwrap_or(false) {
                return;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "file {file_id} was not marked paid in time"
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Send a request through the router and collect the response.
#[allow(dead_code)]
pub async fn send(router: &Router, req: Request<Body>) -> (StatusCode, HeaderMap, Bytes) {
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    let resp = router.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let headers = resp.headers().clone();
    let body = resp.into_body().collect().await.unwrap().to_bytes();
    (status, headers, body)
}

/// Build a JSON POST request carrying a client IP.
#[allow(dead_code)]
pub fn post_json(path: &str, body: serde_json::Value, ip: &str) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(path)
        .header(CONTENT_TYPE, "application/json")
        .header("x-forwarded-for", ip)
        .body(Body::from(body.to_string()))
        .unwrap()
}

/// Build a raw-body PUT request with an explicit Content-Length.
#[allow(dead_code)]
pub fn put_bytes(path: &str, data: Vec<u8>) -> Request<Body> {
    Request::builder()
        .method(Method::PUT)
        .uri(path)
        .header(CONTENT_LENGTH, data.len())
        .body(Body::from(data))
        .unwrap()
}

/// Build a bare GET request.
#[allow(dead_code)]
pub fn get(path: &str) -> Request<Body> {
    Request::builder()
        .method(Method::GET)
        .uri(path)
        .body(Body::empty())
        .unwrap()
}

/// Parse a JSON response body.
#[allow(dead_code)]
pub fn json_body(body: &Bytes) -> serde_json::Value {
    serde_json::from_slice(body).expect("response body was not JSON")
}

/// Upload a blob end to end (init, put, complete) from a given IP.
/// Returns (file_id, payment_hash).
#[allow(dead_code)]
pub async fn upload_blob(server: &TestServer, ip: &str, data: &[u8]) -> (String, String) {
    let (status, _, body) = send(
        &server.router,
        post_json(
            "/api/upload/init",
            serde_json::json!({"size": data.len()}),
            ip,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "init failed: {body:?}");
    let file_id = json_body(&body)["file_id"].as_str().unwrap().to_string();

    let (status, _, _) = send(
        &server.router,
        put_bytes(&format!("/api/upload/{file_id}"), data.to_vec()),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _, body) = send(
        &server.router,
        post_json(
            "/api/upload/complete",
            serde_json::json!({"file_id": file_id, "size": data.len()}),
            ip,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "complete failed: {body:?}");
    let payment_hash = json_body(&body)["payment_hash"]
        .as_str()
        .unwrap()
        .to_string();

    (file_id, payment_hash)
}
