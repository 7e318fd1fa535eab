//! End-to-end API tests against the in-process router.

mod common;

use axum::body::Body;
use axum::http::header::{CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, RANGE};
use axum::http::{Method, Request, StatusCode};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use common::*;
use hmac::{Hmac, Mac};
use satoshisend_metadata::{FileMeta, PendingInvoice};
use satoshisend_server::Janitor;
use sha2::Sha256;
use std::time::Duration;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

const MIB_PLUS_ONE: usize = 1024 * 1024 + 1;

#[tokio::test]
async fn happy_path_upload_pay_retrieve() {
    let server = TestServer::new().await;
    let data = vec![42u8; MIB_PLUS_ONE];

    let (file_id, payment_hash) = upload_blob(&server, "10.0.0.1", &data).await;
    assert_eq!(file_id.len(), 32);

    // 1 MiB + 1 floors to the minimum price.
    let (status, _, body) = send(&server.router, get(&format!("/api/file/{file_id}/invoice"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_body(&body)["amount_sats"], 100);

    // Unpaid retrieval is refused.
    let (status, _, _) = send(&server.router, get(&format!("/api/file/{file_id}"))).await;
    assert_eq!(status, StatusCode::PAYMENT_REQUIRED);

    server.settle(&payment_hash);
    server.wait_until_paid(&file_id).await;

    // Paid retrieval returns the full blob.
    let (status, headers, body) = send(&server.router, get(&format!("/api/file/{file_id}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[CONTENT_TYPE], "application/octet-stream");
    assert_eq!(body.len(), MIB_PLUS_ONE);
    assert_eq!(&body[..], &data[..]);

    // Status reports paid with the full hosting window.
    let (status, _, body) = send(&server.router, get(&format!("/api/file/{file_id}/status"))).await;
    assert_eq!(status, StatusCode::OK);
    let status_json = json_body(&body);
    assert_eq!(status_json["paid"], true);
    assert_eq!(status_json["size"], MIB_PLUS_ONE as i64);

    let expires_at =
        OffsetDateTime::parse(status_json["expires_at"].as_str().unwrap(), &Rfc3339).unwrap();
    let expected = OffsetDateTime::now_utc() + time::Duration::days(7);
    assert!((expires_at - expected).abs() < time::Duration::minutes(1));

    // The pending invoice is gone after settlement.
    let (status, _, _) = send(&server.router, get(&format!("/api/file/{file_id}/invoice"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn pending_limit_blocks_and_clears_on_payment() {
    let server = TestServer::with_config(|c| c.limits.max_pending = 2).await;
    let data = b"encrypted blob".to_vec();

    let (_id1, hash1) = upload_blob(&server, "10.0.0.7", &data).await;
    let (_id2, _hash2) = upload_blob(&server, "10.0.0.7", &data).await;

    // Third reservation from the same IP is refused with a useful message.
    let (status, _, body) = send(
        &server.router,
        post_json("/api/upload/init", serde_json::json!({"size": 10}), "10.0.0.7"),
    )
    .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    let message = json_body(&body)["message"].as_str().unwrap().to_string();
    assert!(message.contains("pending file limit"), "message: {message}");
    assert!(message.contains('2'), "message: {message}");

    // A different client is unaffected.
    let (status, _, _) = send(
        &server.router,
        post_json("/api/upload/init", serde_json::json!({"size": 10}), "10.0.0.8"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // Settling one invoice frees the slot via the payment callback.
    server.settle(&hash1);
    server.wait_until_paid(&_id1).await;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !server.state.limiter.can_admit("10.0.0.7") {
        assert!(tokio::time::Instant::now() < deadline, "slot was not freed");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let (status, _, _) = send(
        &server.router,
        post_json("/api/upload/init", serde_json::json!({"size": 10}), "10.0.0.7"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn janitor_sweeps_expired_unpaid_upload() {
    let server = TestServer::new().await;

    // An unpaid blob whose pending window has elapsed.
    let now = OffsetDateTime::now_utc();
    server
        .state
        .storage
        .save("expiredblob1", bytes::Bytes::from_static(b"old"), None)
        .await
        .unwrap();
    server
        .state
        .metadata
        .save_file_meta(&FileMeta {
            id: "expiredblob1".to_string(),
            size: 3,
            expires_at: now - time::Duration::minutes(1),
            host_duration: time::Duration::days(7),
            paid: false,
            created_at: now - time::Duration::minutes(16),
        })
        .await
        .unwrap();

    let janitor = Janitor::new(
        server.state.metadata.clone(),
        server.state.storage.clone(),
        server.state.limiter.clone(),
        Duration::from_secs(3600),
        Duration::from_secs(900),
    );
    let stats = janitor.sweep().await;
    assert_eq!(stats.files_deleted, 1);

    let (status, _, _) = send(&server.router, get("/api/file/expiredblob1")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _, _) = send(&server.router, get("/api/file/expiredblob1/status")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// ===== Webhook verification (signed envelope) =====

const WEBHOOK_HASH: &str = "abc123def456789012345678";

fn test_secret() -> String {
    format!("whsec_{}", BASE64.encode("test-secret-key-1234"))
}

fn sign(msg_id: &str, timestamp: i64, body: &[u8]) -> String {
    let secret = BASE64.decode(BASE64.encode("test-secret-key-1234")).unwrap();
    let mut mac = Hmac::<Sha256>::new_from_slice(&secret).unwrap();
    mac.update(format!("{msg_id}.{timestamp}.").as_bytes());
    mac.update(body);
    BASE64.encode(mac.finalize().into_bytes())
}

fn webhook_request(body: &[u8], msg_id: &str, timestamp: i64, signature: &str) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri("/api/webhook/alby")
        .header("svix-id", msg_id)
        .header("svix-timestamp", timestamp.to_string())
        .header("svix-signature", signature)
        .body(Body::from(body.to_vec()))
        .unwrap()
}

async fn alby_server_with_pending_invoice() -> TestServer {
    let server = TestServer::with_alby(&test_secret()).await;

    let now = OffsetDateTime::now_utc();
    server
        .state
        .metadata
        .save_file_meta(&FileMeta {
            id: "webhookfile1".to_string(),
            size: 64,
            expires_at: now + time::Duration::minutes(15),
            host_duration: time::Duration::days(7),
            paid: false,
            created_at: now,
        })
        .await
        .unwrap();
    server
        .state
        .metadata
        .save_pending_invoice(&PendingInvoice {
            payment_hash: WEBHOOK_HASH.to_string(),
            file_id: "webhookfile1".to_string(),
            payment_request: "lnbctest".to_string(),
            amount_sats: 100,
            created_at: now,
        })
        .await
        .unwrap();
    // Pick up the injected row, as restart recovery would.
    server.state.payments.load_on_startup().await.unwrap();

    server
}

#[tokio::test]
async fn webhook_with_valid_signature_settles_file() {
    let server = alby_server_with_pending_invoice().await;

    let body = format!(r#"{{"payment_hash":"{WEBHOOK_HASH}","settled":true}}"#);
    let ts = OffsetDateTime::now_utc().unix_timestamp();
    let sig = format!("v1,{}", sign("msg_test123", ts, body.as_bytes()));

    let (status, _, _) = send(
        &server.router,
        webhook_request(body.as_bytes(), "msg_test123", ts, &sig),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    server.wait_until_paid("webhookfile1").await;
    assert!(
        server
            .state
            .metadata
            .list_pending_invoices()
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn webhook_rejects_tampering_without_state_change() {
    let server = alby_server_with_pending_invoice().await;

    let body = format!(r#"{{"payment_hash":"{WEBHOOK_HASH}","settled":true}}"#);
    let ts = OffsetDateTime::now_utc().unix_timestamp();
    let good_sig = format!("v1,{}", sign("msg_test123", ts, body.as_bytes()));

    // Flipped body byte.
    let mut tampered = body.clone().into_bytes();
    tampered[10] ^= 0x01;
    let (status, _, _) = send(
        &server.router,
        webhook_request(&tampered, "msg_test123", ts, &good_sig),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Wrong signature version.
    let v2_sig = format!("v2,{}", sign("msg_test123", ts, body.as_bytes()));
    let (status, _, _) = send(
        &server.router,
        webhook_request(body.as_bytes(), "msg_test123", ts, &v2_sig),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Timestamp outside the replay window.
    let old_ts = ts - 600;
    let old_sig = format!("v1,{}", sign("msg_test123", old_ts, body.as_bytes()));
    let (status, _, _) = send(
        &server.router,
        webhook_request(body.as_bytes(), "msg_test123", old_ts, &old_sig),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Missing each signature header in turn.
    for missing in ["svix-id", "svix-timestamp", "svix-signature"] {
        let mut req = webhook_request(body.as_bytes(), "msg_test123", ts, &good_sig);
        req.headers_mut().remove(missing);
        let (status, _, _) = send(&server.router, req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "missing {missing}");
    }

    // No state changed.
    let meta = server
        .state
        .metadata
        .get_file_meta("webhookfile1")
        .await
        .unwrap()
        .unwrap();
    assert!(!meta.paid);
    assert_eq!(
        server
            .state
            .metadata
            .list_pending_invoices()
            .await
            .unwrap()
            .len(),
        1
    );
}

#[tokio::test]
async fn webhook_for_unknown_hash_returns_ok() {
    // Wallet-retry idempotence: an already-processed (or never-known)
    // settlement acknowledges cleanly.
    let server = TestServer::with_alby(&test_secret()).await;

    let body = br#"{"payment_hash":"ffffffffffffffff","settled":true}"#;
    let ts = OffsetDateTime::now_utc().unix_timestamp();
    let sig = format!("v1,{}", sign("msg_unknown", ts, body));

    let (status, _, _) = send(&server.router, webhook_request(body, "msg_unknown", ts, &sig)).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn webhook_without_real_wallet_is_unavailable() {
    let server = TestServer::new().await;
    let (status, _, _) = send(
        &server.router,
        webhook_request(b"{}", "msg_test123", OffsetDateTime::now_utc().unix_timestamp(), "v1,x"),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

// ===== Admission and validation =====

#[tokio::test]
async fn oversized_reservation_is_rejected() {
    let server = TestServer::new().await;
    let max = server.state.config.limits.max_upload_size;

    let (status, _, _) = send(
        &server.router,
        post_json("/api/upload/init", serde_json::json!({"size": max + 1}), "10.0.0.1"),
    )
    .await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);

    for bad_size in [0, -5] {
        let (status, _, _) = send(
            &server.router,
            post_json("/api/upload/init", serde_json::json!({"size": bad_size}), "10.0.0.1"),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}

#[tokio::test]
async fn invalid_file_ids_are_rejected_at_the_boundary() {
    let server = TestServer::new().await;

    for path in [
        "/api/file/bad..id",
        "/api/file/has-dash",
        "/api/file/bad..id/status",
        "/api/file/bad..id/invoice",
    ] {
        let (status, _, _) = send(&server.router, get(path)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "path: {path}");
    }

    let (status, _, _) = send(
        &server.router,
        put_bytes("/api/upload/not%20valid", b"data".to_vec()),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _, _) = send(
        &server.router,
        post_json(
            "/api/upload/complete",
            serde_json::json!({"file_id": "../../etc", "size": 1}),
            "10.0.0.1",
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn put_requires_content_length() {
    let server = TestServer::new().await;
    let id = "a1b2c3d4e5f60718293a4b5c6d7e8f90";

    let req = Request::builder()
        .method(Method::PUT)
        .uri(format!("/api/upload/{id}"))
        .body(Body::empty())
        .unwrap();
    let (status, _, _) = send(&server.router, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn complete_without_uploaded_bytes_reports_failure() {
    let server = TestServer::new().await;

    let (status, _, body) = send(
        &server.router,
        post_json(
            "/api/upload/complete",
            serde_json::json!({"file_id": "a1b2c3d4e5f60718293a4b5c6d7e8f90", "size": 10}),
            "10.0.0.1",
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let message = json_body(&body)["message"].as_str().unwrap().to_string();
    assert!(message.contains("upload may have failed"), "message: {message}");
}

// ===== Retrieval edge cases =====

#[tokio::test]
async fn expired_paid_file_is_gone() {
    let server = TestServer::new().await;
    let now = OffsetDateTime::now_utc();

    server
        .state
        .metadata
        .save_file_meta(&FileMeta {
            id: "expiredpaid1".to_string(),
            size: 4,
            expires_at: now - time::Duration::hours(1),
            host_duration: time::Duration::days(7),
            paid: true,
            created_at: now - time::Duration::days(8),
        })
        .await
        .unwrap();

    let (status, _, _) = send(&server.router, get("/api/file/expiredpaid1")).await;
    assert_eq!(status, StatusCode::GONE);
}

#[tokio::test]
async fn unknown_file_is_not_found() {
    let server = TestServer::new().await;
    for path in [
        "/api/file/a1b2c3d4e5f60718293a4b5c6d7e8f90",
        "/api/file/a1b2c3d4e5f60718293a4b5c6d7e8f90/status",
        "/api/file/a1b2c3d4e5f60718293a4b5c6d7e8f90/invoice",
    ] {
        let (status, _, _) = send(&server.router, get(path)).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "path: {path}");
    }
}

#[tokio::test]
async fn range_requests_serve_partial_content() {
    let server = TestServer::new().await;
    let data: Vec<u8> = (0u8..=255).cycle().take(1000).collect();

    let (file_id, payment_hash) = upload_blob(&server, "10.0.0.1", &data).await;
    server.settle(&payment_hash);
    server.wait_until_paid(&file_id).await;

    let req = Request::builder()
        .method(Method::GET)
        .uri(format!("/api/file/{file_id}"))
        .header(RANGE, "bytes=100-199")
        .body(Body::empty())
        .unwrap();
    let (status, headers, body) = send(&server.router, req).await;
    assert_eq!(status, StatusCode::PARTIAL_CONTENT);
    assert_eq!(headers[CONTENT_RANGE], "bytes 100-199/1000");
    assert_eq!(&body[..], &data[100..200]);

    // Unsatisfiable range.
    let req = Request::builder()
        .method(Method::GET)
        .uri(format!("/api/file/{file_id}"))
        .header(RANGE, "bytes=5000-6000")
        .body(Body::empty())
        .unwrap();
    let (status, _, _) = send(&server.router, req).await;
    assert_eq!(status, StatusCode::RANGE_NOT_SATISFIABLE);
}

#[tokio::test]
async fn head_returns_headers_without_body() {
    let server = TestServer::new().await;
    let data = b"head test data".to_vec();

    let (file_id, payment_hash) = upload_blob(&server, "10.0.0.1", &data).await;
    server.settle(&payment_hash);
    server.wait_until_paid(&file_id).await;

    let req = Request::builder()
        .method(Method::HEAD)
        .uri(format!("/api/file/{file_id}"))
        .body(Body::empty())
        .unwrap();
    let (status, headers, body) = send(&server.router, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[CONTENT_LENGTH], data.len().to_string().as_str());
    assert!(body.is_empty());
}

#[tokio::test]
async fn invoice_can_be_refetched_until_settlement() {
    let server = TestServer::new().await;
    let (file_id, payment_hash) = upload_blob(&server, "10.0.0.1", b"blob").await;

    let (status, _, body) = send(&server.router, get(&format!("/api/file/{file_id}/invoice"))).await;
    assert_eq!(status, StatusCode::OK);
    let invoice = json_body(&body);
    assert_eq!(invoice["payment_hash"], payment_hash.as_str());
    assert_eq!(invoice["amount_sats"], 100);
    assert!(
        invoice["payment_request"]
            .as_str()
            .unwrap()
            .starts_with("lnbc")
    );
}

#[tokio::test]
async fn status_reports_unpaid_before_settlement() {
    let server = TestServer::new().await;
    let (file_id, _) = upload_blob(&server, "10.0.0.1", b"blob").await;

    let (status, _, body) = send(&server.router, get(&format!("/api/file/{file_id}/status"))).await;
    assert_eq!(status, StatusCode::OK);
    let status_json = json_body(&body);
    assert_eq!(status_json["paid"], false);
    assert!(status_json.get("direct_url").is_none());

    // Pending expiry is the short window, not the hosting window.
    let expires_at =
        OffsetDateTime::parse(status_json["expires_at"].as_str().unwrap(), &Rfc3339).unwrap();
    let expected = OffsetDateTime::now_utc() + time::Duration::minutes(15);
    assert!((expires_at - expected).abs() < time::Duration::minutes(1));
}
