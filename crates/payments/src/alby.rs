//! Alby custodial wallet adapter.
//!
//! Talks to the Alby HTTP API for invoice minting and ingests settlement
//! notifications delivered as svix-signed webhooks. The webhook endpoint and
//! its secret are registered with Alby out of band.

use crate::error::{PaymentError, PaymentResult};
use crate::wallet::{Invoice, SettlementEvent, WalletAdapter, SETTLEMENT_CHANNEL_CAPACITY};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use hmac::{Hmac, Mac};
use http::HeaderMap;
use serde::Deserialize;
use sha2::Sha256;
use std::sync::Mutex;
use std::time::Duration;
use subtle::ConstantTimeEq;
use time::OffsetDateTime;
use tokio::sync::mpsc;

type HmacSha256 = Hmac<Sha256>;

/// Alby API base URL.
pub const ALBY_API_BASE: &str = "https://api.getalby.com";

/// Accepted clock skew between the webhook timestamp and local time.
const REPLAY_TOLERANCE_SECS: i64 = 5 * 60;

/// Wallet adapter backed by the Alby HTTP API.
pub struct AlbyWallet {
    http: reqwest::Client,
    base_url: String,
    access_token: String,
    webhook_secret: String,
    tx: mpsc::Sender<SettlementEvent>,
    rx: Mutex<Option<mpsc::Receiver<SettlementEvent>>>,
}

#[derive(Debug, serde::Serialize)]
struct CreateInvoiceRequest<'a> {
    amount: i64,
    description: &'a str,
}

#[derive(Debug, Deserialize)]
struct InvoiceResponse {
    payment_hash: String,
    payment_request: String,
}

/// Payload Alby posts when an invoice changes state.
#[derive(Debug, Deserialize)]
struct WebhookPayload {
    #[serde(default)]
    settled: bool,
    #[serde(default)]
    payment_hash: String,
}

impl AlbyWallet {
    /// Create an adapter against the production Alby API.
    pub fn new(access_token: &str, webhook_secret: &str) -> PaymentResult<Self> {
        Self::with_base_url(ALBY_API_BASE, access_token, webhook_secret)
    }

    /// Create an adapter against a custom API base URL (tests).
    pub fn with_base_url(
        base_url: &str,
        access_token: &str,
        webhook_secret: &str,
    ) -> PaymentResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        let (tx, rx) = mpsc::channel(SETTLEMENT_CHANNEL_CAPACITY);
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            access_token: access_token.to_string(),
            webhook_secret: webhook_secret.to_string(),
            tx,
            rx: Mutex::new(Some(rx)),
        })
    }

    /// Verify wallet connectivity and credentials.
    pub async fn health_check(&self) -> PaymentResult<()> {
        let resp = self
            .http
            .get(format!("{}/balance", self.base_url))
            .bearer_auth(&self.access_token)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(PaymentError::Wallet(format!(
                "balance check returned {status}: {body}"
            )));
        }
        Ok(())
    }

    /// Verify a webhook delivery and push its settlement onto the channel.
    ///
    /// Verification failures and parse failures are both the caller's 400;
    /// a full channel is not an error because the wallet retries delivery
    /// and restart recovery covers the durable state.
    pub fn verify_and_ingest(&self, body: &[u8], headers: &HeaderMap) -> PaymentResult<()> {
        self.verify_signature(body, headers)?;

        let payload: WebhookPayload = serde_json::from_slice(body)
            .map_err(|e| PaymentError::Parse(format!("invalid webhook body: {e}")))?;

        if payload.settled && !payload.payment_hash.is_empty() {
            let event = SettlementEvent {
                payment_hash: payload.payment_hash.clone(),
            };
            match self.tx.try_send(event) {
                Ok(()) => {
                    tracing::info!(
                        payment_hash = %payload.payment_hash,
                        "webhook: invoice settled"
                    );
                }
                Err(mpsc::error::TrySendError::Full(_)) => {
                    // The row in pending_invoices survives; the wallet will
                    // redeliver and restart recovery covers the rest.
                    tracing::warn!(
                        payment_hash = %payload.payment_hash,
                        "webhook: settlement channel full, dropping event"
                    );
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    tracing::warn!(
                        payment_hash = %payload.payment_hash,
                        "webhook: settlement channel closed, dropping event"
                    );
                }
            }
        }

        Ok(())
    }

    /// Check the svix signed envelope: `HMAC-SHA256(secret, "{id}.{ts}.{body}")`,
    /// base64-encoded, must match one of the space-separated `v1,<sig>` entries.
    fn verify_signature(&self, body: &[u8], headers: &HeaderMap) -> PaymentResult<()> {
        let msg_id = header_str(headers, "svix-id")?;
        let timestamp = header_str(headers, "svix-timestamp")?;
        let signatures = header_str(headers, "svix-signature")?;

        let ts: i64 = timestamp
            .parse()
            .map_err(|_| PaymentError::Verification("invalid timestamp".to_string()))?;
        let now = OffsetDateTime::now_utc().unix_timestamp();
        if (now - ts).abs() > REPLAY_TOLERANCE_SECS {
            return Err(PaymentError::Verification(
                "timestamp too old or in future".to_string(),
            ));
        }

        let secret = self
            .webhook_secret
            .strip_prefix("whsec_")
            .unwrap_or(&self.webhook_secret);
        let secret_bytes = BASE64
            .decode(secret)
            .map_err(|_| PaymentError::Verification("webhook secret is not base64".to_string()))?;

        let mut mac = HmacSha256::new_from_slice(&secret_bytes)
            .map_err(|_| PaymentError::Verification("invalid webhook secret".to_string()))?;
        mac.update(msg_id.as_bytes());
        mac.update(b".");
        mac.update(timestamp.as_bytes());
        mac.update(b".");
        mac.update(body);
        let expected = BASE64.encode(mac.finalize().into_bytes());

        for entry in signatures.split(' ') {
            if let Some((version, candidate)) = entry.split_once(',')
                && version == "v1"
                && bool::from(candidate.as_bytes().ct_eq(expected.as_bytes()))
            {
                return Ok(());
            }
        }

        Err(PaymentError::Verification("signature mismatch".to_string()))
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> PaymentResult<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| PaymentError::Verification(format!("missing {name} header")))
}

#[async_trait]
impl WalletAdapter for AlbyWallet {
    async fn create_invoice(&self, amount_sats: i64, memo: &str) -> PaymentResult<Invoice> {
        let resp = self
            .http
            .post(format!("{}/invoices", self.base_url))
            .bearer_auth(&self.access_token)
            .json(&CreateInvoiceRequest {
                amount: amount_sats,
                description: memo,
            })
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(PaymentError::Wallet(format!(
                "create invoice returned {status}: {body}"
            )));
        }

        let body: InvoiceResponse = resp.json().await?;
        tracing::info!(
            payment_hash = %body.payment_hash,
            amount_sats,
            "created invoice"
        );

        Ok(Invoice {
            payment_hash: body.payment_hash,
            payment_request: body.payment_request,
            amount_sats,
        })
    }

    fn settlement_stream(&self) -> PaymentResult<mpsc::Receiver<SettlementEvent>> {
        self.rx
            .lock()
            .expect("alby wallet receiver lock poisoned")
            .take()
            .ok_or(PaymentError::StreamTaken)
    }
}
