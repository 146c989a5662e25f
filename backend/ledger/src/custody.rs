//! HTTP client for the custody / swap collaborator.
//!
//! Each outbox row is POSTed to `{base}/{kind}` (`transfer`, `issue`, `burn`,
//! `swap`) with the row id as an idempotency key, so a redelivery after a
//! lost response can be recognised on the other side.

use reqwest::Client;
use rwa_protocol::PoolQuote;
use serde_json::Value;
use tracing::debug;

use crate::errors::{LedgerError, Result};
use crate::events::OutboxRecord;

pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

#[derive(Debug, Clone)]
pub struct CustodyClient {
    client: Client,
    base_url: String,
}

impl CustodyClient {
    pub fn new(client: Client, base_url: &str) -> Self {
        CustodyClient {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Deliver one outbox row. Any non-2xx answer is a delivery failure.
    pub async fn deliver(&self, record: &OutboxRecord) -> Result<()> {
        let body: Value = serde_json::from_str(&record.payload)?;
        let resp = self
            .client
            .post(self.url(record.endpoint()))
            .header(IDEMPOTENCY_HEADER, format!("outbox-{}", record.id))
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(LedgerError::Delivery(format!(
                "{} #{} rejected with {status}: {text}",
                record.kind, record.id
            )));
        }
        debug!(id = record.id, kind = %record.kind, "outbox row delivered");
        Ok(())
    }

    /// Current reserves of a trading pair, e.g. `usdt.rwa`.
    pub async fn quote(&self, pair: &str) -> Result<PoolQuote> {
        let resp = self.client.get(self.url(&format!("quote/{pair}"))).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(LedgerError::Delivery(format!("quote for {pair} failed with {status}")));
        }
        Ok(resp.json().await?)
    }
}
