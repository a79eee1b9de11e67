use anyhow::{anyhow, Result};
use serde::Deserialize;

use super::BrokerageClient;

const ACCOUNTS_BASE: &str = "https://api.schwabapi.com/trader/v1";

/// One real `BrokerageClient` variant, backing the upstream-OAuth bridge's
/// account-id fetch. Modeled on `schwab_client.py`'s `SchwabClient`, reduced
/// to the single capability the bridge needs — the rest of the trait's
/// surface (orders, quotes, positions) is intentionally unimplemented here,
/// as the tool-dispatch layer that would call them is out of scope.
pub struct SchwabClient {
    http: reqwest::Client,
}

impl SchwabClient {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[derive(Deserialize)]
struct AccountNumberEntry {
    #[serde(rename = "hashValue")]
    hash_value: String,
}

#[async_trait::async_trait]
impl BrokerageClient for SchwabClient {
    async fn account_id(&self, access_token: &str) -> Result<String> {
        let url = format!("{ACCOUNTS_BASE}/accounts/accountNumbers");
        let resp = self
            .http
            .get(&url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| anyhow!("schwab account lookup failed: {e}"))?;

        if !resp.status().is_success() {
            return Err(anyhow!("schwab account lookup returned {}", resp.status()));
        }

        let entries: Vec<AccountNumberEntry> = resp
            .json()
            .await
            .map_err(|e| anyhow!("schwab account lookup: malformed response: {e}"))?;

        entries
            .into_iter()
            .next()
            .map(|e| e.hash_value)
            .ok_or_else(|| anyhow!("schwab account lookup returned no accounts"))
    }
}
