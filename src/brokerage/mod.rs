pub mod schwab;

use anyhow::Result;

/// Polymorphic brokerage capability set (§9 "Polymorphism"). The gateway
/// core never depends on a concrete variant — it only calls through this
/// trait. Only the upstream-OAuth-bridge-relevant method (`account_id`) has
/// a real implementation in this repo; the rest of the capability set is
/// declared for shape, per SPEC_FULL §5, and is out of scope to implement.
#[async_trait::async_trait]
pub trait BrokerageClient: Send + Sync {
    /// Fetches the account identifier to bind to a stored credential. The
    /// only capability the upstream-OAuth callback actually exercises.
    async fn account_id(&self, access_token: &str) -> Result<String>;

    async fn account_info(&self, _access_token: &str) -> Result<serde_json::Value> {
        Err(anyhow::anyhow!("not implemented in this gateway"))
    }

    async fn positions(&self, _access_token: &str) -> Result<serde_json::Value> {
        Err(anyhow::anyhow!("not implemented in this gateway"))
    }

    async fn quote(&self, _access_token: &str, _symbol: &str) -> Result<serde_json::Value> {
        Err(anyhow::anyhow!("not implemented in this gateway"))
    }

    async fn balance(&self, _access_token: &str) -> Result<serde_json::Value> {
        Err(anyhow::anyhow!("not implemented in this gateway"))
    }

    async fn orders(&self, _access_token: &str) -> Result<serde_json::Value> {
        Err(anyhow::anyhow!("not implemented in this gateway"))
    }

    async fn cancel_order(&self, _access_token: &str, _order_id: &str) -> Result<()> {
        Err(anyhow::anyhow!("not implemented in this gateway"))
    }

    async fn change_order(&self, _access_token: &str, _order_id: &str, _patch: serde_json::Value) -> Result<()> {
        Err(anyhow::anyhow!("not implemented in this gateway"))
    }

    async fn order_history(&self, _access_token: &str) -> Result<serde_json::Value> {
        Err(anyhow::anyhow!("not implemented in this gateway"))
    }

    async fn place_multileg_order(&self, _access_token: &str, _order: serde_json::Value) -> Result<serde_json::Value> {
        Err(anyhow::anyhow!("not implemented in this gateway"))
    }
}
