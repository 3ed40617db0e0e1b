use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

/// JSON transport to the listing service.
/// Fetchers only see this trait, so they run the same against the live API and canned responses.
#[async_trait]
pub trait DivarApi: Send + Sync {
    /// POST a JSON body to `path` and return the decoded response
    async fn post(&self, path: &str, body: &Value) -> Result<Value>;

    /// GET `path` and return the decoded response
    async fn get(&self, path: &str) -> Result<Value>;
}
