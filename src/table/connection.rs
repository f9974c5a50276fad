use crate::coordination::client::{Connector, KeeperClient};
use crate::coordination::types::KeeperResult;

use std::sync::Arc;
use tokio::sync::Mutex;

/// Lazily opened keeper client owned by one table instance.
///
/// `client()` is the only way in: it hands out the live client, or replaces
/// an expired one with a fresh session that is synced against the table root
/// before anyone uses it.
pub struct KeeperConnection {
    connector: Arc<dyn Connector>,
    sync_path: String,
    client: Mutex<Option<Arc<dyn KeeperClient>>>,
}

impl KeeperConnection {
    pub fn new(connector: Arc<dyn Connector>, sync_path: &str) -> Self {
        Self {
            connector,
            sync_path: sync_path.to_string(),
            client: Mutex::new(None),
        }
    }

    pub async fn client(&self) -> KeeperResult<Arc<dyn KeeperClient>> {
        let mut guard = self.client.lock().await;
        if let Some(client) = guard.as_ref()
            && !client.expired()
        {
            return Ok(client.clone());
        }

        if let Some(stale) = guard.take() {
            tracing::info!(
                "Keeper session {} expired, opening a new one",
                stale.session_id()
            );
        }

        let client = self.connector.connect().await?;
        client.sync(&self.sync_path).await?;
        tracing::debug!(
            "Keeper session {} ready for {}",
            client.session_id(),
            self.sync_path
        );
        *guard = Some(client.clone());
        Ok(client)
    }
}
