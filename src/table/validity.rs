use super::connection::KeeperConnection;
use crate::coordination::types::Op;

use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validity {
    Unknown,
    Valid,
    Invalid,
}

impl Validity {
    pub fn as_option(self) -> Option<bool> {
        match self {
            Validity::Unknown => None,
            Validity::Valid => Some(true),
            Validity::Invalid => Some(false),
        }
    }
}

/// Cached answer to "does this instance's registration node still exist?".
///
/// `Invalid` is terminal. `Unknown` is recomputed on the next request, which
/// is how a connection outage heals.
pub struct ValidityCache {
    state: Mutex<Validity>,
}

impl Default for ValidityCache {
    fn default() -> Self {
        Self::new(Validity::Unknown)
    }
}

impl ValidityCache {
    pub fn new(initial: Validity) -> Self {
        Self {
            state: Mutex::new(initial),
        }
    }

    pub async fn set(&self, validity: Validity) {
        *self.state.lock().await = validity;
    }

    /// Downgrades a cached `Valid` to `Unknown` after a connectivity error so
    /// the next request re-validates.
    pub async fn forget_valid(&self) {
        let mut state = self.state.lock().await;
        if *state == Validity::Valid {
            *state = Validity::Unknown;
        }
    }

    /// Returns the cached verdict, computing it first if unknown.
    pub async fn get_or_check(&self, connection: &KeeperConnection, table_path: &str) -> Validity {
        let mut state = self.state.lock().await;
        if *state != Validity::Unknown {
            return *state;
        }

        let client = match connection.client().await {
            Ok(client) => client,
            Err(e) => {
                tracing::warn!("Cannot validate table {}: {}", table_path, e);
                if !e.code.is_hardware_error() {
                    *state = Validity::Invalid;
                }
                return *state;
            }
        };

        match client.multi(vec![Op::check(table_path, None)]).await {
            Ok(_) => *state = Validity::Valid,
            Err(e) if e.code.is_hardware_error() => {
                tracing::warn!("Cannot validate table {}: {}", table_path, e);
            }
            Err(e) => {
                tracing::error!("Table {} is invalid: {}", table_path, e);
                *state = Validity::Invalid;
            }
        }
        *state
    }
}
