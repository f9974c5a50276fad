use super::codec::RowCodec;
use super::error::{TableError, TableResult};
use super::key::encode_key;
use super::layout::PathLayout;
use crate::coordination::client::KeeperClient;
use crate::coordination::types::{Code, CreateMode, KeeperError, Op, Stat};

use futures_util::future::join_all;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteSummary {
    pub inserted: usize,
    pub updated: usize,
}

/// Commits row batches as a single multi-operation.
pub struct BatchWriter<'a> {
    client: &'a dyn KeeperClient,
    layout: &'a PathLayout,
    timeout: Duration,
    keys_limit: u64,
}

impl<'a> BatchWriter<'a> {
    pub fn new(
        client: &'a dyn KeeperClient,
        layout: &'a PathLayout,
        timeout: Duration,
        keys_limit: u64,
    ) -> Self {
        Self {
            client,
            layout,
            timeout,
            keys_limit,
        }
    }

    /// Encodes `rows` with `codec`. A key seen twice keeps its last value.
    pub fn encode_rows<C: RowCodec>(
        codec: &C,
        rows: &[C::Row],
    ) -> TableResult<BTreeMap<String, Vec<u8>>> {
        let mut encoded = BTreeMap::new();
        for row in rows {
            let (key, value) = codec.encode_row(row)?;
            encoded.insert(encode_key(&key)?, value);
        }
        Ok(encoded)
    }

    /// Number of rows under the root, the metadata node excluded.
    pub async fn current_keys(&self) -> TableResult<u64> {
        let stat = self
            .client
            .exists(&self.layout.root)
            .await?
            .ok_or_else(|| KeeperError::new(Code::NoNode, &self.layout.root))?;
        Ok(stat.num_children.saturating_sub(1) as u64)
    }

    async fn exists_all(
        &self,
        keys: impl Iterator<Item = &String>,
    ) -> TableResult<Vec<(String, Option<Stat>)>> {
        let paths: Vec<String> = keys.map(|key| self.layout.row_path(key)).collect();
        let requests = paths.iter().map(|path| self.client.exists(path));
        let responses = tokio::time::timeout(self.timeout, join_all(requests))
            .await
            .map_err(|_| TableError::Timeout {
                pending: paths.len(),
                timeout: self.timeout,
            })?;

        paths
            .into_iter()
            .zip(responses)
            .map(|(path, response)| Ok((path, response?)))
            .collect()
    }

    async fn commit(&self, ops: Vec<Op>) -> TableResult<()> {
        let pending = ops.len();
        tokio::time::timeout(self.timeout, self.client.multi(ops))
            .await
            .map_err(|_| TableError::Timeout {
                pending,
                timeout: self.timeout,
            })??;
        Ok(())
    }

    /// Writes `rows` (encoded key to value) atomically: existing keys are
    /// overwritten, new keys are created, and the key limit is enforced
    /// before anything is sent.
    pub async fn write(&self, rows: BTreeMap<String, Vec<u8>>) -> TableResult<WriteSummary> {
        if rows.is_empty() {
            return Ok(WriteSummary::default());
        }

        let current = if self.keys_limit != 0 {
            self.current_keys().await?
        } else {
            0
        };

        let checked = self.exists_all(rows.keys()).await?;

        let mut summary = WriteSummary::default();
        let mut ops = Vec::with_capacity(rows.len());
        for ((path, stat), value) in checked.into_iter().zip(rows.into_values()) {
            if stat.is_some() {
                summary.updated += 1;
                ops.push(Op::set(path, value, None));
            } else {
                summary.inserted += 1;
                ops.push(Op::create(path, value, CreateMode::Persistent));
            }
        }

        if self.keys_limit != 0 && summary.inserted > 0 {
            let would_be = current + summary.inserted as u64;
            if would_be > self.keys_limit {
                return Err(TableError::LimitExceeded {
                    new_keys: summary.inserted,
                    limit: self.keys_limit,
                    would_be,
                });
            }
        }

        self.commit(ops).await?;
        tracing::debug!(
            "Wrote {} new and {} existing key(s) under {}",
            summary.inserted,
            summary.updated,
            self.layout.root
        );
        Ok(summary)
    }

    /// Removes the given encoded keys atomically. Returns how many existed.
    pub async fn delete(&self, keys: BTreeSet<String>) -> TableResult<usize> {
        if keys.is_empty() {
            return Ok(0);
        }

        let ops: Vec<Op> = self
            .exists_all(keys.iter())
            .await?
            .into_iter()
            .filter_map(|(path, stat)| stat.map(|stat| Op::remove(path, Some(stat.version))))
            .collect();

        if ops.is_empty() {
            return Ok(0);
        }
        let removed = ops.len();
        self.commit(ops).await?;
        tracing::debug!("Deleted {} key(s) under {}", removed, self.layout.root);
        Ok(removed)
    }
}
