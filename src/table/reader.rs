//! Batched point reads.
//!
//! ## Core Concepts
//! - **Key source**: either encoded names listed from the root (full scan) or
//!   typed primary keys from the caller. Both are sorted and deduplicated once
//!   and shared between shards.
//! - **Shards**: contiguous slices of the key source, one per unit of
//!   parallelism. Each shard hands out blocks of at most `block_size` rows.
//! - **Deadline**: every block's reads are issued at once and awaited under the
//!   operation timeout. Missing it fails the read.

use super::codec::RowCodec;
use super::error::{TableError, TableResult};
use super::key::{decode_key, encode_key};
use super::layout::{METADATA_NODE, PathLayout};
use crate::coordination::client::KeeperClient;
use crate::coordination::types::Code;

use futures_util::future::{join_all, try_join_all};
use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;

/// The set of keys a read covers.
pub enum KeySource<K> {
    /// Names already in path form, as listed from the root.
    Serialized(Arc<Vec<String>>),
    /// Primary keys; encoded only when their block is fetched.
    Typed(Arc<Vec<K>>),
}

impl<K> Clone for KeySource<K> {
    fn clone(&self) -> Self {
        match self {
            KeySource::Serialized(keys) => KeySource::Serialized(keys.clone()),
            KeySource::Typed(keys) => KeySource::Typed(keys.clone()),
        }
    }
}

impl<K: Ord> KeySource<K> {
    pub fn serialized(mut keys: Vec<String>) -> Self {
        keys.sort();
        keys.dedup();
        KeySource::Serialized(Arc::new(keys))
    }

    pub fn typed(mut keys: Vec<K>) -> Self {
        keys.sort();
        keys.dedup();
        KeySource::Typed(Arc::new(keys))
    }

    pub fn len(&self) -> usize {
        match self {
            KeySource::Serialized(keys) => keys.len(),
            KeySource::Typed(keys) => keys.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Splits the keys into `min(parallelism, len)` contiguous ranges. Shard
    /// `i` covers `[len*i/n, len*(i+1)/n)`.
    pub fn shard_ranges(&self, parallelism: usize) -> Vec<Range<usize>> {
        let len = self.len();
        let shards = parallelism.max(1).min(len);
        (0..shards)
            .map(|i| (len * i / shards)..(len * (i + 1) / shards))
            .collect()
    }
}

/// Rows fetched for one block, with per-key presence when requested.
#[derive(Debug, Clone)]
pub struct FetchedRows<R> {
    pub rows: Vec<R>,
    pub presence: Option<Vec<bool>>,
}

pub struct BatchReader<'a, C: RowCodec> {
    client: &'a dyn KeeperClient,
    layout: &'a PathLayout,
    codec: &'a C,
    timeout: Duration,
    block_size: usize,
}

impl<'a, C: RowCodec> BatchReader<'a, C> {
    pub fn new(
        client: &'a dyn KeeperClient,
        layout: &'a PathLayout,
        codec: &'a C,
        timeout: Duration,
        block_size: usize,
    ) -> Self {
        Self {
            client,
            layout,
            codec,
            timeout,
            block_size: block_size.max(1),
        }
    }

    /// Encoded names of every row under the root.
    pub async fn list_keys(&self) -> TableResult<Vec<String>> {
        let mut children = self.client.children(&self.layout.root).await?;
        children.retain(|name| name != METADATA_NODE);
        Ok(children)
    }

    pub fn encode_typed(&self, key: &C::Key) -> TableResult<String> {
        encode_key(&self.codec.serialize_key(key)?)
    }

    /// Fetches `keys` (already encoded) concurrently.
    ///
    /// Absent keys are skipped, or filled with the codec's default row when
    /// `with_presence` is set.
    pub async fn fetch(
        &self,
        keys: &[String],
        with_presence: bool,
    ) -> TableResult<FetchedRows<C::Row>> {
        let wanted: Vec<(usize, String)> = keys
            .iter()
            .enumerate()
            .filter(|(_, key)| key.as_str() != METADATA_NODE)
            .map(|(i, key)| (i, self.layout.row_path(key)))
            .collect();

        let requests = wanted.iter().map(|(_, path)| self.client.get(path));
        let responses = tokio::time::timeout(self.timeout, join_all(requests))
            .await
            .map_err(|_| TableError::Timeout {
                pending: wanted.len(),
                timeout: self.timeout,
            })?;

        let mut found: Vec<Option<Vec<u8>>> = vec![None; keys.len()];
        for ((index, _), response) in wanted.iter().zip(responses) {
            match response {
                Ok((data, _)) => found[*index] = Some(data),
                Err(e) if e.code == Code::NoNode => {}
                Err(e) => return Err(e.into()),
            }
        }

        let mut rows = Vec::with_capacity(keys.len());
        let mut presence = with_presence.then(|| Vec::with_capacity(keys.len()));
        for (key, data) in keys.iter().zip(found) {
            match data {
                Some(value) => {
                    let raw = decode_key(key)?;
                    rows.push(self.codec.decode_row(&raw, &value)?);
                    if let Some(presence) = presence.as_mut() {
                        presence.push(true);
                    }
                }
                None => {
                    if let Some(presence) = presence.as_mut() {
                        rows.push(self.codec.default_row());
                        presence.push(false);
                    }
                }
            }
        }

        Ok(FetchedRows { rows, presence })
    }

    pub fn shards<'r>(
        &'r self,
        source: &KeySource<C::Key>,
        parallelism: usize,
    ) -> Vec<ShardReader<'r, 'a, C>> {
        source
            .shard_ranges(parallelism)
            .into_iter()
            .map(|range| ShardReader {
                reader: self,
                source: source.clone(),
                cursor: range.start,
                end: range.end,
            })
            .collect()
    }

    /// Reads every key of `source`, shards running concurrently. Rows come
    /// back in key order.
    pub async fn read(
        &self,
        source: &KeySource<C::Key>,
        parallelism: usize,
    ) -> TableResult<Vec<C::Row>> {
        let shards = self.shards(source, parallelism);
        tracing::debug!(
            "Reading {} key(s) from {} in {} shard(s)",
            source.len(),
            self.layout.root,
            shards.len()
        );

        let per_shard = try_join_all(shards.into_iter().map(|mut shard| async move {
            let mut rows = Vec::new();
            while let Some(block) = shard.next_block().await? {
                rows.extend(block);
            }
            Ok::<_, TableError>(rows)
        }))
        .await?;

        Ok(per_shard.into_iter().flatten().collect())
    }
}

/// One contiguous slice of a key source.
pub struct ShardReader<'r, 'a, C: RowCodec> {
    reader: &'r BatchReader<'a, C>,
    source: KeySource<C::Key>,
    cursor: usize,
    end: usize,
}

impl<C: RowCodec> ShardReader<'_, '_, C> {
    /// Fetches the next block of present rows, or `None` once the shard is
    /// exhausted.
    pub async fn next_block(&mut self) -> TableResult<Option<Vec<C::Row>>> {
        if self.cursor >= self.end {
            return Ok(None);
        }
        let stop = (self.cursor + self.reader.block_size).min(self.end);
        let keys = match &self.source {
            KeySource::Serialized(keys) => keys[self.cursor..stop].to_vec(),
            KeySource::Typed(keys) => keys[self.cursor..stop]
                .iter()
                .map(|key| self.reader.encode_typed(key))
                .collect::<TableResult<Vec<_>>>()?,
        };
        self.cursor = stop;

        let fetched = self.reader.fetch(&keys, false).await?;
        Ok(Some(fetched.rows))
    }
}
