use super::codec::RowCodec;
use super::connection::KeeperConnection;
use super::error::{TableError, TableResult};
use super::layout::{METADATA_NODE, PathLayout};
use super::lifecycle::{self, DropOutcome};
use super::reader::{BatchReader, KeySource};
use super::validity::{Validity, ValidityCache};
use super::writer::{BatchWriter, WriteSummary};
use crate::coordination::client::{KeeperClient, remove_children_recursive};

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

/// What a read covers.
#[derive(Debug, Clone)]
pub enum ReadRequest<K> {
    FullScan,
    Keys(Vec<K>),
}

/// Per-instance knobs resolved by the engine.
#[derive(Debug, Clone)]
pub struct TableOptions {
    pub keys_limit: u64,
    pub operation_timeout: Duration,
    pub max_block_size: usize,
    pub max_create_attempts: usize,
    pub create_missing_root_path: bool,
}

/// One process's handle to a table stored under a shared keeper root.
///
/// Every entry point validates the registration first; a connectivity error
/// seen along the way makes the next call validate again.
pub struct KeeperMap<C: RowCodec> {
    layout: PathLayout,
    connection: KeeperConnection,
    validity: ValidityCache,
    codec: C,
    options: TableOptions,
}

impl<C: RowCodec> KeeperMap<C> {
    pub fn new(
        layout: PathLayout,
        connection: KeeperConnection,
        codec: C,
        options: TableOptions,
    ) -> Self {
        Self {
            layout,
            connection,
            validity: ValidityCache::default(),
            codec,
            options,
        }
    }

    pub fn layout(&self) -> &PathLayout {
        &self.layout
    }

    pub fn keys_limit(&self) -> u64 {
        self.options.keys_limit
    }

    // ============================================================
    // LIFECYCLE
    // ============================================================

    /// Creates the root if needed and registers this instance under it.
    pub async fn create(&self) -> TableResult<()> {
        let client = self.connection.client().await?;
        lifecycle::ensure_root(
            client.as_ref(),
            &self.layout.root,
            self.options.create_missing_root_path,
        )
        .await?;
        lifecycle::register(
            client.as_ref(),
            &self.layout,
            self.options.max_create_attempts,
        )
        .await?;
        self.validity.set(Validity::Valid).await;
        tracing::info!("Table {} is ready", self.layout.table);
        Ok(())
    }

    /// Validates an existing registration without creating anything. With
    /// `strict` unset a failed check is only logged and retried lazily.
    pub async fn attach(&self, strict: bool) -> TableResult<()> {
        match self.check_table().await {
            Ok(_) => Ok(()),
            Err(e) if strict => Err(e),
            Err(e) => {
                tracing::warn!(
                    "Attaching {} without a valid registration: {}",
                    self.layout.table,
                    e
                );
                Ok(())
            }
        }
    }

    /// `Some(true)` valid, `Some(false)` invalid, `None` when the keeper
    /// cannot be reached to tell.
    pub async fn is_valid(&self) -> Option<bool> {
        self.validity
            .get_or_check(&self.connection, &self.layout.table)
            .await
            .as_option()
    }

    /// Gate in front of every data operation. Returns the client to use.
    async fn check_table(&self) -> TableResult<Arc<dyn KeeperClient>> {
        match self
            .validity
            .get_or_check(&self.connection, &self.layout.table)
            .await
        {
            Validity::Unknown => Err(TableError::Unavailable),
            Validity::Invalid => Err(TableError::InvalidTable {
                path: self.layout.table.clone(),
            }),
            Validity::Valid => {
                let client = self.connection.client().await;
                self.observe(client.map_err(TableError::from)).await
            }
        }
    }

    async fn observe<T>(&self, result: TableResult<T>) -> TableResult<T> {
        if let Err(e) = &result
            && e.is_hardware_error()
        {
            tracing::warn!("Keeper connection issue on {}: {}", self.layout.root, e);
            self.validity.forget_valid().await;
        }
        result
    }

    /// Unregisters this instance. The instance is unusable afterwards.
    pub async fn drop_table(&self) -> TableResult<DropOutcome> {
        let client = self.check_table().await?;
        let outcome = self
            .observe(lifecycle::drop_registration(client.as_ref(), &self.layout).await)
            .await?;
        self.validity.set(Validity::Invalid).await;
        tracing::info!("Dropped {}: {:?}", self.layout.table, outcome);
        Ok(outcome)
    }

    // ============================================================
    // READS
    // ============================================================

    fn reader<'a>(&'a self, client: &'a dyn KeeperClient) -> BatchReader<'a, C> {
        BatchReader::new(
            client,
            &self.layout,
            &self.codec,
            self.options.operation_timeout,
            self.options.max_block_size,
        )
    }

    pub async fn read(
        &self,
        request: ReadRequest<C::Key>,
        parallelism: usize,
    ) -> TableResult<Vec<C::Row>> {
        let client = self.check_table().await?;
        let reader = self.reader(client.as_ref());
        let result = async {
            let source = match request {
                ReadRequest::FullScan => KeySource::serialized(reader.list_keys().await?),
                ReadRequest::Keys(keys) => KeySource::typed(keys),
            };
            reader.read(&source, parallelism).await
        }
        .await;
        self.observe(result).await
    }

    /// Looks up `keys` in the order given. Missing keys yield the codec's
    /// default row with `false` in the presence map.
    pub async fn get_by_keys(&self, keys: &[C::Key]) -> TableResult<(Vec<C::Row>, Vec<bool>)> {
        let client = self.check_table().await?;
        let reader = self.reader(client.as_ref());
        let result = async {
            let encoded = keys
                .iter()
                .map(|key| reader.encode_typed(key))
                .collect::<TableResult<Vec<_>>>()?;

            let mut rows = Vec::with_capacity(keys.len());
            let mut presence = Vec::with_capacity(keys.len());
            for block in encoded.chunks(self.options.max_block_size.max(1)) {
                let fetched = reader.fetch(block, true).await?;
                rows.extend(fetched.rows);
                presence.extend(fetched.presence.unwrap_or_default());
            }
            Ok::<_, TableError>((rows, presence))
        }
        .await;
        self.observe(result).await
    }

    /// Row nodes under the root.
    pub async fn key_count(&self) -> TableResult<u64> {
        let client = self.check_table().await?;
        let result = self.writer(client.as_ref()).current_keys().await;
        self.observe(result).await
    }

    // ============================================================
    // WRITES
    // ============================================================

    fn writer<'a>(&'a self, client: &'a dyn KeeperClient) -> BatchWriter<'a> {
        BatchWriter::new(
            client,
            &self.layout,
            self.options.operation_timeout,
            self.options.keys_limit,
        )
    }

    pub async fn write(&self, rows: &[C::Row]) -> TableResult<WriteSummary> {
        let encoded = BatchWriter::encode_rows(&self.codec, rows)?;
        let client = self.check_table().await?;
        let result = self.writer(client.as_ref()).write(encoded).await;
        self.observe(result).await
    }

    pub async fn delete(&self, keys: &[C::Key]) -> TableResult<usize> {
        let client = self.check_table().await?;
        let reader = self.reader(client.as_ref());
        let encoded = keys
            .iter()
            .map(|key| reader.encode_typed(key))
            .collect::<TableResult<BTreeSet<_>>>()?;
        let result = self.writer(client.as_ref()).delete(encoded).await;
        self.observe(result).await
    }

    /// Removes every row. Registration and metadata stay.
    pub async fn truncate(&self) -> TableResult<()> {
        let client = self.check_table().await?;
        let result =
            remove_children_recursive(client.as_ref(), &self.layout.root, Some(METADATA_NODE))
                .await
                .map_err(TableError::from);
        self.observe(result).await?;
        tracing::info!("Truncated {}", self.layout.root);
        Ok(())
    }
}
