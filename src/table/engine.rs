use super::codec::RowCodec;
use super::connection::KeeperConnection;
use super::error::{TableError, TableResult};
use super::keeper_map::{KeeperMap, TableOptions};
use super::layout::{DEFAULT_KEEPER, PathLayout, RootPath};
use super::settings::{EngineSettings, TableSettings};
use crate::coordination::client::Connector;

use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Process-wide factory for [`KeeperMap`] tables.
///
/// Holds the engine settings, the keepers tables may live on (by name), and
/// the server id that makes instance ids unique across processes.
pub struct KeeperMapEngine {
    settings: EngineSettings,
    keepers: HashMap<String, Arc<dyn Connector>>,
    server_id: Uuid,
}

impl KeeperMapEngine {
    pub fn new(settings: EngineSettings, default_keeper: Arc<dyn Connector>) -> Self {
        let mut keepers = HashMap::new();
        keepers.insert(DEFAULT_KEEPER.to_string(), default_keeper);
        Self {
            settings,
            keepers,
            server_id: Uuid::new_v4(),
        }
    }

    /// Registers an auxiliary keeper selectable with a `name:` root prefix.
    pub fn with_keeper(mut self, name: &str, connector: Arc<dyn Connector>) -> Self {
        self.keepers.insert(name.to_string(), connector);
        self
    }

    pub fn with_server_id(mut self, server_id: Uuid) -> Self {
        self.server_id = server_id;
        self
    }

    fn build<C: RowCodec>(
        &self,
        table_id: Uuid,
        table: &TableSettings,
        codec: C,
    ) -> TableResult<KeeperMap<C>> {
        let prefix = self.settings.path_prefix()?;
        let root = RootPath::parse(&table.root_path)?;
        let connector = self.keepers.get(&root.keeper).cloned().ok_or_else(|| {
            TableError::Configuration(format!("Unknown auxiliary keeper '{}'", root.keeper))
        })?;

        let instance_id = format!("{}{}", table_id, self.server_id);
        let layout = PathLayout::new(prefix, &root, &instance_id)?;
        let keys_limit = self
            .settings
            .effective_keys_limit(table.keys_limit, &layout.root);

        let options = TableOptions {
            keys_limit,
            operation_timeout: self.settings.operation_timeout(),
            max_block_size: self.settings.max_block_size,
            max_create_attempts: self.settings.max_create_attempts,
            create_missing_root_path: table.create_missing_root_path,
        };
        let connection = KeeperConnection::new(connector, &layout.root);
        Ok(KeeperMap::new(layout, connection, codec, options))
    }

    /// Builds a table and registers it, creating the shared root as needed.
    pub async fn create_table<C: RowCodec>(
        &self,
        table_id: Uuid,
        table: &TableSettings,
        codec: C,
    ) -> TableResult<KeeperMap<C>> {
        let map = self.build(table_id, table, codec)?;
        map.create().await?;
        Ok(map)
    }

    /// Builds a table over an existing registration. No nodes are created.
    pub async fn attach_table<C: RowCodec>(
        &self,
        table_id: Uuid,
        table: &TableSettings,
        codec: C,
    ) -> TableResult<KeeperMap<C>> {
        let map = self.build(table_id, table, codec)?;
        map.attach(self.settings.strict_attach).await?;
        Ok(map)
    }
}
