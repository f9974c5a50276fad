//! Registration and teardown of a shared root.
//!
//! ## Core Concepts
//! - **Registration**: every live table instance owns one child under
//!   `ch_metadata/tables`. The metadata node lives as long as that registry
//!   has children or a teardown is running.
//! - **Teardown**: the last instance to leave swaps the registry for a
//!   `dropped` marker plus an ephemeral `lock` in one multi, then removes the
//!   rows and the metadata while holding the lock.
//! - **Leftovers**: a teardown that died half way leaves `dropped` behind. The
//!   next creator takes the lock and finishes the job before registering.

use super::error::{TableError, TableResult};
use super::layout::{METADATA_NODE, PathLayout};
use crate::coordination::client::{
    KeeperClient, create_ancestors, create_if_not_exists, remove_children_recursive,
};
use crate::coordination::types::{Code, CreateMode, KeeperError, Op};

use std::time::Duration;

const LOCK_CONTENTION_BACKOFF_MS: u64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationStep {
    Start,
    AwaitingCleanup,
    Registering,
    Done,
    Failed,
}

/// Attempt-bounded state machine driving [`register`].
#[derive(Debug, Clone)]
pub struct Registration {
    step: RegistrationStep,
    attempts: usize,
    max_attempts: usize,
}

impl Registration {
    pub fn new(max_attempts: usize) -> Self {
        Self {
            step: RegistrationStep::Start,
            attempts: 0,
            max_attempts,
        }
    }

    pub fn step(&self) -> RegistrationStep {
        self.step
    }

    pub fn attempts(&self) -> usize {
        self.attempts
    }

    /// Consumes one attempt. Returns `false` (and moves to `Failed`) once the
    /// budget is spent.
    pub fn begin_attempt(&mut self) -> bool {
        if self.attempts >= self.max_attempts {
            self.step = RegistrationStep::Failed;
            return false;
        }
        self.attempts += 1;
        true
    }

    pub fn observe_dropped_marker(&mut self, present: bool) {
        self.step = if present {
            RegistrationStep::AwaitingCleanup
        } else {
            RegistrationStep::Registering
        };
    }

    pub fn cleanup_finished(&mut self, completed: bool) {
        self.step = if completed {
            RegistrationStep::Registering
        } else {
            RegistrationStep::Start
        };
    }

    pub fn registered(&mut self) {
        self.step = RegistrationStep::Done;
    }

    pub fn retry(&mut self) {
        self.step = RegistrationStep::Start;
    }

    pub fn fail(&mut self) {
        self.step = RegistrationStep::Failed;
    }
}

/// Result of a teardown run while holding the drop lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownOutcome {
    Removed,
    Incomplete,
}

/// What a local drop did to the shared root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropOutcome {
    /// Other instances are still registered; only this one left.
    SharedByOthers,
    /// A peer is already tearing the root down.
    RemovedByPeer,
    /// This instance removed rows and metadata.
    Removed,
    /// Teardown started but metadata could not be removed. The next creator
    /// finishes it.
    Incomplete,
}

/// Makes sure the root node exists before registering under it.
pub async fn ensure_root(
    client: &dyn KeeperClient,
    root: &str,
    create_missing: bool,
) -> TableResult<()> {
    if root == "/" {
        return Ok(());
    }
    if client.exists(root).await?.is_some() {
        return Ok(());
    }
    if !create_missing {
        return Err(TableError::Configuration(format!(
            "Path '{}' doesn't exist. Please create it or set 'create_missing_root_path' to true",
            root
        )));
    }

    tracing::info!("Creating root path {}", root);
    create_ancestors(client, root).await?;
    create_if_not_exists(client, root).await?;
    Ok(())
}

/// Registers this instance under the root, reclaiming leftovers of a broken
/// teardown first.
pub async fn register(
    client: &dyn KeeperClient,
    layout: &PathLayout,
    max_attempts: usize,
) -> TableResult<()> {
    let mut registration = Registration::new(max_attempts);

    loop {
        match registration.step() {
            RegistrationStep::Start => {
                if !registration.begin_attempt() {
                    continue;
                }
                let dropped = client.exists(&layout.dropped).await?.is_some();
                registration.observe_dropped_marker(dropped);
            }

            RegistrationStep::AwaitingCleanup => {
                tracing::info!("Removing leftover nodes under {}", layout.root);
                match client
                    .create(&layout.dropped_lock, Vec::new(), CreateMode::Ephemeral)
                    .await
                {
                    Ok(_) => {
                        let outcome = remove_leftovers(client, layout).await?;
                        registration.cleanup_finished(outcome == TeardownOutcome::Removed);
                    }
                    Err(e) if e.code == Code::NoNode => {
                        tracing::info!("Someone else removed leftover nodes");
                        registration.cleanup_finished(true);
                    }
                    Err(e) if e.code == Code::NodeExists => {
                        // Not treated like NoNode: the holder is still tearing
                        // down, and a node registered now would be swept by its
                        // metadata removal. Wait and re-read the marker.
                        tracing::info!("Someone else is removing leftover nodes");
                        let jitter = rand::random::<u64>() % LOCK_CONTENTION_BACKOFF_MS;
                        tokio::time::sleep(Duration::from_millis(
                            LOCK_CONTENTION_BACKOFF_MS + jitter,
                        ))
                        .await;
                        registration.retry();
                    }
                    Err(e) => return Err(e.into()),
                }
            }

            RegistrationStep::Registering => match create_registration_nodes(client, layout).await
            {
                Ok(()) => registration.registered(),
                Err(e) if e.code == Code::NoNode => {
                    tracing::info!("Metadata nodes were deleted in background, will retry");
                    registration.retry();
                }
                Err(e) => return Err(e.into()),
            },

            RegistrationStep::Done => {
                tracing::info!(
                    "Registered {} after {} attempt(s)",
                    layout.table,
                    registration.attempts()
                );
                return Ok(());
            }

            RegistrationStep::Failed => {
                return Err(TableError::LifecycleExhausted {
                    root: layout.root.clone(),
                    attempts: registration.attempts(),
                });
            }
        }
    }
}

async fn create_registration_nodes(
    client: &dyn KeeperClient,
    layout: &PathLayout,
) -> Result<(), KeeperError> {
    create_if_not_exists(client, &layout.metadata).await?;
    create_if_not_exists(client, &layout.tables).await?;
    client
        .create(&layout.table, Vec::new(), CreateMode::Persistent)
        .await?;
    Ok(())
}

/// Removes every row and then the metadata subtree. The caller must hold the
/// drop lock; it is released here on every path except a completed removal,
/// where the multi deletes it.
pub async fn remove_leftovers(
    client: &dyn KeeperClient,
    layout: &PathLayout,
) -> TableResult<TeardownOutcome> {
    if let Err(e) = remove_children_recursive(client, &layout.root, Some(METADATA_NODE)).await {
        release_lock(client, layout).await;
        return Err(e.into());
    }

    let ops = vec![
        Op::remove(&layout.dropped_lock, None),
        Op::remove(&layout.dropped, None),
        Op::remove(&layout.metadata, None),
    ];

    match client.multi(ops).await {
        Ok(_) => {
            tracing::info!("Removed metadata of {}", layout.root);
            Ok(TeardownOutcome::Removed)
        }
        Err(e) if e.code == Code::NoNode => {
            release_lock(client, layout).await;
            Err(TableError::Logic(format!(
                "There is a race condition between creation and removal of metadata ({}). It's a bug",
                e.path
            )))
        }
        Err(e) if e.code == Code::NotEmpty => {
            tracing::error!(
                "Metadata of {} was not completely removed ({})",
                layout.root,
                e.path
            );
            release_lock(client, layout).await;
            Ok(TeardownOutcome::Incomplete)
        }
        Err(e) => {
            release_lock(client, layout).await;
            Err(e.into())
        }
    }
}

async fn release_lock(client: &dyn KeeperClient, layout: &PathLayout) {
    match client.remove(&layout.dropped_lock, None).await {
        Ok(()) => {}
        Err(e) if e.code == Code::NoNode => {}
        Err(e) => tracing::warn!("Failed to release drop lock: {}", e),
    }
}

/// Unregisters this instance. The last one out tears the root down.
pub async fn drop_registration(
    client: &dyn KeeperClient,
    layout: &PathLayout,
) -> TableResult<DropOutcome> {
    match client.remove(&layout.table, None).await {
        Ok(()) => {}
        Err(e) if e.code == Code::NoNode => {
            tracing::warn!("Table node {} was already removed", layout.table);
        }
        Err(e) => return Err(e.into()),
    }

    match client.children(&layout.tables).await {
        Ok(children) if !children.is_empty() => {
            tracing::info!(
                "{} other instance(s) still use {}, metadata is kept",
                children.len(),
                layout.root
            );
            return Ok(DropOutcome::SharedByOthers);
        }
        Ok(_) => {}
        Err(e) if e.code == Code::NoNode => return Ok(DropOutcome::RemovedByPeer),
        Err(e) => return Err(e.into()),
    }

    let ops = vec![
        Op::remove(&layout.tables, None),
        Op::create(&layout.dropped, Vec::new(), CreateMode::Persistent),
        Op::create(&layout.dropped_lock, Vec::new(), CreateMode::Ephemeral),
    ];

    match client.multi(ops).await {
        Ok(_) => {}
        Err(e) if matches!(e.code, Code::NoNode | Code::NodeExists) => {
            tracing::info!("Metadata of {} is being removed by another table", layout.root);
            return Ok(DropOutcome::RemovedByPeer);
        }
        Err(e) if e.code == Code::NotEmpty => {
            tracing::info!("Another table is using {}, metadata is kept", layout.root);
            return Ok(DropOutcome::SharedByOthers);
        }
        Err(e) => return Err(e.into()),
    }

    Ok(match remove_leftovers(client, layout).await? {
        TeardownOutcome::Removed => DropOutcome::Removed,
        TeardownOutcome::Incomplete => DropOutcome::Incomplete,
    })
}
