//! Client Capability
//!
//! The narrow surface the table engine consumes from a coordination service.
//! Every call returns a typed result; callers inspect the [`Code`] of a failure
//! instead of relying on unwinding.
//!
//! The free functions at the bottom are compositions of the primitive calls
//! (create-if-absent, ancestor creation, recursive removal) that several
//! callers share.

use super::types::{Code, CreateMode, KeeperError, KeeperResult, MultiError, Op, OpResult, Stat};

use async_trait::async_trait;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use std::sync::Arc;

/// A session-bound handle to a coordination service.
#[async_trait]
pub trait KeeperClient: Send + Sync {
    /// Identifier of the session backing this client.
    fn session_id(&self) -> u64;

    /// `true` once the session is gone. An expired client is never reused.
    fn expired(&self) -> bool;

    async fn exists(&self, path: &str) -> KeeperResult<Option<Stat>>;

    /// Fails with `NoNode` when the node is absent.
    async fn get(&self, path: &str) -> KeeperResult<(Vec<u8>, Stat)>;

    /// Returns the path of the created node.
    async fn create(&self, path: &str, data: Vec<u8>, mode: CreateMode) -> KeeperResult<String>;

    async fn set(&self, path: &str, data: Vec<u8>, version: Option<i32>) -> KeeperResult<Stat>;

    async fn remove(&self, path: &str, version: Option<i32>) -> KeeperResult<()>;

    /// Child names (not full paths), sorted.
    async fn children(&self, path: &str) -> KeeperResult<Vec<String>>;

    /// Applies every op or none of them.
    async fn multi(&self, ops: Vec<Op>) -> Result<Vec<OpResult>, MultiError>;

    /// Waits until this session observes every write committed before the call.
    async fn sync(&self, path: &str) -> KeeperResult<()>;
}

/// Opens fresh sessions. Used to replace a client whose session expired.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> KeeperResult<Arc<dyn KeeperClient>>;
}

/// Creates a persistent empty node, treating an existing node as success.
pub async fn create_if_not_exists(client: &dyn KeeperClient, path: &str) -> KeeperResult<()> {
    match client.create(path, Vec::new(), CreateMode::Persistent).await {
        Ok(_) => Ok(()),
        Err(e) if e.code == Code::NodeExists => Ok(()),
        Err(e) => Err(e),
    }
}

/// Creates every missing ancestor of `path`, not the node itself.
pub async fn create_ancestors(client: &dyn KeeperClient, path: &str) -> KeeperResult<()> {
    let mut end = 0;
    while let Some(offset) = path[end + 1..].find('/') {
        end += offset + 1;
        create_if_not_exists(client, &path[..end]).await?;
    }
    Ok(())
}

/// Removes `path` and its whole subtree. Nodes disappearing concurrently are
/// not an error.
pub fn remove_recursive<'a>(
    client: &'a dyn KeeperClient,
    path: &'a str,
) -> BoxFuture<'a, KeeperResult<()>> {
    async move {
        remove_children_recursive(client, path, None).await?;
        match client.remove(path, None).await {
            Ok(()) => Ok(()),
            Err(e) if e.code == Code::NoNode => Ok(()),
            Err(e) => Err(e),
        }
    }
    .boxed()
}

/// Removes every child subtree of `path` except the child named `keep`.
pub async fn remove_children_recursive(
    client: &dyn KeeperClient,
    path: &str,
    keep: Option<&str>,
) -> KeeperResult<()> {
    let children = match client.children(path).await {
        Ok(children) => children,
        Err(e) if e.code == Code::NoNode => return Ok(()),
        Err(e) => return Err(e),
    };

    for child in children {
        if keep == Some(child.as_str()) {
            continue;
        }
        let child_path = join_path(path, &child);
        remove_recursive(client, &child_path).await?;
    }
    Ok(())
}

/// Joins a parent path and a single child name.
pub fn join_path(parent: &str, child: &str) -> String {
    if parent == "/" {
        format!("/{child}")
    } else {
        format!("{parent}/{child}")
    }
}

/// Validates an absolute node path: leading `/`, no empty segments, no
/// trailing `/` except for the root itself.
pub fn validate_path(path: &str) -> KeeperResult<()> {
    if path == "/" {
        return Ok(());
    }
    if !path.starts_with('/') || path.ends_with('/') || path.contains("//") {
        return Err(KeeperError::new(Code::BadArguments, path));
    }
    Ok(())
}
