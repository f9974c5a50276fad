//! In-Process Coordination Tree
//!
//! `MemoryKeeper` is a linearizable node tree held behind a single lock.
//! It serves the same contract a remote ensemble would: persistent and
//! ephemeral nodes, per-node versions, sessions, and atomic multi-operations.
//!
//! ## Sessions
//! Every client holds a session. Ephemeral nodes are owned by the session
//! that created them and vanish when it closes or expires. Sessions opened on
//! behalf of remote clients are "tracked": they must heartbeat, and the reaper
//! loop expires the ones that go quiet.
//!
//! ## Fault injection
//! Tests and demos can force error codes on specific paths, simulate a lost
//! connection, expire a session, or slow every request down.

use super::client::{Connector, KeeperClient, validate_path};
use super::types::{Code, CreateMode, KeeperError, KeeperResult, MultiError, Op, OpResult, Stat};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

const REAPER_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
struct ZNode {
    data: Vec<u8>,
    czxid: i64,
    mzxid: i64,
    pzxid: i64,
    version: i32,
    cversion: i32,
    ephemeral_owner: Option<u64>,
    children: BTreeSet<String>,
}

impl ZNode {
    fn new(data: Vec<u8>, zxid: i64, ephemeral_owner: Option<u64>) -> Self {
        Self {
            data,
            czxid: zxid,
            mzxid: zxid,
            pzxid: zxid,
            version: 0,
            cversion: 0,
            ephemeral_owner,
            children: BTreeSet::new(),
        }
    }

    fn stat(&self) -> Stat {
        Stat {
            czxid: self.czxid,
            mzxid: self.mzxid,
            pzxid: self.pzxid,
            version: self.version,
            cversion: self.cversion,
            ephemeral_owner: self.ephemeral_owner,
            data_length: self.data.len(),
            num_children: self.children.len(),
        }
    }
}

/// Inverse of one applied mutation, used to roll back a failed multi.
enum Undo {
    Created {
        path: String,
        parent_cversion: i32,
        parent_pzxid: i64,
    },
    Removed {
        path: String,
        node: ZNode,
        parent_cversion: i32,
        parent_pzxid: i64,
    },
    Set {
        path: String,
        data: Vec<u8>,
        version: i32,
        mzxid: i64,
    },
}

struct Tree {
    nodes: HashMap<String, ZNode>,
    zxid: i64,
}

fn parent_and_name(path: &str) -> (&str, &str) {
    let idx = path.rfind('/').unwrap_or(0);
    let parent = if idx == 0 { "/" } else { &path[..idx] };
    (parent, &path[idx + 1..])
}

fn version_matches(expected: Option<i32>, actual: i32) -> bool {
    expected.is_none_or(|v| v == actual)
}

impl Tree {
    fn new() -> Self {
        let mut nodes = HashMap::new();
        nodes.insert("/".to_string(), ZNode::new(Vec::new(), 0, None));
        Self { nodes, zxid: 0 }
    }

    fn create(
        &mut self,
        path: &str,
        data: Vec<u8>,
        mode: CreateMode,
        session: u64,
    ) -> Result<Undo, Code> {
        validate_path(path).map_err(|e| e.code)?;
        if self.nodes.contains_key(path) {
            return Err(Code::NodeExists);
        }
        let (parent_path, name) = parent_and_name(path);
        let parent = self.nodes.get(parent_path).ok_or(Code::NoNode)?;
        if parent.ephemeral_owner.is_some() {
            return Err(Code::NoChildrenForEphemerals);
        }

        self.zxid += 1;
        let zxid = self.zxid;
        let parent = self.nodes.get_mut(parent_path).ok_or(Code::NoNode)?;
        let undo = Undo::Created {
            path: path.to_string(),
            parent_cversion: parent.cversion,
            parent_pzxid: parent.pzxid,
        };
        parent.children.insert(name.to_string());
        parent.cversion += 1;
        parent.pzxid = zxid;

        let owner = match mode {
            CreateMode::Persistent => None,
            CreateMode::Ephemeral => Some(session),
        };
        self.nodes
            .insert(path.to_string(), ZNode::new(data, zxid, owner));
        Ok(undo)
    }

    fn set(&mut self, path: &str, data: Vec<u8>, version: Option<i32>) -> Result<Undo, Code> {
        let node = self.nodes.get_mut(path).ok_or(Code::NoNode)?;
        if !version_matches(version, node.version) {
            return Err(Code::BadVersion);
        }
        self.zxid += 1;
        let undo = Undo::Set {
            path: path.to_string(),
            data: std::mem::replace(&mut node.data, data),
            version: node.version,
            mzxid: node.mzxid,
        };
        node.version += 1;
        node.mzxid = self.zxid;
        Ok(undo)
    }

    fn remove(&mut self, path: &str, version: Option<i32>) -> Result<Undo, Code> {
        if path == "/" {
            return Err(Code::BadArguments);
        }
        let node = self.nodes.get(path).ok_or(Code::NoNode)?;
        if !version_matches(version, node.version) {
            return Err(Code::BadVersion);
        }
        if !node.children.is_empty() {
            return Err(Code::NotEmpty);
        }

        self.zxid += 1;
        let zxid = self.zxid;
        let node = self.nodes.remove(path).ok_or(Code::NoNode)?;
        let (parent_path, name) = parent_and_name(path);
        let parent = self.nodes.get_mut(parent_path).ok_or(Code::NoNode)?;
        let undo = Undo::Removed {
            path: path.to_string(),
            node,
            parent_cversion: parent.cversion,
            parent_pzxid: parent.pzxid,
        };
        parent.children.remove(name);
        parent.cversion += 1;
        parent.pzxid = zxid;
        Ok(undo)
    }

    fn check(&self, path: &str, version: Option<i32>) -> Result<(), Code> {
        let node = self.nodes.get(path).ok_or(Code::NoNode)?;
        if !version_matches(version, node.version) {
            return Err(Code::BadVersion);
        }
        Ok(())
    }

    fn rollback(&mut self, undo_log: Vec<Undo>, zxid: i64) {
        for undo in undo_log.into_iter().rev() {
            match undo {
                Undo::Created {
                    path,
                    parent_cversion,
                    parent_pzxid,
                } => {
                    self.nodes.remove(&path);
                    let (parent_path, name) = parent_and_name(&path);
                    if let Some(parent) = self.nodes.get_mut(parent_path) {
                        parent.children.remove(name);
                        parent.cversion = parent_cversion;
                        parent.pzxid = parent_pzxid;
                    }
                }
                Undo::Removed {
                    path,
                    node,
                    parent_cversion,
                    parent_pzxid,
                } => {
                    let (parent_path, name) = parent_and_name(&path);
                    if let Some(parent) = self.nodes.get_mut(parent_path) {
                        parent.children.insert(name.to_string());
                        parent.cversion = parent_cversion;
                        parent.pzxid = parent_pzxid;
                    }
                    self.nodes.insert(path, node);
                }
                Undo::Set {
                    path,
                    data,
                    version,
                    mzxid,
                } => {
                    if let Some(node) = self.nodes.get_mut(&path) {
                        node.data = data;
                        node.version = version;
                        node.mzxid = mzxid;
                    }
                }
            }
        }
        self.zxid = zxid;
    }

    fn ephemerals_of(&self, session: u64) -> Vec<String> {
        let mut paths: Vec<String> = self
            .nodes
            .iter()
            .filter(|(_, node)| node.ephemeral_owner == Some(session))
            .map(|(path, _)| path.clone())
            .collect();
        // Deepest first so a parent never outlives the check on its children.
        paths.sort_by_key(|p| std::cmp::Reverse(p.len()));
        paths
    }
}

struct SessionInfo {
    last_seen: Instant,
    tracked: bool,
}

struct Fault {
    path: String,
    code: Code,
    remaining: usize,
}

struct Shared {
    tree: Mutex<Tree>,
    sessions: DashMap<u64, SessionInfo>,
    next_session: AtomicU64,
    faults: Mutex<Vec<Fault>>,
    connection_lost: AtomicBool,
    latency_ms: AtomicU64,
}

/// Shared handle to an in-process coordination tree. Cloning is cheap.
#[derive(Clone)]
pub struct MemoryKeeper {
    shared: Arc<Shared>,
}

impl Default for MemoryKeeper {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryKeeper {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                tree: Mutex::new(Tree::new()),
                sessions: DashMap::new(),
                next_session: AtomicU64::new(1),
                faults: Mutex::new(Vec::new()),
                connection_lost: AtomicBool::new(false),
                latency_ms: AtomicU64::new(0),
            }),
        }
    }

    // ============================================================
    // SESSIONS
    // ============================================================

    /// Opens an untracked session and wraps it in a client.
    pub fn session(&self) -> Arc<MemorySession> {
        let id = self.open_session(false);
        Arc::new(MemorySession {
            keeper: self.clone(),
            id,
        })
    }

    /// Opens a session. Tracked sessions must heartbeat to stay alive.
    pub fn open_session(&self, tracked: bool) -> u64 {
        let id = self.shared.next_session.fetch_add(1, Ordering::SeqCst);
        self.shared.sessions.insert(
            id,
            SessionInfo {
                last_seen: Instant::now(),
                tracked,
            },
        );
        tracing::debug!("Opened keeper session {}", id);
        id
    }

    pub fn session_alive(&self, session: u64) -> bool {
        self.shared.sessions.contains_key(&session)
    }

    pub fn heartbeat(&self, session: u64) -> Result<(), Code> {
        match self.shared.sessions.get_mut(&session) {
            Some(mut info) => {
                info.last_seen = Instant::now();
                Ok(())
            }
            None => Err(Code::SessionExpired),
        }
    }

    /// Ends a session and removes every ephemeral node it owns.
    pub fn close_session(&self, session: u64) {
        if self.shared.sessions.remove(&session).is_none() {
            return;
        }
        let mut tree = self.shared.tree.lock();
        for path in tree.ephemerals_of(session) {
            if let Err(code) = tree.remove(&path, None) {
                tracing::warn!("Failed to remove ephemeral node {}: {}", path, code);
            }
        }
        tracing::debug!("Closed keeper session {}", session);
    }

    /// Same effect as [`close_session`](Self::close_session); named for tests
    /// that simulate a crashed client.
    pub fn expire_session(&self, session: u64) {
        tracing::info!("Expiring keeper session {}", session);
        self.close_session(session);
    }

    /// Expires tracked sessions that have not heartbeated within `timeout`.
    pub fn reap_idle_sessions(&self, timeout: Duration) -> Vec<u64> {
        let idle: Vec<u64> = self
            .shared
            .sessions
            .iter()
            .filter(|entry| entry.value().tracked && entry.value().last_seen.elapsed() > timeout)
            .map(|entry| *entry.key())
            .collect();
        for session in &idle {
            tracing::warn!("Session {} timed out, expiring", session);
            self.close_session(*session);
        }
        idle
    }

    /// Spawns the background loop that expires idle tracked sessions.
    pub fn spawn_session_reaper(&self, timeout: Duration) -> tokio::task::JoinHandle<()> {
        let keeper = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(REAPER_INTERVAL);
            loop {
                interval.tick().await;
                keeper.reap_idle_sessions(timeout);
            }
        })
    }

    // ============================================================
    // FAULT INJECTION
    // ============================================================

    /// Fails the next `times` requests touching exactly `path` with `code`.
    pub fn inject_fault(&self, path: &str, code: Code, times: usize) {
        if times == 0 {
            return;
        }
        self.shared.faults.lock().push(Fault {
            path: path.to_string(),
            code,
            remaining: times,
        });
    }

    /// While set, every request fails with `ConnectionLoss`.
    pub fn set_connection_loss(&self, lost: bool) {
        self.shared.connection_lost.store(lost, Ordering::SeqCst);
    }

    /// Delays every request issued through a session client.
    pub fn set_latency(&self, latency: Duration) {
        self.shared
            .latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    fn latency(&self) -> Duration {
        Duration::from_millis(self.shared.latency_ms.load(Ordering::SeqCst))
    }

    fn take_fault(&self, path: &str) -> Option<Code> {
        let mut faults = self.shared.faults.lock();
        let idx = faults.iter().position(|f| f.path == path)?;
        let code = faults[idx].code;
        faults[idx].remaining -= 1;
        if faults[idx].remaining == 0 {
            faults.remove(idx);
        }
        Some(code)
    }

    fn gate(&self, session: u64, path: &str) -> KeeperResult<()> {
        if self.shared.connection_lost.load(Ordering::SeqCst) {
            return Err(KeeperError::new(Code::ConnectionLoss, path));
        }
        if !self.session_alive(session) {
            return Err(KeeperError::new(Code::SessionExpired, path));
        }
        if let Some(code) = self.take_fault(path) {
            return Err(KeeperError::new(code, path));
        }
        Ok(())
    }

    // ============================================================
    // REQUESTS
    // ============================================================

    pub fn exists(&self, session: u64, path: &str) -> KeeperResult<Option<Stat>> {
        self.gate(session, path)?;
        let tree = self.shared.tree.lock();
        Ok(tree.nodes.get(path).map(ZNode::stat))
    }

    pub fn get(&self, session: u64, path: &str) -> KeeperResult<(Vec<u8>, Stat)> {
        self.gate(session, path)?;
        let tree = self.shared.tree.lock();
        tree.nodes
            .get(path)
            .map(|node| (node.data.clone(), node.stat()))
            .ok_or_else(|| KeeperError::new(Code::NoNode, path))
    }

    pub fn create(
        &self,
        session: u64,
        path: &str,
        data: Vec<u8>,
        mode: CreateMode,
    ) -> KeeperResult<String> {
        self.gate(session, path)?;
        let mut tree = self.shared.tree.lock();
        tree.create(path, data, mode, session)
            .map(|_| path.to_string())
            .map_err(|code| KeeperError::new(code, path))
    }

    pub fn set(
        &self,
        session: u64,
        path: &str,
        data: Vec<u8>,
        version: Option<i32>,
    ) -> KeeperResult<Stat> {
        self.gate(session, path)?;
        let mut tree = self.shared.tree.lock();
        tree.set(path, data, version)
            .map_err(|code| KeeperError::new(code, path))?;
        tree.nodes
            .get(path)
            .map(ZNode::stat)
            .ok_or_else(|| KeeperError::new(Code::NoNode, path))
    }

    pub fn remove(&self, session: u64, path: &str, version: Option<i32>) -> KeeperResult<()> {
        self.gate(session, path)?;
        let mut tree = self.shared.tree.lock();
        tree.remove(path, version)
            .map(|_| ())
            .map_err(|code| KeeperError::new(code, path))
    }

    pub fn children(&self, session: u64, path: &str) -> KeeperResult<Vec<String>> {
        self.gate(session, path)?;
        let tree = self.shared.tree.lock();
        tree.nodes
            .get(path)
            .map(|node| node.children.iter().cloned().collect())
            .ok_or_else(|| KeeperError::new(Code::NoNode, path))
    }

    pub fn sync(&self, session: u64, path: &str) -> KeeperResult<()> {
        // The tree is linearizable under its lock; every session already
        // observes all committed writes.
        self.gate(session, path)
    }

    /// Applies `ops` atomically. On the first failure every applied op is
    /// rolled back and the failing index is reported.
    pub fn multi(&self, session: u64, ops: Vec<Op>) -> Result<Vec<OpResult>, MultiError> {
        for (index, op) in ops.iter().enumerate() {
            self.gate(session, op.path())
                .map_err(|e| MultiError::new(e.code, index, e.path))?;
        }

        let mut tree = self.shared.tree.lock();
        let start_zxid = tree.zxid;
        let mut undo_log = Vec::with_capacity(ops.len());
        let mut results = Vec::with_capacity(ops.len());

        for (index, op) in ops.into_iter().enumerate() {
            let path = op.path().to_string();
            let outcome = match op {
                Op::Create { path, data, mode } => tree
                    .create(&path, data, mode, session)
                    .map(|undo| (Some(undo), OpResult::Created { path })),
                Op::Set {
                    path,
                    data,
                    version,
                } => tree.set(&path, data, version).and_then(|undo| {
                    let stat = tree.nodes.get(&path).map(ZNode::stat).ok_or(Code::NoNode)?;
                    Ok((Some(undo), OpResult::Set(stat)))
                }),
                Op::Remove { path, version } => tree
                    .remove(&path, version)
                    .map(|undo| (Some(undo), OpResult::Removed)),
                Op::Check { path, version } => tree
                    .check(&path, version)
                    .map(|_| (None, OpResult::Checked)),
            };

            match outcome {
                Ok((undo, result)) => {
                    undo_log.extend(undo);
                    results.push(result);
                }
                Err(code) => {
                    tree.rollback(undo_log, start_zxid);
                    return Err(MultiError::new(code, index, path));
                }
            }
        }
        Ok(results)
    }

    /// Full paths of every node in the tree, sorted. Intended for tests and
    /// debugging output.
    pub fn dump_paths(&self) -> Vec<String> {
        let tree = self.shared.tree.lock();
        let mut paths: Vec<String> = tree.nodes.keys().cloned().collect();
        paths.sort();
        paths
    }

    /// Number of children under `path`, or `None` if the node is absent.
    pub fn child_count(&self, path: &str) -> Option<usize> {
        let tree = self.shared.tree.lock();
        tree.nodes.get(path).map(|node| node.children.len())
    }

    pub fn node_exists(&self, path: &str) -> bool {
        self.shared.tree.lock().nodes.contains_key(path)
    }
}

#[async_trait]
impl Connector for MemoryKeeper {
    async fn connect(&self) -> KeeperResult<Arc<dyn KeeperClient>> {
        if self.shared.connection_lost.load(Ordering::SeqCst) {
            return Err(KeeperError::new(Code::ConnectionLoss, "/"));
        }
        Ok(self.session())
    }
}

/// A client bound to one session of a [`MemoryKeeper`]. Dropping the last
/// handle closes the session.
pub struct MemorySession {
    keeper: MemoryKeeper,
    id: u64,
}

impl MemorySession {
    async fn pause(&self) {
        let latency = self.keeper.latency();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        self.keeper.close_session(self.id);
    }
}

#[async_trait]
impl KeeperClient for MemorySession {
    fn session_id(&self) -> u64 {
        self.id
    }

    fn expired(&self) -> bool {
        !self.keeper.session_alive(self.id)
    }

    async fn exists(&self, path: &str) -> KeeperResult<Option<Stat>> {
        self.pause().await;
        self.keeper.exists(self.id, path)
    }

    async fn get(&self, path: &str) -> KeeperResult<(Vec<u8>, Stat)> {
        self.pause().await;
        self.keeper.get(self.id, path)
    }

    async fn create(&self, path: &str, data: Vec<u8>, mode: CreateMode) -> KeeperResult<String> {
        self.pause().await;
        self.keeper.create(self.id, path, data, mode)
    }

    async fn set(&self, path: &str, data: Vec<u8>, version: Option<i32>) -> KeeperResult<Stat> {
        self.pause().await;
        self.keeper.set(self.id, path, data, version)
    }

    async fn remove(&self, path: &str, version: Option<i32>) -> KeeperResult<()> {
        self.pause().await;
        self.keeper.remove(self.id, path, version)
    }

    async fn children(&self, path: &str) -> KeeperResult<Vec<String>> {
        self.pause().await;
        self.keeper.children(self.id, path)
    }

    async fn multi(&self, ops: Vec<Op>) -> Result<Vec<OpResult>, MultiError> {
        self.pause().await;
        self.keeper.multi(self.id, ops)
    }

    async fn sync(&self, path: &str) -> KeeperResult<()> {
        self.pause().await;
        self.keeper.sync(self.id, path)
    }
}
