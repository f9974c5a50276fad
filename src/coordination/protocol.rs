//! Keeper Network Protocol
//!
//! Defines the API endpoints and Data Transfer Objects (DTOs) used by remote
//! table instances to talk to a served [`MemoryKeeper`](super::memory::MemoryKeeper).
//!
//! These structures are serialized as JSON and sent over HTTP. Keeper-level
//! failures (for example `NodeExists`) travel inside a `200 OK` body as
//! [`KeeperResponse::Error`]; HTTP status codes are reserved for transport
//! problems.

use super::types::{Code, CreateMode, Op, OpResult, Stat};
use serde::{Deserialize, Serialize};

// --- API Endpoints ---

/// Opens a new tracked session.
pub const ENDPOINT_SESSION: &str = "/session";
/// Keeps a session alive. Suffix of `/session/{id}`.
pub const ENDPOINT_HEARTBEAT: &str = "/heartbeat";
/// Executes one keeper request inside a session.
pub const ENDPOINT_REQUEST: &str = "/keeper/request";

// --- Data Transfer Objects ---

/// Returned when a session is opened.
#[derive(Debug, Serialize, Deserialize)]
pub struct SessionResponse {
    pub session_id: u64,
    /// How often the client must heartbeat to keep the session.
    pub heartbeat_interval_ms: u64,
    pub session_timeout_ms: u64,
}

/// Acknowledgment for heartbeat and close requests.
#[derive(Debug, Serialize, Deserialize)]
pub struct SessionAck {
    pub alive: bool,
}

/// A single keeper call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum KeeperRequest {
    Exists {
        path: String,
    },
    Get {
        path: String,
    },
    Create {
        path: String,
        data: Vec<u8>,
        mode: CreateMode,
    },
    Set {
        path: String,
        data: Vec<u8>,
        version: Option<i32>,
    },
    Remove {
        path: String,
        version: Option<i32>,
    },
    Children {
        path: String,
    },
    Multi {
        ops: Vec<Op>,
    },
    Sync {
        path: String,
    },
}

/// Wraps a request with the session it runs in.
#[derive(Debug, Serialize, Deserialize)]
pub struct KeeperRequestEnvelope {
    pub session_id: u64,
    pub request: KeeperRequest,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum KeeperResponse {
    Exists(Option<Stat>),
    Data { data: Vec<u8>, stat: Stat },
    Created { path: String },
    Set(Stat),
    Removed,
    Children(Vec<String>),
    Multi(Vec<OpResult>),
    Synced,
    Error {
        code: Code,
        path: String,
        /// Failing op index for multi requests.
        index: Option<usize>,
    },
}
