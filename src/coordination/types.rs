use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result codes returned by the coordination service.
///
/// Every call against a keeper resolves either to a value or to one of these
/// codes. Callers branch on the code explicitly: some codes describe a benign
/// race with a peer (`NodeExists`, `NoNode`), others a broken connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Code {
    /// The node (or one of its ancestors) does not exist.
    NoNode,
    /// The node already exists.
    NodeExists,
    /// The node has children and cannot be removed.
    NotEmpty,
    /// The expected version did not match the node's version.
    BadVersion,
    /// Ephemeral nodes cannot have children.
    NoChildrenForEphemerals,
    /// The request was malformed (for example, an invalid path).
    BadArguments,
    /// The client lost its connection to the service.
    ConnectionLoss,
    /// The session owning this client has expired.
    SessionExpired,
    /// The session was moved to another server.
    SessionMoved,
    /// The service did not answer in time.
    OperationTimeout,
    /// A request or response could not be (de)serialized.
    MarshallingError,
    /// Internal API error inside the client.
    ApiError,
}

impl Code {
    /// Connectivity and session failures. A request failing with one of these
    /// says nothing about the state of the tree.
    pub fn is_hardware_error(self) -> bool {
        matches!(
            self,
            Code::ConnectionLoss
                | Code::SessionExpired
                | Code::SessionMoved
                | Code::OperationTimeout
                | Code::MarshallingError
                | Code::ApiError
        )
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Code::NoNode => "no node",
            Code::NodeExists => "node exists",
            Code::NotEmpty => "not empty",
            Code::BadVersion => "bad version",
            Code::NoChildrenForEphemerals => "no children for ephemerals",
            Code::BadArguments => "bad arguments",
            Code::ConnectionLoss => "connection loss",
            Code::SessionExpired => "session expired",
            Code::SessionMoved => "session moved",
            Code::OperationTimeout => "operation timeout",
            Code::MarshallingError => "marshalling error",
            Code::ApiError => "api error",
        };
        f.write_str(name)
    }
}

/// A failed single-node request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("keeper error ({code}), path: {path}")]
pub struct KeeperError {
    pub code: Code,
    pub path: String,
}

impl KeeperError {
    pub fn new(code: Code, path: impl Into<String>) -> Self {
        Self {
            code,
            path: path.into(),
        }
    }
}

/// A failed multi-operation. Nothing from the batch was applied.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("keeper multi failed ({code}) at op #{index}, path: {path}")]
pub struct MultiError {
    pub code: Code,
    /// Position of the first failing operation in the submitted batch.
    pub index: usize,
    pub path: String,
}

impl MultiError {
    pub fn new(code: Code, index: usize, path: impl Into<String>) -> Self {
        Self {
            code,
            index,
            path: path.into(),
        }
    }
}

impl From<MultiError> for KeeperError {
    fn from(err: MultiError) -> Self {
        KeeperError::new(err.code, err.path)
    }
}

pub type KeeperResult<T> = Result<T, KeeperError>;

/// Node metadata as reported by the service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stat {
    pub czxid: i64,
    pub mzxid: i64,
    pub pzxid: i64,
    pub version: i32,
    pub cversion: i32,
    /// Session owning the node if it is ephemeral.
    pub ephemeral_owner: Option<u64>,
    pub data_length: usize,
    pub num_children: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CreateMode {
    Persistent,
    /// Removed automatically when the creating session ends.
    Ephemeral,
}

/// One step of an atomic multi-operation.
///
/// A `version` of `None` matches any node version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Op {
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
    Check {
        path: String,
        version: Option<i32>,
    },
}

impl Op {
    pub fn create(path: impl Into<String>, data: Vec<u8>, mode: CreateMode) -> Self {
        Op::Create {
            path: path.into(),
            data,
            mode,
        }
    }

    pub fn set(path: impl Into<String>, data: Vec<u8>, version: Option<i32>) -> Self {
        Op::Set {
            path: path.into(),
            data,
            version,
        }
    }

    pub fn remove(path: impl Into<String>, version: Option<i32>) -> Self {
        Op::Remove {
            path: path.into(),
            version,
        }
    }

    pub fn check(path: impl Into<String>, version: Option<i32>) -> Self {
        Op::Check {
            path: path.into(),
            version,
        }
    }

    pub fn path(&self) -> &str {
        match self {
            Op::Create { path, .. }
            | Op::Set { path, .. }
            | Op::Remove { path, .. }
            | Op::Check { path, .. } => path,
        }
    }
}

/// Per-operation outcome of a successful multi.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpResult {
    Created { path: String },
    Set(Stat),
    Removed,
    Checked,
}
