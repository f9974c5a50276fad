//! KeeperMap Table Module
//!
//! A key-value table whose rows are nodes under a shared keeper root. Several
//! table instances, possibly on different servers, can point at the same root
//! and see the same rows.
//!
//! ## Core Concepts
//! - **Layout**: `layout` maps a root path to the row and metadata nodes.
//! - **Lifecycle**: `lifecycle` registers instances and tears the root down
//!   when the last one drops, recovering from half-finished teardowns.
//! - **Validity**: every data call first checks that this instance's
//!   registration node still exists (`validity`).
//! - **Batches**: `reader` and `writer` issue point calls concurrently under
//!   one deadline and commit writes as a single multi.

pub mod codec;
pub mod connection;
pub mod engine;
pub mod error;
pub mod keeper_map;
pub mod key;
pub mod layout;
pub mod lifecycle;
pub mod reader;
pub mod settings;
pub mod validity;
pub mod writer;

pub use codec::{BincodeCodec, RowCodec};
pub use engine::KeeperMapEngine;
pub use error::{ErrorClass, TableError, TableResult};
pub use keeper_map::{KeeperMap, ReadRequest};
pub use lifecycle::DropOutcome;
pub use settings::{EngineSettings, TableSettings};
