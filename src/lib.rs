//! KeeperMap Library
//!
//! A key-value table engine that stores its rows as nodes of a ZooKeeper-like
//! coordination tree, so that independent processes can share one table.
//!
//! ## Architecture Modules
//! - **`coordination`**: The node tree itself. Defines the client capability the
//!   engine consumes, an in-process tree with sessions and fault injection, and
//!   an HTTP transport so several processes can share one tree.
//! - **`table`**: The table engine. Path layout, race-safe registration and
//!   teardown of shared roots, batched reads and writes, and the key limit.

pub mod coordination;
pub mod table;
