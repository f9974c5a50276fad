//! Coordination Service Module
//!
//! The shared hierarchical store that table rows and registrations live in.
//! The engine only consumes the [`KeeperClient`](client::KeeperClient) trait;
//! the rest of this module provides concrete services behind it.
//!
//! ## Core Concepts
//! - **Nodes**: Named, versioned entries in a tree, addressed by absolute paths.
//! - **Sessions**: Every client owns a session; ephemeral nodes die with it.
//! - **Multi**: An all-or-nothing batch of create/set/remove/check operations.
//! - **Transport**: `MemoryKeeper` serves in-process clients directly and
//!   remote clients over HTTP (`handlers` + `remote`).

pub mod client;
pub mod handlers;
pub mod memory;
pub mod protocol;
pub mod remote;
pub mod types;

#[cfg(test)]
mod tests;
