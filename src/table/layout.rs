//! Node layout of a table inside the keeper tree.
//!
//! ```text
//! {prefix}{root}/{base64(key)}          one node per row
//! {prefix}{root}/ch_metadata            exists while the root is alive
//!                 ├── tables/{instance} one child per registered instance
//!                 └── dropped           teardown in progress
//!                      └── lock         ephemeral, held by the cleaner
//! ```

use super::error::{TableError, TableResult};
use crate::coordination::client::join_path;

/// Name of the metadata child under the root. Never a row.
pub const METADATA_NODE: &str = "ch_metadata";
pub const TABLES_NODE: &str = "tables";
pub const DROPPED_NODE: &str = "dropped";
pub const DROPPED_LOCK_NODE: &str = "lock";
/// Keeper used when a root path carries no `name:` prefix.
pub const DEFAULT_KEEPER: &str = "default";

/// A user-supplied root path split into keeper name and absolute path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootPath {
    pub keeper: String,
    pub path: String,
}

impl RootPath {
    pub fn parse(raw: &str) -> TableResult<Self> {
        let (keeper, path) = if raw.is_empty() || raw.starts_with('/') {
            (DEFAULT_KEEPER, raw)
        } else {
            match raw.split_once(':') {
                Some((name, rest)) if !name.is_empty() => (name, rest),
                _ => (DEFAULT_KEEPER, raw),
            }
        };

        if path.is_empty() {
            return Err(TableError::Configuration(
                "root_path should not be empty".to_string(),
            ));
        }
        if !path.starts_with('/') {
            return Err(TableError::Configuration(
                "root_path should start with '/'".to_string(),
            ));
        }
        if path.contains("//") {
            return Err(TableError::Configuration(format!(
                "root_path '{}' contains an empty segment",
                path
            )));
        }

        let trimmed = path.trim_end_matches('/');
        Ok(Self {
            keeper: keeper.to_string(),
            path: if trimmed.is_empty() {
                "/".to_string()
            } else {
                trimmed.to_string()
            },
        })
    }
}

/// Every node path a table instance touches. Pure; computing it performs no
/// keeper calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathLayout {
    pub root: String,
    pub metadata: String,
    pub tables: String,
    pub table: String,
    pub dropped: String,
    pub dropped_lock: String,
}

impl PathLayout {
    pub fn new(prefix: &str, root: &RootPath, instance_id: &str) -> TableResult<Self> {
        if !prefix.starts_with('/') || prefix.contains("//") {
            return Err(TableError::Configuration(format!(
                "path_prefix '{}' should be an absolute keeper path",
                prefix
            )));
        }
        if instance_id.is_empty() || instance_id.contains('/') {
            return Err(TableError::Configuration(format!(
                "invalid table instance id '{}'",
                instance_id
            )));
        }

        let prefix = prefix.trim_end_matches('/');
        let root = match (prefix.is_empty(), root.path.as_str()) {
            (true, path) => path.to_string(),
            (false, "/") => prefix.to_string(),
            (false, path) => format!("{}{}", prefix, path),
        };

        let metadata = join_path(&root, METADATA_NODE);
        let tables = join_path(&metadata, TABLES_NODE);
        let table = join_path(&tables, instance_id);
        let dropped = join_path(&metadata, DROPPED_NODE);
        let dropped_lock = join_path(&dropped, DROPPED_LOCK_NODE);

        Ok(Self {
            root,
            metadata,
            tables,
            table,
            dropped,
            dropped_lock,
        })
    }

    /// Node path for an already-encoded key.
    pub fn row_path(&self, encoded_key: &str) -> String {
        join_path(&self.root, encoded_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_paths() {
        let root = RootPath::parse("/t1").unwrap();
        let layout = PathLayout::new("/keeper_map_tables", &root, "abc").unwrap();

        assert_eq!(layout.root, "/keeper_map_tables/t1");
        assert_eq!(layout.metadata, "/keeper_map_tables/t1/ch_metadata");
        assert_eq!(layout.tables, "/keeper_map_tables/t1/ch_metadata/tables");
        assert_eq!(layout.table, "/keeper_map_tables/t1/ch_metadata/tables/abc");
        assert_eq!(layout.dropped, "/keeper_map_tables/t1/ch_metadata/dropped");
        assert_eq!(
            layout.dropped_lock,
            "/keeper_map_tables/t1/ch_metadata/dropped/lock"
        );
        assert_eq!(layout.row_path("QQ"), "/keeper_map_tables/t1/QQ");
    }

    #[test]
    fn test_layout_is_deterministic() {
        let root = RootPath::parse("/a/b/").unwrap();
        let first = PathLayout::new("/prefix/", &root, "id").unwrap();
        let second = PathLayout::new("/prefix", &root, "id").unwrap();
        assert_eq!(first, second);
        assert_eq!(first.root, "/prefix/a/b");
    }

    #[test]
    fn test_slash_root_maps_to_prefix() {
        let root = RootPath::parse("/").unwrap();
        let layout = PathLayout::new("/keeper_map_tables", &root, "id").unwrap();
        assert_eq!(layout.root, "/keeper_map_tables");

        let bare = PathLayout::new("/", &root, "id").unwrap();
        assert_eq!(bare.root, "/");
        assert_eq!(bare.metadata, "/ch_metadata");
    }

    #[test]
    fn test_root_path_validation() {
        assert!(RootPath::parse("").is_err());
        assert!(RootPath::parse("relative/path").is_err());
        assert!(RootPath::parse("/a//b").is_err());
    }

    #[test]
    fn test_root_path_keeper_name() {
        let root = RootPath::parse("aux:/t1").unwrap();
        assert_eq!(root.keeper, "aux");
        assert_eq!(root.path, "/t1");

        let default = RootPath::parse("/t1").unwrap();
        assert_eq!(default.keeper, DEFAULT_KEEPER);
    }

    #[test]
    fn test_invalid_prefix_and_instance_id() {
        let root = RootPath::parse("/t1").unwrap();
        assert!(PathLayout::new("relative", &root, "id").is_err());
        assert!(PathLayout::new("/p", &root, "").is_err());
        assert!(PathLayout::new("/p", &root, "a/b").is_err());
    }
}
