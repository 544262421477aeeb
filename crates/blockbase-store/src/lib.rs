//! Hierarchical block storage engine.
//!
//! Stores nested content blocks with a full audit history, answers
//! bounded-depth subtree queries, and runs one-time, cluster-safe data
//! migrations at open.
//!
//! # Tables
//!
//! ```text
//! blocks            current state, one row per live block
//! blocks_history    append-only snapshots keyed by (id, insert_at)
//! boards            block containers owned by a team
//! categories        per-user sidebar groups
//! category_boards   board membership of a category
//! system_settings   schema version and migration flags
//! cluster_locks     migration leases
//! ```
//!
//! # Key Types
//!
//! |-----------------------|------------------------------------------------|
//! | Type                  | Purpose                                        |
//! |-----------------------|------------------------------------------------|
//! | [`SqlStore`]          | The store; all operations are methods on it    |
//! | [`StoreConfig`]       | Driver, connection string, prefix, plugin mode |
//! | [`Dialect`]           | SQL rendering strategy (SQLite/Postgres/MySQL) |
//! | [`ClusterMutex`]      | Named cluster lock guarding migrations         |
//! | [`TeamDirectory`]     | Host channel/team membership lookups           |
//! | [`MigrationOutcome`]  | Result of one data migration                   |
//! |-----------------------|------------------------------------------------|
//!
//! # Example
//!
//! ```no_run
//! use blockbase_store::{SqlStore, StoreConfig};
//! use blockbase_types::Block;
//!
//! let store = SqlStore::open(StoreConfig::sqlite("/tmp/blocks.db"))?;
//! let card = Block::new("", "board1", "board1").with_type("card");
//! let stored = store.insert_block(&card, "user1")?;
//! assert!(store.get_block(&stored.id)?.is_some());
//! # Ok::<(), blockbase_store::StoreError>(())
//! ```

pub mod blocks;
pub mod boards;
pub mod categories;
pub mod clock;
pub mod config;
pub mod dialect;
pub mod directory;
pub mod error;
pub mod history;
pub mod insights;
pub mod migrations;
pub mod mutex;
pub mod schema;
pub mod settings;
pub mod store;
pub mod subtree;

pub use blocks::{BlockOrder, QueryBlocksOptions};
pub use categories::{Category, CategoryBoard, CategoryBoards};
pub use config::StoreConfig;
pub use dialect::{DbType, Dialect, Mysql, Postgres, SqlBuilder, Sqlite};
pub use directory::{Channel, ChannelKind, DirectoryError, MemoryDirectory, Membership, TeamDirectory};
pub use error::{StoreError, StoreResult};
pub use history::{HistoryQuery, TreeModifiedInfo};
pub use insights::{ActivityQuery, BoardActivity};
pub use migrations::{MigrationOutcome, MigrationReport};
pub use mutex::{ClusterMutex, DbLeaseMutex, LeaseOptions, LockGuard};
pub use store::{SqlStore, StoreBuilder};
