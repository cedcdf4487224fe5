//! SocksGate Storage - SQLite persistence layer.
//!
//! Persists the proxy configuration as a small key-value table:
//!
//! - `proxyEnabled`: whether the user asked for the proxy to be on
//! - `proxyConfig`: the upstream SOCKS5 target
//! - `whitelistDomains`: patterns that bypass the proxy
//!
//! [`ConfigStore`] is the async entry point used by the rest of SocksGate.
//!
//! # Example
//!
//! ```no_run
//! use socksgate_core::StateUpdate;
//! use socksgate_storage::ConfigStore;
//!
//! # async fn demo() -> socksgate_storage::Result<()> {
//! let store = ConfigStore::in_memory()?;
//! let state = store.update(StateUpdate::enabled(true)).await?;
//! assert!(state.enabled);
//! # Ok(())
//! # }
//! ```

mod database;
pub mod error;
pub mod models;
mod pool;
pub mod repository;
mod schema;
pub mod store;

pub use database::{project_dirs, Database, KEY_ENABLED, KEY_TARGET, KEY_WHITELIST};
pub use error::{Result, StorageError};
pub use models::ConfigEntry;
pub use pool::ConnectionPool;
pub use store::ConfigStore;
