//! SocksGate - SOCKS5 proxy toggle with a domain whitelist.
//!
//! This crate provides the pieces behind the `socksgate` binary:
//!
//! - [`daemon`]: wires the store, the host backend, the proxy service and
//!   the HTTP API together
//! - [`client`]: talks to a running daemon over HTTP
//! - [`transfer`]: export and import of the persisted settings
//!
//! # Usage
//!
//! ```ignore
//! use socksgate_app::client::ApiClient;
//!
//! let client = ApiClient::new("http://127.0.0.1:48766")?;
//! let status = client.toggle(true).await?;
//! println!("proxy is {}", status.mode);
//! ```

pub mod client;
pub mod daemon;
pub mod transfer;

pub use client::{ApiClient, ClientError};
pub use daemon::DaemonConfig;
pub use transfer::{TransferError, EXPORT_VERSION};
