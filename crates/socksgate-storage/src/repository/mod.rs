//! Database repositories for each table.

pub mod config;

pub use config::ConfigRepo;
