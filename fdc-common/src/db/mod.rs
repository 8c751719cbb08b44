//! Database connection helpers
//!
//! Each binary owns its schema; this module only opens pools.

pub mod init;

pub use init::{open_database, open_memory_database};
