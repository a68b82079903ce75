// hive_directory resolves partition keys, resource ids and secondary index keys to storage nodes,
// and enforces read-only policy at hive, node and key level.

mod assigner;
mod batch;
mod cache;
mod cached_facade;
mod config;
mod directory;
mod error;
mod facade;
mod key;
mod meta;
mod schema;
mod semaphore;
mod sql_directory;

pub use assigner::*;
pub use batch::*;
pub use cache::*;
pub use cached_facade::*;
pub use config::*;
pub use directory::*;
pub use error::*;
pub use facade::*;
pub use key::*;
pub use meta::*;
pub use schema::{install_dimension_schema, validate_identifier};
pub use semaphore::*;
pub use sql_directory::SqlDirectory;

#[cfg(test)]
mod sql_directory_tests;
