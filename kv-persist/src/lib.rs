//! # Persistence
//!
//! AOF writer/replayer with preamble, the snapshot engine, and the JSON
//! value codec shared by both durability artifacts.

pub mod aof;
pub mod codec;
pub mod error;
pub mod snapshot;

pub use aof::{AofPaths, AofWriter, DurabilityMode};
pub use error::{PersistError, PersistResult};
pub use snapshot::SnapshotScheduler;
