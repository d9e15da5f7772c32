//! # Access Control
//!
//! User table, authorization decisions, and the JSON/YAML load+save format
//! that backs the `ACL` command family. Glob pattern matching for key and
//! channel patterns lives in `kv_common::glob`; this crate only owns the
//! user records and the authorize decision.

pub mod error;
pub mod store;
pub mod user;

pub use error::AclError;
pub use store::{AclStore, LoadMode};
pub use user::{AccessMode, Category, CommandDescriptor, Password, PasswordKind, User};
