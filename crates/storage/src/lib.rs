//! Storage backends for catalog documents.
//!
//! The catalog only ever needs whole-file semantics: read a document, replace
//! a document. Every backend guarantees that [`write`](StorageBackend::write)
//! is an atomic whole-file replace, so a reader never observes a half-written
//! catalog no matter when the process dies.

pub mod backend;
pub mod error;
mod models;
mod path;

pub use crate::backend::StorageBackend;
pub use crate::models::FileInfo;
pub use crate::path::validate as validate_path;
use std::sync::Arc;

pub type BackendHandle = Arc<dyn StorageBackend + Send + Sync>;
