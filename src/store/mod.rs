/// JWT Storage System
///
/// Persists exactly one token per subject. Backends implement [`JwtStore`];
/// the resolver only ever talks to the trait.

pub mod disk;
pub mod memory;
pub mod nsc;
mod watcher;

pub use disk::{DirectoryStore, DirectoryStoreOptions};
pub use memory::MemoryStore;
pub use nsc::NscStore;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::{path::PathBuf, sync::Arc};
use thiserror::Error;

/// Store-level failures
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no JWT stored for {0:?}")]
    NotFound(String),

    #[error("store is read-only")]
    ReadOnly,

    #[error("invalid subject {0:?}")]
    InvalidSubject(String),

    #[error("invalid store root {path:?}: {reason}")]
    InvalidRoot { path: PathBuf, reason: String },

    #[error("unreadable token at {path:?}: {reason}")]
    Unreadable { path: PathBuf, reason: String },

    #[error("storage fault: {0}")]
    Io(#[from] std::io::Error),

    #[error("file watcher error: {0}")]
    Watch(#[from] notify::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Invoked with the subject whose token changed on disk
pub type ChangeCallback = Arc<dyn Fn(String) + Send + Sync>;

/// Invoked with failures met during background reconciliation
pub type ErrorCallback = Arc<dyn Fn(StoreError) + Send + Sync>;

/// Durable storage for one token per subject
#[async_trait]
pub trait JwtStore: Send + Sync {
    /// Token last saved for `subject`
    async fn load(&self, subject: &str) -> StoreResult<String>;

    /// Replace the token for `subject`
    async fn save(&self, subject: &str, token: &str) -> StoreResult<()>;

    fn is_read_only(&self) -> bool;

    /// Subjects currently known to the store
    async fn subjects(&self) -> Vec<String>;

    /// Stop background work and release resources
    async fn close(&self);
}

/// Subjects double as file names, so keep them to a safe character set
pub(crate) fn is_valid_subject(subject: &str) -> bool {
    !subject.is_empty()
        && subject
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

pub(crate) type ContentDigest = [u8; 32];

pub(crate) fn digest(content: &[u8]) -> ContentDigest {
    Sha256::digest(content).into()
}
