use std::fmt;
use thiserror::Error;

pub type NodeId = i64;

/// The availability tier that refused a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockTier {
    Hive,
    Node(NodeId),
    Key,
}

impl fmt::Display for LockTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockTier::Hive => write!(f, "hive"),
            LockTier::Node(node_id) => write!(f, "node {}", node_id),
            LockTier::Key => write!(f, "key"),
        }
    }
}

#[derive(Error, Debug)]
pub enum DirError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("directory corruption: {0}")]
    Corruption(String),
    #[error("write denied, {tier} is read-only: {detail}")]
    LockDenied { tier: LockTier, detail: String },
    #[error("transaction failed and was rolled back: {0}")]
    TransactionFailed(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("invalid param: {0}")]
    InvalidParam(String),
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("unsupported operation: {0}")]
    Unsupported(String),
    #[error("db error: {0}")]
    DbError(String),
    #[error("I/O error: {0}")]
    IoError(String),
    #[error("invalid data: {0}")]
    InvalidData(String),
}

impl DirError {
    pub fn lock_denied(tier: LockTier, detail: impl Into<String>) -> Self {
        DirError::LockDenied {
            tier,
            detail: detail.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, DirError::NotFound(_))
    }

    pub fn is_corruption(&self) -> bool {
        matches!(self, DirError::Corruption(_))
    }

    pub fn lock_tier(&self) -> Option<LockTier> {
        match self {
            DirError::LockDenied { tier, .. } => Some(*tier),
            _ => None,
        }
    }
}

pub type DirResult<T> = std::result::Result<T, DirError>;

impl From<std::io::Error> for DirError {
    fn from(err: std::io::Error) -> Self {
        DirError::IoError(err.to_string())
    }
}

/// Failures of a cache backend. These never leave the caching overlay.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("cache unavailable: {0}")]
    Unavailable(String),
    #[error("cache operation timed out after {0} ms")]
    Timeout(u64),
    #[error("cache codec error: {0}")]
    Codec(String),
}

pub type CacheResult<T> = std::result::Result<T, CacheError>;
