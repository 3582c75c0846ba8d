//! Shared-memory registry error types and result definitions

use core::fmt;

/// Shared-memory operation result type
pub type Result<T> = core::result::Result<T, ShmError>;

/// Shared-memory registry error types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShmError {
    /// The registry has no free slot for a new region (`shm_get`).
    Exhausted,
    /// The calling process already holds a different shared-memory
    /// attachment. Each process may join at most one region at a time.
    DoubleAttach,
    /// `shm_join`/`shm_free` named an id with no matching slot.
    UnknownId,
}

impl ShmError {
    /// Get a static string description of the error
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Exhausted => "shared-memory registry exhausted",
            Self::DoubleAttach => "process already holds a shared-memory attachment",
            Self::UnknownId => "unknown shared-memory id",
        }
    }

    /// Convert error to a numeric code for system calls
    pub fn to_errno(self) -> i32 {
        match self {
            Self::Exhausted => -1,
            Self::DoubleAttach => -2,
            Self::UnknownId => -3,
        }
    }
}

impl fmt::Display for ShmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
