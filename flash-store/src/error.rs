use nand_driver::{NandDriverError, NandDriverErrorKind};
use thiserror::Error;

/// Errors returned by [`crate::Engine`] operations.
///
/// Generic over the underlying driver's error type so a failed read/write/erase carries its
/// original cause through to the caller instead of being flattened away.
#[derive(Debug, Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error<E: NandDriverError> {
    /// No free blocks (or no store has enough staged room) to hold the object.
    #[error("store full")]
    StoreFull,
    /// Generic store error: invalid address, chain broken, header failed validation.
    #[error("store error")]
    Store,
    /// The store is empty, or the requested operation would otherwise block.
    #[error("timeout")]
    Timeout,
    /// The injected OS primitive (lock) failed.
    #[error("os primitive failed")]
    Os,
    /// A memory allocation failed (staging buffers, block-control array).
    #[error("memory allocation failed")]
    Memory,
    /// `handle` does not refer to an in-use store.
    #[error("invalid handle")]
    InvalidHandle,
    /// A read or retrieve was attempted while the store's read stage was already locked.
    #[error("read stage locked")]
    ReadLocked,
    /// An internal consistency check failed (SID mismatch, reclaim with data remaining).
    #[error("consistency violation")]
    Consistency,
    /// The requested mode (`Mode::Recover`) has no defined semantics in this engine.
    #[error("unsupported mode")]
    Unsupported,
    /// The underlying driver reported an error.
    #[error("driver error")]
    Driver(#[source] E),
}

impl<E: NandDriverError> NandDriverError for Error<E> {
    fn kind(&self) -> NandDriverErrorKind {
        match self {
            Error::Driver(e) => e.kind(),
            Error::Store | Error::Consistency => NandDriverErrorKind::Other,
            _ => NandDriverErrorKind::Other,
        }
    }
}

impl<E: NandDriverError> PartialEq for Error<E>
where
    E: PartialEq,
{
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Error::StoreFull, Error::StoreFull) => true,
            (Error::Store, Error::Store) => true,
            (Error::Timeout, Error::Timeout) => true,
            (Error::Os, Error::Os) => true,
            (Error::Memory, Error::Memory) => true,
            (Error::InvalidHandle, Error::InvalidHandle) => true,
            (Error::ReadLocked, Error::ReadLocked) => true,
            (Error::Consistency, Error::Consistency) => true,
            (Error::Unsupported, Error::Unsupported) => true,
            (Error::Driver(a), Error::Driver(b)) => a == b,
            _ => false,
        }
    }
}
