#![no_std]
//! Injected NAND flash driver contract.
//!
//! The storage engine in `flash-store` never talks to silicon directly: it is generic over
//! a [`NandDriver`] implementation, which owns the only unsafe/HAL-facing code. This crate
//! defines that contract plus the page/block address newtypes shared across the engine, and
//! (in [`sim`]) an in-memory implementation used for tests and examples.

extern crate alloc;

mod address;
mod fmt;
pub mod sim;

pub use address::{Address, BlockIndex, PageIndex};

/// Generic error kinds a [`NandDriver`] implementation maps its own error type onto.
///
/// Mirrors the shape of `embedded-storage`'s `NorFlashErrorKind`: callers that only need to
/// react to a handful of broad categories (as the engine's write/erase paths do) can match on
/// this instead of a driver-specific error enum.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[non_exhaustive]
pub enum NandDriverErrorKind {
    /// The block has failed (erase or program failure) and should be retired.
    BlockFailed,
    /// The arguments are out of bounds for the device geometry.
    OutOfBounds,
    /// Implementation-specific error with no better classification.
    Other,
}

/// Trait implemented by a driver's error type so the engine can classify failures without
/// depending on the concrete error enum.
pub trait NandDriverError: core::fmt::Debug {
    fn kind(&self) -> NandDriverErrorKind;
}

/// Associates a [`NandDriver`] implementation with its error type.
pub trait ErrorType {
    type Error: NandDriverError;
}

/// Whether a block is safe to use.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BlockStatus {
    Ok,
    Bad,
}

/// The injected capability a NAND flash device must provide.
///
/// Implementations are expected to be thin wrappers around a physical or simulated device;
/// all higher-level bookkeeping (free lists, bad-block migration, object framing) lives in
/// `flash-store` and is generic over this trait.
pub trait NandDriver: ErrorType {
    /// Number of bytes in a page.
    const PAGE_SIZE: usize;
    /// Number of pages in a block.
    const PAGES_PER_BLOCK: usize;
    /// Number of blocks on the device.
    const BLOCK_COUNT: usize;

    /// Read up to `buf.len()` bytes starting at the beginning of the given page.
    fn page_read(&mut self, addr: Address, buf: &mut [u8]) -> Result<(), Self::Error>;

    /// Write up to `buf.len()` bytes starting at the beginning of the given page.
    ///
    /// The page must have been erased since its last write; partial-page writes are
    /// permitted (the rest of the page is left erased).
    fn page_write(&mut self, addr: Address, buf: &[u8]) -> Result<(), Self::Error>;

    /// Erase every page in the given block, returning it to the all-ones state.
    fn block_erase(&mut self, block: BlockIndex) -> Result<(), Self::Error>;

    /// Whether the block is marked bad (factory or runtime).
    fn is_bad(&mut self, block: BlockIndex) -> bool;

    /// Mark the block as bad so it is excluded from future allocation.
    fn mark_bad(&mut self, block: BlockIndex) -> Result<(), Self::Error>;

    /// Map a logical block index to a physical one for diagnostics (logging, stats).
    ///
    /// The default implementation is the identity mapping; drivers fronting a partitioned
    /// or remapped device override it.
    fn phys_block(&self, block: BlockIndex) -> u32 {
        block.as_u32()
    }
}
