//! An in-memory [`NandDriver`] used for tests and documentation examples.
//!
//! Not part of the production path: real deployments wire `flash-store` to a driver that
//! talks to actual silicon. This simulator exists so the engine's bad-block migration,
//! write-failure recovery, and sync-marker rescanning can be exercised deterministically.

use crate::{Address, BlockIndex, BlockStatus, NandDriverErrorKind};

/// Errors produced by [`MemoryNand`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Out-of-bounds block or page index.
    OutOfBounds,
    /// The block is marked bad and refuses reads/writes/erases.
    BlockBad,
    /// A fault was injected at this address by the test harness.
    Injected,
}

impl crate::NandDriverError for Error {
    fn kind(&self) -> NandDriverErrorKind {
        match self {
            Error::OutOfBounds => NandDriverErrorKind::OutOfBounds,
            Error::BlockBad => NandDriverErrorKind::BlockFailed,
            Error::Injected => NandDriverErrorKind::BlockFailed,
        }
    }
}

/// A single injected fault: the next operation of `kind` touching `block` (optionally a
/// specific `page`) fails with [`Error::Injected`] instead of succeeding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fault {
    pub kind: FaultKind,
    pub block: BlockIndex,
    pub page: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    Write,
    Read,
    Erase,
}

/// In-memory NAND flash with const-generic geometry, suitable for `no_std` test binaries.
///
/// Mirrors the behavior of real NAND: writes can only clear bits (`&=`), and a block must be
/// erased (all bits set) before it can be meaningfully rewritten.
pub struct MemoryNand<const PAGE_SIZE: usize, const PAGES_PER_BLOCK: usize, const BLOCK_COUNT: usize>
{
    storage: alloc::boxed::Box<[[[u8; PAGE_SIZE]; PAGES_PER_BLOCK]; BLOCK_COUNT]>,
    bad: [bool; BLOCK_COUNT],
    faults: alloc::vec::Vec<Fault>,
}

impl<const PAGE_SIZE: usize, const PAGES_PER_BLOCK: usize, const BLOCK_COUNT: usize>
    MemoryNand<PAGE_SIZE, PAGES_PER_BLOCK, BLOCK_COUNT>
{
    pub fn new() -> Self {
        MemoryNand {
            storage: alloc::boxed::Box::new([[[0xFFu8; PAGE_SIZE]; PAGES_PER_BLOCK]; BLOCK_COUNT]),
            bad: [false; BLOCK_COUNT],
            faults: alloc::vec::Vec::new(),
        }
    }

    /// Queue a fault that fires the next time a matching operation is attempted.
    pub fn inject(&mut self, fault: Fault) {
        self.faults.push(fault);
    }

    /// Directly corrupt bytes on flash, bypassing the write-is-AND-only rule. Used by tests
    /// to simulate bit-flip corruption of a previously written sync marker.
    pub fn corrupt(&mut self, addr: Address, offset: usize, bytes: &[u8]) {
        let block = addr.block.as_u32() as usize;
        let page = addr.page.as_u32() as usize;
        self.storage[block][page][offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    fn take_fault(&mut self, kind: FaultKind, block: BlockIndex, page: Option<u32>) -> bool {
        if let Some(pos) = self.faults.iter().position(|f| {
            f.kind == kind && f.block == block && (f.page.is_none() || f.page == page)
        }) {
            self.faults.remove(pos);
            true
        } else {
            false
        }
    }

    fn check_bad(&self, block: BlockIndex) -> Result<(), Error> {
        if block.as_u32() as usize >= BLOCK_COUNT {
            return Err(Error::OutOfBounds);
        }
        if self.bad[block.as_u32() as usize] {
            return Err(Error::BlockBad);
        }
        Ok(())
    }
}

impl<const PAGE_SIZE: usize, const PAGES_PER_BLOCK: usize, const BLOCK_COUNT: usize> Default
    for MemoryNand<PAGE_SIZE, PAGES_PER_BLOCK, BLOCK_COUNT>
{
    fn default() -> Self {
        Self::new()
    }
}

impl<const PAGE_SIZE: usize, const PAGES_PER_BLOCK: usize, const BLOCK_COUNT: usize>
    crate::ErrorType for MemoryNand<PAGE_SIZE, PAGES_PER_BLOCK, BLOCK_COUNT>
{
    type Error = Error;
}

impl<const PAGE_SIZE: usize, const PAGES_PER_BLOCK: usize, const BLOCK_COUNT: usize>
    crate::NandDriver for MemoryNand<PAGE_SIZE, PAGES_PER_BLOCK, BLOCK_COUNT>
{
    const PAGE_SIZE: usize = PAGE_SIZE;
    const PAGES_PER_BLOCK: usize = PAGES_PER_BLOCK;
    const BLOCK_COUNT: usize = BLOCK_COUNT;

    fn page_read(&mut self, addr: Address, buf: &mut [u8]) -> Result<(), Self::Error> {
        self.check_bad(addr.block)?;
        if addr.page.as_u32() as usize >= PAGES_PER_BLOCK {
            return Err(Error::OutOfBounds);
        }
        if self.take_fault(FaultKind::Read, addr.block, Some(addr.page.as_u32())) {
            return Err(Error::Injected);
        }
        let page = &self.storage[addr.block.as_u32() as usize][addr.page.as_u32() as usize];
        buf.copy_from_slice(&page[..buf.len()]);
        Ok(())
    }

    fn page_write(&mut self, addr: Address, buf: &[u8]) -> Result<(), Self::Error> {
        self.check_bad(addr.block)?;
        if addr.page.as_u32() as usize >= PAGES_PER_BLOCK {
            return Err(Error::OutOfBounds);
        }
        if self.take_fault(FaultKind::Write, addr.block, Some(addr.page.as_u32())) {
            return Err(Error::Injected);
        }
        let page = &mut self.storage[addr.block.as_u32() as usize][addr.page.as_u32() as usize];
        for (dst, src) in page.iter_mut().zip(buf.iter()) {
            *dst &= *src;
        }
        Ok(())
    }

    fn block_erase(&mut self, block: BlockIndex) -> Result<(), Self::Error> {
        self.check_bad(block)?;
        if self.take_fault(FaultKind::Erase, block, None) {
            return Err(Error::Injected);
        }
        for page in self.storage[block.as_u32() as usize].iter_mut() {
            page.fill(0xFF);
        }
        Ok(())
    }

    fn is_bad(&mut self, block: BlockIndex) -> bool {
        self.bad
            .get(block.as_u32() as usize)
            .copied()
            .unwrap_or(true)
    }

    fn mark_bad(&mut self, block: BlockIndex) -> Result<(), Self::Error> {
        if block.as_u32() as usize >= BLOCK_COUNT {
            return Err(Error::OutOfBounds);
        }
        self.bad[block.as_u32() as usize] = true;
        Ok(())
    }
}
