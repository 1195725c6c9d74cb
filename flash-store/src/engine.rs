//! The public API: a single owned struct threading the injected driver, lock, and clock
//! through every store operation.

use nand_driver::{Address, BlockIndex, NandDriver, PageIndex};

use crate::block::Registry as BlockRegistry;
use crate::clock::Clock;
use crate::error::Error;
use crate::lock::DeviceLock;
use crate::object::{self, Sid};
use crate::store::{Attributes, Registry as StoreRegistry};

/// Initialization mode passed to [`Engine::init`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Reclaim every block, distributing each to the free or bad list per `driver.is_bad`.
    Format,
    /// Replay previously-persisted block-control metadata. Not implemented: this engine keeps
    /// block-control state in RAM only, so there is nothing to replay.
    Recover,
}

/// Snapshot returned by [`Engine::stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    pub free: u32,
    pub bad: u32,
    pub used: u32,
    pub error_count: u32,
}

/// A dequeued or retrieved object: the descriptor plus a slice borrowed from the store's read
/// stage. Stays valid until [`Engine::release`].
pub struct Descriptor<'a> {
    pub handle: u32,
    pub sid: Sid,
    pub data: &'a [u8],
}

/// Owns the driver, the block registry, the store table, the device lock, and the clock.
/// `N` is the device's block count; `MAX_STORES` bounds how many logical stores can exist
/// at once.
pub struct Engine<D, L, C, const MAX_STORES: usize> {
    driver: D,
    blocks: BlockRegistry,
    stores: StoreRegistry<MAX_STORES>,
    lock: L,
    clock: C,
}

impl<D, L, C, const MAX_STORES: usize> Engine<D, L, C, MAX_STORES>
where
    D: NandDriver,
    L: DeviceLock,
    C: Clock,
{
    /// Takes ownership of the driver, reclaims every block per `mode`, and returns the number
    /// of blocks reclaimed.
    ///
    /// `mode = Mode::Recover` always fails with `Error::Unsupported`: block-control metadata
    /// lives in RAM only in this engine, so there is no persisted state to recover from.
    pub fn init(mut driver: D, lock: L, clock: C, mode: Mode) -> Result<(u32, Self), Error<D::Error>> {
        if mode == Mode::Recover {
            return Err(Error::Unsupported);
        }

        let mut blocks = BlockRegistry::new(D::BLOCK_COUNT, D::PAGES_PER_BLOCK as u32);
        let mut reclaimed = 0u32;
        for b in 0..D::BLOCK_COUNT as u32 {
            match blocks.reclaim(&mut driver, BlockIndex::new(b)) {
                Ok(()) => reclaimed += 1,
                Err(Error::Store) => {}
                Err(e) => return Err(e),
            }
        }

        Ok((
            reclaimed,
            Engine {
                driver,
                blocks,
                stores: StoreRegistry::new(),
                lock,
                clock,
            },
        ))
    }

    /// Creates a new logical store, returning its handle. Fails with `Error::InvalidHandle` if
    /// every slot in `[0, MAX_STORES)` is already occupied — there is no free handle to hand
    /// back, which is a distinct condition from flash space exhaustion (`Error::StoreFull`).
    pub fn create(&mut self, attributes: Attributes) -> Result<usize, Error<D::Error>> {
        let _guard = self.lock.lock().map_err(|_| Error::Os)?;
        self.stores
            .create(attributes, object::HEADER_LEN, D::PAGE_SIZE)
            .ok_or(Error::InvalidHandle)
    }

    /// Destroys a store, dropping its staging buffers. `handle` becomes reusable.
    pub fn destroy(&mut self, handle: usize) -> Result<(), Error<D::Error>> {
        let _guard = self.lock.lock().map_err(|_| Error::Os)?;
        if self.stores.destroy(handle) {
            Ok(())
        } else {
            Err(Error::InvalidHandle)
        }
    }

    /// Appends an object to the store's queue. `timeout` is accepted for API parity with
    /// blocking callers and otherwise unused; this engine never blocks on enqueue.
    ///
    /// If the write fails partway through (`page > 0`), the object is unrecoverable: the
    /// header page was committed but not all payload pages were. This engine does not detect
    /// that case beyond what a later sync-marker scan finds; callers needing atomic multi-page
    /// writes must layer their own two-phase protocol above this one.
    pub fn enqueue(
        &mut self,
        handle: usize,
        d1: &[u8],
        d2: &[u8],
        _timeout: Option<u32>,
    ) -> Result<Sid, Error<D::Error>> {
        let _guard = self.lock.lock().map_err(|_| Error::Os)?;

        if self.stores.get(handle).is_none() {
            return Err(Error::InvalidHandle);
        }

        if self.stores.get(handle).unwrap().write_addr.is_none() {
            let block = self.blocks.allocate(&mut self.driver)?;
            let addr = Address::new(block, PageIndex::new(0));
            let store = self.stores.get_mut(handle).unwrap();
            store.write_addr = Some(addr);
            store.read_addr = Some(addr);
        }

        let store = self.stores.get_mut(handle).unwrap();
        let now = self.clock.now_nanos();
        let sid = object::write(&mut self.driver, &mut self.blocks, store, handle as u32, now, d1, d2)?;
        store.object_count += 1;
        Ok(sid)
    }

    /// Pops the oldest undequeued object. Returns `Error::Timeout` if the store is empty.
    /// On a corrupt read, scans forward past the damaged region so subsequent dequeues still
    /// make progress, but still reports the original failure for this call.
    pub fn dequeue(&mut self, handle: usize, _timeout: Option<u32>) -> Result<Descriptor<'_>, Error<D::Error>> {
        let _guard = self.lock.lock().map_err(|_| Error::Os)?;
        let store = self.stores.get_mut(handle).ok_or(Error::InvalidHandle)?;

        if store.write_addr == store.read_addr {
            return Err(Error::Timeout);
        }

        let mut addr = store.read_addr.expect("non-empty store has a read cursor");
        match object::read(&mut self.driver, &mut self.blocks, store, handle as u32, &mut addr) {
            Ok(header) => {
                let store = self.stores.get_mut(handle).unwrap();
                store.read_addr = Some(addr);
                let start = object::HEADER_LEN;
                let end = start + header.size as usize;
                let store = self.stores.get(handle).unwrap();
                Ok(Descriptor {
                    handle: header.handle,
                    sid: header.sid,
                    data: &store.read_stage[start..end],
                })
            }
            Err(e) => {
                let mut resync = addr;
                if object::scan(&mut self.driver, &mut self.blocks, &mut resync).is_ok() {
                    let store = self.stores.get_mut(handle).unwrap();
                    store.read_addr = Some(resync);
                }
                Err(e)
            }
        }
    }

    /// Reads the object at `sid` directly, independent of the store's read cursor.
    pub fn retrieve(&mut self, handle: usize, sid: Sid, _timeout: Option<u32>) -> Result<Descriptor<'_>, Error<D::Error>> {
        let _guard = self.lock.lock().map_err(|_| Error::Os)?;
        let pages_per_block = self.blocks.pages_per_block();
        let store = self.stores.get_mut(handle).ok_or(Error::InvalidHandle)?;

        let mut addr = object::addr_of(sid, pages_per_block);
        let header = object::read(&mut self.driver, &mut self.blocks, store, handle as u32, &mut addr)?;

        let start = object::HEADER_LEN;
        let end = start + header.size as usize;
        let store = self.stores.get(handle).unwrap();
        Ok(Descriptor {
            handle: header.handle,
            sid: header.sid,
            data: &store.read_stage[start..end],
        })
    }

    /// Releases the read stage locked by a prior `dequeue`/`retrieve`. `sid` must match the
    /// descriptor currently held; a mismatched or redundant release fails without unlocking.
    pub fn release(&mut self, handle: usize, sid: Sid) -> Result<(), Error<D::Error>> {
        let _guard = self.lock.lock().map_err(|_| Error::Os)?;
        let store = self.stores.get_mut(handle).ok_or(Error::InvalidHandle)?;

        if !store.stage_locked {
            return Err(Error::Consistency);
        }
        let locked = crate::object::Header::from_bytes(&store.read_stage[..object::HEADER_LEN])
            .ok_or(Error::Consistency)?;
        if locked.sid != sid {
            return Err(Error::Consistency);
        }

        store.stage_locked = false;
        Ok(())
    }

    /// Permanently deletes the object at `sid`. The caller must have already dequeued it out
    /// of the live queue region; this does not consult or move cursors.
    pub fn relinquish(&mut self, handle: usize, sid: Sid) -> Result<(), Error<D::Error>> {
        let _guard = self.lock.lock().map_err(|_| Error::Os)?;
        if self.stores.get(handle).is_none() {
            return Err(Error::InvalidHandle);
        }

        object::delete(&mut self.driver, &mut self.blocks, sid)?;
        let store = self.stores.get_mut(handle).unwrap();
        store.object_count = store.object_count.saturating_sub(1);
        Ok(())
    }

    /// Direct access to the injected driver, bypassing the device lock. Intended for
    /// diagnostics and test harnesses that need to inject faults or inspect raw flash state,
    /// not for routine use — it does not go through the lock or update any engine bookkeeping.
    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    /// Number of objects enqueued and not yet relinquished.
    pub fn count(&self, handle: usize) -> Result<usize, Error<D::Error>> {
        let _guard = self.lock.lock().map_err(|_| Error::Os)?;
        self.stores
            .get(handle)
            .map(|s| s.object_count)
            .ok_or(Error::InvalidHandle)
    }

    /// Snapshots block-level statistics. `log` additionally emits the bad-block chain at
    /// debug level; `reset` zeroes `error_count` after the snapshot is taken.
    pub fn stats(&mut self, log: bool, reset: bool) -> Stats {
        let _guard = self.lock.lock().ok();
        let stats = Stats {
            free: self.blocks.free.count,
            bad: self.blocks.bad.count,
            used: self.blocks.used_count,
            error_count: self.blocks.error_count,
        };

        if log {
            let mut cursor = self.blocks.bad.head;
            while let Some(block) = cursor {
                debug!("bad block {}", self.driver.phys_block(block));
                cursor = self.blocks.next(block);
            }
        }

        if reset {
            self.blocks.error_count = 0;
        }

        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TestClock;
    use crate::lock::SingleThreadLock;
    use nand_driver::sim::MemoryNand;
    use test_log::test;

    const PAGE_SIZE: usize = 32;
    const PAGES_PER_BLOCK: usize = 4;
    const BLOCK_COUNT: usize = 8;

    type TestEngine = Engine<MemoryNand<PAGE_SIZE, PAGES_PER_BLOCK, BLOCK_COUNT>, SingleThreadLock, TestClock, 4>;

    fn init() -> TestEngine {
        let driver = MemoryNand::<PAGE_SIZE, PAGES_PER_BLOCK, BLOCK_COUNT>::new();
        let (reclaimed, engine) =
            TestEngine::init(driver, SingleThreadLock::new(), TestClock::new(0), Mode::Format).unwrap();
        assert_eq!(reclaimed, BLOCK_COUNT as u32);
        engine
    }

    #[test]
    fn enqueue_dequeue_release_roundtrip() {
        let mut engine = init();
        let handle = engine.create(Attributes { max_data_size: 64 }).unwrap();

        let sid = engine.enqueue(handle, b"payload", b"", None).unwrap();
        assert_eq!(engine.count(handle).unwrap(), 1);

        let desc = engine.dequeue(handle, None).unwrap();
        assert_eq!(desc.data, b"payload");
        assert_eq!(desc.sid, sid);
        engine.release(handle, sid).unwrap();

        assert!(matches!(engine.dequeue(handle, None), Err(Error::Timeout)));
    }

    #[test]
    fn relinquish_after_dequeue_decrements_count() {
        let mut engine = init();
        let handle = engine.create(Attributes { max_data_size: 64 }).unwrap();
        let sid = engine.enqueue(handle, b"data", b"", None).unwrap();

        engine.dequeue(handle, None).unwrap();
        engine.release(handle, sid).unwrap();
        engine.relinquish(handle, sid).unwrap();

        assert_eq!(engine.count(handle).unwrap(), 0);
    }

    #[test]
    fn recover_mode_is_unsupported() {
        let driver = MemoryNand::<PAGE_SIZE, PAGES_PER_BLOCK, BLOCK_COUNT>::new();
        let result = TestEngine::init(driver, SingleThreadLock::new(), TestClock::new(0), Mode::Recover);
        assert!(matches!(result, Err(Error::Unsupported)));
    }

    #[test]
    fn invalid_handle_is_rejected() {
        let mut engine = init();
        assert!(matches!(engine.enqueue(9, b"x", b"", None), Err(Error::InvalidHandle)));
    }
}
