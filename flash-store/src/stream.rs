//! Byte-granular write/read across a chain of blocks, with automatic next-block allocation
//! and in-flight recovery from write failures.

use nand_driver::{Address, NandDriver, PageIndex};

use crate::block::Registry;
use crate::error::Error;

fn valid_address<D: NandDriver>(registry: &Registry, addr: Address) -> bool {
    (addr.block.as_u32() as usize) < registry.num_blocks()
        && addr.page.as_u32() < registry.max_pages(addr.block)
}

/// Writes `buf` starting at `*addr`, advancing `*addr` in place to the page following the
/// last page written. Allocates new blocks as the current one fills, and transparently remaps
/// onto a fresh block if the driver reports a write failure, re-sending the same bytes.
///
/// On a mid-block failure (`addr.page > 0`) the failed block is frozen in place rather than
/// reclaimed, and the replacement is spliced in using the failed block's *pre-failure*
/// predecessor — so the pages already committed to the frozen block become unreachable by
/// forward chain traversal. This mirrors the reference engine exactly; see `DESIGN.md`.
pub(crate) fn write<D: NandDriver>(
    driver: &mut D,
    registry: &mut Registry,
    addr: &mut Address,
    buf: &[u8],
) -> Result<(), Error<D::Error>> {
    if !valid_address::<D>(registry, *addr) {
        error!("invalid address provided to write: {}", addr);
        return Err(Error::Store);
    }

    let page_size = D::PAGE_SIZE;
    let mut offset = 0usize;
    while offset < buf.len() {
        let chunk = core::cmp::min(buf.len() - offset, page_size);
        match driver.page_write(*addr, &buf[offset..offset + chunk]) {
            Ok(()) => {
                offset += chunk;
            }
            Err(_) => {
                registry.error_count += 1;
                error!("write failed at {}", addr);

                let prev_before = registry.prev(addr.block);
                if addr.page.as_u32() > 0 {
                    registry.shrink_max_pages(addr.block, addr.page.as_u32());
                } else if let Err(e) = registry.reclaim(driver, addr.block) {
                    debug!("reclaimed failed block as bad: {:?}", e);
                }

                let replacement = registry.allocate(driver)?;
                if let Some(p) = prev_before {
                    registry.set_next(p, Some(replacement));
                }
                registry.set_prev(replacement, prev_before);

                addr.block = replacement;
                addr.page = PageIndex::new(0);
                continue;
            }
        }

        addr.page = PageIndex::new(addr.page.as_u32() + 1);
        if addr.page.as_u32() == registry.max_pages(addr.block) {
            let next = registry.allocate(driver)?;
            registry.set_next(addr.block, Some(next));
            registry.set_prev(next, Some(addr.block));
            addr.block = next;
            addr.page = PageIndex::new(0);
        }
    }

    Ok(())
}

/// Reads `buf.len()` bytes starting at `*addr`, advancing `*addr` in place. Follows block
/// chain links as pages are exhausted; fails if the chain ends before `buf` is filled. Driver
/// read failures are returned immediately with no transparent retry.
pub(crate) fn read<D: NandDriver>(
    driver: &mut D,
    registry: &mut Registry,
    addr: &mut Address,
    buf: &mut [u8],
) -> Result<(), Error<D::Error>> {
    if !valid_address::<D>(registry, *addr) {
        error!("invalid address provided to read: {}", addr);
        return Err(Error::Store);
    }

    let page_size = D::PAGE_SIZE;
    let mut offset = 0usize;
    while offset < buf.len() {
        let chunk = core::cmp::min(buf.len() - offset, page_size);
        match driver.page_read(*addr, &mut buf[offset..offset + chunk]) {
            Ok(()) => {
                offset += chunk;
                addr.page = PageIndex::new(addr.page.as_u32() + 1);
            }
            Err(e) => {
                registry.error_count += 1;
                error!("read failed at {}", addr);
                return Err(Error::Driver(e));
            }
        }

        if addr.page.as_u32() == registry.max_pages(addr.block) {
            match registry.next(addr.block) {
                Some(next) => {
                    addr.block = next;
                    addr.page = PageIndex::new(0);
                }
                None => {
                    error!("chain ended mid-read at {}", addr);
                    return Err(Error::Store);
                }
            }
        }
    }

    Ok(())
}
