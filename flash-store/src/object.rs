//! Object framing over the data stream: header layout, SID encoding, write/read staging,
//! sync-marker resync, and delete-triggered reclaim.

use core::num::NonZeroU32;

use nand_driver::{Address, BlockIndex, NandDriver, PageIndex};

use crate::block::Registry;
use crate::error::Error;
use crate::store::Store;

/// Marks the start of an object header on flash. Spells "BP FLASH" in ASCII, kept from the
/// reference engine this format is descended from.
pub(crate) const SYNC_MARKER: u64 = 0x4250_2046_4C41_5348;

/// Stable identifier for an object: the page address of its header, one-based so zero is never
/// produced and can serve as an absent-value sentinel at call sites that need one.
pub type Sid = NonZeroU32;

pub(crate) const HEADER_LEN: usize = 8 + 8 + 4 + 4 + 4;

/// Persisted object header: sync marker, write timestamp, and the descriptor fields needed to
/// validate a read (`handle`, `size`) or re-derive the SID it was written under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub sync: u64,
    pub timestamp: u64,
    pub handle: u32,
    pub size: u32,
    pub sid: Sid,
}

impl Header {
    fn to_bytes(self, out: &mut [u8]) {
        out[0..8].copy_from_slice(&self.sync.to_le_bytes());
        out[8..16].copy_from_slice(&self.timestamp.to_le_bytes());
        out[16..20].copy_from_slice(&self.handle.to_le_bytes());
        out[20..24].copy_from_slice(&self.size.to_le_bytes());
        out[24..28].copy_from_slice(&self.sid.get().to_le_bytes());
    }

    pub(crate) fn from_bytes(buf: &[u8]) -> Option<Self> {
        let sid = u32::from_le_bytes(buf[24..28].try_into().ok()?);
        Some(Header {
            sync: u64::from_le_bytes(buf[0..8].try_into().ok()?),
            timestamp: u64::from_le_bytes(buf[8..16].try_into().ok()?),
            handle: u32::from_le_bytes(buf[16..20].try_into().ok()?),
            size: u32::from_le_bytes(buf[20..24].try_into().ok()?),
            sid: NonZeroU32::new(sid)?,
        })
    }
}

pub(crate) fn sid_of(addr: Address, pages_per_block: u32) -> Sid {
    let raw = addr.block.as_u32() * pages_per_block + addr.page.as_u32() + 1;
    NonZeroU32::new(raw).expect("page address yields a nonzero SID by construction")
}

pub(crate) fn addr_of(sid: Sid, pages_per_block: u32) -> Address {
    let raw = sid.get() - 1;
    Address::new(
        BlockIndex::new(raw / pages_per_block),
        PageIndex::new(raw % pages_per_block),
    )
}

/// Builds and writes an object header plus payload, returning the SID it was written under.
pub(crate) fn write<D: NandDriver>(
    driver: &mut D,
    registry: &mut Registry,
    store: &mut Store,
    handle: u32,
    now: u64,
    d1: &[u8],
    d2: &[u8],
) -> Result<Sid, Error<D::Error>> {
    let need = HEADER_LEN + d1.len() + d2.len();
    if need > store.attributes.max_data_size {
        warn!("object of {} bytes exceeds store's max data size", need);
        return Err(Error::StoreFull);
    }

    let pages_per_block = registry.pages_per_block();
    let page_size = D::PAGE_SIZE as u64;
    let avail = registry.free.count as u64 * registry.pages_per_block() as u64 * page_size;
    if avail < need as u64 {
        warn!("insufficient flash space for object of {} bytes", need);
        return Err(Error::StoreFull);
    }

    let write_addr = store.write_addr.expect("caller allocates the first block before writing");
    let sid = sid_of(write_addr, pages_per_block);
    let header = Header {
        sync: SYNC_MARKER,
        timestamp: now,
        handle,
        size: (d1.len() + d2.len()) as u32,
        sid,
    };

    header.to_bytes(&mut store.write_stage[0..HEADER_LEN]);
    store.write_stage[HEADER_LEN..HEADER_LEN + d1.len()].copy_from_slice(d1);
    store.write_stage[HEADER_LEN + d1.len()..need].copy_from_slice(d2);

    let mut addr = write_addr;
    crate::stream::write(driver, registry, &mut addr, &store.write_stage[..need])?;
    store.write_addr = Some(addr);

    Ok(sid)
}

/// Reads one object at `*addr` into the store's read stage, validating the header against
/// `handle` before exposing it. Leaves the stage locked on success.
pub(crate) fn read<D: NandDriver>(
    driver: &mut D,
    registry: &mut Registry,
    store: &mut Store,
    handle: u32,
    addr: &mut Address,
) -> Result<Header, Error<D::Error>> {
    if store.stage_locked {
        return Err(Error::ReadLocked);
    }

    let page_size = D::PAGE_SIZE;
    crate::stream::read(driver, registry, addr, &mut store.read_stage[..page_size])?;

    let header = Header::from_bytes(&store.read_stage[..HEADER_LEN]).ok_or(Error::Store)?;
    if header.size as usize > store.attributes.max_data_size
        || header.handle != handle
        || header.sync != SYNC_MARKER
    {
        error!(
            "object read fails validation: size {} handle {} sync {:x}",
            header.size, header.handle, header.sync
        );
        return Err(Error::Store);
    }

    let bytes_read = page_size - HEADER_LEN;
    let remaining = header.size as usize;
    if remaining > bytes_read {
        let extra = remaining - bytes_read;
        crate::stream::read(
            driver,
            registry,
            addr,
            &mut store.read_stage[page_size..page_size + extra],
        )?;
    }

    store.stage_locked = true;
    Ok(header)
}

/// Walks forward from `*addr` looking for the next valid sync marker, used to resynchronize
/// after a corrupt read. Updates `*addr` in place to the page holding it.
pub(crate) fn scan<D: NandDriver>(
    driver: &mut D,
    registry: &mut Registry,
    addr: &mut Address,
) -> Result<(), Error<D::Error>> {
    loop {
        if (addr.block.as_u32() as usize) >= registry.num_blocks() {
            return Err(Error::Store);
        }

        let mut probe = *addr;
        let mut hdr_bytes = [0u8; HEADER_LEN];
        let found = crate::stream::read(driver, registry, &mut probe, &mut hdr_bytes)
            .ok()
            .and_then(|()| Header::from_bytes(&hdr_bytes))
            .is_some_and(|h| h.sync == SYNC_MARKER);

        if found {
            return Ok(());
        }

        addr.page = PageIndex::new(addr.page.as_u32() + 1);
        if addr.page.as_u32() == registry.max_pages(addr.block) {
            match registry.next(addr.block) {
                Some(next) => {
                    addr.block = next;
                    addr.page = PageIndex::new(0);
                }
                None => return Err(Error::Store),
            }
        }
    }
}

/// Deletes the object identified by `sid`: clears its pages from each spanned block's use
/// bitmap, reclaiming any block once every one of its pages has been deleted.
pub(crate) fn delete<D: NandDriver>(
    driver: &mut D,
    registry: &mut Registry,
    sid: Sid,
) -> Result<(), Error<D::Error>> {
    let pages_per_block = registry.pages_per_block();
    let mut addr = addr_of(sid, pages_per_block);
    if (addr.block.as_u32() as usize) >= registry.num_blocks()
        || addr.page.as_u32() >= registry.max_pages(addr.block)
    {
        error!("invalid address provided to delete: {}", addr);
        return Err(Error::Store);
    }

    let mut hdr_addr = addr;
    let mut hdr_bytes = [0u8; HEADER_LEN];
    crate::stream::read(driver, registry, &mut hdr_addr, &mut hdr_bytes)?;
    let header = Header::from_bytes(&hdr_bytes).ok_or(Error::Store)?;
    if header.sid != sid {
        error!("attempting to delete object with mismatched sid");
        return Err(Error::Consistency);
    }

    let mut current_block: Option<BlockIndex> = None;
    let mut current_free_pages = 0u32;
    let mut bytes_left = header.size as i64;

    while bytes_left > 0 {
        if current_block != Some(addr.block) {
            current_block = Some(addr.block);
            current_free_pages = registry.control(addr.block).free_page_count();
        }

        if registry.control_mut(addr.block).clear_page(addr.page.as_u32()) {
            current_free_pages += 1;
        }

        bytes_left -= bytes_left.min(D::PAGE_SIZE as i64);
        addr.page = PageIndex::new(addr.page.as_u32() + 1);

        if addr.page.as_u32() == registry.max_pages(addr.block) {
            match registry.next(addr.block) {
                Some(next) => {
                    addr.block = next;
                    addr.page = PageIndex::new(0);
                }
                None if bytes_left > 0 => {
                    error!("chain ended mid-delete");
                    return Err(Error::Store);
                }
                None => {}
            }
        }

        if current_free_pages >= registry.max_pages(current_block.unwrap()) {
            if bytes_left != 0 {
                error!("reclaiming block with undeleted data remaining");
                return Err(Error::Consistency);
            }
            let block = current_block.unwrap();
            registry.unlink(block);
            if let Err(e) = registry.reclaim(driver, block) {
                debug!("block routed to bad list on delete-triggered reclaim: {:?}", e);
            }
        }
    }

    Ok(())
}
