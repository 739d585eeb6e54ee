//! Region acquisition and adjacency fusion.
//!
//! A region is one contiguous range obtained from the OS in a single mapping. It starts with a
//! [`RegionHeader`] (a next-region pointer and the region's total length in words) and ends
//! with a sentinel block header of size zero. Regions are linked into a singly-linked list;
//! the list only ever grows (mapped memory is never returned to the OS, per the spec's
//! non-goals), but a newly mapped region that happens to sit immediately above an existing one
//! is fused into it rather than tracked as a second entry.

use crate::block::{BlockHeader, BlockRef};
use crate::error::RegionError;
use crate::free_list::FreeList;
use crate::mmap::MemorySource;
use crate::stats::Stats;
use crate::word::{self, HEADER_BYTES};
use core::mem::size_of;
use core::ptr::NonNull;

/// The header stamped at the base of every region: a next-region pointer and the region's
/// total length in words (spec's "Region header: one pointer followed by a 32-bit length in
/// words").
#[repr(C)]
struct RegionHeader {
    next: *mut RegionHeader,
    length_words: u32,
}

/// Size, in bytes, of [`RegionHeader`] — the offset from a region's base to its first block.
const REGION_HEADER_BYTES: usize = size_of::<RegionHeader>();

/// The singly-linked list of OS-mapped regions this heap owns.
pub struct RegionList {
    head: *mut RegionHeader,
}

impl RegionList {
    /// An empty region list.
    #[must_use]
    pub const fn new() -> Self {
        Self { head: core::ptr::null_mut() }
    }

    #[inline]
    fn region_base(region: *mut RegionHeader) -> usize {
        region as usize
    }

    #[inline]
    fn region_end(region: *mut RegionHeader) -> usize {
        let length_words = unsafe { (*region).length_words };
        Self::region_base(region) + word::words_to_bytes(length_words) as usize
    }

    /// Whether `addr` is the address of the first block header in some region this list owns
    /// — i.e. whether its "lower neighbour" is a region header rather than a real free block,
    /// despite that header's pre-seeded `prev_free = true` bit.
    #[must_use]
    pub fn starts_region(&self, addr: NonNull<u8>) -> bool {
        let addr = addr.as_ptr() as usize;
        let mut current = self.head;
        while !current.is_null() {
            if Self::region_base(current) + REGION_HEADER_BYTES == addr {
                return true;
            }
            current = unsafe { (*current).next };
        }
        false
    }

    /// Find an existing region whose end address equals `new_base` — the fusion candidate for
    /// a just-mapped region placed immediately above it.
    fn find_adjacent(&self, new_base: usize) -> Option<*mut RegionHeader> {
        let mut current = self.head;
        while !current.is_null() {
            if Self::region_end(current) == new_base {
                return Some(current);
            }
            current = unsafe { (*current).next };
        }
        None
    }

    fn prepend(&mut self, region: *mut RegionHeader) {
        unsafe { (*region).next = self.head };
        self.head = region;
    }
}

/// Write a block header/footer/links describing a fresh free block, and splice it into the
/// free-list at the cursor position. Updates stats for the newly free payload.
fn install_fresh_free_block(
    addr: NonNull<u8>,
    payload_words: u32,
    prev_free_bit: bool,
    free_list: &mut FreeList,
    stats: &mut Stats,
) {
    let block = unsafe { BlockRef::from_header_addr(addr) };
    block.init_free(payload_words, prev_free_bit, None, None);
    free_list.insert_after(free_list.cursor(), block);
    stats.on_block_freed(word::words_to_bytes(payload_words));
}

/// Write the region sentinel (zero size, given `prev_free`) at `addr`.
fn write_sentinel(addr: NonNull<u8>, prev_free: bool) {
    let sentinel = unsafe { BlockRef::from_header_addr(addr) };
    sentinel.set_header(BlockHeader::new().with_size_words(0).with_prev_free(prev_free));
}

/// Choose how many bytes to request from the OS for a region that must satisfy at least
/// `request_bytes` of client payload, given the configured default region size (in pages) and
/// the OS page size.
///
/// Mirrors the source's sizing policy exactly: use the default unless it would leave no room
/// for the request once region/sentinel overhead is subtracted, in which case round the
/// request itself up to a whole number of pages plus one spare page.
#[must_use]
pub fn region_length_bytes(request_bytes: u64, default_region_pages: u64, page_size: u64) -> u64 {
    let overhead = (REGION_HEADER_BYTES + HEADER_BYTES) as u64;
    let default_bytes = default_region_pages * page_size;
    if default_bytes >= overhead + request_bytes {
        default_bytes
    } else {
        let pages = request_bytes.div_ceil(page_size) + 1;
        pages * page_size
    }
}

/// Acquire a new region large enough to satisfy `request_bytes`, fusing it into an existing
/// adjacent region when possible, and leave the resulting free span(s) on `free_list`.
///
/// # Errors
/// Propagates [`RegionError`] from the underlying [`MemorySource`] untouched; the caller
/// decides how to react (in this crate, always fatally — see [`crate::mmap::fatal_region_failure`]).
pub fn acquire(
    source: &mut dyn MemorySource,
    regions: &mut RegionList,
    free_list: &mut FreeList,
    stats: &mut Stats,
    request_bytes: u64,
    default_region_pages: u64,
) -> Result<(), RegionError> {
    let page_size = source.page_size();
    let len = region_length_bytes(request_bytes, default_region_pages, page_size);
    let base = source.map(len)?;

    if let Some(adjacent) = regions.find_adjacent(base.as_ptr() as usize) {
        fuse_into(adjacent, base, len, free_list, stats);
        return Ok(());
    }

    // Non-adjacent (or first) region: stamp a fresh RegionHeader + sentinel and prepend.
    let region = base.as_ptr().cast::<RegionHeader>();
    unsafe {
        region.write(RegionHeader { next: core::ptr::null_mut(), length_words: word::bytes_to_words(len) });
    }
    regions.prepend(region);

    let sentinel_addr = unsafe { NonNull::new_unchecked(base.as_ptr().add(len as usize - HEADER_BYTES)) };
    write_sentinel(sentinel_addr, true);

    let first_block_addr = unsafe { NonNull::new_unchecked(base.as_ptr().add(REGION_HEADER_BYTES)) };
    let payload_bytes = len - REGION_HEADER_BYTES as u64 - HEADER_BYTES as u64;
    install_fresh_free_block(first_block_addr, word::bytes_to_words(payload_bytes), true, free_list, stats);

    Ok(())
}

/// Fuse a newly mapped span `[new_base, new_base + new_len)` onto the end of `adjacent`.
fn fuse_into(
    adjacent: *mut RegionHeader,
    new_base: NonNull<u8>,
    new_len: u64,
    free_list: &mut FreeList,
    stats: &mut Stats,
) {
    let old_length_words = unsafe { (*adjacent).length_words };
    let new_length_words = old_length_words + word::bytes_to_words(new_len);
    unsafe { (*adjacent).length_words = new_length_words };

    let combined_end =
        RegionList::region_base(adjacent) + word::words_to_bytes(new_length_words) as usize;
    let new_sentinel_addr = unsafe { NonNull::new_unchecked(combined_end as *mut u8) };

    // The join point is exactly where the old sentinel lived — the new mapping's base.
    let join_addr = new_base;
    let join_block = unsafe { BlockRef::from_header_addr(join_addr) };
    let lower_was_free = join_block.header().prev_free();

    if lower_was_free {
        let lower_size_words = unsafe { join_block.lower_free_size_words() };
        let lower_block = join_block.lower_block_of_size(lower_size_words);
        let old_payload_bytes = word::words_to_bytes(lower_size_words);
        let new_total_bytes =
            (new_sentinel_addr.as_ptr() as usize - lower_block.header_addr().as_ptr() as usize)
                - HEADER_BYTES;
        let new_size_words = word::bytes_to_words(new_total_bytes as u64);
        lower_block.set_header(
            BlockHeader::new().with_size_words(new_size_words).with_prev_free(lower_block.header().prev_free()),
        );
        lower_block.set_footer_size_words(new_size_words);
        stats.on_free_space_grown(new_total_bytes as u64 - old_payload_bytes);
        stats.grow_largest_free_block(new_total_bytes as u64);
    } else {
        let free_bytes =
            (new_sentinel_addr.as_ptr() as usize - join_addr.as_ptr() as usize) - HEADER_BYTES;
        install_fresh_free_block(join_addr, word::bytes_to_words(free_bytes as u64), false, free_list, stats);
    }

    write_sentinel(new_sentinel_addr, true);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn region_length_uses_default_when_it_fits() {
        let len = region_length_bytes(100, 1024, 4096);
        assert_eq!(len, 1024 * 4096);
    }

    #[test]
    fn region_length_grows_for_oversized_requests() {
        let huge = 1024 * 4096; // exactly the default, leaves no room for overhead
        let len = region_length_bytes(huge, 1024, 4096);
        assert!(len > 1024 * 4096);
        assert_eq!(len % 4096, 0);
    }
}
