//! Boundary-tagged block primitives.
//!
//! A block is a contiguous tile of heap memory, either on the free-list or handed out to a
//! client. [`BlockRef`] is an opaque, `Copy` wrapper over the address of a block's header; all
//! other address arithmetic in this crate goes through its accessors rather than raw pointer
//! casts sprinkled across the heap and free-list modules.
//!
//! ```text
//! +--------+------------------------------------------+--------+
//! | header |   payload (free-links + ... + footer)     | footer |  <- free block
//! +--------+------------------------------------------+--------+
//! ^ BlockRef                                            ^ present only while free
//! ```
//!
//! The header's bit layout is generated by [`bitfield_struct::bitfield`] rather than hand
//! rolled masks: bit 31 is `prev_free`, bits 30..0 are `size_words`. Per the data-model
//! invariant this crate is built against, a block's header describes the free-state of its
//! *lower* physical neighbour, never its own — so telling whether a given block is itself free
//! requires reading the header one block further up (see [`BlockRef::upper_neighbour`]).

use crate::word::{self, FOOTER_BYTES, HEADER_BYTES, LINKS_BYTES};
use bitfield_struct::bitfield;
use core::ptr::{self, NonNull};

/// The 32-bit attribute word present on every block, free or allocated.
///
/// Bit-exact with the spec: bit 31 is `prev_free`, bits 30..=0 are `size_words`.
#[bitfield(u32)]
pub struct BlockHeader {
    /// Size of this block's payload, in words. Zero marks a region sentinel.
    #[bits(31)]
    pub size_words: u32,
    /// Whether the block immediately *below* this one (lower address) is free.
    ///
    /// Seeded to `true` at region creation so the first payload block in a region treats the
    /// region header as "free but not mergeable" — see [`crate::region`].
    pub prev_free: bool,
}

/// Outcome of inspecting a block's upper physical neighbour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Neighbour {
    /// The region sentinel — there is no real block above.
    Sentinel,
    /// A real, currently allocated block.
    Allocated(BlockRef),
    /// A real, currently free block.
    Free(BlockRef),
}

/// An opaque handle to a block, addressing its header.
///
/// Two `BlockRef`s are equal iff they address the same header. All accessors are `unsafe` at
/// the call boundary only insofar as they require the address to be a validly laid-out block
/// within a region this heap owns; the type itself carries no lifetime since blocks are
/// intrusively linked heap memory, not borrowed Rust values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRef(NonNull<u8>);

impl BlockRef {
    /// Wrap the address of a block's header.
    ///
    /// # Safety
    /// `addr` must point at a valid block header (or region sentinel) within a region this
    /// heap manages.
    #[inline]
    #[must_use]
    pub unsafe fn from_header_addr(addr: NonNull<u8>) -> Self {
        Self(addr)
    }

    /// Recover the block whose payload starts at `payload`.
    ///
    /// # Safety
    /// `payload` must be the payload address of a block previously produced by this heap.
    #[inline]
    #[must_use]
    pub unsafe fn from_payload(payload: NonNull<u8>) -> Self {
        unsafe { Self(NonNull::new_unchecked(payload.as_ptr().sub(HEADER_BYTES))) }
    }

    /// The address of this block's header.
    #[inline]
    #[must_use]
    pub fn header_addr(self) -> NonNull<u8> {
        self.0
    }

    /// Read the header in place.
    #[inline]
    #[must_use]
    pub fn header(self) -> BlockHeader {
        unsafe { BlockHeader::from_bits(ptr::read(self.0.as_ptr().cast::<u32>())) }
    }

    /// Overwrite the header in place.
    #[inline]
    pub fn set_header(self, header: BlockHeader) {
        unsafe { ptr::write(self.0.as_ptr().cast::<u32>(), header.into_bits()) }
    }

    /// This block's payload size, in words.
    #[inline]
    #[must_use]
    pub fn size_words(self) -> u32 {
        self.header().size_words()
    }

    /// Whether this block's header marks the region sentinel (zero size).
    #[inline]
    #[must_use]
    pub fn is_sentinel(self) -> bool {
        self.size_words() == 0
    }

    /// The address of this block's payload (one header's width above the header).
    #[inline]
    #[must_use]
    pub fn payload(self) -> NonNull<u8> {
        unsafe { NonNull::new_unchecked(self.0.as_ptr().add(HEADER_BYTES)) }
    }

    /// The address one byte past this block's payload — i.e. the header address of the block
    /// immediately above it, or the region sentinel if this is the last real block.
    #[inline]
    #[must_use]
    pub fn upper_addr(self) -> NonNull<u8> {
        let bytes = word::words_to_bytes(self.size_words());
        unsafe { NonNull::new_unchecked(self.payload().as_ptr().add(bytes as usize)) }
    }

    /// The block (or sentinel) immediately above this one, addressed only — no free-state
    /// lookup. Use [`Self::upper_neighbour`] to classify it.
    #[inline]
    #[must_use]
    fn upper(self) -> BlockRef {
        unsafe { Self::from_header_addr(self.upper_addr()) }
    }

    /// Classify this block's upper physical neighbour.
    ///
    /// A block's own header only ever describes its *lower* neighbour's free state (data-model
    /// invariant 3), so determining whether the upper neighbour itself is free requires reading
    /// the `prev_free` bit carried by the upper neighbour's own upper neighbour.
    #[inline]
    #[must_use]
    pub fn upper_neighbour(self) -> Neighbour {
        let upper = self.upper();
        if upper.is_sentinel() {
            return Neighbour::Sentinel;
        }
        let upper_upper = upper.upper();
        if upper_upper.header().prev_free() {
            Neighbour::Free(upper)
        } else {
            Neighbour::Allocated(upper)
        }
    }

    /// The footer address of this free block (the last [`FOOTER_BYTES`] of its payload).
    #[inline]
    #[must_use]
    fn footer_addr(self) -> NonNull<u8> {
        let bytes = word::words_to_bytes(self.size_words());
        unsafe {
            NonNull::new_unchecked(
                self.payload().as_ptr().add(bytes as usize).sub(FOOTER_BYTES),
            )
        }
    }

    /// Read this free block's footer size, in words.
    #[inline]
    #[must_use]
    pub fn footer_size_words(self) -> u32 {
        unsafe { ptr::read(self.footer_addr().as_ptr().cast::<u32>()) }
    }

    /// Overwrite this free block's footer size.
    #[inline]
    pub fn set_footer_size_words(self, words: u32) {
        unsafe { ptr::write(self.footer_addr().as_ptr().cast::<u32>(), words) }
    }

    /// Read the lower neighbour's footer, if the lower neighbour is free *and* is a real block
    /// (not the region header). Callers are responsible for the "is this the region's first
    /// block" check — see [`crate::region::RegionList::starts_region`] — since a `BlockRef`
    /// alone cannot distinguish "lower neighbour is a free block" from "lower neighbour is the
    /// region header pre-seeded with `prev_free = true`".
    ///
    /// # Safety
    /// The caller must already know the lower neighbour is a real in-region block.
    #[inline]
    #[must_use]
    pub unsafe fn lower_free_size_words(self) -> u32 {
        let footer_addr = unsafe { self.0.as_ptr().sub(FOOTER_BYTES) };
        unsafe { ptr::read(footer_addr.cast::<u32>()) }
    }

    /// The real block immediately below this one, given its size in words (as read from its
    /// footer by [`Self::lower_free_size_words`] or otherwise known).
    #[inline]
    #[must_use]
    pub fn lower_block_of_size(self, lower_size_words: u32) -> BlockRef {
        let back = HEADER_BYTES + word::words_to_bytes(lower_size_words) as usize;
        unsafe { Self(NonNull::new_unchecked(self.0.as_ptr().sub(back))) }
    }

    /// Read the previous-in-free-list link stored in this free block's payload.
    #[inline]
    #[must_use]
    pub fn free_prev(self) -> Option<BlockRef> {
        read_link(self.payload())
    }

    /// Read the next-in-free-list link stored in this free block's payload.
    #[inline]
    #[must_use]
    pub fn free_next(self) -> Option<BlockRef> {
        read_link(unsafe { NonNull::new_unchecked(self.payload().as_ptr().add(size_of_ptr())) })
    }

    /// Overwrite the previous-in-free-list link.
    #[inline]
    pub fn set_free_prev(self, block: Option<BlockRef>) {
        write_link(self.payload(), block);
    }

    /// Overwrite the next-in-free-list link.
    #[inline]
    pub fn set_free_next(self, block: Option<BlockRef>) {
        write_link(
            unsafe { NonNull::new_unchecked(self.payload().as_ptr().add(size_of_ptr())) },
            block,
        );
    }

    /// Write a fresh free block at this address: header, footer, and free-list links.
    ///
    /// Does not touch the neighbouring blocks' headers or the free-list splice — callers do
    /// that separately (see [`crate::free_list`]).
    pub fn init_free(self, size_words: u32, prev_free_bit: bool, prev: Option<BlockRef>, next: Option<BlockRef>) {
        self.set_header(BlockHeader::new().with_size_words(size_words).with_prev_free(prev_free_bit));
        self.set_free_prev(prev);
        self.set_free_next(next);
        self.set_footer_size_words(size_words);
    }
}

#[inline]
const fn size_of_ptr() -> usize {
    core::mem::size_of::<usize>()
}

#[inline]
fn read_link(addr: NonNull<u8>) -> Option<BlockRef> {
    let raw = unsafe { ptr::read(addr.as_ptr().cast::<usize>()) };
    NonNull::new(raw as *mut u8).map(|p| unsafe { BlockRef::from_header_addr(p) })
}

#[inline]
fn write_link(addr: NonNull<u8>, block: Option<BlockRef>) {
    let raw = block.map_or(0, |b| b.header_addr().as_ptr() as usize);
    unsafe { ptr::write(addr.as_ptr().cast::<usize>(), raw) }
}

/// Sanity check: [`LINKS_BYTES`] as used by [`word::minimum_block_words`] matches the layout
/// actually written by [`BlockRef::set_free_prev`]/[`BlockRef::set_free_next`].
const _: () = assert!(LINKS_BYTES == 2 * size_of_ptr());

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trips_through_bits() {
        let h = BlockHeader::new().with_size_words(12345).with_prev_free(true);
        let bits = h.into_bits();
        assert_eq!(bits & 0x8000_0000, 0x8000_0000);
        assert_eq!(bits & 0x7FFF_FFFF, 12345);
        let h2 = BlockHeader::from_bits(bits);
        assert_eq!(h2.size_words(), 12345);
        assert!(h2.prev_free());
    }

    #[test]
    fn header_size_zero_is_sentinel_shape() {
        let h = BlockHeader::new().with_size_words(0).with_prev_free(true);
        assert_eq!(h.size_words(), 0);
        assert!(h.prev_free());
    }
}
