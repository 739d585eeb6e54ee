//! Word/byte size accounting.
//!
//! Every size stored on the heap — header, footer, region length — is expressed in *words*.
//! A word here is a fixed 4-byte accounting unit; it has no relation to the host CPU's native
//! register width, so the on-disk (on-heap) layout is identical on 32-bit and 64-bit targets.

use core::mem::size_of;

/// Size in bytes of one accounting word.
pub const WORD_SIZE: usize = 4;

/// Size in bytes of a [`crate::block::BlockHeader`] (and, identically, of a region sentinel).
pub const HEADER_BYTES: usize = 4;

/// Size in bytes of a free-block footer (pure size, no flags).
pub const FOOTER_BYTES: usize = 4;

/// Size in bytes of the two free-list link pointers stored in a free block's payload.
pub const LINKS_BYTES: usize = 2 * size_of::<usize>();

/// Largest size, in words, representable in the header's 31-bit size field.
pub const MAX_SIZE_WORDS: u32 = (1 << 31) - 1;

/// Largest client-facing request, in bytes, that the 31-bit size field can represent.
pub const MAX_REQUEST_BYTES: u64 = MAX_SIZE_WORDS as u64 * WORD_SIZE as u64;

/// Round `bytes` up to the next whole word and return the word count.
///
/// # Panics
/// Panics in debug builds if the result would not fit in 31 bits; callers are expected to
/// validate the request against [`MAX_REQUEST_BYTES`] first.
#[inline]
#[must_use]
pub const fn bytes_to_words(bytes: u64) -> u32 {
    let words = bytes.div_ceil(WORD_SIZE as u64);
    debug_assert!(words <= MAX_SIZE_WORDS as u64);
    words as u32
}

/// Expand a word count back into bytes.
#[inline]
#[must_use]
pub const fn words_to_bytes(words: u32) -> u64 {
    words as u64 * WORD_SIZE as u64
}

/// Minimum size, in words, a free block must have to be placed on the free-list.
///
/// Derived from the space a free block needs to hold its own bookkeeping: header, the
/// free-list links (stored in the payload), and the footer. Smaller residuals are folded into
/// whichever allocation produced them rather than kept as an unusably small free block.
#[inline]
#[must_use]
pub const fn minimum_block_words() -> u32 {
    bytes_to_words((HEADER_BYTES + LINKS_BYTES + FOOTER_BYTES) as u64)
}
