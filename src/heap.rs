//! The `Heap` value: region list, free-list, statistics and the next-fit cursor, wired together
//! into the two client-visible operations.

use crate::block::{BlockHeader, BlockRef, Neighbour};
use crate::config::HeapConfig;
use crate::error::RequestError;
use crate::free_list::FreeList;
use crate::mmap::fatal_region_failure;
use crate::region::{self, RegionList};
use crate::stats::Stats;
use crate::word::{self, HEADER_BYTES, MAX_REQUEST_BYTES};
use core::ptr::NonNull;

/// Classification of a just-released block's two physical neighbours, read per data-model
/// invariant 3 (a block's own header MSB describes only its lower neighbour).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Adjacency {
    NeitherFree,
    LowerFree,
    UpperFree,
    BothFree,
}

/// A boundary-tagged, next-fit heap over one or more OS-mapped regions.
///
/// Not `Send`/`Sync`: all operations assume a single mutator (spec section 5). Construct one
/// per logical heap; there is no process-wide singleton here — see the crate docs.
pub struct Heap {
    config: HeapConfig,
    regions: RegionList,
    free_list: FreeList,
    stats: Stats,
}

impl Heap {
    /// Build a heap backed by the real OS `mmap(2)` and the default region size.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(HeapConfig::default())
    }

    /// Build a heap from an explicit configuration (tests inject a mock [`crate::mmap::MemorySource`]
    /// here to drive region placement deterministically).
    #[must_use]
    pub fn with_config(config: HeapConfig) -> Self {
        Self { config, regions: RegionList::new(), free_list: FreeList::new(), stats: Stats::default() }
    }

    /// Request a block of at least `size_in_bytes` payload bytes.
    ///
    /// Returns `None` if `size_in_bytes` is zero or exceeds the header's 31-bit size field's
    /// range; no heap state is touched in that case. Otherwise always eventually succeeds —
    /// acquiring fresh regions from the OS as needed — or the process is terminated by a fatal
    /// mapping failure (spec section 4.5).
    pub fn allocate(&mut self, size_in_bytes: u64) -> Option<NonNull<u8>> {
        let size_words = match validate_request(size_in_bytes) {
            Ok(words) => words,
            Err(err) => {
                log::warn!("{err}");
                return None;
            }
        };

        loop {
            if let Some(found) = self.find_fit(size_words) {
                return Some(self.allocate_from(found, size_words, size_in_bytes));
            }
            self.acquire_region(size_in_bytes);
        }
    }

    /// Release a block previously returned by [`Self::allocate`].
    ///
    /// # Safety
    /// `pointer` must be a payload address this heap handed out, not already released.
    pub unsafe fn release(&mut self, pointer: NonNull<u8>) {
        let block = unsafe { BlockRef::from_payload(pointer) };
        let freed_words = block.size_words();
        self.stats.on_released(word::words_to_bytes(freed_words));

        let own_prev_free = block.header().prev_free();
        let upper = unsafe { BlockRef::from_header_addr(block.upper_addr()) };
        let lower_free = own_prev_free && !self.regions.starts_region(block.header_addr());
        let upper_free = matches!(block.upper_neighbour(), Neighbour::Free(_));

        let adjacency = match (lower_free, upper_free) {
            (false, false) => Adjacency::NeitherFree,
            (true, false) => Adjacency::LowerFree,
            (false, true) => Adjacency::UpperFree,
            (true, true) => Adjacency::BothFree,
        };

        let resting_place = match adjacency {
            Adjacency::NeitherFree => {
                block.init_free(freed_words, own_prev_free, None, None);
                self.free_list.insert_after(self.free_list.cursor(), block);
                mark_upper_prev_free(upper, true);
                self.stats.on_block_freed(word::words_to_bytes(freed_words));
                block
            }
            Adjacency::LowerFree => {
                let lower_words = unsafe { block.lower_free_size_words() };
                let lower = block.lower_block_of_size(lower_words);
                let combined_words = lower_words + header_words() + freed_words;
                grow_free_block(lower, combined_words);
                mark_upper_prev_free(upper, true);
                self.stats.on_free_space_grown(
                    word::words_to_bytes(combined_words) - word::words_to_bytes(lower_words),
                );
                self.stats.grow_largest_free_block(word::words_to_bytes(combined_words));
                lower
            }
            Adjacency::UpperFree => {
                let upper_words = upper.size_words();
                let combined_words = freed_words + header_words() + upper_words;
                block.init_free(combined_words, own_prev_free, None, None);
                self.free_list.replace(upper, block);
                let new_upper = unsafe { BlockRef::from_header_addr(block.upper_addr()) };
                mark_upper_prev_free(new_upper, true);
                self.stats.on_free_space_grown(
                    word::words_to_bytes(combined_words) - word::words_to_bytes(upper_words),
                );
                self.stats.grow_largest_free_block(word::words_to_bytes(combined_words));
                block
            }
            Adjacency::BothFree => {
                let lower_words = unsafe { block.lower_free_size_words() };
                let lower = block.lower_block_of_size(lower_words);
                let upper_words = upper.size_words();
                let combined_words = lower_words + header_words() + freed_words + header_words() + upper_words;
                self.free_list.remove(upper);
                grow_free_block(lower, combined_words);
                let new_upper = unsafe { BlockRef::from_header_addr(lower.upper_addr()) };
                mark_upper_prev_free(new_upper, true);
                self.stats.on_free_blocks_merged();
                self.stats.on_free_space_grown(
                    word::words_to_bytes(combined_words)
                        - word::words_to_bytes(lower_words)
                        - word::words_to_bytes(upper_words),
                );
                self.stats.grow_largest_free_block(word::words_to_bytes(combined_words));
                lower
            }
        };

        self.free_list.set_cursor(Some(resting_place));
    }

    /// Number of blocks currently on the free-list.
    #[must_use]
    pub fn number_free_blocks(&self) -> usize {
        self.stats.number_free_blocks()
    }

    /// Sum of payload bytes across all free blocks.
    #[must_use]
    pub fn total_free_space(&self) -> u64 {
        self.stats.total_free_space()
    }

    /// Largest single free block's payload size, in bytes.
    #[must_use]
    pub fn largest_free_block(&self) -> u64 {
        self.stats.largest_free_block()
    }

    /// Sum of the sizes of all outstanding allocations, in bytes.
    #[must_use]
    pub fn current_allocated_memory(&self) -> u64 {
        self.stats.current_allocated_memory()
    }

    /// Walk the free-list from the cursor, for at most one full circuit, looking for the first
    /// block whose payload is at least `size_words`.
    fn find_fit(&self, size_words: u32) -> Option<BlockRef> {
        let start = self.free_list.cursor()?;
        let mut current = start;
        let steps = self.stats.number_free_blocks();
        for _ in 0..steps {
            if current.size_words() >= size_words {
                return Some(current);
            }
            current = current.free_next().unwrap_or(current);
        }
        None
    }

    /// Carve `size_words` out of `block`, splitting off a residual free block when the leftover
    /// space would still be usable (spec section 4.3).
    fn allocate_from(&mut self, block: BlockRef, size_words: u32, requested_bytes: u64) -> NonNull<u8> {
        let free_words = block.size_words();
        let effective_words = size_words.max(word::minimum_block_words());
        let space_left = free_words - effective_words;

        if space_left > word::minimum_block_words() {
            self.split(block, free_words, effective_words, space_left);
        } else {
            self.consume_whole(block, free_words);
        }

        self.stats.on_allocated(requested_bytes);
        block.payload()
    }

    /// Carve `block` (payload `free_words`) into an allocated prefix of `effective_words` and a
    /// residual free block covering the rest.
    ///
    /// The allocated block's header is reset to pure size — its old `prev_free` bit (describing
    /// its lower neighbour) is discarded rather than preserved, matching the source's
    /// `splitFreeBlock`.
    fn split(&mut self, block: BlockRef, free_words: u32, effective_words: u32, space_left: u32) {
        let new_free_words = space_left - header_words();

        let new_free_addr = unsafe {
            NonNull::new_unchecked(block.payload().as_ptr().add(word::words_to_bytes(effective_words) as usize))
        };
        let new_free = unsafe { BlockRef::from_header_addr(new_free_addr) };
        new_free.init_free(new_free_words, false, None, None);
        self.free_list.replace(block, new_free);

        block.set_header(BlockHeader::new().with_size_words(effective_words));

        self.stats.on_block_removed_from_list(word::words_to_bytes(free_words));
        self.stats.on_block_freed(word::words_to_bytes(new_free_words));

        if word::words_to_bytes(free_words) >= self.stats.largest_free_block() {
            self.rescan_largest_free_block();
        }

        if self.free_list.cursor() == Some(block) {
            self.free_list.set_cursor(Some(new_free));
        }
    }

    fn consume_whole(&mut self, block: BlockRef, free_words: u32) {
        let upper = unsafe { BlockRef::from_header_addr(block.upper_addr()) };
        mark_upper_prev_free(upper, false);
        self.free_list.remove(block);
        self.stats.on_block_removed_from_list(word::words_to_bytes(free_words));

        if word::words_to_bytes(free_words) >= self.stats.largest_free_block() {
            self.rescan_largest_free_block();
        }
    }

    /// Recompute `largest_free_block` from scratch by walking the whole free-list.
    ///
    /// Called after an allocation consumes what might have been the current largest block; a
    /// grow-only update (as release performs) isn't enough once a block disappears.
    fn rescan_largest_free_block(&mut self) {
        let mut largest = 0u64;
        if let Some(start) = self.free_list.cursor() {
            let mut current = start;
            loop {
                let bytes = word::words_to_bytes(current.size_words());
                if bytes > largest {
                    largest = bytes;
                }
                let next = current.free_next().unwrap_or(current);
                if next == start {
                    break;
                }
                current = next;
            }
        }
        self.stats.set_largest_free_block(largest);
    }

    /// Acquire a region sized for at least `requested_bytes`, or terminate the process.
    fn acquire_region(&mut self, requested_bytes: u64) {
        let result = region::acquire(
            self.config.source.as_mut(),
            &mut self.regions,
            &mut self.free_list,
            &mut self.stats,
            requested_bytes,
            self.config.default_region_pages,
        );
        if let Err(err) = result {
            fatal_region_failure(&err);
        }
        log::debug!("acquired region for {requested_bytes} requested bytes");
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

#[inline]
fn header_words() -> u32 {
    word::bytes_to_words(HEADER_BYTES as u64)
}

/// Grow a free block's header+footer to a new size in place, preserving its own `prev_free`
/// bit (which describes its lower neighbour, untouched by absorbing an upper span).
fn grow_free_block(block: BlockRef, new_size_words: u32) {
    let prev_free = block.header().prev_free();
    block.set_header(BlockHeader::new().with_size_words(new_size_words).with_prev_free(prev_free));
    block.set_footer_size_words(new_size_words);
}

fn mark_upper_prev_free(upper: BlockRef, free: bool) {
    let header = upper.header();
    upper.set_header(header.with_prev_free(free));
}

/// Validate a client request and convert it to words.
///
/// # Errors
/// Returns [`RequestError::SizeOutOfRange`] for a zero request or one exceeding the header's
/// 31-bit size field's byte-equivalent range.
fn validate_request(size_in_bytes: u64) -> Result<u32, RequestError> {
    if size_in_bytes == 0 || size_in_bytes > MAX_REQUEST_BYTES {
        return Err(RequestError::SizeOutOfRange { requested_bytes: size_in_bytes, max: MAX_REQUEST_BYTES });
    }
    Ok(word::bytes_to_words(size_in_bytes))
}
