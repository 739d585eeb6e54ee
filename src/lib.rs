//! # Boundary-Tagged Heap
//!
//! A user-space dynamic memory allocator core: a boundary-tagged heap built over
//! OS-`mmap`'d regions, an intrusive circular next-fit free-list, splitting on allocation, and
//! immediate bidirectional coalescing on release.
//!
//! ## Architecture
//!
//! Three cooperating layers, leaves first:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                         Heap                              │
//! │   allocate(bytes) -> Option<NonNull<u8>>                  │
//! │   release(ptr)    (unsafe)                                 │
//! │   number_free_blocks / total_free_space / ...             │
//! └──────────────────────────┬──────────────────────────────┘
//!                            │
//! ┌──────────────────────────▼──────────────────────────────┐
//! │                 Free-list + placement                     │
//! │   circular, doubly-linked, next-fit cursor (free_list)     │
//! │   split-on-allocate, coalesce-on-release (block, heap)     │
//! └──────────────────────────┬──────────────────────────────┘
//! ┌──────────────────────────▼──────────────────────────────┐
//! │                    Region manager                          │
//! │   acquire() via MemorySource, adjacency fusion (region)     │
//! └──────────────────────────┬──────────────────────────────┘
//!                            │
//! ┌──────────────────────────▼──────────────────────────────┐
//! │              MemorySource (mmap, or a test mock)            │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Block layout
//!
//! Every block — free or allocated — carries a 32-bit header: bit 31 is `prev_free` (whether
//! the block's *lower* physical neighbour is free), the remaining 31 bits are its payload size
//! in 4-byte words. Free blocks additionally carry, inside their payload, two free-list link
//! pointers and a trailing 32-bit footer (a copy of the header's size), letting a released
//! block discover and merge with a free lower neighbour in O(1).
//!
//! ```text
//! +--------+------------------------------------------+--------+
//! | header |  payload: [prev][next] ... footer         | footer |  <- free block
//! +--------+------------------------------------------+--------+
//! +--------+------------------------------------------+
//! | header |               payload                     |          <- allocated block
//! +--------+------------------------------------------+
//! ```
//!
//! A block's own header never describes its own free-state — only its lower neighbour's.
//! Telling whether a block itself is free requires reading the header one block further up
//! ([`block::BlockRef::upper_neighbour`]).
//!
//! ## Usage
//!
//! ```rust,no_run
//! use boundary_heap::Heap;
//!
//! let mut heap = Heap::new();
//! let block = heap.allocate(128).expect("allocation");
//! unsafe { heap.release(block) };
//! ```
//!
//! ## Non-goals
//!
//! Thread safety, returning OS memory to the kernel, best-fit/segregated-fit strategies, and
//! alignment guarantees stronger than the word used for size accounting are all explicitly out
//! of scope — see the individual module docs for the reasoning behind each.

pub mod block;
pub mod config;
pub mod error;
pub mod free_list;
pub mod heap;
pub mod mmap;
pub mod region;
pub mod stats;
pub mod word;

pub use config::HeapConfig;
pub use error::{RegionError, RequestError};
pub use heap::Heap;
pub use mmap::{MemorySource, SystemMmap};
pub use stats::Stats;
