//! The seam through which the region manager talks to the operating system.
//!
//! Production code maps anonymous memory via `mmap(2)` (`MAP_PRIVATE | MAP_ANONYMOUS`); test
//! code substitutes a deterministic in-process source so that region adjacency/fusion (spec
//! section 8, scenario 6) can be driven without depending on where the real kernel happens to
//! place mappings.

use crate::error::RegionError;
use core::ptr::NonNull;
use std::io;

/// A source of fresh, zeroed, anonymous memory regions.
pub trait MemorySource {
    /// Request `len` bytes (already a multiple of the page size) of read/write anonymous
    /// memory. Returns the base address on success.
    ///
    /// # Errors
    /// Returns [`RegionError::Mmap`] if the OS refuses the mapping. The caller treats this as
    /// fatal.
    fn map(&mut self, len: u64) -> Result<NonNull<u8>, RegionError>;

    /// The page size, in bytes, this source maps in multiples of.
    fn page_size(&self) -> u64;
}

/// The real, OS-backed memory source.
///
/// Calls `mmap(2)` directly through `libc`. Constructing this discovers the host page size via
/// `sysconf(_SC_PAGESIZE)`.
#[derive(Debug, Clone, Copy)]
pub struct SystemMmap {
    page_size: u64,
}

impl SystemMmap {
    /// Probe the OS page size and build a source backed by real `mmap(2)` calls.
    #[must_use]
    pub fn new() -> Self {
        let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        let page_size = if page_size > 0 { page_size as u64 } else { 4096 };
        Self { page_size }
    }
}

impl Default for SystemMmap {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySource for SystemMmap {
    fn map(&mut self, len: u64) -> Result<NonNull<u8>, RegionError> {
        let addr = unsafe {
            libc::mmap(
                core::ptr::null_mut(),
                len as libc::size_t,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if addr == libc::MAP_FAILED {
            return Err(RegionError::Mmap {
                requested_bytes: len,
                source: io::Error::last_os_error(),
            });
        }
        // Safety: mmap with MAP_ANONYMOUS never returns null on success.
        Ok(unsafe { NonNull::new_unchecked(addr.cast::<u8>()) })
    }

    fn page_size(&self) -> u64 {
        self.page_size
    }
}

/// Log the fatal cause and terminate the process.
///
/// There is no recovery path for a kernel-map-failure (spec section 4.5/7): the allocator has
/// nowhere to shrink or retry to, so this logs at `error` and aborts with a non-zero status.
pub fn fatal_region_failure(err: &RegionError) -> ! {
    log::error!("fatal: {err}");
    std::process::exit(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// A `MemorySource` that hands out regions from a pre-allocated arena at addresses the
    /// test controls, so adjacency fusion can be exercised deterministically.
    pub struct MockMmap {
        pub page_size: u64,
        arena: Box<[u8]>,
        arena_base: usize,
        next_offsets: VecDeque<usize>,
        fail_next: bool,
    }

    impl MockMmap {
        pub fn new(page_size: u64, arena_bytes: usize) -> Self {
            let arena = vec![0u8; arena_bytes].into_boxed_slice();
            let arena_base = arena.as_ptr() as usize;
            Self {
                page_size,
                arena,
                arena_base,
                next_offsets: VecDeque::new(),
                fail_next: false,
            }
        }

        /// Force the next `len` request to be served at `offset` bytes into the arena, so the
        /// test can engineer two regions to be virtually adjacent.
        pub fn place_next_at(&mut self, offset: usize) {
            self.next_offsets.push_back(offset);
        }

        pub fn fail_next_request(&mut self) {
            self.fail_next = true;
        }

        #[allow(dead_code)]
        pub fn arena_base(&self) -> usize {
            self.arena_base
        }
    }

    impl MemorySource for MockMmap {
        fn map(&mut self, len: u64) -> Result<NonNull<u8>, RegionError> {
            if self.fail_next {
                self.fail_next = false;
                return Err(RegionError::Mmap {
                    requested_bytes: len,
                    source: io::Error::from_raw_os_error(libc::ENOMEM),
                });
            }
            let offset = self.next_offsets.pop_front().unwrap_or(0);
            assert!(
                offset + len as usize <= self.arena.len(),
                "mock arena too small for test"
            );
            let ptr = unsafe { self.arena.as_mut_ptr().add(offset) };
            Ok(unsafe { NonNull::new_unchecked(ptr) })
        }

        fn page_size(&self) -> u64 {
            self.page_size
        }
    }

    #[test]
    fn system_mmap_reports_a_plausible_page_size() {
        let src = SystemMmap::new();
        assert!(src.page_size() >= 4096);
        assert_eq!(src.page_size() % 4096, 0);
    }
}
