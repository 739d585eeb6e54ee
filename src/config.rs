//! Heap construction knobs.

use crate::mmap::{MemorySource, SystemMmap};

/// Default region size, in OS pages, used whenever a request doesn't force a bigger mapping
/// (spec section 4.5: "a fixed default of 1024 pages").
pub const DEFAULT_REGION_PAGES: u64 = 1024;

/// Configuration a [`crate::heap::Heap`] is built from.
///
/// The [`MemorySource`] is the test seam: production code uses the `Default` impl, which wires
/// up [`SystemMmap`]; tests substitute a deterministic mock to drive region adjacency without
/// depending on where the kernel happens to place real mappings.
pub struct HeapConfig {
    /// Region size, in pages, requested when the default suffices.
    pub default_region_pages: u64,
    /// Where fresh regions come from.
    pub source: Box<dyn MemorySource>,
}

impl HeapConfig {
    /// Build a config around a custom memory source (used by tests).
    #[must_use]
    pub fn with_source(source: Box<dyn MemorySource>) -> Self {
        Self { default_region_pages: DEFAULT_REGION_PAGES, source }
    }
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self::with_source(Box::new(SystemMmap::new()))
    }
}

impl core::fmt::Debug for HeapConfig {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("HeapConfig")
            .field("default_region_pages", &self.default_region_pages)
            .finish_non_exhaustive()
    }
}
