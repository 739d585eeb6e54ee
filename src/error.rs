//! Error taxonomy for the region manager.
//!
//! The allocator's public surface ([`crate::Heap::allocate`]) never returns a [`Result`]: an
//! out-of-range request simply yields `None`. Internally, though, region acquisition can fail
//! for a concrete reason (the kernel refused the mapping), and giving that reason a type keeps
//! the "log it, then terminate" decision in exactly one place instead of scattering
//! `format!`s through the region manager.

use std::io;

/// Failure obtaining a new OS-mapped region.
///
/// Every variant here is fatal: the allocator has no recovery path short of the kernel
/// granting the mapping, so observing this error always leads to process termination via
/// [`crate::mmap::fatal_region_failure`].
#[derive(Debug, thiserror::Error)]
pub enum RegionError {
    /// The anonymous-mapping syscall itself failed.
    #[error("failed to map {requested_bytes} bytes of anonymous memory: {source}")]
    Mmap {
        /// Length, in bytes, that was requested from the OS.
        requested_bytes: u64,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },
}

/// Reason a client-facing `allocate` request was rejected without touching heap state.
///
/// This is the one recoverable error in the allocator's contract (section 7 of the design:
/// "size-out-of-range"). It is logged at `warn` and converted to `None` at the public
/// boundary; no caller is expected to match on it directly.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RequestError {
    /// The requested size was zero or exceeded [`crate::word::MAX_REQUEST_BYTES`].
    #[error("requested size {requested_bytes} bytes is out of range (1..={max} bytes)")]
    SizeOutOfRange {
        /// The rejected request size, in bytes.
        requested_bytes: u64,
        /// The largest size the allocator can represent, in bytes.
        max: u64,
    },
}
