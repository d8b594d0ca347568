//! Crate-wide error type.
//!
//! Only construction paths can fail: buffer allocation, thread-local key
//! registration, first-use ring creation, worker spawn. Steady-state ring
//! operations are total: they block rather than fail.

use thiserror::Error;

/// Errors surfaced by [`Log::new`](crate::Log::new) and by the first use of
/// a thread's ring.
#[derive(Debug, Error)]
pub enum Error {
    /// The platform refused a memory or thread-local allocation.
    #[error("cannot allocate {size} bytes aligned to {alignment}")]
    Allocation {
        /// Requested byte count.
        size: usize,
        /// Requested power-of-two alignment.
        alignment: usize,
    },
    /// A platform call failed with a non-ENOMEM code.
    #[error("system call failed with code {0}")]
    System(i32),
}
