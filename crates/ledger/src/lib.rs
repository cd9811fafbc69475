#![cfg_attr(
    not(test),
    deny(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::panic,
        clippy::unimplemented,
        clippy::todo
    )
)]

//! # CORTEX Ledger
//!
//! The tamper-evident transaction log. Every mutation appends exactly one
//! hash-chained row; Merkle checkpoints over contiguous ranges make batch
//! verification cheap, and the checkpoint batch size adapts to the measured
//! write rate so bursts shrink the data-loss window.

/// Injectable monotonic clocks for write-rate estimation.
pub mod clock;
/// The ledger itself: append, checkpoint, verify.
pub mod ledger;

pub use clock::{MonotonicClock, SystemClock};
pub use ledger::{Ledger, LedgerConfig};
