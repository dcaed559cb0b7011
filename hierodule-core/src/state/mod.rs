//! Transfer state machine
//!
//! One flat outer state per transfer, with an inner phase while the
//! transfer is in progress. Explicit, finite and deterministic.

pub mod events;
pub mod machine;

pub use events::TransferEvent;
pub use machine::{Phase, TransferState};
