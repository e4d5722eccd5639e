#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! Core traits and primitives for the ramp validator.
//!
//! This crate is the shared vocabulary between the deterministic protocol
//! participants (`ramp-validator`), the persistence layer (`ramp-db`) and
//! whatever settlement-chain transport sits behind [`chain::ChainAdapter`].
//! It contains no I/O of its own.

pub mod cancel;
pub mod chain;
pub mod claims;
pub mod cursor;
pub mod hash;

pub use cancel::{cancel_pair, Cancel, CancelHandle};
pub use chain::{ChainAdapter, ChainError, ChainLog, ContractCall, EventFilter};
pub use claims::{ExecutionAssertionStub, Precondition, TimeBounds, TimeTicks};
pub use hash::{extend_accumulator, keccak, Address, Hash};
