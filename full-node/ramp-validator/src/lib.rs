#![deny(missing_docs)]

//! The deterministic dispute participant of a ramp rollup validator.
//!
//! A validator watches challenge contracts on the settlement chain and plays
//! one side of each interactive dispute: bisecting claims it defends,
//! picking segments of claims it attacks, proving single steps, and claiming
//! timeouts. Independently, the log reader pulls confirmed logs out of the
//! aggregator and feeds downstream consumers, surviving reorgs of the log
//! tip.
//!
//! Everything chain-facing goes through the [`ramp_interface::ChainAdapter`]
//! seam; everything VM-facing goes through the
//! [`challenge::driver::MoveOracle`] seam.

pub mod challenge;
mod config;
pub mod log_reader;

pub use challenge::driver::{ChallengeDriver, DriverConfig, DriverError, MoveOracle};
pub use challenge::{
    bisection_step_count, BisectionChallenge, ChallengeError, ChallengeEvent, ChallengeState,
    ChallengeVariant, Role,
};
pub use config::{
    from_toml_path, ChallengeConfig, LogReaderSettings, StorageConfig, ValidatorConfig,
};
pub use log_reader::{LogReader, LogReaderConfig, ReaderError};
