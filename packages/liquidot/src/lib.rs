//! Domain types for the LiquiDOT orchestrator.
//!
//! Everything in this crate is pure data and pure functions: identities,
//! the position lifecycle state machine, user preferences, and the shared
//! error taxonomy. No I/O happens here; the orchestrator crate owns all
//! chain and store access.

#![deny(clippy::as_conversions)]

mod chain;
mod error;
mod intent;
mod number;
mod pool;
mod position;
mod prefs;

pub mod prelude;

pub use chain::ChainId;
pub use error::Error;
pub use intent::InvestmentIntent;
pub use number::BasisPoints;
pub use pool::{PoolId, PoolSnapshot, TokenInfo};
pub use position::{Fingerprint, Position, PositionStatus};
pub use prefs::Preferences;

pub type Result<T, E = Error> = std::result::Result<T, E>;
