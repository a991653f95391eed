//! Lifecycle engine: the decision, dispatch, monitoring and liquidation
//! logic, written against the store and the contract wrappers only.
//!
//! The binary wraps each of these entry points in a supervised task; the
//! integration tests drive them directly against a mock chain backend.
//! Nothing in here holds state between calls; all state lives in the
//! position store.

mod decide;
mod dispatch;
mod liquidate;
mod monitor;

use std::fmt::Display;

pub use decide::{evaluate_user, Evaluation};
pub use dispatch::{dispatch_intent, DispatchOutcome};
pub use liquidate::{run_liquidation, LiquidationOutcome, LiquidationSettings};
pub use monitor::{handle_hub_log, handle_spoke_log, HubEffect, SpokeEffect};

use liquidot::Fingerprint;

/// Why a position is being pushed into liquidation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LiquidationReason {
    /// The pool price left the position's range.
    RangeExit,
    /// Estimated value fell through the user's stop-loss.
    StopLoss,
    /// Estimated value rose through the user's take-profit.
    TakeProfit,
    /// Operator asked for it.
    Manual,
    /// Resuming an interrupted liquidation after a restart or a failed
    /// phase.
    Recovery,
}

impl Display for LiquidationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(match self {
            LiquidationReason::RangeExit => "range exit",
            LiquidationReason::StopLoss => "stop-loss",
            LiquidationReason::TakeProfit => "take-profit",
            LiquidationReason::Manual => "manual request",
            LiquidationReason::Recovery => "recovery",
        })
    }
}

/// A request for the liquidation controller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LiquidationRequest {
    pub fingerprint: Fingerprint,
    pub reason: LiquidationReason,
}
