//! Shared error taxonomy for the domain layer.

use crate::position::PositionStatus;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("Invalid chain id: {value}")]
    InvalidChainId { value: String },
    #[error("Invalid preferences: {reason}")]
    InvalidPreferences { reason: String },
    #[error("Invalid investment intent: {reason}")]
    InvalidIntent { reason: String },
    #[error("Illegal position transition {from} -> {to}")]
    IllegalTransition {
        from: PositionStatus,
        to: PositionStatus,
    },
    #[error("Invalid position status: {value}")]
    InvalidStatus { value: String },
    #[error("Basis points out of range: {value} not in [{min}, {max}]")]
    BasisPointsOutOfRange { value: i32, min: i32, max: i32 },
}
