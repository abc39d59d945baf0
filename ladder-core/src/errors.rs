//! Error taxonomy for the ladder worker.
//!
//! Mirrors the failure classes the orchestrator and executor reason about:
//! fatal startup errors, recoverable transport errors, venue-reported logical
//! errors that are sometimes treated as success, and the two conditions that
//! bring the process down (`ConfigError`, `InvariantViolation`).

use thiserror::Error;

/// Invalid or missing configuration. Fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required configuration value: {0}")]
    Missing(&'static str),

    #[error("invalid value for `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error(
        "venue decimals mismatch: configured trading={configured_trading}/settlement={configured_settlement}, \
         venue reports trading={venue_trading}/settlement={venue_settlement}"
    )]
    DecimalsMismatch {
        configured_trading: u32,
        configured_settlement: u32,
        venue_trading: u32,
        venue_settlement: u32,
    },
}

/// Connection, timeout, or 5xx failure talking to the venue. Logged and
/// counted, never escalated; the next cycle provides a natural retry.
#[derive(Debug, Error)]
#[error("transport error: {0}")]
pub struct TransportError(pub String);

/// Semantically meaningful 4xx responses from the venue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum VenueLogicalErrorKind {
    #[error("order already filled or closed")]
    AlreadyFilledOrClosed,
    #[error("order unknown to venue")]
    OrderUnknown,
    #[error("auth challenge expired")]
    ChallengeExpired,
    #[error("invalid signature")]
    InvalidSignature,
    #[error("position already settled")]
    AlreadySettled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("venue logical error: {kind}")]
pub struct VenueLogicalError {
    pub kind: VenueLogicalErrorKind,
}

impl VenueLogicalError {
    pub fn new(kind: VenueLogicalErrorKind) -> Self {
        Self { kind }
    }

    /// `AlreadyFilledOrClosed` and `OrderUnknown` mean the order is already
    /// gone from the venue's perspective; a cancel against it is treated as
    /// a success for slot bookkeeping rather than a failure.
    pub fn is_benign_on_cancel(&self) -> bool {
        matches!(
            self.kind,
            VenueLogicalErrorKind::AlreadyFilledOrClosed | VenueLogicalErrorKind::OrderUnknown
        )
    }
}

/// The error type returned by every `PriceSource`/`OrderApi`/`AccountApi`/`AuthApi` call.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Logical(#[from] VenueLogicalError),

    #[error("bearer token expired")]
    TokenExpired,

    /// Cooperative cancellation. Never logged as an error.
    #[error("operation cancelled")]
    Cancelled,
}

/// An assertion failed that should never fail by construction (e.g. an
/// unbalanced settlement plan). Fatal — the process aborts.
#[derive(Debug, Error)]
#[error("invariant violated: {0}")]
pub struct InvariantViolation(pub String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn benign_on_cancel_covers_exactly_the_documented_kinds() {
        let benign = [
            VenueLogicalErrorKind::AlreadyFilledOrClosed,
            VenueLogicalErrorKind::OrderUnknown,
        ];
        let not_benign = [
            VenueLogicalErrorKind::ChallengeExpired,
            VenueLogicalErrorKind::InvalidSignature,
            VenueLogicalErrorKind::AlreadySettled,
        ];
        for kind in benign {
            assert!(VenueLogicalError::new(kind).is_benign_on_cancel());
        }
        for kind in not_benign {
            assert!(!VenueLogicalError::new(kind).is_benign_on_cancel());
        }
    }

    #[test]
    fn cancelled_display_has_no_error_language() {
        let msg = format!("{}", ApiError::Cancelled);
        assert_eq!(msg, "operation cancelled");
    }
}
