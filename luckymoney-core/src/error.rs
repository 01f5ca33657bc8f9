//! Error types for the ledger and the distribution engine

use rust_decimal::Decimal;
use thiserror::Error;

/// Result type for core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core errors
#[derive(Error, Debug)]
pub enum Error {
    /// Available balance is lower than the requested amount
    #[error("Insufficient funds: need {needed}, have {available}")]
    InsufficientFunds {
        /// Requested amount
        needed: Decimal,
        /// Available balance at the time of the request
        available: Decimal,
    },

    /// Locked balance is lower than the amount being released
    #[error("Insufficient locked funds: need {needed}, locked {locked}")]
    InsufficientLocked {
        /// Requested amount
        needed: Decimal,
        /// Locked balance at the time of the request
        locked: Decimal,
    },

    /// Amount must be strictly positive
    #[error("Invalid amount: {0}")]
    InvalidAmount(Decimal),

    /// Envelope request failed validation
    #[error("Invalid envelope: {0}")]
    InvalidEnvelope(String),

    /// Share amounts do not match the envelope total or precision
    #[error("Invalid split: {0}")]
    InvalidSplit(String),

    /// The claimant already took a share of this envelope
    #[error("Envelope already claimed by this user")]
    AlreadyClaimed,

    /// Every share of the envelope has been claimed
    #[error("Nothing left in envelope")]
    NothingLeft,

    /// The envelope has been marked expired
    #[error("Envelope expired")]
    Expired,

    /// Reserved transition guard
    #[error("Envelope not activated")]
    NotActivated,

    /// Reserved transition guard
    #[error("Envelope already activated")]
    AlreadyActivated,

    /// Lookup by ID or serial number missed
    #[error("Not found: {0}")]
    NotFound(String),

    /// Addressed bucket path does not exist
    #[error("No container: {0}")]
    NoContainer(String),

    /// A key addressed as a bucket holds a value (or the reverse)
    #[error("Incompatible value at {0}")]
    IncompatibleValue(String),

    /// External deposit already applied
    #[error("Duplicate deposit: {0}")]
    DuplicateDeposit(String),

    /// Reservation not found
    #[error("Reservation not found: {0}")]
    ReservationNotFound(String),

    /// Reservation is not in a state that allows the transition
    #[error("Invalid reservation state: {0}")]
    InvalidReservationState(String),

    /// Storage error (RocksDB)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Metrics registration error
    #[error("Metrics error: {0}")]
    Metrics(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Business rejection (bad input or envelope state) as opposed to an
    /// infrastructure failure. Rejections are never retried.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Error::InsufficientFunds { .. }
                | Error::InsufficientLocked { .. }
                | Error::InvalidAmount(_)
                | Error::InvalidEnvelope(_)
                | Error::InvalidSplit(_)
                | Error::AlreadyClaimed
                | Error::NothingLeft
                | Error::Expired
                | Error::NotActivated
                | Error::AlreadyActivated
                | Error::NotFound(_)
                | Error::DuplicateDeposit(_)
        )
    }

    /// Short stable label, used for metric labels and log fields
    pub fn kind(&self) -> &'static str {
        match self {
            Error::InsufficientFunds { .. } => "insufficient_funds",
            Error::InsufficientLocked { .. } => "insufficient_locked",
            Error::InvalidAmount(_) => "invalid_amount",
            Error::InvalidEnvelope(_) => "invalid_envelope",
            Error::InvalidSplit(_) => "invalid_split",
            Error::AlreadyClaimed => "already_claimed",
            Error::NothingLeft => "nothing_left",
            Error::Expired => "expired",
            Error::NotActivated => "not_activated",
            Error::AlreadyActivated => "already_activated",
            Error::NotFound(_) => "not_found",
            Error::NoContainer(_) => "no_container",
            Error::IncompatibleValue(_) => "incompatible_value",
            Error::DuplicateDeposit(_) => "duplicate_deposit",
            Error::ReservationNotFound(_) => "reservation_not_found",
            Error::InvalidReservationState(_) => "invalid_reservation_state",
            Error::Storage(_) => "storage",
            Error::Serialization(_) => "serialization",
            Error::Config(_) => "config",
            Error::Metrics(_) => "metrics",
            Error::Io(_) => "io",
            Error::Other(_) => "other",
        }
    }
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

impl From<prometheus::Error> for Error {
    fn from(err: prometheus::Error) -> Self {
        Error::Metrics(err.to_string())
    }
}

impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Other(msg)
    }
}

impl From<&str> for Error {
    fn from(msg: &str) -> Self {
        Error::Other(msg.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejections_are_not_infrastructure_failures() {
        assert!(Error::AlreadyClaimed.is_rejection());
        assert!(Error::InsufficientFunds {
            needed: Decimal::ONE,
            available: Decimal::ZERO,
        }
        .is_rejection());
        assert!(!Error::Storage("disk full".to_string()).is_rejection());
        assert!(!Error::NoContainer("accounts".to_string()).is_rejection());
    }

    #[test]
    fn test_error_display() {
        let err = Error::InsufficientFunds {
            needed: Decimal::new(5000, 2),
            available: Decimal::new(1000, 2),
        };
        assert_eq!(err.to_string(), "Insufficient funds: need 50.00, have 10.00");
        assert_eq!(Error::NothingLeft.kind(), "nothing_left");
    }
}
