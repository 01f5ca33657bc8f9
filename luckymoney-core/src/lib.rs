//! Lucky Money Core
//!
//! Ledger-and-distribution engine for "lucky money" envelopes: a sender
//! locks funds into an envelope split into N shares, and other users claim
//! one share each, first come first served.
//!
//! # Architecture
//!
//! - **Bucketed store**: nested buckets over RocksDB, one writer at a time,
//!   snapshot readers
//! - **Account ledger**: available/locked balances with an append-only
//!   version log
//! - **Envelope engine**: create, claim and expire state machine plus its
//!   indices
//! - **Service**: reserve → create → commit saga, claim settlement, expiry
//!   sweeping
//!
//! # Invariants
//!
//! - `amount` and `locked` never go negative; lock/unlock move funds
//!   between them without changing the total
//! - Σ shares == envelope total, checked before anything is persisted
//! - A user claims at most one share per envelope
//! - An envelope enters its sender's history exactly once

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod config;
pub mod envelope;
pub mod error;
pub mod ledger;
pub mod metrics;
pub mod oracle;
pub mod schema;
pub mod service;
pub mod storage;
pub mod sweeper;
pub mod types;

// Re-exports
pub use config::Config;
pub use envelope::EnvelopeEngine;
pub use error::{Error, Result};
pub use ledger::AccountLedger;
pub use oracle::SplitOracle;
pub use service::LuckyMoney;
pub use storage::Store;
pub use sweeper::{spawn_sweeper, SweeperHandle};
pub use types::{
    Account, Asset, ClaimReceipt, Distribution, Envelope, EnvelopeId, EnvelopeState,
    EnvelopeStatus, IndexKind, NewEnvelope, Page, Reason, Reservation, ReservationStatus, Share,
    SplitMode, UserId, Version,
};
