//! Core types for accounts and envelopes
//!
//! All persisted types are designed for:
//! - Deterministic serialization (bincode)
//! - Exact arithmetic (Decimal for money)

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// User identifier, as issued by the chat platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Envelope identifier, allocated from a global sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EnvelopeId(pub u64);

impl EnvelopeId {
    /// Following ID
    pub fn next(self) -> Self {
        EnvelopeId(self.0.saturating_add(1))
    }
}

impl fmt::Display for EnvelopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Asset symbol (e.g. "CNY", "USDT")
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Asset(String);

impl Asset {
    /// Create new asset symbol
    pub fn new(symbol: impl Into<String>) -> Self {
        Self(symbol.into())
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Balance of one user in one asset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Owner
    pub user: UserId,

    /// Asset
    pub asset: Asset,

    /// Available balance
    pub amount: Decimal,

    /// Reserved balance
    pub locked: Decimal,
}

impl Account {
    /// Untouched account
    pub fn zero(user: UserId, asset: Asset) -> Self {
        Self {
            user,
            asset,
            amount: Decimal::ZERO,
            locked: Decimal::ZERO,
        }
    }

    /// Available plus locked
    pub fn total(&self) -> Decimal {
        self.amount + self.locked
    }
}

/// Why a version was written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Reason {
    /// Administrative deposit
    System,
    /// External deposit keyed by transaction ID
    Deposit,
    /// Funds locked into an outgoing envelope
    Give,
    /// Share credited to a claimant
    Receive,
    /// Unclaimed remainder returned on expiry
    Refund,
    /// Locked funds paid out to a claimant
    Payout,
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Reason::System => "system",
            Reason::Deposit => "deposit",
            Reason::Give => "give",
            Reason::Receive => "receive",
            Reason::Refund => "refund",
            Reason::Payout => "payout",
        };
        f.write_str(name)
    }
}

/// Append-only ledger entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    /// Per-user sequence number
    pub id: u64,

    /// Asset
    pub asset: Asset,

    /// Signed change of the available balance
    pub balance: Decimal,

    /// Signed change of the locked balance
    pub locked: Decimal,

    /// Available balance after the change
    pub amount: Decimal,

    /// Reason code
    pub reason: Reason,

    /// Envelope the change belongs to
    pub envelope: Option<EnvelopeId>,

    /// Write time
    pub timestamp: DateTime<Utc>,
}

/// How an envelope total is divided
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SplitMode {
    /// Every share carries the same value
    Equal,
    /// Share values come from the split oracle
    Random,
}

/// Distribution requested for a new envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Distribution {
    /// `number` shares of `per_share` each
    Equal {
        /// Value of each share
        per_share: Decimal,
    },
    /// `total` split at random into `number` shares
    Random {
        /// Envelope total
        total: Decimal,
    },
}

impl Distribution {
    /// Envelope total for `number` shares, `None` on overflow
    pub fn total(&self, number: u32) -> Option<Decimal> {
        match self {
            Distribution::Equal { per_share } => per_share.checked_mul(Decimal::from(number)),
            Distribution::Random { total } => Some(*total),
        }
    }

    /// Split mode
    pub fn mode(&self) -> SplitMode {
        match self {
            Distribution::Equal { .. } => SplitMode::Equal,
            Distribution::Random { .. } => SplitMode::Random,
        }
    }

    /// Per-share value for equal splits
    pub fn per_share(&self) -> Option<Decimal> {
        match self {
            Distribution::Equal { per_share } => Some(*per_share),
            Distribution::Random { .. } => None,
        }
    }
}

/// Request to create an envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEnvelope {
    /// Sender
    pub sender: UserId,

    /// Sender display name
    pub sender_name: String,

    /// Asset
    pub asset: Asset,

    /// Number of shares
    pub number: u32,

    /// Split
    pub distribution: Distribution,

    /// Free-text message
    pub message: String,
}

impl NewEnvelope {
    /// Envelope total, `None` on overflow
    pub fn total(&self) -> Option<Decimal> {
        self.distribution.total(self.number)
    }
}

/// Persisted envelope metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Envelope ID
    pub id: EnvelopeId,

    /// Public serial number
    pub sn: String,

    /// Sender
    pub sender: UserId,

    /// Sender display name
    pub sender_name: String,

    /// Asset
    pub asset: Asset,

    /// Total amount
    pub amount: Decimal,

    /// Claimed so far
    pub received: Decimal,

    /// Declared share count
    pub number: u32,

    /// Split mode
    pub mode: SplitMode,

    /// Per-share value (equal splits only)
    pub value: Option<Decimal>,

    /// Set on the first claim
    pub active: bool,

    /// Marked expired
    pub expired: bool,

    /// Free-text message
    pub message: String,

    /// Creation time
    pub created_at: DateTime<Utc>,
}

impl Envelope {
    /// Amounts rescaled to exactly `precision` decimal places
    pub fn normalized(mut self, precision: u32) -> Self {
        self.amount = canonical(self.amount, precision);
        self.received = canonical(self.received, precision);
        self.value = self.value.map(|v| canonical(v, precision));
        self
    }

    /// Amount still held in unclaimed shares
    pub fn unclaimed(&self) -> Decimal {
        self.amount - self.received
    }
}

fn canonical(mut value: Decimal, precision: u32) -> Decimal {
    value.rescale(precision);
    value
}

/// Claim state of an envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnvelopeState {
    /// Shares remain and the envelope is not expired
    Active,
    /// Every share was claimed
    Exhausted,
    /// Marked expired
    Expired,
}

/// Envelope with its claim counter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvelopeStatus {
    /// Metadata
    pub envelope: Envelope,

    /// Number of claimed shares
    pub claimed: u32,
}

impl EnvelopeStatus {
    /// Derived claim state; expiry takes precedence
    pub fn state(&self) -> EnvelopeState {
        if self.envelope.expired {
            EnvelopeState::Expired
        } else if self.claimed >= self.envelope.number {
            EnvelopeState::Exhausted
        } else {
            EnvelopeState::Active
        }
    }

    /// Unclaimed share count
    pub fn remaining(&self) -> u32 {
        self.envelope.number.saturating_sub(self.claimed)
    }
}

/// Claimant recorded on a share
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claimant {
    /// Claimant user
    pub user: UserId,

    /// Claimant display name
    pub name: String,
}

/// One share of an envelope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Share {
    /// 1-based index
    pub index: u32,

    /// Amount, fixed at creation
    pub amount: Decimal,

    /// Set once claimed
    pub claimant: Option<Claimant>,
}

/// Result of a successful claim
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimReceipt {
    /// Claimed envelope
    pub envelope_id: EnvelopeId,

    /// Envelope sender
    pub sender: UserId,

    /// Asset
    pub asset: Asset,

    /// Index of the assigned share
    pub index: u32,

    /// Share amount
    pub amount: Decimal,

    /// Shares still unclaimed
    pub remaining: u32,
}

/// Per-sender envelope index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexKind {
    /// Still claimable
    Pending,
    /// Exhausted or expired
    History,
}

/// One page of an ordered collection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    /// Items in the requested order
    pub items: Vec<T>,

    /// Size of the whole collection
    pub total: usize,
}

impl<T> Page<T> {
    /// Empty page over a collection of `total` items
    pub fn empty(total: usize) -> Self {
        Self {
            items: Vec::new(),
            total,
        }
    }
}

/// Lifecycle of a reservation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReservationStatus {
    /// Funds locked, envelope not yet created
    Pending,
    /// Envelope created
    Committed,
    /// Lock released
    Cancelled,
}

/// Lock taken on behalf of a pending envelope creation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    /// Reservation ID (UUIDv7 for time-ordering)
    pub id: Uuid,

    /// Sender
    pub user: UserId,

    /// Asset
    pub asset: Asset,

    /// Locked amount
    pub amount: Decimal,

    /// Status
    pub status: ReservationStatus,

    /// Envelope, once committed
    pub envelope: Option<EnvelopeId>,

    /// Creation time
    pub created_at: DateTime<Utc>,

    /// Last status change
    pub updated_at: DateTime<Utc>,
}

/// External deposit, keyed by transaction ID
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositRecord {
    /// External transaction ID
    pub txid: String,

    /// Credited user
    pub user: UserId,

    /// Asset
    pub asset: Asset,

    /// Amount
    pub amount: Decimal,

    /// Ledger version written for the deposit
    pub version: u64,

    /// Apply time
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distribution_total() {
        let equal = Distribution::Equal {
            per_share: Decimal::new(200, 2),
        };
        assert_eq!(equal.total(5), Some(Decimal::new(1000, 2)));
        assert_eq!(equal.mode(), SplitMode::Equal);

        let random = Distribution::Random {
            total: Decimal::ONE,
        };
        assert_eq!(random.total(3), Some(Decimal::ONE));
        assert_eq!(random.per_share(), None);
    }

    #[test]
    fn test_normalized_rounds_amounts() {
        let envelope = Envelope {
            id: EnvelopeId(100_001),
            sn: "00000000000000ff".to_string(),
            sender: UserId(1),
            sender_name: "alice".to_string(),
            asset: Asset::new("CNY"),
            amount: Decimal::new(10_000, 3),
            received: Decimal::new(2, 0),
            number: 5,
            mode: SplitMode::Equal,
            value: Some(Decimal::new(2_000, 3)),
            active: true,
            expired: false,
            message: String::new(),
            created_at: Utc::now(),
        };

        let normalized = envelope.normalized(2);
        assert_eq!(normalized.amount.to_string(), "10.00");
        assert_eq!(normalized.received.to_string(), "2.00");
        assert_eq!(normalized.value.map(|v| v.to_string()), Some("2.00".to_string()));
    }

    #[test]
    fn test_status_state() {
        let mut status = EnvelopeStatus {
            envelope: Envelope {
                id: EnvelopeId(100_001),
                sn: String::new(),
                sender: UserId(1),
                sender_name: String::new(),
                asset: Asset::new("CNY"),
                amount: Decimal::ONE,
                received: Decimal::ZERO,
                number: 2,
                mode: SplitMode::Random,
                value: None,
                active: false,
                expired: false,
                message: String::new(),
                created_at: Utc::now(),
            },
            claimed: 1,
        };
        assert_eq!(status.state(), EnvelopeState::Active);
        assert_eq!(status.remaining(), 1);

        status.claimed = 2;
        assert_eq!(status.state(), EnvelopeState::Exhausted);

        status.envelope.expired = true;
        assert_eq!(status.state(), EnvelopeState::Expired);
    }
}
