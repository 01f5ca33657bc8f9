//! Typed bucket layout
//!
//! ```text
//! accounts/<user>              asset        -> Account
//! versions/<user>              seq (u64)    -> Version      (bucket sequence = last seq)
//! deposits                     txid         -> DepositRecord
//! reservations                 uuid         -> Reservation
//! envelopes                                                  (bucket sequence = last ID)
//! envelopes/<id>               base         -> Envelope
//!                              seq          -> u32 claimed count
//!                              best, worst  -> u32 share index
//! envelopes/<id>/claimants     user         -> ()
//! envelopes/<id>/shares        index (u32)  -> Share
//! envelope_sn                  sn           -> EnvelopeId
//! envelope_pending/<user>      id           -> ()
//! envelope_history/<user>      id           -> ()
//! envelope_meta                latest_expired -> EnvelopeId
//! settlements/<id>             index (u32)  -> u64 version  (claimant credited)
//! refunds                      id           -> u64 version  (remainder returned)
//! ```
//!
//! Numeric keys are big-endian so byte order equals numeric order.

use crate::error::{Error, Result};
use crate::storage::BucketPath;
use crate::types::{Asset, EnvelopeId, IndexKind, UserId};

/// Envelope IDs start after this offset
pub const ENVELOPE_ID_OFFSET: u64 = 100_000;

pub(crate) const ACCOUNTS: &str = "accounts";
pub(crate) const VERSIONS: &str = "versions";
pub(crate) const DEPOSITS: &str = "deposits";
pub(crate) const RESERVATIONS: &str = "reservations";
pub(crate) const ENVELOPES: &str = "envelopes";
pub(crate) const ENVELOPE_SN: &str = "envelope_sn";
pub(crate) const ENVELOPE_PENDING: &str = "envelope_pending";
pub(crate) const ENVELOPE_HISTORY: &str = "envelope_history";
pub(crate) const ENVELOPE_META: &str = "envelope_meta";
pub(crate) const SETTLEMENTS: &str = "settlements";
pub(crate) const REFUNDS: &str = "refunds";

pub(crate) const KEY_BASE: &[u8] = b"base";
pub(crate) const KEY_SEQ: &[u8] = b"seq";
pub(crate) const KEY_BEST: &[u8] = b"best";
pub(crate) const KEY_WORST: &[u8] = b"worst";
pub(crate) const KEY_LATEST_EXPIRED: &[u8] = b"latest_expired";

const CLAIMANTS: &str = "claimants";
const SHARES: &str = "shares";

/// Fixed-width, order-preserving key encoding
pub(crate) trait Key: Sized {
    /// Encoded key bytes
    fn encode_key(&self) -> Vec<u8>;

    /// Decode key bytes written by `encode_key`
    fn decode_key(bytes: &[u8]) -> Result<Self>;
}

fn fixed<const N: usize>(bytes: &[u8], what: &str) -> Result<[u8; N]> {
    bytes
        .try_into()
        .map_err(|_| Error::Storage(format!("Malformed {} key ({} bytes)", what, bytes.len())))
}

impl Key for UserId {
    fn encode_key(&self) -> Vec<u8> {
        // Flip the sign bit so negative IDs sort first
        ((self.0 as u64) ^ (1 << 63)).to_be_bytes().to_vec()
    }

    fn decode_key(bytes: &[u8]) -> Result<Self> {
        let raw = u64::from_be_bytes(fixed(bytes, "user")?);
        Ok(UserId((raw ^ (1 << 63)) as i64))
    }
}

impl Key for EnvelopeId {
    fn encode_key(&self) -> Vec<u8> {
        self.0.to_be_bytes().to_vec()
    }

    fn decode_key(bytes: &[u8]) -> Result<Self> {
        Ok(EnvelopeId(u64::from_be_bytes(fixed(bytes, "envelope")?)))
    }
}

impl Key for u32 {
    fn encode_key(&self) -> Vec<u8> {
        self.to_be_bytes().to_vec()
    }

    fn decode_key(bytes: &[u8]) -> Result<Self> {
        Ok(u32::from_be_bytes(fixed(bytes, "u32")?))
    }
}

impl Key for u64 {
    fn encode_key(&self) -> Vec<u8> {
        self.to_be_bytes().to_vec()
    }

    fn decode_key(bytes: &[u8]) -> Result<Self> {
        Ok(u64::from_be_bytes(fixed(bytes, "u64")?))
    }
}

pub(crate) fn asset_key(asset: &Asset) -> &[u8] {
    asset.as_str().as_bytes()
}

pub(crate) fn accounts(user: UserId) -> BucketPath {
    BucketPath::root(ACCOUNTS).join(user.encode_key())
}

pub(crate) fn versions(user: UserId) -> BucketPath {
    BucketPath::root(VERSIONS).join(user.encode_key())
}

pub(crate) fn deposits() -> BucketPath {
    BucketPath::root(DEPOSITS)
}

pub(crate) fn reservations() -> BucketPath {
    BucketPath::root(RESERVATIONS)
}

pub(crate) fn settlements(id: EnvelopeId) -> BucketPath {
    BucketPath::root(SETTLEMENTS).join(id.encode_key())
}

pub(crate) fn refunds() -> BucketPath {
    BucketPath::root(REFUNDS)
}

pub(crate) fn envelopes() -> BucketPath {
    BucketPath::root(ENVELOPES)
}

pub(crate) fn envelope(id: EnvelopeId) -> BucketPath {
    envelopes().join(id.encode_key())
}

pub(crate) fn claimants(id: EnvelopeId) -> BucketPath {
    envelope(id).join(CLAIMANTS)
}

pub(crate) fn shares(id: EnvelopeId) -> BucketPath {
    envelope(id).join(SHARES)
}

pub(crate) fn serial_numbers() -> BucketPath {
    BucketPath::root(ENVELOPE_SN)
}

pub(crate) fn user_index(kind: IndexKind, user: UserId) -> BucketPath {
    let root = match kind {
        IndexKind::Pending => ENVELOPE_PENDING,
        IndexKind::History => ENVELOPE_HISTORY,
    };
    BucketPath::root(root).join(user.encode_key())
}

pub(crate) fn envelope_meta() -> BucketPath {
    BucketPath::root(ENVELOPE_META)
}
