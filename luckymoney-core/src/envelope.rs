//! Envelope distribution engine
//!
//! Owns envelope, share and index records. Creation persists the whole
//! envelope (metadata, every share, best/worst, SN mapping, pending index)
//! in one writer transaction; a claim is likewise a single transaction, so
//! concurrent claims on one envelope serialize on the store's writer lock.
//!
//! Claims take shares in creation order: claimant `k` receives share `k`.
//! Randomness lives only in the amounts chosen at creation.

use crate::{
    config::check_precision,
    oracle::validate_split,
    schema::{self, Key, ENVELOPE_ID_OFFSET, KEY_BASE, KEY_BEST, KEY_LATEST_EXPIRED, KEY_SEQ, KEY_WORST},
    storage::{Bucket, Child, KvRead, Order, WriteTxn},
    types::{
        Claimant, ClaimReceipt, Envelope, EnvelopeId, EnvelopeStatus, IndexKind, NewEnvelope, Page,
        Share, UserId,
    },
    Error, Result, Store,
};
use chrono::Utc;
use rand::Rng;
use rust_decimal::Decimal;
use std::ops::ControlFlow;
use std::sync::Arc;

/// Envelope lifecycle and queries
#[derive(Debug, Clone)]
pub struct EnvelopeEngine {
    store: Arc<Store>,
    precision: u32,
}

impl EnvelopeEngine {
    /// Create engine over a shared store; `precision` is the canonical
    /// number of decimal places for share amounts
    pub fn new(store: Arc<Store>, precision: u32) -> Result<Self> {
        check_precision(precision)?;
        Ok(Self { store, precision })
    }

    /// Canonical precision
    pub fn precision(&self) -> u32 {
        self.precision
    }

    /// Persist a new envelope with the given share amounts.
    ///
    /// Does not touch account balances; the caller locks the funds first.
    pub fn create(&self, request: &NewEnvelope, shares: &[Decimal]) -> Result<Envelope> {
        self.create_with(request, shares, |_, _| Ok(()))
    }

    /// As [`create`](Self::create), running `bind` in the same writer
    /// transaction once the envelope is written. An error from `bind` discards
    /// the envelope.
    pub(crate) fn create_with<F>(
        &self,
        request: &NewEnvelope,
        shares: &[Decimal],
        bind: F,
    ) -> Result<Envelope>
    where
        F: FnOnce(&mut WriteTxn<'_>, &Envelope) -> Result<()>,
    {
        if request.number == 0 {
            return Err(Error::InvalidEnvelope("share count must be positive".to_string()));
        }
        let total = request
            .total()
            .ok_or_else(|| Error::InvalidEnvelope("total amount overflows".to_string()))?;
        validate_split(total, shares, request.number, self.precision)?;

        let envelope = self.store.update(|tx| {
            let id = allocate_id(tx)?;
            let sn = assign_serial_number(tx, id)?;

            let envelope = Envelope {
                id,
                sn,
                sender: request.sender,
                sender_name: request.sender_name.clone(),
                asset: request.asset.clone(),
                amount: total,
                received: Decimal::ZERO,
                number: request.number,
                mode: request.distribution.mode(),
                value: request.distribution.per_share(),
                active: false,
                expired: false,
                message: request.message.clone(),
                created_at: Utc::now(),
            };

            let base = tx.ensure_bucket(&schema::envelope(id))?;
            tx.put_record(&base, KEY_BASE, &envelope)?;
            tx.put(&base, KEY_SEQ, &0u32.encode_key())?;

            let share_bucket = tx.ensure_bucket(&schema::shares(id))?;
            let (mut best, mut worst) = (0usize, 0usize);
            for (i, amount) in shares.iter().enumerate() {
                // Strict comparison: ties keep the first index
                if *amount > shares[best] {
                    best = i;
                }
                if *amount < shares[worst] {
                    worst = i;
                }

                let index = share_index(i)?;
                let share = Share {
                    index,
                    amount: *amount,
                    claimant: None,
                };
                tx.put_record(&share_bucket, &index.encode_key(), &share)?;
            }
            tx.put(&base, KEY_BEST, &share_index(best)?.encode_key())?;
            tx.put(&base, KEY_WORST, &share_index(worst)?.encode_key())?;

            tx.ensure_bucket(&schema::claimants(id))?;

            let pending = tx.ensure_bucket(&schema::user_index(IndexKind::Pending, request.sender))?;
            tx.put(&pending, &id.encode_key(), &[])?;

            bind(tx, &envelope)?;

            Ok(envelope)
        })?;

        tracing::info!(
            envelope_id = %envelope.id,
            sn = %envelope.sn,
            sender = %envelope.sender,
            asset = %envelope.asset,
            amount = %envelope.amount,
            shares = envelope.number,
            mode = ?envelope.mode,
            "Envelope created"
        );

        Ok(envelope)
    }

    /// Assign the next unclaimed share to `user`.
    ///
    /// Checks run in order: already claimed, expired, exhausted.
    pub fn claim(&self, id: EnvelopeId, user: UserId, name: &str) -> Result<ClaimReceipt> {
        let receipt = self.store.update(|tx| {
            let base = envelope_bucket(&*tx, id)?;
            let claimants = tx.require_bucket(&schema::claimants(id))?;

            if tx.contains(&claimants, &user.encode_key())? {
                return Err(Error::AlreadyClaimed);
            }

            let mut envelope = load_envelope(&*tx, &base, id)?;
            if envelope.expired {
                return Err(Error::Expired);
            }

            let claimed = claimed_count(&*tx, &base)?;
            if claimed >= envelope.number {
                return Err(Error::NothingLeft);
            }

            let index = claimed + 1;
            let share_bucket = tx.require_bucket(&schema::shares(id))?;
            let mut share: Share = tx
                .get_record(&share_bucket, &index.encode_key())?
                .ok_or_else(|| Error::Storage(format!("Envelope {} is missing share {}", id, index)))?;
            share.claimant = Some(Claimant {
                user,
                name: name.to_string(),
            });
            tx.put_record(&share_bucket, &index.encode_key(), &share)?;

            envelope.active = true;
            envelope.received = envelope
                .received
                .checked_add(share.amount)
                .ok_or(Error::InvalidAmount(share.amount))?;
            tx.put_record(&base, KEY_BASE, &envelope)?;

            tx.put(&claimants, &user.encode_key(), &[])?;
            tx.put(&base, KEY_SEQ, &index.encode_key())?;

            if index == envelope.number {
                move_to_history(tx, envelope.sender, id)?;
            }

            Ok(ClaimReceipt {
                envelope_id: id,
                sender: envelope.sender,
                asset: envelope.asset,
                index,
                amount: share.amount,
                remaining: envelope.number - index,
            })
        })?;

        tracing::info!(
            envelope_id = %id,
            user = %user,
            index = receipt.index,
            amount = %receipt.amount,
            remaining = receipt.remaining,
            "Share claimed"
        );

        Ok(receipt)
    }

    /// True if the envelope is marked expired; unknown IDs are not expired
    pub fn is_expired(&self, id: EnvelopeId) -> Result<bool> {
        self.store.view(|tx| match tx.bucket(&schema::envelope(id))? {
            Some(base) => Ok(load_envelope(tx, &base, id)?.expired),
            None => Ok(false),
        })
    }

    /// Mark the envelope expired.
    ///
    /// Returns the status (exact amounts) on the first transition and `None`
    /// if it was already expired.
    pub fn set_expired(&self, id: EnvelopeId) -> Result<Option<EnvelopeStatus>> {
        let status = self.store.update(|tx| {
            let base = envelope_bucket(&*tx, id)?;
            let mut envelope = load_envelope(&*tx, &base, id)?;
            if envelope.expired {
                return Ok(None);
            }

            envelope.expired = true;
            tx.put_record(&base, KEY_BASE, &envelope)?;
            move_to_history(tx, envelope.sender, id)?;

            let claimed = claimed_count(&*tx, &base)?;
            Ok(Some(EnvelopeStatus { envelope, claimed }))
        })?;

        if let Some(status) = &status {
            tracing::info!(
                envelope_id = %id,
                claimed = status.claimed,
                unclaimed = %status.envelope.unclaimed(),
                "Envelope expired"
            );
        }

        Ok(status)
    }

    /// Expiry sweeper watermark
    pub fn latest_expired(&self) -> Result<Option<EnvelopeId>> {
        self.store.view(|tx| match tx.bucket(&schema::envelope_meta())? {
            Some(meta) => tx
                .get(&meta, KEY_LATEST_EXPIRED)?
                .map(|bytes| EnvelopeId::decode_key(&bytes))
                .transpose(),
            None => Ok(None),
        })
    }

    /// Persist the expiry sweeper watermark
    pub fn set_latest_expired(&self, id: EnvelopeId) -> Result<()> {
        self.store.update(|tx| {
            let meta = tx.ensure_bucket(&schema::envelope_meta())?;
            tx.put(&meta, KEY_LATEST_EXPIRED, &id.encode_key())
        })
    }

    /// Envelope with its claim counter, amounts at canonical precision
    pub fn get(&self, id: EnvelopeId) -> Result<EnvelopeStatus> {
        let status = self.store.view(|tx| {
            let base = envelope_bucket(tx, id)?;
            Ok(EnvelopeStatus {
                envelope: load_envelope(tx, &base, id)?,
                claimed: claimed_count(tx, &base)?,
            })
        })?;

        Ok(EnvelopeStatus {
            envelope: status.envelope.normalized(self.precision),
            claimed: status.claimed,
        })
    }

    /// Look up an envelope by serial number
    pub fn id_by_sn(&self, sn: &str) -> Result<EnvelopeId> {
        self.store.view(|tx| {
            let found = match tx.bucket(&schema::serial_numbers())? {
                Some(bucket) => tx.get(&bucket, sn.as_bytes())?,
                None => None,
            };
            match found {
                Some(bytes) => EnvelopeId::decode_key(&bytes),
                None => Err(Error::NotFound(format!("serial number {}", sn))),
            }
        })
    }

    /// Claimed shares in share order, up to the first unclaimed one
    pub fn claim_history(&self, id: EnvelopeId) -> Result<Vec<Share>> {
        self.store.view(|tx| {
            envelope_bucket(tx, id)?;
            let share_bucket = tx.require_bucket(&schema::shares(id))?;

            let mut claimed = Vec::new();
            tx.for_each_child(&share_bucket, None, Order::Ascending, |_, child| {
                let share: Share = decode_value(child)?;
                if share.claimant.is_none() {
                    return Ok(ControlFlow::Break(()));
                }
                claimed.push(share);
                Ok(ControlFlow::Continue(()))
            })?;

            Ok(claimed)
        })
    }

    /// Largest and smallest share, as recorded at creation
    pub fn best_and_worst(&self, id: EnvelopeId) -> Result<(Share, Share)> {
        self.store.view(|tx| {
            let base = envelope_bucket(tx, id)?;
            let share_bucket = tx.require_bucket(&schema::shares(id))?;

            let share_at = |key: &[u8]| -> Result<Share> {
                let index = tx
                    .get(&base, key)?
                    .ok_or_else(|| Error::Storage(format!("Envelope {} has no best/worst index", id)))?;
                tx.get_record(&share_bucket, &index)?
                    .ok_or_else(|| Error::Storage(format!("Envelope {} best/worst share missing", id)))
            };

            Ok((share_at(KEY_BEST)?, share_at(KEY_WORST)?))
        })
    }

    /// One page of a sender's pending or history index
    pub fn collection(
        &self,
        user: UserId,
        kind: IndexKind,
        offset: usize,
        limit: usize,
        reverse: bool,
    ) -> Result<Page<EnvelopeId>> {
        self.store.view(|tx| {
            let bucket = match tx.bucket(&schema::user_index(kind, user))? {
                Some(bucket) => bucket,
                None => return Ok(Page::empty(0)),
            };
            tx.page(&bucket, offset, limit, Order::from_reverse(reverse), |name, _| {
                EnvelopeId::decode_key(name)
            })
        })
    }

    /// Visit every envelope from `start` (inclusive) in ID order
    pub fn for_each<F>(&self, start: EnvelopeId, mut visit: F) -> Result<()>
    where
        F: FnMut(&Envelope) -> ControlFlow<()>,
    {
        self.store.view(|tx| {
            let root = match tx.bucket(&schema::envelopes())? {
                Some(root) => root,
                None => return Ok(()),
            };

            let start_key = start.encode_key();
            tx.for_each_child(&root, Some(start_key.as_slice()), Order::Ascending, |name, child| {
                let base = match child {
                    Child::Bucket(base) => base,
                    Child::Value(_) => return Ok(ControlFlow::Continue(())),
                };
                let id = EnvelopeId::decode_key(name)?;
                Ok(visit(&load_envelope(tx, &base, id)?))
            })
        })
    }

    /// The share `user` already took, as a receipt. `None` if they hold none.
    pub fn claim_of(&self, id: EnvelopeId, user: UserId) -> Result<Option<ClaimReceipt>> {
        self.store.view(|tx| {
            let base = envelope_bucket(tx, id)?;
            let claimants = tx.require_bucket(&schema::claimants(id))?;
            if !tx.contains(&claimants, &user.encode_key())? {
                return Ok(None);
            }

            let envelope = load_envelope(tx, &base, id)?;
            let claimed = claimed_count(tx, &base)?;
            let share_bucket = tx.require_bucket(&schema::shares(id))?;

            let mut found = None;
            tx.for_each_child(&share_bucket, None, Order::Ascending, |_, child| {
                let share: Share = decode_value(child)?;
                match share.claimant.as_ref().map(|claimant| claimant.user) {
                    Some(owner) if owner == user => {
                        found = Some(share);
                        Ok(ControlFlow::Break(()))
                    }
                    Some(_) => Ok(ControlFlow::Continue(())),
                    None => Ok(ControlFlow::Break(())),
                }
            })?;

            Ok(found.map(|share| ClaimReceipt {
                envelope_id: id,
                sender: envelope.sender,
                asset: envelope.asset,
                index: share.index,
                amount: share.amount,
                remaining: envelope.number - claimed,
            }))
        })
    }

    /// True if `user` took a share of the envelope
    pub fn is_claimed(&self, id: EnvelopeId, user: UserId) -> Result<bool> {
        self.store.view(|tx| match tx.bucket(&schema::claimants(id))? {
            Some(claimants) => tx.contains(&claimants, &user.encode_key()),
            None => Ok(false),
        })
    }
}

fn share_index(position: usize) -> Result<u32> {
    u32::try_from(position + 1)
        .map_err(|_| Error::InvalidEnvelope("too many shares".to_string()))
}

fn allocate_id(tx: &mut WriteTxn<'_>) -> Result<EnvelopeId> {
    let root = tx.ensure_bucket(&schema::envelopes())?;
    if tx.sequence(&root)? < ENVELOPE_ID_OFFSET {
        tx.set_sequence(&root, ENVELOPE_ID_OFFSET)?;
    }
    Ok(EnvelopeId(tx.next_sequence(&root)?))
}

fn assign_serial_number(tx: &mut WriteTxn<'_>, id: EnvelopeId) -> Result<String> {
    let bucket = tx.ensure_bucket(&schema::serial_numbers())?;
    let mut rng = rand::thread_rng();

    let sn = loop {
        let candidate = format!("{:016x}", rng.gen::<u64>());
        if !tx.contains(&bucket, candidate.as_bytes())? {
            break candidate;
        }
        tracing::debug!(envelope_id = %id, "Serial number collision, drawing again");
    };

    tx.put(&bucket, sn.as_bytes(), &id.encode_key())?;
    Ok(sn)
}

/// Pending → history, only if still pending
fn move_to_history(tx: &mut WriteTxn<'_>, sender: UserId, id: EnvelopeId) -> Result<bool> {
    let pending = match tx.bucket(&schema::user_index(IndexKind::Pending, sender))? {
        Some(pending) => pending,
        None => return Ok(false),
    };
    if !tx.delete(&pending, &id.encode_key())? {
        return Ok(false);
    }

    let history = tx.ensure_bucket(&schema::user_index(IndexKind::History, sender))?;
    tx.put(&history, &id.encode_key(), &[])?;
    Ok(true)
}

fn envelope_bucket<R: KvRead>(tx: &R, id: EnvelopeId) -> Result<Bucket> {
    tx.bucket(&schema::envelope(id))?
        .ok_or_else(|| Error::NotFound(format!("envelope {}", id)))
}

fn load_envelope<R: KvRead>(tx: &R, base: &Bucket, id: EnvelopeId) -> Result<Envelope> {
    tx.get_record(base, KEY_BASE)?
        .ok_or_else(|| Error::NotFound(format!("envelope {}", id)))
}

fn claimed_count<R: KvRead>(tx: &R, base: &Bucket) -> Result<u32> {
    match tx.get(base, KEY_SEQ)? {
        Some(bytes) => u32::decode_key(&bytes),
        None => Ok(0),
    }
}

fn decode_value<T: serde::de::DeserializeOwned>(child: Child) -> Result<T> {
    match child {
        Child::Value(bytes) => Ok(bincode::deserialize(&bytes)?),
        Child::Bucket(_) => Err(Error::Storage("Unexpected nested bucket".to_string())),
    }
}
