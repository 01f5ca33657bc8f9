//! Orchestration of ledger and envelope engine
//!
//! Cross-component flows:
//!
//! - create: reserve (lock + reservation record) → split → persist envelope
//!   and commit the reservation in one transaction
//! - claim: assign share → credit claimant from the sender's locked funds
//! - expire: mark expired → refund the unclaimed remainder
//!
//! A failed create after the reserve cancels the reservation. A crash in
//! between leaves the reservation `Pending` with no envelope behind it, which
//! [`AccountLedger::pending_reservations`] exposes for reconciliation.
//!
//! Claim credits and refunds are recorded per share and per envelope, so a
//! step that failed after its envelope transaction committed is completed by
//! calling [`LuckyMoney::claim`] or [`LuckyMoney::expire`] again.

use crate::{
    config::EnvelopeConfig,
    envelope::EnvelopeEngine,
    ledger::{self, AccountLedger},
    metrics::Metrics,
    oracle::{smallest_unit, SplitOracle},
    schema::ENVELOPE_ID_OFFSET,
    types::{ClaimReceipt, Distribution, Envelope, EnvelopeId, EnvelopeStatus, NewEnvelope, UserId},
    Config, Error, Result, Store,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::io::Write;
use std::ops::ControlFlow;
use std::sync::Arc;
use uuid::Uuid;

/// Lucky money service
#[derive(Debug, Clone)]
pub struct LuckyMoney {
    store: Arc<Store>,
    ledger: AccountLedger,
    envelopes: EnvelopeEngine,
    config: EnvelopeConfig,
    metrics: Metrics,
}

impl LuckyMoney {
    /// Open the store described by `config` and build the service on it
    pub fn open(config: &Config) -> Result<Self> {
        config.validate()?;
        let store = Arc::new(Store::open(config)?);
        Self::new(store, &config.envelope)
    }

    /// Build the service over an already opened store
    pub fn new(store: Arc<Store>, config: &EnvelopeConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            ledger: AccountLedger::new(store.clone()),
            envelopes: EnvelopeEngine::new(store.clone(), config.precision)?,
            config: config.clone(),
            metrics: Metrics::new()?,
            store,
        })
    }

    /// Account ledger
    pub fn ledger(&self) -> &AccountLedger {
        &self.ledger
    }

    /// Envelope engine
    pub fn envelopes(&self) -> &EnvelopeEngine {
        &self.envelopes
    }

    /// Metrics
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Shared store
    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Lock the sender's funds and create the envelope.
    ///
    /// Random splits ask `oracle` for the share amounts; its output is
    /// validated before anything is persisted.
    pub fn create_envelope(
        &self,
        request: &NewEnvelope,
        oracle: &dyn SplitOracle,
    ) -> Result<Envelope> {
        let total = self.validate_request(request)?;

        let reservation = self.ledger.reserve(request.sender, &request.asset, total)?;

        let created = self.split(request, total, oracle).and_then(|shares| {
            self.envelopes.create_with(request, &shares, |tx, envelope| {
                ledger::commit_reservation_in(tx, reservation.id, envelope.id).map(|_| ())
            })
        });

        let envelope = match created {
            Ok(envelope) => envelope,
            Err(err) => {
                self.compensate(reservation.id, &err);
                return Err(err);
            }
        };

        tracing::info!(
            reservation_id = %reservation.id,
            envelope_id = %envelope.id,
            "Reservation committed"
        );

        self.metrics.record_envelope_created();
        Ok(envelope)
    }

    /// Claim the next share and credit it to the claimant.
    ///
    /// A claimant whose earlier claim took a share but was never credited is
    /// credited now instead of being rejected.
    pub fn claim(&self, id: EnvelopeId, user: UserId, name: &str) -> Result<ClaimReceipt> {
        let receipt = match self.envelopes.claim(id, user, name) {
            Ok(receipt) => receipt,
            Err(Error::AlreadyClaimed) => match self.uncredited_claim(id, user)? {
                Some(receipt) => {
                    tracing::warn!(
                        envelope_id = %id,
                        user = %user,
                        index = receipt.index,
                        "Completing credit for an earlier claim"
                    );
                    receipt
                }
                None => return Err(self.reject_claim(id, user, Error::AlreadyClaimed)),
            },
            Err(err) => return Err(self.reject_claim(id, user, err)),
        };

        if let Err(err) = self.ledger.transfer_locked(
            receipt.sender,
            user,
            &receipt.asset,
            receipt.amount,
            id,
            receipt.index,
        ) {
            tracing::error!(
                envelope_id = %id,
                user = %user,
                index = receipt.index,
                amount = %receipt.amount,
                error = %err,
                "Share claimed but credit failed"
            );
            return Err(err);
        }

        self.metrics.record_claim();
        Ok(receipt)
    }

    /// Expire the envelope and refund what is left to the sender.
    ///
    /// `None` if it was already expired. A refund that failed on an earlier
    /// call is retried either way.
    pub fn expire(&self, id: EnvelopeId) -> Result<Option<EnvelopeStatus>> {
        match self.envelopes.set_expired(id)? {
            Some(status) => {
                self.metrics.record_expired();
                self.refund_remainder(&status)?;
                Ok(Some(status))
            }
            None => {
                if !self.ledger.is_refunded(id)? {
                    self.refund_remainder(&self.envelopes.get(id)?)?;
                }
                Ok(None)
            }
        }
    }

    /// Expire every envelope created at least `expire_after_secs` before
    /// `now`, resuming after the stored watermark. Returns the number of
    /// envelopes expired by this call.
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let ttl = chrono::Duration::from_std(std::time::Duration::from_secs(
            self.config.expire_after_secs,
        ))
        .map_err(|e| Error::Config(format!("expire_after_secs out of range: {}", e)))?;

        let start = self
            .envelopes
            .latest_expired()?
            .map(EnvelopeId::next)
            .unwrap_or(EnvelopeId(ENVELOPE_ID_OFFSET + 1));

        // IDs grow with creation time, so the first envelope not yet due ends the scan
        let mut due = Vec::new();
        self.envelopes.for_each(start, |envelope| {
            match envelope.created_at.checked_add_signed(ttl) {
                Some(deadline) if deadline <= now => {
                    due.push(envelope.id);
                    ControlFlow::Continue(())
                }
                _ => ControlFlow::Break(()),
            }
        })?;

        let mut expired = 0;
        let mut last = None;
        let outcome = due.iter().try_for_each(|id| {
            if self.expire(*id)?.is_some() {
                expired += 1;
            }
            last = Some(*id);
            Ok::<(), Error>(())
        });

        if let Some(id) = last {
            self.envelopes.set_latest_expired(id)?;
        }
        outcome?;

        if expired > 0 {
            tracing::info!(expired, watermark = ?last.map(|id| id.0), "Expiry sweep finished");
        }

        Ok(expired)
    }

    /// Stream a database snapshot; returns bytes written
    pub fn backup<W: Write>(&self, writer: W) -> Result<u64> {
        self.store.backup(writer)
    }

    /// Check request bounds and return the envelope total
    fn validate_request(&self, request: &NewEnvelope) -> Result<Decimal> {
        if request.number == 0 || request.number > self.config.max_shares {
            return Err(Error::InvalidEnvelope(format!(
                "share count {} outside 1..={}",
                request.number, self.config.max_shares
            )));
        }

        if request.message.chars().count() > self.config.max_message_len {
            return Err(Error::InvalidEnvelope(format!(
                "message longer than {} characters",
                self.config.max_message_len
            )));
        }

        let amount = match request.distribution {
            Distribution::Equal { per_share } => per_share,
            Distribution::Random { total } => total,
        };
        if amount <= Decimal::ZERO {
            return Err(Error::InvalidAmount(amount));
        }

        let total = request
            .total()
            .ok_or_else(|| Error::InvalidEnvelope("total amount overflows".to_string()))?;

        let minimum = smallest_unit(self.config.precision) * Decimal::from(request.number);
        if total < minimum {
            return Err(Error::InvalidEnvelope(format!(
                "total {} cannot cover {} shares",
                total, request.number
            )));
        }

        Ok(total)
    }

    fn refund_remainder(&self, status: &EnvelopeStatus) -> Result<()> {
        let envelope = &status.envelope;
        let unclaimed = envelope.unclaimed();
        if unclaimed > Decimal::ZERO {
            self.ledger
                .refund(envelope.sender, &envelope.asset, unclaimed, envelope.id)?;
        }
        Ok(())
    }

    /// The user's share, if it was taken but never credited
    fn uncredited_claim(&self, id: EnvelopeId, user: UserId) -> Result<Option<ClaimReceipt>> {
        match self.envelopes.claim_of(id, user)? {
            Some(receipt) if !self.ledger.is_settled(id, receipt.index)? => Ok(Some(receipt)),
            _ => Ok(None),
        }
    }

    fn reject_claim(&self, id: EnvelopeId, user: UserId, err: Error) -> Error {
        self.metrics.record_claim_rejection(err.kind());
        tracing::debug!(envelope_id = %id, user = %user, reason = err.kind(), "Claim rejected");
        err
    }

    fn split(
        &self,
        request: &NewEnvelope,
        total: Decimal,
        oracle: &dyn SplitOracle,
    ) -> Result<Vec<Decimal>> {
        match request.distribution {
            Distribution::Equal { per_share } => Ok(vec![per_share; request.number as usize]),
            Distribution::Random { .. } => {
                oracle.generate(total, self.config.precision, request.number)
            }
        }
    }

    /// Best-effort release of a reservation after a failed create
    fn compensate(&self, reservation: Uuid, cause: &Error) {
        match self.ledger.cancel_reservation(reservation) {
            Ok(cancelled) => {
                self.metrics.record_compensation();
                tracing::warn!(
                    reservation_id = %reservation,
                    user = %cancelled.user,
                    amount = %cancelled.amount,
                    cause = %cause,
                    "Envelope creation failed, funds unlocked"
                );
            }
            Err(err) => {
                tracing::error!(
                    reservation_id = %reservation,
                    cause = %cause,
                    error = %err,
                    "Compensation failed, reservation left pending"
                );
            }
        }
    }
}
