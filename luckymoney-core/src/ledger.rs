//! Account ledger
//!
//! Per-(user, asset) available and locked balances with an append-only
//! version log per user. Every operation is one writer transaction on the
//! shared [`Store`].
//!
//! # Example
//!
//! ```no_run
//! use luckymoney_core::{AccountLedger, Asset, Config, Store, UserId};
//! use rust_decimal::Decimal;
//! use std::sync::Arc;
//!
//! fn main() -> luckymoney_core::Result<()> {
//!     let store = Arc::new(Store::open(&Config::default())?);
//!     let ledger = AccountLedger::new(store);
//!
//!     let cny = Asset::new("CNY");
//!     ledger.deposit(UserId(1), &cny, Decimal::new(10000, 2))?;
//!     ledger.lock(UserId(1), &cny, Decimal::new(5000, 2))?;
//!
//!     Ok(())
//! }
//! ```

use crate::{
    schema::{self, Key},
    storage::{Child, KvRead, Order, WriteTxn},
    types::{
        Account, Asset, DepositRecord, EnvelopeId, Page, Reason, Reservation, ReservationStatus,
        UserId, Version,
    },
    Error, Result, Store,
};
use chrono::Utc;
use rust_decimal::Decimal;
use std::ops::ControlFlow;
use std::sync::Arc;
use uuid::Uuid;

/// Balance and lock bookkeeping
#[derive(Debug, Clone)]
pub struct AccountLedger {
    store: Arc<Store>,
}

impl AccountLedger {
    /// Create ledger over a shared store
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Administrative deposit. Creates the account if needed.
    pub fn deposit(&self, user: UserId, asset: &Asset, amount: Decimal) -> Result<Account> {
        ensure_positive(amount)?;

        let (account, version) = self
            .store
            .update(|tx| credit(tx, user, asset, amount, Reason::System, None))?;

        tracing::info!(
            user = %user,
            asset = %asset,
            amount = %amount,
            version,
            "Deposit applied"
        );

        Ok(account)
    }

    /// External deposit; `txid` credits at most once
    pub fn deposit_external(
        &self,
        txid: &str,
        user: UserId,
        asset: &Asset,
        amount: Decimal,
    ) -> Result<Account> {
        ensure_positive(amount)?;

        let account = self.store.update(|tx| {
            let deposits = tx.ensure_bucket(&schema::deposits())?;
            if tx.contains(&deposits, txid.as_bytes())? {
                return Err(Error::DuplicateDeposit(txid.to_string()));
            }

            let (account, version) = credit(tx, user, asset, amount, Reason::Deposit, None)?;
            let record = DepositRecord {
                txid: txid.to_string(),
                user,
                asset: asset.clone(),
                amount,
                version,
                timestamp: Utc::now(),
            };
            tx.put_record(&deposits, txid.as_bytes(), &record)?;

            Ok(account)
        })?;

        tracing::info!(txid, user = %user, asset = %asset, amount = %amount, "External deposit applied");

        Ok(account)
    }

    /// True if the external deposit was already applied
    pub fn has_deposit(&self, txid: &str) -> Result<bool> {
        self.store.view(|tx| match tx.bucket(&schema::deposits())? {
            Some(deposits) => tx.contains(&deposits, txid.as_bytes()),
            None => Ok(false),
        })
    }

    /// Current account, `None` if never touched
    pub fn get_account(&self, user: UserId, asset: &Asset) -> Result<Option<Account>> {
        self.store.view(|tx| load_account(tx, user, asset))
    }

    /// Current account, zero if never touched
    pub fn balance(&self, user: UserId, asset: &Asset) -> Result<Account> {
        Ok(self
            .get_account(user, asset)?
            .unwrap_or_else(|| Account::zero(user, asset.clone())))
    }

    /// Move `amount` from available to locked
    pub fn lock(&self, user: UserId, asset: &Asset, amount: Decimal) -> Result<Account> {
        ensure_positive(amount)?;
        let account = self.store.update(|tx| lock_funds(tx, user, asset, amount))?;
        tracing::debug!(user = %user, asset = %asset, amount = %amount, "Funds locked");
        Ok(account)
    }

    /// Move `amount` from locked back to available
    pub fn unlock(&self, user: UserId, asset: &Asset, amount: Decimal) -> Result<Account> {
        ensure_positive(amount)?;
        let account = self.store.update(|tx| unlock_funds(tx, user, asset, amount))?;
        tracing::debug!(user = %user, asset = %asset, amount = %amount, "Funds unlocked");
        Ok(account)
    }

    /// Settle claimed share `index` of `envelope`: debit the sender's locked
    /// funds and credit the claimant's available funds. Returns the
    /// claimant's account.
    ///
    /// Each share settles at most once; repeating a settled transfer changes
    /// nothing.
    pub fn transfer_locked(
        &self,
        from: UserId,
        to: UserId,
        asset: &Asset,
        amount: Decimal,
        envelope: EnvelopeId,
        index: u32,
    ) -> Result<Account> {
        ensure_positive(amount)?;

        let (account, settled) = self.store.update(|tx| {
            let settlements = tx.ensure_bucket(&schema::settlements(envelope))?;
            if tx.contains(&settlements, &index.encode_key())? {
                let account = load_account(&*tx, to, asset)?
                    .unwrap_or_else(|| Account::zero(to, asset.clone()));
                return Ok((account, false));
            }

            let sender = debit_locked(tx, from, asset, amount)?;
            append_version(
                tx,
                from,
                asset,
                Decimal::ZERO,
                -amount,
                sender.amount,
                Reason::Payout,
                Some(envelope),
            )?;

            let (account, version) = credit(tx, to, asset, amount, Reason::Receive, Some(envelope))?;
            tx.put(&settlements, &index.encode_key(), &version.encode_key())?;

            Ok((account, true))
        })?;

        if settled {
            tracing::debug!(
                from = %from,
                to = %to,
                asset = %asset,
                amount = %amount,
                envelope_id = %envelope,
                index,
                "Locked funds transferred"
            );
        }

        Ok(account)
    }

    /// True once share `index` of `envelope` has been credited
    pub fn is_settled(&self, envelope: EnvelopeId, index: u32) -> Result<bool> {
        self.store.view(|tx| match tx.bucket(&schema::settlements(envelope))? {
            Some(settlements) => tx.contains(&settlements, &index.encode_key()),
            None => Ok(false),
        })
    }

    /// Return unclaimed envelope funds to the sender.
    ///
    /// An envelope is refunded at most once; repeating a completed refund
    /// changes nothing.
    pub fn refund(
        &self,
        user: UserId,
        asset: &Asset,
        amount: Decimal,
        envelope: EnvelopeId,
    ) -> Result<Account> {
        ensure_positive(amount)?;

        let (account, refunded) = self.store.update(|tx| {
            let refunds = tx.ensure_bucket(&schema::refunds())?;
            if tx.contains(&refunds, &envelope.encode_key())? {
                let account = load_account(&*tx, user, asset)?
                    .unwrap_or_else(|| Account::zero(user, asset.clone()));
                return Ok((account, false));
            }

            let account = unlock_funds(tx, user, asset, amount)?;
            let version = append_version(
                tx,
                user,
                asset,
                amount,
                -amount,
                account.amount,
                Reason::Refund,
                Some(envelope),
            )?;
            tx.put(&refunds, &envelope.encode_key(), &version.encode_key())?;

            Ok((account, true))
        })?;

        if refunded {
            tracing::info!(user = %user, asset = %asset, amount = %amount, envelope_id = %envelope, "Refund applied");
        }

        Ok(account)
    }

    /// True once the envelope's unclaimed remainder has been refunded
    pub fn is_refunded(&self, envelope: EnvelopeId) -> Result<bool> {
        self.store.view(|tx| match tx.bucket(&schema::refunds())? {
            Some(refunds) => tx.contains(&refunds, &envelope.encode_key()),
            None => Ok(false),
        })
    }

    /// One page of a user's version log
    pub fn versions(
        &self,
        user: UserId,
        offset: usize,
        limit: usize,
        reverse: bool,
    ) -> Result<Page<Version>> {
        self.store.view(|tx| {
            let bucket = match tx.bucket(&schema::versions(user))? {
                Some(bucket) => bucket,
                None => return Ok(Page::empty(0)),
            };
            tx.page(&bucket, offset, limit, Order::from_reverse(reverse), |_, child| {
                decode_child(child)
            })
        })
    }

    /// Lock funds for an envelope about to be created and record the
    /// reservation in the same transaction
    pub fn reserve(&self, user: UserId, asset: &Asset, amount: Decimal) -> Result<Reservation> {
        ensure_positive(amount)?;

        let reservation = self.store.update(|tx| {
            lock_funds(tx, user, asset, amount)?;

            let now = Utc::now();
            let reservation = Reservation {
                id: Uuid::now_v7(),
                user,
                asset: asset.clone(),
                amount,
                status: ReservationStatus::Pending,
                envelope: None,
                created_at: now,
                updated_at: now,
            };
            let bucket = tx.ensure_bucket(&schema::reservations())?;
            tx.put_record(&bucket, reservation.id.as_bytes(), &reservation)?;

            Ok(reservation)
        })?;

        tracing::info!(
            reservation_id = %reservation.id,
            user = %user,
            asset = %asset,
            amount = %amount,
            "Funds reserved"
        );

        Ok(reservation)
    }

    /// Bind a pending reservation to its envelope and write the `Give` version
    pub fn commit_reservation(&self, id: Uuid, envelope: EnvelopeId) -> Result<Reservation> {
        let reservation = self
            .store
            .update(|tx| commit_reservation_in(tx, id, envelope))?;

        tracing::info!(reservation_id = %id, envelope_id = %envelope, "Reservation committed");

        Ok(reservation)
    }

    /// Release a pending reservation. Cancelling twice is a no-op.
    pub fn cancel_reservation(&self, id: Uuid) -> Result<Reservation> {
        let (reservation, released) = self.store.update(|tx| {
            let mut reservation = load_reservation(&*tx, id)?;
            match reservation.status {
                ReservationStatus::Cancelled => return Ok((reservation, false)),
                ReservationStatus::Committed => {
                    return Err(Error::InvalidReservationState(format!(
                        "{} is committed, cannot cancel",
                        id
                    )))
                }
                ReservationStatus::Pending => {}
            }

            unlock_funds(tx, reservation.user, &reservation.asset, reservation.amount)?;

            reservation.status = ReservationStatus::Cancelled;
            reservation.updated_at = Utc::now();
            store_reservation(tx, &reservation)?;

            Ok((reservation, true))
        })?;

        if released {
            tracing::info!(
                reservation_id = %id,
                user = %reservation.user,
                amount = %reservation.amount,
                "Reservation cancelled"
            );
        }

        Ok(reservation)
    }

    /// Reservation by ID
    pub fn get_reservation(&self, id: Uuid) -> Result<Option<Reservation>> {
        self.store.view(|tx| match tx.bucket(&schema::reservations())? {
            Some(bucket) => tx.get_record(&bucket, id.as_bytes()),
            None => Ok(None),
        })
    }

    /// Reservations neither committed nor cancelled, oldest first
    pub fn pending_reservations(&self) -> Result<Vec<Reservation>> {
        self.store.view(|tx| {
            let bucket = match tx.bucket(&schema::reservations())? {
                Some(bucket) => bucket,
                None => return Ok(Vec::new()),
            };

            let mut pending = Vec::new();
            tx.for_each_child(&bucket, None, Order::Ascending, |_, child| {
                let reservation: Reservation = decode_child(child)?;
                if reservation.status == ReservationStatus::Pending {
                    pending.push(reservation);
                }
                Ok(ControlFlow::Continue(()))
            })?;

            Ok(pending)
        })
    }
}

/// Commit a pending reservation inside an open writer transaction
pub(crate) fn commit_reservation_in(
    tx: &mut WriteTxn<'_>,
    id: Uuid,
    envelope: EnvelopeId,
) -> Result<Reservation> {
    let mut reservation = load_reservation(&*tx, id)?;
    if reservation.status != ReservationStatus::Pending {
        return Err(Error::InvalidReservationState(format!(
            "{} is {:?}, cannot commit",
            id, reservation.status
        )));
    }

    let account = load_account(&*tx, reservation.user, &reservation.asset)?
        .unwrap_or_else(|| Account::zero(reservation.user, reservation.asset.clone()));
    append_version(
        tx,
        reservation.user,
        &reservation.asset,
        -reservation.amount,
        reservation.amount,
        account.amount,
        Reason::Give,
        Some(envelope),
    )?;

    reservation.status = ReservationStatus::Committed;
    reservation.envelope = Some(envelope);
    reservation.updated_at = Utc::now();
    store_reservation(tx, &reservation)?;

    Ok(reservation)
}

fn ensure_positive(amount: Decimal) -> Result<()> {
    if amount <= Decimal::ZERO {
        return Err(Error::InvalidAmount(amount));
    }
    Ok(())
}

fn decode_child<T: serde::de::DeserializeOwned>(child: Child) -> Result<T> {
    match child {
        Child::Value(bytes) => Ok(bincode::deserialize(&bytes)?),
        Child::Bucket(_) => Err(Error::Storage("Unexpected nested bucket".to_string())),
    }
}

fn load_account<R: KvRead>(tx: &R, user: UserId, asset: &Asset) -> Result<Option<Account>> {
    match tx.bucket(&schema::accounts(user))? {
        Some(bucket) => tx.get_record(&bucket, schema::asset_key(asset)),
        None => Ok(None),
    }
}

fn store_account(tx: &mut WriteTxn<'_>, account: &Account) -> Result<()> {
    let bucket = tx.ensure_bucket(&schema::accounts(account.user))?;
    tx.put_record(&bucket, schema::asset_key(&account.asset), account)
}

fn load_reservation<R: KvRead>(tx: &R, id: Uuid) -> Result<Reservation> {
    let bucket = tx
        .bucket(&schema::reservations())?
        .ok_or_else(|| Error::ReservationNotFound(id.to_string()))?;
    tx.get_record(&bucket, id.as_bytes())?
        .ok_or_else(|| Error::ReservationNotFound(id.to_string()))
}

fn store_reservation(tx: &mut WriteTxn<'_>, reservation: &Reservation) -> Result<()> {
    let bucket = tx.ensure_bucket(&schema::reservations())?;
    tx.put_record(&bucket, reservation.id.as_bytes(), reservation)
}

/// Increase available funds and log the version
fn credit(
    tx: &mut WriteTxn<'_>,
    user: UserId,
    asset: &Asset,
    amount: Decimal,
    reason: Reason,
    envelope: Option<EnvelopeId>,
) -> Result<(Account, u64)> {
    let mut account =
        load_account(&*tx, user, asset)?.unwrap_or_else(|| Account::zero(user, asset.clone()));
    account.amount = account
        .amount
        .checked_add(amount)
        .ok_or(Error::InvalidAmount(amount))?;
    store_account(tx, &account)?;

    let version = append_version(
        tx,
        user,
        asset,
        amount,
        Decimal::ZERO,
        account.amount,
        reason,
        envelope,
    )?;

    Ok((account, version))
}

fn lock_funds(tx: &mut WriteTxn<'_>, user: UserId, asset: &Asset, amount: Decimal) -> Result<Account> {
    let mut account =
        load_account(&*tx, user, asset)?.unwrap_or_else(|| Account::zero(user, asset.clone()));
    if account.amount < amount {
        return Err(Error::InsufficientFunds {
            needed: amount,
            available: account.amount,
        });
    }

    account.amount -= amount;
    account.locked = account
        .locked
        .checked_add(amount)
        .ok_or(Error::InvalidAmount(amount))?;
    store_account(tx, &account)?;

    Ok(account)
}

fn unlock_funds(
    tx: &mut WriteTxn<'_>,
    user: UserId,
    asset: &Asset,
    amount: Decimal,
) -> Result<Account> {
    let mut account =
        load_account(&*tx, user, asset)?.unwrap_or_else(|| Account::zero(user, asset.clone()));
    if account.locked < amount {
        return Err(Error::InsufficientLocked {
            needed: amount,
            locked: account.locked,
        });
    }

    account.locked -= amount;
    account.amount = account
        .amount
        .checked_add(amount)
        .ok_or(Error::InvalidAmount(amount))?;
    store_account(tx, &account)?;

    Ok(account)
}

fn debit_locked(tx: &mut WriteTxn<'_>, user: UserId, asset: &Asset, amount: Decimal) -> Result<Account> {
    let mut account =
        load_account(&*tx, user, asset)?.unwrap_or_else(|| Account::zero(user, asset.clone()));
    if account.locked < amount {
        return Err(Error::InsufficientLocked {
            needed: amount,
            locked: account.locked,
        });
    }

    account.locked -= amount;
    store_account(tx, &account)?;

    Ok(account)
}

#[allow(clippy::too_many_arguments)]
fn append_version(
    tx: &mut WriteTxn<'_>,
    user: UserId,
    asset: &Asset,
    balance: Decimal,
    locked: Decimal,
    amount: Decimal,
    reason: Reason,
    envelope: Option<EnvelopeId>,
) -> Result<u64> {
    let bucket = tx.ensure_bucket(&schema::versions(user))?;
    let id = tx.next_sequence(&bucket)?;

    let version = Version {
        id,
        asset: asset.clone(),
        balance,
        locked,
        amount,
        reason,
        envelope,
        timestamp: Utc::now(),
    };
    tx.put_record(&bucket, &id.encode_key(), &version)?;

    Ok(id)
}
