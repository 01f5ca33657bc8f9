//! Property-based tests for ledger and envelope invariants
//!
//! These tests use proptest to verify critical invariants:
//! - Conservation: lock/unlock never change `amount + locked`
//! - Exact splits: Σ shares == envelope total
//! - One claim per user, even under concurrent claims
//! - Pagination bounds on the sender indices

use luckymoney_core::{
    storage::Store,
    types::{Asset, Distribution, EnvelopeId, IndexKind, NewEnvelope, UserId},
    AccountLedger, Config, EnvelopeState, Error, LuckyMoney,
};
use proptest::prelude::*;
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::sync::Arc;
use tempfile::TempDir;

#[derive(Debug, Clone)]
enum Op {
    Deposit(i64),
    Lock(i64),
    Unlock(i64),
}

/// Strategy for generating ledger operations (amounts in cents)
fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (1i64..10_000).prop_map(Op::Deposit),
        (1i64..10_000).prop_map(Op::Lock),
        (1i64..10_000).prop_map(Op::Unlock),
    ]
}

/// Strategy for generating share amounts at precision 2
fn shares_strategy() -> impl Strategy<Value = Vec<Decimal>> {
    prop::collection::vec(1i64..5_000, 1..20)
        .prop_map(|cents| cents.into_iter().map(|c| Decimal::new(c, 2)).collect())
}

fn test_config(temp_dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.data_dir = temp_dir.path().to_path_buf();
    config.rocksdb.sync_writes = false;
    config
}

/// Create test service with temp directory
fn create_test_service() -> (LuckyMoney, TempDir) {
    let temp_dir = tempfile::tempdir().unwrap();
    let service = LuckyMoney::open(&test_config(&temp_dir)).unwrap();
    (service, temp_dir)
}

fn cny() -> Asset {
    Asset::new("CNY")
}

fn dec(s: &str) -> Decimal {
    s.parse().unwrap()
}

fn envelope_request(sender: i64, number: u32, distribution: Distribution) -> NewEnvelope {
    NewEnvelope {
        sender: UserId(sender),
        sender_name: "sender".to_string(),
        asset: cny(),
        number,
        distribution,
        message: "gong xi fa cai".to_string(),
    }
}

fn fixed_oracle(
    shares: Vec<Decimal>,
) -> impl Fn(Decimal, u32, u32) -> luckymoney_core::Result<Vec<Decimal>> + Send + Sync {
    move |_, _, _| Ok(shares.clone())
}

fn unused_oracle(_: Decimal, _: u32, _: u32) -> luckymoney_core::Result<Vec<Decimal>> {
    Err(Error::Other("oracle not expected".to_string()))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(20))]

    /// Property: `amount + locked` changes only through deposits and never
    /// goes negative
    #[test]
    fn prop_lock_unlock_conserve_total(ops in prop::collection::vec(op_strategy(), 1..40)) {
        let (service, _temp) = create_test_service();
        let ledger = service.ledger();
        let user = UserId(1);
        let mut deposited = Decimal::ZERO;

        for op in ops {
            let before = ledger.balance(user, &cny()).unwrap();
            let result = match op {
                Op::Deposit(c) => {
                    let amount = Decimal::new(c, 2);
                    let result = ledger.deposit(user, &cny(), amount);
                    if result.is_ok() {
                        deposited += amount;
                    }
                    result
                }
                Op::Lock(c) => ledger.lock(user, &cny(), Decimal::new(c, 2)),
                Op::Unlock(c) => ledger.unlock(user, &cny(), Decimal::new(c, 2)),
            };
            let after = ledger.balance(user, &cny()).unwrap();

            if result.is_err() {
                // Rejected operations leave the account untouched
                prop_assert_eq!(&before, &after);
            }
            prop_assert!(after.amount >= Decimal::ZERO);
            prop_assert!(after.locked >= Decimal::ZERO);
            prop_assert_eq!(after.total(), deposited);
        }
    }

    /// Property: claimed shares add up to the envelope total, and best/worst
    /// point at the first extreme
    #[test]
    fn prop_split_sums_to_total(shares in shares_strategy()) {
        let (service, _temp) = create_test_service();
        let total: Decimal = shares.iter().copied().sum();
        let number = shares.len() as u32;

        service.ledger().deposit(UserId(1), &cny(), total).unwrap();
        let envelope = service
            .create_envelope(
                &envelope_request(1, number, Distribution::Random { total }),
                &fixed_oracle(shares.clone()),
            )
            .unwrap();

        for user in 0..number {
            service
                .claim(envelope.id, UserId(100 + i64::from(user)), "claimant")
                .unwrap();
        }

        let history = service.envelopes().claim_history(envelope.id).unwrap();
        prop_assert_eq!(history.len(), shares.len());
        let claimed: Decimal = history.iter().map(|share| share.amount).sum();
        prop_assert_eq!(claimed, total);

        let status = service.envelopes().get(envelope.id).unwrap();
        prop_assert_eq!(status.state(), EnvelopeState::Exhausted);
        prop_assert_eq!(status.envelope.received, total);

        let max = shares.iter().copied().max().unwrap();
        let min = shares.iter().copied().min().unwrap();
        let first_max = shares.iter().position(|s| *s == max).unwrap() as u32 + 1;
        let first_min = shares.iter().position(|s| *s == min).unwrap() as u32 + 1;
        let (best, worst) = service.envelopes().best_and_worst(envelope.id).unwrap();
        prop_assert_eq!(best.index, first_max);
        prop_assert_eq!(worst.index, first_min);

        // Sender's locked funds were fully paid out
        let sender = service.ledger().balance(UserId(1), &cny()).unwrap();
        prop_assert_eq!(sender.locked, Decimal::ZERO);
    }

    /// Property: any offset/limit returns the matching slice and the full total
    #[test]
    fn prop_collection_pagination(count in 1usize..12, offset in 0usize..15, limit in 1usize..15, reverse in any::<bool>()) {
        let (service, _temp) = create_test_service();
        service
            .ledger()
            .deposit(UserId(1), &cny(), Decimal::new(100, 0))
            .unwrap();

        let mut ids = Vec::new();
        for _ in 0..count {
            let envelope = service
                .create_envelope(
                    &envelope_request(1, 1, Distribution::Equal { per_share: dec("1") }),
                    &unused_oracle,
                )
                .unwrap();
            ids.push(envelope.id);
        }
        if reverse {
            ids.reverse();
        }

        let page = service
            .envelopes()
            .collection(UserId(1), IndexKind::Pending, offset, limit, reverse)
            .unwrap();

        let expected: Vec<EnvelopeId> = ids.iter().copied().skip(offset).take(limit).collect();
        prop_assert_eq!(page.items, expected);
        prop_assert_eq!(page.total, count);
    }
}

#[test]
fn test_concurrent_claims_one_share_per_user() {
    let (service, _temp) = create_test_service();
    service
        .ledger()
        .deposit(UserId(1), &cny(), Decimal::new(100, 0))
        .unwrap();

    let envelope = service
        .create_envelope(
            &envelope_request(1, 5, Distribution::Equal { per_share: dec("1") }),
            &unused_oracle,
        )
        .unwrap();

    // 8 users, each racing from 3 threads, for 5 shares
    let results: Vec<(i64, Result<u32, String>)> = std::thread::scope(|scope| {
        let workers: Vec<_> = (0..24)
            .map(|i| {
                let service = service.clone();
                let user = 10 + (i % 8) as i64;
                scope.spawn(move || {
                    let result = service
                        .claim(envelope.id, UserId(user), "racer")
                        .map(|receipt| receipt.index)
                        .map_err(|e| e.kind().to_string());
                    (user, result)
                })
            })
            .collect();
        workers.into_iter().map(|w| w.join().unwrap()).collect()
    });

    let winners: Vec<i64> = results
        .iter()
        .filter(|(_, r)| r.is_ok())
        .map(|(user, _)| *user)
        .collect();
    let unique: HashSet<i64> = winners.iter().copied().collect();
    assert_eq!(winners.len(), 5);
    assert_eq!(unique.len(), 5);

    let indices: HashSet<u32> = results.iter().filter_map(|(_, r)| r.clone().ok()).collect();
    assert_eq!(indices, (1..=5).collect());

    for (_, result) in &results {
        if let Err(kind) = result {
            assert!(kind == "already_claimed" || kind == "nothing_left", "{}", kind);
        }
    }

    let status = service.envelopes().get(envelope.id).unwrap();
    assert_eq!(status.claimed, 5);
    assert_eq!(status.envelope.received, dec("5"));

    let credited: Decimal = unique
        .iter()
        .map(|user| service.ledger().balance(UserId(*user), &cny()).unwrap().amount)
        .sum();
    assert_eq!(credited, dec("5"));
}

/// Equal split: 10.00 in 5 shares, fifth claim moves the envelope to history
#[test]
fn test_scenario_equal_split_exhaustion() {
    let (service, _temp) = create_test_service();
    service.ledger().deposit(UserId(1), &cny(), dec("10.00")).unwrap();

    let envelope = service
        .create_envelope(
            &envelope_request(1, 5, Distribution::Equal { per_share: dec("2.00") }),
            &unused_oracle,
        )
        .unwrap();
    assert_eq!(envelope.amount, dec("10.00"));

    for (i, user) in (2..=6).enumerate() {
        let receipt = service.claim(envelope.id, UserId(user), "user").unwrap();
        assert_eq!(receipt.index, i as u32 + 1);
        assert_eq!(receipt.amount, dec("2.00"));
        assert_eq!(receipt.remaining, 4 - i as u32);
    }

    let status = service.envelopes().get(envelope.id).unwrap();
    assert_eq!(status.envelope.received, dec("10.00"));
    assert_eq!(status.envelope.received.to_string(), "10.00");
    assert_eq!(status.state(), EnvelopeState::Exhausted);

    let pending = service
        .envelopes()
        .collection(UserId(1), IndexKind::Pending, 0, 10, false)
        .unwrap();
    let history = service
        .envelopes()
        .collection(UserId(1), IndexKind::History, 0, 10, false)
        .unwrap();
    assert_eq!(pending.total, 0);
    assert_eq!(history.items, vec![envelope.id]);

    let err = service.claim(envelope.id, UserId(7), "late").unwrap_err();
    assert!(matches!(err, Error::NothingLeft));
}

/// Random split: oracle returns [0.30, 0.50, 0.20]
#[test]
fn test_scenario_random_split_best_and_worst() {
    let (service, _temp) = create_test_service();
    service.ledger().deposit(UserId(1), &cny(), dec("1.00")).unwrap();

    let envelope = service
        .create_envelope(
            &envelope_request(1, 3, Distribution::Random { total: dec("1.00") }),
            &fixed_oracle(vec![dec("0.30"), dec("0.50"), dec("0.20")]),
        )
        .unwrap();

    let (best, worst) = service.envelopes().best_and_worst(envelope.id).unwrap();
    assert_eq!(best.index, 2);
    assert_eq!(best.amount, dec("0.50"));
    assert_eq!(worst.index, 3);
    assert_eq!(worst.amount, dec("0.20"));
}

/// Double claim: second attempt fails, counter unchanged
#[test]
fn test_scenario_double_claim() {
    let (service, _temp) = create_test_service();
    service.ledger().deposit(UserId(1), &cny(), dec("3")).unwrap();

    let envelope = service
        .create_envelope(
            &envelope_request(1, 3, Distribution::Equal { per_share: dec("1") }),
            &unused_oracle,
        )
        .unwrap();

    service.claim(envelope.id, UserId(2), "bob").unwrap();
    let err = service.claim(envelope.id, UserId(2), "bob").unwrap_err();
    assert!(matches!(err, Error::AlreadyClaimed));

    assert_eq!(service.envelopes().get(envelope.id).unwrap().claimed, 1);
    assert_eq!(
        service.ledger().balance(UserId(2), &cny()).unwrap().amount,
        dec("1")
    );
}

/// Lock 50 of 100; a failed create unlocks it again
#[test]
fn test_scenario_failed_create_unlocks() {
    let (service, _temp) = create_test_service();
    let user = UserId(1);
    service.ledger().deposit(user, &cny(), dec("100")).unwrap();

    let reservation = service.ledger().reserve(user, &cny(), dec("50")).unwrap();
    let account = service.ledger().balance(user, &cny()).unwrap();
    assert_eq!((account.amount, account.locked), (dec("50"), dec("50")));
    service.ledger().cancel_reservation(reservation.id).unwrap();

    // Same flow through the service: the oracle breaks the split
    let bad_oracle = fixed_oracle(vec![dec("25"), dec("24")]);
    let err = service
        .create_envelope(
            &envelope_request(1, 2, Distribution::Random { total: dec("50") }),
            &bad_oracle,
        )
        .unwrap_err();
    assert!(matches!(err, Error::InvalidSplit(_)));

    let account = service.ledger().balance(user, &cny()).unwrap();
    assert_eq!(account.amount, dec("100"));
    assert_eq!(account.locked, Decimal::ZERO);
    assert!(service.ledger().pending_reservations().unwrap().is_empty());
}

/// Expire with 2 of 5 claimed: history, then Expired rather than NothingLeft
#[test]
fn test_scenario_expire_partially_claimed() {
    let (service, _temp) = create_test_service();
    service.ledger().deposit(UserId(1), &cny(), dec("5")).unwrap();

    let envelope = service
        .create_envelope(
            &envelope_request(1, 5, Distribution::Equal { per_share: dec("1") }),
            &unused_oracle,
        )
        .unwrap();
    service.claim(envelope.id, UserId(2), "b").unwrap();
    service.claim(envelope.id, UserId(3), "c").unwrap();

    service.expire(envelope.id).unwrap();

    let history = service
        .envelopes()
        .collection(UserId(1), IndexKind::History, 0, 10, false)
        .unwrap();
    assert_eq!(history.items, vec![envelope.id]);

    let err = service.claim(envelope.id, UserId(4), "d").unwrap_err();
    assert!(matches!(err, Error::Expired));

    let status = service.envelopes().get(envelope.id).unwrap();
    assert_eq!(status.state(), EnvelopeState::Expired);
    assert_eq!(status.claimed, 2);

    // Unclaimed remainder went back to the sender
    let sender = service.ledger().balance(UserId(1), &cny()).unwrap();
    assert_eq!(sender.amount, dec("3"));
    assert_eq!(sender.locked, Decimal::ZERO);
}

#[test]
fn test_backup_restore_round_trip() {
    let (service, _temp) = create_test_service();
    service.ledger().deposit(UserId(1), &cny(), dec("10")).unwrap();
    let envelope = service
        .create_envelope(
            &envelope_request(1, 2, Distribution::Equal { per_share: dec("2") }),
            &unused_oracle,
        )
        .unwrap();
    service.claim(envelope.id, UserId(2), "b").unwrap();

    let mut snapshot = Vec::new();
    let size = service.backup(&mut snapshot).unwrap();
    assert_eq!(size, snapshot.len() as u64);

    let restore_dir = tempfile::tempdir().unwrap();
    let config = test_config(&restore_dir);
    let store = Arc::new(Store::open(&config).unwrap());
    store.restore(snapshot.as_slice()).unwrap();

    let restored = LuckyMoney::new(store.clone(), &config.envelope).unwrap();
    assert_eq!(
        restored.envelopes().get(envelope.id).unwrap(),
        service.envelopes().get(envelope.id).unwrap()
    );
    assert_eq!(restored.envelopes().id_by_sn(&envelope.sn).unwrap(), envelope.id);

    let ledger = AccountLedger::new(store);
    assert_eq!(
        ledger.balance(UserId(1), &cny()).unwrap(),
        service.ledger().balance(UserId(1), &cny()).unwrap()
    );
    assert_eq!(ledger.versions(UserId(2), 0, 10, false).unwrap().total, 1);

    // Restored IDs continue after the last allocated one
    let next = restored
        .create_envelope(
            &envelope_request(1, 1, Distribution::Equal { per_share: dec("1") }),
            &unused_oracle,
        )
        .unwrap();
    assert_eq!(next.id, envelope.id.next());
}
