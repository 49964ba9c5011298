//! Integration tests for the production fund engine
//!
//! These drive the public facade end to end: tier selection, lazy yield
//! accrual, claims, swap-remove closes, access control, relayed calls and
//! persistence.

use prodfund_core::{FundError, ManualClock, ParticipantId, ONE_UNIT, SECONDS_PER_DAY, SECONDS_PER_YEAR};
use prodfund_engine::{
    BalanceBook, CallContext, EngineEvent, EngineSettings, GlobalFundState, ProductionEngine,
    TrustedForwarders,
};
use prodfund_storage::{BatchOp, MemoryStore, SledStore, StateStore, WriteBatch};
use std::sync::Arc;

type TestEngine = ProductionEngine<Arc<BalanceBook>, Arc<ManualClock>>;

const START: i64 = 1_700_000_000;
const TIER0_LOCK: u64 = 5 * SECONDS_PER_DAY;

struct Fixture {
    engine: TestEngine,
    book: Arc<BalanceBook>,
    clock: Arc<ManualClock>,
    admin: ParticipantId,
}

fn settings() -> EngineSettings {
    EngineSettings::with_admin(ParticipantId::from_label("admin"))
}

fn fixture() -> Fixture {
    let book = Arc::new(BalanceBook::new());
    let clock = Arc::new(ManualClock::new(START));
    let settings = settings();
    let admin = settings.admin;
    Fixture {
        engine: ProductionEngine::new(settings, book.clone(), clock.clone()),
        book,
        clock,
        admin,
    }
}

impl Fixture {
    fn user(&self, label: &str, units: u128) -> (ParticipantId, CallContext) {
        let id = ParticipantId::from_label(label);
        self.book.deposit(&id, units * ONE_UNIT).unwrap();
        (id, CallContext::direct(id))
    }

    fn seed_pool(&self, units: u128) {
        let (_, sponsor) = self.user("sponsor", units);
        self.engine.fund_pool(&sponsor, units * ONE_UNIT).unwrap();
    }
}

fn close_to(actual: u128, expected: u128, tolerance: u128) -> bool {
    actual.abs_diff(expected) <= tolerance
}

mod accrual_tests {
    use super::*;

    #[test]
    fn test_one_year_at_reference_rate() {
        let f = fixture();
        f.seed_pool(10_000);
        let (alice, ctx) = f.user("alice", 1_000);
        f.engine.open_position(&ctx, 1_000 * ONE_UNIT, 2).unwrap();

        f.clock.advance(SECONDS_PER_YEAR);
        let pending = f.engine.get_pending_yield(&alice).unwrap();
        let expected = 6_182 * ONE_UNIT / 10;
        assert!(pending <= expected);
        assert!(close_to(pending, expected, 10_000), "pending {}", pending);

        let paid = f.engine.claim_yield(&ctx).unwrap();
        assert_eq!(paid, pending);
        assert_eq!(f.book.balance_of(&alice), paid);
        assert_eq!(f.engine.get_fund().balance, 10_000 * ONE_UNIT - paid);
    }

    #[test]
    fn test_reputation_flooring() {
        let f = fixture();
        let (alice, ctx) = f.user("alice", 1_001);

        let big = f.engine.open_position(&ctx, 1_000 * ONE_UNIT, 0).unwrap();
        assert_eq!(big.reputation, 618 * ONE_UNIT);

        let dust = f.engine.open_position(&ctx, 1, 0).unwrap();
        assert_eq!(dust.reputation, 0);
        assert_eq!(f.engine.get_participant(&alice).total_reputation, 618 * ONE_UNIT);
        assert_eq!(f.engine.preview_reputation(1_000, 0).unwrap(), 618);
    }

    #[test]
    fn test_no_reputation_means_no_accrual() {
        let f = fixture();
        f.seed_pool(10_000);
        f.clock.advance(SECONDS_PER_YEAR);

        let (alice, ctx) = f.user("alice", 100);
        f.engine.open_position(&ctx, 100 * ONE_UNIT, 0).unwrap();
        assert_eq!(f.engine.get_pending_yield(&alice).unwrap(), 0);
        assert!(f.engine.get_fund().accumulated_yield_per_reputation.is_zero());
    }

    #[test]
    fn test_late_joiner_does_not_dilute_past_yield() {
        let f = fixture();
        f.seed_pool(10_000);
        let (alice, alice_ctx) = f.user("alice", 1_000);
        let (bob, bob_ctx) = f.user("bob", 1_000);

        f.engine.open_position(&alice_ctx, 1_000 * ONE_UNIT, 0).unwrap();
        f.clock.advance(SECONDS_PER_YEAR / 2);
        let before = f.engine.get_pending_yield(&alice).unwrap();

        f.engine.open_position(&bob_ctx, 1_000 * ONE_UNIT, 0).unwrap();
        assert_eq!(f.engine.get_pending_yield(&alice).unwrap(), before);
        assert_eq!(f.engine.get_pending_yield(&bob).unwrap(), 0);
        assert_eq!(f.engine.claim_yield(&bob_ctx), Err(FundError::NoYieldToClaim));
    }

    #[test]
    fn test_yield_split_by_reputation() {
        let f = fixture();
        f.seed_pool(100_000);
        let (alice, alice_ctx) = f.user("alice", 1_000);
        let (bob, bob_ctx) = f.user("bob", 3_000);

        f.engine.open_position(&alice_ctx, 1_000 * ONE_UNIT, 1).unwrap();
        f.engine.open_position(&bob_ctx, 3_000 * ONE_UNIT, 1).unwrap();
        f.clock.advance(SECONDS_PER_YEAR);

        let a = f.engine.get_pending_yield(&alice).unwrap();
        let b = f.engine.get_pending_yield(&bob).unwrap();
        assert!(a > 0);
        assert!(close_to(b, 3 * a, 10));
    }

    #[test]
    fn test_yield_capped_by_pool() {
        let f = fixture();
        f.seed_pool(10);
        let (alice, alice_ctx) = f.user("alice", 1_000);
        let (bob, bob_ctx) = f.user("bob", 1_000);
        f.engine.open_position(&alice_ctx, 1_000 * ONE_UNIT, 0).unwrap();
        f.engine.open_position(&bob_ctx, 1_000 * ONE_UNIT, 0).unwrap();

        f.clock.advance(40 * SECONDS_PER_YEAR);
        let a = f.engine.get_pending_yield(&alice).unwrap();
        let b = f.engine.get_pending_yield(&bob).unwrap();
        assert!(a + b <= 10 * ONE_UNIT);

        let paid = f.engine.claim_yield(&alice_ctx).unwrap() + f.engine.claim_yield(&bob_ctx).unwrap();
        assert!(paid <= 10 * ONE_UNIT);
        assert_eq!(f.engine.get_fund().balance, 10 * ONE_UNIT - paid);
        // Only rounding dust stays behind
        assert!(f.engine.get_fund().balance < ONE_UNIT / 1_000_000);
    }

    #[test]
    fn test_second_open_keeps_pending_yield() {
        let f = fixture();
        f.seed_pool(10_000);
        let (alice, ctx) = f.user("alice", 2_000);

        f.engine.open_position(&ctx, 1_000 * ONE_UNIT, 0).unwrap();
        f.clock.advance(SECONDS_PER_YEAR / 4);
        let before = f.engine.get_pending_yield(&alice).unwrap();
        assert!(before > 0);

        f.engine.open_position(&ctx, 1_000 * ONE_UNIT, 3).unwrap();
        assert_eq!(f.engine.get_participant(&alice).accrued_yield, before);
        assert_eq!(f.engine.get_pending_yield(&alice).unwrap(), before);
        assert_eq!(f.engine.claim_yield(&ctx).unwrap(), before);
    }

    #[test]
    fn test_claim_without_yield() {
        let f = fixture();
        let (_, ctx) = f.user("alice", 10);
        assert_eq!(f.engine.claim_yield(&ctx), Err(FundError::NoYieldToClaim));

        f.engine.open_position(&ctx, 10 * ONE_UNIT, 0).unwrap();
        f.clock.advance(SECONDS_PER_YEAR);
        // Empty pool generates nothing
        assert_eq!(f.engine.claim_yield(&ctx), Err(FundError::NoYieldToClaim));
    }

    #[test]
    fn test_funding_after_gap_uses_old_balance() {
        let f = fixture();
        let (alice, ctx) = f.user("alice", 100);
        f.engine.open_position(&ctx, 100 * ONE_UNIT, 0).unwrap();

        f.clock.advance(SECONDS_PER_YEAR);
        f.seed_pool(10_000);
        assert_eq!(f.engine.get_pending_yield(&alice).unwrap(), 0);
        assert_eq!(f.engine.get_fund().last_update_time, START + SECONDS_PER_YEAR as i64);
    }
}

mod position_tests {
    use super::*;

    #[test]
    fn test_close_middle_swaps_last_in() {
        let f = fixture();
        let (alice, ctx) = f.user("alice", 600);
        for units in [100, 200, 300] {
            f.engine.open_position(&ctx, units * ONE_UNIT, 0).unwrap();
        }

        f.clock.advance(TIER0_LOCK);
        let closed = f.engine.close_position(&ctx, 1).unwrap();
        assert_eq!(closed.amount, 200 * ONE_UNIT);

        let remaining: Vec<_> = f
            .engine
            .get_positions(&alice)
            .iter()
            .map(|p| p.amount / ONE_UNIT)
            .collect();
        assert_eq!(remaining, vec![100, 300]);
        assert_eq!(f.book.balance_of(&alice), 200 * ONE_UNIT);
        assert_eq!(f.engine.total_principal(), 400 * ONE_UNIT);
    }

    #[test]
    fn test_close_last_and_only() {
        let f = fixture();
        let (alice, ctx) = f.user("alice", 50);
        f.engine.open_position(&ctx, 50 * ONE_UNIT, 0).unwrap();
        f.clock.advance(TIER0_LOCK);

        f.engine.close_position(&ctx, 0).unwrap();
        assert!(f.engine.get_positions(&alice).is_empty());
        assert_eq!(
            f.engine.close_position(&ctx, 0),
            Err(FundError::InvalidOrderIndex { index: 0, len: 0 })
        );
    }

    #[test]
    fn test_locked_until_exact_unlock_time() {
        let f = fixture();
        let (_, ctx) = f.user("alice", 50);
        let position = f.engine.open_position(&ctx, 50 * ONE_UNIT, 0).unwrap();

        f.clock.set(position.unlock_time() - 1);
        assert!(matches!(
            f.engine.close_position(&ctx, 0),
            Err(FundError::PositionLocked { .. })
        ));

        f.clock.set(position.unlock_time());
        assert!(f.engine.close_position(&ctx, 0).is_ok());
    }

    #[test]
    fn test_close_preserves_owed_yield() {
        let f = fixture();
        f.seed_pool(10_000);
        let (alice, ctx) = f.user("alice", 100);
        f.engine.open_position(&ctx, 100 * ONE_UNIT, 0).unwrap();

        f.clock.advance(SECONDS_PER_YEAR);
        let owed = f.engine.get_pending_yield(&alice).unwrap();
        f.engine.close_position(&ctx, 0).unwrap();

        assert_eq!(f.engine.get_participant(&alice).total_reputation, 0);
        assert_eq!(f.engine.claim_yield(&ctx).unwrap(), owed);
    }

    #[test]
    fn test_failed_open_changes_nothing() {
        let f = fixture();
        f.seed_pool(1_000);
        let (alice, ctx) = f.user("alice", 5);
        let fund = f.engine.get_fund();

        assert!(matches!(
            f.engine.open_position(&ctx, 6 * ONE_UNIT, 0),
            Err(FundError::InsufficientBalance { .. })
        ));
        assert_eq!(f.engine.get_fund(), fund);
        assert!(f.engine.get_positions(&alice).is_empty());
        assert_eq!(f.book.balance_of(&alice), 5 * ONE_UNIT);
    }
}

mod access_tests {
    use super::*;

    #[test]
    fn test_only_admin_pauses() {
        let f = fixture();
        let (_, ctx) = f.user("mallory", 1);
        assert_eq!(f.engine.pause(&ctx), Err(FundError::Unauthorized));
        assert!(!f.engine.is_paused());

        f.engine.pause(&CallContext::direct(f.admin)).unwrap();
        assert!(f.engine.is_paused());
        assert_eq!(f.engine.open_position(&ctx, 1, 0), Err(FundError::SystemPaused));
    }

    #[test]
    fn test_pause_checked_before_arguments() {
        let f = fixture();
        let (_, ctx) = f.user("alice", 1);
        f.engine.pause(&CallContext::direct(f.admin)).unwrap();

        assert_eq!(f.engine.open_position(&ctx, 0, 99), Err(FundError::SystemPaused));
        assert_eq!(f.engine.fund_pool(&ctx, 0), Err(FundError::SystemPaused));
        assert_eq!(f.engine.close_position(&ctx, 42), Err(FundError::SystemPaused));
    }

    #[test]
    fn test_untrusted_relayer_acts_as_itself() {
        let relayer = ParticipantId::from_label("relayer");
        let mallory = ParticipantId::from_label("mallory");
        let alice = ParticipantId::from_label("alice");
        let book = Arc::new(BalanceBook::new());
        book.deposit(&alice, 10 * ONE_UNIT).unwrap();
        book.deposit(&mallory, 10 * ONE_UNIT).unwrap();

        let mut settings = settings();
        settings.relayers = Arc::new(TrustedForwarders::single(relayer));
        let engine = ProductionEngine::new(settings, book.clone(), Arc::new(ManualClock::new(START)));

        let forged = CallContext::relayed(mallory, alice, b"open");
        engine.open_position(&forged, 10 * ONE_UNIT, 0).unwrap();
        assert!(engine.get_positions(&alice).is_empty());
        assert_eq!(engine.get_positions(&mallory).len(), 1);
        assert_eq!(book.balance_of(&alice), 10 * ONE_UNIT);
    }

    #[test]
    fn test_relayed_admin_can_pause() {
        let relayer = ParticipantId::from_label("relayer");
        let mut settings = settings();
        let admin = settings.admin;
        settings.relayers = Arc::new(TrustedForwarders::single(relayer));
        let engine = ProductionEngine::new(
            settings,
            Arc::new(BalanceBook::new()),
            Arc::new(ManualClock::new(START)),
        );

        engine.pause(&CallContext::relayed(relayer, admin, &[])).unwrap();
        assert!(engine.is_paused());
    }
}

mod event_tests {
    use super::*;

    #[test]
    fn test_events_follow_commit_order() {
        let f = fixture();
        let mut events = f.engine.subscribe();
        let (_, ctx) = f.user("alice", 100);

        f.engine.open_position(&ctx, 100 * ONE_UNIT, 0).unwrap();
        f.clock.advance(TIER0_LOCK);
        f.engine.close_position(&ctx, 0).unwrap();
        f.engine.pause(&CallContext::direct(f.admin)).unwrap();

        let names: Vec<_> = (0..3)
            .map(|_| events.try_recv().unwrap())
            .map(|e| {
                assert!(e.timestamp() >= START);
                e.name()
            })
            .collect();
        assert_eq!(names, ["PositionOpened", "PositionClosed", "Paused"]);

        let _ = f.engine.claim_yield(&ctx);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_failed_call_emits_nothing() {
        let f = fixture();
        let mut events = f.engine.subscribe();
        let (_, ctx) = f.user("alice", 1);

        assert!(f.engine.open_position(&ctx, 0, 0).is_err());
        assert!(f.engine.pause(&ctx).is_err());
        assert!(events.try_recv().is_err());

        f.engine.fund_pool(&ctx, ONE_UNIT).unwrap();
        match events.recv().await.unwrap() {
            EngineEvent::PoolFunded { new_balance, .. } => assert_eq!(new_balance, ONE_UNIT),
            other => panic!("unexpected {:?}", other),
        }
    }
}

mod persistence_tests {
    use super::*;

    fn open_with(store: Arc<dyn StateStore>, book: Arc<BalanceBook>, clock: Arc<ManualClock>) -> TestEngine {
        ProductionEngine::restore(settings(), book, clock, store).unwrap()
    }

    #[test]
    fn test_empty_store_gives_fresh_engine() {
        let store: Arc<dyn StateStore> = Arc::new(MemoryStore::new());
        let engine = open_with(store, Arc::new(BalanceBook::new()), Arc::new(ManualClock::new(START)));
        assert_eq!(engine.get_fund(), GlobalFundState::default());
        assert!(engine.participants().is_empty());
    }

    #[test]
    fn test_restore_from_sled() {
        let dir = tempfile::tempdir().unwrap();
        let book = Arc::new(BalanceBook::new());
        let clock = Arc::new(ManualClock::new(START));
        let alice = ParticipantId::from_label("alice");
        let admin = ParticipantId::from_label("admin");
        book.deposit(&alice, 1_500 * ONE_UNIT).unwrap();

        let (fund, positions, pending) = {
            let store: Arc<dyn StateStore> = Arc::new(SledStore::open(dir.path()).unwrap());
            let engine = open_with(store, book.clone(), clock.clone());
            let ctx = CallContext::direct(alice);
            engine.fund_pool(&ctx, 500 * ONE_UNIT).unwrap();
            engine.open_position(&ctx, 400 * ONE_UNIT, 0).unwrap();
            engine.open_position(&ctx, 600 * ONE_UNIT, 1).unwrap();
            clock.advance(SECONDS_PER_YEAR / 3);
            engine.pause(&CallContext::direct(admin)).unwrap();
            (
                engine.get_fund(),
                engine.get_positions(&alice),
                engine.get_pending_yield(&alice).unwrap(),
            )
        };

        let store: Arc<dyn StateStore> = Arc::new(SledStore::open(dir.path()).unwrap());
        let engine = open_with(store, book, clock);
        assert!(engine.is_paused());
        assert_eq!(engine.get_fund(), fund);
        assert_eq!(engine.get_positions(&alice), positions);
        assert_eq!(engine.get_pending_yield(&alice).unwrap(), pending);
        assert!(pending > 0);
    }

    #[test]
    fn test_emptied_participant_record_removed() {
        let store = Arc::new(MemoryStore::new());
        let book = Arc::new(BalanceBook::new());
        let clock = Arc::new(ManualClock::new(START));
        let alice = ParticipantId::from_label("alice");
        book.deposit(&alice, ONE_UNIT).unwrap();

        let engine = open_with(store.clone(), book, clock.clone());
        let ctx = CallContext::direct(alice);
        engine.open_position(&ctx, ONE_UNIT, 0).unwrap();
        assert_eq!(store.keys_with_prefix("participant/").unwrap().len(), 1);

        clock.advance(TIER0_LOCK);
        engine.close_position(&ctx, 0).unwrap();
        assert!(store.keys_with_prefix("participant/").unwrap().is_empty());
    }

    /// Store that refuses any batch touching keys under `prefix`
    struct RejectingStore {
        inner: Arc<MemoryStore>,
        prefix: &'static str,
    }

    impl StateStore for RejectingStore {
        fn write(&self, batch: WriteBatch) -> prodfund_core::Result<()> {
            let touches = batch.ops().iter().any(|op| match op {
                BatchOp::Put(key, _) | BatchOp::Delete(key) => key.starts_with(self.prefix),
            });
            if touches {
                return Err(FundError::Storage("disk full".into()));
            }
            self.inner.write(batch)
        }

        fn get(&self, key: &str) -> prodfund_core::Result<Option<Vec<u8>>> {
            self.inner.get(key)
        }

        fn keys_with_prefix(&self, prefix: &str) -> prodfund_core::Result<Vec<String>> {
            self.inner.keys_with_prefix(prefix)
        }
    }

    #[test]
    fn test_failed_write_changes_nothing() {
        let inner = Arc::new(MemoryStore::new());
        let store: Arc<dyn StateStore> = Arc::new(RejectingStore {
            inner: inner.clone(),
            prefix: "participant/",
        });
        let book = Arc::new(BalanceBook::new());
        let clock = Arc::new(ManualClock::new(START));
        let alice = ParticipantId::from_label("alice");
        book.deposit(&alice, 10 * ONE_UNIT).unwrap();

        let engine = open_with(store, book.clone(), clock.clone());
        let mut events = engine.subscribe();
        let ctx = CallContext::direct(alice);

        assert_eq!(
            engine.open_position(&ctx, 5 * ONE_UNIT, 0),
            Err(FundError::Storage("disk full".into()))
        );
        assert!(engine.get_positions(&alice).is_empty());
        assert_eq!(engine.get_fund(), GlobalFundState::default());
        assert!(engine.participants().is_empty());
        assert_eq!(book.balance_of(&alice), 10 * ONE_UNIT);
        assert_eq!(book.custody(), 0);
        assert!(events.try_recv().is_err());
        assert!(inner.is_empty());

        // Funding touches no participant record and still goes through
        engine.fund_pool(&ctx, ONE_UNIT).unwrap();
        assert_eq!(book.custody(), ONE_UNIT);

        let restored = open_with(inner.clone(), Arc::new(BalanceBook::load(inner.as_ref()).unwrap()), clock);
        assert_eq!(restored.get_fund().total_reputation, 0);
        assert_eq!(restored.get_fund().balance, ONE_UNIT);
        assert_eq!(restored.ledger().custody(), ONE_UNIT);
        assert_eq!(restored.ledger().balance_of(&alice), 9 * ONE_UNIT);
    }

    #[test]
    fn test_ledger_and_fund_records_land_together() {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::new(START));
        let alice = ParticipantId::from_label("alice");
        let bob = ParticipantId::from_label("bob");

        {
            let store: Arc<dyn StateStore> = Arc::new(SledStore::open(dir.path()).unwrap());
            let book = Arc::new(BalanceBook::load(store.as_ref()).unwrap());
            book.deposit(&alice, 100 * ONE_UNIT).unwrap();
            book.deposit(&bob, 100 * ONE_UNIT).unwrap();
            let engine = open_with(store, book, clock.clone());
            engine.fund_pool(&CallContext::direct(bob), 50 * ONE_UNIT).unwrap();
            engine.open_position(&CallContext::direct(alice), 30 * ONE_UNIT, 1).unwrap();
            engine.open_position(&CallContext::direct(bob), 20 * ONE_UNIT, 3).unwrap();
            clock.advance(TIER0_LOCK * 4);
            engine.claim_yield(&CallContext::direct(alice)).unwrap();
        }

        let store: Arc<dyn StateStore> = Arc::new(SledStore::open(dir.path()).unwrap());
        let book = Arc::new(BalanceBook::load(store.as_ref()).unwrap());
        let engine = open_with(store, book.clone(), clock);
        let fund = engine.get_fund();

        assert_eq!(book.custody(), fund.balance + fund.total_principal);
        let reputation: u128 = engine
            .participants()
            .iter()
            .map(|p| engine.get_participant(p).total_reputation)
            .sum();
        assert_eq!(fund.total_reputation, reputation);
        assert_eq!(fund.total_principal, 50 * ONE_UNIT);
        assert!(book.balance_of(&alice) > 70 * ONE_UNIT);
        assert_eq!(book.balance_of(&bob), 30 * ONE_UNIT);
    }

    #[test]
    fn test_participants_match_after_restore() {
        let store = Arc::new(MemoryStore::new());
        let book = Arc::new(BalanceBook::new());
        let clock = Arc::new(ManualClock::new(START));
        let alice = ParticipantId::from_label("alice");
        let bob = ParticipantId::from_label("bob");
        book.deposit(&alice, 10 * ONE_UNIT).unwrap();
        book.deposit(&bob, 100 * ONE_UNIT).unwrap();

        let engine = open_with(store.clone(), book.clone(), clock.clone());
        let ctx = CallContext::direct(alice);
        engine.fund_pool(&CallContext::direct(bob), 100 * ONE_UNIT).unwrap();
        engine.open_position(&ctx, 10 * ONE_UNIT, 0).unwrap();
        clock.advance(TIER0_LOCK);
        engine.close_position(&ctx, 0).unwrap();
        assert_eq!(engine.participants(), vec![alice]);

        engine.claim_yield(&ctx).unwrap();
        assert!(engine.participants().is_empty());

        let restored = open_with(store, book, clock);
        assert_eq!(restored.participants(), engine.participants());
    }
}
