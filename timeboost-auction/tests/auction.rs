use std::sync::Arc;
use std::time::Duration;

use metrics::NoMetrics;
use timeboost_auction::{
    AuctioneerConfig, AuctioneerServer, BidArchive, BidCache, BidQueue, BidValidator,
    ResolutionStore, RoundRecord, Settlement, Settler, Status, ValidatorConfig,
};
use timeboost_contract::{AuctionContract, MemoryAuction};
use timeboost_types::{
    Address, AuctionResolution, Bid, ChainId, Round, RoundOutcome, RoundTimingInfo, SignedBid,
    Signer, Timestamp, U256,
};
use timeboost_utils::Backoff;
use timeboost_utils::types::logging::init_logging;
use tokio::time::{sleep, timeout};

const CHAIN: u64 = 412346;

fn signed(s: &Signer, auction: Address, round: Round, amount: u64) -> SignedBid {
    Bid::new(ChainId::from(CHAIN), auction, s.address(), round, U256::from(amount))
        .sign(s)
        .unwrap()
}

fn fast_backoff() -> Backoff {
    Backoff::builder().unit(Duration::from_millis(10)).build()
}

async fn validator(
    contract: Arc<MemoryAuction>,
    queue: BidQueue,
) -> BidValidator<MemoryAuction> {
    let cfg = ValidatorConfig::builder()
        .chain(ChainId::from(CHAIN))
        .auction(contract.address())
        .build();
    BidValidator::new(cfg, contract, queue, &NoMetrics).await.unwrap()
}

fn short_rounds() -> RoundTimingInfo {
    RoundTimingInfo::new(
        Timestamp::now(),
        Duration::from_secs(3),
        Duration::from_secs(1),
        Duration::ZERO,
    )
    .unwrap()
}

async fn settled(store: &ResolutionStore, round: Round) -> RoundRecord {
    timeout(Duration::from_secs(10), async {
        loop {
            if let Some(rec) = store.get(round) {
                if !rec.status.is_pending() {
                    return rec;
                }
            }
            sleep(Duration::from_millis(50)).await
        }
    })
    .await
    .expect("round settles")
}

/// 60 second rounds, two bidders bidding 1 and 2: bidder 2 wins and pays 1.
#[tokio::test]
async fn second_price_with_sixty_second_rounds() {
    init_logging();

    let t0 = Timestamp::from_secs(1_700_000_000);
    let timing = RoundTimingInfo::new(
        t0,
        Duration::from_secs(60),
        Duration::from_secs(15),
        Duration::from_secs(15),
    )
    .unwrap();
    let auction = Signer::random().address();
    let contract = Arc::new(MemoryAuction::new(ChainId::from(CHAIN), auction, timing));
    let dir = tempfile::tempdir().unwrap();
    let queue = BidQueue::open(dir.path()).await.unwrap();
    let validator = validator(contract.clone(), queue.clone()).await;

    let (b1, b2) = (Signer::random(), Signer::random());
    for b in [&b1, &b2] {
        contract.deposit(b.address(), U256::from(10)).await.unwrap();
    }

    let now = t0 + Duration::from_secs(5);
    let round = timing.auction_round(now);
    validator
        .submit_bid_at(signed(&b1, auction, round, 1), now)
        .await
        .unwrap();
    validator
        .submit_bid_at(signed(&b2, auction, round, 2), now + Duration::from_secs(1))
        .await
        .unwrap();

    // A bid after the closing boundary is rejected and never queued.
    let late = timing.auction_closing_time(round);
    assert!(
        validator
            .submit_bid_at(signed(&b1, auction, round, 5), late)
            .await
            .is_err()
    );

    let mut cache = BidCache::new();
    for q in queue.consumer().poll().await.unwrap() {
        cache.add(q.bid);
    }
    assert_eq!(cache.len(), 2);
    let outcome = cache.resolve(round, U256::ZERO).outcome();
    let RoundOutcome::Resolved(r) = outcome else {
        panic!("round must be resolved")
    };
    assert_eq!(r.winner, b2.address());
    assert_eq!(r.first_price, U256::from(2));
    assert_eq!(r.second_price, U256::from(1));

    // Resolving the same bid set again yields the same outcome.
    assert_eq!(cache.resolve(round, U256::ZERO).outcome(), outcome);
}

/// Bids flow through validator, queue and auctioneer to an on-chain settlement.
#[tokio::test]
async fn auctioneer_resolves_and_settles() {
    init_logging();

    let timing = RoundTimingInfo::new(
        Timestamp::now(),
        Duration::from_secs(3),
        Duration::from_secs(1),
        Duration::ZERO,
    )
    .unwrap();
    let auction = Signer::random().address();
    let contract = Arc::new(
        MemoryAuction::new(ChainId::from(CHAIN), auction, timing).with_reserve_price(U256::from(1)),
    );
    let dir = tempfile::tempdir().unwrap();
    let queue = BidQueue::open(dir.path().join("queue")).await.unwrap();
    let store = Arc::new(ResolutionStore::open(dir.path().join("store")).await.unwrap());
    let validator = validator(contract.clone(), queue.clone()).await;

    let cfg = AuctioneerConfig::builder()
        .resolution_wait(Duration::from_millis(200))
        .poll_interval(Duration::from_millis(20))
        .backoff(fast_backoff())
        .build();
    let server = AuctioneerServer::new(cfg, contract.clone(), queue.clone(), store.clone(), &NoMetrics)
        .await
        .unwrap();

    let (b1, b2, b3) = (Signer::random(), Signer::random(), Signer::random());
    for b in [&b1, &b2, &b3] {
        contract.deposit(b.address(), U256::from(100)).await.unwrap();
    }
    let round = timing.auction_round(Timestamp::now());
    validator.submit_bid(signed(&b1, auction, round, 5)).await.unwrap();
    validator.submit_bid(signed(&b2, auction, round, 9)).await.unwrap();
    validator.submit_bid(signed(&b3, auction, round, 7)).await.unwrap();
    // A lower resubmission does not change the standing bid.
    validator.submit_bid(signed(&b2, auction, round, 6)).await.unwrap();

    let rec = timeout(Duration::from_secs(10), async {
        loop {
            if let Some(rec) = store.get(round) {
                if !rec.status.is_pending() {
                    return rec;
                }
            }
            sleep(Duration::from_millis(50)).await
        }
    })
    .await
    .expect("round settles");

    assert_eq!(rec.status, Status::Committed);
    assert_eq!(store.controller(round), Some(b2.address()));
    let chain = contract.resolution(round).await.unwrap().unwrap();
    assert_eq!(chain.winner, b2.address());
    assert_eq!(chain.second_price, U256::from(7));
    assert_eq!(contract.balance_of(b2.address()).await.unwrap(), U256::from(93));
    assert!(queue.rounds().await.unwrap().iter().all(|r| *r != round));
    assert_eq!(server.outcome(round), Some(RoundOutcome::Resolved(chain)));

    server.shutdown().await
}

/// A pending record whose round has meanwhile been settled differently on
/// chain is reconciled without submitting again.
#[tokio::test]
async fn recovery_reconciles_with_chain() {
    init_logging();

    let timing = RoundTimingInfo::new(
        Timestamp::from_secs(0),
        Duration::from_secs(60),
        Duration::from_secs(15),
        Duration::ZERO,
    )
    .unwrap();
    let auction = Signer::random().address();
    let contract = Arc::new(MemoryAuction::new(ChainId::from(CHAIN), auction, timing));
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(ResolutionStore::open(dir.path()).await.unwrap());

    let round = Round::from(7);
    let (b1, other) = (Signer::random(), Signer::random());
    contract.deposit(b1.address(), U256::from(10)).await.unwrap();
    let mut cache = BidCache::new();
    cache.add(signed(&b1, auction, round, 4));
    let rec = RoundRecord::new(cache.resolve(round, U256::ZERO));
    store.insert(&rec).await.unwrap();

    let chain = AuctionResolution {
        round,
        winner: other.address(),
        controller: other.address(),
        first_price: U256::from(8),
        second_price: U256::from(3),
    };
    contract.record_resolution(chain);

    // Reopening the store finds the pending record.
    drop(store);
    let store = Arc::new(ResolutionStore::open(dir.path()).await.unwrap());
    let pending = store.pending();
    assert_eq!(pending.len(), 1);

    let settler = Settler::new(contract.clone(), store.clone(), fast_backoff());
    let deadline = Timestamp::now() + Duration::from_secs(10);
    let rec = settler.settle(pending[0].clone(), deadline, true).await;

    assert!(matches!(rec.status, Status::Reconciled { .. }));
    assert_eq!(rec.outcome, RoundOutcome::Resolved(chain));
    assert_eq!(store.controller(round), Some(other.address()));
    assert_eq!(contract.resolve_calls(), 0);
}

/// Transient failures are retried; a conflicting submission ends in reconciliation.
#[tokio::test]
async fn settlement_retries_and_reconciles() {
    init_logging();

    let timing = RoundTimingInfo::new(
        Timestamp::from_secs(0),
        Duration::from_secs(60),
        Duration::from_secs(15),
        Duration::ZERO,
    )
    .unwrap();
    let auction = Signer::random().address();
    let contract = Arc::new(MemoryAuction::new(ChainId::from(CHAIN), auction, timing));
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(ResolutionStore::open(dir.path()).await.unwrap());
    let settler = Settler::new(contract.clone(), store.clone(), fast_backoff());
    let deadline = Timestamp::now() + Duration::from_secs(10);

    let (b1, b2) = (Signer::random(), Signer::random());
    contract.deposit(b1.address(), U256::from(10)).await.unwrap();
    contract.deposit(b2.address(), U256::from(10)).await.unwrap();

    let mut cache = BidCache::new();
    cache.add(signed(&b1, auction, Round::from(1), 4));
    cache.add(signed(&b2, auction, Round::from(1), 2));
    let rec = RoundRecord::new(cache.resolve(Round::from(1), U256::ZERO));
    store.insert(&rec).await.unwrap();

    contract.fail_next(2);
    assert_eq!(
        settler.ensure_committed(&rec, deadline, false).await,
        Settlement::Committed
    );
    assert!(contract.resolve_calls() >= 2);

    // Settling the same record again finds it committed.
    assert_eq!(
        settler.ensure_committed(&rec, deadline, false).await,
        Settlement::Committed
    );

    // A different local result for a settled round is reconciled.
    let mut cache = BidCache::new();
    cache.add(signed(&b2, auction, Round::from(1), 3));
    let ours = RoundRecord::new(cache.resolve(Round::from(1), U256::ZERO));
    let chain = contract.resolution(Round::from(1)).await.unwrap().unwrap();
    assert_eq!(
        settler.ensure_committed(&ours, deadline, false).await,
        Settlement::Reconciled(chain)
    );
}

/// A resolution that cannot be stored is retried with the bids kept until
/// the store is writable again.
#[tokio::test]
async fn resolution_stored_after_store_failure() {
    init_logging();

    let timing = short_rounds();
    let auction = Signer::random().address();
    let contract = Arc::new(MemoryAuction::new(ChainId::from(CHAIN), auction, timing));
    let dir = tempfile::tempdir().unwrap();
    let store_dir = dir.path().join("store");
    let queue = BidQueue::open(dir.path().join("queue")).await.unwrap();
    let store = Arc::new(ResolutionStore::open(&store_dir).await.unwrap());
    let validator = validator(contract.clone(), queue.clone()).await;

    let cfg = AuctioneerConfig::builder()
        .resolution_wait(Duration::from_millis(200))
        .poll_interval(Duration::from_millis(20))
        .backoff(fast_backoff())
        .build();
    let server = AuctioneerServer::new(cfg, contract.clone(), queue.clone(), store.clone(), &NoMetrics)
        .await
        .unwrap();

    std::fs::remove_dir_all(&store_dir).unwrap();

    let (b1, b2) = (Signer::random(), Signer::random());
    for b in [&b1, &b2] {
        contract.deposit(b.address(), U256::from(100)).await.unwrap();
    }
    let round = timing.auction_round(Timestamp::now());
    validator.submit_bid(signed(&b1, auction, round, 5)).await.unwrap();
    validator.submit_bid(signed(&b2, auction, round, 9)).await.unwrap();

    let closing = timing.auction_closing_time(round);
    sleep(closing.saturating_duration_since(Timestamp::now()) + Duration::from_secs(1)).await;
    assert!(store.get(round).is_none());
    assert_eq!(contract.resolve_calls(), 0);
    // Bids of the round stay queued until it is resolved.
    assert!(queue.rounds().await.unwrap().contains(&round));

    std::fs::create_dir_all(&store_dir).unwrap();

    let rec = settled(&store, round).await;
    assert_eq!(rec.status, Status::Committed);
    assert_eq!(store.controller(round), Some(b2.address()));
    let chain = contract.resolution(round).await.unwrap().unwrap();
    assert_eq!(chain.second_price, U256::from(5));

    server.shutdown().await
}

/// Of two replicas only the lease holder resolves; the other takes over
/// once the holder is gone.
#[tokio::test]
async fn secondary_takes_over_from_primary() {
    init_logging();

    let timing = short_rounds();
    let auction = Signer::random().address();
    let contract = Arc::new(MemoryAuction::new(ChainId::from(CHAIN), auction, timing));
    let dir = tempfile::tempdir().unwrap();
    let queue = BidQueue::open(dir.path().join("queue")).await.unwrap();
    let store_a = Arc::new(ResolutionStore::open(dir.path().join("store")).await.unwrap());
    let store_b = Arc::new(ResolutionStore::open(dir.path().join("store")).await.unwrap());
    let validator = validator(contract.clone(), queue.clone()).await;

    let cfg = |instance: &str| {
        AuctioneerConfig::builder()
            .resolution_wait(Duration::from_millis(200))
            .poll_interval(Duration::from_millis(20))
            .backoff(fast_backoff())
            .lease_dir(dir.path().join("lease"))
            .instance(instance)
            .lease_ttl(Duration::from_millis(600))
            .archive_dir(dir.path().join(format!("archive-{instance}")))
            .build()
    };
    let a = AuctioneerServer::new(cfg("a"), contract.clone(), queue.clone(), store_a.clone(), &NoMetrics)
        .await
        .unwrap();
    let b = AuctioneerServer::new(cfg("b"), contract.clone(), queue.clone(), store_b.clone(), &NoMetrics)
        .await
        .unwrap();

    let (b1, b2) = (Signer::random(), Signer::random());
    for b in [&b1, &b2] {
        contract.deposit(b.address(), U256::from(100)).await.unwrap();
    }

    let first = timing.auction_round(Timestamp::now());
    validator.submit_bid(signed(&b1, auction, first, 3)).await.unwrap();
    validator.submit_bid(signed(&b2, auction, first, 4)).await.unwrap();

    let rec = settled(&store_a, first).await;
    assert_eq!(rec.status, Status::Committed);
    assert_eq!(contract.resolve_calls(), 1);
    assert!(store_b.get(first).is_none_or(|r| r.outcome == rec.outcome));

    // Both replicas archived the bids they consumed.
    for name in ["archive-a", "archive-b"] {
        let archive = BidArchive::open(dir.path().join(name)).await.unwrap();
        assert_eq!(archive.bids(first).await.unwrap().len(), 2);
    }

    a.shutdown().await;

    let second = first.next();
    assert!(Timestamp::now() < timing.auction_closing_time(second));
    validator.submit_bid(signed(&b1, auction, second, 6)).await.unwrap();

    let rec = settled(&store_b, second).await;
    assert_eq!(rec.status, Status::Committed);
    assert_eq!(store_b.controller(second), Some(b1.address()));
    assert_eq!(contract.resolve_calls(), 2);
    // The new primary knows what its predecessor resolved.
    assert_eq!(store_b.controller(first), Some(b2.address()));
    assert!(!store_a.contains(second));

    b.shutdown().await
}
