use std::sync::Arc;
use std::time::Duration;

use metrics::NoMetrics;
use timeboost_auction::{BidQueue, BidValidator, ValidatorConfig};
use timeboost_client::{BidderClient, ClientError, ExpressLaneClient, ExpressLaneClientConfig};
use timeboost_contract::MemoryAuction;
use timeboost_sequencer::{ExpressLaneGate, GateConfig, Sequencer};
use timeboost_types::rpc::AckStatus;
use timeboost_types::{
    Address, AuctionResolution, Bytes, ChainId, Round, RoundTimingInfo, SeqNo, Signer, Timestamp,
    U256,
};
use timeboost_utils::types::logging::init_logging;

const CHAIN: u64 = 31337;

fn timing() -> RoundTimingInfo {
    RoundTimingInfo::new(
        Timestamp::now() - Duration::from_secs(1),
        Duration::from_secs(60),
        Duration::from_secs(15),
        Duration::from_secs(15),
    )
    .unwrap()
}

#[tokio::test]
async fn bidder_deposits_and_bids() {
    init_logging();

    let auction = Signer::random().address();
    let contract = Arc::new(MemoryAuction::new(ChainId::from(CHAIN), auction, timing()));
    let dir = tempfile::tempdir().unwrap();
    let queue = BidQueue::open(dir.path()).await.unwrap();
    let cfg = ValidatorConfig::builder()
        .chain(ChainId::from(CHAIN))
        .auction(auction)
        .balance_ttl(Duration::ZERO)
        .build();
    let validator = Arc::new(
        BidValidator::new(cfg, contract.clone(), queue.clone(), &NoMetrics)
            .await
            .unwrap(),
    );

    let bidder = BidderClient::new(Signer::random(), contract.clone(), validator)
        .await
        .unwrap();

    // Without a deposit the bid is refused.
    let err = bidder.bid(U256::from(3)).await.unwrap_err();
    assert_eq!(err.code(), Some("not-depositor"));

    assert_eq!(bidder.ensure_deposit(U256::from(10)).await.unwrap(), U256::from(10));
    assert_eq!(bidder.ensure_deposit(U256::from(5)).await.unwrap(), U256::from(10));
    bidder.deposit(U256::from(2)).await.unwrap();
    assert_eq!(bidder.balance().await.unwrap(), U256::from(12));

    let bid = bidder.bid(U256::from(3)).await.unwrap();
    assert_eq!(bid.round(), bidder.timing().auction_round(Timestamp::now()));
    assert_eq!(bid.bidder(), bidder.address());
    assert!(bid.is_signed_by_bidder());

    let queued = queue.consumer().poll().await.unwrap();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].bid, bid);

    // A failing deposit aborts before a bid is made.
    contract.fail_next(1);
    let err = bidder
        .deposit_and_bid(U256::from(1), U256::from(4))
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Contract(_)));
    assert_eq!(queue.consumer().poll().await.unwrap().len(), 1);
}

#[tokio::test]
async fn express_lane_client_sequences() {
    init_logging();

    let timing = timing();
    let auction = Signer::random().address();
    let contract = Arc::new(MemoryAuction::new(ChainId::from(CHAIN), auction, timing));
    let gcfg = GateConfig::builder()
        .chain(ChainId::from(CHAIN))
        .auction(auction)
        .tick(Duration::from_millis(10))
        .poll_interval(Duration::from_millis(20))
        .build();
    let seq = Sequencer::new(gcfg, contract.clone(), &NoMetrics).await.unwrap();

    let controller = Signer::random();
    let round = seq.gate().status().round;
    contract.record_resolution(AuctionResolution {
        round,
        winner: controller.address(),
        controller: controller.address(),
        first_price: U256::from(1),
        second_price: U256::from(1),
    });
    let mut rx = seq.gate().subscribe();
    rx.wait_for(|s| s.controller.is_some()).await.unwrap();

    let ccfg = ExpressLaneClientConfig::builder()
        .chain(ChainId::from(CHAIN))
        .auction(auction)
        .timing(timing)
        .build();
    let client = ExpressLaneClient::new(ccfg, controller, seq.gate().clone());

    let ack = client.send_transaction(Bytes::from_static(b"a")).await.unwrap();
    assert_eq!((ack.round, ack.seqno, ack.status), (round, SeqNo::zero(), AckStatus::Admitted));

    let incl = client
        .send_transaction_sync(Bytes::from_static(b"b"), Some(Duration::from_secs(5)))
        .await
        .unwrap();
    assert!(incl.boosted);
    assert_eq!(client.position().await, (round, SeqNo::from(2)));

    // Someone else's client is rejected and its sequence number stays put.
    let ccfg = ExpressLaneClientConfig::builder()
        .chain(ChainId::from(CHAIN))
        .auction(auction)
        .timing(timing)
        .build();
    let other = ExpressLaneClient::new(ccfg, Signer::random(), seq.gate().clone());
    let err = other.send_transaction(Bytes::from_static(b"x")).await.unwrap_err();
    assert_eq!(err.code(), Some("not-controller"));
    assert_eq!(other.position().await, (round, SeqNo::zero()));
}

fn resolution(round: Round, controller: Address) -> AuctionResolution {
    AuctionResolution {
        round,
        winner: controller,
        controller,
        first_price: U256::from(1),
        second_price: U256::from(1),
    }
}

/// A gate without a sequencer task; tests drain it by hand.
fn bare_gate(timing: RoundTimingInfo, controller: Address) -> (ExpressLaneGate, Address) {
    let auction = Signer::random().address();
    let cfg = GateConfig::builder()
        .chain(ChainId::from(CHAIN))
        .auction(auction)
        .build();
    let now = Timestamp::now();
    let round = timing.round_of(now);
    let gate = ExpressLaneGate::new(cfg, timing, round, &NoMetrics);
    gate.set_resolution(resolution(round, controller), now);
    (gate, auction)
}

#[tokio::test]
async fn unanswered_envelope_is_resent() {
    init_logging();

    let timing = timing();
    let controller = Signer::random();
    let (gate, auction) = bare_gate(timing, controller.address());
    let round = gate.status().round;

    let ccfg = ExpressLaneClientConfig::builder()
        .chain(ChainId::from(CHAIN))
        .auction(auction)
        .timing(timing)
        .build();
    let client = ExpressLaneClient::new(ccfg, controller, gate.clone());

    // Admitted, but nothing releases it before the wait ends.
    let err = client
        .send_transaction_sync(Bytes::from_static(b"a"), Some(Duration::from_millis(5)))
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Timeout));
    assert_eq!(client.position().await, (round, SeqNo::zero()));
    assert_eq!(gate.drain(Timestamp::now()).len(), 1);

    // The next send first confirms sequence number 0 and then uses 1.
    let ack = client.send_transaction(Bytes::from_static(b"b")).await.unwrap();
    assert_eq!((ack.seqno, ack.status), (SeqNo::from(1), AckStatus::Admitted));
    assert_eq!(client.position().await, (round, SeqNo::from(2)));

    let out = gate.drain(Timestamp::now());
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].transaction, Bytes::from_static(b"b"));

    // Same again through an explicit flush.
    client
        .send_transaction_sync(Bytes::from_static(b"c"), Some(Duration::from_millis(5)))
        .await
        .unwrap_err();
    client.flush().await.unwrap();
    assert_eq!(client.position().await, (round, SeqNo::from(3)));
    assert_eq!(gate.drain(Timestamp::now()).len(), 1);
}

#[tokio::test]
async fn sequence_restarts_in_a_new_round() {
    init_logging();

    let timing = RoundTimingInfo::new(
        Timestamp::now(),
        Duration::from_secs(2),
        Duration::from_millis(500),
        Duration::ZERO,
    )
    .unwrap();
    // Start at the beginning of a round.
    tokio::time::sleep(timing.time_til_next_round(Timestamp::now()) + Duration::from_millis(20)).await;

    let controller = Signer::random();
    let (gate, auction) = bare_gate(timing, controller.address());
    let round = gate.status().round;
    gate.set_resolution(resolution(round.next(), controller.address()), Timestamp::now());

    let ccfg = ExpressLaneClientConfig::builder()
        .chain(ChainId::from(CHAIN))
        .auction(auction)
        .timing(timing)
        .build();
    let client = ExpressLaneClient::new(ccfg, controller, gate.clone());

    client.send_transaction(Bytes::from_static(b"a")).await.unwrap();
    client.send_transaction(Bytes::from_static(b"b")).await.unwrap();
    assert_eq!(client.position().await, (round, SeqNo::from(2)));

    tokio::time::sleep(timing.time_til_next_round(Timestamp::now()) + Duration::from_millis(20)).await;
    let now = Timestamp::now();
    gate.next_round(timing.round_of(now), now);

    assert_eq!(client.position().await, (round.next(), SeqNo::zero()));
    let ack = client.send_transaction(Bytes::from_static(b"c")).await.unwrap();
    assert_eq!(
        (ack.round, ack.seqno, ack.status),
        (round.next(), SeqNo::zero(), AckStatus::Admitted)
    );
}
