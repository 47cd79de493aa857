//! End-to-end scenarios (S1-S6) driving the pipeline through its public
//! API, exactly as named in the testable-properties section: S1 Whale
//! alone, S2 Statistical anomaly alone, S3 Cluster, S4 Sports
//! suppression, S5 Crypto gate, S6 Entity stability.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use whalewatch_core::config::Config;
use whalewatch_core::errors::PipelineError;
use whalewatch_core::models::{AlertType, Category, Market, Side, Trade, Venue};
use whalewatch_core::pipeline::Pipeline;
use whalewatch_core::sinks::WalletFundingProvider;

fn trade(trader: &str, market: &str, amount: f64, side: Side, ts: DateTime<Utc>) -> Trade {
    Trade {
        id: uuid::Uuid::new_v4().to_string(),
        venue: Venue::Polymarket,
        market_id: market.to_string(),
        trader_id: trader.to_string(),
        trader_identity_known: true,
        outcome: "Yes".to_string(),
        side,
        size: amount,
        price: 0.5,
        amount_usd: amount,
        timestamp: ts,
        tx_hash: None,
    }
}

fn market(id: &str, question: &str, slug: &str, now: DateTime<Utc>) -> Market {
    Market {
        id: id.to_string(),
        venue: Venue::Polymarket,
        question: question.to_string(),
        slug: slug.to_string(),
        category: Category::Other,
        outcome_prices: HashMap::new(),
        volume: 0.0,
        end_time: None,
        active: true,
        url: None,
        is_sports: false,
        is_high_frequency: false,
        updated_at: now,
    }
}

#[tokio::test]
async fn s1_whale_alone_produces_high_severity_whale_and_new_wallet_alert() {
    let pipeline = Pipeline::new(Arc::new(Config::default()), None, None);
    let now = Utc::now();

    let alert = pipeline
        .process_trade(trade("0xnew_whale", "m1", 25_000.0, Side::Buy, now))
        .await
        .expect("whale trade by a brand new wallet must alert");

    assert!(alert.alert_types.contains(&AlertType::WhaleTrade));
    assert!(alert.alert_types.contains(&AlertType::NewWallet));
    assert!(alert.severity_score >= 8);
    assert_eq!(alert.severity, whalewatch_core::models::Severity::High);
}

#[tokio::test]
async fn s2_statistical_anomaly_alone_is_suppressed_by_multisignal_gate() {
    let pipeline = Pipeline::new(Arc::new(Config::default()), None, None);
    let now = Utc::now();

    // 100 baseline trades from a different wallet, recent enough to
    // dominate the hourly volume window (so the anomaly trade below
    // doesn't also read as 100% market impact).
    let baseline_ts = now - ChronoDuration::minutes(30);
    for i in 0..100 {
        let amount = 300.0 + ((i % 5) as f64 - 2.0);
        pipeline.process_trade(trade("0xbaseline", "m1", amount, Side::Buy, baseline_ts)).await;
    }

    // A known (not brand new) wallet, warmed up on an unrelated market so
    // its history doesn't perturb market m1's rolling stats, and old
    // enough that it doesn't also read as REPEAT_ACTOR/HEAVY_ACTOR.
    let warmup_ts = now - ChronoDuration::hours(72);
    for _ in 0..5 {
        pipeline.process_trade(trade("0xknown", "m2", 50.0, Side::Buy, warmup_ts)).await;
    }

    let alert = pipeline
        .process_trade(trade("0xknown", "m1", 5_000.0, Side::Buy, now))
        .await;
    assert!(
        alert.is_none(),
        "a single UNUSUAL_SIZE trigger must be suppressed by the default multi-signal gate"
    );
}

#[tokio::test]
async fn s3_cluster_activity_fires_on_the_third_coordinated_wallet() {
    let pipeline = Pipeline::new(Arc::new(Config::default()), None, None);
    let now = Utc::now();

    let first = pipeline.process_trade(trade("0xw1", "m1", 3_000.0, Side::Buy, now)).await;
    let second = pipeline
        .process_trade(trade("0xw2", "m1", 3_000.0, Side::Buy, now + ChronoDuration::seconds(30)))
        .await;
    assert!(first.is_none() || !first.unwrap().alert_types.contains(&AlertType::ClusterActivity));
    assert!(second.is_none() || !second.unwrap().alert_types.contains(&AlertType::ClusterActivity));

    let third = pipeline
        .process_trade(trade("0xw3", "m1", 3_000.0, Side::Buy, now + ChronoDuration::seconds(60)))
        .await
        .expect("the third coordinated wallet must trigger an alert");
    assert!(third.alert_types.contains(&AlertType::ClusterActivity));
}

#[tokio::test]
async fn s4_sports_market_suppresses_alert_regardless_of_amount() {
    let pipeline = Pipeline::new(Arc::new(Config::default()), None, None);
    let now = Utc::now();
    pipeline.upsert_market(market("m1", "Who will win the Super Bowl?", "super-bowl-winner", now));

    let alert = pipeline.process_trade(trade("0xabc", "m1", 100_000.0, Side::Buy, now)).await;
    assert!(alert.is_none(), "sports markets must short-circuit before the detector battery runs");
}

#[tokio::test]
async fn s5_crypto_gate_suppresses_heavy_actor_below_crypto_threshold() {
    let pipeline = Pipeline::new(Arc::new(Config::default()), None, None);
    let now = Utc::now();
    pipeline.upsert_market(market("m1", "Will Bitcoin hit $100k?", "btc-100k", now));

    // 10 trades within the last 24h so is_heavy_actor is true by the time
    // of the final $500 trade, without crossing the crypto threshold.
    for i in 0..10 {
        pipeline
            .process_trade(trade("0xcrypto", "m1", 50.0, Side::Buy, now - ChronoDuration::minutes(i)))
            .await;
    }

    let alert = pipeline.process_trade(trade("0xcrypto", "m1", 500.0, Side::Buy, now)).await;
    assert!(
        alert.is_none(),
        "HEAVY_ACTOR alone on a crypto-category trade must be suppressed by the multi-signal gate"
    );
}

struct SingleFunderProvider;

#[async_trait]
impl WalletFundingProvider for SingleFunderProvider {
    async fn funding_wallet(&self, _trader_id: &str) -> Result<Option<String>, PipelineError> {
        Ok(Some("FUNDER1".to_string()))
    }
}

#[tokio::test]
async fn s6_entity_keeps_its_id_as_membership_grows_across_rebuilds() {
    let funder = Arc::new(SingleFunderProvider);
    let pipeline = Pipeline::new(Arc::new(Config::default()), Some(funder), None);
    let t0 = Utc::now();

    // A, B, C all funded by the same wallet: pairwise shared_funder edges
    // form as each subsequent trader is observed.
    pipeline.process_trade(trade("A", "m1", 10.0, Side::Buy, t0)).await;
    pipeline
        .process_trade(trade("B", "m2", 10.0, Side::Buy, t0 + ChronoDuration::seconds(1)))
        .await;
    pipeline
        .process_trade(trade("C", "m3", 10.0, Side::Buy, t0 + ChronoDuration::seconds(1)))
        .await;

    // Force a rebuild once the entity_rebuild_interval has elapsed.
    pipeline
        .process_trade(trade("A", "m1", 10.0, Side::Buy, t0 + ChronoDuration::seconds(61)))
        .await;

    let entity_before = pipeline
        .cluster_engine()
        .entity_for("A")
        .expect("A, B, C must already form one entity");
    assert!(entity_before.wallets.contains("A"));
    assert!(entity_before.wallets.contains("B"));
    assert!(entity_before.wallets.contains("C"));
    let id_before = entity_before.entity_id;

    // D, funded the same way, joins the group connected through B.
    pipeline
        .process_trade(trade("D", "m4", 10.0, Side::Buy, t0 + ChronoDuration::seconds(62)))
        .await;

    // Force the next rebuild.
    pipeline
        .process_trade(trade("A", "m1", 10.0, Side::Buy, t0 + ChronoDuration::seconds(130)))
        .await;

    let entity_after = pipeline.cluster_engine().entity_for("A").expect("entity must still exist");
    assert_eq!(entity_after.entity_id, id_before, "entity id must be stable across growth");
    assert!(entity_after.wallets.contains("D"), "D must have joined the entity");
    assert_eq!(entity_after.wallets.len(), 4);
}
