//! Per-trade pipeline orchestration (§2 data flow, §4.5-§4.7): wires the
//! Market Metadata Cache, Wallet Profile Store, Market Stats Store,
//! Cluster/Entity Engine, Detector Battery and Alert Consolidator into
//! the single sequence the ingestion controller drives one trade at a
//! time (§5 concurrency resolution).

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::{debug, warn, Instrument};

use crate::cluster::{market_scale, ClusterEntityEngine};
use crate::config::Config;
use crate::consolidator::{self, ConsolidationContext};
use crate::detectors::{self, ClusterPeer, DetectionContext};
use crate::market_cache::MarketMetadataCache;
use crate::market_stats::MarketStatsStore;
use crate::models::{Alert, Category, EdgeSignal, Market, Trade};
use crate::sinks::{AlertStore, WalletFundingProvider};
use crate::wallet_store::WalletProfileStore;

/// A single (timestamp, wallet, amount_usd) sample kept per market, used
/// both for the CLUSTER_ACTIVITY detector's peer window and the
/// cluster engine's time_coupled edges.
struct MarketActivity {
    samples: VecDeque<(DateTime<Utc>, String, f64)>,
}

impl MarketActivity {
    fn new() -> Self {
        Self { samples: VecDeque::new() }
    }

    fn prune(&mut self, cutoff: DateTime<Utc>) {
        while let Some((ts, _, _)) = self.samples.front() {
            if *ts < cutoff {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    fn push(&mut self, ts: DateTime<Utc>, wallet: String, amount_usd: f64) {
        self.samples.push_back((ts, wallet, amount_usd));
    }
}

pub struct Pipeline {
    cfg: Arc<Config>,
    market_cache: MarketMetadataCache,
    wallet_store: WalletProfileStore,
    market_stats: MarketStatsStore,
    cluster_engine: ClusterEntityEngine,
    funding_provider: Option<Arc<dyn WalletFundingProvider>>,
    alert_store: Option<Arc<dyn AlertStore>>,
    market_activity: RwLock<HashMap<String, MarketActivity>>,
    wallet_markets: RwLock<HashMap<String, VecDeque<(DateTime<Utc>, String)>>>,
    funding_groups: RwLock<HashMap<String, HashSet<String>>>,
}

impl Pipeline {
    pub fn new(
        cfg: Arc<Config>,
        funding_provider: Option<Arc<dyn WalletFundingProvider>>,
        alert_store: Option<Arc<dyn AlertStore>>,
    ) -> Self {
        Self {
            cluster_engine: ClusterEntityEngine::new(
                cfg.edge_halflife,
                cfg.entity_rebuild_interval,
                cfg.entity_edge_threshold,
                cfg.signal_saturation_k,
            ),
            cfg,
            market_cache: MarketMetadataCache::new(),
            wallet_store: WalletProfileStore::new(),
            market_stats: MarketStatsStore::new(),
            funding_provider,
            alert_store,
            market_activity: RwLock::new(HashMap::new()),
            wallet_markets: RwLock::new(HashMap::new()),
            funding_groups: RwLock::new(HashMap::new()),
        }
    }

    pub fn cfg(&self) -> &Config {
        &self.cfg
    }

    pub fn wallet_store(&self) -> &WalletProfileStore {
        &self.wallet_store
    }

    pub fn market_cache(&self) -> &MarketMetadataCache {
        &self.market_cache
    }

    pub fn cluster_engine(&self) -> &ClusterEntityEngine {
        &self.cluster_engine
    }

    pub fn upsert_market(&self, market: Market) {
        self.market_cache.upsert(market, Utc::now());
    }

    /// Runs one trade through the full pipeline, returning the emitted
    /// alert if the consolidator decided to surface one. Every stage runs
    /// inside a `process_trade` span (§2) so a single trade's path through
    /// every store is traceable end to end.
    pub async fn process_trade(&self, trade: Trade) -> Option<Alert> {
        let span = tracing::debug_span!("process_trade", trade_id = %trade.id);
        self.process_trade_inner(trade).instrument(span).await
    }

    async fn process_trade_inner(&self, trade: Trade) -> Option<Alert> {
        metrics::counter!("trades_processed_total").increment(1);
        debug!(wallet = %trade.trader_id, amount = trade.amount_usd, "processing trade");

        let market = self.market_cache.get(&trade.market_id);
        let is_sports_market = market.as_ref().map(|m| m.is_sports).unwrap_or(false);
        let short_circuit = market
            .as_ref()
            .map(|m| (m.is_sports && self.cfg.exclude_sports) || m.is_high_frequency)
            .unwrap_or(false);

        // Load-bearing ordering (§4.3): compute the position action from
        // state BEFORE this trade mutates it.
        let position_action = self.wallet_store.position_action(&trade);
        self.wallet_store.observe_with_sports_flag(&trade, self.cfg.vip_large_trade_threshold_usd, is_sports_market);

        let stats = self.market_stats.record(&trade);
        let z_score = self.market_stats.z_score(&trade);
        let impact_ratio = self.market_stats.impact_ratio(&trade);

        if !trade.is_anonymous() {
            self.update_cluster_signals(&trade).await;
        }
        self.cluster_engine.maybe_rebuild(trade.timestamp);

        let cluster_peers = self.cluster_peers(&trade);
        self.record_market_activity(&trade);

        if short_circuit {
            debug!(market_id = %trade.market_id, "sports/high-frequency market, skipping detector battery");
            return None;
        }

        let entity_member_count = self.cluster_engine.entity_for(&trade.trader_id).map(|e| e.wallets.len());
        let wallet_profile = self.wallet_store.get(&trade.trader_id)?;

        let ctx = DetectionContext {
            wallet: &wallet_profile,
            market: market.as_ref(),
            stats,
            z_score,
            impact_ratio,
            entity_member_count,
            cluster_peers: &cluster_peers,
            is_whale_wallet: wallet_profile.is_whale(self.cfg.whale_wallet_volume_usd),
            now: trade.timestamp,
        };

        // §7 DetectorInternal: a panic inside any detector must not unwind
        // past this boundary; the trade is still marked processed so a
        // flaky detector can't trigger a replay storm.
        let triggers = match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| detectors::detect_all(&trade, &ctx, &self.cfg))) {
            Ok(triggers) => triggers,
            Err(_) => {
                let err = crate::errors::PipelineError::DetectorInternal(format!("detector battery panicked for trade {}", trade.id));
                warn!(error = %err, trade_id = %trade.id, "detector battery panicked, trade marked processed");
                return None;
            }
        };
        if triggers.is_empty() {
            return None;
        }

        let category = market.as_ref().map(|m| m.category).unwrap_or(Category::Other);
        let consolidation_ctx = ConsolidationContext {
            wallet_snapshot: &wallet_profile,
            category,
            position_action,
            percentile: None,
            market_question: market.as_ref().map(|m| m.question.clone()),
            z_score,
            now: trade.timestamp,
        };
        let alert = consolidator::consolidate(&trade, &triggers, &consolidation_ctx, &self.cfg)?;

        metrics::counter!("alerts_emitted_total").increment(1);
        if let Some(store) = &self.alert_store {
            if let Err(e) = store.save(&alert).await {
                warn!(error = %e, alert_id = %alert.id, "alert store save failed");
            }
        }

        Some(alert)
    }

    fn cluster_peers(&self, trade: &Trade) -> Vec<ClusterPeer> {
        let cutoff = trade.timestamp - chrono::Duration::from_std(self.cfg.cluster_time_window).unwrap();
        let activity = self.market_activity.read();
        match activity.get(&trade.market_id) {
            Some(a) => a
                .samples
                .iter()
                .filter(|(ts, wallet, _)| *ts >= cutoff && wallet != &trade.trader_id)
                .map(|(_, wallet, amount)| ClusterPeer { wallet: wallet.clone(), amount_usd: *amount })
                .collect(),
            None => Vec::new(),
        }
    }

    fn record_market_activity(&self, trade: &Trade) {
        let coord_cutoff = trade.timestamp - chrono::Duration::from_std(self.cfg.coord_window).unwrap();
        let mut activity = self.market_activity.write();
        let entry = activity.entry(trade.market_id.clone()).or_insert_with(MarketActivity::new);
        entry.prune(coord_cutoff.min(trade.timestamp - chrono::Duration::from_std(self.cfg.cluster_time_window).unwrap()));
        entry.push(trade.timestamp, trade.trader_id.clone(), trade.amount_usd);

        let mut wallet_markets = self.wallet_markets.write();
        let lookback_cutoff = trade.timestamp - chrono::Duration::from_std(self.cfg.overlap_lookback).unwrap();
        let markets = wallet_markets.entry(trade.trader_id.clone()).or_insert_with(VecDeque::new);
        while let Some((ts, _)) = markets.front() {
            if *ts < lookback_cutoff {
                markets.pop_front();
            } else {
                break;
            }
        }
        markets.push_back((trade.timestamp, trade.market_id.clone()));
    }

    async fn update_cluster_signals(&self, trade: &Trade) {
        let scale = market_scale(self.market_stats.hourly_volume(&trade.market_id), self.cfg.market_scale_baseline_usd);

        // time_coupled: every distinct wallet that traded this market
        // within coord_window.
        let coord_cutoff = trade.timestamp - chrono::Duration::from_std(self.cfg.coord_window).unwrap();
        let peers: Vec<String> = {
            let activity = self.market_activity.read();
            match activity.get(&trade.market_id) {
                Some(a) => a
                    .samples
                    .iter()
                    .filter(|(ts, wallet, _)| *ts >= coord_cutoff && wallet != &trade.trader_id)
                    .map(|(_, wallet, _)| wallet.clone())
                    .collect::<HashSet<_>>()
                    .into_iter()
                    .collect(),
                None => Vec::new(),
            }
        };
        for peer in &peers {
            self.cluster_engine.add_signal(&trade.trader_id, peer, EdgeSignal::TimeCoupled, 0.18, 1.20, scale, trade.timestamp);
        }

        self.update_market_overlap_signal(trade, &peers, scale);

        if let Some(provider) = &self.funding_provider {
            match provider.funding_wallet(&trade.trader_id).await {
                Ok(Some(funding_wallet)) => self.update_shared_funder_signal(trade, funding_wallet),
                Ok(None) => {}
                Err(e) => warn!(error = %e, trader = %trade.trader_id, "funding wallet lookup failed"),
            }
        }
    }

    fn update_market_overlap_signal(&self, trade: &Trade, time_coupled_peers: &[String], scale: f64) {
        let wallet_markets = self.wallet_markets.read();
        let this_markets: HashSet<String> = match wallet_markets.get(&trade.trader_id) {
            Some(m) => m.iter().map(|(_, mkt)| mkt.clone()).collect(),
            None => HashSet::new(),
        };
        if this_markets.len() < self.cfg.overlap_min_common_markets {
            return;
        }

        let mut candidate_peers: HashSet<String> = time_coupled_peers.iter().cloned().collect();
        for peer in wallet_markets.keys() {
            if peer != &trade.trader_id {
                candidate_peers.insert(peer.clone());
            }
        }

        for peer in candidate_peers {
            let peer_markets: HashSet<String> = match wallet_markets.get(&peer) {
                Some(m) => m.iter().map(|(_, mkt)| mkt.clone()).collect(),
                None => continue,
            };
            if peer_markets.len() < self.cfg.overlap_min_common_markets {
                continue;
            }
            let intersection = this_markets.intersection(&peer_markets).count();
            let union = this_markets.union(&peer_markets).count();
            if union == 0 {
                continue;
            }
            let jaccard = intersection as f64 / union as f64;
            if jaccard < self.cfg.overlap_jaccard_threshold {
                continue;
            }
            let contribution = 0.40 * (jaccard / 0.6).min(1.0);
            self.cluster_engine.add_signal(&trade.trader_id, &peer, EdgeSignal::MarketOverlap, contribution, 1.00, scale, trade.timestamp);
        }
    }

    fn update_shared_funder_signal(&self, trade: &Trade, funding_wallet: String) {
        let mut groups = self.funding_groups.write();
        let group = groups.entry(funding_wallet).or_insert_with(HashSet::new);
        for peer in group.iter() {
            if peer != &trade.trader_id {
                self.cluster_engine.add_signal(&trade.trader_id, peer, EdgeSignal::SharedFunder, 0.90, 1.50, 1.0, trade.timestamp);
            }
        }
        group.insert(trade.trader_id.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Side, Venue};

    fn trade(trader: &str, market: &str, amount: f64, ts: DateTime<Utc>) -> Trade {
        Trade {
            id: uuid::Uuid::new_v4().to_string(),
            venue: Venue::Polymarket,
            market_id: market.to_string(),
            trader_id: trader.to_string(),
            trader_identity_known: true,
            outcome: "Yes".to_string(),
            side: Side::Buy,
            size: amount,
            price: 0.5,
            amount_usd: amount,
            timestamp: ts,
            tx_hash: None,
        }
    }

    #[tokio::test]
    async fn whale_trade_produces_alert_through_full_pipeline() {
        let pipeline = Pipeline::new(Arc::new(Config::default()), None, None);
        let now = Utc::now();
        let alert = pipeline.process_trade(trade("0xabc", "m1", 25_000.0, now)).await;
        assert!(alert.is_some());
        let alert = alert.unwrap();
        assert!(alert.alert_types.contains(&crate::models::AlertType::WhaleTrade));
    }

    #[tokio::test]
    async fn sports_market_short_circuits_before_battery_runs() {
        let pipeline = Pipeline::new(Arc::new(Config::default()), None, None);
        let now = Utc::now();
        pipeline.upsert_market(Market {
            id: "m1".to_string(),
            venue: Venue::Polymarket,
            question: "Will the Lakers win the NBA championship?".to_string(),
            slug: "lakers-nba".to_string(),
            category: Category::Other,
            outcome_prices: HashMap::new(),
            volume: 0.0,
            end_time: None,
            active: true,
            url: None,
            is_sports: false,
            is_high_frequency: false,
            updated_at: now,
        });
        let alert = pipeline.process_trade(trade("0xabc", "m1", 50_000.0, now)).await;
        assert!(alert.is_none());
    }

    #[tokio::test]
    async fn small_trade_below_threshold_produces_no_alert() {
        let pipeline = Pipeline::new(Arc::new(Config::default()), None, None);
        let now = Utc::now();
        let alert = pipeline.process_trade(trade("0xabc", "m1", 10.0, now)).await;
        assert!(alert.is_none());
    }
}
