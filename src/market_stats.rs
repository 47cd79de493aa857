//! Market Stats Store (§4.4): per-market rolling trade-size distribution
//! plus an hourly volume window for impact-ratio computation.
//!
//! Mean/std use Welford's online algorithm, the exact formula the donor
//! uses in `signals/quality.rs::RollingStats` for its z-score outlier
//! gate. Since the amount ring is capped at 1000 samples (§5 bounded
//! memory), the Welford accumulator is recomputed from the ring whenever
//! it's touched rather than incrementally adjusted on eviction — the
//! spec only requires the returned `n` to reflect the windowed sample,
//! not bit-for-bit replay parity with an unbounded accumulator.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::models::{MarketStatsSnapshot, Trade};

const AMOUNT_RING_CAP: usize = 1000;
const HOURLY_WINDOW: Duration = Duration::from_secs(3600);

#[derive(Default)]
struct RollingStats {
    count: u64,
    mean: f64,
    m2: f64,
}

impl RollingStats {
    fn update(&mut self, value: f64) {
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        let delta2 = value - self.mean;
        self.m2 += delta * delta2;
    }

    fn std_dev(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            (self.m2 / (self.count - 1) as f64).sqrt()
        }
    }
}

fn welford_over(amounts: &VecDeque<f64>) -> RollingStats {
    let mut stats = RollingStats::default();
    for &a in amounts {
        stats.update(a);
    }
    stats
}

struct MarketStatsInner {
    amounts: VecDeque<f64>,
    hourly_volume: VecDeque<(DateTime<Utc>, f64)>,
}

impl MarketStatsInner {
    fn new() -> Self {
        Self {
            amounts: VecDeque::with_capacity(AMOUNT_RING_CAP),
            hourly_volume: VecDeque::new(),
        }
    }

    fn prune_hourly(&mut self, now: DateTime<Utc>) {
        let cutoff = now - chrono::Duration::from_std(HOURLY_WINDOW).unwrap();
        while let Some((ts, _)) = self.hourly_volume.front() {
            if *ts < cutoff {
                self.hourly_volume.pop_front();
            } else {
                break;
            }
        }
    }

    fn hourly_total(&self) -> f64 {
        self.hourly_volume.iter().map(|(_, amt)| amt).sum()
    }
}

pub struct MarketStatsStore {
    markets: RwLock<HashMap<String, MarketStatsInner>>,
}

impl MarketStatsStore {
    pub fn new() -> Self {
        Self {
            markets: RwLock::new(HashMap::new()),
        }
    }

    /// Records the trade's amount into the rolling distribution and
    /// hourly volume window, returning the (mean, std, n) snapshot.
    pub fn record(&self, trade: &Trade) -> MarketStatsSnapshot {
        let mut markets = self.markets.write();
        let inner = markets
            .entry(trade.market_id.clone())
            .or_insert_with(MarketStatsInner::new);

        if inner.amounts.len() >= AMOUNT_RING_CAP {
            inner.amounts.pop_front();
        }
        inner.amounts.push_back(trade.amount_usd);

        inner.prune_hourly(trade.timestamp);
        inner.hourly_volume.push_back((trade.timestamp, trade.amount_usd));

        let stats = welford_over(&inner.amounts);
        MarketStatsSnapshot {
            mean: stats.mean,
            std_dev: stats.std_dev(),
            n: stats.count,
        }
    }

    /// `amount_usd / Σ(hourly window volume)`; unknown (empty) volume
    /// yields 1.0, treated as maximum impact (§4.4).
    pub fn impact_ratio(&self, trade: &Trade) -> f64 {
        let markets = self.markets.read();
        match markets.get(&trade.market_id) {
            Some(inner) => {
                let total = inner.hourly_total();
                if total <= 0.0 {
                    1.0
                } else {
                    trade.amount_usd / total
                }
            }
            None => 1.0,
        }
    }

    /// Current hourly volume window total, used by the cluster engine's
    /// market liquidity scaling (§4.5).
    pub fn hourly_volume(&self, market_id: &str) -> f64 {
        self.markets.read().get(market_id).map(|inner| inner.hourly_total()).unwrap_or(0.0)
    }

    pub fn snapshot(&self, market_id: &str) -> Option<MarketStatsSnapshot> {
        let markets = self.markets.read();
        markets.get(market_id).map(|inner| {
            let stats = welford_over(&inner.amounts);
            MarketStatsSnapshot {
                mean: stats.mean,
                std_dev: stats.std_dev(),
                n: stats.count,
            }
        })
    }

    pub fn z_score(&self, trade: &Trade) -> Option<f64> {
        let snap = self.snapshot(&trade.market_id)?;
        if snap.std_dev <= 0.0 {
            None
        } else {
            Some((trade.amount_usd - snap.mean) / snap.std_dev)
        }
    }
}

impl Default for MarketStatsStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Side, Venue};

    fn trade(market_id: &str, amount: f64, ts: DateTime<Utc>) -> Trade {
        Trade {
            id: uuid::Uuid::new_v4().to_string(),
            venue: Venue::Polymarket,
            market_id: market_id.to_string(),
            trader_id: "0xabc".to_string(),
            trader_identity_known: true,
            outcome: "Yes".to_string(),
            side: Side::Buy,
            size: amount,
            price: 1.0,
            amount_usd: amount,
            timestamp: ts,
            tx_hash: None,
        }
    }

    #[test]
    fn mean_and_std_over_baseline_then_outlier() {
        let store = MarketStatsStore::new();
        let now = Utc::now();
        for _ in 0..100 {
            store.record(&trade("m1", 100.0, now));
        }
        let snap = store.snapshot("m1").unwrap();
        assert_eq!(snap.n, 100);
        assert!((snap.mean - 100.0).abs() < 1e-9);
        assert_eq!(snap.std_dev, 0.0);

        let z = store.z_score(&trade("m1", 5000.0, now));
        assert!(z.is_none(), "zero std_dev should not yield a finite z-score");
    }

    #[test]
    fn impact_ratio_unknown_market_is_max() {
        let store = MarketStatsStore::new();
        let t = trade("unknown", 500.0, Utc::now());
        assert_eq!(store.impact_ratio(&t), 1.0);
    }

    #[test]
    fn hourly_window_prunes_old_volume() {
        let store = MarketStatsStore::new();
        let now = Utc::now();
        store.record(&trade("m1", 1000.0, now - chrono::Duration::hours(2)));
        store.record(&trade("m1", 500.0, now));
        let ratio = store.impact_ratio(&trade("m1", 500.0, now));
        assert!((ratio - 1.0).abs() < 1e-9, "2h-old trade must be pruned from hourly window");
    }
}
