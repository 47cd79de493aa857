//! Wallet Profile Store (§4.3). Grounded structurally on
//! `original_source/src/position_tracker.py` (rolling windows,
//! size-gated `cleanup_memory`) and the donor's plain struct/impl idiom
//! for per-entity stateful stores.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::models::{PositionAction, PositionState, Side, Trade, WalletProfile, TRADE_TIME_RING_CAP};

pub struct WalletProfileStore {
    profiles: RwLock<HashMap<String, WalletProfile>>,
}

impl WalletProfileStore {
    pub fn new() -> Self {
        Self {
            profiles: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, address: &str) -> Option<WalletProfile> {
        self.profiles.read().get(address).cloned()
    }

    pub fn len(&self) -> usize {
        self.profiles.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Position action BEFORE the trade is applied (§4.3, load-bearing
    /// ordering). Callers MUST invoke this before `observe`.
    pub fn position_action(&self, trade: &Trade) -> PositionAction {
        let profiles = self.profiles.read();
        let net_before = profiles
            .get(&trade.trader_id)
            .and_then(|p| p.positions.get(&trade.market_id))
            .and_then(|by_outcome| by_outcome.get(&trade.outcome))
            .map(|pos| pos.net_shares())
            .unwrap_or(0.0);

        match trade.side {
            Side::Buy => {
                if net_before > 0.0 {
                    PositionAction::Adding
                } else if net_before < 0.0 {
                    PositionAction::Reversing
                } else {
                    PositionAction::Opening
                }
            }
            Side::Sell => {
                if net_before > 0.0 {
                    PositionAction::Closing
                } else if net_before < 0.0 {
                    PositionAction::Adding
                } else {
                    PositionAction::Opening
                }
            }
        }
    }

    /// Applies a trade's effect to the wallet's profile, creating it on
    /// first observation. `vip_large_trade_threshold` gates
    /// `large_trades_count`; `resolved` is an optional (win, usd) pair
    /// supplied when a position resolves, since win/loss bookkeeping is
    /// otherwise outside the scope of a single trade observation.
    pub fn observe(&self, trade: &Trade, vip_large_trade_threshold_usd: f64) {
        let mut profiles = self.profiles.write();
        let profile = profiles
            .entry(trade.trader_id.clone())
            .or_insert_with(|| WalletProfile::new(trade.trader_id.clone(), trade.timestamp));

        profile.total_trades += 1;
        profile.total_volume_usd += trade.amount_usd;

        match trade.side {
            Side::Buy => {
                profile.buy_volume_usd += trade.amount_usd;
                profile.total_buys += 1;
            }
            Side::Sell => {
                profile.sell_volume_usd += trade.amount_usd;
                profile.total_sells += 1;
            }
        }

        if trade.amount_usd >= vip_large_trade_threshold_usd {
            profile.large_trades_count += 1;
        }

        if trade.timestamp > profile.last_seen {
            profile.last_seen = trade.timestamp;
        }
        if profile.recent_trade_times.len() >= TRADE_TIME_RING_CAP {
            profile.recent_trade_times.pop_front();
        }
        profile.recent_trade_times.push_back(trade.timestamp);

        profile.markets_traded.insert(trade.market_id.clone());

        let by_outcome = profile
            .positions
            .entry(trade.market_id.clone())
            .or_default();
        let pos = by_outcome.entry(trade.outcome.clone()).or_insert_with(PositionState::default);
        match trade.side {
            Side::Buy => {
                pos.buy_shares += trade.size;
                pos.buy_usd += trade.amount_usd;
            }
            Side::Sell => {
                pos.sell_shares += trade.size;
                pos.sell_usd += trade.amount_usd;
            }
        }
    }

    /// Same as `observe`, additionally tracking `non_sports_volume_usd`
    /// (§3) when the caller knows the trade's market is not sports-flagged.
    pub fn observe_with_sports_flag(
        &self,
        trade: &Trade,
        vip_large_trade_threshold_usd: f64,
        is_sports_market: bool,
    ) {
        self.observe(trade, vip_large_trade_threshold_usd);
        if !is_sports_market {
            let mut profiles = self.profiles.write();
            if let Some(profile) = profiles.get_mut(&trade.trader_id) {
                profile.non_sports_volume_usd += trade.amount_usd;
            }
        }
    }

    /// Records a resolved position's outcome against the wallet's
    /// win/loss tally. Outside the scope of a single trade; called by
    /// whatever external settlement source feeds resolution data in.
    pub fn record_resolution(&self, address: &str, won: bool) {
        let mut profiles = self.profiles.write();
        if let Some(profile) = profiles.get_mut(address) {
            if won {
                profile.winning_trades += 1;
            } else {
                profile.losing_trades += 1;
            }
        }
    }

    pub fn top_by_volume(&self, n: usize, non_sports_only: bool) -> Vec<WalletProfile> {
        let profiles = self.profiles.read();
        let mut all: Vec<WalletProfile> = profiles.values().cloned().collect();
        all.sort_by(|a, b| {
            let av = if non_sports_only { a.non_sports_volume_usd } else { a.total_volume_usd };
            let bv = if non_sports_only { b.non_sports_volume_usd } else { b.total_volume_usd };
            bv.partial_cmp(&av).unwrap_or(std::cmp::Ordering::Equal)
        });
        all.truncate(n);
        all
    }

    /// §1.2 / §4.3: a no-op (returns 0) unless the store's size exceeds
    /// `min_wallets_before_cleanup`; only then evicts profiles inactive
    /// for more than `max_inactive_days`. Mirrors
    /// `position_tracker.py::cleanup_memory`'s size-gated eviction.
    pub fn cleanup(&self, now: DateTime<Utc>, max_inactive_days: i64, min_wallets_before_cleanup: usize) -> usize {
        let mut profiles = self.profiles.write();
        if profiles.len() <= min_wallets_before_cleanup {
            return 0;
        }
        let cutoff = now - chrono::Duration::days(max_inactive_days);
        let before = profiles.len();
        profiles.retain(|_, p| p.last_seen >= cutoff);
        before - profiles.len()
    }
}

impl Default for WalletProfileStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Venue;

    fn trade(trader: &str, market: &str, outcome: &str, side: Side, amount: f64, ts: DateTime<Utc>) -> Trade {
        Trade {
            id: uuid::Uuid::new_v4().to_string(),
            venue: Venue::Polymarket,
            market_id: market.to_string(),
            trader_id: trader.to_string(),
            trader_identity_known: true,
            outcome: outcome.to_string(),
            side,
            size: amount,
            price: 1.0,
            amount_usd: amount,
            timestamp: ts,
            tx_hash: None,
        }
    }

    #[test]
    fn position_action_ordering_is_load_bearing() {
        let store = WalletProfileStore::new();
        let now = Utc::now();

        let t1 = trade("0xabc", "m1", "Yes", Side::Buy, 1000.0, now);
        assert_eq!(store.position_action(&t1), PositionAction::Opening);
        store.observe(&t1, 10_000.0);

        let t2 = trade("0xabc", "m1", "Yes", Side::Buy, 1.0, now);
        assert_eq!(store.position_action(&t2), PositionAction::Adding);
        store.observe(&t2, 10_000.0);

        let t3 = trade("0xabc", "m1", "Yes", Side::Sell, 1_000_000.0, now);
        assert_eq!(
            store.position_action(&t3),
            PositionAction::Closing,
            "action must be computed from state before this trade regardless of amount"
        );
    }

    #[test]
    fn cleanup_is_gated_by_store_size() {
        let store = WalletProfileStore::new();
        let now = Utc::now();
        let stale = now - chrono::Duration::days(60);
        let t = trade("0xold", "m1", "Yes", Side::Buy, 10.0, stale);
        store.observe(&t, 10_000.0);

        assert_eq!(store.cleanup(now, 30, 10), 0, "below min_wallets_before_cleanup, must no-op");
        assert_eq!(store.cleanup(now, 30, 0), 1, "above threshold, stale profile evicted");
        assert!(store.get("0xold").is_none());
    }

    #[test]
    fn velocity_derived_from_observed_trades() {
        let store = WalletProfileStore::new();
        let now = Utc::now();
        for i in 0..11 {
            let t = trade("0xabc", "m1", "Yes", Side::Buy, 10.0, now - chrono::Duration::minutes(i));
            store.observe(&t, 10_000.0);
        }
        let profile = store.get("0xabc").unwrap();
        assert!(profile.is_repeat_actor(now));
        assert!(profile.is_heavy_actor(now));
    }
}
