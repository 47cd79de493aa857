//! Detector Battery (§4.6). Fixed order, pure functions over trade +
//! store state; detectors never emit to sinks directly. Dispatch shape
//! generalizes the donor's `signals/detector.rs::SignalDetector::detect_all`
//! (sequential `if let Some(sig) = self.detect_x(...)` pushes) from 4
//! rules to 14, and from "returns a Signal" to "returns zero or more
//! (type, message, score) tuples".

use chrono::{DateTime, Utc};

use crate::config::Config;
use crate::models::{AlertType, Market, MarketStatsSnapshot, Side, Trade, Trigger, WalletProfile};

/// A peer wallet that traded the same market within the coordination
/// window, carried in for the CLUSTER_ACTIVITY detector.
pub struct ClusterPeer {
    pub wallet: String,
    pub amount_usd: f64,
}

pub struct DetectionContext<'a> {
    pub wallet: &'a WalletProfile,
    pub market: Option<&'a Market>,
    pub stats: MarketStatsSnapshot,
    pub z_score: Option<f64>,
    pub impact_ratio: f64,
    pub entity_member_count: Option<usize>,
    pub cluster_peers: &'a [ClusterPeer],
    /// Lifetime-volume whale boolean (§3 `is_whale`), evaluated against
    /// `cfg.whale_wallet_volume_usd` by the caller.
    pub is_whale_wallet: bool,
    pub now: DateTime<Utc>,
}

fn large_trade_bonus(amount_usd: f64, whale_threshold_usd: f64) -> i32 {
    if amount_usd >= whale_threshold_usd * 5.0 {
        4
    } else if amount_usd >= whale_threshold_usd * 2.0 {
        3
    } else if amount_usd >= whale_threshold_usd {
        2
    } else if amount_usd >= whale_threshold_usd * 0.5 {
        1
    } else {
        0
    }
}

fn base_score(trade: &Trade, ctx: &DetectionContext, cfg: &Config) -> i32 {
    let mut score = 5;
    score += large_trade_bonus(trade.amount_usd, cfg.whale_threshold_usd);
    if ctx.wallet.is_new() {
        score += 2;
    }
    if ctx.is_whale_wallet {
        score += 1;
    }
    if ctx
        .wallet
        .is_smart_money(cfg.smart_money_min_volume_usd, cfg.smart_money_min_win_rate, cfg.smart_money_min_resolved)
    {
        score += 2;
    }
    if ctx.wallet.is_focused() {
        score += 1;
    }
    if ctx.wallet.is_heavy_actor(ctx.now) {
        score += 1;
    }
    if ctx.wallet.is_repeat_actor(ctx.now) {
        score += 1;
    }
    score
}

fn clamp_score(score: i32) -> u8 {
    score.clamp(1, 10) as u8
}

fn market_probability(trade: &Trade, market: Option<&Market>) -> f64 {
    // §9 design note: fall back to the trade's own price when market
    // reference prices are uncached, so contrarian/extreme-confidence
    // detectors still work before metadata refresh.
    market
        .and_then(|m| m.outcome_prices.get(&trade.outcome).copied())
        .unwrap_or(trade.price)
}

fn detect_whale_trade(trade: &Trade, ctx: &DetectionContext, cfg: &Config) -> Option<Trigger> {
    if trade.amount_usd >= cfg.whale_threshold_usd {
        Some(Trigger {
            alert_type: AlertType::WhaleTrade,
            message: format!("Whale trade: ${:.0}", trade.amount_usd),
            score: clamp_score(base_score(trade, ctx, cfg)),
        })
    } else {
        None
    }
}

fn detect_unusual_size(trade: &Trade, ctx: &DetectionContext, cfg: &Config) -> Option<Trigger> {
    if ctx.stats.n < cfg.min_trades_for_stats || trade.amount_usd >= cfg.whale_threshold_usd {
        return None;
    }
    let z = ctx.z_score?;
    if z >= cfg.std_multiplier {
        Some(Trigger {
            alert_type: AlertType::UnusualSize,
            message: format!("Unusual size: z-score {:.2}", z),
            score: clamp_score(base_score(trade, ctx, cfg)),
        })
    } else {
        None
    }
}

fn detect_new_wallet(trade: &Trade, ctx: &DetectionContext, cfg: &Config) -> Option<Trigger> {
    if trade.is_anonymous() || !ctx.wallet.is_new() || trade.amount_usd < cfg.new_wallet_threshold_usd {
        return None;
    }
    Some(Trigger {
        alert_type: AlertType::NewWallet,
        message: "New wallet making a sizable trade".to_string(),
        score: clamp_score(base_score(trade, ctx, cfg) + 1),
    })
}

fn detect_smart_money(trade: &Trade, ctx: &DetectionContext, cfg: &Config) -> Option<Trigger> {
    if trade.is_anonymous() || trade.amount_usd < 500.0 {
        return None;
    }
    if !ctx
        .wallet
        .is_smart_money(cfg.smart_money_min_volume_usd, cfg.smart_money_min_win_rate, cfg.smart_money_min_resolved)
    {
        return None;
    }
    Some(Trigger {
        alert_type: AlertType::SmartMoney,
        message: "Smart money wallet trading".to_string(),
        score: clamp_score(base_score(trade, ctx, cfg) + 1),
    })
}

fn detect_vip_wallet(trade: &Trade, ctx: &DetectionContext, cfg: &Config) -> Option<Trigger> {
    if trade.is_anonymous() {
        return None;
    }
    if !ctx
        .wallet
        .is_vip(cfg.vip_min_volume_usd, cfg.vip_min_win_rate, cfg.vip_min_large_trades)
    {
        return None;
    }
    Some(Trigger {
        alert_type: AlertType::VipWallet,
        message: "VIP wallet activity".to_string(),
        score: clamp_score(base_score(trade, ctx, cfg)),
    })
}

fn detect_repeat_actor(trade: &Trade, ctx: &DetectionContext, cfg: &Config) -> Option<Trigger> {
    if trade.is_anonymous() || trade.amount_usd < 1_000.0 || !ctx.wallet.is_repeat_actor(ctx.now) {
        return None;
    }
    Some(Trigger {
        alert_type: AlertType::RepeatActor,
        message: "Repeat actor: 3+ trades in the last hour".to_string(),
        score: clamp_score(base_score(trade, ctx, cfg)),
    })
}

fn detect_heavy_actor(trade: &Trade, ctx: &DetectionContext, cfg: &Config) -> Option<Trigger> {
    if trade.is_anonymous() || trade.amount_usd < 500.0 || !ctx.wallet.is_heavy_actor(ctx.now) {
        return None;
    }
    Some(Trigger {
        alert_type: AlertType::HeavyActor,
        message: "Heavy actor: 10+ trades in the last 24h".to_string(),
        score: clamp_score(base_score(trade, ctx, cfg)),
    })
}

fn detect_whale_exit(trade: &Trade, ctx: &DetectionContext, cfg: &Config) -> Option<Trigger> {
    if !cfg.enable_whale_exit || trade.is_anonymous() || trade.side != Side::Sell {
        return None;
    }
    if trade.amount_usd < cfg.exit_threshold_usd {
        return None;
    }
    let cumulative_buys = ctx
        .wallet
        .positions
        .get(&trade.market_id)
        .and_then(|by_outcome| by_outcome.get(&trade.outcome))
        .map(|p| p.buy_usd)
        .unwrap_or(0.0);
    if cumulative_buys < cfg.whale_threshold_usd {
        return None;
    }
    Some(Trigger {
        alert_type: AlertType::WhaleExit,
        message: "Whale exiting a large position".to_string(),
        score: clamp_score(base_score(trade, ctx, cfg)),
    })
}

fn detect_contrarian(trade: &Trade, ctx: &DetectionContext, cfg: &Config) -> Option<Trigger> {
    if !cfg.enable_contrarian || trade.side != Side::Buy {
        return None;
    }
    if trade.amount_usd < cfg.contrarian_threshold_usd {
        return None;
    }
    let probability = market_probability(trade, ctx.market);
    if probability > cfg.contrarian_probability_ceiling {
        return None;
    }
    Some(Trigger {
        alert_type: AlertType::Contrarian,
        message: format!("Contrarian buy at probability {:.2}", probability),
        score: clamp_score(base_score(trade, ctx, cfg) + 2),
    })
}

fn detect_extreme_confidence(trade: &Trade, ctx: &DetectionContext, cfg: &Config) -> Option<Trigger> {
    if !cfg.enable_extreme_confidence || trade.amount_usd < 2_000.0 {
        return None;
    }
    let probability = market_probability(trade, ctx.market);
    if probability < cfg.extreme_confidence_high && probability > cfg.extreme_confidence_low {
        return None;
    }
    let bump = if probability <= 0.10 { 2 } else { 0 };
    Some(Trigger {
        alert_type: AlertType::ExtremeConfidence,
        message: format!("Extreme confidence trade at probability {:.2}", probability),
        score: clamp_score(base_score(trade, ctx, cfg) + bump),
    })
}

fn detect_cluster_activity(trade: &Trade, ctx: &DetectionContext, cfg: &Config) -> Option<Trigger> {
    if trade.is_anonymous() || trade.amount_usd < cfg.cluster_min_amount_usd {
        return None;
    }
    let matching = ctx
        .cluster_peers
        .iter()
        .filter(|p| p.wallet != trade.trader_id && p.amount_usd >= trade.amount_usd * 0.5 && p.amount_usd <= trade.amount_usd * 2.0)
        .count();
    if matching < 2 {
        return None;
    }
    Some(Trigger {
        alert_type: AlertType::ClusterActivity,
        message: format!("Coordinated activity: {matching} peer wallets in the same market"),
        score: clamp_score(base_score(trade, ctx, cfg) + 2),
    })
}

fn detect_high_impact(trade: &Trade, ctx: &DetectionContext, cfg: &Config) -> Option<Trigger> {
    if trade.amount_usd < cfg.high_impact_min_amount_usd || ctx.impact_ratio < cfg.high_impact_ratio {
        return None;
    }
    Some(Trigger {
        alert_type: AlertType::HighImpact,
        message: format!("High market impact: {:.0}% of hourly volume", ctx.impact_ratio * 100.0),
        score: clamp_score(base_score(trade, ctx, cfg)),
    })
}

fn detect_entity_activity(trade: &Trade, ctx: &DetectionContext, cfg: &Config) -> Option<Trigger> {
    if trade.is_anonymous() || trade.amount_usd < 1_000.0 {
        return None;
    }
    match ctx.entity_member_count {
        Some(n) if n >= 2 => Some(Trigger {
            alert_type: AlertType::EntityActivity,
            message: format!("Wallet belongs to a {n}-wallet entity"),
            score: clamp_score(base_score(trade, ctx, cfg)),
        }),
        _ => None,
    }
}

fn detect_focused_wallet(trade: &Trade, ctx: &DetectionContext, cfg: &Config) -> Option<Trigger> {
    if !cfg.enable_focused_wallet || trade.is_anonymous() || trade.amount_usd < cfg.focused_wallet_threshold_usd {
        return None;
    }
    if !ctx.wallet.is_focused() {
        return None;
    }
    Some(Trigger {
        alert_type: AlertType::FocusedWallet,
        message: "Focused wallet: concentrated in a handful of markets".to_string(),
        score: clamp_score(base_score(trade, ctx, cfg)),
    })
}

type DetectorFn = fn(&Trade, &DetectionContext, &Config) -> Option<Trigger>;

const DETECTORS: &[DetectorFn] = &[
    detect_whale_trade,
    detect_unusual_size,
    detect_new_wallet,
    detect_smart_money,
    detect_vip_wallet,
    detect_repeat_actor,
    detect_heavy_actor,
    detect_whale_exit,
    detect_contrarian,
    detect_extreme_confidence,
    detect_cluster_activity,
    detect_high_impact,
    detect_entity_activity,
    detect_focused_wallet,
];

/// Runs every detector in fixed order, collecting whichever triggers.
pub fn detect_all(trade: &Trade, ctx: &DetectionContext, cfg: &Config) -> Vec<Trigger> {
    DETECTORS.iter().filter_map(|detector| detector(trade, ctx, cfg)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MarketStatsSnapshot, Venue, WalletProfile};

    fn trade(amount: f64, anonymous: bool, side: Side) -> Trade {
        Trade {
            id: "t1".to_string(),
            venue: Venue::Polymarket,
            market_id: "m1".to_string(),
            trader_id: if anonymous { "KALSHI_ANON".to_string() } else { "0xabc".to_string() },
            trader_identity_known: !anonymous,
            outcome: "Yes".to_string(),
            side,
            size: amount,
            price: 0.5,
            amount_usd: amount,
            timestamp: Utc::now(),
            tx_hash: None,
        }
    }

    fn ctx<'a>(wallet: &'a WalletProfile, now: DateTime<Utc>) -> DetectionContext<'a> {
        DetectionContext {
            wallet,
            market: None,
            stats: MarketStatsSnapshot { mean: 0.0, std_dev: 0.0, n: 0 },
            z_score: None,
            impact_ratio: 0.0,
            entity_member_count: None,
            cluster_peers: &[],
            is_whale_wallet: false,
            now,
        }
    }

    #[test]
    fn whale_trade_fires_above_threshold() {
        let now = Utc::now();
        let wallet = WalletProfile::new("0xabc".into(), now);
        let cfg = Config::default();
        let t = trade(25_000.0, false, Side::Buy);
        let c = ctx(&wallet, now);
        let triggers = detect_all(&t, &c, &cfg);
        assert!(triggers.iter().any(|tr| tr.alert_type == AlertType::WhaleTrade));
    }

    #[test]
    fn anonymous_trade_never_triggers_identity_detectors() {
        let now = Utc::now();
        let mut wallet = WalletProfile::new("KALSHI_ANON".into(), now);
        wallet.total_volume_usd = 500_000.0;
        wallet.winning_trades = 20;
        let cfg = Config::default();
        let t = trade(50_000.0, true, Side::Buy);
        let c = ctx(&wallet, now);
        let triggers = detect_all(&t, &c, &cfg);
        assert!(!triggers.iter().any(|tr| matches!(
            tr.alert_type,
            AlertType::NewWallet | AlertType::SmartMoney | AlertType::VipWallet
        )));
        assert!(triggers.iter().any(|tr| tr.alert_type == AlertType::WhaleTrade));
    }

    #[test]
    fn gated_detectors_are_off_by_default() {
        let now = Utc::now();
        let wallet = WalletProfile::new("0xabc".into(), now);
        let cfg = Config::default();
        let t = trade(10_000.0, false, Side::Sell);
        let c = ctx(&wallet, now);
        let triggers = detect_all(&t, &c, &cfg);
        assert!(!triggers.iter().any(|tr| tr.alert_type == AlertType::WhaleExit));
    }

    #[test]
    fn whale_wallet_flag_raises_score_over_an_identical_non_whale_trade() {
        let now = Utc::now();
        let wallet = WalletProfile::new("0xabc".into(), now);
        let cfg = Config::default();
        let t = trade(25_000.0, false, Side::Buy);

        let mut plain = ctx(&wallet, now);
        let whale_trigger = {
            plain.is_whale_wallet = true;
            detect_all(&t, &plain, &cfg)
        };
        plain.is_whale_wallet = false;
        let base_trigger = detect_all(&t, &plain, &cfg);

        let whale_score = whale_trigger.iter().find(|tr| tr.alert_type == AlertType::WhaleTrade).unwrap().score;
        let base_score = base_trigger.iter().find(|tr| tr.alert_type == AlertType::WhaleTrade).unwrap().score;
        assert!(whale_score >= base_score);
    }

    #[test]
    fn contrarian_respects_fallback_price_when_market_uncached() {
        let now = Utc::now();
        let wallet = WalletProfile::new("0xabc".into(), now);
        let mut cfg = Config::default();
        cfg.enable_contrarian = true;
        let mut t = trade(5_000.0, false, Side::Buy);
        t.price = 0.10;
        let c = ctx(&wallet, now); // market: None -> falls back to trade.price
        let triggers = detect_all(&t, &c, &cfg);
        assert!(triggers.iter().any(|tr| tr.alert_type == AlertType::Contrarian));
    }
}
