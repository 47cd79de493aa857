//! Market Metadata Cache (§4.2). In-process, keyed by market_id.
//! Grounded on the donor's `scrapers/polymarket_gamma.rs::gamma_market_lookup`
//! cache-check-then-fetch-then-cache pattern, but held in memory
//! (`parking_lot::RwLock`) rather than SQLite-backed, since durable
//! storage is an out-of-scope external collaborator (§6).

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::models::{Category, Market};

const DEFAULT_TTL: Duration = Duration::from_secs(24 * 3600);

const SPORTS_KEYWORDS: &[&str] = &[
    "nfl", "nba", "nhl", "mlb", "soccer", "football", "basketball", "baseball",
    "hockey", "tennis", "golf", "ufc", "mma", "boxing", "olympics", "world cup",
    "super bowl", "playoffs", "championship game",
];
const CRYPTO_KEYWORDS: &[&str] = &["bitcoin", "btc", "ethereum", "eth", "crypto", "solana", "sol"];
const POLITICS_KEYWORDS: &[&str] = &[
    "election", "president", "senate", "congress", "governor", "primary", "vote",
];
const FINANCE_KEYWORDS: &[&str] = &["fed", "interest rate", "inflation", "cpi", "gdp", "recession"];
const ENTERTAINMENT_KEYWORDS: &[&str] = &["oscar", "grammy", "movie", "box office", "award"];
const SCIENCE_KEYWORDS: &[&str] = &["nasa", "spacex", "vaccine", "climate"];

/// Ticker prefixes that unambiguously identify a category regardless of
/// question text (e.g. Kalshi's `KXNBA*` series).
const SPORTS_TICKER_PREFIXES: &[&str] = &["KXNBA", "KXNFL", "KXMLB", "KXNHL", "KXSOCCER"];

/// High-frequency market slug patterns (e.g. 15-minute BTC up/down
/// series) that should be elided from alerting regardless of category.
const HIGH_FREQUENCY_PATTERNS: &[&str] = &["-15m-", "-5m-", "-1h-up-down", "updown15m"];

struct CachedMarket {
    market: Market,
    fetched_at: DateTime<Utc>,
}

pub struct MarketMetadataCache {
    entries: RwLock<HashMap<String, CachedMarket>>,
    ttl: Duration,
}

impl MarketMetadataCache {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl: DEFAULT_TTL,
        }
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    pub fn get(&self, market_id: &str) -> Option<Market> {
        self.entries.read().get(market_id).map(|c| c.market.clone())
    }

    /// True if a fresh (non-expired) entry exists for this market_id.
    pub fn is_fresh(&self, market_id: &str, now: DateTime<Utc>) -> bool {
        self.entries
            .read()
            .get(market_id)
            .map(|c| now.signed_duration_since(c.fetched_at).num_seconds() <= self.ttl.as_secs() as i64)
            .unwrap_or(false)
    }

    /// Insert or refresh a market record. Category is inferred once and
    /// kept sticky for the session unless the caller overwrites it again
    /// with a different `Market::category` (re-inference is idempotent
    /// since it's a pure function of `question`/`slug`).
    pub fn upsert(&self, mut market: Market, now: DateTime<Utc>) {
        if market.category == Category::Other {
            market.category = infer_category(&market.question, &market.slug);
        }
        market.is_sports = market.category == Category::Sports || has_sports_ticker_prefix(&market.slug);
        market.is_high_frequency = is_high_frequency_slug(&market.slug);
        market.updated_at = now;
        self.entries.write().insert(
            market.id.clone(),
            CachedMarket {
                market,
                fetched_at: now,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// market_ids present in `known` but absent from the cache, i.e. the
    /// set a bulk refresh should prioritize (§4.8 "opportunistic refresh
    /// for unknown market_ids").
    pub fn unknown_of<'a>(&self, known: impl Iterator<Item = &'a str>) -> Vec<String> {
        let entries = self.entries.read();
        known
            .filter(|id| !entries.contains_key(*id))
            .map(|s| s.to_string())
            .collect()
    }
}

impl Default for MarketMetadataCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Keyword match on question text, falling back to ticker-prefix
/// heuristics (§4.2).
pub fn infer_category(question: &str, slug: &str) -> Category {
    let q = question.to_lowercase();
    let s = slug.to_lowercase();

    if has_sports_ticker_prefix(slug) || SPORTS_KEYWORDS.iter().any(|k| q.contains(k) || s.contains(k)) {
        return Category::Sports;
    }
    if CRYPTO_KEYWORDS.iter().any(|k| q.contains(k) || s.contains(k)) {
        return Category::Crypto;
    }
    if POLITICS_KEYWORDS.iter().any(|k| q.contains(k)) {
        return Category::Politics;
    }
    if FINANCE_KEYWORDS.iter().any(|k| q.contains(k)) {
        return Category::Finance;
    }
    if ENTERTAINMENT_KEYWORDS.iter().any(|k| q.contains(k)) {
        return Category::Entertainment;
    }
    if SCIENCE_KEYWORDS.iter().any(|k| q.contains(k)) {
        return Category::Science;
    }
    Category::Other
}

fn has_sports_ticker_prefix(slug: &str) -> bool {
    let upper = slug.to_uppercase();
    SPORTS_TICKER_PREFIXES.iter().any(|p| upper.starts_with(p))
}

pub fn is_high_frequency_slug(slug: &str) -> bool {
    let lower = slug.to_lowercase();
    HIGH_FREQUENCY_PATTERNS.iter().any(|p| lower.contains(p))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sports_keyword_wins_category() {
        assert_eq!(infer_category("Will the Lakers win the NBA championship?", "lakers-nba"), Category::Sports);
    }

    #[test]
    fn ticker_prefix_fallback() {
        assert!(has_sports_ticker_prefix("KXNBA-25DEC01-LAL"));
        assert_eq!(infer_category("Random question with no keywords", "KXNBA-25DEC01-LAL"), Category::Sports);
    }

    #[test]
    fn high_frequency_slug_detection() {
        assert!(is_high_frequency_slug("btc-updown15m-2026-01-01-12pm"));
        assert!(!is_high_frequency_slug("will-candidate-win-2028"));
    }

    #[test]
    fn cache_roundtrip() {
        let cache = MarketMetadataCache::new();
        let now = Utc::now();
        let market = Market {
            id: "m1".into(),
            venue: crate::models::Venue::Polymarket,
            question: "Will BTC hit 100k?".into(),
            slug: "btc-100k".into(),
            category: Category::Other,
            outcome_prices: HashMap::new(),
            volume: 0.0,
            end_time: None,
            active: true,
            url: None,
            is_sports: false,
            is_high_frequency: false,
            updated_at: now,
        };
        cache.upsert(market, now);
        let got = cache.get("m1").unwrap();
        assert_eq!(got.category, Category::Other);
        assert!(got.is_sports == false);
        assert!(cache.is_fresh("m1", now));
    }
}
