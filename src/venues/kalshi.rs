//! Kalshi venue adapter (§4.1, §6). Kalshi does not expose a trader
//! address, so every trade is stamped `trader_identity_known = false`
//! with the venue sentinel trader id `KALSHI_ANON`. Prices are
//! normalized from integer cents to the [0,1] probability scale.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use tracing::warn;

use crate::errors::PipelineError;
use crate::models::{Category, Market, Side, Trade, Venue};

use super::VenueAdapter;

const MAX_RETRIES: u32 = 5;

/// Every anonymous Kalshi trade collapses onto this sentinel wallet id
/// so wallet-level detectors (whale/smart-money/cluster) never fire on
/// it (§9 design note: `supports_trader_identity() == false` is what
/// actually gates those detectors, this sentinel is just a stable key).
pub const KALSHI_ANON_TRADER_ID: &str = "KALSHI_ANON";

#[derive(Debug, Clone, Deserialize)]
struct KalshiMarket {
    ticker: String,
    #[serde(default)]
    event_ticker: Option<String>,
    title: String,
    #[serde(default)]
    subtitle: Option<String>,
    #[serde(default)]
    yes_bid: Option<i64>,
    #[serde(default)]
    no_bid: Option<i64>,
    #[serde(default)]
    volume: Option<f64>,
    #[serde(default)]
    close_time: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct KalshiMarketsResponse {
    markets: Vec<KalshiMarket>,
}

#[derive(Debug, Clone, Deserialize)]
struct KalshiTrade {
    trade_id: String,
    ticker: String,
    #[serde(default)]
    taker_side: Option<String>,
    count: f64,
    yes_price: i64,
    created_time: String,
}

#[derive(Debug, Deserialize)]
struct KalshiTradesResponse {
    trades: Vec<KalshiTrade>,
}

pub struct KalshiAdapter {
    http: reqwest::Client,
    base_url: String,
}

impl KalshiAdapter {
    pub fn new(base_url: String) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self { http, base_url })
    }

    async fn retry_get(&self, url: &str, query: &[(&str, String)]) -> Result<reqwest::Response, PipelineError> {
        let mut backoff = Duration::from_millis(100);
        for attempt in 1..=MAX_RETRIES {
            let result = self.http.get(url).query(query).send().await;
            match result {
                Ok(resp) if resp.status().is_success() => return Ok(resp),
                Ok(resp) if resp.status().as_u16() == 429 => {
                    warn!(attempt, "kalshi rate limited, backing off 60s");
                    tokio::time::sleep(Duration::from_secs(60)).await;
                }
                Ok(resp) if resp.status().is_server_error() => {
                    warn!(attempt, status = %resp.status(), "kalshi server error, retrying");
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(Duration::from_secs(16));
                }
                Ok(resp) => {
                    let status = resp.status();
                    let body = resp.text().await.unwrap_or_default();
                    return Err(PipelineError::AdapterProtocol {
                        venue: "kalshi".to_string(),
                        message: format!("{status}: {body}"),
                    });
                }
                Err(e) => {
                    if attempt == MAX_RETRIES {
                        return Err(PipelineError::AdapterTransient { venue: "kalshi".to_string(), source: e.into() });
                    }
                    warn!(attempt, error = %e, "kalshi request failed, retrying");
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(Duration::from_secs(16));
                }
            }
        }
        Err(PipelineError::AdapterTransient { venue: "kalshi".to_string(), source: anyhow::anyhow!("max retries exceeded") })
    }

    fn to_market(&self, raw: KalshiMarket) -> Market {
        let question = match raw.subtitle {
            Some(ref s) if !s.is_empty() => format!("{} {}", raw.title, s),
            _ => raw.title.clone(),
        };
        let category = crate::market_cache::infer_category(&question, &raw.ticker);
        let end_time = raw
            .close_time
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc));

        let mut outcome_prices = std::collections::HashMap::new();
        if let Some(yes) = raw.yes_bid {
            outcome_prices.insert("Yes".to_string(), yes as f64 / 100.0);
        }
        if let Some(no) = raw.no_bid {
            outcome_prices.insert("No".to_string(), no as f64 / 100.0);
        }

        let active = raw.status.as_deref().map(|s| s == "active").unwrap_or(true);
        let is_hf = crate::market_cache::is_high_frequency_slug(&raw.ticker);

        Market {
            id: raw.ticker.clone(),
            venue: Venue::Kalshi,
            question,
            slug: raw.ticker,
            category,
            outcome_prices,
            volume: raw.volume.unwrap_or(0.0),
            end_time,
            active,
            url: None,
            is_sports: category == Category::Sports,
            is_high_frequency: is_hf,
            updated_at: Utc::now(),
        }
    }

    fn to_trade(&self, raw: KalshiTrade) -> Option<Trade> {
        let side = match raw.taker_side.as_deref() {
            Some("yes") => Side::Buy,
            Some("no") => Side::Sell,
            _ => Side::Buy,
        };
        let price = raw.yes_price as f64 / 100.0;
        let amount_usd = raw.count * price;
        let timestamp = DateTime::parse_from_rfc3339(&raw.created_time)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now());

        Some(Trade {
            id: format!("kalshi_{}", raw.trade_id),
            venue: Venue::Kalshi,
            market_id: raw.ticker,
            trader_id: KALSHI_ANON_TRADER_ID.to_string(),
            trader_identity_known: false,
            outcome: "Yes".to_string(),
            side,
            size: raw.count,
            price,
            amount_usd,
            timestamp,
            tx_hash: None,
        })
    }
}

#[async_trait]
impl VenueAdapter for KalshiAdapter {
    fn venue(&self) -> Venue {
        Venue::Kalshi
    }

    fn supports_trader_identity(&self) -> bool {
        false
    }

    async fn list_active_markets(&self, limit: usize) -> Result<Vec<Market>, PipelineError> {
        let limit = limit.min(1000);
        let url = format!("{}/markets", self.base_url);
        let resp = self
            .retry_get(&url, &[("status", "open".to_string()), ("limit", limit.to_string())])
            .await?;
        let body: KalshiMarketsResponse = resp.json().await.map_err(|e| PipelineError::AdapterProtocol {
            venue: "kalshi".to_string(),
            message: e.to_string(),
        })?;
        Ok(body.markets.into_iter().map(|m| self.to_market(m)).collect())
    }

    async fn recent_trades(&self, since: Option<DateTime<Utc>>, limit: usize) -> Result<Vec<Trade>, PipelineError> {
        let url = format!("{}/markets/trades", self.base_url);
        let mut query = vec![("limit", limit.to_string())];
        if let Some(since) = since {
            query.push(("min_ts", since.timestamp().to_string()));
        }
        let resp = self.retry_get(&url, &query).await?;
        let body: KalshiTradesResponse = resp.json().await.map_err(|e| PipelineError::AdapterProtocol {
            venue: "kalshi".to_string(),
            message: e.to_string(),
        })?;
        Ok(body.trades.into_iter().filter_map(|t| self.to_trade(t)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter() -> KalshiAdapter {
        KalshiAdapter::new("https://trading-api.kalshi.com/trade-api/v2".to_string()).unwrap()
    }

    #[test]
    fn anonymous_trades_carry_sentinel_id_and_false_identity() {
        let raw = KalshiTrade {
            trade_id: "abc123".to_string(),
            ticker: "KXBTCD-24DEC31".to_string(),
            taker_side: Some("yes".to_string()),
            count: 100.0,
            yes_price: 62,
            created_time: Utc::now().to_rfc3339(),
        };
        let trade = adapter().to_trade(raw).unwrap();
        assert_eq!(trade.trader_id, KALSHI_ANON_TRADER_ID);
        assert!(!trade.trader_identity_known);
        assert!(trade.is_anonymous());
    }

    #[test]
    fn price_normalized_from_cents_to_probability() {
        let raw = KalshiTrade {
            trade_id: "abc124".to_string(),
            ticker: "KXBTCD-24DEC31".to_string(),
            taker_side: Some("no".to_string()),
            count: 10.0,
            yes_price: 75,
            created_time: Utc::now().to_rfc3339(),
        };
        let trade = adapter().to_trade(raw).unwrap();
        assert!((trade.price - 0.75).abs() < 1e-9);
        assert!((trade.amount_usd - 7.5).abs() < 1e-9);
    }

    #[test]
    fn supports_trader_identity_is_false() {
        assert!(!adapter().supports_trader_identity());
    }
}
