//! Venue Adapters (§4.1). Each venue normalizes venue-native trades and
//! market metadata into the canonical `Trade`/`Market` model. Retry/backoff
//! shape is grounded on the donor's `scrapers/dome_tracker.rs::retry_request`;
//! trader-identity gating follows the §9 design note (adapter-declared
//! `supports_trader_identity`, not string-prefix matching in core).

pub mod kalshi;
pub mod polymarket;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use crate::errors::PipelineError;
use crate::models::{Market, StreamState, Trade};

#[async_trait]
pub trait VenueAdapter: Send + Sync {
    fn venue(&self) -> crate::models::Venue;

    /// Whether this venue reports a real trader identity; if false, every
    /// `Trade` it produces must carry `trader_identity_known = false`.
    fn supports_trader_identity(&self) -> bool;

    async fn list_active_markets(&self, limit: usize) -> Result<Vec<Market>, PipelineError>;

    async fn recent_trades(&self, since: Option<DateTime<Utc>>, limit: usize) -> Result<Vec<Trade>, PipelineError>;

    /// Optional streaming source. Returns a receiver of trades and a
    /// receiver of `StreamState` transitions (§4.8: the adapter owns the
    /// background connection task and its bounded reconnect loop, and
    /// reports `Reconnecting`/`Disconnected` back through the state
    /// channel as attempts are made and exhausted). Default: unsupported.
    async fn stream_trades(&self) -> Option<(mpsc::UnboundedReceiver<Trade>, mpsc::UnboundedReceiver<StreamState>)> {
        None
    }

    /// Whether this venue's REST surface supports a secondary,
    /// whale-only poll (a min-amount filter in-band) so high-value
    /// trades aren't stuck behind the general `limit` cap (§4.8). Default:
    /// unsupported.
    fn supports_whale_only_fetch(&self) -> bool {
        false
    }

    /// Secondary whale-only fetch; only called when
    /// `supports_whale_only_fetch()` is true. Default: empty.
    async fn recent_whale_trades(
        &self,
        _since: Option<DateTime<Utc>>,
        _min_amount_usd: f64,
        _limit: usize,
    ) -> Result<Vec<Trade>, PipelineError> {
        Ok(Vec::new())
    }
}

/// Exponential backoff matching the donor's `dome_tracker.rs::retry_request`
/// (100ms base, doubling, capped at 16s).
pub async fn retry_backoff_delay(attempt: u32) -> std::time::Duration {
    let base = std::time::Duration::from_millis(100);
    let capped = base * 2u32.saturating_pow(attempt.min(8));
    capped.min(std::time::Duration::from_secs(16))
}
