//! External interfaces (§6): outbound collaborators the core calls into
//! but never implements beyond a trait and trivial in-memory/no-op
//! fixtures for tests. Notification channels, durable stores, digest
//! schedulers and AI enrichment are out of scope (§1) — shape only,
//! following the donor's `#[async_trait]` convention for storage-shaped
//! traits.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::errors::PipelineError;
use crate::models::Alert;

/// At-least-once, non-blocking from the pipeline's perspective.
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn emit(&self, alert: &Alert) -> Result<(), PipelineError>;
}

/// Durable persistence; failure here must never block alert emission
/// since the alert is already computed (§7 StoreFailure policy).
#[async_trait]
pub trait AlertStore: Send + Sync {
    async fn save(&self, alert: &Alert) -> Result<(), PipelineError>;
}

/// Resolves market ids to their human-readable question text, e.g. for
/// digest rendering or enrichment.
#[async_trait]
pub trait MarketQuestionsProvider: Send + Sync {
    async fn fetch(&self, ids: &[String]) -> Result<HashMap<String, String>, PipelineError>;
}

/// The "optional on-chain wallet profiler" named in §1: resolves a
/// trader id to whatever wallet funded it, when that lookup is
/// available. Feeds the cluster engine's shared_funder signal; absent
/// this collaborator, shared_funder simply never fires.
#[async_trait]
pub trait WalletFundingProvider: Send + Sync {
    async fn funding_wallet(&self, trader_id: &str) -> Result<Option<String>, PipelineError>;
}

/// A no-op sink; useful as a default when no downstream channel is wired.
pub struct NoopAlertSink;

#[async_trait]
impl AlertSink for NoopAlertSink {
    async fn emit(&self, _alert: &Alert) -> Result<(), PipelineError> {
        Ok(())
    }
}

/// An in-memory `AlertStore`, useful for tests and examples. This is
/// explicitly NOT the durable store the spec places out of scope —
/// state does not survive process restart.
#[derive(Default)]
pub struct InMemoryAlertStore {
    alerts: Mutex<Vec<Alert>>,
}

impl InMemoryAlertStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<Alert> {
        self.alerts.lock().clone()
    }
}

#[async_trait]
impl AlertStore for InMemoryAlertStore {
    async fn save(&self, alert: &Alert) -> Result<(), PipelineError> {
        self.alerts.lock().push(alert.clone());
        Ok(())
    }
}
