//! §7 error taxonomy. Callers branch on kind rather than message text;
//! adapters and the ingestion controller use this instead of bare `anyhow`
//! wherever policy (retry / drop / reconnect / don't-propagate) depends on
//! which kind fired.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Network/5xx/parse-timeout from a venue adapter. Retried with
    /// exponential backoff by the caller; must not break ingestion.
    #[error("adapter transient error ({venue}): {source}")]
    AdapterTransient {
        venue: String,
        #[source]
        source: anyhow::Error,
    },

    /// 4xx or unexpected schema from a venue adapter. Logged, item
    /// dropped, batch continues.
    #[error("adapter protocol error ({venue}): {message}")]
    AdapterProtocol { venue: String, message: String },

    /// Streaming connection dropped. Reconnect is bounded; once attempts
    /// are exhausted the stream is marked dead but polling continues.
    #[error("stream disconnected ({venue}): {reason}")]
    StreamDisconnect { venue: String, reason: String },

    /// A panic-worthy bug inside a detector. Must never escape the
    /// per-trade step; caught at the pipeline boundary, logged, and the
    /// trade is still marked processed to avoid replay storms.
    #[error("detector internal error: {0}")]
    DetectorInternal(String),

    /// An `AlertSink` failed to deliver. Logged by the sink adapter
    /// itself; core does not retry.
    #[error("sink failure: {0}")]
    SinkFailure(String),

    /// An `AlertStore`/`MarketQuestionsProvider` call failed. Logged;
    /// never blocks alert emission since the alert is already computed.
    #[error("store failure: {0}")]
    StoreFailure(String),
}

impl PipelineError {
    pub fn is_fatal_for_stream(&self) -> bool {
        matches!(self, PipelineError::StreamDisconnect { .. })
    }
}
