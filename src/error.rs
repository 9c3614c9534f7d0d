use thiserror::Error;

/// Opaque transport error surfaced by a capability implementation.
///
/// The engine never inspects transport errors; it only decides, based on
/// where they were raised, whether to retry or propagate.
pub type TransportError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum ReplayError {
    /// `fetchBackfill` failed. Fatal to the current BACKFILLING iteration;
    /// propagated to the caller (retry is the caller's policy).
    #[error("backfill transport error: {0}")]
    BackfillTransport(#[source] TransportError),

    /// The live subscription failed to connect or was lost. Always retried
    /// internally via reconnect/backoff; only surfaced if reconnection is
    /// exhausted.
    #[error("live transport error: {0}")]
    LiveTransport(#[source] TransportError),

    /// No message arrived on the live stream within `connection_timeout`.
    /// Treated identically to `LiveTransport`.
    #[error("live stream timed out waiting for a message")]
    StreamHung,

    /// Reconnection attempts were exhausted (when `max_reconnect_attempts`
    /// is set).
    #[error("exceeded {0} reconnect attempts")]
    MaxReconnectAttempts(u32),

    /// `getAccount` failed even after the configured retry budget during
    /// account-replay backfill.
    #[error("getAccount failed for address {address} after {attempts} attempts: {source}")]
    GetAccountFailed {
        address: String,
        attempts: u32,
        #[source]
        source: TransportError,
    },

    /// The consumer dropped the iterator or called an explicit cancel.
    #[error("replay cancelled")]
    Cancelled,

    /// The underlying handoff queue was used after it was closed or failed
    /// in an inconsistent way; indicates an engine bug rather than a
    /// transport issue.
    #[error("internal queue error: {0}")]
    Internal(String),
}

pub type ReplayResult<T> = Result<T, ReplayError>;
