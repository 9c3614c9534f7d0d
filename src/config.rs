use std::time::Duration;

use crate::backoff::BackoffPolicy;
use crate::item::Slot;

/// Configuration for a [`crate::replay_stream::ReplayStream`]: one struct
/// with builder-style `with_*` methods, sane defaults, no required fields
/// beyond the starting slot.
#[derive(Debug, Clone)]
pub struct ReplayConfig {
    /// Historical point to start from.
    pub start_slot: Slot,
    /// Minimum overlap, in slots, between backfill head and live tail
    /// required before switching.
    pub safety_margin: Slot,
    /// `recv` timeout while streaming live.
    pub connection_timeout: Duration,
    /// Reconnect backoff policy.
    pub backoff: BackoffPolicy,
    /// Hard budget for the reconnect mini-backfill.
    pub mini_backfill_budget: Duration,
    /// Caps reconnect attempts; `None` means unbounded.
    pub max_reconnect_attempts: Option<u32>,
    /// Whether an explicit stream end (not an error) should trigger
    /// reconnect.
    pub resubscribe_on_end: bool,
    /// Bounded retry budget for the empty-page/no-cursor backfill quirk:
    /// an empty, not-done page with no cursor is treated as a transient
    /// glitch and retried in place up to this many times before falling
    /// through to the switch-to-live phase as a safety net.
    pub empty_page_retry_budget: u32,
}

impl ReplayConfig {
    pub fn new(start_slot: Slot) -> Self {
        Self {
            start_slot,
            safety_margin: 0,
            connection_timeout: Duration::from_secs(30),
            backoff: BackoffPolicy::default(),
            mini_backfill_budget: Duration::from_secs(30),
            max_reconnect_attempts: None,
            resubscribe_on_end: true,
            empty_page_retry_budget: 8,
        }
    }

    pub fn with_safety_margin(mut self, safety_margin: Slot) -> Self {
        self.safety_margin = safety_margin;
        self
    }

    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_mini_backfill_budget(mut self, budget: Duration) -> Self {
        self.mini_backfill_budget = budget;
        self
    }

    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = Some(attempts);
        self
    }

    pub fn with_resubscribe_on_end(mut self, resubscribe: bool) -> Self {
        self.resubscribe_on_end = resubscribe;
        self
    }

    pub fn with_empty_page_retry_budget(mut self, budget: u32) -> Self {
        self.empty_page_retry_budget = budget;
        self
    }
}

/// Configuration for [`crate::account::AccountReplay`].
#[derive(Debug, Clone)]
pub struct AccountReplayConfig {
    /// Resume point: server-side filters skip history below this slot.
    pub min_slot: Slot,
    /// Retry budget for fetching a single account during backfill.
    pub max_get_account_retries: u32,
    /// Linear backoff step for account-fetch retries (`step * attempt`).
    pub get_account_retry_step: Duration,
    /// Reconnect backoff for the steady-state account stream.
    pub backoff: BackoffPolicy,
    /// Page assembler timeout.
    pub assembly_timeout: Duration,
    /// Page assembler per-address quota.
    pub max_pending_per_address: usize,
    /// Page assembler cleanup tick interval.
    pub cleanup_interval: Duration,
}

impl Default for AccountReplayConfig {
    fn default() -> Self {
        Self {
            min_slot: 0,
            max_get_account_retries: 3,
            get_account_retry_step: Duration::from_millis(100),
            backoff: BackoffPolicy::default(),
            assembly_timeout: Duration::from_secs(30),
            max_pending_per_address: 10,
            cleanup_interval: Duration::from_secs(10),
        }
    }
}

impl AccountReplayConfig {
    pub fn with_min_slot(mut self, min_slot: Slot) -> Self {
        self.min_slot = min_slot;
        self
    }

    pub fn with_max_get_account_retries(mut self, retries: u32) -> Self {
        self.max_get_account_retries = retries;
        self
    }

    pub fn with_get_account_retry_step(mut self, step: Duration) -> Self {
        self.get_account_retry_step = step;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_assembly_timeout(mut self, timeout: Duration) -> Self {
        self.assembly_timeout = timeout;
        self
    }

    pub fn with_max_pending_per_address(mut self, max_pending: usize) -> Self {
        self.max_pending_per_address = max_pending;
        self
    }

    pub fn with_cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }
}
