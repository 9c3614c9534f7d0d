//! The handover state machine: BUFFERING (via [`LivePump`]) → BACKFILLING →
//! SWITCHING → STREAMING, plus RECONNECT.

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use async_stream::stream;
use futures::Stream;
use tracing::{info, instrument, warn};

use crate::backoff::ReconnectBackoff;
use crate::capability::{BackfillRequest, BackfillSource, LiveRequest, LiveSource};
use crate::config::ReplayConfig;
use crate::error::{ReplayError, ReplayResult, TransportError};
use crate::filter::Filter;
use crate::item::Slot;
use crate::live_pump::{ExtractKey, ExtractSlot, InitialMode, LivePump};
use crate::metrics::ReplayMetrics;
use crate::queue::Next;

/// Builds a composed [`Filter`] for a given lower-bound slot.
pub type FilterBuilder = Arc<dyn Fn(Slot) -> Filter + Send + Sync>;

/// A zero-argument producer of a fresh capability set, invoked on
/// reconnect when the caller supplies one.
pub type ReconnectFactory<S> =
    Arc<dyn Fn() -> Pin<Box<dyn Future<Output = Result<S, TransportError>> + Send>> + Send + Sync>;

/// Remembers only the most recently emitted slot and the keys emitted at
/// it — a bounded-memory dedup rule, not a full seen-set.
#[derive(Default)]
struct SeenTracker {
    last_emitted_slot: Option<Slot>,
    keys_at_last_slot: HashSet<String>,
}

impl SeenTracker {
    fn is_duplicate(&self, slot: Slot, key: &str) -> bool {
        match self.last_emitted_slot {
            None => false,
            Some(last) => slot < last || (slot == last && self.keys_at_last_slot.contains(key)),
        }
    }

    fn record_emitted(&mut self, slot: Slot, key: String) {
        if self.last_emitted_slot == Some(slot) {
            self.keys_at_last_slot.insert(key);
        } else {
            self.last_emitted_slot = Some(slot);
            self.keys_at_last_slot.clear();
            self.keys_at_last_slot.insert(key);
        }
    }
}

enum Phase {
    Backfilling,
    Switching,
    Streaming,
    Reconnect,
}

/// The handover + reconnect core: drives an item source through
/// backfilling, switching to live, streaming, and reconnecting on failure.
pub struct ReplayStream<Item, S> {
    source: S,
    config: ReplayConfig,
    page_size: u32,
    extract_slot: ExtractSlot<Item>,
    extract_key: ExtractKey<Item>,
    backfill_filter: FilterBuilder,
    live_filter: FilterBuilder,
    metrics: ReplayMetrics,
    on_reconnect: Option<ReconnectFactory<S>>,
}

impl<Item, S> ReplayStream<Item, S>
where
    Item: Send + 'static,
    S: BackfillSource<Item> + LiveSource<Item> + Send + Sync + 'static,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        source: S,
        config: ReplayConfig,
        page_size: u32,
        extract_slot: ExtractSlot<Item>,
        extract_key: ExtractKey<Item>,
        backfill_filter: FilterBuilder,
        live_filter: FilterBuilder,
    ) -> Self {
        Self {
            source,
            config,
            page_size,
            extract_slot,
            extract_key,
            backfill_filter,
            live_filter,
            metrics: ReplayMetrics::new(),
            on_reconnect: None,
        }
    }

    pub fn with_reconnect_factory(mut self, factory: ReconnectFactory<S>) -> Self {
        self.on_reconnect = Some(factory);
        self
    }

    pub fn metrics(&self) -> ReplayMetrics {
        self.metrics.clone()
    }

    /// Runs the handover state machine, yielding a gap-free, duplicate-free
    /// sequence of items.
    #[instrument(skip(self))]
    pub fn run(self) -> impl Stream<Item = ReplayResult<Item>> {
        let ReplayStream {
            mut source,
            config,
            page_size,
            extract_slot,
            extract_key,
            backfill_filter,
            live_filter,
            metrics,
            on_reconnect,
        } = self;

        stream! {
            let mut current_slot = config.start_slot;
            let mut seen = SeenTracker::default();
            let mut backoff = ReconnectBackoff::new(config.backoff);
            let mut reconnect_attempts: u32 = 0;

            let mut live_pump = match LivePump::spawn(
                &source,
                LiveRequest { filter: live_filter(config.start_slot) },
                InitialMode::Buffering,
                extract_slot.clone(),
                extract_key.clone(),
                metrics.clone(),
            ).await {
                Ok(pump) => pump,
                Err(e) => {
                    yield Err(ReplayError::LiveTransport(e));
                    return;
                }
            };

            let mut phase = Phase::Backfilling;

            loop {
                match phase {
                    Phase::Backfilling => {
                        info!("entering BACKFILLING");
                        let filter = backfill_filter(config.start_slot);
                        let mut cursor: Option<S::Cursor> = None;
                        let mut empty_page_retries: u32 = 0;

                        loop {
                            let request = BackfillRequest {
                                filter: filter.clone(),
                                page_size,
                                cursor: cursor.clone(),
                            };
                            match source.fetch_backfill(request).await {
                                Ok(page) => {
                                    let mut items = page.items;
                                    items.sort_by(|a, b| {
                                        extract_slot(a)
                                            .cmp(&extract_slot(b))
                                            .then_with(|| extract_key(a).cmp(&extract_key(b)))
                                    });

                                    let is_quirk = items.is_empty() && !page.done && page.cursor.is_none();
                                    if is_quirk {
                                        empty_page_retries += 1;
                                        warn!(attempt = empty_page_retries, "empty backfill page with no cursor; retrying");
                                        if empty_page_retries >= config.empty_page_retry_budget {
                                            warn!("empty-page retry budget exhausted; switching to streaming");
                                            break;
                                        }
                                        continue;
                                    }
                                    empty_page_retries = 0;

                                    for item in items {
                                        let slot = extract_slot(&item);
                                        if slot < config.start_slot {
                                            continue;
                                        }
                                        let key = extract_key(&item);
                                        if seen.is_duplicate(slot, &key) {
                                            metrics.inc_discarded_duplicate();
                                            continue;
                                        }
                                        seen.record_emitted(slot, key);
                                        current_slot = slot;
                                        metrics.inc_emitted_backfill();
                                        yield Ok(item);
                                    }

                                    let discarded = live_pump.discard_buffered_up_to(current_slot);
                                    metrics.add_discarded_duplicates(discarded as u64);

                                    let exhausted = page.done || page.cursor.is_none();
                                    cursor = page.cursor;

                                    let handover_ready = live_pump
                                        .observed_max_slot()
                                        .is_some_and(|m| current_slot >= m.saturating_sub(config.safety_margin));

                                    if exhausted || handover_ready {
                                        break;
                                    }
                                }
                                Err(e) => {
                                    warn!(error = %e, "backfill transport error; propagating to caller");
                                    yield Err(ReplayError::BackfillTransport(e));
                                    live_pump.close().await;
                                    return;
                                }
                            }
                        }
                        phase = Phase::Switching;
                    }

                    Phase::Switching => {
                        info!(current_slot, "entering SWITCHING");
                        let result = live_pump.enable_streaming(current_slot);
                        metrics.add_discarded_duplicates(result.discarded as u64);

                        let mut any_drained = false;
                        for (slot, key, item) in result.drained {
                            if seen.is_duplicate(slot, &key) {
                                metrics.inc_discarded_duplicate();
                                continue;
                            }
                            seen.record_emitted(slot, key);
                            current_slot = slot;
                            live_pump.update_emit_floor(current_slot);
                            metrics.inc_emitted_live();
                            any_drained = true;
                            yield Ok(item);
                        }
                        if !any_drained {
                            live_pump.update_emit_floor(current_slot);
                        }
                        phase = Phase::Streaming;
                    }

                    Phase::Streaming => {
                        info!("entering STREAMING");
                        loop {
                            let outcome = tokio::time::timeout(config.connection_timeout, live_pump.next()).await;
                            match outcome {
                                Ok(Next::Item(item)) => {
                                    let slot = extract_slot(&item);
                                    let key = extract_key(&item);
                                    if seen.is_duplicate(slot, &key) {
                                        metrics.inc_discarded_duplicate();
                                        continue;
                                    }
                                    seen.record_emitted(slot, key);
                                    current_slot = slot;
                                    live_pump.update_emit_floor(current_slot);
                                    metrics.inc_emitted_live();
                                    yield Ok(item);
                                }
                                Ok(Next::End) => {
                                    if config.resubscribe_on_end {
                                        warn!("live stream ended; reconnecting");
                                        phase = Phase::Reconnect;
                                        break;
                                    } else {
                                        live_pump.close().await;
                                        return;
                                    }
                                }
                                Ok(Next::Failed(failure)) => {
                                    warn!(error = %failure, "live stream failed; reconnecting");
                                    phase = Phase::Reconnect;
                                    break;
                                }
                                Err(_elapsed) => {
                                    warn!("live stream hung; reconnecting");
                                    phase = Phase::Reconnect;
                                    break;
                                }
                            }
                        }
                    }

                    Phase::Reconnect => {
                        info!(attempt = reconnect_attempts, "entering RECONNECT");
                        let delay = backoff.next_delay();
                        tokio::time::sleep(delay).await;

                        live_pump.close().await;

                        if let Some(factory) = &on_reconnect {
                            match factory().await {
                                Ok(fresh) => source = fresh,
                                Err(e) => warn!(error = %e, "reconnect factory failed; retaining current capabilities"),
                            }
                        }

                        reconnect_attempts += 1;
                        if let Some(max) = config.max_reconnect_attempts {
                            if reconnect_attempts > max {
                                yield Err(ReplayError::MaxReconnectAttempts(max));
                                return;
                            }
                        }

                        if current_slot > 0 {
                            let deadline = Instant::now() + config.mini_backfill_budget;
                            let mini_filter = backfill_filter(current_slot);
                            let mut mini_cursor: Option<S::Cursor> = None;
                            loop {
                                if Instant::now() >= deadline {
                                    warn!("mini-backfill budget exhausted");
                                    break;
                                }
                                let request = BackfillRequest {
                                    filter: mini_filter.clone(),
                                    page_size,
                                    cursor: mini_cursor.clone(),
                                };
                                match source.fetch_backfill(request).await {
                                    Ok(page) => {
                                        let mut items = page.items;
                                        items.sort_by(|a, b| {
                                            extract_slot(a)
                                                .cmp(&extract_slot(b))
                                                .then_with(|| extract_key(a).cmp(&extract_key(b)))
                                        });
                                        for item in items {
                                            let slot = extract_slot(&item);
                                            if slot < current_slot {
                                                continue;
                                            }
                                            let key = extract_key(&item);
                                            if seen.is_duplicate(slot, &key) {
                                                metrics.inc_discarded_duplicate();
                                                continue;
                                            }
                                            seen.record_emitted(slot, key);
                                            current_slot = slot;
                                            metrics.inc_emitted_reconnect();
                                            yield Ok(item);
                                        }
                                        if page.done || page.cursor.is_none() {
                                            break;
                                        }
                                        mini_cursor = page.cursor;
                                    }
                                    Err(e) => {
                                        warn!(error = %e, "mini-backfill error; proceeding to streaming");
                                        break;
                                    }
                                }
                            }
                        }

                        let resume_slot = current_slot;
                        match LivePump::spawn(
                            &source,
                            LiveRequest { filter: live_filter(resume_slot) },
                            InitialMode::Streaming { emit_floor: current_slot },
                            extract_slot.clone(),
                            extract_key.clone(),
                            metrics.clone(),
                        ).await {
                            Ok(pump) => {
                                live_pump = pump;
                                backoff.reset();
                                phase = Phase::Streaming;
                            }
                            Err(e) => {
                                warn!(error = %e, "failed to resubscribe live stream; retrying RECONNECT");
                                phase = Phase::Reconnect;
                            }
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seen_tracker_flags_older_slot_as_duplicate() {
        let mut tracker = SeenTracker::default();
        tracker.record_emitted(10, "a".into());
        assert!(tracker.is_duplicate(9, "z"));
        assert!(!tracker.is_duplicate(11, "z"));
    }

    #[test]
    fn seen_tracker_flags_same_slot_same_key_as_duplicate() {
        let mut tracker = SeenTracker::default();
        tracker.record_emitted(10, "a".into());
        tracker.record_emitted(10, "b".into());
        assert!(tracker.is_duplicate(10, "a"));
        assert!(tracker.is_duplicate(10, "b"));
        assert!(!tracker.is_duplicate(10, "c"));
    }

    #[test]
    fn seen_tracker_resets_keys_on_slot_advance() {
        let mut tracker = SeenTracker::default();
        tracker.record_emitted(10, "a".into());
        tracker.record_emitted(11, "b".into());
        // slot 10 is now strictly behind last_emitted_slot: anything at it
        // reads as a duplicate regardless of key.
        assert!(tracker.is_duplicate(10, "a"));
        assert!(tracker.is_duplicate(10, "z"));
        // at slot 11, only "b" has actually been seen.
        assert!(tracker.is_duplicate(11, "b"));
        assert!(!tracker.is_duplicate(11, "a"));
    }
}
