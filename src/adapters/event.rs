//! Event replay: keyed by `event_id` (falling back to
//! `slot:call_idx`), filtered server-side on *both* backfill and live
//! requests (`event.slot >= uint(N)` AND user filter) — unlike blocks and
//! transactions, the event kind's live subscription also carries the slot
//! bound.

use std::sync::Arc;

use crate::capability::slot_lower_bound;
use crate::config::ReplayConfig;
use crate::filter::Filter;
use crate::item::{event_key, Slot};
use crate::live_pump::{ExtractKey, ExtractSlot};
use crate::replay_stream::{FilterBuilder, ReplayStream};

pub const DEFAULT_PAGE_SIZE: u32 = 512;
const SLOT_FIELD: &str = "event.slot";

/// A single program event.
#[derive(Debug, Clone)]
pub struct EventItem {
    pub slot: Slot,
    pub event_id: Option<String>,
    pub call_idx: u32,
    pub payload: Vec<u8>,
}

pub fn extract_slot() -> ExtractSlot<EventItem> {
    Arc::new(|item: &EventItem| item.slot)
}

pub fn extract_key() -> ExtractKey<EventItem> {
    Arc::new(|item: &EventItem| event_key(item.slot, item.event_id.as_deref(), item.call_idx))
}

fn slot_bound_filter_builder(user_filter: Filter) -> FilterBuilder {
    Arc::new(move |start_slot| slot_lower_bound(SLOT_FIELD, start_slot).and(user_filter.clone()))
}

/// Builds a [`ReplayStream`] of [`EventItem`]s against `source`.
pub fn replay_stream<S>(source: S, config: ReplayConfig, user_filter: Filter) -> ReplayStream<EventItem, S>
where
    S: crate::capability::BackfillSource<EventItem>
        + crate::capability::LiveSource<EventItem>
        + Send
        + Sync
        + 'static,
{
    let builder = slot_bound_filter_builder(user_filter);
    ReplayStream::new(
        source,
        config,
        DEFAULT_PAGE_SIZE,
        extract_slot(),
        extract_key(),
        builder.clone(),
        builder,
    )
}
