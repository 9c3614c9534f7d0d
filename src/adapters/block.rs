//! Block replay: one item per slot, filtered server-side only
//! on backfill (`block.header.slot >= uint(N)`); the live subscription
//! carries just the caller's own filter, relying on the engine's buffering
//! and emit-floor to bound it to the resume point.

use std::sync::Arc;

use crate::capability::slot_lower_bound;
use crate::config::ReplayConfig;
use crate::filter::Filter;
use crate::item::{default_key, Slot};
use crate::live_pump::{ExtractKey, ExtractSlot};
use crate::replay_stream::{FilterBuilder, ReplayStream};

pub const DEFAULT_PAGE_SIZE: u32 = 128;
const SLOT_FIELD: &str = "block.header.slot";

/// A single confirmed block. `payload` is opaque; callers decode
/// it themselves — wire codecs stay out of this crate.
#[derive(Debug, Clone)]
pub struct BlockItem {
    pub slot: Slot,
    pub payload: Vec<u8>,
}

pub fn extract_slot() -> ExtractSlot<BlockItem> {
    Arc::new(|item: &BlockItem| item.slot)
}

pub fn extract_key() -> ExtractKey<BlockItem> {
    Arc::new(|item: &BlockItem| default_key(item.slot))
}

fn backfill_filter_builder(user_filter: Filter) -> FilterBuilder {
    Arc::new(move |start_slot| slot_lower_bound(SLOT_FIELD, start_slot).and(user_filter.clone()))
}

fn live_filter_builder(user_filter: Filter) -> FilterBuilder {
    Arc::new(move |_start_slot| user_filter.clone())
}

/// Builds a [`ReplayStream`] of [`BlockItem`]s against `source`.
pub fn replay_stream<S>(source: S, config: ReplayConfig, user_filter: Filter) -> ReplayStream<BlockItem, S>
where
    S: crate::capability::BackfillSource<BlockItem>
        + crate::capability::LiveSource<BlockItem>
        + Send
        + Sync
        + 'static,
{
    ReplayStream::new(
        source,
        config,
        DEFAULT_PAGE_SIZE,
        extract_slot(),
        extract_key(),
        backfill_filter_builder(user_filter.clone()),
        live_filter_builder(user_filter),
    )
}
