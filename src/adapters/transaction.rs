//! Transaction replay: keyed by signature, filtered server-side
//! only on backfill (`transaction.slot >= uint(N)`); live subscription
//! carries just the caller's own filter.

use std::sync::Arc;

use crate::capability::slot_lower_bound;
use crate::config::ReplayConfig;
use crate::filter::Filter;
use crate::item::{signature_hex_key, Slot};
use crate::live_pump::{ExtractKey, ExtractSlot};
use crate::replay_stream::{FilterBuilder, ReplayStream};

pub const DEFAULT_PAGE_SIZE: u32 = 256;
const SLOT_FIELD: &str = "transaction.slot";

/// A single transaction.
#[derive(Debug, Clone)]
pub struct TransactionItem {
    pub slot: Slot,
    pub signature: Vec<u8>,
    pub payload: Vec<u8>,
}

pub fn extract_slot() -> ExtractSlot<TransactionItem> {
    Arc::new(|item: &TransactionItem| item.slot)
}

pub fn extract_key() -> ExtractKey<TransactionItem> {
    Arc::new(|item: &TransactionItem| signature_hex_key(&item.signature))
}

fn backfill_filter_builder(user_filter: Filter) -> FilterBuilder {
    Arc::new(move |start_slot| slot_lower_bound(SLOT_FIELD, start_slot).and(user_filter.clone()))
}

fn live_filter_builder(user_filter: Filter) -> FilterBuilder {
    Arc::new(move |_start_slot| user_filter.clone())
}

/// Builds a [`ReplayStream`] of [`TransactionItem`]s against `source`.
pub fn replay_stream<S>(
    source: S,
    config: ReplayConfig,
    user_filter: Filter,
) -> ReplayStream<TransactionItem, S>
where
    S: crate::capability::BackfillSource<TransactionItem>
        + crate::capability::LiveSource<TransactionItem>
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_key_is_signature_hex() {
        let key_fn = extract_key();
        let item = TransactionItem {
            slot: 1,
            signature: vec![0xde, 0xad],
            payload: vec![],
        };
        assert_eq!(key_fn(&item), "dead");
    }

    #[test]
    fn backfill_filter_carries_slot_bound() {
        let builder = backfill_filter_builder(Filter::always());
        let filter = builder(10);
        assert!(filter.expression.contains("transaction.slot"));
    }
}
