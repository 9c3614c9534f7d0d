//! Capability interfaces the engine consumes.
//!
//! These are external collaborators: typed RPC clients for the
//! paginated list call and the streaming call. The engine never implements
//! them — it only calls through them — so they are plain traits, generic
//! over the item and cursor types, with no transport (tonic, reqwest, ...)
//! baked in.

use futures::Stream;
use std::pin::Pin;

use crate::error::TransportError;
use crate::filter::Filter;
use crate::item::Slot;

pub type BoxStream<T> = Pin<Box<dyn Stream<Item = T> + Send>>;

/// `listX` request: `filter`, `page{page_size, page_token,
/// order_by}`, kind-specific options folded into `filter`/`view` by the
/// adapter.
#[derive(Debug, Clone)]
pub struct BackfillRequest<Cursor> {
    pub filter: Filter,
    pub page_size: u32,
    pub cursor: Option<Cursor>,
}

/// `listX` response: items ordered by slot ascending, with an
/// optional continuation cursor. Pagination is exhausted when `done` is
/// true or `cursor` is absent.
#[derive(Debug, Clone)]
pub struct BackfillPage<Item, Cursor> {
    pub items: Vec<Item>,
    pub cursor: Option<Cursor>,
    pub done: bool,
}

impl<Item, Cursor> BackfillPage<Item, Cursor> {
    pub fn exhausted(&self) -> bool {
        self.done || self.cursor.is_none()
    }
}

/// `streamX` request: just the composed filter — the engine
/// forwards it verbatim.
#[derive(Debug, Clone)]
pub struct LiveRequest {
    pub filter: Filter,
}

/// A finite, indexable-by-slot historical source.
pub trait BackfillSource<Item>: Send + Sync {
    type Cursor: Clone + Send + Sync + 'static;

    fn fetch_backfill(
        &self,
        request: BackfillRequest<Self::Cursor>,
    ) -> impl std::future::Future<Output = Result<BackfillPage<Item, Self::Cursor>, TransportError>>
           + Send;
}

/// An unbounded, live-delivered source.
pub trait LiveSource<Item>: Send + Sync {
    fn subscribe_live(
        &self,
        request: LiveRequest,
    ) -> impl std::future::Future<Output = Result<BoxStream<Result<Item, TransportError>>, TransportError>>
           + Send;
}

/// Builds the slot-lower-bound filter every per-kind adapter injects:
/// `<field> >= uint(N)`.
pub fn slot_lower_bound(field: &str, start_slot: Slot) -> Filter {
    use crate::filter::{FilterParamValue, PARAM_START_SLOT};
    Filter::new(format!("{field} >= uint(params.start_slot)"))
        .with_param(PARAM_START_SLOT, FilterParamValue::UInt(start_slot))
}
