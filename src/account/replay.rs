//! The account-replay engine itself: opens the live account
//! subscription first so nothing is missed while backfill catches up, then
//! drains a FIFO of known addresses, always deferring to whatever the live
//! stream has already delivered for a given address.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use async_stream::stream;
use futures::{Stream, StreamExt};
use tracing::{debug, info, warn};

use crate::account::seq_tracker::AccountSeqTracker;
use crate::backoff::ReconnectBackoff;
use crate::capability::{BoxStream, LiveRequest};
use crate::config::AccountReplayConfig;
use crate::error::{ReplayError, ReplayResult, TransportError};
use crate::filter::{Filter, FilterParamValue, PARAM_MIN_SLOT, PARAM_MIN_UPDATED_SLOT};
use crate::item::Slot;
use crate::metrics::ReplayMetrics;
use crate::page_assembler::{AccountState, AccountUpdate, PageAssembler, UpdateSource};
use crate::queue::{AsyncQueue, Next, QueueFailure};

/// Metadata-only entry from a `listAccounts` page.
#[derive(Debug, Clone)]
pub struct AccountMetaEntry<Addr> {
    pub address: Addr,
    pub address_hex: String,
    pub slot: Slot,
}

/// `listAccounts` request: same paginated shape as the generic backfill
/// request, but scoped to metadata only.
#[derive(Debug, Clone)]
pub struct AccountListRequest<Cursor> {
    pub filter: Filter,
    pub page_size: u32,
    pub cursor: Option<Cursor>,
}

#[derive(Debug, Clone)]
pub struct AccountListPage<Addr, Cursor> {
    pub entries: Vec<AccountMetaEntry<Addr>>,
    pub cursor: Option<Cursor>,
    pub done: bool,
}

/// Paginated enumeration of known addresses.
pub trait AccountLister<Addr>: Send + Sync {
    type Cursor: Clone + Send + Sync + 'static;

    fn list_accounts(
        &self,
        request: AccountListRequest<Self::Cursor>,
    ) -> impl std::future::Future<Output = Result<AccountListPage<Addr, Self::Cursor>, TransportError>>
           + Send;
}

/// Single-address full fetch, used during FIFO backfill.
pub trait AccountFetcher<Addr>: Send + Sync {
    fn get_account(
        &self,
        address: Addr,
    ) -> impl std::future::Future<Output = Result<AccountUpdate<Addr>, TransportError>> + Send;
}

/// Live account update subscription.
pub trait AccountLiveSource<Addr>: Send + Sync {
    fn subscribe_account_updates(
        &self,
        request: LiveRequest,
    ) -> impl std::future::Future<
        Output = Result<BoxStream<Result<AccountUpdate<Addr>, TransportError>>, TransportError>,
    > + Send;
}

fn min_slot_filter(min_slot: Slot, user_filter: &Filter) -> Filter {
    Filter::new("account.slot >= uint(params.min_slot)")
        .with_param(PARAM_MIN_SLOT, FilterParamValue::UInt(min_slot))
        .and(user_filter.clone())
}

fn min_updated_slot_filter(min_slot: Slot, user_filter: &Filter) -> Filter {
    Filter::new("account.updated_slot >= uint(params.min_updated_slot)")
        .with_param(PARAM_MIN_UPDATED_SLOT, FilterParamValue::UInt(min_slot))
        .and(user_filter.clone())
}

/// Wraps the background pump's `JoinHandle`, aborting it on drop. A bare
/// `JoinHandle` does nothing when dropped, so if the consumer abandons the
/// returned stream mid-run the generator's locals would otherwise be
/// dropped without a chance to `.await` an explicit abort, leaking the
/// spawned task and the live subscription it owns.
struct PumpHandle(Option<tokio::task::JoinHandle<()>>);

impl PumpHandle {
    fn new(handle: tokio::task::JoinHandle<()>) -> Self {
        Self(Some(handle))
    }

    fn abort(&mut self) {
        if let Some(handle) = self.0.take() {
            handle.abort();
        }
    }
}

impl Drop for PumpHandle {
    fn drop(&mut self) {
        self.abort();
    }
}

fn spawn_account_pump<Addr>(
    mut stream: BoxStream<Result<AccountUpdate<Addr>, TransportError>>,
    queue: Arc<AsyncQueue<AccountUpdate<Addr>>>,
) -> PumpHandle
where
    Addr: Send + 'static,
{
    PumpHandle::new(tokio::spawn(async move {
        loop {
            match stream.next().await {
                Some(Ok(update)) => {
                    if queue.push(update).is_err() {
                        return;
                    }
                }
                Some(Err(e)) => {
                    queue.fail(QueueFailure::new(e.to_string()));
                    return;
                }
                None => {
                    queue.close();
                    return;
                }
            }
        }
    }))
}

async fn resubscribe<Addr, S>(
    source: &S,
    min_slot: Slot,
    user_filter: &Filter,
) -> Result<(Arc<AsyncQueue<AccountUpdate<Addr>>>, PumpHandle), TransportError>
where
    Addr: Send + 'static,
    S: AccountLiveSource<Addr>,
{
    let filter = min_updated_slot_filter(min_slot, user_filter);
    let stream = source.subscribe_account_updates(LiveRequest { filter }).await?;
    let queue = Arc::new(AsyncQueue::new());
    let task = spawn_account_pump(stream, queue.clone());
    Ok((queue, task))
}

/// Drains whatever is immediately available on the live queue without
/// blocking, feeding it through the assembler. Called between FIFO
/// iterations so `seen_from_stream` stays as current as possible — the
/// live stream always wins the race for a given address.
fn drain_live_available<Addr: Clone>(
    queue: &AsyncQueue<AccountUpdate<Addr>>,
    assembler: &mut PageAssembler<Addr>,
    seen_from_stream: &mut HashSet<String>,
    seq_tracker: &mut AccountSeqTracker,
    highest_slot_seen: &mut Slot,
) -> (Vec<AccountState<Addr>>, Option<Next<AccountUpdate<Addr>>>) {
    let mut emitted = Vec::new();
    loop {
        match queue.try_next() {
            Some(Next::Item(update)) => {
                seen_from_stream.insert(update.address_hex.clone());
                *highest_slot_seen = (*highest_slot_seen).max(update.slot);
                if let Some(state) = assembler.ingest(update, UpdateSource::Stream) {
                    if seq_tracker.accept(&state.address_hex, state.seq) {
                        emitted.push(state);
                    }
                }
            }
            Some(terminal) => return (emitted, Some(terminal)),
            None => return (emitted, None),
        }
    }
}

/// Evicts stale, partially-assembled entries once `cleanup_interval` has
/// elapsed since the last check. An address whose update never finishes
/// assembly (a missing page, a dropped stream) would otherwise sit in the
/// assembler forever.
fn maybe_evict_expired<Addr>(
    assembler: &mut PageAssembler<Addr>,
    last_cleanup: &mut Instant,
    cleanup_interval: std::time::Duration,
) {
    let now = Instant::now();
    if now.duration_since(*last_cleanup) >= cleanup_interval {
        let evicted = assembler.evict_expired(now);
        if evicted > 0 {
            debug!(evicted, "page assembler cleanup evicted stale entries");
        }
        *last_cleanup = now;
    }
}

/// Configured, not-yet-run hybrid account replay.
pub struct AccountReplay<Addr, S> {
    source: S,
    config: AccountReplayConfig,
    user_filter: Filter,
    metrics: ReplayMetrics,
    on_backfill_complete: Option<Arc<dyn Fn() + Send + Sync>>,
    _marker: std::marker::PhantomData<Addr>,
}

impl<Addr, S> AccountReplay<Addr, S>
where
    Addr: Clone + Send + Sync + 'static,
    S: AccountLister<Addr> + AccountFetcher<Addr> + AccountLiveSource<Addr> + Send + Sync + 'static,
{
    pub fn new(source: S, config: AccountReplayConfig, user_filter: Filter) -> Self {
        Self {
            source,
            config,
            user_filter,
            metrics: ReplayMetrics::new(),
            on_backfill_complete: None,
            _marker: std::marker::PhantomData,
        }
    }

    pub fn with_backfill_complete_callback(
        mut self,
        callback: impl Fn() + Send + Sync + 'static,
    ) -> Self {
        self.on_backfill_complete = Some(Arc::new(callback));
        self
    }

    pub fn metrics(&self) -> ReplayMetrics {
        self.metrics.clone()
    }

    #[tracing::instrument(skip(self))]
    pub fn run(self) -> impl Stream<Item = ReplayResult<AccountState<Addr>>> {
        let AccountReplay {
            source,
            config,
            user_filter,
            metrics,
            on_backfill_complete,
            _marker,
        } = self;

        stream! {
            let mut assembler: PageAssembler<Addr> =
                PageAssembler::new(config.assembly_timeout, config.max_pending_per_address);
            let mut seq_tracker = AccountSeqTracker::new();
            let mut seen_from_stream: HashSet<String> = HashSet::new();
            let mut highest_slot_seen: Slot = config.min_slot;
            let mut backoff = ReconnectBackoff::new(config.backoff);
            let mut last_cleanup = Instant::now();

            let initial_filter = min_slot_filter(config.min_slot, &user_filter);
            let live_stream = match source.subscribe_account_updates(LiveRequest { filter: initial_filter }).await {
                Ok(s) => s,
                Err(e) => {
                    yield Err(ReplayError::LiveTransport(e));
                    return;
                }
            };
            let mut queue: Arc<AsyncQueue<AccountUpdate<Addr>>> = Arc::new(AsyncQueue::new());
            let mut task = spawn_account_pump(live_stream, queue.clone());

            info!("entering account FIFO backfill");
            let mut cursor: Option<S::Cursor> = None;
            'backfill: loop {
                maybe_evict_expired(&mut assembler, &mut last_cleanup, config.cleanup_interval);

                let (emitted, terminal) = drain_live_available(
                    &queue,
                    &mut assembler,
                    &mut seen_from_stream,
                    &mut seq_tracker,
                    &mut highest_slot_seen,
                );
                for state in emitted {
                    metrics.inc_emitted_live();
                    yield Ok(state);
                }
                if let Some(terminal) = terminal {
                    match terminal {
                        Next::Failed(f) => warn!(error = %f, "live account stream failed during backfill"),
                        Next::End => warn!("live account stream ended during backfill"),
                        Next::Item(_) => unreachable!("drain_live_available never returns Item as terminal"),
                    }
                    let delay = backoff.next_delay();
                    tokio::time::sleep(delay).await;
                    match resubscribe(&source, highest_slot_seen, &user_filter).await {
                        Ok((new_queue, new_task)) => {
                            task.abort();
                            queue = new_queue;
                            task = new_task;
                            backoff.reset();
                        }
                        Err(e) => {
                            task.abort();
                            yield Err(ReplayError::LiveTransport(e));
                            return;
                        }
                    }
                }

                let request = AccountListRequest {
                    filter: user_filter.clone(),
                    page_size: 256,
                    cursor: cursor.clone(),
                };
                match source.list_accounts(request).await {
                    Ok(page) => {
                        for entry in page.entries {
                            maybe_evict_expired(&mut assembler, &mut last_cleanup, config.cleanup_interval);
                            highest_slot_seen = highest_slot_seen.max(entry.slot);
                            if seen_from_stream.contains(&entry.address_hex) {
                                continue;
                            }

                            let mut attempt = 0u32;
                            let mut fetched = None;
                            loop {
                                match source.get_account(entry.address.clone()).await {
                                    Ok(update) => {
                                        fetched = Some(update);
                                        break;
                                    }
                                    Err(e) => {
                                        attempt += 1;
                                        if attempt >= config.max_get_account_retries {
                                            warn!(address = %entry.address_hex, attempts = attempt, "getAccount exhausted retries");
                                            yield Err(ReplayError::GetAccountFailed {
                                                address: entry.address_hex.clone(),
                                                attempts: attempt,
                                                source: e,
                                            });
                                            break;
                                        }
                                        tokio::time::sleep(config.get_account_retry_step * attempt).await;
                                    }
                                }
                            }
                            let Some(update) = fetched else { continue };

                            // The fetch may have raced with a live update for
                            // the same address; drain whatever arrived while
                            // we were waiting before deciding who wins.
                            let (emitted, terminal) = drain_live_available(
                                &queue,
                                &mut assembler,
                                &mut seen_from_stream,
                                &mut seq_tracker,
                                &mut highest_slot_seen,
                            );
                            for state in emitted {
                                metrics.inc_emitted_live();
                                yield Ok(state);
                            }
                            if terminal.is_some() {
                                warn!("live account stream ended mid-backfill; will reconnect next iteration");
                            }

                            if seen_from_stream.contains(&entry.address_hex) {
                                continue;
                            }
                            if let Some(state) = assembler.ingest(update, UpdateSource::Backfill) {
                                if seq_tracker.accept(&state.address_hex, state.seq) {
                                    metrics.inc_emitted_backfill();
                                    yield Ok(state);
                                }
                            }
                        }

                        if page.done || page.cursor.is_none() {
                            break 'backfill;
                        }
                        cursor = page.cursor;
                    }
                    Err(e) => {
                        yield Err(ReplayError::BackfillTransport(e));
                        break 'backfill;
                    }
                }
            }

            info!("account FIFO backfill complete");
            if let Some(callback) = &on_backfill_complete {
                callback();
            }

            loop {
                match tokio::time::timeout(config.cleanup_interval, queue.next()).await {
                    Ok(Next::Item(update)) => {
                        seen_from_stream.insert(update.address_hex.clone());
                        highest_slot_seen = highest_slot_seen.max(update.slot);
                        if let Some(state) = assembler.ingest(update, UpdateSource::Stream) {
                            if seq_tracker.accept(&state.address_hex, state.seq) {
                                metrics.inc_emitted_live();
                                yield Ok(state);
                            }
                        }
                    }
                    Ok(Next::End) | Ok(Next::Failed(_)) => {
                        warn!("live account stream ended; reconnecting");
                        let delay = backoff.next_delay();
                        tokio::time::sleep(delay).await;
                        match resubscribe(&source, highest_slot_seen, &user_filter).await {
                            Ok((new_queue, new_task)) => {
                                task.abort();
                                queue = new_queue;
                                task = new_task;
                                backoff.reset();
                            }
                            Err(e) => {
                                task.abort();
                                yield Err(ReplayError::LiveTransport(e));
                                return;
                            }
                        }
                    }
                    Err(_elapsed) => {
                        maybe_evict_expired(&mut assembler, &mut last_cleanup, config.cleanup_interval);
                    }
                }
            }
        }
    }
}
