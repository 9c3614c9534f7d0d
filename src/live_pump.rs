//! Wraps a live subscription; buffers while backfilling, forwards once
//! switched to streaming.

use std::sync::{Arc, Mutex};

use futures::StreamExt;
use tracing::warn;

use crate::capability::{BoxStream, LiveRequest, LiveSource};
use crate::dedup::DedupBuffer;
use crate::error::TransportError;
use crate::item::Slot;
use crate::metrics::ReplayMetrics;
use crate::queue::{AsyncQueue, Next, QueueFailure};

pub type ExtractSlot<Item> = Arc<dyn Fn(&Item) -> Slot + Send + Sync>;
pub type ExtractKey<Item> = Arc<dyn Fn(&Item) -> String + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Buffering,
    Streaming,
}

struct Shared<Item> {
    buffer: DedupBuffer<Item>,
    mode: Mode,
    emit_floor: Slot,
    min_slot_seen: Option<Slot>,
    max_slot_seen: Option<Slot>,
}

/// Where a freshly spawned [`LivePump`] starts out.
pub enum InitialMode {
    /// Accumulate into the dedup buffer (the BACKFILLING entry state).
    Buffering,
    /// Forward straight to the consumer queue, floored at `emit_floor`
    /// (used on reconnect).
    Streaming { emit_floor: Slot },
}

/// Result of [`LivePump::enable_streaming`]: the atomic discard-then-drain
/// transition from buffering to streaming.
pub struct EnableStreamingResult<Item> {
    pub discarded: usize,
    pub drained: Vec<(Slot, String, Item)>,
}

pub struct LivePump<Item> {
    shared: Arc<Mutex<Shared<Item>>>,
    queue: Arc<AsyncQueue<Item>>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl<Item> LivePump<Item>
where
    Item: Send + 'static,
{
    pub async fn spawn<S>(
        source: &S,
        request: LiveRequest,
        initial_mode: InitialMode,
        extract_slot: ExtractSlot<Item>,
        extract_key: ExtractKey<Item>,
        metrics: ReplayMetrics,
    ) -> Result<Self, TransportError>
    where
        S: LiveSource<Item>,
    {
        let stream = source.subscribe_live(request).await?;
        let (mode, emit_floor) = match initial_mode {
            InitialMode::Buffering => (Mode::Buffering, 0),
            InitialMode::Streaming { emit_floor } => (Mode::Streaming, emit_floor),
        };
        let shared = Arc::new(Mutex::new(Shared {
            buffer: DedupBuffer::new(),
            mode,
            emit_floor,
            min_slot_seen: None,
            max_slot_seen: None,
        }));
        let queue: Arc<AsyncQueue<Item>> = Arc::new(AsyncQueue::new());

        let task = tokio::spawn(Self::run(
            stream,
            shared.clone(),
            queue.clone(),
            extract_slot,
            extract_key,
            metrics,
        ));

        Ok(Self {
            shared,
            queue,
            task: Some(task),
        })
    }

    async fn run(
        mut stream: BoxStream<Result<Item, TransportError>>,
        shared: Arc<Mutex<Shared<Item>>>,
        queue: Arc<AsyncQueue<Item>>,
        extract_slot: ExtractSlot<Item>,
        extract_key: ExtractKey<Item>,
        metrics: ReplayMetrics,
    ) {
        loop {
            match stream.next().await {
                Some(Ok(item)) => {
                    let slot = extract_slot(&item);
                    let mut guard = shared.lock().expect("live pump mutex poisoned");
                    match guard.mode {
                        Mode::Buffering => {
                            guard.min_slot_seen =
                                Some(guard.min_slot_seen.map_or(slot, |m| m.min(slot)));
                            guard.max_slot_seen =
                                Some(guard.max_slot_seen.map_or(slot, |m| m.max(slot)));
                            let key = extract_key(&item);
                            guard.buffer.insert(slot, key, item);
                            drop(guard);
                            metrics.inc_buffered();
                        }
                        Mode::Streaming => {
                            let floor = guard.emit_floor;
                            drop(guard);
                            if slot >= floor {
                                if queue.push(item).is_err() {
                                    return;
                                }
                            }
                        }
                    }
                }
                Some(Err(e)) => {
                    warn!(error = %e, "live source error, failing pump queue");
                    queue.fail(QueueFailure::new(e.to_string()));
                    return;
                }
                None => {
                    queue.close();
                    return;
                }
            }
        }
    }

    /// Atomic discard-then-drain transition into streaming mode
    ///.
    pub fn enable_streaming(&self, cutoff: Slot) -> EnableStreamingResult<Item> {
        let mut guard = self.shared.lock().expect("live pump mutex poisoned");
        let discarded = guard.buffer.discard_up_to(cutoff);
        let drained = guard.buffer.drain_above(cutoff);
        guard.mode = Mode::Streaming;
        guard.emit_floor = cutoff;
        EnableStreamingResult { discarded, drained }
    }

    /// Monotonic nondecreasing advance of the streaming floor.
    pub fn update_emit_floor(&self, slot: Slot) {
        let mut guard = self.shared.lock().expect("live pump mutex poisoned");
        if slot > guard.emit_floor {
            guard.emit_floor = slot;
        }
    }

    pub fn observed_max_slot(&self) -> Option<Slot> {
        self.shared
            .lock()
            .expect("live pump mutex poisoned")
            .max_slot_seen
    }

    pub fn observed_min_slot(&self) -> Option<Slot> {
        self.shared
            .lock()
            .expect("live pump mutex poisoned")
            .min_slot_seen
    }

    pub fn buffered_len(&self) -> usize {
        self.shared.lock().expect("live pump mutex poisoned").buffer.size()
    }

    /// Discards buffered items at or below `cutoff` without transitioning
    /// mode (used by BACKFILLING after each page).
    pub fn discard_buffered_up_to(&self, cutoff: Slot) -> usize {
        self.shared
            .lock()
            .expect("live pump mutex poisoned")
            .buffer
            .discard_up_to(cutoff)
    }

    pub async fn next(&self) -> Next<Item> {
        self.queue.next().await
    }

    /// Closes the queue and awaits termination of the internal receive
    /// task.
    pub async fn close(mut self) {
        self.queue.close();
        if let Some(task) = self.task.take() {
            task.abort();
            let _ = task.await;
        }
    }
}

impl<Item> Drop for LivePump<Item> {
    /// If the consumer abandons the stream mid-run without reaching an
    /// explicit `close`, the generator's locals are dropped with no chance
    /// to `.await` anything — abort the background task here so it (and
    /// the transport stream it owns) doesn't leak.
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::LiveRequest;
    use futures::stream;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct VecSource {
        batches: Mutex<Vec<Vec<Result<u64, TransportError>>>>,
    }

    impl LiveSource<u64> for VecSource {
        async fn subscribe_live(
            &self,
            _request: LiveRequest,
        ) -> Result<BoxStream<Result<u64, TransportError>>, TransportError> {
            let batch = self.batches.lock().unwrap().remove(0);
            Ok(Box::pin(stream::iter(batch)))
        }
    }

    fn extract_slot() -> ExtractSlot<u64> {
        Arc::new(|item: &u64| *item)
    }

    fn extract_key() -> ExtractKey<u64> {
        Arc::new(|item: &u64| item.to_string())
    }

    #[tokio::test]
    async fn buffering_accumulates_and_tracks_min_max() {
        let source = VecSource {
            batches: Mutex::new(vec![vec![Ok(5), Ok(3), Ok(9)]]),
        };
        let pump = LivePump::spawn(
            &source,
            LiveRequest {
                filter: crate::filter::Filter::always(),
            },
            InitialMode::Buffering,
            extract_slot(),
            extract_key(),
            ReplayMetrics::new(),
        )
        .await
        .unwrap();

        // give the background task a chance to drain the batch
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        assert_eq!(pump.observed_min_slot(), Some(3));
        assert_eq!(pump.observed_max_slot(), Some(9));
        assert_eq!(pump.buffered_len(), 3);
        pump.close().await;
    }

    #[tokio::test]
    async fn enable_streaming_discards_and_drains_in_order() {
        let source = VecSource {
            batches: Mutex::new(vec![vec![Ok(1), Ok(5), Ok(3), Ok(10)]]),
        };
        let pump = LivePump::spawn(
            &source,
            LiveRequest {
                filter: crate::filter::Filter::always(),
            },
            InitialMode::Buffering,
            extract_slot(),
            extract_key(),
            ReplayMetrics::new(),
        )
        .await
        .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        let result = pump.enable_streaming(5);
        assert_eq!(result.discarded, 3); // slots 1, 3, 5 are <= cutoff
        let slots: Vec<_> = result.drained.iter().map(|(s, _, _)| *s).collect();
        assert_eq!(slots, vec![10]);
        pump.close().await;
    }

    #[tokio::test]
    async fn streaming_drops_items_below_emit_floor() {
        let counter = Arc::new(AtomicUsize::new(0));
        let _ = counter.clone();
        let source = VecSource {
            batches: Mutex::new(vec![vec![Ok(1), Ok(2), Ok(6), Ok(7)]]),
        };
        let pump = LivePump::spawn(
            &source,
            LiveRequest {
                filter: crate::filter::Filter::always(),
            },
            InitialMode::Streaming { emit_floor: 5 },
            extract_slot(),
            extract_key(),
            ReplayMetrics::new(),
        )
        .await
        .unwrap();

        match pump.next().await {
            Next::Item(v) => assert_eq!(v, 6),
            other => panic!("unexpected {other:?}"),
        }
        match pump.next().await {
            Next::Item(v) => assert_eq!(v, 7),
            other => panic!("unexpected {other:?}"),
        }
        pump.close().await;
    }
}
