use async_trait::async_trait;
use parking_lot::Mutex;
use std::{
    collections::VecDeque,
    sync::{
        Arc,
        atomic::{AtomicU8, AtomicU64, Ordering},
    },
    time::Duration,
};
use tokio::{
    sync::Notify,
    task::JoinHandle,
    time::{MissedTickBehavior, interval, timeout},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::BatchConfig;
use crate::error::ExportError;

/// Sink one batching pipeline flushes into. Adapts the service-wide
/// [`Exporter`](crate::export::Exporter) to a single signal type.
#[async_trait]
pub(crate) trait BatchSink<T>: Send + Sync + 'static {
    async fn export(&self, batch: Vec<T>) -> Result<(), ExportError>;
}

const RUNNING: u8 = 0;
const DRAINING: u8 = 1;
const STOPPED: u8 = 2;

/// Counters describing what a pipeline has done with the records handed to
/// it. Drops and failed batches are the only ways a record is ever lost, and
/// both are observable here rather than silent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    /// Records delivered to the exporter in successfully flushed batches.
    pub exported: u64,
    /// Records dropped because the buffer was full or the pipeline was
    /// already draining.
    pub dropped: u64,
    /// Batches discarded because the export call failed or timed out.
    pub failed_batches: u64,
}

struct Shared<T> {
    signal: &'static str,
    buffer: Mutex<VecDeque<T>>,
    capacity: usize,
    batch_size: usize,
    state: AtomicU8,
    exported: AtomicU64,
    dropped: AtomicU64,
    failed_batches: AtomicU64,
    batch_ready: Notify,
}

/// Bounded-buffer, batch-or-time flush pipeline.
///
/// One instance per signal per service. Producers enqueue from any number of
/// request threads without ever blocking on network I/O; a single background
/// task owns all export calls. The lifecycle is `RUNNING -> DRAINING ->
/// STOPPED`, driven once by [`BatchPipeline::drain`].
pub(crate) struct BatchPipeline<T> {
    shared: Arc<Shared<T>>,
    export_timeout: Duration,
    cancel: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Send + 'static> BatchPipeline<T> {
    /// Starts the pipeline and its background flush task.
    pub(crate) fn start(
        signal: &'static str,
        config: &BatchConfig,
        sink: Arc<dyn BatchSink<T>>,
    ) -> Self {
        let shared = Arc::new(Shared {
            signal,
            buffer: Mutex::new(VecDeque::with_capacity(config.max_batch_size)),
            capacity: config.buffer_capacity,
            batch_size: config.max_batch_size,
            state: AtomicU8::new(RUNNING),
            exported: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            failed_batches: AtomicU64::new(0),
            batch_ready: Notify::new(),
        });
        let cancel = CancellationToken::new();
        let worker = Self::run_flush_loop(
            shared.clone(),
            sink,
            config.max_delay(),
            config.export_timeout(),
            cancel.clone(),
        );
        Self {
            shared,
            export_timeout: config.export_timeout(),
            cancel,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Enqueues a finished record. Never blocks; if the buffer is full the
    /// incoming record is dropped and counted, keeping the oldest buffered
    /// records in place.
    pub(crate) fn emit(&self, record: T) {
        if self.shared.state.load(Ordering::Acquire) != RUNNING {
            self.shared.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }
        let len = {
            let mut buffer = self.shared.buffer.lock();
            if buffer.len() >= self.shared.capacity {
                self.shared.dropped.fetch_add(1, Ordering::Relaxed);
                return;
            }
            buffer.push_back(record);
            buffer.len()
        };
        if len >= self.shared.batch_size {
            self.shared.batch_ready.notify_one();
        }
    }

    pub(crate) fn stats(&self) -> PipelineStats {
        PipelineStats {
            exported: self.shared.exported.load(Ordering::Relaxed),
            dropped: self.shared.dropped.load(Ordering::Relaxed),
            failed_batches: self.shared.failed_batches.load(Ordering::Relaxed),
        }
    }

    /// Stops accepting records, performs one final flush of whatever is
    /// buffered, and waits up to `deadline` for it to complete. On timeout
    /// the worker is aborted and the unflushed remainder discarded; either
    /// way the pipeline ends up `STOPPED`. Safe to call more than once.
    pub(crate) async fn drain(&self, deadline: Duration) {
        if self
            .shared
            .state
            .compare_exchange(RUNNING, DRAINING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        self.cancel.cancel();
        let worker = self.worker.lock().take();
        if let Some(mut worker) = worker {
            if timeout(deadline, &mut worker).await.is_err() {
                warn!(
                    "{} pipeline drain exceeded {:?}, discarding remaining records",
                    self.shared.signal, deadline
                );
                worker.abort();
            }
        }
        // A producer that observed RUNNING just before the state change can
        // still enqueue after the worker's final flush; whatever is left in
        // the buffer is counted as dropped rather than lost without trace.
        let remainder = {
            let mut buffer = self.shared.buffer.lock();
            let remainder = buffer.len() as u64;
            buffer.clear();
            remainder
        };
        if remainder > 0 {
            self.shared.dropped.fetch_add(remainder, Ordering::Relaxed);
        }
        self.shared.state.store(STOPPED, Ordering::Release);
    }

    fn run_flush_loop(
        shared: Arc<Shared<T>>,
        sink: Arc<dyn BatchSink<T>>,
        max_delay: Duration,
        export_timeout: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut tick = interval(max_delay);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first interval tick completes immediately; flushing an
            // empty buffer is a no-op, so it is left alone.
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("{} pipeline flush loop cancelled", shared.signal);
                        break;
                    }
                    _ = shared.batch_ready.notified() => {
                        while shared.buffer.lock().len() >= shared.batch_size {
                            flush_one(&shared, &sink, export_timeout).await;
                        }
                    }
                    _ = tick.tick() => {
                        while flush_one(&shared, &sink, export_timeout).await {}
                    }
                }
            }
            // Final flush of whatever remains, still in FIFO batch order.
            while flush_one(&shared, &sink, export_timeout).await {}
        })
    }
}

/// Pops at most one batch off the front of the buffer and exports it.
/// Returns false once the buffer is empty. A failed or timed-out export
/// discards the batch; there is no retry queue.
async fn flush_one<T: Send + 'static>(
    shared: &Shared<T>,
    sink: &Arc<dyn BatchSink<T>>,
    export_timeout: Duration,
) -> bool {
    let batch: Vec<T> = {
        let mut buffer = shared.buffer.lock();
        if buffer.is_empty() {
            return false;
        }
        let take = buffer.len().min(shared.batch_size);
        buffer.drain(..take).collect()
    };
    let size = batch.len() as u64;
    match timeout(export_timeout, sink.export(batch)).await {
        Ok(Ok(())) => {
            shared.exported.fetch_add(size, Ordering::Relaxed);
        }
        Ok(Err(e)) => {
            shared.failed_batches.fetch_add(1, Ordering::Relaxed);
            warn!(
                "{} export failed, discarding batch of {}: {}",
                shared.signal, size, e
            );
        }
        Err(_) => {
            shared.failed_batches.fetch_add(1, Ordering::Relaxed);
            warn!(
                "{} export timed out after {:?}, discarding batch of {}",
                shared.signal, export_timeout, size
            );
        }
    }
    true
}
