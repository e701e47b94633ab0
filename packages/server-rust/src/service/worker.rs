//! Background worker and the one-way message queue built on it.
//!
//! `BackgroundWorker<R>` processes tasks from an mpsc channel via a
//! `BackgroundRunnable`, with periodic tick callbacks. `OneWayQueue` uses it
//! to execute queued one-way operations off the caller's task.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use opwire_core::{EndpointAttributes, WireFormat};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::correlation::AsyncCorrelationToken;
use super::dispatcher::RequestDispatcher;
use super::operation::{FaultResponse, InboundRequest};

// ---------------------------------------------------------------------------
// BackgroundRunnable trait
// ---------------------------------------------------------------------------

/// Trait for task handlers executed by `BackgroundWorker`.
///
/// Implementors define how individual tasks are processed, what happens on each
/// periodic tick, and how to clean up on shutdown.
#[async_trait]
pub trait BackgroundRunnable: Send + 'static {
    /// The type of task this runnable processes.
    type Task: Send + 'static;

    /// Process a single task.
    async fn run(&mut self, task: Self::Task);

    /// Called periodically (on each tick interval). Default is a no-op.
    async fn on_tick(&mut self) {}

    /// Called once when the worker is shutting down. Default is a no-op.
    async fn shutdown(&mut self) {}
}

// ---------------------------------------------------------------------------
// BackgroundWorker
// ---------------------------------------------------------------------------

const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Generic background worker that processes tasks via an mpsc channel.
///
/// The worker spawns a tokio task that:
/// 1. Listens for tasks on the mpsc channel
/// 2. Calls `BackgroundRunnable::run()` for each task
/// 3. Periodically calls `BackgroundRunnable::on_tick()` at the configured interval
/// 4. Calls `BackgroundRunnable::shutdown()` when stopped
pub struct BackgroundWorker<R: BackgroundRunnable> {
    tx: Option<mpsc::Sender<R::Task>>,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl<R: BackgroundRunnable> BackgroundWorker<R> {
    /// Start the background worker with a channel capacity of 256.
    pub fn start(runnable: R, tick_interval_ms: u64) -> Self {
        Self::start_with_capacity(runnable, tick_interval_ms, DEFAULT_CHANNEL_CAPACITY)
    }

    /// Start the background worker with the given tick interval and channel
    /// capacity (at least 1).
    pub fn start_with_capacity(mut runnable: R, tick_interval_ms: u64, capacity: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<R::Task>(capacity.max(1));
        let (shutdown_tx, mut shutdown_rx) = tokio::sync::oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            let mut tick_interval =
                tokio::time::interval(Duration::from_millis(tick_interval_ms.max(1)));
            // Skip the first immediate tick so on_tick doesn't fire at startup.
            tick_interval.tick().await;

            loop {
                tokio::select! {
                    task = rx.recv() => {
                        match task {
                            Some(t) => runnable.run(t).await,
                            None => break, // Channel closed and drained.
                        }
                    }
                    _ = tick_interval.tick() => {
                        runnable.on_tick().await;
                    }
                    _ = &mut shutdown_rx => {
                        break;
                    }
                }
            }

            runnable.shutdown().await;
        });

        Self {
            tx: Some(tx),
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    /// Submit a task to the worker, waiting for channel capacity.
    ///
    /// # Errors
    ///
    /// Returns an error if the worker has been stopped.
    pub async fn submit(&self, task: R::Task) -> anyhow::Result<()> {
        match &self.tx {
            Some(tx) => tx
                .send(task)
                .await
                .map_err(|_| anyhow::anyhow!("worker channel closed")),
            None => Err(anyhow::anyhow!("worker not running")),
        }
    }

    /// Stop accepting tasks, let the worker drain what is queued, then wait
    /// for it to finish.
    pub async fn stop(&mut self) {
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
        self.shutdown_tx.take();
    }

    /// Stop immediately, dropping queued tasks.
    pub async fn terminate(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

// ---------------------------------------------------------------------------
// OneWayQueue
// ---------------------------------------------------------------------------

const QUEUE_TICK_INTERVAL_MS: u64 = 5_000;

/// A queued message whose dispatch failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetter {
    pub operation: String,
    pub correlation_id: Option<Uuid>,
    pub fault: FaultResponse,
}

type DeadLetters = Arc<Mutex<VecDeque<DeadLetter>>>;

struct OneWayRunnable {
    dispatcher: RequestDispatcher,
    dead_letters: DeadLetters,
    dead_letter_capacity: usize,
    processed: u64,
    failed: u64,
}

impl OneWayRunnable {
    fn record_dead_letter(&self, letter: DeadLetter) {
        let mut letters = self.dead_letters.lock();
        if letters.len() >= self.dead_letter_capacity {
            letters.pop_front();
        }
        if self.dead_letter_capacity > 0 {
            letters.push_back(letter);
        }
    }
}

#[async_trait]
impl BackgroundRunnable for OneWayRunnable {
    type Task = InboundRequest;

    async fn run(&mut self, request: InboundRequest) {
        let operation = request.operation.clone().unwrap_or_default();
        let correlation_id = request.correlation_id;

        match self.dispatcher.dispatch(request).await {
            Ok(_) => self.processed += 1,
            Err(err) => {
                self.failed += 1;
                metrics::counter!("opwire_dead_letters_total", "operation" => operation.clone())
                    .increment(1);
                warn!(
                    operation = %operation,
                    kind = %err.kind(),
                    "queued message moved to dead letters: {err}"
                );
                self.record_dead_letter(DeadLetter {
                    operation,
                    correlation_id,
                    fault: err.to_fault(),
                });
            }
        }
    }

    async fn on_tick(&mut self) {
        #[allow(clippy::cast_precision_loss)]
        let pending = self.dispatcher.correlator().pending_count() as f64;
        metrics::gauge!("opwire_pending_correlations").set(pending);
    }

    async fn shutdown(&mut self) {
        info!(
            processed = self.processed,
            failed = self.failed,
            "one-way queue stopped"
        );
    }
}

/// In-process queue executing one-way operations on a background task.
///
/// Messages are dispatched by operation name with
/// `MessageQueue | AsyncOneWay | Internal` attributes, so reply operations
/// run with their response discarded.
pub struct OneWayQueue {
    worker: BackgroundWorker<OneWayRunnable>,
    dispatcher: RequestDispatcher,
    dead_letters: DeadLetters,
}

impl OneWayQueue {
    /// Starts the queue worker. Capacities come from the dispatcher's config.
    #[must_use]
    pub fn start(dispatcher: RequestDispatcher) -> Self {
        let config = Arc::clone(dispatcher.config());
        let dead_letters: DeadLetters = Arc::new(Mutex::new(VecDeque::new()));
        let runnable = OneWayRunnable {
            dispatcher: dispatcher.clone(),
            dead_letters: Arc::clone(&dead_letters),
            dead_letter_capacity: config.dead_letter_capacity,
            processed: 0,
            failed: 0,
        };
        let worker = BackgroundWorker::start_with_capacity(
            runnable,
            QUEUE_TICK_INTERVAL_MS,
            config.one_way_queue_capacity,
        );
        debug!(capacity = config.one_way_queue_capacity, "one-way queue started");
        Self {
            worker,
            dispatcher,
            dead_letters,
        }
    }

    /// Enqueues a message and returns a token that observes its outcome.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue has been stopped.
    pub async fn publish(
        &self,
        operation: &str,
        format: WireFormat,
        body: impl Into<Bytes>,
    ) -> anyhow::Result<AsyncCorrelationToken> {
        let token = self.dispatcher.correlator().register();
        let request = Self::message(operation, format, body).with_correlation(token.id());
        self.worker.submit(request).await?;
        Ok(token)
    }

    /// Enqueues a message without observing its outcome.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue has been stopped.
    pub async fn send(
        &self,
        operation: &str,
        format: WireFormat,
        body: impl Into<Bytes>,
    ) -> anyhow::Result<()> {
        self.worker
            .submit(Self::message(operation, format, body))
            .await
    }

    /// Most recent failed messages, oldest first.
    #[must_use]
    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.dead_letters.lock().iter().cloned().collect()
    }

    /// Stops accepting messages and waits for queued ones to finish.
    pub async fn stop(&mut self) {
        self.worker.stop().await;
    }

    fn message(operation: &str, format: WireFormat, body: impl Into<Bytes>) -> InboundRequest {
        InboundRequest::for_operation(operation)
            .with_attributes(
                EndpointAttributes::MESSAGE_QUEUE
                    | EndpointAttributes::ASYNC_ONE_WAY
                    | EndpointAttributes::INTERNAL
                    | format.flag(),
            )
            .with_body(format.content_type(), body)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
