//! The tracked pool: a long-lived worker set with an explicit lifecycle,
//! bounded task queue, per-task results and live statistics.
//!
//! Workers pull heterogeneous [`Task`]s from a bounded queue and report
//! every outcome as a [`TaskResult`] on the results stream. A periodic
//! progress callback (every ~100 ms) makes long batches observable without
//! polling the stream.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use noisefs_cache::RandomizerSource;
use noisefs_gateway::BackendGateway;
use noisefs_types::config::WorkerConfig;
use noisefs_types::{Address, Block, NoiseError, Result};
use paris::Logger;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::task::{PoolStats, PoolStatsSnapshot, Task, TaskResult, TaskValue, TaskWork};
use crate::{Batch, WorkerPool};

/// Callback invoked with `(completed, total)` as a batch makes progress.
pub type ProgressFn = Arc<dyn Fn(u64, u64) + Send + Sync>;

const PROGRESS_PERIOD: Duration = Duration::from_millis(100);

pub struct TrackedPool {
    tx: mpsc::Sender<Task>,
    results_rx: Option<mpsc::UnboundedReceiver<TaskResult>>,
    stats: Arc<PoolStats>,
    cancel: CancellationToken,
    workers: Vec<JoinHandle<()>>,
    shutdown_timeout: Duration,
    batch_seq: AtomicU64,
}

impl TrackedPool {
    /// Starts `config.count` workers over a queue of `config.queue_size`
    /// slots. The pool runs until [`TrackedPool::shutdown`].
    pub fn start<G: BackendGateway>(
        gateway: Arc<G>,
        source: RandomizerSource,
        config: &WorkerConfig,
        progress: Option<ProgressFn>,
    ) -> Self {
        let (tx, rx) = mpsc::channel::<Task>(config.queue_size.max(1));
        let (results_tx, results_rx) = mpsc::unbounded_channel::<TaskResult>();
        let rx = Arc::new(Mutex::new(rx));
        let stats = Arc::new(PoolStats::default());
        let cancel = CancellationToken::new();

        let mut workers = Vec::with_capacity(config.count.max(1));
        for _ in 0..config.count.max(1) {
            workers.push(tokio::spawn(worker_loop(
                Arc::clone(&rx),
                Arc::clone(&gateway),
                source,
                Arc::clone(&stats),
                results_tx.clone(),
                cancel.clone(),
            )));
        }

        if let Some(progress) = progress {
            let stats = Arc::clone(&stats);
            let token = cancel.clone();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(PROGRESS_PERIOD);
                loop {
                    tokio::select! {
                        _ = token.cancelled() => return,
                        _ = interval.tick() => {
                            let snap = stats.snapshot();
                            progress(snap.completed + snap.failed, snap.submitted);
                        }
                    }
                }
            });
        }

        TrackedPool {
            tx,
            results_rx: Some(results_rx),
            stats,
            cancel,
            workers,
            shutdown_timeout: config.shutdown_timeout(),
            batch_seq: AtomicU64::new(0),
        }
    }

    /// Non-blocking submission; fails with `ResourceExceeded` when the
    /// queue is full.
    pub fn submit(&self, task: Task) -> Result<()> {
        match self.tx.try_send(task) {
            Ok(()) => {
                self.stats.submitted.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(_)) => Err(NoiseError::resource_exceeded(
                "worker queue is full",
            )),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(NoiseError::Cancelled),
        }
    }

    /// Submission that waits for a queue slot instead of failing.
    pub async fn submit_wait(&self, task: Task) -> Result<()> {
        self.tx
            .send(task)
            .await
            .map_err(|_| NoiseError::Cancelled)?;
        self.stats.submitted.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Takes the results stream. Each submitted task produces exactly one
    /// [`TaskResult`] on it, in completion order.
    pub fn take_results(&mut self) -> Option<mpsc::UnboundedReceiver<TaskResult>> {
        self.results_rx.take()
    }

    pub fn stats(&self) -> PoolStatsSnapshot {
        self.stats.snapshot()
    }

    /// Closes the submission queue, waits up to `shutdown_timeout` for the
    /// in-flight tasks to drain, then cancels whatever is left and reaps
    /// the workers.
    pub async fn shutdown(self) -> PoolStatsSnapshot {
        let TrackedPool {
            tx,
            stats,
            cancel,
            workers,
            shutdown_timeout,
            ..
        } = self;
        drop(tx);

        let drain = async {
            for worker in workers {
                let _ = worker.await;
            }
        };
        if tokio::time::timeout(shutdown_timeout, drain).await.is_err() {
            let mut logger = Logger::new();
            logger.warn(format!(
                "tracked pool drain exceeded {shutdown_timeout:?}; cancelling outstanding work"
            ));
        }
        cancel.cancel();
        stats.snapshot()
    }

    fn next_batch_id(&self, op: &str) -> String {
        let seq = self.batch_seq.fetch_add(1, Ordering::Relaxed);
        format!("{op}-{seq}")
    }

    /// Submits one responder-backed task per unit and collects the answers
    /// in submission order. Units not yet submitted when cancellation fires
    /// are reported as `Cancelled` without entering the queue.
    async fn run_batch<T>(
        &self,
        work: Vec<TaskWork>,
        op: &str,
        cancel: CancellationToken,
        extract: fn(TaskValue) -> Result<T>,
    ) -> Batch<T> {
        let batch_id = self.next_batch_id(op);
        let mut pending: Vec<Option<oneshot::Receiver<Result<TaskValue>>>> =
            Vec::with_capacity(work.len());

        for (index, work) in work.into_iter().enumerate() {
            if cancel.is_cancelled() {
                pending.push(None);
                continue;
            }
            let (respond, receiver) = oneshot::channel();
            let task = Task::new(format!("{batch_id}/{index}"), work)
                .with_cancel(cancel.clone())
                .with_responder(respond);
            match self.submit_wait(task).await {
                Ok(()) => pending.push(Some(receiver)),
                Err(_) => pending.push(None),
            }
        }

        let mut results = Vec::with_capacity(pending.len());
        for receiver in pending {
            let result = match receiver {
                None => Err(NoiseError::Cancelled),
                Some(receiver) => match receiver.await {
                    Ok(outcome) => outcome.and_then(extract),
                    Err(_) => Err(NoiseError::Cancelled),
                },
            };
            results.push(result);
        }
        Batch::from_results(results)
    }
}

impl WorkerPool for TrackedPool {
    async fn xor_batch(
        &self,
        data: Vec<Block>,
        rand1: Vec<Block>,
        rand2: Vec<Block>,
        cancel: CancellationToken,
    ) -> Result<Batch<Block>> {
        if data.len() != rand1.len() || data.len() != rand2.len() {
            return Err(NoiseError::SizeMismatch {
                left: data.len(),
                right: rand1.len().min(rand2.len()),
            });
        }
        let work = data
            .into_iter()
            .zip(rand1)
            .zip(rand2)
            .map(|((data, rand1), rand2)| TaskWork::Xor { data, rand1, rand2 })
            .collect();
        Ok(self.run_batch(work, "xor", cancel, TaskValue::into_block).await)
    }

    async fn store_batch(
        &self,
        blocks: Vec<Block>,
        cancel: CancellationToken,
    ) -> Result<Batch<Address>> {
        let work = blocks
            .into_iter()
            .map(|block| TaskWork::Store { block })
            .collect();
        Ok(self
            .run_batch(work, "store", cancel, TaskValue::into_address)
            .await)
    }

    async fn retrieve_batch(
        &self,
        addresses: Vec<Address>,
        cancel: CancellationToken,
    ) -> Result<Batch<Block>> {
        let work = addresses
            .into_iter()
            .map(|address| TaskWork::Retrieve { address })
            .collect();
        Ok(self
            .run_batch(work, "retrieve", cancel, TaskValue::into_block)
            .await)
    }

    async fn generate_batch(
        &self,
        count: usize,
        size: usize,
        cancel: CancellationToken,
    ) -> Result<Batch<Block>> {
        let work = (0..count).map(|_| TaskWork::Generate { size }).collect();
        Ok(self
            .run_batch(work, "generate", cancel, TaskValue::into_block)
            .await)
    }
}

async fn worker_loop<G: BackendGateway>(
    rx: Arc<Mutex<mpsc::Receiver<Task>>>,
    gateway: Arc<G>,
    source: RandomizerSource,
    stats: Arc<PoolStats>,
    results: mpsc::UnboundedSender<TaskResult>,
    cancel: CancellationToken,
) {
    loop {
        let task = {
            let mut rx = rx.lock().await;
            tokio::select! {
                _ = cancel.cancelled() => return,
                task = rx.recv() => task,
            }
        };
        let Some(task) = task else { return };
        let Task {
            id,
            work,
            cancel: task_cancel,
            respond,
        } = task;
        let kind = work.kind();
        let started = Instant::now();

        let outcome = if task_cancel.is_some_and(|t| t.is_cancelled()) {
            Err(NoiseError::Cancelled)
        } else {
            // An unexpected abort fails this task alone
            match AssertUnwindSafe(run_task(&gateway, &source, work))
                .catch_unwind()
                .await
            {
                Ok(result) => result,
                Err(_) => Err(NoiseError::backend(std::io::Error::other(
                    "task panicked",
                ))),
            }
        };
        let duration = started.elapsed();

        match &outcome {
            Ok(_) => stats.completed.fetch_add(1, Ordering::Relaxed),
            Err(_) => stats.failed.fetch_add(1, Ordering::Relaxed),
        };

        // The batch caller gets the primary outcome; the results stream
        // observes a copy
        match respond {
            Some(respond) => {
                let observed = match &outcome {
                    Ok(value) => Ok(value.clone()),
                    Err(err) => Err(err.clone_kind()),
                };
                let _ = respond.send(outcome);
                let _ = results.send(TaskResult {
                    id,
                    kind,
                    outcome: observed,
                    duration,
                });
            }
            None => {
                let _ = results.send(TaskResult {
                    id,
                    kind,
                    outcome,
                    duration,
                });
            }
        }
    }
}

async fn run_task<G: BackendGateway>(
    gateway: &Arc<G>,
    source: &RandomizerSource,
    work: TaskWork,
) -> Result<TaskValue> {
    match work {
        TaskWork::Xor { data, rand1, rand2 } => {
            data.xor3(&rand1, &rand2).map(TaskValue::Block)
        }
        TaskWork::Store { block } => gateway.put(block).await.map(TaskValue::Address),
        TaskWork::Retrieve { address } => {
            let block = gateway.get(address).await?;
            if block.address() != address {
                return Err(NoiseError::BlockUnavailable(address));
            }
            Ok(TaskValue::Block(block))
        }
        TaskWork::Generate { size } => source.generate(size).map(TaskValue::Block),
    }
}
