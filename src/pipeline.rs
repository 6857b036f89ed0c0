//! Batching pipeline.
//!
//! Commands submitted from anywhere in the process are queued on a channel
//! and drained by a background task. The task takes the first queued command,
//! lets the current turn finish queueing, then sends everything queued so far
//! to the gateway as one non-atomic pipeline. Only one batch is in flight at
//! a time; commands queued meanwhile form the next batch.
//!
//! Commands execute in submission order, but a batch is not a transaction:
//! a failing command does not undo the ones before it.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::gateway::{Command, KvGateway, Reply};
use crate::persistence::{PersistenceError, Result};

struct Queued {
    command: Command,
    reply: oneshot::Sender<Result<Reply>>,
}

fn closed() -> PersistenceError {
    PersistenceError::Unavailable("pipeline closed".to_string())
}

/// Handle to the batching pipeline of one gateway connection
pub struct Pipeline {
    tx: mpsc::UnboundedSender<Queued>,
    shutdown_tx: mpsc::Sender<()>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Pipeline {
    /// Create a pipeline over the given gateway
    ///
    /// This spawns the background task that batches and sends commands.
    /// With a zero `linger` a batch closes as soon as the submitting tasks
    /// yield; otherwise the task waits `linger` before closing it.
    pub fn new(gateway: Arc<dyn KvGateway>, max_batch_size: usize, linger: Duration) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let worker = tokio::spawn(Self::writer_loop(
            gateway,
            rx,
            shutdown_rx,
            max_batch_size.max(1),
            linger,
        ));

        Self {
            tx,
            shutdown_tx,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Queue a command and return a future resolving to its reply.
    ///
    /// The command is queued immediately, before the future is polled, so
    /// several submissions made in a row land in the same batch.
    pub fn submit(&self, command: Command) -> impl Future<Output = Result<Reply>> + Send + 'static {
        let (reply_tx, reply_rx) = oneshot::channel();
        let queued = self.tx.send(Queued {
            command,
            reply: reply_tx,
        });

        async move {
            queued.map_err(|_| closed())?;
            reply_rx.await.map_err(|_| closed())?
        }
    }

    /// Queue a command and wait for its reply
    pub async fn call(&self, command: Command) -> Result<Reply> {
        self.submit(command).await
    }

    /// Flush queued commands and stop the background task
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(()).await;

        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                error!("Pipeline task failed: {}", e);
            }
        }
    }

    /// Background loop that batches and sends commands
    async fn writer_loop(
        gateway: Arc<dyn KvGateway>,
        mut rx: mpsc::UnboundedReceiver<Queued>,
        mut shutdown_rx: mpsc::Receiver<()>,
        max_batch_size: usize,
        linger: Duration,
    ) {
        loop {
            tokio::select! {
                op = rx.recv() => {
                    match op {
                        Some(op) => {
                            let mut batch = vec![op];

                            // Let the current turn finish queueing
                            if linger.is_zero() {
                                tokio::task::yield_now().await;
                            } else {
                                tokio::time::sleep(linger).await;
                            }

                            while batch.len() < max_batch_size {
                                match rx.try_recv() {
                                    Ok(op) => batch.push(op),
                                    Err(_) => break,
                                }
                            }

                            Self::flush(gateway.as_ref(), batch).await;
                        }
                        None => break,
                    }
                }

                // Shutdown signal
                _ = shutdown_rx.recv() => {
                    rx.close();
                    let mut batch = Vec::new();
                    while let Ok(op) = rx.try_recv() {
                        batch.push(op);
                    }
                    if !batch.is_empty() {
                        info!("Flushing {} commands on shutdown", batch.len());
                        Self::flush(gateway.as_ref(), batch).await;
                    }
                    break;
                }
            }
        }

        debug!("Pipeline loop exited");
    }

    async fn flush(gateway: &dyn KvGateway, batch: Vec<Queued>) {
        let count = batch.len();
        let (commands, replies): (Vec<_>, Vec<_>) = batch
            .into_iter()
            .map(|queued| (queued.command, queued.reply))
            .unzip();

        match gateway.pipeline(commands).await {
            Ok(results) => {
                debug!("Flushed {} commands", count);
                for (result, reply) in results.into_iter().zip(replies) {
                    let _ = reply.send(result);
                }
            }
            Err(e) => {
                error!("Failed to flush pipeline of {} commands: {}", count, e);
                for reply in replies {
                    let _ = reply.send(Err(e.replicate()));
                }
            }
        }
    }
}
