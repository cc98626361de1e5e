//! Background producer for the threaded feeder.
//!
//! One producer thread and one [`Minibatch`] slot. The slot travels by value
//! between the two threads through two single-capacity channels:
//! - Empty channel: Consumer -> Producer (slot is free to refill)
//! - Filled channel: Producer -> Consumer (slot holds the next minibatch, or the read error)
//! - Shutdown flag: checked by the producer before and after every wait
//!
//! Because there is only one slot, the producer is never more than one batch
//! ahead and the consumer receives batches in production order.

use anyhow::{Context, Result};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, trace, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::dataset::DatasetReader;
use crate::error::FeederError;
use crate::minibatch::Minibatch;

/// What the producer hands back for each slot it takes.
struct Produced {
    slot: Minibatch,
    outcome: Result<()>,
}

pub(crate) struct Prefetcher {
    handle: Option<thread::JoinHandle<()>>,
    filled_rx: Receiver<Produced>,
    empty_tx: Option<Sender<Minibatch>>,
    shutdown: Arc<AtomicBool>,
    timeout: Option<Duration>,
    /// Set once the producer is known to have exited.
    stopped: bool,
}

impl Prefetcher {
    /// Allocates the slot and starts the producer, which begins filling it immediately.
    pub(crate) fn spawn(
        reader: DatasetReader,
        batch_size: usize,
        rank: usize,
        timeout: Option<Duration>,
    ) -> Result<Self> {
        let slot = Minibatch::zeros(batch_size, reader.size_per_sample(), reader.size_per_label());

        let (filled_tx, filled_rx) = bounded(1);
        let (empty_tx, empty_rx) = bounded(1);
        empty_tx
            .send(slot)
            .context("Failed to hand the initial slot to the producer")?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_clone = shutdown.clone();

        let handle = thread::Builder::new()
            .name(format!("minibatch-producer-{}", rank))
            .spawn(move || produce(reader, empty_rx, filled_tx, shutdown_clone))
            .with_context(|| format!("Failed to spawn producer thread for rank {}", rank))?;

        debug!("Started minibatch producer for rank {} (batch_size={})", rank, batch_size);

        Ok(Self {
            handle: Some(handle),
            filled_rx,
            empty_tx: Some(empty_tx),
            shutdown,
            timeout,
            stopped: false,
        })
    }

    /// Waits for the next produced slot, passes it to `f`, then returns it to the producer.
    pub(crate) fn with_next<T>(&mut self, f: impl FnOnce(&Minibatch) -> Result<T>) -> Result<T> {
        if self.stopped {
            return Err(FeederError::ProducerStopped.into());
        }

        let received = match self.timeout {
            Some(timeout) => self.filled_rx.recv_timeout(timeout).map_err(|e| match e {
                RecvTimeoutError::Timeout => FeederError::Timeout(timeout),
                RecvTimeoutError::Disconnected => FeederError::ProducerStopped,
            }),
            None => self
                .filled_rx
                .recv()
                .map_err(|_| FeederError::ProducerStopped),
        };

        let Produced { slot, outcome } = match received {
            Ok(produced) => produced,
            Err(e) => {
                if matches!(e, FeederError::ProducerStopped) {
                    self.stopped = true;
                }
                return Err(e.into());
            }
        };

        if let Err(e) = outcome {
            // The producer exits right after sending a failure.
            self.stopped = true;
            return Err(e.context("Minibatch producer failed"));
        }

        let result = f(&slot);
        if let Some(empty_tx) = &self.empty_tx {
            // A send error means the producer is gone; the next call reports it.
            let _ = empty_tx.send(slot);
        }
        result
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Stops the producer and joins it. Safe to call more than once.
    pub(crate) fn shutdown(&mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::Release);

        // Wakes a producer blocked waiting for the slot
        self.empty_tx.take();
        self.stopped = true;

        if let Some(handle) = self.handle.take() {
            let name = handle.thread().name().unwrap_or("producer").to_string();
            handle.join().map_err(|_| FeederError::ProducerPanicked)?;
            debug!("Joined {}", name);
        }
        Ok(())
    }
}

impl Drop for Prefetcher {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!("Minibatch producer shutdown failed: {:#}", e);
        }
    }
}

fn produce(
    mut reader: DatasetReader,
    empty_rx: Receiver<Minibatch>,
    filled_tx: Sender<Produced>,
    shutdown: Arc<AtomicBool>,
) {
    let mut produced = 0u64;

    loop {
        if shutdown.load(Ordering::Acquire) {
            break;
        }

        let mut slot = match empty_rx.recv() {
            Ok(slot) => slot,
            Err(_) => break,
        };

        if shutdown.load(Ordering::Acquire) {
            break;
        }

        let outcome = reader.fill(&mut slot);
        let failed = outcome.is_err();
        match &outcome {
            Ok(()) => {
                produced += 1;
                trace!("Produced minibatch {}", produced);
            }
            Err(e) => warn!("Minibatch producer failed after {} batches: {:#}", produced, e),
        }

        if filled_tx.send(Produced { slot, outcome }).is_err() || failed {
            break;
        }
    }

    debug!("Minibatch producer exiting after {} batches", produced);
}
