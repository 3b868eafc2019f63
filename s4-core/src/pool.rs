//! Admission-controlled pool wrapping [`common::thread_pool::ThreadPool`]
//! with the "start-countdown future" discipline from spec.md §9: a pool job
//! signals a one-shot channel as its first action, and the caller races that
//! signal against a timer. If the timer wins, the caller gets `Busy` without
//! waiting for the job to actually finish (or even start); if the signal
//! wins, the caller gets a [`PoolHandle`] it can `join().await` later, once
//! the job has actually completed.

use crate::error::S4Error;
use common::thread_pool::ThreadPool;
use logger::logger::Logger;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

/// Handed to a pool job so it can signal that it has begun executing (as
/// opposed to merely having been dequeued). Signaling more than once is a
/// no-op.
pub struct Started {
    tx: Option<oneshot::Sender<()>>,
}

impl Started {
    pub fn signal(&mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(());
        }
    }

    #[cfg(test)]
    pub fn from_sender(tx: oneshot::Sender<()>) -> Started {
        Started { tx: Some(tx) }
    }
}

/// A job that has been admitted; `join().await` suspends until the job
/// actually finishes running on its worker thread.
pub struct PoolHandle<T> {
    rx: oneshot::Receiver<T>,
}

impl<T: Send + 'static> PoolHandle<T> {
    pub async fn join(self) -> Result<T, S4Error> {
        self.rx.await.map_err(|_| S4Error::internal("pool job dropped its result", "pool"))
    }
}

pub struct Pool {
    inner: Arc<ThreadPool>,
    name: &'static str,
    logger: Logger,
}

impl Pool {
    pub fn new(name: &'static str, size: usize, logger: Logger) -> Pool {
        Pool {
            inner: Arc::new(ThreadPool::new(size)),
            name,
            logger,
        }
    }

    pub fn live(&self) -> usize {
        self.inner.cant_lives_workers()
    }

    pub fn capacity(&self) -> usize {
        self.inner.cant_workers()
    }

    /// Submits `job` to the pool under start-countdown admission control.
    /// `job` receives a [`Started`] handle it must signal as its first
    /// action. If the job hasn't signaled within `timeout`, this returns
    /// `Err(Busy)` immediately; the job itself keeps running to completion
    /// on its worker, but its result is discarded since no one still holds
    /// the other end of the channel.
    pub async fn submit<F, T>(&self, timeout: Duration, job: F) -> Result<PoolHandle<T>, S4Error>
    where
        F: FnOnce(&mut Started) -> T + Send + 'static,
        T: Send + 'static,
    {
        let (start_tx, start_rx) = oneshot::channel::<()>();
        let (result_tx, result_rx) = oneshot::channel::<T>();

        self.inner
            .execute(move || {
                let mut started = Started { tx: Some(start_tx) };
                let result = job(&mut started);
                let _ = result_tx.send(result);
            })
            .map_err(|e| S4Error::internal(e.to_string(), "pool"))?;

        if tokio::time::timeout(timeout, start_rx).await.is_err() {
            self.logger.warn(
                &format!(
                    "pool '{}' busy: live={} capacity={}",
                    self.name,
                    self.live(),
                    self.capacity()
                ),
                "pool",
            );
            return Err(S4Error::busy(format!("pool '{}' did not admit job in time", self.name), "pool"));
        }

        self.logger.debug(&format!("pool '{}' admitted job", self.name), "pool", self.live());
        Ok(PoolHandle { rx: result_rx })
    }
}
