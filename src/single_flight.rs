// src/single_flight.rs
//! Collapse concurrent identical executions into one.
//!
//! The first caller for a key registers a `watch` channel and spawns the
//! task on a worker pool bounded by a semaphore. Later callers for the same
//! key subscribe to that channel. When the task finishes (value, error or
//! panic) the registry entry is removed before the outcome is published,
//! so the next call for the key always starts fresh.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use metrics::counter;
use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::config::SingleFlightSection;
use crate::error::FlightError;
use crate::metrics::{FLIGHT_EXECUTIONS, FLIGHT_JOINED, FLIGHT_TIMEOUTS};

type Outcome<T> = Option<Result<T, FlightError>>;

const EXEC_TIMEOUT_FACTOR: u32 = 10;

struct Flight<T> {
    /// Distinguishes this execution from a later one under the same key.
    generation: u64,
    rx: watch::Receiver<Outcome<T>>,
}

pub struct SingleFlight<T> {
    inflight: Arc<DashMap<String, Flight<T>>>,
    workers: Arc<Semaphore>,
    wait_timeout: Duration,
    exec_timeout: Duration,
    generation: AtomicU64,
}

impl<T> std::fmt::Debug for SingleFlight<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SingleFlight")
            .field("in_flight", &self.inflight.len())
            .field("free_workers", &self.workers.available_permits())
            .field("wait_timeout", &self.wait_timeout)
            .field("exec_timeout", &self.exec_timeout)
            .finish()
    }
}

impl<T> SingleFlight<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Executions are cut off after `EXEC_TIMEOUT_FACTOR` times the wait
    /// timeout unless [`with_exec_timeout`](Self::with_exec_timeout) says otherwise.
    pub fn new(max_workers: usize, timeout_ms: u64) -> Self {
        let wait_timeout = Duration::from_millis(timeout_ms);
        Self {
            inflight: Arc::new(DashMap::new()),
            workers: Arc::new(Semaphore::new(max_workers.max(1))),
            wait_timeout,
            exec_timeout: wait_timeout.saturating_mul(EXEC_TIMEOUT_FACTOR),
            generation: AtomicU64::new(0),
        }
    }

    pub fn from_config(cfg: &SingleFlightSection) -> Self {
        Self::new(cfg.max_workers, cfg.timeout_ms)
            .with_exec_timeout(Duration::from_millis(cfg.exec_timeout_ms))
    }

    /// Upper bound on one execution. A task still running past it is
    /// dropped, its worker freed and its key released with an error.
    pub fn with_exec_timeout(mut self, exec_timeout: Duration) -> Self {
        self.exec_timeout = exec_timeout.max(self.wait_timeout);
        self
    }

    /// Number of keys with an execution still running.
    pub fn in_flight_count(&self) -> usize {
        self.inflight.len()
    }

    pub fn wait_timeout(&self) -> Duration {
        self.wait_timeout
    }

    pub fn exec_timeout(&self) -> Duration {
        self.exec_timeout
    }

    /// Run `task` once per concurrent `key`, waiting up to the configured timeout.
    pub async fn run<F, Fut, E>(&self, key: &str, task: F) -> Result<T, FlightError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        self.run_with_timeout(key, self.wait_timeout, task).await
    }

    /// Like [`run`](Self::run) but with a caller-specific wait bound. The
    /// execution itself is not cancelled when a waiter gives up.
    pub async fn run_with_timeout<F, Fut, E>(
        &self,
        key: &str,
        wait: Duration,
        task: F,
    ) -> Result<T, FlightError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let (mut rx, launch) = match self.inflight.entry(key.to_string()) {
            Entry::Occupied(e) => {
                counter!(FLIGHT_JOINED).increment(1);
                debug!(target: "rankfuse::single_flight", key, "joined in-flight execution");
                (e.get().rx.clone(), None)
            }
            Entry::Vacant(v) => {
                let (tx, rx) = watch::channel(None);
                let generation = self.generation.fetch_add(1, Ordering::Relaxed);
                v.insert(Flight {
                    generation,
                    rx: rx.clone(),
                });
                (rx, Some((tx, generation)))
            }
        };

        // The shard lock is released above; the spawned task removes the entry.
        if let Some((tx, generation)) = launch {
            counter!(FLIGHT_EXECUTIONS).increment(1);
            self.spawn(key.to_string(), generation, tx, task);
        }

        // Bound to a local so the borrowed `watch::Ref` drops before `rx`.
        let waited = timeout(wait, rx.wait_for(Option::is_some)).await;
        match waited {
            Ok(Ok(outcome)) => match &*outcome {
                Some(result) => result.clone(),
                None => Err(abandoned(key)),
            },
            Ok(Err(_)) => Err(abandoned(key)),
            Err(_) => {
                counter!(FLIGHT_TIMEOUTS).increment(1);
                let waited_ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX);
                debug!(target: "rankfuse::single_flight", key, waited_ms, "wait timed out");
                Err(FlightError::Timeout {
                    key: key.to_string(),
                    waited_ms,
                })
            }
        }
    }

    fn spawn<F, Fut, E>(
        &self,
        key: String,
        generation: u64,
        tx: watch::Sender<Outcome<T>>,
        task: F,
    ) where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let inflight = Arc::clone(&self.inflight);
        let workers = Arc::clone(&self.workers);
        let exec_timeout = self.exec_timeout;

        tokio::spawn(async move {
            let outcome = match workers.acquire_owned().await {
                Ok(permit) => {
                    let worker = tokio::spawn(async move {
                        let _permit = permit;
                        timeout(exec_timeout, task()).await
                    });
                    match worker.await {
                        Ok(Ok(Ok(v))) => Ok(v),
                        Ok(Ok(Err(e))) => Err(FlightError::Failed {
                            key: key.clone(),
                            reason: e.to_string(),
                        }),
                        Ok(Err(_)) => {
                            let limit_ms = u64::try_from(exec_timeout.as_millis()).unwrap_or(u64::MAX);
                            warn!(target: "rankfuse::single_flight", key = %key, limit_ms, "execution cut off");
                            Err(FlightError::Failed {
                                key: key.clone(),
                                reason: format!("execution exceeded {limit_ms} ms"),
                            })
                        }
                        Err(join) if join.is_panic() => {
                            warn!(target: "rankfuse::single_flight", key = %key, "task panicked");
                            Err(FlightError::Panicked { key: key.clone() })
                        }
                        Err(_) => Err(abandoned(&key)),
                    }
                }
                Err(_) => Err(abandoned(&key)),
            };

            inflight.remove_if(&key, |_, f| f.generation == generation);
            let _ = tx.send(Some(outcome));
        });
    }
}

fn abandoned(key: &str) -> FlightError {
    FlightError::Failed {
        key: key.to_string(),
        reason: "execution abandoned".to_string(),
    }
}
