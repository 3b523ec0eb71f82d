use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use vigil_client::ClientError;

use crate::conn::{ConnState, SessionStatus};

const LISTENER_CHANNEL_CAPACITY: usize = 8;

type FetchFuture<T> = Pin<Box<dyn Future<Output = Result<T, ClientError>> + Send>>;
type Fetcher<T> = Arc<dyn Fn() -> FetchFuture<T> + Send + Sync>;

/// Polling fallback for a logical channel: one shared timer regardless of
/// how many consumers subscribe, fanning each tick's payload out to a
/// listener registry. The timer starts with the first subscriber and stops
/// with the last release. A failed tick is logged and delivers nothing —
/// previous consumer state is retained.
pub struct PollChannel<T> {
    inner: Arc<Mutex<PollInner<T>>>,
    fetch: Fetcher<T>,
    interval: Duration,
    status_tx: watch::Sender<SessionStatus>,
}

struct PollInner<T> {
    listeners: HashMap<u64, mpsc::Sender<T>>,
    next_id: u64,
    task: Option<JoinHandle<()>>,
}

impl<T: Clone + Send + 'static> PollChannel<T> {
    pub fn new<F, Fut>(interval: Duration, fetch: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, ClientError>> + Send + 'static,
    {
        let (status_tx, _) = watch::channel(SessionStatus::default());
        Self {
            inner: Arc::new(Mutex::new(PollInner {
                listeners: HashMap::new(),
                next_id: 0,
                task: None,
            })),
            fetch: Arc::new(move || Box::pin(fetch()) as FetchFuture<T>),
            interval,
            status_tx,
        }
    }

    /// Registers a listener. The first subscriber schedules the shared
    /// timer, which marks the channel `Open`.
    pub fn subscribe(&self) -> (PollHandle<T>, mpsc::Receiver<T>) {
        let (tx, rx) = mpsc::channel(LISTENER_CHANNEL_CAPACITY);
        let mut inner = self.inner.lock().expect("poll registry poisoned");
        let id = inner.next_id;
        inner.next_id += 1;
        inner.listeners.insert(id, tx);

        if inner.task.is_none() {
            let registry = Arc::clone(&self.inner);
            let fetch = Arc::clone(&self.fetch);
            let interval = self.interval;
            inner.task = Some(tokio::spawn(async move {
                run_poll_loop(registry, fetch, interval).await;
            }));
            self.status_tx.send_replace(SessionStatus {
                state: ConnState::Open,
                error: None,
            });
        }
        drop(inner);

        let handle = PollHandle {
            inner: Arc::new(PollHandleInner {
                registry: Arc::clone(&self.inner),
                status_tx: self.status_tx.clone(),
                id,
                released: AtomicBool::new(false),
            }),
        };
        (handle, rx)
    }

    pub fn status(&self) -> watch::Receiver<SessionStatus> {
        self.status_tx.subscribe()
    }

    pub fn listener_count(&self) -> usize {
        self.inner.lock().expect("poll registry poisoned").listeners.len()
    }

    pub fn timer_active(&self) -> bool {
        self.inner.lock().expect("poll registry poisoned").task.is_some()
    }
}

async fn run_poll_loop<T: Clone>(
    registry: Arc<Mutex<PollInner<T>>>,
    fetch: Fetcher<T>,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        match fetch().await {
            Ok(payload) => {
                let inner = registry.lock().expect("poll registry poisoned");
                for tx in inner.listeners.values() {
                    // A slow listener drops this tick; the next tick is a
                    // full snapshot anyway.
                    let _ = tx.try_send(payload.clone());
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "poll tick failed; keeping previous state");
            }
        }
    }
}

/// Idempotent release handle for one polling listener. The last release
/// stops the shared timer; dropping the handle releases it too.
pub struct PollHandle<T> {
    inner: Arc<PollHandleInner<T>>,
}

struct PollHandleInner<T> {
    registry: Arc<Mutex<PollInner<T>>>,
    status_tx: watch::Sender<SessionStatus>,
    id: u64,
    released: AtomicBool,
}

impl<T> PollHandle<T> {
    pub fn release(&self) {
        self.inner.release();
    }

    pub fn is_released(&self) -> bool {
        self.inner.released.load(Ordering::SeqCst)
    }
}

impl<T> Clone for PollHandle<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> PollHandleInner<T> {
    fn release(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut inner = self.registry.lock().expect("poll registry poisoned");
        inner.listeners.remove(&self.id);
        if inner.listeners.is_empty() {
            if let Some(task) = inner.task.take() {
                task.abort();
            }
            self.status_tx.send_replace(SessionStatus {
                state: ConnState::Disconnected,
                error: None,
            });
        }
    }
}

impl<T> Drop for PollHandleInner<T> {
    fn drop(&mut self) {
        self.release();
    }
}
