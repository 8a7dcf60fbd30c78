//! Timing helpers: per-frame coalescing, a leading-edge throttle, and
//! change watchers that stop once their mount is gone.

use std::{
    future::Future,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use shared::domain::WorldCoord;
use tokio::{
    sync::broadcast::{self, error::RecvError},
    task::{AbortHandle, JoinHandle},
    time::{interval, Interval, MissedTickBehavior},
};
use tracing::info;
use viewer_integration::MountSurface;

use crate::lock;

/// Runs at most one queued job per frame; requests made while a job is queued are dropped.
pub struct FrameCoalescer {
    pending: Arc<AtomicBool>,
    frame: Duration,
}

impl FrameCoalescer {
    pub fn new(frame: Duration) -> Self {
        Self {
            pending: Arc::new(AtomicBool::new(false)),
            frame,
        }
    }

    pub fn request<F>(&self, job: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        if self.pending.swap(true, Ordering::SeqCst) {
            return false;
        }
        let pending = Arc::clone(&self.pending);
        let frame = self.frame;
        tokio::spawn(async move {
            tokio::time::sleep(frame).await;
            job();
            pending.store(false, Ordering::SeqCst);
        });
        true
    }

    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::SeqCst)
    }
}

/// Leading-edge throttle: the first request schedules a job after `period`,
/// later requests are ignored until it has fired or been cancelled.
pub struct Throttle {
    period: Duration,
    next_ticket: AtomicU64,
    pending: Arc<Mutex<Option<(u64, AbortHandle)>>>,
}

impl Throttle {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            next_ticket: AtomicU64::new(0),
            pending: Arc::new(Mutex::new(None)),
        }
    }

    pub fn schedule<F>(&self, job: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut slot = lock(&self.pending);
        if slot.is_some() {
            return false;
        }
        let ticket = self.next_ticket.fetch_add(1, Ordering::SeqCst);
        let pending = Arc::clone(&self.pending);
        let period = self.period;
        let task = tokio::spawn(async move {
            tokio::time::sleep(period).await;
            {
                let mut slot = lock(&pending);
                if !matches!(*slot, Some((current, _)) if current == ticket) {
                    return;
                }
                *slot = None;
            }
            job.await;
        });
        *slot = Some((ticket, task.abort_handle()));
        true
    }

    /// Drops the pending job, if any. Returns whether one was pending.
    pub fn cancel(&self) -> bool {
        match lock(&self.pending).take() {
            Some((_, task)) => {
                task.abort();
                true
            }
            None => false,
        }
    }

    pub fn is_pending(&self) -> bool {
        lock(&self.pending).is_some()
    }
}

/// What wakes a watcher: a fixed-period tick, optionally joined by push notifications.
pub struct WatchTrigger {
    ticker: Interval,
    changes: Option<broadcast::Receiver<WorldCoord>>,
}

impl WatchTrigger {
    pub fn new(period: Duration, changes: Option<broadcast::Receiver<WorldCoord>>) -> Self {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Self { ticker, changes }
    }

    pub fn polling(period: Duration) -> Self {
        Self::new(period, None)
    }

    async fn wait(&mut self) {
        let Some(changes) = self.changes.as_mut() else {
            self.ticker.tick().await;
            return;
        };
        tokio::select! {
            _ = self.ticker.tick() => {}
            received = changes.recv() => {
                if let Err(RecvError::Closed) = received {
                    self.changes = None;
                }
            }
        }
    }
}

/// Calls `on_tick` on every trigger until `mount` is detached, then `on_detach` once.
pub fn spawn_watch<T, D>(
    name: &'static str,
    mut trigger: WatchTrigger,
    mount: Arc<dyn MountSurface>,
    mut on_tick: T,
    on_detach: D,
) -> JoinHandle<()>
where
    T: FnMut() + Send + 'static,
    D: FnOnce() + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            trigger.wait().await;
            if !mount.is_attached() {
                info!(watcher = name, mount = mount.id(), "mount detached; watcher stopped");
                on_detach();
                return;
            }
            on_tick();
        }
    })
}
