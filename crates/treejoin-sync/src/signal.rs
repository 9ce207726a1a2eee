//! One-shot guards and cancellable background tasks.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// A guard that opens exactly once.
#[derive(Debug, Default)]
pub struct Latch(AtomicBool);

impl Latch {
    pub const fn new() -> Self {
        Self(AtomicBool::new(false))
    }

    /// Open the latch. Returns `true` only for the caller that opened it.
    pub fn fire(&self) -> bool {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_fired(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Receiving end of a stop signal. Resolves when the task is cancelled or
/// its [`TaskHandle`] is dropped.
pub type StopSignal = oneshot::Receiver<()>;

/// Handle to a cooperative background task.
///
/// Cancelling never blocks and may be repeated: the stop sender is taken on
/// the first call, later calls find nothing to send.
#[derive(Debug, Default)]
pub struct TaskHandle {
    stop: Mutex<Option<oneshot::Sender<()>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl TaskHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn `body` on the runtime, handing it the stop signal.
    ///
    /// A task spawned earlier through this handle is cancelled first.
    pub fn spawn<F, Fut>(&self, body: F)
    where
        F: FnOnce(StopSignal) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.cancel();
        let (tx, rx) = oneshot::channel();
        let task = tokio::spawn(body(rx));
        *lock(&self.stop) = Some(tx);
        *lock(&self.task) = Some(task);
    }

    /// Ask the task to stop without waiting for it.
    pub fn cancel(&self) {
        if let Some(tx) = lock(&self.stop).take() {
            let _ = tx.send(());
        }
    }

    pub fn is_running(&self) -> bool {
        lock(&self.task)
            .as_ref()
            .map(|task| !task.is_finished())
            .unwrap_or(false)
    }

    /// Cancel the task and wait for it, if it is still running.
    ///
    /// Must not be awaited from inside the task itself.
    pub async fn shutdown(&self) {
        self.cancel();
        let task = lock(&self.task).take();
        if let Some(task) = task {
            if !task.is_finished() {
                if let Err(e) = task.await {
                    tracing::warn!("background task ended abnormally: {}", e);
                }
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_latch_fires_once() {
        let latch = Latch::new();
        assert!(!latch.is_fired());
        assert!(latch.fire());
        assert!(!latch.fire());
        assert!(latch.is_fired());
    }

    #[tokio::test]
    async fn test_shutdown_stops_looping_task() {
        let ticks = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let handle = TaskHandle::new();
        let counter = Arc::clone(&ticks);
        handle.spawn(move |mut stop| async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(5));
            loop {
                tokio::select! {
                    _ = &mut stop => break,
                    _ = ticker.tick() => {
                        counter.fetch_add(1, Ordering::SeqCst);
                    }
                }
            }
        });

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(handle.is_running());
        handle.shutdown().await;
        assert!(!handle.is_running());

        let seen = ticks.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), seen);
    }

    #[tokio::test]
    async fn test_cancel_and_shutdown_are_repeatable() {
        let handle = TaskHandle::new();
        handle.cancel();
        handle.shutdown().await;

        handle.spawn(|_stop| async {});
        tokio::time::sleep(Duration::from_millis(10)).await;
        handle.cancel();
        handle.cancel();
        handle.shutdown().await;
        handle.shutdown().await;
        assert!(!handle.is_running());
    }
}
