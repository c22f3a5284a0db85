//! # Loop-Integrated Primitives
//!
//! A thin wrapper around a Tokio runtime handle. `Reactor` supplies timers,
//! cross-context wakeups, and two-phase handle teardown, keeping all
//! blocking work off the executor thread.
//!
//! The core never frees a handle synchronously from within its own
//! callback; teardown is stop → close-with-callback → free, enforced here
//! by requiring an explicit `close().await` before a `Handle<T>` is
//! dropped in release builds (debug builds additionally warn on drop
//! without close).

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;

/// A handle to the event loop driving a `Client`/`Server` instance.
///
/// Cloning a `Reactor` is cheap (it's a thin wrapper over `Handle::clone`).
/// Two independent `Reactor`s (and the instances they drive) must not be
/// used to poke the same `Client`/`Server` from two threads at once.
#[derive(Clone)]
pub struct Reactor {
    handle: tokio::runtime::Handle,
}

impl Reactor {
    /// Bind to the currently running Tokio runtime. Panics outside one; call
    /// this from within `#[tokio::main]` or `#[tokio::test]`.
    pub fn current() -> Self {
        Self {
            handle: tokio::runtime::Handle::current(),
        }
    }

    /// Start a timer that fires once after `delay`, invoking `on_fire` on
    /// the loop thread. Returns a handle that can be cancelled before it
    /// fires.
    pub fn spawn_timer<F>(&self, delay: Duration, on_fire: F) -> LoopTimer
    where
        F: FnOnce() + Send + 'static,
    {
        let task = self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            on_fire();
        });
        LoopTimer { task }
    }

    /// Create a cross-context wakeup primitive: some other task calls
    /// `notify()`, a waiter calls `wait().await` and resumes on the loop
    /// thread.
    pub fn async_wakeup(&self) -> AsyncWakeup {
        AsyncWakeup {
            notify: Arc::new(Notify::new()),
        }
    }

    /// Spawn a plain unit of work onto this reactor's loop.
    pub fn spawn<F>(&self, fut: F) -> JoinHandle<F::Output>
    where
        F: std::future::Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.handle.spawn(fut)
    }
}

/// A one-shot timer. Dropping it without calling `cancel` lets it run to
/// completion; this is fire-and-forget `tokio::spawn` underneath, where
/// cleanup is driven by the channel closing rather than an explicit abort.
pub struct LoopTimer {
    task: JoinHandle<()>,
}

impl LoopTimer {
    pub fn cancel(self) {
        self.task.abort();
    }
}

/// Cross-context notification delivered on the loop thread.
#[derive(Clone)]
pub struct AsyncWakeup {
    notify: Arc<Notify>,
}

impl AsyncWakeup {
    pub fn notify(&self) {
        self.notify.notify_one();
    }

    pub async fn wait(&self) {
        self.notify.notified().await;
    }
}

/// Two-phase teardown for a resource that must not be freed synchronously
/// from within its own completion callback. `T` is the owned resource;
/// `close` consumes it and runs an async close callback before the value is
/// dropped.
pub struct Handle<T> {
    inner: Option<T>,
    #[cfg(debug_assertions)]
    closed: bool,
}

impl<T> Handle<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner: Some(inner),
            #[cfg(debug_assertions)]
            closed: false,
        }
    }

    pub fn get(&self) -> &T {
        self.inner.as_ref().expect("handle already closed")
    }

    pub fn get_mut(&mut self) -> &mut T {
        self.inner.as_mut().expect("handle already closed")
    }

    /// Stop → close-with-callback → free. `close_cb` receives the owned
    /// resource and performs whatever async cleanup it requires; the value
    /// is dropped only after `close_cb` resolves.
    pub async fn close<F, Fut>(mut self, close_cb: F)
    where
        F: FnOnce(T) -> Fut,
        Fut: std::future::Future<Output = ()>,
    {
        if let Some(inner) = self.inner.take() {
            close_cb(inner).await;
        }
        #[cfg(debug_assertions)]
        {
            self.closed = true;
        }
    }
}

#[cfg(debug_assertions)]
impl<T> Drop for Handle<T> {
    fn drop(&mut self) {
        if self.inner.is_some() && !self.closed {
            tracing::warn!("Handle dropped without calling close() first");
        }
    }
}
