//! FIFO task queues bound to a [`Thread`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::ThreadId;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use embassy_time::{with_timeout, Duration};
use futures::channel::mpsc::UnboundedSender;
use log::{error, trace};

use super::thread::{Message, Thread};

struct Inner {
    thread_name: String,
    thread_id: ThreadId,
    tx: UnboundedSender<Message>,
    cleared: AtomicBool,
}

/// A task queue whose jobs execute one at a time, in order, on the bound thread.
///
/// Cloning a handler yields another reference to the same queue.
#[derive(Clone)]
pub struct Handler {
    inner: Arc<Inner>,
}

impl Handler {
    pub fn new(thread: &Thread) -> Self {
        Self {
            inner: Arc::new(Inner {
                thread_name: thread.name().to_string(),
                thread_id: thread.id(),
                tx: thread.sender(),
                cleared: AtomicBool::new(false),
            }),
        }
    }

    /// Enqueue a task. Never blocks the caller.
    ///
    /// Tasks posted after [`Handler::clear`] are dropped.
    pub fn post<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.is_cleared() {
            error!("[handler] post on cleared handler ({}), task dropped", self.inner.thread_name);
            return;
        }
        let inner = self.inner.clone();
        let job = Box::new(move || {
            if inner.cleared.load(Ordering::Acquire) {
                trace!("[handler] skipping task queued before clear ({})", inner.thread_name);
                return;
            }
            task()
        });
        if self.inner.tx.unbounded_send(Message::Run(job)).is_err() {
            error!("[handler] thread {} is stopped, task dropped", self.inner.thread_name);
        }
    }

    /// Post `f` to run against a shared object on this handler.
    pub fn call_on<T, F>(&self, target: &Arc<T>, f: F)
    where
        T: Send + Sync + ?Sized + 'static,
        F: FnOnce(&T) + Send + 'static,
    {
        let target = target.clone();
        self.post(move || f(&target));
    }

    /// Wrap `f` so that every invocation is posted to this handler.
    pub fn bind<A, F>(&self, f: F) -> ContextualCallback<A>
    where
        F: Fn(A) + Send + Sync + 'static,
    {
        ContextualCallback {
            handler: self.clone(),
            f: Arc::new(f),
        }
    }

    /// Wrap `f` so that its single invocation is posted to this handler.
    pub fn bind_once<A, F>(&self, f: F) -> ContextualOnceCallback<A>
    where
        F: FnOnce(A) + Send + 'static,
    {
        ContextualOnceCallback {
            handler: self.clone(),
            f: Box::new(f),
        }
    }

    /// Discard every task that has not started yet and reject new ones.
    pub fn clear(&self) {
        self.inner.cleared.store(true, Ordering::Release);
    }

    pub fn is_cleared(&self) -> bool {
        self.inner.cleared.load(Ordering::Acquire)
    }

    /// Block until the thread has moved past every task queued on this handler so far.
    ///
    /// # Panics
    ///
    /// When called from the bound thread, or when `timeout` elapses.
    pub fn wait_until_stopped(&self, timeout: Duration) {
        if std::thread::current().id() == self.inner.thread_id {
            panic!(
                "[handler] wait_until_stopped called from its own thread {}",
                self.inner.thread_name
            );
        }
        let drained = Arc::new(Signal::<CriticalSectionRawMutex, ()>::new());
        let marker = drained.clone();
        let job = Box::new(move || marker.signal(()));
        if self.inner.tx.unbounded_send(Message::Run(job)).is_err() {
            // Reactor already exited, nothing left to drain.
            return;
        }
        if futures::executor::block_on(with_timeout(timeout, drained.wait())).is_err() {
            panic!(
                "[handler] thread {} did not drain within {} ms",
                self.inner.thread_name,
                timeout.as_millis()
            );
        }
    }

    pub fn thread_name(&self) -> &str {
        &self.inner.thread_name
    }
}

impl core::fmt::Debug for Handler {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Handler")
            .field("thread", &self.inner.thread_name)
            .field("cleared", &self.is_cleared())
            .finish()
    }
}

/// A callback that runs on the handler it was bound to.
pub struct ContextualCallback<A> {
    handler: Handler,
    f: Arc<dyn Fn(A) + Send + Sync>,
}

impl<A> Clone for ContextualCallback<A> {
    fn clone(&self) -> Self {
        Self {
            handler: self.handler.clone(),
            f: self.f.clone(),
        }
    }
}

impl<A: Send + 'static> ContextualCallback<A> {
    pub fn invoke(&self, arg: A) {
        let f = self.f.clone();
        self.handler.post(move || f(arg));
    }

    pub fn handler(&self) -> &Handler {
        &self.handler
    }
}

/// Single-shot variant of [`ContextualCallback`].
pub struct ContextualOnceCallback<A> {
    handler: Handler,
    f: Box<dyn FnOnce(A) + Send>,
}

impl<A: Send + 'static> ContextualOnceCallback<A> {
    pub fn invoke(self, arg: A) {
        let f = self.f;
        self.handler.post(move || f(arg));
    }

    pub fn handler(&self) -> &Handler {
        &self.handler
    }
}
