//! OS thread running a task reactor.

use std::sync::Mutex;
use std::thread::{JoinHandle, ThreadId};

use futures::channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures::StreamExt;
use log::{info, warn};

pub(crate) type Job = Box<dyn FnOnce() + Send + 'static>;

pub(crate) enum Message {
    Run(Job),
    Stop,
}

/// A named OS thread that executes posted jobs in FIFO order.
///
/// Handlers bound to the same thread share its queue, so jobs of one handler never
/// run concurrently with each other.
pub struct Thread {
    name: String,
    id: ThreadId,
    tx: UnboundedSender<Message>,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl Thread {
    /// Spawn the OS thread and start its reactor.
    pub fn new(name: &str) -> Self {
        let (tx, rx) = unbounded();
        let join = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || futures::executor::block_on(reactor(rx)))
            .unwrap_or_else(|e| panic!("[os] unable to spawn thread {}: {}", name, e));
        let id = join.thread().id();
        info!("[os] thread {} started", name);
        Self {
            name: name.to_string(),
            id,
            tx,
            join: Mutex::new(Some(join)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn id(&self) -> ThreadId {
        self.id
    }

    /// Returns true when called from this thread.
    pub fn is_same_thread(&self) -> bool {
        std::thread::current().id() == self.id
    }

    pub(crate) fn sender(&self) -> UnboundedSender<Message> {
        self.tx.clone()
    }

    /// Stop the reactor and join the OS thread.
    ///
    /// Jobs queued before the stop still run. Calling this twice is a no-op.
    pub fn stop(&self) {
        let join = match self.join.lock() {
            Ok(mut join) => join.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        let Some(join) = join else {
            return;
        };
        if self.is_same_thread() {
            panic!("[os] thread {} cannot stop itself", self.name);
        }
        if self.tx.unbounded_send(Message::Stop).is_err() {
            warn!("[os] thread {} reactor already gone", self.name);
        }
        if join.join().is_err() {
            warn!("[os] thread {} panicked", self.name);
        }
        info!("[os] thread {} stopped", self.name);
    }
}

impl Drop for Thread {
    fn drop(&mut self) {
        self.stop();
    }
}

impl core::fmt::Debug for Thread {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Thread").field("name", &self.name).finish()
    }
}

async fn reactor(mut rx: UnboundedReceiver<Message>) {
    while let Some(message) = rx.next().await {
        match message {
            Message::Run(job) => job(),
            Message::Stop => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;

    use super::*;

    #[test]
    fn runs_jobs_in_order() {
        let thread = Thread::new("test");
        let (tx, rx) = mpsc::channel();
        for i in 0..10 {
            let tx = tx.clone();
            thread
                .sender()
                .unbounded_send(Message::Run(Box::new(move || tx.send(i).unwrap())))
                .unwrap();
        }
        let got: Vec<i32> = (0..10).map(|_| rx.recv().unwrap()).collect();
        assert_eq!(got, (0..10).collect::<Vec<_>>());
        assert!(!thread.is_same_thread());
        thread.stop();
        thread.stop();
    }
}
