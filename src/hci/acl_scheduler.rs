//! Serializes outgoing ACL connections and remote name requests.
//!
//! The controller pages for both operations, so only one of them may be outstanding at
//! a time. Everything else waits in FIFO order.
use core::cell::RefCell;
use std::collections::VecDeque;

use embassy_sync::blocking_mutex::CriticalSectionMutex;
use log::{error, info, warn};

use super::Address;
use crate::module::{Module, ModuleContext, ModuleFactory, ModuleInstance};
use crate::os::ContextualOnceCallback;

static FACTORY: ModuleFactory = ModuleFactory::new(|| ModuleInstance::new(AclScheduler::default()));

enum Operation {
    Connection {
        address: Address,
        start: ContextualOnceCallback<()>,
    },
    RemoteName {
        address: Address,
        on_granted: ContextualOnceCallback<()>,
        on_cancelled: ContextualOnceCallback<()>,
    },
}

impl Operation {
    fn outstanding(&self) -> Outstanding {
        match self {
            Operation::Connection { address, .. } => Outstanding::Connection(*address),
            Operation::RemoteName { address, .. } => Outstanding::RemoteName(*address),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outstanding {
    Connection(Address),
    RemoteName(Address),
}

#[derive(Default)]
struct State {
    outstanding: Option<Outstanding>,
    pending: VecDeque<Operation>,
}

impl State {
    fn take_queued(&mut self, wanted: Outstanding) -> Option<Operation> {
        let index = self.pending.iter().position(|op| op.outstanding() == wanted)?;
        self.pending.remove(index)
    }

    /// Grant the slot to the next queued operation, if the slot is free.
    fn next(&mut self) -> Option<ContextualOnceCallback<()>> {
        if self.outstanding.is_some() {
            return None;
        }
        let op = self.pending.pop_front()?;
        self.outstanding = Some(op.outstanding());
        Some(match op {
            Operation::Connection { start, .. } => start,
            Operation::RemoteName { on_granted, .. } => on_granted,
        })
    }
}

pub struct AclScheduler {
    state: CriticalSectionMutex<RefCell<State>>,
}

impl Default for AclScheduler {
    fn default() -> Self {
        Self {
            state: CriticalSectionMutex::new(RefCell::new(State::default())),
        }
    }
}

impl AclScheduler {
    pub fn factory() -> &'static ModuleFactory {
        &FACTORY
    }

    fn with<R>(&self, f: impl FnOnce(&mut State) -> R) -> R {
        self.state.lock(|state| f(&mut state.borrow_mut()))
    }

    fn dispatch_next(&self) {
        if let Some(granted) = self.with(State::next) {
            granted.invoke(());
        }
    }

    fn enqueue(&self, op: Operation) {
        self.with(|state| state.pending.push_back(op));
        self.dispatch_next();
    }

    /// `start` runs once no other operation is outstanding.
    pub fn enqueue_outgoing_acl_connection(&self, address: Address, start: ContextualOnceCallback<()>) {
        info!("[acl scheduler] queue connection to {}", address);
        self.enqueue(Operation::Connection { address, start });
    }

    /// A connection to `address` completed. `on_outgoing` runs when it is the outstanding
    /// outgoing connection, `on_unknown` otherwise.
    pub fn report_acl_connection_completion(
        &self,
        address: Address,
        on_outgoing: ContextualOnceCallback<()>,
        on_unknown: ContextualOnceCallback<()>,
    ) {
        let ours = self.with(|state| {
            if state.outstanding == Some(Outstanding::Connection(address)) {
                state.outstanding = None;
                true
            } else {
                false
            }
        });
        if ours {
            on_outgoing.invoke(());
            self.dispatch_next();
        } else {
            info!("[acl scheduler] connection from {} was not initiated here", address);
            on_unknown.invoke(());
        }
    }

    /// Cancel a connection. An outstanding one gets `on_cancel` and still reports its
    /// completion. A queued one is dropped and gets `on_cancel_completed`.
    pub fn cancel_acl_connection(
        &self,
        address: Address,
        on_cancel: ContextualOnceCallback<()>,
        on_cancel_completed: ContextualOnceCallback<()>,
    ) {
        let wanted = Outstanding::Connection(address);
        let (outstanding, queued) = self.with(|state| {
            if state.outstanding == Some(wanted) {
                (true, None)
            } else {
                (false, state.take_queued(wanted))
            }
        });
        if outstanding {
            on_cancel.invoke(());
        } else if queued.is_some() {
            on_cancel_completed.invoke(());
        } else {
            warn!("[acl scheduler] no connection to {} to cancel", address);
        }
    }

    /// `on_granted` runs once no other operation is outstanding. If the request is
    /// cancelled while queued, `on_cancelled` runs instead.
    pub fn enqueue_remote_name_request(
        &self,
        address: Address,
        on_granted: ContextualOnceCallback<()>,
        on_cancelled: ContextualOnceCallback<()>,
    ) {
        info!("[acl scheduler] queue remote name request to {}", address);
        self.enqueue(Operation::RemoteName {
            address,
            on_granted,
            on_cancelled,
        });
    }

    /// Cancel a name request. An outstanding one gets `on_cancel`, which is expected to
    /// stop it and later report completion. A queued one is dropped with its own
    /// cancelled callback.
    pub fn cancel_remote_name_request(&self, address: Address, on_cancel: ContextualOnceCallback<()>) {
        let wanted = Outstanding::RemoteName(address);
        let (outstanding, queued) = self.with(|state| {
            if state.outstanding == Some(wanted) {
                (true, None)
            } else {
                (false, state.take_queued(wanted))
            }
        });
        match (outstanding, queued) {
            (true, _) => on_cancel.invoke(()),
            (false, Some(Operation::RemoteName { on_cancelled, .. })) => {
                info!("[acl scheduler] dropped queued remote name request to {}", address);
                on_cancelled.invoke(())
            }
            _ => warn!("[acl scheduler] no remote name request to {} to cancel", address),
        }
    }

    /// The outstanding name request to `address` is over, successfully or not.
    pub fn report_remote_name_request_completion(&self, address: Address) {
        let ours = self.with(|state| {
            if state.outstanding == Some(Outstanding::RemoteName(address)) {
                state.outstanding = None;
                true
            } else {
                false
            }
        });
        if ours {
            self.dispatch_next();
        } else {
            error!(
                "[acl scheduler] remote name request to {} completed but was not outstanding",
                address
            );
        }
    }

    /// Number of queued operations, not counting the outstanding one.
    pub fn queued(&self) -> usize {
        self.with(|state| state.pending.len())
    }
}

impl Module for AclScheduler {
    fn start(&self, _ctx: &ModuleContext) {
        info!("[acl scheduler] started");
    }

    fn stop(&self, _ctx: &ModuleContext) {
        let dropped = self.with(|state| {
            state.outstanding = None;
            state.pending.drain(..).count()
        });
        if dropped > 0 {
            warn!("[acl scheduler] stopping with {} queued operations", dropped);
        }
    }

    fn name(&self) -> String {
        "AclScheduler".into()
    }

    fn dump_state(&self) -> String {
        self.with(|state| format!("outstanding={:?} queued={}", state.outstanding, state.pending.len()))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;

    use super::*;
    use crate::os::{Handler, Thread};

    fn tagged(handler: &Handler, tx: &mpsc::Sender<&'static str>, tag: &'static str) -> ContextualOnceCallback<()> {
        let tx = tx.clone();
        handler.bind_once(move |()| tx.send(tag).unwrap())
    }

    #[test]
    fn operations_run_one_at_a_time() {
        let thread = Thread::new("scheduler-test");
        let handler = Handler::new(&thread);
        let (tx, rx) = mpsc::channel();
        let scheduler = AclScheduler::default();
        let a = Address::public([1; 6]);
        let b = Address::public([2; 6]);

        scheduler.enqueue_outgoing_acl_connection(a, tagged(&handler, &tx, "connect a"));
        scheduler.enqueue_remote_name_request(b, tagged(&handler, &tx, "name b"), tagged(&handler, &tx, "name b cancelled"));
        assert_eq!(rx.recv().unwrap(), "connect a");
        assert_eq!(scheduler.queued(), 1);

        scheduler.report_acl_connection_completion(a, tagged(&handler, &tx, "outgoing a"), tagged(&handler, &tx, "unknown a"));
        assert_eq!(rx.recv().unwrap(), "outgoing a");
        assert_eq!(rx.recv().unwrap(), "name b");

        scheduler.report_acl_connection_completion(b, tagged(&handler, &tx, "outgoing b"), tagged(&handler, &tx, "unknown b"));
        assert_eq!(rx.recv().unwrap(), "unknown b");

        scheduler.report_remote_name_request_completion(b);
        assert_eq!(scheduler.queued(), 0);
        assert!(scheduler.dump_state().starts_with("outstanding=None"));
    }

    #[test]
    fn cancel_queued_and_outstanding() {
        let thread = Thread::new("scheduler-cancel");
        let handler = Handler::new(&thread);
        let (tx, rx) = mpsc::channel();
        let scheduler = AclScheduler::default();
        let a = Address::public([1; 6]);
        let b = Address::public([2; 6]);

        scheduler.enqueue_remote_name_request(a, tagged(&handler, &tx, "name a"), tagged(&handler, &tx, "name a cancelled"));
        scheduler.enqueue_remote_name_request(b, tagged(&handler, &tx, "name b"), tagged(&handler, &tx, "name b cancelled"));
        assert_eq!(rx.recv().unwrap(), "name a");

        scheduler.cancel_remote_name_request(b, tagged(&handler, &tx, "cancel b"));
        assert_eq!(rx.recv().unwrap(), "name b cancelled");
        scheduler.cancel_remote_name_request(a, tagged(&handler, &tx, "cancel a"));
        assert_eq!(rx.recv().unwrap(), "cancel a");

        scheduler.enqueue_outgoing_acl_connection(b, tagged(&handler, &tx, "connect b"));
        scheduler.cancel_acl_connection(b, tagged(&handler, &tx, "cancel connect b"), tagged(&handler, &tx, "connect b dropped"));
        assert_eq!(rx.recv().unwrap(), "connect b dropped");

        scheduler.report_remote_name_request_completion(a);
        // Nothing left to grant.
        handler.wait_until_stopped(embassy_time::Duration::from_millis(500));
        assert!(rx.try_recv().is_err());
    }
}
