//! Command flow control and event dispatch.
//!
//! One command is outstanding at a time. The next queued command goes out when the
//! controller answers the current one with Command Status or Command Complete. Every
//! other event is routed by code to the callback registered for it.
use core::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use embassy_sync::blocking_mutex::CriticalSectionMutex;
use log::{error, info, trace, warn};

use super::command::CommandPacket;
use super::event::{Event, EventPacket, COMMAND_COMPLETE, COMMAND_STATUS};
use super::hal::HciHal;
use super::ErrorCode;
use crate::module::{Module, ModuleContext, ModuleFactory, ModuleInstance, ModuleList};
use crate::os::{ContextualCallback, ContextualOnceCallback};

static FACTORY: ModuleFactory = ModuleFactory::new(|| ModuleInstance::new(HciLayer::default()));

enum CommandCallback {
    Status(ContextualOnceCallback<ErrorCode>),
    Complete(ContextualOnceCallback<EventPacket>),
}

struct QueuedCommand {
    packet: CommandPacket,
    callback: CommandCallback,
}

struct WaitingCommand {
    opcode: u16,
    callback: CommandCallback,
}

#[derive(Default)]
struct State {
    hal: Option<Arc<HciHal>>,
    event_handlers: HashMap<u8, ContextualCallback<EventPacket>>,
    queue: VecDeque<QueuedCommand>,
    waiting: Option<WaitingCommand>,
}

pub struct HciLayer {
    state: CriticalSectionMutex<RefCell<State>>,
}

impl Default for HciLayer {
    fn default() -> Self {
        Self {
            state: CriticalSectionMutex::new(RefCell::new(State::default())),
        }
    }
}

impl HciLayer {
    pub fn factory() -> &'static ModuleFactory {
        &FACTORY
    }

    fn with<R>(&self, f: impl FnOnce(&mut State) -> R) -> R {
        self.state.lock(|state| f(&mut state.borrow_mut()))
    }

    /// Route events with `code` to `handler`.
    ///
    /// # Panics
    ///
    /// If `code` already has a handler, or is one of the command flow control events.
    pub fn register_event_handler(&self, code: u8, handler: ContextualCallback<EventPacket>) {
        if code == COMMAND_COMPLETE || code == COMMAND_STATUS {
            panic!("[hci] event {:#04x} is reserved for command flow control", code);
        }
        let duplicate = self.with(|state| {
            if state.event_handlers.contains_key(&code) {
                true
            } else {
                state.event_handlers.insert(code, handler);
                false
            }
        });
        if duplicate {
            panic!("[hci] event {:#04x} already has a handler", code);
        }
    }

    pub fn unregister_event_handler(&self, code: u8) {
        if self.with(|state| state.event_handlers.remove(&code)).is_none() {
            warn!("[hci] no handler registered for event {:#04x}", code);
        }
    }

    /// Queue a command answered by Command Status.
    pub fn enqueue_command(&self, packet: CommandPacket, on_status: ContextualOnceCallback<ErrorCode>) {
        self.enqueue(QueuedCommand {
            packet,
            callback: CommandCallback::Status(on_status),
        });
    }

    /// Queue a command answered by Command Complete. The whole event is handed over.
    pub fn enqueue_command_with_complete(
        &self,
        packet: CommandPacket,
        on_complete: ContextualOnceCallback<EventPacket>,
    ) {
        self.enqueue(QueuedCommand {
            packet,
            callback: CommandCallback::Complete(on_complete),
        });
    }

    fn enqueue(&self, command: QueuedCommand) {
        trace!("[hci] enqueue command {:04x}", command.packet.opcode());
        self.with(|state| state.queue.push_back(command));
        self.send_next_command();
    }

    fn send_next_command(&self) {
        let next = self.with(|state| {
            if state.waiting.is_some() {
                return None;
            }
            let command = state.queue.pop_front()?;
            state.waiting = Some(WaitingCommand {
                opcode: command.packet.opcode(),
                callback: command.callback,
            });
            Some((command.packet, state.hal.clone()))
        });
        if let Some((packet, hal)) = next {
            match hal {
                Some(hal) => hal.send_command(&packet),
                None => error!("[hci] not started, command {:04x} not sent", packet.opcode()),
            }
        }
    }

    /// Number of commands not yet answered, including the outstanding one.
    pub fn pending_commands(&self) -> usize {
        self.with(|state| state.queue.len() + usize::from(state.waiting.is_some()))
    }

    /// Entry point for raw events coming from the transport.
    pub fn on_hci_event(&self, data: &[u8]) {
        let packet = match EventPacket::parse(data) {
            Ok(packet) => packet,
            Err(e) => {
                warn!("[hci] dropping malformed event {:02x?}: {}", data, e);
                return;
            }
        };
        match packet.code() {
            COMMAND_COMPLETE | COMMAND_STATUS => self.on_command_response(packet),
            code => {
                let handler = self.with(|state| state.event_handlers.get(&code).cloned());
                match handler {
                    Some(handler) => handler.invoke(packet),
                    None => warn!("[hci] unhandled event {:#04x}", code),
                }
            }
        }
    }

    fn on_command_response(&self, packet: EventPacket) {
        let (opcode, status) = match packet.decode() {
            Ok(Event::CommandComplete { opcode, .. }) => (opcode, None),
            Ok(Event::CommandStatus { opcode, status, .. }) => (opcode, Some(status)),
            Ok(_) => return,
            Err(e) => {
                warn!("[hci] malformed command response: {}", e);
                return;
            }
        };
        if opcode == 0 {
            trace!("[hci] controller ready for commands");
            return;
        }
        let waiting = self.with(|state| {
            if state.waiting.as_ref().map(|w| w.opcode) == Some(opcode) {
                state.waiting.take()
            } else {
                None
            }
        });
        let Some(waiting) = waiting else {
            warn!("[hci] response to {:04x}, which is not outstanding", opcode);
            return;
        };

        match (waiting.callback, status) {
            (CommandCallback::Status(cb), Some(status)) => cb.invoke(status),
            (CommandCallback::Complete(cb), None) => cb.invoke(packet),
            (CommandCallback::Complete(_), Some(status)) => {
                error!("[hci] command {:04x} expected complete, got status {}", opcode, status)
            }
            (CommandCallback::Status(_), None) => {
                error!("[hci] command {:04x} expected status, got complete", opcode)
            }
        }
        self.send_next_command();
    }
}

impl Module for HciLayer {
    fn list_dependencies(&self, list: &mut ModuleList) {
        list.add(HciHal::factory());
    }

    fn start(&self, ctx: &ModuleContext) {
        let hal: Arc<HciHal> = ctx.get_dependency(HciHal::factory());
        self.with(|state| state.hal = Some(hal));
        info!("[hci] layer started");
    }

    fn stop(&self, _ctx: &ModuleContext) {
        let (handlers, dropped) = self.with(|state| {
            state.hal = None;
            state.waiting = None;
            (state.event_handlers.len(), state.queue.drain(..).count())
        });
        if handlers > 0 {
            warn!("[hci] stopping with {} event handlers still registered", handlers);
        }
        info!("[hci] layer stopped, {} queued commands dropped", dropped);
    }

    fn name(&self) -> String {
        "HciLayer".into()
    }

    fn dump_state(&self) -> String {
        self.with(|state| {
            format!(
                "queued={} outstanding={:?}",
                state.queue.len(),
                state.waiting.as_ref().map(|w| w.opcode)
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::sync::Mutex;

    use super::*;
    use crate::hci::command::{remote_name_request_cancel, RemoteNameRequest, REMOTE_NAME_REQUEST};
    use crate::hci::event::REMOTE_NAME_REQUEST_COMPLETE;
    use crate::hci::hal::HciTransport;
    use crate::hci::Address;
    use crate::module::ModuleRegistry;
    use crate::os::{Handler, Thread};

    struct Capture(Mutex<mpsc::Sender<Vec<u8>>>);

    impl HciTransport for Capture {
        fn send_command(&self, packet: &[u8]) {
            self.0.lock().unwrap().send(packet.to_vec()).unwrap();
        }
    }

    #[test]
    fn one_command_outstanding() {
        let (tx, sent) = mpsc::channel();
        let registry = ModuleRegistry::new();
        let thread = Thread::new("hci-test");
        registry.inject_test_module(
            HciHal::factory(),
            ModuleInstance::new(HciHal::new(Arc::new(Capture(Mutex::new(tx))))),
            &thread,
        );
        let hci: Arc<HciLayer> = registry.start(HciLayer::factory(), &thread);
        let handler = Handler::new(&thread);
        let (status_tx, status_rx) = mpsc::channel();
        let status_tx = Mutex::new(status_tx);

        let address = Address::public([1, 2, 3, 4, 5, 6]);
        hci.enqueue_command(
            RemoteNameRequest::new(address).build().unwrap(),
            handler.bind_once(move |s: ErrorCode| status_tx.lock().unwrap().send(s).unwrap()),
        );
        let (complete_tx, complete_rx) = mpsc::channel();
        hci.enqueue_command_with_complete(
            remote_name_request_cancel(address).unwrap(),
            handler.bind_once(move |e: EventPacket| complete_tx.send(e.code()).unwrap()),
        );
        assert_eq!(sent.recv().unwrap()[..2], [0x19, 0x04]);
        assert!(sent.try_recv().is_err());
        assert_eq!(hci.pending_commands(), 2);

        let [lo, hi] = REMOTE_NAME_REQUEST.to_le_bytes();
        hci.on_hci_event(&[COMMAND_STATUS, 4, 0x00, 1, lo, hi]);
        assert_eq!(status_rx.recv().unwrap(), ErrorCode::Success);
        assert_eq!(sent.recv().unwrap()[..2], [0x1a, 0x04]);

        hci.on_hci_event(&[COMMAND_COMPLETE, 10, 1, 0x1a, 0x04, 0, 1, 2, 3, 4, 5, 6]);
        assert_eq!(complete_rx.recv().unwrap(), COMMAND_COMPLETE);
        assert_eq!(hci.pending_commands(), 0);
        registry.stop_all();
    }

    #[test]
    fn events_dispatch_by_code() {
        let registry = ModuleRegistry::new();
        let thread = Thread::new("hci-dispatch");
        let hci: Arc<HciLayer> = registry.start(HciLayer::factory(), &thread);
        let handler = Handler::new(&thread);
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        hci.register_event_handler(
            REMOTE_NAME_REQUEST_COMPLETE,
            handler.bind(move |e: EventPacket| tx.lock().unwrap().send(e).unwrap()),
        );
        hci.on_hci_event(&[REMOTE_NAME_REQUEST_COMPLETE, 7, 0, 1, 2, 3, 4, 5, 6]);
        assert_eq!(rx.recv().unwrap().parameters()[0], 0);

        // Unhandled and malformed events are dropped.
        hci.on_hci_event(&[0x42, 0]);
        hci.on_hci_event(&[REMOTE_NAME_REQUEST_COMPLETE, 9, 0]);
        hci.unregister_event_handler(REMOTE_NAME_REQUEST_COMPLETE);
        hci.on_hci_event(&[REMOTE_NAME_REQUEST_COMPLETE, 7, 0, 1, 2, 3, 4, 5, 6]);
        handler.wait_until_stopped(embassy_time::Duration::from_millis(500));
        assert!(rx.try_recv().is_err());
        registry.stop_all();
    }

    #[test]
    #[should_panic]
    fn duplicate_handler_panics() {
        let hci = HciLayer::default();
        let thread = Thread::new("hci-duplicate");
        let handler = Handler::new(&thread);
        hci.register_event_handler(REMOTE_NAME_REQUEST_COMPLETE, handler.bind(|_: EventPacket| {}));
        hci.register_event_handler(REMOTE_NAME_REQUEST_COMPLETE, handler.bind(|_: EventPacket| {}));
    }
}
