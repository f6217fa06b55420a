//! Outgoing classic ACL connections, serialized through the [`AclScheduler`].
//!
//! Connection Complete events are reported to the scheduler. One that matches the
//! outstanding outgoing connection completes it; any other one may be the controller
//! answering a name request cancel with a connection, so it goes to the
//! [`RemoteNameRequestModule`].
use core::cell::RefCell;
use std::sync::Arc;

use embassy_sync::blocking_mutex::CriticalSectionMutex;
use log::{error, info, warn};

use super::acl_scheduler::AclScheduler;
use super::command::{CommandPacket, CreateConnection};
use super::event::{Event, EventPacket, CONNECTION_COMPLETE};
use super::hci_layer::HciLayer;
use super::remote_name_request::RemoteNameRequestModule;
use super::{Address, ErrorCode};
use crate::module::{Module, ModuleContext, ModuleFactory, ModuleInstance, ModuleList};
use crate::os::{ContextualOnceCallback, Handler};

static FACTORY: ModuleFactory = ModuleFactory::new(|| ModuleInstance::new(AclConnectionModule::default()));

/// Receives the final status and, on success, the connection handle.
pub type ConnectionCallback = ContextualOnceCallback<(ErrorCode, u16)>;

#[derive(Clone)]
struct Wiring {
    hci: Arc<HciLayer>,
    scheduler: Arc<AclScheduler>,
    rnr: Arc<RemoteNameRequestModule>,
    handler: Handler,
}

#[derive(Default)]
struct State {
    wiring: Option<Wiring>,
    outgoing: Vec<(Address, ConnectionCallback)>,
}

struct Inner {
    state: CriticalSectionMutex<RefCell<State>>,
}

impl Inner {
    fn with<R>(&self, f: impl FnOnce(&mut State) -> R) -> R {
        self.state.lock(|state| f(&mut state.borrow_mut()))
    }

    fn wiring(&self) -> Wiring {
        match self.with(|s| s.wiring.clone()) {
            Some(wiring) => wiring,
            None => panic!("[acl] module used while not started"),
        }
    }

    fn take_outgoing(&self, address: Address) -> Option<ConnectionCallback> {
        self.with(|s| {
            let index = s.outgoing.iter().position(|(a, _)| *a == address)?;
            Some(s.outgoing.remove(index).1)
        })
    }

    fn create_connection(self: &Arc<Self>, request: CreateConnection, on_complete: ConnectionCallback) {
        let address = request.address;
        let packet = match request.build() {
            Ok(packet) => packet,
            Err(e) => {
                error!("[acl] unable to build create connection to {}: {}", address, e);
                on_complete.invoke((ErrorCode::InvalidHciCommandParameters, 0));
                return;
            }
        };
        info!("[acl] enqueuing connection to {}", address);
        let w = self.wiring();
        self.with(|s| s.outgoing.push((address, on_complete)));
        let inner = self.clone();
        w.scheduler.enqueue_outgoing_acl_connection(
            address,
            w.handler
                .bind_once(move |()| inner.actually_create_connection(address, packet)),
        );
    }

    fn actually_create_connection(self: &Arc<Self>, address: Address, packet: CommandPacket) {
        info!("[acl] creating connection to {}", address);
        let w = self.wiring();
        let inner = self.clone();
        w.hci.enqueue_command(
            packet,
            w.handler
                .bind_once(move |status: ErrorCode| inner.on_create_connection_status(address, status)),
        );
    }

    fn on_create_connection_status(self: &Arc<Self>, address: Address, status: ErrorCode) {
        if status.is_success() {
            return;
        }
        // No Connection Complete follows a failed status.
        warn!("[acl] create connection to {} failed: {}", address, status);
        self.report_completion(address, status, 0);
    }

    fn on_connection_complete(self: &Arc<Self>, event: EventPacket) {
        match event.decode() {
            Ok(Event::ConnectionComplete {
                status,
                handle,
                address,
                ..
            }) => self.report_completion(address, status, handle),
            _ => error!("[acl] invalid connection complete {:02x?}", event.parameters()),
        }
    }

    fn report_completion(self: &Arc<Self>, address: Address, status: ErrorCode, handle: u16) {
        let w = self.wiring();
        let inner = self.clone();
        let on_outgoing = w.handler.bind_once(move |()| match inner.take_outgoing(address) {
            Some(on_complete) => {
                info!("[acl] connection to {} complete with status {}", address, status);
                on_complete.invoke((status, handle));
            }
            None => warn!("[acl] connection to {} completed with nobody waiting", address),
        });
        let rnr = w.rnr.clone();
        let on_unknown = w
            .handler
            .bind_once(move |()| rnr.report_remote_name_request_cancellation(address));
        w.scheduler
            .report_acl_connection_completion(address, on_outgoing, on_unknown);
    }
}

/// Module issuing HCI Create Connection commands.
pub struct AclConnectionModule {
    inner: Arc<Inner>,
}

impl Default for AclConnectionModule {
    fn default() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: CriticalSectionMutex::new(RefCell::new(State::default())),
            }),
        }
    }
}

impl AclConnectionModule {
    pub fn factory() -> &'static ModuleFactory {
        &FACTORY
    }

    /// Queue a connection to `request.address`. `on_complete` gets the status of the
    /// Connection Complete event, or of a failed Command Status.
    pub fn create_connection(&self, request: CreateConnection, on_complete: ConnectionCallback) {
        let inner = self.inner.clone();
        self.inner
            .wiring()
            .handler
            .post(move || inner.create_connection(request, on_complete));
    }
}

impl Module for AclConnectionModule {
    fn list_dependencies(&self, list: &mut ModuleList) {
        list.add(HciLayer::factory())
            .add(AclScheduler::factory())
            .add(RemoteNameRequestModule::factory());
    }

    fn start(&self, ctx: &ModuleContext) {
        info!("[acl] starting");
        let hci: Arc<HciLayer> = ctx.get_dependency(HciLayer::factory());
        let scheduler: Arc<AclScheduler> = ctx.get_dependency(AclScheduler::factory());
        let rnr: Arc<RemoteNameRequestModule> = ctx.get_dependency(RemoteNameRequestModule::factory());
        let handler = ctx.handler().clone();

        let inner = self.inner.clone();
        hci.register_event_handler(
            CONNECTION_COMPLETE,
            handler.bind(move |event: EventPacket| inner.on_connection_complete(event)),
        );
        self.inner.with(|s| {
            s.wiring = Some(Wiring {
                hci,
                scheduler,
                rnr,
                handler,
            })
        });
    }

    fn stop(&self, _ctx: &ModuleContext) {
        info!("[acl] stopping");
        let wiring = self.inner.with(|s| {
            s.outgoing.clear();
            s.wiring.take()
        });
        if let Some(w) = wiring {
            w.hci.unregister_event_handler(CONNECTION_COMPLETE);
        }
    }

    fn name(&self) -> String {
        "AclConnectionModule".into()
    }

    fn dump_state(&self) -> String {
        self.inner.with(|s| format!("outgoing={}", s.outgoing.len()))
    }
}
