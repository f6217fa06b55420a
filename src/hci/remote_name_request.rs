//! Remote name requests, serialized through the [`AclScheduler`].
//!
//! At most one request is pending in the controller. `pending` is set when the
//! scheduler grants the slot and the command goes out. It is cleared by whichever comes
//! first of a failed command status, the name request complete event, a failed cancel,
//! or a connection complete reported in place of the cancellation. Late duplicates of
//! those events are logged and ignored.
use core::cell::RefCell;
use std::sync::Arc;

use embassy_sync::blocking_mutex::CriticalSectionMutex;
use log::{error, info, warn};

use super::acl_scheduler::AclScheduler;
use super::command::{remote_name_request_cancel, CommandPacket, RemoteNameRequest};
use super::event::{
    Event, EventPacket, REMOTE_HOST_SUPPORTED_FEATURES_NOTIFICATION, REMOTE_NAME_REQUEST_COMPLETE,
};
use super::hci_layer::HciLayer;
use super::{Address, ErrorCode};
use crate::codec;
use crate::cursor::ReadCursor;
use crate::module::{Module, ModuleContext, ModuleFactory, ModuleInstance, ModuleList};
use crate::os::{ContextualOnceCallback, Handler};

static FACTORY: ModuleFactory =
    ModuleFactory::new(|| ModuleInstance::new(RemoteNameRequestModule::default()));

/// Receives the status of the Command Status event for the request.
pub type CompletionCallback = ContextualOnceCallback<ErrorCode>;
/// Receives the remote host supported features, at most once per request.
pub type RemoteHostSupportedFeaturesCallback = ContextualOnceCallback<u64>;
/// Receives the final status and the name, which is empty on failure.
pub type RemoteNameCallback = ContextualOnceCallback<(ErrorCode, Vec<u8>)>;

/// Shared by the granted and cancelled paths of one request; the scheduler runs exactly
/// one of them.
type SharedNameCallback = Arc<CriticalSectionMutex<RefCell<Option<RemoteNameCallback>>>>;

fn take_shared(shared: &SharedNameCallback) -> Option<RemoteNameCallback> {
    shared.lock(|cb| cb.borrow_mut().take())
}

#[derive(Clone)]
struct Wiring {
    hci: Arc<HciLayer>,
    scheduler: Arc<AclScheduler>,
    handler: Handler,
}

#[derive(Default)]
struct State {
    wiring: Option<Wiring>,
    pending: bool,
    on_features: Option<RemoteHostSupportedFeaturesCallback>,
    on_name: Option<RemoteNameCallback>,
}

enum FeaturesOutcome {
    Deliver(RemoteHostSupportedFeaturesCallback),
    NotPending,
    AlreadyDelivered,
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
            None => panic!("[rnr] module used while not started"),
        }
    }

    fn is_pending(&self) -> bool {
        self.with(|s| s.pending)
    }

    fn start_remote_name_request(
        self: &Arc<Self>,
        address: Address,
        request: RemoteNameRequest,
        on_completion: CompletionCallback,
        on_features: RemoteHostSupportedFeaturesCallback,
        on_name: RemoteNameCallback,
    ) {
        info!("[rnr] enqueuing remote name request to {}", address);
        let packet = match request.build() {
            Ok(packet) => packet,
            Err(e) => {
                error!("[rnr] unable to build remote name request to {}: {}", address, e);
                on_name.invoke((ErrorCode::InvalidHciCommandParameters, Vec::new()));
                return;
            }
        };
        let w = self.wiring();
        let shared: SharedNameCallback = Arc::new(CriticalSectionMutex::new(RefCell::new(Some(on_name))));

        let granted = {
            let inner = self.clone();
            let shared = shared.clone();
            w.handler.bind_once(move |()| {
                inner.actually_start_remote_name_request(address, packet, on_completion, on_features, &shared)
            })
        };
        let cancelled = w.handler.bind_once(move |()| {
            info!("[rnr] dequeued remote name request to {} since it was cancelled", address);
            if let Some(on_name) = take_shared(&shared) {
                on_name.invoke((ErrorCode::PageTimeout, Vec::new()));
            }
        });
        w.scheduler.enqueue_remote_name_request(address, granted, cancelled);
    }

    fn actually_start_remote_name_request(
        self: &Arc<Self>,
        address: Address,
        packet: CommandPacket,
        on_completion: CompletionCallback,
        on_features: RemoteHostSupportedFeaturesCallback,
        shared: &SharedNameCallback,
    ) {
        info!("[rnr] starting remote name request to {}", address);
        let w = self.wiring();
        let already_pending = self.with(|s| {
            if s.pending {
                return true;
            }
            s.pending = true;
            s.on_features = Some(on_features);
            s.on_name = take_shared(shared);
            false
        });
        if already_pending {
            panic!("[rnr] slot granted for {} while a request is pending", address);
        }
        let inner = self.clone();
        w.hci.enqueue_command(
            packet,
            w.handler.bind_once(move |status: ErrorCode| {
                inner.on_start_remote_name_request_status(address, on_completion, status)
            }),
        );
    }

    fn on_start_remote_name_request_status(
        &self,
        address: Address,
        on_completion: CompletionCallback,
        status: ErrorCode,
    ) {
        if !self.is_pending() {
            warn!("[rnr] command status for {} with no request pending", address);
            return;
        }
        info!("[rnr] started remote name request peer:{} status:{}", address, status);
        on_completion.invoke(status);
        if !status.is_success() {
            self.with(|s| {
                s.pending = false;
                s.on_features = None;
                s.on_name = None;
            });
            self.wiring().scheduler.report_remote_name_request_completion(address);
        }
    }

    fn cancel_remote_name_request(self: &Arc<Self>, address: Address) {
        info!("[rnr] enqueuing cancel of remote name request to {}", address);
        let w = self.wiring();
        let inner = self.clone();
        w.scheduler.cancel_remote_name_request(
            address,
            w.handler
                .bind_once(move |()| inner.actually_cancel_remote_name_request(address)),
        );
    }

    fn actually_cancel_remote_name_request(self: &Arc<Self>, address: Address) {
        if !self.is_pending() {
            info!("[rnr] ignoring cancel to {}, name request already completed", address);
            return;
        }
        info!("[rnr] cancelling remote name request to {}", address);
        let w = self.wiring();
        let packet = match remote_name_request_cancel(address) {
            Ok(packet) => packet,
            Err(e) => {
                error!("[rnr] unable to build cancel for {}: {}", address, e);
                return;
            }
        };
        let inner = self.clone();
        w.hci.enqueue_command_with_complete(
            packet,
            w.handler
                .bind_once(move |event: EventPacket| inner.check_cancel_status(address, event)),
        );
    }

    fn check_cancel_status(&self, address: Address, event: EventPacket) {
        let parsed = match event.decode() {
            Ok(Event::CommandComplete { return_parameters, .. }) => {
                let mut r = ReadCursor::new(return_parameters);
                r.read::<u8>()
                    .and_then(|status| Ok((ErrorCode::from(status), Address::public(r.read()?))))
            }
            Ok(_) => Err(codec::Error::InvalidValue),
            Err(e) => Err(e),
        };
        match parsed {
            Err(e) => {
                warn!("[rnr] invalid cancel complete for {}: {}", address, e);
                self.completed(ErrorCode::UnspecifiedError, Vec::new(), address);
            }
            Ok((status, peer)) if !status.is_success() => self.completed(status, Vec::new(), peer),
            Ok(_) => {}
        }
    }

    fn completed(&self, status: ErrorCode, name: Vec<u8>, address: Address) {
        let finished = self.with(|s| {
            if !s.pending {
                return None;
            }
            s.pending = false;
            s.on_features = None;
            Some(s.on_name.take())
        });
        match finished {
            Some(on_name) => {
                info!("[rnr] remote name request complete from {} with status {}", address, status);
                if let Some(on_name) = on_name {
                    on_name.invoke((status, name));
                }
                self.wiring().scheduler.report_remote_name_request_completion(address);
            }
            None => error!(
                "[rnr] unexpected remote name request complete from {} with status {}",
                address, status
            ),
        }
    }

    fn on_remote_name_request_complete(&self, event: EventPacket) {
        match event.decode() {
            Ok(Event::RemoteNameRequestComplete { status, address, name }) => {
                self.completed(status, name.to_vec(), address)
            }
            _ => error!("[rnr] invalid remote name request complete {:02x?}", event.parameters()),
        }
    }

    fn on_remote_host_supported_features_notification(&self, event: EventPacket) {
        let Ok(Event::RemoteHostSupportedFeaturesNotification { address, features }) = event.decode() else {
            error!("[rnr] invalid remote host supported features notification");
            return;
        };
        let outcome = self.with(|s| match (s.pending, s.on_features.take()) {
            (true, Some(cb)) => FeaturesOutcome::Deliver(cb),
            (true, None) => FeaturesOutcome::AlreadyDelivered,
            (false, _) => FeaturesOutcome::NotPending,
        });
        match outcome {
            FeaturesOutcome::Deliver(cb) => {
                info!("[rnr] received remote host supported features from {}", address);
                cb.invoke(features);
            }
            FeaturesOutcome::NotPending => {
                error!("[rnr] remote host supported features from {} with no request outstanding", address)
            }
            FeaturesOutcome::AlreadyDelivered => {
                error!("[rnr] more than one remote host supported features notification from {}", address)
            }
        }
    }

    fn report_remote_name_request_cancellation(&self, address: Address) {
        if self.is_pending() {
            info!(
                "[rnr] connection complete from {} in place of a name request cancellation",
                address
            );
            self.completed(ErrorCode::UnknownConnection, Vec::new(), address);
        } else {
            error!("[rnr] unexpected connection complete from {}, no name request outstanding", address);
        }
    }
}

/// Module issuing HCI Remote Name Request commands.
pub struct RemoteNameRequestModule {
    inner: Arc<Inner>,
}

impl Default for RemoteNameRequestModule {
    fn default() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: CriticalSectionMutex::new(RefCell::new(State::default())),
            }),
        }
    }
}

impl RemoteNameRequestModule {
    pub fn factory() -> &'static ModuleFactory {
        &FACTORY
    }

    /// Queue a name request for `address`. The command is sent once the scheduler
    /// grants the slot. If the queued request is cancelled first, `on_name` gets
    /// [`ErrorCode::PageTimeout`] and an empty name.
    pub fn start_remote_name_request(
        &self,
        address: Address,
        request: RemoteNameRequest,
        on_completion: CompletionCallback,
        on_features: RemoteHostSupportedFeaturesCallback,
        on_name: RemoteNameCallback,
    ) {
        let inner = self.inner.clone();
        self.inner.wiring().handler.post(move || {
            inner.start_remote_name_request(address, request, on_completion, on_features, on_name)
        });
    }

    pub fn cancel_remote_name_request(&self, address: Address) {
        let inner = self.inner.clone();
        self.inner
            .wiring()
            .handler
            .post(move || inner.cancel_remote_name_request(address));
    }

    /// A connection complete arrived for `address` while its name request was being
    /// cancelled.
    pub fn report_remote_name_request_cancellation(&self, address: Address) {
        self.inner.wiring().handler.call_on(&self.inner, move |inner| {
            inner.report_remote_name_request_cancellation(address)
        });
    }

    pub fn is_pending(&self) -> bool {
        self.inner.is_pending()
    }
}

impl Module for RemoteNameRequestModule {
    fn list_dependencies(&self, list: &mut ModuleList) {
        list.add(HciLayer::factory()).add(AclScheduler::factory());
    }

    fn start(&self, ctx: &ModuleContext) {
        info!("[rnr] starting");
        let hci: Arc<HciLayer> = ctx.get_dependency(HciLayer::factory());
        let scheduler: Arc<AclScheduler> = ctx.get_dependency(AclScheduler::factory());
        let handler = ctx.handler().clone();

        let inner = self.inner.clone();
        hci.register_event_handler(
            REMOTE_HOST_SUPPORTED_FEATURES_NOTIFICATION,
            handler.bind(move |event: EventPacket| inner.on_remote_host_supported_features_notification(event)),
        );
        let inner = self.inner.clone();
        hci.register_event_handler(
            REMOTE_NAME_REQUEST_COMPLETE,
            handler.bind(move |event: EventPacket| inner.on_remote_name_request_complete(event)),
        );
        self.inner.with(|s| {
            s.wiring = Some(Wiring {
                hci,
                scheduler,
                handler,
            })
        });
    }

    fn stop(&self, _ctx: &ModuleContext) {
        info!("[rnr] stopping");
        let wiring = self.inner.with(|s| {
            s.on_features = None;
            s.on_name = None;
            s.wiring.take()
        });
        if let Some(w) = wiring {
            w.hci.unregister_event_handler(REMOTE_HOST_SUPPORTED_FEATURES_NOTIFICATION);
            w.hci.unregister_event_handler(REMOTE_NAME_REQUEST_COMPLETE);
        }
    }

    fn name(&self) -> String {
        "RemoteNameRequestModule".into()
    }

    fn dump_state(&self) -> String {
        format!("pending={}", self.is_pending())
    }
}
