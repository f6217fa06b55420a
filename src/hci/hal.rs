//! Boundary to the controller transport.
use core::cell::RefCell;
use std::sync::Arc;

use embassy_sync::blocking_mutex::CriticalSectionMutex;
use log::{error, info, trace};

use super::command::CommandPacket;
use crate::module::{Module, ModuleContext, ModuleFactory, ModuleInstance};

/// Outbound half of an HCI transport (UART, USB, a socket or a test double).
///
/// Inbound events are fed to [`crate::hci::HciLayer::on_hci_event`] by whoever owns the
/// transport.
pub trait HciTransport: Send + Sync {
    /// Send a serialized command packet (opcode, length, parameters).
    fn send_command(&self, packet: &[u8]);
}

static FACTORY: ModuleFactory = ModuleFactory::new(|| ModuleInstance::new(HciHal::default()));

/// Module owning the transport.
pub struct HciHal {
    transport: CriticalSectionMutex<RefCell<Option<Arc<dyn HciTransport>>>>,
}

impl Default for HciHal {
    fn default() -> Self {
        Self {
            transport: CriticalSectionMutex::new(RefCell::new(None)),
        }
    }
}

impl HciHal {
    pub fn factory() -> &'static ModuleFactory {
        &FACTORY
    }

    pub fn new(transport: Arc<dyn HciTransport>) -> Self {
        Self {
            transport: CriticalSectionMutex::new(RefCell::new(Some(transport))),
        }
    }

    /// Replace the transport commands are written to.
    pub fn attach(&self, transport: Arc<dyn HciTransport>) {
        self.transport.lock(|t| *t.borrow_mut() = Some(transport));
    }

    pub fn is_attached(&self) -> bool {
        self.transport.lock(|t| t.borrow().is_some())
    }

    pub fn send_command(&self, command: &CommandPacket) {
        let transport = self.transport.lock(|t| t.borrow().clone());
        match transport {
            Some(transport) => {
                trace!("[hal] command {:04x} {:02x?}", command.opcode(), command.parameters());
                transport.send_command(&command.to_bytes());
            }
            None => error!("[hal] no transport attached, command {:04x} dropped", command.opcode()),
        }
    }
}

impl Module for HciHal {
    fn start(&self, _ctx: &ModuleContext) {
        info!("[hal] started, transport attached: {}", self.is_attached());
    }

    fn stop(&self, _ctx: &ModuleContext) {
        self.transport.lock(|t| t.borrow_mut().take());
    }

    fn name(&self) -> String {
        "HciHal".into()
    }
}
