#![allow(dead_code)]
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use gd_host::hci::event::{COMMAND_STATUS, CONNECTION_COMPLETE, REMOTE_HOST_SUPPORTED_FEATURES_NOTIFICATION, REMOTE_NAME_REQUEST_COMPLETE};
use gd_host::hci::event::REMOTE_NAME_LEN;
use gd_host::hci::HciTransport;
use gd_host::security::pairing::{PairingOps, PairingSender, SmpPacket};
use gd_host::security::{ConfirmationData, PairingEvent, UserInterface};
use gd_host::{Address, Error};

pub const TIMEOUT: Duration = Duration::from_secs(2);

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Records every command the host writes.
pub struct FakeTransport {
    sent: Mutex<mpsc::Sender<Vec<u8>>>,
}

impl FakeTransport {
    pub fn new() -> (Arc<Self>, mpsc::Receiver<Vec<u8>>) {
        let (tx, rx) = mpsc::channel();
        (Arc::new(Self { sent: Mutex::new(tx) }), rx)
    }
}

impl HciTransport for FakeTransport {
    fn send_command(&self, packet: &[u8]) {
        let _ = self.sent.lock().unwrap().send(packet.to_vec());
    }
}

pub fn event(code: u8, parameters: &[u8]) -> Vec<u8> {
    let mut out = vec![code, parameters.len() as u8];
    out.extend_from_slice(parameters);
    out
}

pub fn command_status(status: u8, opcode: u16) -> Vec<u8> {
    let op = opcode.to_le_bytes();
    event(COMMAND_STATUS, &[status, 1, op[0], op[1]])
}

pub fn remote_name_complete(status: u8, address: Address, name: &str) -> Vec<u8> {
    let mut params = vec![status];
    params.extend_from_slice(&address.bytes());
    let mut padded = [0u8; REMOTE_NAME_LEN];
    padded[..name.len()].copy_from_slice(name.as_bytes());
    params.extend_from_slice(&padded);
    event(REMOTE_NAME_REQUEST_COMPLETE, &params)
}

pub fn features_notification(address: Address, features: u64) -> Vec<u8> {
    let mut params = address.bytes().to_vec();
    params.extend_from_slice(&features.to_le_bytes());
    event(REMOTE_HOST_SUPPORTED_FEATURES_NOTIFICATION, &params)
}

pub fn connection_complete(status: u8, handle: u16, address: Address) -> Vec<u8> {
    let mut params = vec![status];
    params.extend_from_slice(&handle.to_le_bytes());
    params.extend_from_slice(&address.bytes());
    // ACL link, no encryption
    params.extend_from_slice(&[0x01, 0x00]);
    event(CONNECTION_COMPLETE, &params)
}

/// Opcode of a command written by the host.
pub fn opcode(command: &[u8]) -> u16 {
    u16::from_le_bytes([command[0], command[1]])
}

/// Plays the user. A displayed passkey is typed into `forward_display_to`, a passkey
/// prompt is answered with `answer`.
#[derive(Default)]
pub struct TestUi {
    pub displayed: Mutex<Vec<ConfirmationData>>,
    pub prompted: Mutex<Vec<ConfirmationData>>,
    pub forward_display_to: Option<PairingSender>,
    pub answer: Option<(PairingSender, PairingEvent)>,
}

impl UserInterface for TestUi {
    fn display_confirm_value(&self, data: ConfirmationData) {
        if let (Some(peer), Some(passkey)) = (&self.forward_display_to, data.passkey) {
            peer.on_ui_event(PairingEvent::Passkey(passkey.value()));
        }
        self.displayed.lock().unwrap().push(data);
    }

    fn display_enter_passkey_dialog(&self, data: ConfirmationData) {
        if let Some((me, event)) = &self.answer {
            me.on_ui_event(*event);
        }
        self.prompted.lock().unwrap().push(data);
    }
}

/// Delivers outbound SMP packets straight into the peer's inbound queue.
pub struct LinkOps {
    pub peer: PairingSender,
    pub tamper: Option<fn(&mut SmpPacket)>,
    pub sent: Arc<Mutex<Vec<SmpPacket>>>,
}

impl LinkOps {
    pub fn new(peer: PairingSender) -> Self {
        Self {
            peer,
            tamper: None,
            sent: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl PairingOps for LinkOps {
    fn try_send_packet(&mut self, mut packet: SmpPacket) -> Result<(), Error> {
        if let Some(tamper) = self.tamper {
            tamper(&mut packet);
        }
        self.sent.lock().unwrap().push(packet.clone());
        // Round trip through the wire format, as a real link would.
        self.peer.on_packet(&packet.to_bytes());
        Ok(())
    }
}
