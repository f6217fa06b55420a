//! LE legacy pairing.
//!
//! A [`PairingHandler`] drives one pairing attempt as a future. Inbound SMP packets and
//! user answers reach it through a [`PairingSender`], outbound packets leave through
//! [`PairingOps`]. Each wait is bounded by [`PairingConfig::timeout`].
use std::sync::Arc;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_time::{with_timeout, Duration};
use log::{error, info, trace, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_core::{CryptoRng, RngCore};

use crate::codec::Decode;
use crate::config;
use crate::hci::Address;
use crate::os::Handler;
use crate::security::crypto::Octet16;
use crate::security::types::{
    Command, PairingFeatures, Reason, ENCRYPTION_KEY_SIZE_128_BITS, MIN_ENCRYPTION_KEY_SIZE,
};
use crate::security::ui::{PairingEvent, UserInterface};
use crate::Error;

mod legacy;
mod util;

pub use util::{
    choose_association_model, generate_passkey, passkey_tk, AssociationModel, PassKeyEntryAction, SmpPacket,
};

/// Link layer role of the local device on the connection being paired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Central,
    Peripheral,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PairingConfig {
    pub timeout: Duration,
}

impl Default for PairingConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(config::PAIRING_TIMEOUT_SECS),
        }
    }
}

/// Everything a pairing attempt needs to know up front.
#[derive(Clone)]
pub struct InitialInformations {
    pub my_role: Role,
    pub my_connection_address: Address,
    pub remote_connection_address: Address,
    pub remote_name: String,
    /// Features sent in our Pairing Request or Pairing Response.
    pub my_pairing_capabilities: PairingFeatures,
    /// Pairing Request already received by a peripheral. When absent the peripheral
    /// waits for one.
    pub pairing_request: Option<PairingFeatures>,
    /// Temporary key obtained out of band.
    pub remote_oob_data: Option<Octet16>,
    pub user_interface: Arc<dyn UserInterface>,
    /// Handler prompts are posted to.
    pub user_interface_handler: Handler,
    pub config: PairingConfig,
}

impl InitialInformations {
    /// Initiator address followed by responder address.
    pub(crate) fn initiator_and_responder(&self) -> (Address, Address) {
        match self.my_role {
            Role::Central => (self.my_connection_address, self.remote_connection_address),
            Role::Peripheral => (self.remote_connection_address, self.my_connection_address),
        }
    }
}

/// Outcome of a completed pairing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairingResult {
    /// Short term key, masked to `key_size`.
    pub stk: Octet16,
    pub key_size: u8,
    pub association_model: AssociationModel,
    pub request: PairingFeatures,
    pub response: PairingFeatures,
}

impl PairingResult {
    /// Whether the key was agreed with man in the middle protection.
    pub fn authenticated(&self) -> bool {
        self.association_model != AssociationModel::JustWorks
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message} ({reason})")]
pub struct PairingFailure {
    pub message: String,
    pub reason: Reason,
}

impl PairingFailure {
    pub fn new(message: impl ToString, reason: Reason) -> Self {
        Self {
            message: message.to_string(),
            reason,
        }
    }
}

/// Outbound SMP transport of a pairing attempt.
pub trait PairingOps {
    fn try_send_packet(&mut self, packet: SmpPacket) -> Result<(), Error>;
}

type PacketQueue = Channel<CriticalSectionRawMutex, SmpPacket, { config::PAIRING_QUEUE_SIZE }>;
type UiQueue = Channel<CriticalSectionRawMutex, PairingEvent, { config::UI_QUEUE_SIZE }>;

/// Inbound side of a pairing attempt. Clones share the same queues.
///
/// Nothing here blocks: when a queue is full the item is logged and dropped.
#[derive(Clone)]
pub struct PairingSender {
    packets: Arc<PacketQueue>,
    ui_events: Arc<UiQueue>,
}

impl Default for PairingSender {
    fn default() -> Self {
        Self::new()
    }
}

impl PairingSender {
    pub fn new() -> Self {
        Self {
            packets: Arc::new(Channel::new()),
            ui_events: Arc::new(Channel::new()),
        }
    }

    /// Feed raw SMP bytes received from the peer. Undecodable input is dropped.
    pub fn on_packet(&self, data: &[u8]) {
        match SmpPacket::parse(data) {
            Ok(packet) => self.send_packet(packet),
            Err(e) => warn!("[smp legacy] dropping malformed packet {:02x?}: {}", data, e),
        }
    }

    pub fn send_packet(&self, packet: SmpPacket) {
        if let Err(e) = self.try_send_packet(packet) {
            error!("[smp legacy] inbound packet dropped: {}", e);
        }
    }

    pub fn try_send_packet(&self, packet: SmpPacket) -> Result<(), Error> {
        self.packets.try_send(packet).map_err(|_| Error::QueueFull)
    }

    /// Deliver the user's answer to a prompt.
    pub fn on_ui_event(&self, event: PairingEvent) {
        if self.ui_events.try_send(event).is_err() {
            error!("[smp legacy] ui event {:?} dropped, queue full", event);
        }
    }
}

/// One legacy pairing attempt.
pub struct PairingHandler<O, R> {
    info: InitialInformations,
    ops: O,
    rng: R,
    inbound: PairingSender,
}

impl<O: PairingOps> PairingHandler<O, StdRng> {
    /// Handler drawing its randoms from an entropy seeded generator.
    pub fn with_entropy(info: InitialInformations, ops: O, inbound: PairingSender) -> Self {
        Self::new(info, ops, StdRng::from_entropy(), inbound)
    }
}

impl<O: PairingOps, R: RngCore + CryptoRng> PairingHandler<O, R> {
    pub fn new(info: InitialInformations, ops: O, rng: R, inbound: PairingSender) -> Self {
        Self {
            info,
            ops,
            rng,
            inbound,
        }
    }

    pub fn sender(&self) -> PairingSender {
        self.inbound.clone()
    }

    pub fn role(&self) -> Role {
        self.info.my_role
    }

    /// Run the whole procedure: feature exchange, then both legacy phases.
    pub async fn run(mut self) -> Result<PairingResult, PairingFailure> {
        let result = self.pair().await;
        match &result {
            Ok(r) => info!(
                "[smp legacy] paired with {} using {:?}, key size {}",
                self.info.remote_connection_address, r.association_model, r.key_size
            ),
            Err(e) => warn!(
                "[smp legacy] pairing with {} failed: {}",
                self.info.remote_connection_address, e
            ),
        }
        result
    }

    async fn pair(&mut self) -> Result<PairingResult, PairingFailure> {
        let (request, response) = self.exchange_features().await?;
        let key_size = request
            .maximum_encryption_key_size
            .min(response.maximum_encryption_key_size);
        if key_size < MIN_ENCRYPTION_KEY_SIZE {
            return Err(self.fail(Reason::EncryptionKeySize, "encryption key size too small"));
        }

        let (association_model, tk) = self.stage1(&request, &response).await?;
        let stk = self.stage2(&request, &response, &tk, key_size).await?;
        Ok(PairingResult {
            stk,
            key_size,
            association_model,
            request,
            response,
        })
    }

    async fn exchange_features(&mut self) -> Result<(PairingFeatures, PairingFeatures), PairingFailure> {
        let mine = self.info.my_pairing_capabilities;
        match self.info.my_role {
            Role::Central => {
                self.send(util::make_pairing_features(Command::PairingRequest, &mine))?;
                let packet = self.wait_packet(Command::PairingResponse, "Pairing Response").await?;
                let response = self.decode_features(&packet)?;
                Ok((mine, response))
            }
            Role::Peripheral => {
                let request = match self.info.pairing_request {
                    Some(request) => self.check_features(request)?,
                    None => {
                        let packet = self.wait_packet(Command::PairingRequest, "Pairing Request").await?;
                        self.decode_features(&packet)?
                    }
                };
                let response = PairingFeatures {
                    initiator_key_distribution: mine
                        .initiator_key_distribution
                        .intersect(request.initiator_key_distribution),
                    responder_key_distribution: mine
                        .responder_key_distribution
                        .intersect(request.responder_key_distribution),
                    ..mine
                };
                self.send(util::make_pairing_features(Command::PairingResponse, &response))?;
                Ok((request, response))
            }
        }
    }

    fn decode_features(&mut self, packet: &SmpPacket) -> Result<PairingFeatures, PairingFailure> {
        let features = match PairingFeatures::decode(packet.payload()) {
            Ok(features) => features,
            Err(_) => return Err(self.fail(Reason::InvalidParameters, "malformed pairing features")),
        };
        self.check_features(features)
    }

    /// Validate features received from the peer.
    fn check_features(&mut self, features: PairingFeatures) -> Result<PairingFeatures, PairingFailure> {
        if features.maximum_encryption_key_size > ENCRYPTION_KEY_SIZE_128_BITS {
            return Err(self.fail(Reason::InvalidParameters, "encryption key size above 16 octets"));
        }
        trace!("[smp legacy] peer features: {}", features);
        Ok(features)
    }

    fn send(&mut self, packet: Result<SmpPacket, crate::codec::Error>) -> Result<(), PairingFailure> {
        let packet = packet.map_err(|e| PairingFailure::new(e, Reason::UnspecifiedReason))?;
        trace!("[smp legacy] sending {}", packet.command);
        let command = packet.command;
        self.ops
            .try_send_packet(packet)
            .map_err(|e| PairingFailure::new(format!("unable to send {}: {}", command, e), Reason::UnspecifiedReason))
    }

    /// Report a locally detected failure to the peer.
    fn fail(&mut self, reason: Reason, message: &str) -> PairingFailure {
        if let Err(e) = self.send(util::make_pairing_failed(reason)) {
            warn!("[smp legacy] could not notify peer: {}", e);
        }
        PairingFailure::new(message, reason)
    }

    /// Wait for `expected` from the peer.
    ///
    /// A Pairing Failed from the peer ends the attempt with the peer's reason. Any
    /// other command is a protocol violation.
    async fn wait_packet(&mut self, expected: Command, what: &str) -> Result<SmpPacket, PairingFailure> {
        let packets = self.inbound.packets.clone();
        match with_timeout(self.info.config.timeout, packets.receive()).await {
            Err(_) => Err(PairingFailure::new(
                format!("timeout waiting for {}", what),
                Reason::UnspecifiedReason,
            )),
            Ok(packet) if packet.command == expected => Ok(packet),
            Ok(packet) if packet.command == Command::PairingFailed => {
                let reason = packet
                    .payload()
                    .first()
                    .and_then(|r| Reason::try_from(*r).ok())
                    .unwrap_or(Reason::UnspecifiedReason);
                Err(PairingFailure::new(
                    format!("peer failed pairing while waiting for {}", what),
                    reason,
                ))
            }
            Ok(packet) => {
                let message = format!("unexpected {} while waiting for {}", packet.command, what);
                Err(self.fail(Reason::UnspecifiedReason, &message))
            }
        }
    }

    /// Wait for the user's answer to a prompt.
    async fn wait_ui_event(&self) -> Option<PairingEvent> {
        let events = self.inbound.ui_events.clone();
        with_timeout(self.info.config.timeout, events.receive()).await.ok()
    }
}
