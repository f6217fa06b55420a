//! The two legacy phases: temporary key agreement, then confirm/random exchange and
//! short term key generation ([Vol 3] Part H, Section 2.3.5).
use log::{info, trace};
use rand_core::{CryptoRng, RngCore};

use super::util::{self, AssociationModel, PassKeyEntryAction};
use super::{PairingFailure, PairingHandler, PairingOps, Role};
use crate::security::crypto::{self, Octet16};
use crate::security::types::{Command, PairingFeatures, PassKey, Reason};
use crate::security::ui::{ConfirmationData, PairingEvent};

impl<O: PairingOps, R: RngCore + CryptoRng> PairingHandler<O, R> {
    /// Agree on the temporary key.
    pub(super) async fn stage1(
        &mut self,
        request: &PairingFeatures,
        response: &PairingFeatures,
    ) -> Result<(AssociationModel, Octet16), PairingFailure> {
        let model = util::choose_association_model(request, response);
        trace!("[smp legacy] association model {:?}", model);

        let tk = match model {
            AssociationModel::JustWorks => [0u8; 16],
            AssociationModel::OutOfBand => match self.info.remote_oob_data {
                Some(tk) => tk,
                None => return Err(self.fail(Reason::OobNotAvailable, "out of band data not available")),
            },
            AssociationModel::PassKeyEntry { .. } => {
                let passkey = match model.passkey_action(self.info.my_role) {
                    Some(PassKeyEntryAction::Display) => self.display_passkey(),
                    _ => self.request_passkey().await?,
                };
                util::passkey_tk(passkey)
            }
        };
        Ok((model, tk))
    }

    fn display_passkey(&mut self) -> PassKey {
        let passkey = util::generate_passkey(&mut self.rng);
        info!(
            "[smp legacy] displaying passkey for {}",
            self.info.remote_connection_address
        );
        let data = ConfirmationData::with_passkey(
            self.info.remote_connection_address,
            &self.info.remote_name,
            passkey,
        );
        let ui = self.info.user_interface.clone();
        self.info
            .user_interface_handler
            .post(move || ui.display_confirm_value(data));
        passkey
    }

    async fn request_passkey(&mut self) -> Result<PassKey, PairingFailure> {
        let data = ConfirmationData::new(self.info.remote_connection_address, &self.info.remote_name);
        let ui = self.info.user_interface.clone();
        self.info
            .user_interface_handler
            .post(move || ui.display_enter_passkey_dialog(data));

        match self.wait_ui_event().await {
            Some(PairingEvent::Passkey(value)) => match PassKey::new(value) {
                Some(passkey) => Ok(passkey),
                None => Err(self.fail(Reason::PasskeyEntryFailed, "passkey out of range")),
            },
            Some(PairingEvent::Cancel) => Err(self.fail(Reason::PasskeyEntryFailed, "Passkey did not arrive!")),
            None => Err(PairingFailure::new("Passkey did not arrive!", Reason::UnspecifiedReason)),
        }
    }

    /// Exchange confirm and random values, then derive the short term key.
    pub(super) async fn stage2(
        &mut self,
        request: &PairingFeatures,
        response: &PairingFeatures,
        tk: &Octet16,
        key_size: u8,
    ) -> Result<Octet16, PairingFailure> {
        let preq = request.to_pdu(Command::PairingRequest);
        let pres = response.to_pdu(Command::PairingResponse);
        let (initiator, responder) = self.info.initiator_and_responder();
        let confirm = |random: &Octet16| {
            crypto::c1(
                tk,
                random,
                &preq,
                &pres,
                initiator.type_octet(),
                &initiator.bytes(),
                responder.type_octet(),
                &responder.bytes(),
            )
        };

        let mut my_random = [0u8; 16];
        self.rng.fill_bytes(&mut my_random);
        let my_confirm = confirm(&my_random);

        let (mrand, srand) = match self.info.my_role {
            Role::Central => {
                self.send(util::make_pairing_confirm(&my_confirm))?;
                let sconfirm = self.wait_octet16(Command::PairingConfirm, "Pairing Confirm").await?;
                self.send(util::make_pairing_random(&my_random))?;
                let srand = self.wait_octet16(Command::PairingRandom, "Pairing Random").await?;

                if !crypto::constant_time_eq(&confirm(&srand), &sconfirm) {
                    return Err(self.fail(Reason::ConfirmValueFailed, "sconfirm does not match generated value"));
                }
                (my_random, srand)
            }
            Role::Peripheral => {
                let mconfirm = self.wait_octet16(Command::PairingConfirm, "Pairing Confirm").await?;
                self.send(util::make_pairing_confirm(&my_confirm))?;
                let mrand = self.wait_octet16(Command::PairingRandom, "Pairing Random").await?;

                if !crypto::constant_time_eq(&confirm(&mrand), &mconfirm) {
                    return Err(self.fail(Reason::ConfirmValueFailed, "mconfirm does not match generated value"));
                }
                self.send(util::make_pairing_random(&my_random))?;
                (mrand, my_random)
            }
        };

        Ok(crypto::mask_key(&crypto::s1(tk, &srand, &mrand), key_size))
    }

    async fn wait_octet16(&mut self, expected: Command, what: &str) -> Result<Octet16, PairingFailure> {
        let packet = self.wait_packet(expected, what).await?;
        match util::read_octet16(&packet) {
            Ok(value) => Ok(value),
            Err(_) => Err(self.fail(Reason::InvalidParameters, "short confirm or random value")),
        }
    }
}
