//! Compile-time configuration.
//!
//! `gd-host` has some configuration settings that are set at compile time through
//! environment variables named `GD_HOST_<value>`. For example
//! `GD_HOST_PAIRING_TIMEOUT_SECS=10 cargo build`. You can also set them in the `[env]`
//! section of `.cargo/config.toml`. Unset variables fall back to the defaults below.
//!
//! Runtime overrides for pairing live in [`crate::security::pairing::PairingConfig`].

mod raw {
    #![allow(unused)]
    include!(concat!(env!("OUT_DIR"), "/config.rs"));
}

/// SMP pairing timeout, in seconds.
///
/// Every wait of the pairing state machine (peer packets and the passkey prompt) is
/// bounded by this value.
///
/// Default: 30.
pub const PAIRING_TIMEOUT_SECS: u64 = raw::PAIRING_TIMEOUT_SECS as u64;

/// Time a module handler gets to drain during shutdown, in milliseconds.
///
/// Exceeding it is fatal.
///
/// Default: 2000.
pub const MODULE_STOP_TIMEOUT_MS: u64 = raw::MODULE_STOP_TIMEOUT_MS as u64;

/// Inbound SMP packet queue size of a pairing handler.
///
/// Default: 4.
pub const PAIRING_QUEUE_SIZE: usize = raw::PAIRING_QUEUE_SIZE;

/// Inbound UI event queue size of a pairing handler.
///
/// Default: 2.
pub const UI_QUEUE_SIZE: usize = raw::UI_QUEUE_SIZE;
