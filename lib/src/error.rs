// Copyright (c) 2022-2023 The MobileCoin Foundation

use ledger_dmk_core::apdu::status::DeviceCondition;

use crate::session::SessionId;

/// Device management kit error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// HID Init Error
    #[error("could not create HidApi instance")]
    HidInit,

    /// Ledger HID Error
    #[cfg(feature = "transport_hid")]
    #[error("HID error: {0}")]
    Hid(#[from] hidapi::HidError),

    /// IO Error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Device exchange error
    #[error(transparent)]
    Device(#[from] ledger_dmk_core::Error),

    /// No session with the provided id
    #[error("session {0} not found")]
    SessionNotFound(SessionId),

    /// No session for the provided device
    #[error("no session for device {0}")]
    DeviceNotFound(String),

    /// No device found
    #[error("no device found")]
    NoDevice,

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),
}

impl From<ledger_dmk_core::TransportError> for Error {
    fn from(e: ledger_dmk_core::TransportError) -> Self {
        Error::Device(e.into())
    }
}

impl From<DeviceCondition> for Error {
    fn from(c: DeviceCondition) -> Self {
        Error::Device(c.into())
    }
}

impl Error {
    /// Fetch the device condition reported by the device, if any
    pub fn device_condition(&self) -> Option<DeviceCondition> {
        match self {
            Error::Device(e) => e.device_condition(),
            _ => None,
        }
    }
}
