// Copyright (c) 2022-2023 The MobileCoin Foundation

use ledger_dmk_apdu::{
    frame::FrameError,
    status::{DeviceCondition, StatusWord},
    ApduError, CommandError,
};

/// Physical connection / transport faults
#[derive(Clone, PartialEq, Debug, thiserror::Error)]
pub enum TransportError {
    /// Writing a frame to the link failed
    #[error("frame write failed: {0}")]
    WriteFailed(String),

    /// Link was lost while an exchange was in flight and did not recover
    #[error("device disconnected while sending")]
    DisconnectedWhileSending,

    /// Link was lost before the request could be written and did not recover
    #[error("device disconnected before sending")]
    DisconnectedBeforeSending,

    /// Reconnection window expired
    #[error("reconnection timed out")]
    ReconnectionTimedOut,

    /// An exchange is already in flight on this connection
    #[error("an exchange is already in flight")]
    AlreadySending,

    /// Connection has been closed
    #[error("connection closed")]
    Closed,

    /// No response within the exchange timeout
    #[error("timeout waiting for device response")]
    SendTimeout,
}

/// Suggested caller reaction to an [Error]
#[derive(Copy, Clone, PartialEq, Eq, Debug, strum::Display)]
pub enum Recovery {
    /// Transient, the operation may be retried
    Retry,
    /// The user must unlock the device
    Unlock,
    /// Not recoverable by retrying
    Fatal,
}

/// Device exchange error type
#[derive(Clone, PartialEq, Debug, thiserror::Error)]
pub enum Error {
    /// Transport fault
    #[error("transport: {0}")]
    Transport(#[from] TransportError),

    /// Malformed or out of sequence frame
    #[error("frame: {0}")]
    Frame(#[from] FrameError),

    /// Command response error (device condition / unexpected status / decoding)
    #[error("command: {0}")]
    Command(#[from] CommandError),

    /// Request encoding failed
    #[error("apdu: {0}")]
    Apdu(#[from] ApduError),
}

impl From<DeviceCondition> for Error {
    fn from(c: DeviceCondition) -> Self {
        Error::Command(CommandError::Device(c))
    }
}

impl Error {
    /// Fetch the device condition reported by the device, if any
    pub fn device_condition(&self) -> Option<DeviceCondition> {
        match self {
            Error::Command(CommandError::Device(c)) => Some(*c),
            _ => None,
        }
    }

    /// Fetch the status word for unrecognised device responses
    pub fn status_word(&self) -> Option<StatusWord> {
        match self {
            Error::Command(CommandError::Status(sw)) => Some(*sw),
            _ => None,
        }
    }

    /// Check whether this error is caused by the device disconnecting
    pub fn is_disconnection(&self) -> bool {
        matches!(
            self,
            Error::Transport(
                TransportError::DisconnectedWhileSending
                    | TransportError::DisconnectedBeforeSending
                    | TransportError::ReconnectionTimedOut
            )
        )
    }

    /// Classify the error to decide whether to retry, prompt for unlock, or give up
    pub fn recovery(&self) -> Recovery {
        match self {
            Error::Command(CommandError::Device(DeviceCondition::Locked)) => Recovery::Unlock,
            Error::Command(CommandError::Device(DeviceCondition::Refused)) => Recovery::Retry,
            Error::Command(_) | Error::Apdu(_) => Recovery::Fatal,
            Error::Transport(TransportError::AlreadySending | TransportError::Closed) => {
                Recovery::Fatal
            }
            Error::Transport(_) | Error::Frame(_) => Recovery::Retry,
        }
    }
}
