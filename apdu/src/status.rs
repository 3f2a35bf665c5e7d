// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Status word classification
//!
//! Status words are the trailing two (big-endian) bytes of every response.
//! The classifiers here operate on raw slices so they can be applied to
//! truncated or malformed responses, any input that is not exactly two bytes
//! long is never classified.

use strum::{EnumIter, EnumString};

/// Success
pub const SW_SUCCESS: &[[u8; 2]] = &[[0x90, 0x00]];

/// Device is locked (PIN not entered / screen locked)
pub const SW_LOCKED: &[[u8; 2]] = &[[0x55, 0x15], [0x69, 0x82], [0x53, 0x03]];

/// User refused the operation on the device
pub const SW_REFUSED: &[[u8; 2]] = &[[0x55, 0x01], [0x69, 0x85]];

/// Application is already installed
pub const SW_ALREADY_INSTALLED: &[[u8; 2]] =
    &[[0x6a, 0x80], [0x6a, 0x81], [0x6a, 0x8e], [0x6a, 0x8f]];

/// Device is out of memory
pub const SW_OUT_OF_MEMORY: &[[u8; 2]] = &[[0x6a, 0x84], [0x6a, 0x85], [0x51, 0x02], [0x51, 0x03]];

/// Requested application is not installed
pub const SW_UNKNOWN_APP: [u8; 2] = [0x68, 0x07];

fn matches(sw: &[u8], set: &[[u8; 2]]) -> bool {
    sw.len() == 2 && set.iter().any(|s| s[..] == *sw)
}

/// Check whether a status word indicates success
pub fn is_success(sw: &[u8]) -> bool {
    matches(sw, SW_SUCCESS)
}

/// Check whether a status word indicates the device is locked
pub fn is_locked(sw: &[u8]) -> bool {
    matches(sw, SW_LOCKED)
}

/// Check whether a status word indicates the user refused on device
pub fn is_refused(sw: &[u8]) -> bool {
    matches(sw, SW_REFUSED)
}

/// Check whether a status word indicates the application is already installed
pub fn is_already_installed(sw: &[u8]) -> bool {
    matches(sw, SW_ALREADY_INSTALLED)
}

/// Check whether a status word indicates the device is out of memory
pub fn is_out_of_memory(sw: &[u8]) -> bool {
    matches(sw, SW_OUT_OF_MEMORY)
}

/// Device-state conditions reported via status words.
///
/// These are expected operational outcomes rather than faults, callers are
/// expected to surface them to users (prompt for unlock, retry, etc.).
#[derive(Copy, Clone, PartialEq, Eq, Debug, EnumString, EnumIter, thiserror::Error)]
pub enum DeviceCondition {
    /// Device is locked
    #[error("device locked")]
    Locked,
    /// User refused on device
    #[error("refused by user")]
    Refused,
    /// Application already installed
    #[error("application already installed")]
    AlreadyInstalled,
    /// Device out of memory
    #[error("out of memory")]
    OutOfMemory,
    /// Requested application not installed
    #[error("unknown application")]
    UnknownApp,
}

/// Typed status word
#[derive(Copy, Clone, PartialEq, Eq, Debug, Hash)]
pub struct StatusWord(pub u16);

impl StatusWord {
    pub const SUCCESS: StatusWord = StatusWord(0x9000);

    /// Check whether the status word indicates success
    pub fn is_success(&self) -> bool {
        is_success(&self.0.to_be_bytes())
    }

    /// Resolve the device condition indicated by this status word, if any
    pub fn condition(&self) -> Option<DeviceCondition> {
        let b = self.0.to_be_bytes();

        if is_locked(&b) {
            Some(DeviceCondition::Locked)
        } else if is_refused(&b) {
            Some(DeviceCondition::Refused)
        } else if is_already_installed(&b) {
            Some(DeviceCondition::AlreadyInstalled)
        } else if is_out_of_memory(&b) {
            Some(DeviceCondition::OutOfMemory)
        } else {
            None
        }
    }
}

impl From<[u8; 2]> for StatusWord {
    fn from(b: [u8; 2]) -> Self {
        Self(u16::from_be_bytes(b))
    }
}

impl std::fmt::Display for StatusWord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{:04x}", self.0)
    }
}
