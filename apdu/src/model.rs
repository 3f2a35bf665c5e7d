// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Device model identification

use strum::{Display, EnumIter, EnumString};

/// Ledger USB vendor ID
pub const LEDGER_VID: u16 = 0x2c97;

/// Ledger device models
///
/// Discriminants are the high byte of the USB product ID reported by
/// current firmware.
#[derive(
    Copy, Clone, PartialEq, Eq, Debug, Hash, Display, EnumString, EnumIter, num_enum::TryFromPrimitive,
)]
#[repr(u8)]
pub enum DeviceModelId {
    /// Nano S
    #[strum(serialize = "nanos")]
    NanoS = 0x10,
    /// Nano X
    #[strum(serialize = "nanox")]
    NanoX = 0x40,
    /// Nano S Plus
    #[strum(serialize = "nanosp")]
    NanoSP = 0x50,
    /// Stax
    #[strum(serialize = "stax")]
    Stax = 0x60,
    /// Flex
    #[strum(serialize = "flex")]
    Flex = 0x70,
}

impl DeviceModelId {
    /// Resolve a device model from a USB product ID
    pub fn from_usb_product_id(pid: u16) -> Option<Self> {
        // Legacy firmware reports the model in the low byte
        let legacy = match pid {
            0x0001 => Some(Self::NanoS),
            0x0004 => Some(Self::NanoX),
            0x0005 => Some(Self::NanoSP),
            0x0006 => Some(Self::Stax),
            0x0007 => Some(Self::Flex),
            _ => None,
        };

        legacy.or_else(|| Self::try_from((pid >> 8) as u8).ok())
    }

    /// Whether the device can push asynchronous notifications.
    ///
    /// Devices that cannot (Nano S) do not respond at all while locked,
    /// so liveness polling must treat unresponsiveness as locked.
    pub fn can_push_notifications(&self) -> bool {
        !matches!(self, Self::NanoS)
    }
}
