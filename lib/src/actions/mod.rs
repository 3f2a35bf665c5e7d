// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Built-in device actions
//!
//! Actions are [Flow][ledger_dmk_core::engine::Flow]s executed against a
//! session with [Session::execute][crate::session::Session::execute] or
//! [DeviceManager::execute][crate::DeviceManager::execute].

use strum::Display;

mod open_app;
pub use open_app::{OpenAppFlow, OpenAppState};

mod send_command;
pub use send_command::{SendCommandInAppFlow, SendCommandState};

mod device_status;
pub use device_status::{DeviceStatusState, GetDeviceStatusFlow};

/// User interaction required while an action is pending
#[derive(Copy, Clone, PartialEq, Eq, Debug, Display)]
pub enum UserInteraction {
    /// No interaction required
    None,
    /// Confirm opening an application on the device
    ConfirmOpenApp,
    /// Confirm the command on the device
    ConfirmCommand,
}
