//! Prelude to simplify downstream use of APDU objects
//!

pub use crate::{
    app_control::{CloseApp, CloseAppReq, OpenApp, OpenAppReq},
    app_info::{AppAndVersion, AppAndVersionReq, AppAndVersionResp, AppFlags, GetAppAndVersion},
    frame::{FrameConfig, FrameDecoder, FrameEncoder, FrameError},
    model::DeviceModelId,
    os_version::{GetOsVersion, OsVersion, OsVersionReq, OsVersionResp},
    status::{DeviceCondition, StatusWord},
    Apdu, ApduError, ApduResponse, Command, CommandError,
};
