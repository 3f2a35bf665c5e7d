// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Application open / close APDUs
//!
//! Both cause the device to switch application, dropping and re-enumerating
//! the transport link on success.

use encdec::{Decode, Encode};

use super::{
    status::{DeviceCondition, SW_UNKNOWN_APP},
    Apdu, ApduError, ApduResponse, ApduStatic, Command, CommandError, Instruction,
    GENERIC_APDU_CLA, OS_APDU_CLA,
};

/// Open application APDU, the payload is the application name
#[derive(Copy, Clone, PartialEq, Debug)]
pub struct OpenAppReq<'a> {
    pub name: &'a str,
}

impl<'a> ApduStatic for OpenAppReq<'a> {
    /// Open application is class `0xe0` (dashboard only)
    const CLA: u8 = OS_APDU_CLA;

    /// Open application is instruction `0xd8`
    const INS: u8 = Instruction::OpenApp as u8;
}

impl<'a> Encode for OpenAppReq<'a> {
    type Error = ApduError;

    fn encode_len(&self) -> Result<usize, Self::Error> {
        Ok(self.name.len())
    }

    fn encode(&self, buff: &mut [u8]) -> Result<usize, Self::Error> {
        let n = self.name.len();
        if buff.len() < n {
            return Err(ApduError::InvalidLength);
        }

        buff[..n].copy_from_slice(self.name.as_bytes());

        Ok(n)
    }
}

impl<'a> Decode<'a> for OpenAppReq<'a> {
    type Output = Self;
    type Error = ApduError;

    fn decode(buff: &'a [u8]) -> Result<(Self::Output, usize), Self::Error> {
        let name = core::str::from_utf8(buff).map_err(|_| ApduError::Utf8)?;
        Ok((Self { name }, buff.len()))
    }
}

/// Close the running application APDU
#[derive(Copy, Clone, PartialEq, Debug, Default)]
pub struct CloseAppReq {}

impl ApduStatic for CloseAppReq {
    /// Close application is class `0xb0`
    const CLA: u8 = GENERIC_APDU_CLA;

    /// Close application is instruction `0xa7`
    const INS: u8 = Instruction::CloseApp as u8;
}

impl Encode for CloseAppReq {
    type Error = ApduError;

    fn encode_len(&self) -> Result<usize, Self::Error> {
        Ok(0)
    }

    fn encode(&self, _buff: &mut [u8]) -> Result<usize, Self::Error> {
        Ok(0)
    }
}

/// Open an application by name
#[derive(Clone, PartialEq, Debug)]
pub struct OpenApp {
    pub app_name: String,
}

impl OpenApp {
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
        }
    }
}

impl Command for OpenApp {
    type Response = ();

    fn name(&self) -> &'static str {
        "open-app"
    }

    fn apdu(&self) -> Result<Apdu, ApduError> {
        Apdu::from_req(
            &OpenAppReq {
                name: &self.app_name,
            },
            0x00,
            0x00,
        )
    }

    fn parse_response(&self, resp: &ApduResponse) -> Result<(), CommandError> {
        if resp.status == SW_UNKNOWN_APP {
            return Err(CommandError::Device(DeviceCondition::UnknownApp));
        }

        resp.check()
    }

    fn triggers_disconnection(&self) -> bool {
        true
    }
}

/// Close the running application, returning to the dashboard
#[derive(Copy, Clone, PartialEq, Debug, Default)]
pub struct CloseApp;

impl Command for CloseApp {
    type Response = ();

    fn name(&self) -> &'static str {
        "close-app"
    }

    fn apdu(&self) -> Result<Apdu, ApduError> {
        Apdu::from_req(&CloseAppReq {}, 0x00, 0x00)
    }

    fn parse_response(&self, resp: &ApduResponse) -> Result<(), CommandError> {
        resp.check()
    }

    fn triggers_disconnection(&self) -> bool {
        true
    }
}
