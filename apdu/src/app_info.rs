// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Application and version APDUs
//!
//! Available from both the dashboard and running applications, this is the
//! lightweight request used for liveness polling.

use encdec::{Decode, DecodeOwned, Encode};

use super::{
    decode_lv, decode_lv_str, encode_lv, Apdu, ApduError, ApduResponse, ApduStatic, Command,
    CommandError, Instruction, GENERIC_APDU_CLA,
};

/// Name reported by the dashboard (no application running)
pub const DASHBOARD_APP_NAME: &str = "BOLOS";

/// Response format version
pub const APP_INFO_FORMAT: u8 = 0x01;

/// Fetch application name and version APDU
#[derive(Copy, Clone, PartialEq, Debug, Default)]
pub struct AppAndVersionReq {}

impl ApduStatic for AppAndVersionReq {
    /// Application and version command APDU is class `0xb0`
    const CLA: u8 = GENERIC_APDU_CLA;

    /// Application and version GET APDU is instruction `0x01`
    const INS: u8 = Instruction::GetAppAndVersion as u8;
}

impl Encode for AppAndVersionReq {
    type Error = ApduError;

    fn encode_len(&self) -> Result<usize, Self::Error> {
        Ok(0)
    }

    fn encode(&self, _buff: &mut [u8]) -> Result<usize, Self::Error> {
        Ok(0)
    }
}

impl DecodeOwned for AppAndVersionReq {
    type Output = Self;

    type Error = ApduError;

    fn decode_owned(_buff: &[u8]) -> Result<(Self::Output, usize), Self::Error> {
        Ok((Self {}, 0))
    }
}

/// Application and version response APDU
///
/// ## Encoding
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |    FORMAT     |   NAME_LEN    |            NAME...            /
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |  VERSION_LEN  |                   VERSION...                  /
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |   FLAGS_LEN   |    FLAGS...   /
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
///
#[derive(Copy, Clone, PartialEq, Debug)]
pub struct AppAndVersionResp<'a> {
    /// Application name
    pub name: &'a str,

    /// Application version
    pub version: &'a str,

    /// Application flags
    pub flags: AppFlags,
}

bitflags::bitflags! {
    /// Application / dashboard state flags
    #[derive(Default)]
    pub struct AppFlags: u8 {
        /// Device booted in recovery mode
        const RECOVERY = 1 << 0;

        /// Application is signed by Ledger
        const SIGNED = 1 << 1;

        /// Device onboarding completed
        const ONBOARDED = 1 << 2;

        /// PIN validated (device unlocked)
        const PIN_VALIDATED = 1 << 7;
    }
}

impl<'a> AppAndVersionResp<'a> {
    /// Create a new application and version response
    pub fn new(name: &'a str, version: &'a str, flags: AppFlags) -> Self {
        Self {
            name,
            version,
            flags,
        }
    }
}

impl<'a> Encode for AppAndVersionResp<'a> {
    type Error = ApduError;

    fn encode(&self, buff: &mut [u8]) -> Result<usize, ApduError> {
        if buff.len() < self.encode_len()? {
            return Err(ApduError::InvalidLength);
        }

        let mut index = 0;

        // Set format
        buff[0] = APP_INFO_FORMAT;
        index += 1;

        // Write name and version
        index += encode_lv(self.name.as_bytes(), &mut buff[index..])?;
        index += encode_lv(self.version.as_bytes(), &mut buff[index..])?;

        // Write flags
        index += encode_lv(&[self.flags.bits()], &mut buff[index..])?;

        Ok(index)
    }

    fn encode_len(&self) -> Result<usize, ApduError> {
        Ok(1 + 1 + self.name.len() + 1 + self.version.len() + 2)
    }
}

impl<'a> Decode<'a> for AppAndVersionResp<'a> {
    type Output = Self;
    type Error = ApduError;

    fn decode(buff: &'a [u8]) -> Result<(Self, usize), ApduError> {
        let mut index = 0;

        // Check format
        let format = *buff.first().ok_or(ApduError::InvalidLength)?;
        if format != APP_INFO_FORMAT {
            return Err(ApduError::InvalidVersion(format));
        }
        index += 1;

        // Fetch name and version strings
        let (name, n) = decode_lv_str(&buff[index..])?;
        index += n;

        let (version, n) = decode_lv_str(&buff[index..])?;
        index += n;

        // Fetch flags, older firmware may omit these
        let flags = match buff.len() > index {
            true => {
                let (f, n) = decode_lv(&buff[index..])?;
                index += n;
                AppFlags::from_bits_truncate(f.first().copied().unwrap_or(0))
            }
            false => AppFlags::empty(),
        };

        Ok((
            Self {
                name,
                version,
                flags,
            },
            index,
        ))
    }
}

/// Current application information
#[derive(Clone, PartialEq, Debug)]
pub struct AppAndVersion {
    pub name: String,
    pub version: String,
    pub flags: AppFlags,
}

impl AppAndVersion {
    /// Check whether the dashboard is running (no application open)
    pub fn is_dashboard(&self) -> bool {
        self.name == DASHBOARD_APP_NAME
    }
}

impl<'a> From<AppAndVersionResp<'a>> for AppAndVersion {
    fn from(r: AppAndVersionResp<'a>) -> Self {
        Self {
            name: r.name.to_string(),
            version: r.version.to_string(),
            flags: r.flags,
        }
    }
}

impl std::fmt::Display for AppAndVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.name, self.version)
    }
}

/// Fetch the running application name and version
#[derive(Copy, Clone, PartialEq, Debug, Default)]
pub struct GetAppAndVersion;

impl Command for GetAppAndVersion {
    type Response = AppAndVersion;

    fn name(&self) -> &'static str {
        "get-app-and-version"
    }

    fn apdu(&self) -> Result<Apdu, ApduError> {
        Apdu::from_req(&AppAndVersionReq {}, 0x00, 0x00)
    }

    fn parse_response(&self, resp: &ApduResponse) -> Result<AppAndVersion, CommandError> {
        resp.check()?;

        let (r, _) = AppAndVersionResp::decode(&resp.data)?;

        Ok(r.into())
    }
}
