// Copyright (c) 2022-2023 The MobileCoin Foundation

//! OS version APDUs, only available from the dashboard

use encdec::{Decode, DecodeOwned, Encode};

use super::{
    decode_lv, decode_lv_str, encode_lv, Apdu, ApduError, ApduResponse, ApduStatic, Command,
    CommandError, INS_GET_OS_VERSION, OS_APDU_CLA,
};

/// Fetch OS version APDU
#[derive(Copy, Clone, PartialEq, Debug, Default)]
pub struct OsVersionReq {}

impl ApduStatic for OsVersionReq {
    /// OS version command APDU is class `0xe0`
    const CLA: u8 = OS_APDU_CLA;

    /// OS version GET APDU is instruction `0x01`
    const INS: u8 = INS_GET_OS_VERSION;
}

impl Encode for OsVersionReq {
    type Error = ApduError;

    fn encode_len(&self) -> Result<usize, Self::Error> {
        Ok(0)
    }

    fn encode(&self, _buff: &mut [u8]) -> Result<usize, Self::Error> {
        Ok(0)
    }
}

impl DecodeOwned for OsVersionReq {
    type Output = Self;

    type Error = ApduError;

    fn decode_owned(_buff: &[u8]) -> Result<(Self::Output, usize), Self::Error> {
        Ok((Self {}, 0))
    }
}

/// OS version response APDU
///
/// ## Encoding
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                      TARGET_ID (big-endian)                   |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |    SE_LEN     |                 SE_VERSION...                 /
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |  SE_FLAGS_LEN |                  SE_FLAGS...                  /
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |   SEPH_LEN    |              MCU_SEPH_VERSION...              /
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |    BL_LEN     |           MCU_BOOTLOADER_VERSION...           /
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
///
/// Newer firmware appends further fields, these are ignored.
#[derive(Copy, Clone, PartialEq, Debug)]
pub struct OsVersionResp<'a> {
    pub target_id: u32,
    pub se_version: &'a str,
    pub se_flags: &'a [u8],
    pub mcu_seph_version: &'a str,
    pub mcu_bootloader_version: &'a str,
}

impl<'a> Encode for OsVersionResp<'a> {
    type Error = ApduError;

    fn encode_len(&self) -> Result<usize, Self::Error> {
        Ok(4 + 1
            + self.se_version.len()
            + 1
            + self.se_flags.len()
            + 1
            + self.mcu_seph_version.len()
            + 1
            + self.mcu_bootloader_version.len())
    }

    fn encode(&self, buff: &mut [u8]) -> Result<usize, Self::Error> {
        if buff.len() < self.encode_len()? {
            return Err(ApduError::InvalidLength);
        }

        buff[..4].copy_from_slice(&self.target_id.to_be_bytes());
        let mut index = 4;

        index += encode_lv(self.se_version.as_bytes(), &mut buff[index..])?;
        index += encode_lv(self.se_flags, &mut buff[index..])?;
        index += encode_lv(self.mcu_seph_version.as_bytes(), &mut buff[index..])?;
        index += encode_lv(self.mcu_bootloader_version.as_bytes(), &mut buff[index..])?;

        Ok(index)
    }
}

impl<'a> Decode<'a> for OsVersionResp<'a> {
    type Output = Self;
    type Error = ApduError;

    fn decode(buff: &'a [u8]) -> Result<(Self::Output, usize), Self::Error> {
        if buff.len() < 4 {
            return Err(ApduError::InvalidLength);
        }

        let target_id = u32::from_be_bytes([buff[0], buff[1], buff[2], buff[3]]);
        let mut index = 4;

        let (se_version, n) = decode_lv_str(&buff[index..])?;
        index += n;

        let (se_flags, n) = decode_lv(&buff[index..])?;
        index += n;

        let (mcu_seph_version, n) = decode_lv_str(&buff[index..])?;
        index += n;

        let (mcu_bootloader_version, n) = decode_lv_str(&buff[index..])?;
        index += n;

        Ok((
            Self {
                target_id,
                se_version,
                se_flags,
                mcu_seph_version,
                mcu_bootloader_version,
            },
            index,
        ))
    }
}

/// Device OS version information
#[derive(Clone, PartialEq, Debug)]
pub struct OsVersion {
    pub target_id: u32,
    pub se_version: String,
    pub se_flags: Vec<u8>,
    pub mcu_seph_version: String,
    pub mcu_bootloader_version: String,
}

impl<'a> From<OsVersionResp<'a>> for OsVersion {
    fn from(r: OsVersionResp<'a>) -> Self {
        Self {
            target_id: r.target_id,
            se_version: r.se_version.to_string(),
            se_flags: r.se_flags.to_vec(),
            mcu_seph_version: r.mcu_seph_version.to_string(),
            mcu_bootloader_version: r.mcu_bootloader_version.to_string(),
        }
    }
}

/// Fetch the device OS version
#[derive(Copy, Clone, PartialEq, Debug, Default)]
pub struct GetOsVersion;

impl Command for GetOsVersion {
    type Response = OsVersion;

    fn name(&self) -> &'static str {
        "get-os-version"
    }

    fn apdu(&self) -> Result<Apdu, ApduError> {
        Apdu::from_req(&OsVersionReq {}, 0x00, 0x00)
    }

    fn parse_response(&self, resp: &ApduResponse) -> Result<OsVersion, CommandError> {
        resp.check()?;

        let (r, _) = OsVersionResp::decode(&resp.data)?;

        Ok(r.into())
    }
}
