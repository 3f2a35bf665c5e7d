// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Protocol / APDU definitions for Ledger device management
//!
//! This module provides the wire-level objects used to talk to a Ledger device:
//! [Apdu] requests and [ApduResponse] messages, status word classification
//! ([status]), the [frame] codec used to move messages over fixed-size transport
//! frames, and the [Command] contract implemented by the built-in OS commands
//! ([app_info], [os_version], [app_control]).
//!
//! Request messages are encoded as a four byte `CLA INS P1 P2` header followed by
//! a length byte and the payload. Responses carry the payload followed by a
//! two byte big-endian status word.
//!

use core::fmt::Debug;

pub use ledger_proto::ApduStatic;

pub mod app_control;
pub mod app_info;
pub mod frame;
pub mod model;
pub mod os_version;
pub mod prelude;
pub mod status;

use status::{DeviceCondition, StatusWord};

/// Ledger OS (dashboard / BOLOS) APDU class
pub const OS_APDU_CLA: u8 = 0xe0;

/// Generic (application-agnostic) APDU class
pub const GENERIC_APDU_CLA: u8 = 0xb0;

/// Maximum APDU payload length (single length byte)
pub const MAX_APDU_DATA: usize = 255;

/// Instruction codes for built-in commands
#[derive(Copy, Clone, Debug, PartialEq, num_enum::TryFromPrimitive)]
#[repr(u8)]
pub enum Instruction {
    /// Fetch current application name and version (`0xb0`)
    GetAppAndVersion = 0x01,

    /// Close the running application (`0xb0`)
    CloseApp = 0xa7,

    /// Open an application by name (`0xe0`)
    OpenApp = 0xd8,
}

/// Instruction for fetching the OS version, shares `0x01` with [Instruction::GetAppAndVersion]
/// under the [OS_APDU_CLA] class
pub const INS_GET_OS_VERSION: u8 = 0x01;

/// APDU encoding / decoding errors
#[derive(Copy, Clone, Debug, PartialEq, thiserror::Error)]
pub enum ApduError {
    /// Invalid buffer or field length
    #[error("invalid length")]
    InvalidLength,

    /// Invalid field encoding
    #[error("invalid encoding")]
    InvalidEncoding,

    /// Invalid UTF-8 string
    #[error("invalid utf8")]
    Utf8,

    /// Unsupported response format version
    #[error("unsupported format version {0}")]
    InvalidVersion(u8),
}

impl From<encdec::Error> for ApduError {
    fn from(_: encdec::Error) -> Self {
        ApduError::InvalidLength
    }
}

/// Request APDU
#[derive(Clone, PartialEq, Debug)]
pub struct Apdu {
    pub cla: u8,
    pub ins: u8,
    pub p1: u8,
    pub p2: u8,
    pub data: Vec<u8>,
}

impl Apdu {
    /// Create a new APDU with an empty payload
    pub fn new(cla: u8, ins: u8, p1: u8, p2: u8) -> Self {
        Self {
            cla,
            ins,
            p1,
            p2,
            data: vec![],
        }
    }

    /// Set APDU payload
    pub fn with_data(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.data = data.into();
        self
    }

    /// Build an APDU from an [ApduStatic] request object, encoding the request as payload
    pub fn from_req<R>(req: &R, p1: u8, p2: u8) -> Result<Self, ApduError>
    where
        R: ApduStatic + encdec::Encode<Error = ApduError>,
    {
        let mut data = vec![0u8; req.encode_len()?];
        let n = req.encode(&mut data)?;
        data.truncate(n);

        Ok(Self::new(R::CLA, R::INS, p1, p2).with_data(data))
    }

    /// Encode APDU to bytes for transmission
    pub fn to_bytes(&self) -> Result<Vec<u8>, ApduError> {
        if self.data.len() > MAX_APDU_DATA {
            return Err(ApduError::InvalidLength);
        }

        let mut b = Vec::with_capacity(5 + self.data.len());
        b.extend_from_slice(&[self.cla, self.ins, self.p1, self.p2, self.data.len() as u8]);
        b.extend_from_slice(&self.data);

        Ok(b)
    }

    /// Parse an encoded APDU (the length byte is optional for empty payloads)
    pub fn parse(buff: &[u8]) -> Result<Self, ApduError> {
        if buff.len() < 4 {
            return Err(ApduError::InvalidLength);
        }

        let mut a = Self::new(buff[0], buff[1], buff[2], buff[3]);

        if let Some(&n) = buff.get(4) {
            let data = buff.get(5..).ok_or(ApduError::InvalidLength)?;
            if data.len() != n as usize {
                return Err(ApduError::InvalidLength);
            }
            a.data = data.to_vec();
        }

        Ok(a)
    }

    /// Check whether this APDU is known to switch the running application,
    /// which causes the device to drop and re-enumerate the link
    pub fn triggers_disconnection(&self) -> bool {
        matches!(
            (self.cla, self.ins, self.p1, self.p2),
            (OS_APDU_CLA, 0xd8, 0x00, 0x00) | (GENERIC_APDU_CLA, 0xa7, 0x00, 0x00)
        )
    }
}

impl std::fmt::Display for Apdu {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:02x}{:02x}{:02x}{:02x} {}",
            self.cla,
            self.ins,
            self.p1,
            self.p2,
            hex::encode(&self.data)
        )
    }
}

/// Response APDU, payload with trailing status word
#[derive(Clone, PartialEq, Debug)]
pub struct ApduResponse {
    pub data: Vec<u8>,
    pub status: [u8; 2],
}

impl ApduResponse {
    /// Create a response from a payload and status word
    pub fn new(data: impl Into<Vec<u8>>, status: StatusWord) -> Self {
        Self {
            data: data.into(),
            status: status.0.to_be_bytes(),
        }
    }

    /// Split a raw response message into payload and status word
    pub fn from_bytes(buff: &[u8]) -> Result<Self, ApduError> {
        if buff.len() < 2 {
            return Err(ApduError::InvalidLength);
        }

        let (data, status) = buff.split_at(buff.len() - 2);

        Ok(Self {
            data: data.to_vec(),
            status: [status[0], status[1]],
        })
    }

    /// Encode response to bytes (payload then status word)
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut b = self.data.clone();
        b.extend_from_slice(&self.status);
        b
    }

    /// Fetch typed status word
    pub fn status_word(&self) -> StatusWord {
        StatusWord::from(self.status)
    }

    /// Check whether the response indicates success
    pub fn is_success(&self) -> bool {
        status::is_success(&self.status)
    }

    /// Map a non-success status word to a [CommandError]
    pub fn check(&self) -> Result<(), CommandError> {
        let sw = self.status_word();

        if sw.is_success() {
            return Ok(());
        }

        match sw.condition() {
            Some(c) => Err(CommandError::Device(c)),
            None => Err(CommandError::Status(sw)),
        }
    }
}

/// Errors returned when parsing a [Command] response
#[derive(Clone, PartialEq, Debug, thiserror::Error)]
pub enum CommandError {
    /// Device reported a known condition (locked, refused, ...)
    #[error("device condition: {0}")]
    Device(DeviceCondition),

    /// Device returned an unrecognised status word
    #[error("unexpected status word {0}")]
    Status(StatusWord),

    /// Response payload could not be decoded
    #[error("invalid response: {0}")]
    InvalidResponse(#[from] ApduError),
}

/// Command contract, builds a request [Apdu] and parses the matching [ApduResponse]
///
/// Per-coin command sets implement this to be driven through a session.
pub trait Command: Send + Sync + Debug {
    /// Parsed response type
    type Response: Send + Debug;

    /// Command name, used for logging
    fn name(&self) -> &'static str;

    /// Build the request APDU
    fn apdu(&self) -> Result<Apdu, ApduError>;

    /// Parse a response APDU
    fn parse_response(&self, resp: &ApduResponse) -> Result<Self::Response, CommandError>;

    /// Whether a successful response is followed by the device disconnecting
    fn triggers_disconnection(&self) -> bool {
        false
    }
}

/// Decode a length-value encoded field, returning the field and the consumed length
pub(crate) fn decode_lv(buff: &[u8]) -> Result<(&[u8], usize), ApduError> {
    let n = *buff.first().ok_or(ApduError::InvalidLength)? as usize;
    let v = buff.get(1..1 + n).ok_or(ApduError::InvalidLength)?;
    Ok((v, 1 + n))
}

/// Decode a length-value encoded UTF-8 string
pub(crate) fn decode_lv_str(buff: &[u8]) -> Result<(&str, usize), ApduError> {
    let (v, n) = decode_lv(buff)?;
    let s = core::str::from_utf8(v).map_err(|_| ApduError::Utf8)?;
    Ok((s, n))
}

/// Encode a length-value field
pub(crate) fn encode_lv(v: &[u8], buff: &mut [u8]) -> Result<usize, ApduError> {
    if v.len() > u8::MAX as usize || buff.len() < 1 + v.len() {
        return Err(ApduError::InvalidLength);
    }

    buff[0] = v.len() as u8;
    buff[1..][..v.len()].copy_from_slice(v);

    Ok(1 + v.len())
}
