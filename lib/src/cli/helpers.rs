// Copyright (c) 2022-2023 The MobileCoin Foundation

use ledger_dmk::apdu::{Apdu, ApduError};

/// Hex encoded APDU argument
#[derive(Clone, PartialEq, Debug)]
pub struct HexApdu(pub Apdu);

impl std::str::FromStr for HexApdu {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let b = hex::decode(s.trim_start_matches("0x"))?;

        let a = Apdu::parse(&b).map_err(|e: ApduError| anyhow::anyhow!("invalid apdu: {}", e))?;

        Ok(HexApdu(a))
    }
}

impl AsRef<Apdu> for HexApdu {
    fn as_ref(&self) -> &Apdu {
        &self.0
    }
}
