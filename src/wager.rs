use crate::{
    Error,
    Result,
};
use serde::{
    Deserialize,
    Serialize,
};
use std::fmt;

pub const ADDRESS_LEN: usize = 32;
pub const WAGER_KEY_LEN: usize = ADDRESS_LEN + 8 + 8 + 8;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address([u8; ADDRESS_LEN]);

impl Address {
    pub const fn new(bytes: [u8; ADDRESS_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; ADDRESS_LEN] {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl TryFrom<String> for Address {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        let bytes = hex::decode(value.trim_start_matches("0x"))
            .map_err(|e| Error::InvalidReconstructionInput(format!("address: {e}")))?;
        let bytes: [u8; ADDRESS_LEN] = bytes.try_into().map_err(|b: Vec<u8>| {
            Error::InvalidReconstructionInput(format!(
                "address must be {ADDRESS_LEN} bytes, got {}",
                b.len()
            ))
        })?;
        Ok(Self(bytes))
    }
}

impl From<Address> for String {
    fn from(address: Address) -> Self {
        address.to_string()
    }
}

/// Ledger-side identity of a wager:
/// `address[32] || amount u64 BE || max_payline_index u64 BE || index u64 BE`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WagerKey([u8; WAGER_KEY_LEN]);

impl WagerKey {
    pub fn new(address: &Address, amount: u64, max_payline_index: u64, index: u64) -> Self {
        let mut bytes = [0u8; WAGER_KEY_LEN];
        bytes[..32].copy_from_slice(address.as_bytes());
        bytes[32..40].copy_from_slice(&amount.to_be_bytes());
        bytes[40..48].copy_from_slice(&max_payline_index.to_be_bytes());
        bytes[48..56].copy_from_slice(&index.to_be_bytes());
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let bytes: [u8; WAGER_KEY_LEN] = bytes.try_into().map_err(|_| {
            Error::InvalidReconstructionInput(format!(
                "wager key must be {WAGER_KEY_LEN} bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self(bytes))
    }

    pub fn from_hex(raw: &str) -> Result<Self> {
        let bytes = hex::decode(raw.trim_start_matches("0x"))
            .map_err(|e| Error::InvalidReconstructionInput(format!("wager key: {e}")))?;
        Self::from_slice(&bytes)
    }

    pub fn as_bytes(&self) -> &[u8; WAGER_KEY_LEN] {
        &self.0
    }

    fn word(&self, start: usize) -> u64 {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&self.0[start..start + 8]);
        u64::from_be_bytes(buf)
    }

    pub fn address(&self) -> Address {
        let mut bytes = [0u8; ADDRESS_LEN];
        bytes.copy_from_slice(&self.0[..32]);
        Address(bytes)
    }

    /// Bet per line.
    pub fn amount(&self) -> u64 {
        self.word(32)
    }

    pub fn max_payline_index(&self) -> u64 {
        self.word(40)
    }

    pub fn index(&self) -> u64 {
        self.word(48)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for WagerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for WagerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = self.to_hex();
        write!(f, "WagerKey({}..{})", &hex[..8], &hex[hex.len() - 8..])
    }
}

impl TryFrom<String> for WagerKey {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        WagerKey::from_hex(&value)
    }
}

impl From<WagerKey> for String {
    fn from(key: WagerKey) -> Self {
        key.to_hex()
    }
}

/// Everything the ledger needs to accept a spin.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WagerRequest {
    pub wager_key: WagerKey,
    pub bet_per_line: u64,
    pub selected_paylines: u64,
    pub total_bet: u64,
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;

    #[test]
    fn new__packs_fields_big_endian() {
        // given
        let address = Address::new([0xab; 32]);

        // when
        let key = WagerKey::new(&address, 1_000_000, 19, 42);

        // then
        assert_eq!(key.address(), address);
        assert_eq!(key.amount(), 1_000_000);
        assert_eq!(key.max_payline_index(), 19);
        assert_eq!(key.index(), 42);
        assert_eq!(&key.as_bytes()[32..40], &1_000_000u64.to_be_bytes());
    }

    #[test]
    fn from_hex__rejects_wrong_length() {
        assert!(matches!(
            WagerKey::from_hex("abcd"),
            Err(Error::InvalidReconstructionInput(_))
        ));
        assert!(matches!(
            WagerKey::from_hex("zz"),
            Err(Error::InvalidReconstructionInput(_))
        ));
    }

    #[test]
    fn from_hex__accepts_its_own_display() {
        let key = WagerKey::new(&Address::new([1; 32]), 5, 0, 7);
        assert_eq!(WagerKey::from_hex(&format!("0x{key}")), Ok(key));
    }
}
