use ethers::types::{Address, H256};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

const ADDRESS_HEX_LEN: usize = 40;
const TX_HASH_HEX_LEN: usize = 64;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    #[error("Invalid Ethereum address format: {0}")]
    Address(String),

    #[error("Invalid transaction hash format: {0}")]
    TxHash(String),
}

/// Checks the `0x` prefix and exact hex length without touching the chain or store.
fn strip_hex(input: &str, hex_len: usize) -> Option<&str> {
    let digits = input.strip_prefix("0x")?;
    if digits.len() != hex_len || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    Some(digits)
}

/// A syntactically valid account identifier, normalized to lower case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WalletAddress(Address);

impl WalletAddress {
    pub fn parse(input: &str) -> Result<Self, FormatError> {
        let digits = strip_hex(input, ADDRESS_HEX_LEN)
            .ok_or_else(|| FormatError::Address(input.to_string()))?;
        let bytes = hex::decode(digits).map_err(|_| FormatError::Address(input.to_string()))?;
        Ok(Self(Address::from_slice(&bytes)))
    }

    pub fn as_address(&self) -> Address {
        self.0
    }
}

impl From<Address> for WalletAddress {
    fn from(address: Address) -> Self {
        Self(address)
    }
}

impl fmt::Display for WalletAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Debug on H160 prints the full lower-case hex with 0x
        write!(f, "{:?}", self.0)
    }
}

impl FromStr for WalletAddress {
    type Err = FormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for WalletAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for WalletAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// A syntactically valid transaction hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TxHash(H256);

impl TxHash {
    pub fn parse(input: &str) -> Result<Self, FormatError> {
        let digits = strip_hex(input, TX_HASH_HEX_LEN)
            .ok_or_else(|| FormatError::TxHash(input.to_string()))?;
        let bytes = hex::decode(digits).map_err(|_| FormatError::TxHash(input.to_string()))?;
        Ok(Self(H256::from_slice(&bytes)))
    }

    pub fn as_h256(&self) -> H256 {
        self.0
    }
}

impl From<H256> for TxHash {
    fn from(hash: H256) -> Self {
        Self(hash)
    }
}

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

impl FromStr for TxHash {
    type Err = FormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for TxHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TxHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wallet_address_is_normalized_to_lower_case() {
        let upper = format!("0x{}", "AB".repeat(20));
        let wallet = WalletAddress::parse(&upper).unwrap();
        assert_eq!(wallet.to_string(), format!("0x{}", "ab".repeat(20)));
        assert_eq!(wallet, WalletAddress::parse(&upper.to_lowercase()).unwrap());
    }

    #[test]
    fn wallet_address_rejects_bad_shapes() {
        let forty = "a".repeat(40);
        assert!(WalletAddress::parse(&forty).is_err());
        assert!(WalletAddress::parse(&format!("0x{}", "a".repeat(39))).is_err());
        assert!(WalletAddress::parse(&format!("0x{}", "a".repeat(41))).is_err());
        assert!(WalletAddress::parse(&format!("0x{}g", "a".repeat(39))).is_err());
        assert!(WalletAddress::parse(&format!("0X{forty}")).is_err());
        assert!(WalletAddress::parse("").is_err());
    }

    #[test]
    fn tx_hash_requires_sixty_four_hex_digits() {
        let good = format!("0x{}", "b".repeat(64));
        assert_eq!(TxHash::parse(&good).unwrap().to_string(), good);

        // an address is not a hash
        assert!(TxHash::parse(&format!("0x{}", "b".repeat(40))).is_err());
        assert!(TxHash::parse(&format!("0x{}", "z".repeat(64))).is_err());
    }

    #[test]
    fn identifiers_serialize_as_strings() {
        let wallet = WalletAddress::parse(&format!("0x{}", "Cd".repeat(20))).unwrap();
        let json = serde_json::to_string(&wallet).unwrap();
        assert_eq!(json, format!("\"0x{}\"", "cd".repeat(20)));

        let back: WalletAddress = serde_json::from_str(&json).unwrap();
        assert_eq!(back, wallet);

        let bad: Result<TxHash, _> = serde_json::from_str("\"0x1234\"");
        assert!(bad.is_err());
    }

    #[test]
    fn surrounding_whitespace_is_not_part_of_the_format() {
        let address = format!("0x{}", "ab".repeat(20));
        assert!(WalletAddress::parse(&format!(" {}", address)).is_err());
        assert!(WalletAddress::parse(&format!("{} ", address)).is_err());
        assert!(WalletAddress::parse(&format!("{}\n", address)).is_err());

        let hash = format!("0x{}", "cd".repeat(32));
        assert!(TxHash::parse(&format!(" {} ", hash)).is_err());
        assert!(TxHash::parse(&hash).is_ok());
    }
}
