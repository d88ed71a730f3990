//! Bech32 address handling and consensus address derivation

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bech32::{Bech32, Hrp};
use sha2::{Digest, Sha256};

/// Longest bech32 string accepted
const MAX_LENGTH: usize = 90;

/// Suffix separating a chain's validator-operator prefix from its account prefix
const OPERATOR_SUFFIX: &str = "valoper";

/// Tendermint addresses are the first 20 bytes of the key hash
const CONSENSUS_ADDR_LEN: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressError {
    #[error("'{0}' is longer than 90 characters")]
    TooLong(String),

    #[error("invalid bech32 '{addr}': {reason}")]
    Bech32 { addr: String, reason: String },

    #[error("'{0}' is not an operator address")]
    NotOperator(String),

    #[error("invalid base64: {0}")]
    Base64(String),
}

fn bech32_error(addr: &str, reason: impl std::fmt::Display) -> AddressError {
    AddressError::Bech32 {
        addr: addr.to_string(),
        reason: reason.to_string(),
    }
}

/// Decode a bech32 string into its lowercase human-readable part and payload
pub fn decode(addr: &str) -> Result<(String, Vec<u8>), AddressError> {
    if addr.len() > MAX_LENGTH {
        return Err(AddressError::TooLong(addr.to_string()));
    }
    let (hrp, payload) = bech32::decode(addr).map_err(|e| bech32_error(addr, e))?;
    Ok((hrp.to_lowercase(), payload))
}

/// Encode payload bytes under a human-readable prefix
pub fn encode(prefix: &str, payload: &[u8]) -> Result<String, AddressError> {
    let hrp = Hrp::parse(prefix).map_err(|e| bech32_error(prefix, e))?;
    let addr = bech32::encode::<Bech32>(hrp, payload).map_err(|e| bech32_error(prefix, e))?;
    if addr.len() > MAX_LENGTH {
        return Err(AddressError::TooLong(addr));
    }
    Ok(addr)
}

/// Self-stake account of a validator: same payload, account prefix
pub fn account_address(operator_addr: &str) -> Result<String, AddressError> {
    let (hrp, payload) = decode(operator_addr)?;
    let prefix = hrp
        .strip_suffix(OPERATOR_SUFFIX)
        .filter(|p| !p.is_empty())
        .ok_or_else(|| AddressError::NotOperator(operator_addr.to_string()))?;
    encode(prefix, &payload)
}

/// Lowercase hex of a base64 byte field
pub fn hex_from_base64(value: &str) -> Result<String, AddressError> {
    STANDARD
        .decode(value)
        .map(hex::encode)
        .map_err(|e| AddressError::Base64(e.to_string()))
}

/// Hex consensus address of a base64 ed25519 public key
pub fn consensus_hex(pubkey_b64: &str) -> Result<String, AddressError> {
    let key = STANDARD
        .decode(pubkey_b64)
        .map_err(|e| AddressError::Base64(e.to_string()))?;
    let digest = Sha256::digest(&key);
    Ok(hex::encode(&digest[..CONSENSUS_ADDR_LEN]))
}
