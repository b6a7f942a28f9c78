//! Utility functions for identifiers and digests

use bech32::Bech32m;
use uuid7::uuid7;

use crate::error::StoreError;
use crate::model::EntityKind;

// construct a unique id then encode using bech32
pub fn new_uuid_to_bech32(hrp: &str) -> anyhow::Result<String> {
    let hrp = bech32::Hrp::parse(hrp)?;
    let encode = bech32::encode::<Bech32m>(hrp, uuid7().as_bytes())?;
    Ok(encode)
}

/// Mint a fresh identifier for a record of the given kind, e.g. `trade_1...`.
pub fn new_id(kind: EntityKind) -> anyhow::Result<String> {
    new_uuid_to_bech32(kind.id_prefix())
}

/// [`new_id`] for callers that report failures as store errors.
pub fn mint_id(kind: EntityKind) -> Result<String, StoreError> {
    new_id(kind).map_err(|e| StoreError::Identifier(e.to_string()))
}

/// Session ids never hit the store in the clear, only their sha256 digest.
pub fn session_digest(session_id: &str) -> String {
    sha256::digest(session_id)
}
