//! Identifier generation

use bech32::Bech32m;
use uuid7::uuid7;

use crate::store::EntityKind;

// construct a unique id then encode using bech32
pub fn new_uuid_to_bech32(hrp: &str) -> anyhow::Result<String> {
    let hrp = bech32::Hrp::parse(hrp)?;
    let encode = bech32::encode::<Bech32m>(hrp, uuid7().as_bytes())?;
    Ok(encode)
}

/// A fresh identifier carrying the prefix of its entity kind, e.g. `veh_1...`.
pub(crate) fn new_id(kind: EntityKind) -> crate::error::Result<String> {
    new_uuid_to_bech32(kind.prefix())
        .map_err(|err| crate::error::WorkflowError::Codec(format!("id generation failed: {err}")))
}
