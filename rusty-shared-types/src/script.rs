//! Minimal script opcodes and script recognizers.
//!
//! PrivateSend only ever needs to build and recognise standard P2PKH
//! outputs and `OP_RETURN` burns; a full script interpreter is out of scope
//! (the wallet/consensus layer owns that).

pub const OP_DUP: u8 = 0x76;
pub const OP_HASH160: u8 = 0xa9;
pub const OP_EQUALVERIFY: u8 = 0x88;
pub const OP_CHECKSIG: u8 = 0xac;
pub const OP_RETURN: u8 = 0x6a;
pub const OP_PUSHDATA_20: u8 = 0x14;

/// Builds a standard `OP_DUP OP_HASH160 <20> OP_EQUALVERIFY OP_CHECKSIG` script.
pub fn p2pkh_script(pubkey_hash: &[u8; 20]) -> Vec<u8> {
    let mut script = Vec::with_capacity(25);
    script.push(OP_DUP);
    script.push(OP_HASH160);
    script.push(OP_PUSHDATA_20);
    script.extend_from_slice(pubkey_hash);
    script.push(OP_EQUALVERIFY);
    script.push(OP_CHECKSIG);
    script
}

/// Recognises a P2PKH script and extracts the embedded pubkey hash.
pub fn p2pkh_pubkey_hash(script: &[u8]) -> Option<[u8; 20]> {
    if script.len() == 25
        && script[0] == OP_DUP
        && script[1] == OP_HASH160
        && script[2] == OP_PUSHDATA_20
        && script[23] == OP_EQUALVERIFY
        && script[24] == OP_CHECKSIG
    {
        let mut hash = [0u8; 20];
        hash.copy_from_slice(&script[3..23]);
        Some(hash)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn p2pkh_round_trip() {
        let hash = [7u8; 20];
        let script = p2pkh_script(&hash);
        assert_eq!(p2pkh_pubkey_hash(&script), Some(hash));
    }

    #[test]
    fn op_return_is_not_p2pkh() {
        assert_eq!(p2pkh_pubkey_hash(&[OP_RETURN]), None);
    }
}
