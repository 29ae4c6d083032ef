//! Local identifier minting: pseudo `did:plc` generation for newly created
//! actors.
//!
//! Real `did:plc` identifiers are issued by the PLC directory, an external
//! service this instance doesn't operate. Since registering with that
//! directory is out of scope here, `createAccount` mints a DID of the same
//! shape (`did:plc:` + 24 base32-sortable characters) from a CSPRNG instead
//! of a timestamp-derived `Tid` — there is no directory to keep it globally
//! ordered against, so randomness is simpler and avoids collisions between
//! hosts created in the same microsecond.

use rand::Rng;

const ALPHABET: &[u8] = b"234567abcdefghijklmnopqrstuvwxyz";
const PLC_ID_LEN: usize = 24;

/// Mint a locally-unique `did:plc:...` identifier.
pub fn generate_plc_did() -> String {
    let mut rng = rand::rng();
    let mut id = String::with_capacity(5 + PLC_ID_LEN);
    id.push_str("did:plc:");
    for _ in 0..PLC_ID_LEN {
        let idx = rng.random_range(0..ALPHABET.len());
        id.push(ALPHABET[idx] as char);
    }
    id
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_well_formed_ids() {
        let did = generate_plc_did();
        assert!(did.starts_with("did:plc:"));
        assert_eq!(did.len(), "did:plc:".len() + PLC_ID_LEN);
        assert!(did[8..].chars().all(|c| ALPHABET.contains(&(c as u8))));
    }

    #[test]
    fn ids_are_not_trivially_repeated() {
        let a = generate_plc_did();
        let b = generate_plc_did();
        assert_ne!(a, b);
    }
}
