//! Content identifier helpers.
//!
//! Spot checks compare the CID a validator computed from fetched bytes with the
//! CID the coordinator expects. The two may use different versions or string
//! encodings for the same content, so both sides are normalized to CIDv1 with
//! the original codec and multihash before comparing.

use crate::error::{EdgeError, Result};
use ::cid::multihash::Multihash;
use ::cid::Cid;
use sha2::{Digest, Sha256};

/// Multicodec code of raw binary blocks.
pub const RAW_CODEC: u64 = 0x55;

/// Multicodec code of DAG-PB blocks.
pub const DAG_PB_CODEC: u64 = 0x70;

/// Multihash code of sha2-256.
const SHA2_256: u64 = 0x12;

/// Parse a CID string of any version or base.
pub fn parse(s: &str) -> Result<Cid> {
    Cid::try_from(s).map_err(|e| EdgeError::InvalidCid {
        cid: s.to_string(),
        reason: e.to_string(),
    })
}

/// Normalize a CID string to CIDv1 with the same codec and multihash.
pub fn canonicalize(s: &str) -> Result<Cid> {
    let parsed = parse(s)?;
    Ok(Cid::new_v1(parsed.codec(), *parsed.hash()))
}

/// Whether two CID strings name the same content.
pub fn same_content(a: &str, b: &str) -> Result<bool> {
    Ok(canonicalize(a)? == canonicalize(b)?)
}

/// Compute the CIDv1 (raw codec, sha2-256) of a block of bytes.
pub fn cid_from_data(data: &[u8]) -> Result<String> {
    let digest = Sha256::digest(data);
    let hash = Multihash::<64>::wrap(SHA2_256, &digest)
        .map_err(|e| EdgeError::Internal(format!("multihash wrap failed: {}", e)))?;
    Ok(Cid::new_v1(RAW_CODEC, hash).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sha256_multihash(data: &[u8]) -> Multihash<64> {
        Multihash::<64>::wrap(SHA2_256, &Sha256::digest(data)).unwrap()
    }

    #[test]
    fn test_cid_from_data_is_deterministic() {
        let a = cid_from_data(b"block payload").unwrap();
        let b = cid_from_data(b"block payload").unwrap();
        assert_eq!(a, b);
        assert!(a.starts_with('b'));
        assert_ne!(a, cid_from_data(b"other payload").unwrap());
    }

    #[test]
    fn test_v0_and_v1_name_same_content() {
        let mh = sha256_multihash(b"dag node");
        let v0 = Cid::new_v0(mh).unwrap().to_string();
        let v1 = Cid::new_v1(DAG_PB_CODEC, mh).to_string();

        assert_ne!(v0, v1);
        assert!(v0.starts_with("Qm"));
        assert!(same_content(&v0, &v1).unwrap());
    }

    #[test]
    fn test_codec_is_part_of_identity() {
        let mh = sha256_multihash(b"dag node");
        let pb = Cid::new_v1(DAG_PB_CODEC, mh).to_string();
        let raw = Cid::new_v1(RAW_CODEC, mh).to_string();
        assert!(!same_content(&pb, &raw).unwrap());
    }

    #[test]
    fn test_invalid_cid() {
        let err = canonicalize("not-a-cid").unwrap_err();
        assert!(matches!(err, EdgeError::InvalidCid { .. }));
    }
}
