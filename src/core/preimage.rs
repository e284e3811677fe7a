//! Preimage serialization
//!
//! The preimage is the exact byte string the network validator re-derives
//! from a submitted nonce, so every input must be carried byte-for-byte:
//!
//! `nonce(16 hex) ‖ address ‖ challenge_id ‖ difficulty(8 hex) ‖
//!  no_pre_mine ‖ latest_submission ‖ no_pre_mine_hour(decimal ASCII)`
//!
//! No separators, no padding, no trimming.

use crate::core::challenge::ChallengeSnapshot;
use crate::core::nonce::Nonce;

/// Serialize the preimage for one nonce against a frozen snapshot
pub fn serialize_preimage(nonce: Nonce, address: &str, snapshot: &ChallengeSnapshot) -> Vec<u8> {
    let hour = snapshot.no_pre_mine_hour.to_string();
    let mut preimage = Vec::with_capacity(
        16 + address.len()
            + snapshot.challenge_id.len()
            + 8
            + snapshot.no_pre_mine.len()
            + snapshot.latest_submission.len()
            + hour.len(),
    );
    preimage.extend_from_slice(nonce.to_hex().as_bytes());
    preimage.extend_from_slice(address.as_bytes());
    preimage.extend_from_slice(snapshot.challenge_id.as_bytes());
    preimage.extend_from_slice(snapshot.difficulty.as_hex().as_bytes());
    preimage.extend_from_slice(snapshot.no_pre_mine.as_bytes());
    preimage.extend_from_slice(snapshot.latest_submission.as_bytes());
    preimage.extend_from_slice(hour.as_bytes());
    preimage
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::challenge::Difficulty;

    fn snapshot() -> ChallengeSnapshot {
        ChallengeSnapshot {
            challenge_id: "ch-0001".to_string(),
            difficulty: Difficulty::from_hex("0fffffff").unwrap(),
            no_pre_mine: "a1b2c3d4".to_string(),
            no_pre_mine_hour: 7,
            latest_submission: "00ff00ff".to_string(),
        }
    }

    #[test]
    fn test_preimage_layout() {
        let preimage = serialize_preimage(Nonce::new(0xabc), "addr1", &snapshot());
        assert_eq!(
            preimage,
            b"0000000000000abcaddr1ch-00010fffffffa1b2c3d400ff00ff7".to_vec()
        );
    }

    #[test]
    fn test_preimage_is_deterministic() {
        let s = snapshot();
        let a = serialize_preimage(Nonce::new(42), "addr1", &s);
        let b = serialize_preimage(Nonce::new(42), "addr1", &s);
        assert_eq!(a, b);
    }

    #[test]
    fn test_preimage_carries_every_input() {
        let base = serialize_preimage(Nonce::new(42), "addr1", &snapshot());

        let mut s = snapshot();
        s.latest_submission = "11111111".to_string();
        assert_ne!(base, serialize_preimage(Nonce::new(42), "addr1", &s));

        let mut s = snapshot();
        s.no_pre_mine_hour = 8;
        assert_ne!(base, serialize_preimage(Nonce::new(42), "addr1", &s));

        assert_ne!(base, serialize_preimage(Nonce::new(43), "addr1", &snapshot()));
        assert_ne!(base, serialize_preimage(Nonce::new(42), "addr2", &snapshot()));
    }

    #[test]
    fn test_hour_is_decimal_ascii() {
        let mut s = snapshot();
        s.no_pre_mine_hour = 23;
        let preimage = serialize_preimage(Nonce::new(0), "a", &s);
        assert!(preimage.ends_with(b"23"));
        // No zero padding on the hour.
        assert!(!preimage.ends_with(b"023"));
    }
}
