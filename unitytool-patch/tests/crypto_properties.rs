//! Property tests for the plan digest and signature primitives.

use proptest::prelude::*;
use unitytool_patch::{hmac_sha256_hex, sha256_hex};

proptest! {
    #[test]
    fn digest_is_deterministic(bytes in proptest::collection::vec(any::<u8>(), 0..2048)) {
        prop_assert_eq!(sha256_hex(&bytes), sha256_hex(&bytes));
    }

    #[test]
    fn digest_is_64_lowercase_hex(bytes in proptest::collection::vec(any::<u8>(), 0..512)) {
        let digest = sha256_hex(&bytes);
        prop_assert_eq!(digest.len(), 64);
        prop_assert!(digest.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase()));
    }

    #[test]
    fn signature_matches_same_key_only(
        bytes in proptest::collection::vec(any::<u8>(), 0..1024),
        key_a in "[a-z0-9]{1,64}",
        key_b in "[a-z0-9]{1,64}",
    ) {
        let sig_a = hmac_sha256_hex(key_a.as_bytes(), &bytes).unwrap();
        let sig_a2 = hmac_sha256_hex(key_a.as_bytes(), &bytes).unwrap();
        prop_assert_eq!(&sig_a, &sig_a2);

        if key_a != key_b {
            let sig_b = hmac_sha256_hex(key_b.as_bytes(), &bytes).unwrap();
            prop_assert_ne!(&sig_a, &sig_b);
        }
    }

    #[test]
    fn signature_differs_from_plain_digest(bytes in proptest::collection::vec(any::<u8>(), 0..1024)) {
        let digest = sha256_hex(&bytes);
        let signature = hmac_sha256_hex(b"key", &bytes).unwrap();
        prop_assert_ne!(digest, signature);
    }
}
