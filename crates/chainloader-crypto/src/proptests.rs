#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use crate::ecdh::{public_key, shared_encryption_key};
    use crate::symmetric::{open, seal};

    proptest! {
        // Sealing never corrupts bytes
        #[test]
        fn test_seal_open_round_trip(
            key in any::<[u8; 32]>(),
            payload in any::<Vec<u8>>()
        ) {
            let blob = seal(&key, &payload).unwrap();
            prop_assert_eq!(open(&key, &blob).unwrap(), payload);
        }

        // Either side can own the private half
        #[test]
        fn test_shared_key_direction_independent(
            a in any::<[u8; 32]>(),
            b in any::<[u8; 32]>()
        ) {
            let a_pub = public_key(&a).unwrap();
            let b_pub = public_key(&b).unwrap();

            let ab = shared_encryption_key(&a, &b_pub);
            let ba = shared_encryption_key(&b, &a_pub);

            if let (Ok(ab), Ok(ba)) = (ab, ba) {
                prop_assert_eq!(ab.as_bytes(), ba.as_bytes());
            }
        }
    }
}
