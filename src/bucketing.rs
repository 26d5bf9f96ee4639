use sha2::{Digest, Sha256};

/// Modulus for rule rollouts: buckets 0..=9999, compared against passPercentage * 100.
pub(crate) const ROLLOUT_MODULUS: u64 = 10_000;

/// Modulus for user_bucket conditions: buckets 0..=999.
pub(crate) const USER_BUCKET_MODULUS: u64 = 1_000;

/// Deterministically bucket `input` into the range [0, modulus).
///
/// The digest algorithm and byte order are part of the wire protocol: hash the UTF-8 bytes
/// with SHA-256 and read the first 8 digest bytes as a big-endian unsigned integer. Changing
/// either would silently reassign every user's bucket.
pub(crate) fn bucket(input: &str, modulus: u64) -> u64 {
    let digest = Sha256::digest(input.as_bytes());
    let prefix = u64::from_be_bytes(digest[..8].try_into().expect("digest is 32 bytes"));
    prefix % modulus
}

/// The rollout decision for a matched rule: hash "salt.ruleID.unitID" and admit the user
/// when their bucket falls below the rule's pass percentage.
pub(crate) fn rollout_passes(
    salt: &str,
    rule_id: &str,
    unit_id: &str,
    pass_percentage: f64,
) -> bool {
    let input = format!("{}.{}.{}", salt, rule_id, unit_id);
    (bucket(&input, ROLLOUT_MODULUS) as f64) < pass_percentage * 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::proptest;

    #[test]
    fn bucketing_is_deterministic() {
        assert_eq!(
            bucket("salt.rule_1.user-a", ROLLOUT_MODULUS),
            bucket("salt.rule_1.user-a", ROLLOUT_MODULUS)
        );
    }

    #[test]
    fn distinct_inputs_get_distinct_digests() {
        // Compared under the widest modulus so bucket collisions cannot mask digest
        // differences.
        let wide = u64::MAX;
        assert_ne!(bucket("salt.rule_1.user-a", wide), bucket("salt.rule_1.user-b", wide));
        assert_ne!(bucket("salt.rule_1.user-a", wide), bucket("salt.rule_2.user-a", wide));
        assert_ne!(bucket("salt.rule_1.user-a", wide), bucket("other.rule_1.user-a", wide));
    }

    #[test]
    fn full_rollout_admits_everyone() {
        for user in ["alice", "bob", "carol", "dave", ""] {
            assert!(rollout_passes("salt", "rule_1", user, 100.0));
        }
    }

    #[test]
    fn zero_rollout_admits_no_one() {
        for user in ["alice", "bob", "carol", "dave", ""] {
            assert!(!rollout_passes("salt", "rule_1", user, 0.0));
        }
    }

    proptest! {
        #[test]
        fn bucket_stays_within_modulus(input in "\\PC*", modulus in 1u64..1_000_000) {
            assert!(bucket(&input, modulus) < modulus);
        }

        // A user admitted at some percentage stays admitted at every higher percentage, so
        // ramping a rollout up never flips anyone back off.
        #[test]
        fn raising_pass_percentage_never_revokes(
            salt in "[a-z]{1,12}",
            rule_id in "[a-zA-Z0-9_]{1,12}",
            unit_id in "[a-z0-9-]{1,16}",
            a in 0.0f64..=100.0,
            b in 0.0f64..=100.0,
        ) {
            let (low, high) = if a <= b { (a, b) } else { (b, a) };
            if rollout_passes(&salt, &rule_id, &unit_id, low) {
                assert!(rollout_passes(&salt, &rule_id, &unit_id, high));
            }
        }
    }
}
