//! Request signing
//!
//! Every outbound request carries a `sign`/`ts` header pair: the signature is
//! the hex SHA-256 digest of the shared secret concatenated with the decimal
//! unix timestamp reversed. The collector recomputes the digest from the `ts`
//! header to verify it.

use chrono::Utc;
use sha2::{Digest, Sha256};

/// A computed `sign`/`ts` header pair
#[derive(Debug, Clone)]
pub struct Signature {
    /// Hex SHA-256 digest over secret + reversed timestamp
    pub sign: String,
    /// Decimal unix timestamp, in seconds
    pub ts: String,
}

/// Sign a specific unix timestamp with the given secret
pub fn sign_timestamp(secret: &str, unix_secs: i64) -> Signature {
    let ts = unix_secs.to_string();
    let reversed: String = ts.chars().rev().collect();

    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hasher.update(reversed.as_bytes());

    Signature {
        sign: hex::encode(hasher.finalize()),
        ts,
    }
}

/// Sign the current wall-clock time
pub fn sign_now(secret: &str) -> Signature {
    sign_timestamp(secret, Utc::now().timestamp())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_signature() {
        // sha256("Meilbn_AppStats_" + reverse("1700000000"))
        let sig = sign_timestamp("Meilbn_AppStats_", 1_700_000_000);
        assert_eq!(sig.ts, "1700000000");
        assert_eq!(
            sig.sign,
            "ca9cee2c4efab6cc4302a0b26cc3469e272c98701c51f3e59ddccc25a52457a5"
        );
    }

    #[test]
    fn test_signature_depends_on_timestamp() {
        let a = sign_timestamp("secret", 1_700_000_000);
        let b = sign_timestamp("secret", 1_700_000_001);
        assert_ne!(a.sign, b.sign);
    }

    #[test]
    fn test_signature_depends_on_secret() {
        let a = sign_timestamp("secret-a", 1_700_000_000);
        let b = sign_timestamp("secret-b", 1_700_000_000);
        assert_ne!(a.sign, b.sign);
    }
}
