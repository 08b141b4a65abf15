use rand::{rngs::OsRng, RngCore};
use time::{Duration, OffsetDateTime};

/// Generates a single-use email-verification token: 256 bits from the
/// OS RNG, hex encoded, with an absolute expiry `ttl_minutes` out.
/// Consumption happens in the store (see `User::consume_verification`)
/// so that a token can be spent at most once.
pub fn issue_verification_token(ttl_minutes: i64) -> (String, OffsetDateTime) {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    let token = hex::encode(bytes);
    let expiry = OffsetDateTime::now_utc() + Duration::minutes(ttl_minutes);
    (token, expiry)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_is_64_hex_chars() {
        let (token, _) = issue_verification_token(60);
        assert_eq!(token.len(), 64);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn tokens_are_unique() {
        let (a, _) = issue_verification_token(60);
        let (b, _) = issue_verification_token(60);
        assert_ne!(a, b);
    }

    #[test]
    fn expiry_is_the_requested_window_out() {
        let before = OffsetDateTime::now_utc();
        let (_, expiry) = issue_verification_token(60);
        let after = OffsetDateTime::now_utc();
        assert!(expiry >= before + Duration::minutes(60));
        assert!(expiry <= after + Duration::minutes(60));
    }
}
