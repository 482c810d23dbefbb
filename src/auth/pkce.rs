//! PKCE verifier/challenge pair (RFC 7636, S256 method)

use oauth2::{PkceCodeChallenge, PkceCodeVerifier};

/// 32 random bytes, base64url without padding (43 characters).
pub fn generate_verifier() -> String {
    let (_, verifier) = PkceCodeChallenge::new_random_sha256();
    verifier.secret().to_string()
}

/// `BASE64URL(SHA256(verifier))`
pub fn challenge(verifier: &str) -> String {
    PkceCodeChallenge::from_code_verifier_sha256(&PkceCodeVerifier::new(verifier.to_string()))
        .as_str()
        .to_string()
}
