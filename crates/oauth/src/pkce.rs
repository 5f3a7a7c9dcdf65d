use {
    base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD},
    rand::Rng,
    sha2::{Digest, Sha256},
};

use crate::types::PkceChallenge;

/// RFC 7636 unreserved characters.
const VERIFIER_CHARSET: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-._~";

pub const MIN_VERIFIER_LEN: usize = 43;
pub const MAX_VERIFIER_LEN: usize = 128;

#[derive(Debug, thiserror::Error)]
#[error("PKCE verifier length must be between 43 and 128, got {0}")]
pub struct InvalidVerifierLength(pub usize);

/// Generate a random code verifier of `len` unreserved characters.
pub fn generate_code_verifier(len: usize) -> Result<String, InvalidVerifierLength> {
    if !(MIN_VERIFIER_LEN..=MAX_VERIFIER_LEN).contains(&len) {
        return Err(InvalidVerifierLength(len));
    }
    Ok(random_verifier(len))
}

fn random_verifier(len: usize) -> String {
    let mut rng = rand::rng();
    (0..len)
        .map(|_| VERIFIER_CHARSET[rng.random_range(0..VERIFIER_CHARSET.len())] as char)
        .collect()
}

/// S256 challenge: `BASE64URL-NOPAD(SHA256(verifier))`.
pub fn generate_code_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

impl PkceChallenge {
    /// Fresh pair with a maximum-length verifier.
    pub fn generate() -> Self {
        let verifier = random_verifier(MAX_VERIFIER_LEN);
        let challenge = generate_code_challenge(&verifier);
        Self {
            verifier,
            challenge,
        }
    }

    pub fn method(&self) -> &'static str {
        "S256"
    }
}
