use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// A freshly generated PKCE verifier/challenge pair, used both by our own
/// `/authorize` flow and by the upstream brokerage bridge (§4.5).
pub struct PkcePair {
    pub verifier: String,
    pub challenge: String,
}

pub fn generate() -> PkcePair {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    let verifier = URL_SAFE_NO_PAD.encode(bytes);
    let challenge = challenge_for(&verifier);
    PkcePair { verifier, challenge }
}

pub fn challenge_for(verifier: &str) -> String {
    let digest = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(digest)
}

/// Constant-time comparison so a timing side-channel can't leak how many
/// leading bytes of a guessed verifier were correct.
pub fn verify(verifier: &str, expected_challenge: &str) -> bool {
    let computed = challenge_for(verifier);
    computed.as_bytes().ct_eq(expected_challenge.as_bytes()).into()
}

pub fn generate_state() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

pub fn generate_code() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verifier_matches_its_own_challenge() {
        let pair = generate();
        assert!(verify(&pair.verifier, &pair.challenge));
    }

    #[test]
    fn wrong_verifier_fails() {
        let pair = generate();
        assert!(!verify("not-the-real-verifier", &pair.challenge));
    }

    #[test]
    fn known_vector_matches_spec_example() {
        // From the spec's literal end-to-end scenario.
        let verifier = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
        let challenge = "E9Melhoa2OwvFrEMTJguCHaoeK1tj6yu8SH4YtYzLg4";
        assert!(verify(verifier, challenge));
    }

    #[test]
    fn generated_values_are_unique() {
        let a = generate_state();
        let b = generate_state();
        assert_ne!(a, b);
    }
}
