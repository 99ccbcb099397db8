use rand_chacha::ChaCha20Rng;

/// RNG for key material and session secrets.
pub fn get_crypto_rng() -> ChaCha20Rng {
    rand::make_rng()
}
