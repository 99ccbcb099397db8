use std::fs::File;

use anyhow::{Context, Result};
use bastion_common::helpers::fs::{ensure_private_parent, secure_file};
use bastion_common::helpers::rng::get_crypto_rng;
use bastion_common::BastionConfig;
use russh::keys::ssh_key::Fingerprint;
use russh::keys::{encode_pkcs8_pem, load_secret_key, Algorithm, HashAlg, PrivateKey, PublicKey};
use tracing::*;

pub fn generate_host_keys(config: &BastionConfig) -> Result<()> {
    let key_path = config.host_key_path();
    ensure_private_parent(&key_path)?;

    if !key_path.exists() {
        info!(path=%key_path.display(), "Generating Ed25519 host key");
        let key = PrivateKey::random(&mut get_crypto_rng(), Algorithm::Ed25519)
            .context("Failed to generate Ed25519 key")?;
        let f = File::create(&key_path)
            .with_context(|| format!("Failed to create {}", key_path.display()))?;
        encode_pkcs8_pem(&key, f)?;
    }
    secure_file(&key_path)?;

    Ok(())
}

pub fn load_host_keys(config: &BastionConfig) -> Result<Vec<PrivateKey>, russh::keys::Error> {
    Ok(vec![load_secret_key(config.host_key_path(), None)?])
}

fn parse_public_keys(lines: &[String]) -> Result<Vec<PublicKey>> {
    lines
        .iter()
        .map(|line| {
            PublicKey::from_openssh(line.trim())
                .with_context(|| format!("Invalid OpenSSH public key: {line:?}"))
        })
        .collect()
}

/// SHA-256 fingerprints of the CA keys trusted to sign user certificates.
pub fn parse_trusted_cas(lines: &[String]) -> Result<Vec<Fingerprint>> {
    Ok(parse_public_keys(lines)?
        .iter()
        .map(|key| key.fingerprint(HashAlg::Sha256))
        .collect())
}

pub fn parse_known_keys(lines: &[String]) -> Result<Vec<PublicKey>> {
    parse_public_keys(lines)
}
