use crate::error::Result;
use blake3::Hasher;

/// Identity the export client presents when authenticating on a channel.
pub const CLIENT_IDENTITY: &str = "bdx-export";

/// Fresh per-run channel secret:
/// secret = hex(blake3(account || 0 || game || 0 || nonce32))
pub fn generate_shared_secret(account: &str, game: &str) -> Result<String> {
    let mut nonce = [0u8; 32];
    getrandom::getrandom(&mut nonce)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
    let mut h = Hasher::new();
    h.update(account.as_bytes());
    h.update(&[0]);
    h.update(game.as_bytes());
    h.update(&[0]);
    h.update(&nonce);
    Ok(hex::encode(h.finalize().as_bytes()))
}

/// Credential for a channel: keyed blake3 of the client identity, keyed by
/// blake3(shared_secret). Both sides can compute it; the secret never travels.
pub fn derive_credential(shared_secret: &str, client_identity: &str) -> String {
    let key = blake3::hash(shared_secret.as_bytes());
    let mac = blake3::keyed_hash(key.as_bytes(), client_identity.as_bytes());
    hex::encode(mac.as_bytes())
}
