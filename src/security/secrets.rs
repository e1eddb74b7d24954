// file: src/security/secrets.rs
// version: 1.0.0
// guid: q7r8s9t0-u1v2-3456-7890-123456qrstuv

//! Random secret generation and restricted-permission secret files

use rand::distributions::Alphanumeric;
use rand::{Rng, RngCore};
use sha2::{Digest, Sha256};
use std::path::Path;
use tokio::io::AsyncWriteExt;

use crate::Result;

use super::validation::PSK_LENGTH;

/// Generate a random alphanumeric password for the log reader account
pub fn generate_password(length: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}

/// Generate a hex pre-shared key of exactly `PSK_LENGTH` characters
pub fn generate_psk() -> String {
    let mut bytes = [0u8; PSK_LENGTH / 2];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Hex sha256 of a document, used to fingerprint rendered configuration
pub fn sha256_hex(content: &[u8]) -> String {
    hex::encode(Sha256::digest(content))
}

/// Write `content` to `path` so it is never readable beyond `mode`.
///
/// New files are created with `mode`; an existing file is narrowed to
/// `mode` before being truncated and rewritten.
pub async fn write_restricted(path: &Path, content: &[u8], mode: u32) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Ok(metadata) = tokio::fs::metadata(path).await {
            let mut perms = metadata.permissions();
            perms.set_mode(mode);
            tokio::fs::set_permissions(path, perms).await?;
        }
    }

    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        options.mode(mode);
    }
    #[cfg(not(unix))]
    {
        let _ = mode;
    }

    let mut file = options.open(path).await?;
    file.write_all(content).await?;
    file.flush().await?;
    Ok(())
}
