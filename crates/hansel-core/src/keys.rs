//! Key material helpers shared by the server (host key) and agent (client key)

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use russh_keys::key::{KeyPair, PublicKey};

use crate::error::KeyError;

/// Render a public key fingerprint as `SHA256:<base64>`
pub fn fingerprint(key: &PublicKey) -> String {
    format!("SHA256:{}", key.fingerprint())
}

/// Load a private key from disk
pub fn load_secret_key(path: &Path) -> Result<KeyPair, KeyError> {
    russh_keys::load_secret_key(path, None).map_err(|source| KeyError::Load {
        path: path.to_path_buf(),
        source,
    })
}

/// Load the key at `path`, or generate and persist a new Ed25519 key there
///
/// New keys are written as PKCS#8 PEM, readable only by the owner.
pub fn load_or_generate_key(path: &Path) -> Result<KeyPair, KeyError> {
    if path.exists() {
        tracing::info!("Loading key from {:?}", path);
        return load_secret_key(path);
    }

    tracing::info!("Generating new Ed25519 key at {:?}", path);
    let key = KeyPair::generate_ed25519().ok_or(KeyError::Generate)?;

    let mut pem = Vec::new();
    russh_keys::encode_pkcs8_pem(&key, &mut pem).map_err(KeyError::Encode)?;
    write_private(path, &pem).map_err(|source| KeyError::Write {
        path: path.to_path_buf(),
        source,
    })?;

    Ok(key)
}

fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(path)?;
    file.write_all(contents)?;
    file.sync_all()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_key_is_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys").join("id_ed25519");

        let generated = load_or_generate_key(&path).unwrap();
        assert!(path.exists());

        let reloaded = load_or_generate_key(&path).unwrap();
        assert_eq!(
            fingerprint(&generated.clone_public_key().unwrap()),
            fingerprint(&reloaded.clone_public_key().unwrap())
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_generated_key_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("host_key");
        load_or_generate_key(&path).unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_fingerprint_prefix() {
        let key = KeyPair::generate_ed25519().unwrap();
        let fp = fingerprint(&key.clone_public_key().unwrap());
        assert!(fp.starts_with("SHA256:"));
        assert!(fp.len() > "SHA256:".len());
    }
}
