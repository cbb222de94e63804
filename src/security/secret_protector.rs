// Secret encryption for values held in the wizard session.
//
// Database and mail passwords are sealed with AES-256-GCM before they are written to the
// session and opened only when the install plan or a connection test needs them.
// The master key is lazily created in a key file next to the installer logs.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use anyhow::{Context, Result};
use base64::Engine;
use ring::rand::{SecureRandom, SystemRandom};
use std::path::{Path, PathBuf};
use tokio::sync::OnceCell;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;

const ENC_PREFIX: &str = "ENCv1:";
const KEY_BYTES: usize = 32;
const NONCE_BYTES: usize = 12;

#[derive(Debug)]
pub struct SecretProtector {
    key_path: Option<PathBuf>,
    key: OnceCell<[u8; KEY_BYTES]>,
}

impl SecretProtector {
    /// File-backed key: created on first use, reloaded on restart.
    pub fn new(key_path: PathBuf) -> Self {
        Self {
            key_path: Some(key_path),
            key: OnceCell::new(),
        }
    }

    /// Process-lifetime key that is never persisted.
    pub fn ephemeral() -> Self {
        Self {
            key_path: None,
            key: OnceCell::new(),
        }
    }

    pub fn is_encrypted(&self, value: &str) -> bool {
        value.starts_with(ENC_PREFIX)
    }

    pub async fn encrypt(&self, plaintext: &str) -> Result<String> {
        if plaintext.is_empty() {
            return Ok(ENC_PREFIX.to_string());
        }

        let cipher = self.cipher().await?;

        let mut nonce_bytes = [0u8; NONCE_BYTES];
        SystemRandom::new()
            .fill(&mut nonce_bytes)
            .map_err(|_| anyhow::anyhow!("Failed to generate nonce"))?;

        let nonce = Nonce::from_slice(&nonce_bytes);
        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| anyhow::anyhow!("Secret encryption failed"))?;

        // nonce || ciphertext (ciphertext carries the GCM tag)
        let mut blob = Vec::with_capacity(NONCE_BYTES + ciphertext.len());
        blob.extend_from_slice(&nonce_bytes);
        blob.extend_from_slice(&ciphertext);

        Ok(format!(
            "{}{}",
            ENC_PREFIX,
            base64::engine::general_purpose::STANDARD.encode(blob)
        ))
    }

    pub async fn decrypt(&self, value: &str) -> Result<String> {
        if !self.is_encrypted(value) {
            anyhow::bail!("Secret is not sealed; refusing to use a plaintext session value");
        }

        let encoded = value.trim_start_matches(ENC_PREFIX);
        if encoded.is_empty() {
            return Ok(String::new());
        }

        let blob = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .context("Failed to base64-decode encrypted secret")?;

        if blob.len() < NONCE_BYTES {
            anyhow::bail!("Encrypted secret blob is too short");
        }

        let (nonce_bytes, ciphertext) = blob.split_at(NONCE_BYTES);
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext = self
            .cipher()
            .await?
            .decrypt(nonce, ciphertext)
            .map_err(|_| anyhow::anyhow!("Secret decryption failed"))?;
        String::from_utf8(plaintext).context("Decrypted secret is not valid UTF-8")
    }

    async fn cipher(&self) -> Result<Aes256Gcm> {
        let key = self.get_or_init_key().await?;
        Aes256Gcm::new_from_slice(key)
            .map_err(|_| anyhow::anyhow!("Internal error: invalid AES-256 key length"))
    }

    async fn get_or_init_key(&self) -> Result<&[u8; KEY_BYTES]> {
        self.key
            .get_or_try_init(|| async {
                match &self.key_path {
                    Some(path) => load_or_create_key(path).await,
                    None => generate_key(),
                }
            })
            .await
    }
}

fn generate_key() -> Result<[u8; KEY_BYTES]> {
    let mut key = [0u8; KEY_BYTES];
    SystemRandom::new()
        .fill(&mut key)
        .map_err(|_| anyhow::anyhow!("Failed to generate secret key"))?;
    Ok(key)
}

async fn load_or_create_key(path: &Path) -> Result<[u8; KEY_BYTES]> {
    if tokio::fs::try_exists(path).await.unwrap_or(false) {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read secret key file: {:?}", path))?;

        let decoded = base64::engine::general_purpose::STANDARD
            .decode(bytes.trim_ascii())
            .context("Failed to decode secret key file (base64)")?;

        if decoded.len() != KEY_BYTES {
            anyhow::bail!("Secret key file has invalid length (expected {KEY_BYTES} bytes)");
        }

        let mut key = [0u8; KEY_BYTES];
        key.copy_from_slice(&decoded);
        return Ok(key);
    }

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create secret key directory: {:?}", parent))?;
    }

    let key = generate_key()?;
    let encoded = base64::engine::general_purpose::STANDARD.encode(key);

    let write_action = || async {
        // create_new so two installers never clobber each other's key
        let mut opts = tokio::fs::OpenOptions::new();
        opts.write(true).create_new(true);
        #[cfg(unix)]
        opts.mode(0o600);
        let mut file = opts
            .open(path)
            .await
            .with_context(|| format!("Failed to create secret key file: {:?}", path))?;
        use tokio::io::AsyncWriteExt;
        file.write_all(encoded.as_bytes()).await?;
        file.flush().await?;
        Ok::<(), anyhow::Error>(())
    };

    let retry_strategy = ExponentialBackoff::from_millis(50)
        .factor(2)
        .max_delay(std::time::Duration::from_millis(750))
        .take(3)
        .map(jitter);

    if let Err(e) = RetryIf::spawn(
        retry_strategy,
        write_action,
        crate::installation::files::is_transient_fs_error,
    )
    .await
    {
        // The in-memory key still serves this run; sealed values just won't survive a restart.
        log::warn!(
            "[PHASE: initialization] [STEP: secrets] Could not persist secret key {:?}: {}",
            path,
            e
        );
    }

    Ok(key)
}

/// Default key path under a log folder.
pub fn default_key_path(log_folder: &Path) -> PathBuf {
    log_folder.join("secrets").join("installer_master_key.b64")
}
