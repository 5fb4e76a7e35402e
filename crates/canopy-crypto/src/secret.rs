//! Master secret handling.

use std::io::Write;
use std::path::Path;

use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::{CryptoError, CryptoResult};

/// The authority's master secret (32 bytes).
///
/// The secret keys every root derivation. It lives inside the authority's
/// trust boundary and is zeroized on drop; nothing outside
/// `derive_root` should ever read it.
#[derive(ZeroizeOnDrop)]
pub struct MasterSecret {
    bytes: [u8; 32],
}

impl MasterSecret {
    /// Generate a fresh random secret.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        OsRng.fill_bytes(&mut bytes);
        Self { bytes }
    }

    /// Create from existing secret bytes.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidSecretLength`] if the slice is not
    /// exactly 32 bytes.
    pub fn from_bytes(slice: &[u8]) -> CryptoResult<Self> {
        if slice.len() != 32 {
            return Err(CryptoError::InvalidSecretLength {
                expected: 32,
                actual: slice.len(),
            });
        }
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(slice);
        let secret = Self { bytes };
        bytes.zeroize();
        Ok(secret)
    }

    /// Expose the raw secret bytes.
    ///
    /// Only the key scheme's root derivation should call this; treat any
    /// other use as a trust-boundary violation.
    #[must_use]
    pub const fn expose(&self) -> &[u8; 32] {
        &self.bytes
    }

    /// Load an existing secret from a file, or generate and save a new one.
    ///
    /// If the file exists, reads 32 bytes and reconstructs the secret. If
    /// it does not, generates a new secret and writes it atomically with
    /// 0o600 permissions on Unix. Creates parent directories if needed.
    ///
    /// # Security
    ///
    /// - On Unix, uses `O_CREAT | O_EXCL` (atomic create) with mode 0o600
    ///   to prevent TOCTOU races and world-readable windows.
    /// - Refuses to read secret files that are symlinks.
    /// - Read buffers are wrapped in `Zeroizing` so secret material is
    ///   cleared from memory when no longer needed.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::IoError`] on I/O failures or symlink
    /// detection, or [`CryptoError::InvalidSecretLength`] if the file has
    /// the wrong length.
    pub fn load_or_generate(path: impl AsRef<Path>) -> CryptoResult<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| CryptoError::IoError(e.to_string()))?;
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            match std::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .mode(0o600)
                .open(path)
            {
                Ok(mut file) => {
                    let secret = Self::generate();
                    file.write_all(&secret.bytes)
                        .map_err(|e| CryptoError::IoError(e.to_string()))?;
                    return Ok(secret);
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    // Fall through to the read path below.
                }
                Err(e) => return Err(CryptoError::IoError(e.to_string())),
            }
        }

        #[cfg(not(unix))]
        if !path.exists() {
            let secret = Self::generate();
            let mut file =
                std::fs::File::create(path).map_err(|e| CryptoError::IoError(e.to_string()))?;
            file.write_all(&secret.bytes)
                .map_err(|e| CryptoError::IoError(e.to_string()))?;
            return Ok(secret);
        }

        let meta =
            std::fs::symlink_metadata(path).map_err(|e| CryptoError::IoError(e.to_string()))?;
        if meta.file_type().is_symlink() {
            return Err(CryptoError::IoError(
                "refusing to read secret file: path is a symlink".into(),
            ));
        }

        let bytes =
            Zeroizing::new(std::fs::read(path).map_err(|e| CryptoError::IoError(e.to_string()))?);
        Self::from_bytes(&bytes)
    }
}

impl std::fmt::Debug for MasterSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterSecret").finish_non_exhaustive()
    }
}
