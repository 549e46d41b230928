//! Ed25519 signing of the package definition.
//!
//! The builder and the loader only see the narrow [`PackageSigner`] and
//! [`PackageVerifier`] capabilities. Keys are TOML files holding a base64 key
//! and a short key id; `zarf.yaml.sig` holds the raw 64-byte signature of
//! the exact `zarf.yaml` bytes.

use crate::{io_at, write_atomic, SignatureError, StoreError, PACKAGE_DEFINITION, SIGNATURE};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const ALGORITHM: &str = "ed25519";

pub trait PackageSigner {
    fn sign(&self, blob: &[u8]) -> Result<Vec<u8>, SignatureError>;
}

pub trait PackageVerifier {
    fn verify(&self, blob: &[u8], signature: &[u8]) -> Result<(), SignatureError>;
}

#[derive(Debug, Serialize, Deserialize)]
struct KeyFile {
    algorithm: String,
    key: String,
    #[serde(default)]
    key_id: Option<String>,
}

impl KeyFile {
    fn load(path: &Path) -> Result<(Self, [u8; 32]), StoreError> {
        let invalid = |reason: String| SignatureError::InvalidKey {
            path: path.to_path_buf(),
            reason,
        };
        let content = fs::read_to_string(path).map_err(io_at(path))?;
        let file: Self = toml::from_str(&content).map_err(|e| invalid(e.to_string()))?;
        if file.algorithm != ALGORITHM {
            return Err(invalid(format!("unsupported algorithm '{}'", file.algorithm)).into());
        }
        let bytes = BASE64
            .decode(&file.key)
            .map_err(|e| invalid(format!("invalid base64: {e}")))?;
        let key: [u8; 32] = bytes
            .try_into()
            .map_err(|_| invalid("key must be 32 bytes".to_owned()))?;
        Ok((file, key))
    }

    fn save(&self, path: &Path) -> Result<(), StoreError> {
        let text = toml::to_string_pretty(self).map_err(|e| SignatureError::InvalidKey {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        write_atomic(path, text.as_bytes())
    }
}

/// Short identifier of a public key: the first 8 bytes of its SHA-256, hex.
fn key_id_for(key: &VerifyingKey) -> String {
    hex::encode(&Sha256::digest(key.as_bytes())[..8])
}

/// An ed25519 key pair able to sign package definitions.
pub struct SigningKeyPair {
    signing_key: SigningKey,
    key_id: String,
}

impl SigningKeyPair {
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        let key_id = key_id_for(&signing_key.verifying_key());
        Self {
            signing_key,
            key_id,
        }
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey {
            key: self.signing_key.verifying_key(),
            key_id: self.key_id.clone(),
        }
    }

    /// Load a private key file.
    pub fn load(path: &Path) -> Result<Self, StoreError> {
        let (file, bytes) = KeyFile::load(path)?;
        let signing_key = SigningKey::from_bytes(&bytes);
        let key_id = file
            .key_id
            .unwrap_or_else(|| key_id_for(&signing_key.verifying_key()));
        Ok(Self {
            signing_key,
            key_id,
        })
    }

    /// Write `<stem>.key` (mode 0600) and `<stem>.pub` next to each other.
    pub fn save(&self, private_path: &Path, public_path: &Path) -> Result<(), StoreError> {
        KeyFile {
            algorithm: ALGORITHM.to_owned(),
            key: BASE64.encode(self.signing_key.to_bytes()),
            key_id: Some(self.key_id.clone()),
        }
        .save(private_path)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(private_path, fs::Permissions::from_mode(0o600))
                .map_err(io_at(private_path))?;
        }

        self.public_key().save(public_path)?;
        info!("saved key {} to {}", self.key_id, private_path.display());
        Ok(())
    }
}

impl PackageSigner for SigningKeyPair {
    fn sign(&self, blob: &[u8]) -> Result<Vec<u8>, SignatureError> {
        Ok(self.signing_key.sign(blob).to_bytes().to_vec())
    }
}

/// An ed25519 public key used to verify package signatures.
#[derive(Debug, Clone)]
pub struct PublicKey {
    key: VerifyingKey,
    key_id: String,
}

impl PublicKey {
    pub fn load(path: &Path) -> Result<Self, StoreError> {
        let (file, bytes) = KeyFile::load(path)?;
        let key = VerifyingKey::from_bytes(&bytes).map_err(|e| SignatureError::InvalidKey {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let key_id = file.key_id.unwrap_or_else(|| key_id_for(&key));
        Ok(Self { key, key_id })
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        KeyFile {
            algorithm: ALGORITHM.to_owned(),
            key: BASE64.encode(self.key.as_bytes()),
            key_id: Some(self.key_id.clone()),
        }
        .save(path)
    }
}

impl PackageVerifier for PublicKey {
    fn verify(&self, blob: &[u8], signature: &[u8]) -> Result<(), SignatureError> {
        let sig = Signature::from_slice(signature)
            .map_err(|e| SignatureError::Mismatch(format!("malformed signature: {e}")))?;
        self.key
            .verify_strict(blob, &sig)
            .map_err(|e| SignatureError::Mismatch(e.to_string()))
    }
}

/// Sign `<dir>/zarf.yaml` and write `<dir>/zarf.yaml.sig`.
pub fn sign_definition(dir: &Path, signer: &dyn PackageSigner) -> Result<PathBuf, StoreError> {
    let def = dir.join(PACKAGE_DEFINITION);
    let blob = fs::read(&def).map_err(io_at(&def))?;
    let sig = signer.sign(&blob)?;
    let dest = dir.join(SIGNATURE);
    write_atomic(&dest, &sig)?;
    debug!("wrote signature {}", dest.display());
    Ok(dest)
}

/// Check the detached signature of `<dir>/zarf.yaml`.
///
/// | signature | key | outcome |
/// |-----------|-----|---------|
/// | absent    | no  | ok |
/// | present   | no  | [`SignatureError::SignedButNoKey`] |
/// | absent    | yes | [`SignatureError::KeyButNotSigned`] |
/// | present   | yes | verify, [`SignatureError::Mismatch`] on failure |
pub fn verify_definition(dir: &Path, verifier: Option<&dyn PackageVerifier>) -> Result<(), StoreError> {
    let sig_path = dir.join(SIGNATURE);
    let signed = sig_path.is_file();
    match (signed, verifier) {
        (false, None) => Ok(()),
        (true, None) => Err(SignatureError::SignedButNoKey.into()),
        (false, Some(_)) => Err(SignatureError::KeyButNotSigned.into()),
        (true, Some(verifier)) => {
            let sig = fs::read(&sig_path).map_err(io_at(&sig_path))?;
            let def = dir.join(PACKAGE_DEFINITION);
            let blob = fs::read(&def).map_err(io_at(&def))?;
            verifier.verify(&blob, &sig)?;
            debug!("signature verified for {}", dir.display());
            Ok(())
        }
    }
}
