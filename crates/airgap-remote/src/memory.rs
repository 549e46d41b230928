use crate::{verify_digest, FetchedManifest, RegistryBackend, RemoteError};
use airgap_schema::OciDigest;
use airgap_store::sha256_bytes;
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Default)]
struct State {
    blobs: HashMap<(String, String), Vec<u8>>,
    manifests: HashMap<(String, String), FetchedManifest>,
    blob_gets: usize,
}

/// A registry held entirely in memory.
///
/// Manifests pushed by tag are also addressable by their digest, like a real
/// registry. Used by tests and dry runs.
#[derive(Default)]
pub struct MemoryRegistry {
    state: Mutex<State>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, State>, RemoteError> {
        self.state
            .lock()
            .map_err(|e| RemoteError::Http(format!("mutex poisoned: {e}")))
    }

    /// Number of blob downloads served so far.
    pub fn blob_fetches(&self) -> usize {
        self.lock().map_or(0, |s| s.blob_gets)
    }

    pub fn blob_count(&self, repo: &str) -> usize {
        self.lock()
            .map_or(0, |s| s.blobs.keys().filter(|(r, _)| r == repo).count())
    }
}

impl RegistryBackend for MemoryRegistry {
    fn has_blob(&self, repo: &str, digest: &OciDigest) -> Result<bool, RemoteError> {
        let key = (repo.to_owned(), digest.to_string());
        Ok(self.lock()?.blobs.contains_key(&key))
    }

    fn get_blob(&self, repo: &str, digest: &OciDigest) -> Result<Vec<u8>, RemoteError> {
        let mut state = self.lock()?;
        state.blob_gets += 1;
        state
            .blobs
            .get(&(repo.to_owned(), digest.to_string()))
            .cloned()
            .ok_or_else(|| RemoteError::NotFound(format!("{repo}@{digest}")))
    }

    fn put_blob(&self, repo: &str, digest: &OciDigest, data: &[u8]) -> Result<(), RemoteError> {
        verify_digest(digest, data)?;
        self.lock()?
            .blobs
            .insert((repo.to_owned(), digest.to_string()), data.to_vec());
        Ok(())
    }

    fn get_manifest(&self, repo: &str, reference: &str) -> Result<FetchedManifest, RemoteError> {
        self.lock()?
            .manifests
            .get(&(repo.to_owned(), reference.to_owned()))
            .cloned()
            .ok_or_else(|| RemoteError::NotFound(format!("{repo}:{reference}")))
    }

    fn put_manifest(
        &self,
        repo: &str,
        reference: &str,
        media_type: &str,
        data: &[u8],
    ) -> Result<(), RemoteError> {
        let manifest = FetchedManifest {
            media_type: media_type.to_owned(),
            data: data.to_vec(),
        };
        let digest = sha256_bytes(data).to_digest().to_string();
        let mut state = self.lock()?;
        state
            .manifests
            .insert((repo.to_owned(), digest), manifest.clone());
        state
            .manifests
            .insert((repo.to_owned(), reference.to_owned()), manifest);
        Ok(())
    }
}
