use crate::{
    io_at, FetchedManifest, PackageReference, RegistryBackend, RemoteConfig,
    RemoteError,
};
use airgap_schema::OciDigest;
use airgap_store::oci::{
    MEDIA_TYPE_DOCKER_MANIFEST, MEDIA_TYPE_DOCKER_MANIFEST_LIST, MEDIA_TYPE_IMAGE_INDEX,
    MEDIA_TYPE_IMAGE_MANIFEST,
};
use sha2::{Digest, Sha256};
use std::io::{BufWriter, Read, Write};
use std::path::Path;

const MANIFEST_ACCEPT: [&str; 4] = [
    MEDIA_TYPE_IMAGE_INDEX,
    MEDIA_TYPE_IMAGE_MANIFEST,
    MEDIA_TYPE_DOCKER_MANIFEST_LIST,
    MEDIA_TYPE_DOCKER_MANIFEST,
];

/// Registry client for the OCI distribution API (`/v2/`).
///
/// - `HEAD /v2/<repo>/blobs/<digest>`: existence check
/// - `GET  /v2/<repo>/blobs/<digest>`: download
/// - `POST /v2/<repo>/blobs/uploads/` then `PUT <location>?digest=`: monolithic upload
/// - `GET|PUT /v2/<repo>/manifests/<reference>`
pub struct HttpRegistry {
    base: String,
    auth_token: Option<String>,
    agent: ureq::Agent,
}

impl HttpRegistry {
    /// Client for `registry` (`host[:port]`), over HTTP when `plain_http`.
    pub fn new(registry: &str, plain_http: bool) -> Self {
        let scheme = if plain_http { "http" } else { "https" };
        Self::with_base_url(&format!("{scheme}://{registry}"))
    }

    /// Client for an explicit base URL such as `http://127.0.0.1:5000`.
    pub fn with_base_url(base: &str) -> Self {
        Self {
            base: base.trim_end_matches('/').to_owned(),
            auth_token: None,
            agent: ureq::Agent::new_with_defaults(),
        }
    }

    pub fn for_reference(reference: &PackageReference, config: &RemoteConfig) -> Self {
        let mut registry = Self::new(&reference.registry, config.plain_http);
        registry.auth_token.clone_from(&config.auth_token);
        registry
    }

    #[must_use]
    pub fn with_token(mut self, token: &str) -> Self {
        self.auth_token = Some(token.to_owned());
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base
    }

    fn url(&self, repo: &str, kind: &str, reference: &str) -> String {
        format!("{}/v2/{repo}/{kind}/{reference}", self.base)
    }

    fn absolute(&self, location: &str) -> String {
        if location.starts_with("http://") || location.starts_with("https://") {
            location.to_owned()
        } else {
            format!("{}{location}", self.base)
        }
    }

    fn authorize<B>(&self, req: ureq::RequestBuilder<B>) -> ureq::RequestBuilder<B> {
        match self.auth_token {
            Some(ref token) => req.header("Authorization", &format!("Bearer {token}")),
            None => req,
        }
    }

    fn do_get(
        &self,
        url: &str,
        accept: Option<&str>,
    ) -> Result<ureq::http::Response<ureq::Body>, RemoteError> {
        let mut req = self.authorize(self.agent.get(url));
        if let Some(accept) = accept {
            req = req.header("Accept", accept);
        }
        match req.call() {
            Ok(resp) => Ok(resp),
            Err(ureq::Error::StatusCode(404)) => Err(RemoteError::NotFound(url.to_owned())),
            Err(ureq::Error::StatusCode(code)) => {
                Err(RemoteError::Http(format!("HTTP {code} for GET {url}")))
            }
            Err(e) => Err(RemoteError::Http(e.to_string())),
        }
    }

    fn do_head(&self, url: &str) -> Result<u16, RemoteError> {
        match self.authorize(self.agent.head(url)).call() {
            Ok(resp) => Ok(resp.status().into()),
            Err(ureq::Error::StatusCode(code)) => Ok(code),
            Err(e) => Err(RemoteError::Http(e.to_string())),
        }
    }

    /// Open an upload session and return the URL that completes it.
    fn start_upload(&self, repo: &str, digest: &OciDigest) -> Result<String, RemoteError> {
        let start = format!("{}/v2/{repo}/blobs/uploads/", self.base);
        tracing::debug!("POST {start}");
        let resp = self
            .authorize(self.agent.post(&start))
            .send_empty()
            .map_err(|e| RemoteError::Http(format!("starting upload to {start}: {e}")))?;
        let location = resp
            .headers()
            .get("Location")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| RemoteError::Http(format!("no upload location from {start}")))?;

        let location = self.absolute(location);
        let sep = if location.contains('?') { '&' } else { '?' };
        Ok(format!("{location}{sep}digest={digest}"))
    }

    fn read_body(url: &str, resp: ureq::http::Response<ureq::Body>) -> Result<Vec<u8>, RemoteError> {
        let mut body = Vec::new();
        resp.into_body()
            .into_reader()
            .read_to_end(&mut body)
            .map_err(|e| RemoteError::Http(format!("reading {url}: {e}")))?;
        Ok(body)
    }
}

impl RegistryBackend for HttpRegistry {
    fn has_blob(&self, repo: &str, digest: &OciDigest) -> Result<bool, RemoteError> {
        let url = self.url(repo, "blobs", digest);
        tracing::debug!("HEAD {url}");
        match self.do_head(&url)? {
            200 => Ok(true),
            404 => Ok(false),
            code => Err(RemoteError::Http(format!("HTTP {code} for HEAD {url}"))),
        }
    }

    fn get_blob(&self, repo: &str, digest: &OciDigest) -> Result<Vec<u8>, RemoteError> {
        let url = self.url(repo, "blobs", digest);
        tracing::debug!("GET {url}");
        let resp = self.do_get(&url, None)?;
        Self::read_body(&url, resp)
    }

    fn put_blob(&self, repo: &str, digest: &OciDigest, data: &[u8]) -> Result<(), RemoteError> {
        let url = self.start_upload(repo, digest)?;
        tracing::debug!("PUT {url} ({} bytes)", data.len());
        self.authorize(self.agent.put(&url))
            .header("Content-Type", "application/octet-stream")
            .send(data)
            .map_err(|e| RemoteError::Http(format!("uploading {digest}: {e}")))?;
        Ok(())
    }

    fn get_manifest(&self, repo: &str, reference: &str) -> Result<FetchedManifest, RemoteError> {
        let url = self.url(repo, "manifests", reference);
        tracing::debug!("GET {url}");
        let resp = self.do_get(&url, Some(&MANIFEST_ACCEPT.join(", ")))?;
        let media_type = resp
            .headers()
            .get("Content-Type")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_owned())
            .unwrap_or_default();
        let data = Self::read_body(&url, resp)?;
        Ok(FetchedManifest { media_type, data })
    }

    fn put_manifest(
        &self,
        repo: &str,
        reference: &str,
        media_type: &str,
        data: &[u8],
    ) -> Result<(), RemoteError> {
        let url = self.url(repo, "manifests", reference);
        tracing::debug!("PUT {url} ({} bytes)", data.len());
        self.authorize(self.agent.put(&url))
            .header("Content-Type", media_type)
            .send(data)
            .map_err(|e| RemoteError::Http(format!("pushing manifest {reference}: {e}")))?;
        Ok(())
    }

    /// Streams the file as the upload body instead of buffering it.
    fn push_blob_from(&self, repo: &str, digest: &OciDigest, src: &Path) -> Result<u64, RemoteError> {
        let mut file = std::fs::File::open(src).map_err(io_at(src))?;
        let size = file.metadata().map_err(io_at(src))?.len();
        let url = self.start_upload(repo, digest)?;
        tracing::debug!("PUT {url} ({size} bytes from {})", src.display());
        self.authorize(self.agent.put(&url))
            .header("Content-Type", "application/octet-stream")
            .header("Content-Length", &size.to_string())
            .send(ureq::SendBody::from_reader(&mut file))
            .map_err(|e| RemoteError::Http(format!("uploading {digest}: {e}")))?;
        Ok(size)
    }

    /// Streams the blob to disk instead of buffering it.
    fn fetch_blob_to(&self, repo: &str, digest: &OciDigest, dest: &Path) -> Result<u64, RemoteError> {
        let url = self.url(repo, "blobs", digest);
        tracing::debug!("GET {url} -> {}", dest.display());
        let resp = self.do_get(&url, None)?;
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent).map_err(io_at(parent))?;
        }
        let file = std::fs::File::create(dest).map_err(io_at(dest))?;
        let mut writer = BufWriter::new(file);
        let mut reader = resp.into_body().into_reader();
        let mut hasher = Sha256::new();
        let mut buf = [0u8; 64 * 1024];
        let mut total = 0u64;
        loop {
            let n = reader
                .read(&mut buf)
                .map_err(|e| RemoteError::Http(format!("reading {url}: {e}")))?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            writer.write_all(&buf[..n]).map_err(io_at(dest))?;
            total += n as u64;
        }
        writer.flush().map_err(io_at(dest))?;

        let actual = format!("sha256:{}", hex::encode(hasher.finalize()));
        if actual != digest.as_str() {
            let _ = std::fs::remove_file(dest);
            return Err(RemoteError::DigestMismatch {
                digest: digest.clone(),
                actual,
            });
        }
        Ok(total)
    }
}
