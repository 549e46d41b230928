//! Reference OCI registry serving the subset of the distribution API that
//! airgap pushes and pulls through.
//!
//! Storage is file-backed under `data_dir`: blobs and manifests alike live
//! at `blobs/sha256/<hex>`, the media type a manifest was pushed with sits
//! next to it in `manifests/<hex>.type`, and `repositories/<repo>/tags/<tag>`
//! holds the digest a tag points at. Uploads are monolithic: `POST
//! .../blobs/uploads/` opens a session and a `PUT ...?digest=` carries the
//! bytes, which are checked against the digest before they are stored.
//!
//! [`TestServer`] starts a server on a random port for integration testing.

use airgap_schema::OciDigest;
use airgap_store::{sha256_bytes, write_atomic, StoreError};
use serde_json::json;
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tiny_http::{Header, Method, Request, Response, Server, StatusCode};
use tracing::{debug, error, info, warn};

const DIGEST_PREFIX: &str = "sha256:";
const MANIFEST_FALLBACK_TYPE: &str = "application/vnd.oci.image.manifest.v1+json";

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },
    #[error("cannot bind {addr}: {reason}")]
    Bind { addr: String, reason: String },
}

fn io_at(path: &Path) -> impl FnOnce(std::io::Error) -> RegistryError + '_ {
    move |source| RegistryError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn store_file(path: &Path, data: &[u8]) -> Result<(), RegistryError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_at(parent))?;
    }
    Ok(write_atomic(path, data)?)
}

/// A manifest as stored: media type, bytes, and content digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredManifest {
    pub media_type: String,
    pub data: Vec<u8>,
    pub digest: OciDigest,
}

/// File-backed blob, manifest, and tag storage.
pub struct Store {
    data_dir: PathBuf,
    next_upload: AtomicU64,
    uploads: Mutex<HashSet<String>>,
}

impl Store {
    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            data_dir,
            next_upload: AtomicU64::new(1),
            uploads: Mutex::new(HashSet::new()),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn blob_path(&self, digest: &str) -> Option<PathBuf> {
        let hex = digest.strip_prefix(DIGEST_PREFIX)?;
        Some(self.data_dir.join("blobs/sha256").join(hex))
    }

    fn type_path(&self, digest: &str) -> Option<PathBuf> {
        let hex = digest.strip_prefix(DIGEST_PREFIX)?;
        Some(self.data_dir.join("manifests").join(format!("{hex}.type")))
    }

    fn tag_dir(&self, repo: &str) -> PathBuf {
        self.data_dir.join("repositories").join(repo).join("tags")
    }

    pub fn has_blob(&self, digest: &str) -> bool {
        self.blob_path(digest).is_some_and(|p| p.is_file())
    }

    /// Path of a stored blob, if present.
    pub fn blob_file(&self, digest: &str) -> Option<PathBuf> {
        self.blob_path(digest).filter(|p| p.is_file())
    }

    /// Store `data` under `digest` after checking that it hashes to it.
    pub fn put_blob(&self, digest: &str, data: &[u8]) -> Result<(), RegistryError> {
        let actual = sha256_bytes(data).to_digest();
        let path = match self.blob_path(digest) {
            Some(path) if actual.as_str() == digest => path,
            _ => {
                return Err(RegistryError::DigestMismatch {
                    expected: digest.to_owned(),
                    actual: actual.into_inner(),
                })
            }
        };
        if !path.is_file() {
            store_file(&path, data)?;
        }
        Ok(())
    }

    /// Store a manifest and, when `reference` is a tag, point the tag at it.
    pub fn put_manifest(
        &self,
        repo: &str,
        reference: &str,
        media_type: &str,
        data: &[u8],
    ) -> Result<OciDigest, RegistryError> {
        let digest = sha256_bytes(data).to_digest();
        if is_digest(reference) && reference != digest.as_str() {
            return Err(RegistryError::DigestMismatch {
                expected: reference.to_owned(),
                actual: digest.into_inner(),
            });
        }
        self.put_blob(digest.as_str(), data)?;
        if let Some(type_path) = self.type_path(digest.as_str()) {
            store_file(&type_path, media_type.as_bytes())?;
        }
        if !is_digest(reference) {
            store_file(&self.tag_dir(repo).join(reference), digest.as_str().as_bytes())?;
        }
        Ok(digest)
    }

    /// Look up a manifest by tag or digest.
    pub fn get_manifest(&self, repo: &str, reference: &str) -> Result<Option<StoredManifest>, RegistryError> {
        let digest = if is_digest(reference) {
            reference.to_owned()
        } else {
            let tag = self.tag_dir(repo).join(reference);
            if !tag.is_file() {
                return Ok(None);
            }
            fs::read_to_string(&tag).map_err(io_at(&tag))?.trim().to_owned()
        };
        let (Some(blob), Some(type_path)) = (self.blob_file(&digest), self.type_path(&digest)) else {
            return Ok(None);
        };
        if !type_path.is_file() {
            return Ok(None);
        }
        let data = fs::read(&blob).map_err(io_at(&blob))?;
        let media_type = fs::read_to_string(&type_path).map_err(io_at(&type_path))?;
        Ok(Some(StoredManifest {
            media_type: if media_type.is_empty() {
                MANIFEST_FALLBACK_TYPE.to_owned()
            } else {
                media_type
            },
            data,
            digest: OciDigest::new(digest),
        }))
    }

    /// Tags of `repo`, sorted.
    pub fn tags(&self, repo: &str) -> Vec<String> {
        let mut tags: Vec<String> = fs::read_dir(self.tag_dir(repo))
            .map(|rd| {
                rd.filter_map(Result::ok)
                    .filter_map(|e| e.file_name().to_str().map(String::from))
                    .filter(|name| !name.starts_with('.'))
                    .collect()
            })
            .unwrap_or_default();
        tags.sort();
        tags
    }

    pub fn start_upload(&self) -> String {
        let id = format!("u{}", self.next_upload.fetch_add(1, Ordering::Relaxed));
        self.uploads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.clone());
        id
    }

    /// Close an upload session. Returns `false` when the session is unknown.
    pub fn finish_upload(&self, session: &str) -> bool {
        self.uploads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(session)
    }
}

/// A request path under `/v2/`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route<'a> {
    Base,
    StartUpload { repo: &'a str },
    Upload { repo: &'a str, session: &'a str },
    Blob { repo: &'a str, digest: &'a str },
    Manifest { repo: &'a str, reference: &'a str },
    Tags { repo: &'a str },
}

fn is_digest(s: &str) -> bool {
    s.strip_prefix(DIGEST_PREFIX).is_some_and(|hex| {
        hex.len() == 64 && hex.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
    })
}

fn is_tag(s: &str) -> bool {
    let mut bytes = s.bytes();
    matches!(bytes.next(), Some(b) if b.is_ascii_alphanumeric() || b == b'_')
        && s.len() <= 128
        && bytes.all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'.' | b'-'))
}

fn is_repository(s: &str) -> bool {
    !s.is_empty()
        && s.split('/').all(|part| {
            !part.is_empty()
                && part != "."
                && part != ".."
                && part
                    .bytes()
                    .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || matches!(b, b'.' | b'_' | b'-'))
        })
}

/// Parse the path part of a request URL. Names that could escape the data
/// directory never parse.
pub fn parse_route(path: &str) -> Option<Route<'_>> {
    if path == "/v2/" || path == "/v2" {
        return Some(Route::Base);
    }
    let rest = path.strip_prefix("/v2/")?;

    if let Some(repo) = rest.strip_suffix("/blobs/uploads/") {
        return is_repository(repo).then_some(Route::StartUpload { repo });
    }
    if let Some(repo) = rest.strip_suffix("/tags/list") {
        return is_repository(repo).then_some(Route::Tags { repo });
    }
    if let Some((repo, session)) = rest.rsplit_once("/blobs/uploads/") {
        let valid = is_repository(repo) && !session.is_empty() && session.bytes().all(|b| b.is_ascii_alphanumeric());
        return valid.then_some(Route::Upload { repo, session });
    }
    if let Some((repo, digest)) = rest.rsplit_once("/blobs/") {
        return (is_repository(repo) && is_digest(digest)).then_some(Route::Blob { repo, digest });
    }
    if let Some((repo, reference)) = rest.rsplit_once("/manifests/") {
        let valid = is_repository(repo) && (is_digest(reference) || is_tag(reference));
        return valid.then_some(Route::Manifest { repo, reference });
    }
    None
}

fn query_param(query: &str, key: &str) -> Option<String> {
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(k, _)| *k == key)
        .map(|(_, v)| v.replace("%3A", ":").replace("%3a", ":"))
}

fn with_headers<R: Read>(mut resp: Response<R>, headers: &[(&str, &str)]) -> Response<R> {
    for (name, value) in headers {
        if let Ok(header) = Header::from_bytes(name.as_bytes(), value.as_bytes()) {
            resp.add_header(header);
        }
    }
    resp
}

fn respond<R: Read>(req: Request, resp: Response<R>) {
    if let Err(e) = req.respond(resp) {
        debug!("client went away: {e}");
    }
}

/// Reply with a distribution-API error document.
fn respond_err(req: Request, status: u16, code: &str, message: &str) {
    let body = json!({ "errors": [{ "code": code, "message": message }] }).to_string();
    let resp = Response::from_string(body).with_status_code(StatusCode(status));
    respond(req, with_headers(resp, &[("Content-Type", "application/json")]));
}

fn read_body(req: &mut Request) -> Option<Vec<u8>> {
    let mut body = Vec::new();
    req.as_reader().read_to_end(&mut body).ok().map(|_| body)
}

fn request_header(req: &Request, name: &str) -> Option<String> {
    req.headers()
        .iter()
        .find(|h| h.field.as_str().as_str().eq_ignore_ascii_case(name))
        .map(|h| h.value.as_str().to_owned())
}

fn handle_blob(store: &Store, req: Request, method: &Method, digest: &str) {
    let Some(path) = store.blob_file(digest) else {
        respond_err(req, 404, "BLOB_UNKNOWN", "blob unknown to registry");
        return;
    };
    let headers = [
        ("Content-Type", "application/octet-stream"),
        ("Docker-Content-Digest", digest),
    ];
    match *method {
        Method::Head => respond(req, with_headers(Response::empty(200), &headers)),
        Method::Get => match File::open(&path) {
            Ok(file) => respond(req, with_headers(Response::from_file(file), &headers)),
            Err(e) => {
                error!("GET {digest}: {e}");
                respond_err(req, 500, "UNKNOWN", &e.to_string());
            }
        },
        _ => respond_err(req, 405, "UNSUPPORTED", "method not allowed"),
    }
}

fn handle_upload(store: &Store, mut req: Request, method: &Method, repo: &str, session: &str, query: &str) {
    if *method != Method::Put {
        respond_err(req, 405, "UNSUPPORTED", "only monolithic uploads are supported");
        return;
    }
    let Some(digest) = query_param(query, "digest").filter(|d| is_digest(d)) else {
        respond_err(req, 400, "DIGEST_INVALID", "missing or invalid digest parameter");
        return;
    };
    if !store.finish_upload(session) {
        respond_err(req, 404, "BLOB_UPLOAD_UNKNOWN", "upload session unknown");
        return;
    }
    let Some(body) = read_body(&mut req) else {
        respond_err(req, 500, "UNKNOWN", "read error");
        return;
    };
    match store.put_blob(&digest, &body) {
        Ok(()) => {
            info!("PUT {repo} blob {digest}: {} bytes", body.len());
            let location = format!("/v2/{repo}/blobs/{digest}");
            let resp = Response::empty(201);
            respond(
                req,
                with_headers(resp, &[("Location", location.as_str()), ("Docker-Content-Digest", digest.as_str())]),
            );
        }
        Err(e @ RegistryError::DigestMismatch { .. }) => {
            warn!("rejected upload to {repo}: {e}");
            respond_err(req, 400, "DIGEST_INVALID", &e.to_string());
        }
        Err(e) => {
            error!("PUT {repo} blob {digest}: {e}");
            respond_err(req, 500, "UNKNOWN", &e.to_string());
        }
    }
}

fn handle_manifest(store: &Store, mut req: Request, method: &Method, repo: &str, reference: &str) {
    match *method {
        Method::Put => {
            let media_type = request_header(&req, "Content-Type")
                .map(|v| v.split(';').next().unwrap_or_default().trim().to_owned())
                .unwrap_or_default();
            let Some(body) = read_body(&mut req) else {
                respond_err(req, 500, "UNKNOWN", "read error");
                return;
            };
            match store.put_manifest(repo, reference, &media_type, &body) {
                Ok(digest) => {
                    info!("PUT {repo}:{reference} -> {digest}");
                    let location = format!("/v2/{repo}/manifests/{digest}");
                    respond(
                        req,
                        with_headers(
                            Response::empty(201),
                            &[("Location", location.as_str()), ("Docker-Content-Digest", digest.as_str())],
                        ),
                    );
                }
                Err(e @ RegistryError::DigestMismatch { .. }) => {
                    respond_err(req, 400, "MANIFEST_INVALID", &e.to_string());
                }
                Err(e) => {
                    error!("PUT {repo}:{reference}: {e}");
                    respond_err(req, 500, "UNKNOWN", &e.to_string());
                }
            }
        }
        Method::Get | Method::Head => match store.get_manifest(repo, reference) {
            Ok(Some(manifest)) => {
                let headers = [
                    ("Content-Type", manifest.media_type.as_str()),
                    ("Docker-Content-Digest", manifest.digest.as_str()),
                ];
                if *method == Method::Head {
                    respond(req, with_headers(Response::empty(200), &headers));
                } else {
                    respond(req, with_headers(Response::from_data(manifest.data), &headers));
                }
            }
            Ok(None) => respond_err(req, 404, "MANIFEST_UNKNOWN", "manifest unknown"),
            Err(e) => {
                error!("GET {repo}:{reference}: {e}");
                respond_err(req, 500, "UNKNOWN", &e.to_string());
            }
        },
        _ => respond_err(req, 405, "UNSUPPORTED", "method not allowed"),
    }
}

/// Handle a single HTTP request, dispatching to the appropriate route handler.
pub fn handle_request(store: &Store, req: Request) {
    let method = req.method().clone();
    let url = req.url().to_owned();
    debug!("{method} {url}");
    let (path, query) = url.split_once('?').unwrap_or((&url, ""));

    match parse_route(path) {
        Some(Route::Base) if method == Method::Get => {
            respond(req, with_headers(Response::from_string("{}"), &[("Content-Type", "application/json")]));
        }
        Some(Route::StartUpload { repo }) if method == Method::Post => {
            let session = store.start_upload();
            let location = format!("/v2/{repo}/blobs/uploads/{session}");
            let resp = Response::empty(202);
            respond(
                req,
                with_headers(resp, &[("Location", location.as_str()), ("Docker-Upload-UUID", session.as_str())]),
            );
        }
        Some(Route::Upload { repo, session }) => handle_upload(store, req, &method, repo, session, query),
        Some(Route::Blob { digest, .. }) => handle_blob(store, req, &method, digest),
        Some(Route::Manifest { repo, reference }) => handle_manifest(store, req, &method, repo, reference),
        Some(Route::Tags { repo }) if method == Method::Get => {
            let body = json!({ "name": repo, "tags": store.tags(repo) }).to_string();
            respond(req, with_headers(Response::from_string(body), &[("Content-Type", "application/json")]));
        }
        Some(_) => respond_err(req, 405, "UNSUPPORTED", "method not allowed"),
        None => respond_err(req, 404, "NAME_UNKNOWN", "not found"),
    }
}

/// Start the server loop, blocking the current thread.
pub fn run_server(store: &Arc<Store>, addr: &str) -> Result<(), RegistryError> {
    let server = Server::http(addr).map_err(|e| RegistryError::Bind {
        addr: addr.to_owned(),
        reason: e.to_string(),
    })?;
    for request in server.incoming_requests() {
        handle_request(store, request);
    }
    Ok(())
}

/// A registry on a random port in a background thread.
///
/// The server listens on `127.0.0.1:{port}` and stores data in `data_dir`.
/// Dropping the `TestServer` stops it.
pub struct TestServer {
    pub url: String,
    pub port: u16,
    pub data_dir: PathBuf,
    server: Arc<Server>,
    _handle: std::thread::JoinHandle<()>,
}

impl TestServer {
    pub fn start(data_dir: PathBuf) -> Result<Self, RegistryError> {
        fs::create_dir_all(&data_dir).map_err(io_at(&data_dir))?;
        let bind = |reason: String| RegistryError::Bind {
            addr: "127.0.0.1:0".to_owned(),
            reason,
        };
        let server = Arc::new(Server::http("127.0.0.1:0").map_err(|e| bind(e.to_string()))?);
        let port = server
            .server_addr()
            .to_ip()
            .ok_or_else(|| bind("not an IP address".to_owned()))?
            .port();
        let url = format!("http://127.0.0.1:{port}");

        let store = Arc::new(Store::new(data_dir.clone()));
        let srv = Arc::clone(&server);
        let handle = std::thread::spawn(move || {
            for request in srv.incoming_requests() {
                handle_request(&store, request);
            }
        });

        Ok(Self {
            url,
            port,
            data_dir,
            server,
            _handle: handle,
        })
    }

    /// `host:port`, the registry part of an `oci://` reference.
    pub fn host(&self) -> String {
        format!("127.0.0.1:{}", self.port)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.server.unblock();
    }
}
