use crate::{io_at, PackageReference, RemoteError};
use sha2::{Digest, Sha256};
use std::fmt;
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Where a package comes from, identified from the string a user typed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackageSource {
    Oci(PackageReference),
    /// An `http://` or `https://` URL to a package tarball.
    Http(String),
    /// The `.part000` header of a split tarball.
    Split(PathBuf),
    Tarball(PathBuf),
    /// An already-extracted layout directory.
    Directory(PathBuf),
}

const TARBALL_EXTENSIONS: [&str; 2] = [".tar.zst", ".tar"];

impl PackageSource {
    /// Classify `source`. Returns `None` when nothing matches, e.g. a path
    /// without a package extension that is not a directory.
    pub fn identify(source: &str) -> Result<Option<Self>, RemoteError> {
        if source.starts_with(crate::reference::OCI_SCHEME) {
            return PackageReference::parse(source).map(|r| Some(Self::Oci(r)));
        }
        if source.starts_with("https://") || source.starts_with("http://") {
            return Ok(Some(Self::Http(source.to_owned())));
        }
        if source.ends_with(".part000") {
            return Ok(Some(Self::Split(PathBuf::from(source))));
        }
        if TARBALL_EXTENSIONS.iter().any(|ext| source.ends_with(ext)) {
            return Ok(Some(Self::Tarball(PathBuf::from(source))));
        }
        let path = Path::new(source);
        if path.is_dir() {
            return Ok(Some(Self::Directory(path.to_path_buf())));
        }
        Ok(None)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Oci(_) => "oci",
            Self::Http(_) => "http",
            Self::Split(_) => "split",
            Self::Tarball(_) => "tarball",
            Self::Directory(_) => "directory",
        }
    }
}

impl fmt::Display for PackageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Oci(r) => write!(f, "{r}"),
            Self::Http(url) => f.write_str(url),
            Self::Split(p) | Self::Tarball(p) | Self::Directory(p) => {
                write!(f, "{}", p.display())
            }
        }
    }
}

/// Download `url` into `dest`, streaming, and check it against
/// `expected_sha256` when given. Returns the hex SHA-256 of what was written.
///
/// On a mismatch the partial download is removed.
pub fn fetch_url(
    url: &str,
    dest: &Path,
    expected_sha256: Option<&str>,
) -> Result<String, RemoteError> {
    debug!("GET {url}");
    let resp = match ureq::get(url).call() {
        Ok(r) => r,
        Err(ureq::Error::StatusCode(404)) => return Err(RemoteError::NotFound(url.to_owned())),
        Err(ureq::Error::StatusCode(code)) => {
            return Err(RemoteError::Http(format!("HTTP {code} for {url}")))
        }
        Err(e) => return Err(RemoteError::Http(e.to_string())),
    };

    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent).map_err(io_at(parent))?;
    }
    let file = std::fs::File::create(dest).map_err(io_at(dest))?;
    let mut writer = BufWriter::new(file);
    let mut reader = resp.into_body().into_reader();
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = reader
            .read(&mut buf)
            .map_err(|e| RemoteError::Http(format!("reading {url}: {e}")))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        writer.write_all(&buf[..n]).map_err(io_at(dest))?;
    }
    writer.flush().map_err(io_at(dest))?;

    let actual = hex::encode(hasher.finalize());
    if let Some(expected) = expected_sha256 {
        if !expected.eq_ignore_ascii_case(&actual) {
            let _ = std::fs::remove_file(dest);
            return Err(RemoteError::Http(format!(
                "shasum mismatch for {url}: expected {expected}, got {actual}"
            )));
        }
    }
    info!("downloaded {url} to {}", dest.display());
    Ok(actual)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader};
    use std::net::TcpListener;

    fn kind(src: &str) -> Option<&'static str> {
        PackageSource::identify(src).unwrap().map(|s| s.kind())
    }

    #[test]
    fn identifies_sources() {
        assert_eq!(kind("oci://ghcr.io/org/packages/init:1.0.0"), Some("oci"));
        assert_eq!(
            kind("https://example.com/releases/airgap-init-amd64-v1.0.0.tar.zst"),
            Some("http")
        );
        assert_eq!(kind("http://example.com/pkg.tar"), Some("http"));
        assert_eq!(kind("zarf-package-manifests-amd64-v1.0.0.tar"), Some("tarball"));
        assert_eq!(kind("zarf-init-amd64-v1.0.0.tar.zst"), Some("tarball"));
        assert_eq!(kind("testdata/.part000"), Some("split"));
        assert_eq!(kind("definitely-not-a-package.txt"), None);

        let dir = tempfile::tempdir().unwrap();
        assert_eq!(kind(dir.path().to_str().unwrap()), Some("directory"));
    }

    #[test]
    fn malformed_oci_source_is_error() {
        assert!(PackageSource::identify("oci://ghcr.io/org/pkg").is_err());
    }

    /// Serves `body` to every request on a loopback port.
    fn serve(body: &'static [u8], requests: usize) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = format!("http://{}", listener.local_addr().unwrap());
        std::thread::spawn(move || {
            for stream in listener.incoming().take(requests) {
                let Ok(mut stream) = stream else { break };
                let mut reader = BufReader::new(stream.try_clone().unwrap());
                loop {
                    let mut line = String::new();
                    if reader.read_line(&mut line).is_err() || line.trim().is_empty() {
                        break;
                    }
                }
                let head = format!(
                    "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    body.len()
                );
                let _ = stream.write_all(head.as_bytes());
                let _ = stream.write_all(body);
                let _ = stream.flush();
            }
        });
        addr
    }

    #[test]
    fn fetch_checks_shasum() {
        let addr = serve(b"remote file", 2);
        let dir = tempfile::tempdir().unwrap();
        let expected = airgap_store::sha256_bytes(b"remote file").into_inner();

        let dest = dir.path().join("files/0/remote.txt");
        let got = fetch_url(&format!("{addr}/remote.txt"), &dest, Some(&expected)).unwrap();
        assert_eq!(got, expected);
        assert_eq!(std::fs::read(&dest).unwrap(), b"remote file");

        let bad = dir.path().join("bad.txt");
        let wrong = "0".repeat(64);
        assert!(fetch_url(&format!("{addr}/remote.txt"), &bad, Some(&wrong)).is_err());
        assert!(!bad.exists());
    }
}
