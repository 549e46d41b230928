use crate::{io_at, write_atomic, IntegrityError, StoreError, CHECKSUMS, LEDGER_EXEMPT};
use airgap_schema::Sha256Hex;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const HASH_BUFFER: usize = 64 * 1024;

pub fn sha256_bytes(data: &[u8]) -> Sha256Hex {
    Sha256Hex::new(hex::encode(Sha256::digest(data)))
}

/// Stream a file through SHA-256 without loading it into memory.
pub fn sha256_file(path: &Path) -> Result<Sha256Hex, StoreError> {
    let mut file = File::open(path).map_err(io_at(path))?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; HASH_BUFFER];
    loop {
        let n = file.read(&mut buf).map_err(io_at(path))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(Sha256Hex::new(hex::encode(hasher.finalize())))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub sha256: Sha256Hex,
    /// Relative POSIX path from the layout root.
    pub path: String,
}

/// The `checksums.txt` content-addressing manifest.
///
/// Entries are kept sorted by path, so the text form (and therefore the
/// aggregate checksum) does not depend on directory traversal order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChecksumLedger {
    entries: Vec<LedgerEntry>,
}

/// Outcome of a successful ledger verification.
#[derive(Debug, Default)]
pub struct IntegrityReport {
    pub verified: usize,
    /// Listed files that were absent, tolerated only in partial mode.
    pub absent: Vec<String>,
}

impl ChecksumLedger {
    pub fn from_entries(mut entries: Vec<LedgerEntry>) -> Self {
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Self { entries }
    }

    /// Hash every file under `root` except the three exempt root files.
    pub fn compute(root: &Path) -> Result<Self, StoreError> {
        let mut entries = Vec::new();
        for rel in list_files(root)? {
            if LEDGER_EXEMPT.contains(&rel.as_str()) {
                continue;
            }
            let sha256 = sha256_file(&root.join(&rel))?;
            debug!("checksum {sha256} {rel}");
            entries.push(LedgerEntry { sha256, path: rel });
        }
        Ok(Self::from_entries(entries))
    }

    pub fn parse(text: &str) -> Result<Self, IntegrityError> {
        let mut entries = Vec::new();
        for (idx, line) in text.split('\n').enumerate() {
            if line.is_empty() {
                continue;
            }
            let malformed = || IntegrityError::MalformedLine {
                line: idx + 1,
                content: line.to_owned(),
            };
            let (sha, path) = line.split_once(' ').ok_or_else(malformed)?;
            let sha256 = Sha256Hex::new(sha);
            if !sha256.is_well_formed() || !is_safe_relative(path) {
                return Err(malformed());
            }
            entries.push(LedgerEntry {
                sha256,
                path: path.to_owned(),
            });
        }
        Ok(Self::from_entries(entries))
    }

    pub fn read(root: &Path) -> Result<Self, StoreError> {
        let path = root.join(CHECKSUMS);
        let text = fs::read_to_string(&path).map_err(io_at(&path))?;
        Ok(Self::parse(&text)?)
    }

    /// Sorted `"<sha256> <path>"` lines joined by newlines, with a trailing newline.
    pub fn to_text(&self) -> String {
        let mut text = self
            .entries
            .iter()
            .map(|e| format!("{} {}", e.sha256, e.path))
            .collect::<Vec<_>>()
            .join("\n");
        text.push('\n');
        text
    }

    /// SHA-256 of the ledger text.
    pub fn aggregate(&self) -> Sha256Hex {
        sha256_bytes(self.to_text().as_bytes())
    }

    /// Write `checksums.txt` atomically and return the aggregate checksum.
    pub fn write(&self, root: &Path) -> Result<Sha256Hex, StoreError> {
        let text = self.to_text();
        write_atomic(&root.join(CHECKSUMS), text.as_bytes())?;
        Ok(sha256_bytes(text.as_bytes()))
    }

    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    pub fn get(&self, path: &str) -> Option<&LedgerEntry> {
        self.entries
            .binary_search_by(|e| e.path.as_str().cmp(path))
            .ok()
            .map(|idx| &self.entries[idx])
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Check the files under `root` against the ledger.
    ///
    /// Every listed file must exist and match, except in partial mode where
    /// listed-but-absent files are tolerated. A present file with a wrong
    /// hash, or any present file the ledger does not list, always fails.
    pub fn verify(&self, root: &Path, partial: bool) -> Result<IntegrityReport, StoreError> {
        let mut on_disk: BTreeSet<String> = list_files(root)?
            .into_iter()
            .filter(|rel| !LEDGER_EXEMPT.contains(&rel.as_str()))
            .collect();

        let mut report = IntegrityReport::default();
        for entry in &self.entries {
            if !on_disk.remove(&entry.path) {
                if partial {
                    debug!("partial package: '{}' not present", entry.path);
                    report.absent.push(entry.path.clone());
                    continue;
                }
                return Err(IntegrityError::MissingFile(entry.path.clone()).into());
            }
            let actual = sha256_file(&root.join(&entry.path))?;
            if actual != entry.sha256 {
                return Err(IntegrityError::ChecksumMismatch {
                    path: entry.path.clone(),
                    expected: entry.sha256.to_string(),
                    actual: actual.into_inner(),
                }
                .into());
            }
            report.verified += 1;
        }

        if !on_disk.is_empty() {
            return Err(IntegrityError::UnexpectedFiles(on_disk.into_iter().collect()).into());
        }
        Ok(report)
    }
}

/// Relative POSIX paths of every regular file under `root`, sorted.
pub fn list_files(root: &Path) -> Result<Vec<String>, StoreError> {
    let mut files = Vec::new();
    collect_files(root, root, &mut files)?;
    files.sort();
    Ok(files)
}

fn collect_files(root: &Path, current: &Path, out: &mut Vec<String>) -> Result<(), StoreError> {
    for entry in fs::read_dir(current).map_err(io_at(current))? {
        let entry = entry.map_err(io_at(current))?;
        let full: PathBuf = entry.path();
        let ft = entry.file_type().map_err(io_at(&full))?;
        if ft.is_dir() {
            collect_files(root, &full, out)?;
        } else if ft.is_file() {
            out.push(relative_posix(root, &full));
        } else {
            warn!("ignoring non-regular file {}", full.display());
        }
    }
    Ok(())
}

pub(crate) fn relative_posix(root: &Path, full: &Path) -> String {
    full.strip_prefix(root)
        .unwrap_or(full)
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// A ledger path must stay inside the layout: relative, no `..`, no empty segments.
fn is_safe_relative(path: &str) -> bool {
    !path.is_empty()
        && !path.starts_with('/')
        && path
            .split('/')
            .all(|seg| !seg.is_empty() && seg != "." && seg != "..")
}
