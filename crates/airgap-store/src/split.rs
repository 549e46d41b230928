//! Chunked split and reassembly for size-bounded transport.
//!
//! A file `pkg.tar.zst` split with chunk size `n` becomes `pkg.tar.zst.part000`
//! (a JSON [`SplitFileMetadata`] header) followed by `pkg.tar.zst.part001`
//! onward, each at most `n` bytes.

use crate::{io_at, write_atomic, SplitError, StoreError};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Highest data part number the three-digit suffix can express.
pub const MAX_SPLIT_PARTS: u64 = 999;

const COPY_BUFFER: usize = 64 * 1024;

/// Header stored in the `.part000` sidecar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitFileMetadata {
    #[serde(rename = "Sha256Sum")]
    pub sha256_sum: String,
    #[serde(rename = "Bytes")]
    pub bytes: u64,
    #[serde(rename = "Count")]
    pub count: usize,
}

impl SplitFileMetadata {
    /// Check a reassembled file against the recorded size and hash.
    pub fn verify(&self, path: &Path) -> Result<(), StoreError> {
        let len = fs::metadata(path).map_err(io_at(path))?.len();
        if len != self.bytes {
            return Err(SplitError::Verification(format!(
                "expected {} bytes, got {len}",
                self.bytes
            ))
            .into());
        }
        let actual = crate::sha256_file(path)?;
        if actual != self.sha256_sum.as_str() {
            return Err(SplitError::Verification(format!(
                "expected sha256 {}, got {actual}",
                self.sha256_sum
            ))
            .into());
        }
        Ok(())
    }
}

/// Path of part `n` for `src`: `<src>.partNNN`.
pub fn part_path(src: &Path, n: usize) -> PathBuf {
    let mut name = src.as_os_str().to_owned();
    name.push(format!(".part{n:03}"));
    PathBuf::from(name)
}

/// Split `src` into parts of at most `chunk_size` bytes and delete `src`.
///
/// Stale `<src>.partNNN` siblings from an earlier split are removed first.
/// Only one part file is open at a time.
pub fn split_file(src: &Path, chunk_size: u64) -> Result<SplitFileMetadata, StoreError> {
    if chunk_size == 0 {
        return Err(SplitError::ZeroChunkSize.into());
    }
    let total = fs::metadata(src).map_err(io_at(src))?.len();
    let parts = total.div_ceil(chunk_size);
    if parts > MAX_SPLIT_PARTS {
        return Err(SplitError::TooManyParts {
            parts,
            max: MAX_SPLIT_PARTS,
        }
        .into());
    }

    remove_parts(src)?;

    let mut input = File::open(src).map_err(io_at(src))?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; COPY_BUFFER];
    let mut count = 0usize;
    let mut current: Option<(BufWriter<File>, PathBuf, u64)> = None;

    loop {
        let n = input.read(&mut buf).map_err(io_at(src))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);

        let mut offset = 0;
        while offset < n {
            if current.is_none() {
                count += 1;
                let path = part_path(src, count);
                let file = File::create(&path).map_err(io_at(&path))?;
                current = Some((BufWriter::new(file), path, 0));
            }
            let Some((writer, path, written)) = current.as_mut() else {
                break;
            };
            #[allow(clippy::cast_possible_truncation)]
            let room = (chunk_size - *written).min((n - offset) as u64) as usize;
            writer
                .write_all(&buf[offset..offset + room])
                .map_err(io_at(path))?;
            *written += room as u64;
            offset += room;
            if *written == chunk_size {
                close_part(current.take())?;
            }
        }
    }
    close_part(current.take())?;

    let meta = SplitFileMetadata {
        sha256_sum: hex::encode(hasher.finalize()),
        bytes: total,
        count,
    };
    let header = serde_json::to_vec(&meta)?;
    write_atomic(&part_path(src, 0), &header)?;
    fs::remove_file(src).map_err(io_at(src))?;

    info!(
        "split {} into {} parts of up to {chunk_size} bytes",
        src.display(),
        meta.count
    );
    Ok(meta)
}

fn close_part(part: Option<(BufWriter<File>, PathBuf, u64)>) -> Result<(), StoreError> {
    if let Some((writer, path, _)) = part {
        let file = writer.into_inner().map_err(|e| StoreError::Io {
            path: path.clone(),
            source: e.into_error(),
        })?;
        file.sync_all().map_err(io_at(&path))?;
    }
    Ok(())
}

/// Existing `<base>.partNNN` files next to `base`, sorted by name.
/// Delete every `<base>.partNNN` sibling.
pub(crate) fn remove_parts(base: &Path) -> Result<(), StoreError> {
    for stale in sibling_parts(base)? {
        debug!("removing stale part {}", stale.display());
        fs::remove_file(&stale).map_err(io_at(&stale))?;
    }
    Ok(())
}

fn sibling_parts(base: &Path) -> Result<Vec<PathBuf>, StoreError> {
    let dir = match base.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let Some(stem) = base.file_name().map(|n| n.to_string_lossy().into_owned()) else {
        return Ok(Vec::new());
    };
    let prefix = format!("{stem}.part");

    let mut parts = Vec::new();
    for entry in fs::read_dir(dir).map_err(io_at(dir))? {
        let entry = entry.map_err(io_at(dir))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if let Some(suffix) = name.strip_prefix(&prefix) {
            if !suffix.is_empty() && suffix.bytes().all(|b| b.is_ascii_digit()) {
                parts.push(entry.path());
            }
        }
    }
    parts.sort();
    Ok(parts)
}

/// Strip a `.part000` suffix, returning the original file path.
pub fn split_base(path: &Path) -> Option<PathBuf> {
    let name = path.file_name()?.to_str()?;
    let base = name.strip_suffix(".part000")?;
    Some(path.with_file_name(base))
}

/// Concatenate the data parts of a split file into `dest`.
///
/// `source` may name either the original file or its `.part000` header.
/// The result is not hashed here; call [`SplitFileMetadata::verify`] when
/// end-to-end integrity is needed.
pub fn reassemble(source: &Path, dest: &Path) -> Result<SplitFileMetadata, StoreError> {
    let base = split_base(source).unwrap_or_else(|| source.to_path_buf());
    let parts = sibling_parts(&base)?;
    let header_path = part_path(&base, 0);
    if parts.first().and_then(|p| p.file_name()) != header_path.file_name() {
        return Err(SplitError::MissingHeader(header_path).into());
    }

    let header = fs::read(&header_path).map_err(io_at(&header_path))?;
    let meta: SplitFileMetadata =
        serde_json::from_slice(&header).map_err(|e| SplitError::InvalidHeader {
            path: header_path.clone(),
            reason: e.to_string(),
        })?;
    if meta.count != parts.len() - 1 {
        return Err(SplitError::CountMismatch {
            expected: meta.count,
            found: parts.len() - 1,
        }
        .into());
    }

    let out = File::create(dest).map_err(io_at(dest))?;
    let mut out = BufWriter::new(out);
    for part in &parts[1..] {
        debug!("appending {}", part.display());
        let mut input = File::open(part).map_err(io_at(part))?;
        std::io::copy(&mut input, &mut out).map_err(io_at(part))?;
    }
    out.flush().map_err(io_at(dest))?;
    info!("reassembled {} parts into {}", meta.count, dest.display());
    Ok(meta)
}
