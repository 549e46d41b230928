use crate::checksum::relative_posix;
use crate::{io_at, StoreError};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const ZSTD_MAGIC: [u8; 4] = [0x28, 0xB5, 0x2F, 0xFD];

/// Write a deterministic tar of `source_dir` into `writer` and return the writer.
///
/// Determinism guarantees:
/// - Entries sorted lexicographically by relative path
/// - All timestamps set to 0 (Unix epoch)
/// - All ownership set to 0:0
/// - Modes normalized: directories 0755, executable files 0755, other files
///   0644, symlinks 0777
///
/// With `prefix`, every entry is placed under `<prefix>/`. Device nodes,
/// sockets and FIFOs are skipped with a warning.
pub fn pack_dir<W: Write>(
    source_dir: &Path,
    prefix: Option<&str>,
    writer: W,
) -> Result<W, StoreError> {
    let mut entries = Vec::new();
    collect_entries(source_dir, source_dir, &mut entries)?;
    entries.sort_by(|a, b| a.0.cmp(&b.0));

    let mut ar = tar::Builder::new(writer);
    ar.follow_symlinks(false);
    let tar_err = |e| StoreError::Io {
        path: source_dir.to_path_buf(),
        source: e,
    };

    if let Some(prefix) = prefix {
        append_dir(&mut ar, prefix).map_err(tar_err)?;
    }

    for (rel, full) in &entries {
        let name = match prefix {
            Some(prefix) => format!("{prefix}/{rel}"),
            None => rel.clone(),
        };
        let meta = full.symlink_metadata().map_err(io_at(full))?;
        let ft = meta.file_type();
        if ft.is_file() {
            let executable = meta.permissions().mode() & 0o111 != 0;
            let file = File::open(full).map_err(io_at(full))?;
            let mut header = header_for(tar::EntryType::Regular, if executable { 0o755 } else { 0o644 });
            header.set_size(meta.len());
            header.set_cksum();
            ar.append_data(&mut header, &name, BufReader::new(file))
                .map_err(io_at(full))?;
        } else if ft.is_dir() {
            append_dir(&mut ar, &name).map_err(io_at(full))?;
        } else if ft.is_symlink() {
            let target = fs::read_link(full).map_err(io_at(full))?;
            let mut header = header_for(tar::EntryType::Symlink, 0o777);
            header.set_size(0);
            header.set_cksum();
            ar.append_link(&mut header, &name, &target)
                .map_err(io_at(full))?;
        } else {
            warn!("skipping unsupported file type: {rel}");
        }
    }

    ar.into_inner().map_err(tar_err)
}

fn header_for(entry_type: tar::EntryType, mode: u32) -> tar::Header {
    let mut header = tar::Header::new_gnu();
    header.set_entry_type(entry_type);
    header.set_mtime(0);
    header.set_uid(0);
    header.set_gid(0);
    header.set_mode(mode);
    header
}

fn append_dir<W: Write>(ar: &mut tar::Builder<W>, rel: &str) -> std::io::Result<()> {
    let mut header = header_for(tar::EntryType::Directory, 0o755);
    header.set_size(0);
    header.set_cksum();
    let path = if rel.ends_with('/') {
        rel.to_owned()
    } else {
        format!("{rel}/")
    };
    ar.append_data(&mut header, &path, std::io::empty())
}

fn collect_entries(
    root: &Path,
    current: &Path,
    out: &mut Vec<(String, PathBuf)>,
) -> Result<(), StoreError> {
    for entry in fs::read_dir(current).map_err(io_at(current))? {
        let entry = entry.map_err(io_at(current))?;
        let full = entry.path();
        let rel = relative_posix(root, &full);
        let meta = full.symlink_metadata().map_err(io_at(&full))?;
        if meta.is_dir() {
            out.push((rel, full.clone()));
            collect_entries(root, &full, out)?;
        } else {
            out.push((rel, full));
        }
    }
    Ok(())
}

/// Pack `source_dir` into an uncompressed tar file at `dest`.
pub fn write_tar_file(source_dir: &Path, dest: &Path, prefix: Option<&str>) -> Result<(), StoreError> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).map_err(io_at(parent))?;
    }
    let file = File::create(dest).map_err(io_at(dest))?;
    let mut writer = pack_dir(source_dir, prefix, BufWriter::new(file))?;
    writer.flush().map_err(io_at(dest))?;
    debug!("wrote {}", dest.display());
    Ok(())
}

/// Extract a tar stream into `target_dir`.
///
/// Entries that would escape `target_dir` are refused by the tar reader.
pub fn unpack_tar<R: Read>(reader: R, target_dir: &Path) -> Result<(), StoreError> {
    fs::create_dir_all(target_dir).map_err(io_at(target_dir))?;
    let mut ar = tar::Archive::new(reader);
    ar.set_preserve_permissions(true);
    ar.set_preserve_mtime(false);
    ar.set_unpack_xattrs(false);
    ar.unpack(target_dir).map_err(io_at(target_dir))
}

/// Archive a package layout directory into a single tarball, zstd-compressed when `compress`.
pub fn create_package_archive(
    layout_dir: &Path,
    dest: &Path,
    compress: bool,
) -> Result<(), StoreError> {
    let file = File::create(dest).map_err(io_at(dest))?;
    if compress {
        let encoder = zstd::stream::Encoder::new(BufWriter::new(file), 0).map_err(io_at(dest))?;
        let encoder = pack_dir(layout_dir, None, encoder)?;
        let mut inner = encoder.finish().map_err(io_at(dest))?;
        inner.flush().map_err(io_at(dest))?;
    } else {
        let mut writer = pack_dir(layout_dir, None, BufWriter::new(file))?;
        writer.flush().map_err(io_at(dest))?;
    }
    info!(
        "archived {} to {}{}",
        layout_dir.display(),
        dest.display(),
        if compress { " (zstd)" } else { "" }
    );
    Ok(())
}

/// Extract a package tarball, detecting zstd compression from its magic bytes.
pub fn extract_package_archive(archive: &Path, dest: &Path) -> Result<(), StoreError> {
    let mut file = File::open(archive).map_err(io_at(archive))?;
    let mut magic = [0u8; 4];
    let read = read_prefix(&mut file, &mut magic).map_err(io_at(archive))?;
    file.seek(SeekFrom::Start(0)).map_err(io_at(archive))?;

    if read == magic.len() && magic == ZSTD_MAGIC {
        debug!("{} is zstd-compressed", archive.display());
        let decoder = zstd::stream::Decoder::new(file).map_err(io_at(archive))?;
        unpack_tar(decoder, dest)
    } else {
        unpack_tar(BufReader::new(file), dest)
    }
}

fn read_prefix(file: &mut File, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = file.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sha256_bytes;

    fn create_fixture_dir(dir: &Path) {
        fs::write(dir.join("hello.txt"), "hello world").unwrap();
        fs::write(dir.join("binary.bin"), [0u8, 1, 2, 255]).unwrap();
        fs::create_dir_all(dir.join("subdir")).unwrap();
        fs::write(dir.join("subdir").join("nested.txt"), "nested content").unwrap();
        fs::create_dir_all(dir.join("empty_dir")).unwrap();
        std::os::unix::fs::symlink("hello.txt", dir.join("link_to_hello")).unwrap();
    }

    fn entry_names(data: &[u8]) -> Vec<String> {
        let mut ar = tar::Archive::new(data);
        ar.entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn pack_unpack_roundtrip() {
        let src = tempfile::tempdir().unwrap();
        create_fixture_dir(src.path());

        let data = pack_dir(src.path(), None, Vec::new()).unwrap();
        let dst = tempfile::tempdir().unwrap();
        unpack_tar(data.as_slice(), dst.path()).unwrap();

        assert_eq!(
            fs::read_to_string(dst.path().join("hello.txt")).unwrap(),
            "hello world"
        );
        assert_eq!(
            fs::read_to_string(dst.path().join("subdir/nested.txt")).unwrap(),
            "nested content"
        );
        assert!(dst.path().join("empty_dir").is_dir());
        let link = dst.path().join("link_to_hello");
        assert_eq!(fs::read_link(&link).unwrap().to_string_lossy(), "hello.txt");
    }

    #[test]
    fn pack_is_deterministic_across_mtimes_and_modes() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        create_fixture_dir(a.path());
        std::thread::sleep(std::time::Duration::from_millis(20));
        create_fixture_dir(b.path());
        fs::set_permissions(
            b.path().join("hello.txt"),
            fs::Permissions::from_mode(0o600),
        )
        .unwrap();

        let tar_a = pack_dir(a.path(), Some("web"), Vec::new()).unwrap();
        let tar_b = pack_dir(b.path(), Some("web"), Vec::new()).unwrap();
        assert_eq!(sha256_bytes(&tar_a), sha256_bytes(&tar_b));
    }

    #[test]
    fn executable_bit_survives_normalization() {
        let src = tempfile::tempdir().unwrap();
        fs::write(src.path().join("run.sh"), "#!/bin/sh\n").unwrap();
        fs::set_permissions(src.path().join("run.sh"), fs::Permissions::from_mode(0o700)).unwrap();
        let data = pack_dir(src.path(), None, Vec::new()).unwrap();
        let mut ar = tar::Archive::new(data.as_slice());
        let entry = ar.entries().unwrap().next().unwrap().unwrap();
        assert_eq!(entry.header().mode().unwrap(), 0o755);
    }

    #[test]
    fn prefix_wraps_every_entry() {
        let src = tempfile::tempdir().unwrap();
        create_fixture_dir(src.path());
        let data = pack_dir(src.path(), Some("db"), Vec::new()).unwrap();
        let names = entry_names(&data);
        assert_eq!(names[0], "db/");
        assert!(names.iter().all(|n| n.starts_with("db/")));
        assert!(names.contains(&"db/subdir/nested.txt".to_owned()));
    }

    #[test]
    fn entries_are_sorted() {
        let src = tempfile::tempdir().unwrap();
        create_fixture_dir(src.path());
        let names = entry_names(&pack_dir(src.path(), None, Vec::new()).unwrap());
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
    }

    #[test]
    fn compressed_archive_roundtrip() {
        let src = tempfile::tempdir().unwrap();
        create_fixture_dir(src.path());
        let out = tempfile::tempdir().unwrap();

        for compress in [true, false] {
            let archive = out.path().join(format!("pkg-{compress}.tar"));
            create_package_archive(src.path(), &archive, compress).unwrap();
            let head = fs::read(&archive).unwrap();
            assert_eq!(head.starts_with(&ZSTD_MAGIC), compress);

            let dst = out.path().join(format!("x-{compress}"));
            extract_package_archive(&archive, &dst).unwrap();
            assert_eq!(
                fs::read_to_string(dst.join("subdir/nested.txt")).unwrap(),
                "nested content"
            );
        }
    }

    #[test]
    fn write_tar_file_creates_parent() {
        let src = tempfile::tempdir().unwrap();
        fs::write(src.path().join("a"), "a").unwrap();
        let out = tempfile::tempdir().unwrap();
        let dest = out.path().join("components/web.tar");
        write_tar_file(src.path(), &dest, Some("web")).unwrap();
        assert!(dest.is_file());
    }
}
