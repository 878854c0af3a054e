//! Tar encoding and decoding of transfer payloads.
//!
//! These functions are synchronous and incremental: they read or write the
//! archive as they walk the tree, so they can sit on one end of a
//! [`pipe`](crate::pipe) on a blocking thread.
//!
//! Archives are rooted at the source's base name: pushing `/tmp/zoo` to
//! `/data/dst` creates `/data/dst/zoo/...`.

use std::fs;
use std::io::{self, Read, Write};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

/// Writes a tar stream of `src` (file or directory tree) to `w`.
///
/// Symlinks are archived as links, not followed. Empty directories are kept.
pub fn tar_path(w: impl Write, src: &Path) -> io::Result<()> {
    let name = match src.file_name() {
        Some(name) => name.to_owned(),
        None => src
            .canonicalize()?
            .file_name()
            .map(ToOwned::to_owned)
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("cannot archive {}: no base name", src.display()),
                )
            })?,
    };

    let meta = fs::symlink_metadata(src)?;
    let mut ar = tar::Builder::new(w);
    ar.follow_symlinks(false);
    if meta.is_dir() {
        ar.append_dir_all(&name, src)?;
    } else {
        ar.append_path_with_name(src, &name)?;
    }
    ar.into_inner()?.flush()
}

/// Writes a single-entry tar stream holding `bytes` as a regular file
/// called `name`.
pub fn tar_bytes(w: impl Write, name: &str, bytes: &[u8]) -> io::Result<()> {
    let mtime = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs());

    let mut header = tar::Header::new_gnu();
    header.set_entry_type(tar::EntryType::Regular);
    header.set_size(bytes.len() as u64);
    header.set_mode(0o644);
    header.set_mtime(mtime);

    let mut ar = tar::Builder::new(w);
    ar.append_data(&mut header, name, bytes)?;
    ar.into_inner()?.flush()
}

/// Extracts a tar stream from `r` into `dst`, creating `dst` if needed.
///
/// Entries escaping `dst` are rejected by the tar reader. Bytes after the
/// end-of-archive marker are drained so the producer never sees a closed
/// pipe on a successful transfer.
pub fn untar(r: impl Read, dst: &Path) -> io::Result<()> {
    fs::create_dir_all(dst)?;
    let mut archive = tar::Archive::new(r);
    archive.set_preserve_permissions(true);
    archive.set_overwrite(true);
    archive.unpack(dst)?;
    drain(archive.into_inner())
}

/// Copies the first regular file of a tar stream from `r` into `w`.
///
/// Fails with [`io::ErrorKind::InvalidData`] if the archive holds no regular
/// file. Returns the number of bytes written.
pub fn untar_bytes(r: impl Read, mut w: impl Write) -> io::Result<u64> {
    let mut archive = tar::Archive::new(r);
    let mut written = None;
    for entry in archive.entries()? {
        let mut entry = entry?;
        if written.is_none() && entry.header().entry_type().is_file() {
            written = Some(io::copy(&mut entry, &mut w)?);
        }
    }
    w.flush()?;
    drain(archive.into_inner())?;
    written.ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "archive holds no file"))
}

/// Consumes whatever is left in `r`.
fn drain(mut r: impl Read) -> io::Result<()> {
    io::copy(&mut r, &mut io::sink()).map(|_| ())
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    /// Builds `root/zoo` with nested dirs, an empty dir and a few files.
    fn make_tree(root: &Path) -> PathBuf {
        let zoo = root.join("zoo");
        fs::create_dir_all(zoo.join("bar")).unwrap();
        fs::create_dir_all(zoo.join("baz/qux/deep")).unwrap();
        fs::write(zoo.join("a.txt"), b"alpha").unwrap();
        fs::write(zoo.join("b.txt"), vec![7u8; 70_000]).unwrap();
        fs::write(zoo.join("baz/d.txt"), b"delta").unwrap();
        fs::write(zoo.join("baz/qux/e.txt"), b"echo").unwrap();
        fs::write(zoo.join("baz/qux/deep/f.txt"), b"").unwrap();
        zoo
    }

    #[test]
    fn tree_roundtrip_keeps_layout_and_bytes() {
        let src = tempfile::tempdir().unwrap();
        let zoo = make_tree(src.path());

        let mut buf = Vec::new();
        tar_path(&mut buf, &zoo).unwrap();

        let dst = tempfile::tempdir().unwrap();
        let out = dst.path().join("out");
        untar(io::Cursor::new(buf), &out).unwrap();

        let got = out.join("zoo");
        assert!(got.join("bar").is_dir());
        assert_eq!(fs::read(got.join("a.txt")).unwrap(), b"alpha");
        assert_eq!(fs::read(got.join("b.txt")).unwrap(), vec![7u8; 70_000]);
        assert_eq!(fs::read(got.join("baz/qux/e.txt")).unwrap(), b"echo");
        assert!(fs::read(got.join("baz/qux/deep/f.txt")).unwrap().is_empty());
    }

    #[test]
    fn single_file_is_named_after_source() {
        let src = tempfile::tempdir().unwrap();
        let file = src.path().join("app.apk");
        fs::write(&file, b"PK").unwrap();

        let mut buf = Vec::new();
        tar_path(&mut buf, &file).unwrap();

        let dst = tempfile::tempdir().unwrap();
        untar(io::Cursor::new(buf), dst.path()).unwrap();
        assert_eq!(fs::read(dst.path().join("app.apk")).unwrap(), b"PK");
    }

    #[test]
    fn bytes_roundtrip() {
        let mut buf = Vec::new();
        tar_bytes(&mut buf, "config.json", b"{\"k\":1}").unwrap();

        let mut out = Vec::new();
        let n = untar_bytes(io::Cursor::new(buf), &mut out).unwrap();
        assert_eq!(n, 7);
        assert_eq!(out, b"{\"k\":1}");
    }

    #[test]
    fn decoders_drain_trailing_bytes() {
        let mut buf = Vec::new();
        tar_bytes(&mut buf, "f", b"x").unwrap();
        buf.extend(vec![0u8; 10 * 1024]);
        let len = buf.len() as u64;

        let mut cursor = io::Cursor::new(buf);
        untar_bytes(&mut cursor, io::sink()).unwrap();
        assert_eq!(cursor.position(), len);
    }

    #[test]
    fn untar_bytes_without_file_fails() {
        let src = tempfile::tempdir().unwrap();
        let empty = src.path().join("empty");
        fs::create_dir(&empty).unwrap();

        let mut buf = Vec::new();
        tar_path(&mut buf, &empty).unwrap();

        let err = untar_bytes(io::Cursor::new(buf), io::sink()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn missing_source_fails() {
        let src = tempfile::tempdir().unwrap();
        let err = tar_path(Vec::new(), &src.path().join("nope")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
