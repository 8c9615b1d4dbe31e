//! Packaging a staged directory tree as an EPUB (ZIP) archive.

use std::fs::{self, File};
use std::io::{self, Seek, Write};
use std::path::Path;

use zip::CompressionMethod;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

use crate::cancel::Cancellation;
use crate::error::{Error, Result};

/// Relative paths (forward slashes) of every regular file under `root`, sorted.
pub fn walk_files(root: &Path) -> io::Result<Vec<String>> {
    let mut files = Vec::new();
    let mut pending = vec![(root.to_path_buf(), String::new())];

    while let Some((dir, rel)) = pending.pop() {
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let child_rel = if rel.is_empty() {
                name
            } else {
                format!("{rel}/{name}")
            };
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                pending.push((entry.path(), child_rel));
            } else if file_type.is_file() {
                files.push(child_rel);
            }
        }
    }

    files.sort();
    Ok(files)
}

#[cfg(unix)]
fn file_mode(path: &Path) -> io::Result<u32> {
    use std::os::unix::fs::PermissionsExt;
    Ok(fs::metadata(path)?.permissions().mode() & 0o777)
}

#[cfg(not(unix))]
fn file_mode(_path: &Path) -> io::Result<u32> {
    Ok(0o644)
}

/// Write the tree under `stage` as an EPUB archive.
///
/// `mimetype` goes first and uncompressed; everything else follows in path
/// order, deflated.
pub fn write_epub_tree<W: Write + Seek>(
    stage: &Path,
    writer: W,
    cancel: &Cancellation,
) -> Result<W> {
    let mimetype_path = stage.join("mimetype");
    if !mimetype_path.is_file() {
        return Err(Error::MissingElement("mimetype".into()));
    }

    let mut zip = ZipWriter::new(writer);
    let stored = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Stored)
        .unix_permissions(0o644);
    let deflated = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    zip.start_file("mimetype", stored)?;
    zip.write_all(&fs::read(&mimetype_path)?)?;

    for rel in walk_files(stage)? {
        if rel == "mimetype" {
            continue;
        }
        cancel.check()?;

        let path = stage.join(&rel);
        let options = deflated.unix_permissions(file_mode(&path)?);
        zip.start_file(rel.as_str(), options)?;
        io::copy(&mut File::open(&path)?, &mut zip)?;
    }

    Ok(zip.finish()?)
}

/// Package `stage` into `out` atomically: the archive is written to a
/// temporary file beside `out` and renamed into place only when complete.
pub fn write_epub_file(stage: &Path, out: &Path, cancel: &Cancellation) -> Result<()> {
    let parent = match out.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)?;

    let mut tmp = tempfile::Builder::new()
        .prefix(".tomecat-")
        .suffix(".epub.tmp")
        .tempfile_in(parent)?;
    write_epub_tree(stage, tmp.as_file_mut(), cancel)?;
    tmp.as_file().sync_all()?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(tmp.path(), fs::Permissions::from_mode(0o644))?;
    }

    tmp.persist(out).map_err(|e| Error::Io(e.error))?;
    tracing::debug!(path = %out.display(), "wrote archive");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::{Cursor, Read};

    use zip::ZipArchive;

    use super::*;

    fn stage() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("META-INF")).unwrap();
        fs::create_dir_all(dir.path().join("OEBPS/Volumes/v0001")).unwrap();
        fs::write(dir.path().join("mimetype"), "application/epub+zip").unwrap();
        fs::write(dir.path().join("META-INF/container.xml"), "<container/>").unwrap();
        fs::write(dir.path().join("OEBPS/content.opf"), "<package/>").unwrap();
        fs::write(dir.path().join("OEBPS/Volumes/v0001/a.xhtml"), "<html/>").unwrap();
        dir
    }

    #[test]
    fn test_walk_files_sorted() {
        let dir = stage();
        assert_eq!(
            walk_files(dir.path()).unwrap(),
            vec![
                "META-INF/container.xml",
                "OEBPS/Volumes/v0001/a.xhtml",
                "OEBPS/content.opf",
                "mimetype",
            ]
        );
    }

    #[test]
    fn test_mimetype_first_and_stored() {
        let dir = stage();
        let cursor = write_epub_tree(dir.path(), Cursor::new(Vec::new()), &Cancellation::new())
            .unwrap();

        let mut archive = ZipArchive::new(Cursor::new(cursor.into_inner())).unwrap();
        assert_eq!(archive.len(), 4);

        let mut first = archive.by_index(0).unwrap();
        assert_eq!(first.name(), "mimetype");
        assert_eq!(first.compression(), CompressionMethod::Stored);
        let mut body = String::new();
        first.read_to_string(&mut body).unwrap();
        assert_eq!(body, "application/epub+zip");
        drop(first);

        let names: Vec<_> = archive.file_names().map(str::to_string).collect();
        assert!(names.contains(&"OEBPS/Volumes/v0001/a.xhtml".to_string()));
        let chapter = archive.by_name("OEBPS/content.opf").unwrap();
        assert_eq!(chapter.compression(), CompressionMethod::Deflated);
    }

    #[test]
    fn test_missing_mimetype() {
        let dir = stage();
        fs::remove_file(dir.path().join("mimetype")).unwrap();
        let err = write_epub_tree(dir.path(), Cursor::new(Vec::new()), &Cancellation::new())
            .unwrap_err();
        assert!(matches!(err, Error::MissingElement(name) if name == "mimetype"));
    }

    #[test]
    fn test_write_epub_file_is_atomic_on_cancel() {
        let dir = stage();
        let out_dir = tempfile::tempdir().unwrap();
        let out = out_dir.path().join("book.epub");

        let cancel = Cancellation::new();
        cancel.cancel();
        let err = write_epub_file(dir.path(), &out, &cancel).unwrap_err();
        assert!(err.is_cancelled());
        assert!(!out.exists());
        assert_eq!(fs::read_dir(out_dir.path()).unwrap().count(), 0);

        write_epub_file(dir.path(), &out, &Cancellation::new()).unwrap();
        assert!(out.is_file());
    }
}
