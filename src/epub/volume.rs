//! A source EPUB extracted to a private temporary directory.

use std::fs::{self, File};
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use zip::ZipArchive;

use super::container::parse_container;
use super::nav::{NavItem, parse_nav};
use super::package::{PackageDocument, parse_package};
use crate::cancel::Cancellation;
use crate::error::{Error, Result};
use crate::util::{href_to_path, read_text_file};

/// One loaded source archive.
///
/// The extraction directory lives as long as the volume and is removed when
/// it is dropped.
#[derive(Debug)]
pub struct Volume {
    /// Zero-based position in the input list.
    pub index: usize,
    pub source: PathBuf,
    temp: TempDir,
    /// Package document path inside the archive, e.g. `OEBPS/content.opf`.
    pub package_rel: String,
    /// Directory containing the package document on disk.
    pub package_dir: PathBuf,
    pub package: PackageDocument,
    /// Manifest href of the navigation document, if the package declares one.
    pub nav_href: Option<String>,
    /// Parsed TOC; empty when the volume has no usable navigation document.
    pub nav: Vec<NavItem>,
    pub cover_id: Option<String>,
    pub display_name: String,
    /// Merged-archive directory for this volume's payload, `Volumes/vNNNN`.
    pub prefix: String,
    /// Id namespace for this volume's manifest entries, `vNNNN`.
    pub id_tag: String,
    /// First resolved spine href in the merged archive.
    pub first_href: Option<String>,
}

impl Volume {
    /// Extract and parse `source`.
    ///
    /// Errors (other than cancellation) carry the source path.
    pub fn load(index: usize, source: &Path, cancel: &Cancellation) -> Result<Self> {
        Self::load_inner(index, source, cancel).map_err(|e| e.for_source(source))
    }

    fn load_inner(index: usize, source: &Path, cancel: &Cancellation) -> Result<Self> {
        cancel.check()?;
        let temp = tempfile::Builder::new()
            .prefix("tomecat-volume-")
            .tempdir()?;

        cancel.check()?;
        extract_archive(source, temp.path(), cancel)?;
        cancel.check()?;

        let container = fs::read(temp.path().join("META-INF").join("container.xml"))
            .map_err(|e| match e.kind() {
                io::ErrorKind::NotFound => {
                    Error::MissingElement("META-INF/container.xml".into())
                }
                _ => Error::Io(e),
            })?;
        let package_rel = parse_container(&container)?;

        cancel.check()?;
        let package_path = temp.path().join(&package_rel);
        let package_text = read_text_file(&package_path).map_err(|e| match e {
            Error::Io(io) if io.kind() == io::ErrorKind::NotFound => {
                Error::InvalidEpub(format!("package document {package_rel} not found"))
            }
            other => other,
        })?;
        let package = parse_package(&package_text)?;
        let package_dir = package_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| temp.path().to_path_buf());

        let nav_href = package.manifest.nav_item().map(|item| item.href.clone());
        let nav = match &nav_href {
            Some(href) => load_nav(&package_dir, href, source)?,
            None => Vec::new(),
        };

        let cover_id = detect_cover(&package);
        let display_name = package
            .metadata
            .first_title()
            .map(str::to_string)
            .unwrap_or_else(|| format!("Volume {}", index + 1));

        tracing::debug!(
            source = %source.display(),
            package = %package_rel,
            items = package.manifest.items.len(),
            toc = nav.len(),
            "loaded volume"
        );

        Ok(Self {
            index,
            source: source.to_path_buf(),
            temp,
            package_rel,
            package_dir,
            package,
            nav_href,
            nav,
            cover_id,
            display_name,
            prefix: format!("Volumes/v{:04}", index + 1),
            id_tag: format!("v{:04}", index + 1),
            first_href: None,
        })
    }

    /// Root of the extracted archive.
    pub fn root(&self) -> &Path {
        self.temp.path()
    }

    /// Whether the package document sits at the archive root.
    pub fn package_at_root(&self) -> bool {
        self.package_dir == self.root()
    }

    /// On-disk path of a manifest href.
    pub fn resolve_href(&self, href: &str) -> PathBuf {
        self.package_dir.join(href_to_path(href))
    }

    /// Merged-archive id for one of this volume's manifest ids.
    pub fn remap_id(&self, id: &str) -> String {
        format!("{}_{}", self.id_tag, id)
    }

    /// A volume around an in-memory package, for exercising merge policy.
    #[cfg(test)]
    pub(crate) fn stub(index: usize, package: PackageDocument) -> Self {
        let temp = tempfile::tempdir().expect("tempdir");
        let display_name = package
            .metadata
            .first_title()
            .map(str::to_string)
            .unwrap_or_else(|| format!("Volume {}", index + 1));
        Self {
            index,
            source: PathBuf::from(format!("vol{}.epub", index + 1)),
            package_rel: "content.opf".into(),
            package_dir: temp.path().to_path_buf(),
            temp,
            package,
            nav_href: None,
            nav: Vec::new(),
            cover_id: None,
            display_name,
            prefix: format!("Volumes/v{:04}", index + 1),
            id_tag: format!("v{:04}", index + 1),
            first_href: None,
        }
    }
}

/// Read and parse the navigation document; a missing file or a document
/// without a TOC is treated as no navigation.
fn load_nav(package_dir: &Path, href: &str, source: &Path) -> Result<Vec<NavItem>> {
    let path = package_dir.join(href_to_path(href));
    let bytes = match fs::read(&path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            tracing::warn!(source = %source.display(), href, "navigation document missing");
            return Ok(Vec::new());
        }
        Err(e) => return Err(e.into()),
    };

    match parse_nav(&bytes) {
        Ok(items) => Ok(items),
        Err(Error::NavNotFound) => {
            tracing::warn!(source = %source.display(), href, "navigation document has no toc");
            Ok(Vec::new())
        }
        Err(e) => Err(e),
    }
}

/// EPUB 2 `<meta name="cover">` first, then the EPUB 3 `cover-image` item.
fn detect_cover(package: &PackageDocument) -> Option<String> {
    package
        .metadata
        .meta
        .iter()
        .filter(|meta| {
            meta.name
                .as_deref()
                .is_some_and(|name| name.eq_ignore_ascii_case("cover"))
        })
        .find_map(|meta| {
            meta.content
                .as_deref()
                .map(str::trim)
                .filter(|content| !content.is_empty())
                .map(str::to_string)
        })
        .or_else(|| {
            package
                .manifest
                .find_by_property("cover-image")
                .map(|item| item.id.clone())
        })
}

/// Extract every entry of `source` under `dest`, refusing entries that would
/// land outside it.
fn extract_archive(source: &Path, dest: &Path, cancel: &Cancellation) -> Result<()> {
    let file = File::open(source)?;
    let mut archive = ZipArchive::new(BufReader::new(file))?;

    for i in 0..archive.len() {
        cancel.check()?;
        let mut entry = archive.by_index(i)?;
        let Some(rel) = entry.enclosed_name() else {
            return Err(Error::PathTraversal(entry.name().to_string()));
        };
        let target = dest.join(rel);

        if entry.is_dir() {
            fs::create_dir_all(&target)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut out = File::create(&target)?;
        io::copy(&mut entry, &mut out)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Some(mode) = entry.unix_mode() {
                // Keep extracted files readable and writable by us.
                fs::set_permissions(&target, fs::Permissions::from_mode((mode & 0o777) | 0o600))?;
            }
        }
    }

    Ok(())
}
