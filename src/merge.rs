//! Merging several EPUB volumes into one omnibus archive.
//!
//! Each volume's payload is copied under `OEBPS/Volumes/vNNNN/`, its manifest
//! ids are namespaced with `vNNNN_`, and a fresh package document and
//! navigation document are synthesized for the result.

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::cancel::Cancellation;
use crate::epub::archive::walk_files;
use crate::epub::{
    CONTAINER_XML, DcValue, ItemRef, MIMETYPE, Manifest, ManifestItem, MetaNode, Metadata,
    NavItem, PackageDocument, Spine, Volume, render_nav_document, write_epub_file,
};
use crate::error::{Error, Result};
use crate::util::{
    add_property, has_property, href_to_path, join_href, normalize_epub_path, remove_property,
};

const OPF_NS: &str = "http://www.idpf.org/2007/opf";
const DC_NS: &str = "http://purl.org/dc/elements/1.1/";
const VOCAB_PREFIX: &str = "tomecat: urn:x-tomecat:vocab#";

/// Options for a merge run.
#[derive(Debug, Clone, Default)]
pub struct MergeOptions {
    /// Where the merged archive is written.
    pub out_path: PathBuf,
    /// Overrides the inherited title.
    pub title: Option<String>,
    /// Overrides the inherited language.
    pub language: Option<String>,
    /// Used verbatim, in order, instead of the merged creator list.
    pub creators: Vec<String>,
}

impl MergeOptions {
    pub fn new(out_path: impl Into<PathBuf>) -> Self {
        Self {
            out_path: out_path.into(),
            ..Self::default()
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn with_creators<I, S>(mut self, creators: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.creators = creators.into_iter().map(Into::into).collect();
        self
    }
}

/// What a successful merge produced.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "cli", derive(serde::Serialize))]
pub struct MergeSummary {
    pub output: PathBuf,
    pub volumes: usize,
    pub manifest_items: usize,
    pub spine_items: usize,
    pub cover_id: Option<String>,
    pub identifier: String,
}

/// Merges EPUB volumes.
///
/// # Example
///
/// ```no_run
/// use tomecat::{MergeOptions, Merger};
///
/// let summary = Merger::new(MergeOptions::new("omnibus.epub").with_title("The Saga"))
///     .merge(&["vol1.epub", "vol2.epub"])?;
/// println!("{} volumes", summary.volumes);
/// # Ok::<(), tomecat::Error>(())
/// ```
pub struct Merger {
    options: MergeOptions,
    cancel: Cancellation,
}

impl Merger {
    pub fn new(options: MergeOptions) -> Self {
        Self {
            options,
            cancel: Cancellation::new(),
        }
    }

    /// Observe `cancel` at volume boundaries and between file copies.
    pub fn with_cancellation(mut self, cancel: Cancellation) -> Self {
        self.cancel = cancel;
        self
    }

    /// Merge `sources` in order into the configured output path.
    pub fn merge<P: AsRef<Path>>(&self, sources: &[P]) -> Result<MergeSummary> {
        if sources.len() < 2 {
            return Err(Error::NotEnoughSources(sources.len()));
        }
        if self.options.out_path.as_os_str().is_empty() {
            return Err(Error::MissingOutput);
        }

        // Dropping this list removes every extraction directory.
        let mut volumes: Vec<Volume> = Vec::with_capacity(sources.len());
        for (index, source) in sources.iter().enumerate() {
            self.cancel.check()?;
            volumes.push(Volume::load(index, source.as_ref(), &self.cancel)?);
        }

        let stage = tempfile::Builder::new()
            .prefix("tomecat-stage-")
            .tempdir()?;
        let oebps = stage.path().join("OEBPS");
        fs::create_dir_all(&oebps)?;

        let mut manifest = Manifest::default();
        let mut spine = Spine::default();
        let mut cover: Option<String> = None;

        for volume in &mut volumes {
            self.cancel.check()?;
            copy_payload(volume, &oebps.join(&volume.prefix), &self.cancel)
                .map_err(|e| e.for_source(&volume.source))?;
            merge_volume(volume, &mut manifest, &mut spine, &mut cover);
        }

        manifest.items.push(ManifestItem {
            id: "nav".into(),
            href: "nav.xhtml".into(),
            media_type: "application/xhtml+xml".into(),
            properties: "nav".into(),
            fallback: None,
        });

        fs::write(
            oebps.join("nav.xhtml"),
            render_nav_document(&build_nav(&volumes)),
        )?;

        let package = build_package(&volumes, manifest, spine, &self.options, cover.as_deref());
        fs::write(oebps.join("content.opf"), package.to_xml())?;

        let meta_inf = stage.path().join("META-INF");
        fs::create_dir_all(&meta_inf)?;
        fs::write(meta_inf.join("container.xml"), CONTAINER_XML)?;
        fs::write(stage.path().join("mimetype"), MIMETYPE)?;

        self.cancel.check()?;
        write_epub_file(stage.path(), &self.options.out_path, &self.cancel)?;

        let summary = MergeSummary {
            output: self.options.out_path.clone(),
            volumes: volumes.len(),
            manifest_items: package.manifest.items.len(),
            spine_items: package.spine.itemrefs.len(),
            cover_id: cover,
            identifier: package
                .unique_identifier_value()
                .unwrap_or_default()
                .to_string(),
        };
        tracing::info!(
            output = %summary.output.display(),
            volumes = summary.volumes,
            spine = summary.spine_items,
            "merged"
        );
        Ok(summary)
    }
}

/// Copy a volume's package directory into `dest`, minus its package and
/// navigation documents (and the container files when they share a root).
fn copy_payload(volume: &Volume, dest: &Path, cancel: &Cancellation) -> Result<()> {
    let package_file = volume
        .package_rel
        .rsplit('/')
        .next()
        .unwrap_or(volume.package_rel.as_str());
    let nav_rel = volume.nav_href.as_deref().map(href_to_path);
    let at_root = volume.package_at_root();

    for rel in walk_files(&volume.package_dir)? {
        cancel.check()?;
        if rel == package_file || nav_rel.as_deref() == Some(rel.as_str()) {
            continue;
        }
        if at_root && (rel == "mimetype" || rel.starts_with("META-INF/")) {
            continue;
        }

        let target = dest.join(&rel);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(volume.package_dir.join(&rel), &target)?;
    }
    Ok(())
}

/// Fold one volume's manifest and spine into the merged ones.
fn merge_volume(
    volume: &mut Volume,
    manifest: &mut Manifest,
    spine: &mut Spine,
    cover: &mut Option<String>,
) {
    let items: Vec<&ManifestItem> = volume
        .package
        .manifest
        .items
        .iter()
        .filter(|item| !has_property(&item.properties, "nav"))
        .collect();

    // Every id is remapped before any reference is rewritten.
    let id_map: HashMap<&str, String> = items
        .iter()
        .map(|item| (item.id.as_str(), volume.remap_id(&item.id)))
        .collect();
    let mut hrefs: HashMap<&str, String> = HashMap::new();

    for item in &items {
        let id = id_map[item.id.as_str()].clone();
        let href = normalize_epub_path(&format!("{}/{}", volume.prefix, item.href));

        let fallback = item.fallback.as_deref().and_then(|f| id_map.get(f).cloned());
        if item.fallback.is_some() && fallback.is_none() {
            tracing::debug!(item = %item.id, "dropping unresolved fallback");
        }

        let supplies_cover = match &volume.cover_id {
            Some(cover_id) => *cover_id == item.id,
            None => has_property(&item.properties, "cover-image"),
        };
        let properties = if cover.is_none() && supplies_cover {
            *cover = Some(id.clone());
            add_property(&item.properties, "cover-image")
        } else {
            remove_property(&item.properties, "cover-image")
        };

        hrefs.insert(item.id.as_str(), href.clone());
        manifest.items.push(ManifestItem {
            id,
            href,
            media_type: item.media_type.clone(),
            properties,
            fallback,
        });
    }

    if spine.page_progression_direction.is_none() {
        spine.page_progression_direction = volume.package.spine.page_progression_direction.clone();
    }

    let mut first_href = None;
    for itemref in &volume.package.spine.itemrefs {
        let Some(id) = id_map.get(itemref.idref.as_str()) else {
            tracing::warn!(
                source = %volume.source.display(),
                idref = %itemref.idref,
                "dropping spine reference to unknown item"
            );
            continue;
        };
        if first_href.is_none() {
            first_href = hrefs.get(itemref.idref.as_str()).cloned();
        }
        spine.itemrefs.push(ItemRef {
            idref: id.clone(),
            linear: itemref.linear.clone(),
        });
    }
    volume.first_href = first_href;
}

/// One top-level entry per volume, with the volume's own TOC beneath it.
pub fn build_nav(volumes: &[Volume]) -> Vec<NavItem> {
    volumes.iter().filter_map(volume_nav_entry).collect()
}

fn volume_nav_entry(volume: &Volume) -> Option<NavItem> {
    if volume.nav.is_empty() && volume.first_href.is_none() {
        return None;
    }

    // TOC hrefs are relative to the navigation document, not the package.
    let nav_dir = volume
        .nav_href
        .as_deref()
        .map(|href| href.split('#').next().unwrap_or(href))
        .and_then(|path| path.rsplit_once('/'))
        .map(|(dir, _)| dir)
        .filter(|dir| !dir.is_empty());
    let base = match nav_dir {
        Some(dir) => format!("{}/{}", volume.prefix, dir),
        None => volume.prefix.clone(),
    };

    let children = rebase_nav(&volume.nav, &base);
    let href = volume
        .first_href
        .clone()
        .or_else(|| children.first().map(|child| child.href.clone()))
        .unwrap_or_default();

    Some(NavItem {
        title: volume.display_name.clone(),
        href,
        children,
    })
}

fn rebase_nav(items: &[NavItem], base: &str) -> Vec<NavItem> {
    items
        .iter()
        .map(|item| NavItem {
            title: item.title.clone(),
            href: if item.href.is_empty() {
                String::new()
            } else {
                join_href(base, &item.href)
            },
            children: rebase_nav(&item.children, base),
        })
        .collect()
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Synthesize the merged package document.
pub fn build_package(
    volumes: &[Volume],
    manifest: Manifest,
    spine: Spine,
    options: &MergeOptions,
    cover: Option<&str>,
) -> PackageDocument {
    let first = volumes.first();

    let title = non_blank(options.title.as_deref())
        .or_else(|| first.and_then(|v| v.package.metadata.first_title()))
        .or_else(|| first.map(|v| v.display_name.as_str()))
        .unwrap_or("Merged EPUB")
        .to_string();

    let language = non_blank(options.language.as_deref())
        .or_else(|| first.and_then(|v| v.package.metadata.first_language()))
        .unwrap_or("en")
        .to_string();

    let mut creators: Vec<String> = options
        .creators
        .iter()
        .filter(|c| !c.trim().is_empty())
        .cloned()
        .collect();
    if creators.is_empty() {
        let merged: BTreeSet<&str> = volumes
            .iter()
            .flat_map(|v| v.package.metadata.creators.iter())
            .map(|c| c.value.trim())
            .filter(|c| !c.is_empty())
            .collect();
        creators = merged.into_iter().map(str::to_string).collect();
    }
    if creators.is_empty() {
        creators.push("Unknown".into());
    }

    let identifier = format!("urn:uuid:{}", Uuid::new_v4());
    let modified = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string();

    let mut meta = vec![
        MetaNode::property("tomecat:source-count", volumes.len().to_string()),
        MetaNode::property("dcterms:modified", modified),
    ];
    if let Some(cover) = cover {
        meta.push(MetaNode::named("cover", cover));
    }

    PackageDocument {
        version: "3.0".into(),
        unique_identifier: "bookid".into(),
        language: language.clone(),
        prefix: VOCAB_PREFIX.into(),
        namespaces: vec![
            ("xmlns".into(), OPF_NS.into()),
            ("xmlns:dc".into(), DC_NS.into()),
            ("xmlns:opf".into(), OPF_NS.into()),
        ],
        metadata: Metadata {
            titles: vec![DcValue::new(title)],
            languages: vec![DcValue::new(language)],
            creators: creators.into_iter().map(DcValue::new).collect(),
            identifiers: vec![DcValue {
                id: Some("bookid".into()),
                value: identifier,
            }],
            meta,
        },
        manifest,
        spine,
    }
}
