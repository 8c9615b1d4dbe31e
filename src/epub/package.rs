//! OPF package document model, parser and writer.

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

use crate::error::{Error, Result};
use crate::util::{Attrs, escape_xml, has_property, local_name, resolve_entity};

/// Parsed (or synthesized) OPF package document.
#[derive(Debug, Clone, Default)]
pub struct PackageDocument {
    pub version: String,
    /// Id of the canonical `dc:identifier`.
    pub unique_identifier: String,
    /// `xml:lang` on the package element.
    pub language: String,
    /// `prefix` attribute (vocabulary prefix mappings).
    pub prefix: String,
    /// Namespace declarations on the package element, e.g. `("xmlns:dc", "...")`.
    pub namespaces: Vec<(String, String)>,
    pub metadata: Metadata,
    pub manifest: Manifest,
    pub spine: Spine,
}

/// A Dublin Core value with its optional element id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DcValue {
    pub id: Option<String>,
    pub value: String,
}

impl DcValue {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            id: None,
            value: value.into(),
        }
    }
}

/// A `<meta>` node: EPUB 3 `property`/value or EPUB 2 `name`/`content`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetaNode {
    pub property: Option<String>,
    pub value: String,
    pub name: Option<String>,
    pub content: Option<String>,
    pub refines: Option<String>,
    pub id: Option<String>,
}

impl MetaNode {
    pub fn property(property: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            property: Some(property.into()),
            value: value.into(),
            ..Self::default()
        }
    }

    pub fn named(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            content: Some(content.into()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Metadata {
    pub titles: Vec<DcValue>,
    pub languages: Vec<DcValue>,
    pub creators: Vec<DcValue>,
    pub identifiers: Vec<DcValue>,
    pub meta: Vec<MetaNode>,
}

impl Metadata {
    /// First title with non-blank text.
    pub fn first_title(&self) -> Option<&str> {
        first_non_blank(&self.titles)
    }

    pub fn first_language(&self) -> Option<&str> {
        first_non_blank(&self.languages)
    }
}

fn first_non_blank(values: &[DcValue]) -> Option<&str> {
    values
        .iter()
        .map(|v| v.value.trim())
        .find(|v| !v.is_empty())
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManifestItem {
    pub id: String,
    /// Relative to the package document's directory.
    pub href: String,
    pub media_type: String,
    /// Space-separated property tokens.
    pub properties: String,
    pub fallback: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct Manifest {
    pub items: Vec<ManifestItem>,
}

impl Manifest {
    pub fn get(&self, id: &str) -> Option<&ManifestItem> {
        self.items.iter().find(|item| item.id == id)
    }

    /// First item carrying the `property` token.
    pub fn find_by_property(&self, property: &str) -> Option<&ManifestItem> {
        self.items
            .iter()
            .find(|item| has_property(&item.properties, property))
    }

    /// The navigation document item, if any.
    pub fn nav_item(&self) -> Option<&ManifestItem> {
        self.find_by_property("nav")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemRef {
    pub idref: String,
    pub linear: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct Spine {
    pub itemrefs: Vec<ItemRef>,
    pub page_progression_direction: Option<String>,
    /// EPUB 2 NCX reference.
    pub toc: Option<String>,
}

impl PackageDocument {
    /// Text of the identifier whose id is the package's unique-identifier.
    pub fn unique_identifier_value(&self) -> Option<&str> {
        self.metadata
            .identifiers
            .iter()
            .find(|ident| ident.id.as_deref() == Some(self.unique_identifier.as_str()))
            .map(|ident| ident.value.as_str())
    }

    /// Serialize as an OPF document.
    pub fn to_xml(&self) -> String {
        let mut opf = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<package");

        let mut namespaces = self.namespaces.clone();
        for (key, uri) in [
            ("xmlns", "http://www.idpf.org/2007/opf"),
            ("xmlns:dc", "http://purl.org/dc/elements/1.1/"),
        ] {
            if !namespaces.iter().any(|(k, _)| k == key) {
                namespaces.push((key.to_string(), uri.to_string()));
            }
        }
        for (key, uri) in &namespaces {
            opf.push_str(&format!(" {}=\"{}\"", key, escape_xml(uri)));
        }

        opf.push_str(&format!(
            " version=\"{}\" unique-identifier=\"{}\"",
            escape_xml(&self.version),
            escape_xml(&self.unique_identifier)
        ));
        if !self.language.is_empty() {
            opf.push_str(&format!(" xml:lang=\"{}\"", escape_xml(&self.language)));
        }
        if !self.prefix.is_empty() {
            opf.push_str(&format!(" prefix=\"{}\"", escape_xml(&self.prefix)));
        }
        opf.push_str(">\n  <metadata>\n");

        let dc_fields = [
            ("title", &self.metadata.titles),
            ("creator", &self.metadata.creators),
            ("language", &self.metadata.languages),
            ("identifier", &self.metadata.identifiers),
        ];
        for (element, values) in dc_fields {
            for value in values {
                opf.push_str(&format!("    <dc:{element}"));
                push_opt_attr(&mut opf, "id", value.id.as_deref());
                opf.push_str(&format!(">{}</dc:{element}>\n", escape_xml(&value.value)));
            }
        }

        for meta in &self.metadata.meta {
            opf.push_str("    <meta");
            push_opt_attr(&mut opf, "property", meta.property.as_deref());
            push_opt_attr(&mut opf, "name", meta.name.as_deref());
            push_opt_attr(&mut opf, "content", meta.content.as_deref());
            push_opt_attr(&mut opf, "refines", meta.refines.as_deref());
            push_opt_attr(&mut opf, "id", meta.id.as_deref());
            if meta.property.is_some() {
                opf.push_str(&format!(">{}</meta>\n", escape_xml(&meta.value)));
            } else {
                opf.push_str("/>\n");
            }
        }
        opf.push_str("  </metadata>\n  <manifest>\n");

        for item in &self.manifest.items {
            opf.push_str(&format!(
                "    <item id=\"{}\" href=\"{}\" media-type=\"{}\"",
                escape_xml(&item.id),
                escape_xml(&item.href),
                escape_xml(&item.media_type)
            ));
            if !item.properties.is_empty() {
                opf.push_str(&format!(" properties=\"{}\"", escape_xml(&item.properties)));
            }
            push_opt_attr(&mut opf, "fallback", item.fallback.as_deref());
            opf.push_str("/>\n");
        }
        opf.push_str("  </manifest>\n  <spine");

        push_opt_attr(&mut opf, "toc", self.spine.toc.as_deref());
        push_opt_attr(
            &mut opf,
            "page-progression-direction",
            self.spine.page_progression_direction.as_deref(),
        );
        opf.push_str(">\n");
        for itemref in &self.spine.itemrefs {
            opf.push_str(&format!("    <itemref idref=\"{}\"", escape_xml(&itemref.idref)));
            push_opt_attr(&mut opf, "linear", itemref.linear.as_deref());
            opf.push_str("/>\n");
        }
        opf.push_str("  </spine>\n</package>\n");

        opf
    }
}

fn push_opt_attr(out: &mut String, name: &str, value: Option<&str>) {
    if let Some(value) = value {
        out.push_str(&format!(" {}=\"{}\"", name, escape_xml(value)));
    }
}

/// Which metadata text we are currently collecting.
enum Capture {
    Dc(DcField, Option<String>),
    Meta(MetaNode),
}

#[derive(Clone, Copy)]
enum DcField {
    Title,
    Language,
    Creator,
    Identifier,
}

/// Parse an OPF package document.
pub fn parse_package(content: &str) -> Result<PackageDocument> {
    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(false);

    let mut pkg = PackageDocument::default();
    let mut saw_package = false;
    let mut in_metadata = false;
    let mut capture: Option<Capture> = None;
    let mut buf_text = String::new();

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let name = e.name();
                match local_name(name.as_ref()) {
                    b"package" => {
                        read_package_attrs(&mut pkg, &e)?;
                        saw_package = true;
                    }
                    b"metadata" => in_metadata = true,
                    b"title" | b"language" | b"creator" | b"identifier" if in_metadata => {
                        let field = match local_name(name.as_ref()) {
                            b"title" => DcField::Title,
                            b"language" => DcField::Language,
                            b"creator" => DcField::Creator,
                            _ => DcField::Identifier,
                        };
                        let attrs = Attrs::parse(&e)?;
                        capture = Some(Capture::Dc(field, attrs.get_trimmed("id")));
                        buf_text.clear();
                    }
                    b"meta" if in_metadata => {
                        capture = Some(Capture::Meta(read_meta(&e)?));
                        buf_text.clear();
                    }
                    b"item" => pkg.manifest.items.push(read_item(&e)?),
                    b"itemref" => pkg.spine.itemrefs.push(read_itemref(&e)?),
                    b"spine" => read_spine_attrs(&mut pkg, &e)?,
                    _ => {}
                }
            }
            Event::Empty(e) => {
                let name = e.name();
                match local_name(name.as_ref()) {
                    b"package" => {
                        read_package_attrs(&mut pkg, &e)?;
                        saw_package = true;
                    }
                    b"meta" if in_metadata => pkg.metadata.meta.push(read_meta(&e)?),
                    b"item" => pkg.manifest.items.push(read_item(&e)?),
                    b"itemref" => pkg.spine.itemrefs.push(read_itemref(&e)?),
                    b"spine" => read_spine_attrs(&mut pkg, &e)?,
                    _ => {}
                }
            }
            Event::Text(e) => {
                if capture.is_some() {
                    buf_text.push_str(&String::from_utf8_lossy(&e));
                }
            }
            Event::CData(e) => {
                if capture.is_some() {
                    buf_text.push_str(&String::from_utf8_lossy(&e));
                }
            }
            Event::GeneralRef(e) => {
                if capture.is_some() {
                    let entity = String::from_utf8_lossy(&e);
                    if let Some(resolved) = resolve_entity(&entity) {
                        buf_text.push_str(&resolved);
                    }
                }
            }
            Event::End(e) => {
                let name = e.name();
                let local = local_name(name.as_ref());
                if local == b"metadata" {
                    in_metadata = false;
                }
                let closes_capture = matches!(
                    (&capture, local),
                    (Some(Capture::Meta(_)), b"meta")
                        | (Some(Capture::Dc(..)), b"title" | b"language" | b"creator" | b"identifier")
                );
                if closes_capture && let Some(done) = capture.take() {
                    let value = buf_text.trim().to_string();
                    match done {
                        Capture::Dc(field, id) => {
                            let list = match field {
                                DcField::Title => &mut pkg.metadata.titles,
                                DcField::Language => &mut pkg.metadata.languages,
                                DcField::Creator => &mut pkg.metadata.creators,
                                DcField::Identifier => &mut pkg.metadata.identifiers,
                            };
                            list.push(DcValue { id, value });
                        }
                        Capture::Meta(mut meta) => {
                            meta.value = value;
                            pkg.metadata.meta.push(meta);
                        }
                    }
                    buf_text.clear();
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !saw_package {
        return Err(Error::MissingElement("package".into()));
    }
    Ok(pkg)
}

fn read_package_attrs(pkg: &mut PackageDocument, e: &BytesStart<'_>) -> Result<()> {
    let attrs = Attrs::parse(e)?;
    for (key, value) in attrs.iter() {
        match key {
            "version" => pkg.version = value.trim().to_string(),
            "unique-identifier" => pkg.unique_identifier = value.trim().to_string(),
            "xml:lang" => pkg.language = value.trim().to_string(),
            "prefix" => pkg.prefix = value.trim().to_string(),
            k if k == "xmlns" || k.starts_with("xmlns:") => {
                pkg.namespaces.push((k.to_string(), value.to_string()))
            }
            _ => {}
        }
    }
    Ok(())
}

fn read_meta(e: &BytesStart<'_>) -> Result<MetaNode> {
    let attrs = Attrs::parse(e)?;
    Ok(MetaNode {
        property: attrs.get_trimmed("property"),
        value: String::new(),
        name: attrs.get_trimmed("name"),
        content: attrs.get("content").map(|c| c.trim().to_string()),
        refines: attrs.get_trimmed("refines"),
        id: attrs.get_trimmed("id"),
    })
}

fn read_item(e: &BytesStart<'_>) -> Result<ManifestItem> {
    let attrs = Attrs::parse(e)?;
    Ok(ManifestItem {
        id: attrs.get("id").unwrap_or_default().trim().to_string(),
        href: attrs.get("href").unwrap_or_default().trim().to_string(),
        media_type: attrs.get("media-type").unwrap_or_default().trim().to_string(),
        properties: attrs.get("properties").unwrap_or_default().trim().to_string(),
        fallback: attrs.get_trimmed("fallback"),
    })
}

fn read_itemref(e: &BytesStart<'_>) -> Result<ItemRef> {
    let attrs = Attrs::parse(e)?;
    Ok(ItemRef {
        idref: attrs.get("idref").unwrap_or_default().trim().to_string(),
        linear: attrs.get_trimmed("linear"),
    })
}

fn read_spine_attrs(pkg: &mut PackageDocument, e: &BytesStart<'_>) -> Result<()> {
    let attrs = Attrs::parse(e)?;
    pkg.spine.page_progression_direction = attrs.get_trimmed("page-progression-direction");
    pkg.spine.toc = attrs.get_trimmed("toc");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const OPF: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<package xmlns="http://www.idpf.org/2007/opf" version="3.0" unique-identifier="pub-id" xml:lang="en">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
    <dc:identifier id="isbn">urn:isbn:123</dc:identifier>
    <dc:identifier id="pub-id">urn:uuid:abc</dc:identifier>
    <dc:title id="t1">Tom &amp; Jerry</dc:title>
    <dc:creator>  Author A  </dc:creator>
    <dc:language>en</dc:language>
    <meta property="dcterms:modified">2024-01-01T00:00:00Z</meta>
    <meta name="cover" content="cover-img"/>
  </metadata>
  <manifest>
    <item id="nav" href="nav.xhtml" media-type="application/xhtml+xml" properties="nav"/>
    <item id="c1" href="Text/ch%201.xhtml" media-type="application/xhtml+xml"/>
    <item id="cover-img" href="Images/cover.jpg" media-type="image/jpeg" properties="cover-image"/>
    <item id="alt" href="x.svg" media-type="image/svg+xml" fallback="cover-img"/>
  </manifest>
  <spine page-progression-direction="rtl" toc="ncx">
    <itemref idref="c1"/>
    <itemref idref="nav" linear="no"/>
  </spine>
</package>"#;

    #[test]
    fn test_parse_package() {
        let pkg = parse_package(OPF).unwrap();
        assert_eq!(pkg.version, "3.0");
        assert_eq!(pkg.language, "en");
        assert_eq!(pkg.metadata.first_title(), Some("Tom & Jerry"));
        assert_eq!(pkg.metadata.titles[0].id.as_deref(), Some("t1"));
        assert_eq!(pkg.metadata.creators[0].value, "Author A");
        assert_eq!(pkg.unique_identifier_value(), Some("urn:uuid:abc"));
        assert_eq!(pkg.metadata.meta.len(), 2);
        assert_eq!(pkg.metadata.meta[0].value, "2024-01-01T00:00:00Z");
        assert_eq!(pkg.metadata.meta[1].content.as_deref(), Some("cover-img"));
        assert_eq!(pkg.manifest.items.len(), 4);
        assert_eq!(pkg.manifest.nav_item().map(|i| i.id.as_str()), Some("nav"));
        assert_eq!(pkg.manifest.get("alt").and_then(|i| i.fallback.as_deref()), Some("cover-img"));
        assert_eq!(pkg.spine.itemrefs.len(), 2);
        assert_eq!(pkg.spine.itemrefs[1].linear.as_deref(), Some("no"));
        assert_eq!(pkg.spine.page_progression_direction.as_deref(), Some("rtl"));
        assert_eq!(pkg.spine.toc.as_deref(), Some("ncx"));
    }

    #[test]
    fn test_missing_package_element() {
        assert!(matches!(
            parse_package("<root/>"),
            Err(Error::MissingElement(_))
        ));
    }

    #[test]
    fn test_to_xml_parses_back() {
        let pkg = parse_package(OPF).unwrap();
        let again = parse_package(&pkg.to_xml()).unwrap();
        assert_eq!(again.metadata.first_title(), Some("Tom & Jerry"));
        assert_eq!(again.unique_identifier_value(), Some("urn:uuid:abc"));
        assert_eq!(again.manifest.items, pkg.manifest.items);
        assert_eq!(again.spine.itemrefs, pkg.spine.itemrefs);
        assert_eq!(again.metadata.meta, pkg.metadata.meta);
    }
}
