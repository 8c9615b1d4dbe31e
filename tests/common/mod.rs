//! Fixture EPUBs built on the fly.

#![allow(dead_code)]

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use zip::ZipArchive;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

pub struct Chapter {
    pub id: String,
    pub title: String,
    pub body: String,
}

/// A small EPUB 3 book: chapters under `Text/`, a nav document, a
/// stylesheet and optionally a cover image.
pub struct EpubBuilder {
    title: String,
    language: String,
    creators: Vec<String>,
    root: String,
    chapters: Vec<Chapter>,
    cover: bool,
    nav: bool,
    extra: Vec<(String, Vec<u8>)>,
}

impl EpubBuilder {
    pub fn new(title: &str) -> Self {
        Self {
            title: title.to_string(),
            language: "en".to_string(),
            creators: Vec::new(),
            root: "OEBPS".to_string(),
            chapters: Vec::new(),
            cover: false,
            nav: true,
            extra: Vec::new(),
        }
    }

    pub fn language(mut self, language: &str) -> Self {
        self.language = language.to_string();
        self
    }

    pub fn creator(mut self, creator: &str) -> Self {
        self.creators.push(creator.to_string());
        self
    }

    /// Directory holding the package document; empty for the archive root.
    pub fn root(mut self, root: &str) -> Self {
        self.root = root.to_string();
        self
    }

    pub fn chapter(mut self, id: &str, title: &str, body: &str) -> Self {
        self.chapters.push(Chapter {
            id: id.to_string(),
            title: title.to_string(),
            body: body.to_string(),
        });
        self
    }

    pub fn cover(mut self) -> Self {
        self.cover = true;
        self
    }

    pub fn without_nav(mut self) -> Self {
        self.nav = false;
        self
    }

    /// Raw archive entry, written after everything else.
    pub fn entry(mut self, name: &str, body: &[u8]) -> Self {
        self.extra.push((name.to_string(), body.to_vec()));
        self
    }

    fn in_root(&self, name: &str) -> String {
        if self.root.is_empty() {
            name.to_string()
        } else {
            format!("{}/{}", self.root, name)
        }
    }

    fn package(&self) -> String {
        let mut opf = String::from(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<package xmlns="http://www.idpf.org/2007/opf" version="3.0" unique-identifier="uid">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
"#,
        );
        opf.push_str(&format!("    <dc:identifier id=\"uid\">urn:test:{}</dc:identifier>\n", self.title));
        opf.push_str(&format!("    <dc:title>{}</dc:title>\n", self.title));
        opf.push_str(&format!("    <dc:language>{}</dc:language>\n", self.language));
        for creator in &self.creators {
            opf.push_str(&format!("    <dc:creator>{creator}</dc:creator>\n"));
        }
        opf.push_str("  </metadata>\n  <manifest>\n");
        if self.nav {
            opf.push_str(
                "    <item id=\"nav\" href=\"nav.xhtml\" media-type=\"application/xhtml+xml\" properties=\"nav\"/>\n",
            );
        }
        opf.push_str("    <item id=\"css\" href=\"Styles/style.css\" media-type=\"text/css\"/>\n");
        if self.cover {
            opf.push_str(
                "    <item id=\"cover\" href=\"Images/cover.jpg\" media-type=\"image/jpeg\" properties=\"cover-image\"/>\n",
            );
        }
        for chapter in &self.chapters {
            opf.push_str(&format!(
                "    <item id=\"{}\" href=\"Text/{}.xhtml\" media-type=\"application/xhtml+xml\"/>\n",
                chapter.id, chapter.id
            ));
        }
        opf.push_str("  </manifest>\n  <spine>\n");
        for chapter in &self.chapters {
            opf.push_str(&format!("    <itemref idref=\"{}\"/>\n", chapter.id));
        }
        opf.push_str("  </spine>\n</package>\n");
        opf
    }

    fn nav_document(&self) -> String {
        let mut nav = String::from(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<html xmlns="http://www.w3.org/1999/xhtml" xmlns:epub="http://www.idpf.org/2007/ops">
<head><title>Contents</title></head>
<body>
<nav epub:type="toc"><ol>
"#,
        );
        for chapter in &self.chapters {
            nav.push_str(&format!(
                "<li><a href=\"Text/{}.xhtml\">{}</a></li>\n",
                chapter.id, chapter.title
            ));
        }
        nav.push_str("</ol></nav>\n</body>\n</html>\n");
        nav
    }

    fn chapter_document(chapter: &Chapter) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE html>
<html xmlns="http://www.w3.org/1999/xhtml">
<head><title>{title}</title><link rel="stylesheet" href="../Styles/style.css"/></head>
<body>
<h1>{title}</h1>
{body}
</body>
</html>
"#,
            title = chapter.title,
            body = chapter.body
        )
    }

    pub fn write(&self, path: &Path) {
        let mut zip = ZipWriter::new(File::create(path).expect("create fixture"));
        let stored = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
        let options = SimpleFileOptions::default();

        zip.start_file("mimetype", stored).unwrap();
        zip.write_all(b"application/epub+zip").unwrap();

        let container = format!(
            r#"<?xml version="1.0"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles><rootfile full-path="{}" media-type="application/oebps-package+xml"/></rootfiles>
</container>"#,
            self.in_root("content.opf")
        );
        let mut entries: Vec<(String, Vec<u8>)> = vec![
            ("META-INF/container.xml".to_string(), container.into_bytes()),
            (self.in_root("content.opf"), self.package().into_bytes()),
            (
                self.in_root("Styles/style.css"),
                b"p.keep { margin: 0 }".to_vec(),
            ),
        ];
        if self.nav {
            entries.push((self.in_root("nav.xhtml"), self.nav_document().into_bytes()));
        }
        if self.cover {
            entries.push((self.in_root("Images/cover.jpg"), vec![0xFF, 0xD8, 0xFF, 0xD9]));
        }
        for chapter in &self.chapters {
            entries.push((
                self.in_root(&format!("Text/{}.xhtml", chapter.id)),
                Self::chapter_document(chapter).into_bytes(),
            ));
        }
        entries.extend(self.extra.iter().cloned());

        for (name, body) in entries {
            zip.start_file(name, options).unwrap();
            zip.write_all(&body).unwrap();
        }
        zip.finish().unwrap();
    }
}

/// Entry names in archive order.
pub fn entry_names(path: &Path) -> Vec<String> {
    let mut archive = ZipArchive::new(File::open(path).unwrap()).unwrap();
    (0..archive.len())
        .map(|i| archive.by_index(i).unwrap().name().to_string())
        .collect()
}

pub fn read_entry(path: &Path, name: &str) -> String {
    let mut archive = ZipArchive::new(File::open(path).unwrap()).unwrap();
    let mut entry = archive
        .by_name(name)
        .unwrap_or_else(|_| panic!("missing entry {name}"));
    let mut body = String::new();
    entry.read_to_string(&mut body).unwrap();
    body
}
