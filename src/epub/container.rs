//! `META-INF/container.xml` and the `mimetype` entry.

use quick_xml::Reader;
use quick_xml::events::Event;

use crate::error::{Error, Result};
use crate::util::{Attrs, decode_text, local_name, normalize_epub_path, strip_bom};

/// Contents of the `mimetype` entry.
pub const MIMETYPE: &[u8] = b"application/epub+zip";

/// Container document pointing at `OEBPS/content.opf`.
pub const CONTAINER_XML: &[u8] = br#"<?xml version="1.0" encoding="UTF-8"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>
"#;

/// Return the normalized package path named by the first `rootfile`.
pub fn parse_container(bytes: &[u8]) -> Result<String> {
    let content = decode_text(strip_bom(bytes), None);
    let mut reader = Reader::from_str(&content);
    reader.config_mut().trim_text(true);

    loop {
        match reader.read_event()? {
            Event::Empty(e) | Event::Start(e) if local_name(e.name().as_ref()) == b"rootfile" => {
                let attrs = Attrs::parse(&e)?;
                let full_path = attrs
                    .get_trimmed("full-path")
                    .ok_or_else(|| Error::InvalidEpub("rootfile has no full-path".into()))?;
                let path = normalize_epub_path(&full_path);
                if path == "." || path.starts_with("..") || path.starts_with('/') {
                    return Err(Error::InvalidEpub(format!(
                        "rootfile path {full_path:?} is outside the archive"
                    )));
                }
                return Ok(path);
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Err(Error::MissingElement("rootfile".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_rootfile_wins() {
        let xml = br#"<?xml version="1.0"?>
<container xmlns="urn:oasis:names:tc:opendocument:xmlns:container" version="1.0">
  <rootfiles>
    <rootfile full-path="./OPS\package.opf" media-type="application/oebps-package+xml"/>
    <rootfile full-path="other.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>"#;
        assert_eq!(parse_container(xml).unwrap(), "OPS/package.opf");
    }

    #[test]
    fn test_generated_container_parses() {
        assert_eq!(parse_container(CONTAINER_XML).unwrap(), "OEBPS/content.opf");
    }

    #[test]
    fn test_missing_rootfile() {
        let xml = b"<container><rootfiles/></container>";
        assert!(matches!(
            parse_container(xml),
            Err(Error::MissingElement(name)) if name == "rootfile"
        ));
    }

    #[test]
    fn test_escaping_rootfile_rejected() {
        let xml = br#"<container><rootfiles><rootfile full-path="../evil.opf"/></rootfiles></container>"#;
        assert!(matches!(parse_container(xml), Err(Error::InvalidEpub(_))));
    }
}
