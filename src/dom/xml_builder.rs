//! Build an [`ArenaDom`] from well-formed XML (XHTML content documents).
//!
//! Unlike the html5ever path this keeps everything an XML serializer needs to
//! write the document back out: the declaration, doctype, processing
//! instructions, CDATA sections, namespace prefixes and empty-element tags.

use html5ever::{LocalName, Namespace, Prefix, QualName, ns};
use quick_xml::Reader;
use quick_xml::errors::IllFormedError;
use quick_xml::events::{BytesDecl, BytesStart, Event};

use super::arena::{ArenaDom, ArenaNodeId, Attribute};
use crate::error::Result;
use crate::util::{Attrs, resolve_entity};

const XML_NS: &str = "http://www.w3.org/XML/1998/namespace";

/// Parse an XML document into an arena tree.
pub fn parse_xhtml(content: &str) -> Result<ArenaDom> {
    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(false);

    let mut dom = ArenaDom::new();
    let mut open: Vec<ArenaNodeId> = vec![dom.document()];
    let mut scopes = NamespaceScopes::default();

    loop {
        match reader.read_event()? {
            Event::Decl(decl) => {
                let body = declaration_body(&decl)?;
                let node = dom.create_pi(body);
                dom.append(current(&open), node);
            }
            Event::PI(pi) => {
                let node = dom.create_pi(String::from_utf8_lossy(&pi).into_owned());
                dom.append(current(&open), node);
            }
            Event::DocType(doctype) => {
                let body = String::from_utf8_lossy(&doctype).trim().to_string();
                let node = dom.create_doctype(body);
                dom.append(current(&open), node);
            }
            Event::Start(e) => {
                let node = open_element(&mut dom, &mut scopes, &e, false)?;
                dom.append(current(&open), node);
                open.push(node);
            }
            Event::Empty(e) => {
                let node = open_element(&mut dom, &mut scopes, &e, true)?;
                scopes.pop();
                dom.append(current(&open), node);
            }
            Event::End(_) => {
                if open.len() > 1 {
                    open.pop();
                    scopes.pop();
                }
            }
            Event::Text(e) => {
                dom.append_text(current(&open), &String::from_utf8_lossy(&e));
            }
            Event::GeneralRef(e) => {
                let name = String::from_utf8_lossy(&e);
                match resolve_entity(&name) {
                    Some(resolved) => dom.append_text(current(&open), &resolved),
                    None => {
                        let node = dom.create_entity_ref(name.into_owned());
                        dom.append(current(&open), node);
                    }
                }
            }
            Event::CData(e) => {
                let node = dom.create_cdata(String::from_utf8_lossy(&e).into_owned());
                dom.append(current(&open), node);
            }
            Event::Comment(e) => {
                let node = dom.create_comment(String::from_utf8_lossy(&e).into_owned());
                dom.append(current(&open), node);
            }
            Event::Eof => break,
        }
    }

    if let Some(&unclosed) = open.get(1) {
        let name = dom
            .element_name(unclosed)
            .map(|n| n.to_string())
            .unwrap_or_default();
        return Err(quick_xml::Error::IllFormed(IllFormedError::MissingEndTag(name)).into());
    }

    Ok(dom)
}

fn current(open: &[ArenaNodeId]) -> ArenaNodeId {
    open.last().copied().unwrap_or(ArenaNodeId::NONE)
}

/// Re-emit the XML declaration. Content is re-encoded as UTF-8 on write, so a
/// declared legacy encoding is replaced.
fn declaration_body(decl: &BytesDecl<'_>) -> Result<String> {
    if decl.encoding().is_none() {
        return Ok(String::from_utf8_lossy(decl).into_owned());
    }
    let version = decl.version()?;
    let mut body = format!(
        "xml version=\"{}\" encoding=\"UTF-8\"",
        String::from_utf8_lossy(&version)
    );
    if let Some(standalone) = decl.standalone() {
        body.push_str(&format!(
            " standalone=\"{}\"",
            String::from_utf8_lossy(&standalone.map_err(quick_xml::Error::from)?)
        ));
    }
    Ok(body)
}

fn open_element(
    dom: &mut ArenaDom,
    scopes: &mut NamespaceScopes,
    e: &BytesStart<'_>,
    self_closing: bool,
) -> Result<ArenaNodeId> {
    let raw_attrs = Attrs::parse(e)?;

    let declared = raw_attrs
        .iter()
        .filter_map(|(key, value)| match key {
            "xmlns" => Some((None, value.to_string())),
            _ => key
                .strip_prefix("xmlns:")
                .map(|prefix| (Some(prefix.to_string()), value.to_string())),
        })
        .collect();
    scopes.push(declared);

    let attrs = raw_attrs
        .iter()
        .map(|(key, value)| Attribute {
            name: scopes.attribute_name(key),
            value: value.to_string(),
        })
        .collect();

    let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
    let qname = scopes.element_name(&name);
    Ok(dom.create_element(qname, attrs, self_closing))
}

/// Stack of namespace declarations, one frame per open element.
#[derive(Default)]
struct NamespaceScopes {
    frames: Vec<Vec<(Option<String>, String)>>,
}

impl NamespaceScopes {
    fn push(&mut self, frame: Vec<(Option<String>, String)>) {
        self.frames.push(frame);
    }

    fn pop(&mut self) {
        self.frames.pop();
    }

    fn lookup(&self, prefix: Option<&str>) -> Option<&str> {
        if prefix == Some("xml") {
            return Some(XML_NS);
        }
        self.frames
            .iter()
            .rev()
            .flat_map(|frame| frame.iter().rev())
            .find(|(p, _)| p.as_deref() == prefix)
            .map(|(_, uri)| uri.as_str())
    }

    fn element_name(&self, raw: &str) -> QualName {
        let (prefix, local) = split_qname(raw);
        let ns = Namespace::from(self.lookup(prefix).unwrap_or(""));
        QualName::new(prefix.map(Prefix::from), ns, LocalName::from(local))
    }

    fn attribute_name(&self, raw: &str) -> QualName {
        if raw == "xmlns" {
            return QualName::new(None, ns!(xmlns), LocalName::from("xmlns"));
        }
        match split_qname(raw) {
            (Some("xmlns"), local) => {
                QualName::new(Some(Prefix::from("xmlns")), ns!(xmlns), LocalName::from(local))
            }
            (Some(prefix), local) => {
                let ns = Namespace::from(self.lookup(Some(prefix)).unwrap_or(""));
                QualName::new(Some(Prefix::from(prefix)), ns, LocalName::from(local))
            }
            // Unprefixed attributes are in no namespace.
            (None, local) => QualName::new(None, ns!(), LocalName::from(local)),
        }
    }
}

fn split_qname(raw: &str) -> (Option<&str>, &str) {
    match raw.split_once(':') {
        Some((prefix, local)) => (Some(prefix), local),
        None => (None, raw),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::ArenaNodeData;

    const CHAPTER: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<!DOCTYPE html>
<html xmlns="http://www.w3.org/1999/xhtml" xmlns:epub="http://www.idpf.org/2007/ops">
<body><section epub:type="chapter"><p class="a">Tom &amp; Jerry&#x2019;s<br/></p></section></body>
</html>"#;

    #[test]
    fn test_elements_get_xhtml_namespace() {
        let dom = parse_xhtml(CHAPTER).unwrap();
        let p = dom.find_by_tag("p").unwrap();
        assert_eq!(dom.element_namespace(p), Some(&ns!(html)));
        assert_eq!(dom.element_classes(p), ["a"]);
    }

    #[test]
    fn test_entities_resolved_into_text() {
        let dom = parse_xhtml(CHAPTER).unwrap();
        let p = dom.find_by_tag("p").unwrap();
        let text = dom.children(p).next().unwrap();
        assert_eq!(dom.text_content(text), Some("Tom & Jerry\u{2019}s"));
    }

    #[test]
    fn test_prefixed_attribute_resolves_namespace() {
        let dom = parse_xhtml(CHAPTER).unwrap();
        let section = dom.find_by_tag("section").unwrap();
        let Some(ArenaNodeData::Element { attrs, .. }) = dom.get(section).map(|n| &n.data) else {
            panic!("section should be an element");
        };
        assert_eq!(attrs[0].name.local.as_ref(), "type");
        assert_eq!(attrs[0].name.ns.as_ref(), "http://www.idpf.org/2007/ops");
    }

    #[test]
    fn test_unknown_entity_kept_as_reference() {
        let dom = parse_xhtml("<p>a&custom;b</p>").unwrap();
        let p = dom.find_by_tag("p").unwrap();
        let kinds: Vec<_> = dom
            .children(p)
            .map(|c| matches!(dom.get(c).map(|n| &n.data), Some(ArenaNodeData::EntityRef(_))))
            .collect();
        assert_eq!(kinds, vec![false, true, false]);
    }

    #[test]
    fn test_malformed_is_error() {
        assert!(parse_xhtml("<html><body><p>oops</body></html>").is_err());
        assert!(parse_xhtml("<html><body>").is_err());
    }
}
