//! EPUB 3 navigation document: TOC extraction and rendering.

use std::collections::HashMap;

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

use crate::error::{Error, Result};
use crate::util::{
    Attrs, decode_text, escape_xml, extract_xml_encoding, local_name, normalize_space,
    resolve_entity,
};

const OPS_NS: &str = "http://www.idpf.org/2007/ops";

/// One table-of-contents entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NavItem {
    pub title: String,
    /// Empty for label-only grouping entries.
    pub href: String,
    pub children: Vec<NavItem>,
}

impl NavItem {
    pub fn new(title: impl Into<String>, href: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            href: href.into(),
            children: Vec::new(),
        }
    }

    /// Total number of entries in this subtree, self included.
    pub fn count(&self) -> usize {
        1 + self.children.iter().map(NavItem::count).sum::<usize>()
    }
}

/// An `ol` being filled. `depth` is the number of open `li`s when it opened;
/// a nonzero depth means the list belongs to `items[depth - 1]`.
struct OpenList {
    depth: usize,
    entries: Vec<NavItem>,
}

struct OpenItem {
    item: NavItem,
    text: String,
}

/// Walk state for the TOC subtree.
#[derive(Default)]
struct TocBuilder {
    top: Vec<NavItem>,
    lists: Vec<OpenList>,
    items: Vec<OpenItem>,
}

impl TocBuilder {
    fn open_list(&mut self) {
        self.lists.push(OpenList {
            depth: self.items.len(),
            entries: Vec::new(),
        });
    }

    fn open_item(&mut self) {
        self.items.push(OpenItem {
            item: NavItem::default(),
            text: String::new(),
        });
    }

    /// Attach a finished entry to the innermost open list, or the top level.
    fn attach(&mut self, item: NavItem) {
        match self.lists.last_mut() {
            Some(list) => list.entries.push(item),
            None => self.top.push(item),
        }
    }

    fn close_list(&mut self) {
        let Some(depth) = self.lists.last().map(|list| list.depth) else {
            return;
        };
        // Items opened inside this list close with it.
        while self.items.len() > depth {
            self.pop_item();
        }
        self.pop_list();
    }

    fn close_item(&mut self) {
        if !self.items.is_empty() {
            self.pop_item();
        }
    }

    fn pop_list(&mut self) {
        let Some(list) = self.lists.pop() else {
            return;
        };
        match list.depth.checked_sub(1).and_then(|i| self.items.get_mut(i)) {
            Some(owner) => owner.item.children.extend(list.entries),
            None => self.top.extend(list.entries),
        }
    }

    fn pop_item(&mut self) {
        // Lists opened inside this item close first.
        while self
            .lists
            .last()
            .is_some_and(|list| list.depth == self.items.len())
        {
            self.pop_list();
        }
        if let Some(OpenItem { mut item, text }) = self.items.pop() {
            item.title = normalize_space(&text);
            self.attach(item);
        }
    }

    fn push_text(&mut self, text: &str) {
        if let Some(open) = self.items.last_mut() {
            open.text.push_str(text);
        }
    }

    fn set_href(&mut self, href: &str) {
        if let Some(open) = self.items.last_mut()
            && open.item.href.is_empty()
        {
            open.item.href = href.trim().to_string();
        }
    }

    fn finish(mut self) -> Vec<NavItem> {
        while !self.lists.is_empty() || !self.items.is_empty() {
            let list_is_inner = self
                .lists
                .last()
                .is_some_and(|list| list.depth == self.items.len());
            if list_is_inner || self.items.is_empty() {
                self.pop_list();
            } else {
                self.pop_item();
            }
        }
        self.top
    }
}

/// Extract the TOC from a navigation document.
///
/// Only the first `nav` whose type includes `toc` is read; other navs and
/// anything nested in them are skipped.
pub fn parse_nav(bytes: &[u8]) -> Result<Vec<NavItem>> {
    let content = decode_text(bytes, extract_xml_encoding(bytes));
    let mut reader = Reader::from_str(&content);
    reader.config_mut().trim_text(false);
    reader.config_mut().check_end_names = false;

    let mut prefixes: HashMap<String, String> = HashMap::new();
    let mut toc: Option<TocBuilder> = None;
    let mut nav_depth = 0usize;

    loop {
        let event = match reader.read_event() {
            Ok(event) => event,
            Err(e) => {
                let collected = toc.map(TocBuilder::finish).unwrap_or_default();
                if collected.is_empty() {
                    return Err(e.into());
                }
                tracing::debug!(error = %e, "navigation document truncated");
                return Ok(collected);
            }
        };

        match event {
            Event::Start(e) => {
                let attrs = Attrs::parse(&e)?;
                record_prefixes(&attrs, &mut prefixes);
                let is_nav = local_name(e.name().as_ref()) == b"nav";
                if toc.is_none() {
                    if is_nav && is_toc_nav(&attrs, &prefixes) {
                        toc = Some(TocBuilder::default());
                        nav_depth = 1;
                    }
                } else if is_nav {
                    nav_depth += 1;
                } else if nav_depth == 1
                    && let Some(builder) = toc.as_mut()
                {
                    start_in_toc(builder, &e, &attrs);
                }
            }
            Event::Empty(e) => {
                if let Some(builder) = toc.as_mut()
                    && nav_depth == 1
                {
                    let attrs = Attrs::parse(&e)?;
                    let name = e.name();
                    match local_name(name.as_ref()) {
                        b"li" => builder.attach(NavItem::default()),
                        b"a" => {
                            if let Some(href) = attrs.get_trimmed("href") {
                                builder.set_href(&href);
                            }
                        }
                        _ => {}
                    }
                }
            }
            Event::End(e) => {
                let name = e.name();
                match (local_name(name.as_ref()), toc.as_mut()) {
                    (b"nav", Some(_)) => {
                        nav_depth -= 1;
                        if nav_depth == 0 {
                            break;
                        }
                    }
                    (b"ol", Some(builder)) if nav_depth == 1 => builder.close_list(),
                    (b"li", Some(builder)) if nav_depth == 1 => builder.close_item(),
                    _ => {}
                }
            }
            Event::Text(e) => {
                if let Some(builder) = toc.as_mut()
                    && nav_depth == 1
                {
                    builder.push_text(&String::from_utf8_lossy(&e));
                }
            }
            Event::CData(e) => {
                if let Some(builder) = toc.as_mut()
                    && nav_depth == 1
                {
                    builder.push_text(&String::from_utf8_lossy(&e));
                }
            }
            Event::GeneralRef(e) => {
                if let Some(builder) = toc.as_mut()
                    && nav_depth == 1
                    && let Some(resolved) = resolve_entity(&String::from_utf8_lossy(&e))
                {
                    builder.push_text(&resolved);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    let items = toc.map(TocBuilder::finish).unwrap_or_default();
    if items.is_empty() {
        return Err(Error::NavNotFound);
    }
    Ok(items)
}

fn start_in_toc(builder: &mut TocBuilder, e: &BytesStart<'_>, attrs: &Attrs) {
    match local_name(e.name().as_ref()) {
        b"ol" => builder.open_list(),
        b"li" => builder.open_item(),
        b"a" => {
            if let Some(href) = attrs.get_trimmed("href") {
                builder.set_href(&href);
            }
        }
        _ => {}
    }
}

fn record_prefixes(attrs: &Attrs, prefixes: &mut HashMap<String, String>) {
    for (key, value) in attrs.iter() {
        if let Some(prefix) = key.strip_prefix("xmlns:") {
            prefixes.insert(prefix.to_string(), value.to_string());
        }
    }
}

/// Whether a `nav` carries a `type` attribute containing the `toc` token.
fn is_toc_nav(attrs: &Attrs, prefixes: &HashMap<String, String>) -> bool {
    attrs.iter().any(|(key, value)| {
        let type_attr = match key.split_once(':') {
            None => key == "type",
            Some((prefix, "type")) => match prefixes.get(prefix) {
                Some(uri) => uri == OPS_NS,
                None => prefix == "epub",
            },
            Some(_) => false,
        };
        type_attr && value.split_whitespace().any(|token| token == "toc")
    })
}

/// Render a complete XHTML navigation document for `items`.
pub fn render_nav_document(items: &[NavItem]) -> String {
    let mut doc = String::from(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
         <html xmlns=\"http://www.w3.org/1999/xhtml\" xmlns:epub=\"http://www.idpf.org/2007/ops\">\n\
         <head><title>Table of Contents</title></head>\n<body>\n\
         <nav epub:type=\"toc\" id=\"toc\">\n<h1>Table of Contents</h1>\n<ol>\n",
    );
    for item in items {
        write_nav_item(&mut doc, item);
    }
    doc.push_str("</ol>\n</nav>\n</body>\n</html>\n");
    doc
}

fn write_nav_item(doc: &mut String, item: &NavItem) {
    doc.push_str("<li>");
    let label = escape_xml(&item.title);
    let href = escape_xml(&item.href);
    if !href.is_empty() {
        let text = if label.is_empty() { &href } else { &label };
        doc.push_str(&format!("<a href=\"{href}\">{text}</a>"));
    } else if !label.is_empty() {
        doc.push_str(&format!("<span>{label}</span>"));
    }
    if !item.children.is_empty() {
        doc.push_str("\n<ol>\n");
        for child in &item.children {
            write_nav_item(doc, child);
        }
        doc.push_str("</ol>\n");
    }
    doc.push_str("</li>\n");
}

#[cfg(test)]
mod tests {
    use super::*;

    const NAV: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<html xmlns="http://www.w3.org/1999/xhtml" xmlns:epub="http://www.idpf.org/2007/ops">
<body>
  <nav epub:type="landmarks"><ol><li><a href="ignored.xhtml">Ignored</a></li></ol></nav>
  <nav epub:type="toc">
    <ol>
      <li><a href="cover.xhtml">Cover</a></li>
      <li>
        <span>Volume 1</span>
        <ol>
          <li><a href="chapter.xhtml#p1">Part   1</a></li>
        </ol>
      </li>
    </ol>
  </nav>
</body>
</html>"#;

    #[test]
    fn test_parse_nav_document() {
        let items = parse_nav(NAV.as_bytes()).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0], NavItem::new("Cover", "cover.xhtml"));
        assert_eq!(items[1].title, "Volume 1");
        assert_eq!(items[1].href, "");
        assert_eq!(items[1].children, vec![NavItem::new("Part 1", "chapter.xhtml#p1")]);
    }

    #[test]
    fn test_first_anchor_wins_and_entities_resolve() {
        let nav = r#"<nav xmlns:epub="http://www.idpf.org/2007/ops" epub:type="toc"><ol>
            <li><a href="">skip</a><a href="a.xhtml">Tom &amp; Jerry</a><a href="b.xhtml">!</a></li>
        </ol></nav>"#;
        let items = parse_nav(nav.as_bytes()).unwrap();
        assert_eq!(items[0].href, "a.xhtml");
        assert_eq!(items[0].title, "skipTom & Jerry!");
    }

    #[test]
    fn test_type_attribute_variants() {
        // Unprefixed
        let unprefixed = r#"<nav type="toc"><ol><li><a href="a">A</a></li></ol></nav>"#;
        assert_eq!(parse_nav(unprefixed.as_bytes()).unwrap().len(), 1);

        // Undeclared epub prefix is tolerated
        let undeclared = r#"<nav epub:type="toc"><ol><li><a href="a">A</a></li></ol></nav>"#;
        assert_eq!(parse_nav(undeclared.as_bytes()).unwrap().len(), 1);

        // Foreign namespace is not a TOC
        let foreign = r#"<nav xmlns:x="urn:other" x:type="toc"><ol><li><a href="a">A</a></li></ol></nav>"#;
        assert!(matches!(parse_nav(foreign.as_bytes()), Err(Error::NavNotFound)));
    }

    #[test]
    fn test_nested_nav_does_not_end_toc() {
        let nav = r#"<nav epub:type="toc"><ol>
            <li><a href="a">A</a></li>
            <nav><ol><li><a href="inner">Inner</a></li></ol></nav>
            <li><a href="b">B</a></li>
        </ol></nav>"#;
        let items = parse_nav(nav.as_bytes()).unwrap();
        let hrefs: Vec<_> = items.iter().map(|i| i.href.as_str()).collect();
        assert_eq!(hrefs, vec!["a", "b"]);
    }

    #[test]
    fn test_missing_toc() {
        let nav = r#"<html><body><nav epub:type="landmarks"><ol><li>x</li></ol></nav></body></html>"#;
        assert!(matches!(parse_nav(nav.as_bytes()), Err(Error::NavNotFound)));
        let empty = r#"<nav epub:type="toc"><ol></ol></nav>"#;
        assert!(matches!(parse_nav(empty.as_bytes()), Err(Error::NavNotFound)));
    }

    #[test]
    fn test_mismatched_end_tags_tolerated() {
        let nav = r#"<nav epub:type="toc"><ol><li><a href="a">A</b></li><li><a href="b">B</a></li></ol></nav>"#;
        let items = parse_nav(nav.as_bytes()).unwrap();
        assert_eq!(items.len(), 2);
    }

    #[test]
    fn test_empty_li_and_unclosed_tail() {
        let nav = r#"<nav epub:type="toc"><ol><li/><li><a href="x.xhtml">X</a><ol><li><a href="y.xhtml">Y</a>"#;
        let items = parse_nav(nav.as_bytes()).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0], NavItem::default());
        assert_eq!(items[1].children[0].href, "y.xhtml");
    }

    #[test]
    fn test_render_round_trip() {
        let mut volume = NavItem::new("Book <1>", "Volumes/v0001/a.xhtml");
        volume.children.push(NavItem::new("", "Volumes/v0001/b.xhtml#s"));
        volume.children.push(NavItem::new("Label only", ""));
        let doc = render_nav_document(&[volume.clone()]);

        assert!(doc.contains("<nav epub:type=\"toc\" id=\"toc\">"));
        assert!(doc.contains("Book &lt;1&gt;"));
        assert!(doc.contains(">Volumes/v0001/b.xhtml#s</a>"));
        assert!(doc.contains("<li><span>Label only</span></li>"));

        let parsed = parse_nav(doc.as_bytes()).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].title, "Book <1>");
        assert_eq!(parsed[0].children[0].title, "Volumes/v0001/b.xhtml#s");
        assert_eq!(parsed[0].children[1], NavItem::new("Label only", ""));
        assert_eq!(parsed[0].count(), 3);
    }
}
