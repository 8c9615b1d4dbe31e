//! Write an [`ArenaDom`] back out as markup.

use super::arena::{ArenaDom, ArenaNodeData, ArenaNodeId, Attribute};

/// Output syntax.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flavor {
    /// XHTML: empty-element tags as written in the source, everything escaped.
    Xml,
    /// HTML: void elements are self-closed, `script`/`style` text is raw.
    Html,
}

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

const RAW_TEXT_ELEMENTS: &[&str] = &["script", "style"];

/// Serialize the whole document.
pub fn serialize(dom: &ArenaDom, flavor: Flavor) -> String {
    let mut out = String::new();
    for child in dom.children(dom.document()) {
        write_node(dom, child, flavor, false, &mut out);
    }
    out
}

fn write_node(dom: &ArenaDom, id: ArenaNodeId, flavor: Flavor, raw_text: bool, out: &mut String) {
    let Some(node) = dom.get(id) else {
        return;
    };

    match &node.data {
        ArenaNodeData::Document => {
            for child in dom.children(id) {
                write_node(dom, child, flavor, false, out);
            }
        }
        ArenaNodeData::Element {
            name,
            attrs,
            self_closing,
            ..
        } => {
            let tag = qualified(name.prefix.as_deref(), &name.local);
            out.push('<');
            out.push_str(&tag);
            write_attrs(attrs, out);

            let empty = node.first_child.is_none();
            let void = flavor == Flavor::Html && VOID_ELEMENTS.contains(&name.local.as_ref());
            if empty && (*self_closing || void) {
                out.push_str("/>");
                return;
            }

            out.push('>');
            let raw = flavor == Flavor::Html && RAW_TEXT_ELEMENTS.contains(&name.local.as_ref());
            for child in dom.children(id) {
                write_node(dom, child, flavor, raw, out);
            }
            out.push_str("</");
            out.push_str(&tag);
            out.push('>');
        }
        ArenaNodeData::Text(text) if raw_text => out.push_str(text),
        ArenaNodeData::Text(text) => escape_text(text, out),
        ArenaNodeData::Comment(text) => {
            out.push_str("<!--");
            out.push_str(text);
            out.push_str("-->");
        }
        ArenaNodeData::Doctype(body) => {
            out.push_str("<!DOCTYPE ");
            out.push_str(body);
            out.push('>');
        }
        ArenaNodeData::ProcessingInstruction(body) => {
            out.push_str("<?");
            out.push_str(body);
            out.push_str("?>");
        }
        ArenaNodeData::EntityRef(name) => {
            out.push('&');
            out.push_str(name);
            out.push(';');
        }
        ArenaNodeData::CData(text) => {
            out.push_str("<![CDATA[");
            out.push_str(text);
            out.push_str("]]>");
        }
    }
}

fn qualified(prefix: Option<&str>, local: &str) -> String {
    match prefix {
        Some(prefix) => format!("{prefix}:{local}"),
        None => local.to_string(),
    }
}

fn write_attrs(attrs: &[Attribute], out: &mut String) {
    for attr in attrs {
        out.push(' ');
        out.push_str(&qualified(attr.name.prefix.as_deref(), &attr.name.local));
        out.push_str("=\"");
        escape_attr(&attr.value, out);
        out.push('"');
    }
}

/// Attribute values also keep `\n`, `\r` and `\t` as character references,
/// otherwise attribute-value normalization reads them back as spaces.
fn escape_attr(value: &str, out: &mut String) {
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\n' => out.push_str("&#10;"),
            '\r' => out.push_str("&#13;"),
            '\t' => out.push_str("&#9;"),
            c => out.push(c),
        }
    }
}

/// Text content only needs `&`, `<` and `>` escaped.
fn escape_text(text: &str, out: &mut String) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            c => out.push(c),
        }
    }
}
