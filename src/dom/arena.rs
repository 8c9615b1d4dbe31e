//! Arena-allocated document tree.
//!
//! Both the XHTML builder and the html5ever sink produce an [`ArenaDom`]. Nodes
//! live in one vector and link to each other by index, which keeps selector
//! matching cheap and lets the rewriter hold node ids across a mutation pass.

use html5ever::{LocalName, Namespace, QualName};

/// Unique identifier for a node in the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArenaNodeId(pub u32);

impl ArenaNodeId {
    /// Sentinel value for no node.
    pub const NONE: ArenaNodeId = ArenaNodeId(u32::MAX);

    pub fn is_some(&self) -> bool {
        self.0 != u32::MAX
    }

    pub fn is_none(&self) -> bool {
        self.0 == u32::MAX
    }
}

/// Node payload.
#[derive(Debug, Clone)]
pub enum ArenaNodeData {
    Document,
    Element {
        /// Qualified name as written, prefix included.
        name: QualName,
        attrs: Vec<Attribute>,
        /// Pre-extracted id for fast matching.
        id: Option<String>,
        /// Pre-extracted classes for fast matching.
        classes: Vec<String>,
        /// Written as `<x/>` in the source.
        self_closing: bool,
    },
    Text(String),
    Comment(String),
    /// Raw doctype body, e.g. `html` or `html PUBLIC "..." "..."`.
    Doctype(String),
    /// Processing instruction or XML declaration body, without `<?` `?>`.
    ProcessingInstruction(String),
    /// Named entity reference that could not be resolved; re-emitted verbatim.
    EntityRef(String),
    CData(String),
}

/// Element attribute. Namespace declarations are kept as ordinary attributes
/// so they survive serialization.
#[derive(Debug, Clone)]
pub struct Attribute {
    pub name: QualName,
    pub value: String,
}

/// A node in the arena DOM.
#[derive(Debug)]
pub struct ArenaNode {
    pub data: ArenaNodeData,
    pub parent: ArenaNodeId,
    pub first_child: ArenaNodeId,
    pub last_child: ArenaNodeId,
    pub prev_sibling: ArenaNodeId,
    pub next_sibling: ArenaNodeId,
}

impl ArenaNode {
    fn new(data: ArenaNodeData) -> Self {
        Self {
            data,
            parent: ArenaNodeId::NONE,
            first_child: ArenaNodeId::NONE,
            last_child: ArenaNodeId::NONE,
            prev_sibling: ArenaNodeId::NONE,
            next_sibling: ArenaNodeId::NONE,
        }
    }
}

/// Arena-based DOM tree.
pub struct ArenaDom {
    nodes: Vec<ArenaNode>,
    document: ArenaNodeId,
}

impl ArenaDom {
    /// Create a new empty DOM with a document root.
    pub fn new() -> Self {
        let mut dom = Self {
            nodes: Vec::new(),
            document: ArenaNodeId::NONE,
        };
        dom.document = dom.alloc(ArenaNodeData::Document);
        dom
    }

    fn alloc(&mut self, data: ArenaNodeData) -> ArenaNodeId {
        let id = ArenaNodeId(self.nodes.len() as u32);
        self.nodes.push(ArenaNode::new(data));
        id
    }

    pub fn document(&self) -> ArenaNodeId {
        self.document
    }

    pub fn get(&self, id: ArenaNodeId) -> Option<&ArenaNode> {
        if id.is_none() {
            return None;
        }
        self.nodes.get(id.0 as usize)
    }

    pub fn get_mut(&mut self, id: ArenaNodeId) -> Option<&mut ArenaNode> {
        if id.is_none() {
            return None;
        }
        self.nodes.get_mut(id.0 as usize)
    }

    /// Create a detached element node.
    pub fn create_element(
        &mut self,
        name: QualName,
        attrs: Vec<Attribute>,
        self_closing: bool,
    ) -> ArenaNodeId {
        let mut id = None;
        let mut classes = Vec::new();

        for attr in &attrs {
            // Only unprefixed attributes carry id/class semantics.
            if attr.name.prefix.is_some() {
                continue;
            }
            match attr.name.local.as_ref() {
                "id" => id = Some(attr.value.clone()),
                "class" => {
                    classes = attr
                        .value
                        .split_whitespace()
                        .map(str::to_string)
                        .collect()
                }
                _ => {}
            }
        }

        self.alloc(ArenaNodeData::Element {
            name,
            attrs,
            id,
            classes,
            self_closing,
        })
    }

    pub fn create_text(&mut self, text: String) -> ArenaNodeId {
        self.alloc(ArenaNodeData::Text(text))
    }

    pub fn create_comment(&mut self, text: String) -> ArenaNodeId {
        self.alloc(ArenaNodeData::Comment(text))
    }

    pub fn create_doctype(&mut self, body: String) -> ArenaNodeId {
        self.alloc(ArenaNodeData::Doctype(body))
    }

    pub fn create_pi(&mut self, body: String) -> ArenaNodeId {
        self.alloc(ArenaNodeData::ProcessingInstruction(body))
    }

    pub fn create_entity_ref(&mut self, name: String) -> ArenaNodeId {
        self.alloc(ArenaNodeData::EntityRef(name))
    }

    pub fn create_cdata(&mut self, text: String) -> ArenaNodeId {
        self.alloc(ArenaNodeData::CData(text))
    }

    /// Append a child to a parent node.
    pub fn append(&mut self, parent: ArenaNodeId, child: ArenaNodeId) {
        let last_child = self
            .get(parent)
            .map(|n| n.last_child)
            .unwrap_or(ArenaNodeId::NONE);

        if let Some(child_node) = self.get_mut(child) {
            child_node.parent = parent;
            child_node.prev_sibling = last_child;
        }

        if let Some(last_node) = self.get_mut(last_child) {
            last_node.next_sibling = child;
        }

        if let Some(parent_node) = self.get_mut(parent) {
            if parent_node.first_child.is_none() {
                parent_node.first_child = child;
            }
            parent_node.last_child = child;
        }
    }

    /// Insert a node before a sibling.
    pub fn insert_before(&mut self, sibling: ArenaNodeId, new_node: ArenaNodeId) {
        let (parent, prev) = match self.get(sibling) {
            Some(n) => (n.parent, n.prev_sibling),
            None => return,
        };

        if let Some(new) = self.get_mut(new_node) {
            new.parent = parent;
            new.prev_sibling = prev;
            new.next_sibling = sibling;
        }

        if let Some(sib) = self.get_mut(sibling) {
            sib.prev_sibling = new_node;
        }

        if prev.is_some() {
            if let Some(p) = self.get_mut(prev) {
                p.next_sibling = new_node;
            }
        } else if let Some(par) = self.get_mut(parent) {
            par.first_child = new_node;
        }
    }

    /// Unlink a node from its parent and siblings.
    pub fn detach(&mut self, target: ArenaNodeId) {
        let (parent, prev, next) = match self.get(target) {
            Some(n) => (n.parent, n.prev_sibling, n.next_sibling),
            None => return,
        };

        if prev.is_some() {
            if let Some(p) = self.get_mut(prev) {
                p.next_sibling = next;
            }
        } else if let Some(p) = self.get_mut(parent) {
            p.first_child = next;
        }

        if next.is_some() {
            if let Some(n) = self.get_mut(next) {
                n.prev_sibling = prev;
            }
        } else if let Some(p) = self.get_mut(parent) {
            p.last_child = prev;
        }

        if let Some(node) = self.get_mut(target) {
            node.parent = ArenaNodeId::NONE;
            node.prev_sibling = ArenaNodeId::NONE;
            node.next_sibling = ArenaNodeId::NONE;
        }
    }

    /// Append text to the last child if it is a text node, otherwise add one.
    pub fn append_text(&mut self, parent: ArenaNodeId, text: &str) {
        let last_child = self
            .get(parent)
            .map(|n| n.last_child)
            .unwrap_or(ArenaNodeId::NONE);

        if let Some(last) = self.get_mut(last_child)
            && let ArenaNodeData::Text(existing) = &mut last.data
        {
            existing.push_str(text);
            return;
        }

        let text_node = self.create_text(text.to_string());
        self.append(parent, text_node);
    }

    /// Replace the content of a text node. Other node kinds are left alone.
    pub fn set_text(&mut self, id: ArenaNodeId, text: String) {
        if let Some(node) = self.get_mut(id)
            && let ArenaNodeData::Text(existing) = &mut node.data
        {
            *existing = text;
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Check if the DOM has nothing but its document root.
    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    /// Iterate over children of a node.
    pub fn children(&self, parent: ArenaNodeId) -> ChildrenIter<'_> {
        let first = self
            .get(parent)
            .map(|n| n.first_child)
            .unwrap_or(ArenaNodeId::NONE);
        ChildrenIter {
            dom: self,
            current: first,
        }
    }

    /// Pre-order traversal of `root` and everything below it.
    pub fn descendants(&self, root: ArenaNodeId) -> Descendants<'_> {
        Descendants {
            dom: self,
            stack: vec![root],
        }
    }

    /// Walk up from `id` (exclusive) to the document.
    pub fn ancestors(&self, id: ArenaNodeId) -> impl Iterator<Item = ArenaNodeId> + '_ {
        let mut current = self.get(id).map(|n| n.parent).unwrap_or(ArenaNodeId::NONE);
        std::iter::from_fn(move || {
            if current.is_none() {
                return None;
            }
            let id = current;
            current = self.get(id).map(|n| n.parent).unwrap_or(ArenaNodeId::NONE);
            Some(id)
        })
    }

    /// Find element by local name (first match in document order).
    #[cfg(test)]
    pub fn find_by_tag(&self, tag: &str) -> Option<ArenaNodeId> {
        self.descendants(self.document)
            .find(|&id| self.element_name(id).is_some_and(|n| n.as_ref() == tag))
    }
}

impl Default for ArenaDom {
    fn default() -> Self {
        Self::new()
    }
}

/// Iterator over children of a node.
pub struct ChildrenIter<'a> {
    dom: &'a ArenaDom,
    current: ArenaNodeId,
}

impl Iterator for ChildrenIter<'_> {
    type Item = ArenaNodeId;

    fn next(&mut self) -> Option<Self::Item> {
        if self.current.is_none() {
            return None;
        }
        let id = self.current;
        self.current = self
            .dom
            .get(id)
            .map(|n| n.next_sibling)
            .unwrap_or(ArenaNodeId::NONE);
        Some(id)
    }
}

/// Depth-first, document-order iterator.
pub struct Descendants<'a> {
    dom: &'a ArenaDom,
    stack: Vec<ArenaNodeId>,
}

impl Iterator for Descendants<'_> {
    type Item = ArenaNodeId;

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.stack.pop()?;
        let start = self.stack.len();
        self.stack.extend(self.dom.children(id));
        self.stack[start..].reverse();
        Some(id)
    }
}

/// Convenience accessors for element nodes.
impl ArenaDom {
    pub fn element_name(&self, id: ArenaNodeId) -> Option<&LocalName> {
        self.get(id).and_then(|n| match &n.data {
            ArenaNodeData::Element { name, .. } => Some(&name.local),
            _ => None,
        })
    }

    pub fn element_namespace(&self, id: ArenaNodeId) -> Option<&Namespace> {
        self.get(id).and_then(|n| match &n.data {
            ArenaNodeData::Element { name, .. } => Some(&name.ns),
            _ => None,
        })
    }

    /// Get an unprefixed attribute value.
    pub fn get_attr(&self, id: ArenaNodeId, attr_name: &str) -> Option<&str> {
        self.get(id).and_then(|n| match &n.data {
            ArenaNodeData::Element { attrs, .. } => attrs
                .iter()
                .find(|a| a.name.prefix.is_none() && a.name.local.as_ref() == attr_name)
                .map(|a| a.value.as_str()),
            _ => None,
        })
    }

    pub fn element_id(&self, id: ArenaNodeId) -> Option<&str> {
        self.get(id).and_then(|n| match &n.data {
            ArenaNodeData::Element { id, .. } => id.as_deref(),
            _ => None,
        })
    }

    pub fn element_classes(&self, id: ArenaNodeId) -> &[String] {
        self.get(id)
            .and_then(|n| match &n.data {
                ArenaNodeData::Element { classes, .. } => Some(classes.as_slice()),
                _ => None,
            })
            .unwrap_or(&[])
    }

    pub fn is_element(&self, id: ArenaNodeId) -> bool {
        self.get(id)
            .is_some_and(|n| matches!(n.data, ArenaNodeData::Element { .. }))
    }

    pub fn is_text(&self, id: ArenaNodeId) -> bool {
        self.get(id)
            .is_some_and(|n| matches!(n.data, ArenaNodeData::Text(_)))
    }

    pub fn text_content(&self, id: ArenaNodeId) -> Option<&str> {
        self.get(id).and_then(|n| match &n.data {
            ArenaNodeData::Text(s) => Some(s.as_str()),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use html5ever::ns;

    use super::*;

    fn make_qname(local: &str) -> QualName {
        QualName::new(None, ns!(html), LocalName::from(local))
    }

    fn attr(name: &str, value: &str) -> Attribute {
        Attribute {
            name: QualName::new(None, ns!(), LocalName::from(name)),
            value: value.to_string(),
        }
    }

    #[test]
    fn test_id_and_classes_extracted() {
        let mut dom = ArenaDom::new();
        let div = dom.create_element(
            make_qname("div"),
            vec![attr("id", "ch1"), attr("class", "chapter  opener")],
            false,
        );
        dom.append(dom.document(), div);

        assert_eq!(dom.element_name(div).map(|n| n.as_ref()), Some("div"));
        assert_eq!(dom.element_id(div), Some("ch1"));
        assert_eq!(dom.element_classes(div), ["chapter", "opener"]);
    }

    #[test]
    fn test_descendants_in_document_order() {
        let mut dom = ArenaDom::new();
        let body = dom.create_element(make_qname("body"), vec![], false);
        let p1 = dom.create_element(make_qname("p"), vec![], false);
        let em = dom.create_element(make_qname("em"), vec![], false);
        let p2 = dom.create_element(make_qname("p"), vec![], false);
        dom.append(dom.document(), body);
        dom.append(body, p1);
        dom.append(p1, em);
        dom.append(body, p2);

        let order: Vec<_> = dom.descendants(body).collect();
        assert_eq!(order, vec![body, p1, em, p2]);
        assert_eq!(dom.ancestors(em).collect::<Vec<_>>(), vec![p1, body, dom.document()]);
    }

    #[test]
    fn test_text_merging_and_set_text() {
        let mut dom = ArenaDom::new();
        let p = dom.create_element(make_qname("p"), vec![], false);
        dom.append(dom.document(), p);

        dom.append_text(p, "Chapter ");
        dom.append_text(p, "One");

        let children: Vec<_> = dom.children(p).collect();
        assert_eq!(children.len(), 1);
        assert_eq!(dom.text_content(children[0]), Some("Chapter One"));

        dom.set_text(children[0], "Bye".into());
        assert_eq!(dom.text_content(children[0]), Some("Bye"));
    }

    #[test]
    fn test_detach_and_insert_before() {
        let mut dom = ArenaDom::new();
        let ul = dom.create_element(make_qname("ul"), vec![], false);
        let a = dom.create_element(make_qname("li"), vec![], false);
        let b = dom.create_element(make_qname("li"), vec![], false);
        dom.append(dom.document(), ul);
        dom.append(ul, a);
        dom.append(ul, b);

        dom.detach(a);
        assert_eq!(dom.children(ul).collect::<Vec<_>>(), vec![b]);

        dom.insert_before(b, a);
        assert_eq!(dom.children(ul).collect::<Vec<_>>(), vec![a, b]);
    }
}
