use html5ever::{LocalName, Namespace, QualName};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

pub mod dom_tree {
    use super::*;
    use crate::transform::split_top_level;

    pub type NodeRef = Rc<RefCell<Node>>;

    const HTML_NAMESPACE: &str = "http://www.w3.org/1999/xhtml";

    #[derive(Debug)]
    pub enum Node {
        DocumentRoot(DocumentRootNode),
        Element(ElementNode),
        Text(String),
        Comment(String),
    }

    #[derive(Debug, Default)]
    pub struct DocumentRootNode {
        pub children: Vec<NodeRef>,
    }

    #[derive(Debug)]
    pub struct ElementNode {
        pub tag: String,
        pub qual_name: QualName,
        pub attributes: Vec<(String, String)>,
        pub children: Vec<NodeRef>,
        pub parent: Option<Weak<RefCell<Node>>>,
        /// Processing markers keyed by marker name, holding the hash of the
        /// content they were set for. Never serialized.
        pub markers: HashMap<&'static str, u32>,
    }

    #[derive(Debug)]
    pub struct Doctype {
        pub name: String,
        pub public_id: String,
        pub system_id: String,
    }

    /// One observable DOM change, in the shape a `MutationObserver` sees it.
    #[derive(Debug, Clone)]
    pub enum MutationRecord {
        ChildList {
            target: NodeRef,
            added: Vec<NodeRef>,
            removed: Vec<NodeRef>,
        },
        Attributes {
            target: NodeRef,
            name: String,
        },
    }

    /// A declaration of an element's inline `style` attribute.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct InlineDeclaration {
        pub property: String,
        pub value: String,
        pub important: bool,
    }

    #[derive(Debug)]
    pub struct Document {
        pub root: NodeRef,
        pub doctype: RefCell<Option<Doctype>>,
        observer: RefCell<Option<UnboundedSender<MutationRecord>>>,
    }

    impl Node {
        pub fn as_element(&self) -> Option<&ElementNode> {
            match self {
                Node::Element(elem) => Some(elem),
                _ => None,
            }
        }

        pub fn as_element_mut(&mut self) -> Option<&mut ElementNode> {
            match self {
                Node::Element(elem) => Some(elem),
                _ => None,
            }
        }

        pub fn children(&self) -> &[NodeRef] {
            match self {
                Node::DocumentRoot(root) => &root.children,
                Node::Element(elem) => &elem.children,
                Node::Text(_) | Node::Comment(_) => &[],
            }
        }

        pub fn children_mut(&mut self) -> Option<&mut Vec<NodeRef>> {
            match self {
                Node::DocumentRoot(root) => Some(&mut root.children),
                Node::Element(elem) => Some(&mut elem.children),
                Node::Text(_) | Node::Comment(_) => None,
            }
        }

        pub(crate) fn set_parent(&mut self, parent: Option<Weak<RefCell<Node>>>) {
            if let Node::Element(elem) = self {
                elem.parent = parent;
            }
        }
    }

    impl ElementNode {
        pub fn new(qual_name: QualName) -> Self {
            ElementNode {
                tag: qual_name.local.to_string(),
                qual_name,
                attributes: Vec::new(),
                children: Vec::new(),
                parent: None,
                markers: HashMap::new(),
            }
        }

        pub fn attr(&self, name: &str) -> Option<&str> {
            self.attributes
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(name))
                .map(|(_, value)| value.as_str())
        }

        pub fn has_attr(&self, name: &str) -> bool {
            self.attr(name).is_some()
        }

        pub fn id(&self) -> Option<&str> {
            self.attr("id")
        }

        pub fn has_class(&self, class_name: &str) -> bool {
            self.attr("class")
                .map(|classes| classes.split_whitespace().any(|c| c == class_name))
                .unwrap_or(false)
        }

        /// True for `<link>` elements whose `rel` lists `stylesheet`.
        pub fn is_stylesheet_link(&self) -> bool {
            self.tag.eq_ignore_ascii_case("link")
                && self
                    .attr("rel")
                    .map(|rel| {
                        let mut tokens = rel.split_whitespace();
                        tokens.any(|t| t.eq_ignore_ascii_case("stylesheet"))
                            && !rel
                                .split_whitespace()
                                .any(|t| t.eq_ignore_ascii_case("alternate"))
                    })
                    .unwrap_or(false)
        }

        fn set_attr(&mut self, name: &str, value: &str) -> bool {
            match self
                .attributes
                .iter_mut()
                .find(|(key, _)| key.eq_ignore_ascii_case(name))
            {
                Some((_, existing)) if existing == value => false,
                Some((_, existing)) => {
                    *existing = value.to_string();
                    true
                }
                None => {
                    self.attributes.push((name.to_string(), value.to_string()));
                    true
                }
            }
        }

        fn remove_attr(&mut self, name: &str) -> bool {
            let before = self.attributes.len();
            self.attributes
                .retain(|(key, _)| !key.eq_ignore_ascii_case(name));
            before != self.attributes.len()
        }
    }

    pub fn new_document() -> Document {
        Document {
            root: Rc::new(RefCell::new(Node::DocumentRoot(DocumentRootNode::default()))),
            doctype: RefCell::new(None),
            observer: RefCell::new(None),
        }
    }

    /// Qualified name of an element in the HTML namespace.
    pub fn html_name(tag: &str) -> QualName {
        QualName::new(None, Namespace::from(HTML_NAMESPACE), LocalName::from(tag))
    }

    pub fn is_element(node: &NodeRef) -> bool {
        matches!(*node.borrow(), Node::Element(_))
    }

    pub fn tag_name(node: &NodeRef) -> Option<String> {
        node.borrow().as_element().map(|elem| elem.tag.clone())
    }

    pub fn is_tag(node: &NodeRef, tag: &str) -> bool {
        node.borrow()
            .as_element()
            .map(|elem| elem.tag.eq_ignore_ascii_case(tag))
            .unwrap_or(false)
    }

    pub fn attribute(node: &NodeRef, name: &str) -> Option<String> {
        node.borrow()
            .as_element()
            .and_then(|elem| elem.attr(name).map(str::to_string))
    }

    pub fn parent_node(node: &NodeRef) -> Option<NodeRef> {
        node.borrow()
            .as_element()
            .and_then(|elem| elem.parent.as_ref())
            .and_then(Weak::upgrade)
    }

    /// Parent, if the parent is an element (not the document root).
    pub fn parent_element(node: &NodeRef) -> Option<NodeRef> {
        parent_node(node).filter(is_element)
    }

    pub fn element_children(node: &NodeRef) -> Vec<NodeRef> {
        node.borrow()
            .children()
            .iter()
            .filter(|child| is_element(child))
            .cloned()
            .collect()
    }

    pub fn previous_element_sibling(node: &NodeRef) -> Option<NodeRef> {
        let parent = parent_node(node)?;
        let siblings = element_children(&parent);
        let pos = siblings.iter().position(|s| Rc::ptr_eq(s, node))?;
        if pos == 0 {
            None
        } else {
            Some(Rc::clone(&siblings[pos - 1]))
        }
    }

    pub fn next_element_sibling(node: &NodeRef) -> Option<NodeRef> {
        let parent = parent_node(node)?;
        let siblings = element_children(&parent);
        let pos = siblings.iter().position(|s| Rc::ptr_eq(s, node))?;
        siblings.get(pos + 1).cloned()
    }

    /// All element descendants of `node` in document order, excluding `node`.
    pub fn descendant_elements(node: &NodeRef) -> Vec<NodeRef> {
        let mut out = Vec::new();
        collect_elements(node, &mut out);
        out
    }

    fn collect_elements(node: &NodeRef, out: &mut Vec<NodeRef>) {
        for child in node.borrow().children() {
            if is_element(child) {
                out.push(Rc::clone(child));
            }
            collect_elements(child, out);
        }
    }

    pub fn text_content(node: &NodeRef) -> String {
        let mut out = String::new();
        collect_text(node, &mut out);
        out
    }

    fn collect_text(node: &NodeRef, out: &mut String) {
        match &*node.borrow() {
            Node::Text(text) => out.push_str(text),
            other => {
                for child in other.children() {
                    collect_text(child, out);
                }
            }
        }
    }

    /// Content hash recorded under `marker` on an element, if any.
    pub fn marker(node: &NodeRef, marker: &'static str) -> Option<u32> {
        node.borrow()
            .as_element()
            .and_then(|elem| elem.markers.get(marker).copied())
    }

    pub fn has_marker(node: &NodeRef, marker: &'static str, hash: u32) -> bool {
        self::marker(node, marker) == Some(hash)
    }

    pub fn set_marker(node: &NodeRef, marker: &'static str, hash: u32) {
        if let Some(elem) = node.borrow_mut().as_element_mut() {
            elem.markers.insert(marker, hash);
        }
    }

    /// Parse the text of a `style` attribute into its declarations.
    pub fn parse_inline_style(style: &str) -> Vec<InlineDeclaration> {
        split_top_level(style, ';')
            .into_iter()
            .filter_map(|decl| {
                let (property, value) = decl.split_once(':')?;
                let property = property.trim().to_ascii_lowercase();
                let mut value = value.trim();
                let mut important = false;
                if let Some(bang) = value.rfind('!') {
                    if value[bang + 1..].trim().eq_ignore_ascii_case("important") {
                        important = true;
                        value = value[..bang].trim_end();
                    }
                }
                if property.is_empty() || value.is_empty() {
                    return None;
                }
                Some(InlineDeclaration {
                    property,
                    value: value.to_string(),
                    important,
                })
            })
            .collect()
    }

    pub fn serialize_inline_style(declarations: &[InlineDeclaration]) -> String {
        declarations
            .iter()
            .map(|decl| {
                if decl.important {
                    format!("{}: {} !important", decl.property, decl.value)
                } else {
                    format!("{}: {}", decl.property, decl.value)
                }
            })
            .collect::<Vec<_>>()
            .join("; ")
    }

    impl Document {
        pub fn new() -> Self {
            new_document()
        }

        /// Subscribe to DOM mutations. Replaces any earlier subscription.
        pub fn observe(&self) -> UnboundedReceiver<MutationRecord> {
            let (tx, rx) = mpsc::unbounded_channel();
            *self.observer.borrow_mut() = Some(tx);
            rx
        }

        pub fn disconnect(&self) {
            self.observer.borrow_mut().take();
        }

        fn record(&self, record: MutationRecord) {
            if let Some(tx) = &*self.observer.borrow() {
                if tx.send(record).is_err() {
                    log::trace!("mutation observer receiver dropped");
                }
            }
        }

        /// The root `<html>` element.
        pub fn document_element(&self) -> Option<NodeRef> {
            element_children(&self.root).into_iter().next()
        }

        pub fn head(&self) -> Option<NodeRef> {
            self.document_element()
                .and_then(|html| element_children(&html).into_iter().find(|c| is_tag(c, "head")))
        }

        pub fn body(&self) -> Option<NodeRef> {
            self.document_element()
                .and_then(|html| element_children(&html).into_iter().find(|c| is_tag(c, "body")))
        }

        /// Every element of the document in document order.
        pub fn elements(&self) -> Vec<NodeRef> {
            descendant_elements(&self.root)
        }

        pub fn get_element_by_id(&self, id: &str) -> Option<NodeRef> {
            self.elements().into_iter().find(|node| {
                node.borrow()
                    .as_element()
                    .and_then(ElementNode::id)
                    .map(|v| v == id)
                    .unwrap_or(false)
            })
        }

        /// Create a detached HTML element.
        pub fn create_element(&self, tag: &str) -> NodeRef {
            Rc::new(RefCell::new(Node::Element(ElementNode::new(html_name(tag)))))
        }

        fn detach(node: &NodeRef) {
            if let Some(old_parent) = parent_node(node) {
                if let Some(children) = old_parent.borrow_mut().children_mut() {
                    children.retain(|c| !Rc::ptr_eq(c, node));
                }
            }
            node.borrow_mut().set_parent(None);
        }

        pub fn append_child(&self, parent: &NodeRef, child: &NodeRef) {
            Self::detach(child);
            if let Some(children) = parent.borrow_mut().children_mut() {
                children.push(Rc::clone(child));
            } else {
                return;
            }
            child.borrow_mut().set_parent(Some(Rc::downgrade(parent)));
            self.record(MutationRecord::ChildList {
                target: Rc::clone(parent),
                added: vec![Rc::clone(child)],
                removed: Vec::new(),
            });
        }

        /// Insert `child` right after `reference` under the same parent.
        pub fn insert_after(&self, reference: &NodeRef, child: &NodeRef) -> bool {
            let Some(parent) = parent_node(reference) else {
                return false;
            };
            Self::detach(child);
            {
                let mut parent_borrow = parent.borrow_mut();
                let Some(children) = parent_borrow.children_mut() else {
                    return false;
                };
                let pos = children
                    .iter()
                    .position(|c| Rc::ptr_eq(c, reference))
                    .map(|p| p + 1)
                    .unwrap_or(children.len());
                children.insert(pos, Rc::clone(child));
            }
            child.borrow_mut().set_parent(Some(Rc::downgrade(&parent)));
            self.record(MutationRecord::ChildList {
                target: parent,
                added: vec![Rc::clone(child)],
                removed: Vec::new(),
            });
            true
        }

        pub fn remove(&self, node: &NodeRef) -> bool {
            let Some(parent) = parent_node(node) else {
                return false;
            };
            Self::detach(node);
            self.record(MutationRecord::ChildList {
                target: parent,
                added: Vec::new(),
                removed: vec![Rc::clone(node)],
            });
            true
        }

        pub fn set_attribute(&self, node: &NodeRef, name: &str, value: &str) {
            let changed = node
                .borrow_mut()
                .as_element_mut()
                .map(|elem| elem.set_attr(name, value))
                .unwrap_or(false);
            if changed {
                self.record(MutationRecord::Attributes {
                    target: Rc::clone(node),
                    name: name.to_ascii_lowercase(),
                });
            }
        }

        pub fn remove_attribute(&self, node: &NodeRef, name: &str) {
            let changed = node
                .borrow_mut()
                .as_element_mut()
                .map(|elem| elem.remove_attr(name))
                .unwrap_or(false);
            if changed {
                self.record(MutationRecord::Attributes {
                    target: Rc::clone(node),
                    name: name.to_ascii_lowercase(),
                });
            }
        }

        /// Replace all children of `node` with a single text node.
        pub fn set_text_content(&self, node: &NodeRef, text: &str) {
            if text_content(node) == text {
                return;
            }
            let text_node = Rc::new(RefCell::new(Node::Text(text.to_string())));
            let removed = {
                let mut node_borrow = node.borrow_mut();
                let Some(children) = node_borrow.children_mut() else {
                    return;
                };
                let removed = std::mem::take(children);
                if !text.is_empty() {
                    children.push(Rc::clone(&text_node));
                }
                removed
            };
            for child in &removed {
                child.borrow_mut().set_parent(None);
            }
            let added = if text.is_empty() { Vec::new() } else { vec![text_node] };
            self.record(MutationRecord::ChildList {
                target: Rc::clone(node),
                added,
                removed,
            });
        }

        pub fn style_declarations(&self, node: &NodeRef) -> Vec<InlineDeclaration> {
            attribute(node, "style")
                .map(|style| parse_inline_style(&style))
                .unwrap_or_default()
        }

        pub fn style_property(&self, node: &NodeRef, property: &str) -> Option<InlineDeclaration> {
            self.style_declarations(node)
                .into_iter()
                .rev()
                .find(|decl| decl.property.eq_ignore_ascii_case(property))
        }

        /// `element.style.setProperty`. Returns whether the attribute changed.
        pub fn set_style_property(
            &self,
            node: &NodeRef,
            property: &str,
            value: &str,
            important: bool,
        ) -> bool {
            let mut declarations = self.style_declarations(node);
            let property = property.to_ascii_lowercase();
            let replacement = InlineDeclaration {
                property: property.clone(),
                value: value.to_string(),
                important,
            };
            match declarations.iter().position(|d| d.property == property) {
                Some(pos) if declarations[pos] == replacement => return false,
                Some(pos) => {
                    declarations.retain(|d| d.property != property);
                    declarations.insert(pos.min(declarations.len()), replacement);
                }
                None => declarations.push(replacement),
            }
            self.set_attribute(node, "style", &serialize_inline_style(&declarations));
            true
        }
    }

    impl Default for Document {
        fn default() -> Self {
            new_document()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::dom_tree::*;
    use std::rc::Rc;

    #[test]
    fn test_inline_style_round_trip() {
        let decls = parse_inline_style("color: red; background: url(a;b.png) !important;;");
        assert_eq!(decls.len(), 2);
        assert_eq!(decls[1].value, "url(a;b.png)");
        assert!(decls[1].important);
        assert_eq!(
            serialize_inline_style(&decls),
            "color: red; background: url(a;b.png) !important"
        );
    }

    #[test]
    fn test_mutations_are_recorded_only_on_change() {
        let doc = Document::new();
        let html = doc.create_element("html");
        doc.append_child(&doc.root, &html);
        let mut rx = doc.observe();

        let div = doc.create_element("div");
        doc.append_child(&html, &div);
        assert!(doc.set_style_property(&div, "color", "rgb(1, 2, 3)", false));
        assert!(!doc.set_style_property(&div, "color", "rgb(1, 2, 3)", false));
        doc.set_attribute(&div, "class", "a");
        doc.set_attribute(&div, "class", "a");

        let mut count = 0;
        while rx.try_recv().is_ok() {
            count += 1;
        }
        // append + style + class
        assert_eq!(count, 3);
    }

    #[test]
    fn test_insert_after_and_remove() {
        let doc = Document::new();
        let html = doc.create_element("html");
        doc.append_child(&doc.root, &html);
        let a = doc.create_element("a");
        let b = doc.create_element("b");
        let c = doc.create_element("c");
        doc.append_child(&html, &a);
        doc.append_child(&html, &c);
        assert!(doc.insert_after(&a, &b));
        let tags: Vec<_> = element_children(&html)
            .iter()
            .filter_map(tag_name)
            .collect();
        assert_eq!(tags, vec!["a", "b", "c"]);
        assert!(doc.remove(&a));
        assert!(previous_element_sibling(&b).is_none());
        assert!(Rc::ptr_eq(&next_element_sibling(&b).unwrap(), &c));
        assert!(parent_node(&a).is_none());
    }
}
