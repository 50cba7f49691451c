//! Parsing HTML into the crate's DOM tree.
//!
//! html5ever drives the parse; [`RetroTreeSink`] receives the tree
//! construction callbacks and builds a `crate::dom::dom_tree::Document`
//! with parent links on every element.

use crate::dom::dom_tree::{self, Node, NodeRef};
use html5ever::tendril::{StrTendril, TendrilSink};
use html5ever::{
    interface::{ElemName, ElementFlags, NodeOrText, QuirksMode, TreeSink},
    Attribute, LocalName, Namespace, QualName,
};
use log::trace;
use std::borrow::Cow;
use std::cell::RefCell;
use std::rc::Rc;

/// Creates a DOM tree from the provided HTML content.
pub fn create_dom_tree(html_content: &str) -> dom_tree::Document {
    let tree_sink = RetroTreeSink::new();
    html5ever::parse_document(tree_sink, Default::default()).one(html_content.to_string())
}

/// Tree sink holding the Document being built and the current quirks mode.
pub struct RetroTreeSink {
    document: dom_tree::Document,
    quirks_mode: RefCell<QuirksMode>,
}

impl RetroTreeSink {
    pub fn new() -> Self {
        Self {
            document: dom_tree::new_document(),
            quirks_mode: RefCell::new(QuirksMode::NoQuirks),
        }
    }

    fn to_node(child: NodeOrText<NodeRef>) -> NodeRef {
        match child {
            NodeOrText::AppendNode(node) => node,
            NodeOrText::AppendText(text) => Rc::new(RefCell::new(Node::Text(text.to_string()))),
        }
    }

    /// Append text to `children`, merging with a trailing text node.
    fn merge_text(children: &mut Vec<NodeRef>, pos: usize, text: &str) -> bool {
        if pos == 0 {
            return false;
        }
        if let Node::Text(existing) = &mut *children[pos - 1].borrow_mut() {
            existing.push_str(text);
            return true;
        }
        false
    }

    fn insert_at(parent: &NodeRef, pos: Option<usize>, child: NodeOrText<NodeRef>) {
        let mut parent_borrow = parent.borrow_mut();
        let Some(children) = parent_borrow.children_mut() else {
            return;
        };
        let pos = pos.unwrap_or(children.len());
        if let NodeOrText::AppendText(text) = &child {
            if Self::merge_text(children, pos, text) {
                return;
            }
        }
        let node = Self::to_node(child);
        node.borrow_mut().set_parent(Some(Rc::downgrade(parent)));
        children.insert(pos, node);
    }
}

impl Default for RetroTreeSink {
    fn default() -> Self {
        Self::new()
    }
}

/// Element name handed back to html5ever.
#[derive(Debug)]
pub struct RetroElemName {
    ns: Namespace,
    local: LocalName,
}

impl ElemName for RetroElemName {
    fn local_name(&self) -> &LocalName {
        &self.local
    }

    fn ns(&self) -> &Namespace {
        &self.ns
    }
}

impl TreeSink for RetroTreeSink {
    type Handle = NodeRef;
    type Output = dom_tree::Document;
    type ElemName<'a>
        = RetroElemName
    where
        Self: 'a;

    fn finish(self) -> Self::Output {
        self.document
    }

    fn parse_error(&self, msg: Cow<'static, str>) {
        trace!("html parse error: {}", msg);
    }

    fn get_document(&self) -> Self::Handle {
        self.document.root.clone()
    }

    fn elem_name<'a>(&'a self, target: &'a Self::Handle) -> Self::ElemName<'a> {
        match &*target.borrow() {
            Node::Element(elem) => RetroElemName {
                ns: elem.qual_name.ns.clone(),
                local: elem.qual_name.local.clone(),
            },
            _ => RetroElemName {
                ns: Namespace::from(""),
                local: LocalName::from(""),
            },
        }
    }

    fn create_element(
        &self,
        name: QualName,
        attrs: Vec<Attribute>,
        _flags: ElementFlags,
    ) -> Self::Handle {
        let mut element = dom_tree::ElementNode::new(name);
        element.attributes = attrs
            .into_iter()
            .map(|attr| (attr.name.local.to_string(), attr.value.to_string()))
            .collect();
        Rc::new(RefCell::new(Node::Element(element)))
    }

    fn create_comment(&self, text: StrTendril) -> Self::Handle {
        Rc::new(RefCell::new(Node::Comment(text.to_string())))
    }

    fn create_pi(&self, target: StrTendril, data: StrTendril) -> Self::Handle {
        Rc::new(RefCell::new(Node::Comment(format!("?{} {}", target, data))))
    }

    fn append(&self, parent: &Self::Handle, child: NodeOrText<Self::Handle>) {
        Self::insert_at(parent, None, child);
    }

    fn append_based_on_parent_node(
        &self,
        element: &Self::Handle,
        prev_element: &Self::Handle,
        child: NodeOrText<Self::Handle>,
    ) {
        if dom_tree::parent_node(element).is_some() {
            self.append_before_sibling(element, child);
        } else {
            self.append(prev_element, child);
        }
    }

    fn append_doctype_to_document(
        &self,
        name: StrTendril,
        public_id: StrTendril,
        system_id: StrTendril,
    ) {
        *self.document.doctype.borrow_mut() = Some(dom_tree::Doctype {
            name: name.to_string(),
            public_id: public_id.to_string(),
            system_id: system_id.to_string(),
        });
    }

    fn get_template_contents(&self, target: &Self::Handle) -> Self::Handle {
        target.clone()
    }

    fn same_node(&self, x: &Self::Handle, y: &Self::Handle) -> bool {
        Rc::ptr_eq(x, y)
    }

    fn set_quirks_mode(&self, mode: QuirksMode) {
        *self.quirks_mode.borrow_mut() = mode;
    }

    fn append_before_sibling(&self, sibling: &Self::Handle, child: NodeOrText<Self::Handle>) {
        let Some(parent) = dom_tree::parent_node(sibling) else {
            return;
        };
        let pos = parent
            .borrow()
            .children()
            .iter()
            .position(|c| Rc::ptr_eq(c, sibling));
        Self::insert_at(&parent, pos, child);
    }

    fn add_attrs_if_missing(&self, target: &Self::Handle, attrs: Vec<Attribute>) {
        let mut target_node = target.borrow_mut();
        if let Node::Element(elem_node) = &mut *target_node {
            for attr in attrs {
                let key = attr.name.local.to_string();
                if !elem_node.has_attr(&key) {
                    elem_node.attributes.push((key, attr.value.to_string()));
                }
            }
        }
    }

    fn remove_from_parent(&self, target: &Self::Handle) {
        if let Some(parent) = dom_tree::parent_node(target) {
            if let Some(children) = parent.borrow_mut().children_mut() {
                children.retain(|c| !Rc::ptr_eq(c, target));
            }
        }
        target.borrow_mut().set_parent(None);
    }

    fn reparent_children(&self, node: &Self::Handle, new_parent: &Self::Handle) {
        let moved = match node.borrow_mut().children_mut() {
            Some(children) => std::mem::take(children),
            None => return,
        };
        for child in &moved {
            child.borrow_mut().set_parent(Some(Rc::downgrade(new_parent)));
        }
        if let Some(children) = new_parent.borrow_mut().children_mut() {
            children.extend(moved);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_builds_parent_links() {
        let doc = create_dom_tree(
            "<!DOCTYPE html><html><head><style>a{color:red}</style></head>\
             <body><div id=\"x\" class=\"a b\">Hi <b>there</b></div></body></html>",
        );
        assert_eq!(doc.doctype.borrow().as_ref().map(|d| d.name.clone()), Some("html".into()));
        let div = doc.get_element_by_id("x").unwrap();
        let body = dom_tree::parent_element(&div).unwrap();
        assert!(dom_tree::is_tag(&body, "body"));
        assert!(div.borrow().as_element().unwrap().has_class("b"));
        assert_eq!(dom_tree::text_content(&div), "Hi there");

        let head = doc.head().unwrap();
        let style = dom_tree::element_children(&head).remove(0);
        assert_eq!(dom_tree::text_content(&style), "a{color:red}");
    }

    #[test]
    fn test_implied_elements() {
        let doc = create_dom_tree("<p>one<p>two");
        let tags: Vec<String> = doc.elements().iter().filter_map(dom_tree::tag_name).collect();
        assert_eq!(tags, vec!["html", "head", "body", "p", "p"]);
    }
}
