//! Lookup indices over a document snapshot, used to narrow the elements a
//! selector query has to test.

use crate::dom::dom_tree::{Document, Node, NodeRef};
use std::collections::HashMap;
use std::rc::Rc;

/// Snapshot indices over a document for fast lookup.
#[derive(Debug, Default)]
pub struct DomIndices {
    /// Every element in document order.
    pub elements: Vec<NodeRef>,
    /// Maps an element's "id" attribute to the first node carrying it.
    pub id_map: HashMap<String, NodeRef>,
    /// Maps a class name to all nodes that have that class.
    pub class_map: HashMap<String, Vec<NodeRef>>,
    /// Maps a lowercase tag name (e.g., "div") to all nodes with that tag.
    pub tag_map: HashMap<String, Vec<NodeRef>>,
}

impl DomIndices {
    /// Build the indices for the entire document.
    pub fn build(document: &Document) -> Self {
        let mut indices = DomIndices::default();
        Self::traverse(&document.root, &mut indices);
        indices
    }

    pub fn by_tag(&self, tag: &str) -> &[NodeRef] {
        self.tag_map
            .get(&tag.to_ascii_lowercase())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn by_id(&self, id: &str) -> Option<&NodeRef> {
        self.id_map.get(id)
    }

    /// Elements that may match `selector`, narrowed by the id, class or tag
    /// of its subject compound. Callers still run the full match.
    pub fn candidates(&self, selector: &str) -> &[NodeRef] {
        let subject = subject_compound(selector);
        match key_of(subject) {
            Some(('#', id)) => self
                .id_map
                .get(id)
                .map(std::slice::from_ref)
                .unwrap_or(&[]),
            Some(('.', class)) => self.class_map.get(class).map(Vec::as_slice).unwrap_or(&[]),
            Some((_, tag)) => self.by_tag(tag),
            None => &self.elements,
        }
    }

    fn traverse(node: &NodeRef, indices: &mut DomIndices) {
        match &*node.borrow() {
            Node::DocumentRoot(root) => {
                for child in &root.children {
                    Self::traverse(child, indices);
                }
            }
            Node::Element(elem) => {
                indices.elements.push(Rc::clone(node));
                indices
                    .tag_map
                    .entry(elem.tag.to_ascii_lowercase())
                    .or_default()
                    .push(Rc::clone(node));

                if let Some(id_value) = elem.id() {
                    indices
                        .id_map
                        .entry(id_value.to_string())
                        .or_insert_with(|| Rc::clone(node));
                }
                if let Some(class_attr) = elem.attr("class") {
                    for class in class_attr.split_whitespace() {
                        indices
                            .class_map
                            .entry(class.to_string())
                            .or_default()
                            .push(Rc::clone(node));
                    }
                }
                for child in &elem.children {
                    Self::traverse(child, indices);
                }
            }
            Node::Text(_) | Node::Comment(_) => {}
        }
    }
}

/// The last compound of a complex selector.
fn subject_compound(selector: &str) -> &str {
    let selector = selector.trim();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in selector.char_indices() {
        match c {
            '(' | '[' => depth += 1,
            ')' | ']' => depth = depth.saturating_sub(1),
            ' ' | '>' | '+' | '~' if depth == 0 => start = i + 1,
            _ => {}
        }
    }
    &selector[start..]
}

/// The first `#id`, else the first `.class`, else the type selector of a
/// compound, outside brackets and parentheses.
fn key_of(compound: &str) -> Option<(char, &str)> {
    let is_ident = |c: char| c.is_ascii_alphanumeric() || c == '-' || c == '_' || !c.is_ascii();
    let mut depth = 0usize;
    let mut class = None;
    for (i, c) in compound.char_indices() {
        match c {
            '(' | '[' => depth += 1,
            ')' | ']' => depth = depth.saturating_sub(1),
            '#' | '.' if depth == 0 => {
                let rest = &compound[i + 1..];
                let end = rest.find(|c: char| !is_ident(c)).unwrap_or(rest.len());
                if end == 0 {
                    continue;
                }
                if c == '#' {
                    return Some(('#', &rest[..end]));
                }
                class.get_or_insert(('.', &rest[..end]));
            }
            _ => {}
        }
    }
    if class.is_some() {
        return class;
    }
    let end = compound.find(|c: char| !is_ident(c)).unwrap_or(compound.len());
    (end > 0).then(|| ('t', &compound[..end]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::html::create_dom_tree;

    #[test]
    fn test_indices() {
        let doc = create_dom_tree(
            "<html><body><div id=\"a\" class=\"x y\"></div><div id=\"a\" class=\"y\"></div></body></html>",
        );
        let indices = DomIndices::build(&doc);
        assert_eq!(indices.by_tag("DIV").len(), 2);
        assert_eq!(indices.class_map["y"].len(), 2);
        assert!(Rc::ptr_eq(indices.by_id("a").unwrap(), &indices.by_tag("div")[0]));
        assert_eq!(indices.elements.len(), 5);
    }

    #[test]
    fn test_candidates_use_subject_compound() {
        let doc = create_dom_tree(
            "<body><p class=\"x\">a</p><p id=\"q\">b</p><span class=\"x\"></span></body>",
        );
        let indices = DomIndices::build(&doc);
        assert_eq!(indices.candidates("body > .x").len(), 2);
        assert_eq!(indices.candidates("div p#q:not(.x)").len(), 1);
        assert_eq!(indices.candidates("span").len(), 1);
        assert_eq!(indices.candidates("[data-x] *").len(), indices.elements.len());
        assert!(indices.candidates(".missing").is_empty());
    }
}
