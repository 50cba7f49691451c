//! Writing the DOM tree back out as HTML text.

use crate::dom::dom_tree::{Document, Node, NodeRef};

/// Void (self-closing) elements in HTML.
const VOID_ELEMENTS: &[&str] = &[
    "meta", "img", "br", "hr", "input", "link", "area", "base", "col", "embed", "param", "source",
    "track", "wbr",
];

/// Elements whose text children are written without escaping.
const RAW_TEXT_ELEMENTS: &[&str] = &[
    "style", "script", "xmp", "iframe", "noembed", "noframes", "plaintext",
];

/// Serializes the whole Document, DOCTYPE included.
pub fn serialize_document(document: &Document) -> String {
    let mut out = String::new();
    if let Some(doctype) = &*document.doctype.borrow() {
        out.push_str("<!DOCTYPE ");
        out.push_str(&doctype.name);
        out.push('>');
    }
    write_node(&document.root, false, &mut out);
    out
}

/// Serializes a single node and its subtree.
pub fn serialize_node(node: &NodeRef) -> String {
    let mut out = String::new();
    write_node(node, false, &mut out);
    out
}

fn write_node(node: &NodeRef, raw_text: bool, out: &mut String) {
    match &*node.borrow() {
        Node::DocumentRoot(root) => {
            for child in &root.children {
                write_node(child, false, out);
            }
        }
        Node::Element(elem) => {
            let tag = elem.tag.as_str();
            out.push('<');
            out.push_str(tag);
            for (k, v) in &elem.attributes {
                out.push(' ');
                out.push_str(k);
                out.push_str("=\"");
                escape_into(v, true, out);
                out.push('"');
            }
            out.push('>');
            if VOID_ELEMENTS.contains(&tag) {
                return;
            }
            let raw = RAW_TEXT_ELEMENTS.contains(&tag);
            for child in &elem.children {
                write_node(child, raw, out);
            }
            out.push_str("</");
            out.push_str(tag);
            out.push('>');
        }
        Node::Text(text) => {
            if raw_text {
                out.push_str(text);
            } else {
                escape_into(text, false, out);
            }
        }
        Node::Comment(text) => {
            out.push_str("<!--");
            out.push_str(text);
            out.push_str("-->");
        }
    }
}

fn escape_into(text: &str, attr_mode: bool, out: &mut String) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '\u{a0}' => out.push_str("&nbsp;"),
            '"' if attr_mode => out.push_str("&quot;"),
            '<' if !attr_mode => out.push_str("&lt;"),
            '>' if !attr_mode => out.push_str("&gt;"),
            c => out.push(c),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::html::create_dom_tree;

    #[test]
    fn test_serialize_keeps_raw_text_and_escapes() {
        let doc = create_dom_tree(
            "<!DOCTYPE html><html><head><style>a > b { color: red }</style>\
             <link rel=\"stylesheet\" href=\"a.css\"></head>\
             <body title='say \"hi\"'>1 &lt; 2<!-- note --></body></html>",
        );
        assert_eq!(
            serialize_document(&doc),
            "<!DOCTYPE html><html><head><style>a > b { color: red }</style>\
             <link rel=\"stylesheet\" href=\"a.css\"></head>\
             <body title=\"say &quot;hi&quot;\">1 &lt; 2<!-- note --></body></html>"
        );
    }
}
