//! Markup serializer for a live document tree.

use ego_tree::NodeRef;
use scraper::Node;

/// HTML5 void elements that must not have a closing tag.
const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

/// Elements whose text children are emitted without escaping.
const RAW_TEXT_ELEMENTS: &[&str] = &["script", "style"];

/// Serialize the children of `node`.
pub(crate) fn serialize_children(node: NodeRef<Node>) -> String {
    let mut out = String::new();
    let raw = is_raw_text(node);
    for child in node.children() {
        serialize_node(child, raw, &mut out);
    }
    out
}

fn is_raw_text(node: NodeRef<Node>) -> bool {
    node.value()
        .as_element()
        .is_some_and(|el| RAW_TEXT_ELEMENTS.contains(&el.name()))
}

fn serialize_node(node: NodeRef<Node>, raw: bool, out: &mut String) {
    match node.value() {
        Node::Document | Node::Fragment => {
            for child in node.children() {
                serialize_node(child, false, out);
            }
        }
        Node::Element(el) => {
            let tag = el.name();
            out.push('<');
            out.push_str(tag);

            for (k, v) in el.attrs() {
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

            let raw = is_raw_text(node);
            for child in node.children() {
                serialize_node(child, raw, out);
            }

            out.push_str("</");
            out.push_str(tag);
            out.push('>');
        }
        Node::Text(text) => {
            if raw {
                out.push_str(text);
            } else {
                escape_into(text, false, out);
            }
        }
        Node::Comment(comment) => {
            out.push_str("<!--");
            out.push_str(comment);
            out.push_str("-->");
        }
        _ => {}
    }
}

fn escape_into(s: &str, attribute: bool, out: &mut String) {
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '"' if attribute => out.push_str("&quot;"),
            '<' if !attribute => out.push_str("&lt;"),
            '>' if !attribute => out.push_str("&gt;"),
            '\u{a0}' => out.push_str("&nbsp;"),
            c => out.push(c),
        }
    }
}
