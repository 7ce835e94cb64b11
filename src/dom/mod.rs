//! The live document tree the engine reads and rewrites.
//!
//! A [`Document`] wraps a [`scraper::Html`] arena and adds what a host page
//! provides on top of a parsed tree: form values, inline style and geometry
//! lookups, attached shadow roots, embedded documents guarded by an origin
//! check, and batched [`MutationRecord`] notifications.
//!
//! Host code and the engine mutate the tree through the same methods, so the
//! engine's own edits are observed exactly like the page's.

mod mutation;
mod serialize;
mod style;

pub use ego_tree::NodeId;
pub use mutation::{MutationBatch, MutationRecord};
pub use style::Rect;

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use ego_tree::{NodeRef, Tree};
use html5ever::{Attribute, LocalName, Namespace, QualName};
use scraper::node::{Element, Text};
use scraper::{ElementRef, Html, Node, Selector};
use tokio::sync::mpsc;
use url::Url;

use crate::error::{MaskerError, Result};
use mutation::ObserverRegistry;
use style::InlineStyle;

/// A document shared between the host and the engine on one thread.
pub type SharedDocument = Rc<RefCell<Document>>;

const HTML_NAMESPACE: &str = "http://www.w3.org/1999/xhtml";

/// Serialization of an opaque origin. Opaque origins are never same-origin.
const OPAQUE_ORIGIN: &str = "null";

/// Elements whose contents never render as text.
const NON_RENDERED: &[&str] = &["head", "noscript", "script", "style", "template"];

/// Elements that can embed a document.
const EMBEDDING_ELEMENTS: &[&str] = &["iframe"];

/// What kind of root a [`Document`] represents.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DocumentKind {
    /// A top-level or embedded document with its own location.
    Document,
    /// A shadow tree attached to a host element.
    ShadowRoot,
}

struct Frame {
    origin: String,
    document: SharedDocument,
}

/// A mutable document tree with change notifications.
///
/// # Example
///
/// ```
/// use live_masker::Document;
///
/// let mut doc = Document::parse("<p>hello</p>", "https://example.com/").unwrap();
/// let p = doc.query("p").unwrap();
/// doc.set_inner_text(p, "bye").unwrap();
/// assert_eq!(doc.inner_text(p), "bye");
/// ```
pub struct Document {
    html: Html,
    kind: DocumentKind,
    location: String,
    origin: String,
    shadow_roots: HashMap<NodeId, SharedDocument>,
    frames: HashMap<NodeId, Frame>,
    observers: ObserverRegistry,
    unloaded: bool,
}

impl Document {
    /// Parse a full HTML document loaded from `location`.
    pub fn parse(markup: &str, location: &str) -> Result<Self> {
        let url = Url::parse(location)?;
        Ok(Self::new(
            Html::parse_document(markup),
            DocumentKind::Document,
            location.to_string(),
            url.origin().ascii_serialization(),
        ))
    }

    /// Parse a full HTML document and wrap it for sharing.
    pub fn parse_shared(markup: &str, location: &str) -> Result<SharedDocument> {
        Ok(Rc::new(RefCell::new(Self::parse(markup, location)?)))
    }

    fn new(html: Html, kind: DocumentKind, location: String, origin: String) -> Self {
        Self {
            html,
            kind,
            location,
            origin,
            shadow_roots: HashMap::new(),
            frames: HashMap::new(),
            observers: ObserverRegistry::default(),
            unloaded: false,
        }
    }

    pub fn kind(&self) -> DocumentKind {
        self.kind
    }

    /// The URL this document was loaded from. Shadow roots report their
    /// host document's location.
    pub fn location(&self) -> &str {
        &self.location
    }

    /// The ASCII serialization of this document's origin.
    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn is_unloaded(&self) -> bool {
        self.unloaded
    }

    /// Id of the tree root (the document or fragment node).
    pub fn root(&self) -> NodeId {
        self.html.tree.root().id()
    }

    /// The synthetic `<html>` wrapper a fragment parse puts around a shadow
    /// tree's content. It is not part of the shadow tree itself.
    fn fragment_wrapper(&self) -> Option<NodeId> {
        match self.kind {
            DocumentKind::ShadowRoot => Some(self.html.root_element().id()),
            DocumentKind::Document => None,
        }
    }

    /// The node whose descendants hold the visible content: `<body>` for a
    /// document, the tree itself for a shadow root.
    pub fn content_root(&self) -> NodeId {
        match self.kind {
            DocumentKind::Document => self.body().unwrap_or_else(|| self.root()),
            DocumentKind::ShadowRoot => self.html.root_element().id(),
        }
    }

    /// The `<body>` element, if the document has one.
    pub fn body(&self) -> Option<NodeId> {
        self.html
            .tree
            .root()
            .descendants()
            .find(|n| n.value().as_element().is_some_and(|el| el.name() == "body"))
            .map(|n| n.id())
    }

    // ---------------------------------------------------------------------
    // Queries
    // ---------------------------------------------------------------------

    /// First element matching `selector` in document order.
    ///
    /// Invalid selectors match nothing.
    pub fn query(&self, selector: &str) -> Option<NodeId> {
        self.query_all(selector).into_iter().next()
    }

    /// All elements matching `selector` in document order.
    pub fn query_all(&self, selector: &str) -> Vec<NodeId> {
        match Selector::parse(selector) {
            Ok(selector) => self.select_within(self.root(), &selector),
            Err(_) => Vec::new(),
        }
    }

    /// Elements matching `selector` at or beneath `root`, in document order.
    ///
    /// An element root is itself a candidate, so a freshly inserted element is
    /// matched the same way it would have been at load time.
    pub fn select_within(&self, root: NodeId, selector: &Selector) -> Vec<NodeId> {
        self.elements_within(root)
            .into_iter()
            .filter(|el| self.matches(*el, selector))
            .collect()
    }

    /// Elements at or beneath `root` in document order.
    pub fn elements_within(&self, root: NodeId) -> Vec<NodeId> {
        let wrapper = self.fragment_wrapper();
        self.html
            .tree
            .get(root)
            .into_iter()
            .flat_map(|node| node.descendants())
            .filter(|n| n.value().is_element() && Some(n.id()) != wrapper)
            .map(|n| n.id())
            .collect()
    }

    /// Returns `true` if element `id` matches `selector`.
    pub fn matches(&self, id: NodeId, selector: &Selector) -> bool {
        self.html
            .tree
            .get(id)
            .and_then(ElementRef::wrap)
            .is_some_and(|el| selector.matches(&el))
    }

    /// Text nodes beneath `root` in depth-first order.
    pub fn text_nodes(&self, root: NodeId) -> Vec<NodeId> {
        self.html
            .tree
            .get(root)
            .into_iter()
            .flat_map(|node| node.descendants())
            .filter(|n| n.value().is_text())
            .map(|n| n.id())
            .collect()
    }

    /// Every element of the tree in document order.
    pub fn elements(&self) -> Vec<NodeId> {
        let wrapper = self.fragment_wrapper();
        self.html
            .tree
            .root()
            .descendants()
            .filter(|n| n.value().is_element() && Some(n.id()) != wrapper)
            .map(|n| n.id())
            .collect()
    }

    /// Child node ids of `id`.
    pub fn children(&self, id: NodeId) -> Vec<NodeId> {
        self.html
            .tree
            .get(id)
            .map(|node| node.children().map(|c| c.id()).collect())
            .unwrap_or_default()
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.html.tree.get(id)?.parent().map(|p| p.id())
    }

    /// Returns `true` if `id` is still connected to the tree root.
    pub fn is_attached(&self, id: NodeId) -> bool {
        is_attached(&self.html, id)
    }

    pub fn is_text(&self, id: NodeId) -> bool {
        self.html.tree.get(id).is_some_and(|n| n.value().is_text())
    }

    pub fn is_element(&self, id: NodeId) -> bool {
        self.element(id).is_some()
    }

    fn element(&self, id: NodeId) -> Option<&Element> {
        self.html.tree.get(id)?.value().as_element()
    }

    /// Content of a text node.
    pub fn text(&self, id: NodeId) -> Option<&str> {
        match self.html.tree.get(id)?.value() {
            Node::Text(text) => Some(&**text),
            _ => None,
        }
    }

    /// Lowercase tag name of an element.
    pub fn tag(&self, id: NodeId) -> Option<&str> {
        self.element(id).map(|el| el.name())
    }

    pub fn attr(&self, id: NodeId, name: &str) -> Option<&str> {
        self.element(id)?.attr(name)
    }

    pub fn has_class(&self, id: NodeId, class: &str) -> bool {
        self.element(id).is_some_and(|el| el.classes().any(|c| c == class))
    }

    /// The current value of a form control.
    ///
    /// The `value` attribute holds the live value; a `<textarea>` that was
    /// never assigned one reports its text content.
    pub fn form_value(&self, id: NodeId) -> Option<String> {
        let el = self.element(id)?;
        match el.attr("value") {
            Some(value) => Some(value.to_string()),
            None if el.name() == "textarea" => Some(self.text_content(id)),
            None => Some(String::new()),
        }
    }

    /// Concatenated content of every text node beneath `id`.
    pub fn text_content(&self, id: NodeId) -> String {
        self.text_nodes(id)
            .into_iter()
            .filter_map(|t| self.text(t))
            .collect()
    }

    /// Text that renders beneath `id`: like [`text_content`](Self::text_content)
    /// but skipping non-rendered elements, `hidden` elements and elements
    /// styled `display: none`.
    pub fn inner_text(&self, id: NodeId) -> String {
        let mut out = String::new();
        if let Some(node) = self.html.tree.get(id) {
            for child in node.children() {
                collect_rendered(child, &mut out);
            }
        }
        out
    }

    /// A declaration from the element's inline style.
    pub fn style_property(&self, id: NodeId, property: &str) -> Option<String> {
        let style = self.inline_style(id)?;
        style.get(property).map(str::to_string)
    }

    fn inline_style(&self, id: NodeId) -> Option<InlineStyle> {
        let el = self.element(id)?;
        Some(el.attr("style").map(InlineStyle::parse).unwrap_or_default())
    }

    /// Resolved value of `property`: the inline declaration if present,
    /// otherwise the user-agent default.
    ///
    /// A `background` shorthand that paints an image resolves
    /// `background-image` as well.
    pub fn computed_style(&self, id: NodeId, property: &str) -> Option<String> {
        let style = self.inline_style(id)?;
        if let Some(value) = style.get(property) {
            return Some(value.to_string());
        }
        if property == "background-image" {
            if let Some(bg) = style.get("background").filter(|bg| bg.contains("url(")) {
                return Some(bg.to_string());
            }
        }
        style::default_value(property).map(str::to_string)
    }

    /// Border box of an element from its inline `width`/`height` or the
    /// matching attributes. Elements styled `display: none` have no box.
    pub fn bounding_rect(&self, id: NodeId) -> Option<Rect> {
        let el = self.element(id)?;
        let style = self.inline_style(id)?;
        if style.get("display") == Some("none") {
            return Some(Rect::default());
        }
        let dimension = |name: &str| {
            style
                .get(name)
                .and_then(style::parse_px)
                .or_else(|| el.attr(name).and_then(style::parse_px))
                .unwrap_or(0.0)
        };
        Some(Rect {
            x: 0.0,
            y: 0.0,
            width: dimension("width"),
            height: dimension("height"),
        })
    }

    /// Markup of the visible content: the whole document, or the children of
    /// a shadow root.
    pub fn html(&self) -> String {
        match self.kind {
            DocumentKind::Document => serialize::serialize_children(self.html.tree.root()),
            DocumentKind::ShadowRoot => serialize::serialize_children(*self.html.root_element()),
        }
    }

    // ---------------------------------------------------------------------
    // Nested contexts
    // ---------------------------------------------------------------------

    /// Attach a shadow tree parsed from `markup` to element `host`,
    /// replacing any previous one.
    pub fn attach_shadow(&mut self, host: NodeId, markup: &str) -> Result<SharedDocument> {
        self.ensure_element(host)?;
        let shadow = Rc::new(RefCell::new(Self::new(
            Html::parse_fragment(markup),
            DocumentKind::ShadowRoot,
            self.location.clone(),
            self.origin.clone(),
        )));
        self.shadow_roots.insert(host, Rc::clone(&shadow));
        Ok(shadow)
    }

    /// The shadow tree attached to `host`, if any.
    pub fn shadow_root(&self, host: NodeId) -> Option<SharedDocument> {
        self.shadow_roots.get(&host).map(Rc::clone)
    }

    /// Load a document from `location` into embedding element `frame`.
    ///
    /// `about:` locations inherit this document's origin.
    pub fn attach_frame(
        &mut self,
        frame: NodeId,
        location: &str,
        markup: &str,
    ) -> Result<SharedDocument> {
        let tag = self.tag(frame).ok_or(MaskerError::NotAnElement(frame))?;
        if !EMBEDDING_ELEMENTS.contains(&tag) {
            return Err(MaskerError::NotAnEmbeddingElement(tag.to_string()));
        }

        let mut document = Self::parse(markup, location)?;
        if location.starts_with("about:") {
            document.origin = self.origin.clone();
        }
        let origin = document.origin.clone();
        let document = Rc::new(RefCell::new(document));
        self.frames.insert(
            frame,
            Frame {
                origin,
                document: Rc::clone(&document),
            },
        );
        Ok(document)
    }

    /// Returns `true` if `frame` is an embedding element with a loaded
    /// document, reachable or not.
    pub fn has_embedded_document(&self, frame: NodeId) -> bool {
        self.frames.contains_key(&frame)
    }

    /// The document embedded in `frame`.
    ///
    /// Fails with [`MaskerError::CrossOrigin`] when the embedded document's
    /// origin differs from this one.
    pub fn content_document(&self, frame: NodeId) -> Result<SharedDocument> {
        let embedded = self
            .frames
            .get(&frame)
            .ok_or(MaskerError::NoEmbeddedDocument)?;
        if embedded.origin != self.origin || embedded.origin == OPAQUE_ORIGIN {
            return Err(MaskerError::CrossOrigin {
                origin: self.origin.clone(),
                frame: embedded.origin.clone(),
            });
        }
        Ok(Rc::clone(&embedded.document))
    }

    /// Mark the document as navigated away. Existing observers are dropped
    /// and new ones are refused.
    pub fn unload(&mut self) {
        self.unloaded = true;
        self.observers.clear();
    }

    // ---------------------------------------------------------------------
    // Notifications
    // ---------------------------------------------------------------------

    /// Subscribe to child-list changes anywhere in the tree and to writes of
    /// the attributes in `attribute_filter` (all attributes if empty).
    pub fn observe(
        &mut self,
        attribute_filter: &[&str],
    ) -> Result<mpsc::UnboundedReceiver<MutationBatch>> {
        if self.unloaded {
            return Err(MaskerError::Unloaded);
        }
        Ok(self.observers.subscribe(attribute_filter))
    }

    /// Number of live observers.
    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    /// Deliver queued change records to observers, one batch each.
    ///
    /// This is the point where the current synchronous work is considered
    /// complete. Returns the number of batches delivered.
    pub fn flush_mutations(&mut self) -> usize {
        self.observers.flush()
    }

    // ---------------------------------------------------------------------
    // Mutations
    // ---------------------------------------------------------------------

    /// Replace the content of text node `id`.
    pub fn set_text(&mut self, id: NodeId, content: &str) -> Result<()> {
        let mut node = self.html.tree.get_mut(id).ok_or(MaskerError::NodeNotFound(id))?;
        if !node.value().is_text() {
            return Err(MaskerError::NotText(id));
        }
        *node.value() = Node::Text(Text {
            text: content.into(),
        });
        self.observers
            .record(MutationRecord::CharacterData { target: id });
        Ok(())
    }

    /// Append a text node to `parent`.
    pub fn append_text(&mut self, parent: NodeId, content: &str) -> Result<NodeId> {
        self.ensure_container(parent)?;
        let id = self
            .html
            .tree
            .get_mut(parent)
            .ok_or(MaskerError::NodeNotFound(parent))?
            .append(Node::Text(Text {
                text: content.into(),
            }))
            .id();
        self.observers.record(MutationRecord::ChildList {
            target: parent,
            added: vec![id],
            removed: Vec::new(),
        });
        Ok(id)
    }

    /// Parse `markup` as a fragment and append its top-level nodes to
    /// `parent`. Returns the ids of the appended nodes.
    pub fn append_html(&mut self, parent: NodeId, markup: &str) -> Result<Vec<NodeId>> {
        self.ensure_container(parent)?;
        let fragment = Html::parse_fragment(markup);
        let added: Vec<NodeId> = fragment
            .root_element()
            .children()
            .filter_map(|child| graft(&mut self.html.tree, parent, child))
            .collect();
        if !added.is_empty() {
            self.observers.record(MutationRecord::ChildList {
                target: parent,
                added: added.clone(),
                removed: Vec::new(),
            });
        }
        Ok(added)
    }

    /// Replace every child of element `id` with a single text node holding
    /// `content` (no node at all when `content` is empty).
    ///
    /// The old children are detached, not freed: the tree arena never
    /// releases slots, so a document that keeps replacing content keeps
    /// growing until it is dropped.
    pub fn set_inner_text(&mut self, id: NodeId, content: &str) -> Result<()> {
        self.ensure_element(id)?;
        let removed = self.children(id);
        for child in &removed {
            if let Some(mut node) = self.html.tree.get_mut(*child) {
                node.detach();
            }
        }

        let mut added = Vec::new();
        if !content.is_empty() {
            if let Some(mut node) = self.html.tree.get_mut(id) {
                added.push(
                    node.append(Node::Text(Text {
                        text: content.into(),
                    }))
                    .id(),
                );
            }
        }

        self.drop_detached_contexts();
        self.observers.record(MutationRecord::ChildList {
            target: id,
            added,
            removed,
        });
        Ok(())
    }

    /// Detach node `id` (and its subtree) from the tree. Nested contexts
    /// hosted in the subtree are dropped with it.
    ///
    /// Like [`set_inner_text`](Self::set_inner_text), the detached nodes
    /// keep their arena slots. Their ids stay valid for lookups but are no
    /// longer [attached](Self::is_attached).
    pub fn remove(&mut self, id: NodeId) -> Result<()> {
        let parent = self.parent(id).ok_or(MaskerError::NodeNotFound(id))?;
        if let Some(mut node) = self.html.tree.get_mut(id) {
            node.detach();
        }
        self.drop_detached_contexts();
        self.observers.record(MutationRecord::ChildList {
            target: parent,
            added: Vec::new(),
            removed: vec![id],
        });
        Ok(())
    }

    /// Write attribute `name` on element `id`.
    pub fn set_attribute(&mut self, id: NodeId, name: &str, value: &str) -> Result<()> {
        self.rewrite_attributes(id, |attrs| {
            match attrs.iter_mut().find(|(k, _)| k == name) {
                Some(slot) => slot.1 = value.to_string(),
                None => attrs.push((name.to_string(), value.to_string())),
            }
            true
        })?;
        self.observers.record(MutationRecord::Attributes {
            target: id,
            name: name.to_string(),
        });
        Ok(())
    }

    /// Remove attribute `name` from element `id`. Returns `false` (and
    /// records nothing) if the attribute was absent.
    pub fn remove_attribute(&mut self, id: NodeId, name: &str) -> Result<bool> {
        let removed = self.rewrite_attributes(id, |attrs| {
            let before = attrs.len();
            attrs.retain(|(k, _)| k != name);
            attrs.len() != before
        })?;
        if removed {
            self.observers.record(MutationRecord::Attributes {
                target: id,
                name: name.to_string(),
            });
        }
        Ok(removed)
    }

    /// Set one inline style declaration. Returns `false` (and records
    /// nothing) if the declaration already had that value.
    pub fn set_style_property(&mut self, id: NodeId, property: &str, value: &str) -> Result<bool> {
        self.edit_style(id, |style| style.set(property, value))
    }

    /// Remove one inline style declaration. Returns `false` if it was absent.
    pub fn remove_style_property(&mut self, id: NodeId, property: &str) -> Result<bool> {
        self.edit_style(id, |style| style.remove(property))
    }

    fn edit_style(&mut self, id: NodeId, edit: impl FnOnce(&mut InlineStyle)) -> Result<bool> {
        let changed = self.rewrite_attributes(id, |attrs| {
            let current = attrs.iter().position(|(k, _)| k == "style");
            let mut style = current
                .map(|i| InlineStyle::parse(&attrs[i].1))
                .unwrap_or_default();
            let before = style.clone();
            edit(&mut style);
            if style == before {
                return false;
            }
            match (current, style.is_empty()) {
                (Some(i), true) => {
                    attrs.remove(i);
                }
                (Some(i), false) => attrs[i].1 = style.to_string(),
                (None, true) => return false,
                (None, false) => attrs.push(("style".to_string(), style.to_string())),
            }
            true
        })?;
        if changed {
            self.observers.record(MutationRecord::Attributes {
                target: id,
                name: "style".to_string(),
            });
        }
        Ok(changed)
    }

    /// Rebuild element `id` with its attributes passed through `edit`.
    /// `edit` returns whether anything changed; nothing is written otherwise.
    fn rewrite_attributes<F>(&mut self, id: NodeId, edit: F) -> Result<bool>
    where
        F: FnOnce(&mut Vec<(String, String)>) -> bool,
    {
        let mut node = self.html.tree.get_mut(id).ok_or(MaskerError::NodeNotFound(id))?;
        let Node::Element(element) = node.value() else {
            return Err(MaskerError::NotAnElement(id));
        };
        let tag = element.name().to_string();
        let mut attrs: Vec<(String, String)> = element
            .attrs()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        if !edit(&mut attrs) {
            return Ok(false);
        }
        *node.value() = Node::Element(build_element(&tag, attrs));
        Ok(true)
    }

    fn ensure_element(&self, id: NodeId) -> Result<()> {
        let node = self.html.tree.get(id).ok_or(MaskerError::NodeNotFound(id))?;
        if node.value().is_element() {
            Ok(())
        } else {
            Err(MaskerError::NotAnElement(id))
        }
    }

    fn ensure_container(&self, id: NodeId) -> Result<()> {
        let node = self.html.tree.get(id).ok_or(MaskerError::NodeNotFound(id))?;
        match node.value() {
            Node::Element(_) | Node::Document | Node::Fragment => Ok(()),
            _ => Err(MaskerError::NotAnElement(id)),
        }
    }

    fn drop_detached_contexts(&mut self) {
        let html = &self.html;
        self.shadow_roots.retain(|host, _| is_attached(html, *host));
        self.frames.retain(|frame, _| is_attached(html, *frame));
    }
}

fn is_attached(html: &Html, id: NodeId) -> bool {
    let root = html.tree.root().id();
    html.tree
        .get(id)
        .is_some_and(|node| node.id() == root || node.ancestors().any(|a| a.id() == root))
}

fn collect_rendered(node: NodeRef<Node>, out: &mut String) {
    match node.value() {
        Node::Text(text) => out.push_str(text),
        Node::Element(el) if is_hidden(el) => {}
        _ => {
            for child in node.children() {
                collect_rendered(child, out);
            }
        }
    }
}

fn is_hidden(el: &Element) -> bool {
    NON_RENDERED.contains(&el.name())
        || el.attr("hidden").is_some()
        || el
            .attr("style")
            .is_some_and(|s| InlineStyle::parse(s).get("display") == Some("none"))
}

/// Copy `source` and its subtree under `parent`.
fn graft(tree: &mut Tree<Node>, parent: NodeId, source: NodeRef<Node>) -> Option<NodeId> {
    let id = tree.get_mut(parent)?.append(source.value().clone()).id();
    for child in source.children() {
        graft(tree, id, child);
    }
    Some(id)
}

fn build_element(tag: &str, attrs: Vec<(String, String)>) -> Element {
    let name = QualName::new(None, Namespace::from(HTML_NAMESPACE), LocalName::from(tag));
    let attrs = attrs
        .into_iter()
        .map(|(k, v)| Attribute {
            name: QualName::new(None, Namespace::from(""), LocalName::from(k)),
            value: v.into(),
        })
        .collect();
    Element::new(name, attrs)
}
