//! In-memory page document.
//!
//! Pages are parsed with `scraper` and copied into an `ego_tree` arena of
//! [`PageNode`]s. Node handles are [`NodeId`]s: plain arena indices that never
//! keep a node alive and stay valid (but detached) after the node is removed
//! from the page.

use ego_tree::{NodeMut, NodeRef, Tree};
use scraper::node::Node;
use scraper::Html;
use std::fmt::Write as _;
use std::sync::{Arc, Mutex, MutexGuard};

pub use ego_tree::NodeId;

/// Class carried by every annotation element this crate inserts.
pub const ANNOTATION_CLASS: &str = "wordie-translation";

/// Elements the HTML serializer writes without a closing tag.
const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track",
    "wbr",
];

/// Elements whose text children are written without escaping.
const RAW_TEXT_ELEMENTS: &[&str] = &["script", "style"];

/// Elements hidden by the user-agent stylesheet regardless of inline style.
const UA_HIDDEN_ELEMENTS: &[&str] = &["template", "head"];

/// Document shared between the page host, the discovery engine and the scheduler.
pub type SharedDocument = Arc<Mutex<Document>>;

/// Lock a shared document, recovering the guard if a previous holder panicked.
pub fn lock_document(document: &SharedDocument) -> MutexGuard<'_, Document> {
    document.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Clone, PartialEq)]
pub enum PageNode {
    Document,
    Doctype(String),
    Comment(String),
    Element(ElementData),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementData {
    name: String,
    attrs: Vec<(String, String)>,
}

impl ElementData {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_ascii_lowercase(),
            attrs: Vec::new(),
        }
    }

    pub fn with_attr(mut self, name: &str, value: &str) -> Self {
        self.attrs.push((name.to_ascii_lowercase(), value.to_string()));
        self
    }

    /// Lowercase tag name
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn attrs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attrs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.attr("class")
            .map(|classes| classes.split_ascii_whitespace().any(|c| c == class))
            .unwrap_or(false)
    }

    /// `contenteditable` set to an editable state (`""`, `true`, `plaintext-only`)
    pub fn is_content_editable(&self) -> bool {
        match self.attr("contenteditable") {
            Some(value) => {
                let value = value.trim();
                value.is_empty()
                    || value.eq_ignore_ascii_case("true")
                    || value.eq_ignore_ascii_case("plaintext-only")
            }
            None => false,
        }
    }

    pub fn style(&self) -> InlineStyle {
        self.attr("style").map(InlineStyle::parse).unwrap_or_default()
    }

    /// Whether the element's computed style hides it and its subtree.
    ///
    /// Without a layout engine the computed style is approximated by the
    /// `hidden` attribute, the user-agent defaults for a few elements and the
    /// inline `style` declarations.
    pub fn is_hidden(&self) -> bool {
        self.attr("hidden").is_some()
            || UA_HIDDEN_ELEMENTS.contains(&self.name.as_str())
            || self.style().hides()
    }
}

/// The visibility-relevant subset of an inline `style` attribute.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InlineStyle {
    pub display: Option<String>,
    pub visibility: Option<String>,
    pub opacity: Option<f32>,
}

impl InlineStyle {
    pub fn parse(style: &str) -> Self {
        let mut parsed = Self::default();
        for declaration in style.split(';') {
            let Some((property, value)) = declaration.split_once(':') else {
                continue;
            };
            let value = value
                .trim()
                .trim_end_matches("!important")
                .trim()
                .to_ascii_lowercase();
            match property.trim().to_ascii_lowercase().as_str() {
                "display" => parsed.display = Some(value),
                "visibility" => parsed.visibility = Some(value),
                "opacity" => parsed.opacity = parse_opacity(&value),
                _ => {}
            }
        }
        parsed
    }

    pub fn hides(&self) -> bool {
        self.display.as_deref() == Some("none")
            || self.visibility.as_deref() == Some("hidden")
            || self.opacity == Some(0.0)
    }
}

/// `0.5` or `50%`, as a fraction.
fn parse_opacity(value: &str) -> Option<f32> {
    match value.strip_suffix('%') {
        Some(percent) => percent.trim().parse::<f32>().ok().map(|p| p / 100.0),
        None => value.parse().ok(),
    }
}

#[derive(Debug, Clone)]
pub struct Document {
    tree: Tree<PageNode>,
    body: NodeId,
}

impl Document {
    /// Parse a complete HTML document.
    pub fn parse(html: &str) -> Self {
        let source = Html::parse_document(html);
        let mut tree = Tree::new(PageNode::Document);
        for child in source.tree.root().children() {
            copy_subtree(child, &mut tree.root_mut());
        }

        let body = tree
            .root()
            .descendants()
            .find(|n| matches!(n.value(), PageNode::Element(e) if e.name() == "body"))
            .map(|n| n.id())
            .unwrap_or_else(|| tree.root().id());

        Self { tree, body }
    }

    pub fn into_shared(self) -> SharedDocument {
        Arc::new(Mutex::new(self))
    }

    pub fn root(&self) -> NodeId {
        self.tree.root().id()
    }

    /// The `<body>` element, or the root for documents without one.
    pub fn body(&self) -> NodeId {
        self.body
    }

    pub fn node(&self, id: NodeId) -> Option<NodeRef<'_, PageNode>> {
        self.tree.get(id)
    }

    pub fn element(&self, id: NodeId) -> Option<&ElementData> {
        match self.tree.get(id)?.value() {
            PageNode::Element(element) => Some(element),
            _ => None,
        }
    }

    pub fn text(&self, id: NodeId) -> Option<&str> {
        match self.tree.get(id)?.value() {
            PageNode::Text(text) => Some(text.as_str()),
            _ => None,
        }
    }

    pub fn children(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.tree
            .get(id)
            .into_iter()
            .flat_map(|node| node.children())
            .map(|child| child.id())
    }

    pub fn parent_element(&self, id: NodeId) -> Option<&ElementData> {
        match self.tree.get(id)?.parent()?.value() {
            PageNode::Element(element) => Some(element),
            _ => None,
        }
    }

    /// Whether the node is still reachable from the document root.
    pub fn is_attached(&self, id: NodeId) -> bool {
        let Some(node) = self.tree.get(id) else {
            return false;
        };
        let root = self.tree.root().id();
        node.id() == root || node.ancestors().any(|ancestor| ancestor.id() == root)
    }

    /// Insert an annotation `<span>` right after `text_node`.
    ///
    /// The original node is left untouched. Returns `None` for nodes that are
    /// not attached text nodes.
    pub fn insert_annotation_after(&mut self, text_node: NodeId, translation: &str) -> Option<NodeId> {
        if self.text(text_node).is_none() || !self.is_attached(text_node) {
            return None;
        }
        let mut node = self.tree.get_mut(text_node)?;
        let mut span = node.insert_after(PageNode::Element(
            ElementData::new("span").with_attr("class", ANNOTATION_CLASS),
        ));
        span.append(PageNode::Text(format!(" {}", translation)));
        Some(span.id())
    }

    /// Detach every annotation element from the page. Returns how many were removed.
    pub fn remove_annotations(&mut self) -> usize {
        let ids = self.annotation_ids();
        for id in &ids {
            if let Some(mut node) = self.tree.get_mut(*id) {
                node.detach();
            }
        }
        ids.len()
    }

    pub fn count_annotations(&self) -> usize {
        self.annotation_ids().len()
    }

    /// Annotation texts in document order, without the leading separator.
    pub fn annotations(&self) -> Vec<String> {
        self.annotation_ids()
            .into_iter()
            .filter_map(|id| self.tree.get(id))
            .map(|node| text_content(node).trim().to_string())
            .collect()
    }

    fn annotation_ids(&self) -> Vec<NodeId> {
        self.tree
            .root()
            .descendants()
            .filter(|n| matches!(n.value(), PageNode::Element(e) if e.has_class(ANNOTATION_CLASS)))
            .map(|n| n.id())
            .collect()
    }

    /// Detach a node (and its subtree) from the page.
    pub fn remove(&mut self, id: NodeId) -> bool {
        if id == self.root() || !self.is_attached(id) {
            return false;
        }
        match self.tree.get_mut(id) {
            Some(mut node) => {
                node.detach();
                true
            }
            None => false,
        }
    }

    /// First attached text node whose trimmed content equals `needle`.
    pub fn find_text(&self, needle: &str) -> Option<NodeId> {
        self.tree
            .root()
            .descendants()
            .find(|n| matches!(n.value(), PageNode::Text(t) if t.trim() == needle))
            .map(|n| n.id())
    }

    /// First attached element with the given tag name.
    pub fn find_element(&self, name: &str) -> Option<NodeId> {
        self.tree
            .root()
            .descendants()
            .find(|n| matches!(n.value(), PageNode::Element(e) if e.name() == name))
            .map(|n| n.id())
    }

    /// Parse `html` as a fragment and append its nodes to `parent`.
    ///
    /// Returns the ids of the appended top-level nodes.
    pub fn append_fragment(&mut self, parent: NodeId, html: &str) -> Vec<NodeId> {
        let fragment = Html::parse_fragment(html);
        // Fragments parse as a synthetic <html> element wrapping the content.
        let sources: Vec<_> = fragment
            .tree
            .root()
            .children()
            .flat_map(|child| match child.value() {
                Node::Element(e) if e.name() == "html" => child.children().collect::<Vec<_>>(),
                _ => vec![child],
            })
            .collect();

        let Some(mut target) = self.tree.get_mut(parent) else {
            return Vec::new();
        };
        let mut appended = Vec::new();
        for source in sources {
            if let Some(id) = copy_subtree(source, &mut target) {
                appended.push(id);
            }
        }
        appended
    }

    /// Serialize the attached document back to HTML.
    pub fn to_html(&self) -> String {
        let mut out = String::new();
        for child in self.tree.root().children() {
            write_node(child, &mut out);
        }
        out
    }
}

/// Concatenated text of all descendant text nodes.
fn text_content(node: NodeRef<'_, PageNode>) -> String {
    node.descendants()
        .filter_map(|n| match n.value() {
            PageNode::Text(text) => Some(text.as_str()),
            _ => None,
        })
        .collect()
}

fn copy_subtree(source: NodeRef<'_, Node>, parent: &mut NodeMut<'_, PageNode>) -> Option<NodeId> {
    let value = match source.value() {
        Node::Element(element) => {
            let mut data = ElementData::new(element.name());
            for (name, value) in element.attrs() {
                data = data.with_attr(name, value);
            }
            PageNode::Element(data)
        }
        Node::Text(text) => PageNode::Text((**text).to_owned()),
        Node::Comment(comment) => PageNode::Comment((**comment).to_owned()),
        Node::Doctype(doctype) => PageNode::Doctype(doctype.name().to_string()),
        _ => return None,
    };

    let mut copied = parent.append(value);
    for child in source.children() {
        copy_subtree(child, &mut copied);
    }
    Some(copied.id())
}

fn write_node(node: NodeRef<'_, PageNode>, out: &mut String) {
    match node.value() {
        PageNode::Document => {
            for child in node.children() {
                write_node(child, out);
            }
        }
        PageNode::Doctype(name) => {
            let _ = write!(out, "<!DOCTYPE {}>", name);
        }
        PageNode::Comment(comment) => {
            let _ = write!(out, "<!--{}-->", comment);
        }
        PageNode::Text(text) => {
            let raw = matches!(
                node.parent().map(|p| p.value()),
                Some(PageNode::Element(e)) if RAW_TEXT_ELEMENTS.contains(&e.name())
            );
            if raw {
                out.push_str(text);
            } else {
                out.push_str(&escape_text(text));
            }
        }
        PageNode::Element(element) => {
            out.push('<');
            out.push_str(element.name());
            for (name, value) in element.attrs() {
                let _ = write!(out, " {}=\"{}\"", name, escape_attr(value));
            }
            out.push('>');
            if VOID_ELEMENTS.contains(&element.name()) {
                return;
            }
            for child in node.children() {
                write_node(child, out);
            }
            let _ = write!(out, "</{}>", element.name());
        }
    }
}

fn escape_text(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn escape_attr(value: &str) -> String {
    value.replace('&', "&amp;").replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==================== Parsing Tests ====================

    #[test]
    fn test_parse_finds_body() {
        let doc = Document::parse("<html><body><p>Hello there</p></body></html>");
        let body = doc.element(doc.body()).expect("body element");
        assert_eq!(body.name(), "body");
    }

    #[test]
    fn test_parse_keeps_text_nodes() {
        let doc = Document::parse("<p>Hello there</p>");
        let id = doc.find_text("Hello there").expect("text node");
        assert_eq!(doc.parent_element(id).map(|e| e.name()), Some("p"));
    }

    #[test]
    fn test_element_attributes_are_lowercased_names() {
        let doc = Document::parse(r#"<div CLASS="a b" data-x="1">x</div>"#);
        let div = doc.find_element("div").unwrap();
        let element = doc.element(div).unwrap();
        assert!(element.has_class("a"));
        assert!(element.has_class("b"));
        assert!(!element.has_class("ab"));
        assert_eq!(element.attr("data-x"), Some("1"));
    }

    // ==================== Style Tests ====================

    #[test]
    fn test_inline_style_display_none() {
        assert!(InlineStyle::parse("color: red; display: none").hides());
        assert!(InlineStyle::parse("DISPLAY:NONE !important").hides());
    }

    #[test]
    fn test_inline_style_visibility_and_opacity() {
        assert!(InlineStyle::parse("visibility: hidden").hides());
        assert!(InlineStyle::parse("opacity: 0").hides());
        assert!(InlineStyle::parse("opacity: 0.0").hides());
        assert!(!InlineStyle::parse("opacity: 0.5").hides());
        assert!(InlineStyle::parse("opacity: 0%").hides());
        assert!(InlineStyle::parse("opacity:0.0 %").hides());
        assert!(!InlineStyle::parse("opacity: 50%").hides());
        assert!(!InlineStyle::parse("display: block; visibility: visible").hides());
    }

    #[test]
    fn test_hidden_attribute_hides_element() {
        let element = ElementData::new("div").with_attr("hidden", "");
        assert!(element.is_hidden());
        assert!(!ElementData::new("div").is_hidden());
        assert!(ElementData::new("template").is_hidden());
    }

    #[test]
    fn test_content_editable_states() {
        assert!(ElementData::new("div").with_attr("contenteditable", "true").is_content_editable());
        assert!(ElementData::new("div").with_attr("contenteditable", "").is_content_editable());
        assert!(!ElementData::new("div").with_attr("contenteditable", "false").is_content_editable());
        assert!(!ElementData::new("div").is_content_editable());
    }

    // ==================== Annotation Tests ====================

    #[test]
    fn test_insert_annotation_after_text_node() {
        let mut doc = Document::parse("<p>Hello world again<b>bold</b></p>");
        let text = doc.find_text("Hello world again").unwrap();
        let span = doc.insert_annotation_after(text, "你好").expect("inserted");

        let p = doc.find_element("p").unwrap();
        let children: Vec<_> = doc.children(p).collect();
        assert_eq!(children[0], text);
        assert_eq!(children[1], span);
        assert_eq!(doc.text(text), Some("Hello world again"));
        assert_eq!(doc.annotations(), vec!["你好".to_string()]);
    }

    #[test]
    fn test_insert_annotation_rejects_detached_node() {
        let mut doc = Document::parse("<div><p>Removed paragraph</p></div>");
        let text = doc.find_text("Removed paragraph").unwrap();
        let p = doc.find_element("p").unwrap();
        assert!(doc.remove(p));
        assert!(!doc.is_attached(text));
        assert!(doc.insert_annotation_after(text, "x").is_none());
        assert_eq!(doc.count_annotations(), 0);
    }

    #[test]
    fn test_insert_annotation_rejects_element_node() {
        let mut doc = Document::parse("<p>Some text here</p>");
        let p = doc.find_element("p").unwrap();
        assert!(doc.insert_annotation_after(p, "x").is_none());
    }

    #[test]
    fn test_remove_annotations() {
        let mut doc = Document::parse("<p>First sentence</p><p>Second sentence</p>");
        let first = doc.find_text("First sentence").unwrap();
        let second = doc.find_text("Second sentence").unwrap();
        doc.insert_annotation_after(first, "一");
        doc.insert_annotation_after(second, "二");
        assert_eq!(doc.count_annotations(), 2);

        assert_eq!(doc.remove_annotations(), 2);
        assert_eq!(doc.count_annotations(), 0);
        assert!(doc.is_attached(first));
        assert!(doc.is_attached(second));
    }

    // ==================== Fragment Tests ====================

    #[test]
    fn test_append_fragment() {
        let mut doc = Document::parse("<body><main></main></body>");
        let main = doc.find_element("main").unwrap();
        let appended = doc.append_fragment(main, "<p>Loaded later on</p><p>Another one here</p>");
        assert_eq!(appended.len(), 2);
        let text = doc.find_text("Loaded later on").unwrap();
        assert!(doc.is_attached(text));
    }

    // ==================== Serialization Tests ====================

    #[test]
    fn test_to_html_round_trips_structure() {
        let mut doc = Document::parse(r#"<p class="x">a &amp; b<br>c</p>"#);
        let text = doc.find_text("a & b").unwrap();
        doc.insert_annotation_after(text, "<甲>");
        let html = doc.to_html();
        assert!(html.contains(r#"<p class="x">a &amp; b<span class="wordie-translation"> &lt;甲&gt;</span><br>c</p>"#));
    }

    #[test]
    fn test_to_html_keeps_script_raw() {
        let doc = Document::parse("<body><script>if (a < b) {}</script></body>");
        assert!(doc.to_html().contains("<script>if (a < b) {}</script>"));
    }

    #[test]
    fn test_lock_document_shared() {
        let shared = Document::parse("<p>Shared text node</p>").into_shared();
        let guard = lock_document(&shared);
        assert!(guard.find_text("Shared text node").is_some());
    }
}
