//! Viewport-driven discovery of translatable text.
//!
//! Discovery runs in two passes:
//! - `scan`: a coarse walk over elements that prunes technical, hidden and
//!   editable subtrees and returns the elements worth observing.
//! - `collect`: once an observed element nears the viewport, a fine walk over
//!   its text nodes that produces [`TextJob`]s and marks each node processed.

use crate::dom::{Document, ElementData, NodeId, PageNode, ANNOTATION_CLASS};
use crate::text::is_translatable;
use std::collections::HashSet;
use tracing::debug;

/// Tags whose subtrees never contain translatable prose.
pub const DENIED_TAGS: &[&str] = &[
    "script", "style", "noscript", "code", "pre", "nav", "header", "footer", "svg", "img",
    "input", "textarea", "select", "option", "button", "iframe", "canvas", "video", "audio",
    "map", "object",
];

/// Class names used by common syntax highlighters and code widgets.
const CODE_CLASSES: &[&str] = &["hljs", "prism", "code-block"];

/// A text node scheduled for translation, with its trimmed content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextJob {
    pub node: NodeId,
    pub text: String,
}

/// Whether an element (and therefore its whole subtree) is excluded from translation.
pub fn rejects_element(element: &ElementData) -> bool {
    DENIED_TAGS.contains(&element.name())
        || CODE_CLASSES.iter().any(|class| element.has_class(class))
        || element.attr("role") == Some("code")
        || element.has_class(ANNOTATION_CLASS)
        || element.is_hidden()
        || element.is_content_editable()
}

/// Text nodes already queued or translated in the current enable cycle.
///
/// Keyed by [`NodeId`], so a mark never keeps a node alive; marks for nodes
/// that left the page are dropped by [`ProcessedMarks::prune_detached`].
#[derive(Debug, Default)]
pub struct ProcessedMarks {
    marked: HashSet<NodeId>,
}

impl ProcessedMarks {
    pub fn is_marked(&self, node: NodeId) -> bool {
        self.marked.contains(&node)
    }

    /// Mark a node. Returns false if it was already marked.
    pub fn mark(&mut self, node: NodeId) -> bool {
        self.marked.insert(node)
    }

    pub fn len(&self) -> usize {
        self.marked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.marked.is_empty()
    }

    pub fn clear(&mut self) {
        self.marked.clear();
    }

    /// Forget marks of nodes that are no longer attached to the document.
    pub fn prune_detached(&mut self, document: &Document) {
        self.marked.retain(|node| document.is_attached(*node));
    }
}

#[derive(Debug, Default)]
pub struct Discovery {
    marks: ProcessedMarks,
}

impl Discovery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn marks(&self) -> &ProcessedMarks {
        &self.marks
    }

    /// Revoke every processed mark so the next scan starts fresh.
    pub fn reset(&mut self) {
        self.marks.clear();
    }

    /// Coarse pass: accepted elements under `root` that directly hold valid text.
    ///
    /// Elements are returned in document order. Nothing is returned when `root`
    /// itself, or one of its ancestors, is rejected.
    pub fn scan(&mut self, document: &Document, root: NodeId) -> Vec<NodeId> {
        self.marks.prune_detached(document);

        if !document.is_attached(root) || Self::inside_rejected(document, root) {
            return Vec::new();
        }

        let mut candidates = Vec::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            if let Some(element) = document.element(id) {
                if rejects_element(element) {
                    continue;
                }
                if Self::has_direct_text(document, id) {
                    candidates.push(id);
                }
            }
            let children: Vec<NodeId> = document.children(id).collect();
            stack.extend(children.into_iter().rev());
        }

        debug!("Scan found {} candidate elements", candidates.len());
        candidates
    }

    /// Fine pass: unprocessed, valid text nodes under `element`.
    ///
    /// Every returned node is marked processed.
    pub fn collect(&mut self, document: &Document, element: NodeId) -> Vec<TextJob> {
        if !document.is_attached(element) || Self::inside_rejected(document, element) {
            return Vec::new();
        }

        let mut jobs = Vec::new();
        let mut stack = vec![element];
        while let Some(id) = stack.pop() {
            let Some(node) = document.node(id) else {
                continue;
            };
            match node.value() {
                PageNode::Text(content) => {
                    if self.marks.is_marked(id) {
                        continue;
                    }
                    let parent_denied = document
                        .parent_element(id)
                        .map(|parent| DENIED_TAGS.contains(&parent.name()))
                        .unwrap_or(false);
                    if parent_denied {
                        continue;
                    }
                    let text = content.trim();
                    if is_translatable(text) {
                        self.marks.mark(id);
                        jobs.push(TextJob {
                            node: id,
                            text: text.to_string(),
                        });
                    }
                }
                PageNode::Element(child) if id != element && rejects_element(child) => {}
                _ => {
                    let children: Vec<NodeId> = document.children(id).collect();
                    stack.extend(children.into_iter().rev());
                }
            }
        }
        jobs
    }

    fn has_direct_text(document: &Document, element: NodeId) -> bool {
        document
            .children(element)
            .filter_map(|child| document.text(child))
            .any(|text| is_translatable(text.trim()))
    }

    /// Whether `node` or any ancestor element is rejected.
    fn inside_rejected(document: &Document, node: NodeId) -> bool {
        let Some(start) = document.node(node) else {
            return true;
        };
        std::iter::once(start)
            .chain(start.ancestors())
            .any(|n| matches!(n.value(), PageNode::Element(e) if rejects_element(e)))
    }
}
