//! Visibility notification source.
//!
//! [`ViewportObserver`] plays the role of an intersection observer: elements are
//! observed once, and reported (and automatically unobserved) the first time
//! their bounds intersect the viewport grown by the root margin. Geometry comes
//! from a [`Layout`] supplied by the host.

use crate::dom::{Document, NodeId, PageNode};
use indexmap::IndexSet;
use std::collections::HashMap;

/// Axis-aligned rectangle in page coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }

    /// Grow the rectangle by `margin` on every side.
    pub fn expand(&self, margin: f64) -> Self {
        Self::new(
            self.x - margin,
            self.y - margin,
            self.width + 2.0 * margin,
            self.height + 2.0 * margin,
        )
    }

    /// Edge-inclusive intersection test.
    pub fn intersects(&self, other: &Rect) -> bool {
        self.x <= other.right()
            && other.x <= self.right()
            && self.y <= other.bottom()
            && other.y <= self.bottom()
    }
}

/// Source of element bounds.
pub trait Layout {
    /// Page-space bounds of an element, `None` when it has no box.
    fn bounds(&self, element: NodeId) -> Option<Rect>;
}

impl Layout for HashMap<NodeId, Rect> {
    fn bounds(&self, element: NodeId) -> Option<Rect> {
        self.get(&element).copied()
    }
}

/// Layout that stacks every element holding direct text in one column,
/// one fixed-height row each, in document order.
///
/// Used to simulate scrolling through a page that was never rendered.
#[derive(Debug, Clone)]
pub struct StackedLayout {
    rows: HashMap<NodeId, Rect>,
    width: f64,
    height: f64,
}

impl StackedLayout {
    pub fn from_document(document: &Document, width: f64, row_height: f64) -> Self {
        let mut rows = HashMap::new();
        let mut y = 0.0;
        let Some(body) = document.node(document.body()) else {
            return Self {
                rows,
                width,
                height: 0.0,
            };
        };
        for node in body.descendants() {
            if !matches!(node.value(), PageNode::Element(_)) {
                continue;
            }
            let has_text = document
                .children(node.id())
                .filter_map(|child| document.text(child))
                .any(|text| !text.trim().is_empty());
            if has_text {
                rows.insert(node.id(), Rect::new(0.0, y, width, row_height));
                y += row_height;
            }
        }
        Self {
            rows,
            width,
            height: y,
        }
    }

    /// Total height of the laid out page.
    pub fn height(&self) -> f64 {
        self.height
    }

    pub fn width(&self) -> f64 {
        self.width
    }
}

impl Layout for StackedLayout {
    fn bounds(&self, element: NodeId) -> Option<Rect> {
        self.rows.get(&element).copied()
    }
}

/// One-shot element observer with a lookahead margin.
#[derive(Debug, Clone)]
pub struct ViewportObserver {
    root_margin: f64,
    observed: IndexSet<NodeId>,
}

impl ViewportObserver {
    pub fn new(root_margin: f64) -> Self {
        Self {
            root_margin,
            observed: IndexSet::new(),
        }
    }

    pub fn root_margin(&self) -> f64 {
        self.root_margin
    }

    pub fn observe(&mut self, element: NodeId) {
        self.observed.insert(element);
    }

    /// Stop observing an element. Returns true if it was observed.
    pub fn unobserve(&mut self, element: NodeId) -> bool {
        self.observed.shift_remove(&element)
    }

    pub fn is_observing(&self, element: NodeId) -> bool {
        self.observed.contains(&element)
    }

    pub fn len(&self) -> usize {
        self.observed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observed.is_empty()
    }

    pub fn clear(&mut self) {
        self.observed.clear();
    }

    /// Forget elements that are no longer part of the page.
    pub fn prune_detached(&mut self, document: &Document) {
        self.observed.retain(|id| document.is_attached(*id));
    }

    /// Report and unobserve every element intersecting the expanded viewport.
    ///
    /// Elements without bounds stay observed. Results keep observation order.
    pub fn take_intersecting(&mut self, viewport: Rect, layout: &dyn Layout) -> Vec<NodeId> {
        let region = viewport.expand(self.root_margin);
        let hits: Vec<NodeId> = self
            .observed
            .iter()
            .copied()
            .filter(|id| {
                layout
                    .bounds(*id)
                    .map(|bounds| bounds.intersects(&region))
                    .unwrap_or(false)
            })
            .collect();
        for id in &hits {
            self.observed.shift_remove(id);
        }
        hits
    }
}
