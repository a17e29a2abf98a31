//! Selection popup state and placement.

use crate::viewport::Rect;
use std::fmt;
use tokio::sync::watch;

pub const POPUP_WIDTH: f64 = 320.0;
pub const POPUP_HEIGHT: f64 = 200.0;
/// Gap between the selection and the popup
const POPUP_GAP: f64 = 8.0;
const POPUP_OFFSET_X: f64 = 12.0;
/// Minimum distance kept from the viewport edges
const EDGE_PADDING: f64 = 10.0;

/// A user selection. `position` is the page-space box of the selection's last
/// line, so `right()`/`bottom()` point at where the selection ends.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectionInfo {
    pub text: String,
    pub position: Rect,
    pub context: String,
}

/// What the content UI should show.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelectionSnapshot {
    pub selection: Option<SelectionInfo>,
    pub popup_visible: bool,
    pub indicator_visible: bool,
}

/// Current selection with change notifications for the UI.
#[derive(Debug)]
pub struct SelectionState {
    tx: watch::Sender<SelectionSnapshot>,
}

impl Default for SelectionState {
    fn default() -> Self {
        Self::new()
    }
}

impl SelectionState {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(SelectionSnapshot::default());
        Self { tx }
    }

    pub fn snapshot(&self) -> SelectionSnapshot {
        self.tx.borrow().clone()
    }

    pub fn selection(&self) -> Option<SelectionInfo> {
        self.tx.borrow().selection.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SelectionSnapshot> {
        self.tx.subscribe()
    }

    /// Replace the selection. A new selection shows the indicator and hides the popup.
    pub fn set_selection(&self, selection: Option<SelectionInfo>) {
        self.tx.send_modify(|state| {
            state.indicator_visible = selection.is_some();
            state.popup_visible = false;
            state.selection = selection;
        });
    }

    pub fn show_popup(&self) {
        self.tx.send_modify(|state| {
            state.indicator_visible = false;
            state.popup_visible = true;
        });
    }

    /// Hide the popup; the indicator comes back while a selection exists.
    pub fn hide_popup(&self) {
        self.tx.send_modify(|state| {
            state.popup_visible = false;
            state.indicator_visible = state.selection.is_some();
        });
    }

    pub fn clear(&self) {
        self.tx.send_modify(|state| *state = SelectionSnapshot::default());
    }
}

/// Visible part of the page, in page coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewportMetrics {
    pub width: f64,
    pub height: f64,
    pub scroll_x: f64,
    pub scroll_y: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HorizontalPlacement {
    Right,
    Left,
    /// Neither side had room
    ConstrainedRight,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerticalPlacement {
    Above,
    Below,
    /// Wanted above, no room
    BelowForced,
    /// Wanted below, no room
    AboveForced,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PopupStrategy {
    pub horizontal: HorizontalPlacement,
    pub vertical: VerticalPlacement,
}

impl fmt::Display for PopupStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let horizontal = match self.horizontal {
            HorizontalPlacement::Right => "right",
            HorizontalPlacement::Left => "left",
            HorizontalPlacement::ConstrainedRight => "constrained-right",
        };
        let vertical = match self.vertical {
            VerticalPlacement::Above => "above",
            VerticalPlacement::Below => "below",
            VerticalPlacement::BelowForced => "below-forced",
            VerticalPlacement::AboveForced => "above-forced",
        };
        write!(f, "{}-{}", horizontal, vertical)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PopupPlacement {
    pub x: f64,
    pub y: f64,
    pub strategy: PopupStrategy,
}

/// Place a `popup_width` x `popup_height` popup next to a selection.
///
/// Prefers the right-hand side; goes above the selection when it sits in the
/// lower half of the viewport and below otherwise. Falls back to the left side,
/// then flips vertically if the chosen side overflows, and finally clamps the
/// popup inside the viewport.
pub fn popup_position(
    selection: Rect,
    viewport: ViewportMetrics,
    popup_width: f64,
    popup_height: f64,
) -> PopupPlacement {
    let end_x = selection.right();
    let end_y = selection.bottom();

    let center_y = end_y - viewport.scroll_y + selection.height / 2.0;
    let lower_half = center_y > viewport.height / 2.0;

    let above_y = end_y - popup_height - POPUP_GAP;
    let below_y = end_y + POPUP_GAP;

    let mut x = end_x + POPUP_OFFSET_X;
    let mut horizontal = HorizontalPlacement::Right;
    let (mut y, mut vertical) = if lower_half {
        (above_y, VerticalPlacement::Above)
    } else {
        (below_y, VerticalPlacement::Below)
    };

    let right_space = viewport.scroll_x + viewport.width - x;
    if right_space < popup_width {
        let left_x = end_x - selection.width - popup_width - POPUP_OFFSET_X;
        if left_x >= viewport.scroll_x {
            x = left_x;
            horizontal = HorizontalPlacement::Left;
        } else {
            x = (viewport.scroll_x + EDGE_PADDING).max(end_x + POPUP_OFFSET_X);
            horizontal = HorizontalPlacement::ConstrainedRight;
        }
    }

    let top_space = y - viewport.scroll_y;
    let bottom_space = viewport.scroll_y + viewport.height - (y + popup_height);
    if top_space < 0.0 {
        y = below_y;
        if vertical == VerticalPlacement::Above {
            vertical = VerticalPlacement::BelowForced;
        }
    } else if bottom_space < 0.0 {
        y = above_y;
        if vertical == VerticalPlacement::Below {
            vertical = VerticalPlacement::AboveForced;
        }
    }

    let max_x = viewport.scroll_x + viewport.width - popup_width - EDGE_PADDING;
    let max_y = viewport.scroll_y + viewport.height - popup_height - EDGE_PADDING;
    PopupPlacement {
        x: x.min(max_x).max(viewport.scroll_x + EDGE_PADDING),
        y: y.min(max_y).max(viewport.scroll_y + EDGE_PADDING),
        strategy: PopupStrategy {
            horizontal,
            vertical,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn viewport() -> ViewportMetrics {
        ViewportMetrics {
            width: 1200.0,
            height: 800.0,
            scroll_x: 0.0,
            scroll_y: 0.0,
        }
    }

    fn place(selection: Rect) -> PopupPlacement {
        popup_position(selection, viewport(), POPUP_WIDTH, POPUP_HEIGHT)
    }

    // ==================== Placement Tests ====================

    #[test]
    fn test_upper_half_goes_right_below() {
        let placement = place(Rect::new(100.0, 100.0, 50.0, 20.0));
        assert_eq!(placement.strategy.to_string(), "right-below");
        assert_eq!(placement.x, 162.0);
        assert_eq!(placement.y, 128.0);
    }

    #[test]
    fn test_lower_half_goes_above() {
        let placement = place(Rect::new(100.0, 600.0, 50.0, 20.0));
        assert_eq!(placement.strategy.to_string(), "right-above");
        assert_eq!(placement.y, 620.0 - 200.0 - 8.0);
    }

    #[test]
    fn test_right_edge_falls_back_to_left() {
        let placement = place(Rect::new(1000.0, 100.0, 100.0, 20.0));
        assert_eq!(placement.strategy.horizontal, HorizontalPlacement::Left);
        assert_eq!(placement.x, 1100.0 - 100.0 - 320.0 - 12.0);
    }

    #[test]
    fn test_no_room_either_side_is_constrained() {
        let narrow = ViewportMetrics {
            width: 400.0,
            ..viewport()
        };
        let placement = popup_position(Rect::new(100.0, 100.0, 150.0, 20.0), narrow, POPUP_WIDTH, POPUP_HEIGHT);
        assert_eq!(placement.strategy.to_string(), "constrained-right-below");
        // Clamped back inside the viewport
        assert_eq!(placement.x, 400.0 - 320.0 - 10.0);
    }

    #[test]
    fn test_short_viewport_forces_flip() {
        let short = ViewportMetrics {
            height: 300.0,
            ..viewport()
        };
        // Lower half, but not enough room above
        let placement = popup_position(Rect::new(100.0, 160.0, 50.0, 20.0), short, POPUP_WIDTH, POPUP_HEIGHT);
        assert_eq!(placement.strategy.vertical, VerticalPlacement::BelowForced);
        assert_eq!(placement.y, 300.0 - 200.0 - 10.0);
    }

    #[test]
    fn test_placement_respects_scroll() {
        let scrolled = ViewportMetrics {
            scroll_y: 2000.0,
            ..viewport()
        };
        let placement = popup_position(Rect::new(100.0, 2100.0, 50.0, 20.0), scrolled, POPUP_WIDTH, POPUP_HEIGHT);
        assert_eq!(placement.strategy.to_string(), "right-below");
        assert_eq!(placement.y, 2128.0);
    }

    // ==================== State Tests ====================

    fn selection(text: &str) -> SelectionInfo {
        SelectionInfo {
            text: text.to_string(),
            position: Rect::new(0.0, 0.0, 10.0, 10.0),
            context: String::new(),
        }
    }

    #[test]
    fn test_selection_state_transitions() {
        let state = SelectionState::new();
        let rx = state.subscribe();

        state.set_selection(Some(selection("apple")));
        assert!(rx.borrow().indicator_visible);
        assert!(!rx.borrow().popup_visible);

        state.show_popup();
        let snapshot = state.snapshot();
        assert!(snapshot.popup_visible);
        assert!(!snapshot.indicator_visible);

        state.hide_popup();
        assert!(state.snapshot().indicator_visible);

        state.clear();
        assert_eq!(state.snapshot(), SelectionSnapshot::default());
        assert!(state.selection().is_none());
    }

    #[test]
    fn test_new_selection_resets_popup() {
        let state = SelectionState::new();
        state.set_selection(Some(selection("apple")));
        state.show_popup();
        state.set_selection(Some(selection("banana")));

        let snapshot = state.snapshot();
        assert!(!snapshot.popup_visible);
        assert!(snapshot.indicator_visible);
        assert_eq!(snapshot.selection.unwrap().text, "banana");

        state.set_selection(None);
        assert!(!state.snapshot().indicator_visible);
    }
}
