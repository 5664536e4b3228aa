//! Geometry Engine: pointer drags over a displayed image → percent rectangles.
//!
//! Every coordinate that leaves this module is a percentage of the image's
//! on-screen bounding box. The box is the 100% unit on each axis, so the same
//! relative gesture produces the same rectangle whether the page is shown as
//! a 300 px thumbnail or a 2 400 px zoom, and whatever the scan's native
//! resolution was. [`PercentRect::to_pixels`] is the inverse used at render
//! time.
//!
//! ```text
//!  begin_drag ──▶ update_drag* ──▶ commit_drag ──▶ Region "Field N"
//!      │                               │
//!      └──────── cancel_drag ◀─────────┴── (< 1% on either axis: no-op)
//! ```

use crate::error::FieldScanError;
use crate::registry::{FieldRegistry, RegionId};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Smallest accepted width and height, in percent of the image.
///
/// A click without movement (or a tiny jitter) would otherwise create an
/// invisible zero-area field.
pub const MIN_REGION_PERCENT: f64 = 1.0;

/// A pointer position in the same pixel space as the [`BoundingBox`]
/// (typically client/viewport coordinates).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointerPosition {
    pub x: f64,
    pub y: f64,
}

impl PointerPosition {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// A point expressed in percent of the image box, each axis in `[0, 100]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PercentPoint {
    pub x: f64,
    pub y: f64,
}

/// The on-screen rectangle the image currently occupies.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    left: f64,
    top: f64,
    width: f64,
    height: f64,
}

impl BoundingBox {
    /// Create a box; both sides must be positive and finite.
    pub fn new(left: f64, top: f64, width: f64, height: f64) -> Result<Self, FieldScanError> {
        let valid = |v: f64| v.is_finite() && v > 0.0;
        if !valid(width) || !valid(height) || !left.is_finite() || !top.is_finite() {
            return Err(FieldScanError::InvalidGeometry { width, height });
        }
        Ok(Self {
            left,
            top,
            width,
            height,
        })
    }

    /// A box anchored at the origin, e.g. an image drawn at `width × height`.
    pub fn sized(width: f64, height: f64) -> Result<Self, FieldScanError> {
        Self::new(0.0, 0.0, width, height)
    }

    pub fn width(&self) -> f64 {
        self.width
    }

    pub fn height(&self) -> f64 {
        self.height
    }

    /// Convert a pointer position to percent of this box, clamped to `[0, 100]`.
    ///
    /// Pointers that leave the image mid-drag stick to the nearest edge.
    pub fn to_percent(&self, pos: PointerPosition) -> PercentPoint {
        PercentPoint {
            x: ((pos.x - self.left) / self.width * 100.0).clamp(0.0, 100.0),
            y: ((pos.y - self.top) / self.height * 100.0).clamp(0.0, 100.0),
        }
    }
}

/// A rectangle in percent of the image box.
///
/// `x + width <= 100` and `y + height <= 100` hold for anything built from
/// clamped points, but are not enforced for rectangles from other sources.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PercentRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// Intersect `[start, start + len]` with `[0, 100]`.
fn crop_span(start: f64, len: f64) -> (f64, f64) {
    let end = (start + len.max(0.0)).min(100.0);
    let start = start.clamp(0.0, 100.0);
    (start, (end - start).max(0.0))
}

impl PercentRect {
    /// The rectangle spanned by two opposite corners, in either order.
    pub fn from_corners(a: PercentPoint, b: PercentPoint) -> Self {
        Self {
            x: a.x.min(b.x),
            y: a.y.min(b.y),
            width: (b.x - a.x).abs(),
            height: (b.y - a.y).abs(),
        }
    }

    /// Whether both sides exceed [`MIN_REGION_PERCENT`].
    pub fn meets_min_size(&self) -> bool {
        self.width > MIN_REGION_PERCENT && self.height > MIN_REGION_PERCENT
    }

    /// Crop the rectangle to `[0, 100]` on both axes.
    ///
    /// Used for rectangles proposed by a model, which may overshoot the page.
    /// Edges are cut, never moved: the result covers exactly the part of the
    /// proposal that lies on the page.
    pub fn clamped(&self) -> Self {
        let (x, width) = crop_span(self.x, self.width);
        let (y, height) = crop_span(self.y, self.height);
        Self { x, y, width, height }
    }

    /// Project onto a box of any size, e.g. to draw the overlay.
    pub fn to_pixels(&self, bounds: &BoundingBox) -> PixelRect {
        PixelRect {
            left: bounds.left + self.x / 100.0 * bounds.width,
            top: bounds.top + self.y / 100.0 * bounds.height,
            width: self.width / 100.0 * bounds.width,
            height: self.height / 100.0 * bounds.height,
        }
    }
}

/// A rectangle in container pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelRect {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

/// An in-progress drag: the box it started in plus both anchors.
#[derive(Debug, Clone, Copy)]
struct DragGesture {
    bounds: BoundingBox,
    start: PercentPoint,
    current: PercentPoint,
}

/// Turns pointer gestures into regions in a [`FieldRegistry`].
///
/// Holds at most one gesture at a time; a new `begin_drag` replaces any
/// gesture that was never committed.
#[derive(Debug, Default)]
pub struct GeometryEngine {
    drag: Option<DragGesture>,
}

impl GeometryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the start anchor of a drag over `bounds`.
    pub fn begin_drag(&mut self, bounds: BoundingBox, pos: PointerPosition) {
        let start = bounds.to_percent(pos);
        self.drag = Some(DragGesture {
            bounds,
            start,
            current: start,
        });
    }

    /// Move the live end anchor; returns the rectangle to draw as feedback.
    ///
    /// Nothing is committed. Returns `None` when no drag is in progress.
    pub fn update_drag(&mut self, pos: PointerPosition) -> Option<PercentRect> {
        let drag = self.drag.as_mut()?;
        drag.current = drag.bounds.to_percent(pos);
        Some(PercentRect::from_corners(drag.start, drag.current))
    }

    /// Finish the drag at `pos`.
    ///
    /// Creates a region named `Field N`, selects it and returns its id when
    /// both sides exceed the minimum size. Smaller drags (and commits with no
    /// drag in progress) leave the registry untouched and return `None`.
    pub fn commit_drag(
        &mut self,
        pos: PointerPosition,
        registry: &mut FieldRegistry,
    ) -> Option<RegionId> {
        let drag = self.drag.take()?;
        let end = drag.bounds.to_percent(pos);
        let rect = PercentRect::from_corners(drag.start, end);

        if !rect.meets_min_size() {
            debug!(
                "Discarding drag {:.2}% x {:.2}% (below {}% minimum)",
                rect.width, rect.height, MIN_REGION_PERCENT
            );
            return None;
        }

        let id = registry.add_auto(rect);
        registry.select(id).ok()?;
        Some(id)
    }

    /// Drop the current gesture without creating anything.
    pub fn cancel_drag(&mut self) {
        self.drag = None;
    }

    pub fn is_dragging(&self) -> bool {
        self.drag.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    fn assert_rect_eq(a: &PercentRect, b: &PercentRect) {
        assert!(
            approx(a.x, b.x) && approx(a.y, b.y) && approx(a.width, b.width) && approx(a.height, b.height),
            "{a:?} != {b:?}"
        );
    }

    #[test]
    fn bounding_box_rejects_degenerate_sizes() {
        assert!(BoundingBox::sized(0.0, 100.0).is_err());
        assert!(BoundingBox::sized(100.0, -1.0).is_err());
        assert!(BoundingBox::sized(f64::NAN, 100.0).is_err());
        assert!(BoundingBox::sized(800.0, 1000.0).is_ok());
    }

    #[test]
    fn to_percent_is_relative_to_box_origin() {
        let b = BoundingBox::new(100.0, 50.0, 400.0, 200.0).unwrap();
        let p = b.to_percent(PointerPosition::new(300.0, 150.0));
        assert!(approx(p.x, 50.0));
        assert!(approx(p.y, 50.0));
    }

    #[test]
    fn to_percent_clamps_outside_pointer() {
        let b = BoundingBox::sized(200.0, 200.0).unwrap();
        let p = b.to_percent(PointerPosition::new(-20.0, 500.0));
        assert_eq!(p, PercentPoint { x: 0.0, y: 100.0 });
    }

    #[test]
    fn from_corners_normalises_direction() {
        let a = PercentPoint { x: 60.0, y: 40.0 };
        let b = PercentPoint { x: 10.0, y: 70.0 };
        let r = PercentRect::from_corners(a, b);
        assert_rect_eq(
            &r,
            &PercentRect {
                x: 10.0,
                y: 40.0,
                width: 50.0,
                height: 30.0,
            },
        );
    }

    #[test]
    fn commit_creates_selected_field() {
        let mut engine = GeometryEngine::new();
        let mut registry = FieldRegistry::new();
        let bounds = BoundingBox::sized(1000.0, 1000.0).unwrap();

        engine.begin_drag(bounds, PointerPosition::new(100.0, 100.0));
        let preview = engine.update_drag(PointerPosition::new(200.0, 150.0));
        assert!(preview.is_some());
        assert!(registry.is_empty(), "update_drag must not commit");

        let id = engine
            .commit_drag(PointerPosition::new(300.0, 200.0), &mut registry)
            .expect("region created");

        let region = registry.get(id).unwrap();
        assert_eq!(region.name(), "Field 1");
        assert_rect_eq(
            region.rect(),
            &PercentRect {
                x: 10.0,
                y: 10.0,
                width: 20.0,
                height: 10.0,
            },
        );
        assert_eq!(registry.active(), Some(id));
        assert!(!engine.is_dragging());
    }

    #[test]
    fn click_without_movement_is_discarded() {
        let mut engine = GeometryEngine::new();
        let mut registry = FieldRegistry::new();
        let bounds = BoundingBox::sized(500.0, 500.0).unwrap();

        engine.begin_drag(bounds, PointerPosition::new(250.0, 250.0));
        assert!(engine
            .commit_drag(PointerPosition::new(251.0, 251.0), &mut registry)
            .is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn thin_drag_is_discarded_on_either_axis() {
        let mut engine = GeometryEngine::new();
        let mut registry = FieldRegistry::new();
        let bounds = BoundingBox::sized(400.0, 400.0).unwrap();

        // Wide but exactly 1% tall: not strictly greater than the minimum.
        engine.begin_drag(bounds, PointerPosition::new(40.0, 0.0));
        assert!(engine
            .commit_drag(PointerPosition::new(360.0, 4.0), &mut registry)
            .is_none());

        engine.begin_drag(bounds, PointerPosition::new(0.0, 40.0));
        assert!(engine
            .commit_drag(PointerPosition::new(2.0, 360.0), &mut registry)
            .is_none());
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn commit_without_begin_is_noop() {
        let mut engine = GeometryEngine::new();
        let mut registry = FieldRegistry::new();
        assert!(engine
            .commit_drag(PointerPosition::new(10.0, 10.0), &mut registry)
            .is_none());
        assert!(engine.update_drag(PointerPosition::new(1.0, 1.0)).is_none());
    }

    #[test]
    fn cancel_drops_gesture() {
        let mut engine = GeometryEngine::new();
        let mut registry = FieldRegistry::new();
        let bounds = BoundingBox::sized(100.0, 100.0).unwrap();
        engine.begin_drag(bounds, PointerPosition::new(0.0, 0.0));
        engine.cancel_drag();
        assert!(engine
            .commit_drag(PointerPosition::new(50.0, 50.0), &mut registry)
            .is_none());
    }

    #[test]
    fn same_relative_path_at_two_scales_gives_same_rect() {
        let path = [(0.12, 0.30), (0.40, 0.35), (0.55, 0.42)];

        let replay = |w: f64, h: f64| {
            let mut engine = GeometryEngine::new();
            let mut registry = FieldRegistry::new();
            let bounds = BoundingBox::new(17.0, 33.0, w, h).unwrap();
            let at = |(fx, fy): (f64, f64)| PointerPosition::new(17.0 + fx * w, 33.0 + fy * h);
            engine.begin_drag(bounds, at(path[0]));
            engine.update_drag(at(path[1]));
            let id = engine.commit_drag(at(path[2]), &mut registry).unwrap();
            *registry.get(id).unwrap().rect()
        };

        let small = replay(320.0, 414.0);
        let large = replay(2480.0, 3508.0);
        assert!((small.x - large.x).abs() < 1e-6);
        assert!((small.y - large.y).abs() < 1e-6);
        assert!((small.width - large.width).abs() < 1e-6);
        assert!((small.height - large.height).abs() < 1e-6);
    }

    #[test]
    fn to_pixels_inverts_to_percent() {
        let rect = PercentRect {
            x: 25.0,
            y: 10.0,
            width: 50.0,
            height: 20.0,
        };
        let px = rect.to_pixels(&BoundingBox::new(10.0, 0.0, 800.0, 1000.0).unwrap());
        assert!(approx(px.left, 210.0));
        assert!(approx(px.top, 100.0));
        assert!(approx(px.width, 400.0));
        assert!(approx(px.height, 200.0));
    }

    #[test]
    fn clamped_crops_overshoot_at_the_page_edges() {
        let r = PercentRect {
            x: 90.0,
            y: -5.0,
            width: 30.0,
            height: 20.0,
        }
        .clamped();
        assert_rect_eq(
            &r,
            &PercentRect {
                x: 90.0,
                y: 0.0,
                width: 10.0,
                height: 15.0,
            },
        );
    }

    #[test]
    fn clamped_keeps_the_far_edge_of_a_negative_origin() {
        let r = PercentRect {
            x: -10.0,
            y: 10.0,
            width: 30.0,
            height: 20.0,
        }
        .clamped();
        assert!(approx(r.x, 0.0));
        assert!(approx(r.x + r.width, 20.0), "right edge must stay at 20");
        assert!(approx(r.y + r.height, 30.0));
    }

    #[test]
    fn clamped_rect_entirely_off_page_has_no_area() {
        let r = PercentRect {
            x: -40.0,
            y: 110.0,
            width: 20.0,
            height: 5.0,
        }
        .clamped();
        assert_eq!(r.width, 0.0);
        assert_eq!(r.height, 0.0);
    }
}
