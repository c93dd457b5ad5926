//! Tracker - Detections to stable identities and trigger-line counts
//!
//! ## Responsibilities
//!
//! - Match per-frame detections to tracked objects (centroid distance or box overlap)
//! - Assign fresh ids to unmatched detections, evict objects that stay unseen
//! - Report how many objects crossed the trigger line in this frame
//!
//! The tracker never touches the bucket ledger; the streaming session applies the
//! returned delta.

mod centroid;

pub use centroid::CentroidTracker;

use serde::Serialize;

/// Axis-aligned detection box in image pixels
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub confidence: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32, confidence: f32) -> Self {
        Self {
            x1,
            y1,
            x2,
            y2,
            confidence,
        }
    }

    /// Box of the given size centred on (cx, cy)
    pub fn around(cx: f32, cy: f32, width: f32, height: f32) -> Self {
        Self::new(
            cx - width / 2.0,
            cy - height / 2.0,
            cx + width / 2.0,
            cy + height / 2.0,
            1.0,
        )
    }

    pub fn centroid(&self) -> Point {
        Point {
            x: (self.x1 + self.x2) / 2.0,
            y: (self.y1 + self.y2) / 2.0,
        }
    }

    pub fn area(&self) -> f32 {
        (self.x2 - self.x1).max(0.0) * (self.y2 - self.y1).max(0.0)
    }

    /// Intersection over union
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let intersection = (self.x2.min(other.x2) - self.x1.max(other.x1)).max(0.0)
            * (self.y2.min(other.y2) - self.y1.max(other.y1)).max(0.0);
        let union = self.area() + other.area() - intersection;
        if union <= f32::EPSILON {
            return 0.0;
        }
        intersection / union
    }
}

/// Centroid in image pixels
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn distance(&self, other: &Point) -> f32 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

/// Orientation of the trigger line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerAxis {
    /// Line at a fixed y, objects cross it moving vertically
    Horizontal,
    /// Line at a fixed x, objects cross it moving horizontally
    Vertical,
}

/// Which way an object must move across the line to be counted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrossingDirection {
    /// Coordinate grows: `prev <= line && cur > line`
    Increasing,
    /// Coordinate shrinks: `prev >= line && cur < line`
    Decreasing,
}

/// Fixed line in image space
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TriggerLine {
    pub axis: TriggerAxis,
    pub position: f32,
    pub direction: CrossingDirection,
}

impl TriggerLine {
    pub fn horizontal(y: f32, direction: CrossingDirection) -> Self {
        Self {
            axis: TriggerAxis::Horizontal,
            position: y,
            direction,
        }
    }

    pub fn vertical(x: f32, direction: CrossingDirection) -> Self {
        Self {
            axis: TriggerAxis::Vertical,
            position: x,
            direction,
        }
    }

    /// True when moving from `prev` to `cur` crosses the line in the counted direction
    pub fn crossed(&self, prev: Point, cur: Point) -> bool {
        let (before, after) = match self.axis {
            TriggerAxis::Horizontal => (prev.y, cur.y),
            TriggerAxis::Vertical => (prev.x, cur.x),
        };
        match self.direction {
            CrossingDirection::Increasing => before <= self.position && after > self.position,
            CrossingDirection::Decreasing => before >= self.position && after < self.position,
        }
    }
}

/// How detections are gated when matched against tracked objects
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MatchGate {
    /// Nearest centroid, at most this many pixels away
    Distance(f32),
    /// Highest box overlap, at least this IoU
    Overlap(f32),
}

/// Tracker settings
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackerConfig {
    pub gate: MatchGate,
    /// Frames an object may stay unmatched before it is evicted
    pub max_disappeared: u32,
    pub trigger: TriggerLine,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            gate: MatchGate::Distance(50.0),
            max_disappeared: 5,
            trigger: TriggerLine::horizontal(120.0, CrossingDirection::Decreasing),
        }
    }
}

/// Object followed across frames
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedObject {
    pub id: u64,
    pub centroid: Point,
    pub previous_centroid: Point,
    pub bbox: BoundingBox,
    pub age_since_seen: u32,
    pub counted: bool,
}

/// Multi-object tracker producing a per-frame count delta
pub trait Tracker: Send + Sync {
    /// Feed one frame of detections, return the number of new line crossings
    fn update(&mut self, detections: &[BoundingBox]) -> u32;

    /// Drop every tracked object and zero the running total
    fn reset(&mut self);

    /// Live objects ordered by id
    fn objects(&self) -> Vec<&TrackedObject>;

    /// Crossings counted since creation or the last reset
    fn total_counted(&self) -> u64;

    fn trigger_line(&self) -> TriggerLine;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iou_identical_boxes() {
        let b = BoundingBox::new(0.0, 0.0, 10.0, 10.0, 1.0);
        assert!((b.iou(&b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_iou_no_overlap() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0, 1.0);
        let b = BoundingBox::new(20.0, 20.0, 30.0, 30.0, 1.0);
        assert_eq!(a.iou(&b), 0.0);
    }

    #[test]
    fn test_iou_partial_overlap() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0, 1.0);
        let b = BoundingBox::new(5.0, 0.0, 15.0, 10.0, 1.0);
        // 50 / (100 + 100 - 50)
        assert!((a.iou(&b) - 1.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_trigger_increasing() {
        let line = TriggerLine::horizontal(100.0, CrossingDirection::Increasing);
        assert!(line.crossed(Point { x: 0.0, y: 90.0 }, Point { x: 0.0, y: 110.0 }));
        assert!(line.crossed(Point { x: 0.0, y: 100.0 }, Point { x: 0.0, y: 101.0 }));
        assert!(!line.crossed(Point { x: 0.0, y: 110.0 }, Point { x: 0.0, y: 90.0 }));
        assert!(!line.crossed(Point { x: 0.0, y: 101.0 }, Point { x: 0.0, y: 120.0 }));
    }

    #[test]
    fn test_trigger_vertical_decreasing() {
        let line = TriggerLine::vertical(50.0, CrossingDirection::Decreasing);
        assert!(line.crossed(Point { x: 60.0, y: 0.0 }, Point { x: 40.0, y: 0.0 }));
        assert!(!line.crossed(Point { x: 40.0, y: 0.0 }, Point { x: 60.0, y: 0.0 }));
    }

    #[test]
    fn test_centroid() {
        let b = BoundingBox::around(30.0, 40.0, 10.0, 20.0);
        assert_eq!(b.centroid(), Point { x: 30.0, y: 40.0 });
    }
}
