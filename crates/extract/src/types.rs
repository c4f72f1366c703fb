use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Axis-aligned box in CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, w: f64, h: f64) -> Self {
        Self { x, y, w, h }
    }

    pub fn area(&self) -> f64 {
        self.w.max(0.0) * self.h.max(0.0)
    }

    pub fn center(&self) -> (f64, f64) {
        (self.x + self.w / 2.0, self.y + self.h / 2.0)
    }

    pub fn intersects(&self, other: &Rect) -> bool {
        self.intersection_area(other) > 0.0
    }

    pub fn intersection_area(&self, other: &Rect) -> f64 {
        let left = self.x.max(other.x);
        let top = self.y.max(other.y);
        let right = (self.x + self.w).min(other.x + other.w);
        let bottom = (self.y + self.h).min(other.y + other.h);
        if right <= left || bottom <= top {
            return 0.0;
        }
        (right - left) * (bottom - top)
    }

    /// True when `other` lies entirely inside this box.
    pub fn contains(&self, other: &Rect) -> bool {
        other.x >= self.x
            && other.y >= self.y
            && other.x + other.w <= self.x + self.w
            && other.y + other.h <= self.y + self.h
    }

    /// Intersection-over-union, 0.0 for disjoint boxes.
    pub fn iou(&self, other: &Rect) -> f64 {
        let inter = self.intersection_area(other);
        if inter <= 0.0 {
            return 0.0;
        }
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            return 0.0;
        }
        inter / union
    }
}

/// One actionable page element, addressable by its session-scoped id until
/// the owning map is replaced or cleared.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementDescriptor {
    pub id: u32,
    /// Structural locator resolvable by the in-page runtime. Empty for
    /// snapshot-mode candidates, which are addressed by coordinates instead.
    pub locator: String,
    pub tag_or_role: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bounds: Option<Rect>,
    /// Interactive elements discovered nested inside this one. They carry no
    /// id of their own.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ChildDescriptor>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChildDescriptor {
    pub tag_or_role: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locator: Option<String>,
}

/// Ordered id → descriptor map produced by one extraction pass.
pub type IdMap = BTreeMap<u32, ElementDescriptor>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iou_identical_boxes() {
        let a = Rect::new(10.0, 10.0, 100.0, 50.0);
        assert!((a.iou(&a) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_iou_disjoint() {
        let a = Rect::new(0.0, 0.0, 10.0, 10.0);
        let b = Rect::new(100.0, 100.0, 10.0, 10.0);
        assert_eq!(a.iou(&b), 0.0);
    }

    #[test]
    fn test_iou_half_overlap() {
        let a = Rect::new(0.0, 0.0, 10.0, 10.0);
        let b = Rect::new(5.0, 0.0, 10.0, 10.0);
        // intersection 50, union 150
        assert!((a.iou(&b) - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_contains() {
        let outer = Rect::new(0.0, 0.0, 100.0, 100.0);
        let inner = Rect::new(10.0, 10.0, 20.0, 20.0);
        assert!(outer.contains(&inner));
        assert!(!inner.contains(&outer));
    }

    #[test]
    fn test_descriptor_wire_shape() {
        let d = ElementDescriptor {
            id: 3,
            locator: "#submit".to_string(),
            tag_or_role: "button".to_string(),
            description: "Submit".to_string(),
            bounds: Some(Rect::new(1.0, 2.0, 3.0, 4.0)),
            children: vec![],
        };
        let raw = serde_json::to_value(&d).unwrap();
        assert_eq!(raw["tagOrRole"], "button");
        assert_eq!(raw["bounds"]["w"], 3.0);
        assert!(raw.get("children").is_none());
    }
}
