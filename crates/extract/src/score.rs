//! Snapshot scorer: ranks clickable candidates from a flat layout snapshot
//! for screenshot-driven workflows.
//!
//! Input is the parsed form of a DevTools `DOMSnapshot.captureSnapshot`
//! document: a string table, per-node tag-name indices and attribute index
//! pairs, and per-laid-out-node bounds. Output is a deduplicated list ordered
//! by score with 1-based display ids and center points, ready to overlay on a
//! capture.

use serde::Serialize;
use serde_json::Value;

use tabrelay_core::{Error, Result};

use crate::types::{ElementDescriptor, Rect};

/// Boxes below this area are dropped when both dimensions are also tiny.
pub const MIN_BOX_AREA: f64 = 400.0;
pub const MIN_BOX_DIM: f64 = 12.0;

const VIEWPORT_INTERSECT_BONUS: f64 = 60.0;
const VIEWPORT_CONTAIN_BONUS: f64 = 40.0;
const AREA_BONUS_CAP: f64 = 12.0;
const DISTANCE_BASE: f64 = 50.0;
/// Controls with either dimension under this get their tag bonus halved.
const SMALL_CONTROL_DIM: f64 = 20.0;

/// Elements at or above this area use the looser duplicate threshold.
pub const DEDUP_LARGE_AREA: f64 = 10_000.0;
pub const IOU_LARGE: f64 = 0.9;
pub const IOU_SMALL: f64 = 0.6;
pub const MAX_CANDIDATES: usize = 200;

const ALLOWED_ROLES: &[&str] = &[
    "link", "button", "checkbox", "radio", "textbox", "searchbox", "combobox",
    "listbox", "menuitem", "menuitemcheckbox", "menuitemradio", "option",
    "switch", "slider", "spinbutton", "tab", "treeitem", "select", "textarea",
    "summary",
];

/// One document out of a `DOMSnapshot.captureSnapshot` response.
#[derive(Debug, Clone, Default)]
pub struct SnapshotDocument {
    pub strings: Vec<String>,
    /// String-table index of each node's name.
    pub node_names: Vec<i64>,
    /// Name/value string-table index pairs per node.
    pub node_attributes: Vec<Vec<(i64, i64)>>,
    /// Node index of each laid-out box.
    pub layout_node_index: Vec<usize>,
    pub layout_bounds: Vec<Rect>,
}

impl SnapshotDocument {
    fn string(&self, ix: i64) -> Option<&str> {
        if ix < 0 {
            return None;
        }
        self.strings.get(ix as usize).map(|s| s.as_str())
    }

    fn tag(&self, node: usize) -> Option<String> {
        self.node_names
            .get(node)
            .and_then(|&ix| self.string(ix))
            .map(|s| s.to_ascii_lowercase())
    }

    fn attr(&self, node: usize, name: &str) -> Option<&str> {
        let pairs = self.node_attributes.get(node)?;
        for &(k, v) in pairs {
            if self.string(k).is_some_and(|s| s.eq_ignore_ascii_case(name)) {
                return self.string(v);
            }
        }
        None
    }
}

/// Parse the raw `DOMSnapshot.captureSnapshot` response. Only the first
/// (main) document is consumed.
pub fn parse_snapshot(raw: &Value) -> Result<SnapshotDocument> {
    let strings = raw
        .get("strings")
        .and_then(|v| v.as_array())
        .ok_or_else(|| Error::Extraction("snapshot missing strings table".to_string()))?
        .iter()
        .map(|s| s.as_str().unwrap_or("").to_string())
        .collect();

    let document = raw
        .get("documents")
        .and_then(|v| v.as_array())
        .and_then(|docs| docs.first())
        .ok_or_else(|| Error::Extraction("snapshot missing documents".to_string()))?;

    let nodes = document
        .get("nodes")
        .ok_or_else(|| Error::Extraction("snapshot missing nodes".to_string()))?;

    let node_names: Vec<i64> = nodes
        .get("nodeName")
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().map(|v| v.as_i64().unwrap_or(-1)).collect())
        .unwrap_or_default();

    let node_attributes: Vec<Vec<(i64, i64)>> = nodes
        .get("attributes")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .map(|flat| {
                    let flat = flat.as_array().cloned().unwrap_or_default();
                    flat.chunks_exact(2)
                        .map(|pair| {
                            (
                                pair[0].as_i64().unwrap_or(-1),
                                pair[1].as_i64().unwrap_or(-1),
                            )
                        })
                        .collect()
                })
                .collect()
        })
        .unwrap_or_default();

    let layout = document
        .get("layout")
        .ok_or_else(|| Error::Extraction("snapshot missing layout".to_string()))?;

    let layout_node_index: Vec<usize> = layout
        .get("nodeIndex")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .map(|v| v.as_u64().unwrap_or(0) as usize)
                .collect()
        })
        .unwrap_or_default();

    let layout_bounds: Vec<Rect> = layout
        .get("bounds")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .map(|b| {
                    let b = b.as_array().cloned().unwrap_or_default();
                    let at = |i: usize| b.get(i).and_then(|v| v.as_f64()).unwrap_or(0.0);
                    Rect::new(at(0), at(1), at(2), at(3))
                })
                .collect()
        })
        .unwrap_or_default();

    if layout_node_index.len() != layout_bounds.len() {
        return Err(Error::Extraction(format!(
            "snapshot layout arrays disagree: {} node indices, {} bounds",
            layout_node_index.len(),
            layout_bounds.len()
        )));
    }

    Ok(SnapshotDocument {
        strings,
        node_names,
        node_attributes,
        layout_node_index,
        layout_bounds,
    })
}

/// A ranked overlay candidate. `id` is a 1-based display id valid for the
/// pass that produced it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoredElement {
    pub id: u32,
    pub tag_or_role: String,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub href: Option<String>,
    pub bounds: Rect,
    pub center: (f64, f64),
    pub score: f64,
}

impl ScoredElement {
    /// Store form. Snapshot candidates have no structural locator; they are
    /// addressed by coordinates.
    pub fn to_descriptor(&self) -> ElementDescriptor {
        ElementDescriptor {
            id: self.id,
            locator: String::new(),
            tag_or_role: self.tag_or_role.clone(),
            description: self.label.clone(),
            bounds: Some(self.bounds),
            children: Vec::new(),
        }
    }
}

/// Score, deduplicate, and rank the snapshot's laid-out nodes.
pub fn score_snapshot(doc: &SnapshotDocument, viewport: Rect) -> Vec<ScoredElement> {
    let mut candidates = Vec::new();

    for (li, &node) in doc.layout_node_index.iter().enumerate() {
        let rect = doc.layout_bounds[li];
        let area = rect.area();
        if area <= 0.0 {
            continue;
        }
        if area < MIN_BOX_AREA && rect.w < MIN_BOX_DIM && rect.h < MIN_BOX_DIM {
            continue;
        }

        let tag = match doc.tag(node) {
            Some(t) if !t.starts_with('#') => t,
            _ => continue,
        };

        let role = effective_role(
            &tag,
            doc.attr(node, "role"),
            doc.attr(node, "type"),
            doc.attr(node, "href").is_some(),
        );
        let label = resolve_label(doc, node);
        if !ALLOWED_ROLES.contains(&role.as_str()) && label.is_empty() {
            continue;
        }

        candidates.push(ScoredElement {
            id: 0,
            score: score_box(&rect, &role, &viewport),
            center: rect.center(),
            href: doc.attr(node, "href").map(|s| s.to_string()),
            tag_or_role: role,
            label,
            bounds: rect,
        });
    }

    let mut kept = dedup_candidates(candidates);

    kept.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then(a.bounds.y.total_cmp(&b.bounds.y))
    });
    for (i, el) in kept.iter_mut().enumerate() {
        el.id = (i + 1) as u32;
        el.center = el.bounds.center();
    }
    kept
}

/// Greedy duplicate removal in area-descending order. A candidate is dropped
/// when its IOU with an already-kept box exceeds the threshold for the
/// candidate's own size class; the kept set is capped. Running this on its
/// own output changes nothing.
pub fn dedup_candidates(mut candidates: Vec<ScoredElement>) -> Vec<ScoredElement> {
    candidates.sort_by(|a, b| b.bounds.area().total_cmp(&a.bounds.area()));

    let mut kept: Vec<ScoredElement> = Vec::new();
    'next: for cand in candidates {
        if kept.len() >= MAX_CANDIDATES {
            break;
        }
        let threshold = if cand.bounds.area() >= DEDUP_LARGE_AREA {
            IOU_LARGE
        } else {
            IOU_SMALL
        };
        for k in &kept {
            if cand.bounds.iou(&k.bounds) > threshold {
                continue 'next;
            }
        }
        kept.push(cand);
    }
    kept
}

fn effective_role(
    tag: &str,
    role_attr: Option<&str>,
    type_attr: Option<&str>,
    has_href: bool,
) -> String {
    if let Some(role) = role_attr.and_then(|r| r.split_whitespace().next()) {
        if !role.is_empty() {
            return role.to_ascii_lowercase();
        }
    }
    match tag {
        "a" if has_href => "link".to_string(),
        "input" => match type_attr.unwrap_or("text") {
            "checkbox" => "checkbox".to_string(),
            "radio" => "radio".to_string(),
            "button" | "submit" | "reset" => "button".to_string(),
            "range" => "slider".to_string(),
            "search" => "searchbox".to_string(),
            "hidden" => "hidden".to_string(),
            _ => "textbox".to_string(),
        },
        _ => tag.to_string(),
    }
}

/// Scoring-mode label: the attribute list is all we have, so the chain is
/// shorter than the structural walk's.
fn resolve_label(doc: &SnapshotDocument, node: usize) -> String {
    for name in ["aria-label", "placeholder", "alt", "title"] {
        if let Some(v) = doc.attr(node, name) {
            let v = v.trim();
            if !v.is_empty() {
                return v.to_string();
            }
        }
    }
    String::new()
}

fn tag_bonus(role: &str) -> f64 {
    match role {
        "textbox" | "searchbox" | "checkbox" | "radio" | "combobox" | "select"
        | "textarea" | "slider" | "spinbutton" | "switch" | "listbox" => 24.0,
        "button" => 20.0,
        "link" | "menuitem" | "option" | "tab" | "treeitem" | "summary" => 16.0,
        _ => 8.0,
    }
}

fn score_box(rect: &Rect, role: &str, viewport: &Rect) -> f64 {
    let mut score = 0.0;
    if viewport.intersects(rect) {
        score += VIEWPORT_INTERSECT_BONUS;
    }
    if viewport.contains(rect) {
        score += VIEWPORT_CONTAIN_BONUS;
    }

    let mut bonus = tag_bonus(role);
    if rect.w < SMALL_CONTROL_DIM || rect.h < SMALL_CONTROL_DIM {
        bonus /= 2.0;
    }
    score += bonus;

    score += rect.area().log2().min(AREA_BONUS_CAP);

    let (cx, cy) = rect.center();
    let (vx, vy) = viewport.center();
    let dist = ((cx - vx).powi(2) + (cy - vy).powi(2)).sqrt();
    score -= (dist + DISTANCE_BASE).log2();

    score
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn candidate(x: f64, y: f64, w: f64, h: f64, score: f64) -> ScoredElement {
        let bounds = Rect::new(x, y, w, h);
        ScoredElement {
            id: 0,
            tag_or_role: "button".to_string(),
            label: String::new(),
            href: None,
            center: bounds.center(),
            bounds,
            score,
        }
    }

    /// Snapshot with two buttons, one tiny span, and an unlabeled div.
    fn sample_snapshot() -> Value {
        json!({
            "documents": [{
                "nodes": {
                    // 0: BUTTON  1: BUTTON  2: SPAN  3: DIV  4: INPUT
                    "nodeName": [0, 0, 1, 2, 3],
                    "attributes": [
                        [4, 5],        // aria-label="Search"
                        [],
                        [],
                        [],
                        [6, 7]         // type="checkbox"
                    ]
                },
                "layout": {
                    "nodeIndex": [0, 1, 2, 3, 4],
                    "bounds": [
                        [10.0, 10.0, 120.0, 40.0],
                        [10.0, 500.0, 120.0, 40.0],
                        [5.0, 5.0, 8.0, 8.0],
                        [0.0, 0.0, 600.0, 400.0],
                        [200.0, 30.0, 18.0, 18.0]
                    ]
                }
            }],
            "strings": ["BUTTON", "SPAN", "DIV", "INPUT", "aria-label", "Search", "type", "checkbox"]
        })
    }

    #[test]
    fn test_parse_snapshot() {
        let doc = parse_snapshot(&sample_snapshot()).unwrap();
        assert_eq!(doc.node_names.len(), 5);
        assert_eq!(doc.layout_bounds.len(), 5);
        assert_eq!(doc.tag(0).as_deref(), Some("button"));
        assert_eq!(doc.attr(0, "aria-label"), Some("Search"));
        assert_eq!(doc.attr(4, "type"), Some("checkbox"));
        assert_eq!(doc.attr(1, "aria-label"), None);
    }

    #[test]
    fn test_parse_rejects_mismatched_layout() {
        let raw = json!({
            "documents": [{
                "nodes": { "nodeName": [0], "attributes": [[]] },
                "layout": { "nodeIndex": [0, 0], "bounds": [[0, 0, 10, 10]] }
            }],
            "strings": ["DIV"]
        });
        assert!(parse_snapshot(&raw).is_err());
    }

    #[test]
    fn test_filters_and_allowlist() {
        let doc = parse_snapshot(&sample_snapshot()).unwrap();
        let out = score_snapshot(&doc, Rect::new(0.0, 0.0, 800.0, 600.0));
        let roles: Vec<&str> = out.iter().map(|e| e.tag_or_role.as_str()).collect();
        // tiny span dropped by the area filter, bare div dropped by the
        // allow-list; both buttons and the checkbox survive
        assert_eq!(out.len(), 3);
        assert!(roles.contains(&"checkbox"));
        assert!(!roles.contains(&"span"));
        assert!(!roles.contains(&"div"));
    }

    #[test]
    fn test_labeled_div_survives_allowlist() {
        let raw = json!({
            "documents": [{
                "nodes": {
                    "nodeName": [0],
                    "attributes": [[1, 2]]
                },
                "layout": { "nodeIndex": [0], "bounds": [[10, 10, 100, 30]] }
            }],
            "strings": ["DIV", "aria-label", "Open menu"]
        });
        let doc = parse_snapshot(&raw).unwrap();
        let out = score_snapshot(&doc, Rect::new(0.0, 0.0, 800.0, 600.0));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].label, "Open menu");
    }

    #[test]
    fn test_viewport_elements_rank_first() {
        let doc = parse_snapshot(&sample_snapshot()).unwrap();
        // viewport only covers the first button; the second sits below the fold
        let out = score_snapshot(&doc, Rect::new(0.0, 0.0, 800.0, 300.0));
        let first = &out[0];
        assert_eq!(first.id, 1);
        assert!(first.bounds.y < 300.0);
        let below = out
            .iter()
            .find(|e| e.bounds.y == 500.0)
            .expect("below-fold button kept");
        assert!(below.score < first.score);
    }

    #[test]
    fn test_ids_are_one_based_and_sequential() {
        let doc = parse_snapshot(&sample_snapshot()).unwrap();
        let out = score_snapshot(&doc, Rect::new(0.0, 0.0, 800.0, 600.0));
        let ids: Vec<u32> = out.iter().map(|e| e.id).collect();
        assert_eq!(ids, (1..=out.len() as u32).collect::<Vec<_>>());
    }

    #[test]
    fn test_dedup_drops_heavy_overlap() {
        let cands = vec![
            candidate(0.0, 0.0, 100.0, 40.0, 50.0),
            candidate(1.0, 1.0, 100.0, 40.0, 45.0), // near-identical
            candidate(300.0, 300.0, 100.0, 40.0, 40.0),
        ];
        let kept = dedup_candidates(cands);
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn test_small_elements_use_tighter_threshold() {
        // iou of these two ~0.66: duplicates for a small box (0.6) but
        // acceptable for large ones (0.9)
        let small = vec![
            candidate(0.0, 0.0, 40.0, 20.0, 10.0),
            candidate(8.0, 0.0, 40.0, 20.0, 9.0),
        ];
        assert_eq!(dedup_candidates(small).len(), 1);

        let large = vec![
            candidate(0.0, 0.0, 400.0, 200.0, 10.0),
            candidate(80.0, 0.0, 400.0, 200.0, 9.0),
        ];
        assert_eq!(dedup_candidates(large).len(), 2);
    }

    #[test]
    fn test_dedup_is_idempotent() {
        // rows of tightly packed boxes so some survive and some are dropped
        let mut cands = Vec::new();
        for i in 0..30 {
            let x = (i % 6) as f64 * 10.0;
            let y = (i / 6) as f64 * 30.0;
            cands.push(candidate(x, y, 60.0, 24.0, 30.0 - i as f64));
        }
        let once = dedup_candidates(cands);
        assert!(once.len() < 30, "some candidates should be deduplicated");
        let twice = dedup_candidates(once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn test_cap_at_max_candidates() {
        let mut cands = Vec::new();
        for i in 0..(MAX_CANDIDATES + 50) {
            let x = (i % 20) as f64 * 120.0;
            let y = (i / 20) as f64 * 60.0;
            cands.push(candidate(x, y, 100.0, 40.0, 1.0));
        }
        assert_eq!(dedup_candidates(cands).len(), MAX_CANDIDATES);
    }

    #[test]
    fn test_score_ties_break_by_vertical_position() {
        let raw = json!({
            "documents": [{
                "nodes": {
                    "nodeName": [0, 0],
                    "attributes": [[], []]
                },
                "layout": {
                    "nodeIndex": [0, 1],
                    // mirror images around the viewport center line y=50
                    "bounds": [[10, 70, 30, 20], [10, 10, 30, 20]]
                }
            }],
            "strings": ["BUTTON"]
        });
        let doc = parse_snapshot(&raw).unwrap();
        let out = score_snapshot(&doc, Rect::new(0.0, 0.0, 100.0, 100.0));
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].bounds.y, 10.0);
        assert_eq!(out[1].bounds.y, 70.0);
    }

    #[test]
    fn test_descriptor_conversion() {
        let mut el = candidate(10.0, 10.0, 100.0, 40.0, 80.0);
        el.id = 3;
        el.label = "Search".to_string();
        let d = el.to_descriptor();
        assert_eq!(d.id, 3);
        assert_eq!(d.description, "Search");
        assert!(d.locator.is_empty());
        assert_eq!(d.bounds.unwrap().w, 100.0);
    }
}
