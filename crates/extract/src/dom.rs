//! Serialized DOM tree consumed by the structural walk.
//!
//! The host's capture script serializes the live document into this shape:
//! element nodes carry tag/attributes/style bits/bounds, text runs appear as
//! `#text` children, shadow roots and same-origin frame documents hang off
//! their host element. Cross-origin frames are flagged instead of descended.

use serde::Deserialize;
use std::collections::HashMap;

use crate::types::Rect;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PageNode {
    /// Lowercase tag name, or `#text` for text runs.
    pub tag: String,
    pub attrs: HashMap<String, String>,
    /// Text content; only meaningful on `#text` nodes.
    pub text: String,
    /// Resolved opacity, omitted when 1.
    pub opacity: Option<f64>,
    /// Resolved `display`, omitted when unremarkable.
    pub display: Option<String>,
    pub bounds: Option<Rect>,
    /// Set by the capture script when a click listener is registered on the
    /// element (the `onclick` attribute is visible in `attrs` either way).
    pub has_click_handler: bool,
    pub children: Vec<PageNode>,
    /// Shadow-root children. When present they replace `children` for
    /// rendering purposes.
    pub shadow: Vec<PageNode>,
    /// Same-origin frame document element.
    pub frame: Option<Box<PageNode>>,
    /// Frame whose content the capture script could not reach.
    pub cross_origin: bool,
}

impl PageNode {
    pub fn is_text(&self) -> bool {
        self.tag == "#text"
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).map(|s| s.as_str())
    }

    pub fn has_attr(&self, name: &str) -> bool {
        self.attrs.contains_key(name)
    }

    /// Hidden per the pruning rules: display:none, zero opacity, or a
    /// zero-area box with nothing inside that could still paint.
    pub fn is_hidden(&self) -> bool {
        if self.display.as_deref() == Some("none") {
            return true;
        }
        if self.opacity.is_some_and(|o| o <= 0.0) {
            return true;
        }
        if let Some(b) = &self.bounds {
            if b.area() <= 0.0 && self.children.is_empty() && self.shadow.is_empty() {
                return true;
            }
        }
        false
    }
}

/// Test/builder helpers. Handy for constructing trees in unit tests without
/// hand-writing JSON.
impl PageNode {
    pub fn element(tag: &str) -> Self {
        Self {
            tag: tag.to_string(),
            ..Default::default()
        }
    }

    pub fn text_run(text: &str) -> Self {
        Self {
            tag: "#text".to_string(),
            text: text.to_string(),
            ..Default::default()
        }
    }

    pub fn with_attr(mut self, name: &str, value: &str) -> Self {
        self.attrs.insert(name.to_string(), value.to_string());
        self
    }

    pub fn with_bounds(mut self, x: f64, y: f64, w: f64, h: f64) -> Self {
        self.bounds = Some(Rect::new(x, y, w, h));
        self
    }

    pub fn with_child(mut self, child: PageNode) -> Self {
        self.children.push(child);
        self
    }

    pub fn with_text(self, text: &str) -> Self {
        self.with_child(PageNode::text_run(text))
    }
}
