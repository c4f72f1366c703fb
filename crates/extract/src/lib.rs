//! Page-structure extraction: turns live page data into stable, id-addressable
//! element descriptors.
//!
//! Two producers share one output model. The structural walk consumes a
//! serialized DOM tree and emits a text outline plus an id map; the snapshot
//! scorer consumes a flat layout snapshot and emits a ranked candidate list
//! for screenshot overlays. Both feed the per-session [`store::ElementStore`].

pub mod dom;
pub mod score;
pub mod store;
pub mod types;
pub mod walk;

pub use dom::PageNode;
pub use score::{parse_snapshot, score_snapshot, ScoredElement, SnapshotDocument};
pub use store::ElementStore;
pub use types::{ChildDescriptor, ElementDescriptor, IdMap, Rect};
pub use walk::{walk_document, WalkOptions, WalkResult};

/// Truncate on a char boundary at or before `max_chars` bytes.
pub fn safe_truncate(s: &str, max_chars: usize) -> &str {
    if s.len() <= max_chars {
        return s;
    }
    let mut end = max_chars;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safe_truncate_multibyte() {
        let s = "héllo wörld";
        let t = safe_truncate(s, 3);
        assert!(t.len() <= 3);
        assert!(s.starts_with(t));
    }
}
