//! Per-session element reference maps.
//!
//! Each extraction pass publishes a full map of id to descriptor; `put`
//! replaces the previous map wholesale, so ids handed out by an earlier pass
//! stop resolving the moment a new pass lands.

use std::collections::HashMap;

use tabrelay_core::{Error, Result};

use crate::types::{ElementDescriptor, IdMap};

#[derive(Debug, Default)]
pub struct ElementStore {
    maps: HashMap<String, IdMap>,
}

impl ElementStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, session: &str, map: IdMap) {
        self.maps.insert(session.to_string(), map);
    }

    /// Missing session and missing id produce the same error; callers cannot
    /// tell a cleared map from a stale id, and should re-extract either way.
    pub fn get(&self, session: &str, id: u32) -> Result<&ElementDescriptor> {
        self.maps
            .get(session)
            .and_then(|m| m.get(&id))
            .ok_or_else(|| Error::NotFound(format!("element {id} not found in map")))
    }

    pub fn clear(&mut self, session: &str) {
        self.maps.remove(session);
    }

    pub fn count(&self, session: &str) -> usize {
        self.maps.get(session).map(|m| m.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn descriptor(id: u32, locator: &str) -> ElementDescriptor {
        ElementDescriptor {
            id,
            locator: locator.to_string(),
            tag_or_role: "button".to_string(),
            description: "Submit".to_string(),
            bounds: None,
            children: Vec::new(),
        }
    }

    fn map_of(ids: &[u32]) -> IdMap {
        let mut m = BTreeMap::new();
        for &id in ids {
            m.insert(id, descriptor(id, &format!("#el-{id}")));
        }
        m
    }

    #[test]
    fn test_put_then_get() {
        let mut store = ElementStore::new();
        store.put("a1", map_of(&[1, 2, 3]));
        assert_eq!(store.get("a1", 2).unwrap().locator, "#el-2");
        assert_eq!(store.count("a1"), 3);
    }

    #[test]
    fn test_put_replaces_wholesale() {
        let mut store = ElementStore::new();
        store.put("a1", map_of(&[1, 2, 3]));
        store.put("a1", map_of(&[4, 5]));
        assert_eq!(store.count("a1"), 2);
        let err = store.get("a1", 2).unwrap_err();
        assert_eq!(err.to_string(), "Not found: element 2 not found in map");
    }

    #[test]
    fn test_clear_then_get_fails() {
        let mut store = ElementStore::new();
        store.put("a1", map_of(&[7]));
        store.clear("a1");
        let err = store.get("a1", 7).unwrap_err();
        assert_eq!(err.to_string(), "Not found: element 7 not found in map");
        assert_eq!(store.count("a1"), 0);
    }

    #[test]
    fn test_unknown_session_reads_like_stale_id() {
        let store = ElementStore::new();
        let err = store.get("nope", 1).unwrap_err();
        assert!(err.to_string().contains("element 1 not found in map"));
    }

    #[test]
    fn test_sessions_are_isolated() {
        let mut store = ElementStore::new();
        store.put("a1", map_of(&[1]));
        store.put("b2", map_of(&[1, 2]));
        store.clear("a1");
        assert!(store.get("a1", 1).is_err());
        assert_eq!(store.count("b2"), 2);
    }
}
