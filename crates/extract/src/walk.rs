//! Structural walk: depth-first traversal of a serialized document tree
//! producing a text outline plus an id → descriptor map.
//!
//! Recursion state (depth, selector path, interactive ancestor, wrapping
//! label) travels in an immutable [`Ctx`] cloned per child; the walker itself
//! only accumulates output. Locators are minimal CSS paths anchored at the
//! nearest `id` attribute, with ` >>> ` marking descent into a shadow root or
//! a same-origin frame document.

use std::collections::HashMap;

use crate::dom::PageNode;
use crate::safe_truncate;
use crate::types::{ChildDescriptor, ElementDescriptor, IdMap};

/// Tags that never render and are skipped outright.
const SKIP_TAGS: &[&str] = &[
    "script", "style", "meta", "link", "head", "title", "noscript", "template",
    "base", "source", "track", "param",
];

/// ARIA roles treated as interactive regardless of tag.
const INTERACTIVE_ROLES: &[&str] = &[
    "button", "link", "textbox", "searchbox", "combobox", "listbox",
    "menuitem", "menuitemcheckbox", "menuitemradio", "option",
    "radio", "checkbox", "switch", "slider", "spinbutton",
    "tab", "treeitem",
];

#[derive(Debug, Clone)]
pub struct WalkOptions {
    /// Traversal depth bound; deeper subtrees are skipped with a warning.
    pub max_depth: usize,
    /// Byte bound on human descriptions.
    pub max_name_len: usize,
}

impl Default for WalkOptions {
    fn default() -> Self {
        Self {
            max_depth: 64,
            max_name_len: 80,
        }
    }
}

#[derive(Debug)]
pub struct WalkResult {
    /// One line per recorded element, landmark, or heading.
    pub outline: String,
    pub map: IdMap,
    pub warnings: Vec<String>,
    /// Id cursor after this pass; feed it back in as the next pass's
    /// `start_counter` so ids are never reused within a session.
    pub counter: u32,
}

/// Walk a captured document. `start_counter` is the last id already handed
/// out for this session; the first element recorded here gets
/// `start_counter + 1`.
pub fn walk_document(root: &PageNode, start_counter: u32, opts: &WalkOptions) -> WalkResult {
    let labels = LabelIndex::build(root);
    let mut walker = Walker {
        opts,
        labels,
        out: String::new(),
        map: IdMap::new(),
        counter: start_counter,
        depth_hits: 0,
        cross_origin_hits: 0,
    };

    let root_ctx = Ctx {
        depth: 0,
        indent: 0,
        path: segment(root, 1),
        interactive_ancestor: None,
        wrapping_label: None,
    };
    walker.visit(root, &root_ctx);

    let mut warnings = Vec::new();
    if walker.depth_hits > 0 {
        warnings.push(format!(
            "traversal depth limit ({}) reached; {} subtree(s) skipped",
            opts.max_depth, walker.depth_hits
        ));
    }
    if walker.cross_origin_hits > 0 {
        warnings.push(format!(
            "{} cross-origin frame(s) skipped",
            walker.cross_origin_hits
        ));
    }

    WalkResult {
        outline: walker.out,
        map: walker.map,
        warnings,
        counter: walker.counter,
    }
}

/// Immutable per-call traversal state.
#[derive(Debug, Clone)]
struct Ctx {
    depth: usize,
    indent: usize,
    /// Selector path of the node being visited.
    path: String,
    /// Id of the nearest recorded interactive ancestor, when inside one.
    interactive_ancestor: Option<u32>,
    /// Text of the nearest enclosing `<label>`, for native association.
    wrapping_label: Option<String>,
}

struct Walker<'a> {
    opts: &'a WalkOptions,
    labels: LabelIndex<'a>,
    out: String,
    map: IdMap,
    counter: u32,
    depth_hits: usize,
    cross_origin_hits: usize,
}

impl<'a> Walker<'a> {
    fn visit(&mut self, node: &'a PageNode, ctx: &Ctx) {
        if node.is_text() || SKIP_TAGS.contains(&node.tag.as_str()) {
            return;
        }
        if node.is_hidden() {
            return;
        }
        if ctx.depth >= self.opts.max_depth {
            self.depth_hits += 1;
            return;
        }

        if let Some(role) = landmark_role(node, &self.labels) {
            let name = self.bounded(&explicit_name(node, &self.labels));
            if name.is_empty() {
                self.line(ctx.indent, &format!("[{}]", role));
            } else {
                self.line(ctx.indent, &format!("[{} \"{}\"]", role, name));
            }
            self.visit_children(node, ctx, ctx.indent + 1);
            self.line(ctx.indent, &format!("[/{}]", role));
            return;
        }

        if let Some(level) = heading_level(node) {
            let name = self.bounded(&accessible_name(node, ctx, &self.labels));
            self.line(
                ctx.indent,
                &format!("- heading \"{}\" [level={}]", name, level),
            );
            self.visit_children(node, ctx, ctx.indent + 1);
            return;
        }

        if is_interactive(node) {
            let role = tag_or_role(node);
            let name = self.bounded(&accessible_name(node, ctx, &self.labels));
            let annotations = annotations(node);

            if let Some(ancestor_id) = ctx.interactive_ancestor {
                // Nested inside a recorded element: fold, no id of its own.
                self.line(
                    ctx.indent,
                    &render_line(&role, &name, None, &annotations),
                );
                if let Some(parent) = self.map.get_mut(&ancestor_id) {
                    parent.children.push(ChildDescriptor {
                        tag_or_role: role,
                        description: name,
                        locator: Some(ctx.path.clone()),
                    });
                }
                self.visit_children(node, ctx, ctx.indent + 1);
            } else {
                self.counter += 1;
                let id = self.counter;
                self.line(
                    ctx.indent,
                    &render_line(&role, &name, Some(id), &annotations),
                );
                self.map.insert(
                    id,
                    ElementDescriptor {
                        id,
                        locator: ctx.path.clone(),
                        tag_or_role: role,
                        description: name,
                        bounds: node.bounds,
                        children: Vec::new(),
                    },
                );
                let child_ctx = Ctx {
                    interactive_ancestor: Some(id),
                    ..ctx.clone()
                };
                self.visit_children(node, &child_ctx, ctx.indent + 1);
            }
            return;
        }

        // Plain container: descend without emitting a line. A <label> hands
        // its text down for native form-control association.
        if node.tag == "label" {
            let label_text = collect_text(node);
            let child_ctx = Ctx {
                wrapping_label: if label_text.is_empty() {
                    ctx.wrapping_label.clone()
                } else {
                    Some(label_text)
                },
                ..ctx.clone()
            };
            self.visit_children(node, &child_ctx, ctx.indent);
        } else {
            self.visit_children(node, ctx, ctx.indent);
        }
    }

    fn visit_children(&mut self, node: &'a PageNode, ctx: &Ctx, indent: usize) {
        let shadow = !node.shadow.is_empty();
        let kids: &'a [PageNode] = if shadow { &node.shadow } else { &node.children };

        let mut tag_counts: HashMap<&str, usize> = HashMap::new();
        for child in kids {
            if child.is_text() {
                continue;
            }
            let count = tag_counts.entry(child.tag.as_str()).or_insert(0);
            *count += 1;
            let seg = segment(child, *count);
            let child_ctx = Ctx {
                depth: ctx.depth + 1,
                indent,
                path: child_path(&ctx.path, &seg, shadow),
                interactive_ancestor: ctx.interactive_ancestor,
                wrapping_label: ctx.wrapping_label.clone(),
            };
            self.visit(child, &child_ctx);
        }

        if let Some(frame_doc) = &node.frame {
            let seg = segment(frame_doc, 1);
            let child_ctx = Ctx {
                depth: ctx.depth + 1,
                indent,
                path: child_path(&ctx.path, &seg, true),
                interactive_ancestor: ctx.interactive_ancestor,
                wrapping_label: None,
            };
            self.visit(frame_doc, &child_ctx);
        }
        if node.cross_origin {
            self.cross_origin_hits += 1;
        }
    }

    fn line(&mut self, indent: usize, text: &str) {
        for _ in 0..indent {
            self.out.push_str("  ");
        }
        self.out.push_str(text);
        self.out.push('\n');
    }

    fn bounded(&self, name: &str) -> String {
        let max = self.opts.max_name_len;
        if name.len() > max {
            format!("{}...", safe_truncate(name, max.saturating_sub(3)))
        } else {
            name.to_string()
        }
    }
}

fn render_line(role: &str, name: &str, id: Option<u32>, annotations: &str) -> String {
    let mut line = format!("- {}", role);
    if !name.is_empty() {
        line.push_str(&format!(" \"{}\"", name));
    }
    if let Some(id) = id {
        line.push_str(&format!(" [id={}]", id));
    }
    line.push_str(annotations);
    line
}

fn annotations(node: &PageNode) -> String {
    let mut out = String::new();
    if node.has_attr("checked") {
        out.push_str(" [checked]");
    }
    if node.has_attr("disabled") {
        out.push_str(" [disabled]");
    }
    if let Some(value) = node.attr("value") {
        if !value.is_empty() {
            let shown = if value.len() > 60 {
                format!("{}...", safe_truncate(value, 57))
            } else {
                value.to_string()
            };
            out.push_str(&format!(" value=\"{}\"", shown));
        }
    }
    out
}

// ─── Classification ───

fn aria_role(node: &PageNode) -> Option<&str> {
    node.attr("role")
        .and_then(|r| r.split_whitespace().next())
        .filter(|r| !r.is_empty())
}

fn is_interactive(node: &PageNode) -> bool {
    match node.tag.as_str() {
        "a" => {
            if node.has_attr("href") {
                return true;
            }
        }
        "button" | "select" | "textarea" | "summary" | "option" => return true,
        "input" => {
            if node.attr("type").map_or(true, |t| t != "hidden") {
                return true;
            }
        }
        _ => {}
    }
    if let Some(role) = aria_role(node) {
        if INTERACTIVE_ROLES.iter().any(|r| r.eq_ignore_ascii_case(role)) {
            return true;
        }
    }
    if matches!(node.attr("contenteditable"), Some("") | Some("true")) {
        return true;
    }
    if node.has_click_handler || node.has_attr("onclick") {
        return true;
    }
    if let Some(ti) = node.attr("tabindex") {
        if ti.parse::<i32>().map_or(false, |v| v >= 0) {
            return true;
        }
    }
    false
}

fn landmark_role(node: &PageNode, labels: &LabelIndex) -> Option<String> {
    let unconditional = |role: &str| -> Option<String> {
        matches!(
            role,
            "banner" | "navigation" | "main" | "complementary" | "contentinfo" | "search"
        )
        .then(|| role.to_string())
    };

    // A generic section/form only counts when it carries an explicit name
    // or contains a heading/legend.
    let conditional = |role: &str, node: &PageNode| -> Option<String> {
        let named = !explicit_name(node, labels).is_empty();
        if named || subtree_has_heading_or_legend(node) {
            Some(role.to_string())
        } else {
            None
        }
    };

    if let Some(role) = aria_role(node) {
        if let Some(found) = unconditional(role) {
            return Some(found);
        }
        match role {
            "form" => return conditional("form", node),
            "region" => return conditional("region", node),
            _ => return None,
        }
    }

    match node.tag.as_str() {
        "header" => Some("banner".to_string()),
        "nav" => Some("navigation".to_string()),
        "main" => Some("main".to_string()),
        "aside" => Some("complementary".to_string()),
        "footer" => Some("contentinfo".to_string()),
        "search" => Some("search".to_string()),
        "form" => conditional("form", node),
        "section" => conditional("region", node),
        _ => None,
    }
}

fn heading_level(node: &PageNode) -> Option<u8> {
    match node.tag.as_str() {
        "h1" => Some(1),
        "h2" => Some(2),
        "h3" => Some(3),
        "h4" => Some(4),
        "h5" => Some(5),
        "h6" => Some(6),
        _ => {
            if aria_role(node) == Some("heading") {
                Some(
                    node.attr("aria-level")
                        .and_then(|l| l.parse().ok())
                        .unwrap_or(2),
                )
            } else {
                None
            }
        }
    }
}

fn tag_or_role(node: &PageNode) -> String {
    if let Some(role) = aria_role(node) {
        return role.to_string();
    }
    match node.tag.as_str() {
        "a" => "link".to_string(),
        "input" => match node.attr("type").unwrap_or("text") {
            "checkbox" => "checkbox".to_string(),
            "radio" => "radio".to_string(),
            "button" | "submit" | "reset" => "button".to_string(),
            "range" => "slider".to_string(),
            "search" => "searchbox".to_string(),
            _ => "textbox".to_string(),
        },
        _ => {
            if matches!(node.attr("contenteditable"), Some("") | Some("true")) {
                "textbox".to_string()
            } else {
                node.tag.clone()
            }
        }
    }
}

fn subtree_has_heading_or_legend(node: &PageNode) -> bool {
    for child in node.children.iter().chain(node.shadow.iter()) {
        if child.is_text() {
            continue;
        }
        if heading_level(child).is_some() || child.tag == "legend" {
            return true;
        }
        if subtree_has_heading_or_legend(child) {
            return true;
        }
    }
    false
}

// ─── Accessible names ───

/// Name sources that count as explicit (used for landmark naming and the
/// section/form condition): label references, label attribute, title.
fn explicit_name(node: &PageNode, labels: &LabelIndex) -> String {
    if let Some(refs) = node.attr("aria-labelledby") {
        let joined = labels.resolve_refs(refs);
        if !joined.is_empty() {
            return joined;
        }
    }
    if let Some(label) = node.attr("aria-label") {
        let label = normalize(label);
        if !label.is_empty() {
            return label;
        }
    }
    if let Some(title) = node.attr("title") {
        let title = normalize(title);
        if !title.is_empty() {
            return title;
        }
    }
    String::new()
}

/// Prioritized name computation; first non-empty source wins.
fn accessible_name(node: &PageNode, ctx: &Ctx, labels: &LabelIndex) -> String {
    // 1. explicit label references
    if let Some(refs) = node.attr("aria-labelledby") {
        let joined = labels.resolve_refs(refs);
        if !joined.is_empty() {
            return joined;
        }
    }
    // 2. explicit label attribute
    if let Some(label) = node.attr("aria-label") {
        let label = normalize(label);
        if !label.is_empty() {
            return label;
        }
    }
    // 3. native form-label association
    if matches!(node.tag.as_str(), "input" | "select" | "textarea") {
        if let Some(id) = node.attr("id") {
            if let Some(text) = labels.label_for.get(id) {
                if !text.is_empty() {
                    return text.clone();
                }
            }
        }
        if let Some(wrapped) = &ctx.wrapping_label {
            if !wrapped.is_empty() {
                return wrapped.clone();
            }
        }
    }
    // 4. placeholder
    if let Some(placeholder) = node.attr("placeholder") {
        let placeholder = normalize(placeholder);
        if !placeholder.is_empty() {
            return placeholder;
        }
    }
    // 5. alt text
    if let Some(alt) = node.attr("alt") {
        let alt = normalize(alt);
        if !alt.is_empty() {
            return alt;
        }
    }
    // 6. caption
    for child in &node.children {
        if matches!(child.tag.as_str(), "caption" | "figcaption") {
            let text = collect_text(child);
            if !text.is_empty() {
                return text;
            }
        }
    }
    // 7. visible text content
    let text = collect_text(node);
    if !text.is_empty() {
        return text;
    }
    // 8. title attribute
    if let Some(title) = node.attr("title") {
        return normalize(title);
    }
    String::new()
}

const TEXT_BUDGET: usize = 400;

/// Concatenated visible text runs of a subtree, whitespace-normalized.
fn collect_text(node: &PageNode) -> String {
    let mut out = String::new();
    collect_text_into(node, &mut out);
    out
}

fn collect_text_into(node: &PageNode, out: &mut String) {
    if out.len() >= TEXT_BUDGET {
        return;
    }
    let kids = if node.shadow.is_empty() {
        &node.children
    } else {
        &node.shadow
    };
    for child in kids {
        if child.is_text() {
            let t = normalize(&child.text);
            if !t.is_empty() {
                if !out.is_empty() {
                    out.push(' ');
                }
                out.push_str(&t);
            }
        } else if !SKIP_TAGS.contains(&child.tag.as_str()) && !child.is_hidden() {
            collect_text_into(child, out);
        }
        if out.len() >= TEXT_BUDGET {
            return;
        }
    }
}

fn normalize(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ─── Label index ───

struct LabelIndex<'a> {
    /// `<label for="…">` text keyed by target id.
    label_for: HashMap<&'a str, String>,
    /// Every element carrying an id, for aria-labelledby resolution.
    by_id: HashMap<&'a str, &'a PageNode>,
}

impl<'a> LabelIndex<'a> {
    fn build(root: &'a PageNode) -> Self {
        let mut index = LabelIndex {
            label_for: HashMap::new(),
            by_id: HashMap::new(),
        };
        index.scan(root);
        index
    }

    fn scan(&mut self, node: &'a PageNode) {
        if let Some(id) = node.attr("id") {
            self.by_id.entry(id).or_insert(node);
        }
        if node.tag == "label" {
            if let Some(target) = node.attr("for") {
                self.label_for
                    .entry(target)
                    .or_insert_with(|| collect_text(node));
            }
        }
        for child in node.children.iter().chain(node.shadow.iter()) {
            self.scan(child);
        }
        if let Some(frame_doc) = &node.frame {
            self.scan(frame_doc);
        }
    }

    fn resolve_refs(&self, refs: &str) -> String {
        let mut parts = Vec::new();
        for id in refs.split_whitespace() {
            if let Some(node) = self.by_id.get(id) {
                let text = collect_text(node);
                if !text.is_empty() {
                    parts.push(text);
                }
            }
        }
        parts.join(" ")
    }
}

// ─── Locators ───

fn segment(node: &PageNode, nth: usize) -> String {
    if let Some(id) = node.attr("id") {
        if !id.is_empty() {
            return id_selector(id);
        }
    }
    match node.tag.as_str() {
        // unique per document, keep the path short
        "html" | "body" | "head" => node.tag.clone(),
        _ => format!("{}:nth-of-type({})", node.tag, nth),
    }
}

fn id_selector(id: &str) -> String {
    let simple = id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        && id.chars().next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    if simple {
        format!("#{}", id)
    } else {
        format!("[id=\"{}\"]", id.replace('\\', "\\\\").replace('"', "\\\""))
    }
}

fn child_path(parent: &str, seg: &str, boundary: bool) -> String {
    if seg.starts_with('#') || seg.starts_with("[id=") {
        // id anchors restart the chain; minimal beats fully qualified
        return seg.to_string();
    }
    if parent.is_empty() {
        return seg.to_string();
    }
    if boundary {
        format!("{} >>> {}", parent, seg)
    } else {
        format!("{} > {}", parent, seg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(body_children: Vec<PageNode>) -> PageNode {
        let mut body = PageNode::element("body");
        body.children = body_children;
        PageNode::element("html").with_child(body)
    }

    fn walk(root: &PageNode) -> WalkResult {
        walk_document(root, 0, &WalkOptions::default())
    }

    #[test]
    fn test_blank_page_has_no_ids() {
        let root = doc(vec![]);
        let res = walk(&root);
        assert!(res.map.is_empty());
        assert!(!res.outline.contains("[id="));
        assert_eq!(res.counter, 0);
    }

    #[test]
    fn test_single_button_gets_id_one() {
        let root = doc(vec![PageNode::element("button").with_text("Submit")]);
        let res = walk(&root);
        assert_eq!(res.map.len(), 1);
        let d = res.map.get(&1).unwrap();
        assert_eq!(d.tag_or_role, "button");
        assert_eq!(d.description, "Submit");
        assert!(res.outline.contains("- button \"Submit\" [id=1]"));
        assert_eq!(res.counter, 1);
    }

    #[test]
    fn test_counter_continues_across_passes() {
        let root = doc(vec![PageNode::element("button").with_text("Go")]);
        let first = walk(&root);
        assert!(first.map.contains_key(&1));
        let second = walk_document(&root, first.counter, &WalkOptions::default());
        assert!(second.map.contains_key(&2));
        assert!(!second.map.contains_key(&1));
    }

    #[test]
    fn test_nested_interactive_folds_into_ancestor() {
        let card = PageNode::element("a")
            .with_attr("href", "/item")
            .with_text("Item")
            .with_child(PageNode::element("button").with_text("Buy"));
        let root = doc(vec![card]);
        let res = walk(&root);
        assert_eq!(res.map.len(), 1);
        let link = res.map.get(&1).unwrap();
        assert_eq!(link.tag_or_role, "link");
        assert_eq!(link.children.len(), 1);
        assert_eq!(link.children[0].tag_or_role, "button");
        assert_eq!(link.children[0].description, "Buy");
        // the folded button appears in the outline without an id
        assert!(res.outline.contains("- button \"Buy\"\n"));
        assert!(!res.outline.contains("- button \"Buy\" [id="));
    }

    #[test]
    fn test_select_options_fold_as_children() {
        let select = PageNode::element("select")
            .with_attr("id", "color")
            .with_child(PageNode::element("option").with_text("Red"))
            .with_child(PageNode::element("option").with_text("Blue"));
        let root = doc(vec![select]);
        let res = walk(&root);
        assert_eq!(res.map.len(), 1);
        let d = res.map.get(&1).unwrap();
        assert_eq!(d.locator, "#color");
        assert_eq!(d.children.len(), 2);
        assert_eq!(d.children[1].description, "Blue");
    }

    #[test]
    fn test_hidden_subtrees_pruned() {
        let mut hidden = PageNode::element("div")
            .with_child(PageNode::element("button").with_text("Ghost"));
        hidden.display = Some("none".to_string());
        let mut faded = PageNode::element("div")
            .with_child(PageNode::element("button").with_text("Faded"));
        faded.opacity = Some(0.0);
        let root = doc(vec![
            hidden,
            faded,
            PageNode::element("button").with_text("Real"),
        ]);
        let res = walk(&root);
        assert_eq!(res.map.len(), 1);
        assert_eq!(res.map.get(&1).unwrap().description, "Real");
    }

    #[test]
    fn test_skip_tags_never_walked() {
        let script = PageNode::element("script").with_text("var x = 1;");
        let root = doc(vec![script, PageNode::element("button").with_text("Ok")]);
        let res = walk(&root);
        assert!(!res.outline.contains("var x"));
        assert_eq!(res.map.len(), 1);
    }

    #[test]
    fn test_aria_label_beats_placeholder() {
        let input = PageNode::element("input")
            .with_attr("aria-label", "Search the site")
            .with_attr("placeholder", "type here");
        let root = doc(vec![input]);
        let res = walk(&root);
        assert_eq!(res.map.get(&1).unwrap().description, "Search the site");
    }

    #[test]
    fn test_native_label_association_by_for() {
        let label = PageNode::element("label")
            .with_attr("for", "email")
            .with_text("Email address");
        let input = PageNode::element("input").with_attr("id", "email");
        let root = doc(vec![label, input]);
        let res = walk(&root);
        assert_eq!(res.map.get(&1).unwrap().description, "Email address");
        assert_eq!(res.map.get(&1).unwrap().locator, "#email");
    }

    #[test]
    fn test_wrapping_label_association() {
        let wrapped = PageNode::element("label")
            .with_text("Remember me")
            .with_child(PageNode::element("input").with_attr("type", "checkbox"));
        let root = doc(vec![wrapped]);
        let res = walk(&root);
        let d = res.map.get(&1).unwrap();
        assert_eq!(d.tag_or_role, "checkbox");
        assert_eq!(d.description, "Remember me");
    }

    #[test]
    fn test_name_truncated() {
        let long = "x".repeat(200);
        let button = PageNode::element("button").with_text(&long);
        let root = doc(vec![button]);
        let res = walk(&root);
        let d = res.map.get(&1).unwrap();
        assert!(d.description.len() <= 80);
        assert!(d.description.ends_with("..."));
    }

    #[test]
    fn test_landmarks_bracketed() {
        let nav = PageNode::element("nav")
            .with_attr("aria-label", "Main")
            .with_child(
                PageNode::element("a").with_attr("href", "/").with_text("Home"),
            );
        let root = doc(vec![nav]);
        let res = walk(&root);
        assert!(res.outline.contains("[navigation \"Main\"]"));
        assert!(res.outline.contains("[/navigation]"));
        // content is indented inside the brackets
        assert!(res.outline.contains("  - link \"Home\" [id=1]"));
    }

    #[test]
    fn test_plain_section_is_not_a_landmark() {
        let bare = PageNode::element("section").with_text("just text");
        let named = PageNode::element("section")
            .with_attr("aria-label", "Results")
            .with_text("stuff");
        let root = doc(vec![bare, named]);
        let res = walk(&root);
        // only the named section opens a landmark
        assert_eq!(res.outline.matches("[region \"Results\"]").count(), 1);
        assert_eq!(res.outline.matches("[/region]").count(), 1);
    }

    #[test]
    fn test_section_with_heading_is_a_landmark() {
        let section = PageNode::element("section")
            .with_child(PageNode::element("h2").with_text("News"));
        let root = doc(vec![section]);
        let res = walk(&root);
        assert!(res.outline.contains("[region]"));
        assert!(res.outline.contains("- heading \"News\" [level=2]"));
    }

    #[test]
    fn test_nth_of_type_chain() {
        let root = doc(vec![
            PageNode::element("button").with_text("One"),
            PageNode::element("button").with_text("Two"),
        ]);
        let res = walk(&root);
        assert_eq!(
            res.map.get(&2).unwrap().locator,
            "html > body > button:nth-of-type(2)"
        );
    }

    #[test]
    fn test_shadow_content_walked_with_marker() {
        let mut host = PageNode::element("my-widget").with_attr("id", "w");
        host.shadow = vec![PageNode::element("button").with_text("Inside")];
        let root = doc(vec![host]);
        let res = walk(&root);
        let d = res.map.get(&1).unwrap();
        assert_eq!(d.description, "Inside");
        assert_eq!(d.locator, "#w >>> button:nth-of-type(1)");
    }

    #[test]
    fn test_same_origin_frame_walked() {
        let inner = PageNode::element("html").with_child(
            PageNode::element("body")
                .with_child(PageNode::element("button").with_text("Framed")),
        );
        let mut iframe = PageNode::element("iframe").with_attr("id", "f");
        iframe.frame = Some(Box::new(inner));
        let root = doc(vec![iframe]);
        let res = walk(&root);
        let d = res.map.get(&1).unwrap();
        assert_eq!(d.description, "Framed");
        assert!(d.locator.starts_with("#f >>> "));
        assert!(res.warnings.is_empty());
    }

    #[test]
    fn test_cross_origin_frame_warns_but_succeeds() {
        let mut iframe = PageNode::element("iframe");
        iframe.cross_origin = true;
        let root = doc(vec![iframe, PageNode::element("button").with_text("Ok")]);
        let res = walk(&root);
        assert_eq!(res.map.len(), 1);
        assert_eq!(res.warnings.len(), 1);
        assert!(res.warnings[0].contains("cross-origin"));
    }

    #[test]
    fn test_depth_limit_warns() {
        let mut node = PageNode::element("button").with_text("Deep");
        for _ in 0..10 {
            node = PageNode::element("div").with_child(node);
        }
        let root = doc(vec![node]);
        let opts = WalkOptions {
            max_depth: 5,
            ..Default::default()
        };
        let res = walk_document(&root, 0, &opts);
        assert!(res.map.is_empty());
        assert_eq!(res.warnings.len(), 1);
        assert!(res.warnings[0].contains("depth limit"));
    }

    #[test]
    fn test_click_handler_div_is_interactive() {
        let mut div = PageNode::element("div").with_text("Open menu");
        div.has_click_handler = true;
        let root = doc(vec![div]);
        let res = walk(&root);
        assert_eq!(res.map.len(), 1);
        assert_eq!(res.map.get(&1).unwrap().tag_or_role, "div");
    }

    #[test]
    fn test_checked_and_disabled_annotations() {
        let cb = PageNode::element("input")
            .with_attr("type", "checkbox")
            .with_attr("checked", "")
            .with_attr("aria-label", "Agree");
        let btn = PageNode::element("button")
            .with_attr("disabled", "")
            .with_text("Send");
        let root = doc(vec![cb, btn]);
        let res = walk(&root);
        assert!(res.outline.contains("- checkbox \"Agree\" [id=1] [checked]"));
        assert!(res.outline.contains("- button \"Send\" [id=2] [disabled]"));
    }
}
