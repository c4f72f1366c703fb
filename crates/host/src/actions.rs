//! In-page script builders for element actions and page capture.
//!
//! Locators are `>>>`-separated CSS segment chains; each boundary pierces
//! into a shadow root or a same-origin frame document. Every script is a
//! self-contained IIFE returning `{ ok: true, ... }` or
//! `{ ok: false, error }` so the dispatcher can surface page-side failures
//! uniformly. Values are embedded JSON-escaped, never spliced raw.

use serde_json::json;

/// Expression for the page's current address.
pub const CURRENT_URL_JS: &str = "window.location.href";

/// Expression for the full serialized markup.
pub const RAW_MARKUP_JS: &str = "document.documentElement.outerHTML";

/// Expression for the current scroll offset, used to translate stored
/// document coordinates into viewport coordinates.
pub const SCROLL_OFFSET_JS: &str = "({ x: window.scrollX, y: window.scrollY })";

/// Resolver prologue shared by all element scripts. Leaves `el` bound to
/// the matched element or returns the failure object.
fn locator_prologue(locator: &str) -> String {
    let segments: Vec<&str> = locator.split(" >>> ").collect();
    let segments_json = json!(segments).to_string();
    format!(
        "const segments = {segments_json};\n\
         let root = document;\n\
         let el = null;\n\
         for (const sel of segments) {{\n\
           el = root.querySelector(sel);\n\
           if (!el) return {{ ok: false, error: \"no element matches \" + sel }};\n\
           root = el.shadowRoot || el.contentDocument || el;\n\
         }}"
    )
}

fn wrap(body: String) -> String {
    format!("(() => {{\n{body}\n}})()")
}

/// Scroll the element into view and report its viewport-relative center.
pub fn locate_center_js(locator: &str) -> String {
    let prologue = locator_prologue(locator);
    wrap(format!(
        "{prologue}\n\
         el.scrollIntoView({{ block: \"center\", inline: \"center\", behavior: \"instant\" }});\n\
         const r = el.getBoundingClientRect();\n\
         if (r.width === 0 && r.height === 0) return {{ ok: false, error: \"element has no layout box\" }};\n\
         return {{ ok: true, x: r.x + r.width / 2, y: r.y + r.height / 2, width: r.width, height: r.height }};"
    ))
}

/// Set a form control's value (or an editable region's text) wholesale and
/// fire the events frameworks listen for.
pub fn fill_js(locator: &str, value: &str) -> String {
    let prologue = locator_prologue(locator);
    let value_json = json!(value).to_string();
    wrap(format!(
        "{prologue}\n\
         const value = {value_json};\n\
         const tag = el.tagName.toLowerCase();\n\
         if (el.isContentEditable) {{\n\
           el.focus();\n\
           el.textContent = value;\n\
         }} else if (tag === \"input\" || tag === \"textarea\" || tag === \"select\") {{\n\
           el.focus();\n\
           el.value = value;\n\
         }} else {{\n\
           return {{ ok: false, error: \"element is not fillable: \" + tag }};\n\
         }}\n\
         el.dispatchEvent(new Event(\"input\", {{ bubbles: true }}));\n\
         el.dispatchEvent(new Event(\"change\", {{ bubbles: true }}));\n\
         return {{ ok: true }};"
    ))
}

/// Toggle a checkbox or radio toward the desired state via a real click so
/// attached handlers run.
pub fn set_checked_js(locator: &str, checked: bool) -> String {
    let prologue = locator_prologue(locator);
    wrap(format!(
        "{prologue}\n\
         const desired = {checked};\n\
         if (el.checked === undefined && el.getAttribute(\"role\") !== \"checkbox\") {{\n\
           return {{ ok: false, error: \"element is not checkable\" }};\n\
         }}\n\
         if (el.checked !== desired) el.click();\n\
         return {{ ok: true, checked: el.checked === undefined ? desired : el.checked }};"
    ))
}

/// Focus the element, optionally selecting its current content so typed
/// text replaces it.
pub fn focus_js(locator: &str, select_all: bool) -> String {
    let prologue = locator_prologue(locator);
    wrap(format!(
        "{prologue}\n\
         el.focus();\n\
         if ({select_all}) {{\n\
           if (typeof el.select === \"function\") {{\n\
             el.select();\n\
           }} else if (el.isContentEditable) {{\n\
             const range = document.createRange();\n\
             range.selectNodeContents(el);\n\
             const sel = window.getSelection();\n\
             sel.removeAllRanges();\n\
             sel.addRange(range);\n\
           }}\n\
         }}\n\
         return {{ ok: true }};"
    ))
}

/// Scroll an element or, with no locator, the window.
pub fn scroll_js(locator: Option<&str>, dx: i64, dy: i64) -> String {
    match locator {
        Some(locator) => {
            let prologue = locator_prologue(locator);
            wrap(format!(
                "{prologue}\n\
                 el.scrollBy({{ left: {dx}, top: {dy}, behavior: \"instant\" }});\n\
                 return {{ ok: true, x: el.scrollLeft, y: el.scrollTop }};"
            ))
        }
        None => wrap(format!(
            "window.scrollBy({{ left: {dx}, top: {dy}, behavior: \"instant\" }});\n\
             return {{ ok: true, x: window.scrollX, y: window.scrollY }};"
        )),
    }
}

/// Pick a `<select>` option by value, label, or visible text.
pub fn select_option_js(locator: &str, value: &str) -> String {
    let prologue = locator_prologue(locator);
    let value_json = json!(value).to_string();
    wrap(format!(
        "{prologue}\n\
         if (el.tagName.toLowerCase() !== \"select\") return {{ ok: false, error: \"element is not a select\" }};\n\
         const wanted = {value_json};\n\
         let matched = null;\n\
         for (const opt of el.options) {{\n\
           if (opt.value === wanted || opt.label === wanted || opt.text.trim() === wanted) {{ matched = opt; break; }}\n\
         }}\n\
         if (!matched) return {{ ok: false, error: \"no option matches \" + JSON.stringify(wanted) }};\n\
         el.value = matched.value;\n\
         el.dispatchEvent(new Event(\"input\", {{ bubbles: true }}));\n\
         el.dispatchEvent(new Event(\"change\", {{ bubbles: true }}));\n\
         return {{ ok: true, value: matched.value }};"
    ))
}

/// Serialize the live document into the tree the structural walk consumes.
/// Shadow roots and same-origin frames are descended; unreachable frame
/// content is flagged `crossOrigin` instead.
pub fn page_capture_js() -> &'static str {
    r##"(() => {
  const ATTRS = ["id", "href", "role", "type", "placeholder", "alt", "title",
    "aria-label", "aria-labelledby", "aria-level", "for", "contenteditable",
    "onclick", "disabled", "tabindex"];
  const TEXT_CAP = 200;
  const MAX_DEPTH = 80;
  const serialize = (node, depth) => {
    if (depth > MAX_DEPTH) return null;
    if (node.nodeType === Node.TEXT_NODE) {
      const text = node.textContent.replace(/\s+/g, " ").trim();
      if (!text) return null;
      return { tag: "#text", text: text.slice(0, TEXT_CAP) };
    }
    if (node.nodeType !== Node.ELEMENT_NODE) return null;
    const out = { tag: node.tagName.toLowerCase() };
    const attrs = {};
    for (const name of ATTRS) {
      const v = node.getAttribute(name);
      if (v !== null) attrs[name] = v;
    }
    if (typeof node.value === "string" && node.value && out.tag !== "select") {
      attrs.value = node.value.slice(0, 120);
    }
    if (node.checked === true) attrs.checked = "";
    if (Object.keys(attrs).length) out.attrs = attrs;
    const win = node.ownerDocument.defaultView || window;
    const style = win.getComputedStyle(node);
    if (style.display === "none") out.display = "none";
    const opacity = parseFloat(style.opacity);
    if (opacity < 1) out.opacity = opacity;
    const r = node.getBoundingClientRect();
    out.bounds = { x: r.x, y: r.y, w: r.width, h: r.height };
    if (typeof node.onclick === "function" || style.cursor === "pointer") {
      out.hasClickHandler = true;
    }
    const children = [];
    for (const child of node.childNodes) {
      const s = serialize(child, depth + 1);
      if (s) children.push(s);
    }
    if (children.length) out.children = children;
    if (node.shadowRoot) {
      const shadow = [];
      for (const child of node.shadowRoot.childNodes) {
        const s = serialize(child, depth + 1);
        if (s) shadow.push(s);
      }
      if (shadow.length) out.shadow = shadow;
    }
    if (out.tag === "iframe" || out.tag === "frame") {
      try {
        const doc = node.contentDocument;
        if (doc && doc.documentElement) {
          const f = serialize(doc.documentElement, depth + 1);
          if (f) out.frame = f;
        } else {
          out.crossOrigin = true;
        }
      } catch (e) {
        out.crossOrigin = true;
      }
    }
    return out;
  };
  return serialize(document.documentElement, 0);
})()"##
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locator_segments_become_json_array() {
        let js = locate_center_js("my-app >>> #login >>> button:nth-of-type(2)");
        assert!(js.contains(r##"["my-app","#login","button:nth-of-type(2)"]"##));
        assert!(js.contains("el.shadowRoot || el.contentDocument"));
    }

    #[test]
    fn test_single_segment_locator() {
        let js = locate_center_js("#submit");
        assert!(js.contains(r##"["#submit"]"##));
    }

    #[test]
    fn test_fill_js_escapes_value() {
        let js = fill_js("#name", "He said \"hi\"\nbye");
        assert!(js.contains(r#"\"hi\""#));
        assert!(js.contains(r"\n"));
        // the raw newline must not appear inside the embedded literal
        assert!(!js.contains("\"hi\"\nbye"));
    }

    #[test]
    fn test_fill_js_dispatches_events() {
        let js = fill_js("#name", "x");
        assert!(js.contains("new Event(\"input\""));
        assert!(js.contains("new Event(\"change\""));
    }

    #[test]
    fn test_set_checked_embeds_bool() {
        assert!(set_checked_js("#agree", true).contains("const desired = true;"));
        assert!(set_checked_js("#agree", false).contains("const desired = false;"));
    }

    #[test]
    fn test_focus_js_select_flag() {
        assert!(focus_js("#q", true).contains("if (true)"));
        assert!(focus_js("#q", false).contains("if (false)"));
    }

    #[test]
    fn test_scroll_js_window_and_element() {
        let window = scroll_js(None, 0, 600);
        assert!(window.contains("window.scrollBy"));
        assert!(window.contains("top: 600"));

        let element = scroll_js(Some("#pane"), -40, 0);
        assert!(element.contains("el.scrollBy"));
        assert!(element.contains("left: -40"));
    }

    #[test]
    fn test_select_option_embeds_value() {
        let js = select_option_js("#color", "dark \"mode\"");
        assert!(js.contains(r#"\"mode\""#));
        assert!(js.contains("el.options"));
    }

    #[test]
    fn test_page_capture_shape_markers() {
        let js = page_capture_js();
        assert!(js.contains("\"#text\""));
        assert!(js.contains("crossOrigin"));
        assert!(js.contains("hasClickHandler"));
        assert!(js.contains("shadowRoot"));
        assert!(js.contains("contentDocument"));
    }
}
