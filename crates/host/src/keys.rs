//! Key-combo parsing for the press-keys command.
//!
//! Combos look like `"Enter"`, `"Ctrl+a"`, or `"Control+Shift+T"`. Every
//! token before the last names a modifier; the last token names the key,
//! resolved against a table of friendly names or taken as a literal
//! printable character.

use once_cell::sync::Lazy;
use serde_json::Value;
use std::collections::HashMap;

use tabrelay_core::{Error, Result};

pub const MOD_ALT: i64 = 1;
pub const MOD_CTRL: i64 = 2;
pub const MOD_META: i64 = 4;
pub const MOD_SHIFT: i64 = 8;

/// One key press, resolved to the fields the input protocol wants.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyCombo {
    pub key: String,
    pub code: String,
    pub key_code: i64,
    /// Character payload for the char event. None for non-printing keys
    /// and for combos where ctrl/meta turn the press into a chord.
    pub text: Option<String>,
    pub modifiers: i64,
}

struct KeyDef {
    key: &'static str,
    code: &'static str,
    key_code: i64,
    text: Option<&'static str>,
}

static KEY_TABLE: Lazy<HashMap<&'static str, KeyDef>> = Lazy::new(|| {
    let mut m = HashMap::new();
    let mut def = |names: &[&'static str], key, code, key_code, text| {
        for name in names {
            m.insert(
                *name,
                KeyDef {
                    key,
                    code,
                    key_code,
                    text,
                },
            );
        }
    };

    def(&["enter", "return"], "Enter", "Enter", 13, Some("\r"));
    def(&["tab"], "Tab", "Tab", 9, None);
    def(&["escape", "esc"], "Escape", "Escape", 27, None);
    def(&["backspace"], "Backspace", "Backspace", 8, None);
    def(&["delete", "del"], "Delete", "Delete", 46, None);
    def(&["insert"], "Insert", "Insert", 45, None);
    def(&["arrowup", "up"], "ArrowUp", "ArrowUp", 38, None);
    def(&["arrowdown", "down"], "ArrowDown", "ArrowDown", 40, None);
    def(&["arrowleft", "left"], "ArrowLeft", "ArrowLeft", 37, None);
    def(&["arrowright", "right"], "ArrowRight", "ArrowRight", 39, None);
    def(&["home"], "Home", "Home", 36, None);
    def(&["end"], "End", "End", 35, None);
    def(&["pageup"], "PageUp", "PageUp", 33, None);
    def(&["pagedown"], "PageDown", "PageDown", 34, None);
    def(&["space"], " ", "Space", 32, Some(" "));
    def(&["f1"], "F1", "F1", 112, None);
    def(&["f2"], "F2", "F2", 113, None);
    def(&["f3"], "F3", "F3", 114, None);
    def(&["f4"], "F4", "F4", 115, None);
    def(&["f5"], "F5", "F5", 116, None);
    def(&["f6"], "F6", "F6", 117, None);
    def(&["f7"], "F7", "F7", 118, None);
    def(&["f8"], "F8", "F8", 119, None);
    def(&["f9"], "F9", "F9", 120, None);
    def(&["f10"], "F10", "F10", 121, None);
    def(&["f11"], "F11", "F11", 122, None);
    def(&["f12"], "F12", "F12", 123, None);
    m
});

fn modifier_bit(token: &str) -> Option<i64> {
    match token.to_ascii_lowercase().as_str() {
        "alt" | "option" => Some(MOD_ALT),
        "ctrl" | "control" => Some(MOD_CTRL),
        "meta" | "cmd" | "command" | "super" | "win" => Some(MOD_META),
        "shift" => Some(MOD_SHIFT),
        _ => None,
    }
}

/// Parse a combo like `"Ctrl+Shift+T"`. A trailing `+` means the key
/// itself is `+`, so `"Ctrl++"` is ctrl with the plus key.
pub fn parse_combo(combo: &str) -> Result<KeyCombo> {
    if combo.is_empty() {
        return Err(Error::Validation("empty key combo".to_string()));
    }

    let (mods_raw, key_raw): (&str, &str) = match combo.strip_suffix('+') {
        Some(rest) => (rest.strip_suffix('+').unwrap_or(rest), "+"),
        None => match combo.rfind('+') {
            Some(idx) => (&combo[..idx], &combo[idx + 1..]),
            None => ("", combo),
        },
    };

    let mut modifiers = 0;
    for token in mods_raw.split('+').filter(|t| !t.is_empty()) {
        let bit = modifier_bit(token).ok_or_else(|| {
            Error::Validation(format!("unknown modifier '{token}' in combo '{combo}'"))
        })?;
        modifiers |= bit;
    }

    let chord = modifiers & (MOD_CTRL | MOD_META) != 0;

    if let Some(def) = KEY_TABLE.get(key_raw.to_ascii_lowercase().as_str()) {
        return Ok(KeyCombo {
            key: def.key.to_string(),
            code: def.code.to_string(),
            key_code: def.key_code,
            text: if chord {
                None
            } else {
                def.text.map(str::to_string)
            },
            modifiers,
        });
    }

    let mut chars = key_raw.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => {
            let upper = c.to_ascii_uppercase();
            let code = if c.is_ascii_alphabetic() {
                format!("Key{upper}")
            } else if c.is_ascii_digit() {
                format!("Digit{c}")
            } else {
                String::new()
            };
            let key_code = if c.is_ascii_alphanumeric() {
                upper as i64
            } else {
                0
            };
            Ok(KeyCombo {
                key: c.to_string(),
                code,
                key_code,
                text: if chord { None } else { Some(c.to_string()) },
                modifiers,
            })
        }
        _ => Err(Error::Validation(format!(
            "unknown key '{key_raw}' in combo '{combo}'"
        ))),
    }
}

/// The `keys` parameter: one combo string, or an array of them.
pub fn parse_keys_param(value: &Value) -> Result<Vec<KeyCombo>> {
    match value {
        Value::String(s) => Ok(vec![parse_combo(s)?]),
        Value::Array(items) => {
            let mut combos = Vec::with_capacity(items.len());
            for item in items {
                let s = item.as_str().ok_or_else(|| {
                    Error::Validation("keys array entries must be strings".to_string())
                })?;
                combos.push(parse_combo(s)?);
            }
            Ok(combos)
        }
        _ => Err(Error::Validation(
            "keys must be a string or an array of strings".to_string(),
        )),
    }
}
