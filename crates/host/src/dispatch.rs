//! Command parsing and execution.
//!
//! The command set is closed; names and parameter shapes are part of the
//! external contract. `Command::parse` validates at the boundary so handler
//! logic only sees well-typed parameters, and `Dispatcher::handle` turns
//! every outcome into exactly one response envelope.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use tabrelay_core::{
    CommandEnvelope, Config, Error, ResponseEnvelope, Result, ScreenshotConfig,
};
use tabrelay_extract::{
    parse_snapshot, safe_truncate, score_snapshot, walk_document, ElementDescriptor, IdMap, Rect,
    ScoredElement, WalkOptions,
};

use crate::actions::{
    fill_js, focus_js, locate_center_js, page_capture_js, scroll_js, select_option_js,
    set_checked_js, CURRENT_URL_JS, RAW_MARKUP_JS, SCROLL_OFFSET_JS,
};
use crate::browser::{Browser, TabId};
use crate::keys::{parse_combo, parse_keys_param, KeyCombo};
use crate::session::SessionManager;

const KNOWN_COMMANDS: &[&str] = &[
    "session-init",
    "session-close",
    "navigate",
    "get-url",
    "get-content",
    "screenshot",
    "evaluate-script",
    "type-text",
    "press-keys",
    "interact-element",
    "switch-tab",
    "debug-command",
    "list-open-tabs",
    "focus-tab",
];

const SCREENSHOT_EXTRA_ATTEMPTS: u32 = 2;
const SCREENSHOT_BACKOFF: Duration = Duration::from_millis(250);
const DEFAULT_SCROLL_AMOUNT: i64 = 400;

// ─── Parameter shapes ───────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInitParams {
    pub session_id: String,
    #[serde(default)]
    pub start_url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRef {
    pub session_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WaitUntil {
    None,
    Load,
}

fn default_wait_until() -> WaitUntil {
    WaitUntil::Load
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigateParams {
    pub session_id: String,
    pub url: String,
    #[serde(default = "default_wait_until")]
    pub wait_until: WaitUntil,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum ContentMode {
    #[serde(rename = "structural-outline")]
    StructuralOutline,
    #[serde(rename = "raw-markup")]
    RawMarkup,
}

fn default_content_mode() -> ContentMode {
    ContentMode::StructuralOutline
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetContentParams {
    pub session_id: String,
    #[serde(default = "default_content_mode")]
    pub mode: ContentMode,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreenshotParams {
    pub session_id: String,
    #[serde(default)]
    pub include_tab_list: bool,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub quality: Option<u8>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateParams {
    pub session_id: String,
    pub script: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeTextParams {
    pub session_id: String,
    pub text: String,
    #[serde(default)]
    pub element_id: Option<u32>,
    #[serde(default)]
    pub replace: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PressKeysParams {
    pub session_id: String,
    pub keys: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InteractAction {
    Click,
    Fill,
    Check,
    Hover,
    Focus,
    Scroll,
    SelectOption,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractParams {
    pub session_id: String,
    pub element_id: u32,
    pub action: InteractAction,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub direction: Option<String>,
    #[serde(default)]
    pub amount: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SwitchMode {
    Active,
    New,
    ById,
    Focus,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwitchTabParams {
    pub session_id: String,
    pub mode: SwitchMode,
    #[serde(default)]
    pub tab_id: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugParams {
    #[serde(default)]
    pub session_id: Option<String>,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
    /// Envelope-level tab pin, not part of the params object.
    #[serde(skip)]
    pub pinned_tab: Option<TabId>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FocusTabParams {
    pub tab_id: String,
}

#[derive(Debug)]
pub enum Command {
    SessionInit(SessionInitParams),
    SessionClose(SessionRef),
    Navigate(NavigateParams),
    GetUrl(SessionRef),
    GetContent(GetContentParams),
    Screenshot(ScreenshotParams),
    EvaluateScript(EvaluateParams),
    TypeText(TypeTextParams),
    PressKeys(PressKeysParams),
    InteractElement(InteractParams),
    SwitchTab(SwitchTabParams),
    DebugCommand(DebugParams),
    ListOpenTabs,
    FocusTab(FocusTabParams),
}

impl Command {
    /// Map a wire command onto its typed form. `tab_hint` is the envelope's
    /// optional tab pin, honored by debug-command only.
    pub fn parse(name: &str, params: Value, tab_hint: Option<TabId>) -> Result<Self> {
        fn typed<T: serde::de::DeserializeOwned>(name: &str, params: Value) -> Result<T> {
            serde_json::from_value(params)
                .map_err(|e| Error::Validation(format!("invalid params for '{name}': {e}")))
        }

        match name {
            "session-init" => Ok(Self::SessionInit(typed(name, params)?)),
            "session-close" => Ok(Self::SessionClose(typed(name, params)?)),
            "navigate" => Ok(Self::Navigate(typed(name, params)?)),
            "get-url" => Ok(Self::GetUrl(typed(name, params)?)),
            "get-content" => Ok(Self::GetContent(typed(name, params)?)),
            "screenshot" => Ok(Self::Screenshot(typed(name, params)?)),
            "evaluate-script" => Ok(Self::EvaluateScript(typed(name, params)?)),
            "type-text" => Ok(Self::TypeText(typed(name, params)?)),
            "press-keys" => Ok(Self::PressKeys(typed(name, params)?)),
            "interact-element" => Ok(Self::InteractElement(typed(name, params)?)),
            "switch-tab" => Ok(Self::SwitchTab(typed(name, params)?)),
            "debug-command" => {
                let mut parsed: DebugParams = typed(name, params)?;
                parsed.pinned_tab = tab_hint;
                Ok(Self::DebugCommand(parsed))
            }
            "list-open-tabs" => Ok(Self::ListOpenTabs),
            "focus-tab" => Ok(Self::FocusTab(typed(name, params)?)),
            other => Err(Error::Validation(format!(
                "unknown command '{}' (known: {})",
                other,
                KNOWN_COMMANDS.join(", ")
            ))),
        }
    }
}

// ─── Dispatcher ─────────────────────────────────────────────────────────

pub struct Dispatcher {
    sessions: Arc<SessionManager>,
    browser: Arc<dyn Browser>,
    screenshot: ScreenshotConfig,
    navigation_timeout: Duration,
    walk_opts: WalkOptions,
    viewport: (u32, u32),
}

impl Dispatcher {
    pub fn new(sessions: Arc<SessionManager>, browser: Arc<dyn Browser>, config: &Config) -> Self {
        Self {
            sessions,
            browser,
            screenshot: config.screenshot.clone(),
            navigation_timeout: Duration::from_millis(config.session.navigation_timeout_ms),
            walk_opts: WalkOptions::default(),
            viewport: (config.browser.viewport_width, config.browser.viewport_height),
        }
    }

    /// Exactly one response per envelope, never a panic.
    pub async fn handle(&self, envelope: CommandEnvelope) -> ResponseEnvelope {
        let CommandEnvelope {
            request_id,
            command,
            params,
            tab_id,
        } = envelope;
        debug!(request_id, command = %command, "dispatching");

        let command = match Command::parse(&command, params, tab_id) {
            Ok(command) => command,
            Err(e) => return error_response(request_id, &e),
        };

        match self.execute(command).await {
            Ok((result, tab)) => {
                let mut resp = ResponseEnvelope::ok(request_id, result);
                if let Some(tab) = tab {
                    resp = resp.with_tab(tab);
                }
                resp
            }
            Err(e) => error_response(request_id, &e),
        }
    }

    async fn execute(&self, command: Command) -> Result<(Value, Option<TabId>)> {
        match command {
            Command::SessionInit(p) => self.session_init(p).await,
            Command::SessionClose(p) => self.session_close(p).await,
            Command::Navigate(p) => self.navigate(p).await,
            Command::GetUrl(p) => self.get_url(p).await,
            Command::GetContent(p) => self.get_content(p).await,
            Command::Screenshot(p) => self.take_screenshot(p).await,
            Command::EvaluateScript(p) => self.evaluate_script(p).await,
            Command::TypeText(p) => self.type_text(p).await,
            Command::PressKeys(p) => self.press_keys(p).await,
            Command::InteractElement(p) => self.interact(p).await,
            Command::SwitchTab(p) => self.switch_tab(p).await,
            Command::DebugCommand(p) => self.debug_command(p).await,
            Command::ListOpenTabs => self.list_open_tabs().await,
            Command::FocusTab(p) => self.focus_tab(p).await,
        }
    }

    async fn session_init(&self, p: SessionInitParams) -> Result<(Value, Option<TabId>)> {
        let tab = self
            .sessions
            .resolve_tab(&p.session_id, p.start_url.as_deref())
            .await?;
        info!(session = %p.session_id, tab = %tab, "session initialized");
        Ok((
            json!({ "sessionId": p.session_id, "tabId": tab }),
            Some(tab),
        ))
    }

    async fn session_close(&self, p: SessionRef) -> Result<(Value, Option<TabId>)> {
        self.sessions.close_session(&p.session_id).await?;
        Ok((json!({ "closed": true }), None))
    }

    async fn navigate(&self, p: NavigateParams) -> Result<(Value, Option<TabId>)> {
        let tab = self.sessions.resolve_tab(&p.session_id, None).await?;
        // ids do not survive navigation
        self.sessions.clear_elements(&p.session_id).await;
        let params = json!({ "url": p.url });

        match p.wait_until {
            WaitUntil::None => {
                let nav = self.sessions.send_protocol(&tab, "Page.navigate", params).await?;
                check_navigate_result(&nav)?;
                Ok((json!({ "url": p.url, "loaded": false }), Some(tab)))
            }
            WaitUntil::Load => {
                self.sessions.attach(&tab).await?;
                // subscribe concurrently so a fast load event is not missed
                let (nav, loaded) = tokio::join!(
                    self.sessions.send_protocol(&tab, "Page.navigate", params),
                    self.browser
                        .wait_event(&tab, "Page.loadEventFired", self.navigation_timeout),
                );
                check_navigate_result(&nav?)?;
                if loaded.unwrap_or(false) {
                    Ok((json!({ "url": p.url, "loaded": true }), Some(tab)))
                } else {
                    info!(
                        url = %p.url,
                        timeout_ms = self.navigation_timeout.as_millis() as u64,
                        "load event not seen in time, proceeding"
                    );
                    Ok((json!({ "url": p.url, "proceeding": true }), Some(tab)))
                }
            }
        }
    }

    async fn get_url(&self, p: SessionRef) -> Result<(Value, Option<TabId>)> {
        let tab = self.sessions.resolve_tab(&p.session_id, None).await?;
        let value = self.run_expression(&tab, CURRENT_URL_JS).await?;
        let url = value.as_str().unwrap_or("").to_string();
        Ok((json!({ "url": url }), Some(tab)))
    }

    async fn get_content(&self, p: GetContentParams) -> Result<(Value, Option<TabId>)> {
        let tab = self.sessions.resolve_tab(&p.session_id, None).await?;
        match p.mode {
            ContentMode::RawMarkup => {
                let value = self.run_expression(&tab, RAW_MARKUP_JS).await?;
                let content = value.as_str().unwrap_or("").to_string();
                Ok((
                    json!({ "mode": "raw-markup", "content": content }),
                    Some(tab),
                ))
            }
            ContentMode::StructuralOutline => {
                let value = self.run_expression(&tab, page_capture_js()).await?;
                if value.is_null() {
                    return Err(Error::Extraction("page capture returned nothing".to_string()));
                }
                let root = serde_json::from_value(value)
                    .map_err(|e| Error::Extraction(format!("bad capture payload: {e}")))?;
                let cursor = self.sessions.ref_cursor(&p.session_id).await;
                let walk = walk_document(&root, cursor, &self.walk_opts);
                self.sessions.set_ref_cursor(&p.session_id, walk.counter).await;
                let count = walk.map.len();
                self.sessions.put_elements(&p.session_id, walk.map).await;
                Ok((
                    json!({
                        "mode": "structural-outline",
                        "outline": walk.outline,
                        "elementCount": count,
                        "warnings": walk.warnings,
                    }),
                    Some(tab),
                ))
            }
        }
    }

    async fn take_screenshot(&self, p: ScreenshotParams) -> Result<(Value, Option<TabId>)> {
        let tab = self.sessions.resolve_tab(&p.session_id, None).await?;
        let format = p.format.unwrap_or_else(|| self.screenshot.format.clone());
        if format != "jpeg" && format != "png" {
            return Err(Error::Validation(format!(
                "screenshot format must be jpeg or png, got '{format}'"
            )));
        }
        let quality = p.quality.unwrap_or(self.screenshot.quality);

        let mut attempt = 0;
        let data = loop {
            match self.capture_screenshot(&tab, &format, quality).await {
                Ok(data) => break data,
                Err(e) if attempt < SCREENSHOT_EXTRA_ATTEMPTS => {
                    attempt += 1;
                    warn!(tab = %tab, attempt, error = %e, "screenshot failed, resetting attachment");
                    self.sessions.detach(&tab).await;
                    tokio::time::sleep(SCREENSHOT_BACKOFF * attempt).await;
                }
                Err(e) => return Err(e),
            }
        };

        let mut warnings: Vec<String> = Vec::new();
        let elements = match self.overlay_elements(&p.session_id, &tab).await {
            Ok(elements) => elements,
            Err(e) => {
                warn!(tab = %tab, error = %e, "overlay extraction failed");
                warnings.push(format!("element overlay unavailable: {e}"));
                Vec::new()
            }
        };

        let tabs = if p.include_tab_list {
            match self.browser.list_tabs().await {
                Ok(tabs) => Some(tabs),
                Err(e) => {
                    warnings.push(format!("tab roster unavailable: {e}"));
                    None
                }
            }
        } else {
            None
        };

        let mut result = json!({
            "data": data,
            "format": format,
            "elements": elements,
            "warnings": warnings,
        });
        if let Some(tabs) = tabs {
            result["tabs"] = json!(tabs);
        }
        Ok((result, Some(tab)))
    }

    async fn capture_screenshot(&self, tab: &TabId, format: &str, quality: u8) -> Result<String> {
        let mut params = json!({ "format": format });
        if format == "jpeg" {
            params["quality"] = json!(quality);
        }
        let (vw, vh) = self.viewport;
        if vh > self.screenshot.max_height_px {
            params["clip"] = json!({
                "x": 0, "y": 0,
                "width": vw, "height": self.screenshot.max_height_px,
                "scale": 1,
            });
        }
        let result = self
            .sessions
            .send_protocol(tab, "Page.captureScreenshot", params)
            .await?;
        result
            .get("data")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| Error::Browser("screenshot returned no data".to_string()))
    }

    /// Score the flat layout snapshot against the currently visible region
    /// and replace the session's element map with the overlay candidates.
    async fn overlay_elements(&self, session_id: &str, tab: &TabId) -> Result<Vec<ScoredElement>> {
        let offset = self.run_expression(tab, SCROLL_OFFSET_JS).await?;
        let sx = offset.get("x").and_then(|v| v.as_f64()).unwrap_or(0.0);
        let sy = offset.get("y").and_then(|v| v.as_f64()).unwrap_or(0.0);

        let raw = self
            .sessions
            .send_protocol(tab, "DOMSnapshot.captureSnapshot", json!({ "computedStyles": [] }))
            .await?;
        let doc = parse_snapshot(&raw)?;

        let (vw, vh) = self.viewport;
        let viewport = Rect::new(sx, sy, vw as f64, vh as f64);
        let scored = score_snapshot(&doc, viewport);

        let mut map = IdMap::new();
        for el in &scored {
            map.insert(el.id, el.to_descriptor());
        }
        self.sessions.put_elements(session_id, map).await;
        Ok(scored)
    }

    async fn evaluate_script(&self, p: EvaluateParams) -> Result<(Value, Option<TabId>)> {
        let tab = self.sessions.resolve_tab(&p.session_id, None).await?;
        let result = self
            .sessions
            .send_protocol(
                &tab,
                "Runtime.evaluate",
                json!({
                    "expression": p.script,
                    "returnByValue": true,
                    "awaitPromise": true,
                    "userGesture": true,
                }),
            )
            .await?;
        if let Some(exc) = result.get("exceptionDetails") {
            return Err(Error::Browser(format!("script threw: {}", exception_text(exc))));
        }
        let value = result.pointer("/result/value").cloned().unwrap_or(Value::Null);
        Ok((json!({ "value": value }), Some(tab)))
    }

    async fn type_text(&self, p: TypeTextParams) -> Result<(Value, Option<TabId>)> {
        let tab = self.sessions.resolve_tab(&p.session_id, None).await?;
        if let Some(id) = p.element_id {
            let descriptor = self.sessions.get_element(&p.session_id, id).await?;
            if !descriptor.locator.is_empty() {
                self.run_page_script(&tab, &focus_js(&descriptor.locator, p.replace))
                    .await?;
            } else {
                // overlay candidates are addressed by coordinates
                let (x, y) = self.element_center(&tab, &descriptor).await?;
                self.click_at(&tab, x, y).await?;
                if p.replace {
                    let select_all = parse_combo("Ctrl+a")?;
                    self.press_key_combo(&tab, &select_all).await?;
                }
            }
        }
        self.sessions
            .send_protocol(&tab, "Input.insertText", json!({ "text": p.text }))
            .await?;
        Ok((json!({ "typed": p.text.chars().count() }), Some(tab)))
    }

    async fn press_keys(&self, p: PressKeysParams) -> Result<(Value, Option<TabId>)> {
        let combos = parse_keys_param(&p.keys)?;
        let tab = self.sessions.resolve_tab(&p.session_id, None).await?;
        for combo in &combos {
            self.press_key_combo(&tab, combo).await?;
        }
        Ok((json!({ "pressed": combos.len() }), Some(tab)))
    }

    async fn press_key_combo(&self, tab: &TabId, combo: &KeyCombo) -> Result<()> {
        let down = json!({
            "type": "rawKeyDown",
            "key": combo.key,
            "code": combo.code,
            "windowsVirtualKeyCode": combo.key_code,
            "nativeVirtualKeyCode": combo.key_code,
            "modifiers": combo.modifiers,
        });
        self.sessions
            .send_protocol(tab, "Input.dispatchKeyEvent", down)
            .await?;
        if let Some(text) = &combo.text {
            let ch = json!({
                "type": "char",
                "text": text,
                "key": combo.key,
                "modifiers": combo.modifiers,
            });
            self.sessions
                .send_protocol(tab, "Input.dispatchKeyEvent", ch)
                .await?;
        }
        let up = json!({
            "type": "keyUp",
            "key": combo.key,
            "code": combo.code,
            "windowsVirtualKeyCode": combo.key_code,
            "nativeVirtualKeyCode": combo.key_code,
            "modifiers": combo.modifiers,
        });
        self.sessions
            .send_protocol(tab, "Input.dispatchKeyEvent", up)
            .await?;
        Ok(())
    }

    async fn interact(&self, p: InteractParams) -> Result<(Value, Option<TabId>)> {
        let tab = self.sessions.resolve_tab(&p.session_id, None).await?;
        let descriptor = self.sessions.get_element(&p.session_id, p.element_id).await?;

        let result = match p.action {
            InteractAction::Click => {
                let (x, y) = self.element_center(&tab, &descriptor).await?;
                self.click_at(&tab, x, y).await?;
                json!({ "action": "click", "elementId": p.element_id, "x": x, "y": y })
            }
            InteractAction::Fill => {
                let value = p.value.as_deref().ok_or_else(|| {
                    Error::Validation("action 'fill' requires value".to_string())
                })?;
                let locator = require_locator(&descriptor)?;
                self.run_page_script(&tab, &fill_js(locator, value)).await?;
                json!({ "action": "fill", "elementId": p.element_id })
            }
            InteractAction::Check => {
                let desired = match p.value.as_deref() {
                    None | Some("true") | Some("") => true,
                    Some("false") => false,
                    Some(other) => {
                        return Err(Error::Validation(format!(
                            "action 'check' value must be true or false, got '{other}'"
                        )))
                    }
                };
                let locator = require_locator(&descriptor)?;
                let out = self
                    .run_page_script(&tab, &set_checked_js(locator, desired))
                    .await?;
                json!({
                    "action": "check",
                    "elementId": p.element_id,
                    "checked": out.get("checked").cloned().unwrap_or(Value::Bool(desired)),
                })
            }
            InteractAction::Hover => {
                let (x, y) = self.element_center(&tab, &descriptor).await?;
                self.sessions
                    .send_protocol(
                        &tab,
                        "Input.dispatchMouseEvent",
                        json!({ "type": "mouseMoved", "x": x, "y": y }),
                    )
                    .await?;
                json!({ "action": "hover", "elementId": p.element_id })
            }
            InteractAction::Focus => {
                if descriptor.locator.is_empty() {
                    let (x, y) = self.element_center(&tab, &descriptor).await?;
                    self.click_at(&tab, x, y).await?;
                } else {
                    self.run_page_script(&tab, &focus_js(&descriptor.locator, false))
                        .await?;
                }
                json!({ "action": "focus", "elementId": p.element_id })
            }
            InteractAction::Scroll => {
                let amount = p.amount.unwrap_or(DEFAULT_SCROLL_AMOUNT);
                let (dx, dy) = match p.direction.as_deref().unwrap_or("down") {
                    "up" => (0, -amount),
                    "down" => (0, amount),
                    "left" => (-amount, 0),
                    "right" => (amount, 0),
                    other => {
                        return Err(Error::Validation(format!(
                            "unknown scroll direction '{other}'"
                        )))
                    }
                };
                let locator = (!descriptor.locator.is_empty()).then_some(descriptor.locator.as_str());
                let out = self.run_page_script(&tab, &scroll_js(locator, dx, dy)).await?;
                json!({
                    "action": "scroll",
                    "elementId": p.element_id,
                    "x": out.get("x").cloned().unwrap_or(Value::Null),
                    "y": out.get("y").cloned().unwrap_or(Value::Null),
                })
            }
            InteractAction::SelectOption => {
                let value = p.value.as_deref().ok_or_else(|| {
                    Error::Validation("action 'select-option' requires value".to_string())
                })?;
                let locator = require_locator(&descriptor)?;
                let out = self
                    .run_page_script(&tab, &select_option_js(locator, value))
                    .await?;
                json!({
                    "action": "select-option",
                    "elementId": p.element_id,
                    "value": out.get("value").cloned().unwrap_or(Value::Null),
                })
            }
        };
        Ok((result, Some(tab)))
    }

    async fn switch_tab(&self, p: SwitchTabParams) -> Result<(Value, Option<TabId>)> {
        match p.mode {
            SwitchMode::Active => {
                let tabs = self.browser.list_tabs().await?;
                let claimed = self.sessions.tabs_bound_elsewhere(&p.session_id).await;
                let target = tabs
                    .iter()
                    .find(|t| t.active && !claimed.contains(&t.id))
                    .or_else(|| tabs.iter().find(|t| !claimed.contains(&t.id)))
                    .ok_or_else(|| Error::Session("no unclaimed tab to adopt".to_string()))?;
                let tab = self.sessions.rebind(&p.session_id, target.id.clone()).await?;
                Ok((json!({ "mode": "active", "tabId": tab }), Some(tab)))
            }
            SwitchMode::New => {
                let url = p.url.as_deref().unwrap_or("about:blank");
                let info = self.browser.create_tab(url).await?;
                let tab = self.sessions.rebind(&p.session_id, info.id).await?;
                Ok((json!({ "mode": "new", "tabId": tab, "url": url }), Some(tab)))
            }
            SwitchMode::ById => {
                let wanted = p.tab_id.as_deref().ok_or_else(|| {
                    Error::Validation("switch-tab mode 'by-id' requires tabId".to_string())
                })?;
                let tabs = self.browser.list_tabs().await?;
                if !tabs.iter().any(|t| t.id == wanted) {
                    return Err(Error::NotFound(format!("tab {wanted} not found")));
                }
                let claimed = self.sessions.tabs_bound_elsewhere(&p.session_id).await;
                if claimed.iter().any(|t| t == wanted) {
                    return Err(Error::Session(format!(
                        "tab {wanted} is bound to another session"
                    )));
                }
                let tab = self.sessions.rebind(&p.session_id, wanted.to_string()).await?;
                Ok((json!({ "mode": "by-id", "tabId": tab }), Some(tab)))
            }
            SwitchMode::Focus => {
                let tab = self.sessions.session_tab(&p.session_id).await?;
                self.sessions.touch(&p.session_id).await;
                self.browser.activate_tab(&tab).await?;
                Ok((json!({ "mode": "focus", "tabId": tab, "focused": true }), Some(tab)))
            }
        }
    }

    async fn debug_command(&self, p: DebugParams) -> Result<(Value, Option<TabId>)> {
        let tab = match (&p.pinned_tab, &p.session_id) {
            (Some(tab), _) => tab.clone(),
            (None, Some(session_id)) => self.sessions.resolve_tab(session_id, None).await?,
            (None, None) => {
                return Err(Error::Validation(
                    "debug-command requires sessionId or a tabId".to_string(),
                ))
            }
        };
        let params = p.params.unwrap_or_else(|| json!({}));
        let result = self.sessions.send_protocol(&tab, &p.method, params).await?;
        Ok((result, Some(tab)))
    }

    async fn list_open_tabs(&self) -> Result<(Value, Option<TabId>)> {
        let tabs = self.browser.list_tabs().await?;
        Ok((json!({ "tabs": tabs }), None))
    }

    async fn focus_tab(&self, p: FocusTabParams) -> Result<(Value, Option<TabId>)> {
        self.browser.activate_tab(&p.tab_id).await?;
        Ok((json!({ "tabId": p.tab_id, "focused": true }), Some(p.tab_id)))
    }

    // ─── Page-script plumbing ───────────────────────────────────────────

    /// Evaluate an expression and unwrap its by-value result. Page-side
    /// exceptions become errors.
    async fn run_expression(&self, tab: &TabId, expression: &str) -> Result<Value> {
        let result = self
            .sessions
            .send_protocol(
                tab,
                "Runtime.evaluate",
                json!({ "expression": expression, "returnByValue": true }),
            )
            .await?;
        if let Some(exc) = result.get("exceptionDetails") {
            return Err(Error::Browser(format!("page script threw: {}", exception_text(exc))));
        }
        Ok(result.pointer("/result/value").cloned().unwrap_or(Value::Null))
    }

    /// Like [`Self::run_expression`] but for action scripts speaking the
    /// `{ ok, error }` protocol.
    async fn run_page_script(&self, tab: &TabId, script: &str) -> Result<Value> {
        let value = self.run_expression(tab, script).await?;
        if value.get("ok").and_then(|v| v.as_bool()) == Some(false) {
            let msg = value
                .get("error")
                .and_then(|v| v.as_str())
                .unwrap_or("page action failed");
            return Err(Error::Browser(msg.to_string()));
        }
        Ok(value)
    }

    /// Viewport coordinates of an element's center. Locator-bearing
    /// elements are measured live (scrolled into view first); overlay
    /// candidates translate their stored document-space bounds through the
    /// current scroll offset.
    async fn element_center(&self, tab: &TabId, descriptor: &ElementDescriptor) -> Result<(f64, f64)> {
        if !descriptor.locator.is_empty() {
            let v = self
                .run_page_script(tab, &locate_center_js(&descriptor.locator))
                .await?;
            let x = v.get("x").and_then(|v| v.as_f64()).unwrap_or(0.0);
            let y = v.get("y").and_then(|v| v.as_f64()).unwrap_or(0.0);
            return Ok((x, y));
        }
        let bounds = descriptor.bounds.ok_or_else(|| {
            Error::Validation(format!(
                "element {} has neither locator nor bounds",
                descriptor.id
            ))
        })?;
        let offset = self.run_expression(tab, SCROLL_OFFSET_JS).await?;
        let sx = offset.get("x").and_then(|v| v.as_f64()).unwrap_or(0.0);
        let sy = offset.get("y").and_then(|v| v.as_f64()).unwrap_or(0.0);
        let (cx, cy) = bounds.center();
        Ok((cx - sx, cy - sy))
    }

    async fn click_at(&self, tab: &TabId, x: f64, y: f64) -> Result<()> {
        let events = [
            json!({ "type": "mouseMoved", "x": x, "y": y }),
            json!({ "type": "mousePressed", "x": x, "y": y, "button": "left", "clickCount": 1 }),
            json!({ "type": "mouseReleased", "x": x, "y": y, "button": "left", "clickCount": 1 }),
        ];
        for event in events {
            self.sessions
                .send_protocol(tab, "Input.dispatchMouseEvent", event)
                .await?;
        }
        Ok(())
    }
}

fn require_locator(descriptor: &ElementDescriptor) -> Result<&str> {
    if descriptor.locator.is_empty() {
        return Err(Error::Validation(format!(
            "element {} came from a screenshot overlay and has no locator; run get-content first",
            descriptor.id
        )));
    }
    Ok(&descriptor.locator)
}

fn check_navigate_result(nav: &Value) -> Result<()> {
    if let Some(err) = nav
        .get("errorText")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
    {
        return Err(Error::Browser(format!("navigation failed: {err}")));
    }
    Ok(())
}

fn exception_text(exc: &Value) -> String {
    exc.pointer("/exception/description")
        .and_then(|v| v.as_str())
        .or_else(|| exc.get("text").and_then(|v| v.as_str()))
        .unwrap_or("unknown error")
        .to_string()
}

/// Short message always, full text demoted to `details` when it runs long.
fn error_response(request_id: u64, e: &Error) -> ResponseEnvelope {
    let full = e.to_string();
    if full.len() > 160 {
        let short = format!("{}...", safe_truncate(&full, 157));
        ResponseEnvelope::error(request_id, short).with_details(full)
    } else {
        ResponseEnvelope::error(request_id, full)
    }
}
