//! Page-side scripts used by the executor.
//!
//! Every script is an IIFE invoked with a single JSON argument object and
//! starts with a `/*webpilot:<name>*/` tag. The tag keeps the scripts easy to
//! spot in CDP traces and lets fake pages dispatch on it.
//!
//! Elements are found through the page-side registry installed by the
//! snapshot extractor (`window.__webpilot`), and once resolved they carry a
//! `data-webpilot-ref` marker attribute that later scripts query by.

use serde::Serialize;
use serde_json::{Value, json};
use webpilot_core::page::ElementHandle;

/// Attribute stamped on resolved elements.
pub const MARKER_ATTR: &str = "data-webpilot-ref";

/// Names of the scripts, as they appear in the leading tag.
pub mod tag {
    pub const RESOLVE: &str = "resolve";
    pub const MEASURE: &str = "measure";
    pub const SCROLL: &str = "scroll";
    pub const TARGET: &str = "target";
    pub const PREPARE_INPUT: &str = "prepare-input";
    pub const PROBE: &str = "probe";
    pub const EXTRACT: &str = "extract";
}

/// Scroll animation used for one visibility attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScrollBehavior {
    Smooth,
    Instant,
}

pub(crate) fn invoke(name: &str, body: &str, args: Value) -> String {
    format!("/*webpilot:{name}*/({body})({args})")
}

/// Split a script built here back into its tag and argument object.
pub fn split_invocation(script: &str) -> Option<(&str, Value)> {
    let rest = script.strip_prefix("/*webpilot:")?;
    let (name, body) = rest.split_once("*/")?;
    let start = body.rfind(")(")? + 2;
    let args = body[start..].strip_suffix(')')?;
    let args = serde_json::from_str(args).ok()?;
    Some((name, args))
}

const RESOLVE_JS: &str = r#"function(a) {
  const reg = window.__webpilot;
  if (!reg || reg.generation !== a.generation) {
    return { found: false, reason: 'stale', pageGeneration: reg ? reg.generation : null };
  }
  const node = reg.nodes.get(a.id);
  if (!node || !node.isConnected) {
    return { found: false, reason: 'missing' };
  }
  const marker = a.generation + '-' + a.id;
  if (node.getAttribute('data-webpilot-ref') !== marker) {
    node.setAttribute('data-webpilot-ref', marker);
  }
  return { found: true, marker: marker, tag: node.tagName.toLowerCase() };
}"#;

/// Look up a handle in the page-side registry and stamp its marker.
pub fn resolve(handle: ElementHandle) -> String {
    invoke(
        tag::RESOLVE,
        RESOLVE_JS,
        json!({ "id": handle.id, "generation": handle.generation }),
    )
}

const MEASURE_JS: &str = r#"function(a) {
  const el = document.querySelector('[data-webpilot-ref="' + a.marker + '"]');
  if (!el) return { found: false };
  const r = el.getBoundingClientRect();
  return {
    found: true,
    x: r.left, y: r.top, width: r.width, height: r.height,
    viewportWidth: window.innerWidth, viewportHeight: window.innerHeight
  };
}"#;

/// Bounding rect of the marked element plus the viewport size.
pub fn measure(marker: &str) -> String {
    invoke(tag::MEASURE, MEASURE_JS, json!({ "marker": marker }))
}

const SCROLL_JS: &str = r#"function(a) {
  const el = document.querySelector('[data-webpilot-ref="' + a.marker + '"]');
  if (!el) return { scrolled: false };
  let moved = 0;
  for (let p = el.parentElement; p && p !== document.body; p = p.parentElement) {
    const s = getComputedStyle(p);
    const scrollY = /(auto|scroll)/.test(s.overflowY) && p.scrollHeight > p.clientHeight;
    const scrollX = /(auto|scroll)/.test(s.overflowX) && p.scrollWidth > p.clientWidth;
    if (!scrollX && !scrollY) continue;
    const pr = p.getBoundingClientRect();
    const er = el.getBoundingClientRect();
    const dy = scrollY ? (er.top + er.height / 2) - (pr.top + pr.height / 2) : 0;
    const dx = scrollX ? (er.left + er.width / 2) - (pr.left + pr.width / 2) : 0;
    if (dx || dy) { p.scrollBy({ left: dx, top: dy, behavior: a.behavior }); moved++; }
  }
  const r = el.getBoundingClientRect();
  const offY = r.bottom < 0 || r.top > window.innerHeight;
  const offX = r.right < 0 || r.left > window.innerWidth;
  el.scrollIntoView({
    behavior: a.behavior,
    block: offY ? (r.bottom < 0 ? 'start' : 'end') : 'center',
    inline: offX ? (r.right < 0 ? 'start' : 'end') : 'center'
  });
  return { scrolled: true, ancestors: moved };
}"#;

/// Scroll scrollable ancestors toward the element, then scroll it into view.
///
/// Centers the element, except on an axis where it is entirely off screen,
/// where it is aligned to the nearest edge instead.
pub fn scroll_into_view(marker: &str, behavior: ScrollBehavior) -> String {
    invoke(
        tag::SCROLL,
        SCROLL_JS,
        json!({ "marker": marker, "behavior": behavior }),
    )
}

const TARGET_JS: &str = r#"function(a) {
  const el = document.querySelector('[data-webpilot-ref="' + a.marker + '"]');
  if (!el) return { found: false };
  const editable = n => n.matches('input, textarea, select, [contenteditable=""], [contenteditable="true"]');
  let target = el;
  let delegated = false;
  if (!editable(el) && !el.matches('a, button, [role="button"]')) {
    const inner = el.querySelector('input:not([type="hidden"]), textarea, select, [contenteditable=""], [contenteditable="true"]');
    if (inner) { target = inner; delegated = true; }
  }
  const r = target.getBoundingClientRect();
  return {
    found: true, delegated: delegated, tag: target.tagName.toLowerCase(),
    x: r.left, y: r.top, width: r.width, height: r.height,
    viewportWidth: window.innerWidth, viewportHeight: window.innerHeight
  };
}"#;

/// Rect of the element that should receive input.
///
/// Composite widgets delegate to their first editable descendant.
pub fn click_target(marker: &str) -> String {
    invoke(tag::TARGET, TARGET_JS, json!({ "marker": marker }))
}

const PREPARE_INPUT_JS: &str = r#"function(a) {
  const el = document.querySelector('[data-webpilot-ref="' + a.marker + '"]');
  if (!el) return { found: false };
  const sel = 'input:not([type="hidden"]), textarea, [contenteditable=""], [contenteditable="true"]';
  const target = el.matches(sel) ? el : (el.querySelector(sel) || el);
  target.focus();
  if ('value' in target && typeof target.value === 'string') {
    target.value = '';
    target.dispatchEvent(new Event('input', { bubbles: true }));
    return { found: true, editable: true };
  }
  if (target.isContentEditable) {
    const range = document.createRange();
    range.selectNodeContents(target);
    const s = window.getSelection();
    s.removeAllRanges();
    s.addRange(range);
    document.execCommand('delete');
    return { found: true, editable: true };
  }
  return { found: true, editable: false };
}"#;

/// Focus the marked element (or its editable descendant) and clear it.
pub fn prepare_input(marker: &str) -> String {
    invoke(
        tag::PREPARE_INPUT,
        PREPARE_INPUT_JS,
        json!({ "marker": marker }),
    )
}

const PROBE_JS: &str = r#"function(a) {
  const body = document.body;
  const text = body ? (body.innerText || '').trim() : '';
  const busy = document.querySelector('[aria-busy="true"]') !== null;
  return { readyState: document.readyState, textLength: text.length, busy: busy };
}"#;

/// Readiness probe: body text length and whether anything is marked busy.
pub fn readiness_probe() -> String {
    invoke(tag::PROBE, PROBE_JS, json!({}))
}
