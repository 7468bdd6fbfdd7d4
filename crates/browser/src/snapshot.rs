//! Reference DOM-to-text extractor.
//!
//! Walks the visible DOM, numbers interactive nodes, records them in the
//! page-side registry (`window.__webpilot`) under the snapshot generation,
//! and emits one line per node: `<id><tag attrs>text`. Plain text runs are
//! emitted as indented quoted lines for context.

use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::debug;
use webpilot_core::error::PageError;
use webpilot_core::page::{Page, Snapshot, SnapshotSource};

use crate::scripts::{self, tag};

const EXTRACT_JS: &str = r#"function(a) {
  const SKIP = new Set(['SCRIPT', 'STYLE', 'NOSCRIPT', 'SVG', 'LINK', 'META', 'TEMPLATE']);
  const INTERACTIVE = 'a[href], button, input:not([type="hidden"]), textarea, select, summary, ' +
    '[role="button"], [role="link"], [role="checkbox"], [role="tab"], [role="menuitem"], ' +
    '[role="option"], [role="combobox"], [role="textbox"], [contenteditable=""], [contenteditable="true"], [onclick]';
  const ATTRS = ['type', 'name', 'placeholder', 'aria-label', 'title', 'alt', 'href', 'role', 'value'];
  const nodes = new Map();
  const lines = [];
  let next = 1;

  function visible(el) {
    const s = getComputedStyle(el);
    if (s.display === 'none' || s.visibility === 'hidden' || s.opacity === '0') return false;
    const r = el.getBoundingClientRect();
    return r.width > 0 || r.height > 0 || el.getClientRects().length > 0;
  }
  function clip(s, n) {
    s = (s || '').replace(/\s+/g, ' ').trim();
    return s.length > n ? s.slice(0, n) + '…' : s;
  }
  function describe(el) {
    const tag = el.tagName.toLowerCase();
    let out = '<' + tag;
    for (const name of ATTRS) {
      let v = name === 'value' ? el.value : el.getAttribute(name);
      if (v === null || v === undefined || v === '') continue;
      out += ' ' + name + '="' + clip(String(v), 80).replace(/"/g, "'") + '"';
    }
    out += '>';
    if (tag !== 'input' && tag !== 'select') out += clip(el.innerText || el.textContent, 120);
    return out;
  }
  function walk(node, depth) {
    if (depth > 40) return;
    for (const child of node.children) {
      if (SKIP.has(child.tagName) || !visible(child)) continue;
      if (child.matches(INTERACTIVE)) {
        const id = next++;
        nodes.set(id, child);
        lines.push('  '.repeat(Math.min(depth, 8)) + id + describe(child));
        if (child.matches('a, button, [role="button"], select')) continue;
      } else if (child.children.length === 0) {
        const t = clip(child.textContent, 200);
        if (t.length > 1) lines.push('  '.repeat(Math.min(depth, 8)) + '"' + t + '"');
      }
      walk(child, depth + 1);
    }
  }

  document.querySelectorAll('[data-webpilot-ref]').forEach(n => n.removeAttribute('data-webpilot-ref'));
  if (document.body) walk(document.body, 0);
  window.__webpilot = { generation: a.generation, nodes: nodes };
  return lines.join('\n');
}"#;

/// The extractor script for one snapshot generation.
pub fn extract_script(generation: u64) -> String {
    scripts::invoke(tag::EXTRACT, EXTRACT_JS, json!({ "generation": generation }))
}

/// Captures snapshots by running the reference extractor in the page.
pub struct ScriptSnapshotSource {
    page: Arc<dyn Page>,
}

impl ScriptSnapshotSource {
    pub fn new(page: Arc<dyn Page>) -> Self {
        Self { page }
    }
}

#[async_trait]
impl SnapshotSource for ScriptSnapshotSource {
    async fn capture(&self, generation: u64) -> Result<Snapshot, PageError> {
        let value = self.page.evaluate(&extract_script(generation)).await?;
        let text = match value {
            Value::String(text) => text,
            Value::Null => String::new(),
            other => {
                return Err(PageError::Evaluation(format!(
                    "extractor returned {other} instead of text"
                )));
            }
        };
        let url = self.page.url().await?;
        debug!(generation, chars = text.len(), %url, "Captured snapshot");
        Ok(Snapshot {
            text,
            url,
            generation,
        })
    }
}
