//! In-memory [`Page`] for tests.
//!
//! Answers the executor's tagged scripts from a small element table and
//! records every input it receives, so tests can assert on exactly what
//! would have reached a real browser.

use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use webpilot_core::error::PageError;
use webpilot_core::page::{Key, LoadState, Page};

use crate::scripts::{self, tag};

/// Input that reached the page.
#[derive(Debug, Clone, PartialEq)]
pub enum PageEvent {
    Click { x: f64, y: f64 },
    Text(String),
    Key(Key),
    Navigate(String),
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Rect {
    x: f64,
    y: f64,
    width: f64,
    height: f64,
}

/// One element in the fake DOM.
#[derive(Debug, Clone)]
pub struct FakeElement {
    tag: String,
    rect: Rect,
    scroll_target: Option<(f64, f64)>,
    ignores_smooth: bool,
    delegate: Option<Rect>,
    removed: bool,
}

impl FakeElement {
    pub fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_string(),
            rect: Rect {
                x: 0.0,
                y: 0.0,
                width: 100.0,
                height: 20.0,
            },
            scroll_target: None,
            ignores_smooth: false,
            delegate: None,
            removed: false,
        }
    }

    pub fn at(mut self, x: f64, y: f64, width: f64, height: f64) -> Self {
        self.rect = Rect { x, y, width, height };
        self
    }

    /// Where the element ends up once scrolled into view.
    pub fn scrolls_to(mut self, x: f64, y: f64) -> Self {
        self.scroll_target = Some((x, y));
        self
    }

    /// Smooth scrolls leave the element where it is.
    pub fn ignores_smooth_scroll(mut self) -> Self {
        self.ignores_smooth = true;
        self
    }

    /// Make this a composite widget whose input lives at the given rect.
    pub fn delegates_to(mut self, x: f64, y: f64, width: f64, height: f64) -> Self {
        self.delegate = Some(Rect { x, y, width, height });
        self
    }

    fn editable(&self) -> bool {
        self.delegate.is_some() || matches!(self.tag.as_str(), "input" | "textarea")
    }
}

struct State {
    url: String,
    load_state: LoadState,
    complete_after: Option<u32>,
    lifecycle_checks: u32,
    viewport: (f64, f64),
    generation: Option<u64>,
    elements: HashMap<u32, FakeElement>,
    snapshots: VecDeque<String>,
    events: Vec<PageEvent>,
    scripts: Vec<String>,
    scroll_behaviors: Vec<String>,
}

pub struct ScriptedPage {
    state: Mutex<State>,
}

impl ScriptedPage {
    pub fn new(url: &str) -> Self {
        Self {
            state: Mutex::new(State {
                url: url.to_string(),
                load_state: LoadState::Complete,
                complete_after: None,
                lifecycle_checks: 0,
                viewport: (1280.0, 800.0),
                generation: None,
                elements: HashMap::new(),
                snapshots: VecDeque::new(),
                events: Vec::new(),
                scripts: Vec::new(),
                scroll_behaviors: Vec::new(),
            }),
        }
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut State) -> R) -> R {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut state)
    }

    pub fn add_element(&self, id: u32, element: FakeElement) {
        self.with_state(|s| {
            s.elements.insert(id, element);
        });
    }

    pub fn remove_element(&self, id: u32) {
        self.with_state(|s| {
            if let Some(el) = s.elements.get_mut(&id) {
                el.removed = true;
            }
        });
    }

    /// Queue a snapshot text. Each extraction serves the front of the
    /// queue; the last one keeps being served once the queue drains.
    pub fn push_snapshot(&self, text: &str) {
        self.with_state(|s| s.snapshots.push_back(text.to_string()));
    }

    /// Pretend the extractor already ran for `generation`.
    pub fn install_generation(&self, generation: u64) {
        self.with_state(|s| s.generation = Some(generation));
    }

    pub fn set_load_state(&self, state: LoadState) {
        self.with_state(|s| s.load_state = state);
    }

    /// Report `complete` once `polls` lifecycle checks have seen the current state.
    pub fn complete_after_polls(&self, polls: u32) {
        self.with_state(|s| s.complete_after = Some(polls));
    }

    pub fn lifecycle_checks(&self) -> u32 {
        self.with_state(|s| s.lifecycle_checks)
    }

    pub fn events(&self) -> Vec<PageEvent> {
        self.with_state(|s| s.events.clone())
    }

    pub fn script_count(&self, name: &str) -> usize {
        self.with_state(|s| s.scripts.iter().filter(|t| t.as_str() == name).count())
    }

    pub fn scroll_behaviors(&self) -> Vec<String> {
        self.with_state(|s| s.scroll_behaviors.clone())
    }

    fn answer(state: &mut State, name: &str, args: &Value) -> Result<Value, PageError> {
        let marker_id = || -> Option<u32> {
            args["marker"]
                .as_str()?
                .rsplit_once('-')?
                .1
                .parse()
                .ok()
        };
        let (vw, vh) = state.viewport;

        match name {
            tag::RESOLVE => {
                let generation = args["generation"].as_u64();
                if generation.is_none() || state.generation != generation {
                    return Ok(json!({ "found": false, "reason": "stale" }));
                }
                let id = args["id"].as_u64().unwrap_or_default() as u32;
                match state.elements.get(&id) {
                    Some(el) if !el.removed => Ok(json!({
                        "found": true,
                        "marker": format!("{}-{id}", generation.unwrap_or_default()),
                        "tag": el.tag,
                    })),
                    _ => Ok(json!({ "found": false, "reason": "missing" })),
                }
            }
            tag::MEASURE => match marker_id().and_then(|id| state.elements.get(&id)) {
                Some(el) if !el.removed => Ok(json!({
                    "found": true,
                    "x": el.rect.x, "y": el.rect.y,
                    "width": el.rect.width, "height": el.rect.height,
                    "viewportWidth": vw, "viewportHeight": vh,
                })),
                _ => Ok(json!({ "found": false })),
            },
            tag::SCROLL => {
                let behavior = args["behavior"].as_str().unwrap_or_default().to_string();
                state.scroll_behaviors.push(behavior.clone());
                if let Some(el) = marker_id().and_then(|id| state.elements.get_mut(&id)) {
                    let skip = el.ignores_smooth && behavior == "smooth";
                    if let (Some((x, y)), false) = (el.scroll_target, skip) {
                        el.rect.x = x;
                        el.rect.y = y;
                    }
                }
                Ok(json!({ "scrolled": true, "ancestors": 0 }))
            }
            tag::TARGET => match marker_id().and_then(|id| state.elements.get(&id)) {
                Some(el) if !el.removed => {
                    let rect = el.delegate.unwrap_or(el.rect);
                    Ok(json!({
                        "found": true,
                        "delegated": el.delegate.is_some(),
                        "tag": if el.delegate.is_some() { "input" } else { el.tag.as_str() },
                        "x": rect.x, "y": rect.y,
                        "width": rect.width, "height": rect.height,
                        "viewportWidth": vw, "viewportHeight": vh,
                    }))
                }
                _ => Ok(json!({ "found": false })),
            },
            tag::PREPARE_INPUT => match marker_id().and_then(|id| state.elements.get(&id)) {
                Some(el) if !el.removed => Ok(json!({ "found": true, "editable": el.editable() })),
                _ => Ok(json!({ "found": false })),
            },
            tag::PROBE => {
                let text_length = state.snapshots.front().map(|s| s.len()).unwrap_or(0);
                Ok(json!({ "readyState": "complete", "textLength": text_length, "busy": false }))
            }
            tag::EXTRACT => {
                state.generation = args["generation"].as_u64();
                let text = if state.snapshots.len() > 1 {
                    state.snapshots.pop_front()
                } else {
                    state.snapshots.front().cloned()
                };
                Ok(Value::String(text.unwrap_or_default()))
            }
            other => Err(PageError::Evaluation(format!("unscripted script '{other}'"))),
        }
    }
}

#[async_trait]
impl Page for ScriptedPage {
    async fn evaluate(&self, script: &str) -> Result<Value, PageError> {
        let (name, args) = scripts::split_invocation(script)
            .ok_or_else(|| PageError::Evaluation("unrecognised script".into()))?;
        self.with_state(|s| {
            s.scripts.push(name.to_string());
            Self::answer(s, name, &args)
        })
    }

    async fn click_at(&self, x: f64, y: f64) -> Result<(), PageError> {
        self.with_state(|s| s.events.push(PageEvent::Click { x, y }));
        Ok(())
    }

    async fn insert_text(&self, text: &str) -> Result<(), PageError> {
        self.with_state(|s| s.events.push(PageEvent::Text(text.to_string())));
        Ok(())
    }

    async fn press_key(&self, key: Key) -> Result<(), PageError> {
        self.with_state(|s| s.events.push(PageEvent::Key(key)));
        Ok(())
    }

    async fn navigate(&self, url: &str) -> Result<(), PageError> {
        self.with_state(|s| {
            s.events.push(PageEvent::Navigate(url.to_string()));
            s.url = url.to_string();
            s.generation = None;
        });
        Ok(())
    }

    async fn lifecycle(&self) -> Result<LoadState, PageError> {
        Ok(self.with_state(|s| {
            s.lifecycle_checks += 1;
            if let Some(after) = s.complete_after {
                if s.lifecycle_checks > after {
                    s.load_state = LoadState::Complete;
                }
            }
            s.load_state
        }))
    }

    async fn url(&self) -> Result<String, PageError> {
        Ok(self.with_state(|s| s.url.clone()))
    }
}
