//! DOM action executor.
//!
//! Turns a validated [`Action`] into page input:
//! resolve the handle, bring the element into view, find its click point,
//! then dispatch trusted input through the [`Page`] trait.

use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use webpilot_config::BrowserConfig;
use webpilot_core::action::{Action, ActionResult};
use webpilot_core::error::{ElementError, PageError};
use webpilot_core::page::{ElementHandle, Key, Page};

use crate::geometry::{Measurement, Point, Visibility};
use crate::registry::ElementRegistry;
use crate::scripts::{self, ScrollBehavior};
use crate::stability::{Stability, StabilityGate};
use crate::text;

/// A handle that was found on the page and stamped with a marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedElement {
    pub handle: ElementHandle,
    pub marker: String,
    pub tag: String,
}

#[derive(Debug, Deserialize)]
struct ResolveReply {
    found: bool,
    #[serde(default)]
    marker: Option<String>,
    #[serde(default)]
    tag: Option<String>,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TargetReply {
    #[serde(default)]
    delegated: bool,
    #[serde(default)]
    tag: String,
    #[serde(flatten)]
    rect: Measurement,
}

#[derive(Debug, Deserialize)]
struct PrepareReply {
    found: bool,
    #[serde(default)]
    editable: bool,
}

pub struct DomExecutor {
    page: Arc<dyn Page>,
    registry: Arc<ElementRegistry>,
    stability: StabilityGate,
    scroll_settle: Duration,
    max_wait: Duration,
}

impl DomExecutor {
    pub fn new(page: Arc<dyn Page>, registry: Arc<ElementRegistry>) -> Self {
        Self::from_config(page, registry, &BrowserConfig::default(), 30.0)
    }

    pub fn from_config(
        page: Arc<dyn Page>,
        registry: Arc<ElementRegistry>,
        config: &BrowserConfig,
        max_wait_secs: f64,
    ) -> Self {
        Self {
            page,
            registry,
            stability: StabilityGate::from_config(config),
            scroll_settle: Duration::from_millis(config.scroll_settle_ms),
            max_wait: Duration::try_from_secs_f64(max_wait_secs.max(0.0)).unwrap_or(Duration::MAX),
        }
    }

    pub fn with_stability(mut self, gate: StabilityGate) -> Self {
        self.stability = gate;
        self
    }

    pub fn page(&self) -> &Arc<dyn Page> {
        &self.page
    }

    pub fn registry(&self) -> &Arc<ElementRegistry> {
        &self.registry
    }

    /// Wait until the page is settled, or until the stability timeout.
    pub async fn await_stability(&self) -> Stability {
        self.stability.await_stability(self.page.as_ref()).await
    }

    /// Look up a handle and stamp its marker attribute.
    ///
    /// Handles from an older snapshot are rejected before the page is
    /// touched; elements that left the DOM are reported as not found.
    pub async fn resolve(&self, handle: ElementHandle) -> Result<ResolvedElement, ElementError> {
        self.registry.check(handle)?;

        let value = self.page.evaluate(&scripts::resolve(handle)).await?;
        let reply: ResolveReply = parse_reply("resolve", value)?;
        match (reply.found, reply.marker) {
            (true, Some(marker)) => Ok(ResolvedElement {
                handle,
                marker,
                tag: reply.tag.unwrap_or_default(),
            }),
            _ => {
                debug!(
                    %handle,
                    reason = reply.reason.as_deref().unwrap_or("unknown"),
                    "Element did not resolve"
                );
                Err(ElementError::NotFound { id: handle.id })
            }
        }
    }

    /// Scroll the element into view.
    ///
    /// One smooth attempt, then one instant retry. Returns `Failed` with
    /// diagnostics when neither attempt brought the element closer.
    pub async fn ensure_visible(&self, handle: ElementHandle) -> Result<Visibility, ElementError> {
        let element = self.resolve(handle).await?;
        self.make_visible(&element).await
    }

    /// Center of the element that should receive input, in viewport coordinates.
    pub async fn coordinates_of(&self, handle: ElementHandle) -> Result<Point, ElementError> {
        let element = self.resolve(handle).await?;
        self.click_point(&element).await
    }

    /// Dispatch one action. Terminal actions are accepted without touching the page.
    pub async fn perform(
        &self,
        action: &Action,
        generation: u64,
    ) -> Result<ActionResult, ElementError> {
        match action {
            Action::Click { element_id } => {
                let element = self.resolve(ElementHandle::new(*element_id, generation)).await?;
                let point = self.click_point(&element).await?;
                self.page.click_at(point.x, point.y).await?;
                info!(id = element_id, x = point.x, y = point.y, "Clicked element");
                Ok(ActionResult::ok(format!("Clicked element {element_id}")))
            }
            Action::SetValue { element_id, value } => {
                let plan = text::plan(value)?;
                let element = self.resolve(ElementHandle::new(*element_id, generation)).await?;
                let point = self.click_point(&element).await?;
                self.page.click_at(point.x, point.y).await?;

                let reply: PrepareReply = parse_reply(
                    "prepare-input",
                    self.page
                        .evaluate(&scripts::prepare_input(&element.marker))
                        .await?,
                )?;
                if !reply.found {
                    return Err(ElementError::NotFound { id: *element_id });
                }
                if !reply.editable {
                    warn!(id = element_id, tag = %element.tag, "Typing into a non-editable element");
                }

                for (i, line) in plan.lines.iter().enumerate() {
                    if i > 0 {
                        self.page.press_key(Key::ShiftEnter).await?;
                    }
                    if !line.is_empty() {
                        self.page.insert_text(line).await?;
                    }
                }
                if plan.submit {
                    self.page.press_key(Key::Enter).await?;
                }

                info!(id = element_id, submit = plan.submit, "Set element value");
                let message = if plan.submit {
                    format!("Typed into element {element_id} and submitted")
                } else {
                    format!("Typed into element {element_id}")
                };
                Ok(ActionResult::ok(message))
            }
            Action::Navigate { url } => {
                self.navigate(url).await?;
                Ok(ActionResult::ok(format!("Navigated to {url}")))
            }
            Action::Waiting { seconds } => {
                let wait = self.wait_duration(*seconds);
                debug!(requested = seconds, actual_ms = wait.as_millis() as u64, "Waiting");
                tokio::time::sleep(wait).await;
                Ok(ActionResult::ok(format!("Waited {:.1}s", wait.as_secs_f64())))
            }
            Action::Finish => Ok(ActionResult::ok("Task finished")),
            Action::Fail { message } | Action::Respond { message } => {
                Ok(ActionResult::ok(message.clone()))
            }
        }
    }

    /// Change location and wait for the new page to settle.
    pub async fn navigate(&self, url: &str) -> Result<(), PageError> {
        info!(url, "Navigating");
        self.page.navigate(url).await?;
        self.await_stability().await;
        Ok(())
    }

    /// Requested wait, clamped to `[0, max_wait]`.
    pub fn wait_duration(&self, seconds: f64) -> Duration {
        if !seconds.is_finite() || seconds <= 0.0 {
            return Duration::ZERO;
        }
        Duration::try_from_secs_f64(seconds).map_or(self.max_wait, |wait| wait.min(self.max_wait))
    }

    async fn measure(&self, element: &ResolvedElement) -> Result<Measurement, ElementError> {
        let value = self.page.evaluate(&scripts::measure(&element.marker)).await?;
        if value.get("found").and_then(Value::as_bool) == Some(false) {
            return Err(ElementError::NotFound {
                id: element.handle.id,
            });
        }
        serde_json::from_value(value.clone()).map_err(|_| ElementError::InvalidGeometry {
            id: element.handle.id,
            diagnostics: format!("unreadable rect {value}"),
        })
    }

    async fn make_visible(&self, element: &ResolvedElement) -> Result<Visibility, ElementError> {
        let initial = self.measure(element).await?;
        if initial.is_finite() && initial.fully_visible() {
            return Ok(Visibility::FullyVisible);
        }

        let mut outcome = Visibility::Failed {
            diagnostics: initial.describe(),
        };
        for behavior in [ScrollBehavior::Smooth, ScrollBehavior::Instant] {
            self.page
                .evaluate(&scripts::scroll_into_view(&element.marker, behavior))
                .await?;
            tokio::time::sleep(self.scroll_settle).await;

            let after = self.measure(element).await?;
            outcome = after.visibility_since(&initial);
            debug!(handle = %element.handle, ?behavior, ?outcome, "Scroll attempt");
            if matches!(outcome, Visibility::FullyVisible | Visibility::PartiallyVisible) {
                return Ok(outcome);
            }
        }

        Ok(match outcome {
            Visibility::Failed { diagnostics } => Visibility::Failed {
                diagnostics: format!("after smooth and instant scroll: {diagnostics}"),
            },
            other => other,
        })
    }

    async fn click_point(&self, element: &ResolvedElement) -> Result<Point, ElementError> {
        let id = element.handle.id;
        match self.make_visible(element).await? {
            Visibility::Failed { diagnostics } => {
                return Err(ElementError::NotVisible { id, diagnostics });
            }
            Visibility::MadeProgress => {
                warn!(id, "Element still off screen after scrolling, clicking anyway");
            }
            _ => {}
        }
        tokio::time::sleep(self.scroll_settle).await;

        let value = self
            .page
            .evaluate(&scripts::click_target(&element.marker))
            .await?;
        if value.get("found").and_then(Value::as_bool) == Some(false) {
            return Err(ElementError::NotFound { id });
        }
        let target: TargetReply =
            serde_json::from_value(value.clone()).map_err(|_| ElementError::InvalidGeometry {
                id,
                diagnostics: format!("non-finite or missing coordinates in {value}"),
            })?;

        let rect = target.rect;
        if !rect.is_finite() || rect.width <= 0.0 || rect.height <= 0.0 {
            return Err(ElementError::InvalidGeometry {
                id,
                diagnostics: format!("<{}> has {}", target.tag, rect.describe()),
            });
        }
        if target.delegated {
            debug!(id, tag = %target.tag, "Delegated to inner input");
        }
        let point = rect.center();
        if !point.x.is_finite() || !point.y.is_finite() {
            return Err(ElementError::InvalidGeometry {
                id,
                diagnostics: rect.describe(),
            });
        }
        Ok(point)
    }
}

fn parse_reply<T: serde::de::DeserializeOwned>(script: &str, value: Value) -> Result<T, ElementError> {
    serde_json::from_value(value).map_err(|e| {
        ElementError::Page(PageError::Evaluation(format!(
            "unexpected {script} result: {e}"
        )))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{FakeElement, PageEvent, ScriptedPage};

    fn setup(page: ScriptedPage) -> (Arc<ScriptedPage>, DomExecutor, u64) {
        let page = Arc::new(page);
        let registry = Arc::new(ElementRegistry::new());
        let generation = registry.advance();
        page.install_generation(generation);
        let executor = DomExecutor::new(page.clone(), registry)
            .with_stability(StabilityGate {
                timeout: Duration::from_secs(2),
                poll: Duration::from_millis(50),
                settle: Duration::from_millis(10),
            });
        (page, executor, generation)
    }

    #[tokio::test(start_paused = true)]
    async fn click_dispatches_at_center() {
        let page = ScriptedPage::new("https://example.com");
        page.add_element(42, FakeElement::new("button").at(100.0, 200.0, 80.0, 30.0));
        let (page, executor, generation) = setup(page);

        let result = executor
            .perform(&Action::Click { element_id: 42 }, generation)
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(page.events(), vec![PageEvent::Click { x: 140.0, y: 215.0 }]);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_handle_is_rejected_before_touching_page() {
        let page = ScriptedPage::new("https://example.com");
        page.add_element(42, FakeElement::new("button").at(0.0, 0.0, 10.0, 10.0));
        let (page, executor, generation) = setup(page);
        executor.registry().advance();

        let err = executor
            .perform(&Action::Click { element_id: 42 }, generation)
            .await
            .unwrap_err();
        assert!(matches!(err, ElementError::Stale { id: 42, .. }));
        assert!(err.to_string().contains("not found"));
        assert_eq!(page.script_count(scripts::tag::RESOLVE), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_element_is_not_found() {
        let (_page, executor, generation) = setup(ScriptedPage::new("https://example.com"));
        let err = executor
            .resolve(ElementHandle::new(9, generation))
            .await
            .unwrap_err();
        assert!(matches!(err, ElementError::NotFound { id: 9 }));
    }

    #[tokio::test(start_paused = true)]
    async fn resolve_is_idempotent() {
        let page = ScriptedPage::new("https://example.com");
        page.add_element(3, FakeElement::new("a").at(0.0, 0.0, 10.0, 10.0));
        let (_page, executor, generation) = setup(page);
        let a = executor.resolve(ElementHandle::new(3, generation)).await.unwrap();
        let b = executor.resolve(ElementHandle::new(3, generation)).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.marker, format!("{generation}-3"));
    }

    #[tokio::test(start_paused = true)]
    async fn off_screen_element_scrolls_smooth_first() {
        let page = ScriptedPage::new("https://example.com");
        page.add_element(
            5,
            FakeElement::new("button")
                .at(100.0, 2400.0, 80.0, 30.0)
                .scrolls_to(100.0, 385.0),
        );
        let (page, executor, generation) = setup(page);

        let visibility = executor
            .ensure_visible(ElementHandle::new(5, generation))
            .await
            .unwrap();
        assert_eq!(visibility, Visibility::FullyVisible);
        assert_eq!(page.scroll_behaviors(), vec!["smooth".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn instant_retry_after_smooth_makes_no_progress() {
        let page = ScriptedPage::new("https://example.com");
        page.add_element(
            5,
            FakeElement::new("button")
                .at(100.0, 2400.0, 80.0, 30.0)
                .ignores_smooth_scroll()
                .scrolls_to(100.0, 385.0),
        );
        let (page, executor, generation) = setup(page);

        let visibility = executor
            .ensure_visible(ElementHandle::new(5, generation))
            .await
            .unwrap();
        assert_eq!(visibility, Visibility::FullyVisible);
        assert_eq!(
            page.scroll_behaviors(),
            vec!["smooth".to_string(), "instant".to_string()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn unscrollable_element_fails_with_diagnostics() {
        let page = ScriptedPage::new("https://example.com");
        page.add_element(5, FakeElement::new("button").at(100.0, 2400.0, 80.0, 30.0));
        let (page, executor, generation) = setup(page);

        let err = executor
            .perform(&Action::Click { element_id: 5 }, generation)
            .await
            .unwrap_err();
        match err {
            ElementError::NotVisible { id, diagnostics } => {
                assert_eq!(id, 5);
                assert!(diagnostics.contains("smooth and instant"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(page.events().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn zero_size_element_is_rejected() {
        let page = ScriptedPage::new("https://example.com");
        page.add_element(8, FakeElement::new("button").at(10.0, 10.0, 0.0, 0.0));
        let (_page, executor, generation) = setup(page);

        let err = executor
            .coordinates_of(ElementHandle::new(8, generation))
            .await
            .unwrap_err();
        assert!(matches!(err, ElementError::InvalidGeometry { id: 8, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn composite_widget_delegates_to_inner_input() {
        let page = ScriptedPage::new("https://example.com");
        page.add_element(
            4,
            FakeElement::new("div")
                .at(0.0, 0.0, 400.0, 100.0)
                .delegates_to(20.0, 40.0, 200.0, 20.0),
        );
        let (_page, executor, generation) = setup(page);

        let point = executor
            .coordinates_of(ElementHandle::new(4, generation))
            .await
            .unwrap();
        assert_eq!(point, Point { x: 120.0, y: 50.0 });
    }

    #[tokio::test(start_paused = true)]
    async fn set_value_types_lines_and_submits() {
        let page = ScriptedPage::new("https://example.com");
        page.add_element(7, FakeElement::new("textarea").at(0.0, 0.0, 300.0, 60.0));
        let (page, executor, generation) = setup(page);

        let result = executor
            .perform(
                &Action::SetValue {
                    element_id: 7,
                    value: r"Hi\rthere\n".into(),
                },
                generation,
            )
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(
            page.events(),
            vec![
                PageEvent::Click { x: 150.0, y: 30.0 },
                PageEvent::Text("Hi".into()),
                PageEvent::Key(Key::ShiftEnter),
                PageEvent::Text("there".into()),
                PageEvent::Key(Key::Enter),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn text_policy_violation_touches_nothing() {
        let page = ScriptedPage::new("https://example.com");
        page.add_element(7, FakeElement::new("input").at(0.0, 0.0, 300.0, 30.0));
        let (page, executor, generation) = setup(page);

        let err = executor
            .perform(
                &Action::SetValue {
                    element_id: 7,
                    value: r"a\nb".into(),
                },
                generation,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ElementError::TextPolicy(_)));
        assert!(page.events().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn waiting_is_capped() {
        let (_page, executor, generation) = setup(ScriptedPage::new("https://example.com"));
        assert_eq!(executor.wait_duration(600.0), Duration::from_secs(30));
        assert_eq!(executor.wait_duration(-1.0), Duration::ZERO);
        assert_eq!(executor.wait_duration(f64::NAN), Duration::ZERO);
        assert_eq!(executor.wait_duration(1e30), Duration::from_secs(30));

        let started = tokio::time::Instant::now();
        executor
            .perform(&Action::Waiting { seconds: 2.0 }, generation)
            .await
            .unwrap();
        assert!(started.elapsed() >= Duration::from_secs(2));
    }

    #[test]
    fn oversized_wait_cap_saturates() {
        let page: Arc<dyn Page> = Arc::new(ScriptedPage::new("https://example.com"));
        let executor = DomExecutor::from_config(
            page,
            Arc::new(ElementRegistry::new()),
            &BrowserConfig::default(),
            1e20,
        );
        assert_eq!(executor.wait_duration(1e25), Duration::MAX);
        assert_eq!(executor.wait_duration(5.0), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn navigate_changes_location_and_waits() {
        let page = ScriptedPage::new("about:blank");
        page.push_snapshot("1<a href=\"/\">Home</a>");
        let (page, executor, generation) = setup(page);

        executor
            .perform(
                &Action::Navigate {
                    url: "https://example.com/shop".into(),
                },
                generation,
            )
            .await
            .unwrap();
        assert_eq!(
            page.events(),
            vec![PageEvent::Navigate("https://example.com/shop".into())]
        );
        assert_eq!(page.url().await.unwrap(), "https://example.com/shop");
    }
}
