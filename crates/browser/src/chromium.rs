//! Chromium page over the DevTools protocol.

use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::input::{
    DispatchKeyEventParams, DispatchKeyEventType, DispatchMouseEventParams,
    DispatchMouseEventType, InsertTextParams, MouseButton,
};
use chromiumoxide::{Browser, BrowserConfig as LaunchConfig, Page as CdpPage};
use futures::StreamExt;
use serde_json::Value;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use webpilot_config::BrowserConfig;
use webpilot_core::error::PageError;
use webpilot_core::page::{Key, LoadState, Page};

/// Shift in the CDP modifier bit set.
const SHIFT_MODIFIER: i64 = 8;

pub struct ChromiumPage {
    _browser: Browser,
    page: CdpPage,
    handler: JoinHandle<()>,
}

impl ChromiumPage {
    /// Launch a browser and open one tab on `start_url`.
    pub async fn launch(config: &BrowserConfig, start_url: &str) -> Result<Self, PageError> {
        let mut builder = LaunchConfig::builder();
        if !config.headless {
            builder = builder.with_head();
        }
        let launch = builder
            .build()
            .map_err(|e| PageError::Disconnected(format!("invalid browser config: {e}")))?;

        let (browser, mut handler) = Browser::launch(launch)
            .await
            .map_err(|e| PageError::Disconnected(format!("failed to launch browser: {e}")))?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!(error = %e, "CDP handler event error");
                }
            }
        });

        let page = browser
            .new_page(start_url)
            .await
            .map_err(|e| PageError::Navigation {
                url: start_url.to_string(),
                reason: e.to_string(),
            })?;
        info!(url = start_url, headless = config.headless, "Browser ready");

        Ok(Self {
            _browser: browser,
            page,
            handler,
        })
    }

    async fn mouse(&self, kind: DispatchMouseEventType, x: f64, y: f64) -> Result<(), PageError> {
        let params = DispatchMouseEventParams::builder()
            .r#type(kind)
            .x(x)
            .y(y)
            .button(MouseButton::Left)
            .click_count(1)
            .build()
            .map_err(PageError::Input)?;
        self.page
            .execute(params)
            .await
            .map_err(|e| PageError::Input(e.to_string()))?;
        Ok(())
    }

    async fn key_event(
        &self,
        kind: DispatchKeyEventType,
        modifiers: i64,
        text: Option<&str>,
    ) -> Result<(), PageError> {
        let mut builder = DispatchKeyEventParams::builder()
            .r#type(kind)
            .key("Enter")
            .code("Enter")
            .windows_virtual_key_code(13)
            .native_virtual_key_code(13)
            .modifiers(modifiers);
        if let Some(text) = text {
            builder = builder.text(text);
        }
        let params = builder.build().map_err(PageError::Input)?;
        self.page
            .execute(params)
            .await
            .map_err(|e| PageError::Input(e.to_string()))?;
        Ok(())
    }
}

impl Drop for ChromiumPage {
    fn drop(&mut self) {
        self.handler.abort();
    }
}

#[async_trait]
impl Page for ChromiumPage {
    async fn evaluate(&self, script: &str) -> Result<Value, PageError> {
        let result = self
            .page
            .evaluate(script)
            .await
            .map_err(|e| PageError::Evaluation(e.to_string()))?;
        Ok(result.value().cloned().unwrap_or(Value::Null))
    }

    async fn click_at(&self, x: f64, y: f64) -> Result<(), PageError> {
        self.mouse(DispatchMouseEventType::MouseMoved, x, y).await?;
        self.mouse(DispatchMouseEventType::MousePressed, x, y).await?;
        tokio::time::sleep(Duration::from_millis(40)).await;
        self.mouse(DispatchMouseEventType::MouseReleased, x, y).await
    }

    async fn insert_text(&self, text: &str) -> Result<(), PageError> {
        self.page
            .execute(InsertTextParams::new(text))
            .await
            .map_err(|e| PageError::Input(e.to_string()))?;
        Ok(())
    }

    async fn press_key(&self, key: Key) -> Result<(), PageError> {
        let modifiers = match key {
            Key::Enter => 0,
            Key::ShiftEnter => SHIFT_MODIFIER,
        };
        self.key_event(DispatchKeyEventType::KeyDown, modifiers, None).await?;
        self.key_event(DispatchKeyEventType::Char, modifiers, Some("\r")).await?;
        self.key_event(DispatchKeyEventType::KeyUp, modifiers, None).await
    }

    async fn navigate(&self, url: &str) -> Result<(), PageError> {
        if let Err(e) = self.page.goto(url).await {
            // Slow pages can time out the navigation wait after the load has started.
            let current = self.page.url().await.ok().flatten().unwrap_or_default();
            if current == "about:blank" || current.is_empty() {
                return Err(PageError::Navigation {
                    url: url.to_string(),
                    reason: e.to_string(),
                });
            }
            warn!(url, error = %e, "Navigation wait failed, continuing");
        }
        Ok(())
    }

    async fn lifecycle(&self) -> Result<LoadState, PageError> {
        let state = self.evaluate("document.readyState").await?;
        Ok(LoadState::from_ready_state(state.as_str().unwrap_or_default()))
    }

    async fn url(&self) -> Result<String, PageError> {
        self.page
            .url()
            .await
            .map(Option::unwrap_or_default)
            .map_err(|e| PageError::Disconnected(e.to_string()))
    }
}
