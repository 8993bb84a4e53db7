//! Live-tab implementations of the engine's page capabilities.
//!
//! Everything here works by evaluating small JavaScript snippets
//! against the open chat tab. The selectors are deliberate couplings
//! to the host page's current markup; when the host ships a redesign
//! these constants are the only place that needs to move.

use async_trait::async_trait;
use chromiumoxide::Page;
use serde::de::DeserializeOwned;

use banter_engine::page::{PageContext, PageError, PromptSubmitter, ResponseObserver};

/// Rendered message blocks in the conversation column.
const MESSAGE_SELECTOR: &str = "div[data-test-render-count]";

/// Attribute the host sets on a message while its response streams.
const STREAMING_SELECTOR: &str = "[data-is-streaming=\"true\"]";

/// Completed assistant message bodies, oldest first.
const ASSISTANT_SELECTOR: &str = "div.font-claude-message";

/// The ProseMirror editor backing the prompt box.
const INPUT_SELECTOR: &str = "div[contenteditable=\"true\"].ProseMirror";

/// Phrases shown by the banner when submissions are capped.
const LIMIT_PHRASES: &[&str] = &["message limit", "limit reached", "out of messages"];

/// Session cookie naming the active organization.
const ORG_COOKIE: &str = "lastActiveOrg";

/// The engine's view of one live chat tab.
pub struct HostedPage {
    page: Page,
}

impl HostedPage {
    pub fn new(page: Page) -> Self {
        Self { page }
    }

    async fn eval<T: DeserializeOwned>(&self, script: &str) -> Result<T, PageError> {
        self.page
            .evaluate(script)
            .await
            .map_err(|e| PageError::Script(e.to_string()))?
            .into_value()
            .map_err(|e| PageError::Script(e.to_string()))
    }

    async fn href(&self) -> Result<String, PageError> {
        self.eval("window.location.href").await
    }
}

#[async_trait]
impl ResponseObserver for HostedPage {
    async fn message_count(&self) -> Result<usize, PageError> {
        self.eval(&format!(
            "document.querySelectorAll('{MESSAGE_SELECTOR}').length"
        ))
        .await
    }

    async fn is_streaming(&self) -> Result<bool, PageError> {
        self.eval(&format!(
            "document.querySelector('{STREAMING_SELECTOR}') !== null"
        ))
        .await
    }

    async fn latest_message_text(&self) -> Result<String, PageError> {
        let script = format!(
            r#"(() => {{
                const blocks = document.querySelectorAll('{ASSISTANT_SELECTOR}');
                if (blocks.length === 0) return '';
                return blocks[blocks.length - 1].innerText;
            }})()"#
        );
        self.eval(&script).await
    }

    async fn has_limit_banner(&self) -> Result<bool, PageError> {
        // Visibility matters: the banner element sticks around hidden
        // after the limit lifts, so offsetParent has to be checked.
        let phrases = serde_json::to_string(LIMIT_PHRASES)
            .map_err(|e| PageError::Script(e.to_string()))?;
        let script = format!(
            r#"(() => {{
                const phrases = {phrases};
                for (const el of document.querySelectorAll('div[role="alert"], [data-testid="limit-banner"]')) {{
                    if (el.offsetParent === null) continue;
                    const text = el.innerText.toLowerCase();
                    if (phrases.some(p => text.includes(p))) return true;
                }}
                return false;
            }})()"#
        );
        self.eval(&script).await
    }
}

#[async_trait]
impl PromptSubmitter for HostedPage {
    /// Fill the prompt editor and fire a synthetic Enter sequence.
    ///
    /// The editor keeps a placeholder paragraph while empty; that one
    /// is replaced, while real content gets the prompt appended as a
    /// fresh paragraph.
    async fn submit(&self, text: &str) -> Result<(), PageError> {
        let literal =
            serde_json::to_string(text).map_err(|e| PageError::Script(e.to_string()))?;
        let script = format!(
            r#"(() => {{
                const input = document.querySelector('{INPUT_SELECTOR}');
                if (!input) return false;
                const para = document.createElement('p');
                para.textContent = {literal};
                const empty = input.textContent.trim().length === 0;
                if (empty) {{
                    input.innerHTML = '';
                }}
                input.appendChild(para);
                input.dispatchEvent(new Event('input', {{ bubbles: true }}));
                for (const type of ['keydown', 'keypress', 'keyup']) {{
                    input.dispatchEvent(new KeyboardEvent(type, {{
                        key: 'Enter',
                        code: 'Enter',
                        keyCode: 13,
                        which: 13,
                        bubbles: true,
                        cancelable: true,
                    }}));
                }}
                return true;
            }})()"#
        );
        let found: bool = self.eval(&script).await?;
        if !found {
            return Err(PageError::ElementNotFound(INPUT_SELECTOR.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl PageContext for HostedPage {
    async fn organization_id(&self) -> Result<String, PageError> {
        let cookies: String = self.eval("document.cookie").await?;
        cookie_value(&cookies, ORG_COOKIE)
            .ok_or_else(|| PageError::Context(format!("{ORG_COOKIE} cookie not set")))
    }

    async fn project_id(&self) -> Result<Option<String>, PageError> {
        Ok(path_segment_after(&self.href().await?, "project"))
    }

    async fn conversation_id(&self) -> Result<Option<String>, PageError> {
        Ok(path_segment_after(&self.href().await?, "chat"))
    }
}

/// Value of `name` in a `document.cookie` string, if present.
fn cookie_value(cookies: &str, name: &str) -> Option<String> {
    cookies.split(';').find_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        (key.trim() == name && !value.is_empty()).then(|| value.trim().to_string())
    })
}

/// The path segment following `marker` in a URL, e.g. the id in
/// `https://claude.ai/project/<id>`.
fn path_segment_after(href: &str, marker: &str) -> Option<String> {
    let url = url::Url::parse(href).ok()?;
    let segments: Vec<&str> = url.path_segments()?.collect();
    segments
        .iter()
        .position(|s| *s == marker)
        .and_then(|i| segments.get(i + 1))
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}
