//! Browser automation over a single shared page session.
//!
//! One process-wide page state, shared across sessions; `browser_open` is
//! required before any other browser operation and the tool descriptions say
//! so. Navigation is an HTTP fetch; `browser_extract` strips tags from the
//! stored document.

use async_trait::async_trait;
use isocode_core::{Tool, ToolCategory, ToolContext, ToolError};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Page-load deadline.
const NAVIGATE_TIMEOUT: Duration = Duration::from_secs(10);
const EXTRACT_CAP: usize = 4_000;

#[derive(Debug, Default, Clone)]
struct PageState {
    url: Option<String>,
    html: String,
}

/// Owner of the process-wide page.
#[derive(Debug, Default)]
pub struct BrowserOwner {
    page: Mutex<Option<PageState>>,
    http: reqwest::Client,
}

impl BrowserOwner {
    pub fn new() -> Self {
        Self::default()
    }

    async fn require_open(&self) -> Result<(), ToolError> {
        if self.page.lock().await.is_none() {
            return Err(ToolError::ExecutionFailed {
                tool_name: "browser".into(),
                reason: "No browser session. Call browser_open first.".into(),
            });
        }
        Ok(())
    }
}

pub struct BrowserOpenTool {
    owner: Arc<BrowserOwner>,
}

impl BrowserOpenTool {
    pub fn new(owner: Arc<BrowserOwner>) -> Self {
        Self { owner }
    }
}

#[async_trait]
impl Tool for BrowserOpenTool {
    fn name(&self) -> &str {
        "browser_open"
    }

    fn description(&self) -> &str {
        "Open the shared browser session. Required before any other browser tool. The session is shared process-wide."
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Browser
    }

    fn parameters_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _args: Value, _ctx: &ToolContext) -> Result<Value, ToolError> {
        let mut page = self.owner.page.lock().await;
        if page.is_none() {
            *page = Some(PageState::default());
        }
        Ok(json!({ "open": true }))
    }
}

pub struct BrowserNavigateTool {
    owner: Arc<BrowserOwner>,
}

impl BrowserNavigateTool {
    pub fn new(owner: Arc<BrowserOwner>) -> Self {
        Self { owner }
    }
}

#[async_trait]
impl Tool for BrowserNavigateTool {
    fn name(&self) -> &str {
        "browser_navigate"
    }

    fn description(&self) -> &str {
        "Navigate the shared browser session to a URL and load the page."
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Browser
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "url": { "type": "string" } },
            "required": ["url"]
        })
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<Value, ToolError> {
        let url = args["url"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'url'".into()))?;
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(ToolError::InvalidArguments(
                "URL must start with http:// or https://".into(),
            ));
        }
        self.owner.require_open().await?;

        let response = self
            .owner
            .http
            .get(url)
            .timeout(NAVIGATE_TIMEOUT)
            .send()
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: "browser_navigate".into(),
                reason: e.to_string(),
            })?;

        let status = response.status().as_u16();
        let html = response.text().await.unwrap_or_default();
        let title = extract_title(&html);

        let mut page = self.owner.page.lock().await;
        *page = Some(PageState {
            url: Some(url.to_string()),
            html,
        });

        Ok(json!({ "url": url, "status": status, "title": title }))
    }
}

pub struct BrowserExtractTool {
    owner: Arc<BrowserOwner>,
}

impl BrowserExtractTool {
    pub fn new(owner: Arc<BrowserOwner>) -> Self {
        Self { owner }
    }
}

#[async_trait]
impl Tool for BrowserExtractTool {
    fn name(&self) -> &str {
        "browser_extract"
    }

    fn description(&self) -> &str {
        "Extract the visible text of the currently loaded page."
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Browser
    }

    fn parameters_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _args: Value, _ctx: &ToolContext) -> Result<Value, ToolError> {
        let page = self.owner.page.lock().await;
        let Some(state) = page.as_ref() else {
            return Err(ToolError::ExecutionFailed {
                tool_name: "browser_extract".into(),
                reason: "No browser session. Call browser_open first.".into(),
            });
        };
        let Some(url) = &state.url else {
            return Err(ToolError::ExecutionFailed {
                tool_name: "browser_extract".into(),
                reason: "No page loaded. Call browser_navigate first.".into(),
            });
        };

        let mut text = strip_tags(&state.html);
        if text.len() > EXTRACT_CAP {
            let mut cut = EXTRACT_CAP;
            while !text.is_char_boundary(cut) {
                cut -= 1;
            }
            text.truncate(cut);
        }
        Ok(json!({ "url": url, "content": text }))
    }
}

pub struct BrowserCloseTool {
    owner: Arc<BrowserOwner>,
}

impl BrowserCloseTool {
    pub fn new(owner: Arc<BrowserOwner>) -> Self {
        Self { owner }
    }
}

#[async_trait]
impl Tool for BrowserCloseTool {
    fn name(&self) -> &str {
        "browser_close"
    }

    fn description(&self) -> &str {
        "Close the shared browser session."
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Browser
    }

    fn parameters_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _args: Value, _ctx: &ToolContext) -> Result<Value, ToolError> {
        *self.owner.page.lock().await = None;
        Ok(json!({ "closed": true }))
    }
}

fn extract_title(html: &str) -> Option<String> {
    // ASCII lowering keeps byte offsets aligned with the original.
    let lower = html.to_ascii_lowercase();
    let start = lower.find("<title")?;
    let open_end = html[start..].find('>')? + start + 1;
    let close = lower[open_end..].find("</title>")? + open_end;
    Some(html[open_end..close].trim().to_string())
}

/// Crude tag stripper: drops script/style bodies, collapses whitespace.
fn strip_tags(html: &str) -> String {
    let mut out = String::with_capacity(html.len() / 4);
    let lower = html.to_ascii_lowercase();
    let mut skip_until: Option<usize> = None;

    for (i, c) in html.char_indices() {
        if let Some(end) = skip_until {
            if i < end {
                continue;
            }
            skip_until = None;
        }
        if c == '<' {
            for (open, close) in [("<script", "</script>"), ("<style", "</style>")] {
                if lower[i..].starts_with(open)
                    && let Some(end) = lower[i..].find(close)
                {
                    skip_until = Some(i + end + close.len());
                }
            }
            if skip_until.is_none()
                && let Some(end) = html[i..].find('>')
            {
                skip_until = Some(i + end + 1);
            }
            continue;
        }
        out.push(c);
    }

    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> ToolContext {
        ToolContext {
            workspace_root: std::path::PathBuf::from("/tmp"),
            session_id: "t".into(),
            auto_mode: true,
        }
    }

    #[tokio::test]
    async fn navigate_requires_open_session() {
        let owner = Arc::new(BrowserOwner::new());
        let err = BrowserNavigateTool::new(owner)
            .execute(json!({ "url": "https://example.com" }), &ctx())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("browser_open"));
    }

    #[tokio::test]
    async fn open_then_close_resets_state() {
        let owner = Arc::new(BrowserOwner::new());
        BrowserOpenTool::new(owner.clone())
            .execute(json!({}), &ctx())
            .await
            .unwrap();
        assert!(owner.require_open().await.is_ok());

        BrowserCloseTool::new(owner.clone())
            .execute(json!({}), &ctx())
            .await
            .unwrap();
        assert!(owner.require_open().await.is_err());
    }

    #[tokio::test]
    async fn navigate_rejects_non_http_urls() {
        let owner = Arc::new(BrowserOwner::new());
        BrowserOpenTool::new(owner.clone())
            .execute(json!({}), &ctx())
            .await
            .unwrap();
        let err = BrowserNavigateTool::new(owner)
            .execute(json!({ "url": "file:///etc/passwd" }), &ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }

    #[test]
    fn strip_tags_drops_script_and_markup() {
        let html = "<html><head><title>Hi</title><script>var x = 1;</script></head>\
                    <body><p>Hello <b>world</b></p></body></html>";
        let text = strip_tags(html);
        assert!(text.contains("Hello world"));
        assert!(!text.contains("var x"));
        assert_eq!(extract_title(html).as_deref(), Some("Hi"));
    }
}
