use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::task::JoinHandle;

/// A launched Chromium instance with one tab pointed at the chat site.
pub struct BrowserSession {
    browser: Browser,
    handler_task: JoinHandle<()>,
    page: Page,
    user_data_dir: Option<PathBuf>,
    cleanup_user_data_dir: bool,
}

impl BrowserSession {
    /// Launch the browser and open `chat_url` in a fresh tab.
    ///
    /// `profile_dir` keeps the login session between runs; when it is
    /// `None` the `BANTER_USER_DATA_DIR` environment variable is
    /// consulted, and failing that a throwaway profile is created and
    /// removed again on [`close`](Self::close).
    pub async fn launch(
        chat_url: &str,
        visible: bool,
        profile_dir: Option<&Path>,
    ) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let mut config_builder = BrowserConfig::builder();
        config_builder = config_builder.no_sandbox(); // Often needed in docker/CI/restricted envs
        let (user_data_dir, cleanup_user_data_dir) = resolve_user_data_dir(profile_dir)?;
        config_builder = config_builder.user_data_dir(&user_data_dir);

        if visible {
            tracing::info!("Launching browser in visible mode");
            config_builder = config_builder.with_head();
        } else {
            tracing::info!("Launching browser in headless mode");
        }

        // Support custom Chrome path via CHROME_BIN environment variable
        if let Ok(chrome_bin) = std::env::var("CHROME_BIN") {
            tracing::info!("Using custom Chrome binary: {}", chrome_bin);
            config_builder = config_builder.chrome_executable(chrome_bin);
        }

        let (browser, mut handler) = Browser::launch(
            config_builder
                .build()
                .map_err(|e| format!("Failed to build browser config: {}", e))?,
        )
        .await
        .map_err(|e| format!("Failed to launch browser: {}", e))?;

        let handler_task = tokio::spawn(async move {
            while let Some(h) = handler.next().await {
                if let Err(e) = h {
                    tracing::error!("Browser handler error (ignoring): {}", e);
                    continue;
                }
            }
            tracing::info!("Browser handler task ended");
        });

        let page = browser
            .new_page(chat_url)
            .await
            .map_err(|e| format!("Failed to open chat page: {}", e))?;

        let mut console_events = page
            .event_listener::<chromiumoxide::cdp::js_protocol::runtime::EventConsoleApiCalled>()
            .await
            .map_err(|e| format!("Failed to subscribe to console events: {}", e))?;

        tokio::spawn(async move {
            while let Some(event) = console_events.next().await {
                let args_str: Vec<String> = event
                    .args
                    .iter()
                    .map(|arg| {
                        arg.description
                            .clone()
                            .unwrap_or_else(|| "unknown".to_string())
                    })
                    .collect();
                tracing::debug!(
                    "Browser Console [{:?}]: {}",
                    event.r#type,
                    args_str.join(" ")
                );
            }
        });

        // Auto-accept JavaScript dialogs so they never block evaluation
        let mut dialog_events = page
            .event_listener::<chromiumoxide::cdp::browser_protocol::page::EventJavascriptDialogOpening>()
            .await
            .map_err(|e| format!("Failed to subscribe to dialog events: {}", e))?;

        let page_clone = page.clone();
        tokio::spawn(async move {
            while let Some(event) = dialog_events.next().await {
                tracing::info!(
                    "Handling JavaScript Dialog: {} ({:?})",
                    event.message,
                    event.r#type
                );
                let cmd =
                    chromiumoxide::cdp::browser_protocol::page::HandleJavaScriptDialogParams::new(
                        true,
                    );
                if let Err(e) = page_clone.execute(cmd).await {
                    tracing::error!("Failed to handle/accept dialog: {}", e);
                }
            }
        });

        Ok(Self {
            browser,
            handler_task,
            page,
            user_data_dir: Some(user_data_dir),
            cleanup_user_data_dir,
        })
    }

    pub fn page(&self) -> &Page {
        &self.page
    }

    /// Cookie header for requests to `host`, assembled from the
    /// browser's cookie jar. CDP sees HttpOnly cookies too, which is
    /// what makes the session cookie available to [`crate::ApiClient`].
    pub async fn cookie_header(
        &self,
        host: &str,
    ) -> Result<String, Box<dyn std::error::Error + Send + Sync>> {
        let cookies = self
            .page
            .get_cookies()
            .await
            .map_err(|e| format!("Failed to read browser cookies: {}", e))?;
        let pairs: Vec<(String, String, String)> = cookies
            .into_iter()
            .map(|c| (c.name, c.value, c.domain))
            .collect();
        Ok(join_cookies(&pairs, host))
    }

    pub async fn close(mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.browser
            .close()
            .await
            .map_err(|e| format!("Error closing browser: {}", e))?;
        self.handler_task
            .await
            .map_err(|e| format!("Error awaiting handler: {}", e))?;

        if self.cleanup_user_data_dir {
            if let Some(dir) = &self.user_data_dir {
                if let Err(e) = std::fs::remove_dir_all(dir) {
                    tracing::debug!("Failed to clean up user-data-dir {}: {}", dir.display(), e);
                }
            }
        }

        Ok(())
    }
}

/// Join the cookies whose domain covers `host` into a `Cookie` header
/// value. Domains stored as `.claude.ai` cover `claude.ai` and its
/// subdomains.
fn join_cookies(cookies: &[(String, String, String)], host: &str) -> String {
    cookies
        .iter()
        .filter(|(_, _, domain)| {
            let domain = domain.trim_start_matches('.');
            host == domain || host.ends_with(&format!(".{}", domain))
        })
        .map(|(name, value, _)| format!("{}={}", name, value))
        .collect::<Vec<_>>()
        .join("; ")
}

fn resolve_user_data_dir(
    profile_dir: Option<&Path>,
) -> Result<(PathBuf, bool), Box<dyn std::error::Error + Send + Sync>> {
    if let Some(dir) = profile_dir {
        std::fs::create_dir_all(dir)?;
        tracing::info!("Using configured profile dir: {}", dir.display());
        return Ok((dir.to_path_buf(), false));
    }

    if let Ok(dir) = std::env::var("BANTER_USER_DATA_DIR") {
        let path = PathBuf::from(dir);
        std::fs::create_dir_all(&path)?;
        tracing::info!(
            "Using user data dir from BANTER_USER_DATA_DIR: {}",
            path.display()
        );
        return Ok((path, false));
    }

    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| format!("System clock error: {}", e))?
        .as_nanos();
    let unique = format!("banter-chromium-profile-{}-{}", std::process::id(), nanos);
    let path = std::env::temp_dir().join(unique);
    std::fs::create_dir_all(&path)?;
    tracing::info!("Using throwaway user data dir: {}", path.display());
    Ok((path, true))
}
