use std::ffi::OsStr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use headless_chrome::{Browser, LaunchOptions, Tab};
use tracing::{info, warn};

use crate::config::{BrowserConfig, SiteConfig};
use crate::diagnostics::DiagnosticSink;
use crate::document::TabDocument;
use crate::utils::error::{AppError, Result};

/// How long to watch for a login form before assuming the session is already
/// authenticated.
const LOGIN_FORM_TIMEOUT: Duration = Duration::from_secs(5);

/// How long to wait for the post-login redirect to the account page.
const LOGIN_REDIRECT_TIMEOUT: Duration = Duration::from_secs(10);

fn session_err(context: &str, e: impl std::fmt::Display) -> AppError {
    AppError::Session(format!("{context}: {e}"))
}

/// Authenticated browser session against the offers site. Everything in here
/// is fatal on failure: a run that never reached the target document must not
/// persist anything.
pub struct BrowserSession {
    _browser: Browser,
    tab: Arc<Tab>,
}

impl BrowserSession {
    pub fn launch(config: &BrowserConfig) -> Result<Self> {
        let mut launch_options = LaunchOptions::default_builder()
            .headless(true)
            .sandbox(false) // Often needed in containerized environments
            .window_size(Some((config.window_width, config.window_height)))
            .args(vec![
                OsStr::new("--no-sandbox"),
                OsStr::new("--disable-dev-shm-usage"),
                OsStr::new("--disable-gpu"),
                OsStr::new("--disable-extensions"),
            ])
            .build()
            .map_err(|e| session_err("failed to create launch options", e))?;

        if let Some(chrome_path) = &config.chrome_path {
            launch_options.path = Some(PathBuf::from(chrome_path));
        }

        let browser =
            Browser::new(launch_options).map_err(|e| session_err("failed to launch browser", e))?;
        let tab = browser
            .new_tab()
            .map_err(|e| session_err("failed to create tab", e))?;
        tab.set_default_timeout(Duration::from_secs(config.page_load_timeout_secs));

        Ok(Self {
            _browser: browser,
            tab,
        })
    }

    /// Navigates to the offers page and, when a login form is shown, signs in
    /// with the configured credentials and waits for the account redirect.
    pub fn login(&self, site: &SiteConfig) -> Result<()> {
        info!("navigating to {}", site.url);
        self.tab
            .navigate_to(&site.url)
            .map_err(|e| session_err("navigation failed", e))?;
        self.tab
            .wait_until_navigated()
            .map_err(|e| session_err("page load failed", e))?;

        let login_field = self
            .tab
            .wait_for_element_with_custom_timeout("input[name='username']", LOGIN_FORM_TIMEOUT);
        let Ok(username_field) = login_field else {
            info!("no login form detected: already authenticated");
            return Ok(());
        };

        info!("login form detected, entering credentials");
        let username = site
            .username
            .as_deref()
            .ok_or_else(|| AppError::Session("login required but no username configured".into()))?;
        let password = site
            .password
            .as_deref()
            .ok_or_else(|| AppError::Session("login required but no password configured".into()))?;

        username_field
            .type_into(username)
            .map_err(|e| session_err("could not enter username", e))?;
        self.tab
            .find_element("input[name='password']")
            .and_then(|field| field.type_into(password).map(|_| ()))
            .map_err(|e| session_err("could not enter password", e))?;
        self.tab
            .find_element("button[type='button']")
            .and_then(|button| button.click().map(|_| ()))
            .map_err(|e| session_err("could not submit login form", e))?;

        if !self.wait_for_url_contains("account", LOGIN_REDIRECT_TIMEOUT) {
            return Err(AppError::Session(
                "never reached the account page after login".into(),
            ));
        }
        // The account page keeps loading content after the redirect.
        std::thread::sleep(Duration::from_secs(2));
        info!("logged in, current url: {}", self.tab.get_url());
        Ok(())
    }

    /// Re-navigates if a redirect moved the tab off the target page.
    pub fn ensure_on(&self, url: &str) -> Result<()> {
        if !self.tab.get_url().starts_with(url) {
            info!("re-navigating to {url}");
            self.tab
                .navigate_to(url)
                .map_err(|e| session_err("re-navigation failed", e))?;
            self.tab
                .wait_until_navigated()
                .map_err(|e| session_err("page load failed", e))?;
        }
        Ok(())
    }

    fn wait_for_url_contains(&self, needle: &str, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.tab.get_url().contains(needle) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(250));
        }
    }

    pub fn document(&self) -> TabDocument {
        TabDocument::new(Arc::clone(&self.tab))
    }

    pub fn screenshot_sink(&self, dir: impl Into<PathBuf>) -> ScreenshotSink {
        ScreenshotSink {
            tab: Arc::clone(&self.tab),
            dir: dir.into(),
        }
    }
}

/// Diagnostic sink that drops a PNG screenshot of the tab at each checkpoint.
pub struct ScreenshotSink {
    tab: Arc<Tab>,
    dir: PathBuf,
}

impl ScreenshotSink {
    fn write_screenshot(&self, label: &str) -> anyhow::Result<()> {
        let data = self.tab.capture_screenshot(
            headless_chrome::protocol::cdp::Page::CaptureScreenshotFormatOption::Png,
            None,
            None,
            true,
        )?;
        let timestamp = chrono::Utc::now().format("%Y%m%d_%H%M%S");
        let filename = format!("{label}_{timestamp}_{}.png", uuid::Uuid::new_v4().simple());
        std::fs::create_dir_all(&self.dir)?;
        std::fs::write(self.dir.join(filename), data)?;
        Ok(())
    }
}

impl DiagnosticSink for ScreenshotSink {
    fn capture(&self, label: &str) {
        if let Err(e) = self.write_screenshot(label) {
            warn!("screenshot '{label}' failed: {e}");
        }
    }
}
