use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::env;
use url::Url;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub site: SiteConfig,
    pub browser: BrowserConfig,
    pub snapshot: SnapshotConfig,
    #[serde(default)]
    pub notifications: NotificationsConfig,
    pub diagnostics: DiagnosticsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteConfig {
    /// The authenticated offers page. Navigation lands here and login
    /// redirects back here.
    pub url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserConfig {
    #[serde(default)]
    pub chrome_path: Option<String>,
    pub page_load_timeout_secs: u64,
    pub settle_timeout_secs: u64,
    pub table_timeout_secs: u64,
    pub window_width: u32,
    pub window_height: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotConfig {
    pub path: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotificationsConfig {
    #[serde(default)]
    pub sms: SmsConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SmsConfig {
    #[serde(default)]
    pub account_sid: Option<String>,
    #[serde(default)]
    pub auth_token: Option<String>,
    #[serde(default)]
    pub from_number: Option<String>,
    #[serde(default)]
    pub to_number: Option<String>,
}

impl SmsConfig {
    pub fn is_complete(&self) -> bool {
        self.account_sid.is_some()
            && self.auth_token.is_some()
            && self.from_number.is_some()
            && self.to_number.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticsConfig {
    pub screenshots: bool,
    pub dir: String,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            // Start with default configuration
            .add_source(File::with_name("config/default"))
            // Add environment-specific config
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Add local config (ignored by git)
            .add_source(File::with_name("config/local").required(false))
            // Add environment variables with prefix "PASSLOG_"
            .add_source(Environment::with_prefix("PASSLOG").separator("__"))
            .build()?;

        let mut config: AppConfig = s.try_deserialize()?;

        // Fall back to the plain variable names the original deployment used.
        if config.site.username.is_none() {
            config.site.username = env::var("LOGIN_EMAIL").ok();
        }
        if config.site.password.is_none() {
            config.site.password = env::var("LOGIN_PASSWORD").ok();
        }
        if config.browser.chrome_path.is_none() {
            config.browser.chrome_path = env::var("CHROME_PATH").ok();
        }
        let sms = &mut config.notifications.sms;
        if sms.account_sid.is_none() {
            sms.account_sid = env::var("TWILIO_SID").ok();
        }
        if sms.auth_token.is_none() {
            sms.auth_token = env::var("TWILIO_TOKEN").ok();
        }
        if sms.from_number.is_none() {
            sms.from_number = env::var("TWILIO_PHONE").ok();
        }
        if sms.to_number.is_none() {
            sms.to_number = env::var("TO_PHONE").ok();
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if Url::parse(&self.site.url).is_err() {
            return Err(ConfigError::Message("Invalid site URL format".into()));
        }

        if self.browser.page_load_timeout_secs == 0 {
            return Err(ConfigError::Message(
                "Browser page_load_timeout_secs must be greater than 0".into(),
            ));
        }

        if self.browser.settle_timeout_secs == 0 || self.browser.table_timeout_secs == 0 {
            return Err(ConfigError::Message(
                "Browser settle/table timeouts must be greater than 0".into(),
            ));
        }

        if self.browser.window_width == 0 || self.browser.window_height == 0 {
            return Err(ConfigError::Message(
                "Browser window dimensions must be greater than 0".into(),
            ));
        }

        if self.snapshot.path.trim().is_empty() {
            return Err(ConfigError::Message("Snapshot path must not be empty".into()));
        }

        if self.diagnostics.screenshots && self.diagnostics.dir.trim().is_empty() {
            return Err(ConfigError::Message(
                "Diagnostics dir must be set when screenshots are enabled".into(),
            ));
        }

        Ok(())
    }
}
