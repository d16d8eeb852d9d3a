use anyhow::anyhow;
use async_trait::async_trait;
use reqwest::Client;

use super::NotificationChannel;
use crate::config::SmsConfig;

/// Twilio caps a single message body at 1600 characters.
pub const SMS_MAX_LEN: usize = 1600;

const TWILIO_API_BASE: &str = "https://api.twilio.com";

/// SMS delivery through the Twilio Messages API.
pub struct TwilioSms {
    client: Client,
    api_base: String,
    account_sid: String,
    auth_token: String,
    from_number: String,
    to_number: String,
}

impl TwilioSms {
    pub fn new(config: &SmsConfig) -> Option<Self> {
        Some(Self {
            client: Client::new(),
            api_base: TWILIO_API_BASE.to_string(),
            account_sid: config.account_sid.clone()?,
            auth_token: config.auth_token.clone()?,
            from_number: config.from_number.clone()?,
            to_number: config.to_number.clone()?,
        })
    }

    /// Points the channel at a different API host. Test hook.
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }
}

#[async_trait]
impl NotificationChannel for TwilioSms {
    fn name(&self) -> &str {
        "twilio-sms"
    }

    fn max_payload_len(&self) -> usize {
        SMS_MAX_LEN
    }

    async fn send(&self, body: &str) -> anyhow::Result<()> {
        let url = format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            self.api_base, self.account_sid
        );
        let params = [
            ("To", self.to_number.as_str()),
            ("From", self.from_number.as_str()),
            ("Body", body),
        ];
        let response = self
            .client
            .post(&url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&params)
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            return Err(anyhow!("Twilio returned {status}: {detail}"));
        }
        Ok(())
    }
}
