pub mod sms;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::extractor::OfferRecord;

pub use sms::TwilioSms;

const DIGEST_HEADER: &str = "New Pass Logement offers:";

/// Best-effort text delivery to one pre-configured destination.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    fn name(&self) -> &str;

    /// Hard payload cap of the transport, in characters.
    fn max_payload_len(&self) -> usize;

    async fn send(&self, body: &str) -> anyhow::Result<()>;
}

/// Outcome of one delivery attempt. Failures never abort the run: a failed
/// notification must not cause the same offers to be re-reported forever.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Sent { lines: usize },
    Failed { reason: String },
    Skipped,
}

/// Fixed header, one summary line per offer, bounded to `max_len` characters.
/// When entries are dropped, the message ends with a "(+N more)" marker.
pub fn build_digest(items: &[OfferRecord], max_len: usize) -> String {
    let lines: Vec<String> = items.iter().map(|item| item.summary_line()).collect();
    for included in (0..=lines.len()).rev() {
        let mut message = DIGEST_HEADER.to_string();
        for line in &lines[..included] {
            message.push('\n');
            message.push_str(line);
        }
        let dropped = lines.len() - included;
        if dropped > 0 {
            message.push_str(&format!("\n(+{dropped} more)"));
        }
        if message.chars().count() <= max_len {
            return message;
        }
    }
    // Even the bare header overflows: hard-truncate it.
    DIGEST_HEADER.chars().take(max_len).collect()
}

/// Builds and dispatches the digest. Not called for an empty delta; the guard
/// here is belt and braces for direct callers.
pub async fn notify(channel: &dyn NotificationChannel, items: &[OfferRecord]) -> DeliveryOutcome {
    if items.is_empty() {
        return DeliveryOutcome::Skipped;
    }
    let digest = build_digest(items, channel.max_payload_len());
    let included = digest.lines().count().saturating_sub(1);
    match channel.send(&digest).await {
        Ok(()) => {
            info!(
                "sent digest of {} offer(s) via {}",
                items.len(),
                channel.name()
            );
            DeliveryOutcome::Sent { lines: included }
        }
        Err(e) => {
            warn!("delivery via {} failed: {e}", channel.name());
            DeliveryOutcome::Failed {
                reason: e.to_string(),
            }
        }
    }
}

/// Fallback channel: the digest goes to the log. Used for dry runs and when
/// the SMS configuration is incomplete.
pub struct LogChannel;

#[async_trait]
impl NotificationChannel for LogChannel {
    fn name(&self) -> &str {
        "log-only"
    }

    fn max_payload_len(&self) -> usize {
        sms::SMS_MAX_LEN
    }

    async fn send(&self, body: &str) -> anyhow::Result<()> {
        info!("notification digest (not dispatched):\n{body}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::sync::Mutex;

    fn offer(city: &str, rent: &str) -> OfferRecord {
        OfferRecord::from_cells(&[
            "P".to_string(),
            "R".to_string(),
            "75".to_string(),
            city.to_string(),
            "T2".to_string(),
            "45 m²".to_string(),
            String::new(),
            rent.to_string(),
        ])
    }

    struct RecordingChannel {
        sent: Mutex<Vec<String>>,
        max_len: usize,
        fail: bool,
    }

    impl RecordingChannel {
        fn new(max_len: usize) -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
                max_len,
                fail: false,
            }
        }

        fn failing() -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
                max_len: 1600,
                fail: true,
            }
        }
    }

    #[async_trait]
    impl NotificationChannel for RecordingChannel {
        fn name(&self) -> &str {
            "recording"
        }

        fn max_payload_len(&self) -> usize {
            self.max_len
        }

        async fn send(&self, body: &str) -> anyhow::Result<()> {
            if self.fail {
                return Err(anyhow!("channel unreachable"));
            }
            self.sent.lock().unwrap().push(body.to_string());
            Ok(())
        }
    }

    #[test]
    fn test_digest_lists_every_offer_when_it_fits() {
        let items = vec![offer("Paris", "650 €"), offer("Lyon", "400 €")];
        let digest = build_digest(&items, 1600);
        assert!(digest.starts_with(DIGEST_HEADER));
        assert!(digest.contains("Paris (75) - T2 - 45 m² - 650 €"));
        assert!(digest.contains("Lyon (75) - T2 - 45 m² - 400 €"));
        assert!(!digest.contains("more)"));
    }

    #[test]
    fn test_digest_truncates_with_more_marker() {
        // Seven offers, a budget sized for the header plus five lines plus the
        // marker: the digest must end with "(+2 more)".
        let items: Vec<OfferRecord> = (0..7)
            .map(|i| offer(&format!("City{i}"), "650 €"))
            .collect();
        let line_len = items[0].summary_line().chars().count() + 1;
        let budget = DIGEST_HEADER.chars().count() + 5 * line_len + "\n(+2 more)".chars().count();
        let digest = build_digest(&items, budget);
        assert!(digest.ends_with("(+2 more)"), "digest was: {digest}");
        assert_eq!(digest.lines().count(), 1 + 5 + 1);
        assert!(digest.chars().count() <= budget);
    }

    #[test]
    fn test_digest_never_exceeds_budget() {
        let items: Vec<OfferRecord> = (0..20)
            .map(|i| offer(&format!("Ville-{i}"), "650 €"))
            .collect();
        for budget in [10, 40, 80, 200, 1600] {
            let digest = build_digest(&items, budget);
            assert!(digest.chars().count() <= budget, "budget {budget} exceeded");
        }
    }

    #[tokio::test]
    async fn test_notify_skips_empty_delta() {
        let channel = RecordingChannel::new(1600);
        let outcome = notify(&channel, &[]).await;
        assert_eq!(outcome, DeliveryOutcome::Skipped);
        assert!(channel.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_notify_sends_digest() {
        let channel = RecordingChannel::new(1600);
        let items = vec![offer("Paris", "650 €")];
        let outcome = notify(&channel, &items).await;
        assert_eq!(outcome, DeliveryOutcome::Sent { lines: 1 });
        let sent = channel.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].contains("Paris"));
    }

    #[tokio::test]
    async fn test_delivery_failure_is_swallowed() {
        let channel = RecordingChannel::failing();
        let items = vec![offer("Paris", "650 €")];
        let outcome = notify(&channel, &items).await;
        assert!(matches!(outcome, DeliveryOutcome::Failed { .. }));
    }
}
