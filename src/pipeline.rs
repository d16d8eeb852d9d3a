use std::time::Duration;

use tracing::{info, warn};

use crate::detector::{diff, SnapshotStore};
use crate::diagnostics::DiagnosticSink;
use crate::document::DocumentQuery;
use crate::extractor::RowExtractor;
use crate::locator::{locate_and_click, offers_tab_strategies};
use crate::notify::{notify, DeliveryOutcome, NotificationChannel};
use crate::utils::error::Result;

pub struct PipelineOptions {
    /// Visible label of the offers tab.
    pub tab_label: String,
    pub settle_timeout: Duration,
    pub table_timeout: Duration,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            tab_label: "Les offres".to_string(),
            settle_timeout: Duration::from_secs(10),
            table_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug)]
pub struct RunReport {
    pub offers_seen: usize,
    pub new_offers: usize,
    pub delivery: DeliveryOutcome,
    pub tab_strategy: Option<&'static str>,
}

/// One full detection run against an already-authenticated document:
/// locate → extract → diff → notify → persist, strictly sequential. Everything
/// up to persistence degrades instead of failing; only a snapshot write error
/// propagates.
pub async fn run_once(
    doc: &dyn DocumentQuery,
    store: &SnapshotStore,
    channel: &dyn NotificationChannel,
    sink: &dyn DiagnosticSink,
    opts: &PipelineOptions,
) -> Result<RunReport> {
    sink.capture("before-tab-click");
    let strategies = offers_tab_strategies(&opts.tab_label);
    let table_present = |d: &dyn DocumentQuery| {
        d.find_all("table").map(|t| !t.is_empty()).unwrap_or(false)
    };
    let tab_outcome = locate_and_click(
        doc,
        "offers tab",
        &strategies,
        &table_present,
        opts.settle_timeout,
    );
    sink.capture("after-tab-click");

    let offers = RowExtractor::new(opts.table_timeout).extract(doc);
    let previous = store.load();
    let detection = diff(&offers, &previous.keys());

    let delivery = if detection.new_items.is_empty() {
        info!("no new offers detected");
        DeliveryOutcome::Skipped
    } else if previous.suppress_notifications() {
        warn!(
            "snapshot reset in progress: suppressing alerts for {} offer(s) this run",
            detection.new_items.len()
        );
        DeliveryOutcome::Skipped
    } else {
        notify(channel, &detection.new_items).await
    };

    store.store(&detection.next_snapshot)?;
    info!(
        "run summary: {} offer(s) listed, {} new",
        offers.len(),
        detection.new_items.len()
    );

    Ok(RunReport {
        offers_seen: offers.len(),
        new_offers: detection.new_items.len(),
        delivery,
        tab_strategy: tab_outcome.strategy,
    })
}
