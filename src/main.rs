use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};

use passlogement_watcher::config::AppConfig;
use passlogement_watcher::detector::SnapshotStore;
use passlogement_watcher::diagnostics::{DiagnosticSink, NoopSink};
use passlogement_watcher::notify::{LogChannel, NotificationChannel, TwilioSms};
use passlogement_watcher::pipeline::{self, PipelineOptions};
use passlogement_watcher::session::BrowserSession;

#[derive(Parser, Debug)]
#[command(name = "passlogement-watcher")]
#[command(about = "Watches the Pass Logement listing and alerts once per new offer")]
struct Args {
    /// Log the digest instead of dispatching it
    #[arg(long)]
    dry_run: bool,

    /// Override the snapshot file path
    #[arg(long)]
    snapshot: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("passlogement_watcher=debug".parse()?),
        )
        .init();

    let args = Args::parse();
    let config = AppConfig::from_env()?;
    info!("Starting Pass Logement watcher...");

    // Reaching the authenticated offers page is the only fatal class: failing
    // here aborts before any snapshot write so a scheduler can alert on it.
    let session = BrowserSession::launch(&config.browser)?;
    session.login(&config.site)?;
    session.ensure_on(&config.site.url)?;
    let doc = session.document();

    let channel: Box<dyn NotificationChannel> = if args.dry_run {
        info!("dry run: digests will only be logged");
        Box::new(LogChannel)
    } else {
        match TwilioSms::new(&config.notifications.sms) {
            Some(sms) => Box::new(sms),
            None => {
                warn!("Twilio configuration incomplete: digests will only be logged");
                Box::new(LogChannel)
            }
        }
    };

    let snapshot_path = args
        .snapshot
        .unwrap_or_else(|| PathBuf::from(&config.snapshot.path));
    let store = SnapshotStore::new(snapshot_path);

    let opts = PipelineOptions {
        settle_timeout: Duration::from_secs(config.browser.settle_timeout_secs),
        table_timeout: Duration::from_secs(config.browser.table_timeout_secs),
        ..PipelineOptions::default()
    };

    let sink: Box<dyn DiagnosticSink> = if config.diagnostics.screenshots {
        Box::new(session.screenshot_sink(&config.diagnostics.dir))
    } else {
        Box::new(NoopSink)
    };

    let report = pipeline::run_once(&doc, &store, channel.as_ref(), sink.as_ref(), &opts).await?;
    info!(
        "done: {} offer(s) listed, {} new, delivery {:?}",
        report.offers_seen, report.new_offers, report.delivery
    );

    Ok(())
}
