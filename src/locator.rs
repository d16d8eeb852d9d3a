use std::time::Duration;

use tracing::{debug, info, warn};

use crate::document::{DocumentQuery, ElementHandle};

/// One named heuristic for locating a UI target. Strategies absorb adapter
/// errors internally and report only "found" / "not found".
pub struct Strategy {
    pub name: &'static str,
    run: Box<dyn Fn(&dyn DocumentQuery) -> Option<ElementHandle>>,
}

impl Strategy {
    pub fn new(
        name: &'static str,
        run: impl Fn(&dyn DocumentQuery) -> Option<ElementHandle> + 'static,
    ) -> Self {
        Self {
            name,
            run: Box::new(run),
        }
    }
}

/// Result of a locate-or-click attempt. Never persisted.
#[derive(Debug, Clone)]
pub struct LocatorOutcome {
    pub handle: Option<ElementHandle>,
    pub strategy: Option<&'static str>,
}

impl LocatorOutcome {
    pub fn matched(&self) -> bool {
        self.handle.is_some()
    }

    fn miss() -> Self {
        Self {
            handle: None,
            strategy: None,
        }
    }
}

/// Tries strategies in declaration order; the first one returning a handle
/// wins and later strategies are never attempted. Exhaustion is not an error:
/// the caller decides whether the absence is fatal.
pub fn locate(doc: &dyn DocumentQuery, intent: &str, strategies: &[Strategy]) -> LocatorOutcome {
    for strategy in strategies {
        match (strategy.run)(doc) {
            Some(handle) => {
                debug!("located '{intent}' via strategy '{}'", strategy.name);
                return LocatorOutcome {
                    handle: Some(handle),
                    strategy: Some(strategy.name),
                };
            }
            None => debug!("strategy '{}' missed '{intent}'", strategy.name),
        }
    }
    warn!("all {} strategies exhausted for '{intent}'", strategies.len());
    LocatorOutcome::miss()
}

/// Locates the target, clicks it, then waits for the page to settle. A failed
/// click or settle is a soft warning: the target content may already be
/// visible, so the run proceeds to extraction regardless.
pub fn locate_and_click(
    doc: &dyn DocumentQuery,
    intent: &str,
    strategies: &[Strategy],
    settle: &dyn Fn(&dyn DocumentQuery) -> bool,
    settle_timeout: Duration,
) -> LocatorOutcome {
    let outcome = locate(doc, intent, strategies);
    if let Some(handle) = &outcome.handle {
        match doc.click(handle) {
            Ok(()) => info!(
                "clicked '{intent}' (strategy '{}')",
                outcome.strategy.unwrap_or("?")
            ),
            Err(e) => warn!("click on '{intent}' failed, continuing degraded: {e}"),
        }
        if !doc.wait_for(settle, settle_timeout) {
            warn!("page did not settle after clicking '{intent}'");
        }
    }
    outcome
}

/// The layered strategies for reaching the offers tab, most specific first:
/// exact text under the tab bar, structural position, scripted text scan.
pub fn offers_tab_strategies(label: &str) -> Vec<Strategy> {
    let text_label = label.to_string();
    let scan_label = label.to_string();
    vec![
        Strategy::new("tab-text", move |doc| {
            let candidates = doc.find_all(".tab > *").ok()?;
            candidates
                .into_iter()
                .find(|handle| doc.text_of(handle).contains(&text_label))
        }),
        Strategy::new("tab-position", |doc| {
            // The offers entry is the third tab in the account layout.
            let tabs = doc.find_all("li.tab").ok()?;
            if tabs.len() >= 3 {
                Some(tabs[2].clone())
            } else {
                None
            }
        }),
        Strategy::new("text-scan", move |doc| doc.find_first_by_text(&scan_label)),
    ]
}
