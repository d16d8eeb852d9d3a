use std::cell::RefCell;
use std::sync::Arc;
use std::time::{Duration, Instant};

use headless_chrome::{Element, Tab};
use scraper::{ElementRef, Html, Selector};
use tracing::debug;

use crate::utils::error::{AppError, Result};

/// One hop in a selector path: apply `css` within the current scope, take match `index`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathStep {
    pub css: String,
    pub index: usize,
}

/// Opaque reference to an element. Handles are re-resolved against the live
/// document on every use, so a DOM that mutated underneath shows up as a
/// stale-handle interaction error rather than a silently wrong answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElementHandle {
    /// Chain of (selector, index) hops from the document root.
    Path(Vec<PathStep>),
    /// Element located by a full-document text scan.
    Text(String),
}

impl ElementHandle {
    pub fn describe(&self) -> String {
        match self {
            ElementHandle::Path(steps) => steps
                .iter()
                .map(|s| format!("{}[{}]", s.css, s.index))
                .collect::<Vec<_>>()
                .join(" > "),
            ElementHandle::Text(needle) => format!("text~'{needle}'"),
        }
    }
}

/// Minimal capability set over an already-navigated page. The rest of the core
/// only talks to this trait, so it is testable against canned markup.
pub trait DocumentQuery {
    /// All elements matching `selector`, re-evaluated on each call (never cached:
    /// the DOM is mutable between calls).
    fn find_all(&self, selector: &str) -> Result<Vec<ElementHandle>>;

    /// All elements matching `selector` within `scope`.
    fn find_all_within(&self, scope: &ElementHandle, selector: &str) -> Result<Vec<ElementHandle>>;

    /// Most specific element whose text contains `needle`, if any.
    fn find_first_by_text(&self, needle: &str) -> Option<ElementHandle>;

    /// Click an element. May trigger navigation or DOM mutation, observed only
    /// via subsequent queries.
    fn click(&self, handle: &ElementHandle) -> Result<()>;

    /// Bounded cooperative wait. Returns false on timeout, never errors, so
    /// callers can pick a fallback instead of unwinding.
    fn wait_for(&self, predicate: &dyn Fn(&dyn DocumentQuery) -> bool, timeout: Duration)
    -> bool;

    /// Trimmed text content. Empty string when the element is gone or empty.
    fn text_of(&self, handle: &ElementHandle) -> String;
}

fn stale(handle_desc: &str) -> AppError {
    AppError::Interaction {
        target: handle_desc.to_string(),
        message: "element no longer present".to_string(),
    }
}

// ---------------------------------------------------------------------------
// Live adapter over a headless Chrome tab
// ---------------------------------------------------------------------------

pub struct TabDocument {
    tab: Arc<Tab>,
    poll_interval: Duration,
}

impl TabDocument {
    pub fn new(tab: Arc<Tab>) -> Self {
        Self {
            tab,
            poll_interval: Duration::from_millis(250),
        }
    }

    fn with_element<T>(
        &self,
        steps: &[PathStep],
        desc: &str,
        f: impl FnOnce(&Element<'_>) -> Result<T>,
    ) -> Result<T> {
        let (first, rest) = steps.split_first().ok_or_else(|| stale(desc))?;
        let elements = self
            .tab
            .find_elements(&first.css)
            .map_err(|_| stale(desc))?;
        let mut current = elements.into_iter().nth(first.index).ok_or_else(|| stale(desc))?;
        for step in rest {
            let children = current.find_elements(&step.css).map_err(|_| stale(desc))?;
            current = children.into_iter().nth(step.index).ok_or_else(|| stale(desc))?;
        }
        f(&current)
    }

    /// Runs a document-wide text scan in the page. `click` controls whether the
    /// best match is clicked (the scripted-click capability) or only probed.
    fn scan_script(needle: &str, click: bool) -> String {
        // serde_json produces a valid JS string literal for the needle.
        let literal = serde_json::to_string(needle).unwrap_or_else(|_| "\"\"".to_string());
        let action = if click { "best.click(); return true;" } else { "return true;" };
        format!(
            r#"
            (function() {{
                var needle = {literal};
                var best = null;
                var all = document.querySelectorAll('*');
                for (var i = 0; i < all.length; i++) {{
                    var el = all[i];
                    var text = el.textContent || '';
                    if (text.indexOf(needle) !== -1) {{
                        if (best === null || text.length <= (best.textContent || '').length) {{
                            best = el;
                        }}
                    }}
                }}
                if (best === null) return false;
                {action}
            }})()
            "#
        )
    }

    fn evaluate_bool(&self, script: &str) -> bool {
        match self.tab.evaluate(script, false) {
            Ok(result) => result
                .value
                .and_then(|v| v.as_bool())
                .unwrap_or(false),
            Err(e) => {
                debug!("script evaluation failed: {e}");
                false
            }
        }
    }
}

impl DocumentQuery for TabDocument {
    fn find_all(&self, selector: &str) -> Result<Vec<ElementHandle>> {
        // A selector with no matches is an empty page state, not an error.
        let count = match self.tab.find_elements(selector) {
            Ok(elements) => elements.len(),
            Err(e) => {
                debug!("find_all('{selector}') matched nothing: {e}");
                0
            }
        };
        Ok((0..count)
            .map(|index| {
                ElementHandle::Path(vec![PathStep {
                    css: selector.to_string(),
                    index,
                }])
            })
            .collect())
    }

    fn find_all_within(
        &self,
        scope: &ElementHandle,
        selector: &str,
    ) -> Result<Vec<ElementHandle>> {
        let ElementHandle::Path(steps) = scope else {
            return Err(AppError::Interaction {
                target: scope.describe(),
                message: "text-scan handles cannot be scoped".to_string(),
            });
        };
        let count = self.with_element(steps, &scope.describe(), |element| {
            Ok(element.find_elements(selector).map(|e| e.len()).unwrap_or(0))
        })?;
        let mut handles = Vec::with_capacity(count);
        for index in 0..count {
            let mut path = steps.clone();
            path.push(PathStep {
                css: selector.to_string(),
                index,
            });
            handles.push(ElementHandle::Path(path));
        }
        Ok(handles)
    }

    fn find_first_by_text(&self, needle: &str) -> Option<ElementHandle> {
        if self.evaluate_bool(&Self::scan_script(needle, false)) {
            Some(ElementHandle::Text(needle.to_string()))
        } else {
            None
        }
    }

    fn click(&self, handle: &ElementHandle) -> Result<()> {
        match handle {
            ElementHandle::Path(steps) => self.with_element(steps, &handle.describe(), |element| {
                element.click().map_err(|e| AppError::Interaction {
                    target: handle.describe(),
                    message: e.to_string(),
                })?;
                Ok(())
            }),
            ElementHandle::Text(needle) => {
                if self.evaluate_bool(&Self::scan_script(needle, true)) {
                    Ok(())
                } else {
                    Err(stale(&handle.describe()))
                }
            }
        }
    }

    fn wait_for(
        &self,
        predicate: &dyn Fn(&dyn DocumentQuery) -> bool,
        timeout: Duration,
    ) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if predicate(self) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(self.poll_interval);
        }
    }

    fn text_of(&self, handle: &ElementHandle) -> String {
        match handle {
            ElementHandle::Path(steps) => self
                .with_element(steps, &handle.describe(), |element| {
                    Ok(element.get_inner_text().unwrap_or_default())
                })
                .map(|text| text.trim().to_string())
                .unwrap_or_default(),
            ElementHandle::Text(needle) => {
                let literal =
                    serde_json::to_string(needle).unwrap_or_else(|_| "\"\"".to_string());
                let script = format!(
                    r#"
                    (function() {{
                        var needle = {literal};
                        var best = null;
                        var all = document.querySelectorAll('*');
                        for (var i = 0; i < all.length; i++) {{
                            var text = all[i].textContent || '';
                            if (text.indexOf(needle) !== -1) {{
                                if (best === null || text.length <= best.length) best = text;
                            }}
                        }}
                        return best === null ? '' : best.trim();
                    }})()
                    "#
                );
                match self.tab.evaluate(&script, false) {
                    Ok(result) => result
                        .value
                        .and_then(|v| v.as_str().map(|s| s.to_string()))
                        .unwrap_or_default(),
                    Err(_) => String::new(),
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Static adapter over parsed markup (tests, saved page dumps)
// ---------------------------------------------------------------------------

pub struct HtmlDocument {
    html: Html,
    clicks: RefCell<Vec<String>>,
}

impl HtmlDocument {
    pub fn parse(markup: &str) -> Self {
        Self {
            html: Html::parse_document(markup),
            clicks: RefCell::new(Vec::new()),
        }
    }

    /// Descriptions of every click performed against this document, in order.
    pub fn clicks(&self) -> Vec<String> {
        self.clicks.borrow().clone()
    }

    fn parse_selector(selector: &str) -> Result<Selector> {
        Selector::parse(selector).map_err(|e| AppError::InvalidSelector {
            selector: selector.to_string(),
            message: e.to_string(),
        })
    }

    fn resolve(&self, steps: &[PathStep]) -> Result<Option<ElementRef<'_>>> {
        let (first, rest) = match steps.split_first() {
            Some(split) => split,
            None => return Ok(None),
        };
        let selector = Self::parse_selector(&first.css)?;
        let mut current = match self.html.select(&selector).nth(first.index) {
            Some(element) => element,
            None => return Ok(None),
        };
        for step in rest {
            let selector = Self::parse_selector(&step.css)?;
            current = match current.select(&selector).nth(step.index) {
                Some(element) => element,
                None => return Ok(None),
            };
        }
        Ok(Some(current))
    }

    fn element_text(element: ElementRef<'_>) -> String {
        element.text().collect::<Vec<_>>().join(" ").trim().to_string()
    }

    fn best_text_match(&self, needle: &str) -> Option<ElementRef<'_>> {
        let all = Self::parse_selector("*").ok()?;
        let mut best: Option<(usize, ElementRef<'_>)> = None;
        for element in self.html.select(&all) {
            let text: String = element.text().collect();
            if text.contains(needle) {
                match best {
                    Some((len, _)) if text.len() > len => {}
                    _ => best = Some((text.len(), element)),
                }
            }
        }
        best.map(|(_, element)| element)
    }
}

impl DocumentQuery for HtmlDocument {
    fn find_all(&self, selector: &str) -> Result<Vec<ElementHandle>> {
        let parsed = Self::parse_selector(selector)?;
        let count = self.html.select(&parsed).count();
        Ok((0..count)
            .map(|index| {
                ElementHandle::Path(vec![PathStep {
                    css: selector.to_string(),
                    index,
                }])
            })
            .collect())
    }

    fn find_all_within(
        &self,
        scope: &ElementHandle,
        selector: &str,
    ) -> Result<Vec<ElementHandle>> {
        let ElementHandle::Path(steps) = scope else {
            return Err(AppError::Interaction {
                target: scope.describe(),
                message: "text-scan handles cannot be scoped".to_string(),
            });
        };
        let parsed = Self::parse_selector(selector)?;
        let element = self.resolve(steps)?.ok_or_else(|| stale(&scope.describe()))?;
        let count = element.select(&parsed).count();
        let mut handles = Vec::with_capacity(count);
        for index in 0..count {
            let mut path = steps.clone();
            path.push(PathStep {
                css: selector.to_string(),
                index,
            });
            handles.push(ElementHandle::Path(path));
        }
        Ok(handles)
    }

    fn find_first_by_text(&self, needle: &str) -> Option<ElementHandle> {
        self.best_text_match(needle)
            .map(|_| ElementHandle::Text(needle.to_string()))
    }

    fn click(&self, handle: &ElementHandle) -> Result<()> {
        let present = match handle {
            ElementHandle::Path(steps) => self.resolve(steps)?.is_some(),
            ElementHandle::Text(needle) => self.best_text_match(needle).is_some(),
        };
        if present {
            self.clicks.borrow_mut().push(handle.describe());
            Ok(())
        } else {
            Err(stale(&handle.describe()))
        }
    }

    fn wait_for(
        &self,
        predicate: &dyn Fn(&dyn DocumentQuery) -> bool,
        _timeout: Duration,
    ) -> bool {
        // Static markup never changes; one evaluation decides.
        predicate(self)
    }

    fn text_of(&self, handle: &ElementHandle) -> String {
        match handle {
            ElementHandle::Path(steps) => match self.resolve(steps) {
                Ok(Some(element)) => Self::element_text(element),
                _ => String::new(),
            },
            ElementHandle::Text(needle) => self
                .best_text_match(needle)
                .map(Self::element_text)
                .unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
        <html><body>
            <ul>
                <li class="tab">Mon compte</li>
                <li class="tab">Mes documents</li>
                <li class="tab">Les offres</li>
            </ul>
            <table>
                <tr><th>Partenaire</th><th>Réf</th></tr>
                <tr><td>Action Logement</td><td> REF-1 </td></tr>
            </table>
        </body></html>
    "#;

    #[test]
    fn test_find_all_counts_matches() {
        let doc = HtmlDocument::parse(PAGE);
        let tabs = doc.find_all("li.tab").unwrap();
        assert_eq!(tabs.len(), 3);
        let rows = doc.find_all("tr").unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn test_find_all_invalid_selector_is_an_error() {
        let doc = HtmlDocument::parse(PAGE);
        let result = doc.find_all(">>>");
        assert!(matches!(result, Err(AppError::InvalidSelector { .. })));
    }

    #[test]
    fn test_find_all_within_scopes_to_the_row() {
        let doc = HtmlDocument::parse(PAGE);
        let rows = doc.find_all("tr").unwrap();
        let header_cells = doc.find_all_within(&rows[0], "td").unwrap();
        assert!(header_cells.is_empty());
        let data_cells = doc.find_all_within(&rows[1], "td").unwrap();
        assert_eq!(data_cells.len(), 2);
    }

    #[test]
    fn test_text_of_is_trimmed_and_never_fails() {
        let doc = HtmlDocument::parse(PAGE);
        let rows = doc.find_all("tr").unwrap();
        let cells = doc.find_all_within(&rows[1], "td").unwrap();
        assert_eq!(doc.text_of(&cells[1]), "REF-1");

        let gone = ElementHandle::Path(vec![PathStep {
            css: "div.missing".to_string(),
            index: 0,
        }]);
        assert_eq!(doc.text_of(&gone), "");
    }

    #[test]
    fn test_find_first_by_text_picks_most_specific_element() {
        let doc = HtmlDocument::parse(PAGE);
        let handle = doc.find_first_by_text("Les offres").expect("should match");
        // The <li> itself, not an enclosing container.
        assert_eq!(doc.text_of(&handle), "Les offres");
        assert!(doc.find_first_by_text("Onglet inexistant").is_none());
    }

    #[test]
    fn test_click_records_and_stale_click_fails() {
        let doc = HtmlDocument::parse(PAGE);
        let tabs = doc.find_all("li.tab").unwrap();
        doc.click(&tabs[2]).unwrap();
        assert_eq!(doc.clicks(), vec!["li.tab[2]".to_string()]);

        let gone = ElementHandle::Path(vec![PathStep {
            css: "li.tab".to_string(),
            index: 9,
        }]);
        assert!(matches!(doc.click(&gone), Err(AppError::Interaction { .. })));
    }

    #[test]
    fn test_wait_for_evaluates_predicate() {
        let doc = HtmlDocument::parse(PAGE);
        let table_present = |d: &dyn DocumentQuery| {
            d.find_all("table").map(|t| !t.is_empty()).unwrap_or(false)
        };
        assert!(doc.wait_for(&table_present, Duration::from_millis(10)));

        let never = |d: &dyn DocumentQuery| {
            d.find_all("iframe").map(|t| !t.is_empty()).unwrap_or(false)
        };
        assert!(!doc.wait_for(&never, Duration::from_millis(10)));
    }
}
