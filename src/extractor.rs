use std::collections::HashSet;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::document::DocumentQuery;

/// Sentinel for cells the row did not carry.
pub const UNAVAILABLE: &str = "N/A";

/// Separator for the canonical key fields.
const KEY_SEPARATOR: &str = "|";

fn currency_marker() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"€|\bEUR\b").expect("currency marker pattern is valid"))
}

fn whitespace() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").expect("whitespace pattern is valid"))
}

/// Trim and collapse inner whitespace so incidental formatting differences
/// never change the canonical key.
fn normalize(text: &str) -> String {
    whitespace().replace_all(text.trim(), " ").into_owned()
}

/// One housing offer as extracted from a listing row. Constructed fresh on
/// every pass, never mutated, compared only via its canonical key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfferRecord {
    pub partner: Option<String>,
    pub reference: Option<String>,
    pub department: String,
    pub city: String,
    pub housing_type: String,
    pub surface: String,
    pub rent: String,
    canonical_key: String,
}

impl OfferRecord {
    /// Column contract of the offers table: 0 partner, 1 reference,
    /// 2 department, 3 city, 4 housing type, 5 surface, 7 rent. Index 6 is
    /// reserved. Cells beyond the row's length map to the sentinel.
    pub fn from_cells(cells: &[String]) -> Self {
        let cell = |index: usize| -> String {
            cells
                .get(index)
                .map(|text| normalize(text))
                .filter(|text| !text.is_empty())
                .unwrap_or_else(|| UNAVAILABLE.to_string())
        };
        let optional = |index: usize| -> Option<String> {
            cells
                .get(index)
                .map(|text| normalize(text))
                .filter(|text| !text.is_empty())
        };

        let department = cell(2);
        let city = cell(3);
        let housing_type = cell(4);
        let surface = cell(5);
        let rent = cell(7);
        let canonical_key = [&city, &department, &housing_type, &surface, &rent]
            .map(|field| field.as_str())
            .join(KEY_SEPARATOR);

        Self {
            partner: optional(0),
            reference: optional(1),
            department,
            city,
            housing_type,
            surface,
            rent,
            canonical_key,
        }
    }

    /// Deterministic key used for set membership and persistence.
    pub fn canonical_key(&self) -> &str {
        &self.canonical_key
    }

    /// Human-readable one-liner for notification digests.
    pub fn summary_line(&self) -> String {
        format!(
            "{} ({}) - {} - {} - {}",
            self.city, self.department, self.housing_type, self.surface, self.rent
        )
    }
}

pub struct RowExtractor {
    table_timeout: Duration,
}

impl RowExtractor {
    pub fn new(table_timeout: Duration) -> Self {
        Self { table_timeout }
    }

    /// Materializes every offer currently listed. Zero listings is valid
    /// state, so a missing table degrades to an empty result, never an error.
    pub fn extract(&self, doc: &dyn DocumentQuery) -> Vec<OfferRecord> {
        let table_present = |d: &dyn DocumentQuery| {
            d.find_all("table").map(|t| !t.is_empty()).unwrap_or(false)
        };
        if !doc.wait_for(&table_present, self.table_timeout) {
            warn!("no offers table appeared within {:?}", self.table_timeout);
            return Vec::new();
        }

        let rows = match doc.find_all("tr") {
            Ok(rows) => rows,
            Err(e) => {
                warn!("row enumeration failed: {e}");
                return Vec::new();
            }
        };
        debug!("found {} table rows", rows.len());

        let mut seen_keys = HashSet::new();
        let mut offers = Vec::new();
        for row in &rows {
            let cells = match doc.find_all_within(row, "td") {
                Ok(cells) => cells,
                Err(e) => {
                    debug!("skipping row {}: {e}", row.describe());
                    continue;
                }
            };
            let texts: Vec<String> = cells.iter().map(|cell| doc.text_of(cell)).collect();

            // The single relevance filter: offer rows carry a rent with a
            // currency marker; headers, document rows and blank rows do not.
            if !texts.iter().any(|text| currency_marker().is_match(text)) {
                continue;
            }

            let record = OfferRecord::from_cells(&texts);
            if seen_keys.insert(record.canonical_key.clone()) {
                debug!("offer detected: {}", record.summary_line());
                offers.push(record);
            }
        }
        offers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::HtmlDocument;

    fn cells(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    fn extractor() -> RowExtractor {
        RowExtractor::new(Duration::from_millis(10))
    }

    #[test]
    fn test_column_contract_full_row() {
        let record = OfferRecord::from_cells(&cells(&[
            "Action Logement",
            "REF-42",
            "75",
            "Paris",
            "T2",
            "45 m²",
            "(reserved)",
            "650 €",
        ]));
        assert_eq!(record.partner.as_deref(), Some("Action Logement"));
        assert_eq!(record.reference.as_deref(), Some("REF-42"));
        assert_eq!(record.department, "75");
        assert_eq!(record.city, "Paris");
        assert_eq!(record.housing_type, "T2");
        assert_eq!(record.surface, "45 m²");
        assert_eq!(record.rent, "650 €");
        assert_eq!(record.canonical_key(), "Paris|75|T2|45 m²|650 €");
        assert_eq!(record.summary_line(), "Paris (75) - T2 - 45 m² - 650 €");
    }

    #[test]
    fn test_short_row_maps_missing_cells_to_sentinel() {
        // Only 4 cells: no housing type, surface or rent columns.
        let record = OfferRecord::from_cells(&cells(&["P", "R", "69", "Lyon"]));
        assert_eq!(record.city, "Lyon");
        assert_eq!(record.housing_type, UNAVAILABLE);
        assert_eq!(record.surface, UNAVAILABLE);
        assert_eq!(record.rent, UNAVAILABLE);
    }

    #[test]
    fn test_canonical_key_ignores_incidental_whitespace() {
        let a = OfferRecord::from_cells(&cells(&[
            "P", "R", " 75", "Paris ", "T2", "45  m²", "", "650\u{a0}€",
        ]));
        let b = OfferRecord::from_cells(&cells(&[
            "P", "R", "75", "Paris", " T2 ", "45 m²", "x", "650 €",
        ]));
        assert_eq!(a.canonical_key(), b.canonical_key());
    }

    #[test]
    fn test_canonical_key_ignores_trailing_column_drift() {
        let short = OfferRecord::from_cells(&cells(&[
            "P", "R", "75", "Paris", "T2", "45 m²", "", "650 €",
        ]));
        let long = OfferRecord::from_cells(&cells(&[
            "P", "R", "75", "Paris", "T2", "45 m²", "", "650 €", "extra", "columns",
        ]));
        assert_eq!(short.canonical_key(), long.canonical_key());
    }

    const LISTING: &str = r#"
        <html><body>
        <table>
            <tr><th>Partenaire</th><th>Référence</th><th>Dépt</th><th>Ville</th>
                <th>Type</th><th>Surface</th><th></th><th>Loyer</th></tr>
            <tr><td>Action Logement</td><td>REF-1</td><td>75</td><td>Paris</td>
                <td>T2</td><td>45 m²</td><td></td><td>650 €</td></tr>
            <tr><td>Action Logement</td><td>REF-2</td><td>69</td><td>Lyon</td>
                <td>Studio</td><td>20 m²</td><td></td><td>400 €</td></tr>
            <tr><td>Attestation CAF</td><td>document.pdf</td><td>PDF</td></tr>
            <tr><td></td></tr>
        </table>
        </body></html>
    "#;

    #[test]
    fn test_extract_keeps_only_currency_marked_rows() {
        let doc = HtmlDocument::parse(LISTING);
        let offers = extractor().extract(&doc);
        assert_eq!(offers.len(), 2);
        assert_eq!(offers[0].city, "Paris");
        assert_eq!(offers[1].city, "Lyon");
    }

    #[test]
    fn test_extract_preserves_listing_order() {
        let doc = HtmlDocument::parse(LISTING);
        let offers = extractor().extract(&doc);
        let keys: Vec<&str> = offers.iter().map(|o| o.canonical_key()).collect();
        assert_eq!(keys, vec!["Paris|75|T2|45 m²|650 €", "Lyon|69|Studio|20 m²|400 €"]);
    }

    #[test]
    fn test_extract_collapses_duplicate_rows() {
        let doc = HtmlDocument::parse(
            r#"<table>
                <tr><td>P</td><td>R</td><td>75</td><td>Paris</td>
                    <td>T2</td><td>45 m²</td><td></td><td>650 €</td></tr>
                <tr><td>P</td><td>R</td><td>75</td><td>Paris</td>
                    <td>T2</td><td>45 m²</td><td></td><td>650 €</td></tr>
            </table>"#,
        );
        let offers = extractor().extract(&doc);
        assert_eq!(offers.len(), 1);
    }

    #[test]
    fn test_extract_emits_rows_with_empty_city() {
        // Malformed data stays visible instead of being silently dropped.
        let doc = HtmlDocument::parse(
            r#"<table>
                <tr><td>P</td><td>R</td><td>75</td><td></td>
                    <td>T2</td><td>45 m²</td><td></td><td>650 €</td></tr>
            </table>"#,
        );
        let offers = extractor().extract(&doc);
        assert_eq!(offers.len(), 1);
        assert_eq!(offers[0].city, UNAVAILABLE);
    }

    #[test]
    fn test_extract_without_table_returns_empty() {
        let doc = HtmlDocument::parse("<html><body><p>Aucune offre</p></body></html>");
        let offers = extractor().extract(&doc);
        assert!(offers.is_empty());
    }

    #[test]
    fn test_row_without_currency_marker_never_extracted() {
        let doc = HtmlDocument::parse(
            r#"<table>
                <tr><td>P</td><td>R</td><td>75</td><td>Paris</td>
                    <td>T2</td><td>45 m²</td><td></td><td>650</td></tr>
            </table>"#,
        );
        let offers = extractor().extract(&doc);
        assert!(offers.is_empty());
    }

    #[test]
    fn test_eur_word_counts_as_currency_marker() {
        assert!(currency_marker().is_match("650 EUR"));
        assert!(currency_marker().is_match("650 €"));
        assert!(!currency_marker().is_match("650 EUROPA"));
    }
}
