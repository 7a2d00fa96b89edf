//! Expected-vs-observed comparison
//!
//! [`DiffEngine::compare`] walks every identity present in both tables and
//! yields one [`ComparisonRow`] per configured field. [`ComparisonReport::build`]
//! then drops excluded rows, applies the per-account filter and attaches the
//! audit text to the first row of each identity.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::debug;

use crate::config::DiffConfig;
use crate::types::{is_sentinel, Identity, RecordField, UnitRecord};

/// Whitespace handling applied to both sides before comparing
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Normalization {
    /// Strip leading and trailing whitespace
    #[default]
    Trim,
    /// Remove every whitespace character
    StripAll,
}

impl Normalization {
    pub fn apply(&self, value: &str) -> String {
        match self {
            Normalization::Trim => value.trim().to_string(),
            Normalization::StripAll => value.split_whitespace().collect(),
        }
    }
}

/// Outcome for one (identity, field) pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "verdict")]
pub enum Verdict {
    Match,
    /// Raw values, before normalization
    Mismatch { expected: String, actual: String },
    /// Optional field not rendered on the page
    Excluded,
}

impl Verdict {
    pub fn is_match(&self) -> bool {
        matches!(self, Verdict::Match)
    }

    pub fn is_excluded(&self) -> bool {
        matches!(self, Verdict::Excluded)
    }
}

/// One compared field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComparisonRow {
    pub identity: Identity,
    pub field: RecordField,
    pub expected: String,
    pub actual: String,
    pub verdict: Verdict,
    /// Only set on the first emitted row of an identity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audit: Option<String>,
}

/// Account -> field names that may be reported
///
/// Accounts missing from the table are reported in full.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FilterTable(BTreeMap<String, BTreeSet<String>>);

impl FilterTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allow(&mut self, account: impl Into<String>, field: RecordField) {
        self.0.entry(account.into()).or_default().insert(field.to_string());
    }

    pub fn permits(&self, account: &str, field: RecordField) -> bool {
        match self.0.get(account) {
            Some(fields) => fields.contains(&field.to_string()),
            None => true,
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Field-by-field comparison of two record tables
#[derive(Debug, Clone)]
pub struct DiffEngine {
    normalization: Normalization,
    excluded: Vec<RecordField>,
    fields: Vec<RecordField>,
}

impl Default for DiffEngine {
    fn default() -> Self {
        Self::new(&DiffConfig::default())
    }
}

impl DiffEngine {
    pub fn new(config: &DiffConfig) -> Self {
        Self {
            normalization: config.normalization,
            excluded: config.excluded_fields.clone(),
            fields: config.fields(),
        }
    }

    pub fn fields(&self) -> &[RecordField] {
        &self.fields
    }

    /// Compare one value pair
    pub fn compare_value(&self, field: RecordField, expected: &str, actual: &str) -> Verdict {
        if self.excluded.contains(&field) && is_sentinel(actual) {
            return Verdict::Excluded;
        }
        if self.normalization.apply(expected) == self.normalization.apply(actual) {
            Verdict::Match
        } else {
            Verdict::Mismatch {
                expected: expected.to_string(),
                actual: actual.to_string(),
            }
        }
    }

    /// Compare every identity present in both tables, in expected-table order
    pub fn compare(&self, expected: &[UnitRecord], actual: &[UnitRecord]) -> Vec<ComparisonRow> {
        self.compare_fields(expected, actual, &self.fields)
    }

    /// As [`DiffEngine::compare`] with an explicit field list
    pub fn compare_fields(
        &self,
        expected: &[UnitRecord],
        actual: &[UnitRecord],
        fields: &[RecordField],
    ) -> Vec<ComparisonRow> {
        let mut observed: HashMap<Identity, &UnitRecord> = HashMap::with_capacity(actual.len());
        for record in actual {
            observed.entry(record.identity()).or_insert(record);
        }

        let mut rows = Vec::with_capacity(expected.len() * fields.len());
        for want in expected {
            let identity = want.identity();
            let Some(got) = observed.get(&identity) else {
                debug!(%identity, "No observed record; skipping");
                continue;
            };
            for &field in fields {
                let (e, a) = (want.get(field), got.get(field));
                rows.push(ComparisonRow {
                    identity: identity.clone(),
                    field,
                    expected: e.to_string(),
                    actual: a.to_string(),
                    verdict: self.compare_value(field, e, a),
                    audit: None,
                });
            }
        }
        rows
    }
}

/// Match / mismatch counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub identities: usize,
    pub rows: usize,
    pub matched: usize,
    pub mismatched: usize,
}

/// Filtered, audit-annotated comparison rows grouped by identity
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComparisonReport {
    rows: Vec<ComparisonRow>,
}

impl ComparisonReport {
    /// Assemble the report
    ///
    /// `audits` maps an identity to its audit text; identities without an
    /// entry get none.
    pub fn build(
        rows: Vec<ComparisonRow>,
        filter: &FilterTable,
        audits: &HashMap<Identity, String>,
    ) -> Self {
        let mut seen: BTreeSet<Identity> = BTreeSet::new();
        let rows = rows
            .into_iter()
            .filter(|row| !row.verdict.is_excluded())
            .filter(|row| filter.permits(&row.identity.account, row.field))
            .map(|mut row| {
                if seen.insert(row.identity.clone()) {
                    row.audit = audits.get(&row.identity).cloned();
                }
                row
            })
            .collect();
        Self { rows }
    }

    /// Audit text (recommended products) for every record
    pub fn audits(records: &[UnitRecord]) -> HashMap<Identity, String> {
        records
            .iter()
            .map(|r| (r.identity(), r.recommendation_audit()))
            .collect()
    }

    pub fn rows(&self) -> &[ComparisonRow] {
        &self.rows
    }

    pub fn mismatches(&self) -> impl Iterator<Item = &ComparisonRow> {
        self.rows.iter().filter(|r| !r.verdict.is_match())
    }

    /// Rows split by country code, preserving order within each country
    pub fn by_country(&self) -> BTreeMap<&str, Vec<&ComparisonRow>> {
        let mut split: BTreeMap<&str, Vec<&ComparisonRow>> = BTreeMap::new();
        for row in &self.rows {
            split.entry(row.identity.country_code.as_str()).or_default().push(row);
        }
        split
    }

    pub fn summary(&self) -> ReportSummary {
        let identities: BTreeSet<&Identity> = self.rows.iter().map(|r| &r.identity).collect();
        let matched = self.rows.iter().filter(|r| r.verdict.is_match()).count();
        ReportSummary {
            identities: identities.len(),
            rows: self.rows.len(),
            matched,
            mismatched: self.rows.len() - matched,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(account: &str, cc: &str, values: &[(RecordField, &str)]) -> UnitRecord {
        let mut r = UnitRecord::sentinel(&Identity::new(account, cc));
        for (field, value) in values {
            r.set(*field, *value).unwrap();
        }
        r
    }

    #[test]
    fn test_surrounding_whitespace_matches() {
        let engine = DiffEngine::default();
        assert_eq!(
            engine.compare_value(RecordField::MainHeadline, " Hello", "Hello"),
            Verdict::Match
        );
        assert_eq!(
            engine.compare_value(RecordField::MainHeadline, "Hel lo", "Hello"),
            Verdict::Mismatch {
                expected: "Hel lo".to_string(),
                actual: "Hello".to_string()
            }
        );
    }

    #[test]
    fn test_strip_all_ignores_inner_whitespace() {
        let config = DiffConfig {
            normalization: Normalization::StripAll,
            ..Default::default()
        };
        let engine = DiffEngine::new(&config);
        assert!(engine
            .compare_value(RecordField::MainHeadline, "Hel lo\n", "Hello")
            .is_match());
    }

    #[test]
    fn test_banner_sentinel_is_excluded() {
        let engine = DiffEngine::default();
        assert_eq!(
            engine.compare_value(RecordField::BannerText, "Opt in now", "none"),
            Verdict::Excluded
        );
        // only the observed side triggers exclusion
        assert!(matches!(
            engine.compare_value(RecordField::BannerText, "none", "Opt in now"),
            Verdict::Mismatch { .. }
        ));
        assert!(matches!(
            engine.compare_value(RecordField::MainHeadline, "Hi", "none"),
            Verdict::Mismatch { .. }
        ));
    }

    #[test]
    fn test_compare_follows_expected_order_and_skips_unmatched() {
        let engine = DiffEngine::default();
        let expected = vec![
            record("b", "DE", &[]),
            record("missing", "DE", &[]),
            record("a", "FR", &[]),
        ];
        let actual = vec![record("a", "FR", &[]), record("b", "DE", &[])];

        let rows = engine.compare_fields(&expected, &actual, &[RecordField::MainHeadline]);
        let accounts: Vec<_> = rows.iter().map(|r| r.identity.account.as_str()).collect();
        assert_eq!(accounts, vec!["b", "a"]);
    }

    #[test]
    fn test_filter_keeps_permitted_fields_only() {
        let engine = DiffEngine::default();
        let fields = [
            RecordField::MainHeadline,
            RecordField::MainDescription,
            RecordField::StoryId(1),
            RecordField::StoryId(2),
            RecordField::StoryId(3),
        ];
        let rows = engine.compare_fields(
            &[record("a", "DE", &[])],
            &[record("a", "DE", &[])],
            &fields,
        );

        let mut filter = FilterTable::new();
        filter.allow("a", RecordField::StoryId(1));
        filter.allow("a", RecordField::MainHeadline);

        let report = ComparisonReport::build(rows, &filter, &HashMap::new());
        let kept: Vec<_> = report.rows().iter().map(|r| r.field).collect();
        assert_eq!(kept, vec![RecordField::MainHeadline, RecordField::StoryId(1)]);
    }

    #[test]
    fn test_filter_is_fail_open_for_unknown_accounts() {
        let engine = DiffEngine::default();
        let rows = engine.compare(&[record("a", "DE", &[])], &[record("a", "DE", &[])]);
        let total = rows.len();

        let mut filter = FilterTable::new();
        filter.allow("someone-else", RecordField::MainHeadline);

        let report = ComparisonReport::build(rows, &filter, &HashMap::new());
        // banner sentinels are excluded, everything else survives
        assert_eq!(report.rows().len(), total - 3);
    }

    #[test]
    fn test_audit_only_on_first_row_of_identity() {
        let engine = DiffEngine::default();
        let records = vec![
            record("a", "DE", &[(RecordField::StoryRec(1, 1), "Galaxy Buds")]),
            record("b", "DE", &[]),
        ];
        let rows = engine.compare(&records, &records);
        let audits = ComparisonReport::audits(&records);
        let report = ComparisonReport::build(rows, &FilterTable::new(), &audits);

        let with_audit: Vec<_> = report.rows().iter().filter(|r| r.audit.is_some()).collect();
        assert_eq!(with_audit.len(), 2);
        assert_eq!(with_audit[0].identity.account, "a");
        assert_eq!(with_audit[0].field, RecordField::MainHeadline);
        assert!(with_audit[0]
            .audit
            .as_deref()
            .unwrap()
            .contains("storyIdRank1_rec1: Galaxy Buds"));
    }

    #[test]
    fn test_summary_and_country_split() {
        let engine = DiffEngine::default();
        let expected = vec![
            record("a", "DE", &[(RecordField::MainHeadline, "Hi")]),
            record("b", "FR", &[(RecordField::MainHeadline, "Salut")]),
        ];
        let actual = vec![
            record("a", "DE", &[(RecordField::MainHeadline, "Hi ")]),
            record("b", "FR", &[(RecordField::MainHeadline, "Bonjour")]),
        ];
        let rows = engine.compare_fields(&expected, &actual, &[RecordField::MainHeadline]);
        let report = ComparisonReport::build(rows, &FilterTable::new(), &HashMap::new());

        assert_eq!(
            report.summary(),
            ReportSummary {
                identities: 2,
                rows: 2,
                matched: 1,
                mismatched: 1
            }
        );
        let split = report.by_country();
        assert_eq!(split.keys().copied().collect::<Vec<_>>(), vec!["DE", "FR"]);
        assert_eq!(report.mismatches().count(), 1);
    }

    #[test]
    fn test_filter_table_from_yaml() {
        let filter: FilterTable =
            serde_yaml::from_str("a@example.com: [storyIdRank1, main_headline]\n").unwrap();
        assert!(filter.permits("a@example.com", RecordField::StoryId(1)));
        assert!(!filter.permits("a@example.com", RecordField::StoryId(2)));
        assert!(filter.permits("b@example.com", RecordField::StoryId(2)));
    }
}
