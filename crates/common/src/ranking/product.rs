//! Product tiering and device selection

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::debug;

use super::{Direction, RankingChain};
use crate::config::RankingConfig;
use crate::types::SENTINEL;

/// Product tier; lower tiers rank first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Registered through the primary channel
    Primary = 1,
    /// Registered through any channel
    Registered = 2,
    Other = 3,
}

/// One owned product as reported by the product source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductCandidate {
    pub model_code: String,
    pub channel: String,
    pub registration: String,
    /// Registration date; `None` when absent or unparseable
    pub created: Option<NaiveDate>,
}

impl ProductCandidate {
    pub fn new(
        model_code: impl Into<String>,
        channel: impl Into<String>,
        registration: impl Into<String>,
        created: Option<NaiveDate>,
    ) -> Self {
        Self {
            model_code: model_code.into(),
            channel: channel.into(),
            registration: registration.into(),
            created,
        }
    }

    /// Build from one `productList.items` entry; registration details come
    /// from the first element of `records`
    pub fn from_item(item: &Value) -> Self {
        let record = item.get("records").and_then(|r| r.get(0));
        let text = |v: Option<&Value>| v.and_then(Value::as_str).unwrap_or(SENTINEL).to_string();

        Self {
            model_code: text(item.get("modelCode")),
            channel: text(record.and_then(|r| r.get("channel"))),
            registration: text(record.and_then(|r| r.get("type"))),
            created: record
                .and_then(|r| r.get("createdDateTime"))
                .and_then(Value::as_str)
                .and_then(parse_date),
        }
    }

    pub fn tier(&self, rules: &RankingConfig) -> Tier {
        let registered = self.registration == rules.registered_status;
        if registered && self.channel == rules.primary_channel {
            Tier::Primary
        } else if registered {
            Tier::Registered
        } else {
            Tier::Other
        }
    }
}

/// Date part of an ISO-8601 timestamp (`2024-05-01T10:00:00Z` -> 2024-05-01)
fn parse_date(raw: &str) -> Option<NaiveDate> {
    let date = raw.split('T').next().unwrap_or(raw);
    NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d").ok()
}

/// Model code -> display name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetadataTable(BTreeMap<String, String>);

impl MetadataTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from the meta source's `resultData.result` object
    /// (`{ modelCode: { nameCis, .. } }`)
    pub fn from_meta_result(result: &Value) -> Self {
        let names = result
            .as_object()
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|(code, meta)| {
                        let name = meta.get("nameCis")?.as_str()?;
                        Some((code.clone(), name.to_string()))
                    })
                    .collect()
            })
            .unwrap_or_default();
        Self(names)
    }

    pub fn insert(&mut self, code: impl Into<String>, name: impl Into<String>) {
        self.0.insert(code.into(), name.into());
    }

    pub fn get(&self, code: &str) -> Option<&str> {
        self.0.get(code).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Fill codes this table lacks from `fallback`
    pub fn merge_missing(&mut self, fallback: &MetadataTable) {
        for (code, name) in &fallback.0 {
            self.0.entry(code.clone()).or_insert_with(|| name.clone());
        }
    }

    fn first_name(&self) -> Option<&str> {
        self.0.values().next().map(String::as_str)
    }
}

/// Devices shown in the page description
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum DeviceSelection {
    /// The account has no product metadata
    NoDevices,
    Devices { first: String, second: String },
}

impl DeviceSelection {
    /// `(Device1, Device2)` column values
    pub fn columns(&self) -> (String, String) {
        match self {
            DeviceSelection::NoDevices => (SENTINEL.to_string(), SENTINEL.to_string()),
            DeviceSelection::Devices { first, second } => (first.clone(), second.clone()),
        }
    }
}

/// Order products: tier, then most recent first, then input order
pub fn rank_products(candidates: Vec<ProductCandidate>, rules: &RankingConfig) -> Vec<ProductCandidate> {
    let rules = rules.clone();
    RankingChain::new()
        .by("tier", move |p: &ProductCandidate| p.tier(&rules), Direction::Ascending)
        .by("created", |p: &ProductCandidate| p.created, Direction::Descending)
        .then_by_insertion()
        .rank(candidates)
}

/// Choose the two representative devices
///
/// With a single metadata entry both slots show it. Otherwise the first two
/// distinct model codes in rank order are named through `metadata`; when only
/// one distinct code exists both slots reference it. Codes without a name
/// and an empty product list both yield the sentinel.
pub fn select_devices(
    candidates: Vec<ProductCandidate>,
    metadata: &MetadataTable,
    rules: &RankingConfig,
) -> DeviceSelection {
    if metadata.is_empty() {
        return DeviceSelection::NoDevices;
    }
    if metadata.len() == 1 {
        let name = metadata.first_name().unwrap_or(SENTINEL).to_string();
        return DeviceSelection::Devices {
            first: name.clone(),
            second: name,
        };
    }

    let ranked = rank_products(candidates, rules);
    let mut codes: Vec<&str> = Vec::with_capacity(2);
    for product in &ranked {
        if !codes.contains(&product.model_code.as_str()) {
            codes.push(&product.model_code);
            if codes.len() == 2 {
                break;
            }
        }
    }
    debug!(?codes, ranked = ranked.len(), "Selected device model codes");

    let name = |code: Option<&&str>| {
        code.and_then(|c| metadata.get(c))
            .unwrap_or(SENTINEL)
            .to_string()
    };
    let first = name(codes.first());
    let second = if codes.len() < 2 { first.clone() } else { name(codes.get(1)) };
    DeviceSelection::Devices { first, second }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn date(s: &str) -> Option<NaiveDate> {
        parse_date(s)
    }

    fn metadata(entries: &[(&str, &str)]) -> MetadataTable {
        let mut table = MetadataTable::new();
        for (code, name) in entries {
            table.insert(*code, *name);
        }
        table
    }

    #[test]
    fn test_tier_dominates_recency() {
        let rules = RankingConfig::default();
        let ranked = rank_products(
            vec![
                ProductCandidate::new("T3", "SMARTTHINGS", "UNREGISTRATION", date("2024-03-01")),
                ProductCandidate::new("T2", "SMARTTHINGS", "REGISTRATION", date("2024-02-01")),
                ProductCandidate::new("T1", "SAMSUNG_ACCOUNT", "REGISTRATION", date("2024-01-01")),
            ],
            &rules,
        );
        let codes: Vec<_> = ranked.iter().map(|p| p.model_code.as_str()).collect();
        assert_eq!(codes, vec!["T1", "T2", "T3"]);
    }

    #[test]
    fn test_recency_then_insertion_within_tier() {
        let rules = RankingConfig::default();
        let ranked = rank_products(
            vec![
                ProductCandidate::new("old", "X", "REGISTRATION", date("2023-01-01")),
                ProductCandidate::new("undated", "X", "REGISTRATION", None),
                ProductCandidate::new("new-a", "X", "REGISTRATION", date("2024-06-01")),
                ProductCandidate::new("new-b", "X", "REGISTRATION", date("2024-06-01T09:00:00")),
            ],
            &rules,
        );
        let codes: Vec<_> = ranked.iter().map(|p| p.model_code.as_str()).collect();
        assert_eq!(codes, vec!["new-a", "new-b", "old", "undated"]);
    }

    #[test]
    fn test_from_item_reads_first_record() {
        let item = json!({
            "modelCode": "SM-S918B",
            "records": [
                {"type": "REGISTRATION", "channel": "SAMSUNG_ACCOUNT", "createdDateTime": "2024-05-01T10:00:00Z"},
                {"type": "UNREGISTRATION", "channel": "SMARTTHINGS"}
            ]
        });
        let product = ProductCandidate::from_item(&item);
        assert_eq!(product.model_code, "SM-S918B");
        assert_eq!(product.tier(&RankingConfig::default()), Tier::Primary);
        assert_eq!(product.created, NaiveDate::from_ymd_opt(2024, 5, 1));

        let bare = ProductCandidate::from_item(&json!({}));
        assert_eq!(bare.model_code, SENTINEL);
        assert_eq!(bare.created, None);
        assert_eq!(bare.tier(&RankingConfig::default()), Tier::Other);
    }

    #[test]
    fn test_select_two_distinct_devices() {
        let rules = RankingConfig::default();
        let meta = metadata(&[("A", "Galaxy S24"), ("B", "Neo QLED"), ("C", "Bespoke")]);
        let selection = select_devices(
            vec![
                ProductCandidate::new("A", "SAMSUNG_ACCOUNT", "REGISTRATION", date("2024-01-01")),
                ProductCandidate::new("A", "SAMSUNG_ACCOUNT", "REGISTRATION", date("2023-01-01")),
                ProductCandidate::new("C", "SMARTTHINGS", "REGISTRATION", date("2024-01-01")),
                ProductCandidate::new("B", "SMARTTHINGS", "UNREGISTRATION", date("2025-01-01")),
            ],
            &meta,
            &rules,
        );
        assert_eq!(
            selection,
            DeviceSelection::Devices {
                first: "Galaxy S24".to_string(),
                second: "Bespoke".to_string()
            }
        );
    }

    #[test]
    fn test_single_distinct_code_fills_both_slots() {
        let rules = RankingConfig::default();
        let meta = metadata(&[("A", "Galaxy S24"), ("B", "Neo QLED")]);
        let selection = select_devices(
            vec![ProductCandidate::new("B", "X", "REGISTRATION", None)],
            &meta,
            &rules,
        );
        assert_eq!(selection.columns(), ("Neo QLED".to_string(), "Neo QLED".to_string()));
    }

    #[test]
    fn test_degenerate_metadata() {
        let rules = RankingConfig::default();
        assert_eq!(
            select_devices(vec![], &MetadataTable::new(), &rules),
            DeviceSelection::NoDevices
        );
        assert_eq!(
            select_devices(vec![], &metadata(&[("A", "Galaxy S24")]), &rules).columns(),
            ("Galaxy S24".to_string(), "Galaxy S24".to_string())
        );
        assert_eq!(
            select_devices(vec![], &metadata(&[("A", "x"), ("B", "y")]), &rules).columns(),
            (SENTINEL.to_string(), SENTINEL.to_string())
        );
    }

    #[test]
    fn test_metadata_from_meta_result() {
        let meta = MetadataTable::from_meta_result(&json!({
            "SM-S918B": {"nameCis": "Galaxy S23 Ultra"},
            "QN90": {"other": 1}
        }));
        assert_eq!(meta.len(), 1);
        assert_eq!(meta.get("SM-S918B"), Some("Galaxy S23 Ultra"));

        let mut merged = meta.clone();
        merged.merge_missing(&metadata(&[("QN90", "Neo QLED"), ("SM-S918B", "ignored")]));
        assert_eq!(merged.get("QN90"), Some("Neo QLED"));
        assert_eq!(merged.get("SM-S918B"), Some("Galaxy S23 Ultra"));
    }
}
