//! Core record types for smartcheck
//!
//! A [`UnitRecord`] is the fixed-shape row produced for every account/locale
//! pair. Every column is always present; absent values hold [`SENTINEL`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Placeholder for an absent or unavailable value
pub const SENTINEL: &str = "none";

/// Number of story slots on the recommendation page
pub const STORY_SLOTS: u8 = 3;

/// Number of recommended products shown per story
pub const RECS_PER_STORY: u8 = 5;

/// Number of lifestyle / scenario keyword slots
pub const LIFESTYLE_SLOTS: u8 = 2;

/// Whether a value is the sentinel (ignoring surrounding whitespace)
pub fn is_sentinel(value: &str) -> bool {
    value.trim() == SENTINEL
}

fn sentinel() -> String {
    SENTINEL.to_string()
}

// ============================================================================
// Record fields
// ============================================================================

/// Addressable column of a [`UnitRecord`]
///
/// Slot numbers are 1-based, matching the column names used in the expected
/// spreadsheets (`storyIdRank1_rec3`, `lifeStyleIdRank2`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RecordField {
    Account,
    CountryCode,
    FullName,
    MainHeadline,
    MainDescription,
    MainDescription1,
    MainDescription2,
    StoryId(u8),
    /// Story shown when marketing consent is missing
    StoryIdOptOut(u8),
    StoryTitle(u8),
    StoryDesc(u8),
    StoryRec(u8, u8),
    LifestyleId(u8),
    ScenarioKeyword(u8),
    Device1,
    Device2,
    BannerText,
    BannerLinkText,
    BannerHyperlink,
}

impl RecordField {
    /// Every column in canonical output order
    pub fn all() -> Vec<RecordField> {
        let mut fields = vec![
            RecordField::Account,
            RecordField::CountryCode,
            RecordField::FullName,
            RecordField::MainHeadline,
            RecordField::MainDescription,
            RecordField::MainDescription1,
            RecordField::MainDescription2,
        ];
        for n in 1..=STORY_SLOTS {
            fields.push(RecordField::StoryId(n));
        }
        for n in 1..=STORY_SLOTS {
            fields.push(RecordField::StoryIdOptOut(n));
        }
        for n in 1..=STORY_SLOTS {
            fields.push(RecordField::StoryTitle(n));
            fields.push(RecordField::StoryDesc(n));
            for k in 1..=RECS_PER_STORY {
                fields.push(RecordField::StoryRec(n, k));
            }
        }
        for n in 1..=LIFESTYLE_SLOTS {
            fields.push(RecordField::LifestyleId(n));
        }
        for n in 1..=LIFESTYLE_SLOTS {
            fields.push(RecordField::ScenarioKeyword(n));
        }
        fields.extend([
            RecordField::Device1,
            RecordField::Device2,
            RecordField::BannerText,
            RecordField::BannerLinkText,
            RecordField::BannerHyperlink,
        ]);
        fields
    }

    /// Columns compared against the expected table by default
    pub fn comparison_defaults() -> Vec<RecordField> {
        let mut fields = vec![RecordField::MainHeadline, RecordField::MainDescription];
        for n in 1..=STORY_SLOTS {
            fields.push(RecordField::StoryId(n));
        }
        for n in 1..=STORY_SLOTS {
            fields.push(RecordField::StoryTitle(n));
            fields.push(RecordField::StoryDesc(n));
        }
        fields.extend([
            RecordField::BannerText,
            RecordField::BannerLinkText,
            RecordField::BannerHyperlink,
        ]);
        fields
    }

    /// Banner columns; the banner is only rendered for some consent states
    pub fn banner_fields() -> [RecordField; 3] {
        [
            RecordField::BannerText,
            RecordField::BannerLinkText,
            RecordField::BannerHyperlink,
        ]
    }

    /// Whether this column carries a recommended product name
    pub fn is_recommendation(&self) -> bool {
        matches!(self, RecordField::StoryRec(..))
    }

    fn validate(self) -> Result<Self> {
        let in_range = match self {
            RecordField::StoryId(n)
            | RecordField::StoryIdOptOut(n)
            | RecordField::StoryTitle(n)
            | RecordField::StoryDesc(n) => (1..=STORY_SLOTS).contains(&n),
            RecordField::StoryRec(n, k) => {
                (1..=STORY_SLOTS).contains(&n) && (1..=RECS_PER_STORY).contains(&k)
            }
            RecordField::LifestyleId(n) | RecordField::ScenarioKeyword(n) => {
                (1..=LIFESTYLE_SLOTS).contains(&n)
            }
            _ => true,
        };
        if in_range {
            Ok(self)
        } else {
            Err(Error::UnknownField(self.to_string()))
        }
    }
}

impl fmt::Display for RecordField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordField::Account => write!(f, "Account"),
            RecordField::CountryCode => write!(f, "country_code"),
            RecordField::FullName => write!(f, "fullName"),
            RecordField::MainHeadline => write!(f, "main_headline"),
            RecordField::MainDescription => write!(f, "main_description"),
            RecordField::MainDescription1 => write!(f, "main_description1"),
            RecordField::MainDescription2 => write!(f, "main_description2"),
            RecordField::StoryId(n) => write!(f, "storyIdRank{}", n),
            RecordField::StoryIdOptOut(n) => write!(f, "storyIdRank{}N", n),
            RecordField::StoryTitle(n) => write!(f, "storyIdRank{}_title", n),
            RecordField::StoryDesc(n) => write!(f, "storyIdRank{}_desc", n),
            RecordField::StoryRec(n, k) => write!(f, "storyIdRank{}_rec{}", n, k),
            RecordField::LifestyleId(n) => write!(f, "lifeStyleIdRank{}", n),
            RecordField::ScenarioKeyword(n) => write!(f, "Scenariokeyword{}", n),
            RecordField::Device1 => write!(f, "Device1"),
            RecordField::Device2 => write!(f, "Device2"),
            RecordField::BannerText => write!(f, "banner_text"),
            RecordField::BannerLinkText => write!(f, "banner_link_text"),
            RecordField::BannerHyperlink => write!(f, "banner_hyperlink"),
        }
    }
}

impl FromStr for RecordField {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let fixed = match s {
            "Account" => Some(RecordField::Account),
            "country_code" => Some(RecordField::CountryCode),
            "fullName" => Some(RecordField::FullName),
            "main_headline" => Some(RecordField::MainHeadline),
            "main_description" => Some(RecordField::MainDescription),
            "main_description1" => Some(RecordField::MainDescription1),
            "main_description2" => Some(RecordField::MainDescription2),
            "Device1" => Some(RecordField::Device1),
            "Device2" => Some(RecordField::Device2),
            "banner_text" => Some(RecordField::BannerText),
            "banner_link_text" => Some(RecordField::BannerLinkText),
            "banner_hyperlink" => Some(RecordField::BannerHyperlink),
            _ => None,
        };
        if let Some(field) = fixed {
            return Ok(field);
        }

        let unknown = || Error::UnknownField(s.to_string());
        let slot = |digits: &str| digits.parse::<u8>().map_err(|_| unknown());

        let field = if let Some(rest) = s.strip_prefix("storyIdRank") {
            let split = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
            let (digits, suffix) = rest.split_at(split);
            let n = slot(digits)?;
            match suffix {
                "" => RecordField::StoryId(n),
                "N" => RecordField::StoryIdOptOut(n),
                "_title" => RecordField::StoryTitle(n),
                "_desc" => RecordField::StoryDesc(n),
                other => match other.strip_prefix("_rec") {
                    Some(k) => RecordField::StoryRec(n, slot(k)?),
                    None => return Err(unknown()),
                },
            }
        } else if let Some(n) = s.strip_prefix("lifeStyleIdRank") {
            RecordField::LifestyleId(slot(n)?)
        } else if let Some(n) = s.strip_prefix("Scenariokeyword") {
            RecordField::ScenarioKeyword(slot(n)?)
        } else {
            return Err(unknown());
        };

        field.validate()
    }
}

impl Serialize for RecordField {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for RecordField {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// Identity and status
// ============================================================================

/// Account/locale pair identifying one unit of work
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Identity {
    pub account: String,
    pub country_code: String,
}

impl Identity {
    pub fn new(account: impl Into<String>, country_code: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            country_code: country_code.into(),
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.account, self.country_code)
    }
}

/// Terminal status of a unit of work
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    Succeeded,
    SentinelFailed,
}

impl fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitStatus::Succeeded => write!(f, "succeeded"),
            UnitStatus::SentinelFailed => write!(f, "sentinel_failed"),
        }
    }
}

// ============================================================================
// Unit record
// ============================================================================

/// One story slot of the recommendation page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorySlot {
    pub id: String,
    pub id_opt_out: String,
    pub title: String,
    pub desc: String,
    pub recs: [String; RECS_PER_STORY as usize],
}

impl Default for StorySlot {
    fn default() -> Self {
        Self {
            id: sentinel(),
            id_opt_out: sentinel(),
            title: sentinel(),
            desc: sentinel(),
            recs: std::array::from_fn(|_| sentinel()),
        }
    }
}

/// Fixed-shape output row for one unit of work
///
/// Serialized as a flat `column name -> value` map so expected tables can be
/// written by hand. Columns missing from the input keep the sentinel; columns
/// this record does not know are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    try_from = "BTreeMap<String, serde_json::Value>",
    into = "BTreeMap<String, String>"
)]
pub struct UnitRecord {
    pub account: String,
    pub country_code: String,
    pub full_name: String,
    pub main_headline: String,
    pub main_description: String,
    pub main_description1: String,
    pub main_description2: String,
    pub stories: [StorySlot; STORY_SLOTS as usize],
    pub lifestyle_ids: [String; LIFESTYLE_SLOTS as usize],
    pub scenario_keywords: [String; LIFESTYLE_SLOTS as usize],
    pub device1: String,
    pub device2: String,
    pub banner_text: String,
    pub banner_link_text: String,
    pub banner_hyperlink: String,
}

impl Default for UnitRecord {
    fn default() -> Self {
        Self {
            account: sentinel(),
            country_code: sentinel(),
            full_name: sentinel(),
            main_headline: sentinel(),
            main_description: sentinel(),
            main_description1: sentinel(),
            main_description2: sentinel(),
            stories: std::array::from_fn(|_| StorySlot::default()),
            lifestyle_ids: std::array::from_fn(|_| sentinel()),
            scenario_keywords: std::array::from_fn(|_| sentinel()),
            device1: sentinel(),
            device2: sentinel(),
            banner_text: sentinel(),
            banner_link_text: sentinel(),
            banner_hyperlink: sentinel(),
        }
    }
}

impl UnitRecord {
    /// Record with only identity columns set; everything else is the sentinel
    pub fn sentinel(identity: &Identity) -> Self {
        Self {
            account: identity.account.clone(),
            country_code: identity.country_code.clone(),
            ..Default::default()
        }
    }

    pub fn identity(&self) -> Identity {
        Identity::new(self.account.clone(), self.country_code.clone())
    }

    /// Read a column
    pub fn get(&self, field: RecordField) -> &str {
        match field {
            RecordField::Account => &self.account,
            RecordField::CountryCode => &self.country_code,
            RecordField::FullName => &self.full_name,
            RecordField::MainHeadline => &self.main_headline,
            RecordField::MainDescription => &self.main_description,
            RecordField::MainDescription1 => &self.main_description1,
            RecordField::MainDescription2 => &self.main_description2,
            RecordField::Device1 => &self.device1,
            RecordField::Device2 => &self.device2,
            RecordField::BannerText => &self.banner_text,
            RecordField::BannerLinkText => &self.banner_link_text,
            RecordField::BannerHyperlink => &self.banner_hyperlink,
            RecordField::StoryId(n) => self.story(n).map_or(SENTINEL, |s| s.id.as_str()),
            RecordField::StoryIdOptOut(n) => self.story(n).map_or(SENTINEL, |s| s.id_opt_out.as_str()),
            RecordField::StoryTitle(n) => self.story(n).map_or(SENTINEL, |s| s.title.as_str()),
            RecordField::StoryDesc(n) => self.story(n).map_or(SENTINEL, |s| s.desc.as_str()),
            RecordField::StoryRec(n, k) => self
                .story(n)
                .and_then(|s| s.recs.get(usize::from(k).wrapping_sub(1)))
                .map_or(SENTINEL, String::as_str),
            RecordField::LifestyleId(n) => slot(&self.lifestyle_ids, n).map_or(SENTINEL, String::as_str),
            RecordField::ScenarioKeyword(n) => {
                slot(&self.scenario_keywords, n).map_or(SENTINEL, String::as_str)
            }
        }
    }

    /// Write a column; fails only for out-of-range slot numbers
    pub fn set(&mut self, field: RecordField, value: impl Into<String>) -> Result<()> {
        let target = self
            .slot_mut(field)
            .ok_or_else(|| Error::UnknownField(field.to_string()))?;
        *target = value.into();
        Ok(())
    }

    /// `column: value` lines of the recommended products, used as audit text
    pub fn recommendation_audit(&self) -> String {
        RecordField::all()
            .into_iter()
            .filter(RecordField::is_recommendation)
            .map(|field| format!("{}: {}", field, self.get(field)))
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn story(&self, n: u8) -> Option<&StorySlot> {
        self.stories.get(usize::from(n).wrapping_sub(1))
    }

    fn slot_mut(&mut self, field: RecordField) -> Option<&mut String> {
        let idx = |n: u8| usize::from(n).wrapping_sub(1);
        Some(match field {
            RecordField::Account => &mut self.account,
            RecordField::CountryCode => &mut self.country_code,
            RecordField::FullName => &mut self.full_name,
            RecordField::MainHeadline => &mut self.main_headline,
            RecordField::MainDescription => &mut self.main_description,
            RecordField::MainDescription1 => &mut self.main_description1,
            RecordField::MainDescription2 => &mut self.main_description2,
            RecordField::Device1 => &mut self.device1,
            RecordField::Device2 => &mut self.device2,
            RecordField::BannerText => &mut self.banner_text,
            RecordField::BannerLinkText => &mut self.banner_link_text,
            RecordField::BannerHyperlink => &mut self.banner_hyperlink,
            RecordField::StoryId(n) => &mut self.stories.get_mut(idx(n))?.id,
            RecordField::StoryIdOptOut(n) => &mut self.stories.get_mut(idx(n))?.id_opt_out,
            RecordField::StoryTitle(n) => &mut self.stories.get_mut(idx(n))?.title,
            RecordField::StoryDesc(n) => &mut self.stories.get_mut(idx(n))?.desc,
            RecordField::StoryRec(n, k) => self.stories.get_mut(idx(n))?.recs.get_mut(idx(k))?,
            RecordField::LifestyleId(n) => self.lifestyle_ids.get_mut(idx(n))?,
            RecordField::ScenarioKeyword(n) => self.scenario_keywords.get_mut(idx(n))?,
        })
    }
}

fn slot(values: &[String], n: u8) -> Option<&String> {
    values.get(usize::from(n).wrapping_sub(1))
}

/// Spreadsheet exports carry blank cells as `null` and numeric ids as
/// numbers; a blank stays the sentinel and scalars become text.
impl TryFrom<BTreeMap<String, serde_json::Value>> for UnitRecord {
    type Error = Error;

    fn try_from(columns: BTreeMap<String, serde_json::Value>) -> Result<Self> {
        let mut record = UnitRecord::default();
        for (name, value) in columns {
            let Ok(field) = name.parse::<RecordField>() else {
                continue;
            };
            let text = match value {
                serde_json::Value::Null => continue,
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            };
            record.set(field, text.replace('\n', " "))?;
        }
        Ok(record)
    }
}

impl From<UnitRecord> for BTreeMap<String, String> {
    fn from(record: UnitRecord) -> Self {
        RecordField::all()
            .into_iter()
            .map(|field| (field.to_string(), record.get(field).to_string()))
            .collect()
    }
}

// ============================================================================
// Output table
// ============================================================================

/// Append-only table with one row per processed unit of work
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutputTable {
    rows: Vec<OutputRow>,
}

/// A unit record plus how it was produced
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputRow {
    pub status: UnitStatus,
    pub attempts: u32,
    pub record: UnitRecord,
}

impl OutputTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, row: OutputRow) {
        self.rows.push(row);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> &[OutputRow] {
        &self.rows
    }

    /// Records only, in insertion order
    pub fn records(&self) -> Vec<UnitRecord> {
        self.rows.iter().map(|r| r.record.clone()).collect()
    }

    pub fn count_status(&self, status: UnitStatus) -> usize {
        self.rows.iter().filter(|r| r.status == status).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_names_round_trip() {
        for field in RecordField::all() {
            let parsed: RecordField = field.to_string().parse().unwrap();
            assert_eq!(parsed, field);
        }
    }

    #[test]
    fn test_out_of_range_slots_rejected() {
        assert!("storyIdRank4".parse::<RecordField>().is_err());
        assert!("storyIdRank1_rec6".parse::<RecordField>().is_err());
        assert!("lifeStyleIdRank0".parse::<RecordField>().is_err());
        assert!("storyIdRank1_subtitle".parse::<RecordField>().is_err());
    }

    #[test]
    fn test_sentinel_record_keeps_identity_only() {
        let record = UnitRecord::sentinel(&Identity::new("a@example.com", "DE"));
        for field in RecordField::all() {
            let value = record.get(field);
            match field {
                RecordField::Account => assert_eq!(value, "a@example.com"),
                RecordField::CountryCode => assert_eq!(value, "DE"),
                _ => assert_eq!(value, SENTINEL, "{} should be the sentinel", field),
            }
        }
    }

    #[test]
    fn test_flat_map_deserialization() {
        let yaml = r#"
Account: user1@example.com
country_code: FR
storyIdRank2: "12-3"
storyIdRank1_rec2: Galaxy Buds
main_headline: "Hi\nthere"
Unrelated column: ignored
"#;
        let record: UnitRecord = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(record.account, "user1@example.com");
        assert_eq!(record.get(RecordField::StoryId(2)), "12-3");
        assert_eq!(record.get(RecordField::StoryRec(1, 2)), "Galaxy Buds");
        assert_eq!(record.main_headline, "Hi there");
        assert_eq!(record.get(RecordField::StoryId(1)), SENTINEL);
    }

    #[test]
    fn test_recommendation_audit_lists_every_rec_column() {
        let mut record = UnitRecord::default();
        record.set(RecordField::StoryRec(1, 1), "TV").unwrap();
        let audit = record.recommendation_audit();
        assert!(audit.starts_with("storyIdRank1_rec1: TV\n"));
        assert_eq!(audit.lines().count(), 15);
    }
}
