//! Table loading
//!
//! Input tables are YAML or JSON, chosen by file extension.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use tracing::info;

use crate::config::ExpectedDefaults;
use crate::error::{Error, Result};
use crate::types::{is_sentinel, UnitRecord};

/// Supported table encodings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableFormat {
    Yaml,
    Json,
}

impl TableFormat {
    pub fn from_path(path: &Path) -> Result<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Ok(TableFormat::Yaml),
            Some("json") => Ok(TableFormat::Json),
            other => Err(Error::UnsupportedFormat(
                other.unwrap_or("<none>").to_string(),
            )),
        }
    }
}

/// Load any table
pub fn load<T: DeserializeOwned>(path: &Path) -> Result<T> {
    if !path.exists() {
        return Err(Error::NotFound {
            kind: "table".to_string(),
            id: path.display().to_string(),
        });
    }
    let content = std::fs::read_to_string(path)?;
    let table = match TableFormat::from_path(path)? {
        TableFormat::Yaml => serde_yaml::from_str(&content)?,
        TableFormat::Json => serde_json::from_str(&content)?,
    };
    Ok(table)
}

/// Load a table when a path is configured
pub fn load_optional<T: DeserializeOwned + Default>(path: Option<&Path>) -> Result<T> {
    path.map_or_else(|| Ok(T::default()), load)
}

/// Write a table, format chosen by extension
pub fn save<T: Serialize>(path: &Path, table: &T) -> Result<()> {
    let content = match TableFormat::from_path(path)? {
        TableFormat::Yaml => serde_yaml::to_string(table)?,
        TableFormat::Json => serde_json::to_string_pretty(table)?,
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, content)?;
    Ok(())
}

/// Load the expected table and fill blank banner columns
pub fn load_expected(path: &Path, defaults: &ExpectedDefaults) -> Result<Vec<UnitRecord>> {
    let mut rows: Vec<UnitRecord> = load(path)?;
    for row in &mut rows {
        apply_banner_defaults(row, defaults);
    }
    info!(rows = rows.len(), path = %path.display(), "Loaded expected table");
    Ok(rows)
}

fn apply_banner_defaults(row: &mut UnitRecord, defaults: &ExpectedDefaults) {
    let fill = |slot: &mut String, value: &str| {
        if is_sentinel(slot) {
            *slot = value.to_string();
        }
    };
    fill(&mut row.banner_text, &defaults.banner_text);
    fill(&mut row.banner_link_text, &defaults.banner_link_text);
    fill(&mut row.banner_hyperlink, &defaults.banner_hyperlink);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::FilterTable;
    use crate::types::RecordField;
    use tempfile::TempDir;

    #[test]
    fn test_format_by_extension() {
        assert_eq!(TableFormat::from_path(Path::new("a.yml")).unwrap(), TableFormat::Yaml);
        assert_eq!(TableFormat::from_path(Path::new("a.json")).unwrap(), TableFormat::Json);
        assert!(TableFormat::from_path(Path::new("a.xlsx")).is_err());
        assert!(TableFormat::from_path(Path::new("noext")).is_err());
    }

    #[test]
    fn test_expected_table_gets_banner_defaults() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("expected.yaml");
        std::fs::write(
            &path,
            "- Account: a@example.com\n  country_code: DE\n  banner_text: Custom\n",
        )
        .unwrap();

        let defaults = ExpectedDefaults::default();
        let rows = load_expected(&path, &defaults).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].banner_text, "Custom");
        assert_eq!(rows[0].banner_link_text, defaults.banner_link_text);
        assert_eq!(rows[0].get(RecordField::StoryId(1)), "none");
    }

    #[test]
    fn test_expected_json_with_null_and_numeric_cells() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("expected.json");
        std::fs::write(
            &path,
            r#"[{"Account":"a","country_code":"uk","Device1":null,"lifeStyleIdRank1":7,"storyIdRank1":"S-1"}]"#,
        )
        .unwrap();

        let rows = load_expected(&path, &ExpectedDefaults::default()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].account, "a");
        assert_eq!(rows[0].get(RecordField::Device1), "none");
        assert_eq!(rows[0].get(RecordField::LifestyleId(1)), "7");
        assert_eq!(rows[0].get(RecordField::StoryId(1)), "S-1");
    }

    #[test]
    fn test_json_save_and_load() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("out/filter.json");
        let mut filter = FilterTable::new();
        filter.allow("a", RecordField::MainHeadline);

        save(&path, &filter).unwrap();
        let loaded: FilterTable = load(&path).unwrap();
        assert_eq!(loaded, filter);
    }

    #[test]
    fn test_missing_and_optional_tables() {
        let tmp = TempDir::new().unwrap();
        let missing = tmp.path().join("missing.yaml");
        assert!(matches!(
            load::<FilterTable>(&missing),
            Err(Error::NotFound { .. })
        ));
        let empty: FilterTable = load_optional(None).unwrap();
        assert!(empty.is_empty());
    }
}
