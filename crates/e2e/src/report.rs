//! Result files and console summary

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::info;

use smartcheck_common::{ComparisonReport, Recommendation, StoryRecommendation, UnitStatus, Verdict};

use crate::error::E2eResult;
use crate::runner::RunReport;

pub const OUTPUT_TABLE_FILE: &str = "output-table.json";
pub const STORIES_FILE: &str = "story-recommendations.json";
pub const COMPARISON_FILE: &str = "comparison-report.json";
pub const SUMMARY_FILE: &str = "run-summary.json";

/// Console output format
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
pub enum OutputFormat {
    /// Human-readable table format
    #[default]
    Table,
    /// JSON format
    Json,
    /// YAML format
    Yaml,
}

/// Write every result file into `dir`
pub fn write_outputs(dir: &Path, report: &RunReport) -> E2eResult<Vec<PathBuf>> {
    std::fs::create_dir_all(dir)?;
    let written = vec![
        write_json(dir, OUTPUT_TABLE_FILE, &report.table)?,
        write_json(dir, STORIES_FILE, &report.stories)?,
        write_json(dir, COMPARISON_FILE, &report.comparison)?,
        write_json(dir, SUMMARY_FILE, &report.summary)?,
    ];
    info!("Results written to: {}", dir.display());
    Ok(written)
}

fn write_json<T: Serialize>(dir: &Path, name: &str, value: &T) -> E2eResult<PathBuf> {
    let path = dir.join(name);
    let json = serde_json::to_string_pretty(value)?;
    std::fs::write(&path, json)?;
    Ok(path)
}

fn table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

/// Per-country counts plus units that fell back to the sentinel row
pub fn render_summary(report: &RunReport) -> String {
    let mut out = String::new();

    let mut countries = table();
    countries.set_header(vec!["Country", "Accounts", "Match", "Mismatch"]);
    for (country, rows) in report.comparison.by_country() {
        let accounts: std::collections::BTreeSet<&str> =
            rows.iter().map(|r| r.identity.account.as_str()).collect();
        let matched = rows.iter().filter(|r| r.verdict.is_match()).count();
        countries.add_row(vec![
            country.to_string(),
            accounts.len().to_string(),
            matched.to_string(),
            (rows.len() - matched).to_string(),
        ]);
    }
    out.push_str(&countries.to_string());
    out.push('\n');

    let failed: Vec<_> = report
        .table
        .rows()
        .iter()
        .filter(|r| r.status == UnitStatus::SentinelFailed)
        .collect();
    if !failed.is_empty() {
        let mut units = table();
        units.set_header(vec!["Account", "Country", "Status", "Attempts"]);
        for row in failed {
            units.add_row(vec![
                row.record.account.clone(),
                row.record.country_code.clone(),
                row.status.to_string(),
                row.attempts.to_string(),
            ]);
        }
        out.push_str(&units.to_string());
        out.push('\n');
    }

    let s = &report.summary;
    out.push_str(&format!(
        "Units: {} total, {} succeeded, {} sentinel | Fields: {} matched, {} mismatched | Stories needing review: {} | {} ms\n",
        s.total, s.succeeded, s.sentinel, s.matched, s.mismatched, s.stories_needing_review, s.duration_ms
    ));
    out
}

/// Mismatch details, one table row per mismatching field
pub fn render_mismatches(comparison: &ComparisonReport) -> Option<String> {
    let mut mismatches = comparison.mismatches().peekable();
    mismatches.peek()?;

    let mut details = table();
    details.set_header(vec!["Account", "Country", "Field", "Expected", "Actual"]);
    for row in mismatches {
        if let Verdict::Mismatch { expected, actual } = &row.verdict {
            details.add_row(vec![
                row.identity.account.clone(),
                row.identity.country_code.clone(),
                row.field.to_string(),
                expected.clone(),
                actual.clone(),
            ]);
        }
    }
    Some(details.to_string())
}

/// Story pass output in the requested format
pub fn render_stories(stories: &[StoryRecommendation], format: OutputFormat) -> E2eResult<String> {
    match format {
        OutputFormat::Json => Ok(serde_json::to_string_pretty(stories)?),
        OutputFormat::Yaml => Ok(serde_yaml::to_string(stories)?),
        OutputFormat::Table => {
            let mut out = table();
            out.set_header(vec!["Account", "Kind", "Stories", "Note"]);
            for story in stories {
                let (kind, note) = match &story.recommendation {
                    Recommendation::Canned { .. } => ("canned", String::new()),
                    Recommendation::Pair { .. } => ("pair", String::new()),
                    Recommendation::Single { .. } => ("single", String::new()),
                    Recommendation::RandomPick { options, .. } => {
                        ("random", format!("one of {}", options.join(", ")))
                    }
                    Recommendation::NeedsReview { rank1, rank2 } => (
                        "review",
                        format!("rank1 [{}] rank2 [{}]", rank1.join(", "), rank2.join(", ")),
                    ),
                };
                out.add_row(vec![
                    story.account.clone(),
                    kind.to_string(),
                    story.recommendation.story_ids().join(", "),
                    note,
                ]);
            }
            Ok(out.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::RunSummary;
    use smartcheck_common::{
        DiffEngine, FilterTable, Identity, OutputRow, OutputTable, RecordField, UnitRecord,
    };
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn report() -> RunReport {
        let mut expected = UnitRecord::sentinel(&Identity::new("a@example.com", "DE"));
        expected.main_headline = "Hi".to_string();
        let actual = UnitRecord::sentinel(&Identity::new("a@example.com", "DE"));

        let rows = DiffEngine::default().compare_fields(
            &[expected],
            &[actual.clone()],
            &[RecordField::MainHeadline, RecordField::StoryId(1)],
        );
        let comparison = ComparisonReport::build(rows, &FilterTable::new(), &HashMap::new());

        let mut table = OutputTable::new();
        table.push(OutputRow {
            status: UnitStatus::SentinelFailed,
            attempts: 3,
            record: actual,
        });

        RunReport {
            summary: RunSummary {
                total: 1,
                sentinel: 1,
                matched: 1,
                mismatched: 1,
                ..Default::default()
            },
            table,
            stories: Vec::new(),
            comparison,
        }
    }

    #[test]
    fn test_write_outputs() {
        let tmp = TempDir::new().unwrap();
        let written = write_outputs(&tmp.path().join("results"), &report()).unwrap();
        assert_eq!(written.len(), 4);

        let table: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&written[0]).unwrap()).unwrap();
        assert_eq!(table["rows"][0]["status"], "sentinel_failed");
        assert_eq!(table["rows"][0]["record"]["Account"], "a@example.com");
    }

    #[test]
    fn test_summary_lists_sentinel_units() {
        let text = render_summary(&report());
        assert!(text.contains("DE"));
        assert!(text.contains("sentinel_failed"));
        assert!(text.contains("1 matched, 1 mismatched"));
    }

    #[test]
    fn test_render_stories() {
        let stories = vec![
            StoryRecommendation {
                account: "a@example.com".to_string(),
                recommendation: Recommendation::Pair {
                    first: "35-1".to_string(),
                    second: "42-3".to_string(),
                },
            },
            StoryRecommendation {
                account: "b@example.com".to_string(),
                recommendation: Recommendation::NeedsReview {
                    rank1: vec!["35-1".to_string(), "35-2".to_string(), "35-3".to_string()],
                    rank2: Vec::new(),
                },
            },
        ];

        let text = render_stories(&stories, OutputFormat::Table).unwrap();
        assert!(text.contains("35-1, 42-3"));
        assert!(text.contains("review"));

        let json: serde_json::Value =
            serde_json::from_str(&render_stories(&stories, OutputFormat::Json).unwrap()).unwrap();
        assert_eq!(json[0]["recommendation"]["kind"], "pair");
        assert_eq!(json[1]["recommendation"]["kind"], "needs_review");
    }

    #[test]
    fn test_mismatch_details() {
        let text = render_mismatches(&report().comparison).unwrap();
        assert!(text.contains("main_headline"));
        assert!(render_mismatches(&ComparisonReport::default()).is_none());
    }
}
