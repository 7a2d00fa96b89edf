//! Batch runner: one unit of work per expected row, then ranking and diff

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use smartcheck_common::config::{expand, DiffConfig};
use smartcheck_common::ranking::recommend_batch;
use smartcheck_common::{
    tables, AccountProfile, ComparisonReport, ConsentMatrix, DiffEngine, FilterTable,
    HarnessConfig, Identity, MetadataTable, OutputRow, OutputTable, StoryCatalogue,
    StoryRecommendation, UnitRecord, UnitStatus,
};

use crate::aggregator::{CaptureRule, ResponseAggregator, WaitOutcome};
use crate::collector::Collector;
use crate::error::E2eResult;
use crate::orchestrator::{AttemptContext, RetryOrchestrator, RetryPolicy};
use crate::script::LoginScript;
use crate::session::{BrowserDriver, UnitOfWork};

/// Counts for one run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub total: usize,
    pub succeeded: usize,
    pub sentinel: usize,
    pub matched: usize,
    pub mismatched: usize,
    pub stories_needing_review: usize,
    pub duration_ms: u64,
}

/// Everything a run produces
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunReport {
    pub summary: RunSummary,
    pub table: OutputTable,
    pub stories: Vec<StoryRecommendation>,
    pub comparison: ComparisonReport,
}

/// Auxiliary tables used during a run
#[derive(Debug, Clone, Default)]
pub struct RunTables {
    pub filter: FilterTable,
    pub metadata: MetadataTable,
    pub consent: ConsentMatrix,
    pub catalogue: Option<StoryCatalogue>,
    pub profiles: Vec<AccountProfile>,
}

impl RunTables {
    /// Load every configured table
    pub fn load(config: &HarnessConfig) -> E2eResult<Self> {
        let paths = &config.paths;
        let catalogue = match &paths.stories {
            Some(path) => Some(tables::load(path)?),
            None => None,
        };
        Ok(Self {
            filter: tables::load_optional(paths.filter.as_deref())?,
            metadata: tables::load_optional(paths.metadata.as_deref())?,
            consent: tables::load_optional(paths.consent.as_deref())?,
            catalogue,
            profiles: tables::load_optional(paths.profiles.as_deref())?,
        })
    }
}

/// Processes a whole expected table
pub struct HarnessRunner {
    config: Arc<HarnessConfig>,
    driver: Arc<dyn BrowserDriver>,
    script: LoginScript,
    collector: Collector,
    orchestrator: RetryOrchestrator,
    filter: FilterTable,
    catalogue: Option<StoryCatalogue>,
    profiles: Vec<AccountProfile>,
}

impl HarnessRunner {
    pub fn new(
        config: Arc<HarnessConfig>,
        driver: Arc<dyn BrowserDriver>,
        script: LoginScript,
        tables: RunTables,
    ) -> Self {
        let orchestrator = RetryOrchestrator::new(RetryPolicy::from(&config.retry));
        let collector = Collector::new(Arc::clone(&config), tables.metadata, tables.consent);
        Self {
            config,
            driver,
            script,
            collector,
            orchestrator,
            filter: tables.filter,
            catalogue: tables.catalogue,
            profiles: tables.profiles,
        }
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Run every unit, then the story pass and the comparison
    pub async fn run(&self, expected: &[UnitRecord]) -> E2eResult<RunReport> {
        let started_at = Utc::now();
        let start = Instant::now();
        info!("Running {} unit(s)...", expected.len());

        let mut table = OutputTable::new();
        for row in expected {
            let output = self.run_unit(&row.identity()).await;
            table.push(output);
        }

        let stories = self.recommend_stories();

        let comparison = compare_tables(&self.config.diff, &self.filter, expected, &table.records());

        let counts = comparison.summary();
        let summary = RunSummary {
            started_at,
            total: table.len(),
            succeeded: table.count_status(UnitStatus::Succeeded),
            sentinel: table.count_status(UnitStatus::SentinelFailed),
            matched: counts.matched,
            mismatched: counts.mismatched,
            stories_needing_review: stories.iter().filter(|s| s.recommendation.needs_review()).count(),
            duration_ms: start.elapsed().as_millis() as u64,
        };

        info!(
            "Run finished: {} succeeded, {} sentinel, {} matched, {} mismatched ({} ms)",
            summary.succeeded, summary.sentinel, summary.matched, summary.mismatched, summary.duration_ms
        );

        Ok(RunReport {
            summary,
            table,
            stories,
            comparison,
        })
    }

    /// Process one account/locale pair under the retry policy
    pub async fn run_unit(&self, identity: &Identity) -> OutputRow {
        let outcome = self
            .orchestrator
            .run(identity, move |ctx| self.attempt(identity.clone(), ctx))
            .await;

        match outcome.status {
            UnitStatus::Succeeded => info!("✓ {} ({} ms)", identity, outcome.duration.as_millis()),
            UnitStatus::SentinelFailed => error!(
                "✗ {} - {}",
                identity,
                outcome.failures.last().map(String::as_str).unwrap_or("unknown error")
            ),
        }

        OutputRow {
            status: outcome.status,
            attempts: outcome.attempts,
            record: outcome.record,
        }
    }

    async fn attempt(&self, identity: Identity, ctx: AttemptContext) -> E2eResult<UnitRecord> {
        let config = &self.config;
        let entry_url = expand(&config.page.entry_url, &config.base_url, &identity.country_code);
        let unit = UnitOfWork::new(identity, ctx.attempt, entry_url);
        debug!(unit = %unit.id, identity = %unit.identity, attempt = ctx.attempt, "Starting attempt");

        let session = self.driver.open(&unit, &ctx.scope).await?;

        let rules = CaptureRule::from_sources(&config.sources, &config.base_url, &unit.identity.country_code);
        let aggregator = Arc::new(ResponseAggregator::register(rules)?);
        let pump = aggregator.pump(session.responses());
        ctx.scope.defer("response pump", async move {
            pump.abort();
            Ok(())
        });

        for step in self.script.render(&unit)? {
            session.run_step(&step).await?;
        }

        if let WaitOutcome::TimedOut { missing } = aggregator.wait(config.timeouts.response_wait()).await {
            warn!(identity = %unit.identity, ?missing, "Response wait timed out; continuing with partial data");
        }

        let ready = session
            .wait_for_content(&config.page.story_selector, config.timeouts.dom_ready())
            .await?;
        if !ready {
            warn!(identity = %unit.identity, "Page content not ready before deadline");
        }

        let collected = self.collector.collect(&unit, &aggregator, session.as_ref()).await?;
        Ok(collected.record)
    }

    fn recommend_stories(&self) -> Vec<StoryRecommendation> {
        match &self.catalogue {
            Some(catalogue) if !self.profiles.is_empty() => {
                let stories = recommend_batch(&self.profiles, catalogue, &self.config.ranking);
                info!("Story pass: {} recommendation(s)", stories.len());
                stories
            }
            _ => {
                debug!("No story catalogue or profiles configured; skipping story pass");
                Vec::new()
            }
        }
    }
}

/// Diff observed records against the expected table, filtered and with the
/// recommendation audit attached
pub fn compare_tables(
    config: &DiffConfig,
    filter: &FilterTable,
    expected: &[UnitRecord],
    actual: &[UnitRecord],
) -> ComparisonReport {
    let rows = DiffEngine::new(config).compare(expected, actual);
    ComparisonReport::build(rows, filter, &ComparisonReport::audits(actual))
}
