//! smartcheck regression runner
//!
//! Drives a real browser through every account/locale pair of an expected
//! table, captures the backend responses the page makes while rendering,
//! reads what the page actually shows and compares the result field by field
//! against the expected table.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   HarnessRunner (batch)                     │
//! ├─────────────────────────────────────────────────────────────┤
//! │  for each expected row:                                     │
//! │    RetryOrchestrator::run(identity)                         │
//! │      ├── BrowserDriver::open() -> BrowserSession            │
//! │      ├── ResponseAggregator::register(sources)              │
//! │      │     └── pump(session.responses())                    │
//! │      ├── LoginScript::render() -> [LoginStep]               │
//! │      ├── aggregator.wait(response deadline)                 │
//! │      ├── Collector::collect() -> UnitRecord                 │
//! │      └── ResourceScope::release_all()                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  story pass:  recommend_batch(profiles, catalogue)          │
//! │  diff:        DiffEngine::compare -> ComparisonReport       │
//! │  report:      write_outputs / render_summary                │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod aggregator;
pub mod collector;
pub mod error;
pub mod orchestrator;
pub mod playwright;
pub mod report;
pub mod runner;
pub mod script;
pub mod session;

pub use aggregator::{CaptureRule, ResponseAggregator, WaitOutcome};
pub use collector::{Collected, Collector};
pub use error::{E2eError, E2eResult};
pub use orchestrator::{ResourceScope, RetryOrchestrator, RetryPolicy, UnitOutcome};
pub use playwright::PlaywrightDriver;
pub use runner::{compare_tables, HarnessRunner, RunReport, RunSummary, RunTables};
pub use script::{LoginScript, LoginStep};
pub use session::{BrowserDriver, BrowserSession, ResponseEvent, UnitOfWork};
