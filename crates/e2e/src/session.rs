//! Browser session seams
//!
//! The runner only talks to the browser through [`BrowserDriver`] and
//! [`BrowserSession`]. The Playwright implementation lives in
//! [`crate::playwright`]; tests use in-memory fakes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use uuid::Uuid;

use smartcheck_common::Identity;

use crate::error::E2eResult;
use crate::orchestrator::ResourceScope;
use crate::script::LoginStep;

/// One network response observed by the browser
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEvent {
    pub url: String,
    pub status: u16,
    /// Parsed JSON body; `Null` when absent or not JSON
    #[serde(default)]
    pub body: serde_json::Value,
}

impl ResponseEvent {
    pub fn new(url: impl Into<String>, status: u16, body: serde_json::Value) -> Self {
        Self {
            url: url.into(),
            status,
            body,
        }
    }
}

/// One attempt at processing an account/locale pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitOfWork {
    pub id: Uuid,
    pub identity: Identity,
    pub attempt: u32,
    /// Page the session starts on
    pub entry_url: String,
}

impl UnitOfWork {
    pub fn new(identity: Identity, attempt: u32, entry_url: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            identity,
            attempt,
            entry_url: entry_url.into(),
        }
    }
}

/// An open browser page
#[async_trait]
pub trait BrowserSession: Send + Sync {
    /// Subscribe to response events; only events after the call are seen
    fn responses(&self) -> broadcast::Receiver<ResponseEvent>;

    /// Run one login step
    async fn run_step(&self, step: &LoginStep) -> E2eResult<()>;

    /// Inner text of every element matching `selector`
    async fn query_texts(&self, selector: &str) -> E2eResult<Vec<String>>;

    /// Attribute of the first element matching `selector`
    async fn query_attribute(&self, selector: &str, name: &str) -> E2eResult<Option<String>>;

    /// Wait until `selector` is attached; `false` when the deadline passes
    async fn wait_for_content(&self, selector: &str, deadline: Duration) -> E2eResult<bool>;
}

/// Opens browser sessions
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    /// Open a session for `unit`
    ///
    /// Every resource acquired here must register its teardown on `scope`.
    async fn open(&self, unit: &UnitOfWork, scope: &ResourceScope) -> E2eResult<Arc<dyn BrowserSession>>;
}
