//! Retry loop with scoped resource teardown
//!
//! Every attempt gets a fresh [`ResourceScope`]. Whatever the attempt opens
//! (browser, context, page, background tasks) registers a teardown there, and
//! the scope is drained in reverse order once the attempt ends, however it
//! ends. When all attempts fail the unit still yields a record: the sentinel
//! row carrying only the identity.

use futures::FutureExt;
use parking_lot::Mutex;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use smartcheck_common::config::RetryConfig;
use smartcheck_common::{Identity, UnitRecord, UnitStatus};

use crate::error::{E2eError, E2eResult};

type Teardown = Pin<Box<dyn Future<Output = E2eResult<()>> + Send>>;

/// Teardown actions registered during one attempt
#[derive(Clone, Default)]
pub struct ResourceScope {
    actions: Arc<Mutex<Vec<(String, Teardown)>>>,
}

impl std::fmt::Debug for ResourceScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<String> = self.actions.lock().iter().map(|(n, _)| n.clone()).collect();
        f.debug_struct("ResourceScope").field("pending", &names).finish()
    }
}

/// What happened while draining a scope
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReleaseReport {
    pub released: Vec<String>,
    /// `(resource, error)` for teardowns that failed or panicked
    pub failures: Vec<(String, String)>,
}

impl ResourceScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a teardown for a just-acquired resource
    pub fn defer<F>(&self, name: impl Into<String>, teardown: F)
    where
        F: Future<Output = E2eResult<()>> + Send + 'static,
    {
        self.actions.lock().push((name.into(), Box::pin(teardown)));
    }

    pub fn pending(&self) -> usize {
        self.actions.lock().len()
    }

    /// Run every registered teardown once, newest first
    ///
    /// A failing or panicking teardown is recorded and the rest still run.
    pub async fn release_all(&self) -> ReleaseReport {
        let actions = std::mem::take(&mut *self.actions.lock());
        let mut report = ReleaseReport::default();

        for (name, teardown) in actions.into_iter().rev() {
            match AssertUnwindSafe(teardown).catch_unwind().await {
                Ok(Ok(())) => report.released.push(name),
                Ok(Err(e)) => {
                    warn!(resource = %name, error = %e, "Release failed");
                    report.failures.push((name, e.to_string()));
                }
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    warn!(resource = %name, %message, "Release panicked");
                    report.failures.push((name, message));
                }
            }
        }
        report
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Attempt ceiling and pause between attempts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
    /// Upper bound on a single attempt, if any
    pub attempt_timeout: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            backoff: config.backoff(),
            attempt_timeout: None,
        }
    }
}

/// Handed to the attempt body
#[derive(Debug, Clone)]
pub struct AttemptContext {
    /// 1-based
    pub attempt: u32,
    pub scope: ResourceScope,
}

/// Terminal result for one unit of work
#[derive(Debug, Clone)]
pub struct UnitOutcome {
    pub record: UnitRecord,
    pub status: UnitStatus,
    pub attempts: u32,
    /// One entry per failed attempt
    pub failures: Vec<String>,
    pub duration: Duration,
}

/// Runs a unit of work under a [`RetryPolicy`]
#[derive(Debug, Clone, Default)]
pub struct RetryOrchestrator {
    policy: RetryPolicy,
}

impl RetryOrchestrator {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Call `body` until it succeeds or the attempt ceiling is reached
    ///
    /// Any error, panic or attempt timeout counts as a failure. The attempt's
    /// scope is always drained before the next step.
    pub async fn run<F, Fut>(&self, identity: &Identity, mut body: F) -> UnitOutcome
    where
        F: FnMut(AttemptContext) -> Fut,
        Fut: Future<Output = E2eResult<UnitRecord>>,
    {
        let start = Instant::now();
        let max_attempts = self.policy.max_attempts.max(1);
        let mut failures = Vec::new();

        for attempt in 1..=max_attempts {
            let scope = ResourceScope::new();
            let ctx = AttemptContext {
                attempt,
                scope: scope.clone(),
            };

            let guarded = AssertUnwindSafe(body(ctx)).catch_unwind();
            let result = match self.policy.attempt_timeout {
                Some(limit) => match tokio::time::timeout(limit, guarded).await {
                    Ok(result) => result,
                    Err(_) => Ok(Err(E2eError::Timeout(format!("attempt {}", attempt)))),
                },
                None => guarded.await,
            };

            let release = scope.release_all().await;
            if !release.failures.is_empty() {
                warn!(%identity, attempt, failures = ?release.failures, "Some resources failed to release");
            }

            let failure = match result {
                Ok(Ok(record)) => {
                    info!(%identity, attempt, "Unit succeeded");
                    return UnitOutcome {
                        record,
                        status: UnitStatus::Succeeded,
                        attempts: attempt,
                        failures,
                        duration: start.elapsed(),
                    };
                }
                Ok(Err(e)) => e.to_string(),
                Err(panic) => E2eError::Panicked(panic_message(panic.as_ref())).to_string(),
            };

            warn!(%identity, attempt, max_attempts, error = %failure, "Attempt failed");
            failures.push(failure);

            if attempt < max_attempts {
                tokio::time::sleep(self.policy.backoff).await;
            }
        }

        error!(%identity, attempts = max_attempts, "All attempts failed; emitting sentinel record");
        UnitOutcome {
            record: UnitRecord::sentinel(identity),
            status: UnitStatus::SentinelFailed,
            attempts: max_attempts,
            failures,
            duration: start.elapsed(),
        }
    }
}
