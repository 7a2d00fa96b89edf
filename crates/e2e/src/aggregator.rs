//! Fan-in of asynchronous API responses
//!
//! Each registered source key owns a single-assignment slot backed by a
//! `watch` channel. The first matching response fills the slot; later ones
//! are ignored. [`ResponseAggregator::wait`] suspends on every slot at once
//! and gives up at the deadline, leaving whatever was captured readable.

use futures::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use smartcheck_common::config::SourceConfig;

use crate::error::{E2eError, E2eResult};
use crate::session::ResponseEvent;

/// Source key plus the URL prefix its responses start with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureRule {
    pub key: String,
    pub url_prefix: String,
}

impl CaptureRule {
    pub fn new(key: impl Into<String>, url_prefix: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            url_prefix: url_prefix.into(),
        }
    }

    /// Rules for every configured source, resolved for one locale
    pub fn from_sources(sources: &[SourceConfig], base_url: &str, country_code: &str) -> Vec<Self> {
        sources
            .iter()
            .map(|s| Self::new(&s.key, s.resolve(base_url, country_code)))
            .collect()
    }

    pub fn accepts(&self, event: &ResponseEvent) -> bool {
        event.url.starts_with(&self.url_prefix)
    }
}

/// Result of [`ResponseAggregator::wait`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome {
    Complete,
    TimedOut { missing: Vec<String> },
}

struct Slot {
    rule: CaptureRule,
    tx: watch::Sender<Option<Arc<ResponseEvent>>>,
}

/// Single-assignment response slots keyed by source
pub struct ResponseAggregator {
    slots: Vec<Slot>,
}

impl std::fmt::Debug for ResponseAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseAggregator")
            .field("keys", &self.keys())
            .field("missing", &self.missing())
            .finish()
    }
}

impl ResponseAggregator {
    /// Create one empty slot per rule
    pub fn register(rules: Vec<CaptureRule>) -> E2eResult<Self> {
        let mut seen = HashSet::new();
        let mut slots = Vec::with_capacity(rules.len());
        for rule in rules {
            if !seen.insert(rule.key.clone()) {
                return Err(E2eError::DuplicateSource(rule.key));
            }
            let (tx, _rx) = watch::channel(None);
            slots.push(Slot { rule, tx });
        }
        Ok(Self { slots })
    }

    /// Offer an event to every empty slot; returns the keys it filled
    pub fn on_response(&self, event: ResponseEvent) -> Vec<String> {
        let event = Arc::new(event);
        let mut captured = Vec::new();
        for slot in self.slots.iter().filter(|s| s.rule.accepts(&event)) {
            let filled = slot.tx.send_if_modified(|value| {
                if value.is_some() {
                    return false;
                }
                *value = Some(Arc::clone(&event));
                true
            });
            if filled {
                debug!(key = %slot.rule.key, url = %event.url, status = event.status, "Captured response");
                captured.push(slot.rule.key.clone());
            }
        }
        captured
    }

    /// Wait for every slot or the deadline, whichever comes first
    pub async fn wait(&self, deadline: Duration) -> WaitOutcome {
        let mut receivers: Vec<_> = self.slots.iter().map(|s| s.tx.subscribe()).collect();
        let waits = receivers.iter_mut().map(|rx| async move {
            // the sender lives in `self`, so this only ends once the slot is filled
            let _ = rx.wait_for(Option::is_some).await;
        });

        if tokio::time::timeout(deadline, join_all(waits)).await.is_ok() && self.is_complete() {
            return WaitOutcome::Complete;
        }
        WaitOutcome::TimedOut {
            missing: self.missing(),
        }
    }

    /// Feed a response stream into the slots until all are filled or the stream closes
    pub fn pump(self: &Arc<Self>, mut events: broadcast::Receiver<ResponseEvent>) -> JoinHandle<()> {
        let aggregator = Arc::clone(self);
        tokio::spawn(async move {
            while !aggregator.is_complete() {
                match events.recv().await {
                    Ok(event) => {
                        aggregator.on_response(event);
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Response stream lagged; some events were dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// Captured payload for a key
    pub fn get(&self, key: &str) -> Option<Arc<ResponseEvent>> {
        self.slots
            .iter()
            .find(|s| s.rule.key == key)
            .and_then(|s| s.tx.borrow().clone())
    }

    pub fn keys(&self) -> Vec<&str> {
        self.slots.iter().map(|s| s.rule.key.as_str()).collect()
    }

    /// Keys still waiting for a response, in registration order
    pub fn missing(&self) -> Vec<String> {
        self.slots
            .iter()
            .filter(|s| s.tx.borrow().is_none())
            .map(|s| s.rule.key.clone())
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.slots.iter().all(|s| s.tx.borrow().is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rules() -> Vec<CaptureRule> {
        vec![
            CaptureRule::new("main", "https://shop/api/main"),
            CaptureRule::new("meta", "https://shop/api/meta"),
            CaptureRule::new("user", "https://shop/api/user"),
        ]
    }

    fn event(path: &str, n: u64) -> ResponseEvent {
        ResponseEvent::new(format!("https://shop/api/{}?q=1", path), 200, json!({ "n": n }))
    }

    #[test]
    fn test_duplicate_key_rejected() {
        let mut rules = rules();
        rules.push(CaptureRule::new("main", "https://elsewhere"));
        assert!(matches!(
            ResponseAggregator::register(rules),
            Err(E2eError::DuplicateSource(key)) if key == "main"
        ));
    }

    #[test]
    fn test_first_capture_wins() {
        let aggregator = ResponseAggregator::register(rules()).unwrap();
        assert_eq!(aggregator.on_response(event("main", 1)), vec!["main"]);
        assert!(aggregator.on_response(event("main", 2)).is_empty());
        assert_eq!(aggregator.get("main").unwrap().body, json!({ "n": 1 }));
    }

    #[test]
    fn test_one_event_can_fill_several_keys() {
        let aggregator = ResponseAggregator::register(vec![
            CaptureRule::new("broad", "https://shop/api/"),
            CaptureRule::new("narrow", "https://shop/api/main"),
        ])
        .unwrap();
        assert_eq!(aggregator.on_response(event("main", 1)), vec!["broad", "narrow"]);
        assert!(aggregator.is_complete());
    }

    #[test]
    fn test_arrival_order_does_not_change_final_state() {
        let arrivals = [
            event("main", 1),
            event("meta", 2),
            event("user", 3),
            event("zzz", 4),
        ];
        let orders: [[usize; 4]; 4] = [[0, 1, 2, 3], [3, 2, 1, 0], [1, 3, 0, 2], [2, 0, 3, 1]];

        let snapshots: Vec<Vec<Option<serde_json::Value>>> = orders
            .iter()
            .map(|order| {
                let aggregator = ResponseAggregator::register(rules()).unwrap();
                for &i in order {
                    aggregator.on_response(arrivals[i].clone());
                }
                ["main", "meta", "user"]
                    .iter()
                    .map(|k| aggregator.get(k).map(|e| e.body.clone()))
                    .collect()
            })
            .collect();

        assert!(snapshots.windows(2).all(|w| w[0] == w[1]));
        assert!(snapshots[0].iter().all(Option::is_some));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_completes_when_all_arrive() {
        let aggregator = Arc::new(ResponseAggregator::register(rules()).unwrap());
        let (tx, rx) = broadcast::channel(16);
        let pump = aggregator.pump(rx);

        let feeder = tokio::spawn(async move {
            for (i, path) in ["user", "main", "meta"].iter().enumerate() {
                tokio::time::sleep(Duration::from_secs(1)).await;
                tx.send(event(path, i as u64)).unwrap();
            }
        });

        assert_eq!(aggregator.wait(Duration::from_secs(60)).await, WaitOutcome::Complete);
        feeder.await.unwrap();
        pump.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_timeout_keeps_captured_payloads() {
        let aggregator = ResponseAggregator::register(rules()).unwrap();
        aggregator.on_response(event("meta", 7));

        let start = tokio::time::Instant::now();
        let outcome = aggregator.wait(Duration::from_secs(60)).await;
        assert_eq!(start.elapsed(), Duration::from_secs(60));

        assert_eq!(
            outcome,
            WaitOutcome::TimedOut {
                missing: vec!["main".to_string(), "user".to_string()]
            }
        );
        assert_eq!(aggregator.get("meta").unwrap().body, json!({ "n": 7 }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pump_stops_when_stream_closes() {
        let aggregator = Arc::new(ResponseAggregator::register(rules()).unwrap());
        let (tx, rx) = broadcast::channel(4);
        let pump = aggregator.pump(rx);
        tx.send(event("main", 1)).unwrap();
        drop(tx);

        pump.await.unwrap();
        assert_eq!(aggregator.missing(), vec!["meta", "user"]);
    }
}
