//! Playwright-backed browser sessions
//!
//! Each session is a `node` process running a small driver script. Commands
//! go in as JSON lines on stdin; replies and response events come back as JSON
//! lines on stdout.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command as TokioCommand};
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use smartcheck_common::config::BrowserConfig;

use crate::error::{E2eError, E2eResult};
use crate::orchestrator::ResourceScope;
use crate::script::LoginStep;
use crate::session::{BrowserDriver, BrowserSession, ResponseEvent, UnitOfWork};

/// Capacity of the per-session response broadcast
const EVENT_CAPACITY: usize = 256;

/// How long `close` may take before the process is killed
const CLOSE_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Browser {
    #[default]
    Chromium,
    Firefox,
    Webkit,
}

impl Browser {
    fn as_str(&self) -> &'static str {
        match self {
            Browser::Chromium => "chromium",
            Browser::Firefox => "firefox",
            Browser::Webkit => "webkit",
        }
    }

    fn parse(engine: &str) -> Self {
        match engine.to_ascii_lowercase().as_str() {
            "firefox" => Browser::Firefox,
            "webkit" => Browser::Webkit,
            "chromium" => Browser::Chromium,
            other => {
                warn!(engine = other, "Unknown browser engine; using chromium");
                Browser::Chromium
            }
        }
    }
}

/// Driver request, one JSON line each
#[derive(Debug, Serialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
enum Request<'a> {
    Step { step: &'a LoginStep },
    Texts { selector: &'a str },
    Attribute { selector: &'a str, name: &'a str },
    Wait { selector: &'a str, timeout_ms: u64 },
    Close,
}

/// Driver output line
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum DriverMessage {
    Response {
        url: String,
        status: u16,
        #[serde(default)]
        body: Value,
    },
    Reply {
        id: u64,
        ok: bool,
        #[serde(default)]
        result: Value,
        #[serde(default)]
        error: Option<String>,
    },
}

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Value, String>>>>>;

/// Launches one Playwright browser per session
#[derive(Debug, Clone)]
pub struct PlaywrightDriver {
    config: BrowserConfig,
    browser: Browser,
}

impl PlaywrightDriver {
    /// Create a driver; fails when node cannot load Playwright
    pub async fn new(config: BrowserConfig) -> E2eResult<Self> {
        Self::check_playwright_installed(&config).await?;
        let browser = Browser::parse(&config.engine);
        Ok(Self { config, browser })
    }

    /// Check if Playwright is installed
    async fn check_playwright_installed(config: &BrowserConfig) -> E2eResult<()> {
        let status = TokioCommand::new(&config.node_binary)
            .args(["-e", "require.resolve('playwright')"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;

        match status {
            Ok(status) if status.success() => Ok(()),
            _ => Err(E2eError::PlaywrightNotFound),
        }
    }

    /// Build the driver script
    pub fn build_script(&self) -> String {
        let launch = json!({ "headless": self.config.headless });
        let context = match &self.config.user_agent {
            Some(ua) => json!({ "userAgent": ua }),
            None => json!({}),
        };

        let mut script = format!(
            r#"
const {{ chromium, firefox, webkit }} = require('playwright');
const readline = require('readline');

const ENGINE = {browser};
const LAUNCH = {launch};
const CONTEXT = {context};
"#,
            browser = self.browser.as_str(),
            launch = launch,
            context = context,
        );
        script.push_str(DRIVER_BODY);
        script
    }
}

#[async_trait]
impl BrowserDriver for PlaywrightDriver {
    async fn open(&self, unit: &UnitOfWork, scope: &ResourceScope) -> E2eResult<Arc<dyn BrowserSession>> {
        let workdir = tempfile::tempdir()?;
        let script_path = workdir.path().join("driver.js");
        std::fs::write(&script_path, self.build_script())?;

        debug!(unit = %unit.id, script = %script_path.display(), "Launching Playwright driver");

        let mut child = TokioCommand::new(&self.config.node_binary)
            .arg(&script_path)
            .current_dir(workdir.path())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| E2eError::Playwright("driver stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| E2eError::Playwright("driver stdout unavailable".to_string()))?;

        let session = Arc::new(PlaywrightSession::start(child, stdin, stdout, workdir));
        let closing = Arc::clone(&session);
        scope.defer("browser", async move { closing.shutdown().await });

        info!(identity = %unit.identity, attempt = unit.attempt, "Browser session opened");
        Ok(session as Arc<dyn BrowserSession>)
    }
}

/// One running driver process
pub struct PlaywrightSession {
    stdin: tokio::sync::Mutex<ChildStdin>,
    child: tokio::sync::Mutex<Child>,
    pending: Pending,
    next_id: AtomicU64,
    events: broadcast::Sender<ResponseEvent>,
    reader: Mutex<Option<JoinHandle<()>>>,
    _workdir: tempfile::TempDir,
}

impl PlaywrightSession {
    fn start(child: Child, stdin: ChildStdin, stdout: ChildStdout, workdir: tempfile::TempDir) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let pending: Pending = Arc::default();
        let reader = tokio::spawn(read_driver_output(stdout, Arc::clone(&pending), events.clone()));

        Self {
            stdin: tokio::sync::Mutex::new(stdin),
            child: tokio::sync::Mutex::new(child),
            pending,
            next_id: AtomicU64::new(1),
            events,
            reader: Mutex::new(Some(reader)),
            _workdir: workdir,
        }
    }

    async fn request(&self, request: &Request<'_>) -> E2eResult<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut line = serde_json::to_value(request)?;
        line["id"] = json!(id);
        let mut line = serde_json::to_string(&line)?;
        line.push('\n');

        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);

        {
            let mut stdin = self.stdin.lock().await;
            stdin.write_all(line.as_bytes()).await?;
            stdin.flush().await?;
        }

        match rx.await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(message)) => Err(E2eError::Playwright(message)),
            Err(_) => Err(E2eError::Session("driver exited before replying".to_string())),
        }
    }

    /// Close the browser and reap the process
    async fn shutdown(&self) -> E2eResult<()> {
        match tokio::time::timeout(CLOSE_GRACE, self.request(&Request::Close)).await {
            Ok(Ok(_)) => debug!("Browser closed"),
            Ok(Err(e)) => debug!(error = %e, "Close request failed; killing driver"),
            Err(_) => warn!("Browser close timed out; killing driver"),
        }

        let mut child = self.child.lock().await;
        if child.try_wait()?.is_none() {
            child.kill().await?;
        }
        if let Some(reader) = self.reader.lock().take() {
            reader.abort();
        }
        Ok(())
    }
}

async fn read_driver_output(stdout: ChildStdout, pending: Pending, events: broadcast::Sender<ResponseEvent>) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "Failed to read driver output");
                break;
            }
        };
        match serde_json::from_str::<DriverMessage>(&line) {
            Ok(DriverMessage::Response { url, status, body }) => {
                // no subscribers is fine
                let _ = events.send(ResponseEvent::new(url, status, body));
            }
            Ok(DriverMessage::Reply { id, ok, result, error }) => {
                if let Some(tx) = pending.lock().remove(&id) {
                    let reply = if ok {
                        Ok(result)
                    } else {
                        Err(error.unwrap_or_else(|| "unknown driver error".to_string()))
                    };
                    let _ = tx.send(reply);
                }
            }
            Err(_) => debug!(%line, "Driver output"),
        }
    }
    // dropping the senders fails every outstanding request
    pending.lock().clear();
}

#[async_trait]
impl BrowserSession for PlaywrightSession {
    fn responses(&self) -> broadcast::Receiver<ResponseEvent> {
        self.events.subscribe()
    }

    async fn run_step(&self, step: &LoginStep) -> E2eResult<()> {
        if let LoginStep::Log { message } = step {
            info!("[LOGIN] {}", message);
            return Ok(());
        }
        debug!(step = %step.name(), "Executing step");
        self.request(&Request::Step { step })
            .await
            .map(|_| ())
            .map_err(|e| E2eError::StepFailed {
                step: step.name(),
                reason: e.to_string(),
            })
    }

    async fn query_texts(&self, selector: &str) -> E2eResult<Vec<String>> {
        let value = self.request(&Request::Texts { selector }).await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn query_attribute(&self, selector: &str, name: &str) -> E2eResult<Option<String>> {
        let value = self.request(&Request::Attribute { selector, name }).await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn wait_for_content(&self, selector: &str, deadline: Duration) -> E2eResult<bool> {
        let timeout_ms = u64::try_from(deadline.as_millis()).unwrap_or(u64::MAX);
        let value = self.request(&Request::Wait { selector, timeout_ms }).await?;
        Ok(value.as_bool().unwrap_or(false))
    }
}

const DRIVER_BODY: &str = r#"
const emit = (msg) => process.stdout.write(JSON.stringify(msg) + '\n');

async function runStep(page, step) {
  switch (step.action) {
    case 'navigate':
      await page.goto(step.url);
      if (step.wait_for_selector) await page.waitForSelector(step.wait_for_selector);
      return null;
    case 'click':
      await page.click(step.selector, { timeout: step.timeout_ms ?? 5000 });
      return null;
    case 'fill':
      await page.fill(step.selector, step.value);
      return null;
    case 'press':
      if (step.selector) await page.locator(step.selector).press(step.key);
      else await page.keyboard.press(step.key);
      return null;
    case 'wait':
      await page.waitForSelector(step.selector, { state: 'visible', timeout: step.timeout_ms });
      return null;
    case 'sleep':
      await page.waitForTimeout(step.ms);
      return null;
    case 'dismiss': {
      try {
        await page.waitForSelector(step.selector, { timeout: step.timeout_ms });
      } catch (_) {
        return null;
      }
      const buttons = page.locator(step.selector);
      const count = await buttons.count();
      for (let i = 0; i < count; i++) {
        const button = buttons.nth(i);
        if (await button.isVisible()) await button.click();
      }
      return null;
    }
    default:
      throw new Error('unsupported step: ' + step.action);
  }
}

async function handle(page, browser, req) {
  switch (req.cmd) {
    case 'step':
      return runStep(page, req.step);
    case 'texts':
      return page.locator(req.selector).allInnerTexts();
    case 'attribute': {
      const loc = page.locator(req.selector);
      if ((await loc.count()) === 0) return null;
      return loc.first().getAttribute(req.name);
    }
    case 'wait':
      try {
        await page.waitForSelector(req.selector, { state: 'attached', timeout: req.timeout_ms });
        return true;
      } catch (_) {
        return false;
      }
    case 'close':
      await browser.close();
      return null;
    default:
      throw new Error('unsupported command: ' + req.cmd);
  }
}

(async () => {
  const browser = await ENGINE.launch(LAUNCH);
  const context = await browser.newContext(CONTEXT);
  const page = await context.newPage();

  context.on('response', async (res) => {
    let body = null;
    try {
      body = await res.json();
    } catch (_) {}
    emit({ type: 'response', url: res.url(), status: res.status(), body });
  });

  const rl = readline.createInterface({ input: process.stdin });
  for await (const line of rl) {
    let req;
    try {
      req = JSON.parse(line);
    } catch (_) {
      continue;
    }
    try {
      const result = await handle(page, browser, req);
      emit({ type: 'reply', id: req.id, ok: true, result: result ?? null });
      if (req.cmd === 'close') process.exit(0);
    } catch (error) {
      emit({ type: 'reply', id: req.id, ok: false, error: error.message });
    }
  }
  await browser.close();
})();
"#;

#[cfg(test)]
mod tests {
    use super::*;

    fn driver(config: BrowserConfig) -> PlaywrightDriver {
        let browser = Browser::parse(&config.engine);
        PlaywrightDriver { config, browser }
    }

    #[test]
    fn test_script_header_reflects_config() {
        let script = driver(BrowserConfig {
            engine: "firefox".to_string(),
            headless: false,
            user_agent: Some("smartcheck/1.0".to_string()),
            ..Default::default()
        })
        .build_script();

        assert!(script.contains("const ENGINE = firefox;"));
        assert!(script.contains(r#"const LAUNCH = {"headless":false};"#));
        assert!(script.contains(r#""userAgent":"smartcheck/1.0""#));
        assert!(script.contains("context.on('response'"));
    }

    #[test]
    fn test_unknown_engine_falls_back_to_chromium() {
        assert_eq!(Browser::parse("netscape"), Browser::Chromium);
        assert_eq!(Browser::parse("WebKit"), Browser::Webkit);
    }

    #[test]
    fn test_request_wire_format() {
        let step = LoginStep::Sleep { ms: 10 };
        let line = serde_json::to_value(Request::Step { step: &step }).unwrap();
        assert_eq!(line, json!({ "cmd": "step", "step": { "action": "sleep", "ms": 10 } }));

        let line = serde_json::to_value(Request::Attribute { selector: "a", name: "href" }).unwrap();
        assert_eq!(line, json!({ "cmd": "attribute", "selector": "a", "name": "href" }));
    }

    #[test]
    fn test_driver_messages_parse() {
        let msg: DriverMessage = serde_json::from_str(
            r#"{"type":"response","url":"https://x/api","status":204,"body":null}"#,
        )
        .unwrap();
        assert!(matches!(msg, DriverMessage::Response { status: 204, .. }));

        let msg: DriverMessage =
            serde_json::from_str(r#"{"type":"reply","id":3,"ok":false,"error":"boom"}"#).unwrap();
        assert!(matches!(msg, DriverMessage::Reply { id: 3, ok: false, .. }));
    }
}
