//! Harness configuration

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::diff::Normalization;
use crate::types::RecordField;

/// Harness configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Base URL of the storefront under test
    pub base_url: String,

    /// Monitored API sources
    pub sources: Vec<SourceConfig>,

    /// Bounded waits
    pub timeouts: TimeoutConfig,

    /// Retry policy per unit of work
    pub retry: RetryConfig,

    /// Page location and selectors
    pub page: PageConfig,

    /// Browser launch settings
    pub browser: BrowserConfig,

    /// Ranking rules
    pub ranking: RankingConfig,

    /// Comparison rules
    pub diff: DiffConfig,

    /// Values filled into expected rows that leave a column blank
    pub expected_defaults: ExpectedDefaults,

    /// Input and output locations
    pub paths: PathsConfig,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            base_url: "https://hshopfront.samsung.com".to_string(),
            sources: SourceConfig::defaults(),
            timeouts: TimeoutConfig::default(),
            retry: RetryConfig::default(),
            page: PageConfig::default(),
            browser: BrowserConfig::default(),
            ranking: RankingConfig::default(),
            diff: DiffConfig::default(),
            expected_defaults: ExpectedDefaults::default(),
            paths: PathsConfig::default(),
        }
    }
}

/// One monitored API source
///
/// `url_prefix` may contain `{base}` and `{country}` (lowercased) placeholders.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub key: String,
    pub url_prefix: String,
}

impl SourceConfig {
    fn new(key: &str, url_prefix: &str) -> Self {
        Self {
            key: key.to_string(),
            url_prefix: url_prefix.to_string(),
        }
    }

    /// The recommendation page's standard sources
    pub fn defaults() -> Vec<Self> {
        vec![
            Self::new(
                "main",
                "{base}/aemapi/v6/mysamsung/{country}/scv/user/recommend/st/story",
            ),
            Self::new("meta", "{base}/aemapi/v6/mysamsung/{country}/scv/product/meta"),
            Self::new("product", "{base}/aemapi/v6/mysamsung/{country}/scv/newproducts"),
            Self::new("consent", "https://account.samsung.com/api/v1/consent/required"),
            Self::new("user", "{base}/aemapi/v6/mysamsung/{country}/scv/user/profile"),
        ]
    }

    /// Expand placeholders for one locale
    pub fn resolve(&self, base_url: &str, country_code: &str) -> String {
        expand(&self.url_prefix, base_url, country_code)
    }
}

/// Expand `{base}` and `{country}` placeholders
pub fn expand(template: &str, base_url: &str, country_code: &str) -> String {
    template
        .replace("{base}", base_url.trim_end_matches('/'))
        .replace("{country}", &country_code.to_lowercase())
}

/// Bounded waits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Ceiling for the response fan-in wait
    pub response_wait_secs: u64,

    /// Ceiling for the DOM content-ready wait
    pub dom_ready_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            response_wait_secs: 60,
            dom_ready_secs: 80,
        }
    }
}

impl TimeoutConfig {
    pub fn response_wait(&self) -> Duration {
        Duration::from_secs(self.response_wait_secs)
    }

    pub fn dom_ready(&self) -> Duration {
        Duration::from_secs(self.dom_ready_secs)
    }
}

/// Retry policy per unit of work
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_ms: 2000,
        }
    }
}

impl RetryConfig {
    /// Pause between attempts
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}

/// Page location and DOM selectors
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PageConfig {
    /// Entry URL template (`{base}`, `{country}`)
    pub entry_url: String,

    /// Login script (YAML) run after navigation
    pub login_script: Option<PathBuf>,

    pub headline_selector: String,
    pub description_selector: String,

    /// One element per story slot, in rank order
    pub story_selector: String,
    pub story_title_selector: String,
    pub story_desc_selector: String,
    pub story_product_selector: String,

    pub banner_text_selector: String,
    pub banner_link_selector: String,

    /// Text that marks an unbound template in the headline
    pub unbound_marker: String,

    /// `main_description1` when the account has product metadata
    pub device_description: String,

    /// `main_description1` when it has none
    pub no_device_description: String,
}

impl Default for PageConfig {
    fn default() -> Self {
        Self {
            entry_url: "{base}/{country}/mypage/mysmartthings".to_string(),
            login_script: None,
            headline_selector: "h2.myd26-my-story-st__wrapper-headline".to_string(),
            description_selector: "p.myd26-my-story-st__wrapper-description".to_string(),
            story_selector: "div.myd26-my-story-st".to_string(),
            story_title_selector: "h3.myd26-my-story-st__headline".to_string(),
            story_desc_selector: "p.myd26-my-story-st__description".to_string(),
            story_product_selector: "p.myd26-my-story-st__product-name".to_string(),
            banner_text_selector: "p.myd26-my-story-st__marketing-description".to_string(),
            banner_link_selector: "a.cta.cta--underline.cta--black".to_string(),
            unbound_marker: "{{".to_string(),
            device_description: "Looks like you own {Device 1, Device 2} and are interested in \
                                 {Scenario keyword 1, Scenario keyword 2}?"
                .to_string(),
            no_device_description: "No devices yet? interested in {lifestyle1, lifestyle2}?".to_string(),
        }
    }
}

/// Browser launch settings for the Playwright driver
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    /// chromium, firefox or webkit
    pub engine: String,
    pub headless: bool,
    pub user_agent: Option<String>,
    /// Node executable used to host the driver script
    pub node_binary: PathBuf,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            engine: "chromium".to_string(),
            headless: true,
            user_agent: None,
            node_binary: PathBuf::from("node"),
        }
    }
}

/// Ranking rules
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RankingConfig {
    /// Channel that qualifies a registered product for tier 1
    pub primary_channel: String,

    /// Registration status counted as registered
    pub registered_status: String,

    /// Pair returned when the account has neither keyword nor products
    pub canned_pair: [String; 2],

    /// Rank-1 sets that produce a recorded random pick
    pub random_combinations: Vec<Vec<String>>,

    /// Seed for the random pick; unseeded runs draw from entropy
    pub seed: Option<u64>,

    /// Attribute priority (lower value = higher priority)
    pub attribute_priority: BTreeMap<String, u32>,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            primary_channel: "SAMSUNG_ACCOUNT".to_string(),
            registered_status: "REGISTRATION".to_string(),
            canned_pair: ["38-2".to_string(), "38-1".to_string()],
            random_combinations: vec![vec![
                "35-1".to_string(),
                "35-3".to_string(),
                "42-3".to_string(),
                "35-2".to_string(),
            ]],
            seed: None,
            attribute_priority: BTreeMap::new(),
        }
    }
}

/// Comparison rules
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiffConfig {
    pub normalization: Normalization,

    /// Optional columns skipped when the observed value is the sentinel
    pub excluded_fields: Vec<RecordField>,

    /// Columns to compare; `None` uses the standard set
    pub fields: Option<Vec<RecordField>>,
}

impl Default for DiffConfig {
    fn default() -> Self {
        Self {
            normalization: Normalization::default(),
            excluded_fields: RecordField::banner_fields().to_vec(),
            fields: None,
        }
    }
}

impl DiffConfig {
    pub fn fields(&self) -> Vec<RecordField> {
        self.fields.clone().unwrap_or_else(RecordField::comparison_defaults)
    }
}

/// Defaults for banner columns of expected rows
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpectedDefaults {
    pub banner_text: String,
    pub banner_link_text: String,
    pub banner_hyperlink: String,
}

impl Default for ExpectedDefaults {
    fn default() -> Self {
        Self {
            banner_text: "General recommendations are shown by default. Opt in to required settings on the Privacy tab of your Samsung Account for a more personalized experience.".to_string(),
            banner_link_text: "Go to Samsung Account".to_string(),
            banner_hyperlink: "http://account.samsung.com/".to_string(),
        }
    }
}

/// Input and output locations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Expected table (one row per account/locale)
    pub expected: PathBuf,

    /// Account -> permitted fields
    pub filter: Option<PathBuf>,

    /// Model code -> display name, used when the meta source is silent
    pub metadata: Option<PathBuf>,

    /// Story catalogue for the recommendation pass
    pub stories: Option<PathBuf>,

    /// Account interest profiles for the recommendation pass
    pub profiles: Option<PathBuf>,

    /// Consent requirement matrix
    pub consent: Option<PathBuf>,

    /// Output directory for results
    pub output_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            expected: PathBuf::from("data/expected.yaml"),
            filter: None,
            metadata: None,
            stories: None,
            profiles: None,
            consent: None,
            output_dir: PathBuf::from("test-results"),
        }
    }
}

impl HarnessConfig {
    /// Load configuration from file, falling back to defaults when absent
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)?;
            config.validate()?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject settings the harness cannot run with
    pub fn validate(&self) -> crate::Result<()> {
        if self.retry.max_attempts == 0 {
            return Err(crate::Error::InvalidConfig(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        let mut keys: Vec<&str> = self.sources.iter().map(|s| s.key.as_str()).collect();
        keys.sort_unstable();
        if let Some(pair) = keys.windows(2).find(|w| w[0] == w[1]) {
            return Err(crate::Error::InvalidConfig(format!(
                "duplicate source key: {}",
                pair[0]
            )));
        }
        Ok(())
    }
}
