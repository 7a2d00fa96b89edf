//! Declarative login scripts
//!
//! A login script is a YAML list of browser steps run after the session is
//! open. String fields may use `{account}`, `{country}`, `{entry_url}` and
//! `{password}` placeholders; the password is read from the environment
//! variable named by `password_env`, never from the script itself.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{E2eError, E2eResult};
use crate::session::UnitOfWork;

/// A complete login script parsed from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginScript {
    /// Unique name for this script
    pub name: String,

    /// Environment variable holding the account password
    #[serde(default)]
    pub password_env: Option<String>,

    /// Steps to execute in order
    pub steps: Vec<LoginStep>,
}

/// A single browser step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum LoginStep {
    /// Navigate to an absolute URL
    Navigate {
        url: String,
        #[serde(default)]
        wait_for_selector: Option<String>,
    },

    /// Click an element
    Click {
        selector: String,
        #[serde(default)]
        timeout_ms: Option<u64>,
    },

    /// Fill an input field
    Fill { selector: String, value: String },

    /// Press a key
    Press {
        #[serde(default)]
        selector: Option<String>,
        key: String,
    },

    /// Wait for an element to appear
    Wait {
        selector: String,
        #[serde(default = "default_wait_timeout")]
        timeout_ms: u64,
    },

    /// Wait for a fixed amount of time (use sparingly)
    Sleep { ms: u64 },

    /// Click every visible match, if any appear within the timeout
    Dismiss {
        selector: String,
        #[serde(default = "default_dismiss_timeout")]
        timeout_ms: u64,
    },

    /// Log a message (for debugging)
    Log { message: String },
}

fn default_wait_timeout() -> u64 {
    5000
}

fn default_dismiss_timeout() -> u64 {
    10_000
}

impl LoginStep {
    /// Short label for logs
    pub fn name(&self) -> String {
        match self {
            LoginStep::Navigate { url, .. } => format!("navigate:{}", url),
            LoginStep::Click { selector, .. } => format!("click:{}", selector),
            LoginStep::Fill { selector, .. } => format!("fill:{}", selector),
            LoginStep::Press { key, .. } => format!("press:{}", key),
            LoginStep::Wait { selector, .. } => format!("wait:{}", selector),
            LoginStep::Sleep { ms } => format!("sleep:{}ms", ms),
            LoginStep::Dismiss { selector, .. } => format!("dismiss:{}", selector),
            LoginStep::Log { message } => {
                format!("log:{}", message.chars().take(30).collect::<String>())
            }
        }
    }

    fn map_strings(&self, f: &impl Fn(&str) -> String) -> Self {
        match self.clone() {
            LoginStep::Navigate { url, wait_for_selector } => LoginStep::Navigate {
                url: f(&url),
                wait_for_selector: wait_for_selector.as_deref().map(f),
            },
            LoginStep::Click { selector, timeout_ms } => LoginStep::Click {
                selector: f(&selector),
                timeout_ms,
            },
            LoginStep::Fill { selector, value } => LoginStep::Fill {
                selector: f(&selector),
                value: f(&value),
            },
            LoginStep::Press { selector, key } => LoginStep::Press {
                selector: selector.as_deref().map(f),
                key,
            },
            LoginStep::Wait { selector, timeout_ms } => LoginStep::Wait {
                selector: f(&selector),
                timeout_ms,
            },
            LoginStep::Dismiss { selector, timeout_ms } => LoginStep::Dismiss {
                selector: f(&selector),
                timeout_ms,
            },
            LoginStep::Log { message } => LoginStep::Log { message: f(&message) },
            step @ LoginStep::Sleep { .. } => step,
        }
    }
}

impl LoginScript {
    /// Script that only opens the entry page
    pub fn navigate_only() -> Self {
        Self {
            name: "navigate-only".to_string(),
            password_env: None,
            steps: vec![LoginStep::Navigate {
                url: "{entry_url}".to_string(),
                wait_for_selector: None,
            }],
        }
    }

    /// Parse a login script from YAML string
    pub fn from_yaml(yaml: &str) -> E2eResult<Self> {
        let script: Self = serde_yaml::from_str(yaml)?;
        if script.steps.is_empty() {
            return Err(E2eError::ScriptParse(format!("script '{}' has no steps", script.name)));
        }
        Ok(script)
    }

    /// Parse a login script from a YAML file
    pub fn from_file(path: &Path) -> E2eResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Steps with placeholders filled for `unit`
    pub fn render(&self, unit: &UnitOfWork) -> E2eResult<Vec<LoginStep>> {
        let needs_password = self
            .steps
            .iter()
            .any(|s| serde_yaml::to_string(s).map_or(false, |y| y.contains("{password}")));

        let password = match (&self.password_env, needs_password) {
            (Some(var), true) => {
                std::env::var(var).map_err(|_| E2eError::MissingSecret(var.clone()))?
            }
            (None, true) => return Err(E2eError::MissingSecret("<password_env unset>".to_string())),
            (_, false) => String::new(),
        };

        let fill = |s: &str| {
            s.replace("{entry_url}", &unit.entry_url)
                .replace("{account}", &unit.identity.account)
                .replace("{country}", &unit.identity.country_code.to_lowercase())
                .replace("{password}", &password)
        };
        Ok(self.steps.iter().map(|s| s.map_strings(&fill)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smartcheck_common::Identity;

    const SCRIPT: &str = r##"
name: samsung-account
password_env: SMARTCHECK_TEST_PASSWORD_UNSET
steps:
  - action: navigate
    url: "{entry_url}"
  - action: fill
    selector: "#iptLgnPlnID"
    value: "{account}"
  - action: click
    selector: "#signInButton"
  - action: dismiss
    selector: "button.css-cmm9n1"
  - action: wait
    selector: "div.myd26-my-story-st"
    timeout_ms: 80000
"##;

    fn unit() -> UnitOfWork {
        UnitOfWork::new(
            Identity::new("user@example.com", "DE"),
            1,
            "https://shop.example.com/de/mypage",
        )
    }

    #[test]
    fn test_parse_and_render() {
        let script = LoginScript::from_yaml(SCRIPT).unwrap();
        assert_eq!(script.steps.len(), 5);

        let steps = script.render(&unit()).unwrap();
        assert_eq!(
            steps[0],
            LoginStep::Navigate {
                url: "https://shop.example.com/de/mypage".to_string(),
                wait_for_selector: None
            }
        );
        assert_eq!(
            steps[1],
            LoginStep::Fill {
                selector: "#iptLgnPlnID".to_string(),
                value: "user@example.com".to_string()
            }
        );
        assert_eq!(
            steps[3],
            LoginStep::Dismiss {
                selector: "button.css-cmm9n1".to_string(),
                timeout_ms: 10_000
            }
        );
    }

    #[test]
    fn test_password_placeholder_requires_env() {
        let yaml = r##"
name: with-password
password_env: SMARTCHECK_TEST_PASSWORD_UNSET
steps:
  - action: fill
    selector: "#password"
    value: "{password}"
"##;
        let script = LoginScript::from_yaml(yaml).unwrap();
        assert!(matches!(
            script.render(&unit()),
            Err(E2eError::MissingSecret(var)) if var == "SMARTCHECK_TEST_PASSWORD_UNSET"
        ));
    }

    #[test]
    fn test_empty_script_rejected() {
        assert!(LoginScript::from_yaml("name: empty\nsteps: []\n").is_err());
    }

    #[test]
    fn test_step_names() {
        assert_eq!(LoginStep::Sleep { ms: 250 }.name(), "sleep:250ms");
        let steps = LoginScript::navigate_only().render(&unit()).unwrap();
        assert_eq!(steps[0].name(), "navigate:https://shop.example.com/de/mypage");
    }
}
