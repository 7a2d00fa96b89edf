//! Marketing consent requirements per country

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use tracing::warn;

const NOT_PRESENT: &str = "-";

/// Consent types still pending for an account
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsentFlags {
    pub mkt: bool,
    pub czsvc: bool,
    pub czadv: bool,
}

impl ConsentFlags {
    /// Read the consent source's answer
    ///
    /// 204 carries no body and means no consent is pending. Otherwise the body
    /// is a list of `{ "type": ... }` entries.
    pub fn from_response(status: u16, body: &Value) -> Self {
        if status == 204 {
            return Self::default();
        }
        let types: Vec<&str> = body
            .as_array()
            .map(|items| items.iter().filter_map(|i| i.get("type")?.as_str()).collect())
            .unwrap_or_default();
        Self {
            mkt: types.contains(&"MKT"),
            czsvc: types.contains(&"CZSVC"),
            czadv: types.contains(&"CZADV"),
        }
    }
}

/// Whether the page renders the opt-in variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsentState {
    /// `X` in the matrix; opt-out stories and the banner are shown
    OptInRequired,
    /// `O` in the matrix
    NotRequired,
}

impl ConsentState {
    pub fn opt_in_required(&self) -> bool {
        matches!(self, ConsentState::OptInRequired)
    }
}

impl fmt::Display for ConsentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsentState::OptInRequired => write!(f, "X"),
            ConsentState::NotRequired => write!(f, "O"),
        }
    }
}

/// One flag combination and its per-country outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsentRow {
    #[serde(rename = "MKT")]
    pub mkt: String,
    #[serde(rename = "CZSVC")]
    pub czsvc: String,
    #[serde(rename = "CZADV")]
    pub czadv: String,
    /// Country code -> `X` or `O`
    #[serde(flatten)]
    pub countries: BTreeMap<String, String>,
}

impl ConsentRow {
    fn matches(&self, flags: ConsentFlags) -> bool {
        let cell = |set: bool, name: &'static str| if set { name } else { NOT_PRESENT };
        self.mkt.trim() == cell(flags.mkt, "MKT")
            && self.czsvc.trim() == cell(flags.czsvc, "CZSVC")
            && self.czadv.trim() == cell(flags.czadv, "CZADV")
    }
}

/// Consent requirement matrix
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConsentMatrix {
    rows: Vec<ConsentRow>,
}

impl ConsentMatrix {
    pub fn new(rows: Vec<ConsentRow>) -> Self {
        Self { rows }
    }

    /// Resolve the consent state for a country
    ///
    /// A combination or country the matrix does not list resolves to
    /// [`ConsentState::NotRequired`].
    pub fn lookup(&self, flags: ConsentFlags, country_code: &str) -> ConsentState {
        let cell = self
            .rows
            .iter()
            .find(|row| row.matches(flags))
            .and_then(|row| row.countries.get(country_code));

        match cell.map(|c| c.trim()) {
            Some("X") | Some("x") => ConsentState::OptInRequired,
            Some(_) => ConsentState::NotRequired,
            None => {
                warn!(?flags, country_code, "Consent matrix has no entry; assuming not required");
                ConsentState::NotRequired
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
