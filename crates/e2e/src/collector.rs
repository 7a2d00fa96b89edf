//! Captured responses and page text -> [`UnitRecord`]

use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use smartcheck_common::consent::{ConsentFlags, ConsentMatrix, ConsentState};
use smartcheck_common::ranking::product::select_devices;
use smartcheck_common::{
    DeviceSelection, HarnessConfig, MetadataTable, ProductCandidate, RecordField, UnitRecord,
    LIFESTYLE_SLOTS, RECS_PER_STORY, STORY_SLOTS,
};

use crate::aggregator::ResponseAggregator;
use crate::error::E2eResult;
use crate::session::{BrowserSession, UnitOfWork};

const RECOMMEND_PATH: &str = "/resultData/result/recommend";
const META_PATH: &str = "/resultData/result";
const PRODUCTS_PATH: &str = "/resultData/myProducts/products/productList/items";

/// What one collection pass produced
#[derive(Debug, Clone)]
pub struct Collected {
    pub record: UnitRecord,
    pub consent: ConsentState,
    pub devices: DeviceSelection,
}

/// Builds a record from an aggregator and an open page
pub struct Collector {
    config: Arc<HarnessConfig>,
    metadata: MetadataTable,
    consent: ConsentMatrix,
}

impl Collector {
    /// `metadata` backs up the meta source; `consent` resolves opt-in state
    pub fn new(config: Arc<HarnessConfig>, metadata: MetadataTable, consent: ConsentMatrix) -> Self {
        Self {
            config,
            metadata,
            consent,
        }
    }

    pub async fn collect(
        &self,
        unit: &UnitOfWork,
        aggregator: &ResponseAggregator,
        session: &dyn BrowserSession,
    ) -> E2eResult<Collected> {
        let mut record = UnitRecord::sentinel(&unit.identity);
        let recommend = payload(aggregator, "main", RECOMMEND_PATH);

        if let Some(recommend) = &recommend {
            apply_recommend(&mut record, recommend);
        }

        if let Some(user) = aggregator.get("user") {
            if let Some(name) = full_name(&user.body) {
                record.full_name = name;
            }
        }

        let devices = self.devices(aggregator);
        (record.device1, record.device2) = devices.columns();
        record.main_description1 = match &devices {
            DeviceSelection::NoDevices => self.config.page.no_device_description.clone(),
            DeviceSelection::Devices { .. } => self.config.page.device_description.clone(),
        };

        let consent = self.consent_state(aggregator, &unit.identity.country_code);
        if consent.opt_in_required() {
            if let Some(recommend) = &recommend {
                apply_opt_out_variants(&mut record, recommend);
            }
            self.read_banner(&mut record, session).await?;
        }

        self.read_page(&mut record, session).await?;

        debug!(identity = %unit.identity, %consent, ?devices, "Collected record");
        Ok(Collected {
            record,
            consent,
            devices,
        })
    }

    /// Device slots from the account's own meta payload
    ///
    /// The payload alone decides between no devices, one reused device and
    /// ranked products. The metadata table only names products the payload
    /// lacks, or stands in when the meta source never answered.
    fn devices(&self, aggregator: &ResponseAggregator) -> DeviceSelection {
        let metadata = match aggregator.get("meta") {
            None => {
                debug!("Meta source not captured; using the metadata table");
                self.metadata.clone()
            }
            Some(_) => {
                let mut own = payload(aggregator, "meta", META_PATH)
                    .map(|m| MetadataTable::from_meta_result(&m))
                    .unwrap_or_default();
                if own.len() > 1 {
                    own.merge_missing(&self.metadata);
                }
                own
            }
        };

        let candidates: Vec<ProductCandidate> = payload(aggregator, "product", PRODUCTS_PATH)
            .and_then(|items| items.as_array().map(|a| a.iter().map(ProductCandidate::from_item).collect()))
            .unwrap_or_default();

        select_devices(candidates, &metadata, &self.config.ranking)
    }

    fn consent_state(&self, aggregator: &ResponseAggregator, country_code: &str) -> ConsentState {
        let Some(response) = aggregator.get("consent") else {
            return ConsentState::NotRequired;
        };
        if self.consent.is_empty() {
            return ConsentState::NotRequired;
        }
        let flags = ConsentFlags::from_response(response.status, &response.body);
        self.consent.lookup(flags, country_code)
    }

    async fn read_banner(&self, record: &mut UnitRecord, session: &dyn BrowserSession) -> E2eResult<()> {
        let page = &self.config.page;
        let text = joined(session.query_texts(&page.banner_text_selector).await?);
        let Some(text) = text else {
            debug!("Banner not rendered");
            return Ok(());
        };
        record.banner_text = text;

        if let Some(link) = first(session.query_texts(&page.banner_link_selector).await?) {
            record.banner_link_text = link;
        }
        if let Some(href) = session.query_attribute(&page.banner_link_selector, "href").await? {
            record.banner_hyperlink = href;
        }
        Ok(())
    }

    async fn read_page(&self, record: &mut UnitRecord, session: &dyn BrowserSession) -> E2eResult<()> {
        let page = &self.config.page;

        if let Some(headline) = joined(session.query_texts(&page.headline_selector).await?) {
            if headline.contains(&page.unbound_marker) {
                warn!(%headline, "Headline still has an unbound template");
            }
            record.main_headline = headline;
        }
        if let Some(description) = joined(session.query_texts(&page.description_selector).await?) {
            record.main_description = description;
        }

        let rendered = session.query_texts(&page.story_selector).await?.len();
        for n in 1..=STORY_SLOTS.min(u8::try_from(rendered).unwrap_or(u8::MAX)) {
            let within = |child: &str| format!("{} >> nth={} >> {}", page.story_selector, n - 1, child);

            if let Some(title) = first(session.query_texts(&within(&page.story_title_selector)).await?) {
                record.set(RecordField::StoryTitle(n), title)?;
            }
            if let Some(desc) = first(session.query_texts(&within(&page.story_desc_selector)).await?) {
                record.set(RecordField::StoryDesc(n), desc)?;
            }
            let products = session.query_texts(&within(&page.story_product_selector)).await?;
            for (k, name) in (1..=RECS_PER_STORY).zip(products) {
                record.set(RecordField::StoryRec(n, k), name)?;
            }
        }
        Ok(())
    }
}

fn payload(aggregator: &ResponseAggregator, key: &str, path: &str) -> Option<Value> {
    let response = aggregator.get(key)?;
    let value = response.body.pointer(path).cloned();
    if value.is_none() {
        warn!(source = key, path, status = response.status, "Payload missing expected path");
    }
    value
}

/// Copy `recommend` values onto same-named columns; identity columns stay
fn apply_recommend(record: &mut UnitRecord, recommend: &Value) {
    let Some(columns) = recommend.as_object() else {
        return;
    };
    for (name, value) in columns {
        let Ok(field) = name.parse::<RecordField>() else {
            continue;
        };
        if matches!(field, RecordField::Account | RecordField::CountryCode) {
            continue;
        }
        if let Some(text) = scalar(value) {
            // parse() only yields in-range fields
            let _ = record.set(field, text);
        }
    }
}

/// Swap in the `...N` story and lifestyle ids shown without consent
fn apply_opt_out_variants(record: &mut UnitRecord, recommend: &Value) {
    for n in 1..=STORY_SLOTS {
        if let Some(id) = recommend.get(format!("storyIdRank{}N", n)).and_then(scalar) {
            let _ = record.set(RecordField::StoryId(n), id);
        }
    }
    for n in 1..=LIFESTYLE_SLOTS {
        if let Some(id) = recommend.get(format!("lifeStyleIdRank{}N", n)).and_then(scalar) {
            let _ = record.set(RecordField::LifestyleId(n), id);
        }
    }
}

fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.replace('\n', " ")),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn full_name(user: &Value) -> Option<String> {
    let first = user.get("firstName")?.as_str()?;
    let last = user.get("lastName")?.as_str()?;
    Some(format!("{} {}", first, last))
}

fn joined(texts: Vec<String>) -> Option<String> {
    let text = texts.join(" ");
    (!text.trim().is_empty()).then_some(text)
}

fn first(texts: Vec<String>) -> Option<String> {
    texts.into_iter().find(|t| !t.trim().is_empty())
}
