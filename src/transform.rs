use crate::facebook::{Numeric, RawCampaignItem, RawInsightItem};
use crate::models::Dated;
use chrono::NaiveDate;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;

const FINGERPRINT_SEPARATOR: &str = "_";
const ABSENT: &str = "null";

/// Ad-level daily metrics joined with the campaign status.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdRecord {
    pub account_id: String,
    pub account_name: Option<String>,
    pub adset_id: Option<String>,
    pub adset_name: Option<String>,
    pub ad_id: Option<String>,
    pub ad_name: Option<String>,
    pub campaign_id: Option<String>,
    pub campaign_name: Option<String>,
    pub objective: Option<String>,
    pub spend: f64,
    pub clicks: i64,
    pub inline_link_clicks: i64,
    pub impressions: i64,
    pub date: Option<NaiveDate>,
    pub campaign_status: Option<String>,
    pub unique_id: String,
}

impl AdRecord {
    /// Column order the fingerprint is computed over.
    pub const COLUMNS: [&'static str; 15] = [
        "account_id",
        "account_name",
        "adset_id",
        "adset_name",
        "ad_id",
        "ad_name",
        "campaign_id",
        "campaign_name",
        "objective",
        "spend",
        "clicks",
        "inline_link_clicks",
        "impressions",
        "date",
        "campaign_status",
    ];

    fn column_strings(&self) -> [String; 15] {
        [
            self.account_id.clone(),
            opt(&self.account_name),
            opt(&self.adset_id),
            opt(&self.adset_name),
            opt(&self.ad_id),
            opt(&self.ad_name),
            opt(&self.campaign_id),
            opt(&self.campaign_name),
            opt(&self.objective),
            self.spend.to_string(),
            self.clicks.to_string(),
            self.inline_link_clicks.to_string(),
            self.impressions.to_string(),
            self.date
                .map(|d| d.format("%Y-%m-%d").to_string())
                .unwrap_or_else(|| ABSENT.to_string()),
            opt(&self.campaign_status),
        ]
    }

    pub fn compute_fingerprint(&self) -> String {
        fingerprint(&self.column_strings())
    }
}

impl Dated for AdRecord {
    fn date(&self) -> Option<NaiveDate> {
        self.date
    }
}

/// One `(ad, action_type)` pair from an insight's nested `actions`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionRecord {
    pub account_id: String,
    pub ad_id: Option<String>,
    pub action_type: Option<String>,
    pub value: i64,
    pub date: Option<NaiveDate>,
}

impl Dated for ActionRecord {
    fn date(&self) -> Option<NaiveDate> {
        self.date
    }
}

fn opt(value: &Option<String>) -> String {
    value.clone().unwrap_or_else(|| ABSENT.to_string())
}

fn float_or_zero(value: &Option<Numeric>) -> f64 {
    value.as_ref().and_then(Numeric::as_f64).unwrap_or(0.0)
}

fn int_or_zero(value: &Option<Numeric>) -> i64 {
    value.as_ref().and_then(Numeric::as_i64).unwrap_or(0)
}

fn parse_date(value: &Option<String>) -> Option<NaiveDate> {
    value
        .as_deref()
        .and_then(|s| NaiveDate::parse_from_str(s.get(..10).unwrap_or(s), "%Y-%m-%d").ok())
}

/// SHA-256 hex of the values joined by `_`.
pub fn fingerprint<S: AsRef<str>>(values: &[S]) -> String {
    let joined = values
        .iter()
        .map(AsRef::as_ref)
        .collect::<Vec<_>>()
        .join(FINGERPRINT_SEPARATOR);
    hex::encode(Sha256::digest(joined.as_bytes()))
}

/// Splits raw insights into ad rows and action rows, in input order.
pub fn transform(
    insights: &[RawInsightItem],
    campaigns: &[RawCampaignItem],
    account_id: &str,
) -> (Vec<AdRecord>, Vec<ActionRecord>) {
    let mut statuses: HashMap<&str, Option<&str>> = HashMap::new();
    for campaign in campaigns {
        if let Some(id) = campaign.id.as_deref() {
            statuses.entry(id).or_insert(campaign.status.as_deref());
        }
    }

    let mut ads = Vec::with_capacity(insights.len());
    let mut actions = Vec::new();

    for item in insights {
        let date = parse_date(&item.date_start);

        for action in &item.actions {
            actions.push(ActionRecord {
                account_id: account_id.to_string(),
                ad_id: item.ad_id.clone(),
                action_type: action.action_type.clone(),
                value: int_or_zero(&action.value),
                date,
            });
        }

        let campaign_status = item
            .campaign_id
            .as_deref()
            .and_then(|id| statuses.get(id).copied().flatten())
            .map(String::from);

        let mut record = AdRecord {
            account_id: account_id.to_string(),
            account_name: item.account_name.clone(),
            adset_id: item.adset_id.clone(),
            adset_name: item.adset_name.clone(),
            ad_id: item.ad_id.clone(),
            ad_name: item.ad_name.clone(),
            campaign_id: item.campaign_id.clone(),
            campaign_name: item.campaign_name.clone(),
            objective: item.objective.clone(),
            spend: float_or_zero(&item.spend),
            clicks: int_or_zero(&item.clicks),
            inline_link_clicks: int_or_zero(&item.inline_link_clicks),
            impressions: int_or_zero(&item.impressions),
            date,
            campaign_status,
            unique_id: String::new(),
        };
        record.unique_id = record.compute_fingerprint();
        ads.push(record);
    }

    (ads, actions)
}
