use crate::config::GraphApiConfig;
use crate::constants::{
    FB_CAMPAIGN_FIELDS, FB_INSIGHT_FIELDS, FB_INSIGHT_LEVEL, FB_TIME_INCREMENT,
    RATE_LIMIT_SIGNATURE,
};
use crate::pagination::{Paginated, Paginator};
use chrono::{Duration as ChronoDuration, NaiveDate};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FacebookApiError {
    #[error("API request failed: {0}")]
    RequestFailed(String),
    #[error("API returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("Rate limit still active after {0} retries")]
    RateLimitExhausted(u32),
}

/// Graph API numbers arrive as strings (`"10.50"`) or as JSON numbers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Numeric {
    Int(i64),
    Float(f64),
    Text(String),
}

impl Numeric {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Numeric::Int(v) => Some(*v as f64),
            Numeric::Float(v) => Some(*v),
            Numeric::Text(s) => s.trim().parse().ok(),
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Numeric::Int(v) => Some(*v),
            Numeric::Float(v) => Some(v.trunc() as i64),
            Numeric::Text(s) => {
                let s = s.trim();
                s.parse()
                    .ok()
                    .or_else(|| s.parse::<f64>().ok().map(|f| f.trunc() as i64))
            }
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawAction {
    pub action_type: Option<String>,
    pub value: Option<Numeric>,
}

/// One ad, one day, as returned by `act_<id>/insights`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawInsightItem {
    pub account_id: Option<String>,
    pub account_name: Option<String>,
    pub adset_id: Option<String>,
    pub adset_name: Option<String>,
    pub ad_id: Option<String>,
    pub ad_name: Option<String>,
    pub campaign_id: Option<String>,
    pub campaign_name: Option<String>,
    pub objective: Option<String>,
    pub spend: Option<Numeric>,
    pub clicks: Option<Numeric>,
    pub inline_link_clicks: Option<Numeric>,
    pub impressions: Option<Numeric>,
    #[serde(default)]
    pub actions: Vec<RawAction>,
    pub date_start: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawCampaignItem {
    pub id: Option<String>,
    pub name: Option<String>,
    pub status: Option<String>,
    pub start_time: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Paging {
    pub next: Option<String>,
}

/// One page of a Graph API collection.
#[derive(Debug, Default, Deserialize)]
pub struct GraphPage {
    #[serde(default)]
    pub data: Vec<Value>,
    #[serde(default)]
    pub paging: Option<Paging>,
}

impl GraphPage {
    pub fn next_url(&self) -> Option<&str> {
        self.paging
            .as_ref()
            .and_then(|p| p.next.as_deref())
            .filter(|next| !next.is_empty())
    }
}

#[derive(Debug)]
pub enum FetchOutcome {
    Success(GraphPage),
    RateLimited,
}

pub fn is_rate_limited(body: &str) -> bool {
    body.to_lowercase().contains(RATE_LIMIT_SIGNATURE)
}

/// A single GET with timeout; classifies the response, never retries.
#[derive(Clone)]
pub struct RateLimitedFetcher {
    client: Client,
}

impl RateLimitedFetcher {
    pub fn new(timeout: Duration) -> Result<Self, FacebookApiError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FacebookApiError::RequestFailed(e.to_string()))?;
        Ok(Self { client })
    }

    pub async fn fetch(
        &self,
        url: &str,
        params: Option<&[(&str, String)]>,
    ) -> Result<FetchOutcome, FacebookApiError> {
        let mut request = self.client.get(url);
        if let Some(params) = params {
            request = request.query(params);
        }

        let response = request
            .send()
            .await
            .map_err(|e| FacebookApiError::RequestFailed(e.to_string()))?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            if is_rate_limited(&body) {
                return Ok(FetchOutcome::RateLimited);
            }
            return Err(FacebookApiError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let page: GraphPage = response
            .json()
            .await
            .map_err(|e| FacebookApiError::InvalidResponse(e.to_string()))?;

        Ok(FetchOutcome::Success(page))
    }
}

/// `{since, until}` sent as the insights `time_range`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub since: NaiveDate,
    pub until: NaiveDate,
}

impl TimeRange {
    pub fn trailing(today: NaiveDate, retention_days: i64) -> Self {
        Self {
            since: today - ChronoDuration::days(retention_days),
            until: today,
        }
    }

    pub fn to_param(&self) -> String {
        json!({
            "since": self.since.format("%Y-%m-%d").to_string(),
            "until": self.until.format("%Y-%m-%d").to_string(),
        })
        .to_string()
    }
}

pub struct FacebookAPI {
    paginator: Paginator,
    access_token: String,
    account_id: String,
    base_url: String,
}

impl FacebookAPI {
    pub fn new(
        config: &GraphApiConfig,
        access_token: String,
        account_id: String,
    ) -> Result<Self, FacebookApiError> {
        let fetcher = RateLimitedFetcher::new(config.request_timeout)?;
        Ok(Self {
            paginator: Paginator::new(fetcher, config.rate_limit_sleep, config.max_rate_limit_retries),
            access_token,
            account_id,
            base_url: format!("{}/{}", config.base_url, config.api_version),
        })
    }

    pub fn insights_url(&self) -> String {
        format!("{}/act_{}/insights", self.base_url, self.account_id)
    }

    pub fn campaigns_url(&self) -> String {
        format!("{}/act_{}/campaigns", self.base_url, self.account_id)
    }

    pub async fn get_insights(&self, range: TimeRange) -> Paginated<RawInsightItem> {
        let params = [
            ("time_increment", FB_TIME_INCREMENT.to_string()),
            ("time_range", range.to_param()),
            ("level", FB_INSIGHT_LEVEL.to_string()),
            ("fields", FB_INSIGHT_FIELDS.to_string()),
            ("access_token", self.access_token.clone()),
        ];

        self.paginator.paginate(&self.insights_url(), &params).await
    }

    pub async fn get_campaigns(&self) -> Paginated<RawCampaignItem> {
        let params = [
            ("fields", FB_CAMPAIGN_FIELDS.to_string()),
            ("access_token", self.access_token.clone()),
        ];

        self.paginator.paginate(&self.campaigns_url(), &params).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_signature_is_case_insensitive() {
        assert!(is_rate_limited(
            r#"{"error":{"message":"(#17) User request limit reached: Too Many Calls"}}"#
        ));
        assert!(!is_rate_limited(r#"{"error":{"message":"Invalid OAuth access token"}}"#));
    }

    #[test]
    fn numeric_accepts_strings_and_numbers() {
        let item: RawInsightItem = serde_json::from_value(json!({
            "spend": "10.50",
            "clicks": 3,
            "impressions": "120",
            "inline_link_clicks": "2.0"
        }))
        .unwrap();
        assert_eq!(item.spend.unwrap().as_f64(), Some(10.5));
        assert_eq!(item.clicks.unwrap().as_i64(), Some(3));
        assert_eq!(item.impressions.unwrap().as_i64(), Some(120));
        assert_eq!(item.inline_link_clicks.unwrap().as_i64(), Some(2));
        assert!(item.actions.is_empty());
    }

    #[test]
    fn time_range_param_is_json() {
        let today = NaiveDate::from_ymd_opt(2024, 1, 16).unwrap();
        let range = TimeRange::trailing(today, 15);
        assert_eq!(range.to_param(), r#"{"since":"2024-01-01","until":"2024-01-16"}"#);
    }

    #[test]
    fn empty_next_is_end_of_pages() {
        let page: GraphPage =
            serde_json::from_value(json!({"data": [], "paging": {"next": ""}})).unwrap();
        assert!(page.next_url().is_none());
    }
}
