use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use chrono_tz::Tz;
use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderValue};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::error::FetchError;
use crate::models::{Account, PlateRecord};
use crate::rules::{RuleSet, parse_rule_response};

/// Queries the authority for every permit visible to one account.
#[async_trait]
pub trait StatusFetcher: Send + Sync {
    async fn fetch_status(&self, account: &Account) -> Result<Vec<PlateRecord>, FetchError>;
}

/// Fetches the traffic restriction schedule covering `date`.
#[async_trait]
pub trait RuleFetcher: Send + Sync {
    async fn fetch_rules(&self, date: NaiveDate) -> Result<RuleSet, FetchError>;
}

fn build_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(30))
        .user_agent(concat!("jjz-alert/", env!("CARGO_PKG_VERSION")))
        .build()
        .unwrap_or_default()
}

pub struct HttpStatusFetcher {
    client: reqwest::Client,
    tz: Tz,
}

impl HttpStatusFetcher {
    pub fn new(tz: Tz) -> Self {
        Self {
            client: build_client(),
            tz,
        }
    }
}

#[async_trait]
impl StatusFetcher for HttpStatusFetcher {
    async fn fetch_status(&self, account: &Account) -> Result<Vec<PlateRecord>, FetchError> {
        let url = &account.query_url;
        let network = |e: reqwest::Error| FetchError::Network {
            url: url.clone(),
            message: e.to_string(),
        };

        let token = HeaderValue::from_str(&account.credential_token).map_err(|_| FetchError::Auth {
            account: account.name.clone(),
            message: "token is not a valid header value".to_string(),
        })?;

        debug!(account = %account.name, url = %url, "querying permit status");

        let response = self
            .client
            .post(url)
            .header(AUTHORIZATION, token)
            .header(CONTENT_TYPE, "application/json")
            .body("{}")
            .send()
            .await
            .map_err(network)?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(FetchError::Auth {
                account: account.name.clone(),
                message: format!("HTTP {status}"),
            });
        }
        if !status.is_success() {
            return Err(FetchError::Network {
                url: url.clone(),
                message: format!("HTTP {status}"),
            });
        }

        let body = response.bytes().await.map_err(network)?;
        let today = Utc::now().with_timezone(&self.tz).date_naive();
        parse_status_response(account, &body, today)
    }
}

pub struct HttpRuleFetcher {
    client: reqwest::Client,
    url: String,
}

impl HttpRuleFetcher {
    pub fn new(url: String) -> Self {
        Self {
            client: build_client(),
            url,
        }
    }
}

#[async_trait]
impl RuleFetcher for HttpRuleFetcher {
    async fn fetch_rules(&self, date: NaiveDate) -> Result<RuleSet, FetchError> {
        debug!(url = %self.url, date = %date, "fetching traffic rules");
        let network = |e: reqwest::Error| FetchError::Network {
            url: self.url.clone(),
            message: e.to_string(),
        };
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(network)?;
        let body = response.bytes().await.map_err(network)?;
        parse_rule_response(&self.url, &body)
    }
}

#[derive(Deserialize)]
struct StateListResponse {
    error: Option<String>,
    msg: Option<String>,
    data: Option<StateListData>,
}

#[derive(Deserialize)]
struct StateListData {
    #[serde(default)]
    bzclxx: Vec<Vehicle>,
}

#[derive(Deserialize)]
struct Vehicle {
    #[serde(default)]
    hphm: String,
    sycs: Option<Value>,
    #[serde(default)]
    bzxx: Vec<PermitEntry>,
    #[serde(default)]
    ecbzxx: Vec<PermitEntry>,
}

#[derive(Deserialize)]
struct PermitEntry {
    #[serde(default)]
    jjzzlmc: String,
    #[serde(default)]
    blztmc: String,
    yxqs: Option<String>,
    yxqz: Option<String>,
    sxsyts: Option<Value>,
    sqsj: Option<String>,
}

/// Strings and numbers both render as text; null and "" are absent.
fn scalar_text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn parse_date(value: Option<&str>) -> Option<NaiveDate> {
    value.and_then(|s| NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok())
}

/// Parse the authority's `stateList` response into one record per permit.
///
/// `today` is used to derive `days_remaining` when the response omits it.
pub fn parse_status_response(account: &Account, body: &[u8], today: NaiveDate) -> Result<Vec<PlateRecord>, FetchError> {
    let parse_error = |message: String| FetchError::Parse {
        url: account.query_url.clone(),
        message,
    };

    let response: StateListResponse = serde_json::from_slice(body).map_err(|e| parse_error(e.to_string()))?;

    if let Some(error) = response.error {
        return Err(parse_error(error));
    }
    let data = response
        .data
        .ok_or_else(|| parse_error(response.msg.unwrap_or_else(|| "response has no data field".to_string())))?;

    let mut records = Vec::new();
    for vehicle in data.bzclxx {
        if vehicle.hphm.is_empty() {
            continue;
        }
        let remaining_uses = scalar_text(vehicle.sycs.as_ref());

        for entry in vehicle.bzxx.iter().chain(vehicle.ecbzxx.iter()) {
            let valid_start = parse_date(entry.yxqs.as_deref());
            let valid_end = parse_date(entry.yxqz.as_deref());
            let days_remaining = scalar_text(entry.sxsyts.as_ref())
                .and_then(|s| s.parse::<i64>().ok())
                .or_else(|| valid_end.map(|end| (end - today).num_days()));

            records.push(PlateRecord {
                plate: vehicle.hphm.clone(),
                permit_type: entry.jjzzlmc.clone(),
                raw_status: entry.blztmc.clone(),
                valid_start,
                valid_end,
                days_remaining,
                source_account: account.name.clone(),
                apply_time: entry.sqsj.clone().filter(|s| !s.is_empty()),
                remaining_uses: remaining_uses.clone(),
            });
        }
    }

    debug!(account = %account.name, records = records.len(), "parsed permit records");
    Ok(records)
}
