use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::FetchError;

/// Identity under which the tail-number schedule is stored in the rule cache.
pub const TRAFFIC_RULES: &str = "traffic";

/// Tail-number driving restriction for one calendar day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrafficRule {
    pub date: NaiveDate,
    /// Restricted tail digits; empty when the day is unrestricted.
    pub limited_numbers: Vec<char>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleSet {
    pub rules: Vec<TrafficRule>,
}

impl RuleSet {
    pub fn rule_for(&self, date: NaiveDate) -> Option<&TrafficRule> {
        self.rules.iter().find(|r| r.date == date)
    }

    pub fn is_restricted(&self, plate: &str, date: NaiveDate) -> bool {
        self.rule_for(date)
            .is_some_and(|rule| rule.limited_numbers.contains(&tail_number(plate)))
    }
}

/// Last character of the plate as a digit; letters (and anything else) count as 0.
pub fn tail_number(plate: &str) -> char {
    match plate.chars().last() {
        Some(c) if c.is_ascii_digit() => c,
        _ => '0',
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RuleResponse {
    state: Option<String>,
    result_msg: Option<String>,
    #[serde(default)]
    result: Vec<RawRule>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawRule {
    limited_time: String,
    limited_number: String,
}

pub fn parse_rule_response(url: &str, body: &[u8]) -> Result<RuleSet, FetchError> {
    let response: RuleResponse = serde_json::from_slice(body).map_err(|e| FetchError::Parse {
        url: url.to_string(),
        message: e.to_string(),
    })?;

    if response.state.as_deref() != Some("success") {
        return Err(FetchError::Parse {
            url: url.to_string(),
            message: response.result_msg.unwrap_or_else(|| "rule query was not successful".to_string()),
        });
    }

    let mut rules = Vec::with_capacity(response.result.len());
    for raw in response.result {
        let date = NaiveDate::parse_from_str(raw.limited_time.trim(), "%Y年%m月%d日").map_err(|e| FetchError::Parse {
            url: url.to_string(),
            message: format!("invalid rule date '{}': {e}", raw.limited_time),
        })?;
        let limited_numbers = if raw.limited_number.contains("不限行") {
            Vec::new()
        } else {
            raw.limited_number.chars().filter(|c| c.is_ascii_digit()).collect()
        };
        rules.push(TrafficRule { date, limited_numbers });
    }

    Ok(RuleSet { rules })
}
