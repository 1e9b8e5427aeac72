use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use futures_util::future::join_all;
use serde::Serialize;
use tracing::{info, warn};

use crate::error::FetchError;
use crate::fetch::StatusFetcher;
use crate::models::{Account, PlateConfig, PlateRecord};
use crate::status_cache::StatusCache;

/// Fetch result for one account in one cycle.
#[derive(Debug, Clone, Serialize)]
pub struct AccountReport {
    pub account: String,
    pub success: bool,
    pub records: usize,
    pub error_kind: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ResolvedPlate {
    pub record: PlateRecord,
    pub config: PlateConfig,
}

#[derive(Debug, Default)]
pub struct Resolution {
    pub matched: BTreeMap<String, ResolvedPlate>,
    /// Records for plates nobody configured. Never dispatched.
    pub orphans: Vec<PlateRecord>,
    /// Configured plates that no account returned data for.
    pub missing: Vec<String>,
    pub accounts: Vec<AccountReport>,
}

pub struct PlateResolver {
    fetcher: Arc<dyn StatusFetcher>,
    cache: Arc<StatusCache>,
}

impl PlateResolver {
    pub fn new(fetcher: Arc<dyn StatusFetcher>, cache: Arc<StatusCache>) -> Self {
        Self { fetcher, cache }
    }

    /// Fetch every account concurrently and pair each plate's record with its config.
    ///
    /// Account failures are recorded in the report and never abort the others.
    pub async fn resolve(&self, accounts: &[Account], plate_configs: &[PlateConfig]) -> Resolution {
        let fetches = accounts.iter().map(|account| async move {
            let result = self
                .cache
                .get_or_fetch(&account.name, || self.fetcher.fetch_status(account))
                .await;
            (account, result)
        });
        // join_all preserves input order, which is what makes last-write-wins deterministic.
        let results = join_all(fetches).await;

        let mut reports = Vec::with_capacity(results.len());
        let mut batches = Vec::with_capacity(results.len());
        for (account, result) in results {
            reports.push(account_report(account, &result));
            match result {
                Ok(records) => batches.push(records),
                Err(e) => warn!(account = %account.name, kind = e.kind(), error = %e, "permit fetch failed"),
            }
        }

        let merged = merge_records(batches);
        let mut resolution = match_configs(merged, plate_configs);
        resolution.accounts = reports;

        for orphan in &resolution.orphans {
            warn!(plate = %orphan.plate, account = %orphan.source_account, "permit record has no plate configuration");
        }
        info!(
            matched = resolution.matched.len(),
            orphans = resolution.orphans.len(),
            missing = resolution.missing.len(),
            "plates resolved"
        );

        resolution
    }
}

fn account_report(account: &Account, result: &Result<Vec<PlateRecord>, FetchError>) -> AccountReport {
    match result {
        Ok(records) => AccountReport {
            account: account.name.clone(),
            success: true,
            records: records.len(),
            error_kind: None,
            error: None,
        },
        Err(e) => AccountReport {
            account: account.name.clone(),
            success: false,
            records: 0,
            error_kind: Some(e.kind().to_string()),
            error: Some(e.to_string()),
        },
    }
}

/// Collapse per-account record batches into one record per plate.
///
/// Within a batch the record with the latest apply time wins (first on ties).
/// Across batches, the later batch wins.
pub fn merge_records(batches: Vec<Vec<PlateRecord>>) -> HashMap<String, PlateRecord> {
    let mut merged = HashMap::new();
    for batch in batches {
        let mut newest: HashMap<String, PlateRecord> = HashMap::new();
        for record in batch {
            match newest.get(&record.plate) {
                Some(current) if current.apply_time >= record.apply_time => {}
                _ => {
                    newest.insert(record.plate.clone(), record);
                }
            }
        }
        merged.extend(newest);
    }
    merged
}

/// Pair records with configs by exact plate string equality.
pub fn match_configs(mut records: HashMap<String, PlateRecord>, plate_configs: &[PlateConfig]) -> Resolution {
    let mut resolution = Resolution::default();

    for config in plate_configs {
        match records.remove(&config.plate) {
            Some(record) => {
                resolution.matched.insert(
                    config.plate.clone(),
                    ResolvedPlate {
                        record,
                        config: config.clone(),
                    },
                );
            }
            None => resolution.missing.push(config.plate.clone()),
        }
    }

    let mut orphans: Vec<PlateRecord> = records.into_values().collect();
    orphans.sort_by(|a, b| a.plate.cmp(&b.plate));
    resolution.orphans = orphans;
    resolution
}
