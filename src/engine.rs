use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use futures_util::future::join_all;
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::admin::AdminNotifier;
use crate::cache::CacheStats;
use crate::config::Config;
use crate::error::EngineError;
use crate::fetch::{RuleFetcher, StatusFetcher};
use crate::format;
use crate::models::{DispatchOutcome, Level, PlateRecord};
use crate::notify::provider::ChannelSender;
use crate::notify::{Dispatcher, Message};
use crate::resolver::{AccountReport, PlateResolver, ResolvedPlate};
use crate::rule_cache::RuleCache;
use crate::rules::{RuleSet, TRAFFIC_RULES};
use crate::status_cache::StatusCache;
use crate::store::KvStore;

const TODAY_PREFIX: &str = "今日尾号限行，";
const TOMORROW_PREFIX: &str = "明日尾号限行，";

/// What was sent (or would have been sent) for one plate.
#[derive(Debug, Clone, Serialize)]
pub struct PlateSummary {
    pub plate: String,
    pub level: Level,
    pub message: String,
    /// Restricted on the day the message is about.
    pub restricted: bool,
    /// The message is about tomorrow.
    pub next_day: bool,
}

/// Structured result of one fetch → resolve → format → dispatch cycle.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub accounts: Vec<AccountReport>,
    pub plates: Vec<PlateSummary>,
    pub outcomes: Vec<DispatchOutcome>,
    /// Operator alerts sent for failed accounts.
    pub admin_outcomes: Vec<DispatchOutcome>,
    /// Plates the authority reported that have no configuration.
    pub orphans: Vec<String>,
    /// Configured plates no account returned data for.
    pub unmatched: Vec<String>,
    pub traffic: Option<String>,
    pub next_day: bool,
    pub cancelled: bool,
}

impl CycleReport {
    pub fn delivered(&self) -> usize {
        self.outcomes.iter().filter(|o| o.success).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.delivered()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub cycle_running: bool,
    pub last_report: Option<CycleReport>,
    pub rule_cache: CacheStats,
    pub status_cache: CacheStats,
}

/// Owns the caches and collaborators for a config snapshot and runs cycles.
pub struct Engine {
    config: Arc<Config>,
    rule_cache: RuleCache,
    status_cache: Arc<StatusCache>,
    resolver: PlateResolver,
    rule_fetcher: Arc<dyn RuleFetcher>,
    dispatcher: Dispatcher,
    admin: AdminNotifier,
    cycle_lock: Mutex<()>,
    last_report: RwLock<Option<CycleReport>>,
}

impl Engine {
    pub fn new(
        config: Arc<Config>,
        store: Arc<dyn KvStore>,
        status_fetcher: Arc<dyn StatusFetcher>,
        rule_fetcher: Arc<dyn RuleFetcher>,
        sender: Arc<dyn ChannelSender>,
    ) -> Self {
        let rule_cache = RuleCache::new(store.clone(), config.timezone());
        let admin = AdminNotifier::new(
            store.clone(),
            config.admin.channels.clone(),
            config.admin_throttle(),
            config.timezone(),
        );
        let status_cache = Arc::new(StatusCache::new(store, config.status_ttl()));
        let resolver = PlateResolver::new(status_fetcher, status_cache.clone());
        let dispatcher = Dispatcher::new(sender, config.global.default_icon.clone());
        Self {
            config,
            rule_cache,
            status_cache,
            resolver,
            rule_fetcher,
            dispatcher,
            admin,
            cycle_lock: Mutex::new(()),
            last_report: RwLock::new(None),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub async fn status(&self) -> EngineStatus {
        EngineStatus {
            cycle_running: self.cycle_lock.try_lock().is_err(),
            last_report: self.last_report.read().await.clone(),
            rule_cache: self.rule_cache.stats(),
            status_cache: self.status_cache.stats(),
        }
    }

    /// Run one full cycle, optionally limited to `filter` plates.
    ///
    /// Only configuration problems are errors; fetch and delivery failures are
    /// recorded in the returned report.
    pub async fn run_cycle(
        &self,
        filter: Option<&[String]>,
        force_refresh: bool,
        cancel: &CancellationToken,
    ) -> Result<CycleReport, EngineError> {
        let Ok(_cycle) = self.cycle_lock.try_lock() else {
            return Err(EngineError::CycleInProgress);
        };

        if self.config.account.is_empty() && self.config.plate.is_empty() {
            return Err(EngineError::EmptyConfiguration);
        }
        let selected = self.selected_plates(filter)?;

        let id = Uuid::new_v4();
        let started_at = Utc::now();
        info!(cycle = %id, plates = selected.len(), force_refresh, "cycle starting");

        let today = self.rule_cache.today();
        let local_now = started_at.with_timezone(&self.config.timezone()).time();
        let next_day = is_next_day(self.config.next_day_after(), local_now);
        if force_refresh {
            for account in &self.config.account {
                self.status_cache.invalidate(&account.name).await;
            }
            self.rule_cache.invalidate(TRAFFIC_RULES, today).await;
        }

        let rules = self.traffic_rules(today).await;

        let resolution = self.resolver.resolve(&self.config.account, &self.config.plate).await;

        let targets: Vec<&ResolvedPlate> = resolution
            .matched
            .values()
            .filter(|resolved| selected.contains(resolved.config.plate.as_str()))
            .collect();

        let jobs = targets
            .into_iter()
            .map(|resolved| self.process_plate(resolved, rules.as_ref(), today, next_day, cancel));
        let results = join_all(jobs).await;

        let mut plates = Vec::new();
        let mut outcomes = Vec::new();
        for (summary, plate_outcomes) in results.into_iter().flatten() {
            plates.push(summary);
            outcomes.extend(plate_outcomes);
        }

        let admin_outcomes = if cancel.is_cancelled() {
            Vec::new()
        } else {
            self.admin.notify(&self.dispatcher, &resolution.accounts, cancel).await
        };

        let report = CycleReport {
            id,
            started_at,
            finished_at: Utc::now(),
            accounts: resolution.accounts,
            plates,
            outcomes,
            admin_outcomes,
            orphans: resolution.orphans.into_iter().map(|r| r.plate).collect(),
            unmatched: resolution
                .missing
                .into_iter()
                .filter(|plate| selected.contains(plate.as_str()))
                .collect(),
            traffic: rules.as_ref().and_then(|r| traffic_note(r, today, next_day)),
            next_day,
            cancelled: cancel.is_cancelled(),
        };

        info!(
            cycle = %report.id,
            accounts_failed = report.accounts.iter().filter(|a| !a.success).count(),
            plates = report.plates.len(),
            delivered = report.delivered(),
            failed = report.failed(),
            admin_alerts = report.admin_outcomes.len(),
            next_day = report.next_day,
            orphans = report.orphans.len(),
            cancelled = report.cancelled,
            "cycle complete"
        );

        *self.last_report.write().await = Some(report.clone());
        Ok(report)
    }

    fn selected_plates<'a>(&'a self, filter: Option<&'a [String]>) -> Result<HashSet<&'a str>, EngineError> {
        let configured: HashSet<&str> = self.config.plate.iter().map(|p| p.plate.as_str()).collect();
        match filter {
            Some(plates) if !plates.is_empty() => {
                let unknown: Vec<String> = plates
                    .iter()
                    .filter(|p| !configured.contains(p.as_str()))
                    .cloned()
                    .collect();
                if !unknown.is_empty() {
                    return Err(EngineError::UnknownPlates(unknown));
                }
                Ok(plates.iter().map(String::as_str).collect())
            }
            _ => Ok(configured),
        }
    }

    async fn traffic_rules(&self, today: NaiveDate) -> Option<RuleSet> {
        if !self.config.traffic.enabled {
            return None;
        }
        let result = self
            .rule_cache
            .get_or_fetch(TRAFFIC_RULES, today, || self.rule_fetcher.fetch_rules(today))
            .await;
        match result {
            Ok(rules) => Some(rules),
            Err(e) => {
                warn!(error = %e, "traffic rules unavailable, continuing without them");
                None
            }
        }
    }

    async fn process_plate(
        &self,
        resolved: &ResolvedPlate,
        rules: Option<&RuleSet>,
        today: NaiveDate,
        next_day: bool,
        cancel: &CancellationToken,
    ) -> Option<(PlateSummary, Vec<DispatchOutcome>)> {
        if cancel.is_cancelled() {
            return None;
        }

        let plate = &resolved.config.plate;
        let Some(plan) = plan_plate(&resolved.record, rules, today, next_day) else {
            info!(plate = %plate, "permit covers neither tomorrow nor has lapsed, nothing to send");
            return None;
        };

        let message = Message {
            title: resolved.config.title().to_string(),
            body: plan.body,
            level: plan.level,
            plate_icon: resolved.config.icon.clone(),
        };

        let outcomes = match self
            .dispatcher
            .dispatch(plate, &message, &resolved.config.channels, cancel)
            .await
        {
            Ok(outcomes) => outcomes,
            Err(e) => {
                warn!(plate = %plate, error = %e, "dispatch skipped");
                Vec::new()
            }
        };

        let summary = PlateSummary {
            plate: plate.clone(),
            level: message.level,
            message: message.body,
            restricted: plan.restricted,
            next_day,
        };
        Some((summary, outcomes))
    }
}

/// From `after` (local time) onwards, cycles report on tomorrow.
pub fn is_next_day(after: Option<NaiveTime>, now: NaiveTime) -> bool {
    after.is_some_and(|after| now >= after)
}

#[derive(Debug, PartialEq)]
struct Plan {
    body: String,
    level: Level,
    restricted: bool,
}

/// Message for one plate, or `None` when there is nothing to say.
///
/// Next-day cycles report the permit against tomorrow: a permit covering
/// tomorrow gets the usual status with tomorrow's restriction, a lapsed one
/// gets a renewal reminder, anything else is skipped.
fn plan_plate(record: &PlateRecord, rules: Option<&RuleSet>, today: NaiveDate, next_day: bool) -> Option<Plan> {
    let plate = &record.plate;
    if !next_day {
        let formatted = format::format(record);
        let restricted = rules.is_some_and(|r| r.is_restricted(plate, today));
        return Some(Plan {
            body: prefixed(restricted, TODAY_PREFIX, formatted.message),
            level: formatted.level,
            restricted,
        });
    }

    let tomorrow = today + Duration::days(1);
    let covers_tomorrow = matches!(
        (record.valid_start, record.valid_end),
        (Some(start), Some(end)) if start <= tomorrow && tomorrow <= end
    );
    if covers_tomorrow {
        let formatted = format::format(record);
        let restricted = rules.is_some_and(|r| r.is_restricted(plate, tomorrow));
        return Some(Plan {
            body: prefixed(restricted, TOMORROW_PREFIX, formatted.message),
            level: formatted.level,
            restricted,
        });
    }

    if record.valid_end.is_some_and(|end| end <= today) {
        return Some(Plan {
            body: format!("车牌{plate}明日尚未查询到进京证信息，请注意及时办理进京证。"),
            level: Level::Critical,
            restricted: false,
        });
    }
    None
}

fn prefixed(restricted: bool, prefix: &str, message: String) -> String {
    if restricted {
        format!("{prefix}{message}")
    } else {
        message
    }
}

fn traffic_note(rules: &RuleSet, today: NaiveDate, next_day: bool) -> Option<String> {
    let (date, label) = if next_day {
        (today + Duration::days(1), "明日")
    } else {
        (today, "今日")
    };
    let rule = rules.rule_for(date)?;
    if rule.limited_numbers.is_empty() {
        return Some(format!("{label}不限行"));
    }
    let numbers: Vec<String> = rule.limited_numbers.iter().map(char::to_string).collect();
    Some(format!("{label}限行尾号 {}", numbers.join("和")))
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::config::parse_config;
    use crate::error::FetchError;
    use crate::models::{Account, PlateRecord};
    use crate::notify::crypto;
    use crate::notify::tests::RecordingSender;
    use crate::rules::TrafficRule;
    use crate::store::MemoryKvStore;

    pub(crate) const CONFIG: &str = r#"
[global]
next_day_after = ""

[traffic]
enabled = true

[[account]]
name = "alice"
token = "tok"

[[plate]]
plate = "京A12345"

[[plate.channel]]
kind = "bark"
endpoint = "https://api.day.app/plain"

[[plate.channel]]
kind = "bark"
endpoint = "https://api.day.app/enc"
encryption = { enabled = true, key = "0123456789abcdef", iv = "fedcba9876543210" }
"#;

    pub(crate) struct FakeFetcher {
        pub result: Result<Vec<PlateRecord>, FetchError>,
        pub calls: AtomicUsize,
    }

    #[async_trait]
    impl StatusFetcher for FakeFetcher {
        async fn fetch_status(&self, _account: &Account) -> Result<Vec<PlateRecord>, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result.clone()
        }
    }

    /// Restricts tail numbers 5 and 0 on the requested day and the one after.
    pub(crate) struct FakeRules;

    #[async_trait]
    impl RuleFetcher for FakeRules {
        async fn fetch_rules(&self, date: NaiveDate) -> Result<RuleSet, FetchError> {
            Ok(restricting_five(date))
        }
    }

    fn restricting_five(date: NaiveDate) -> RuleSet {
        RuleSet {
            rules: [date, date + Duration::days(1)]
                .into_iter()
                .map(|date| TrafficRule {
                    date,
                    limited_numbers: vec!['5', '0'],
                })
                .collect(),
        }
    }

    fn shanghai_today() -> NaiveDate {
        Utc::now().with_timezone(&chrono_tz::Asia::Shanghai).date_naive()
    }

    pub(crate) fn active_record() -> PlateRecord {
        PlateRecord {
            plate: "京A12345".to_string(),
            permit_type: "进京证(六环外)".to_string(),
            raw_status: "approved(active)".to_string(),
            valid_start: None,
            valid_end: None,
            days_remaining: Some(2),
            source_account: "alice".to_string(),
            apply_time: None,
            remaining_uses: None,
        }
    }

    pub(crate) fn engine(
        config: &str,
        result: Result<Vec<PlateRecord>, FetchError>,
    ) -> (Engine, Arc<FakeFetcher>, Arc<RecordingSender>) {
        let config = Arc::new(parse_config(config).unwrap());
        let fetcher = Arc::new(FakeFetcher {
            result,
            calls: AtomicUsize::new(0),
        });
        let sender = Arc::new(RecordingSender::default());
        let engine = Engine::new(
            config,
            Arc::new(MemoryKvStore::new()),
            fetcher.clone(),
            Arc::new(FakeRules),
            sender.clone(),
        );
        (engine, fetcher, sender)
    }

    #[tokio::test]
    async fn delivers_to_plain_and_encrypted_channels() {
        let (engine, _, sender) = engine(CONFIG, Ok(vec![active_record()]));

        let report = engine.run_cycle(None, false, &CancellationToken::new()).await.unwrap();

        assert_eq!(report.outcomes.len(), 2);
        assert!(report.outcomes.iter().all(|o| o.success));
        assert_eq!(report.plates[0].level, Level::TimeSensitive);
        assert!(report.plates[0].message.contains("状态：active"));
        assert!(report.plates[0].message.contains("剩余 2 天"));
        assert!(report.plates[0].restricted);
        assert!(!report.plates[0].next_day);
        assert!(report.plates[0].message.starts_with(TODAY_PREFIX));
        assert!(report.admin_outcomes.is_empty());
        assert_eq!(report.traffic.as_deref(), Some("今日限行尾号 5和0"));

        let sent = sender.sent.lock().unwrap();
        let plain = sent.iter().find(|(_, e, _)| e.ends_with("plain")).unwrap();
        let encrypted = sent.iter().find(|(_, e, _)| e.ends_with("enc")).unwrap();
        assert_eq!(plain.2.level, Level::TimeSensitive);
        assert!(plain.2.ciphertext.is_none());
        assert!(encrypted.2.body.is_empty());
        let decrypted = crypto::tests::decrypt(encrypted.2.ciphertext.as_deref().unwrap());
        assert!(decrypted.contains("状态：active"));
    }

    #[tokio::test]
    async fn fetch_failure_still_produces_report() {
        let (engine, _, sender) = engine(
            CONFIG,
            Err(FetchError::Network {
                url: "https://example.invalid".to_string(),
                message: "connection reset".to_string(),
            }),
        );

        let report = engine.run_cycle(None, false, &CancellationToken::new()).await.unwrap();

        assert_eq!(report.accounts.len(), 1);
        assert!(!report.accounts[0].success);
        assert_eq!(report.accounts[0].error_kind.as_deref(), Some("network"));
        assert!(report.outcomes.is_empty());
        assert_eq!(report.unmatched, vec!["京A12345".to_string()]);
        assert!(sender.sent.lock().unwrap().is_empty());
        assert!(engine.status().await.last_report.is_some());
    }

    #[tokio::test]
    async fn force_refresh_bypasses_permit_cache() {
        let (engine, fetcher, _) = engine(CONFIG, Ok(vec![active_record()]));
        let cancel = CancellationToken::new();

        engine.run_cycle(None, false, &cancel).await.unwrap();
        engine.run_cycle(None, false, &cancel).await.unwrap();
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);

        engine.run_cycle(None, true, &cancel).await.unwrap();
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn unknown_plate_filter_is_rejected() {
        let (engine, _, _) = engine(CONFIG, Ok(vec![active_record()]));
        let filter = vec!["京Z00000".to_string()];
        let err = engine
            .run_cycle(Some(&filter), false, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::UnknownPlates(ref p) if p == &filter));
    }

    #[tokio::test]
    async fn concurrent_cycle_is_rejected() {
        let (engine, _, _) = engine(CONFIG, Ok(vec![active_record()]));
        let _running = engine.cycle_lock.try_lock().unwrap();
        let err = engine
            .run_cycle(None, false, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::CycleInProgress));
        assert!(engine.status().await.cycle_running);
    }

    #[tokio::test]
    async fn empty_configuration_aborts() {
        let (engine, _, _) = engine("", Ok(Vec::new()));
        let err = engine
            .run_cycle(None, false, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::EmptyConfiguration));
    }

    #[tokio::test]
    async fn cancelled_cycle_sends_nothing() {
        let (engine, _, sender) = engine(CONFIG, Ok(vec![active_record()]));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = engine.run_cycle(None, false, &cancel).await.unwrap();

        assert!(report.cancelled);
        assert!(report.outcomes.is_empty());
        assert!(sender.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn orphan_records_are_reported_not_sent() {
        let mut orphan = active_record();
        orphan.plate = "京B99999".to_string();
        let (engine, _, sender) = engine(CONFIG, Ok(vec![orphan]));

        let report = engine.run_cycle(None, false, &CancellationToken::new()).await.unwrap();

        assert_eq!(report.orphans, vec!["京B99999".to_string()]);
        assert!(sender.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn next_day_cycle_reports_tomorrow() {
        let config = CONFIG.replace(r#"next_day_after = """#, r#"next_day_after = "00:00""#);
        let today = shanghai_today();
        let mut record = active_record();
        record.valid_start = Some(today);
        record.valid_end = Some(today + Duration::days(3));
        let (engine, _, sender) = engine(&config, Ok(vec![record]));

        let report = engine.run_cycle(None, false, &CancellationToken::new()).await.unwrap();

        assert!(report.next_day);
        assert_eq!(report.traffic.as_deref(), Some("明日限行尾号 5和0"));
        assert!(report.plates[0].next_day);
        assert!(report.plates[0].message.starts_with(TOMORROW_PREFIX));
        assert_eq!(sender.sent.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn next_day_cycle_skips_permit_not_covering_tomorrow() {
        let config = CONFIG.replace(r#"next_day_after = """#, r#"next_day_after = "00:00""#);
        let (engine, _, sender) = engine(&config, Ok(vec![active_record()]));

        let report = engine.run_cycle(None, false, &CancellationToken::new()).await.unwrap();

        assert!(report.plates.is_empty());
        assert!(sender.sent.lock().unwrap().is_empty());
    }

    #[test]
    fn today_plan_prefixes_todays_restriction() {
        let today = shanghai_today();
        let rules = restricting_five(today);
        let plan = plan_plate(&active_record(), Some(&rules), today, false).unwrap();
        assert!(plan.restricted);
        assert!(plan.body.starts_with(TODAY_PREFIX));

        let mut unrestricted = active_record();
        unrestricted.plate = "京A12341".to_string();
        let plan = plan_plate(&unrestricted, Some(&rules), today, false).unwrap();
        assert!(!plan.restricted);
        assert!(!plan.body.starts_with(TODAY_PREFIX));
    }

    #[test]
    fn next_day_plan_checks_tomorrow_against_validity() {
        let today = NaiveDate::from_ymd_opt(2024, 3, 4).unwrap();
        let rules = RuleSet {
            rules: vec![TrafficRule {
                date: today + Duration::days(1),
                limited_numbers: vec!['5'],
            }],
        };

        let mut covered = active_record();
        covered.valid_start = Some(today);
        covered.valid_end = Some(today + Duration::days(1));
        let plan = plan_plate(&covered, Some(&rules), today, true).unwrap();
        assert!(plan.restricted);
        assert!(plan.body.starts_with(TOMORROW_PREFIX));

        let mut lapsed = active_record();
        lapsed.valid_start = Some(today - Duration::days(6));
        lapsed.valid_end = Some(today);
        let plan = plan_plate(&lapsed, Some(&rules), today, true).unwrap();
        assert_eq!(plan.level, Level::Critical);
        assert_eq!(plan.body, "车牌京A12345明日尚未查询到进京证信息，请注意及时办理进京证。");
        assert!(!plan.restricted);

        let mut pending = active_record();
        pending.valid_start = Some(today + Duration::days(2));
        pending.valid_end = Some(today + Duration::days(8));
        assert_eq!(plan_plate(&pending, Some(&rules), today, true), None);
        assert_eq!(plan_plate(&active_record(), Some(&rules), today, true), None);
    }

    #[test]
    fn next_day_switch_follows_local_time() {
        let after = NaiveTime::from_hms_opt(20, 30, 0);
        assert!(!is_next_day(after, NaiveTime::from_hms_opt(20, 29, 59).unwrap()));
        assert!(is_next_day(after, NaiveTime::from_hms_opt(20, 30, 0).unwrap()));
        assert!(is_next_day(after, NaiveTime::from_hms_opt(23, 55, 0).unwrap()));
        assert!(!is_next_day(None, NaiveTime::from_hms_opt(23, 55, 0).unwrap()));
    }

    #[tokio::test]
    async fn auth_failure_alerts_admin_channels() {
        let config = format!(
            "{CONFIG}\n[[admin.channel]]\nkind = \"bark\"\nendpoint = \"https://api.day.app/ops\"\n"
        );
        let (engine, _, sender) = engine(
            &config,
            Err(FetchError::Auth {
                account: "alice".to_string(),
                message: "token expired".to_string(),
            }),
        );
        let cancel = CancellationToken::new();

        let report = engine.run_cycle(None, false, &cancel).await.unwrap();
        assert_eq!(report.admin_outcomes.len(), 1);
        assert!(report.admin_outcomes[0].success);

        let again = engine.run_cycle(None, false, &cancel).await.unwrap();
        assert!(again.admin_outcomes.is_empty());

        let sent = sender.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].1.ends_with("ops"));
        assert!(sent[0].2.body.contains("账户: alice"));
    }
}
