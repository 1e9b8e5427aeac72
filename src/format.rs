use crate::models::{Level, PlateRecord};

/// Raw-status markers meaning the application was approved.
const APPROVED_MARKERS: &[&str] = &["审核通过", "approved"];

/// Rendered statuses that mean the permit is currently in force.
const ACTIVE_STATES: &[&str] = &["生效中", "active", "valid"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormattedStatus {
    pub message: String,
    pub level: Level,
}

/// Text inside the first ASCII or full-width parenthesis pair.
fn parenthesized(s: &str) -> Option<&str> {
    [('(', ')'), ('（', '）')].iter().find_map(|&(open, close)| {
        let start = s.find(open)? + open.len_utf8();
        let len = s[start..].find(close)?;
        Some(&s[start..start + len])
    })
}

/// Approved statuses render as their qualifier; everything else verbatim.
pub fn render_status(raw_status: &str) -> &str {
    if APPROVED_MARKERS.iter().any(|marker| raw_status.contains(marker))
        && let Some(qualifier) = parenthesized(raw_status)
    {
        return qualifier;
    }
    raw_status
}

pub fn is_active(rendered: &str) -> bool {
    ACTIVE_STATES.contains(&rendered)
}

pub fn select_level(active: bool, days_remaining: Option<i64>) -> Level {
    match (active, days_remaining) {
        (true, Some(days)) if days <= 1 => Level::Critical,
        (true, Some(days)) if days <= 3 => Level::TimeSensitive,
        (true, Some(_)) => Level::Active,
        _ => Level::Passive,
    }
}

fn permit_label(permit_type: &str) -> &str {
    parenthesized(permit_type).unwrap_or(permit_type)
}

/// Render the notification body and severity for one permit record.
pub fn format(record: &PlateRecord) -> FormattedStatus {
    let status = render_status(&record.raw_status);
    let active = is_active(status);

    let mut message = format!("车牌{}的进京证({})状态：{}", record.plate, permit_label(&record.permit_type), status);

    if active {
        match (record.valid_start, record.valid_end) {
            (Some(start), Some(end)) => message.push_str(&format!("，有效期 {start} 至 {end}")),
            (None, Some(end)) => message.push_str(&format!("，有效期至 {end}")),
            _ => {}
        }
        match record.days_remaining {
            Some(days) => message.push_str(&format!("，剩余 {days} 天。")),
            None => message.push('。'),
        }
    } else {
        message.push('。');
    }

    if let Some(uses) = &record.remaining_uses {
        message.push_str(&format!("六环内进京证剩余 {uses} 次。"));
    }

    FormattedStatus {
        message,
        level: select_level(active, record.days_remaining),
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    fn record(raw_status: &str, days: Option<i64>) -> PlateRecord {
        PlateRecord {
            plate: "京A12345".to_string(),
            permit_type: "进京证（六环外）".to_string(),
            raw_status: raw_status.to_string(),
            valid_start: NaiveDate::from_ymd_opt(2024, 1, 1),
            valid_end: NaiveDate::from_ymd_opt(2024, 1, 7),
            days_remaining: days,
            source_account: "alice".to_string(),
            apply_time: None,
            remaining_uses: None,
        }
    }

    #[test]
    fn approved_status_renders_qualifier_only() {
        assert_eq!(render_status("approved(active)"), "active");
        assert_eq!(render_status("审核通过(生效中)"), "生效中");
        assert_eq!(render_status("审核通过（待生效）"), "待生效");
    }

    #[test]
    fn other_statuses_render_verbatim() {
        for raw in ["审核中", "已失效", "rejected(bad photo)", "审核通过", ""] {
            assert_eq!(render_status(raw), raw);
        }
    }

    #[test]
    fn level_boundaries() {
        assert_eq!(select_level(true, Some(-1)), Level::Critical);
        assert_eq!(select_level(true, Some(0)), Level::Critical);
        assert_eq!(select_level(true, Some(1)), Level::Critical);
        assert_eq!(select_level(true, Some(2)), Level::TimeSensitive);
        assert_eq!(select_level(true, Some(3)), Level::TimeSensitive);
        assert_eq!(select_level(true, Some(4)), Level::Active);
        assert_eq!(select_level(true, Some(30)), Level::Active);
        assert_eq!(select_level(true, None), Level::Passive);
        assert_eq!(select_level(false, Some(1)), Level::Passive);
    }

    #[test]
    fn active_message_includes_window_and_remainder() {
        let formatted = format(&record("approved(active)", Some(2)));
        assert_eq!(formatted.level, Level::TimeSensitive);
        assert_eq!(
            formatted.message,
            "车牌京A12345的进京证(六环外)状态：active，有效期 2024-01-01 至 2024-01-07，剩余 2 天。"
        );
    }

    #[test]
    fn inactive_message_omits_window() {
        let formatted = format(&record("审核中", Some(2)));
        assert_eq!(formatted.level, Level::Passive);
        assert_eq!(formatted.message, "车牌京A12345的进京证(六环外)状态：审核中。");
    }

    #[test]
    fn remaining_uses_are_appended() {
        let mut r = record("审核通过(生效中)", Some(5));
        r.remaining_uses = Some("8".to_string());
        let formatted = format(&r);
        assert!(formatted.message.ends_with("剩余 5 天。六环内进京证剩余 8 次。"));
        assert_eq!(formatted.level, Level::Active);
    }

    #[test]
    fn format_is_idempotent() {
        let r = record("审核通过(生效中)", Some(1));
        assert_eq!(format(&r), format(&r));
    }
}
