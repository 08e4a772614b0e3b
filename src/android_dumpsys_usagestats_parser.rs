/*
user=0
  Last 24 hour events (timeRange="2024/11/23 01:59 – 2024/11/24 01:59" )
    time="2024-11-23 10:44:56" type=SCREEN_INTERACTIVE package=android flags=0x0
    time="2024-11-23 10:44:56" type=ACTIVITY_RESUMED package=com.android.settings class=com.android.settings.FallbackHome instanceId=225113592 taskRootPackage=com.android.settings taskRootClass=com.android.settings.FallbackHome flags=0x0
    time="2024-11-23 10:44:56" type=KEYGUARD_SHOWN package=android flags=0x0
    time="2024-11-23 10:44:56" type=ACTIVITY_PAUSED package=com.android.settings class=com.android.settings.FallbackHome instanceId=225113592 taskRootPackage=com.android.settings taskRootClass=com.android.settings.FallbackHome flags=0x0
    time="2024-11-23 10:44:56" type=STANDBY_BUCKET_CHANGED package=com.amazon.mShop.android.shopping standbyBucket=50 reason=t flags=0x0
  In-memory daily stats
    timeRange="2024/11/24 00:00 – 2024/11/24 01:59"
*/

use std::collections::HashMap;

use anyhow::Context;
use chrono::NaiveDateTime;

use crate::foreground::UsageStat;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Event types that move a package to the foreground.
const FOREGROUND_EVENTS: &[&str] = &["ACTIVITY_RESUMED", "MOVE_TO_FOREGROUND"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageStatsEvent {
    pub time: NaiveDateTime,
    pub event_type: String,
    pub package: String,
    pub class: Option<String>,
}

fn parse_usagestats_event(line: &str) -> anyhow::Result<UsageStatsEvent> {
    let get_by_key = |start: &str, end: &str| -> Option<String> {
        let start_index = line.find(start)?;
        let rest = &line[start_index + start.len()..];
        let end_index = rest.find(end).unwrap_or(rest.len());
        Some(rest[..end_index].to_string())
    };
    let time = get_by_key("time=\"", "\"").context("Failed to get time")?;
    let time = NaiveDateTime::parse_from_str(time.as_str(), TIME_FORMAT)
        .with_context(|| format!("Failed to parse time {time}"))?;
    let event_type = get_by_key(" type=", " ").context("Failed to get event_type")?;
    let package = get_by_key(" package=", " ").context("Failed to get package")?;
    let class = get_by_key(" class=", " ");

    Ok(UsageStatsEvent {
        time,
        event_type,
        package,
        class,
    })
}

pub fn parse(output: &str) -> Vec<UsageStatsEvent> {
    // start from Last 24 hour events , end at the next line with timeRange=
    output
        .lines()
        .skip_while(|line| !line.contains("Last 24 hour events"))
        .skip(1)
        .take_while(|line| !line.contains("timeRange="))
        .filter_map(|line| parse_usagestats_event(line).ok())
        .collect()
}

/// Folds events into one record per package, keeping the latest foreground
/// transition at or after `since`. Records come back in the order their
/// packages were last brought forward.
pub fn last_used(events: &[UsageStatsEvent], since: NaiveDateTime) -> Vec<UsageStat> {
    let mut latest: HashMap<&str, (NaiveDateTime, usize)> = HashMap::new();

    for (seq, event) in events.iter().enumerate() {
        if event.time < since || !FOREGROUND_EVENTS.contains(&event.event_type.as_str()) {
            continue;
        }
        latest.insert(event.package.as_str(), (event.time, seq));
    }

    let mut stats: Vec<(usize, UsageStat)> = latest
        .into_iter()
        .map(|(package, (last_time_used, seq))| {
            (
                seq,
                UsageStat {
                    package: package.to_string(),
                    last_time_used,
                },
            )
        })
        .collect();
    stats.sort_by_key(|(seq, _)| *seq);
    stats.into_iter().map(|(_, stat)| stat).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const DUMP: &str = r#"
user=0
  Last 24 hour events (timeRange="2024/11/23 01:59 – 2024/11/24 01:59" )
    time="2024-11-23 10:44:56" type=SCREEN_INTERACTIVE package=android flags=0x0
    time="2024-11-23 10:44:56" type=ACTIVITY_RESUMED package=com.android.settings class=com.android.settings.FallbackHome instanceId=225113592 flags=0x0
    time="2024-11-23 10:45:01" type=ACTIVITY_PAUSED package=com.android.settings class=com.android.settings.FallbackHome instanceId=225113592 flags=0x0
    time="2024-11-23 10:45:01" type=ACTIVITY_RESUMED package=com.x.social class=com.x.social.Main instanceId=1 flags=0x0
    garbage line without fields
    time="2024-11-23 10:45:30" type=ACTIVITY_RESUMED package=com.android.settings class=com.android.settings.Settings instanceId=2 flags=0x0
  In-memory daily stats
    timeRange="2024/11/24 00:00 – 2024/11/24 01:59"
    time="2024-11-23 11:00:00" type=ACTIVITY_RESUMED package=com.outside.section flags=0x0
"#;

    fn at(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, TIME_FORMAT).unwrap()
    }

    #[test]
    fn parses_only_the_recent_events_section() {
        let events = parse(DUMP);
        assert_eq!(events.len(), 5);
        assert!(events.iter().all(|e| e.package != "com.outside.section"));
        assert_eq!(events[0].event_type, "SCREEN_INTERACTIVE");
        assert_eq!(events[0].class, None);
        assert_eq!(events[3].package, "com.x.social");
        assert_eq!(events[3].class.as_deref(), Some("com.x.social.Main"));
        assert_eq!(events[3].time, at("2024-11-23 10:45:01"));
    }

    #[test]
    fn empty_dump_yields_no_events() {
        assert!(parse("").is_empty());
        assert!(parse("user=0\n  nothing here\n").is_empty());
    }

    #[test]
    fn last_used_keeps_latest_resume_per_package() {
        let events = parse(DUMP);
        let stats = last_used(&events, at("2024-11-23 10:00:00"));

        assert_eq!(stats.len(), 2);
        assert_eq!(stats[0].package, "com.x.social");
        assert_eq!(stats[1].package, "com.android.settings");
        assert_eq!(stats[1].last_time_used, at("2024-11-23 10:45:30"));
    }

    #[test]
    fn last_used_drops_events_before_window() {
        let events = parse(DUMP);
        let stats = last_used(&events, at("2024-11-23 10:45:10"));

        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].package, "com.android.settings");
    }
}
