use anyhow::Context;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::android_dumpsys_usagestats_parser;
use crate::shell::{exec, shell_exec};

const FOCUS_KEYS: &[&str] = &["mCurrentFocus", "mFocusedApp", "mSurface"];

/// One package's most recent use inside a queried window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageStat {
    pub package: String,
    pub last_time_used: NaiveDateTime,
}

pub trait UsageStatsSource: Send {
    fn query_usage_stats(
        &self,
        begin: NaiveDateTime,
        end: NaiveDateTime,
    ) -> anyhow::Result<Vec<UsageStat>>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForegroundSourceKind {
    #[default]
    UsageStats,
    WindowFocus,
}

pub fn source_for(kind: ForegroundSourceKind) -> Box<dyn UsageStatsSource> {
    match kind {
        ForegroundSourceKind::UsageStats => Box::new(DumpsysUsageStats),
        ForegroundSourceKind::WindowFocus => Box::new(WindowFocus),
    }
}

/// Picks the record used most recently. Ties go to the later record.
pub fn current_foreground(stats: &[UsageStat]) -> Option<&UsageStat> {
    stats
        .iter()
        .reduce(|best, stat| {
            if stat.last_time_used >= best.last_time_used {
                stat
            } else {
                best
            }
        })
}

pub struct DumpsysUsageStats;

impl UsageStatsSource for DumpsysUsageStats {
    fn query_usage_stats(
        &self,
        begin: NaiveDateTime,
        end: NaiveDateTime,
    ) -> anyhow::Result<Vec<UsageStat>> {
        let output = shell_exec("dumpsys usagestats").context("dumpsys usagestats failed")?;
        let events = android_dumpsys_usagestats_parser::parse(output.as_str());
        let mut stats = android_dumpsys_usagestats_parser::last_used(&events, begin);
        stats.retain(|stat| stat.last_time_used <= end);
        Ok(stats)
    }
}

/// Reads the focused window instead of usage events. Useful on builds where
/// `dumpsys usagestats` is restricted or lags behind.
pub struct WindowFocus;

impl UsageStatsSource for WindowFocus {
    fn query_usage_stats(
        &self,
        _begin: NaiveDateTime,
        end: NaiveDateTime,
    ) -> anyhow::Result<Vec<UsageStat>> {
        let output = exec("dumpsys", ["window", "windows"]).context("dumpsys window failed")?;

        Ok(parse_focused_package(output.as_str())
            .map(|package| UsageStat {
                package,
                last_time_used: end,
            })
            .into_iter()
            .collect())
    }
}

fn is_focus_line(line: &str) -> bool {
    FOCUS_KEYS.iter().any(|key| line.contains(key))
}

/*
output:
  mCurrentFocus=Window{8c1f2a0 u0 com.android.chrome/com.google.android.apps.chrome.Main}
  mSurface=Surface(name=StatusBar)/@0xc6d3221
  mSurface=Surface(name=com.android.chrome/com.google.android.apps.chrome.Main)/@0x4647b7f
*/
fn parse_focused_package(output: &str) -> Option<String> {
    output.lines().filter(|line| is_focus_line(line)).find_map(|line| {
        let component = if let Some(start) = line.find("mCurrentFocus=Window{") {
            let inner = &line[start..];
            let inner = &inner[inner.find('{')? + 1..inner.find('}')?];
            inner.split_whitespace().last()?
        } else if let Some(start) = line.find("(name=") {
            let inner = &line[start + "(name=".len()..];
            &inner[..inner.find(')')?]
        } else {
            return None;
        };

        let (package, _activity) = component.split_once('/')?;
        let package = package.trim();
        (!package.is_empty()).then(|| package.to_string())
    })
}
