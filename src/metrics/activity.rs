use super::percentage;
use crate::config::ActivityThresholds;
use crate::model::Commit;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Length of the recent-activity sub-window.
pub const RECENT_DAYS: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityLevel {
    High,
    Medium,
    Low,
    Stale,
}

impl ActivityLevel {
    pub fn label(&self) -> &'static str {
        match self {
            ActivityLevel::High => "HIGH",
            ActivityLevel::Medium => "MEDIUM",
            ActivityLevel::Low => "LOW",
            ActivityLevel::Stale => "STALE",
        }
    }

    /// Classify a count of commits from the last [`RECENT_DAYS`].
    pub fn classify(recent_commits: usize, thresholds: &ActivityThresholds) -> Self {
        if recent_commits == 0 {
            ActivityLevel::Stale
        } else if recent_commits >= thresholds.high {
            ActivityLevel::High
        } else if recent_commits >= thresholds.medium {
            ActivityLevel::Medium
        } else {
            ActivityLevel::Low
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivitySnapshot {
    pub total_commits: usize,
    pub contributors: usize,
    pub recent_commits: usize,
    pub activity: ActivityLevel,
    pub knowledge_concentration: u8,
    pub last_commit: Option<DateTime<Utc>>,
}

pub fn recent_cutoff(now: DateTime<Utc>) -> DateTime<Utc> {
    now - Duration::days(RECENT_DAYS)
}

/// Commits of the window inside the last 30 days. Commits outside the window never count.
pub fn recent_commits(window: &[Commit], now: DateTime<Utc>) -> usize {
    let cutoff = recent_cutoff(now);
    window.iter().filter(|c| c.committed_at >= cutoff).count()
}

pub fn distinct_authors(window: &[Commit]) -> usize {
    window
        .iter()
        .map(|c| c.author.email.as_str())
        .collect::<HashSet<_>>()
        .len()
}

/// Share of the window held by its single most active author.
pub fn knowledge_concentration(window: &[Commit]) -> u8 {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for commit in window {
        *counts.entry(commit.author.email.as_str()).or_insert(0) += 1;
    }
    let top = counts.values().copied().max().unwrap_or(0);
    percentage(top, window.len())
}

pub fn summarize_activity(
    window: &[Commit],
    now: DateTime<Utc>,
    thresholds: &ActivityThresholds,
) -> ActivitySnapshot {
    let recent = recent_commits(window, now);
    ActivitySnapshot {
        total_commits: window.len(),
        contributors: distinct_authors(window),
        recent_commits: recent,
        activity: ActivityLevel::classify(recent, thresholds),
        knowledge_concentration: knowledge_concentration(window),
        last_commit: window.iter().map(|c| c.committed_at).max(),
    }
}
