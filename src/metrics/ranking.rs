use super::apportion;
use crate::model::Commit;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopContributor {
    pub name: String,
    pub email: String,
    pub commits: usize,
    pub percentage: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hotspot {
    pub path: String,
    pub changes: usize,
    pub last_modified: DateTime<Utc>,
    pub contributors: usize,
}

struct ContributorEntry<'a> {
    email: &'a str,
    // First name seen while walking the window, i.e. the most recent one.
    name: &'a str,
    commits: usize,
}

struct HotspotEntry<'a> {
    path: &'a str,
    changes: usize,
    last_modified: DateTime<Utc>,
    authors: HashSet<&'a str>,
}

impl<'a> HotspotEntry<'a> {
    fn new(path: &'a str, at: DateTime<Utc>) -> Self {
        Self {
            path,
            changes: 0,
            last_modified: at,
            authors: HashSet::new(),
        }
    }

    fn add_change(&mut self, commit: &'a Commit) {
        self.changes += 1;
        if commit.committed_at > self.last_modified {
            self.last_modified = commit.committed_at;
        }
        self.authors.insert(commit.author.email.as_str());
    }
}

/// Rank window authors by commit count, then name, then email.
///
/// Percentages are apportioned over every author in the window before the
/// list is cut to `limit`, so the full list sums to exactly 100.
pub fn top_contributors(window: &[Commit], limit: usize) -> Vec<TopContributor> {
    let mut map: HashMap<&str, ContributorEntry<'_>> = HashMap::new();
    for commit in window {
        map.entry(commit.author.email.as_str())
            .or_insert_with(|| ContributorEntry {
                email: commit.author.email.as_str(),
                name: commit.author.name.as_str(),
                commits: 0,
            })
            .commits += 1;
    }

    let mut entries: Vec<_> = map.into_values().collect();
    entries.sort_by(|a, b| {
        b.commits
            .cmp(&a.commits)
            .then_with(|| a.name.cmp(b.name))
            .then_with(|| a.email.cmp(b.email))
    });

    let shares = apportion(&entries.iter().map(|e| e.commits).collect::<Vec<_>>());
    entries
        .into_iter()
        .zip(shares)
        .take(limit)
        .map(|(entry, percentage)| TopContributor {
            name: entry.name.to_string(),
            email: entry.email.to_string(),
            commits: entry.commits,
            percentage,
        })
        .collect()
}

/// Rank paths by how many window commits touched them.
///
/// Ties go to the most recently modified path, then path order.
pub fn top_hotspots(window: &[Commit], limit: usize) -> Vec<Hotspot> {
    let mut map: HashMap<&str, HotspotEntry<'_>> = HashMap::new();
    for commit in window {
        let mut seen_paths: HashSet<&str> = HashSet::new();
        for file in &commit.files {
            if file.path.is_empty() || !seen_paths.insert(file.path.as_str()) {
                continue;
            }
            map.entry(file.path.as_str())
                .or_insert_with(|| HotspotEntry::new(file.path.as_str(), commit.committed_at))
                .add_change(commit);
        }
    }

    let mut entries: Vec<_> = map.into_values().collect();
    entries.sort_by(|a, b| {
        b.changes
            .cmp(&a.changes)
            .then_with(|| b.last_modified.cmp(&a.last_modified))
            .then_with(|| a.path.cmp(b.path))
    });

    entries
        .into_iter()
        .take(limit)
        .map(|entry| Hotspot {
            path: entry.path.to_string(),
            changes: entry.changes,
            last_modified: entry.last_modified,
            contributors: entry.authors.len(),
        })
        .collect()
}
