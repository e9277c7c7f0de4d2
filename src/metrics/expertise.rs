//! Technology detection and per-person scoring.
//!
//! Both scores are pure, bounded to 0–100 and monotonic in every signal.
//! Raw signals go through piecewise linear curves; values between
//! breakpoints are interpolated and values past the last breakpoint clamp.

use crate::model::Commit;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

struct Breakpoint {
    input: f64,
    score: f64,
}

fn piecewise(value: f64, curve: &[Breakpoint]) -> f64 {
    debug_assert!(
        curve.windows(2).all(|w| w[0].input <= w[1].input),
        "Breakpoints must be sorted by input in ascending order"
    );
    let (first, last) = match (curve.first(), curve.last()) {
        (Some(first), Some(last)) => (first, last),
        _ => return 0.0,
    };
    if value <= first.input {
        return first.score;
    }
    for w in curve.windows(2) {
        if value <= w[1].input {
            let frac = (value - w[0].input) / (w[1].input - w[0].input);
            return w[0].score + frac * (w[1].score - w[0].score);
        }
    }
    last.score
}

/// Distinct files touched in one technology. A single file stays low.
const TECH_BREADTH_CURVE: &[Breakpoint] = &[
    Breakpoint { input: 0.0, score: 0.0 },
    Breakpoint { input: 1.0, score: 12.0 },
    Breakpoint { input: 3.0, score: 35.0 },
    Breakpoint { input: 8.0, score: 65.0 },
    Breakpoint { input: 20.0, score: 90.0 },
    Breakpoint { input: 50.0, score: 100.0 },
];

/// Lines added plus removed in one technology.
const TECH_VOLUME_CURVE: &[Breakpoint] = &[
    Breakpoint { input: 0.0, score: 0.0 },
    Breakpoint { input: 50.0, score: 15.0 },
    Breakpoint { input: 250.0, score: 40.0 },
    Breakpoint { input: 1000.0, score: 70.0 },
    Breakpoint { input: 5000.0, score: 95.0 },
    Breakpoint { input: 20000.0, score: 100.0 },
];

/// Commits a person made in one repository.
const COMMIT_VOLUME_CURVE: &[Breakpoint] = &[
    Breakpoint { input: 0.0, score: 0.0 },
    Breakpoint { input: 1.0, score: 10.0 },
    Breakpoint { input: 5.0, score: 35.0 },
    Breakpoint { input: 20.0, score: 70.0 },
    Breakpoint { input: 60.0, score: 90.0 },
    Breakpoint { input: 150.0, score: 100.0 },
];

/// Distinct files a person touched in one repository.
const FILES_TOUCHED_CURVE: &[Breakpoint] = &[
    Breakpoint { input: 0.0, score: 0.0 },
    Breakpoint { input: 1.0, score: 10.0 },
    Breakpoint { input: 5.0, score: 35.0 },
    Breakpoint { input: 20.0, score: 70.0 },
    Breakpoint { input: 60.0, score: 90.0 },
    Breakpoint { input: 200.0, score: 100.0 },
];

const TECH_BREADTH_WEIGHT: f64 = 0.6;
const TECH_VOLUME_WEIGHT: f64 = 0.4;

const EXPERTISE_VOLUME_WEIGHT: f64 = 0.45;
const EXPERTISE_BREADTH_WEIGHT: f64 = 0.25;
const EXPERTISE_RECENCY_WEIGHT: f64 = 0.30;
/// Recency halves every this many days.
pub const RECENCY_HALF_LIFE_DAYS: f64 = 90.0;

fn to_score(value: f64) -> u8 {
    value.clamp(0.0, 100.0).round() as u8
}

const BUILTIN_EXTENSIONS: &[(&str, &str)] = &[
    ("rs", "Rust"),
    ("py", "Python"),
    ("ts", "TypeScript"),
    ("tsx", "TypeScript"),
    ("js", "JavaScript"),
    ("jsx", "JavaScript"),
    ("mjs", "JavaScript"),
    ("cjs", "JavaScript"),
    ("java", "Java"),
    ("kt", "Kotlin"),
    ("kts", "Kotlin"),
    ("scala", "Scala"),
    ("go", "Go"),
    ("rb", "Ruby"),
    ("php", "PHP"),
    ("cs", "C#"),
    ("c", "C"),
    ("h", "C"),
    ("cc", "C++"),
    ("cpp", "C++"),
    ("cxx", "C++"),
    ("hpp", "C++"),
    ("swift", "Swift"),
    ("dart", "Dart"),
    ("ex", "Elixir"),
    ("exs", "Elixir"),
    ("sql", "SQL"),
    ("html", "HTML"),
    ("css", "CSS"),
    ("scss", "CSS"),
    ("sass", "CSS"),
    ("vue", "Vue"),
    ("svelte", "Svelte"),
    ("sh", "Shell"),
    ("bash", "Shell"),
    ("tf", "Terraform"),
    ("proto", "Protocol Buffers"),
    ("yaml", "YAML"),
    ("yml", "YAML"),
    ("toml", "TOML"),
    ("json", "JSON"),
    ("md", "Markdown"),
];

const BUILTIN_FILE_NAMES: &[(&str, &str)] = &[
    ("Dockerfile", "Docker"),
    ("docker-compose.yml", "Docker"),
    ("docker-compose.yaml", "Docker"),
    ("Makefile", "Make"),
    ("CMakeLists.txt", "CMake"),
    ("Jenkinsfile", "Jenkins"),
];

/// Extension and file-name lookup table. Paths it cannot map are skipped.
#[derive(Debug, Clone)]
pub struct TechnologyMap {
    by_extension: HashMap<String, String>,
    by_file_name: HashMap<String, String>,
}

impl TechnologyMap {
    pub fn builtin() -> Self {
        Self {
            by_extension: BUILTIN_EXTENSIONS
                .iter()
                .map(|(ext, label)| (ext.to_string(), label.to_string()))
                .collect(),
            by_file_name: BUILTIN_FILE_NAMES
                .iter()
                .map(|(name, label)| (name.to_string(), label.to_string()))
                .collect(),
        }
    }

    /// Built-in table with `overrides` (`extension -> label`) applied on top.
    pub fn with_overrides(overrides: &BTreeMap<String, String>) -> Self {
        let mut map = Self::builtin();
        for (extension, label) in overrides {
            let extension = extension.trim().trim_start_matches('.').to_lowercase();
            map.by_extension.insert(extension, label.trim().to_string());
        }
        map
    }

    pub fn detect(&self, path: &str) -> Option<&str> {
        let file_name = path.rsplit('/').next().unwrap_or(path);
        if let Some(label) = self.by_file_name.get(file_name) {
            return Some(label.as_str());
        }
        let extension = Path::new(file_name)
            .extension()
            .and_then(|s| s.to_str())?
            .to_lowercase();
        self.by_extension.get(&extension).map(String::as_str)
    }
}

impl Default for TechnologyMap {
    fn default() -> Self {
        Self::builtin()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TechnologyScore {
    pub name: String,
    pub level: u8,
    pub files: usize,
    pub lines: u64,
}

/// Proficiency from file diversity and change volume in one technology.
pub fn proficiency(files: usize, lines: u64) -> u8 {
    let breadth = piecewise(files as f64, TECH_BREADTH_CURVE);
    let volume = piecewise(lines as f64, TECH_VOLUME_CURVE);
    to_score(TECH_BREADTH_WEIGHT * breadth + TECH_VOLUME_WEIGHT * volume)
}

/// Per-technology proficiency for the author of `window`.
pub fn technology_scores(window: &[Commit], technologies: &TechnologyMap) -> Vec<TechnologyScore> {
    let mut map: HashMap<&str, (HashSet<&str>, u64)> = HashMap::new();
    for commit in window {
        for file in &commit.files {
            let Some(label) = technologies.detect(&file.path) else {
                continue;
            };
            let entry = map.entry(label).or_default();
            entry.0.insert(file.path.as_str());
            entry.1 += file.lines_changed();
        }
    }

    let mut scores: Vec<TechnologyScore> = map
        .into_iter()
        .map(|(name, (files, lines))| TechnologyScore {
            name: name.to_string(),
            level: proficiency(files.len(), lines),
            files: files.len(),
            lines,
        })
        .collect();
    scores.sort_by(|a, b| b.level.cmp(&a.level).then_with(|| a.name.cmp(&b.name)));
    scores
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpertiseSignals {
    pub commits: usize,
    pub distinct_files: usize,
    pub last_commit: DateTime<Utc>,
}

/// Expertise of one person in one repository.
///
/// Combines commit volume, file breadth and an exponentially decayed
/// recency term. No commits means no expertise.
pub fn expertise_score(signals: &ExpertiseSignals, now: DateTime<Utc>) -> u8 {
    if signals.commits == 0 {
        return 0;
    }
    let volume = piecewise(signals.commits as f64, COMMIT_VOLUME_CURVE);
    let breadth = piecewise(signals.distinct_files as f64, FILES_TOUCHED_CURVE);
    let age_days = ((now - signals.last_commit).num_seconds() as f64 / 86_400.0).max(0.0);
    let recency = 100.0 * 0.5f64.powf(age_days / RECENCY_HALF_LIFE_DAYS);

    to_score(
        EXPERTISE_VOLUME_WEIGHT * volume
            + EXPERTISE_BREADTH_WEIGHT * breadth
            + EXPERTISE_RECENCY_WEIGHT * recency,
    )
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryContribution {
    pub repository_id: String,
    pub commits: usize,
    pub distinct_files: usize,
    pub last_activity: DateTime<Utc>,
    pub expertise: u8,
}

/// Group a person's window by repository, most commits first.
pub fn repository_contributions(window: &[Commit], now: DateTime<Utc>) -> Vec<RepositoryContribution> {
    let mut map: HashMap<&str, (usize, HashSet<&str>, DateTime<Utc>)> = HashMap::new();
    for commit in window {
        let entry = map
            .entry(commit.repository_id.as_str())
            .or_insert_with(|| (0, HashSet::new(), commit.committed_at));
        entry.0 += 1;
        entry.1.extend(commit.files.iter().map(|f| f.path.as_str()));
        if commit.committed_at > entry.2 {
            entry.2 = commit.committed_at;
        }
    }

    let mut contributions: Vec<RepositoryContribution> = map
        .into_iter()
        .map(|(repository_id, (commits, files, last_activity))| {
            let signals = ExpertiseSignals {
                commits,
                distinct_files: files.len(),
                last_commit: last_activity,
            };
            RepositoryContribution {
                repository_id: repository_id.to_string(),
                commits,
                distinct_files: files.len(),
                last_activity,
                expertise: expertise_score(&signals, now),
            }
        })
        .collect();
    contributions.sort_by(|a, b| {
        b.commits
            .cmp(&a.commits)
            .then_with(|| a.repository_id.cmp(&b.repository_id))
    });
    contributions
}
